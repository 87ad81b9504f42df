//! dld core - shared infrastructure for staging Linked Data dumps
//!
//! Logging, progress bars, the blocking HTTP facade used to size and
//! download remote datasets, and the cooperative shutdown flag.

pub mod download_slots;
pub mod logging;
pub mod progress;
pub mod shutdown;
pub mod stream;

// Re-exports for convenience
pub use download_slots::{DownloadSlot, DownloadSlots};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, fmt_bytes};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown};
pub use stream::{
    HttpConfig, ProgressReader, StreamError, content_length, download_to_file, http_config,
    part_path, set_http_config,
};
