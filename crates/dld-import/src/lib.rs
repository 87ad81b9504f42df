//! dld-import: staging of Linked Data dumps into a loader's import directory
//!
//! Datasets declared in `dld.yml` are copied or downloaded into one flat
//! import directory, each with an optional `<name>.graph` companion naming
//! its target graph. A per-run [`StagingLedger`] records which canonical
//! keys were staged; afterwards the reconciler removes everything the
//! current configuration no longer claims, so repeated runs converge.

pub mod collector;
pub mod config;
pub mod error;
pub mod filename;
pub mod ledger;
pub mod reconcile;
pub mod resolver;
pub mod source;

pub use collector::{DatasetReport, ImportsCollector, StageSummary};
pub use config::{CliSource, DatasetDecl, DldConfig};
pub use error::StageError;
pub use ledger::{AlreadyStagingError, StagingLedger, StagingToken};
pub use reconcile::{ReconcileReport, reconcile};
pub use resolver::{Outcome, Resolver, Staged, StagingContext};
pub use source::{DatasetEntry, DatasetSource};
