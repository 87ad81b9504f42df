//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif bar per running transfer (cleared on completion).
//! Non-TTY mode: hidden bars, the log is the only progress indicator.

use std::io::IsTerminal;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Width of the name column in transfer bars
const PREFIX_WIDTH: usize = 24;

/// Bytes bar, shown once the transfer size is known
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {bar:30.green/dim} {binary_bytes:>9}/{binary_total_bytes:9} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Pending style, used before `Content-Length` (or the source size) is known
fn pending_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {binary_bytes:>9} {wide_msg:.dim}")
        .expect("invalid template")
}

/// Switch a transfer bar from pending to bytes bar.
pub fn upgrade_to_bar(pb: &ProgressBar, total: u64) {
    pb.set_length(total);
    pb.set_style(bar_style());
}

/// Shared multi-progress state for one run. Clones draw into the same bars.
#[derive(Clone)]
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Create a context that never draws (tests, `--quiet` style callers).
    pub fn hidden() -> Self {
        Self::with_tty(false)
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Bar for one copy/download, labelled with the payload file name.
    ///
    /// Hidden outside a TTY; call [`upgrade_to_bar`] once the size is known.
    pub fn transfer_bar(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }

        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(pending_style());
        pb.set_prefix(truncate_name(name).to_string());
        pb
    }

    /// Print a line above managed progress bars.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.is_tty {
            let _ = self.multi.println(msg);
        } else {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// `MultiProgress` for the log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Cut a name to the prefix column without splitting a UTF-8 character.
fn truncate_name(name: &str) -> &str {
    match name.char_indices().nth(PREFIX_WIDTH) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Human readable byte count (binary units, one decimal).
pub fn fmt_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if n < 1024 {
        return format!("{n} B");
    }
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_bytes_small() {
        assert_eq!(fmt_bytes(0), "0 B");
        assert_eq!(fmt_bytes(1023), "1023 B");
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(1024), "1.0 KiB");
        assert_eq!(fmt_bytes(1536), "1.5 KiB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn truncate_keeps_short_names() {
        assert_eq!(truncate_name("x.ttl.bz2"), "x.ttl.bz2");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let name = "ä".repeat(30);
        assert_eq!(truncate_name(&name).chars().count(), PREFIX_WIDTH);
    }

    #[test]
    fn hidden_context_hands_out_hidden_bars() {
        let ctx = ProgressContext::hidden();
        assert!(!ctx.is_tty());
        assert!(ctx.transfer_bar("dump.nt.gz").is_hidden());
    }
}
