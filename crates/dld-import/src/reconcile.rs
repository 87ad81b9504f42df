//! Prune the import directory down to what the current run staged.
//!
//! Runs once after every dataset was staged successfully. Payloads whose
//! canonical key the ledger does not know (or whose key was claimed by a
//! differently named file) are removed together with their companion.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::StageError;
use crate::filename::{
    GLOBAL_GRAPH_FILE, companion_graph_file_name, companion_graph_path, is_graph_file,
    strip_serialization_and_compression,
};
use crate::ledger::StagingLedger;

/// What the reconciler deleted.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub removed_files: Vec<String>,
    pub removed_dirs: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.removed_files.is_empty() && self.removed_dirs.is_empty()
    }
}

fn remove_file(path: &Path, name: &str, report: &mut ReconcileReport) -> Result<(), StageError> {
    log::info!("removing {} (no longer configured)", path.display());
    fs::remove_file(path).map_err(StageError::io_at(path))?;
    report.removed_files.push(name.to_string());
    Ok(())
}

/// Non-UTF-8 names never match: everything the ledger hands out is UTF-8.
fn is_claimed(set: &FxHashSet<String>, name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| set.contains(n))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Delete every import directory entry the ledger does not account for.
///
/// Entries are deleted by their on-disk path; names that are not valid
/// UTF-8 are never claimed and show up lossily in the report.
pub fn reconcile(import_dir: &Path, ledger: &StagingLedger) -> Result<ReconcileReport, StageError> {
    let claimed = ledger.claimed_files();
    let claimed_companions: FxHashSet<String> = claimed
        .iter()
        .map(|name| companion_graph_file_name(name))
        .collect();

    let mut entries = fs::read_dir(import_dir)
        .map_err(StageError::io_at(import_dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StageError::io_at(import_dir))?;
    entries.sort_by_key(|e| e.file_name());

    let mut report = ReconcileReport::default();
    let mut removed: FxHashSet<PathBuf> = FxHashSet::default();
    let mut graph_files = Vec::new();

    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy().into_owned();
        let path = entry.path();
        let file_type = entry.file_type().map_err(StageError::io_at(&path))?;

        if file_type.is_dir() {
            let is_empty = fs::read_dir(&path)
                .map_err(StageError::io_at(&path))?
                .next()
                .is_none();
            if is_empty {
                log::info!("removing empty directory {}", path.display());
                fs::remove_dir(&path).map_err(StageError::io_at(&path))?;
                report.removed_dirs.push(name);
            } else {
                log::warn!("unexpected directory in import dir: {}", path.display());
            }
            continue;
        }

        if is_graph_file(&name) {
            graph_files.push(path);
            continue;
        }

        if is_claimed(&claimed, &file_name) {
            continue;
        }
        let key = strip_serialization_and_compression(&name);
        if let Some(owner) = ledger.claimed_file(&key) {
            log::debug!("{name} shares key '{key}' with staged {owner}");
        }
        remove_file(&path, &name, &mut report)?;
        removed.insert(path.clone());

        let companion = companion_graph_path(&path);
        let companion_name = companion.file_name().unwrap_or_default();
        if companion_name != GLOBAL_GRAPH_FILE
            && !is_claimed(&claimed_companions, companion_name)
            && companion.is_file()
        {
            remove_file(&companion, &display_name(&companion), &mut report)?;
            removed.insert(companion);
        }
    }

    // companions whose payload vanished outside of dld
    for path in graph_files {
        let file_name = path.file_name().unwrap_or_default();
        if file_name == GLOBAL_GRAPH_FILE
            || is_claimed(&claimed_companions, file_name)
            || removed.contains(&path)
        {
            continue;
        }
        remove_file(&path, &display_name(&path), &mut report)?;
    }

    Ok(report)
}
