//! Per-run record of staged canonical keys.
//!
//! Three disjoint sets: `added` (copied or downloaded this run), `retained`
//! (already present with matching size) and `adding` (inside a staging
//! critical section). Nothing is persisted; what survived earlier runs is
//! inferred from the import directory itself.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};

/// Re-entrant staging of a key that is already in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyStagingError {
    pub key: String,
}

impl std::fmt::Display for AlreadyStagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dataset '{}' is already being staged", self.key)
    }
}

impl std::error::Error for AlreadyStagingError {}

#[derive(Debug, Default)]
struct LedgerState {
    /// key -> payload file name that claimed it
    added: FxHashMap<String, String>,
    retained: FxHashMap<String, String>,
    adding: FxHashSet<String>,
}

/// Thread-safe staging bookkeeping, owned by one run.
#[derive(Debug, Default)]
pub struct StagingLedger {
    state: Mutex<LedgerState>,
}

/// Scope guard for a key's staging critical section; leaves `adding` on drop.
#[derive(Debug)]
pub struct StagingToken<'a> {
    ledger: &'a StagingLedger,
    key: String,
}

impl StagingToken<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for StagingToken<'_> {
    fn drop(&mut self) {
        self.ledger.state().adding.remove(&self.key);
    }
}

impl StagingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // sets stay valid if a worker panicked mid-stage
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `key` as newly staged into `file_name`.
    pub fn mark_added(&self, key: &str, file_name: &str) {
        let mut state = self.state();
        state.retained.remove(key);
        state.added.insert(key.to_string(), file_name.to_string());
    }

    /// Record `key` as already present in `file_name`.
    pub fn mark_retained(&self, key: &str, file_name: &str) {
        let mut state = self.state();
        state.added.remove(key);
        state.retained.insert(key.to_string(), file_name.to_string());
    }

    pub fn was_added(&self, key: &str) -> bool {
        self.state().added.contains_key(key)
    }

    pub fn was_retained(&self, key: &str) -> bool {
        self.state().retained.contains_key(key)
    }

    pub fn was_added_or_retained(&self, key: &str) -> bool {
        let state = self.state();
        state.added.contains_key(key) || state.retained.contains_key(key)
    }

    /// Whether `key` is inside a staging critical section right now.
    pub fn is_staging(&self, key: &str) -> bool {
        self.state().adding.contains(key)
    }

    /// Enter the critical section for `key`.
    ///
    /// Fails without side effects if the key is already held.
    pub fn acquire_staging_token(&self, key: &str) -> Result<StagingToken<'_>, AlreadyStagingError> {
        let mut state = self.state();
        if !state.adding.insert(key.to_string()) {
            return Err(AlreadyStagingError {
                key: key.to_string(),
            });
        }
        Ok(StagingToken {
            ledger: self,
            key: key.to_string(),
        })
    }

    /// Payload file name recorded for `key`, if it was added or retained.
    pub fn claimed_file(&self, key: &str) -> Option<String> {
        let state = self.state();
        state
            .added
            .get(key)
            .or_else(|| state.retained.get(key))
            .cloned()
    }

    /// Every payload file name claimed this run.
    pub fn claimed_files(&self) -> FxHashSet<String> {
        let state = self.state();
        state
            .added
            .values()
            .chain(state.retained.values())
            .cloned()
            .collect()
    }

    pub fn added_count(&self) -> usize {
        self.state().added.len()
    }

    pub fn retained_count(&self) -> usize {
        self.state().retained.len()
    }
}
