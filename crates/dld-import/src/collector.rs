//! Run driver: stage every configured dataset, then prune the import directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use dld_core::{ProgressContext, is_shutdown_requested};

use crate::config::{DatasetDecl, DldConfig};
use crate::error::StageError;
use crate::filename::GLOBAL_GRAPH_FILE;
use crate::reconcile::{ReconcileReport, reconcile};
use crate::resolver::{Outcome, Resolver, Staged, StagingContext};

/// Staging results of one configured dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub name: String,
    pub sources: Vec<Staged>,
}

/// Run summary
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub started_at: DateTime<Utc>,
    pub import_dir: PathBuf,
    pub default_graph: Option<String>,
    pub added: usize,
    pub retained: usize,
    pub skipped: usize,
    pub datasets: Vec<DatasetReport>,
    pub pruned: ReconcileReport,
    pub elapsed_secs: f64,
}

impl StageSummary {
    fn count(datasets: &[DatasetReport], outcome: Outcome) -> usize {
        datasets
            .iter()
            .flat_map(|d| &d.sources)
            .filter(|s| s.outcome == outcome)
            .count()
    }
}

/// Stages the datasets of one `dld.yml` into an import directory.
pub struct ImportsCollector {
    import_dir: PathBuf,
    default_graph: Option<String>,
    datasets: Vec<DatasetDecl>,
    workers: usize,
    max_downloads: usize,
    progress: ProgressContext,
}

impl ImportsCollector {
    pub fn new(import_dir: impl Into<PathBuf>, config: &DldConfig) -> Self {
        Self {
            import_dir: import_dir.into(),
            default_graph: config.default_graph.clone(),
            datasets: config.datasets.clone(),
            workers: 1,
            max_downloads: dld_core::http_config().max_downloads,
            progress: ProgressContext::hidden(),
        }
    }

    /// Datasets staged concurrently; 1 keeps configuration order.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn max_downloads(mut self, max_downloads: usize) -> Self {
        self.max_downloads = max_downloads.max(1);
        self
    }

    pub fn progress(mut self, progress: ProgressContext) -> Self {
        self.progress = progress;
        self
    }

    pub fn import_dir(&self) -> &Path {
        &self.import_dir
    }

    /// Stage all datasets and reconcile the import directory.
    ///
    /// The first fatal error aborts the run; the directory is then left
    /// unreconciled so nothing configured is pruned by mistake.
    pub fn prepare(&self) -> Result<StageSummary, StageError> {
        let started_at = Utc::now();
        let start = Instant::now();

        // a rejected configuration leaves the import directory untouched
        let mut resolvers = self.build_resolvers()?;

        fs::create_dir_all(&self.import_dir).map_err(StageError::io_at(&self.import_dir))?;
        self.remove_partial_transfers()?;
        self.write_global_graph()?;

        let ctx = StagingContext::new(
            self.import_dir.clone(),
            self.default_graph.clone(),
            self.progress.clone(),
            self.max_downloads,
        );

        log::info!(
            "staging {} dataset(s) into {} with {} worker(s)",
            resolvers.len(),
            self.import_dir.display(),
            self.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| StageError::config(format!("failed to create thread pool: {e}")))?;

        let stage_one = |(name, resolver): &mut (String, Resolver)| {
            if is_shutdown_requested() {
                return Err(StageError::Interrupted);
            }
            log::debug!("staging dataset {name}");
            resolver.stage(&ctx).map(|sources| DatasetReport {
                name: name.clone(),
                sources,
            })
        };
        let datasets = pool.install(|| -> Result<Vec<DatasetReport>, StageError> {
            if self.workers == 1 {
                resolvers.iter_mut().map(stage_one).collect()
            } else {
                resolvers.par_iter_mut().map(stage_one).collect()
            }
        })?;

        if is_shutdown_requested() {
            return Err(StageError::Interrupted);
        }

        let pruned = reconcile(&self.import_dir, &ctx.ledger)?;

        let summary = StageSummary {
            started_at,
            import_dir: self.import_dir.clone(),
            default_graph: self.default_graph.clone(),
            added: StageSummary::count(&datasets, Outcome::Added),
            retained: StageSummary::count(&datasets, Outcome::Retained),
            skipped: StageSummary::count(&datasets, Outcome::Skipped),
            datasets,
            pruned,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        log::info!(
            "staged: {} added, {} retained, {} skipped, {} file(s) pruned in {:.1}s",
            summary.added,
            summary.retained,
            summary.skipped,
            summary.pruned.removed_files.len(),
            summary.elapsed_secs
        );
        Ok(summary)
    }

    /// One resolver per dataset; any bad entry fails the run before staging.
    fn build_resolvers(&self) -> Result<Vec<(String, Resolver)>, StageError> {
        self.datasets
            .iter()
            .map(|decl| {
                let resolver = Resolver::from_entry(&decl.entry).map_err(|e| match e {
                    StageError::Config(msg) => {
                        StageError::Config(format!("dataset '{}': {msg}", decl.name))
                    }
                    other => other,
                })?;
                if decl.entry.graph_name().is_none() && self.default_graph.is_none() {
                    return Err(StageError::config(format!(
                        "dataset '{}': no graph_name and no default graph configured",
                        decl.name
                    )));
                }
                Ok((decl.name.clone(), resolver))
            })
            .collect()
    }

    fn write_global_graph(&self) -> Result<(), StageError> {
        let path = self.import_dir.join(GLOBAL_GRAPH_FILE);
        match &self.default_graph {
            Some(graph) => {
                fs::write(&path, format!("{graph}\n")).map_err(StageError::io_at(&path))?;
            }
            None if path.is_file() => {
                log::debug!("removing outdated {}", path.display());
                fs::remove_file(&path).map_err(StageError::io_at(&path))?;
            }
            None => {}
        }
        Ok(())
    }

    /// Residue of transfers interrupted in an earlier run.
    fn remove_partial_transfers(&self) -> Result<(), StageError> {
        let pattern = format!(
            "{}/*.part",
            glob::Pattern::escape(&self.import_dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| StageError::config(format!("invalid import directory pattern: {e}")))?;
        for path in paths.flatten() {
            log::debug!("removing partial transfer {}", path.display());
            fs::remove_file(&path).map_err(StageError::io_at(&path))?;
        }
        Ok(())
    }
}
