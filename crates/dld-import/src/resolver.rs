//! Dataset source resolvers: materialise a source in the import directory.
//!
//! Atomic resolvers (one local file, one URL) share the staging contract:
//! derive the canonical key, reject duplicates, stage under the ledger's
//! token, then reconcile the graph companion. List resolvers read a list
//! file and run one atomic resolver per line.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use dld_core::progress::upgrade_to_bar;
use dld_core::{DownloadSlots, ProgressContext, ProgressReader, is_shutdown_requested, part_path};

use crate::error::StageError;
use crate::filename::{
    basename_of, companion_graph_file_name, companion_is_global, strip_serialization_and_compression,
};
use crate::ledger::StagingLedger;
use crate::source::{DatasetEntry, DatasetSource};

/// Everything a resolver needs from the run. Owned by the run, borrowed by resolvers.
pub struct StagingContext {
    pub import_dir: PathBuf,
    pub default_graph: Option<String>,
    pub ledger: StagingLedger,
    pub progress: ProgressContext,
    /// Bounds concurrent HTTP downloads
    pub downloads: DownloadSlots,
}

impl StagingContext {
    pub fn new(
        import_dir: PathBuf,
        default_graph: Option<String>,
        progress: ProgressContext,
        max_downloads: usize,
    ) -> Self {
        Self {
            import_dir,
            default_graph: default_graph.filter(|g| !g.trim().is_empty()),
            ledger: StagingLedger::new(),
            progress,
            downloads: DownloadSlots::new(max_downloads),
        }
    }

    pub fn default_graph(&self) -> Option<&str> {
        self.default_graph.as_deref()
    }
}

/// What staging did with one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Added,
    Retained,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Retained => "retained",
            Self::Skipped => "skipped",
        }
    }
}

/// Result for one atomic source.
#[derive(Debug, Clone, Serialize)]
pub struct Staged {
    pub source: String,
    /// Payload file name in the import directory (unset when skipped early)
    pub file_name: Option<String>,
    pub outcome: Outcome,
}

/// Variant-specific half of an atomic resolver.
pub trait Materialize {
    /// Source as given in the configuration, for messages.
    fn describe(&self) -> String;

    /// Payload file name inside the import directory.
    fn basename(&self) -> Result<String, StageError>;

    /// Make `target` hold the source's data. Returns `Added` or `Retained`.
    fn ensure_copy(&self, target: &Path, ctx: &StagingContext) -> Result<Outcome, StageError>;
}

/// Local dump file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Materialize for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn basename(&self) -> Result<String, StageError> {
        let name = basename_of(&self.path.to_string_lossy());
        if name.is_empty() {
            return Err(StageError::config(format!(
                "cannot derive a file name from '{}'",
                self.path.display()
            )));
        }
        Ok(name)
    }

    fn ensure_copy(&self, target: &Path, ctx: &StagingContext) -> Result<Outcome, StageError> {
        let source_len = fs::metadata(&self.path)
            .map_err(StageError::io_at(&self.path))?
            .len();

        if target.is_file() {
            let target_len = fs::metadata(target).map_err(StageError::io_at(target))?.len();
            if target_len == source_len {
                log::info!(
                    "{} appears to be identical to {} - skipping copy",
                    target.display(),
                    self.path.display()
                );
                return Ok(Outcome::Retained);
            }
        }

        let name = self.basename()?;
        let pb = ctx.progress.transfer_bar(&name);
        upgrade_to_bar(&pb, source_len);
        log::debug!("copying {} -> {}", self.path.display(), target.display());
        let copied = copy_via_part(&self.path, target, &pb);
        pb.finish_and_clear();
        copied?;
        Ok(Outcome::Added)
    }
}

/// Copy `src` to `dest` through `<dest>.part`; the partial file never survives an error.
fn copy_via_part(src: &Path, dest: &Path, pb: &indicatif::ProgressBar) -> Result<u64, StageError> {
    let part = part_path(dest);
    let result = (|| -> Result<u64, StageError> {
        let reader = File::open(src).map_err(StageError::io_at(src))?;
        let mut reader = ProgressReader::new(reader, pb);
        let mut writer = BufWriter::new(File::create(&part).map_err(StageError::io_at(&part))?);
        let copied = match io::copy(&mut reader, &mut writer) {
            Ok(n) => n,
            Err(_) if is_shutdown_requested() => return Err(StageError::Interrupted),
            Err(e) => return Err(StageError::io_at(&part)(e)),
        };
        writer.flush().map_err(StageError::io_at(&part))?;
        fs::rename(&part, dest).map_err(StageError::io_at(dest))?;
        Ok(copied)
    })();
    if result.is_err() && part.exists() {
        if let Err(e) = fs::remove_file(&part) {
            log::warn!("failed to remove partial copy {}: {e}", part.display());
        }
    }
    result
}

/// Remote dump behind an http(s) URL.
#[derive(Debug, Clone)]
pub struct LocationSource {
    url: String,
}

impl LocationSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
        }
    }

    /// Size advertised by the server; `None` if it cannot be learned.
    fn remote_len(&self) -> Option<u64> {
        match dld_core::content_length(&self.url) {
            Ok(Some(len)) => Some(len),
            Ok(None) => {
                log::warn!("no Content-Length in HEAD response for {}", self.url);
                None
            }
            Err(e) => {
                log::warn!("error getting HEAD for {}: {e}", self.url);
                None
            }
        }
    }
}

impl Materialize for LocationSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn basename(&self) -> Result<String, StageError> {
        let is_http = reqwest::Url::parse(&self.url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !is_http {
            return Err(StageError::InvalidLocation(self.url.clone()));
        }
        Ok(basename_of(&self.url))
    }

    fn ensure_copy(&self, target: &Path, ctx: &StagingContext) -> Result<Outcome, StageError> {
        if target.is_file() {
            let local_len = fs::metadata(target).map_err(StageError::io_at(target))?.len();
            if self.remote_len() == Some(local_len) {
                log::info!(
                    "{} seems to be complete download of {} - skipping (re-)download",
                    target.display(),
                    self.url
                );
                return Ok(Outcome::Retained);
            }
        }

        let name = self.basename()?;
        let _slot = ctx.downloads.acquire(&self.url);
        let pb = ctx.progress.transfer_bar(&name);
        log::info!("starting download: {}", self.url);
        let downloaded = dld_core::download_to_file(&self.url, target, &pb);
        pb.finish_and_clear();
        let bytes = downloaded.map_err(|source| match source {
            dld_core::StreamError::Cancelled => StageError::Interrupted,
            source => StageError::Stream {
                url: self.url.clone(),
                source,
            },
        })?;
        log::info!("download finished: {} ({bytes} bytes)", self.url);
        Ok(Outcome::Added)
    }
}

/// One file or URL staged under the shared contract.
#[derive(Debug, Clone)]
pub struct AtomicResolver<S> {
    source: S,
    graph_name: Option<String>,
    skip: bool,
}

impl<S: Materialize> AtomicResolver<S> {
    pub fn new(source: S, graph_name: Option<String>) -> Self {
        Self {
            source,
            graph_name,
            skip: false,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    fn skipped(&mut self, error: &StageError, file_name: Option<String>) -> Staged {
        log::error!("{error}");
        if !self.skip {
            log::info!("skipping dataset from: {}", self.source.describe());
        }
        self.skip = true;
        Staged {
            source: self.source.describe(),
            file_name,
            outcome: Outcome::Skipped,
        }
    }

    fn duplicate(&self, key: &str) -> StageError {
        StageError::Duplicate {
            source: self.source.describe(),
            key: key.to_string(),
        }
    }

    pub fn stage(&mut self, ctx: &StagingContext) -> Result<Staged, StageError> {
        if is_shutdown_requested() {
            return Err(StageError::Interrupted);
        }

        let basename = match self.source.basename() {
            Ok(name) => name,
            Err(e) if e.is_skippable() => return Ok(self.skipped(&e, None)),
            Err(e) => return Err(e),
        };
        if companion_is_global(&basename) {
            let e = StageError::ReservedName {
                source: self.source.describe(),
                file_name: basename.clone(),
            };
            return Ok(self.skipped(&e, Some(basename)));
        }
        let key = strip_serialization_and_compression(&basename);

        if ctx.ledger.was_added_or_retained(&key) {
            let e = self.duplicate(&key);
            return Ok(self.skipped(&e, Some(basename)));
        }

        let _token = match ctx.ledger.acquire_staging_token(&key) {
            Ok(token) => token,
            Err(e) => return Ok(self.skipped(&StageError::from(e), Some(basename))),
        };
        // another worker may have finished this key between the check and the token
        if ctx.ledger.was_added_or_retained(&key) {
            let e = self.duplicate(&key);
            return Ok(self.skipped(&e, Some(basename)));
        }

        // TODO: remove a freshly added payload when writing its companion fails
        let target = ctx.import_dir.join(&basename);
        let outcome = self.source.ensure_copy(&target, ctx)?;
        match outcome {
            Outcome::Retained => ctx.ledger.mark_retained(&key, &basename),
            _ => ctx.ledger.mark_added(&key, &basename),
        }
        ensure_graph_file(ctx, &basename, self.graph_name.as_deref())?;

        Ok(Staged {
            source: self.source.describe(),
            file_name: Some(basename),
            outcome,
        })
    }
}

/// Write, refresh or drop the `.graph` companion of `basename`.
///
/// The loader falls back to `global.graph` when no companion exists, so a
/// companion is only kept when the dataset's graph differs from the default.
pub fn ensure_graph_file(
    ctx: &StagingContext,
    basename: &str,
    graph_name: Option<&str>,
) -> Result<(), StageError> {
    let default = ctx.default_graph();
    if graph_name.is_none() && default.is_none() {
        return Err(StageError::config(format!(
            "no destination graph name defined for {basename}"
        )));
    }

    let path = ctx.import_dir.join(companion_graph_file_name(basename));
    match graph_name {
        Some(graph) if Some(graph) != default => {
            fs::write(&path, format!("{graph}\n")).map_err(StageError::io_at(&path))?;
        }
        _ => {
            if path.is_file() {
                log::debug!("removing outdated {}", path.display());
                fs::remove_file(&path).map_err(StageError::io_at(&path))?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Files,
    Locations,
}

/// A list file of paths or URLs, one per non-blank line.
#[derive(Debug, Clone)]
pub struct ListResolver {
    kind: ListKind,
    list_path: PathBuf,
    graph_name: Option<String>,
}

impl ListResolver {
    pub fn new(kind: ListKind, list_path: PathBuf, graph_name: Option<String>) -> Self {
        Self {
            kind,
            list_path,
            graph_name,
        }
    }

    /// One child resolver per non-blank line.
    ///
    /// Relative paths in a file list resolve against the list's directory.
    pub fn children(&self) -> Result<Vec<Resolver>, StageError> {
        let content = fs::read_to_string(&self.list_path).map_err(|e| {
            StageError::config(format!(
                "unable to open dataset list at {}: {e}",
                self.list_path.display()
            ))
        })?;
        let base = self.list_path.parent().unwrap_or_else(|| Path::new(""));

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match self.kind {
                ListKind::Files => {
                    Resolver::file(base.join(line), self.graph_name.clone())
                }
                ListKind::Locations => Resolver::location(line, self.graph_name.clone()),
            })
            .collect())
    }

    pub fn stage(&self, ctx: &StagingContext) -> Result<Vec<Staged>, StageError> {
        let mut children = self.children()?;
        log::debug!(
            "{}: {} entries",
            self.list_path.display(),
            children.len()
        );
        let staged: Vec<Vec<Staged>> = children
            .par_iter_mut()
            .map(|child| child.stage(ctx))
            .collect::<Result<_, _>>()?;
        Ok(staged.into_iter().flatten().collect())
    }
}

/// Resolver for one `dld.yml` dataset entry.
#[derive(Debug, Clone)]
pub enum Resolver {
    File(AtomicResolver<FileSource>),
    Location(AtomicResolver<LocationSource>),
    FileList(ListResolver),
    LocationList(ListResolver),
}

impl Resolver {
    pub fn file(path: PathBuf, graph_name: Option<String>) -> Self {
        Self::File(AtomicResolver::new(FileSource::new(path), graph_name))
    }

    pub fn location(url: impl Into<String>, graph_name: Option<String>) -> Self {
        Self::Location(AtomicResolver::new(LocationSource::new(url), graph_name))
    }

    /// Build the resolver for an entry; configuration error unless exactly one source key.
    pub fn from_entry(entry: &DatasetEntry) -> Result<Self, StageError> {
        let graph_name = entry.graph_name().map(str::to_string);
        Ok(match entry.source()? {
            DatasetSource::File(path) => Self::file(path, graph_name),
            DatasetSource::Location(url) => Self::location(url, graph_name),
            DatasetSource::FileList(path) => {
                Self::FileList(ListResolver::new(ListKind::Files, path, graph_name))
            }
            DatasetSource::LocationList(path) => {
                Self::LocationList(ListResolver::new(ListKind::Locations, path, graph_name))
            }
        })
    }

    /// Stage the dataset; one [`Staged`] per atomic source.
    pub fn stage(&mut self, ctx: &StagingContext) -> Result<Vec<Staged>, StageError> {
        match self {
            Self::File(r) => r.stage(ctx).map(|s| vec![s]),
            Self::Location(r) => r.stage(ctx).map(|s| vec![s]),
            Self::FileList(r) | Self::LocationList(r) => r.stage(ctx),
        }
    }

    /// Whether an atomic resolver was skipped (lists report per child).
    pub fn is_skipped(&self) -> bool {
        match self {
            Self::File(r) => r.is_skipped(),
            Self::Location(r) => r.is_skipped(),
            Self::FileList(_) | Self::LocationList(_) => false,
        }
    }
}
