//! Dataset declarations as written in `dld.yml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Where a dataset's data comes from. Exactly one per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSource {
    /// Local dump file
    File(PathBuf),
    /// http(s) URL of a dump
    Location(String),
    /// Text file, one local path per non-blank line
    FileList(PathBuf),
    /// Text file, one URL per non-blank line
    LocationList(PathBuf),
}

impl DatasetSource {
    /// Configuration keyword of this source kind.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Location(_) => "location",
            Self::FileList(_) => "file_list",
            Self::LocationList(_) => "location_list",
        }
    }
}

/// One `datasets.<name>` entry of `dld.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatasetEntry {
    pub file: Option<PathBuf>,
    pub location: Option<String>,
    pub file_list: Option<PathBuf>,
    pub location_list: Option<PathBuf>,
    pub graph_name: Option<String>,
}

impl DatasetEntry {
    /// The single declared source.
    pub fn source(&self) -> Result<DatasetSource, StageError> {
        let mut sources = Vec::with_capacity(1);
        if let Some(path) = &self.file {
            sources.push(DatasetSource::File(path.clone()));
        }
        if let Some(url) = &self.location {
            sources.push(DatasetSource::Location(url.clone()));
        }
        if let Some(path) = &self.file_list {
            sources.push(DatasetSource::FileList(path.clone()));
        }
        if let Some(path) = &self.location_list {
            sources.push(DatasetSource::LocationList(path.clone()));
        }

        match sources.len() {
            1 => Ok(sources.remove(0)),
            0 => Err(StageError::config(
                "dataset declares no source (expected one of file, location, file_list, location_list)",
            )),
            _ => {
                let keys: Vec<&str> = sources.iter().map(DatasetSource::keyword).collect();
                Err(StageError::config(format!(
                    "dataset declares several sources ({}), expected exactly one",
                    keys.join(", ")
                )))
            }
        }
    }

    /// Target graph, with an empty string treated as unset.
    pub fn graph_name(&self) -> Option<&str> {
        self.graph_name.as_deref().filter(|g| !g.trim().is_empty())
    }

    /// Resolve relative local paths against `base` (the directory of `dld.yml`).
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for path in [&mut self.file, &mut self.file_list, &mut self.location_list]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
