//! `dld.yml`: which datasets to stage and the default target graph

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::filename::strip_config_suffixes;
use crate::source::DatasetEntry;

/// Dataset name reserved for a dataset given on the command line.
pub const CLI_DATASET: &str = "cli";

/// Raw file layout. `components` belongs to the container setup and is
/// accepted without being interpreted here.
#[derive(Debug, Deserialize)]
struct RawConfig {
    datasets: Option<serde_yaml::Mapping>,
    #[serde(default)]
    settings: Option<RawSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    default_graph: Option<String>,
}

/// A named dataset entry, in file order.
#[derive(Debug, Clone)]
pub struct DatasetDecl {
    pub name: String,
    pub entry: DatasetEntry,
}

/// Parsed `dld.yml`.
#[derive(Debug, Clone, Default)]
pub struct DldConfig {
    pub datasets: Vec<DatasetDecl>,
    pub default_graph: Option<String>,
}

/// Source of a dataset given on the command line.
#[derive(Debug, Clone)]
pub enum CliSource {
    File(PathBuf),
    Location(String),
}

impl DldConfig {
    /// Parse `dld.yml`; relative dataset paths resolve against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dld config: {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let config = Self::from_yaml_str(&content, base)
            .with_context(|| format!("failed to parse dld config: {}", path.display()))?;
        log::debug!(
            "loaded {} dataset(s) from {}",
            config.datasets.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str, base: &Path) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(content)?;

        let mut datasets = Vec::new();
        if let Some(mapping) = raw.datasets {
            for (key, value) in mapping {
                let name = match key {
                    serde_yaml::Value::String(s) => s,
                    other => bail!("dataset names must be strings, got {other:?}"),
                };
                let mut entry: DatasetEntry = serde_yaml::from_value(value)
                    .with_context(|| format!("invalid declaration of dataset '{name}'"))?;
                entry.resolve_relative_to(base);
                datasets.push(DatasetDecl { name, entry });
            }
        }

        let default_graph = raw
            .settings
            .and_then(|s| s.default_graph)
            .filter(|g| !g.trim().is_empty());

        Ok(Self {
            datasets,
            default_graph,
        })
    }

    /// Add the command-line dataset under the reserved name `cli`.
    ///
    /// Its graph also becomes the default graph of the run.
    pub fn add_cli_dataset(&mut self, graph: &str, source: CliSource) -> Result<()> {
        if self.datasets.iter().any(|d| d.name == CLI_DATASET) {
            bail!("reserved dataset key '{CLI_DATASET}' used in configuration file");
        }
        let mut entry = DatasetEntry {
            graph_name: Some(graph.to_string()),
            ..Default::default()
        };
        match source {
            CliSource::File(path) => entry.file = Some(path),
            CliSource::Location(url) => entry.location = Some(url),
        }
        self.datasets.push(DatasetDecl {
            name: CLI_DATASET.to_string(),
            entry,
        });
        self.default_graph = Some(graph.to_string());
        Ok(())
    }
}

/// Working directory used when none is given: `wd-<config stem>`.
pub fn default_working_dir(config_file: &Path) -> PathBuf {
    let file_name = config_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dld.yml".to_string());
    PathBuf::from(format!("wd-{}", strip_config_suffixes(&file_name)))
}

/// Import directory inside a working directory.
pub fn import_dir(working_dir: &Path) -> PathBuf {
    working_dir.join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
datasets:
  dbpedia-homepages:
    file: homepages_en.ttl.bz2
  dbpedia-links:
    location: http://downloads.dbpedia.org/3.9/en/old_interlanguage_links_en.nt.bz2
    graph_name: http://dbpedia.org/links
  lists:
    file_list: dumps/files.txt
components:
  store: aksw/dld-store-virtuoso7
  load: aksw/dld-load-virtuoso
settings:
  default_graph: http://dbpedia.org
"#;

    #[test]
    fn parses_datasets_in_file_order() {
        let config = DldConfig::from_yaml_str(SAMPLE, Path::new("/project")).unwrap();
        let names: Vec<&str> = config.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["dbpedia-homepages", "dbpedia-links", "lists"]);
        assert_eq!(config.default_graph.as_deref(), Some("http://dbpedia.org"));
        assert_eq!(
            config.datasets[0].entry.file,
            Some(PathBuf::from("/project/homepages_en.ttl.bz2"))
        );
        assert_eq!(
            config.datasets[2].entry.file_list,
            Some(PathBuf::from("/project/dumps/files.txt"))
        );
        assert_eq!(
            config.datasets[1].entry.graph_name(),
            Some("http://dbpedia.org/links")
        );
    }

    #[test]
    fn missing_settings_means_no_default_graph() {
        let config =
            DldConfig::from_yaml_str("datasets:\n  a:\n    file: a.nt\n", Path::new(".")).unwrap();
        assert_eq!(config.default_graph, None);
        assert_eq!(config.datasets.len(), 1);
    }

    #[test]
    fn malformed_entry_names_the_dataset() {
        let err = DldConfig::from_yaml_str("datasets:\n  broken: 42\n", Path::new("."))
            .unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }

    #[test]
    fn cli_dataset_added_and_overrides_default() {
        let mut config = DldConfig::from_yaml_str(SAMPLE, Path::new("/p")).unwrap();
        config
            .add_cli_dataset("http://dld.aksw.org/testing#", CliSource::File("t.ttl".into()))
            .unwrap();
        let cli = config.datasets.last().unwrap();
        assert_eq!(cli.name, CLI_DATASET);
        assert_eq!(cli.entry.file, Some(PathBuf::from("t.ttl")));
        assert_eq!(
            config.default_graph.as_deref(),
            Some("http://dld.aksw.org/testing#")
        );
    }

    #[test]
    fn reserved_cli_name_rejected() {
        let mut config =
            DldConfig::from_yaml_str("datasets:\n  cli:\n    file: a.nt\n", Path::new(".")).unwrap();
        assert!(
            config
                .add_cli_dataset("http://g", CliSource::Location("http://x/a.nt".into()))
                .is_err()
        );
    }

    #[test]
    fn working_dir_from_config_name() {
        assert_eq!(default_working_dir(Path::new("dld.yml")), PathBuf::from("wd-dld"));
        assert_eq!(
            default_working_dir(Path::new("/etc/dbpedia-dld.yml")),
            PathBuf::from("wd-dbpedia")
        );
        assert_eq!(
            import_dir(Path::new("wd-dld")),
            PathBuf::from("wd-dld/models")
        );
    }
}
