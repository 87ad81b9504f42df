//! Stage subcommand - fill the import directory from `dld.yml`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::Cell;

use dld_core::ProgressContext;
use dld_import::config::{default_working_dir, import_dir};
use dld_import::{CliSource, DldConfig, ImportsCollector, StageSummary};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StageArgs {
    /// Dataset configuration
    #[arg(short = 'c', long = "config", default_value = "dld.yml")]
    pub config: PathBuf,

    /// Working directory (default: wd-<config name>)
    #[arg(short = 'w', long)]
    pub working_directory: Option<PathBuf>,

    /// Target graph of the dataset given with --file/--location; also the default graph
    #[arg(short = 'u', long = "uri")]
    pub graph_uri: Option<String>,

    /// Local dump to stage as dataset `cli`
    #[arg(short = 'f', long, conflicts_with = "location")]
    pub file: Option<PathBuf>,

    /// URL of a dump to stage as dataset `cli`
    #[arg(short = 'l', long)]
    pub location: Option<String>,

    /// Datasets staged in parallel
    #[arg(long)]
    pub workers: Option<usize>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl StageArgs {
    /// The `-u` + `-f`/`-l` pair, if given.
    fn cli_dataset(&self) -> Result<Option<(String, CliSource)>> {
        let source = match (&self.file, &self.location) {
            (Some(path), _) => Some(CliSource::File(path.clone())),
            (_, Some(url)) => Some(CliSource::Location(url.clone())),
            _ => None,
        };
        match (&self.graph_uri, source) {
            (Some(graph), Some(source)) => Ok(Some((graph.clone(), source))),
            (None, None) => Ok(None),
            (Some(_), None) => bail!("--uri needs a dataset given with --file or --location"),
            (None, Some(_)) => bail!("--file/--location need a target graph given with --uri"),
        }
    }
}

fn load_datasets(args: &StageArgs, cli_dataset: Option<(String, CliSource)>) -> Result<DldConfig> {
    let mut datasets = if args.config.exists() || cli_dataset.is_none() {
        DldConfig::from_file(&args.config)?
    } else {
        log::debug!(
            "{} not found, staging the command line dataset only",
            args.config.display()
        );
        DldConfig::default()
    };
    if let Some((graph, source)) = cli_dataset {
        datasets.add_cli_dataset(&graph, source)?;
    }
    Ok(datasets)
}

pub fn run(args: StageArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let cli_dataset = args.cli_dataset()?;
    let datasets = load_datasets(&args, cli_dataset)?;

    let working_dir = args
        .working_directory
        .clone()
        .unwrap_or_else(|| default_working_dir(&args.config));
    let import_dir = import_dir(&working_dir);
    let workers = config.workers.effective(args.workers);

    log::info!("Staging datasets from {}", args.config.display());
    log::info!("  Import dir: {}", import_dir.display());
    log::info!("  Workers: {workers}");

    let summary = ImportsCollector::new(&import_dir, &datasets)
        .workers(workers)
        .max_downloads(config.http.max_downloads)
        .progress(progress.clone())
        .prepare()
        .with_context(|| format!("Failed to stage datasets into {}", import_dir.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &working_dir);
    }
    Ok(())
}

fn print_summary(summary: &StageSummary, working_dir: &Path) {
    let mut sources = super::table(&["Dataset", "File", "Outcome"]);
    for dataset in &summary.datasets {
        for staged in &dataset.sources {
            let file = staged.file_name.as_deref().unwrap_or(&staged.source);
            sources.add_row(vec![
                Cell::new(&dataset.name),
                Cell::new(file),
                Cell::new(staged.outcome.as_str()),
            ]);
        }
    }
    if !summary.datasets.is_empty() {
        eprintln!("\n{sources}");
    }

    let mut table = super::table(&["Staging", "Value"]);
    table.add_row(vec!["Working dir", &working_dir.display().to_string()]);
    table.add_row(vec![
        "Default graph",
        summary.default_graph.as_deref().unwrap_or("-"),
    ]);
    table.add_row(vec![
        "Files",
        &format!(
            "{} added, {} retained, {} skipped",
            summary.added, summary.retained, summary.skipped
        ),
    ]);
    table.add_row(vec![
        "Pruned",
        &format!(
            "{} files, {} dirs",
            summary.pruned.removed_files.len(),
            summary.pruned.removed_dirs.len()
        ),
    ]);
    table.add_row(vec![
        "Started",
        &summary.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    ]);
    table.add_row(vec!["Time", &format!("{:.1}s", summary.elapsed_secs)]);
    eprintln!("\n{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(uri: Option<&str>, file: Option<&str>, location: Option<&str>) -> StageArgs {
        StageArgs {
            config: PathBuf::from("dld.yml"),
            working_directory: None,
            graph_uri: uri.map(str::to_string),
            file: file.map(PathBuf::from),
            location: location.map(str::to_string),
            workers: None,
            json: false,
        }
    }

    #[test]
    fn cli_dataset_needs_uri_and_source() {
        assert!(args(None, None, None).cli_dataset().unwrap().is_none());
        assert!(args(Some("http://g"), None, None).cli_dataset().is_err());
        assert!(args(None, Some("a.nt"), None).cli_dataset().is_err());

        let (graph, source) = args(Some("http://g"), None, Some("http://x/a.nt"))
            .cli_dataset()
            .unwrap()
            .unwrap();
        assert_eq!(graph, "http://g");
        assert!(matches!(source, CliSource::Location(url) if url == "http://x/a.nt"));
    }

    #[test]
    fn missing_config_allowed_with_cli_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = args(Some("http://g"), Some("a.nt"), None);
        a.config = dir.path().join("dld.yml");

        let cli = a.cli_dataset().unwrap();
        let datasets = load_datasets(&a, cli).unwrap();
        assert_eq!(datasets.datasets.len(), 1);
        assert_eq!(datasets.default_graph.as_deref(), Some("http://g"));
    }

    #[test]
    fn missing_config_is_error_without_cli_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = args(None, None, None);
        a.config = dir.path().join("dld.yml");
        assert!(load_datasets(&a, None).is_err());
    }
}
