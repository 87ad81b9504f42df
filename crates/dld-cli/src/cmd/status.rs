//! Status subcommand - what the import directory currently holds

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use dld_core::fmt_bytes;
use dld_import::config::{default_working_dir, import_dir};
use dld_import::filename::{
    GLOBAL_GRAPH_FILE, companion_graph_file_name, is_graph_file, strip_serialization_and_compression,
};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Dataset configuration the working directory belongs to
    #[arg(short = 'c', long = "config", default_value = "dld.yml")]
    pub config: PathBuf,

    /// Working directory (default: wd-<config name>)
    #[arg(short = 'w', long)]
    pub working_directory: Option<PathBuf>,
}

/// One staged payload.
#[derive(Debug, PartialEq, Eq)]
struct PayloadRow {
    file_name: String,
    key: String,
    size: u64,
    /// Companion graph, or the global one when there is no companion
    graph: Option<String>,
    from_companion: bool,
}

fn read_graph(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(content.trim().to_string()).filter(|g| !g.is_empty()))
}

fn payload_rows(import_dir: &Path) -> Result<(Option<String>, Vec<PayloadRow>)> {
    let global = read_graph(&import_dir.join(GLOBAL_GRAPH_FILE))?;

    let mut rows = Vec::new();
    for entry in fs::read_dir(import_dir)
        .with_context(|| format!("Failed to list {}", import_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if is_graph_file(&file_name) {
            continue;
        }

        let companion = read_graph(&import_dir.join(companion_graph_file_name(&file_name)))?;
        rows.push(PayloadRow {
            key: strip_serialization_and_compression(&file_name),
            size: entry.metadata()?.len(),
            from_companion: companion.is_some(),
            graph: companion.or_else(|| global.clone()),
            file_name,
        });
    }
    rows.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok((global, rows))
}

pub fn run(args: StatusArgs) -> Result<()> {
    let working_dir = args
        .working_directory
        .unwrap_or_else(|| default_working_dir(&args.config));
    let import_dir = import_dir(&working_dir);
    if !import_dir.is_dir() {
        anyhow::bail!(
            "No import directory at {} (run `dld stage` first)",
            import_dir.display()
        );
    }

    let (global, rows) = payload_rows(&import_dir)?;

    let mut table = super::table(&["File", "Key", "Size", "Graph"]);
    let mut total = 0;
    for row in &rows {
        total += row.size;
        let graph = match (&row.graph, row.from_companion) {
            (Some(graph), true) => graph.clone(),
            (Some(graph), false) => format!("{graph} (default)"),
            (None, _) => "-".to_string(),
        };
        table.add_row(vec![
            row.file_name.clone(),
            row.key.clone(),
            fmt_bytes(row.size),
            graph,
        ]);
    }
    eprintln!("\n{table}");
    eprintln!(
        "{} payload(s), {} in {}; default graph: {}",
        rows.len(),
        fmt_bytes(total),
        import_dir.display(),
        global.as_deref().unwrap_or("-")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rows_resolve_effective_graph() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(GLOBAL_GRAPH_FILE), "http://g0\n").unwrap();
        fs::write(dir.path().join("a.nt"), "abc").unwrap();
        fs::write(dir.path().join("b.ttl.bz2"), "b").unwrap();
        fs::write(dir.path().join("b.ttl.graph"), "http://g1\n").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let (global, rows) = payload_rows(dir.path()).unwrap();
        assert_eq!(global.as_deref(), Some("http://g0"));
        assert_eq!(
            rows,
            vec![
                PayloadRow {
                    file_name: "a.nt".into(),
                    key: "a".into(),
                    size: 3,
                    graph: Some("http://g0".into()),
                    from_companion: false,
                },
                PayloadRow {
                    file_name: "b.ttl.bz2".into(),
                    key: "b".into(),
                    size: 1,
                    graph: Some("http://g1".into()),
                    from_companion: true,
                },
            ]
        );
    }

    #[test]
    fn no_global_graph() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.nt"), "abc").unwrap();
        let (global, rows) = payload_rows(dir.path()).unwrap();
        assert_eq!(global, None);
        assert_eq!(rows[0].graph, None);
    }
}
