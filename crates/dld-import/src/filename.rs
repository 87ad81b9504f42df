//! File name conventions shared by staging and reconciliation.
//!
//! A payload `x.ttl.bz2` has the canonical key `x` and the companion
//! graph file `x.ttl.graph` (named after the decompressed dump, which is
//! what the loader sees).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use reqwest::Url;

/// Suffix of per-dataset graph companion files
pub const GRAPH_SUFFIX: &str = ".graph";

/// Companion holding the run-wide default graph
pub const GLOBAL_GRAPH_FILE: &str = "global.graph";

const COMPRESSION_SUFFIXES: [&str; 2] = [".bz2", ".gz"];

const SERIALIZATION_SUFFIXES: [&str; 8] = [
    ".nt", ".ttl", ".nq", ".rdf", ".owl", ".jsonld", ".json", ".xml",
];

const CONFIG_SUFFIXES: [&str; 2] = [".yml", ".yaml"];

/// Strip the first matching suffix, unless that would leave nothing.
fn strip_one<'a>(name: &'a str, suffixes: &[&str]) -> &'a str {
    suffixes
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix).filter(|rest| !rest.is_empty()))
        .unwrap_or(name)
}

/// Remove a trailing `.bz2` or `.gz`.
pub fn strip_compression_suffix(name: &str) -> &str {
    strip_one(name, &COMPRESSION_SUFFIXES)
}

/// Canonical dataset key: compression suffix, then RDF serialization suffix.
///
/// Repeated until nothing changes, so the key of a key is itself
/// (`a.ttl.nt` and `a.nt.gz.gz` both end up as `a`).
pub fn strip_serialization_and_compression(name: &str) -> String {
    let mut current = name;
    loop {
        let stripped = strip_one(strip_compression_suffix(current), &SERIALIZATION_SUFFIXES);
        if stripped == current {
            return current.to_string();
        }
        current = stripped;
    }
}

/// Companion graph file for a payload: `x.nt.gz` -> `x.nt.graph`.
pub fn companion_graph_file_name(name: &str) -> String {
    format!("{}{GRAPH_SUFFIX}", strip_compression_suffix(name))
}

/// [`companion_graph_file_name`] for a path whose name may not be UTF-8.
pub fn companion_graph_path(payload: &Path) -> PathBuf {
    let compressed = payload
        .extension()
        .is_some_and(|ext| ext == "gz" || ext == "bz2");
    let base = match (compressed, payload.file_stem()) {
        (true, Some(stem)) => stem,
        _ => payload.file_name().unwrap_or_default(),
    };
    let mut name = OsString::from(base);
    name.push(GRAPH_SUFFIX);
    payload.with_file_name(name)
}

/// Whether the companion of payload `name` would be `global.graph`
/// (`global`, `global.gz`, `global.bz2`).
pub fn companion_is_global(name: &str) -> bool {
    companion_graph_file_name(name) == GLOBAL_GRAPH_FILE
}

/// Whether `name` is a graph companion (including `global.graph`).
pub fn is_graph_file(name: &str) -> bool {
    name.ends_with(GRAPH_SUFFIX)
}

/// Final segment of a path or URL.
///
/// For http(s) URLs: the last non-empty path segment, or the host when the
/// path is empty or `/`. Anything else is treated as a filesystem path; an
/// empty string means there is no usable name (e.g. `/`).
pub fn basename_of(path_or_url: &str) -> String {
    if let Ok(url) = Url::parse(path_or_url) {
        if matches!(url.scheme(), "http" | "https") {
            let segment = url
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                .map(str::to_string);
            return segment
                .or_else(|| url.host_str().map(str::to_string))
                .unwrap_or_default();
        }
    }
    Path::new(path_or_url)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Config file name to project stem: `dbpedia-dld.yml` -> `dbpedia`.
pub fn strip_config_suffixes(name: &str) -> &str {
    let stem = strip_one(name, &CONFIG_SUFFIXES);
    strip_one(stem, &["-dld"])
}
