//! File helpers for the command line: reading inputs and laying out run directories.

use std::fs::File;
use std::io::{
    BufReader,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::time::SystemTime;

use anyhow::{
    Context,
    Result,
};
use chrono::{
    DateTime,
    Utc,
};
use serde_json::json;
use tracing::{
    debug,
    instrument,
};

use crate::model::GraphRecord;
use crate::simulation::CaseDataTable;

/// Read a graph description: a JSON array of place, transition and link records.
///
/// # Errors
/// I/O failures and records that do not parse.
#[instrument]
pub fn load_graph(path: &Path) -> Result<Vec<GraphRecord>> {
    let file = File::open(path).with_context(|| format!("opening graph {}", path.display()))?;
    let records: Vec<GraphRecord> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing graph {}", path.display()))?;
    debug!(records = records.len(), "graph loaded");
    Ok(records)
}

/// Read per-case external data: a JSON array with one object per case, each mapping attribute
/// names to either a value or an activity → value object.
///
/// # Errors
/// I/O failures and malformed JSON.
#[instrument]
pub fn load_case_data(path: &Path) -> Result<CaseDataTable> {
    let file = File::open(path).with_context(|| format!("opening case data {}", path.display()))?;
    let table: CaseDataTable = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing case data {}", path.display()))?;
    debug!(cases = table.0.len(), "case data loaded");
    Ok(table)
}

/// Creates `runs/<timestamp>/` and writes a `metadata.json` describing the run into it.
///
/// # Errors
/// I/O failures.
#[instrument]
pub fn create_timestamped_output_dir(seed: u64) -> Result<PathBuf> {
    let base_dir = PathBuf::from("runs");
    std::fs::create_dir_all(&base_dir)?;

    let now: DateTime<Utc> = SystemTime::now().into();
    let timestamp = now.to_rfc3339().replace([':', '.'], "-"); // make filesystem-friendly
    let output_dir = base_dir.join(timestamp);
    std::fs::create_dir_all(&output_dir)?;

    let metadata = json!({
        "timestamp": now.to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "seed": seed,
        "command_args": std::env::args().collect::<Vec<_>>()
    });

    let metadata_path = output_dir.join("metadata.json");
    let mut file = File::create(&metadata_path)?;
    file.write_all(serde_json::to_string_pretty(&metadata)?.as_bytes())?;

    Ok(output_dir)
}
