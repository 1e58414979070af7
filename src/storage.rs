//! Run history on disk plus user-requested exports.
//!
//! Each finished run is one pretty-printed JSON file in the runs directory.

use crate::model::RunResult;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_DIR: &str = "g4-shield-cli";

/// Per-user data directory for this tool.
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("could not determine the local data directory")?;
    Ok(base.join(APP_DIR))
}

/// Runs directory, honouring an explicit override.
pub fn runs_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    match override_dir {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(data_dir()?.join("runs")),
    }
}

/// File name a run is stored under inside the runs directory.
pub fn run_file_name(run: &RunResult) -> String {
    format!(
        "run-{}-{}.json",
        sanitize_timestamp(&run.timestamp_utc),
        run.run_id
    )
}

pub fn save_run(dir: &Path, run: &RunResult) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(run_file_name(run));
    write_json_atomic(&path, run)?;
    debug!(path = %path.display(), "saved run");
    Ok(path)
}

/// Newest runs first, at most `limit`. Unreadable files are skipped.
pub fn load_recent(dir: &Path, limit: usize) -> Result<Vec<RunResult>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| serde_json::from_slice::<RunResult>(&bytes).map_err(Into::into));
        match parsed {
            Ok(run) => runs.push(run),
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }

    runs.sort_by(|a, b| b.timestamp_utc.cmp(&a.timestamp_utc));
    runs.truncate(limit);
    Ok(runs)
}

pub fn delete_run(dir: &Path, run: &RunResult) -> Result<()> {
    let path = dir.join(run_file_name(run));
    std::fs::remove_file(&path).with_context(|| format!("delete {}", path.display()))
}

pub fn export_json(path: &Path, run: &RunResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_json_atomic(path, run)
}

/// Plain-text log: a short commented header, then the output verbatim.
pub fn export_log(path: &Path, run: &RunResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut f = std::io::BufWriter::new(
        std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    writeln!(f, "# run {} at {}", run.run_id, run.timestamp_utc)?;
    writeln!(f, "# command: {}", run.command_line)?;
    writeln!(
        f,
        "# status: {} (exit code {})",
        run.status.label(),
        run.exit_code
    )?;
    for line in &run.output_lines {
        writeln!(f, "{line}")?;
    }
    f.flush().with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn write_json_atomic(path: &Path, run: &RunResult) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(run).context("serialize run")?;
    std::fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}

fn sanitize_timestamp(ts: &str) -> String {
    ts.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
