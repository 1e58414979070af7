//! Post-run processing utilities.
//!
//! Handles auto-save, exports, and history refresh after a run finishes.

use crate::cli::Cli;
use crate::model::RunResult;
use crate::storage;
use tracing::warn;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub export_messages: Vec<String>,
    pub history: Vec<RunResult>,
    pub auto_saved_path: Option<std::path::PathBuf>,
}

/// Process a finished run: auto-save, export, and reload history.
pub(crate) fn process_run_completion(
    args: &Cli,
    history_load: usize,
    auto_save: bool,
    run: &RunResult,
) -> ProcessedRun {
    let runs_dir = storage::runs_dir(args.history_dir.as_deref());

    let auto_saved_path = match (&runs_dir, auto_save) {
        (Ok(dir), true) => match storage::save_run(dir, run) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("auto-save failed: {e:#}");
                None
            }
        },
        _ => None,
    };

    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, run) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = args.export_log.as_deref() {
        match storage::export_log(export_path, run) {
            Ok(_) => export_messages.push(format!("Exported log: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export log failed: {e:#}")),
        }
    }

    let history = runs_dir
        .and_then(|dir| storage::load_recent(&dir, history_load))
        .unwrap_or_default();

    ProcessedRun {
        export_messages,
        history,
        auto_saved_path,
    }
}
