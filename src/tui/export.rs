use crate::model::RunResult;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Save a result into the history directory and report the path in `state.info`.
pub fn save_and_show_path(r: &RunResult, state: &mut UiState) {
    let Some(dir) = state.runs_dir.clone() else {
        state.info = "Save failed: no history directory".into();
        return;
    };
    match crate::storage::save_run(&dir, r) {
        Ok(path) => {
            state.info = format!("Saved: {}", path.display());
        }
        Err(e) => {
            state.info = format!("Save failed: {e:#}");
        }
    }
}

/// `g4-shield-<timestamp>-<id prefix>.<ext>` in the current directory.
fn export_path(r: &RunResult, ext: &str) -> Result<PathBuf> {
    let name = format!(
        "g4-shield-{}-{}.{ext}",
        r.timestamp_utc.replace(':', "-").replace('T', "_"),
        r.run_id.chars().take(8).collect::<String>()
    );
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(name))
}

/// Returns the absolute path of the exported file.
pub fn export_result_json(r: &RunResult) -> Result<PathBuf> {
    let path = export_path(r, "json")?;
    crate::storage::export_json(&path, r)?;
    Ok(path)
}

/// Returns the absolute path of the exported file.
pub fn export_result_log(r: &RunResult) -> Result<PathBuf> {
    let path = export_path(r, "log")?;
    crate::storage::export_log(&path, r)?;
    Ok(path)
}

/// Clipboard worker. It owns one `Clipboard` for the life of the process so
/// X11/Wayland selections stay readable after `set_text` returns.
fn clipboard_sender() -> Result<&'static std_mpsc::Sender<String>> {
    if let Some(tx) = CLIPBOARD_SENDER.get() {
        return Ok(tx);
    }
    let (tx, rx) = std_mpsc::channel::<String>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
    std::thread::Builder::new()
        .name("clipboard".into())
        .spawn(move || {
            let mut clipboard = match arboard::Clipboard::new() {
                Ok(c) => {
                    let _ = ready_tx.send(Ok(()));
                    c
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            for text in rx {
                if let Err(e) = clipboard.set_text(text) {
                    tracing::warn!("clipboard write failed: {e}");
                }
            }
        })
        .context("spawn clipboard thread")?;

    match ready_rx.recv_timeout(Duration::from_secs(2)) {
        Ok(Ok(())) => Ok(CLIPBOARD_SENDER.get_or_init(|| tx)),
        Ok(Err(e)) => Err(anyhow::anyhow!("clipboard unavailable: {e}")),
        Err(_) => Err(anyhow::anyhow!("clipboard did not respond")),
    }
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    clipboard_sender()?
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard worker has stopped"))
}
