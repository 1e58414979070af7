//! Text summary builder for CLI output.
//!
//! Formats the human-readable footer printed after the relayed log in text mode.

use crate::engine::{format_energy, format_thickness};
use crate::model::{RunResult, RunStatus};
use std::time::Duration;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Duration rounded to milliseconds for display.
pub(crate) fn format_elapsed(d: Duration) -> String {
    let ms = Duration::from_millis(d.as_millis() as u64);
    humantime::format_duration(ms).to_string()
}

pub(crate) fn build_text_summary(result: &RunResult) -> TextSummary {
    let cfg = &result.config;
    let mut lines = vec!["-".repeat(60)];

    lines.push(format!(
        "Source: {} {} {} | Shield: {} {} cm",
        cfg.particle,
        format_energy(cfg.energy_value),
        cfg.energy_unit,
        cfg.material,
        format_thickness(cfg.thickness_cm),
    ));
    lines.push(format!(
        "Events: {} | Threads: {}",
        cfg.event_count, cfg.thread_count
    ));
    lines.push(format!(
        "Output: {} line(s) in {}",
        result.output_lines.len(),
        format_elapsed(result.duration)
    ));

    lines.push(match result.status {
        RunStatus::Completed => "Simulation completed successfully".to_string(),
        RunStatus::Failed => format!(
            "Simulation ended abnormally (exit code {})",
            result.exit_code
        ),
        RunStatus::Aborted => "Simulation stopped by user".to_string(),
    });

    TextSummary { lines }
}
