//! Application-level orchestration utilities.
//!
//! This module owns run lifecycle control (start/stop/quit) and post-run processing
//! such as auto-save, exports, and history refresh. UI/CLI layers call into this
//! module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{preflight, run_controller, UiCommand};
pub(crate) use post_process::process_run_completion;
