//! Run lifecycle controller.
//!
//! Owns the single active simulation, start/stop/quit orchestration, and emits
//! events for presentation layers.

use crate::engine::{check_executable, EngineControl, LaunchSpec, SimulationEngine};
use crate::model::{
    InfoEvent, RunConfig, RunEvent, RunResult, RunStatus, SENTINEL_EXIT_CODE,
};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tracing::{info, warn};

/// Commands emitted by UI layers to control simulation runs.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(Box<RunConfig>),
    Stop,
    Quit,
}

/// Internal handle for a running simulation task.
struct RunCtx {
    cfg: RunConfig,
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<RunResult>>,
}

/// Reasons a start is refused before anything is spawned.
pub(crate) fn preflight(cfg: &RunConfig) -> std::result::Result<(), InfoEvent> {
    if let Err(e) = cfg.validate() {
        return Err(InfoEvent::InvalidConfig {
            reason: e.to_string(),
        });
    }
    if check_executable(&cfg.executable_path).is_err() {
        return Err(InfoEvent::ExecutableMissing {
            path: cfg.executable_path.clone(),
        });
    }
    Ok(())
}

/// Spawn a new simulation run and return its control handle.
fn start_run(cfg: RunConfig, event_tx: UnboundedSender<RunEvent>) -> RunCtx {
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let engine = SimulationEngine::new(cfg.clone());
    let handle = tokio::spawn(async move { engine.run(event_tx, ctrl_rx).await });
    RunCtx {
        cfg,
        ctrl_tx,
        handle: Some(handle),
    }
}

/// Try to start a run; emits the refusal reason instead when it cannot.
fn try_start(
    cfg: RunConfig,
    run_ctx: &Option<RunCtx>,
    event_tx: &UnboundedSender<RunEvent>,
) -> Option<RunCtx> {
    if run_ctx.is_some() {
        let _ = event_tx.send(RunEvent::Info(InfoEvent::StartRejected));
        return None;
    }
    if let Err(reason) = preflight(&cfg) {
        warn!("refusing to start: {}", reason.to_message());
        let _ = event_tx.send(RunEvent::Info(reason));
        return None;
    }
    Some(start_run(cfg, event_tx.clone()))
}

/// Failed result standing in for a run whose task died before finishing.
fn crashed_result(cfg: RunConfig, reason: String) -> RunResult {
    RunResult {
        run_id: String::from("crashed"),
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        command_line: LaunchSpec::from_config(&cfg).command_line(),
        config: cfg,
        exit_code: SENTINEL_EXIT_CODE,
        status: RunStatus::Failed,
        progress: 0,
        duration: Duration::ZERO,
        output_lines: vec![reason],
    }
}

/// Orchestrate simulation runs based on UI commands and emit events back to
/// presentation layers.
pub(crate) async fn run_controller(
    launch: Option<RunConfig>,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    if let Some(cfg) = launch {
        run_ctx = try_start(cfg, &run_ctx, &event_tx);
    }
    let mut quit_pending = false;
    let mut cmd_open = true;
    // Stop watchdog: a child that ignores the kill keeps the UI informed.
    let mut stop_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if cmd_open => {
                if cmd.is_none() {
                    cmd_open = false;
                }
                match cmd {
                    Some(UiCommand::Start(cfg)) => {
                        if let Some(ctx) = try_start(*cfg, &run_ctx, &event_tx) {
                            run_ctx = Some(ctx);
                        }
                    }
                    Some(UiCommand::Stop) => {
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Stop);
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::StopRequested));
                            stop_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::NoActiveRun));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the active run so its result is still reported.
                        if quit_pending {
                            continue;
                        }
                        quit_pending = true;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Stop);
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::StopRequested));
                            stop_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            break Ok(());
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = run_ctx.take() {
                        if let Err(e) = join_res {
                            // The engine always reports `Finished`; a dead task must too.
                            warn!("simulation task died: {e}");
                            let result = crashed_result(ctx.cfg, format!("error: simulation task failed: {e}"));
                            let _ = event_tx.send(RunEvent::Finished { result: Box::new(result) });
                        }
                    }
                    stop_deadline = None;
                    if quit_pending {
                        break Ok(());
                    }
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = stop_deadline {
                    if tokio::time::Instant::now() >= deadline && run_ctx.is_some() {
                        info!("child has not exited after stop request");
                        let _ = event_tx.send(RunEvent::Info(InfoEvent::StillStopping));
                        stop_deadline = None;
                    }
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// `/bin/sh <script> Pb 10 gamma "1.0 MeV"`: the macro slot carries the script.
    fn shell_config(dir: &std::path::Path, body: &str) -> RunConfig {
        let script = dir.join("sim.sh");
        std::fs::write(&script, body).unwrap();
        RunConfig {
            executable_path: "/bin/sh".into(),
            macro_file: Some(script.to_string_lossy().into_owned()),
            ..RunConfig::default()
        }
    }

    async fn next_matching(
        rx: &mut mpsc::UnboundedReceiver<RunEvent>,
        seen: &mut Vec<RunEvent>,
        pred: impl Fn(&RunEvent) -> bool,
    ) {
        while let Some(ev) = rx.recv().await {
            let hit = pred(&ev);
            seen.push(ev);
            if hit {
                return;
            }
        }
        panic!("event stream ended early");
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = shell_config(dir.path(), "echo \"$1|$2|$3|$4\"\nexec sleep 30\n");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctl = tokio::spawn(run_controller(Some(cfg.clone()), event_tx, cmd_rx));

        let mut seen = Vec::new();
        next_matching(&mut event_rx, &mut seen, |e| {
            matches!(e, RunEvent::Line { text } if text == "Pb|10|gamma|1.0 MeV")
        })
        .await;

        cmd_tx.send(UiCommand::Start(Box::new(cfg))).unwrap();
        next_matching(&mut event_rx, &mut seen, |e| {
            matches!(e, RunEvent::Info(InfoEvent::StartRejected))
        })
        .await;

        cmd_tx.send(UiCommand::Stop).unwrap();
        next_matching(&mut event_rx, &mut seen, |e| {
            matches!(e, RunEvent::Finished { result } if result.status == RunStatus::Aborted)
        })
        .await;

        cmd_tx.send(UiCommand::Quit).unwrap();
        ctl.await.unwrap().unwrap();

        let started = seen
            .iter()
            .filter(|e| matches!(e, RunEvent::Started { .. }))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn missing_executable_is_refused_before_spawn() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctl = tokio::spawn(run_controller(None, event_tx, cmd_rx));

        let cfg = RunConfig {
            executable_path: "/nonexistent/g4/main".into(),
            ..RunConfig::default()
        };
        cmd_tx.send(UiCommand::Start(Box::new(cfg))).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();
        ctl.await.unwrap().unwrap();

        let mut events = Vec::new();
        while let Some(ev) = event_rx.recv().await {
            events.push(ev);
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Info(InfoEvent::ExecutableMissing { .. }))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RunEvent::Started { .. })));
    }

    #[tokio::test]
    async fn quit_stops_active_run_and_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = shell_config(dir.path(), "echo up\nexec sleep 30\n");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctl = tokio::spawn(run_controller(Some(cfg), event_tx, cmd_rx));

        let mut seen = Vec::new();
        next_matching(&mut event_rx, &mut seen, |e| {
            matches!(e, RunEvent::Line { text } if text == "up")
        })
        .await;
        cmd_tx.send(UiCommand::Quit).unwrap();
        ctl.await.unwrap().unwrap();

        while let Some(ev) = event_rx.recv().await {
            seen.push(ev);
        }
        let finished: Vec<&RunResult> = seen
            .iter()
            .filter_map(|e| match e {
                RunEvent::Finished { result } => Some(result.as_ref()),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, RunStatus::Aborted);
    }

    #[tokio::test]
    async fn stop_without_run_is_a_message() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctl = tokio::spawn(run_controller(None, event_tx, cmd_rx));
        cmd_tx.send(UiCommand::Stop).unwrap();
        drop(cmd_tx);
        ctl.await.unwrap().unwrap();
        assert!(matches!(
            event_rx.recv().await,
            Some(RunEvent::Info(InfoEvent::NoActiveRun))
        ));
    }
}
