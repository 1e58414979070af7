mod args;
mod progress;

pub use args::{check_executable, format_energy, format_thickness, LaunchSpec};
pub use progress::ProgressTracker;

use crate::error::LaunchError;
use crate::model::{RunConfig, RunEvent, RunResult, RunStatus, SENTINEL_EXIT_CODE};
use rand::RngCore;
use std::io::{BufRead, BufReader};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Stop relaying output and kill the child.
    Stop,
}

/// Runs one simulation process and relays its output as [`RunEvent`]s.
pub struct SimulationEngine {
    cfg: RunConfig,
    spec: LaunchSpec,
}

impl SimulationEngine {
    pub fn new(cfg: RunConfig) -> Self {
        let spec = LaunchSpec::from_config(&cfg);
        Self { cfg, spec }
    }

    /// Launch an explicit command instead of the one derived from `cfg`.
    #[cfg(test)]
    pub fn with_spec(cfg: RunConfig, spec: LaunchSpec) -> Self {
        Self { cfg, spec }
    }

    /// Emits `Started`, the output lines, progress, and exactly one `Finished`.
    /// Launch and relay failures end up in the result, never as an error.
    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<RunEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> RunResult {
        let started = Instant::now();
        let timestamp_utc = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into());
        let command_line = self.spec.command_line();

        info!(command = %command_line, "starting simulation");
        let _ = event_tx.send(RunEvent::Started {
            command_line: command_line.clone(),
        });

        let mut relay = Relay {
            event_tx: &event_tx,
            tracker: ProgressTracker::new(self.cfg.event_count),
            lines: Vec::new(),
        };

        let (status, exit_code) = match self.relay(&mut relay, &mut control_rx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("simulation failed: {e}");
                relay.push_line(format!("error: {e}"));
                (RunStatus::Failed, SENTINEL_EXIT_CODE)
            }
        };

        if status == RunStatus::Completed {
            relay.complete();
        }

        let result = RunResult {
            run_id: gen_run_id(),
            timestamp_utc,
            config: self.cfg,
            command_line,
            exit_code,
            status,
            progress: relay.tracker.current(),
            duration: started.elapsed(),
            output_lines: relay.lines,
        };

        info!(
            status = result.status.label(),
            exit_code = result.exit_code,
            lines = result.output_lines.len(),
            "simulation finished"
        );
        let _ = event_tx.send(RunEvent::Finished {
            result: Box::new(result.clone()),
        });
        result
    }

    async fn relay(
        &self,
        out: &mut Relay<'_>,
        control_rx: &mut mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<(RunStatus, i32), LaunchError> {
        self.cfg.validate()?;
        check_executable(&self.spec.program)?;

        // stdout and stderr share one pipe so lines keep the child's write order.
        let (reader, writer) = std::io::pipe()?;
        let mut child = {
            let mut cmd = Command::new(&self.spec.program);
            cmd.args(&self.spec.args)
                .envs(self.spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer)
                .kill_on_drop(true);
            // Own process group: a terminal Ctrl-C reaches us, and we stop the
            // child, instead of the child dying on its own first.
            #[cfg(unix)]
            cmd.process_group(0);
            cmd.spawn()
                .map_err(|e| LaunchError::spawn(&self.spec.program, e))?
            // `cmd` drops here, closing our copies of the write end.
        };
        debug!(pid = ?child.id(), "child spawned");

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<std::io::Result<String>>();
        std::thread::Builder::new()
            .name("sim-output".into())
            .spawn(move || read_lines(reader, line_tx))?;

        let mut stop_requested = false;
        let mut control_open = true;
        loop {
            tokio::select! {
                biased;
                ctrl = control_rx.recv(), if control_open => match ctrl {
                    Some(EngineControl::Stop) => {
                        info!("stop requested, killing child");
                        stop_requested = true;
                        if let Err(e) = child.start_kill() {
                            debug!("kill after exit: {e}");
                        }
                        break;
                    }
                    None => control_open = false,
                },
                line = line_rx.recv() => match line {
                    Some(Ok(text)) => out.push_line(text),
                    Some(Err(e)) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Err(e.into());
                    }
                    None => break,
                },
            }
        }

        let waited = child.wait().await;
        if stop_requested {
            let code = waited
                .ok()
                .and_then(|s| s.code())
                .unwrap_or(SENTINEL_EXIT_CODE);
            return Ok((RunStatus::Aborted, code));
        }

        let exit = waited?;
        let code = exit.code().unwrap_or(SENTINEL_EXIT_CODE);
        let status = if exit.success() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        Ok((status, code))
    }
}

/// Accumulates the log and forwards each line as it arrives.
struct Relay<'a> {
    event_tx: &'a mpsc::UnboundedSender<RunEvent>,
    tracker: ProgressTracker,
    lines: Vec<String>,
}

impl Relay<'_> {
    fn push_line(&mut self, text: String) {
        let progress = self.tracker.observe_line(&text);
        let _ = self.event_tx.send(RunEvent::Line { text: text.clone() });
        if let Some(percent) = progress {
            let _ = self.event_tx.send(RunEvent::Progress { percent });
        }
        self.lines.push(text);
    }

    fn complete(&mut self) {
        if let Some(percent) = self.tracker.complete() {
            let _ = self.event_tx.send(RunEvent::Progress { percent });
        }
    }
}

/// Blocking reader for the merged output pipe.
fn read_lines<R: std::io::Read>(reader: R, tx: mpsc::UnboundedSender<std::io::Result<String>>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(Ok(decode_line(&buf))).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}
