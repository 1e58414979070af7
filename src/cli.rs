use crate::engine::{EngineControl, SimulationEngine};
use crate::model::{EnergyUnit, Material, Particle, RunConfig, RunEvent, RunResult, RunStatus, ThreadCount};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "g4-shield-cli",
    version,
    about = "Launch Geant4 radiation-shielding simulations and follow their output"
)]
pub struct Cli {
    /// Path to the Geant4 simulation executable
    #[arg(long = "exe", default_value = "./main")]
    pub executable: PathBuf,

    /// Macro file passed as the first argument (defaults to vis.mac)
    #[arg(long)]
    pub macro_file: Option<String>,

    /// Primary particle
    #[arg(long, value_enum, default_value_t = Particle::Gamma)]
    pub particle: Particle,

    /// Primary particle energy
    #[arg(long, default_value_t = 1.0)]
    pub energy: f64,

    /// Unit for --energy
    #[arg(long, value_enum, default_value_t = EnergyUnit::MeV)]
    pub energy_unit: EnergyUnit,

    /// Shield material (Pb, Fe, Concrete, Water, Polyethylene, or a name like "Lead")
    #[arg(long, default_value = "Pb")]
    pub material: Material,

    /// Shield thickness in centimetres
    #[arg(long, default_value_t = 10.0)]
    pub thickness: f64,

    /// Number of events to simulate
    #[arg(long, default_value_t = 1000)]
    pub events: u64,

    /// Worker threads: "auto" or a number
    #[arg(long, default_value = "auto")]
    pub threads: ThreadCount,

    /// Print JSON result and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Relay output as plain text and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for batch usage)
    #[arg(long)]
    pub silent: bool,

    /// Export the finished run as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the finished run's output log as text
    #[arg(long)]
    pub export_log: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Directory for saved runs (defaults to the user data directory)
    #[arg(long)]
    pub history_dir: Option<PathBuf>,

    /// Start the simulation as soon as the TUI opens
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub run_on_launch: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// True when the TUI should own the terminal.
    pub fn is_interactive(&self) -> bool {
        !(self.json || self.text || self.silent)
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.is_interactive() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_json(args).await;
    }

    run_text(args).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        executable_path: args.executable.clone(),
        macro_file: args.macro_file.clone(),
        particle: args.particle,
        energy_value: args.energy,
        energy_unit: args.energy_unit,
        material: args.material,
        thickness_cm: args.thickness,
        event_count: args.events,
        thread_count: args.threads,
    }
}

/// Build and pre-check the config; refusals become errors before anything spawns.
fn prepare_config(args: &Cli) -> Result<RunConfig> {
    let cfg = build_config(args);
    crate::orchestrator::preflight(&cfg).map_err(|reason| anyhow::anyhow!(reason.to_message()))?;
    Ok(cfg)
}

/// Run one simulation to completion, handing every event to `on_event`.
/// Ctrl-C stops the child instead of abandoning it.
async fn drive_run<F: FnMut(RunEvent)>(cfg: RunConfig, mut on_event: F) -> Result<RunResult> {
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    let engine = SimulationEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

    let mut interrupted = false;
    loop {
        tokio::select! {
            ev = evt_rx.recv() => match ev {
                Some(ev) => on_event(ev),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                info!("interrupt received, stopping simulation");
                let _ = ctrl_tx.send(EngineControl::Stop);
            }
        }
    }

    handle.await.context("simulation task failed")
}

async fn run_json(args: Cli) -> Result<()> {
    let cfg = prepare_config(&args)?;
    let silent = args.silent;

    let result = drive_run(cfg, |ev| {
        if let RunEvent::Line { text } = ev {
            debug!(target: "simulation", "{text}");
        }
    })
    .await?;

    // Handle exports (errors will propagate)
    handle_exports(&args, &result)?;

    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&result)?;
        let _ = tx.send(OutputLine::Stdout(out));
    }

    if args.auto_save {
        let dir = crate::storage::runs_dir(args.history_dir.as_deref())?;
        if silent {
            crate::storage::save_run(&dir, &result).context("failed to save run results")?;
        } else if let Some(tx) = out_tx.as_ref() {
            if let Ok(p) = crate::storage::save_run(&dir, &result) {
                let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
            }
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    status_to_result(&result)
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = prepare_config(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let ev_tx = out_tx.clone();
    let result = drive_run(cfg, move |ev| match ev {
        RunEvent::Started { command_line } => {
            let _ = ev_tx.send(OutputLine::Stderr(format!("Running: {command_line}")));
            let _ = ev_tx.send(OutputLine::Stderr("-".repeat(60)));
        }
        RunEvent::Line { text } => {
            let _ = ev_tx.send(OutputLine::Stdout(text));
        }
        RunEvent::Progress { percent } => {
            let _ = ev_tx.send(OutputLine::Stderr(format!("[{percent:>3}%]")));
        }
        RunEvent::Info(info) => {
            let _ = ev_tx.send(OutputLine::Stderr(info.to_message()));
        }
        RunEvent::Finished { .. } => {}
    })
    .await?;

    handle_exports(&args, &result)?;
    let summary = crate::text_summary::build_text_summary(&result);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if args.auto_save {
        let saved = crate::storage::runs_dir(args.history_dir.as_deref())
            .and_then(|dir| crate::storage::save_run(&dir, &result));
        if let Ok(p) = saved {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    status_to_result(&result)
}

/// Handle export operations (JSON and log) for both text and JSON modes.
fn handle_exports(args: &Cli, result: &RunResult) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, result)?;
    }
    if let Some(p) = args.export_log.as_deref() {
        crate::storage::export_log(p, result)?;
    }
    Ok(())
}

/// Non-interactive modes exit nonzero unless the simulation completed.
fn status_to_result(result: &RunResult) -> Result<()> {
    match result.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed => Err(anyhow::anyhow!(
            "simulation failed (exit code {})",
            result.exit_code
        )),
        RunStatus::Aborted => Err(anyhow::anyhow!("simulation aborted")),
    }
}
