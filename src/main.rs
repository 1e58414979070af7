mod cli;
mod engine;
mod error;
mod model;
mod orchestrator;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logs go to stderr, except in the TUI where they would corrupt the screen
/// and are appended to a file in the data directory instead.
fn init_tracing(args: &cli::Cli) {
    let default = if args.verbose {
        "debug"
    } else if args.is_interactive() {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if args.is_interactive() {
        let file = storage::data_dir().and_then(|dir| {
            std::fs::create_dir_all(&dir)?;
            Ok(std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("g4-shield-cli.log"))?)
        });
        if let Ok(file) = file {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .with(filter)
                .init();
        }
        return;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    let is_non_tui = !args.is_interactive();
    init_tracing(&args);

    match cli::run(args).await {
        Ok(()) => {
            // Exit explicitly in non-TUI modes: a reader thread may still be
            // blocked on a pipe held open by an orphaned grandchild.
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
