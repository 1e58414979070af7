//! Errors raised while preparing or spawning a simulation.
//!
//! These stay inside the launch layer: the engine converts them into an
//! error line plus a failed completion instead of returning them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    /// The executable path names a file that is not there.
    #[error("executable not found: '{0}'")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to start the process.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while relaying output: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn spawn(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}
