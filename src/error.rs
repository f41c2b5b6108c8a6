use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy of the environment core.
///
/// Public operations return `anyhow::Result`; these variants sit underneath the
/// context chain and can be recovered with `err.downcast_ref::<EnvError>()`.
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("ROM not found: {}", .0.display())]
    RomNotFound(PathBuf),

    #[error("failed to launch emulator session for {}", .0.display())]
    Launch(PathBuf),

    #[error("emulator operation failed: {0}")]
    Emulator(String),

    #[error("failed to stop emulator session")]
    Teardown,

    #[error("unreadable start state {}: {reason}", .path.display())]
    StartState { path: PathBuf, reason: String },

    #[error("action index {index} out of range (expected < {count})")]
    InvalidAction { index: usize, count: usize },

    #[error("episode not started: call reset() first")]
    NotStarted,

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("RAM dump must be {full} or {wram} bytes, got {got}")]
    DumpSize { got: usize, full: usize, wram: usize },
}
