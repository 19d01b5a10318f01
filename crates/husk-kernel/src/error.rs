//! Error types for the husk kernel.

use thiserror::Error;

use crate::jobs::JobId;

/// Errors surfaced by the shell kernel.
///
/// Startup errors (`NotInteractive`) are fatal and raised before any job
/// state exists. Everything else aborts at most the command that caused it;
/// the job table is never left with a partially constructed job.
#[derive(Debug, Error)]
pub enum Error {
    /// Job control needs a controlling terminal on stdin.
    #[error("shell can only run on an interactive terminal")]
    NotInteractive,

    /// The command line could not be turned into a pipeline.
    #[error("command line is not well formed: {0}")]
    Malformed(String),

    /// A job id that names no live job.
    #[error("no such job: {0}")]
    NoSuchJob(JobId),

    /// `fg`/`bg` without an argument, but nothing to resume.
    #[error("no current job")]
    NoCurrentJob,

    /// A redirection target could not be opened.
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
