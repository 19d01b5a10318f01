//! husk-kernel: the core of husk, a small interactive shell with real job
//! control.
//!
//! This crate provides:
//!
//! - **Lexer**: Tokenizes command lines using logos
//! - **Pipeline**: Stage splitting, redirections, and process spawning
//! - **Jobs**: The job table, the SIGCHLD reaper, the foreground monitor,
//!   and the resume/kill/report operations
//! - **Terminal**: The shell's controlling-terminal handle
//! - **Builtins**: The commands that run inside the shell process
//! - **Shell**: The facade the REPL drives
//!
//! Everything process-shaped goes through OS process groups: a pipeline is
//! one job is one process group, and stop/continue/terminate signals apply
//! to the group as a whole.

pub mod builtins;
pub mod error;
pub mod jobs;
pub mod lexer;
pub mod pipeline;
pub mod shell;
pub mod terminal;

pub use error::{Error, Result};
pub use jobs::{ExitStatus, JobControl, JobId, JobInfo, JobState};
pub use shell::{EvalOutcome, Shell};
pub use terminal::Terminal;
