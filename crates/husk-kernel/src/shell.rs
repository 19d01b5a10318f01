//! The shell facade: startup, line evaluation, and shutdown.
//!
//! Owns the terminal handle and the job-control engine and glues the thin
//! outer layers (lexer, builtins, the REPL) to them.

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{getpgid, getsid, setpgid, Pid};
use tracing::debug;

use crate::builtins::{self, BuiltinResult};
use crate::error::{Error, Result};
use crate::jobs::{JobControl, JobState};
use crate::lexer::{tokenize, Token};
use crate::pipeline;
use crate::terminal::Terminal;

/// What one evaluated line asks of the caller.
pub enum EvalOutcome {
    /// The line ran; this is its exit code.
    Code(i32),
    /// An exit builtin ran; drain the jobs and leave.
    Exit,
}

/// An interactive shell: terminal + job control.
pub struct Shell {
    term: Terminal,
    jobs: JobControl,
}

impl Shell {
    /// Start the shell.
    ///
    /// Claims the controlling terminal (fatal when stdin is not a tty, and
    /// checked before any job state exists), moves the shell into its own
    /// process group when it does not already lead one, sets the
    /// job-control signal dispositions, and starts the reaper.
    pub fn new() -> Result<Self> {
        // Lead our own process group before taking the terminal, so the
        // group the terminal is handed to is the one we will keep.
        if getsid(None)? != getpgid(None)? {
            setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
        }
        let term = Terminal::open()?;
        ignore_job_control_signals();

        let jobs = JobControl::new()?;
        debug!(pgid = term.shell_pgid().as_raw(), "shell started");
        Ok(Self { term, jobs })
    }

    pub fn jobs(&self) -> &JobControl {
        &self.jobs
    }

    pub fn terminal(&self) -> &Terminal {
        &self.term
    }

    /// Evaluate one line of input: `;`-separated commands, left to right.
    pub fn eval(&self, line: &str) -> Result<EvalOutcome> {
        let tokens = tokenize(line)?;
        let mut code = 0;
        for command in tokens.split(|t| *t == Token::Terminator) {
            match self.eval_command(command)? {
                EvalOutcome::Exit => return Ok(EvalOutcome::Exit),
                EvalOutcome::Code(c) => code = c,
            }
        }
        Ok(EvalOutcome::Code(code))
    }

    fn eval_command(&self, mut tokens: &[Token]) -> Result<EvalOutcome> {
        let mut background = false;
        if let Some((Token::Background, rest)) = tokens.split_last() {
            background = true;
            tokens = rest;
        }
        if tokens.is_empty() {
            if background {
                return Err(Error::Malformed("nothing to run in the background".into()));
            }
            return Ok(EvalOutcome::Code(0));
        }

        // Builtins are consulted for foreground, non-pipeline commands
        // only; everything else is a job.
        if !background && tokens.iter().all(|t| matches!(t, Token::Word(_))) {
            let argv: Vec<String> = tokens
                .iter()
                .map(|t| match t {
                    Token::Word(w) => w.clone(),
                    _ => unreachable!(),
                })
                .collect();
            match builtins::dispatch(self, &argv) {
                BuiltinResult::Exit => return Ok(EvalOutcome::Exit),
                BuiltinResult::Code(code) => return Ok(EvalOutcome::Code(code)),
                BuiltinResult::NotBuiltin => {}
            }
        }

        let stages = pipeline::resolve_stages(tokens)?;
        let code = self.jobs.run(&self.term, stages, background)?;
        Ok(EvalOutcome::Code(code))
    }

    /// Report and reclaim finished background jobs; the REPL calls this
    /// before every prompt so no job's exit goes unannounced.
    pub fn poll_notifications(&self) -> Vec<String> {
        self.jobs.report(Some(JobState::Finished))
    }

    /// Drain every outstanding job; returns the final report lines.
    pub fn shutdown(&self) -> Vec<String> {
        self.jobs.shutdown()
    }
}

/// The shell itself must shrug off the signals its jobs are controlled
/// with; children reset these to default before exec.
fn ignore_job_control_signals() {
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
    ] {
        unsafe {
            let _ = signal(sig, SigHandler::SigIgn);
        }
    }
}
