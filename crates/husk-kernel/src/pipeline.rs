//! Pipeline construction: stage splitting, redirections, and spawning.
//!
//! A command line's tokens are split on `|` into stages; each stage's
//! redirections are resolved into opened descriptors before anything is
//! forked, so a malformed line or an unopenable file aborts with the job
//! table untouched. Every pipe end is an [`OwnedFd`] that moves into
//! [`spawn_stage`] and is dropped, and therefore closed, in the parent the
//! moment the child holds it. A write end left open anywhere would keep the
//! reader from ever seeing end-of-stream.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{killpg, signal, sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{dup2, execvp, fork, getpid, pipe2, setpgid, ForkResult, Pid};
use nix::sys::termios::Termios;
use tracing::debug;

use crate::error::{Error, Result};
use crate::jobs::{JobId, JobTable};
use crate::lexer::Token;

/// One pipeline stage: an argument vector plus any explicit redirections,
/// already opened.
pub struct Stage {
    pub argv: Vec<String>,
    input: Option<OwnedFd>,
    output: Option<OwnedFd>,
}

/// Split a token stream into stages and resolve every redirection.
///
/// Input redirection is only meaningful on the first stage and output
/// redirection on the last, but an explicit redirection anywhere overrides
/// the pipe end it displaces. An empty stage (as in `a | | b`, or a lone
/// `|`) is a malformed command line; nothing has been forked or registered
/// when that is detected.
pub fn resolve_stages(tokens: &[Token]) -> Result<Vec<Stage>> {
    tokens
        .split(|t| *t == Token::Pipe)
        .map(resolve_redirections)
        .collect()
}

fn resolve_redirections(tokens: &[Token]) -> Result<Stage> {
    let mut argv = Vec::new();
    let mut input = None;
    let mut output = None;

    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(word) => argv.push(word.clone()),
            Token::RedirIn => {
                let path = redirect_target(iter.next())?;
                input = Some(open_input(path)?);
            }
            Token::RedirOut => {
                let path = redirect_target(iter.next())?;
                output = Some(open_output(path, false)?);
            }
            Token::RedirAppend => {
                let path = redirect_target(iter.next())?;
                output = Some(open_output(path, true)?);
            }
            Token::Background | Token::Terminator | Token::Pipe => {
                return Err(Error::Malformed(format!(
                    "unexpected token {token:?} inside a pipeline stage"
                )))
            }
        }
    }

    if argv.is_empty() {
        return Err(Error::Malformed("empty pipeline stage".into()));
    }
    Ok(Stage {
        argv,
        input,
        output,
    })
}

fn redirect_target(token: Option<&Token>) -> Result<&str> {
    match token {
        Some(Token::Word(path)) => Ok(path),
        _ => Err(Error::Malformed("redirection without a file name".into())),
    }
}

fn open_input(path: &str) -> Result<OwnedFd> {
    let file = File::open(path).map_err(|source| Error::Redirect {
        path: path.to_string(),
        source,
    })?;
    Ok(file.into())
}

fn open_output(path: &str, append: bool) -> Result<OwnedFd> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|source| Error::Redirect {
            path: path.to_string(),
            source,
        })?;
    Ok(file.into())
}

/// Spawn every stage of a pipeline and register the resulting job.
///
/// The caller holds the table lock, so the reaper can only ever see the job
/// fully registered. Stage 1 becomes the process-group leader and its pid
/// the group id; later stages join that group. Each inter-stage link is a
/// `pipe2(O_CLOEXEC)` pair whose ends are moved into [`spawn_stage`] and
/// closed in the parent by drop as soon as the child owns them.
pub(crate) fn spawn_pipeline(
    table: &mut JobTable,
    stages: Vec<Stage>,
    background: bool,
    tmodes: Option<Termios>,
) -> Result<JobId> {
    let nstages = stages.len();
    let mut tmodes = tmodes;
    let mut id: Option<JobId> = None;
    let mut pgid: Option<Pid> = None;
    let mut prev_read: Option<OwnedFd> = None;

    for (i, stage) in stages.into_iter().enumerate() {
        let (next_read, write) = if i + 1 < nstages {
            match pipe2(OFlag::O_CLOEXEC) {
                Ok((read, write)) => (Some(read), Some(write)),
                Err(e) => {
                    abandon(pgid.filter(|_| id.is_some()));
                    return Err(e.into());
                }
            }
        } else {
            (None, None)
        };

        // Explicit redirections win over the pipe ends they displace; the
        // displaced end is dropped, and therefore closed, right here.
        let input = stage.input.or(prev_read.take());
        let output = stage.output.or(write);

        let pid = match spawn_stage(pgid, input, output, &stage.argv) {
            Ok(pid) => pid,
            Err(e) => {
                abandon(pgid.filter(|_| id.is_some()));
                return Err(e);
            }
        };

        let job = *id.get_or_insert_with(|| table.add_job(pid, background, tmodes.take()));
        pgid.get_or_insert(pid);
        table.add_process(job, pid, &stage.argv);
        prev_read = next_read;
    }

    Ok(id.expect("a resolved pipeline has at least one stage"))
}

/// A stage failed to spawn mid-pipeline: the already-forked part of the
/// group is told to die. The job stays registered, so the reaper retires
/// what did start and `report` surfaces it.
fn abandon(pgid: Option<Pid>) {
    if let Some(pgid) = pgid {
        let _ = killpg(pgid, Signal::SIGCONT);
        let _ = killpg(pgid, Signal::SIGTERM);
    }
}

/// Fork one pipeline stage.
///
/// The child joins process group `pgid` (or founds its own when `pgid` is
/// `None`, meaning it is the first stage), clears the inherited signal mask
/// and handler dispositions, moves the provided ends onto descriptors 0
/// and 1, and execs. An exec failure is reported on stderr and the child
/// `_exit`s 127; it never returns into the shell's state. The parent
/// repeats the group join for the child, covering the window where the
/// parent's bookkeeping runs before the child's own setpgid.
fn spawn_stage(
    pgid: Option<Pid>,
    input: Option<OwnedFd>,
    output: Option<OwnedFd>,
    argv: &[String],
) -> Result<Pid> {
    // Everything the child needs is allocated before the fork; after it,
    // the child keeps to async-signal-safe territory until exec.
    let cargv: Vec<CString> = argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::Malformed("argument contains a NUL byte".into()))?;

    match unsafe { fork() }? {
        ForkResult::Child => {
            let pid = getpid();
            let _ = setpgid(pid, pgid.unwrap_or(pid));
            reset_child_signals();

            if let Some(fd) = &input {
                let _ = dup2(fd.as_raw_fd(), libc::STDIN_FILENO);
            }
            drop(input);
            if let Some(fd) = &output {
                let _ = dup2(fd.as_raw_fd(), libc::STDOUT_FILENO);
            }
            drop(output);

            let err = match execvp(&cargv[0], &cargv) {
                Ok(never) => match never {},
                Err(err) => err,
            };
            let msg = format!("husk: {}: {}\n", argv[0], err);
            let _ = nix::unistd::write(std::io::stderr(), msg.as_bytes());
            unsafe { libc::_exit(127) }
        }
        ForkResult::Parent { child } => {
            let _ = setpgid(child, pgid.unwrap_or(child));
            debug!(pid = child.as_raw(), command = argv[0], "spawned stage");
            Ok(child)
            // input/output drop here: the parent's copies of the pipe ends
            // close the instant the child owns them.
        }
    }
}

/// Children must not inherit the shell's job-control signal setup: the
/// shell ignores the interactive-stop and terminal-access signals and has a
/// SIGCHLD handler installed, none of which may leak into commands.
fn reset_child_signals() {
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGCHLD,
    ] {
        unsafe {
            let _ = signal(sig, SigHandler::SigDfl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn stages_of(line: &str) -> Result<Vec<Stage>> {
        resolve_stages(&tokenize(line).unwrap())
    }

    #[test]
    fn test_single_stage() {
        let stages = stages_of("echo hello world").unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].argv, ["echo", "hello", "world"]);
        assert!(stages[0].input.is_none());
        assert!(stages[0].output.is_none());
    }

    #[test]
    fn test_three_stages_split_on_pipes() {
        let stages = stages_of("cat file | grep x | wc -l").unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].argv, ["cat", "file"]);
        assert_eq!(stages[1].argv, ["grep", "x"]);
        assert_eq!(stages[2].argv, ["wc", "-l"]);
    }

    #[test]
    fn test_empty_stage_is_malformed() {
        for line in ["cat | | wc", "| cat", "cat |"] {
            let err = stages_of(line).unwrap_err();
            assert!(
                err.to_string().contains("not well formed"),
                "{line:?} should be rejected, got: {err}"
            );
        }
    }

    #[test]
    fn test_missing_redirect_target_is_malformed() {
        assert!(stages_of("cat <").is_err());
        assert!(stages_of("echo hi > | cat").is_err());
    }

    #[test]
    fn test_input_redirect_must_name_an_existing_file() {
        let err = stages_of("cat < /definitely/not/a/real/file").unwrap_err();
        assert!(matches!(err, Error::Redirect { .. }));
    }

    #[test]
    fn test_output_redirect_opens_the_target() {
        let path = std::env::temp_dir().join(format!("husk-redir-{}", std::process::id()));
        let line = format!("echo hi > {}", path.display());
        let stages = stages_of(&line).unwrap();
        assert_eq!(stages[0].argv, ["echo", "hi"]);
        assert!(stages[0].output.is_some());
        drop(stages);
        let _ = std::fs::remove_file(&path);
    }
}
