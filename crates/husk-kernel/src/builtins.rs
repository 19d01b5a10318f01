//! Builtin commands, executed in the shell's own process.
//!
//! The dispatcher is consulted before anything is forked, and only for
//! foreground, non-pipeline commands; a builtin in a pipeline or in the
//! background is treated as an external command.

use crate::jobs::JobId;
use crate::shell::Shell;

/// Outcome of a dispatch attempt.
pub enum BuiltinResult {
    /// The first word names no builtin; fork it.
    NotBuiltin,
    /// The builtin ran and produced an exit code.
    Code(i32),
    /// The shell should exit.
    Exit,
}

/// Look up and run a builtin for `argv`.
pub(crate) fn dispatch(shell: &Shell, argv: &[String]) -> BuiltinResult {
    match argv[0].as_str() {
        "quit" | "exit" => BuiltinResult::Exit,
        "cd" => BuiltinResult::Code(cd(argv)),
        "jobs" => {
            for line in shell.jobs().report(None) {
                println!("{line}");
            }
            BuiltinResult::Code(0)
        }
        "fg" => BuiltinResult::Code(resume(shell, argv, false)),
        "bg" => BuiltinResult::Code(resume(shell, argv, true)),
        "kill" => BuiltinResult::Code(kill(shell, argv)),
        _ => BuiltinResult::NotBuiltin,
    }
}

fn cd(argv: &[String]) -> i32 {
    let target = argv
        .get(1)
        .cloned()
        .or_else(|| std::env::var("HOME").ok());
    match target {
        Some(dir) => match std::env::set_current_dir(&dir) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("cd: {dir}: {e}");
                1
            }
        },
        None => {
            eprintln!("cd: HOME not set");
            1
        }
    }
}

fn resume(shell: &Shell, argv: &[String], background: bool) -> i32 {
    let name = if background { "bg" } else { "fg" };
    let id = match job_arg(argv) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("{name}: {msg}");
            return 1;
        }
    };
    let result = if background {
        shell.jobs().resume_background(id).map(|()| 0)
    } else {
        shell.jobs().resume_foreground(id, shell.terminal())
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{name}: {e}");
            1
        }
    }
}

fn kill(shell: &Shell, argv: &[String]) -> i32 {
    let id = match job_arg(argv) {
        Ok(Some(id)) => id,
        Ok(None) => {
            eprintln!("kill: usage: kill [%]job");
            return 1;
        }
        Err(msg) => {
            eprintln!("kill: {msg}");
            return 1;
        }
    };
    match shell.jobs().kill(id) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("kill: {e}");
            1
        }
    }
}

/// Parse an optional job reference (`3` or `%3`). This is the validation
/// boundary for user-supplied slot indices; everything past it goes through
/// the table's checked lookup.
fn job_arg(argv: &[String]) -> Result<Option<JobId>, String> {
    match argv.get(1) {
        None => Ok(None),
        Some(raw) => raw
            .strip_prefix('%')
            .unwrap_or(raw)
            .parse::<usize>()
            .map(|n| Some(JobId(n)))
            .map_err(|_| format!("invalid job id: {raw}")),
    }
}
