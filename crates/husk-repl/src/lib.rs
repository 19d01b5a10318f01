//! husk REPL — the interactive read-eval loop.
//!
//! A thin wrapper over husk-kernel: rustyline line editing and history,
//! job notices before each prompt, and the shutdown drain on exit. All the
//! interesting behavior lives in the kernel; this loop only reads lines and
//! prints what comes back.

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

use husk_kernel::{EvalOutcome, Shell};

const PROMPT: &str = "husk$ ";

/// Run the interactive loop until `exit`, `quit`, or end-of-file.
pub fn run() -> Result<()> {
    let shell = Shell::new().context("failed to start the shell")?;
    let mut editor: Editor<(), DefaultHistory> =
        Editor::new().context("failed to initialize the line editor")?;

    loop {
        // Finished background jobs are announced before the prompt, and
        // their slots freed only now that the user has seen them.
        for line in shell.poll_notifications() {
            println!("{line}");
        }

        match editor.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match shell.eval(&line) {
                    Ok(EvalOutcome::Exit) => break,
                    Ok(EvalOutcome::Code(code)) => {
                        if code != 0 {
                            tracing::debug!(code, "command exited nonzero");
                        }
                    }
                    Err(e) => eprintln!("husk: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("line editor failure"),
        }
    }

    for line in shell.shutdown() {
        println!("{line}");
    }
    Ok(())
}
