//! husk CLI entry point.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => {}
        Some("--version" | "-V") => {
            println!("husk {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Some("--help" | "-h") => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Some(unknown) => {
            eprintln!("husk: unknown option: {unknown}");
            eprintln!("Run 'husk --help' for usage.");
            return ExitCode::FAILURE;
        }
    }

    match husk_repl::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("husk: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!(
        r#"husk v{} — a small shell with real job control

Usage:
  husk                 Interactive shell (requires a terminal)

Options:
  -h, --help           Show this help
  -V, --version        Show version

Inside the shell:
  cmd args...          Run an external command in the foreground
  a | b | c            Pipeline (one job, one process group)
  cmd &                Run in the background
  cmd < in > out       Redirect stdin/stdout (>> appends)
  jobs                 List jobs
  fg [n]  /  bg [n]    Resume a job in the foreground / background
  kill [%]n            Terminate a job
  cd [dir]             Change directory
  exit                 Leave (after draining outstanding jobs)
"#,
        env!("CARGO_PKG_VERSION")
    );
}
