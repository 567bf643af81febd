mod options;

use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use options::Args;
use ptytap::{Runner, Session};

/// Exit status when the timeout elapses first, as with timeout(1).
const TIMED_OUT: u8 = 124;

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ptytap: {e}");
            ExitCode::from(failure_status(&e))
        }
    }
}

fn run(args: &Args) -> ptytap::Result<u8> {
    let config = args.runner_config()?;
    let deadline = args
        .timeout()?
        .and_then(|timeout| Instant::now().checked_add(timeout));
    let interactive = config.interactive;

    let mut session = Runner::with_config(config).spawn(&args.command)?;
    let exit = session.wait_until_exit(deadline)?;

    // Interactive sessions already echoed everything as it arrived.
    if !interactive && !args.quiet {
        print_captured(&session)?;
    }

    match exit {
        Some(exit) => {
            log::debug!("{session}");
            Ok(exit_status(exit.code(), exit.signal()))
        }
        None => {
            log::warn!("giving up on process {}; it is still running", session.pid());
            eprintln!("ptytap: timed out waiting for process {}", session.pid());
            Ok(TIMED_OUT)
        }
    }
}

fn print_captured(session: &Session) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(session.captured_output())?;
    stdout.flush()?;
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(session.captured_error())?;
    stderr.flush()
}

/// Shell convention: the exit code, or 128 + signal number.
fn exit_status(code: Option<i32>, signal: Option<i32>) -> u8 {
    match (code, signal) {
        (Some(code), _) => u8::try_from(code & 0xff).unwrap_or(1),
        (None, Some(signal)) => u8::try_from(128 + signal).unwrap_or(1),
        (None, None) => 1,
    }
}

fn failure_status(err: &ptytap::Error) -> u8 {
    match err {
        ptytap::Error::Interrupted => 130,
        e if e.is_spawn_failure() => 127,
        _ => 1,
    }
}
