//! ptytap: run a child process on ptys or pipes and capture everything it does.
//!
//! The caller drives all I/O on its own thread; nothing runs in the background.
//!
//! # Architecture
//!
//! - [`Runner`]: Decides per stream whether the child gets a pty or a pipe,
//!   spawns it, and hands back a session.
//! - [`Session`]: Owns the child and the parent side of its streams. Pumps
//!   output into capture buffers (and, when interactive, to this process's
//!   terminal), forwards terminal input, and waits for exit with a deadline.
//! - [`Console`]: This process's own terminal as seen by interactive sessions.
//!
//! ```no_run
//! use ptytap::Runner;
//!
//! let mut session = Runner::new().spawn(["ls", "-l"])?;
//! if session.wait_and_check_success()? {
//!     print!("{}", String::from_utf8_lossy(session.captured_output()));
//! }
//! # Ok::<(), ptytap::Error>(())
//! ```

pub mod config;
pub mod console;
pub mod error;
mod interrupt;
pub mod runner;
pub mod session;
mod stdio;

use std::ffi::OsStr;

pub use config::{RunnerConfig, Stream, StreamMode, StreamModes};
pub use console::Console;
pub use error::{Error, Result};
pub use runner::Runner;
pub use session::{new_tap, ExitResult, Session, Tap, CHUNK};

/// Spawn `argv` with the default runner (all streams on a pty).
pub fn run<I, S>(argv: I) -> Result<Session>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Runner::new().spawn(argv)
}

/// Run `argv` to completion and return what it wrote to stdout.
pub fn capture<I, S>(argv: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut session = run(argv)?;
    session.wait_until_exit(None)?;
    Ok(session.captured_output().to_vec())
}

/// Run `argv` to completion and report whether it succeeded.
pub fn system<I, S>(argv: I) -> Result<bool>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run(argv)?.wait_and_check_success()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_session() {
        let mut session = run(["true"]).unwrap();
        assert!(!session.has_exited());
        session.wait_until_exit(None).unwrap();
        assert!(session.has_exited());
    }

    #[test]
    fn test_capture_returns_output() {
        let output = capture(["echo", "hi"]).unwrap();
        assert_eq!(String::from_utf8_lossy(&output).trim(), "hi");
    }

    #[test]
    fn test_system_reports_status() {
        assert!(system(["true"]).unwrap());
        assert!(!system(["false"]).unwrap());
    }

    #[test]
    fn test_multi_word_commands() {
        assert!(system(["ls", "-l", "-a", "/"]).unwrap());
    }
}
