use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::config::{RunnerConfig, Stream, StreamMode, StreamModes};
use crate::console::Console;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::stdio;

/// Spawns child processes with their standard streams on ptys or pipes.
///
/// A runner is reusable: every [`spawn`](Self::spawn) applies the same
/// configuration and returns an independent [`Session`].
#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    /// All streams on a pty, not interactive, current working directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Bridge this process's terminal to the child. Forces stdin and stdout
    /// onto a pty.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.config.interactive = interactive;
        self
    }

    /// `true` pipes every stream, `false` puts every stream on a pty.
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.config.streams = StreamModes::from_buffered(buffered);
        self
    }

    pub fn stream_mode(mut self, stream: Stream, mode: StreamMode) -> Self {
        self.config.streams.set(stream, mode);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    /// Start `argv[0]` with the remaining elements as arguments.
    ///
    /// Interactive sessions bridge to this process's own stdin, stdout and
    /// stderr.
    pub fn spawn<I, S>(&self, argv: I) -> Result<Session>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let console = if self.config.interactive {
            Console::inherit()
        } else {
            Console::detached()
        };
        self.spawn_with_console(argv, console)
    }

    /// Like [`spawn`](Self::spawn), but an interactive session uses `console`
    /// instead of this process's terminal.
    pub fn spawn_with_console<I, S>(&self, argv: I, console: Console) -> Result<Session>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let argv: Vec<OsString> = argv
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
        let name = program.to_string_lossy();

        let interactive = self.config.interactive;
        let modes = self.config.streams.resolve(interactive);
        let dir = match &self.config.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| Error::spawn_failed(&name, e))?,
        };

        let [stdin, stdout, stderr] =
            stdio::allocate(modes).map_err(|e| Error::spawn_failed(&name, e))?;

        // The command owns the child-side descriptors; dropping it right after
        // the spawn attempt closes them in this process either way.
        let child = {
            let mut command = Command::new(program);
            command
                .args(args)
                .current_dir(&dir)
                .stdin(Stdio::from(stdin.child))
                .stdout(Stdio::from(stdout.child))
                .stderr(Stdio::from(stderr.child));
            command.spawn().map_err(|e| Error::spawn_failed(&name, e))?
        };
        log::info!(
            "spawned {:?} as pid {} in {} ({modes:?}, interactive: {interactive})",
            argv,
            child.id(),
            dir.display()
        );

        let stdin = if interactive {
            Some(File::from(stdin.parent))
        } else {
            drop(stdin.parent);
            None
        };

        Ok(Session::new(
            child,
            stdin,
            File::from(stdout.parent),
            File::from(stderr.parent),
            console,
            interactive,
        ))
    }
}
