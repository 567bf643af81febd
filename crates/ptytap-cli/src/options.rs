use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ptytap::{RunnerConfig, Stream, StreamMode, StreamModes};

/// Run a command on ptys or pipes and capture its output.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Bridge this terminal to the command (stdin and stdout always use a pty)
    #[arg(short, long)]
    pub interactive: bool,

    /// Put STREAM (stdin, stdout or stderr) on a pipe instead of a pty
    #[arg(long = "pipe", value_name = "STREAM")]
    pub pipe: Vec<Stream>,

    /// Put every stream on a pipe
    #[arg(long)]
    pub pipe_all: bool,

    /// Working directory for the command
    #[arg(short = 'C', long, value_name = "DIR")]
    pub chdir: Option<PathBuf>,

    /// Give up waiting after this many seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// JSON runner configuration; flags override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Do not print the captured output
    #[arg(short, long)]
    pub quiet: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,

    /// Program and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<OsString>,
}

impl Args {
    /// Merge the configuration file (if any) with the command-line flags.
    pub fn runner_config(&self) -> ptytap::Result<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::from_json_file(path)?,
            None => RunnerConfig::default(),
        };
        if self.pipe_all {
            config.streams = StreamModes::all(StreamMode::Pipe);
        }
        for stream in &self.pipe {
            config.streams.set(*stream, StreamMode::Pipe);
        }
        if self.interactive {
            config.interactive = true;
        }
        if let Some(dir) = &self.chdir {
            config.working_dir = Some(dir.clone());
        }
        Ok(config)
    }

    pub fn timeout(&self) -> ptytap::Result<Option<Duration>> {
        self.timeout
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| ptytap::Error::Config(format!("invalid timeout {secs}: {e}")))
            })
            .transpose()
    }
}
