use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How one standard stream of the child is plumbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Pseudo-terminal; the child sees a tty and does not block-buffer.
    #[default]
    Pty,
    /// Anonymous pipe ("buffered").
    Pipe,
}

/// Names the three standard streams, for taps and per-stream settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Stdin, Stream::Stdout, Stream::Stderr];

    pub fn name(self) -> &'static str {
        match self {
            Stream::Stdin => "stdin",
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Stream {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdin" => Ok(Stream::Stdin),
            "stdout" => Ok(Stream::Stdout),
            "stderr" => Ok(Stream::Stderr),
            other => Err(Error::Config(format!(
                "unknown stream `{other}` (expected stdin, stdout or stderr)"
            ))),
        }
    }
}

/// Per-stream plumbing choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamModes {
    pub stdin: StreamMode,
    pub stdout: StreamMode,
    pub stderr: StreamMode,
}

impl StreamModes {
    /// The same mode for all three streams.
    pub fn all(mode: StreamMode) -> Self {
        Self {
            stdin: mode,
            stdout: mode,
            stderr: mode,
        }
    }

    /// `true` buffers every stream through a pipe, `false` puts every stream on a pty.
    pub fn from_buffered(buffered: bool) -> Self {
        if buffered {
            Self::all(StreamMode::Pipe)
        } else {
            Self::all(StreamMode::Pty)
        }
    }

    pub fn get(&self, stream: Stream) -> StreamMode {
        match stream {
            Stream::Stdin => self.stdin,
            Stream::Stdout => self.stdout,
            Stream::Stderr => self.stderr,
        }
    }

    pub fn set(&mut self, stream: Stream, mode: StreamMode) {
        match stream {
            Stream::Stdin => self.stdin = mode,
            Stream::Stdout => self.stdout = mode,
            Stream::Stderr => self.stderr = mode,
        }
    }

    /// Streams that use a pipe.
    pub fn buffered(&self) -> Vec<Stream> {
        Stream::ALL
            .into_iter()
            .filter(|s| self.get(*s) == StreamMode::Pipe)
            .collect()
    }

    /// Modes actually used at spawn time. Interactive sessions always put the
    /// child's stdin and stdout on a pty so the user sees output unbuffered.
    pub fn resolve(&self, interactive: bool) -> Self {
        let mut resolved = *self;
        if interactive {
            resolved.stdin = StreamMode::Pty;
            resolved.stdout = StreamMode::Pty;
        }
        resolved
    }
}

/// Settings a [`Runner`](crate::Runner) applies to every process it spawns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub streams: StreamModes,
    pub interactive: bool,
    /// Working directory for children; `None` uses the current directory.
    pub working_dir: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RunnerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.working_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config("working_dir must not be empty".to_string()));
            }
        }
        Ok(())
    }
}
