use thiserror::Error;

/// Errors from spawning and driving a child process.
#[derive(Error, Debug)]
pub enum Error {
    /// Stream allocation or process launch failed; no session was created.
    #[error("failed to start process `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("readiness wait failed: {0}")]
    Poll(#[source] nix::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The user interrupted a pump; the child has already been signaled when
    /// the session is interactive.
    #[error("interrupted")]
    Interrupted,

    #[error("tap is already set; cannot set a different one")]
    TapConflict,

    #[error("cannot run an empty command")]
    EmptyCommand,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn spawn_failed(program: &str, source: impl Into<std::io::Error>) -> Self {
        Error::SpawnFailed {
            program: program.to_string(),
            source: source.into(),
        }
    }

    /// True for errors raised before a session existed.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Error::SpawnFailed { .. } | Error::EmptyCommand)
    }
}
