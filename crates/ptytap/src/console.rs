use std::fs::File;
use std::io::{IsTerminal, Read, Write};
use std::os::fd::{AsFd, OwnedFd};

use crate::config::Stream;

/// The invoking process's own terminal, as seen by an interactive session.
///
/// `input` is watched for keystrokes to forward to the child; `output` and
/// `error` receive the child's stdout and stderr as they are captured.
pub struct Console {
    input: Option<File>,
    output: Box<dyn Write + Send>,
    error: Box<dyn Write + Send>,
}

impl Console {
    /// Bridge to this process's stdin, stdout and stderr.
    ///
    /// Stdin is only watched when it is a terminal.
    pub fn inherit() -> Self {
        let stdin = std::io::stdin();
        let input = if stdin.is_terminal() {
            match stdin.as_fd().try_clone_to_owned() {
                Ok(fd) => Some(fd),
                Err(err) => {
                    log::warn!("cannot duplicate stdin, input will not be forwarded: {err}");
                    None
                }
            }
        } else {
            None
        };
        Self::new(input, std::io::stdout(), std::io::stderr())
    }

    /// A console with caller-supplied streams.
    pub fn new(
        input: Option<OwnedFd>,
        output: impl Write + Send + 'static,
        error: impl Write + Send + 'static,
    ) -> Self {
        Self {
            input: input.map(File::from),
            output: Box::new(output),
            error: Box::new(error),
        }
    }

    /// No input and nowhere to echo; used by non-interactive sessions.
    pub fn detached() -> Self {
        Self::new(None, std::io::sink(), std::io::sink())
    }

    pub(crate) fn input(&self) -> Option<&File> {
        self.input.as_ref()
    }

    /// Read a chunk of input. `None` means the input is gone, either at EOF or
    /// because the read failed; it is not watched afterwards.
    pub(crate) fn read_input(&mut self, buf: &mut [u8]) -> Option<usize> {
        let input = self.input.as_mut()?;
        match input.read(buf) {
            Ok(0) => {
                log::debug!("console input reached EOF");
            }
            Ok(n) => return Some(n),
            Err(err) => {
                log::debug!("console input failed, treating as closed: {err}");
            }
        }
        self.input = None;
        None
    }

    pub(crate) fn echo(&mut self, stream: Stream, data: &[u8]) -> std::io::Result<()> {
        let out = match stream {
            Stream::Stderr => &mut self.error,
            Stream::Stdin | Stream::Stdout => &mut self.output,
        };
        out.write_all(data)?;
        out.flush()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}
