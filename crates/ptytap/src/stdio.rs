use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::openpty;
use nix::sys::termios::{tcgetattr, tcsetattr, OutputFlags, SetArg};
use nix::unistd::pipe;

use crate::config::{Stream, StreamMode, StreamModes};

/// A connected pair of descriptors for one standard stream.
///
/// `parent` stays with the session, `child` is handed to the spawned process.
/// For stdin the parent writes and the child reads; for stdout and stderr the
/// child writes and the parent reads.
#[derive(Debug)]
pub(crate) struct StreamPair {
    pub parent: OwnedFd,
    pub child: OwnedFd,
}

/// Open pairs for stdin, stdout and stderr, in that order.
///
/// If any pseudo-terminal cannot be allocated, every stream falls back to a
/// pipe.
pub(crate) fn allocate(modes: StreamModes) -> nix::Result<[StreamPair; 3]> {
    match open_all(modes) {
        Err(err) if modes.buffered().len() < Stream::ALL.len() => {
            log::warn!("pseudo-terminals unavailable ({err}); using pipes for all streams");
            open_all(StreamModes::all(StreamMode::Pipe))
        }
        result => result,
    }
}

fn open_all(modes: StreamModes) -> nix::Result<[StreamPair; 3]> {
    Ok([
        open_pair(Stream::Stdin, modes.stdin)?,
        open_pair(Stream::Stdout, modes.stdout)?,
        open_pair(Stream::Stderr, modes.stderr)?,
    ])
}

pub(crate) fn open_pair(stream: Stream, mode: StreamMode) -> nix::Result<StreamPair> {
    let pair = match mode {
        StreamMode::Pty => open_pty(stream)?,
        StreamMode::Pipe => open_pipe(stream)?,
    };
    set_cloexec(&pair.parent)?;
    set_cloexec(&pair.child)?;
    log::debug!(
        "allocated {stream} {mode:?} (parent fd {}, child fd {})",
        pair.parent.as_raw_fd(),
        pair.child.as_raw_fd()
    );
    Ok(pair)
}

fn open_pty(stream: Stream) -> nix::Result<StreamPair> {
    let pty = openpty(None, None)?;
    if stream != Stream::Stdin {
        verbatim_output(&pty.slave)?;
    }
    Ok(StreamPair {
        parent: pty.master,
        child: pty.slave,
    })
}

fn open_pipe(stream: Stream) -> nix::Result<StreamPair> {
    let (read, write) = pipe()?;
    Ok(match stream {
        Stream::Stdin => StreamPair {
            parent: write,
            child: read,
        },
        Stream::Stdout | Stream::Stderr => StreamPair {
            parent: read,
            child: write,
        },
    })
}

/// Turn off output post-processing so `\n` is not rewritten to `\r\n`.
fn verbatim_output(slave: &OwnedFd) -> nix::Result<()> {
    let mut termios = tcgetattr(slave)?;
    termios.output_flags.remove(OutputFlags::OPOST);
    tcsetattr(slave, SetArg::TCSANOW, &termios)
}

// Only the dup'd copies on 0/1/2 may reach the child.
fn set_cloexec(fd: &OwnedFd) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}
