use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::config::Stream;
use crate::console::Console;
use crate::error::{Error, Result};
use crate::interrupt::{self, InterruptFlag};

/// Number of bytes read from a stream in one go.
pub const CHUNK: usize = 1024;

/// Longest `pump` waits once stdout and stderr are both closed, so callers
/// still get to re-check the process table regularly.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// After the child exits, how long to keep waiting for its streams to report
/// EOF. Pty output can lag slightly behind the exit itself.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on draining, for streams kept busy by a leftover grandchild.
const DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Callback invoked for every chunk of I/O.
///
/// Receives the stream and the fresh bytes, returns what should be captured
/// and forwarded: the same bytes, different bytes, or `None` to discard them.
/// When the console input closes it is called once with `(Stream::Stdin, None)`
/// and its return value is ignored.
pub type Tap = Arc<dyn Fn(Stream, Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync>;

/// Wrap a closure as a [`Tap`].
pub fn new_tap<F>(f: F) -> Tap
where
    F: Fn(Stream, Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitResult {
    code: Option<i32>,
    signal: Option<i32>,
    success: bool,
}

impl ExitResult {
    /// Exit code, `None` if the child was killed by a signal.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Signal that terminated the child, if any.
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn success(&self) -> bool {
        self.success
    }
}

impl From<ExitStatus> for ExitResult {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
            success: status.success(),
        }
    }
}

impl std::fmt::Display for ExitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// What one readiness wait turned up.
#[derive(Debug, Default)]
struct Ready {
    input: bool,
    stdout: bool,
    stderr: bool,
}

/// What one pump did.
#[derive(Debug, Default)]
struct Activity {
    stdout: Option<Vec<u8>>,
    active: bool,
}

/// A running (or finished) child process and everything captured from it.
///
/// Created by [`Runner::spawn`](crate::Runner::spawn). The caller drives I/O
/// with [`pump`](Self::pump) or [`wait_until_exit`](Self::wait_until_exit);
/// nothing happens in the background.
pub struct Session {
    child: Child,
    pid: u32,
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
    console: Console,
    interactive: bool,
    interrupts: InterruptFlag,
    tap: Option<Tap>,
    captured_input: Vec<u8>,
    captured_output: Vec<u8>,
    captured_error: Vec<u8>,
    exit: Option<ExitResult>,
}

impl Session {
    pub(crate) fn new(
        child: Child,
        stdin: Option<File>,
        stdout: File,
        stderr: File,
        console: Console,
        interactive: bool,
    ) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            stdin,
            stdout: Some(stdout),
            stderr: Some(stderr),
            console: if interactive { console } else { Console::detached() },
            interactive,
            interrupts: InterruptFlag::global(),
            tap: None,
            captured_input: Vec::new(),
            captured_output: Vec::new(),
            captured_error: Vec::new(),
            exit: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// The exit result, once [`wait_until_exit`](Self::wait_until_exit) has
    /// observed the child's termination.
    pub fn exit_result(&self) -> Option<ExitResult> {
        self.exit
    }

    pub fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// Everything forwarded from the console to the child so far.
    pub fn captured_input(&self) -> &[u8] {
        &self.captured_input
    }

    /// Everything the child wrote to stdout so far.
    pub fn captured_output(&self) -> &[u8] {
        &self.captured_output
    }

    /// Everything the child wrote to stderr so far.
    pub fn captured_error(&self) -> &[u8] {
        &self.captured_error
    }

    /// Whether the session still holds the child's stdin.
    pub fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// Install the tap. Registering the same tap again is a no-op; a
    /// different one is refused with [`Error::TapConflict`].
    pub fn register_tap(&mut self, tap: Tap) -> Result<()> {
        match &self.tap {
            Some(existing) if !Arc::ptr_eq(existing, &tap) => Err(Error::TapConflict),
            _ => {
                self.tap = Some(tap);
                Ok(())
            }
        }
    }

    /// Wait for I/O until `deadline` (`None` waits indefinitely) and handle
    /// whatever became ready: forward console input, capture stdout and
    /// stderr.
    ///
    /// Returns the fresh stdout chunk, or `None` if stdout had nothing this
    /// time. Each ready stream is read once; call again to keep draining.
    /// Once stdout and stderr are both closed this returns after a short idle
    /// wait even without a deadline, so the caller can check for exit.
    pub fn pump(&mut self, deadline: Option<Instant>) -> Result<Option<Vec<u8>>> {
        Ok(self.pump_streams(deadline, true)?.stdout)
    }

    /// Pump until the child exits or `deadline` passes.
    ///
    /// Returns the exit result, or `None` if the deadline passed first; the
    /// session keeps running and can be waited on again. Once the child has
    /// exited this returns immediately without touching any stream.
    pub fn wait_until_exit(&mut self, deadline: Option<Instant>) -> Result<Option<ExitResult>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }

        loop {
            self.pump_streams(deadline, true)?;

            if let Some(status) = self.child.try_wait()? {
                self.drain()?;
                let exit = ExitResult::from(status);
                log::info!("process {} finished: {exit}", self.pid);
                self.exit = Some(exit);
                return Ok(Some(exit));
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
        }
    }

    /// [`wait_until_exit`](Self::wait_until_exit) with a relative timeout.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitResult>> {
        self.wait_until_exit(Instant::now().checked_add(timeout))
    }

    /// Block until the child exits and report whether it succeeded.
    pub fn wait_and_check_success(&mut self) -> Result<bool> {
        Ok(self
            .wait_until_exit(None)?
            .is_some_and(|exit| exit.success()))
    }

    fn pump_streams(&mut self, deadline: Option<Instant>, watch_input: bool) -> Result<Activity> {
        if self.exit.is_some() {
            return Ok(Activity::default());
        }
        if !self.interactive {
            return self.handle_ready(deadline, watch_input);
        }

        let _catching = interrupt::catch();
        if self.interrupts.take() {
            return Err(self.interrupted());
        }
        let activity = self.handle_ready(deadline, watch_input)?;
        if self.interrupts.take() {
            return Err(self.interrupted());
        }
        Ok(activity)
    }

    fn handle_ready(&mut self, deadline: Option<Instant>, watch_input: bool) -> Result<Activity> {
        let Some(ready) = self.wait_ready(deadline, watch_input)? else {
            return Ok(Activity::default());
        };

        let mut activity = Activity::default();
        if ready.input {
            self.forward_input()?;
            activity.active = true;
        }
        if ready.stdout {
            activity.stdout = self.capture(Stream::Stdout)?;
            activity.active = true;
        }
        if ready.stderr {
            self.capture(Stream::Stderr)?;
            activity.active = true;
        }
        Ok(activity)
    }

    /// Poll the watched descriptors. `None` means the wait was cut short by a
    /// signal.
    fn wait_ready(&self, deadline: Option<Instant>, watch_input: bool) -> Result<Option<Ready>> {
        // With no output left to watch, exit can only be noticed by coming back.
        let deadline = if self.stdout.is_none() && self.stderr.is_none() {
            let idle = Instant::now() + IDLE_WAIT;
            Some(deadline.map_or(idle, |d| d.min(idle)))
        } else {
            deadline
        };

        let watched = [
            if watch_input { self.console.input() } else { None },
            self.stdout.as_ref(),
            self.stderr.as_ref(),
        ];

        let mut slots = Vec::with_capacity(watched.len());
        let mut fds = Vec::with_capacity(watched.len());
        for (slot, file) in watched.iter().enumerate() {
            if let Some(file) = file {
                slots.push(slot);
                fds.push(PollFd::new(file.as_fd(), PollFlags::POLLIN));
            }
        }

        if fds.is_empty() {
            if let Some(d) = deadline {
                std::thread::sleep(d.saturating_duration_since(Instant::now()));
            }
            return Ok(Some(Ready::default()));
        }

        match poll(&mut fds, poll_timeout(deadline)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(None),
            Err(err) => return Err(Error::Poll(err)),
        }

        let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
        let mut flags = [false; 3];
        for (fd, slot) in fds.iter().zip(slots) {
            flags[slot] = fd.revents().is_some_and(|r| r.intersects(wake));
        }
        Ok(Some(Ready {
            input: flags[0],
            stdout: flags[1],
            stderr: flags[2],
        }))
    }

    fn forward_input(&mut self) -> Result<()> {
        let mut buf = [0u8; CHUNK];
        let Some(n) = self.console.read_input(&mut buf) else {
            self.close_stdin();
            if let Some(tap) = &self.tap {
                tap(Stream::Stdin, None);
            }
            return Ok(());
        };

        let Some(data) = self.tapped(Stream::Stdin, &buf[..n]) else {
            return Ok(());
        };
        self.captured_input.extend_from_slice(&data);
        if let Some(stdin) = self.stdin.as_mut() {
            if let Err(err) = stdin.write_all(&data).and_then(|()| stdin.flush()) {
                if err.kind() != ErrorKind::BrokenPipe {
                    return Err(err.into());
                }
                log::debug!("process {} stopped reading stdin", self.pid);
                self.close_stdin();
            }
        }
        Ok(())
    }

    /// Read one chunk from the child's stdout or stderr. A failed or empty
    /// read closes that stream.
    fn capture(&mut self, stream: Stream) -> Result<Option<Vec<u8>>> {
        let handle = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
            Stream::Stdin => return Ok(None),
        };
        let Some(file) = handle.as_mut() else {
            return Ok(None);
        };

        let mut buf = [0u8; CHUNK];
        let n = match file.read(&mut buf) {
            Ok(0) => {
                log::debug!("process {} closed {stream}", self.pid);
                *handle = None;
                return Ok(None);
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(None),
            Err(err) => {
                // A pty master reports EIO once the child side is gone.
                log::debug!("reading {stream} of process {} failed, closing: {err}", self.pid);
                *handle = None;
                return Ok(None);
            }
        };

        let Some(data) = self.tapped(stream, &buf[..n]) else {
            return Ok(None);
        };
        match stream {
            Stream::Stderr => self.captured_error.extend_from_slice(&data),
            _ => self.captured_output.extend_from_slice(&data),
        }
        if self.interactive {
            self.console.echo(stream, &data)?;
        }
        Ok(Some(data))
    }

    fn tapped(&self, stream: Stream, data: &[u8]) -> Option<Vec<u8>> {
        match &self.tap {
            Some(tap) => tap(stream, Some(data)),
            None => Some(data.to_vec()),
        }
    }

    /// Collect output still in flight once the child is known to have
    /// exited, stopping at EOF on both streams, after a quiet grace period,
    /// or at the latest after [`DRAIN_LIMIT`].
    fn drain(&mut self) -> Result<()> {
        let started = Instant::now();
        let grace = started + DRAIN_GRACE;
        while self.stdout.is_some() || self.stderr.is_some() {
            if !self.pump_streams(Some(grace), false)?.active {
                break;
            }
            if started.elapsed() >= DRAIN_LIMIT {
                log::debug!("process {} exited but its output keeps coming; stop draining", self.pid);
                break;
            }
        }
        Ok(())
    }

    fn close_stdin(&mut self) {
        if self.stdin.take().is_some() {
            log::debug!("closed stdin of process {}", self.pid);
        }
    }

    fn interrupted(&self) -> Error {
        if self.interactive {
            log::info!("forwarding interrupt to process {}", self.pid);
            if let Err(err) = kill(Pid::from_raw(self.pid as i32), Signal::SIGINT) {
                log::warn!("cannot forward interrupt to process {}: {err}", self.pid);
            }
        }
        Error::Interrupted
    }

    #[cfg(test)]
    pub(crate) fn set_interrupt_flag(&mut self, flag: InterruptFlag) {
        self.interrupts = flag;
    }
}

fn poll_timeout(deadline: Option<Instant>) -> PollTimeout {
    let Some(deadline) = deadline else {
        return PollTimeout::NONE;
    };
    // Round up so a sub-millisecond remainder does not turn into a busy loop.
    let remaining = deadline.saturating_duration_since(Instant::now());
    let millis = remaining.as_micros().div_ceil(1000);
    let millis = u64::try_from(millis).unwrap_or(u64::MAX);
    PollTimeout::try_from(Duration::from_millis(millis)).unwrap_or(PollTimeout::MAX)
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit {
            Some(exit) => write!(f, "Session(pid={}, status={exit})", self.pid),
            None => write!(f, "Session(pid={}, status=running)", self.pid),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("interactive", &self.interactive)
            .field("has_stdin", &self.stdin.is_some())
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamMode;
    use crate::runner::Runner;
    use nix::sys::pthread::{pthread_kill, pthread_self};
    use nix::unistd::pipe;
    use std::sync::{mpsc, Mutex};

    fn buffered() -> Runner {
        Runner::new().buffered(true)
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_success_and_failure() {
        assert!(buffered().spawn(["true"]).unwrap().wait_and_check_success().unwrap());
        assert!(!buffered().spawn(["false"]).unwrap().wait_and_check_success().unwrap());
    }

    #[test]
    fn test_captures_stdout() {
        let mut session = buffered().spawn(["sh", "-c", "printf 'hi\\n'"]).unwrap();
        let exit = session.wait_until_exit(None).unwrap().unwrap();
        assert!(exit.success());
        assert_eq!(exit.code(), Some(0));
        assert_eq!(session.captured_output(), b"hi\n");
        assert!(session.captured_error().is_empty());
    }

    #[test]
    fn test_captures_stderr_separately() {
        let mut session = buffered()
            .spawn(["sh", "-c", "echo out; echo err >&2; exit 3"])
            .unwrap();
        let exit = session.wait_until_exit(None).unwrap().unwrap();
        assert_eq!(exit.code(), Some(3));
        assert!(!exit.success());
        assert_eq!(session.captured_output(), b"out\n");
        assert_eq!(session.captured_error(), b"err\n");
    }

    #[test]
    fn test_large_output_is_complete_and_ordered() {
        // Many more bytes than one chunk, forcing repeated pumps.
        let mut session = buffered()
            .spawn(["sh", "-c", "i=0; while [ $i -lt 500 ]; do echo line$i; i=$((i+1)); done"])
            .unwrap();
        session.wait_until_exit(None).unwrap();

        let expected: String = (0..500).map(|i| format!("line{i}\n")).collect();
        assert_eq!(session.captured_output(), expected.as_bytes());
    }

    #[test]
    fn test_pty_stdout_is_captured_verbatim() {
        let mut session = Runner::new().spawn(["sh", "-c", "printf 'hi\\n'"]).unwrap();
        assert!(session.wait_and_check_success().unwrap());
        assert_eq!(session.captured_output(), b"hi\n");
    }

    #[test]
    fn test_wait_is_idempotent() {
        let mut session = buffered().spawn(["echo", "once"]).unwrap();
        let first = session.wait_until_exit(None).unwrap();
        let output = session.captured_output().to_vec();

        let second = session.wait_until_exit(Some(Instant::now())).unwrap();
        assert_eq!(first, second);
        assert_eq!(session.captured_output(), &output[..]);
        assert!(session.has_exited());
        assert_eq!(session.pump(None).unwrap(), None);
    }

    #[test]
    fn test_deadline_leaves_session_running() {
        let mut session = buffered().spawn(["sh", "-c", "sleep 1; echo late"]).unwrap();

        let started = Instant::now();
        let result = session.wait_timeout(Duration::from_millis(100)).unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(!session.has_exited());
        assert!(session.exit_result().is_none());

        let exit = session.wait_timeout(Duration::from_secs(10)).unwrap().unwrap();
        assert!(exit.success());
        assert_eq!(session.captured_output(), b"late\n");
    }

    #[test]
    fn test_pump_returns_early_at_deadline() {
        let mut session = buffered().spawn(["sh", "-c", "sleep 1; echo hi"]).unwrap();

        let started = Instant::now();
        let fresh = session
            .pump(Some(Instant::now() + Duration::from_millis(100)))
            .unwrap();
        let elapsed = started.elapsed();
        assert!(fresh.is_none());
        assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(900), "returned after {elapsed:?}");

        session.wait_until_exit(None).unwrap();
    }

    #[test]
    fn test_pump_without_deadline_waits_for_output() {
        let mut session = buffered().spawn(["sh", "-c", "sleep 0.3; echo hi"]).unwrap();
        let started = Instant::now();
        let fresh = session.pump(None).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(fresh.as_deref(), Some(&b"hi\n"[..]));
        session.wait_until_exit(None).unwrap();
    }

    #[test]
    fn test_past_deadline_does_not_block() {
        let mut session = buffered().spawn(["sleep", "1"]).unwrap();
        let started = Instant::now();
        assert!(session.pump(Some(Instant::now())).unwrap().is_none());
        assert!(session.wait_until_exit(Some(Instant::now())).unwrap().is_none());
        assert!(started.elapsed() < Duration::from_millis(500));
        session.wait_until_exit(None).unwrap();
    }

    #[test]
    fn test_tap_can_discard_output() {
        let mut session = buffered()
            .spawn(["echo", "the quick red fox jumped over the lazy brown dog"])
            .unwrap();
        session.register_tap(new_tap(|_, _| None)).unwrap();
        session.wait_until_exit(None).unwrap();
        assert!(session.captured_output().is_empty());
    }

    #[test]
    fn test_tap_can_transform_output() {
        let mut session = buffered()
            .spawn(["echo", "the quick red fox jumped over the lazy brown dog"])
            .unwrap();
        session
            .register_tap(new_tap(|_, data| {
                data.map(|d| d.iter().rev().copied().collect())
            }))
            .unwrap();
        session.wait_until_exit(None).unwrap();

        let captured = String::from_utf8_lossy(session.captured_output()).to_string();
        assert_eq!(captured.trim(), "god nworb yzal eht revo depmuj xof der kciuq eht");
    }

    #[test]
    fn test_tap_sees_each_stream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let mut session = buffered()
            .spawn(["sh", "-c", "echo out; echo err >&2"])
            .unwrap();
        session
            .register_tap(new_tap(move |stream, data| {
                log.lock().unwrap().push(stream);
                data.map(<[u8]>::to_vec)
            }))
            .unwrap();
        session.wait_until_exit(None).unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&Stream::Stdout));
        assert!(seen.contains(&Stream::Stderr));
        assert!(!seen.contains(&Stream::Stdin));
    }

    #[test]
    fn test_tap_allows_only_one_callback() {
        let mut session = buffered().spawn(["true"]).unwrap();
        let reverse = new_tap(|_, data| data.map(|d| d.iter().rev().copied().collect()));

        session.register_tap(Arc::clone(&reverse)).unwrap();
        session.register_tap(Arc::clone(&reverse)).unwrap();

        let doubled = new_tap(|_, data| data.map(|d| d.repeat(2)));
        assert!(matches!(session.register_tap(doubled), Err(Error::TapConflict)));

        session.wait_until_exit(None).unwrap();
    }

    #[test]
    fn test_non_interactive_has_no_stdin() {
        let mut session = buffered().spawn(["cat"]).unwrap();
        assert!(!session.has_stdin());
        // cat sees EOF immediately because the parent side was closed.
        assert!(session.wait_and_check_success().unwrap());
        assert!(session.captured_input().is_empty());
    }

    #[test]
    fn test_interactive_forwards_console_input() {
        let _serial = interrupt::exclusive();
        let (read, write) = pipe().unwrap();
        let mut typed = File::from(write);
        typed.write_all(b"ping\n").unwrap();

        let out = Shared::default();
        let console = Console::new(Some(read), out.clone(), std::io::sink());
        let mut session = Runner::new()
            .interactive(true)
            .stream_mode(Stream::Stderr, StreamMode::Pipe)
            .spawn_with_console(["sh", "-c", "read line; echo got-$line"], console)
            .unwrap();

        session.wait_timeout(Duration::from_secs(10)).unwrap().unwrap();
        assert_eq!(session.captured_input(), b"ping\n");
        let output = String::from_utf8_lossy(session.captured_output()).to_string();
        assert!(output.contains("got-ping"), "output was {output:?}");
        assert_eq!(&*out.0.lock().unwrap(), session.captured_output());
        drop(typed);
    }

    #[test]
    fn test_console_input_error_closes_child_stdin_once() {
        let _serial = interrupt::exclusive();
        // With its read end gone, a pipe's write end polls as POLLERR and
        // reading from it fails.
        let (read, write) = pipe().unwrap();
        drop(read);
        let console = Console::new(Some(write), std::io::sink(), std::io::sink());
        let closes = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&closes);

        let mut session = Runner::new()
            .interactive(true)
            .spawn_with_console(["sleep", "1"], console)
            .unwrap();
        session
            .register_tap(new_tap(move |stream, data| {
                if stream == Stream::Stdin && data.is_none() {
                    *counter.lock().unwrap() += 1;
                }
                data.map(<[u8]>::to_vec)
            }))
            .unwrap();
        assert!(session.has_stdin());

        let soon = || Some(Instant::now() + Duration::from_millis(50));
        session.pump(soon()).unwrap();
        assert!(!session.has_stdin());
        session.pump(soon()).unwrap();
        session.pump(soon()).unwrap();

        assert_eq!(*closes.lock().unwrap(), 1);
        session.wait_until_exit(None).unwrap();
    }

    #[test]
    fn test_interrupt_is_forwarded_and_reported() {
        let _serial = interrupt::exclusive();
        let mut session = Runner::new()
            .interactive(true)
            .spawn_with_console(["sleep", "5"], Console::detached())
            .unwrap();
        let flag = InterruptFlag::isolated();
        session.set_interrupt_flag(flag);

        flag.raise();
        assert!(matches!(session.pump(None), Err(Error::Interrupted)));

        let exit = session.wait_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(exit.signal(), Some(nix::libc::SIGINT));
        assert!(!exit.success());
    }

    #[test]
    fn test_sigint_during_pump_is_forwarded_and_reported() {
        let _serial = interrupt::exclusive();
        // Keep SIGINT caught for the whole test so an early signal cannot
        // hit the default disposition.
        let _catching = interrupt::catch();
        let mut session = Runner::new()
            .interactive(true)
            .spawn_with_console(["sleep", "5"], Console::detached())
            .unwrap();

        let target = pthread_self();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            pthread_kill(target, Signal::SIGINT).unwrap();
        });
        assert!(matches!(session.pump(None), Err(Error::Interrupted)));
        sender.join().unwrap();

        let exit = session.wait_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(exit.signal(), Some(nix::libc::SIGINT));
    }

    #[test]
    fn test_interactive_session_restores_sigint_disposition() {
        let _serial = interrupt::exclusive();
        let before = interrupt::sigint_handler();

        let mut session = Runner::new()
            .interactive(true)
            .spawn_with_console(["true"], Console::detached())
            .unwrap();
        assert!(session.wait_and_check_success().unwrap());
        assert_eq!(interrupt::sigint_handler(), before);
    }

    #[test]
    fn test_non_interactive_session_ignores_interrupts() {
        let mut session = buffered().spawn(["sh", "-c", "sleep 0.1; echo done"]).unwrap();
        let flag = InterruptFlag::isolated();
        session.set_interrupt_flag(flag);
        flag.raise();

        assert!(session.wait_and_check_success().unwrap());
        assert_eq!(session.captured_output(), b"done\n");
        assert!(flag.take());
    }

    #[test]
    fn test_interactive_wait_notices_exit_after_output_closes() {
        let _serial = interrupt::exclusive();
        // The console input stays open and silent for the whole test.
        let (read, write) = pipe().unwrap();
        let console = Console::new(Some(read), std::io::sink(), std::io::sink());
        let mut session = Runner::new()
            .interactive(true)
            .spawn_with_console(["sh", "-c", "exec >&- 2>&-; sleep 0.3"], console)
            .unwrap();

        let (done, finished) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            done.send(session.wait_until_exit(None).map(|exit| exit.map(|e| e.code())))
                .unwrap();
        });
        let result = finished.recv_timeout(Duration::from_secs(10));
        assert!(matches!(result, Ok(Ok(Some(Some(0))))), "wait returned {result:?}");
        waiter.join().unwrap();
        drop(write);
    }

    #[test]
    fn test_drain_gives_up_on_endless_grandchild_output() {
        // The background loop outlives sh and keeps stdout busy until the
        // session drops its end of the pipe.
        let mut session = buffered()
            .spawn(["sh", "-c", "(while :; do echo spam; done) & exit 0"])
            .unwrap();

        let (done, finished) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            let exit = session.wait_until_exit(None).map(|exit| exit.map(|e| e.code()));
            done.send(exit).unwrap();
        });
        let result = finished.recv_timeout(Duration::from_secs(10));
        assert!(matches!(result, Ok(Ok(Some(Some(0))))), "wait returned {result:?}");
        waiter.join().unwrap();
    }

    #[test]
    fn test_display() {
        let mut session = buffered().spawn(["true"]).unwrap();
        let pid = session.pid();
        assert_eq!(session.to_string(), format!("Session(pid={pid}, status=running)"));
        session.wait_until_exit(None).unwrap();
        assert_eq!(session.to_string(), format!("Session(pid={pid}, status=exit 0)"));
    }
}
