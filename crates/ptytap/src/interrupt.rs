//! SIGINT bookkeeping for interactive sessions.
//!
//! While an interactive session waits for I/O it catches SIGINT with a handler
//! that only records the interrupt. The handler is installed without
//! `SA_RESTART`, so a blocked `poll` wakes up with `EINTR` and the session can
//! forward the signal to its child before reporting
//! [`Error::Interrupted`](crate::Error::Interrupted). When the last catcher
//! goes away the previous disposition comes back, and an interrupt nobody
//! consumed is raised again under it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::libc::c_int;
use nix::sys::signal::{raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static PENDING: AtomicBool = AtomicBool::new(false);

static CATCHING: Mutex<Catching> = Mutex::new(Catching {
    depth: 0,
    previous: None,
});

struct Catching {
    depth: usize,
    previous: Option<SigAction>,
}

extern "C" fn record_interrupt(_: c_int) {
    PENDING.store(true, Ordering::SeqCst);
}

fn catching() -> MutexGuard<'static, Catching> {
    CATCHING.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Catch SIGINT until the returned guard is dropped. Nested and concurrent
/// guards share one installation.
pub(crate) fn catch() -> InterruptGuard {
    let mut state = catching();
    if state.depth == 0 {
        let action = SigAction::new(
            SigHandler::Handler(record_interrupt),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler only touches an atomic, which is async-signal-safe.
        match unsafe { sigaction(Signal::SIGINT, &action) } {
            Ok(previous) => {
                log::trace!("catching SIGINT");
                state.previous = Some(previous);
            }
            Err(err) => log::warn!("cannot install SIGINT handler: {err}"),
        }
    }
    state.depth += 1;
    InterruptGuard { _private: () }
}

/// Keeps SIGINT caught; see [`catch`].
pub(crate) struct InterruptGuard {
    _private: (),
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let mut state = catching();
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        let Some(previous) = state.previous.take() else {
            return;
        };
        // SAFETY: reinstates the disposition that was in place before `catch`.
        if let Err(err) = unsafe { sigaction(Signal::SIGINT, &previous) } {
            log::warn!("cannot restore SIGINT disposition: {err}");
        }
        let unclaimed = PENDING.swap(false, Ordering::SeqCst);
        drop(state);

        if unclaimed {
            log::debug!("re-raising unclaimed SIGINT");
            if let Err(err) = raise(Signal::SIGINT) {
                log::warn!("cannot re-raise SIGINT: {err}");
            }
        }
    }
}

/// Where a session looks for pending interrupts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InterruptFlag(&'static AtomicBool);

impl InterruptFlag {
    /// The flag written by the SIGINT handler.
    pub(crate) fn global() -> Self {
        Self(&PENDING)
    }

    /// Consume a pending interrupt, if any.
    pub(crate) fn take(self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn isolated() -> Self {
        Self(Box::leak(Box::new(AtomicBool::new(false))))
    }

    #[cfg(test)]
    pub(crate) fn raise(self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Serializes tests that depend on the process-wide SIGINT state.
#[cfg(test)]
pub(crate) fn exclusive() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The currently installed SIGINT handler.
#[cfg(test)]
pub(crate) fn sigint_handler() -> nix::libc::sighandler_t {
    // SAFETY: a null new action only queries the current one.
    unsafe {
        let mut current: nix::libc::sigaction = std::mem::zeroed();
        assert_eq!(
            nix::libc::sigaction(nix::libc::SIGINT, std::ptr::null(), &mut current),
            0
        );
        current.sa_sigaction
    }
}
