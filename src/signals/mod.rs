/*!
 * Signals Module
 * Async-safe session signal handlers that can be torn down and re-armed
 *
 * A session-ending signal terminates the process with the signal number as
 * its exit code. SIGPIPE is only recorded so that the failed write surfaces
 * as an ordinary I/O error on the channel.
 */

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

use crate::core::{KernelError, KernelResult};

/// Last signal seen by the handler (0 if none)
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signals that end or disturb a session
pub const SESSION_SIGNALS: &[Signal] = &[
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGTRAP,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGPIPE,
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    #[cfg(target_os = "linux")]
    Signal::SIGSTKFLT,
    #[cfg(target_os = "linux")]
    Signal::SIGPWR,
];

/// Installed session handlers and the actions they replaced
#[derive(Default)]
pub struct SignalHandler {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        !self.previous.is_empty()
    }

    /// Install handlers for all session signals
    pub fn init(&mut self) -> KernelResult<()> {
        if self.is_armed() {
            return Ok(());
        }
        let action = SigAction::new(
            SigHandler::Handler(session_signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for &sig in SESSION_SIGNALS {
            // SAFETY: the handler only touches an atomic and calls _exit
            let old = unsafe { signal::sigaction(sig, &action) }.map_err(|e| {
                KernelError::Signal(format!("cannot install {} handler: {}", sig, e))
            })?;
            self.previous.push((sig, old));
        }
        debug!(signals = SESSION_SIGNALS.len(), "signal handlers installed");
        Ok(())
    }

    /// Restore the actions that were in place before `init`
    pub fn fini(&mut self) -> KernelResult<()> {
        while let Some((sig, old)) = self.previous.pop() {
            // SAFETY: restores an action previously returned by sigaction
            unsafe { signal::sigaction(sig, &old) }.map_err(|e| {
                KernelError::Signal(format!("cannot restore {} handler: {}", sig, e))
            })?;
        }
        Ok(())
    }

    /// Tear down and reinstall, as a daemon worker does after fork
    pub fn rearm(&mut self) -> KernelResult<()> {
        self.fini()?;
        LAST_SIGNAL.store(0, Ordering::SeqCst);
        self.init()
    }

    /// Last signal recorded by the handler
    pub fn last_signal() -> Option<Signal> {
        match LAST_SIGNAL.load(Ordering::SeqCst) {
            0 => None,
            n => Signal::try_from(n).ok(),
        }
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

/// Ignore SIGHUP, as a detached daemon must
pub fn ignore_hangup() -> KernelResult<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN installs no code
    unsafe { signal::sigaction(Signal::SIGHUP, &ignore) }
        .map(drop)
        .map_err(|e| KernelError::Signal(format!("cannot ignore SIGHUP: {}", e)))
}

/// Async-safe: only an atomic store and _exit
extern "C" fn session_signal_handler(signo: libc::c_int) {
    LAST_SIGNAL.store(signo, Ordering::SeqCst);
    if signo != libc::SIGPIPE {
        // SAFETY: _exit is async-signal-safe
        unsafe { libc::_exit(signo) };
    }
}
