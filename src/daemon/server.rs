/*!
 * Daemon Server
 * Detach, accept job connections and fork one worker per job
 */

use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, setsid, ForkResult, Pid};
use std::fs::OpenOptions;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixListener;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::session::Session;
use crate::core::{exit_codes, KernelError, KernelResult, SessionConfig};
use crate::monitoring::{generate_job_id, job_span};
use crate::signals::ignore_hangup;

/// Where control returns after [`start`]
pub enum DaemonOutcome {
    /// No `Job` declared; the session runs as a plain job
    NotRequested(Session),
    /// Parent of the daemon; the user's session is over
    Detached(Session),
    /// Worker process that adopted a new job
    Worker(Session),
}

/// Turn the current session into a daemon if its manifest asks for one
///
/// Only a worker ever returns from the daemon side; the daemon itself
/// stays in the accept loop for the rest of its life.
pub fn start(session: Session, config: &SessionConfig) -> KernelResult<DaemonOutcome> {
    let Some(socket_path) = session.manifest().job.clone() else {
        return Ok(DaemonOutcome::NotRequested(session));
    };
    if session.exit_code() != exit_codes::OK {
        return Err(KernelError::protocol("broken session cannot become a daemon"));
    }

    // SAFETY: the session is single-threaded at this point
    match unsafe { fork() }.map_err(|e| KernelError::errno("fork daemon", e))? {
        ForkResult::Parent { child } => {
            info!(pid = %child, socket = %socket_path.display(), "daemon started");
            return Ok(DaemonOutcome::Detached(session));
        }
        ForkResult::Child => {}
    }

    let listener = bind_control_socket(&socket_path)?;
    daemonize(config)?;
    serve(listener, session, config)
}

/// Accept loop; returns only inside a forked worker
///
/// Channels are settled first so every worker starts from host resources
/// that hold exactly the data written so far.
pub fn serve(
    listener: UnixListener,
    mut session: Session,
    config: &SessionConfig,
) -> KernelResult<DaemonOutcome> {
    session.manifest_mut().channels.settle_all(config)?;
    info!(pid = std::process::id(), "daemon accepting jobs");
    loop {
        let (stream, _) = match listener.accept() {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        reap_children();

        // SAFETY: the daemon never starts threads
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(listener);
                let job_id = generate_job_id();
                let span = job_span(&job_id);
                let _entered = span.enter();
                session.handoff(stream, config)?;
                return Ok(DaemonOutcome::Worker(session));
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = %child, "worker forked");
            }
            Err(e) => {
                error!(error = %e, "cannot fork worker");
            }
        }
    }
}

/// Collect every finished worker without blocking
pub fn reap_children() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => {
                debug!(?status, "worker reaped");
                reaped += 1;
            }
        }
    }
    reaped
}

/// Bind the job socket, replacing a stale one left by an earlier daemon
pub fn bind_control_socket(path: &Path) -> KernelResult<UnixListener> {
    if let Ok(md) = std::fs::symlink_metadata(path) {
        if md.file_type().is_socket() {
            std::fs::remove_file(path)
                .map_err(|e| KernelError::io(format!("remove stale socket {}", path.display()), e))?;
        }
    }
    UnixListener::bind(path)
        .map_err(|e| KernelError::io(format!("bind job socket {}", path.display()), e))
}

/// Detach from the controlling terminal
///
/// Open channel handles are kept; only stdio is pointed at the null device.
pub fn daemonize(config: &SessionConfig) -> KernelResult<()> {
    umask(Mode::empty());
    setsid().map_err(|e| KernelError::errno("setsid", e))?;
    ignore_hangup()?;
    std::env::set_current_dir("/").map_err(|e| KernelError::io("chdir /", e))?;

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.null_device)
        .map_err(|e| KernelError::io(format!("open {}", config.null_device.display()), e))?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are open; dup2 replaces the target atomically
        if unsafe { libc::dup2(null.as_raw_fd(), target) } < 0 {
            return Err(KernelError::io(
                format!("redirect fd {}", target),
                std::io::Error::last_os_error(),
            ));
        }
    }
    Ok(())
}
