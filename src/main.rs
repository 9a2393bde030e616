/*!
 * sandboxd - Main Entry Point
 *
 * Loads a job manifest, opens its channels and either finishes the job
 * directly or turns into the job daemon declared by `Job`.
 */

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use sandbox_io::daemon::{self, DaemonOutcome};
use sandbox_io::{exit_codes, init_tracing, KernelError, Manifest, Session, SessionConfig};

fn main() -> ExitCode {
    let config = SessionConfig::from_env();
    init_tracing(&config);

    match run(&config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = e
                .downcast_ref::<KernelError>()
                .map_or(exit_codes::SYSTEM, KernelError::exit_code);
            error!(error = %format!("{:#}", e), code, "session failed");
            ExitCode::from(code)
        }
    }
}

fn run(config: &SessionConfig) -> Result<u8> {
    let path = config
        .manifest_path
        .clone()
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
        .context("usage: sandboxd <manifest> (or set SANDBOX_IO_MANIFEST)")?;

    let manifest = Manifest::from_file(&path)?;
    let mut session = Session::new(manifest);
    session.open(config)?;
    info!(
        manifest = %path.display(),
        channels = session.manifest().channels.len(),
        "session ready"
    );

    let mut session = match daemon::start(session, config)? {
        DaemonOutcome::NotRequested(session) | DaemonOutcome::Detached(session) => session,
        DaemonOutcome::Worker(session) => {
            info!("worker running adopted job");
            session
        }
    };

    session.finish(config, &mut std::io::stdout().lock())?;
    Ok(session.exit_code())
}
