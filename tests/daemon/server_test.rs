/*!
 * Server Tests
 * Forked daemon loop driven over a real control socket
 */

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Pid};
use serial_test::serial;
use std::io::{BufRead, BufReader};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::{Duration, Instant};

use sandbox_io::daemon::{bind_control_socket, reap_children, serve, write_command, DaemonOutcome};
use sandbox_io::{Manifest, Session, SessionConfig, SessionReport};

const HEADER: &str = "Version = 20140509\nTimeout = 50\nMemory = 1048576, 0\n";

fn output_manifest(output: &Path, node: u32) -> String {
    format!(
        "{}Node = {}\nChannel = {}, /dev/stdout, 0, 0, 0, 10, 1024\n",
        HEADER,
        node,
        output.display()
    )
}

fn log_manifest(log: &Path, node: u32) -> String {
    format!(
        "{}Node = {}\nChannel = {}, /dev/log, 1, 10, 1024, 10, 1024\n",
        HEADER,
        node,
        log.display()
    )
}

/// Fork a daemon whose workers write "worker;" to every writable channel
fn spawn_daemon(listener: UnixListener, session: Session, config: &SessionConfig) -> Pid {
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = match serve(listener, session, config) {
                Ok(DaemonOutcome::Worker(mut worker)) => {
                    for channel in worker.manifest_mut().channels.iter_mut() {
                        if channel.is_writable() {
                            let _ = channel.put(b"worker;", 0);
                        }
                    }
                    match worker.finish(config, &mut std::io::sink()) {
                        Ok(()) => 0,
                        Err(_) => 2,
                    }
                }
                _ => 1,
            };
            unsafe { libc::_exit(code) };
        }
        ForkResult::Parent { child } => child,
    }
}

fn submit(socket: &Path, manifest: &str) -> SessionReport {
    let mut stream = UnixStream::connect(socket).unwrap();
    write_command(&mut stream, manifest).unwrap();

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line).unwrap();
    serde_json::from_str(&line).unwrap()
}

fn stop(daemon: Pid) {
    kill(daemon, Signal::SIGKILL).unwrap();
    waitpid(daemon, None).unwrap();
}

#[test]
#[serial]
fn test_daemon_serves_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("job.sock");
    let config = SessionConfig::new();

    let mut session =
        Session::new(Manifest::from_text(&output_manifest(&dir.path().join("boot"), 1)).unwrap());
    session.open(&config).unwrap();
    let listener = bind_control_socket(&socket).unwrap();
    let daemon = spawn_daemon(listener, session, &config);

    let job_out = dir.path().join("job");
    let report = submit(&socket, &output_manifest(&job_out, 4));
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.node.as_deref(), Some("4"));
    assert_eq!(std::fs::read(&job_out).unwrap(), b"worker;");

    stop(daemon);
}

#[test]
#[serial]
fn test_successive_jobs_append_to_kept_channel() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("job.sock");
    let log = dir.path().join("log");
    std::fs::write(&log, b"boot;").unwrap();
    let config = SessionConfig::new();

    let mut session = Session::new(Manifest::from_text(&log_manifest(&log, 1)).unwrap());
    session.open(&config).unwrap();
    assert_eq!(session.manifest().channels.get("/dev/log").unwrap().put_position(), 5);
    let listener = bind_control_socket(&socket).unwrap();
    let daemon = spawn_daemon(listener, session, &config);

    for node in [2, 3] {
        let report = submit(&socket, &log_manifest(&log, node));
        assert_eq!(report.exit_code, 0);
        let channel = &report.channels[0];
        assert_eq!(channel.size, 5 + 7 * (node as i64 - 1));
    }
    assert_eq!(std::fs::read(&log).unwrap(), b"boot;worker;worker;");

    stop(daemon);
}

#[test]
#[serial]
fn test_reap_children_collects_exited_workers() {
    let child = match unsafe { fork() }.unwrap() {
        ForkResult::Child => unsafe { libc::_exit(0) },
        ForkResult::Parent { child } => child,
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut reaped = 0;
    while reaped == 0 && Instant::now() < deadline {
        reaped += reap_children();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(reaped >= 1, "worker {} was never reaped", child);
}
