/*!
 * Handoff Tests
 * Reconciling a running session with an incoming job manifest
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use sandbox_io::channels::{LimitKind, Protocol};
use sandbox_io::daemon::{reconcile, write_command};
use sandbox_io::{KernelError, Manifest, Quota, Session, SessionConfig, SessionReport};

fn manifest_text(input: &Path, output: &Path, node: u32) -> String {
    format!(
        "Version = 20140509\n\
         Timeout = 50\n\
         Memory = 1048576, 0\n\
         Node = {}\n\
         Channel = {}, /dev/stdin, 0, 10, 1024, 0, 0\n\
         Channel = {}, /dev/stdout, 0, 0, 0, 10, 1024\n",
        node,
        input.display(),
        output.display()
    )
}

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input"), b"job input").unwrap();
    dir
}

#[test]
fn test_reconcile_keeps_unchanged_handles() {
    let dir = workspace();
    let config = SessionConfig::new();
    let input = dir.path().join("input");

    let mut current = Manifest::from_text(&manifest_text(&input, &dir.path().join("a"), 1)).unwrap();
    current.channels.open_all(&config).unwrap();
    let stdin_before = Arc::clone(current.channels.get("/dev/stdin").unwrap().handle().unwrap());
    let stdout_before = Arc::clone(current.channels.get("/dev/stdout").unwrap().handle().unwrap());

    let incoming = Manifest::from_text(&manifest_text(&input, &dir.path().join("b"), 2)).unwrap();
    reconcile(&mut current, incoming).unwrap();
    current.channels.reconstruct(&config).unwrap();

    let stdin = current.channels.get("/dev/stdin").unwrap();
    assert!(Arc::ptr_eq(&stdin_before, stdin.handle().unwrap()));

    let stdout = current.channels.get("/dev/stdout").unwrap();
    assert_eq!(stdout.name(), dir.path().join("b").to_str().unwrap());
    assert!(!Arc::ptr_eq(&stdout_before, stdout.handle().unwrap()));
    assert!(dir.path().join("b").exists());
    assert_eq!(current.node.as_deref(), Some("2"));

    current.channels.close_all(&config).unwrap();
}

#[test]
fn test_limit_mismatch_changes_nothing() {
    let dir = workspace();
    let input = dir.path().join("input");
    let output = dir.path().join("a");

    let mut current = Manifest::from_text(&manifest_text(&input, &output, 1)).unwrap();
    let widened = manifest_text(&dir.path().join("other"), &output, 2)
        .replace("0, 0, 0, 10, 1024", "0, 0, 0, 10, 2048");
    let incoming = Manifest::from_text(&widened).unwrap();

    let err = reconcile(&mut current, incoming).unwrap_err();
    assert!(matches!(err, KernelError::Protocol(_)));
    assert_eq!(
        current.channels.get("/dev/stdin").unwrap().name(),
        input.to_str().unwrap()
    );
    assert_eq!(current.node.as_deref(), Some("1"));
}

#[test]
fn test_alias_mismatch_is_rejected() {
    let dir = workspace();
    let input = dir.path().join("input");
    let output = dir.path().join("a");

    let mut current = Manifest::from_text(&manifest_text(&input, &output, 1)).unwrap();
    let renamed = manifest_text(&input, &output, 1).replace("/dev/stdout", "/dev/log");
    let incoming = Manifest::from_text(&renamed).unwrap();

    assert!(matches!(
        reconcile(&mut current, incoming),
        Err(KernelError::Protocol(_))
    ));
}

#[test]
fn test_access_type_mismatch_is_rejected() {
    let dir = workspace();
    let input = dir.path().join("input");
    let output = dir.path().join("a");

    let mut current = Manifest::from_text(&manifest_text(&input, &output, 1)).unwrap();
    let random = manifest_text(&dir.path().join("other"), &output, 2)
        .replace("/dev/stdin, 0, 10", "/dev/stdin, 1, 10");
    let incoming = Manifest::from_text(&random).unwrap();

    let err = reconcile(&mut current, incoming).unwrap_err();
    assert!(err.to_string().contains("access type"));
    assert_eq!(
        current.channels.get("/dev/stdin").unwrap().name(),
        input.to_str().unwrap()
    );
}

#[test]
fn test_opaque_retarget_is_never_opened() {
    let dir = workspace();
    let config = SessionConfig::new();
    let input = dir.path().join("input");

    let mut current = Manifest::from_text(&manifest_text(&input, &dir.path().join("a"), 1)).unwrap();
    current.channels.open_all(&config).unwrap();

    let residue = "handoff_opaque_residue";
    let opaque = manifest_text(&input, &dir.path().join("a"), 2).replace(
        &format!("{}, /dev/stdout", dir.path().join("a").display()),
        &format!("opaque:{}, /dev/stdout", residue),
    );
    reconcile(&mut current, Manifest::from_text(&opaque).unwrap()).unwrap();
    assert_eq!(
        current.channels.get("/dev/stdout").unwrap().protocol(),
        Protocol::Opaque
    );

    assert!(matches!(
        current.channels.reconstruct(&config),
        Err(KernelError::ManifestSemantic(_))
    ));
    assert!(!Path::new(residue).exists());
    current.channels.close_all(&config).unwrap();
}

#[test]
#[serial]
fn test_counters_restart_after_handoff() {
    let dir = workspace();
    let config = SessionConfig::new();
    let input = dir.path().join("input");
    let output = dir.path().join("out");

    let mut session = Session::new(Manifest::from_text(&manifest_text(&input, &output, 1)).unwrap());
    session.open(&config).unwrap();

    let channels = &mut session.manifest_mut().channels;
    let mut buf = [0u8; 4];
    channels.get_mut("/dev/stdin").unwrap().get(&mut buf, 0).unwrap();
    channels.get_mut("/dev/stdin").unwrap().get(&mut buf, 0).unwrap();
    channels.get_mut("/dev/stdout").unwrap().put(b"early", 0).unwrap();
    assert_eq!(channels.get("/dev/stdin").unwrap().counters()[LimitKind::Gets], 2);
    assert_eq!(channels.get("/dev/stdout").unwrap().counters()[LimitKind::PutSize], 5);

    let (mut submitter, worker_end) = UnixStream::pair().unwrap();
    write_command(&mut submitter, &manifest_text(&input, &output, 2)).unwrap();
    session.handoff(worker_end, &config).unwrap();

    for channel in session.manifest().channels.iter() {
        assert_eq!(channel.counters(), &Quota::ZERO, "{}", channel.alias());
    }
    let stdin = session.manifest_mut().channels.get_mut("/dev/stdin").unwrap();
    assert_eq!(stdin.get(&mut buf, 0).unwrap(), 4);
    assert_eq!(&buf, b"job ");

    session.finish(&config, &mut Vec::new()).unwrap();
}

#[test]
#[serial]
fn test_handoff_reports_to_submitter() {
    let dir = workspace();
    let config = SessionConfig::new();
    let input = dir.path().join("input");
    let first_out = dir.path().join("first");
    let job_out = dir.path().join("job");

    let mut session =
        Session::new(Manifest::from_text(&manifest_text(&input, &first_out, 1)).unwrap());
    session.open(&config).unwrap();

    let (mut submitter, worker_end) = UnixStream::pair().unwrap();
    write_command(&mut submitter, &manifest_text(&input, &job_out, 9)).unwrap();
    session.handoff(worker_end, &config).unwrap();
    assert!(session.has_report_sink());

    let channels = &mut session.manifest_mut().channels;
    let mut buf = [0u8; 3];
    assert_eq!(channels.get_mut("/dev/stdin").unwrap().get(&mut buf, 0).unwrap(), 3);
    assert_eq!(&buf, b"job");
    assert_eq!(channels.get_mut("/dev/stdout").unwrap().put(b"done", 0).unwrap(), 4);

    let mut fallback = Vec::new();
    session.finish(&config, &mut fallback).unwrap();
    assert!(fallback.is_empty());

    let mut line = String::new();
    BufReader::new(&submitter).read_line(&mut line).unwrap();
    let report: SessionReport = serde_json::from_str(&line).unwrap();
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.node.as_deref(), Some("9"));

    let stdout = report.channels.iter().find(|c| c.alias == "/dev/stdout").unwrap();
    assert_eq!(stdout.counters[LimitKind::Puts], 1);
    assert_eq!(stdout.counters[LimitKind::PutSize], 4);
    assert_eq!(std::fs::read(&job_out).unwrap(), b"done");
}

#[test]
#[serial]
fn test_handoff_with_garbage_command_fails() {
    let dir = workspace();
    let config = SessionConfig::new();
    let input = dir.path().join("input");

    let mut session =
        Session::new(Manifest::from_text(&manifest_text(&input, &dir.path().join("a"), 1)).unwrap());
    session.open(&config).unwrap();

    let (mut submitter, worker_end) = UnixStream::pair().unwrap();
    write_command(&mut submitter, "Version = 20140509\n").unwrap();
    assert!(session.handoff(worker_end, &config).is_err());
    assert!(!session.has_report_sink());

    session.finish(&config, &mut Vec::new()).unwrap();
}
