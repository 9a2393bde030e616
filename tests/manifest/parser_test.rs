/*!
 * Manifest Parser Tests
 * Keyword table, channel grammar and whole-manifest validation
 */

use pretty_assertions::assert_eq;
use std::path::PathBuf;

use sandbox_io::channels::{AccessType, Protocol, Quota};
use sandbox_io::{KernelError, Manifest};

const HEADER: &str = "Version = 20140509\nTimeout = 50\nMemory = 4294967296, 0\n";

fn with_header(rest: &str) -> String {
    format!("{}{}", HEADER, rest)
}

#[test]
fn test_full_manifest() {
    let text = "\
Version = 20140509
Timeout = 0x32
Memory = 4294967296, 1
Boot = /opt/app.nexe
Node = 3
Job = /tmp/daemon.sock
Broker = tcp://10.0.0.1:5555
Channel = /dev/stdin, /dev/stdin, 0, 999999, 999999, 0, 0
Channel = /tmp/out.txt, /dev/stdout, 0, 0, 0, 1000, 4096
";
    let manifest = Manifest::from_text(text).unwrap();

    assert_eq!(manifest.timeout, 50);
    assert_eq!(manifest.mem_size, 4294967296);
    assert_eq!(manifest.boot.as_deref(), Some("/opt/app.nexe"));
    assert_eq!(manifest.node.as_deref(), Some("3"));
    assert_eq!(manifest.job, Some(PathBuf::from("/tmp/daemon.sock")));
    assert!(manifest.is_daemon());
    assert!(manifest.mem_tag.is_some());

    let aliases: Vec<&str> = manifest.channels.iter().map(|c| c.alias()).collect();
    assert_eq!(aliases, ["/dev/stdin", "/dev/stdout"]);
    let stdout = manifest.channels.get("/dev/stdout").unwrap();
    assert_eq!(stdout.limits(), &Quota::new(0, 0, 1000, 4096));
    assert!(stdout.tag().is_some());
}

#[test]
fn test_random_access_record() {
    let manifest = Manifest::from_text(&with_header(
        "Channel = /tmp/in.dat,input,1,1000,1048576,0,0\n",
    ))
    .unwrap();
    let channel = manifest.channels.get("input").unwrap();
    assert_eq!(channel.name(), "/tmp/in.dat");
    assert_eq!(channel.access_type(), AccessType::RndGetSeqPut);
    assert_eq!(channel.protocol(), Protocol::Regular);
}

#[test]
fn test_deprecated_program_keyword() {
    let text = "Version = 20130611\nTimeout = 5\nMemory = 65536, 0\n\
        Program = /opt/legacy.nexe\n\
        Channel = /dev/stdin,/dev/stdin,0,1,1,1,0,0\n";
    let manifest = Manifest::from_text(text).unwrap();

    let boot = manifest.channels.get("/boot/elf").unwrap();
    assert_eq!(boot.name(), "/opt/legacy.nexe");
    assert_eq!(boot.limits(), &Quota::new(0x1000000, 0x1000000, 0, 0));
}

#[test]
fn test_mixed_record_formats_rejected() {
    for channels in [
        "Channel = /a,/dev/a,0,1,1,0,0\nChannel = /b,/dev/b,0,1,1,1,0,0\n",
        "Channel = /b,/dev/b,0,1,1,1,0,0\nChannel = /a,/dev/a,0,1,1,0,0\n",
    ] {
        let err = Manifest::from_text(&with_header(channels)).unwrap_err();
        assert!(matches!(err, KernelError::ManifestSyntax { line: 5, .. }), "{}", err);
    }
}

#[test]
fn test_duplicate_alias_rejected() {
    let err = Manifest::from_text(&with_header(
        "Channel = /a,/dev/a,0,1,1,0,0\nChannel = /b,/dev/a,0,1,1,0,0\n",
    ))
    .unwrap_err();
    assert!(matches!(err, KernelError::ManifestSemantic(_)));
}

#[test]
fn test_duplicate_singleton_rejected() {
    let err = Manifest::from_text(&with_header(
        "Timeout = 10\nChannel = /a,/dev/a,0,1,1,0,0\n",
    ))
    .unwrap_err();
    assert!(err.to_string().contains("duplicate Timeout"));
}

#[test]
fn test_missing_channel_rejected() {
    let err = Manifest::from_text(HEADER).unwrap_err();
    assert!(matches!(err, KernelError::ManifestSyntax { .. }));
    assert_eq!(err.exit_code(), 36);
}

#[test]
fn test_invalid_values() {
    let cases = [
        "Version = 1\nTimeout = 1\nMemory = 1, 0\nChannel = /a,/a,0,1,1,0,0\n",
        "Version = 20140509\nTimeout = 1s\nMemory = 1, 0\nChannel = /a,/a,0,1,1,0,0\n",
        "Version = 20140509\nTimeout = 1\nMemory = 1, 3\nChannel = /a,/a,0,1,1,0,0\n",
        "Version = 20140509\nTimeout = 1\nMemory = 1, 0\nChannel = /a,/a,9,1,1,0,0\n",
        "Version = 20140509\nTimeout = 1\nMemory = 1, 0\nChannel = /a,/a,0,1,1,0,-5\n",
        "Version = 20140509\nTimeout = 1\nMemory = 1, 0\nChannel = a,/a,0,1,1,0,0\n",
        "Version = 20140509\nTimeout = 1\nMemory = 1, 0\nBroker = x\nChannel = /a,/a,0,1,1,0,0\n",
    ];
    for text in cases {
        let err = Manifest::from_text(text).unwrap_err();
        assert!(
            matches!(err, KernelError::ManifestSemantic(_)),
            "{:?} gave {}",
            text,
            err
        );
        assert_eq!(err.exit_code(), 37);
    }
}

#[test]
fn test_job_path_limit() {
    let long = format!("/tmp/{}", "j".repeat(110));
    let err = Manifest::from_text(&with_header(&format!(
        "Job = {}\nChannel = /a,/dev/a,0,1,1,0,0\n",
        long
    )))
    .unwrap_err();
    assert!(matches!(err, KernelError::ManifestSemantic(_)));
}

#[test]
fn test_lines_past_limit_are_ignored() {
    let mut text = with_header("Channel = /a,/dev/a,0,1,1,0,0\n");
    text.push_str(&"\n".repeat(0x2000));
    text.push_str("Node = 9\n");

    let manifest = Manifest::from_text(&text).unwrap();
    assert_eq!(manifest.node, None);
}

#[test]
fn test_crlf_lines() {
    let text = "Version = 20140509\r\nTimeout = 5\r\nMemory = 65536, 0\r\n\
        Channel = /tmp/a,/dev/a,0,1,1,0,0\r\n";
    let manifest = Manifest::from_text(text).unwrap();
    assert_eq!(manifest.timeout, 5);
    assert_eq!(manifest.channels.get("/dev/a").unwrap().limits(), &Quota::new(1, 1, 0, 0));
}
