//! Remote process execution against a simulated daemon.

mod common;

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::os::unix::io::AsFd;

use common::Harness;
use kite_local::protocol::{opcode, Attribute};
use kite_local::{
    Id32, KiteError, ProcessStatus, ProtocolError, RemoteCommand, ResponseCode, Stdio,
};

fn exited(code: i32) -> [Attribute; 2] {
    [Attribute::ResponseCode(ResponseCode::SUCCESS), Attribute::ExitCode(code)]
}

#[test]
fn piped_stdout_is_collected() {
    const N: usize = 100_000;
    let mut h = Harness::start(|d| {
        let (req, mut fds) = d.recv();
        assert_eq!(req.opcode, opcode::SPAWN_PROCESS);
        assert_eq!(
            req.attributes,
            vec![
                Attribute::AppUrl("notes.example".into()),
                Attribute::Argument("cat".into()),
                Attribute::Argument("big".into()),
                Attribute::StdoutIndex(0),
            ]
        );
        assert_eq!(fds.len(), 1);
        let mut out = File::from(fds.remove(0));
        out.write_all(&vec![b'x'; N]).unwrap();
        drop(out);
        d.reply(opcode::SPAWN_PROCESS, 0, &exited(0));
    });

    let mut cmd = RemoteCommand::new("notes.example");
    cmd.args(["cat", "big"]).stdout(Stdio::Pipe);
    let mut process = h.client.spawn(&cmd).unwrap();
    let (out, err) = process.communicate(None).unwrap();
    assert_eq!(out.len(), N);
    assert!(err.is_empty());
    assert_eq!(process.status(), ProcessStatus::Success);
    assert_eq!(process.returncode(), Some(0));
    drop(process);
    h.finish();
}

#[test]
fn stdin_is_fed_and_closed() {
    let mut h = Harness::start(|d| {
        let (req, mut fds) = d.recv();
        assert!(req.attributes.contains(&Attribute::StdinIndex(0)));
        assert!(req.attributes.contains(&Attribute::StdoutIndex(1)));
        assert!(req.attributes.contains(&Attribute::StderrIndex(2)));
        let mut stderr = File::from(fds.remove(2));
        let mut stdout = File::from(fds.remove(1));
        let mut stdin = File::from(fds.remove(0));
        let mut input = Vec::new();
        stdin.read_to_end(&mut input).unwrap();
        stdout.write_all(&input.to_ascii_uppercase()).unwrap();
        stderr.write_all(b"done\n").unwrap();
        drop((stdin, stdout, stderr));
        d.reply(opcode::SPAWN_PROCESS, 0, &exited(3));
    });

    let mut cmd = RemoteCommand::new("10.0.0.9");
    cmd.arg("tr").stdin(Stdio::Pipe).stdout(Stdio::Pipe).stderr(Stdio::Pipe);
    let mut process = h.client.spawn(&cmd).unwrap();
    let (out, err) = process.communicate(Some(b"hello kite")).unwrap();
    assert_eq!(out, b"HELLO KITE");
    assert_eq!(err, b"done\n");
    assert_eq!(process.returncode(), Some(3));
    drop(process);
    h.finish();
}

#[test]
fn stderr_can_follow_stdout() {
    let mut h = Harness::start(|d| {
        let (req, fds) = d.recv();
        assert_eq!(fds.len(), 1);
        assert!(req.attributes.contains(&Attribute::StdoutIndex(0)));
        assert!(req.attributes.contains(&Attribute::StderrIndex(0)));
        drop(fds);
        d.reply(opcode::SPAWN_PROCESS, 0, &exited(0));
    });

    let mut cmd = RemoteCommand::new("notes.example");
    cmd.arg("true").stdout(Stdio::Pipe).stderr(Stdio::MergeStdout);
    let mut process = h.client.spawn(&cmd).unwrap();
    assert_eq!(process.communicate(None).unwrap(), (Vec::new(), Vec::new()));
    drop(process);
    h.finish();
}

#[test]
fn stderr_follow_without_stdout_is_rejected() {
    let mut h = Harness::start(|_| {});
    let mut cmd = RemoteCommand::new("notes.example");
    cmd.arg("true").stderr(Stdio::MergeStdout);
    assert!(matches!(h.client.spawn(&cmd), Err(KiteError::Config(_))));
    h.finish();
}

#[test]
fn lent_descriptor_is_passed_and_left_open() {
    let mut h = Harness::start(|d| {
        let (req, mut fds) = d.recv();
        assert!(req.attributes.contains(&Attribute::StdoutIndex(0)));
        File::from(fds.remove(0)).write_all(b"to the file").unwrap();
        d.reply(opcode::SPAWN_PROCESS, 0, &exited(0));
    });

    let mut file = tempfile::tempfile().unwrap();
    {
        let mut cmd = RemoteCommand::new("notes.example");
        cmd.arg("echo").stdout(Stdio::Fd(file.as_fd()));
        let mut process = h.client.spawn(&cmd).unwrap();
        assert_eq!(process.wait().unwrap(), ProcessStatus::Success);
    }
    file.rewind().unwrap();
    let mut written = String::new();
    file.read_to_string(&mut written).unwrap();
    assert_eq!(written, "to the file");
    h.finish();
}

#[test]
fn persona_only_goes_with_app_targets() {
    let persona = Id32([5; 32]);
    let mut h = Harness::start(move |d| {
        let req = d.expect(opcode::SPAWN_PROCESS);
        assert_eq!(
            req.attributes[..2],
            [Attribute::AppUrl("photos.example".into()), Attribute::PersonaId(persona)]
        );
        d.reply(opcode::SPAWN_PROCESS, 0, &exited(0));
        let req = d.expect(opcode::SPAWN_PROCESS);
        assert!(!req.attributes.iter().any(|a| matches!(a, Attribute::PersonaId(_))));
        d.reply(opcode::SPAWN_PROCESS, 0, &[Attribute::ResponseCode(ResponseCode::NOT_ALLOWED)]);
    });

    let mut cmd = RemoteCommand::new("kite+app://photos.example");
    cmd.arg("id").persona(persona);
    assert_eq!(h.client.spawn(&cmd).unwrap().wait().unwrap(), ProcessStatus::Success);

    let mut cmd = RemoteCommand::new("10.0.0.4");
    cmd.arg("id").persona(persona);
    let mut process = h.client.spawn(&cmd).unwrap();
    assert_eq!(process.wait().unwrap(), ProcessStatus::ServerError(ResponseCode::NOT_ALLOWED));
    assert_eq!(process.returncode(), Some(-1));
    drop(process);
    h.finish();
}

#[test]
fn abandoned_process_completion_is_skipped() {
    let mut h = Harness::start(|d| {
        d.expect(opcode::SPAWN_PROCESS);
        d.expect(opcode::SYSTEM_INFO);
        d.reply(opcode::SPAWN_PROCESS, 0, &exited(0));
        d.reply(
            opcode::SYSTEM_INFO,
            0,
            &[
                Attribute::ResponseCode(ResponseCode::SUCCESS),
                Attribute::SystemType("x86_64-linux".into()),
            ],
        );
    });

    let mut cmd = RemoteCommand::new("notes.example");
    cmd.arg("sleep");
    drop(h.client.spawn(&cmd).unwrap());
    assert_eq!(h.client.system_type().unwrap().as_deref(), Some("x86_64-linux"));
    h.finish();
}

#[test]
fn foreign_reply_to_spawn_is_reported() {
    let mut h = Harness::start(|d| {
        let (req, fds) = d.recv();
        assert_eq!(req.opcode, opcode::SPAWN_PROCESS);
        drop(fds);
        d.reply_code(opcode::CONTAINER_LOOKUP, ResponseCode::SUCCESS);
    });

    let mut cmd = RemoteCommand::new("notes.example");
    cmd.arg("true").stdout(Stdio::Pipe);
    let mut process = h.client.spawn(&cmd).unwrap();
    let err = process.communicate(None).unwrap_err();
    assert!(
        matches!(
            err,
            KiteError::Protocol(ProtocolError::UnexpectedOpcode { actual, .. })
                if actual == opcode::CONTAINER_LOOKUP | opcode::RESPONSE
        ),
        "{err}"
    );
    assert_eq!(process.status(), ProcessStatus::InternalError);
    drop(process);
    h.finish();
}
