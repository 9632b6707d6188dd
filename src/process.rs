//! Handle to a process running inside a daemon-managed container.
//!
//! The process is remote, but its completion and its stdio pipes are local:
//! completion is the next spawn reply on the client's control socket, and
//! the retained pipe ends are ordinary non-blocking descriptors.
//! [`RemoteProcess::communicate`] multiplexes all of them with one
//! [`PollSet`] per iteration.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::AsFd;
use std::time::Duration;

use crate::client::LocalClient;
use crate::error::{KiteError, Result};
use crate::protocol::{opcode, Attribute, Packet, ResponseCode};
use crate::socket::{Interest, PollSet, Ready};

const READ_CHUNK: usize = 4096;

/// Where a remote process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// No completion observed yet.
    Running,
    /// The daemon reported success and an exit code.
    Success,
    /// The completion carried no response code, or the control socket failed.
    InternalError,
    /// The daemon reported success without an exit code.
    MissingCode,
    /// The daemon reported a failure.
    ServerError(ResponseCode),
}

impl ProcessStatus {
    /// Whether a completion has been observed.
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// A spawned remote process.
///
/// Dropping a handle closes every retained pipe end. Dropping it before
/// completion tells the client to discard the completion when it arrives.
#[derive(Debug)]
pub struct RemoteProcess<'c> {
    client: &'c mut LocalClient,
    status: ProcessStatus,
    exit_code: Option<i32>,
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl<'c> RemoteProcess<'c> {
    pub(crate) fn new(
        client: &'c mut LocalClient,
        stdin: Option<File>,
        stdout: Option<File>,
        stderr: Option<File>,
    ) -> Self {
        Self {
            client,
            status: ProcessStatus::Running,
            exit_code: None,
            stdin,
            stdout,
            stderr,
        }
    }

    /// Current status.
    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Exit code: `None` while running, the remote code on success, `-1`
    /// for every other terminal status.
    pub fn returncode(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Running => None,
            ProcessStatus::Success => self.exit_code,
            _ => Some(-1),
        }
    }

    /// Take the local write end of the stdin pipe.
    pub fn take_stdin(&mut self) -> Option<File> {
        self.stdin.take()
    }

    /// Take the local read end of the stdout pipe.
    pub fn take_stdout(&mut self) -> Option<File> {
        self.stdout.take()
    }

    /// Take the local read end of the stderr pipe.
    pub fn take_stderr(&mut self) -> Option<File> {
        self.stderr.take()
    }

    /// Signal delivery is not supported by the daemon.
    pub fn send_signal(&mut self, signal: i32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot deliver signal {signal} to a remote process"),
        ))
    }

    /// Ask the process to stop (`SIGTERM`).
    pub fn terminate(&mut self) -> io::Result<()> {
        self.send_signal(libc::SIGTERM)
    }

    /// Stop the process forcibly (`SIGKILL`).
    pub fn kill(&mut self) -> io::Result<()> {
        self.send_signal(libc::SIGKILL)
    }

    /// Check for completion without blocking.
    pub fn poll(&mut self) -> Result<ProcessStatus> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }
        let mut set = PollSet::new();
        let slot = set.add(self.client.socket_fd(), Interest::Read);
        set.wait(Some(Duration::ZERO))?;
        let ready = set.ready(slot);
        if ready.error {
            self.fail("control socket error");
        } else if ready.readable {
            self.read_completion()?;
        }
        Ok(self.status)
    }

    /// Block until the completion arrives.
    pub fn wait(&mut self) -> Result<ProcessStatus> {
        while !self.status.is_terminal() {
            self.read_completion()?;
        }
        Ok(self.status)
    }

    /// Feed `input` to stdin, collect stdout and stderr, and wait for
    /// completion. Returns `(stdout, stderr)`.
    ///
    /// Returns once the process is terminal and every retained pipe end has
    /// reached end-of-stream or failed. stdin is closed when `input` is
    /// fully written, immediately when there is no input, and at
    /// completion otherwise.
    pub fn communicate(&mut self, input: Option<&[u8]>) -> Result<(Vec<u8>, Vec<u8>)> {
        let input = input.unwrap_or_default();
        let mut written = 0;
        if input.is_empty() {
            self.stdin = None;
        }
        let mut out = Vec::new();
        let mut err = Vec::new();

        loop {
            if self.status.is_terminal() {
                self.stdin = None;
            }
            if self.status.is_terminal() && self.stdout.is_none() && self.stderr.is_none() {
                break;
            }

            let mut set = PollSet::new();
            let socket_slot = (!self.status.is_terminal())
                .then(|| set.add(self.client.socket_fd(), Interest::Read));
            let stdin_slot = self.stdin.as_ref().map(|f| set.add(f.as_fd(), Interest::Write));
            let stdout_slot = self.stdout.as_ref().map(|f| set.add(f.as_fd(), Interest::Read));
            let stderr_slot = self.stderr.as_ref().map(|f| set.add(f.as_fd(), Interest::Read));
            set.wait(None)?;

            if let Some(slot) = stdout_slot {
                drain(&mut self.stdout, set.ready(slot), &mut out, "stdout");
            }
            if let Some(slot) = stderr_slot {
                drain(&mut self.stderr, set.ready(slot), &mut err, "stderr");
            }
            if let Some(slot) = stdin_slot {
                feed(&mut self.stdin, set.ready(slot), input, &mut written);
            }
            if let Some(slot) = socket_slot {
                let ready = set.ready(slot);
                if ready.error {
                    self.fail("control socket error");
                } else if ready.readable {
                    self.read_completion()?;
                }
            }
        }
        Ok((out, err))
    }

    /// Read one packet from the control socket and apply it if it is this
    /// process's completion.
    ///
    /// A failed socket ends the process as `InternalError`. A packet that is
    /// not a spawn completion does too, and is also returned as an error:
    /// the reply stream no longer lines up with our requests.
    fn read_completion(&mut self) -> Result<()> {
        match self.client.recv_step(opcode::SPAWN_PROCESS) {
            Ok(Some(packet)) => self.complete(&packet),
            Ok(None) => {}
            Err(KiteError::Io(e)) => self.fail(&format!("control socket failed: {e}")),
            Err(e) => {
                log::warn!("[kite-process] bad completion packet: {e}");
                self.status = ProcessStatus::InternalError;
                return Err(e);
            }
        }
        Ok(())
    }

    fn complete(&mut self, packet: &Packet) {
        self.status = match packet.response_code() {
            None => ProcessStatus::InternalError,
            Some(code) if code.is_success() => {
                self.exit_code = packet.find(|a| match a {
                    Attribute::ExitCode(c) => Some(*c),
                    _ => None,
                });
                if self.exit_code.is_some() {
                    ProcessStatus::Success
                } else {
                    ProcessStatus::MissingCode
                }
            }
            Some(code) => ProcessStatus::ServerError(code),
        };
        log::debug!(
            "[kite-process] completed: {:?} (exit code {:?})",
            self.status,
            self.exit_code
        );
    }

    fn fail(&mut self, reason: &str) {
        log::warn!("[kite-process] {reason}");
        self.status = ProcessStatus::InternalError;
    }
}

impl Drop for RemoteProcess<'_> {
    fn drop(&mut self) {
        if !self.status.is_terminal() {
            log::debug!("[kite-process] handle dropped before completion");
            self.client.note_abandoned_process();
        }
    }
}

/// Read everything currently available from `pipe` into `buf`; close it on
/// end-of-stream or error.
fn drain(pipe: &mut Option<File>, ready: Ready, buf: &mut Vec<u8>, name: &str) {
    if ready.is_idle() {
        return;
    }
    let Some(file) = pipe.as_mut() else {
        return;
    };
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match file.read(&mut chunk) {
            Ok(0) => {
                *pipe = None;
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[kite-process] {name} read failed: {e}");
                *pipe = None;
                return;
            }
        }
    }
    if ready.error {
        *pipe = None;
    }
}

/// Write as much of the remaining input as the pipe takes; close it when
/// the input is exhausted or the reader is gone.
fn feed(pipe: &mut Option<File>, ready: Ready, input: &[u8], written: &mut usize) {
    if ready.error {
        log::debug!("[kite-process] stdin reader went away");
        *pipe = None;
        return;
    }
    if !ready.writable {
        return;
    }
    let Some(file) = pipe.as_mut() else {
        return;
    };
    loop {
        if *written >= input.len() {
            *pipe = None;
            return;
        }
        match file.write(&input[*written..]) {
            Ok(n) => *written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("[kite-process] stdin write failed: {e}");
                *pipe = None;
                return;
            }
        }
    }
}
