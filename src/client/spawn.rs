//! Remote process execution.
//!
//! A spawn request names a target container, the argument vector and up to
//! three stdio descriptors. The descriptors travel as one SCM_RIGHTS array
//! with the request; the `std*-index` attributes refer to positions in that
//! array. Pipe ends the client keeps are non-blocking and end up in the
//! returned [`RemoteProcess`]; everything else is closed once the send
//! completes.

use std::fs::File;
use std::net::IpAddr;
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};
use std::str::FromStr;

use super::LocalClient;
use crate::error::{KiteError, Result};
use crate::process::RemoteProcess;
use crate::protocol::{opcode, Attribute, PersonaId};
use crate::socket::{fd, PassedFd};

/// Where a remote process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnTarget {
    /// The container behind a network address.
    Address(IpAddr),
    /// An instance of an installed application.
    App(String),
}

impl FromStr for SpawnTarget {
    type Err = KiteError;

    /// Accepts an IP address, `kite+app://<app>` or a bare application name.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(Self::Address(addr));
        }
        if let Some(rest) = s.strip_prefix("kite+app:") {
            let host = app_host(rest);
            if host.is_empty() {
                return Err(KiteError::Config(format!("no application named in {s:?}")));
            }
            return Ok(Self::App(host));
        }
        if let Some((scheme, _)) = s.split_once(':') {
            if is_scheme(scheme) {
                return Err(KiteError::Config(format!(
                    "expected kite+app as url scheme, got {scheme}"
                )));
            }
        }
        if s.is_empty() {
            return Err(KiteError::Config("empty spawn target".into()));
        }
        Ok(Self::App(s.to_owned()))
    }
}

/// Host part of the remainder of a `kite+app:` URL, lowercased.
fn app_host(rest: &str) -> String {
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host_port.split(':').next().unwrap_or_default();
    host.to_ascii_lowercase()
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// How one stdio stream of a remote process is wired.
#[derive(Debug, Clone, Copy, Default)]
pub enum Stdio<'a> {
    /// Not wired; no attribute is sent.
    #[default]
    Null,
    /// A fresh pipe; the client keeps the local end.
    Pipe,
    /// An open descriptor lent by the caller, passed as-is.
    Fd(BorrowedFd<'a>),
    /// stderr only: share whatever stdout was wired to.
    MergeStdout,
}

/// Builder for a remote process, in the manner of [`std::process::Command`].
#[derive(Debug, Clone)]
pub struct RemoteCommand<'a> {
    target: String,
    args: Vec<String>,
    persona: Option<PersonaId>,
    stdin: Stdio<'a>,
    stdout: Stdio<'a>,
    stderr: Stdio<'a>,
}

impl<'a> RemoteCommand<'a> {
    /// Command for `target` (see [`SpawnTarget`]) with no arguments.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            persona: None,
            stdin: Stdio::Null,
            stdout: Stdio::Null,
            stderr: Stdio::Null,
        }
    }

    /// Append one argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the application instance of `persona`. Ignored for address targets.
    pub fn persona(&mut self, persona: PersonaId) -> &mut Self {
        self.persona = Some(persona);
        self
    }

    /// Wire stdin.
    pub fn stdin(&mut self, stdio: Stdio<'a>) -> &mut Self {
        self.stdin = stdio;
        self
    }

    /// Wire stdout.
    pub fn stdout(&mut self, stdio: Stdio<'a>) -> &mut Self {
        self.stdout = stdio;
        self
    }

    /// Wire stderr.
    pub fn stderr(&mut self, stdio: Stdio<'a>) -> &mut Self {
        self.stderr = stdio;
        self
    }
}

/// Which way data flows through a stdio pipe, seen from the remote side.
#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Descriptors and attributes accumulated while wiring stdio.
struct Wiring<'a> {
    attrs: Vec<Attribute>,
    fds: Vec<PassedFd<'a>>,
}

impl<'a> Wiring<'a> {
    fn next_index(&self) -> Result<u8> {
        u8::try_from(self.fds.len())
            .map_err(|_| KiteError::Config("too many descriptors for one request".into()))
    }

    /// Wire one stream. Returns the retained local pipe end and the array
    /// index the stream was given, if any.
    fn wire(
        &mut self,
        stdio: Stdio<'a>,
        direction: Direction,
        index_attr: fn(u8) -> Attribute,
    ) -> Result<(Option<OwnedFd>, Option<u8>)> {
        match stdio {
            Stdio::Null => Ok((None, None)),
            Stdio::Pipe => {
                let (read, write) = fd::pipe()?;
                let (keep, pass) = match direction {
                    Direction::Input => (write, read),
                    Direction::Output => (read, write),
                };
                fd::set_nonblocking(keep.as_fd())?;
                let ix = self.next_index()?;
                self.attrs.push(index_attr(ix));
                self.fds.push(PassedFd::Owned(pass));
                Ok((Some(keep), Some(ix)))
            }
            Stdio::Fd(borrowed) => {
                let ix = self.next_index()?;
                self.attrs.push(index_attr(ix));
                self.fds.push(PassedFd::Borrowed(borrowed));
                Ok((None, Some(ix)))
            }
            Stdio::MergeStdout => {
                Err(KiteError::Config("only stderr can be merged into stdout".into()))
            }
        }
    }
}

impl LocalClient {
    /// Start `command` inside its target container.
    ///
    /// The returned handle borrows the client until it is dropped; its
    /// completion arrives on this client's control socket.
    pub fn spawn<'c>(&'c mut self, command: &RemoteCommand<'_>) -> Result<RemoteProcess<'c>> {
        let target: SpawnTarget = command.target.parse()?;
        let mut wiring = Wiring {
            attrs: Vec::new(),
            fds: Vec::new(),
        };

        match &target {
            SpawnTarget::Address(addr) => {
                wiring.attrs.push(Attribute::Address(*addr));
                if command.persona.is_some() {
                    log::debug!("[kite-client] persona ignored for address target {addr}");
                }
            }
            SpawnTarget::App(app) => {
                wiring.attrs.push(Attribute::AppUrl(app.clone()));
                if let Some(persona) = command.persona {
                    wiring.attrs.push(Attribute::PersonaId(persona));
                }
            }
        }
        wiring.attrs.extend(command.args.iter().cloned().map(Attribute::Argument));

        let (stdin, _) = wiring.wire(command.stdin, Direction::Input, Attribute::StdinIndex)?;
        let (stdout, stdout_ix) =
            wiring.wire(command.stdout, Direction::Output, Attribute::StdoutIndex)?;
        let stderr = match command.stderr {
            Stdio::MergeStdout => {
                let ix = stdout_ix.ok_or_else(|| {
                    KiteError::Config(
                        "stderr requested to follow stdout, but stdout is not wired".into(),
                    )
                })?;
                wiring.attrs.push(Attribute::StderrIndex(ix));
                None
            }
            other => wiring.wire(other, Direction::Output, Attribute::StderrIndex)?.0,
        };

        let Wiring { attrs, fds } = wiring;
        self.send_request_with_fds(opcode::SPAWN_PROCESS, &attrs, fds)?;
        log::debug!("[kite-client] spawned {:?} in {target:?}", command.args);

        Ok(RemoteProcess::new(
            self,
            stdin.map(File::from),
            stdout.map(File::from),
            stderr.map(File::from),
        ))
    }
}
