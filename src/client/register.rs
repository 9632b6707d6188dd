//! Application registration.
//!
//! With a progress callback, the request carries the write end of a pipe
//! as descriptor 0 (`stdout-index 0`). The daemon streams progress records
//! into it (see [`crate::progress`]) while it fetches the application, and
//! answers on the control socket when it is done. Both are watched with one
//! [`PollSet`]; the pipe is drained once more when the reply is ready so no
//! record written before it is lost.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::AsFd;

use super::LocalClient;
use crate::error::{KiteError, ProtocolError, Result};
use crate::progress::{ProgressDecoder, ProgressRecord};
use crate::protocol::{opcode, Attribute, Packet};
use crate::socket::{fd, Interest, PassedFd, PollSet};

/// Progress callback: `(message, bytes_complete, bytes_total)`.
pub type ProgressFn<'a> = dyn FnMut(&str, u64, u64) + 'a;

/// Where the daemon finds an application's signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Signature<'a> {
    /// Send an empty signature URL: the daemon infers the location.
    #[default]
    Infer,
    /// Fetch the signature from this URL.
    Url(&'a str),
    /// Send no signature attribute at all.
    Omit,
}

impl<'a> From<Option<&'a str>> for Signature<'a> {
    fn from(url: Option<&'a str>) -> Self {
        url.map_or(Self::Infer, Self::Url)
    }
}

impl Signature<'_> {
    fn attribute(self) -> Option<Attribute> {
        match self {
            Self::Infer => Some(Attribute::SignatureUrl(String::new())),
            Self::Url(url) => Some(Attribute::SignatureUrl(url.to_owned())),
            Self::Omit => None,
        }
    }
}

/// How a progress stream ended.
enum StreamEnd {
    /// Reply ready or pipe closed.
    Done,
    /// The daemon reported a fetch error.
    Failed(String),
}

impl LocalClient {
    /// Register (install) the application described at `manifest_url`.
    ///
    /// `progress`, when given, is called for every progress record.
    pub fn register_application(
        &mut self,
        manifest_url: &str,
        signature: Signature<'_>,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        let mut attrs = vec![Attribute::ManifestUrl(manifest_url.to_owned())];
        attrs.extend(signature.attribute());

        // Filled in by the progress loop when it reads the reply itself.
        let mut early_reply = None;
        let fetch_error = match progress {
            None => {
                self.send_request(opcode::REGISTER_APP, &attrs)?;
                None
            }
            Some(progress) => {
                let (read, write) = fd::pipe()?;
                fd::set_nonblocking(read.as_fd())?;
                attrs.push(Attribute::StdoutIndex(0));
                self.send_request_with_fds(
                    opcode::REGISTER_APP,
                    &attrs,
                    vec![PassedFd::Owned(write)],
                )?;
                let mut pipe = File::from(read);
                let end = self.follow_progress(&mut pipe, progress, &mut early_reply);
                drop(pipe);
                match end {
                    Ok(StreamEnd::Done) => None,
                    Ok(StreamEnd::Failed(msg)) => Some(msg),
                    Err(e) => {
                        // Keep the socket aligned before reporting.
                        let reply = match early_reply {
                            Some(reply) => reply,
                            None => self.recv_reply(opcode::REGISTER_APP),
                        };
                        if let Err(reply_err) = reply {
                            log::debug!("[kite-client] reply after progress failure: {reply_err}");
                        }
                        return Err(e);
                    }
                }
            }
        };

        let reply = match early_reply {
            Some(reply) => reply?,
            None => self.recv_reply(opcode::REGISTER_APP)?,
        };
        if let Some(msg) = fetch_error {
            log::warn!("[kite-client] fetching {manifest_url} failed: {msg}");
            return Err(KiteError::ApplicationFetch(msg));
        }
        let code = reply.require_response_code()?;
        if !code.is_success() {
            return Err(ProtocolError::ServerError(code).into());
        }
        log::info!("[kite-client] registered {manifest_url}");
        Ok(())
    }

    /// Deliver progress records until the stream ends or the reply arrives.
    ///
    /// Packets are read off the control socket here so that stale spawn
    /// completions are skipped without ending the stream. The registration
    /// reply, or the error reading it, is left in `reply`.
    fn follow_progress(
        &mut self,
        pipe: &mut File,
        progress: &mut ProgressFn<'_>,
        reply: &mut Option<Result<Packet>>,
    ) -> Result<StreamEnd> {
        let mut decoder = ProgressDecoder::new();
        let mut chunk = [0u8; 1024];
        loop {
            let mut set = PollSet::new();
            let socket_slot = set.add(self.socket_fd(), Interest::Read);
            let pipe_slot = set.add(pipe.as_fd(), Interest::Read);
            set.wait(None)?;
            let socket = set.ready(socket_slot);
            let piped = set.ready(pipe_slot);

            if socket.readable || socket.error {
                match self.recv_step(opcode::REGISTER_APP) {
                    Ok(None) => {}
                    Ok(Some(packet)) => *reply = Some(Ok(packet)),
                    Err(e) => *reply = Some(Err(e)),
                }
            }
            let reply_ready = reply.is_some();

            if piped.readable || reply_ready {
                loop {
                    let n = match pipe.read(&mut chunk) {
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    if n == 0 {
                        let last = decoder.finish()?;
                        return Ok(deliver(last, progress).unwrap_or(StreamEnd::Done));
                    }
                    for record in decoder.feed(&chunk[..n])? {
                        if let Some(end) = deliver(Some(record), progress) {
                            return Ok(end);
                        }
                    }
                }
            }
            if reply_ready {
                return Ok(StreamEnd::Done);
            }
            if piped.error {
                log::warn!("[kite-client] progress pipe failed");
                return Ok(StreamEnd::Done);
            }
        }
    }
}

/// Hand a record to the callback. `Some` when the record ends the stream.
fn deliver(record: Option<ProgressRecord>, progress: &mut ProgressFn<'_>) -> Option<StreamEnd> {
    match record? {
        ProgressRecord::Progress {
            message,
            complete,
            total,
        } => {
            progress(&message, complete, total);
            None
        }
        ProgressRecord::Error(msg) => Some(StreamEnd::Failed(msg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_attribute_per_mode() {
        assert_eq!(
            Signature::Infer.attribute(),
            Some(Attribute::SignatureUrl(String::new()))
        );
        assert_eq!(
            Signature::Url("https://apps.example/sig").attribute(),
            Some(Attribute::SignatureUrl("https://apps.example/sig".into()))
        );
        assert_eq!(Signature::Omit.attribute(), None);
        assert_eq!(Signature::from(None), Signature::Infer);
        assert_eq!(Signature::from(Some("u")), Signature::Url("u"));
    }
}
