//! Simulated appliance daemon for integration tests.
//!
//! The client gets one end of a `SOCK_SEQPACKET` socketpair; a thread runs
//! a test-supplied script against the other end.

#![allow(dead_code)]

use std::os::unix::io::OwnedFd;
use std::thread::JoinHandle;

use kite_local::protocol::{frame, opcode, Attribute, Packet};
use kite_local::socket::ControlSocket;
use kite_local::{Config, LocalClient, ResponseCode};
use tempfile::TempDir;

/// The daemon's end of the control socket.
pub struct Daemon {
    pub socket: ControlSocket,
}

impl Daemon {
    /// Next request and the descriptors that came with it.
    pub fn recv(&self) -> (Packet, Vec<OwnedFd>) {
        let (bytes, fds) = self.socket.recv_with_fds().unwrap();
        (Packet::parse(&bytes).unwrap(), fds)
    }

    /// Next request, asserting its opcode and that no descriptors came with it.
    pub fn expect(&self, op: u16) -> Packet {
        let (packet, fds) = self.recv();
        assert_eq!(packet.opcode, op, "request opcode");
        assert!(fds.is_empty(), "unexpected descriptors");
        packet
    }

    /// Send a reply to `op`.
    pub fn reply(&self, op: u16, flags: u16, attrs: &[Attribute]) {
        self.socket.send(&frame(op | opcode::RESPONSE, flags, attrs).unwrap()).unwrap();
    }

    /// Send a reply carrying only `code`.
    pub fn reply_code(&self, op: u16, code: ResponseCode) {
        self.reply(op, 0, &[Attribute::ResponseCode(code)]);
    }
}

/// A client wired to a daemon thread, with a throwaway appliance directory.
pub struct Harness {
    pub client: LocalClient,
    pub dir: TempDir,
    daemon: Option<JoinHandle<()>>,
}

impl Harness {
    /// Start `script` on the daemon side.
    pub fn start<F>(script: F) -> Self
    where
        F: FnOnce(Daemon) + Send + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let (ours, theirs) = ControlSocket::pair().unwrap();
        let client = LocalClient::from_socket(ours, Config::new(dir.path()));
        let daemon = std::thread::spawn(move || script(Daemon { socket: theirs }));
        Self {
            client,
            dir,
            daemon: Some(daemon),
        }
    }

    /// Store a manifest under `manifests/<name>`.
    pub fn write_manifest(&self, name: &str, json: &str) {
        let dir = self.dir.path().join("manifests");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), json).unwrap();
    }

    /// Wait for the daemon script, propagating its assertion failures.
    pub fn finish(mut self) {
        if let Some(daemon) = self.daemon.take() {
            daemon.join().unwrap();
        }
    }
}
