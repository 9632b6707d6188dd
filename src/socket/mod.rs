//! Local transport: the daemon control socket and descriptor plumbing.
//!
//! - [`control`] – `SOCK_SEQPACKET` socket with SCM_RIGHTS descriptor passing
//! - [`fd`] – pipes, `O_NONBLOCK`, and the `poll(2)` readiness wait

pub mod control;
pub mod fd;

pub use control::{ControlSocket, PassedFd, MAX_PACKET_LEN};
pub use fd::{Interest, PollSet, Ready};
