//! Sequenced-datagram control socket with SCM_RIGHTS descriptor passing.
//!
//! The daemon listens on an `AF_UNIX` / `SOCK_SEQPACKET` socket, so every
//! `sendmsg` is one packet and every `recvmsg` returns exactly one packet.
//! Descriptors travel as SCM_RIGHTS ancillary data in the same `sendmsg`
//! call as the request they belong to.
//!
//! # Descriptor ownership
//!
//! [`ControlSocket::send_with_fds`] takes the descriptor list by value.
//! [`PassedFd::Owned`] entries are closed locally as soon as the send
//! returns; the kernel has already duplicated them into the daemon, which
//! owns the remote copies from then on. [`PassedFd::Borrowed`] entries stay
//! with whoever lent them.

// Rust guideline compliant 2026-02

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

/// Largest packet accepted from the daemon.
pub const MAX_PACKET_LEN: usize = 0x10000;

/// Upper bound on descriptors accepted in one received packet.
const MAX_RECV_FDS: usize = 16;

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(target_os = "linux")]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(target_os = "linux"))]
const RECV_FLAGS: libc::c_int = 0;

/// A descriptor placed in an outgoing SCM_RIGHTS array.
#[derive(Debug)]
pub enum PassedFd<'a> {
    /// Created by the client for this request; closed locally after the send.
    Owned(OwnedFd),
    /// Lent by the caller; left open.
    Borrowed(BorrowedFd<'a>),
}

impl AsRawFd for PassedFd<'_> {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Owned(fd) => fd.as_raw_fd(),
            Self::Borrowed(fd) => fd.as_raw_fd(),
        }
    }
}

/// Connected `SOCK_SEQPACKET` socket to the appliance daemon.
///
/// Closed on drop.
#[derive(Debug)]
pub struct ControlSocket {
    fd: OwnedFd,
}

impl ControlSocket {
    /// Connect to the daemon's control socket at `path`.
    ///
    /// A missing path surfaces as `io::ErrorKind::NotFound`; callers map it
    /// to a permission error.
    pub fn connect(path: &Path) -> io::Result<Self> {
        use std::os::unix::ffi::OsStrExt;

        let sock = new_seqpacket_socket()?;

        // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let bytes = path.as_os_str().as_bytes();
        if bytes.len() >= addr.sun_path.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("control socket path too long: {}", path.display()),
            ));
        }
        for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }

        let len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
        // SAFETY: `addr` is a fully initialised sockaddr_un and `len` is its size.
        let rc = unsafe {
            libc::connect(
                sock.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd: sock })
    }

    /// A connected pair of sockets, e.g. to stand in for the daemon.
    pub fn pair() -> io::Result<(Self, Self)> {
        let mut sv: [libc::c_int; 2] = [0; 2];
        // SAFETY: `sv` has room for the two descriptors socketpair writes.
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0, sv.as_mut_ptr())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: socketpair succeeded, both descriptors are fresh and ours.
        let (a, b) = unsafe { (OwnedFd::from_raw_fd(sv[0]), OwnedFd::from_raw_fd(sv[1])) };
        super::fd::set_cloexec(a.as_fd())?;
        super::fd::set_cloexec(b.as_fd())?;
        Ok((Self { fd: a }, Self { fd: b }))
    }

    /// Send one packet without ancillary data.
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        self.send_with_fds(data, Vec::new())
    }

    /// Send one packet with `fds` attached as SCM_RIGHTS, in one `sendmsg`.
    ///
    /// The array order is significant: index attributes in the packet refer
    /// to positions in `fds`. Owned entries are closed when this returns,
    /// whether or not the send succeeded.
    pub fn send_with_fds(&self, data: &[u8], fds: Vec<PassedFd<'_>>) -> io::Result<()> {
        let raw: Vec<libc::c_int> = fds.iter().map(AsRawFd::as_raw_fd).collect();
        let fd_bytes = std::mem::size_of_val(raw.as_slice());

        let mut iov = libc::iovec {
            iov_base: data.as_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        };

        let cmsg_space = if raw.is_empty() {
            0
        } else {
            // SAFETY: CMSG_SPACE only computes a size.
            unsafe { libc::CMSG_SPACE(fd_bytes as u32) as usize }
        };
        let mut cmsg_buf = vec![0u8; cmsg_space];

        // SAFETY: msghdr is plain old data; all-zero is a valid value.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        if !raw.is_empty() {
            msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
            msg.msg_controllen = cmsg_space as _;
            // SAFETY: msg_control points at a buffer of CMSG_SPACE(fd_bytes)
            // bytes, so the first header and its data area fit.
            unsafe {
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(fd_bytes as u32) as _;
                std::ptr::copy_nonoverlapping(
                    raw.as_ptr().cast::<u8>(),
                    libc::CMSG_DATA(cmsg),
                    fd_bytes,
                );
            }
        }

        loop {
            // SAFETY: `msg` references `iov`, `data` and `cmsg_buf`, all alive here.
            let n = unsafe { libc::sendmsg(self.fd.as_raw_fd(), &msg, SEND_FLAGS) };
            if n >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        if !raw.is_empty() {
            log::debug!("[kite-socket] passed {} descriptor(s) to peer", raw.len());
        }
        // Owned descriptors now belong to the peer; drop our copies.
        drop(fds);
        Ok(())
    }

    /// Receive one packet, discarding (closing) any descriptors attached to it.
    pub fn recv(&self) -> io::Result<Vec<u8>> {
        let (data, fds) = self.recv_with_fds()?;
        if !fds.is_empty() {
            log::warn!("[kite-socket] closing {} unexpected descriptor(s) from peer", fds.len());
        }
        Ok(data)
    }

    /// Receive one packet together with any SCM_RIGHTS descriptors.
    ///
    /// Returns `UnexpectedEof` when the peer has closed the socket and
    /// `InvalidData` when the packet did not fit [`MAX_PACKET_LEN`] or
    /// carried more descriptors than fit the control buffer.
    pub fn recv_with_fds(&self) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
        let mut data_buf = vec![0u8; MAX_PACKET_LEN];
        let fd_size = std::mem::size_of::<libc::c_int>();
        // SAFETY: CMSG_SPACE only computes a size.
        let cmsg_space = unsafe { libc::CMSG_SPACE((fd_size * MAX_RECV_FDS) as u32) } as usize;
        let mut cmsg_buf = vec![0u8; cmsg_space];

        let mut iov = libc::iovec {
            iov_base: data_buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len: data_buf.len(),
        };
        // SAFETY: msghdr is plain old data; all-zero is a valid value.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = cmsg_buf.len() as _;

        let n = loop {
            // SAFETY: `msg` references `iov`, `data_buf` and `cmsg_buf`, all alive here.
            let n = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, RECV_FLAGS) };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        // Wrap received descriptors first so every early return closes them.
        let mut fds = Vec::new();
        // SAFETY: the kernel filled `cmsg_buf` and updated msg_controllen;
        // CMSG_FIRSTHDR/CMSG_NXTHDR stay inside that region.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                    let data = libc::CMSG_DATA(cmsg);
                    let count = ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize) / fd_size;
                    for i in 0..count {
                        let fd: libc::c_int =
                            std::ptr::read_unaligned(data.add(i * fd_size).cast::<libc::c_int>());
                        fds.push(OwnedFd::from_raw_fd(fd));
                    }
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        if msg.msg_flags & libc::MSG_TRUNC != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("packet exceeds {MAX_PACKET_LEN} bytes"),
            ));
        }
        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            // The kernel closed the descriptors that did not fit.
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer sent more than {MAX_RECV_FDS} descriptors"),
            ));
        }
        if n == 0 && fds.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the control socket",
            ));
        }
        data_buf.truncate(n);
        Ok((data_buf, fds))
    }
}

impl AsFd for ControlSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for ControlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn new_seqpacket_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked below.
    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socket succeeded, the descriptor is fresh and ours.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    super::fd::set_cloexec(fd.as_fd())?;
    Ok(fd)
}
