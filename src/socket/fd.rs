//! Pipes, descriptor flags and the readiness wait shared by process I/O
//! and registration progress.
//!
//! [`PollSet`] is the one "wait until any of N descriptors is ready"
//! primitive in the crate. Callers rebuild it every loop iteration from the
//! descriptors that are still open, so a closed descriptor can never be
//! polled again.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::time::Duration;

/// Create a pipe, returning `(read_end, write_end)`.
///
/// Both ends are close-on-exec. They are owned from the moment this
/// returns, so an error later in the caller closes them on unwind.
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: `fds` has room for the two descriptors pipe writes.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe succeeded, both descriptors are fresh and ours.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_fd())?;
    set_cloexec(write.as_fd())?;
    Ok((read, write))
}

/// Put `fd` into non-blocking mode (`O_NONBLOCK` on the file status flags).
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a descriptor the caller keeps alive via `fd`.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set `FD_CLOEXEC` on `fd`.
pub fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a descriptor the caller keeps alive via `fd`.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// What a descriptor is waited on for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Data (or end-of-stream) to read.
    Read,
    /// Room to write.
    Write,
}

/// Readiness reported for one descriptor after [`PollSet::wait`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    /// A read will not block (data, or end-of-stream on hang-up).
    pub readable: bool,
    /// A write will not block.
    pub writable: bool,
    /// The descriptor is in an error state (`POLLERR` / `POLLNVAL`).
    pub error: bool,
}

impl Ready {
    /// Nothing to do for this descriptor.
    pub fn is_idle(self) -> bool {
        !self.readable && !self.writable && !self.error
    }
}

/// A set of descriptors to wait on with `poll(2)`.
#[derive(Debug, Default)]
pub struct PollSet {
    entries: Vec<libc::pollfd>,
}

impl PollSet {
    /// Empty set.
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(4),
        }
    }

    /// Add `fd` and return its slot for [`PollSet::ready`].
    pub fn add(&mut self, fd: BorrowedFd<'_>, interest: Interest) -> usize {
        let events = match interest {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        };
        self.entries.push(libc::pollfd { fd: fd.as_raw_fd(), events, revents: 0 });
        self.entries.len() - 1
    }

    /// Number of descriptors in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Block until at least one descriptor is ready, or `timeout` elapses.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` is a single
    /// non-blocking check. Returns the number of ready descriptors.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };
        for entry in &mut self.entries {
            entry.revents = 0;
        }
        loop {
            // SAFETY: `entries` is a valid, exclusively borrowed pollfd array.
            let n = unsafe {
                libc::poll(
                    self.entries.as_mut_ptr(),
                    self.entries.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Readiness of the descriptor in `slot` after the last wait.
    pub fn ready(&self, slot: usize) -> Ready {
        let Some(entry) = self.entries.get(slot) else {
            return Ready::default();
        };
        let revents = entry.revents;
        let hangup = revents & libc::POLLHUP != 0;
        let error = revents & (libc::POLLERR | libc::POLLNVAL) != 0;
        match entry.events {
            // A hang-up on a read end means the next read returns end-of-stream.
            libc::POLLIN => Ready {
                readable: revents & libc::POLLIN != 0 || hangup,
                writable: false,
                error,
            },
            // A hang-up on a write end means nobody will ever read again.
            _ => Ready {
                readable: false,
                writable: revents & libc::POLLOUT != 0,
                error: error || hangup,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn empty_pipe_is_not_readable() {
        let (r, _w) = pipe().unwrap();
        let mut set = PollSet::new();
        let slot = set.add(r.as_fd(), Interest::Read);
        assert_eq!(set.wait(Some(Duration::ZERO)).unwrap(), 0);
        assert!(set.ready(slot).is_idle());
    }

    #[test]
    fn written_pipe_is_readable() {
        let (r, w) = pipe().unwrap();
        std::fs::File::from(w).write_all(b"hi").unwrap();
        let mut set = PollSet::new();
        let slot = set.add(r.as_fd(), Interest::Read);
        assert_eq!(set.wait(None).unwrap(), 1);
        assert!(set.ready(slot).readable);
    }

    #[test]
    fn closed_writer_reads_as_eof() {
        let (r, w) = pipe().unwrap();
        drop(w);
        let mut set = PollSet::new();
        let slot = set.add(r.as_fd(), Interest::Read);
        set.wait(None).unwrap();
        assert!(set.ready(slot).readable);
        let mut buf = [0u8; 8];
        assert_eq!(std::fs::File::from(r).read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_end_with_closed_reader_is_error() {
        let (r, w) = pipe().unwrap();
        drop(r);
        let mut set = PollSet::new();
        let slot = set.add(w.as_fd(), Interest::Write);
        set.wait(None).unwrap();
        assert!(set.ready(slot).error);
    }

    #[test]
    fn nonblocking_read_would_block() {
        let (r, _w) = pipe().unwrap();
        set_nonblocking(r.as_fd()).unwrap();
        let mut buf = [0u8; 8];
        let err = std::fs::File::from(r).read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
