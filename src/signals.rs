//! Out-of-band wake-up channel: a non-blocking self-pipe carrying
//! newline-delimited signal names into the dispatch thread.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

/// The dispatcher's end of the channel.
pub(crate) struct SignalPipe {
    read: OwnedFd,
    write: Arc<OwnedFd>,
}

impl SignalPipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        Ok(Self { read, write: Arc::new(write) })
    }

    pub fn sender(&self) -> SignalSender {
        SignalSender { fd: Arc::clone(&self.write) }
    }

    pub fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Read whatever is pending, up to 8 KiB per wake. The pipe stays
    /// readable if more is queued, so the next loop iteration picks it up.
    pub fn drain(&self) -> Vec<String> {
        let mut buf = [0u8; 8192];
        let n = unsafe { libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            return Vec::new();
        }
        split_names(&buf[..n as usize])
    }
}

/// Cloneable producer side. Safe to use from any thread and from signal
/// handlers: `emit` is one non-blocking `write(2)` on a pipe.
#[derive(Clone)]
pub struct SignalSender {
    fd: Arc<OwnedFd>,
}

impl SignalSender {
    /// Queue a named signal for the dispatch thread. Best-effort: when the
    /// pipe is full the wake-up is dropped rather than blocking the caller.
    pub fn emit(&self, name: &str) {
        let mut buf = Vec::with_capacity(name.len() + 1);
        buf.extend_from_slice(name.as_bytes());
        buf.push(b'\n');
        let _ = unsafe { libc::write(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
    }
}

fn split_names(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|&b| b == b'\n')
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

/// Which side of the multiplexed wait woke us up.
pub(crate) struct Readiness {
    pub connection: bool,
    pub signals: bool,
}

/// Block until the X connection or the signal pipe is readable. Both flags
/// are reported so one busy side cannot starve the other.
pub(crate) fn wait_readable(conn_fd: RawFd, signal_fd: RawFd) -> io::Result<Readiness> {
    let mut fds = [
        libc::pollfd { fd: conn_fd, events: libc::POLLIN, revents: 0 },
        libc::pollfd { fd: signal_fd, events: libc::POLLIN, revents: 0 },
    ];
    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        let ready = libc::POLLIN | libc::POLLERR | libc::POLLHUP;
        return Ok(Readiness {
            connection: fds[0].revents & ready != 0,
            signals: fds[1].revents & ready != 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_names_drops_empty_segments() {
        assert_eq!(split_names(b"reload\nquit\n"), vec!["reload", "quit"]);
        assert_eq!(split_names(b"\n\nreload\n"), vec!["reload"]);
        assert!(split_names(b"\n").is_empty());
        assert!(split_names(b"").is_empty());
    }

    #[test]
    fn test_emit_round_trip() {
        let pipe = SignalPipe::new().unwrap();
        let sender = pipe.sender();
        sender.emit("reload");
        sender.emit("status");
        assert_eq!(pipe.drain(), vec!["reload", "status"]);
        // Nothing queued: drain is empty, not blocking.
        assert!(pipe.drain().is_empty());
    }

    #[test]
    fn test_sender_works_from_another_thread() {
        let pipe = SignalPipe::new().unwrap();
        let sender = pipe.sender();
        std::thread::spawn(move || sender.emit("from-thread")).join().unwrap();
        assert_eq!(pipe.drain(), vec!["from-thread"]);
    }
}
