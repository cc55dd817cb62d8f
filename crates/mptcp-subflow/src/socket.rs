//! Socket option entry points.
//!
//! [`Sockopt`] is the seam between the subflow protocol and the kernel: two
//! calls, each taking a raw byte buffer. [`SocketRef`] implements it with
//! `getsockopt(2)`/`setsockopt(2)` on a borrowed descriptor.
//!
//! Per-subflow option requests carry user-space pointers to the option
//! value, so they get their own trait methods. The provided implementations
//! marshal the pointer-carrying kernel structs and go through the two raw
//! calls; an in-process backend overrides them and works on the slices.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use zerocopy::IntoBytes;

use crate::types::{MptcpSubGetsockopt, MptcpSubSetsockopt, SOL_TCP, mptcp_sockopt};

/// The kernel's get/set socket option calls.
pub trait Sockopt {
    /// Issue getsockopt with `buf` as the in/out value.
    ///
    /// `buf.len()` is passed as the value length; the returned length is
    /// the one the kernel wrote back, which may be shorter.
    fn getsockopt(&self, level: i32, optname: i32, buf: &mut [u8]) -> io::Result<usize>;

    /// Issue setsockopt with `buf` as the value.
    fn setsockopt(&self, level: i32, optname: i32, buf: &[u8]) -> io::Result<()>;

    /// Read option (`level`, `optname`) of subflow `id` into `value`.
    ///
    /// Returns the number of bytes the kernel wrote, at most `value.len()`.
    fn sub_getsockopt(
        &self,
        id: u8,
        level: i32,
        optname: i32,
        value: &mut [u8],
    ) -> io::Result<usize> {
        let capacity = value.len();
        let mut len = u32::try_from(capacity)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

        let req = MptcpSubGetsockopt::new(id, level, optname, value.as_mut_ptr(), &mut len);
        let mut buf = req.as_bytes().to_vec();
        self.getsockopt(SOL_TCP, mptcp_sockopt::SUB_GETSOCKOPT, &mut buf)?;

        Ok((len as usize).min(capacity))
    }

    /// Write option (`level`, `optname`) of subflow `id` from `value`.
    fn sub_setsockopt(&self, id: u8, level: i32, optname: i32, value: &[u8]) -> io::Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

        let req = MptcpSubSetsockopt::new(id, level, optname, value.as_ptr(), len);
        self.setsockopt(SOL_TCP, mptcp_sockopt::SUB_SETSOCKOPT, req.as_bytes())
    }
}

impl<T: Sockopt + ?Sized> Sockopt for &T {
    fn getsockopt(&self, level: i32, optname: i32, buf: &mut [u8]) -> io::Result<usize> {
        (**self).getsockopt(level, optname, buf)
    }

    fn setsockopt(&self, level: i32, optname: i32, buf: &[u8]) -> io::Result<()> {
        (**self).setsockopt(level, optname, buf)
    }

    fn sub_getsockopt(
        &self,
        id: u8,
        level: i32,
        optname: i32,
        value: &mut [u8],
    ) -> io::Result<usize> {
        (**self).sub_getsockopt(id, level, optname, value)
    }

    fn sub_setsockopt(&self, id: u8, level: i32, optname: i32, value: &[u8]) -> io::Result<()> {
        (**self).sub_setsockopt(id, level, optname, value)
    }
}

/// A borrowed MPTCP connection socket.
///
/// The descriptor stays owned by the caller and is never closed here.
#[derive(Debug, Clone, Copy)]
pub struct SocketRef<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> SocketRef<'a> {
    /// Borrow the descriptor of any socket type.
    pub fn new(sock: &'a impl AsFd) -> Self {
        Self { fd: sock.as_fd() }
    }

    /// Wrap an already borrowed descriptor.
    pub fn from_fd(fd: BorrowedFd<'a>) -> Self {
        Self { fd }
    }
}

impl AsFd for SocketRef<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd
    }
}

impl AsRawFd for SocketRef<'_> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Sockopt for SocketRef<'_> {
    fn getsockopt(&self, level: i32, optname: i32, buf: &mut [u8]) -> io::Result<usize> {
        let mut len = libc::socklen_t::try_from(buf.len())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

        // SAFETY: `buf` is valid for writes of `len` bytes and `len` is a
        // valid writable socklen_t; the descriptor is kept open by the borrow.
        let rc = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                level,
                optname,
                buf.as_mut_ptr().cast::<libc::c_void>(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(len as usize)
    }

    fn setsockopt(&self, level: i32, optname: i32, buf: &[u8]) -> io::Result<()> {
        let len = libc::socklen_t::try_from(buf.len())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

        // SAFETY: `buf` is valid for reads of `len` bytes; the descriptor is
        // kept open by the borrow.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                level,
                optname,
                buf.as_ptr().cast::<libc::c_void>(),
                len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_plain_socket_option_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let sock = SocketRef::new(&stream);

        sock.setsockopt(libc::IPPROTO_TCP, libc::TCP_NODELAY, &1i32.to_ne_bytes())
            .unwrap();

        let mut buf = [0u8; 4];
        let len = sock
            .getsockopt(libc::IPPROTO_TCP, libc::TCP_NODELAY, &mut buf)
            .unwrap();
        assert_eq!(len, 4);
        assert_ne!(i32::from_ne_bytes(buf), 0);
    }

    #[test]
    fn test_errno_is_preserved() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sock = SocketRef::new(&listener);

        // Not a valid TCP option name.
        let mut buf = [0u8; 4];
        let err = sock.getsockopt(libc::IPPROTO_TCP, 9999, &mut buf).unwrap_err();
        assert!(err.raw_os_error().is_some());
    }

    #[test]
    fn test_plain_tcp_rejects_subflow_options() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let sock = SocketRef::new(&stream);

        // Without the MPTCP subflow API the kernel does not know the option.
        let mut value = [0u8; 4];
        assert!(
            sock.sub_getsockopt(1, libc::IPPROTO_TCP, libc::TCP_NODELAY, &mut value)
                .is_err()
        );
    }

    #[test]
    fn test_socket_ref_does_not_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        {
            let sock = SocketRef::new(&listener);
            assert_eq!(sock.as_raw_fd(), listener.as_raw_fd());
        }
        assert!(listener.local_addr().is_ok());
    }
}
