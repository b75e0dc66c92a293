//! TCP plumbing: connect with deadline and port fallback, source address
//! binding, reverse DNS.

use crate::error::Result;
use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{
    self, sockopt, AddressFamily, SockFlag, SockType, SockaddrLike, SockaddrStorage,
};
use remctl_proto::{DEFAULT_PORT, LEGACY_PORT};
use std::ffi::CStr;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

/// Longest host name getnameinfo can return.
const MAX_HOST: usize = 1025;

/// Connect to `host`. With no explicit port, try the registered remctl port
/// and fall back to the legacy one; if both fail the first error is returned.
///
/// With a `source` address the socket is bound to it before connecting and
/// only server addresses of the same family are tried.
pub fn connect(
    host: &str,
    port: Option<u16>,
    source: Option<IpAddr>,
    timeout: Option<Duration>,
) -> Result<TcpStream> {
    let attempt = |port| connect_port(host, port, source, timeout);
    let stream = match port {
        Some(port) => attempt(port)?,
        None => match attempt(DEFAULT_PORT) {
            Ok(stream) => stream,
            Err(first) => {
                log::debug!(
                    "Connect to {}:{} failed ({}), trying port {}",
                    host,
                    DEFAULT_PORT,
                    first,
                    LEGACY_PORT
                );
                attempt(LEGACY_PORT).map_err(|_| first)?
            }
        },
    };
    stream.set_nodelay(true)?;
    set_timeout(&stream, timeout)?;
    Ok(stream)
}

fn connect_port(
    host: &str,
    port: u16,
    source: Option<IpAddr>,
    timeout: Option<Duration>,
) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        let attempt = match (source, timeout) {
            (Some(source), _) if source.is_ipv4() != addr.is_ipv4() => continue,
            (Some(source), _) => connect_from(source, &addr, timeout),
            (None, Some(t)) => TcpStream::connect_timeout(&addr, t),
            (None, None) => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                log::debug!("Connected to {} ({})", host, addr);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| match source {
        Some(source) => io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses for {} in the family of {}", host, source),
        ),
        None => io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", host)),
    }))
}

/// Bind a fresh socket to `source` (any port), then connect it to `addr`.
fn connect_from(source: IpAddr, addr: &SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let family = if source.is_ipv4() {
        AddressFamily::Inet
    } else {
        AddressFamily::Inet6
    };
    let fd = socket::socket(family, SockType::Stream, SockFlag::empty(), None)?;
    socket::bind(fd.as_raw_fd(), &SockaddrStorage::from(SocketAddr::new(source, 0)))?;

    let stream = TcpStream::from(fd);
    stream.set_nonblocking(true)?;
    match socket::connect(stream.as_raw_fd(), &SockaddrStorage::from(*addr)) {
        Ok(()) => {}
        Err(Errno::EINPROGRESS) => wait_connected(&stream, timeout)?,
        Err(e) => return Err(e.into()),
    }
    stream.set_nonblocking(false)?;
    log::debug!("Bound to {}", stream.local_addr()?);
    Ok(stream)
}

/// Wait for a non-blocking connect to finish and report its outcome.
fn wait_connected(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    loop {
        let wait = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
                }
                let ms = i32::try_from(left.as_millis()).unwrap_or(i32::MAX).max(1);
                PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
            }
            None => PollTimeout::NONE,
        };

        let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, wait) {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => break,
            Err(e) => return Err(e.into()),
        }
    }

    match socket::getsockopt(stream, sockopt::SocketError)? {
        0 => Ok(()),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

/// Apply the same deadline to reads and writes. `None` blocks forever.
pub fn set_timeout(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)
}

/// Lowercased name of `addr` from reverse DNS, or `host` itself if the
/// address has no name.
pub fn canonical_hostname(host: &str, addr: &SocketAddr) -> String {
    match reverse_lookup(addr) {
        Ok(name) => name.to_lowercase(),
        Err(e) => {
            log::warn!("Reverse lookup of {} failed ({}), using {}", addr.ip(), e, host);
            host.to_lowercase()
        }
    }
}

fn reverse_lookup(addr: &SocketAddr) -> io::Result<String> {
    let storage = SockaddrStorage::from(*addr);
    let mut name = [0 as libc::c_char; MAX_HOST];

    // NI_NAMEREQD: fail instead of returning the numeric address.
    let rc = unsafe {
        libc::getnameinfo(
            storage.as_ptr(),
            storage.len(),
            name.as_mut_ptr(),
            name.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            reason.to_string_lossy().into_owned(),
        ));
    }

    let name = unsafe { CStr::from_ptr(name.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}
