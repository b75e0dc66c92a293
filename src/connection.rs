use crate::config::Config;
use crate::error::Result;
use crate::gss::SecurityProvider;
use crate::net;
use crate::session::Session;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::ops::{Deref, DerefMut};
use std::os::fd::AsFd;

/// An authenticated session on a TCP socket.
///
/// Dereferences to [`Session`] for the command engine. Dropping the
/// connection sends QUIT if the server still expects commands, then shuts
/// the socket down.
pub struct Connection {
    session: Session<TcpStream>,
    host: String,
    peer: SocketAddr,
}

impl Connection {
    /// Connect to `config.host` and authenticate.
    pub fn open(config: &Config, provider: &dyn SecurityProvider) -> Result<Self> {
        config.validate()?;
        let stream = net::connect(&config.host, config.port, config.source_ip, config.timeout())?;
        Self::from_stream(
            stream,
            &config.host,
            config.service_principal.as_deref(),
            provider,
        )
    }

    /// Authenticate over an already connected socket. Without an explicit
    /// principal, `host/<canonical name>` of the peer address is used.
    pub fn from_stream(
        stream: TcpStream,
        host: &str,
        principal: Option<&str>,
        provider: &dyn SecurityProvider,
    ) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let principal = match principal {
            Some(p) => p.to_string(),
            None => {
                let principal = format!("host/{}", net::canonical_hostname(host, &peer));
                log::info!("Using service principal {} for {}", principal, host);
                principal
            }
        };

        let session = Session::establish(stream, provider, &principal)?;
        log::debug!("Opened connection to {} ({})", host, peer);
        Ok(Self {
            session,
            host: host.to_string(),
            peer,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// True if the server sent bytes nobody has read, or hung up.
    pub fn has_pending_data(&self) -> bool {
        let stream = self.session.get_ref();
        let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) => false,
            Ok(_) => fds[0].revents().map_or(false, |r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            }),
            Err(e) => {
                log::warn!("poll on connection to {} failed: {}", self.host, e);
                true
            }
        }
    }

    /// Send QUIT if appropriate and close the socket.
    pub fn close(mut self) -> Result<()> {
        self.session.quit()
    }
}

impl Deref for Connection {
    type Target = Session<TcpStream>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for Connection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.session.is_open() {
            if let Err(e) = self.session.quit() {
                log::warn!("Failed to send QUIT to {}: {}", self.host, e);
            }
        }
        self.session.get_ref().shutdown(Shutdown::Both).ok();
        log::debug!("Closed connection to {} ({})", self.host, self.peer);
    }
}
