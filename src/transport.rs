//! Datagram transport the blocking driver runs over.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::Error;

/// Outcome of a bounded wait for a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A datagram of this many bytes was written to the buffer.
    Datagram(usize),
    /// Nothing arrived in time.
    Timeout,
}

/// A connected datagram socket.
pub trait DatagramTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Wait at most `timeout` for the next datagram.
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Received>;
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for Box<T> {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        (**self).send(datagram)
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Received> {
        (**self).recv_timeout(buf, timeout)
    }
}

/// UDP socket connected to one remote address.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpTransport {
    /// Resolve `remote_host` as an IPv4 or IPv6 literal, bind a local socket
    /// of the same family and connect it.
    ///
    /// An explicit `local` address must parse and be of the remote's family.
    pub fn connect(local: Option<&str>, remote_host: &str, remote_port: u16) -> Result<Self, Error> {
        let remote_ip = parse_ip(remote_host)?;
        let remote = SocketAddr::new(remote_ip, remote_port);

        let local_ip = match local {
            Some(local) => {
                let ip = parse_ip(local)?;
                if ip.is_ipv4() != remote_ip.is_ipv4() {
                    return Err(Error::AddressResolution(format!(
                        "local {} and remote {} are of different address families",
                        ip, remote_ip
                    )));
                }
                ip
            }
            None if remote_ip.is_ipv4() => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            None => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))?;
        socket.connect(remote)?;
        debug!("UDP {} connected to {}", socket.local_addr()?, remote);

        Ok(UdpTransport { socket, remote })
    }

    /// Wrap an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> Result<Self, Error> {
        let remote = socket.peer_addr()?;
        Ok(UdpTransport { socket, remote })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl DatagramTransport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let n = self.socket.send(datagram)?;
        if n != datagram.len() {
            warn!("Short UDP send {} of {} bytes", n, datagram.len());
        }
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Received> {
        // A zero timeout means blocking forever to the socket.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;

        match self.socket.recv(buf) {
            Ok(n) => Ok(Received::Datagram(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(Received::Timeout)
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_ip(host: &str) -> Result<IpAddr, Error> {
    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    // Accept the bracketed form used in URLs.
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(v6) = trimmed.parse::<Ipv6Addr>() {
        return Ok(IpAddr::V6(v6));
    }
    Err(Error::AddressResolution(format!(
        "{} is neither an IPv4 nor an IPv6 address",
        host
    )))
}
