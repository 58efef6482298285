//! Address resolution, dialing and binding

use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::error::{NetError, Result};

const LISTEN_BACKLOG: u32 = 1024;

/// Resolve `address` to the first socket address it names
pub async fn resolve(address: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|source| NetError::Resolve {
            address: address.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| NetError::Resolve {
        address: address.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
    })
}

fn new_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
    match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
}

/// Open an outbound stream, optionally with TCP keep-alive
pub async fn dial(addr: SocketAddr, keepalive: bool) -> Result<TcpStream> {
    let connect = async {
        let socket = new_socket(addr)?;
        if keepalive {
            socket.set_keepalive(true)?;
        }
        socket.connect(addr).await
    };
    connect
        .await
        .map_err(|source| NetError::Connect { addr, source })
}

/// Bind a listener, sharing the port with other listeners when `port_reuse` is set
pub fn bind(addr: SocketAddr, port_reuse: bool) -> Result<TcpListener> {
    let listen = || -> io::Result<TcpListener> {
        let socket = new_socket(addr)?;
        // On Windows SO_REUSEADDR lets a second socket take over a bound port.
        if cfg!(unix) || port_reuse {
            socket.set_reuseaddr(true)?;
        }
        if port_reuse {
            set_reuseport(&socket)?;
        }
        socket.bind(addr)?;
        socket.listen(LISTEN_BACKLOG)
    };
    listen().map_err(|source| NetError::Bind { addr, source })
}

#[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
fn set_reuseport(socket: &TcpSocket) -> io::Result<()> {
    socket.set_reuseport(true)
}

#[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
fn set_reuseport(_socket: &TcpSocket) -> io::Result<()> {
    tracing::warn!("SO_REUSEPORT is not available on this platform, relying on SO_REUSEADDR");
    Ok(())
}
