//! Hand foreign traffic to the real service sharing our port

use burrow_core::tracing::metrics::{Counter, counter};
use bytes::Bytes;
use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, instrument, warn};

use crate::stream::{StreamUtils, is_connection_closed_error};

const RELAY_CHUNK: usize = 16 * 1024;

/// Address of the service presumed bound on `port` of this host
pub fn local_service_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Source addresses of camouflage dials that are still open
///
/// When nothing else owns the shared port, a camouflage dial lands on our own
/// listener. The listener recognises those connections by their peer address
/// and drops them.
#[derive(Debug, Clone, Default)]
pub struct LocalDials(Arc<Mutex<HashSet<SocketAddr>>>);

impl LocalDials {
    /// Whether `peer` is the source of one of our open camouflage dials
    pub fn contains(&self, peer: SocketAddr) -> bool {
        let peer = SocketAddr::new(peer.ip().to_canonical(), peer.port());
        self.lock().contains(&peer)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SocketAddr>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dial `target` from a loopback source registered until the guard drops
    ///
    /// The source is bound and registered before connecting, so the listener
    /// can never accept the connection ahead of the registration.
    async fn dial(&self, target: SocketAddr) -> io::Result<(TcpStream, DialGuard)> {
        let socket = TcpSocket::new_v4()?;
        socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
        let source = socket.local_addr()?;

        self.lock().insert(source);
        let guard = DialGuard {
            dials: self.clone(),
            source,
        };

        let stream = socket.connect(target).await?;
        Ok((stream, guard))
    }
}

struct DialGuard {
    dials: LocalDials,
    source: SocketAddr,
}

impl Drop for DialGuard {
    fn drop(&mut self) {
        self.dials.lock().remove(&self.source);
    }
}

/// Splice `inbound` onto the local service listening on `local_port`
///
/// `consumed` is written to the service before anything else so it sees the
/// client's byte stream unmodified. When either direction ends the whole
/// relay ends and both sockets are closed. A failed dial drops `inbound`
/// without retrying.
pub async fn relay(inbound: TcpStream, consumed: Bytes, local_port: u16) {
    relay_tracked(&LocalDials::default(), inbound, consumed, local_port).await;
}

/// [`relay`], registering the service dial in `dials` while it is open
#[instrument(
    name = "camouflage_relay",
    skip_all,
    fields(
        peer_addr = tracing::field::Empty,
        local_port = local_port,
        replayed = consumed.len()
    )
)]
pub(crate) async fn relay_tracked(
    dials: &LocalDials,
    inbound: TcpStream,
    consumed: Bytes,
    local_port: u16,
) {
    if let Ok(peer_addr) = inbound.peer_addr() {
        tracing::Span::current().record("peer_addr", tracing::field::display(peer_addr));
    }

    let target = local_service_addr(local_port);
    let (mut service, _dial) = match dials.dial(target).await {
        Ok(dialed) => dialed,
        Err(e) => {
            warn!("Camouflage dial to {} failed: {}", target, e);
            counter("camouflage_dial_failures_total").increment();
            return;
        }
    };

    let to_service = counter("camouflage_bytes_to_service");
    let to_client = counter("camouflage_bytes_to_client");

    if !consumed.is_empty() {
        if let Err(e) = StreamUtils::write_all(&mut service, &consumed).await {
            warn!("Failed to replay sniffed bytes to {}: {}", target, e);
            return;
        }
        to_service.add(consumed.len() as u64);
    }

    let (mut inbound_read, mut inbound_write) = inbound.into_split();
    let (mut service_read, mut service_write) = service.into_split();

    let mut upstream = tokio::spawn(async move {
        pump(&mut inbound_read, &mut service_write, &to_service).await
    });

    tokio::select! {
        result = pump(&mut service_read, &mut inbound_write, &to_client) => {
            upstream.abort();
            match result {
                Ok(n) => debug!("Service side closed after {} bytes to client", n),
                Err(e) if is_connection_closed_error(&e) => debug!("Client went away: {}", e),
                Err(e) => warn!("Error relaying service to client: {}", e),
            }
        }
        joined = &mut upstream => {
            match joined {
                Ok(Ok(n)) => debug!("Client side closed after {} bytes to service", n),
                Ok(Err(e)) if is_connection_closed_error(&e) => debug!("Service went away: {}", e),
                Ok(Err(e)) => warn!("Error relaying client to service: {}", e),
                Err(e) => warn!("Upstream relay task failed: {}", e),
            }
        }
    }
}

/// Copy until EOF, crediting `moved` with every chunk as soon as it is written
async fn pump<R, W>(reader: &mut R, writer: &mut W, moved: &Counter) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_CHUNK];
    let mut total = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        moved.add(n as u64);
        total += n as u64;
    }
}
