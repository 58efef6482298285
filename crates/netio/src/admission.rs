//! Bounded admission of links bound to a peer node
//!
//! Used by upper-layer services (SOCKS5 relay, port forwarding) that talk to
//! one specific remote node. Inbound links are capped by a token pool: a
//! token is taken before each accept and travels with the link to the
//! handler, which gives it back by dropping or releasing it.

use burrow_core::ValidateConfig;
use burrow_core::tracing::metrics::{Gauge, counter, gauge};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bootstrap::Bootstrapped;
use crate::config::NetConfig;
use crate::error::Result;
use crate::role::Role;
use crate::socket;
use crate::stream::Link;

/// Identity of the remote mesh node a link is meant for; never inspected here
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerNodeId(Arc<str>);

impl PeerNodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerNodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerNodeId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Permit for one in-flight inbound link
///
/// Returned to the pool when dropped or explicitly released.
#[derive(Debug)]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
    active: Gauge,
}

impl AdmissionToken {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        let active = gauge("admitted_links_active");
        active.increment();
        Self {
            _permit: permit,
            active,
        }
    }

    /// Give the token back to the pool
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        self.active.decrement();
    }
}

/// Entry point for peer-bound links with bounded inbound concurrency
#[derive(Debug, Clone)]
pub struct ConnectionAdmission {
    config: Arc<NetConfig>,
}

impl ConnectionAdmission {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Establish links for `role` at `address` on behalf of `peer`
    ///
    /// Outbound links are not gated and the handler receives no token.
    /// Inbound links are not sniffed. `args` is cloned into every handler
    /// call untouched. An invalid configuration is rejected before any socket
    /// is opened.
    pub async fn admit_loop<F, Fut, A>(
        &self,
        role: Role,
        address: &str,
        peer: PeerNodeId,
        handler: F,
        args: A,
    ) -> Result<Bootstrapped>
    where
        F: Fn(Link, PeerNodeId, Option<AdmissionToken>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        A: Clone + Send + Sync + 'static,
    {
        self.config.validate()?;
        match role {
            Role::Connect => {
                let addr = socket::resolve(address).await?;
                let stream = socket::dial(addr, false).await?;
                let local_addr = stream.local_addr()?;
                let peer_addr = stream.peer_addr()?;
                info!(peer = %peer, "Connected to {} from {}", peer_addr, local_addr);

                tokio::spawn(
                    handler(Link::fresh(stream), peer.clone(), None, args)
                        .instrument(info_span!("admitted_link", %peer, %peer_addr)),
                );

                Ok(Bootstrapped::Connected {
                    local_addr,
                    peer_addr,
                })
            }
            Role::Listen => {
                let addr = socket::resolve(address).await?;
                let listener = socket::bind(addr, false)?;
                let local_addr = listener.local_addr()?;
                info!(
                    peer = %peer,
                    max_connections = self.config.max_connections,
                    "Admitting links on {}", local_addr
                );

                let pool = Arc::new(Semaphore::new(self.config.max_connections));
                let accept_loop = tokio::spawn(
                    admit_accept_loop(
                        listener,
                        pool,
                        self.config.max_connections,
                        peer,
                        handler,
                        args,
                    )
                    .instrument(info_span!("admission_loop", %local_addr)),
                );

                Ok(Bootstrapped::Listening {
                    local_addr,
                    accept_loop,
                })
            }
        }
    }
}

async fn admit_accept_loop<F, Fut, A>(
    listener: TcpListener,
    pool: Arc<Semaphore>,
    capacity: usize,
    peer: PeerNodeId,
    handler: F,
    args: A,
) where
    F: Fn(Link, PeerNodeId, Option<AdmissionToken>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    A: Clone + Send + Sync + 'static,
{
    loop {
        let permit = match pool.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Connection limit reached ({}/{}), waiting for available slot",
                    capacity, capacity
                );
                counter("admission_waits_total").increment();
                match pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Admission pool closed: {}", e);
                        return;
                    }
                }
            }
        };

        // A failed accept drops `permit`, returning it to the pool.
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept error: {}", e);
                counter("accept_errors_total").increment();
                continue;
            }
        };
        counter("links_admitted_total").increment();
        debug!(
            "Admitted {} ({}/{} in use)",
            peer_addr,
            capacity - pool.available_permits(),
            capacity
        );

        let token = AdmissionToken::new(permit);
        tokio::spawn(
            handler(Link::fresh(stream), peer.clone(), Some(token), args.clone())
                .instrument(info_span!("admitted_link", %peer, %peer_addr)),
        );
    }
}
