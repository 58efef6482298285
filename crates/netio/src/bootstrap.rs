//! Link bootstrap for mesh nodes
//!
//! `connect` dials a single outbound link. `listen` binds (optionally sharing
//! the port with a real service) and runs a detached accept loop in which
//! every connection is sniffed in its own task and then handed either to the
//! mesh handler or to the camouflage relay.

use burrow_core::ValidateConfig;
use burrow_core::tracing::metrics::counter;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::camouflage::{self, LocalDials};
use crate::config::NetConfig;
use crate::error::Result;
use crate::role::Role;
use crate::sniff::{ProtocolFeature, sniff};
use crate::socket;
use crate::stream::Link;

/// What a successful bootstrap left running
#[derive(Debug)]
pub enum Bootstrapped {
    /// One outbound link was dialed and handed to the handler
    Connected {
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    },
    /// A listener is bound and its accept loop runs in the background
    Listening {
        local_addr: SocketAddr,
        accept_loop: JoinHandle<()>,
    },
}

impl Bootstrapped {
    pub const fn local_addr(&self) -> SocketAddr {
        match self {
            Self::Connected { local_addr, .. } | Self::Listening { local_addr, .. } => *local_addr,
        }
    }

    /// Stop the accept loop, if any. Links already handed off keep running.
    pub fn abort(&self) {
        if let Self::Listening { accept_loop, .. } = self {
            accept_loop.abort();
        }
    }
}

/// Entry point for establishing links between mesh nodes
#[derive(Debug, Clone)]
pub struct TransportBootstrap {
    config: Arc<NetConfig>,
}

impl TransportBootstrap {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Establish links for `role` at `address`
    ///
    /// Returns once the dial succeeded or the listener is bound; the handler
    /// and the accept loop run as detached tasks. Only setup failures
    /// (invalid configuration, resolution, bind, dial) are reported.
    pub async fn bootstrap<F, Fut>(
        &self,
        role: Role,
        address: &str,
        port_reuse: bool,
        handler: F,
    ) -> Result<Bootstrapped>
    where
        F: Fn(Link) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;
        match role {
            Role::Connect => self.connect(address, handler).await,
            Role::Listen => self.listen(address, port_reuse, handler).await,
        }
    }

    async fn connect<F, Fut>(&self, address: &str, handler: F) -> Result<Bootstrapped>
    where
        F: Fn(Link) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let addr = socket::resolve(address).await?;
        let stream = socket::dial(addr, true).await?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        info!("Connected to {} from {}", peer_addr, local_addr);

        tokio::spawn(handler(Link::fresh(stream)).instrument(info_span!("outbound_link", %peer_addr)));

        Ok(Bootstrapped::Connected {
            local_addr,
            peer_addr,
        })
    }

    async fn listen<F, Fut>(&self, address: &str, port_reuse: bool, handler: F) -> Result<Bootstrapped>
    where
        F: Fn(Link) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let addr = socket::resolve(address).await?;
        let listener = socket::bind(addr, port_reuse)?;
        let local_addr = listener.local_addr()?;
        info!(port_reuse, "Listening on {}", local_addr);

        let router = Arc::new(LinkRouter {
            feature: self.config.protocol_feature(),
            deadline: self.config.sniff_timeout(),
            local_port: local_addr.port(),
            dials: LocalDials::default(),
            handler,
        });
        let accept_loop = tokio::spawn(
            accept_loop(listener, router).instrument(info_span!("accept_loop", %local_addr)),
        );

        Ok(Bootstrapped::Listening {
            local_addr,
            accept_loop,
        })
    }
}

/// Per-listener routing state shared by every inbound link task
struct LinkRouter<F> {
    feature: ProtocolFeature,
    deadline: Duration,
    local_port: u16,
    dials: LocalDials,
    handler: F,
}

impl<F, Fut> LinkRouter<F>
where
    F: Fn(Link) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn route(&self, mut stream: TcpStream) {
        let result = sniff(&mut stream, &self.feature, self.deadline).await;

        if result.is_camouflage() {
            if result.timed_out {
                counter("sniff_timeouts_total").increment();
            }
            counter("links_camouflaged_total").increment();
            debug!(
                timed_out = result.timed_out,
                "Foreign traffic, relaying to local service"
            );
            camouflage::relay_tracked(&self.dials, stream, result.consumed, self.local_port).await;
        } else {
            counter("links_control_total").increment();
            info!("Control link established");
            (self.handler)(Link::new(result.consumed, stream)).await;
        }
    }
}

async fn accept_loop<F, Fut>(listener: TcpListener, router: Arc<LinkRouter<F>>)
where
    F: Fn(Link) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept error: {}", e);
                counter("accept_errors_total").increment();
                continue;
            }
        };
        counter("links_accepted_total").increment();
        debug!("New connection from {}", peer_addr);

        if router.dials.contains(peer_addr) {
            warn!(%peer_addr, "Camouflage target is this listener, dropping looped connection");
            counter("camouflage_loops_dropped_total").increment();
            continue;
        }

        let router = router.clone();
        tokio::spawn(
            async move { router.route(stream).await }
                .instrument(info_span!("inbound_link", %peer_addr)),
        );
    }
}
