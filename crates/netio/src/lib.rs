//! Burrow link layer
//!
//! Establishes raw byte-stream links between mesh nodes and lets a listening
//! node share its port with a real service:
//! - [`TransportBootstrap`] dials or listens, sniffing every inbound link
//! - [`sniff`] separates control-protocol peers from foreign clients
//! - [`camouflage::relay`] splices foreign clients onto the local service
//! - [`ConnectionAdmission`] caps concurrent inbound links per peer node

pub mod admission;
pub mod bootstrap;
pub mod camouflage;
pub mod config;
pub mod error;
pub mod role;
pub mod sniff;
pub mod socket;
pub mod stream;

pub use admission::{AdmissionToken, ConnectionAdmission, PeerNodeId};
pub use bootstrap::{Bootstrapped, TransportBootstrap};
pub use config::NetConfig;
pub use error::{NetError, Result};
pub use role::Role;
pub use sniff::{ProtocolFeature, SniffResult, sniff};
pub use stream::{Link, StreamUtils};
