//! Control-protocol detection on freshly accepted links
//!
//! A mesh peer always opens with a fixed marker. Anything else, including a
//! client that waits for the server to speak first, is treated as traffic
//! for the real service sharing the port. The classification is a
//! best-effort heuristic bounded by a deadline, not a protocol guarantee.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::stream::{StreamUtils, is_connection_closed_error};

/// Marker a mesh peer sends as the first bytes of a control link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFeature(Bytes);

impl ProtocolFeature {
    pub fn new(marker: impl Into<Bytes>) -> Self {
        Self(marker.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Exact comparison against a complete prefix
    pub fn matches(&self, prefix: &[u8]) -> bool {
        self.0.as_ref() == prefix
    }
}

/// Outcome of sniffing one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffResult {
    /// The full marker was read and did not match, or the read failed
    pub is_application_protocol: bool,
    /// Exactly the bytes taken off the wire, never more than the marker length
    pub consumed: Bytes,
    /// The peer did not deliver the full marker before the deadline
    pub timed_out: bool,
}

impl SniffResult {
    /// Whether the link belongs to the service sharing the port
    pub const fn is_camouflage(&self) -> bool {
        self.is_application_protocol || self.timed_out
    }

    /// Whether the link is a mesh control-protocol peer
    pub const fn is_control(&self) -> bool {
        !self.is_camouflage()
    }
}

/// Classify a link by its first bytes
///
/// Reads up to `feature.len()` bytes within `deadline`. The deadline only
/// applies to this call; the stream carries no timeout afterwards.
pub async fn sniff<S>(stream: &mut S, feature: &ProtocolFeature, deadline: Duration) -> SniffResult
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; feature.len()];
    let mut filled = 0;

    let outcome = timeout(
        deadline,
        StreamUtils::read_full(stream, &mut buf, &mut filled),
    )
    .await;

    buf.truncate(filled);
    let consumed = Bytes::from(buf);

    match outcome {
        Ok(Ok(())) => {
            let is_control = feature.matches(&consumed);
            debug!(is_control, "Sniffed {} bytes", consumed.len());
            SniffResult {
                is_application_protocol: !is_control,
                consumed,
                timed_out: false,
            }
        }
        Ok(Err(e)) => {
            if is_connection_closed_error(&e) {
                debug!("Peer closed while sniffing after {} bytes: {}", filled, e);
            } else {
                warn!("Read protocol marker error after {} bytes: {}", filled, e);
            }
            SniffResult {
                is_application_protocol: true,
                consumed,
                timed_out: false,
            }
        }
        Err(_) => {
            debug!(
                "No marker within {:?}, {} bytes consumed",
                deadline,
                consumed.len()
            );
            SniffResult {
                is_application_protocol: false,
                consumed,
                timed_out: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn marker() -> ProtocolFeature {
        ProtocolFeature::new(Bytes::from_static(b"ABCDEFGH"))
    }

    #[tokio::test]
    async fn test_marker_is_control() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"ABCDEFGHtrailing").await.unwrap();

        let result = sniff(&mut server, &marker(), Duration::from_secs(1)).await;
        assert!(!result.is_application_protocol);
        assert!(!result.timed_out);
        assert!(result.is_control());
        assert_eq!(&result.consumed[..], b"ABCDEFGH");
    }

    #[tokio::test]
    async fn test_other_bytes_are_application() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let result = sniff(&mut server, &marker(), Duration::from_secs(1)).await;
        assert!(result.is_application_protocol);
        assert!(!result.timed_out);
        assert!(result.is_camouflage());
        assert_eq!(&result.consumed[..], b"GET / HT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_with_nothing_consumed() {
        let (_client, mut server) = tokio::io::duplex(64);

        let result = sniff(&mut server, &marker(), Duration::from_secs(5)).await;
        assert!(result.timed_out);
        assert!(!result.is_application_protocol);
        assert!(result.consumed.is_empty());
        assert!(result.is_camouflage());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_marker_times_out_keeping_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"ABC").await.unwrap();

        let result = sniff(&mut server, &marker(), Duration::from_secs(5)).await;
        assert!(result.timed_out);
        assert_eq!(&result.consumed[..], b"ABC");
    }

    #[tokio::test]
    async fn test_early_close_is_application() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"ABCD").await.unwrap();
        drop(client);

        let result = sniff(&mut server, &marker(), Duration::from_secs(1)).await;
        assert!(result.is_application_protocol);
        assert!(!result.timed_out);
        assert_eq!(&result.consumed[..], b"ABCD");
    }

    #[tokio::test]
    async fn test_stream_continues_after_marker() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"ABCDEFGHpayload").await.unwrap();
        drop(client);

        let result = sniff(&mut server, &marker(), Duration::from_secs(1)).await;
        assert!(result.is_control());

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"payload");
    }
}
