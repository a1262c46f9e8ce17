use crate::support::errors::TransportError;

/// Writes one text frame on a logical channel.
///
/// Implementations must not block: the dispatch engine calls `write` while
/// holding its per-channel lock.
pub trait OutboundTransport: Send + Sync + 'static {
    fn write(&self, channel: &str, frame: String) -> Result<(), TransportError>;
}
