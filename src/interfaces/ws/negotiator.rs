//! OCPP subprotocol negotiation
//!
//! During the WebSocket handshake the charge point advertises which OCPP
//! subprotocols it speaks via the `Sec-WebSocket-Protocol` header. The
//! negotiator picks the first one, in the server's preference order, that
//! the charge point offered.

/// The OCPP-J 1.6 subprotocol name.
pub const OCPP16: &str = "ocpp1.6";

#[derive(Debug, Clone)]
pub struct ProtocolNegotiator {
    /// Subprotocols the server accepts, in preference order.
    supported: Vec<String>,
}

impl ProtocolNegotiator {
    /// `ocpp1.6` is always accepted, appended last when missing.
    pub fn new(supported: Vec<String>) -> Self {
        let mut supported: Vec<String> = supported
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if !supported.iter().any(|p| p == OCPP16) {
            supported.push(OCPP16.to_string());
        }
        Self { supported }
    }

    /// Negotiate from the raw `Sec-WebSocket-Protocol` header value.
    pub fn negotiate(&self, requested_protocols: &str) -> Option<&str> {
        let requested: Vec<&str> = requested_protocols.split(',').map(str::trim).collect();

        self.supported
            .iter()
            .find(|protocol| requested.contains(&protocol.as_str()))
            .map(String::as_str)
    }

    pub fn supported_subprotocols(&self) -> &[String] {
        &self.supported
    }
}

impl Default for ProtocolNegotiator {
    fn default() -> Self {
        Self::new(vec![OCPP16.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_single_match() {
        let negotiator = ProtocolNegotiator::default();
        assert_eq!(negotiator.negotiate("ocpp1.6"), Some(OCPP16));
    }

    #[test]
    fn negotiate_prefers_server_order() {
        let negotiator = ProtocolNegotiator::new(vec!["ocpp1.6j".into(), OCPP16.into()]);
        assert_eq!(negotiator.negotiate("ocpp1.6, ocpp1.6j"), Some("ocpp1.6j"));
        assert_eq!(negotiator.negotiate("ocpp2.0.1,ocpp1.6"), Some(OCPP16));
    }

    #[test]
    fn negotiate_no_match() {
        let negotiator = ProtocolNegotiator::default();
        assert_eq!(negotiator.negotiate("ocpp2.0.1"), None);
        assert_eq!(negotiator.negotiate(""), None);
    }

    #[test]
    fn ocpp16_is_always_supported() {
        let negotiator = ProtocolNegotiator::new(vec!["ocpp1.5".into()]);
        assert_eq!(negotiator.supported_subprotocols(), ["ocpp1.5", OCPP16]);
    }
}
