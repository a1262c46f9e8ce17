//! Boundaries between the dispatch engine and the rest of the system
//!
//! The outbound port is how the engine writes frames; the inbound port is
//! how it hands CALLs over to the endpoint that owns the profile handlers.

pub mod inbound;
pub mod outbound;

pub use inbound::InboundRouter;
pub use outbound::OutboundTransport;
