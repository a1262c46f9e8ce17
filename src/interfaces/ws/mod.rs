//! WebSocket transport
//!
//! - `server`: central-system listener, one link per charge point
//! - `client`: charge-point link with reconnect supervision
//! - `session`: connection set of the server
//! - `negotiator`: subprotocol negotiation
//! - `transport`: lifecycle upcalls and the shared per-link loop
//! - `backoff`: reconnect delays

pub mod backoff;
pub mod client;
pub mod negotiator;
pub mod server;
pub mod session;
pub mod transport;

pub use backoff::Backoff;
pub use client::{ClientConfig, WsClient};
pub use negotiator::{ProtocolNegotiator, OCPP16};
pub use server::{OcppServer, ServerConfig};
pub use session::{SessionRegistry, SharedSessionRegistry};
pub use transport::{ChannelInfo, ConnectionHandler, DisconnectCause, Liveness};
