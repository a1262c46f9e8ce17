//! Endpoint facades
//!
//! Each facade owns a dispatcher, a feature registry, an error stream and
//! the transport for its role.

pub mod central_system;
pub mod charge_point;

pub use central_system::{CentralSystem, CentralSystemConfig};
pub use charge_point::{ChargePoint, ChargePointConfig};
