//! Protocol-level domain types: error codes, endpoint roles and the typed
//! OCPP 1.6 message catalog.

pub mod error;
pub mod messages;
pub mod role;

pub use error::{OcppError, OcppErrorCode};
pub use messages::{OcppPayload, OcppRequest};
pub use role::Role;
