//! Background failure events (pub/sub)
//!
//! The dispatch engine reports failures that have no caller waiting on them
//! (malformed inbound frames, orphan responses, failing handlers, dropped
//! connections) on an [`EventBus`]. Each endpoint exposes it as its error
//! stream.

pub mod event_bus;
pub mod types;

pub use event_bus::{EventBus, EventSubscriber, SharedEventBus};
pub use types::{ErrorEvent, EventMessage};
