//! # OCPP Runtime
//!
//! OCPP 1.6 (OCPP-J) request/response runtime for both ends of the link:
//! a Central System that accepts many charge points and a Charge Point
//! client that keeps one link alive.
//!
//! ## Architecture
//!
//! - **domain**: message catalog, error codes, endpoint roles
//! - **application**: feature registry, dispatcher, handler traits, error stream
//! - **interfaces**: WebSocket server and client
//! - **endpoints**: `CentralSystem` and `ChargePoint` facades
//! - **support**: frames, timestamps, shutdown, logging

pub mod application;
pub mod config;
pub mod domain;
pub mod endpoints;
pub mod interfaces;
pub mod support;

pub use config::{default_config_path, AppConfig};
pub use endpoints::{CentralSystem, CentralSystemConfig, ChargePoint, ChargePointConfig};

pub use application::{ErrorEvent, EventSubscriber, HandlerError, HandlerResult, RequestError};
pub use interfaces::ws::{ChannelInfo, ClientConfig, ServerConfig};
