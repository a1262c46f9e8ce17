pub mod codec;
pub mod configuration;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod ports;
pub mod registry;

// Re-export key types for convenience
pub use configuration::ConfigurationStore;
pub use dispatch::{Dispatcher, DispatcherConfig, RequestError, ResponseSink};
pub use events::{ErrorEvent, EventBus, EventSubscriber, SharedEventBus};
pub use handlers::{HandlerError, HandlerResult};
pub use ports::{InboundRouter, OutboundTransport};
pub use registry::{Feature, FeatureRegistry, Origin, Profile};
