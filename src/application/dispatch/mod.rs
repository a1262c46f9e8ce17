//! Request dispatch: callback queue, pending-request table and the engine
//! that ties them to a transport.

pub mod callback_queue;
pub mod dispatcher;
pub mod errors;
pub mod pending;

pub use callback_queue::CallbackQueue;
pub use dispatcher::{Dispatcher, DispatcherConfig, ResponseSink, CHARGE_POINT_CHANNEL};
pub use errors::RequestError;
pub use pending::{PendingRequest, PendingTable};
