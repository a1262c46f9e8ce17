pub mod errors;
pub mod logging;
pub mod ocpp_frame;
pub mod shutdown;
pub mod time;
