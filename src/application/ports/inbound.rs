use async_trait::async_trait;
use serde_json::Value;

use crate::domain::OcppError;

/// Routes a validated inbound CALL to the handler registered for its
/// profile.
///
/// Returns the response payload, or the OCPP error to answer with
/// (`NotSupported` when no handler is set for the profile, `NotImplemented`
/// when the handler does not accept the action).
#[async_trait]
pub trait InboundRouter: Send + Sync + 'static {
    async fn route(
        &self,
        channel: &str,
        profile: &'static str,
        action: &str,
        payload: Value,
    ) -> Result<Value, OcppError>;
}
