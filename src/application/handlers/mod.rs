//! Profile handler interfaces
//!
//! One trait per profile and receiving role. Each lists the actions that
//! role accepts from its peer; an endpoint without a handler for a profile
//! answers that profile's actions with `NotSupported`.

pub mod central_system;
pub mod charge_point;

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::application::codec;
use crate::domain::{OcppError, OcppRequest};

pub use central_system::{CentralSystemCoreHandler, CentralSystemFirmwareHandler};
pub use charge_point::{
    ChargePointCoreHandler, ChargePointFirmwareHandler, ChargePointLocalAuthListHandler,
    ChargePointRemoteTriggerHandler, ChargePointReservationHandler,
    ChargePointSmartChargingHandler,
};

/// What a handler may fail with.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Answered with this exact OCPP error.
    #[error(transparent)]
    Ocpp(#[from] OcppError),

    /// Answered with `InternalError`.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<HandlerError> for OcppError {
    fn from(error: HandlerError) -> Self {
        match error {
            HandlerError::Ocpp(error) => error,
            HandlerError::Internal(message) => OcppError::internal(message),
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Decode `payload` as `R`, run `handle`, and encode its response.
pub async fn invoke<R, F, Fut>(payload: Value, handle: F) -> Result<Value, OcppError>
where
    R: OcppRequest,
    F: FnOnce(R) -> Fut,
    Fut: Future<Output = HandlerResult<R::Response>>,
{
    let request: R = codec::from_payload(payload)?;
    let response = handle(request).await.map_err(OcppError::from)?;
    codec::to_payload(&response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{ResetRequest, ResetRequestStatus, ResetResponse, ResetResponseStatus};
    use crate::domain::OcppErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn invoke_round_trips_through_the_handler() {
        let response = invoke::<ResetRequest, _, _>(json!({"type": "Hard"}), |request| async move {
            assert!(matches!(request.kind, ResetRequestStatus::Hard));
            Ok::<_, HandlerError>(ResetResponse {
                status: ResetResponseStatus::Accepted,
            })
        })
        .await
        .unwrap();
        assert_eq!(response, json!({"status": "Accepted"}));
    }

    #[tokio::test]
    async fn handler_errors_map_to_ocpp_codes() {
        let internal = invoke::<ResetRequest, _, _>(json!({"type": "Soft"}), |_| async {
            Err::<ResetResponse, _>(HandlerError::internal("relay stuck"))
        })
        .await
        .unwrap_err();
        assert_eq!(internal.code, OcppErrorCode::InternalError);
        assert_eq!(internal.description, "relay stuck");

        let typed = invoke::<ResetRequest, _, _>(json!({"type": "Soft"}), |_| async {
            Err::<ResetResponse, HandlerError>(OcppError::new(OcppErrorCode::SecurityError, "locked").into())
        })
        .await
        .unwrap_err();
        assert_eq!(typed.code, OcppErrorCode::SecurityError);
    }
}
