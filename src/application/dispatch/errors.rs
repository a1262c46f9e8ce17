use thiserror::Error;

use crate::domain::{OcppError, OcppErrorCode, Role};

/// Everything the originator of an outgoing request may observe instead of
/// a response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("unsupported action {action} on {role}")]
    Unsupported { action: String, role: Role },

    #[error("invalid {action} request: {error}")]
    Validation { action: String, error: OcppError },

    #[error("request queue for {channel} is full")]
    QueueFull { channel: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("{action} timed out, no response received")]
    Timeout { action: String },

    #[error("client disconnected, no response received")]
    Disconnected,

    #[error("stopped")]
    Stopped,

    #[error("{0}")]
    CallError(OcppError),

    #[error("invalid response: {0}")]
    InvalidResponse(OcppError),
}

impl RequestError {
    /// The OCPP error code equivalent of this failure.
    pub fn code(&self) -> OcppErrorCode {
        match self {
            Self::Unsupported { .. } => OcppErrorCode::NotSupported,
            Self::Validation { error, .. } => error.code,
            Self::CallError(error) | Self::InvalidResponse(error) => error.code,
            Self::QueueFull { .. }
            | Self::SendFailed(_)
            | Self::Timeout { .. }
            | Self::Disconnected
            | Self::Stopped => OcppErrorCode::GenericError,
        }
    }

    /// Short label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Unsupported { .. } => "unsupported",
            Self::Validation { .. } => "invalid",
            Self::QueueFull { .. } => "queue_full",
            Self::SendFailed(_) => "send_failed",
            Self::Timeout { .. } => "timeout",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
            Self::CallError(_) => "call_error",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_failures_report_generic_error() {
        assert_eq!(RequestError::Disconnected.code(), OcppErrorCode::GenericError);
        assert_eq!(RequestError::Stopped.code(), OcppErrorCode::GenericError);
        assert_eq!(
            RequestError::Timeout { action: "GetConfiguration".into() }.code(),
            OcppErrorCode::GenericError
        );
    }

    #[test]
    fn unsupported_message_names_action_and_role() {
        let error = RequestError::Unsupported {
            action: "ChangeAvailability".into(),
            role: Role::ChargePoint,
        };
        assert_eq!(error.to_string(), "unsupported action ChangeAvailability on charge point");
        assert_eq!(error.code(), OcppErrorCode::NotSupported);
    }

    #[test]
    fn call_errors_keep_the_peer_code() {
        let error = RequestError::CallError(OcppError::new(OcppErrorCode::NotSupported, "nope"));
        assert_eq!(error.code(), OcppErrorCode::NotSupported);
        assert_eq!(error.to_string(), "NotSupported: nope");
    }
}
