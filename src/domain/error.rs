//! OCPP-J error codes and the typed error carried by a CALLERROR.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error codes allowed in the `errorCode` field of a CALLERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppErrorCode {
    /// Requested action is not known by the receiver.
    NotImplemented,
    /// Requested action is recognized but not supported by the receiver.
    NotSupported,
    /// An internal error occurred while processing the action.
    InternalError,
    /// Payload for the action is incomplete.
    ProtocolError,
    /// The action could not be processed due to a security issue.
    SecurityError,
    /// Payload is syntactically incorrect or does not conform to the PDU structure.
    FormationViolation,
    /// A field contains an invalid value.
    PropertyConstraintViolation,
    /// A field violates occurrence constraints.
    OccurrenceConstraintViolation,
    /// A field violates data type constraints.
    TypeConstraintViolation,
    /// Any other error.
    GenericError,
}

impl OcppErrorCode {
    pub const ALL: &'static [OcppErrorCode] = &[
        Self::NotImplemented,
        Self::NotSupported,
        Self::InternalError,
        Self::ProtocolError,
        Self::SecurityError,
        Self::FormationViolation,
        Self::PropertyConstraintViolation,
        Self::OccurrenceConstraintViolation,
        Self::TypeConstraintViolation,
        Self::GenericError,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for OcppErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcppErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown OCPP error code: {}", s))
    }
}

/// An OCPP-level error: either received in a CALLERROR, or produced locally
/// to be sent as one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct OcppError {
    pub code: OcppErrorCode,
    pub description: String,
    pub details: Value,
}

impl OcppError {
    pub fn new(code: OcppErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Build from the raw fields of a received CALLERROR. Unknown codes are
    /// reported as `GenericError`; details are discarded.
    pub fn from_wire(code: &str, description: &str) -> Self {
        let code = code.parse().unwrap_or(OcppErrorCode::GenericError);
        Self::new(code, description)
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new(
            OcppErrorCode::NotImplemented,
            format!("unsupported action {}", action),
        )
    }

    pub fn not_supported(action: &str, profile: &str) -> Self {
        Self::new(
            OcppErrorCode::NotSupported,
            format!("no handler for profile {} (action {})", profile, action),
        )
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(OcppErrorCode::InternalError, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_strings() {
        for code in OcppErrorCode::ALL {
            assert_eq!(code.as_str().parse::<OcppErrorCode>(), Ok(*code));
        }
        assert!("Bogus".parse::<OcppErrorCode>().is_err());
    }

    #[test]
    fn unknown_wire_code_becomes_generic() {
        let error = OcppError::from_wire("SomethingElse", "boom");
        assert_eq!(error.code, OcppErrorCode::GenericError);
        assert_eq!(error.to_string(), "GenericError: boom");
    }
}
