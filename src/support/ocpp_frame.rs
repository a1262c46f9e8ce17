//! OCPP-J envelopes
//!
//! A message is a JSON array tagged by its first element:
//!
//! - CALL       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - CALLRESULT `[3, "<uniqueId>", {<payload>}]`
//! - CALLERROR  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::{OcppError, OcppErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    fn from_tag(tag: u64) -> Result<Self, FrameError> {
        match tag {
            2 => Ok(Self::Call),
            3 => Ok(Self::CallResult),
            4 => Ok(Self::CallError),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Elements a well-formed envelope of this type carries at least.
    fn min_len(self) -> usize {
        match self {
            Self::Call | Self::CallError => 4,
            Self::CallResult => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn text_at<'a>(elements: &'a [Value], index: usize, what: &'static str) -> Result<&'a str, FrameError> {
    elements[index].as_str().ok_or(FrameError::FieldTypeMismatch(what))
}

impl OcppFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let elements = value.as_array().ok_or(FrameError::NotAnArray)?;
        let tag = elements
            .first()
            .ok_or(FrameError::EmptyArray)?
            .as_u64()
            .ok_or(FrameError::InvalidMessageType)?;

        let kind = MessageType::from_tag(tag)?;
        if elements.len() < kind.min_len() {
            return Err(FrameError::MissingFields {
                expected: kind.min_len(),
                got: elements.len(),
            });
        }

        let unique_id = text_at(elements, 1, "uniqueId must be a string")?;
        if unique_id.is_empty() {
            return Err(FrameError::FieldTypeMismatch("uniqueId must not be empty"));
        }
        let unique_id = unique_id.to_string();

        match kind {
            MessageType::Call => {
                let action = text_at(elements, 2, "action must be a string")?.to_string();
                let payload = elements[3].clone();
                if !payload.is_object() {
                    return Err(FrameError::FieldTypeMismatch("payload must be an object"));
                }
                Ok(Self::Call {
                    unique_id,
                    action,
                    payload,
                })
            }
            // Some stations send `null` for empty responses.
            MessageType::CallResult => Ok(Self::CallResult {
                unique_id,
                payload: match &elements[2] {
                    Value::Null => empty_object(),
                    other => other.clone(),
                },
            }),
            MessageType::CallError => Ok(Self::CallError {
                unique_id,
                error_code: text_at(elements, 2, "errorCode must be a string")?.to_string(),
                error_description: elements[3].as_str().unwrap_or_default().to_string(),
                error_details: elements.get(4).cloned().unwrap_or_else(empty_object),
            }),
        }
    }

    /// Message type of a frame that may not parse as a whole.
    pub fn peek_message_type(text: &str) -> Option<MessageType> {
        let value: Value = serde_json::from_str(text).ok()?;
        let tag = value.as_array()?.first()?.as_u64()?;
        MessageType::from_tag(tag).ok()
    }

    /// The unique id of a frame that failed to parse, if one can be read,
    /// so the CALLERROR can still be addressed.
    pub fn peek_unique_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        let id = value.as_array()?.get(1)?.as_str()?;
        (!id.is_empty()).then(|| id.to_string())
    }

    pub fn serialize(&self) -> String {
        let envelope = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([MessageType::Call as u8, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => {
                json!([MessageType::CallResult as u8, unique_id, payload])
            }
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MessageType::CallError as u8,
                unique_id,
                error_code,
                error_description,
                error_details
            ]),
        };
        envelope.to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// CALLERROR answering `unique_id` with `error`.
    pub fn error_response(unique_id: impl Into<String>, error: &OcppError) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error.code.as_str().to_string(),
            error_description: error.description.clone(),
            error_details: error.details.clone(),
        }
    }

    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("OCPP message is not a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

impl FrameError {
    /// Code reported to the peer: unparsable JSON is a `ProtocolError`,
    /// anything structurally wrong a `FormationViolation`.
    pub fn code(&self) -> OcppErrorCode {
        match self {
            Self::InvalidJson(_) => OcppErrorCode::ProtocolError,
            _ => OcppErrorCode::FormationViolation,
        }
    }

    pub fn to_ocpp_error(&self) -> OcppError {
        OcppError::new(self.code(), self.to_string())
    }
}
