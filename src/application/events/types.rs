use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::OcppError;

/// A failure the dispatch engine observed outside of any caller's request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorEvent {
    /// An inbound frame could not be accepted; the peer received a CALLERROR
    /// when the frame carried a usable id.
    #[error("rejected frame from {channel}: {error}")]
    Codec {
        channel: String,
        unique_id: Option<String>,
        error: OcppError,
    },

    /// A CALLRESULT or CALLERROR arrived for a request that is not pending.
    #[error("orphan response {unique_id} from {channel}")]
    OrphanResponse { channel: String, unique_id: String },

    /// A handler failed, or produced a response that did not validate.
    #[error("{action} handler failed for {channel}: {error}")]
    HandlerFailed {
        channel: String,
        action: String,
        error: OcppError,
    },

    /// A frame could not be written.
    #[error("failed to send {action} to {channel}: {reason}")]
    SendFailed {
        channel: String,
        action: String,
        reason: String,
    },

    /// A request received no response within its deadline.
    #[error("{action} ({unique_id}) to {channel} timed out")]
    TimedOut {
        channel: String,
        action: String,
        unique_id: String,
    },

    /// A connection went away; `drained` requests were cancelled.
    #[error("{channel} disconnected, {drained} request(s) cancelled")]
    Disconnected { channel: String, drained: usize },
}

impl ErrorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Codec { .. } => "codec",
            Self::OrphanResponse { .. } => "orphan_response",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::SendFailed { .. } => "send_failed",
            Self::TimedOut { .. } => "timed_out",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Self::Codec { channel, .. }
            | Self::OrphanResponse { channel, .. }
            | Self::HandlerFailed { channel, .. }
            | Self::SendFailed { channel, .. }
            | Self::TimedOut { channel, .. }
            | Self::Disconnected { channel, .. } => channel,
        }
    }
}

/// An event stamped with the time it was published.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub timestamp: DateTime<Utc>,
    pub event: ErrorEvent,
}

impl EventMessage {
    pub fn new(event: ErrorEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
