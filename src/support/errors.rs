use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel {0} is not connected")]
    NotConnected(String),

    #[error("Channel {0} is closed for writing")]
    ChannelClosed(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Channel {0} is already connected")]
    DuplicateChannel(String),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Transport already started")]
    AlreadyStarted,

    #[error("Endpoint stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
