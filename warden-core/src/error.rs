use thiserror::Error;

/// All errors produced by warden-core.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("segmenter is already listening")]
    AlreadyListening,

    #[error("segmenter is not listening")]
    NotListening,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session does not accept audio frames (VAD disabled)")]
    VadDisabled,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("delivery queue is full — record dropped")]
    QueueFull,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("command bus error: {0}")]
    CommandBus(String),

    #[error("remote sink error: {0}")]
    RemoteSink(String),

    #[error("malformed message on topic {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    #[error("invalid alert transition: {0}")]
    AlertTransition(String),

    #[error("alert not found: {0}")]
    AlertNotFound(String),

    #[error("service is already running")]
    AlreadyRunning,

    #[error("service is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
