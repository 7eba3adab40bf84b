use thiserror::Error;

/// Errors produced by the revtun protocol layer.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("control frame error: {0}")]
    Frame(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("control channel closed")]
    ControlChannelClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type TunnelResult<T> = Result<T, TunnelError>;
