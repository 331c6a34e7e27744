use thiserror::Error;

/// Main error type for OSDP operations
#[derive(Error, Debug)]
pub enum OsdpError {
    #[error("Channel error: {0}")]
    Channel(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("Security error: {0}")]
    Security(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout")]
    Timeout,

    #[error("Unknown device index: {0}")]
    UnknownDevice(usize),
}

/// Result type alias for OSDP operations
pub type OsdpResult<T> = Result<T, OsdpError>;
