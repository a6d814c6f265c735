use thiserror::Error;

pub type SecsendResult<T> = Result<T, SecsendError>;

#[derive(Debug, Error)]
pub enum SecsendError {
    /// AEAD tag did not verify: wrong key, wrong chunk index, or corrupted data.
    #[error("authentication failed: wrong key or corrupted data")]
    AuthenticationFailure,

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("unsupported metadata version '{0}'")]
    UnsupportedVersion(u32),

    /// The key commitment stored with the transfer does not match the key in hand.
    #[error("invalid decryption key")]
    InvalidKey,

    /// User-initiated pause. Not a failure.
    #[error("transfer canceled")]
    Canceled,

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid ID '{0}'")]
    InvalidId(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SecsendError {
    /// Transient failures that leave the transfer resumable from the last stored byte.
    pub fn is_retryable(&self) -> bool {
        match self {
            SecsendError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, SecsendError::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    NotFound,
    /// The transfer is in a state that forbids the operation (complete, locked, exists).
    Conflict,
    LimitExceeded,
    Timeout,
    /// Network failure, server-side 5xx, or backend I/O failure.
    Unavailable,
    Invalid,
}

impl TransportErrorKind {
    /// HTTP-style status code for the kind.
    pub fn status(self) -> u16 {
        match self {
            TransportErrorKind::NotFound => 404,
            TransportErrorKind::Conflict => 409,
            TransportErrorKind::LimitExceeded => 413,
            TransportErrorKind::Timeout => 408,
            TransportErrorKind::Unavailable => 503,
            TransportErrorKind::Invalid => 400,
        }
    }
}

#[derive(Debug, Error)]
#[error("transport error ({status}): {message}", status = .kind.status())]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unavailable, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Invalid, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::Unavailable
        )
    }
}
