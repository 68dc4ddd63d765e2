use thiserror::Error;

#[derive(Debug, Error)]
pub enum WheelError {
    /// Nobody is consuming radio requests any more
    #[error("radio request channel closed")]
    RadioClosed,

    #[error("invalid capture line {line}: {reason}")]
    InvalidCapture { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WheelError>;
