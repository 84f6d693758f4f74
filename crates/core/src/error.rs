/// Result alias that carries the custom [`MotionAudioError`] type.
pub type Result<T> = std::result::Result<T, MotionAudioError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MotionAudioError {
    /// The caller handed over data that breaks a contract (mismatched bitmap
    /// dimensions, out-of-range directive fields, ...). Never recovered
    /// internally.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A scene-hint request failed or timed out. The tracking session
    /// recovers from this locally with a low-confidence fallback hint.
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    /// The audio destination could not be opened or resumed. Fatal for the
    /// current session.
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
    /// Free-form failure, mostly poisoned shared state.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON in configuration or scene-hint payloads.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Failure inside the spectrum analyser.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl MotionAudioError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn output_unavailable<T: Into<String>>(msg: T) -> Self {
        Self::OutputUnavailable(msg.into())
    }

    pub fn collaborator_unavailable<T: Into<String>>(msg: T) -> Self {
        Self::CollaboratorUnavailable(msg.into())
    }
}

impl From<&str> for MotionAudioError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MotionAudioError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
