use thiserror::Error;

/// User errors raised while capturing. They are reported to the human as a
/// [`crate::capture::CaptureEffect::UserError`] and never leave the capture
/// layer as `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureProtocolError {
    /// Capture state was reset; recording continues.
    #[error("Recoverable capture error: {0}")]
    Recoverable(String),
    /// Recording stopped; the human has to resynchronize by hand.
    #[error("Unrecoverable capture error: {0}")]
    Unrecoverable(String),
}

impl CaptureProtocolError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureProtocolError::Recoverable(_))
    }
}
