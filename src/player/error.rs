use std::time::Duration;

use thiserror::Error;

use crate::model::{Screenshot, ScreenshotError};

/// Errors reported by an automation surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The debugger lost its attachment to the target; re-attaching may help.
    #[error("Target detached: {0}")]
    Detached(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),
    #[error("Target closed: {0}")]
    TargetClosed(String),
}

impl SurfaceError {
    pub fn is_detached(&self) -> bool {
        matches!(self, SurfaceError::Detached(_))
    }
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Command dispatch failed: {0}")]
    CommandDispatch(#[from] SurfaceError),
    #[error("No screenshot could be captured within {0:?}")]
    ScreenshotCaptureFailure(Duration),
    #[error(
        "Incorrect screenshot size: expected {}x{}, got {}x{}",
        expected.0,
        expected.1,
        actual.0,
        actual.1
    )]
    IncorrectScreenshotSize {
        expected: (u32, u32),
        actual: (u32, u32),
        /// Last wrong-size capture, kept so the failed step has imagery
        capture: Box<Screenshot>,
    },
    #[error("Viewport did not converge to {width}x{height} after {attempts} attempts")]
    ResizeViewport {
        width: u32,
        height: u32,
        attempts: u32,
    },
    #[error("Unresolved tab: {0}")]
    UnresolvedTab(u32),
    #[error("Image error: {0}")]
    Image(#[from] ScreenshotError),
    #[error("Malformed action: {0}")]
    Decode(String),
    #[error("Start index {start} is past the end of a {len}-step test")]
    InvalidStart { start: usize, len: usize },
}

impl PlayerError {
    /// Structural errors abort the whole replay. Everything else only fails
    /// the step it happened in.
    pub fn is_structural(&self) -> bool {
        !matches!(self, PlayerError::IncorrectScreenshotSize { .. })
    }

    /// The screenshot a step-level error was raised for, if any.
    pub fn into_capture(self) -> Option<Screenshot> {
        match self {
            PlayerError::IncorrectScreenshotSize { capture, .. } => Some(*capture),
            _ => None,
        }
    }
}

/// Outcome of one attempt at a surface call.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Worth retrying after re-attaching.
    Retryable(SurfaceError),
    Fatal(PlayerError),
}

impl<T> From<Result<T, SurfaceError>> for Attempt<T> {
    fn from(result: Result<T, SurfaceError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(error) if error.is_detached() => Attempt::Retryable(error),
            Err(error) => Attempt::Fatal(PlayerError::CommandDispatch(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_detach_is_retryable() {
        let detached: Attempt<()> = Err(SurfaceError::Detached("gone".into())).into();
        assert!(matches!(detached, Attempt::Retryable(_)));

        let protocol: Attempt<()> = Err(SurfaceError::Protocol("bad params".into())).into();
        assert!(matches!(
            protocol,
            Attempt::Fatal(PlayerError::CommandDispatch(SurfaceError::Protocol(_)))
        ));

        let ok: Attempt<u32> = Ok(3).into();
        assert!(matches!(ok, Attempt::Success(3)));
    }

    fn wrong_size(width: u32, height: u32) -> PlayerError {
        PlayerError::IncorrectScreenshotSize {
            expected: (800, 600),
            actual: (width, height),
            capture: Box::new(Screenshot::blank(width, height)),
        }
    }

    #[test]
    fn size_mismatch_is_the_only_step_level_error() {
        assert!(!wrong_size(790, 600).is_structural());
        assert!(PlayerError::UnresolvedTab(2).is_structural());
        assert!(PlayerError::ResizeViewport {
            width: 1,
            height: 1,
            attempts: 10
        }
        .is_structural());
    }

    #[test]
    fn size_mismatch_hands_back_its_capture() {
        let err = wrong_size(790, 600);
        assert_eq!(err.to_string(), "Incorrect screenshot size: expected 800x600, got 790x600");
        assert_eq!(err.into_capture().map(|shot| shot.dimensions()), Some((790, 600)));
        assert!(PlayerError::UnresolvedTab(2).into_capture().is_none());
    }
}
