//! Replay side: drive a live browser through a recorded test.

pub mod engine;
pub mod error;
pub mod mock;
pub mod surface;
pub mod tabs;
pub mod verify;

pub use engine::{plan, PlayOutcome, Player, ReplayCommand};
pub use error::{Attempt, PlayerError, SurfaceError};
pub use mock::{MockSurface, SurfaceCall};
pub use surface::{
    AutomationSurface, InputCommand, KeyEventKind, KeyEventParams, MouseEventKind,
    MouseEventParams, TargetHandle, ViewportMetrics, WindowSize, SYNTHETIC_EVENT_TIMESTAMP,
};
pub use tabs::{VirtualTab, VirtualTabRegistry};
pub use verify::{CancelFlag, ScreenshotVerifier, VerifyOutcome};
