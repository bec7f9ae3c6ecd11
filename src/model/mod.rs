//! Recorded test data: actions, screenshots and the ordered test itself.

pub mod action;
pub mod screenshot;

pub use action::{
    Action, ActionType, Coordinates, EventPayload, KeyDirection, KeyStroke, MatchStatus,
    Modifiers, MouseButton, Rect, ScrollOrigin, ScrollPayload, TabViewport, WheelDelta,
    SYNTHETIC_EVENT_TIMESTAMP,
};
pub use screenshot::{Screenshot, ScreenshotError, ScreenshotRole};
pub use test::{Test, TestError};
