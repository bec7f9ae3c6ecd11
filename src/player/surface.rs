//! The automation surface replay drives, and the low-level commands it takes.
//!
//! Commands mirror the debugger protocol's input domain (`dispatchKeyEvent`,
//! `dispatchMouseEvent`) plus two page-side helpers for scroll offsets and
//! synthetic `change` events. A concrete binding serializes them as-is.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::model::SYNTHETIC_EVENT_TIMESTAMP;
use crate::model::{Coordinates, KeyStroke, Modifiers, MouseButton};
use crate::player::error::SurfaceError;

/// Identifier the host assigned to a live target. Changes whenever the tab
/// is recreated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetHandle(String);

impl TargetHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inner (content) size of a target's viewport, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportMetrics {
    pub width: u32,
    pub height: u32,
}

/// Outer size of the browser window hosting a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventKind {
    KeyDown,
    Char,
    KeyUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEventParams {
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
    pub key: String,
    pub code: String,
    pub windows_virtual_key_code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub modifiers: Modifiers,
    pub timestamp: f64,
}

impl KeyEventParams {
    pub fn from_stroke(kind: KeyEventKind, stroke: &KeyStroke) -> Self {
        let text = (kind == KeyEventKind::Char).then(|| stroke.key.clone());
        Self {
            kind,
            key: stroke.key.clone(),
            code: stroke.code.clone(),
            windows_virtual_key_code: stroke.key_code,
            text,
            modifiers: stroke.modifiers,
            timestamp: SYNTHETIC_EVENT_TIMESTAMP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventKind {
    MousePressed,
    MouseReleased,
    MouseMoved,
    MouseWheel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseEventParams {
    #[serde(rename = "type")]
    pub kind: MouseEventKind,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<MouseButton>,
    /// Pressed buttons: left=1, right=2, middle=4
    pub buttons: u8,
    pub click_count: u32,
    pub delta_x: f64,
    pub delta_y: f64,
    pub modifiers: Modifiers,
    pub timestamp: f64,
}

impl MouseEventParams {
    pub fn new(kind: MouseEventKind, at: Coordinates) -> Self {
        Self {
            kind,
            x: at.x,
            y: at.y,
            button: None,
            buttons: 0,
            click_count: 0,
            delta_x: 0.0,
            delta_y: 0.0,
            modifiers: Modifiers::NONE,
            timestamp: SYNTHETIC_EVENT_TIMESTAMP,
        }
    }

    pub fn moved(at: Coordinates) -> Self {
        Self::new(MouseEventKind::MouseMoved, at)
    }

    pub fn pressed(at: Coordinates, button: MouseButton, click_count: u32) -> Self {
        Self {
            button: Some(button),
            buttons: button_bit(button),
            click_count,
            ..Self::new(MouseEventKind::MousePressed, at)
        }
    }

    pub fn released(at: Coordinates, button: MouseButton, click_count: u32) -> Self {
        Self {
            button: Some(button),
            click_count,
            ..Self::new(MouseEventKind::MouseReleased, at)
        }
    }

    pub fn wheel(at: Coordinates, delta_x: f64, delta_y: f64) -> Self {
        Self {
            delta_x,
            delta_y,
            ..Self::new(MouseEventKind::MouseWheel, at)
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

fn button_bit(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 1,
        MouseButton::Right => 2,
        MouseButton::Middle => 4,
    }
}

/// One low-level input command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum InputCommand {
    DispatchKeyEvent(KeyEventParams),
    DispatchMouseEvent(MouseEventParams),
    /// Assign scroll offsets to the scrollable element under `(x, y)`.
    ScrollElement {
        x: f64,
        y: f64,
        top: Option<f64>,
        left: Option<f64>,
        timestamp: f64,
    },
    /// Set the value of the control under `(x, y)` and fire `change` on it.
    DispatchChange {
        x: f64,
        y: f64,
        value: String,
        timestamp: f64,
    },
}

impl InputCommand {
    pub fn timestamp(&self) -> f64 {
        match self {
            InputCommand::DispatchKeyEvent(params) => params.timestamp,
            InputCommand::DispatchMouseEvent(params) => params.timestamp,
            InputCommand::ScrollElement { timestamp, .. }
            | InputCommand::DispatchChange { timestamp, .. } => *timestamp,
        }
    }
}

/// The debugger/automation contract replay runs against.
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    async fn attach(&self, target: &TargetHandle) -> Result<(), SurfaceError>;

    async fn detach(&self, target: &TargetHandle) -> Result<(), SurfaceError>;

    async fn dispatch(
        &self,
        target: &TargetHandle,
        command: &InputCommand,
    ) -> Result<(), SurfaceError>;

    /// Navigate and wait until the navigation has committed.
    async fn navigate(&self, target: &TargetHandle, url: &str) -> Result<(), SurfaceError>;

    /// Open a new target showing `url`.
    async fn create_target(&self, url: &str) -> Result<TargetHandle, SurfaceError>;

    async fn close_target(&self, target: &TargetHandle) -> Result<(), SurfaceError>;

    /// Base64-encoded PNG of the visible viewport.
    async fn capture_screenshot(&self, target: &TargetHandle) -> Result<String, SurfaceError>;

    async fn measure_viewport(&self, target: &TargetHandle)
        -> Result<ViewportMetrics, SurfaceError>;

    async fn window_size(&self, target: &TargetHandle) -> Result<WindowSize, SurfaceError>;

    async fn set_window_size(
        &self,
        target: &TargetHandle,
        size: WindowSize,
    ) -> Result<(), SurfaceError>;

    async fn set_zoom(&self, target: &TargetHandle, zoom_factor: f64) -> Result<(), SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_in_protocol_shape() {
        let press = InputCommand::DispatchMouseEvent(MouseEventParams::pressed(
            Coordinates::new(100.0, 50.0),
            MouseButton::Left,
            1,
        ));
        let json = serde_json::to_value(&press).unwrap();
        assert_eq!(json["method"], "dispatchMouseEvent");
        assert_eq!(json["params"]["type"], "mousePressed");
        assert_eq!(json["params"]["button"], "left");
        assert_eq!(json["params"]["buttons"], 1);
        assert_eq!(json["params"]["clickCount"], 1);
        assert_eq!(json["params"]["timestamp"], SYNTHETIC_EVENT_TIMESTAMP);
    }

    #[test]
    fn page_side_helpers_carry_the_timestamp() {
        let change = InputCommand::DispatchChange {
            x: 1.0,
            y: 2.0,
            value: "blue".into(),
            timestamp: SYNTHETIC_EVENT_TIMESTAMP,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["method"], "dispatchChange");
        assert_eq!(json["params"]["timestamp"], SYNTHETIC_EVENT_TIMESTAMP);
        assert_eq!(change.timestamp(), SYNTHETIC_EVENT_TIMESTAMP);
    }

    #[test]
    fn char_events_carry_text() {
        let stroke = KeyStroke::down("q", "KeyQ", 81);
        let down = KeyEventParams::from_stroke(KeyEventKind::KeyDown, &stroke);
        let typed = KeyEventParams::from_stroke(KeyEventKind::Char, &stroke);
        assert_eq!(down.text, None);
        assert_eq!(typed.text.as_deref(), Some("q"));
        assert_eq!(typed.windows_virtual_key_code, 81);
    }
}
