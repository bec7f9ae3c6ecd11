use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::screenshot::{Screenshot, ScreenshotRole};

/// Timestamp carried by every replayed input event, so page-side observers
/// can tell replay apart from human input.
pub const SYNTHETIC_EVENT_TIMESTAMP: f64 = 424_242.0;

/// Kind of recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Goto,
    Close,
    Click,
    Dblclick,
    Contextmenu,
    Keydown,
    Keyup,
    Keys,
    Change,
    Scroll,
    Wheel,
    Wheels,
    Mousemove,
    Wait,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Goto => "goto",
            ActionType::Close => "close",
            ActionType::Click => "click",
            ActionType::Dblclick => "dblclick",
            ActionType::Contextmenu => "contextmenu",
            ActionType::Keydown => "keydown",
            ActionType::Keyup => "keyup",
            ActionType::Keys => "keys",
            ActionType::Change => "change",
            ActionType::Scroll => "scroll",
            ActionType::Wheel => "wheel",
            ActionType::Wheels => "wheels",
            ActionType::Mousemove => "mousemove",
            ActionType::Wait => "wait",
        }
    }

    /// Pointer-class steps must carry viewport coordinates.
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            ActionType::Click
                | ActionType::Dblclick
                | ActionType::Contextmenu
                | ActionType::Change
                | ActionType::Scroll
                | ActionType::Wheel
                | ActionType::Wheels
                | ActionType::Mousemove
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of verifying an action's expected screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Unevaluated,
    Pass,
    Allow,
    Fail,
    Cancelled,
}

impl MatchStatus {
    /// Whether replay may move on to the next action.
    pub fn is_success(&self) -> bool {
        matches!(self, MatchStatus::Pass | MatchStatus::Allow)
    }
}

/// Modifier key bitmask (Alt=1, Ctrl=2, Meta=4, Shift=8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const ALT: Modifiers = Modifiers(1);
    pub const CTRL: Modifiers = Modifiers(2);
    pub const META: Modifiers = Modifiers(4);
    pub const SHIFT: Modifiers = Modifiers(8);

    pub fn from_flags(alt: bool, ctrl: bool, meta: bool, shift: bool) -> Self {
        let mut bits = 0;
        if alt {
            bits |= Self::ALT.0;
        }
        if ctrl {
            bits |= Self::CTRL.0;
        }
        if meta {
            bits |= Self::META.0;
        }
        if shift {
            bits |= Self::SHIFT.0;
        }
        Modifiers(bits)
    }

    pub fn contains(&self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDirection {
    Down,
    Up,
}

/// One keyboard event as observed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStroke {
    pub direction: KeyDirection,
    /// `KeyboardEvent.key`, e.g. `"a"` or `"Enter"`
    pub key: String,
    /// `KeyboardEvent.code`, e.g. `"KeyA"`
    pub code: String,
    pub key_code: u32,
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl KeyStroke {
    pub fn down(key: impl Into<String>, code: impl Into<String>, key_code: u32) -> Self {
        Self {
            direction: KeyDirection::Down,
            key: key.into(),
            code: code.into(),
            key_code,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn up(key: impl Into<String>, code: impl Into<String>, key_code: u32) -> Self {
        Self {
            direction: KeyDirection::Up,
            ..Self::down(key, code, key_code)
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// A single visible character that also needs a `char` event on replay.
    pub fn is_printable(&self) -> bool {
        let mut chars = self.key.chars();
        matches!((chars.next(), chars.next()), (Some(c), None) if !c.is_control())
            && !self.modifiers.contains(Modifiers::CTRL)
            && !self.modifiers.contains(Modifiers::META)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelDelta {
    pub delta_x: f64,
    pub delta_y: f64,
    #[serde(default)]
    pub modifiers: Modifiers,
}

/// How a scroll gesture was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollOrigin {
    /// Mouse wheel or touchpad; the cursor position is known.
    Wheel,
    /// Scrollbar drag; coordinates come from the last mousedown.
    Scrollbar,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPayload {
    /// New `scrollTop`, or `None` if the vertical offset did not change
    pub top: Option<f64>,
    /// New `scrollLeft`, or `None` if the horizontal offset did not change
    pub left: Option<f64>,
    pub origin: ScrollOrigin,
}

/// Variant-specific data of an action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    #[default]
    None,
    Navigate {
        url: String,
    },
    Pointer {
        button: MouseButton,
        #[serde(default)]
        modifiers: Modifiers,
        /// `MouseEvent.detail` as recorded
        detail: u32,
    },
    Key {
        stroke: KeyStroke,
    },
    Keys {
        strokes: Vec<KeyStroke>,
    },
    Change {
        value: String,
    },
    Scroll(ScrollPayload),
    Wheels {
        deltas: Vec<WheelDelta>,
    },
}

/// Geometry of the tab an action was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TabViewport {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_zoom")]
    pub zoom_factor: f64,
    /// A human confirmed this size; replay must reproduce it exactly.
    #[serde(default)]
    pub blessed: bool,
}

fn default_zoom() -> f64 {
    1.0
}

impl TabViewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            zoom_factor: 1.0,
            blessed: false,
        }
    }

    pub fn blessed(width: u32, height: u32) -> Self {
        Self {
            blessed: true,
            ..Self::new(width, height)
        }
    }
}

/// One recorded step of a [`crate::model::Test`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub index: usize,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target_tab_virtual_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_rect: Option<Rect>,
    #[serde(default)]
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<TabViewport>,
    /// Replay does not need to verify the screen before this step.
    #[serde(default)]
    pub skip_verify: bool,
    #[serde(default)]
    pub match_status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_latency_ms: Option<u64>,

    // Rasters live in the archive side table, not in the JSON.
    #[serde(skip)]
    pub expected_screenshot: Option<Screenshot>,
    #[serde(skip)]
    pub actual_screenshot: Option<Screenshot>,
    #[serde(skip)]
    pub acceptable_difference_mask: Option<Screenshot>,
    #[serde(skip)]
    pub diff_screenshot: Option<Screenshot>,
}

impl Action {
    pub fn new(action_type: ActionType, target_tab_virtual_id: u32) -> Self {
        Self {
            index: 0,
            action_type,
            target_tab_virtual_id,
            coordinates: None,
            bounding_rect: None,
            payload: EventPayload::None,
            viewport: None,
            skip_verify: false,
            match_status: MatchStatus::Unevaluated,
            verify_latency_ms: None,
            expected_screenshot: None,
            actual_screenshot: None,
            acceptable_difference_mask: None,
            diff_screenshot: None,
        }
    }

    pub fn goto(target_tab_virtual_id: u32, url: impl Into<String>) -> Self {
        Self::new(ActionType::Goto, target_tab_virtual_id)
            .with_payload(EventPayload::Navigate { url: url.into() })
    }

    pub fn click(target_tab_virtual_id: u32, x: f64, y: f64) -> Self {
        Self::new(ActionType::Click, target_tab_virtual_id)
            .at(x, y)
            .with_payload(EventPayload::Pointer {
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
                detail: 1,
            })
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.coordinates = Some(Coordinates::new(x, y));
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_viewport(mut self, viewport: TabViewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_expected(mut self, screenshot: Screenshot) -> Self {
        self.expected_screenshot = Some(screenshot);
        self
    }

    pub fn with_mask(mut self, mask: Screenshot) -> Self {
        self.acceptable_difference_mask = Some(mask);
        self
    }

    /// Whether replay has to verify the screen before this step runs.
    pub fn needs_verification(&self) -> bool {
        self.expected_screenshot.is_some() && !self.skip_verify
    }

    pub fn screenshot(&self, role: ScreenshotRole) -> Option<&Screenshot> {
        match role {
            ScreenshotRole::Expected => self.expected_screenshot.as_ref(),
            ScreenshotRole::Actual => self.actual_screenshot.as_ref(),
            ScreenshotRole::AcceptableDiff => self.acceptable_difference_mask.as_ref(),
        }
    }

    pub fn set_screenshot(&mut self, role: ScreenshotRole, screenshot: Screenshot) {
        let slot = match role {
            ScreenshotRole::Expected => &mut self.expected_screenshot,
            ScreenshotRole::Actual => &mut self.actual_screenshot,
            ScreenshotRole::AcceptableDiff => &mut self.acceptable_difference_mask,
        };
        *slot = Some(screenshot);
    }

    /// Forget the outcome of a previous replay.
    pub fn reset_result(&mut self) {
        self.match_status = MatchStatus::Unevaluated;
        self.verify_latency_ms = None;
        self.actual_screenshot = None;
        self.diff_screenshot = None;
    }
}
