//! Raw page input events and the messages exchanged with the controller.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{
    ActionType, Coordinates, EventPayload, KeyStroke, Modifiers, MouseButton, Rect,
    SYNTHETIC_EVENT_TIMESTAMP,
};

/// Identity of a DOM element as seen by the capture script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The element an event was dispatched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTarget {
    pub element: ElementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
}

impl EventTarget {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: ElementId::new(element),
            rect: None,
        }
    }
}

/// Input observed in a single page context.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEventKind {
    MouseDown {
        at: Coordinates,
        button: MouseButton,
    },
    MouseUp {
        at: Coordinates,
        button: MouseButton,
    },
    Click {
        at: Coordinates,
        /// `MouseEvent.detail`: 1 for the first click, 2 for the second of a pair
        detail: u32,
        modifiers: Modifiers,
    },
    ContextMenu {
        at: Coordinates,
    },
    KeyDown {
        stroke: KeyStroke,
        /// OS auto-repeat
        repeat: bool,
    },
    KeyUp {
        stroke: KeyStroke,
    },
    Wheel {
        at: Coordinates,
        delta_x: f64,
        delta_y: f64,
        modifiers: Modifiers,
    },
    Scroll {
        top: f64,
        left: f64,
    },
    MouseMove {
        at: Coordinates,
    },
    Change {
        at: Coordinates,
        value: String,
    },
    VisibilityHidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageEvent {
    pub target: EventTarget,
    pub kind: PageEventKind,
    /// `event.timeStamp` as the page saw it
    pub timestamp: f64,
}

impl PageEvent {
    pub fn new(target: EventTarget, kind: PageEventKind) -> Self {
        Self {
            target,
            kind,
            timestamp: 0.0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Input the replayer dispatched rather than a human.
    pub fn is_synthetic(&self) -> bool {
        self.timestamp == SYNTHETIC_EVENT_TIMESTAMP
    }

    pub fn click(element: &str, x: f64, y: f64, detail: u32) -> Self {
        Self::new(
            EventTarget::new(element),
            PageEventKind::Click {
                at: Coordinates::new(x, y),
                detail,
                modifiers: Modifiers::NONE,
            },
        )
    }

    pub fn mouse_move(element: &str, x: f64, y: f64) -> Self {
        Self::new(
            EventTarget::new(element),
            PageEventKind::MouseMove {
                at: Coordinates::new(x, y),
            },
        )
    }

    pub fn key_down(element: &str, stroke: KeyStroke) -> Self {
        Self::new(
            EventTarget::new(element),
            PageEventKind::KeyDown {
                stroke,
                repeat: false,
            },
        )
    }

    pub fn key_up(element: &str, stroke: KeyStroke) -> Self {
        Self::new(EventTarget::new(element), PageEventKind::KeyUp { stroke })
    }

    pub fn scroll(element: &str, top: f64, left: f64) -> Self {
        Self::new(
            EventTarget::new(element),
            PageEventKind::Scroll { top, left },
        )
    }
}

/// Message posted on the action channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMessage {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    pub event_details: EventPayload,
    pub sender_frame: u32,
    /// Element the gesture landed on; local to the capture side.
    #[serde(skip)]
    pub target: Option<ElementId>,
}

impl CaptureMessage {
    pub fn new(action_type: ActionType, event_details: EventPayload) -> Self {
        Self {
            action_type,
            bounding_rect: None,
            coordinates: None,
            event_details,
            sender_frame: 0,
            target: None,
        }
    }

    pub fn at(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn on(mut self, target: &EventTarget) -> Self {
        self.bounding_rect = target.rect;
        self.target = Some(target.element.clone());
        self
    }

    pub fn from_frame(mut self, frame: u32) -> Self {
        self.sender_frame = frame;
        self
    }
}

/// Reply from the controller to the capture side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerResponse {
    /// The head message was simulated and screenshotted.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
    },
    /// Recording is over.
    Stop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
    },
}
