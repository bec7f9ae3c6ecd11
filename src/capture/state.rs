//! Transient per-session capture state.

use std::collections::HashMap;

use crate::capture::channel::ActionChannel;
use crate::capture::events::{ElementId, EventTarget};
use crate::capture::scheduler::Scheduler;
use crate::model::{Coordinates, KeyDirection, KeyStroke, Modifiers, WheelDelta};

/// Coarse state of the capture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    /// Idle, accepting new gestures.
    Start,
    /// A message is outstanding on the action channel.
    AwaitingAck,
    /// Recording ended; every input is ignored.
    Stopped,
}

/// First click of a possible double click.
#[derive(Debug, Clone)]
pub struct PendingClick {
    pub target: EventTarget,
    pub at: Coordinates,
    pub modifiers: Modifiers,
    pub detail: u32,
}

/// Pointer movement waiting to settle.
#[derive(Debug, Clone)]
pub struct PendingMove {
    pub origin: ElementId,
    pub current: EventTarget,
    pub at: Coordinates,
}

impl PendingMove {
    pub fn crossed_elements(&self) -> bool {
        self.origin != self.current.element
    }
}

/// Keystrokes of the current typing burst.
///
/// A keydown stands for a full press. The matching keyup is folded into it,
/// so only releases of keys pressed before the burst show up as `Up` entries.
#[derive(Debug, Clone, Default)]
pub struct KeyBuffer {
    pub target: Option<EventTarget>,
    pub strokes: Vec<KeyStroke>,
    /// Codes pressed within this burst and not yet released
    held: Vec<String>,
}

impl KeyBuffer {
    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn record(&mut self, stroke: KeyStroke) {
        match stroke.direction {
            KeyDirection::Down => {
                self.held.push(stroke.code.clone());
                self.strokes.push(stroke);
            }
            KeyDirection::Up => match self.held.iter().rposition(|code| *code == stroke.code) {
                Some(pos) => {
                    self.held.remove(pos);
                }
                None => self.strokes.push(stroke),
            },
        }
    }

    pub fn take(&mut self) -> Option<(Option<EventTarget>, Vec<KeyStroke>)> {
        self.held.clear();
        let target = self.target.take();
        if self.strokes.is_empty() {
            return None;
        }
        Some((target, std::mem::take(&mut self.strokes)))
    }
}

/// Two scroll offsets `(top, left)` of one element: the one settled at the
/// end of the previous gesture and the latest observed one.
#[derive(Debug, Clone, Default)]
pub struct ScrollWindow {
    pub previous: Option<(f64, f64)>,
    pub latest: Option<(f64, f64)>,
    pub target: Option<EventTarget>,
    /// Offsets observed since the last flush
    pub dirty: bool,
}

impl ScrollWindow {
    pub fn observe(&mut self, top: f64, left: f64) {
        self.latest = Some((top, left));
        self.dirty = true;
    }

    /// New offsets for the axes that changed across the window. Without a
    /// settled offset to compare against, both axes are reported.
    pub fn changed_axes(&self) -> (Option<f64>, Option<f64>) {
        match (self.previous, self.latest) {
            (Some((prev_top, prev_left)), Some((top, left))) => (
                (prev_top != top).then_some(top),
                (prev_left != left).then_some(left),
            ),
            (None, Some((top, left))) => (Some(top), Some(left)),
            _ => (None, None),
        }
    }
}

/// Scroll and wheel input of the current gesture.
#[derive(Debug, Clone, Default)]
pub struct ScrollAggregate {
    /// Per element, in order of first observation
    pub windows: Vec<(ElementId, ScrollWindow)>,
    pub wheel_cursor: Option<Coordinates>,
    pub wheel_target: Option<EventTarget>,
    pub wheel_deltas: Vec<WheelDelta>,
}

impl ScrollAggregate {
    pub fn window_mut(&mut self, element: &ElementId) -> &mut ScrollWindow {
        if let Some(pos) = self.windows.iter().position(|(id, _)| id == element) {
            return &mut self.windows[pos].1;
        }
        self.windows.push((element.clone(), ScrollWindow::default()));
        let last = self.windows.len() - 1;
        &mut self.windows[last].1
    }

    pub fn has_pending(&self) -> bool {
        !self.wheel_deltas.is_empty() || self.windows.iter().any(|(_, w)| w.dirty)
    }

    /// Forget the current gesture but keep each element's latest offset as
    /// the baseline for the next one.
    pub fn end_gesture(&mut self) {
        for (_, window) in &mut self.windows {
            window.previous = window.latest;
            window.dirty = false;
        }
        self.wheel_cursor = None;
        self.wheel_target = None;
        self.wheel_deltas.clear();
    }
}

/// Everything one recording session tracks between events.
#[derive(Debug)]
pub struct CaptureState {
    pub machine: MachineState,
    pub pending_click: Option<PendingClick>,
    pub keys: KeyBuffer,
    pub scroll: ScrollAggregate,
    pub pending_move: Option<PendingMove>,
    pub last_mouse_down: Option<Coordinates>,
    pub timers: Scheduler,
    pub channel: ActionChannel,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self {
            machine: MachineState::Start,
            pending_click: None,
            keys: KeyBuffer::default(),
            scroll: ScrollAggregate::default(),
            pending_move: None,
            last_mouse_down: None,
            timers: Scheduler::new(),
            channel: ActionChannel::new(),
        }
    }
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every buffered gesture and timer. The channel is left alone.
    pub fn clear_gestures(&mut self) {
        self.pending_click = None;
        self.keys = KeyBuffer::default();
        self.scroll = ScrollAggregate::default();
        self.pending_move = None;
        self.timers.cancel_all();
    }

    /// State implied by the channel, unless recording stopped.
    pub fn settle_machine_state(&mut self) {
        if self.machine == MachineState::Stopped {
            return;
        }
        self.machine = if self.channel.is_empty() {
            MachineState::Start
        } else {
            MachineState::AwaitingAck
        };
    }

    pub fn scroll_offsets(&self) -> HashMap<ElementId, (f64, f64)> {
        self.scroll
            .windows
            .iter()
            .filter_map(|(id, w)| w.latest.map(|offset| (id.clone(), offset)))
            .collect()
    }
}
