//! Event capture state machine.
//!
//! Raw page input is mapped to a [`Symbol`] and looked up in a transition
//! table, first by the exact machine state and then by the wildcard row.
//! Inputs without a row are ignored. Time never advances on its own: every
//! input carries `now`, and timers that came due fire before the input is
//! handled. Side effects are collected and handed back to the caller.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::channel::AckOutcome;
use crate::capture::error::CaptureProtocolError;
use crate::capture::events::{
    CaptureMessage, ControllerResponse, EventTarget, PageEvent, PageEventKind,
};
use crate::capture::scheduler::TimerPurpose;
use crate::capture::state::{CaptureState, MachineState, PendingClick, PendingMove};
use crate::config::CaptureTiming;
use crate::model::{
    ActionType, Coordinates, EventPayload, Modifiers, MouseButton, Rect, ScrollOrigin,
    ScrollPayload, WheelDelta,
};

/// Side effects produced by the machine, executed by the session driver.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEffect {
    /// Post this message to the controller.
    Transmit(CaptureMessage),
    /// Tell the human what went wrong.
    UserError(CaptureProtocolError),
    /// Give focus back to the recorded page after a reset.
    RestoreFocus,
    /// Recording cannot continue.
    StopRecording,
}

/// Input alphabet of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    MouseDown,
    MouseUp,
    Click,
    ContextMenu,
    KeyDown,
    KeyUp,
    Wheel,
    Scroll,
    MouseMove,
    Change,
    VisibilityHidden,
    Ack,
    Stop,
    Disconnect,
    Timer,
}

#[derive(Debug, Clone)]
enum Input {
    Page(PageEvent),
    Ack,
    Stop,
    Disconnect,
    Timer(TimerPurpose),
}

impl Input {
    fn symbol(&self) -> Symbol {
        match self {
            Input::Page(event) => match event.kind {
                PageEventKind::MouseDown { .. } => Symbol::MouseDown,
                PageEventKind::MouseUp { .. } => Symbol::MouseUp,
                PageEventKind::Click { .. } => Symbol::Click,
                PageEventKind::ContextMenu { .. } => Symbol::ContextMenu,
                PageEventKind::KeyDown { .. } => Symbol::KeyDown,
                PageEventKind::KeyUp { .. } => Symbol::KeyUp,
                PageEventKind::Wheel { .. } => Symbol::Wheel,
                PageEventKind::Scroll { .. } => Symbol::Scroll,
                PageEventKind::MouseMove { .. } => Symbol::MouseMove,
                PageEventKind::Change { .. } => Symbol::Change,
                PageEventKind::VisibilityHidden => Symbol::VisibilityHidden,
            },
            Input::Ack => Symbol::Ack,
            Input::Stop => Symbol::Stop,
            Input::Disconnect => Symbol::Disconnect,
            Input::Timer(_) => Symbol::Timer,
        }
    }
}

type Handler =
    fn(&mut EventCaptureStateMachine, Input, Instant) -> Result<(), CaptureProtocolError>;

type M = EventCaptureStateMachine;

const START: Option<MachineState> = Some(MachineState::Start);
const AWAITING: Option<MachineState> = Some(MachineState::AwaitingAck);
/// Wildcard: matches any state.
const ANY: Option<MachineState> = None;

/// `(state, symbol) -> handler`. Mouse-up has no row: the click that
/// follows it carries everything replay needs.
static TRANSITIONS: &[(Option<MachineState>, Symbol, Handler)] = &[
    (START, Symbol::MouseDown, M::on_mouse_down),
    (START, Symbol::Click, M::on_click),
    (START, Symbol::ContextMenu, M::on_context_menu),
    (START, Symbol::KeyDown, M::on_key),
    (START, Symbol::KeyUp, M::on_key),
    (START, Symbol::Wheel, M::on_wheel),
    (START, Symbol::Scroll, M::on_scroll),
    (START, Symbol::MouseMove, M::on_mouse_move),
    (START, Symbol::Change, M::on_change),
    (START, Symbol::VisibilityHidden, M::on_visibility_hidden),
    (START, Symbol::Timer, M::on_timer),
    (AWAITING, Symbol::MouseDown, M::on_mouse_down),
    (AWAITING, Symbol::Click, M::on_click),
    (AWAITING, Symbol::ContextMenu, M::on_context_menu),
    (AWAITING, Symbol::KeyDown, M::on_key),
    (AWAITING, Symbol::KeyUp, M::on_key),
    (AWAITING, Symbol::Wheel, M::on_wheel),
    (AWAITING, Symbol::Scroll, M::on_scroll),
    (AWAITING, Symbol::MouseMove, M::on_mouse_move),
    (AWAITING, Symbol::Change, M::on_change),
    (AWAITING, Symbol::VisibilityHidden, M::on_visibility_hidden),
    (AWAITING, Symbol::Timer, M::on_timer),
    (AWAITING, Symbol::Ack, M::on_ack),
    (ANY, Symbol::Stop, M::on_stop),
    (ANY, Symbol::Disconnect, M::on_disconnect),
];

fn lookup(state: MachineState, symbol: Symbol) -> Option<Handler> {
    TRANSITIONS
        .iter()
        .find(|(s, sym, _)| *s == Some(state) && *sym == symbol)
        .or_else(|| {
            TRANSITIONS
                .iter()
                .find(|(s, sym, _)| s.is_none() && *sym == symbol)
        })
        .map(|(_, _, handler)| *handler)
}

fn pointer(button: MouseButton, modifiers: Modifiers, detail: u32) -> EventPayload {
    EventPayload::Pointer {
        button,
        modifiers,
        detail,
    }
}

fn centre(rect: &Rect) -> Coordinates {
    Coordinates::new(rect.left + rect.width / 2.0, rect.top + rect.height / 2.0)
}

/// Turns the input of one page context into an ordered stream of capture
/// messages.
#[derive(Debug)]
pub struct EventCaptureStateMachine {
    state: CaptureState,
    timing: CaptureTiming,
    frame: u32,
    effects: Vec<CaptureEffect>,
}

impl EventCaptureStateMachine {
    pub fn new(timing: CaptureTiming) -> Self {
        Self {
            state: CaptureState::new(),
            timing,
            frame: 0,
            effects: Vec::new(),
        }
    }

    /// Stamp outgoing messages with this frame id.
    pub fn with_frame(mut self, frame: u32) -> Self {
        self.frame = frame;
        self
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn state(&self) -> MachineState {
        self.state.machine
    }

    pub fn is_stopped(&self) -> bool {
        self.state.machine == MachineState::Stopped
    }

    pub fn capture_state(&self) -> &CaptureState {
        &self.state
    }

    /// When the next armed timer is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.timers.next_deadline()
    }

    pub fn handle_event(&mut self, event: PageEvent, now: Instant) -> Vec<CaptureEffect> {
        self.fire_due_timers(now);
        self.step(Input::Page(event), now);
        self.take_effects()
    }

    pub fn handle_response(
        &mut self,
        response: ControllerResponse,
        now: Instant,
    ) -> Vec<CaptureEffect> {
        self.fire_due_timers(now);
        let input = match response {
            ControllerResponse::Ack { .. } => Input::Ack,
            ControllerResponse::Stop { .. } => Input::Stop,
        };
        self.step(input, now);
        self.take_effects()
    }

    /// The page context went away.
    pub fn disconnect(&mut self, now: Instant) -> Vec<CaptureEffect> {
        self.step(Input::Disconnect, now);
        self.take_effects()
    }

    /// Fire every timer due at `now`.
    pub fn advance(&mut self, now: Instant) -> Vec<CaptureEffect> {
        self.fire_due_timers(now);
        self.take_effects()
    }

    fn fire_due_timers(&mut self, now: Instant) {
        while let Some((purpose, due)) = self.state.timers.take_next_due(now) {
            self.step(Input::Timer(purpose), due);
        }
    }

    fn take_effects(&mut self) -> Vec<CaptureEffect> {
        std::mem::take(&mut self.effects)
    }

    fn step(&mut self, input: Input, now: Instant) {
        if let Input::Page(event) = &input {
            if event.is_synthetic() {
                debug!(kind = ?event.kind, "Ignoring replayed input");
                return;
            }
        }
        let symbol = input.symbol();
        let state = self.state.machine;
        let Some(handler) = lookup(state, symbol) else {
            debug!(?state, ?symbol, "No transition, input ignored");
            return;
        };
        // Human activity means the page is not idle
        if matches!(input, Input::Page(_)) {
            self.state.timers.cancel(TimerPurpose::IdleWait);
        }
        if let Err(error) = handler(self, input, now) {
            self.fail(error);
        }
        self.state.settle_machine_state();
    }

    fn emit(&mut self, message: CaptureMessage) {
        self.state.timers.cancel(TimerPurpose::IdleWait);
        let message = message.from_frame(self.frame);
        debug!(action = %message.action_type, queued = self.state.channel.len(), "Capture message queued");
        if let Some(head) = self.state.channel.enqueue(message) {
            self.effects.push(CaptureEffect::Transmit(head));
        }
    }

    fn fail(&mut self, error: CaptureProtocolError) {
        match error {
            CaptureProtocolError::Recoverable(_) => {
                warn!(%error, "Resetting capture state");
                self.state.clear_gestures();
                let dropped = self.state.channel.discard_pending();
                if dropped > 0 {
                    debug!(dropped, "Dropped queued capture messages");
                }
                self.effects.push(CaptureEffect::UserError(error));
                self.effects.push(CaptureEffect::RestoreFocus);
            }
            CaptureProtocolError::Unrecoverable(_) => {
                error!(%error, "Stopping capture");
                self.halt();
                self.effects.push(CaptureEffect::UserError(error));
                self.effects.push(CaptureEffect::StopRecording);
            }
        }
    }

    fn halt(&mut self) {
        self.state.clear_gestures();
        self.state.channel.reset();
        self.state.machine = MachineState::Stopped;
    }

    // Flushing

    fn flush_click(&mut self) {
        self.state.timers.cancel(TimerPurpose::ClickWindow);
        if let Some(click) = self.state.pending_click.take() {
            self.emit(
                CaptureMessage::new(
                    ActionType::Click,
                    pointer(MouseButton::Left, click.modifiers, click.detail),
                )
                .at(click.at)
                .on(&click.target),
            );
        }
    }

    fn flush_keys(&mut self) {
        self.state.timers.cancel(TimerPurpose::KeyAggregation);
        if let Some((target, strokes)) = self.state.keys.take() {
            debug!(strokes = strokes.len(), "Key burst complete");
            let mut message = CaptureMessage::new(ActionType::Keys, EventPayload::Keys { strokes });
            if let Some(target) = &target {
                message = message.on(target);
            }
            self.emit(message);
        }
    }

    fn flush_scroll(&mut self) {
        self.state.timers.cancel(TimerPurpose::ScrollAggregation);
        if !self.state.scroll.has_pending() {
            return;
        }

        let aggregate = &self.state.scroll;
        let mut messages = Vec::new();
        for (_, window) in aggregate.windows.iter().filter(|(_, w)| w.dirty) {
            let (top, left) = window.changed_axes();
            if top.is_none() && left.is_none() {
                continue;
            }
            let (origin, at) = match aggregate.wheel_cursor {
                Some(cursor) => (ScrollOrigin::Wheel, cursor),
                None => (
                    ScrollOrigin::Scrollbar,
                    self.state
                        .last_mouse_down
                        .or_else(|| {
                            window
                                .target
                                .as_ref()
                                .and_then(|t| t.rect.as_ref())
                                .map(centre)
                        })
                        .unwrap_or_default(),
                ),
            };
            let mut message = CaptureMessage::new(
                ActionType::Scroll,
                EventPayload::Scroll(ScrollPayload { top, left, origin }),
            )
            .at(at);
            if let Some(target) = &window.target {
                message = message.on(target);
            }
            messages.push(message);
        }

        // Wheel input that moved nothing is still replayed as wheel events
        if messages.is_empty() && !aggregate.wheel_deltas.is_empty() {
            let deltas = aggregate.wheel_deltas.clone();
            let action_type = if deltas.len() == 1 {
                ActionType::Wheel
            } else {
                ActionType::Wheels
            };
            let mut message = CaptureMessage::new(action_type, EventPayload::Wheels { deltas })
                .at(aggregate.wheel_cursor.unwrap_or_default());
            if let Some(target) = &aggregate.wheel_target {
                message = message.on(target);
            }
            messages.push(message);
        }

        self.state.scroll.end_gesture();
        for message in messages {
            self.emit(message);
        }
    }

    fn settle_move(&mut self) {
        self.state.timers.cancel(TimerPurpose::MoveSettle);
        let Some(pending) = self.state.pending_move.take() else {
            return;
        };
        if pending.crossed_elements() {
            self.emit(
                CaptureMessage::new(ActionType::Mousemove, EventPayload::None)
                    .at(pending.at)
                    .on(&pending.current),
            );
        } else {
            debug!(element = %pending.origin, "Pointer settled on its origin, move dropped");
        }
    }

    // Consistency checks

    /// A pointer gesture ends a pending move, but only on the element the
    /// move ended on.
    fn end_pending_move(&mut self, target: &EventTarget) -> Result<(), CaptureProtocolError> {
        let Some(pending) = self.state.pending_move.take() else {
            return Ok(());
        };
        self.state.timers.cancel(TimerPurpose::MoveSettle);
        if pending.current.element != target.element {
            return Err(CaptureProtocolError::Recoverable(format!(
                "pointer gesture on {} while a move onto {} is pending",
                target.element, pending.current.element
            )));
        }
        Ok(())
    }

    fn check_in_flight(&self, target: &EventTarget) -> Result<(), CaptureProtocolError> {
        let Some(in_flight) = self.state.channel.in_flight() else {
            return Ok(());
        };
        if in_flight.target.as_ref() == Some(&target.element) {
            return Ok(());
        }
        match in_flight.action_type {
            ActionType::Mousemove => Err(CaptureProtocolError::Unrecoverable(format!(
                "click on {} while an unacknowledged mousemove is in flight",
                target.element
            ))),
            ActionType::Click | ActionType::Dblclick | ActionType::Contextmenu => {
                Err(CaptureProtocolError::Recoverable(format!(
                    "click on {} while an unacknowledged {} is in flight",
                    target.element, in_flight.action_type
                )))
            }
            _ => Ok(()),
        }
    }

    // Handlers

    fn on_mouse_down(&mut self, input: Input, _now: Instant) -> Result<(), CaptureProtocolError> {
        if let Input::Page(PageEvent {
            kind: PageEventKind::MouseDown { at, .. },
            ..
        }) = input
        {
            self.state.last_mouse_down = Some(at);
        }
        Ok(())
    }

    fn on_click(&mut self, input: Input, now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent {
            target,
            kind:
                PageEventKind::Click {
                    at,
                    detail,
                    modifiers,
                },
            ..
        }) = input
        else {
            return Ok(());
        };
        self.end_pending_move(&target)?;
        self.flush_keys();
        self.flush_scroll();

        if let Some(first) = self.state.pending_click.take() {
            self.state.timers.cancel(TimerPurpose::ClickWindow);
            if first.target.element != target.element {
                return Err(CaptureProtocolError::Recoverable(format!(
                    "click on {} while a click on {} is pending",
                    target.element, first.target.element
                )));
            }
            if detail != 2 {
                warn!(detail, element = %target.element, "Second click of a double click has an unexpected detail count");
            }
            self.emit(
                CaptureMessage::new(
                    ActionType::Dblclick,
                    pointer(MouseButton::Left, modifiers, detail),
                )
                .at(at)
                .on(&target),
            );
            return Ok(());
        }

        self.check_in_flight(&target)?;
        self.state.pending_click = Some(PendingClick {
            target,
            at,
            modifiers,
            detail,
        });
        self.state
            .timers
            .arm(TimerPurpose::ClickWindow, now, self.timing.click_window);
        Ok(())
    }

    fn on_context_menu(&mut self, input: Input, _now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent {
            target,
            kind: PageEventKind::ContextMenu { at },
            ..
        }) = input
        else {
            return Ok(());
        };
        self.end_pending_move(&target)?;
        if let Some(first) = &self.state.pending_click {
            return Err(CaptureProtocolError::Recoverable(format!(
                "context menu on {} while a click on {} is pending",
                target.element, first.target.element
            )));
        }
        self.flush_keys();
        self.flush_scroll();
        self.check_in_flight(&target)?;
        self.emit(
            CaptureMessage::new(
                ActionType::Contextmenu,
                pointer(MouseButton::Right, Modifiers::NONE, 1),
            )
            .at(at)
            .on(&target),
        );
        Ok(())
    }

    fn on_key(&mut self, input: Input, now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent { target, kind, .. }) = input else {
            return Ok(());
        };
        let stroke = match kind {
            PageEventKind::KeyDown { repeat: true, .. } => return Ok(()),
            PageEventKind::KeyDown { stroke, .. } | PageEventKind::KeyUp { stroke } => stroke,
            _ => return Ok(()),
        };
        self.flush_click();
        self.flush_scroll();

        let focus_moved = self
            .state
            .keys
            .target
            .as_ref()
            .map_or(false, |current| current.element != target.element);
        if focus_moved {
            self.flush_keys();
        }
        if self.state.keys.target.is_none() {
            self.state.keys.target = Some(target);
        }
        self.state.keys.record(stroke);
        self.state
            .timers
            .arm(TimerPurpose::KeyAggregation, now, self.timing.key_idle);
        Ok(())
    }

    fn on_wheel(&mut self, input: Input, now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent {
            target,
            kind:
                PageEventKind::Wheel {
                    at,
                    delta_x,
                    delta_y,
                    modifiers,
                },
            ..
        }) = input
        else {
            return Ok(());
        };
        self.flush_click();
        self.flush_keys();

        let scroll = &mut self.state.scroll;
        scroll.wheel_cursor = Some(at);
        if scroll.wheel_target.is_none() {
            scroll.wheel_target = Some(target);
        }
        scroll.wheel_deltas.push(WheelDelta {
            delta_x,
            delta_y,
            modifiers,
        });
        self.state
            .timers
            .arm(TimerPurpose::ScrollAggregation, now, self.timing.scroll_idle);
        Ok(())
    }

    fn on_scroll(&mut self, input: Input, now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent {
            target,
            kind: PageEventKind::Scroll { top, left },
            ..
        }) = input
        else {
            return Ok(());
        };
        self.flush_click();
        self.flush_keys();

        let window = self.state.scroll.window_mut(&target.element);
        window.observe(top, left);
        window.target = Some(target);
        self.state
            .timers
            .arm(TimerPurpose::ScrollAggregation, now, self.timing.scroll_idle);
        Ok(())
    }

    fn on_mouse_move(&mut self, input: Input, now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent {
            target,
            kind: PageEventKind::MouseMove { at },
            ..
        }) = input
        else {
            return Ok(());
        };
        if let Some(pending) = self.state.pending_move.as_mut() {
            pending.current = target;
            pending.at = at;
        } else {
            self.state.pending_move = Some(PendingMove {
                origin: target.element.clone(),
                current: target,
                at,
            });
        }
        self.state
            .timers
            .arm(TimerPurpose::MoveSettle, now, self.timing.move_settle);
        Ok(())
    }

    fn on_change(&mut self, input: Input, _now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Page(PageEvent {
            target,
            kind: PageEventKind::Change { at, value },
            ..
        }) = input
        else {
            return Ok(());
        };
        self.flush_click();
        self.flush_keys();
        self.emit(
            CaptureMessage::new(ActionType::Change, EventPayload::Change { value })
                .at(at)
                .on(&target),
        );
        Ok(())
    }

    fn on_visibility_hidden(
        &mut self,
        _input: Input,
        _now: Instant,
    ) -> Result<(), CaptureProtocolError> {
        self.flush_click();
        self.flush_keys();
        self.flush_scroll();
        self.settle_move();
        Ok(())
    }

    fn on_timer(&mut self, input: Input, _now: Instant) -> Result<(), CaptureProtocolError> {
        let Input::Timer(purpose) = input else {
            return Ok(());
        };
        match purpose {
            TimerPurpose::ClickWindow => self.flush_click(),
            TimerPurpose::KeyAggregation => self.flush_keys(),
            TimerPurpose::ScrollAggregation => self.flush_scroll(),
            TimerPurpose::MoveSettle => self.settle_move(),
            TimerPurpose::IdleWait => {
                if let Some(wait) = self.state.channel.retransmit_as_wait() {
                    info!(frame = self.frame, "Idle pause recorded as wait");
                    self.effects.push(CaptureEffect::Transmit(wait));
                }
            }
        }
        Ok(())
    }

    fn on_ack(&mut self, _input: Input, now: Instant) -> Result<(), CaptureProtocolError> {
        match self.state.channel.acknowledge() {
            AckOutcome::Transmit(next) => self.effects.push(CaptureEffect::Transmit(next)),
            AckOutcome::Drained => {
                self.state
                    .timers
                    .arm(TimerPurpose::IdleWait, now, self.timing.idle_wait)
            }
            AckOutcome::Unexpected => warn!("Ack received with no message in flight"),
        }
        Ok(())
    }

    fn on_stop(&mut self, _input: Input, _now: Instant) -> Result<(), CaptureProtocolError> {
        info!(frame = self.frame, "Recording stopped by controller");
        self.halt();
        Ok(())
    }

    fn on_disconnect(&mut self, _input: Input, _now: Instant) -> Result<(), CaptureProtocolError> {
        info!(frame = self.frame, "Page context disconnected");
        self.halt();
        Ok(())
    }
}
