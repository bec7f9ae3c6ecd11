//! Async driver for one recording session.
//!
//! Owns an [`EventCaptureStateMachine`] in a spawned task, feeds it page
//! events and controller responses from a channel, and sleeps until the next
//! armed timer in between.

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::capture::events::{ControllerResponse, PageEvent};
use crate::capture::machine::{CaptureEffect, EventCaptureStateMachine};
use crate::config::CaptureTiming;

#[derive(Debug, Clone)]
pub enum SessionInput {
    Event(PageEvent),
    Response(ControllerResponse),
    Disconnect,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub transmitted: usize,
    pub user_errors: usize,
}

pub struct CaptureSession {
    machine: EventCaptureStateMachine,
    input_rx: mpsc::UnboundedReceiver<SessionInput>,
    effect_tx: mpsc::UnboundedSender<CaptureEffect>,
    summary: SessionSummary,
}

/// Handle for talking to a running capture session.
pub struct CaptureSessionHandle {
    input_tx: mpsc::UnboundedSender<SessionInput>,
    effect_rx: mpsc::UnboundedReceiver<CaptureEffect>,
    task: JoinHandle<SessionSummary>,
}

impl CaptureSession {
    /// Start a session for the page context `frame`.
    pub fn spawn(timing: CaptureTiming, frame: u32) -> CaptureSessionHandle {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (effect_tx, effect_rx) = mpsc::unbounded_channel();

        let session = CaptureSession {
            machine: EventCaptureStateMachine::new(timing).with_frame(frame),
            input_rx,
            effect_tx,
            summary: SessionSummary::default(),
        };
        let task = tokio::spawn(session.run());

        CaptureSessionHandle {
            input_tx,
            effect_rx,
            task,
        }
    }

    async fn run(mut self) -> SessionSummary {
        info!(frame = self.machine.frame(), "Capture session started");
        while !self.machine.is_stopped() {
            let deadline = self.machine.next_deadline();
            let effects = tokio::select! {
                input = self.input_rx.recv() => {
                    let now = Instant::now();
                    match input {
                        Some(SessionInput::Event(event)) => self.machine.handle_event(event, now),
                        Some(SessionInput::Response(response)) => {
                            self.machine.handle_response(response, now)
                        }
                        Some(SessionInput::Disconnect) | None => self.machine.disconnect(now),
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.machine.advance(Instant::now())
                }
            };
            self.forward(effects);
        }
        info!(
            transmitted = self.summary.transmitted,
            user_errors = self.summary.user_errors,
            "Capture session ended"
        );
        self.summary
    }

    fn forward(&mut self, effects: Vec<CaptureEffect>) {
        for effect in effects {
            match &effect {
                CaptureEffect::Transmit(_) => self.summary.transmitted += 1,
                CaptureEffect::UserError(_) => self.summary.user_errors += 1,
                _ => {}
            }
            if self.effect_tx.send(effect).is_err() {
                debug!("Effect receiver dropped");
            }
        }
    }
}

impl CaptureSessionHandle {
    /// Returns false once the session has ended.
    pub fn send_event(&self, event: PageEvent) -> bool {
        self.input_tx.send(SessionInput::Event(event)).is_ok()
    }

    pub fn respond(&self, response: ControllerResponse) -> bool {
        self.input_tx.send(SessionInput::Response(response)).is_ok()
    }

    pub fn disconnect(&self) -> bool {
        self.input_tx.send(SessionInput::Disconnect).is_ok()
    }

    /// Next effect, or `None` after the session ended and all effects were
    /// drained.
    pub async fn next_effect(&mut self) -> Option<CaptureEffect> {
        self.effect_rx.recv().await
    }

    /// Close the input side and wait for the session to wind down.
    pub async fn finish(self) -> Result<SessionSummary, JoinError> {
        drop(self.input_tx);
        self.task.await
    }
}
