//! Replay engine: plays a [`Test`] step by step against an automation
//! surface and verifies the screen before each following step.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, ReplayConfig};
use crate::model::{
    Action, ActionType, Coordinates, EventPayload, KeyDirection, KeyStroke, MatchStatus, Modifiers,
    MouseButton, ScrollOrigin, Test,
};
use crate::player::error::{Attempt, PlayerError};
use crate::player::surface::{
    AutomationSurface, InputCommand, KeyEventKind, KeyEventParams, MouseEventParams,
    SYNTHETIC_EVENT_TIMESTAMP,
};
use crate::player::tabs::VirtualTabRegistry;
use crate::player::verify::{CancelFlag, ScreenshotVerifier, VerifyOutcome};
use crate::raster::diff;

/// One surface call needed to replay an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayCommand {
    Input(InputCommand),
    Navigate(String),
    CloseTarget,
}

/// How a replay ended.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOutcome {
    /// `Pass` or `Allow` when every step matched, otherwise the status of
    /// the step that stopped replay.
    pub status: MatchStatus,
    /// Index of the action whose verification stopped replay. Pass it back
    /// to [`Player::play`] with `resume` to pick up from there.
    pub stopped_at: Option<usize>,
    /// Actions whose commands were dispatched
    pub dispatched: usize,
}

pub struct Player {
    surface: Arc<dyn AutomationSurface>,
    tabs: VirtualTabRegistry,
    verifier: ScreenshotVerifier,
    replay: ReplayConfig,
    cancel: CancelFlag,
}

impl Player {
    pub fn new(surface: Arc<dyn AutomationSurface>, config: &Config) -> Self {
        let cancel = CancelFlag::new();
        Self {
            surface,
            tabs: VirtualTabRegistry::new(config.resize),
            verifier: ScreenshotVerifier::new(config.replay, config.diff.threshold, cancel.clone()),
            replay: config.replay,
            cancel,
        }
    }

    /// Flag that stops replay when set from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn tabs(&self) -> &VirtualTabRegistry {
        &self.tabs
    }

    pub fn tabs_mut(&mut self) -> &mut VirtualTabRegistry {
        &mut self.tabs
    }

    /// Play `test` from `start`. With `resume`, the screen is first checked
    /// against the expected screenshot of `start` itself, as when replay
    /// stopped there; only a match goes on to dispatch `start`.
    pub async fn play(
        &mut self,
        test: &mut Test,
        start: usize,
        resume: bool,
    ) -> Result<PlayOutcome, PlayerError> {
        if start > test.len() {
            return Err(PlayerError::InvalidStart {
                start,
                len: test.len(),
            });
        }
        for index in start..test.len() {
            if let Some(action) = test.action_mut(index) {
                action.reset_result();
            }
        }
        info!(test = %test.name, start, resume, steps = test.len(), "Replay started");

        let mut overall = MatchStatus::Pass;
        let mut dispatched = 0;
        if resume && start < test.len() {
            let previous = start.saturating_sub(1);
            let status = self.verify_step(test, start, previous).await?;
            match status {
                MatchStatus::Allow => overall = MatchStatus::Allow,
                MatchStatus::Pass => {}
                _ => {
                    warn!(index = start, ?status, "Resume stopped");
                    return Ok(PlayOutcome {
                        status,
                        stopped_at: Some(start),
                        dispatched,
                    });
                }
            }
        }

        for index in start..test.len() {
            if self.cancel.is_cancelled() {
                info!(index, "Replay cancelled");
                return Ok(PlayOutcome {
                    status: MatchStatus::Cancelled,
                    stopped_at: Some(index),
                    dispatched,
                });
            }

            let action = &test.actions()[index];
            let created = self.prepare_tab(action).await?;
            self.run_action(action, created).await?;
            dispatched += 1;

            let next = index + 1;
            if next >= test.len() {
                break;
            }
            let status = self.verify_step(test, next, index).await?;
            match status {
                MatchStatus::Allow => overall = MatchStatus::Allow,
                MatchStatus::Pass => {}
                _ => {
                    warn!(index = next, ?status, "Replay stopped");
                    return Ok(PlayOutcome {
                        status,
                        stopped_at: Some(next),
                        dispatched,
                    });
                }
            }
        }

        info!(status = ?overall, dispatched, "Replay finished");
        Ok(PlayOutcome {
            status: overall,
            stopped_at: None,
            dispatched,
        })
    }

    /// Verify the screen expected by action `index` and record the result.
    /// The action's own tab is used when live, else the tab of `previous`,
    /// which covers a goto that has not opened its tab yet.
    async fn verify_step(
        &self,
        test: &mut Test,
        index: usize,
        previous: usize,
    ) -> Result<MatchStatus, PlayerError> {
        let Some(action) = test.action(index) else {
            return Ok(MatchStatus::Pass);
        };
        let own_tab = action.target_tab_virtual_id;
        let verify_tab = match test.action(previous) {
            Some(previous) if self.tabs.resolve(own_tab).is_err() => {
                previous.target_tab_virtual_id
            }
            _ => own_tab,
        };
        let outcome = self.verify_action(action, verify_tab).await;
        self.record_outcome(test, index, outcome)
    }

    async fn verify_action(
        &self,
        action: &Action,
        virtual_id: u32,
    ) -> Result<VerifyOutcome, PlayerError> {
        let Some(expected) = action
            .expected_screenshot
            .as_ref()
            .filter(|_| action.needs_verification())
        else {
            return Ok(VerifyOutcome::trivial_pass());
        };
        self.verifier
            .verify(
                self.surface.as_ref(),
                &self.tabs,
                virtual_id,
                expected,
                action.acceptable_difference_mask.as_ref(),
            )
            .await
    }

    /// Store a verification result on action `index` and classify it.
    fn record_outcome(
        &self,
        test: &mut Test,
        index: usize,
        outcome: Result<VerifyOutcome, PlayerError>,
    ) -> Result<MatchStatus, PlayerError> {
        let Some(action) = test.action_mut(index) else {
            return Ok(MatchStatus::Pass);
        };
        match outcome {
            Ok(outcome) => {
                action.match_status = outcome.status;
                action.verify_latency_ms = Some(outcome.latency.as_millis() as u64);
                if outcome.status == MatchStatus::Fail {
                    action.actual_screenshot = outcome.actual;
                    action.diff_screenshot = outcome.diff.map(|result| result.diff_image);
                }
                debug!(index, status = ?outcome.status, comparisons = outcome.comparisons, "Step verified");
                Ok(outcome.status)
            }
            Err(error) if error.is_structural() => Err(error),
            Err(error) => {
                warn!(index, %error, "Step failed");
                action.match_status = MatchStatus::Fail;
                if let Some(capture) = error.into_capture() {
                    if let Some(expected) = &action.expected_screenshot {
                        let result = diff(
                            expected,
                            &capture,
                            action.acceptable_difference_mask.as_ref(),
                            self.verifier.threshold(),
                        );
                        action.diff_screenshot = Some(result.diff_image);
                    }
                    action.actual_screenshot = Some(capture);
                }
                Ok(MatchStatus::Fail)
            }
        }
    }

    /// Make sure the action's tab is live and sized. Returns true if the
    /// target was created for this action.
    async fn prepare_tab(&mut self, action: &Action) -> Result<bool, PlayerError> {
        let virtual_id = action.target_tab_virtual_id;
        let mut created = false;
        if self.tabs.resolve(virtual_id).is_err() {
            match (&action.action_type, &action.payload) {
                (ActionType::Goto, EventPayload::Navigate { url }) => {
                    let handle = self.surface.create_target(url).await?;
                    self.surface.attach(&handle).await?;
                    info!(virtual_id, target = %handle, "Target created");
                    self.tabs.register(virtual_id, handle);
                    created = true;
                }
                _ => return Err(PlayerError::UnresolvedTab(virtual_id)),
            }
        }

        let resized = match &action.viewport {
            Some(viewport) => self.tabs.apply_viewport(virtual_id, viewport),
            None => false,
        };
        if resized || created {
            self.tabs.reconcile(self.surface.as_ref(), virtual_id).await?;
        }
        Ok(created)
    }

    async fn run_action(&mut self, action: &Action, created: bool) -> Result<(), PlayerError> {
        let virtual_id = action.target_tab_virtual_id;
        let commands = plan(action)?;
        debug!(index = action.index, action = %action.action_type, commands = commands.len(), "Dispatching");
        for command in &commands {
            match command {
                // A freshly created target already shows the url
                ReplayCommand::Navigate(_) if created => {}
                ReplayCommand::CloseTarget => {
                    let handle = self.tabs.resolve(virtual_id)?;
                    self.surface.close_target(&handle).await?;
                    self.tabs.forget(virtual_id);
                    info!(virtual_id, target = %handle, "Target closed");
                }
                command => self.dispatch_with_retry(virtual_id, command).await?,
            }
        }
        Ok(())
    }

    /// Run one command, re-attaching and retrying while the target reports
    /// it is detached, up to the configured number of attempts.
    async fn dispatch_with_retry(
        &self,
        virtual_id: u32,
        command: &ReplayCommand,
    ) -> Result<(), PlayerError> {
        let attempts = self.replay.dispatch_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let handle = self.tabs.resolve(virtual_id)?;
            let result = match command {
                ReplayCommand::Input(input) => self.surface.dispatch(&handle, input).await,
                ReplayCommand::Navigate(url) => self.surface.navigate(&handle, url).await,
                ReplayCommand::CloseTarget => self.surface.close_target(&handle).await,
            };
            match Attempt::from(result) {
                Attempt::Success(()) => return Ok(()),
                Attempt::Fatal(error) => return Err(error),
                Attempt::Retryable(error) if attempt >= attempts => {
                    return Err(PlayerError::CommandDispatch(error));
                }
                Attempt::Retryable(error) => {
                    warn!(virtual_id, attempt, %error, "Target detached, re-attaching");
                    self.surface.attach(&handle).await?;
                    self.tabs.reconcile(self.surface.as_ref(), virtual_id).await?;
                }
            }
        }
    }
}

fn require_coordinates(action: &Action) -> Result<Coordinates, PlayerError> {
    action.coordinates.ok_or_else(|| {
        PlayerError::Decode(format!(
            "{} action {} has no coordinates",
            action.action_type, action.index
        ))
    })
}

fn mismatched_payload(action: &Action) -> PlayerError {
    PlayerError::Decode(format!(
        "{} action {} carries a {:?} payload",
        action.action_type, action.index, action.payload
    ))
}

fn mouse(params: MouseEventParams) -> ReplayCommand {
    ReplayCommand::Input(InputCommand::DispatchMouseEvent(params))
}

fn key(kind: KeyEventKind, stroke: &KeyStroke) -> ReplayCommand {
    ReplayCommand::Input(InputCommand::DispatchKeyEvent(KeyEventParams::from_stroke(
        kind, stroke,
    )))
}

/// Full press: down, char for printable keys, up.
fn press(stroke: &KeyStroke, commands: &mut Vec<ReplayCommand>) {
    commands.push(key(KeyEventKind::KeyDown, stroke));
    if stroke.is_printable() {
        commands.push(key(KeyEventKind::Char, stroke));
    }
    commands.push(key(KeyEventKind::KeyUp, stroke));
}

/// Translate an action into the surface calls that replay it.
pub fn plan(action: &Action) -> Result<Vec<ReplayCommand>, PlayerError> {
    let mut commands = Vec::new();
    match action.action_type {
        ActionType::Goto => match &action.payload {
            EventPayload::Navigate { url } => commands.push(ReplayCommand::Navigate(url.clone())),
            _ => return Err(mismatched_payload(action)),
        },
        ActionType::Close => commands.push(ReplayCommand::CloseTarget),
        ActionType::Click | ActionType::Dblclick | ActionType::Contextmenu => {
            let at = require_coordinates(action)?;
            let (button, modifiers) = match (&action.payload, action.action_type) {
                (_, ActionType::Contextmenu) => (MouseButton::Right, Modifiers::NONE),
                (
                    EventPayload::Pointer {
                        button, modifiers, ..
                    },
                    _,
                ) => (*button, *modifiers),
                _ => (MouseButton::Left, Modifiers::NONE),
            };
            let clicks = if action.action_type == ActionType::Dblclick {
                2
            } else {
                1
            };
            commands.push(mouse(MouseEventParams::moved(at).with_modifiers(modifiers)));
            for click_count in 1..=clicks {
                commands.push(mouse(
                    MouseEventParams::pressed(at, button, click_count).with_modifiers(modifiers),
                ));
                commands.push(mouse(
                    MouseEventParams::released(at, button, click_count).with_modifiers(modifiers),
                ));
            }
        }
        ActionType::Keydown | ActionType::Keyup => {
            let EventPayload::Key { stroke } = &action.payload else {
                return Err(mismatched_payload(action));
            };
            if action.action_type == ActionType::Keydown {
                commands.push(key(KeyEventKind::KeyDown, stroke));
                if stroke.is_printable() {
                    commands.push(key(KeyEventKind::Char, stroke));
                }
            } else {
                commands.push(key(KeyEventKind::KeyUp, stroke));
            }
        }
        ActionType::Keys => {
            let EventPayload::Keys { strokes } = &action.payload else {
                return Err(mismatched_payload(action));
            };
            for stroke in strokes {
                match stroke.direction {
                    KeyDirection::Down => press(stroke, &mut commands),
                    KeyDirection::Up => commands.push(key(KeyEventKind::KeyUp, stroke)),
                }
            }
        }
        ActionType::Change => {
            let at = require_coordinates(action)?;
            let EventPayload::Change { value } = &action.payload else {
                return Err(mismatched_payload(action));
            };
            commands.push(ReplayCommand::Input(InputCommand::DispatchChange {
                x: at.x,
                y: at.y,
                value: value.clone(),
                timestamp: SYNTHETIC_EVENT_TIMESTAMP,
            }));
        }
        ActionType::Scroll => {
            let at = require_coordinates(action)?;
            let EventPayload::Scroll(scroll) = &action.payload else {
                return Err(mismatched_payload(action));
            };
            if scroll.origin == ScrollOrigin::Wheel {
                commands.push(mouse(MouseEventParams::moved(at)));
            }
            commands.push(ReplayCommand::Input(InputCommand::ScrollElement {
                x: at.x,
                y: at.y,
                top: scroll.top,
                left: scroll.left,
                timestamp: SYNTHETIC_EVENT_TIMESTAMP,
            }));
        }
        ActionType::Wheel | ActionType::Wheels => {
            let at = require_coordinates(action)?;
            let EventPayload::Wheels { deltas } = &action.payload else {
                return Err(mismatched_payload(action));
            };
            commands.push(mouse(MouseEventParams::moved(at)));
            for delta in deltas {
                commands.push(mouse(
                    MouseEventParams::wheel(at, delta.delta_x, delta.delta_y)
                        .with_modifiers(delta.modifiers),
                ));
            }
        }
        ActionType::Mousemove => {
            let at = require_coordinates(action)?;
            commands.push(mouse(MouseEventParams::moved(at)));
        }
        ActionType::Wait => {}
    }
    Ok(commands)
}
