//! Screenshot verification: poll the live tab until it matches the expected
//! screenshot or the time budget runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ReplayConfig;
use crate::model::{MatchStatus, Screenshot};
use crate::player::error::PlayerError;
use crate::player::surface::AutomationSurface;
use crate::player::tabs::VirtualTabRegistry;
use crate::raster::{diff, DiffResult};

/// Externally settable cancellation flag, shared with whoever drives replay.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub status: MatchStatus,
    pub latency: Duration,
    /// Last screenshot compared, kept for diagnostics.
    pub actual: Option<Screenshot>,
    pub diff: Option<DiffResult>,
    /// Completed comparisons, not counting failed or wrong-size captures.
    pub comparisons: u32,
}

impl VerifyOutcome {
    /// Outcome for a step that needs no verification.
    pub fn trivial_pass() -> Self {
        Self {
            status: MatchStatus::Pass,
            latency: Duration::ZERO,
            actual: None,
            diff: None,
            comparisons: 0,
        }
    }
}

pub struct ScreenshotVerifier {
    config: ReplayConfig,
    threshold: f64,
    cancel: CancelFlag,
}

impl ScreenshotVerifier {
    pub fn new(config: ReplayConfig, threshold: f64, cancel: CancelFlag) -> Self {
        Self {
            config,
            threshold,
            cancel,
        }
    }

    /// Poll `virtual_id` until it shows `expected` (modulo `mask`).
    ///
    /// Returns `Pass`/`Allow` on a match, `Fail` with the last actual and diff
    /// once the timeout passes, and `Cancelled` as soon as the flag is seen.
    /// Errors only if no comparison could ever be made. Resizing a blessed
    /// tab counts against the same deadline.
    pub async fn verify(
        &self,
        surface: &dyn AutomationSurface,
        tabs: &VirtualTabRegistry,
        virtual_id: u32,
        expected: &Screenshot,
        mask: Option<&Screenshot>,
    ) -> Result<VerifyOutcome, PlayerError> {
        let started = Instant::now();
        let deadline = started + self.config.max_verify_timeout;

        let mut needs_resize = false;
        let mut comparisons = 0u32;
        let mut wrong_size: Option<((u32, u32), Screenshot)> = None;
        let mut last: Option<(Screenshot, DiffResult)> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(virtual_id, "Verification cancelled");
                return Ok(VerifyOutcome {
                    status: MatchStatus::Cancelled,
                    latency: started.elapsed(),
                    actual: None,
                    diff: None,
                    comparisons,
                });
            }
            if Instant::now() >= deadline {
                break;
            }

            if needs_resize {
                match timeout_at(deadline, tabs.reconcile(surface, virtual_id)).await {
                    Err(_) => break,
                    Ok(Ok(())) => needs_resize = false,
                    Ok(Err(PlayerError::ResizeViewport { attempts, .. })) => {
                        // Poll on until the deadline
                        warn!(virtual_id, attempts, "Resize did not converge, polling on");
                        self.back_off(deadline).await;
                        continue;
                    }
                    Ok(Err(error)) => return Err(error),
                }
            }
            let handle = tabs.resolve(virtual_id)?;

            let captured = match timeout_at(deadline, surface.capture_screenshot(&handle)).await
            {
                Ok(captured) => captured,
                Err(_) => break,
            };
            let actual = match captured
                .map_err(PlayerError::from)
                .and_then(|data| Screenshot::from_base64_png(&data).map_err(PlayerError::from))
            {
                Ok(actual) => actual,
                Err(error) => {
                    debug!(virtual_id, %error, "Screenshot capture failed, retrying");
                    self.back_off(deadline).await;
                    continue;
                }
            };

            if let Some(viewport) = tabs.tab(virtual_id).and_then(|tab| tab.viewport) {
                let declared = (viewport.width, viewport.height);
                if viewport.blessed && actual.dimensions() != declared {
                    debug!(
                        virtual_id,
                        width = actual.width(),
                        height = actual.height(),
                        "Screenshot does not match blessed size, resizing"
                    );
                    wrong_size = Some((declared, actual));
                    needs_resize = true;
                    self.back_off(deadline).await;
                    continue;
                }
            }

            let result = diff(expected, &actual, mask, self.threshold);
            comparisons += 1;
            if let Some(status) = result.classification() {
                debug!(
                    virtual_id,
                    comparisons,
                    masked = result.consumed_mask_pixels(),
                    "Screenshot matched"
                );
                return Ok(VerifyOutcome {
                    status,
                    latency: started.elapsed(),
                    actual: Some(actual),
                    diff: Some(result),
                    comparisons,
                });
            }
            debug!(
                virtual_id,
                differing_pixels = result.differing_pixels,
                "Screenshot differs, polling"
            );
            last = Some((actual, result));
            sleep_until((Instant::now() + self.config.poll_interval).min(deadline)).await;
        }

        match last {
            Some((actual, result)) => {
                warn!(
                    virtual_id,
                    comparisons,
                    differing_pixels = result.differing_pixels,
                    "Screenshot mismatch at timeout"
                );
                Ok(VerifyOutcome {
                    status: MatchStatus::Fail,
                    latency: started.elapsed(),
                    actual: Some(actual),
                    diff: Some(result),
                    comparisons,
                })
            }
            None => match wrong_size {
                Some((expected, capture)) => Err(PlayerError::IncorrectScreenshotSize {
                    expected,
                    actual: capture.dimensions(),
                    capture: Box::new(capture),
                }),
                None => Err(PlayerError::ScreenshotCaptureFailure(
                    self.config.max_verify_timeout,
                )),
            },
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn back_off(&self, deadline: Instant) {
        sleep_until((Instant::now() + self.config.capture_retry_backoff).min(deadline)).await;
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::config::ResizeConfig;
    use crate::model::TabViewport;
    use crate::player::mock::{MockSurface, SurfaceCall};
    use crate::player::surface::{TargetHandle, ViewportMetrics};

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn registry() -> VirtualTabRegistry {
        let mut tabs = VirtualTabRegistry::new(ResizeConfig::default());
        tabs.register(1, TargetHandle::new("t-1"));
        tabs
    }

    fn verifier(cancel: CancelFlag) -> ScreenshotVerifier {
        ScreenshotVerifier::new(ReplayConfig::default(), 0.1, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_capture_failures_are_retried() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new()
            .with_screen(expected.clone())
            .with_capture_failures(3);

        let outcome = verifier(CancelFlag::new())
            .verify(&surface, &registry(), 1, &expected, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Pass);
        assert_eq!(outcome.comparisons, 1);
        assert!(outcome.latency >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn never_capturing_is_an_error_not_a_fail() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new();

        let err = verifier(CancelFlag::new())
            .verify(&surface, &registry(), 1, &expected, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::ScreenshotCaptureFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn only_wrong_sizes_for_a_blessed_tab_is_a_size_error() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new().with_screen(Screenshot::filled(18, 10, WHITE));
        let mut tabs = registry();
        tabs.apply_viewport(1, &TabViewport::blessed(20, 10));

        let err = verifier(CancelFlag::new())
            .verify(&surface, &tabs, 1, &expected, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlayerError::IncorrectScreenshotSize {
                expected: (20, 10),
                actual: (18, 10),
                ..
            }
        ));
        assert_eq!(err.into_capture().map(|shot| shot.dimensions()), Some((18, 10)));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_size_capture_resizes_and_then_passes() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new()
            .with_chrome(16, 80)
            .with_screenshots(vec![Screenshot::filled(18, 10, WHITE)])
            .with_screen(expected.clone());
        let mut tabs = registry();
        tabs.apply_viewport(1, &TabViewport::blessed(20, 10));

        let outcome = verifier(CancelFlag::new())
            .verify(&surface, &tabs, 1, &expected, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Pass);
        assert_eq!(outcome.comparisons, 1);
        assert_eq!(surface.captured_screenshots().len(), 2);
        // 1280x800 window with 16x80 chrome, nudged to a 20x10 viewport
        assert_eq!(
            surface
                .window_resizes()
                .iter()
                .map(|size| (size.width, size.height))
                .collect::<Vec<_>>(),
            vec![(36, 90)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn right_size_blessed_tab_is_left_alone() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new().with_screen(expected.clone());
        let mut tabs = registry();
        tabs.apply_viewport(1, &TabViewport::blessed(20, 10));

        let outcome = verifier(CancelFlag::new())
            .verify(&surface, &tabs, 1, &expected, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Pass);
        assert!(!surface
            .calls()
            .iter()
            .any(|call| matches!(call, SurfaceCall::SetZoom(..) | SurfaceCall::SetWindowSize(..))));
    }

    #[tokio::test(start_paused = true)]
    async fn resizing_that_never_converges_stays_within_the_timeout() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new()
            .with_screen(Screenshot::filled(18, 10, WHITE))
            .with_measurements(vec![ViewportMetrics { width: 10, height: 10 }; 50]);
        let mut tabs = registry();
        tabs.apply_viewport(1, &TabViewport::blessed(20, 10));
        let config = ReplayConfig {
            max_verify_timeout: Duration::from_millis(200),
            ..ReplayConfig::default()
        };
        let started = Instant::now();

        let err = ScreenshotVerifier::new(config, 0.1, CancelFlag::new())
            .verify(&surface, &tabs, 1, &expected, None)
            .await
            .unwrap_err();
        assert!(started.elapsed() <= config.max_verify_timeout);
        assert!(matches!(
            err,
            PlayerError::IncorrectScreenshotSize {
                expected: (20, 10),
                actual: (18, 10),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resize_keeps_polling_until_the_deadline() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new()
            .with_screen(Screenshot::filled(18, 10, WHITE))
            .with_measurements(vec![ViewportMetrics { width: 10, height: 10 }; 50]);
        let mut tabs = VirtualTabRegistry::new(ResizeConfig {
            max_attempts: 2,
            settle_delay: Duration::from_millis(10),
        });
        tabs.register(1, TargetHandle::new("t-1"));
        tabs.apply_viewport(1, &TabViewport::blessed(20, 10));
        let config = ReplayConfig {
            max_verify_timeout: Duration::from_secs(1),
            ..ReplayConfig::default()
        };

        let err = ScreenshotVerifier::new(config, 0.1, CancelFlag::new())
            .verify(&surface, &tabs, 1, &expected, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::IncorrectScreenshotSize { .. }));
        assert!(surface.window_resizes().len() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatch_fails_at_the_timeout_with_diagnostics() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new().with_screen(Screenshot::filled(20, 10, Rgba([0, 0, 0, 255])));
        let started = Instant::now();

        let outcome = verifier(CancelFlag::new())
            .verify(&surface, &registry(), 1, &expected, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Fail);
        assert!(outcome.comparisons > 1);
        assert_eq!(outcome.diff.unwrap().differing_pixels, 200);
        assert!(outcome.actual.is_some());
        assert!(started.elapsed() >= ReplayConfig::default().max_verify_timeout);
        assert!(started.elapsed() < ReplayConfig::default().max_verify_timeout + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_seen_immediately() {
        let expected = Screenshot::filled(20, 10, WHITE);
        let surface = MockSurface::new().with_screen(expected.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = verifier(cancel)
            .verify(&surface, &registry(), 1, &expected, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, MatchStatus::Cancelled);
        assert!(surface.captured_screenshots().is_empty());
    }
}
