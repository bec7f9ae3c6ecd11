//! End-to-end replay against the scripted surface
//!
//! MockSurface -> Player -> ScreenshotVerifier -> RasterDiff, on virtual time.

use std::sync::Arc;
use std::time::Duration;

use retrace::config::{Config, ResizeConfig};
use retrace::model::MatchStatus;
use retrace::player::{
    MockSurface, Player, PlayerError, TargetHandle, ViewportMetrics, VirtualTabRegistry,
};
use tokio::time::Instant;

use super::common::{full_mask, goto_then_click, page, with_changed_pixels};

fn short_timeout() -> Config {
    Config::default().with_verify_timeout(Duration::from_secs(1))
}

/// The tab renders exactly the expected screenshot.
#[tokio::test(start_paused = true)]
async fn test_exact_render_passes() {
    let expected = page();
    let surface = Arc::new(MockSurface::new().with_screen(expected.clone()));
    let mut player = Player::new(surface.clone(), &Config::default());
    let mut test = goto_then_click(expected);

    let outcome = player.play(&mut test, 0, false).await.unwrap();

    assert_eq!(outcome.status, MatchStatus::Pass);
    assert_eq!(outcome.stopped_at, None);
    assert_eq!(outcome.dispatched, 2);
    assert_eq!(surface.navigations(), vec!["http://x".to_string()]);
    // moved + pressed + released
    assert_eq!(surface.dispatched().len(), 3);
    let click = test.action(1).unwrap();
    assert_eq!(click.match_status, MatchStatus::Pass);
    assert!(click.actual_screenshot.is_none());
}

/// 50 differing pixels and no mask: fail once the timeout runs out, with
/// diagnostics attached to the action.
#[tokio::test(start_paused = true)]
async fn test_persistent_difference_fails_after_timeout() {
    let expected = page();
    let surface =
        Arc::new(MockSurface::new().with_screen(with_changed_pixels(&expected, 50)));
    let config = short_timeout();
    let mut player = Player::new(surface.clone(), &config);
    let mut test = goto_then_click(expected);
    let started = Instant::now();

    let outcome = player.play(&mut test, 0, false).await.unwrap();

    assert_eq!(outcome.status, MatchStatus::Fail);
    assert_eq!(outcome.stopped_at, Some(1));
    assert!(started.elapsed() >= config.replay.max_verify_timeout);
    // Replay stopped before the click was dispatched
    assert_eq!(outcome.dispatched, 1);
    assert!(surface.dispatched().is_empty());

    let click = test.action(1).unwrap();
    assert_eq!(click.match_status, MatchStatus::Fail);
    assert!(click.diff_screenshot.is_some());
    assert!(click.actual_screenshot.is_some());
    assert!(click.verify_latency_ms.unwrap() >= 1_000);
}

/// Same difference, but the action carries a mask over the whole page.
#[tokio::test(start_paused = true)]
async fn test_full_mask_allows_the_difference() {
    let expected = page();
    let surface =
        Arc::new(MockSurface::new().with_screen(with_changed_pixels(&expected, 50)));
    let mut player = Player::new(surface, &short_timeout());
    let mut test = goto_then_click(expected);
    test.action_mut(1).unwrap().acceptable_difference_mask = Some(full_mask(800, 600));

    let outcome = player.play(&mut test, 0, false).await.unwrap();

    assert_eq!(outcome.status, MatchStatus::Allow);
    assert_eq!(test.action(1).unwrap().match_status, MatchStatus::Allow);
    assert_eq!(test.overall_status(), MatchStatus::Allow);
}

/// The page settles only after a few captures.
#[tokio::test(start_paused = true)]
async fn test_late_render_passes_within_timeout() {
    let expected = page();
    let loading = with_changed_pixels(&expected, 800);
    let surface = Arc::new(
        MockSurface::new()
            .with_capture_failures(2)
            .with_screenshots(vec![loading.clone(), loading])
            .with_screen(expected.clone()),
    );
    let mut player = Player::new(surface.clone(), &Config::default());
    let mut test = goto_then_click(expected);

    let outcome = player.play(&mut test, 0, false).await.unwrap();

    assert_eq!(outcome.status, MatchStatus::Pass);
    assert_eq!(surface.captured_screenshots().len(), 5);
}

/// Replaying again from the failed step after the page was fixed.
#[tokio::test(start_paused = true)]
async fn test_resume_from_failure() {
    let expected = page();
    let surface =
        Arc::new(MockSurface::new().with_screen(with_changed_pixels(&expected, 50)));
    let mut player = Player::new(surface.clone(), &short_timeout());
    let mut test = goto_then_click(expected.clone());

    let first = player.play(&mut test, 0, false).await.unwrap();
    assert_eq!(first.status, MatchStatus::Fail);
    assert_eq!(first.stopped_at, Some(1));
    assert!(surface.dispatched().is_empty());

    surface.set_screen(expected);
    let resumed = player
        .play(&mut test, first.stopped_at.unwrap(), true)
        .await
        .unwrap();
    assert_eq!(resumed.status, MatchStatus::Pass);
    assert_eq!(resumed.dispatched, 1);
    // The goto was not replayed, the click that failed verification was
    assert_eq!(surface.navigations().len(), 1);
    assert_eq!(surface.dispatched().len(), 3);
    assert!(test.action(1).unwrap().actual_screenshot.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_flag_stops_verification() {
    let expected = page();
    let surface =
        Arc::new(MockSurface::new().with_screen(with_changed_pixels(&expected, 50)));
    let mut player = Player::new(surface, &Config::default());
    let cancel = player.cancel_flag();
    let mut test = goto_then_click(expected);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });
    let started = Instant::now();
    let outcome = player.play(&mut test, 0, false).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(outcome.status, MatchStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(test.action(1).unwrap().match_status, MatchStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_start_past_the_end_is_rejected() {
    let mut player = Player::new(Arc::new(MockSurface::new()), &Config::default());
    let mut test = goto_then_click(page());

    let err = player.play(&mut test, 3, false).await.unwrap_err();
    assert!(matches!(err, PlayerError::InvalidStart { start: 3, len: 2 }));
}

/// Desired 1024x768; three measurements of 1000x750, then 1024x768.
#[tokio::test(start_paused = true)]
async fn test_resize_converges_after_four_attempts() {
    let short = ViewportMetrics {
        width: 1000,
        height: 750,
    };
    let surface = MockSurface::new().with_measurements(vec![
        short,
        short,
        short,
        ViewportMetrics {
            width: 1024,
            height: 768,
        },
    ]);
    let tabs = VirtualTabRegistry::new(ResizeConfig::default());

    let attempts = tabs
        .resize_viewport(&surface, &TargetHandle::new("target-1"), 1024, 768, 1.0)
        .await
        .unwrap();

    assert_eq!(attempts, 4);
    let resizes = surface.window_resizes();
    assert_eq!(resizes.len(), 3);
    assert_eq!(resizes[0].width, 1280 + 24);
    assert_eq!(resizes[0].height, 800 + 18);
}
