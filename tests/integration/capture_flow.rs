//! Integration tests for the recording flow
//!
//! Page events -> CaptureSession -> ActionChannel messages -> Test.

use std::time::Duration;

use retrace::capture::{CaptureEffect, CaptureMessage, CaptureSession, ControllerResponse, PageEvent};
use retrace::config::CaptureTiming;
use retrace::model::{
    ActionType, EventPayload, KeyStroke, TabViewport, Test, SYNTHETIC_EVENT_TIMESTAMP,
};
use tokio::time::Instant;

async fn next_message(handle: &mut retrace::capture::CaptureSessionHandle) -> CaptureMessage {
    loop {
        match handle.next_effect().await {
            Some(CaptureEffect::Transmit(message)) => return message,
            Some(other) => panic!("Expected a transmitted message, got {:?}", other),
            None => panic!("Session ended early"),
        }
    }
}

/// Click the search box, type "hi", then pause: the controller sees three
/// messages, one at a time, and builds a contiguous test from them.
#[tokio::test(start_paused = true)]
async fn test_recording_builds_an_ordered_test() {
    let mut handle = CaptureSession::spawn(CaptureTiming::default(), 0);
    let mut test = Test::new("search");
    let viewport = Some(TabViewport::new(800, 600));

    handle.send_event(PageEvent::click("search", 120.0, 40.0, 1));
    let click = next_message(&mut handle).await;
    assert_eq!(click.action_type, ActionType::Click);
    test.append_captured(&click, 1, viewport).unwrap();

    handle.respond(ControllerResponse::Ack { args: None });
    for (key, code, key_code) in [("h", "KeyH", 72), ("i", "KeyI", 73)] {
        handle.send_event(PageEvent::key_down("search", KeyStroke::down(key, code, key_code)));
        handle.send_event(PageEvent::key_up("search", KeyStroke::up(key, code, key_code)));
    }
    let typed_at = Instant::now();
    let keys = next_message(&mut handle).await;
    assert!(typed_at.elapsed() >= Duration::from_millis(500));
    assert_eq!(keys.action_type, ActionType::Keys);
    match &keys.event_details {
        EventPayload::Keys { strokes } => {
            let typed: Vec<&str> = strokes.iter().map(|stroke| stroke.key.as_str()).collect();
            assert_eq!(typed, vec!["h", "i"]);
        }
        other => panic!("Expected key strokes, got {:?}", other),
    }
    test.append_captured(&keys, 1, viewport).unwrap();

    handle.respond(ControllerResponse::Ack { args: None });
    let wait = next_message(&mut handle).await;
    assert_eq!(wait.action_type, ActionType::Wait);
    test.append_captured(&wait, 1, viewport).unwrap();

    handle.respond(ControllerResponse::Stop { args: None });
    let summary = handle.finish().await.unwrap();
    assert_eq!(summary.transmitted, 3);
    assert_eq!(summary.user_errors, 0);

    let types: Vec<ActionType> = test.actions().iter().map(|a| a.action_type).collect();
    assert_eq!(types, vec![ActionType::Click, ActionType::Keys, ActionType::Wait]);
    let indices: Vec<usize> = test.actions().iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

/// A second click on the same element inside the window is one dblclick.
#[tokio::test(start_paused = true)]
async fn test_double_click_is_one_message() {
    let mut handle = CaptureSession::spawn(CaptureTiming::default(), 0);
    handle.send_event(PageEvent::click("row-3", 10.0, 30.0, 1));
    handle.send_event(PageEvent::click("row-3", 10.0, 30.0, 2));

    let message = next_message(&mut handle).await;
    assert_eq!(message.action_type, ActionType::Dblclick);

    handle.disconnect();
    let summary = handle.finish().await.unwrap();
    assert_eq!(summary.transmitted, 1);
}

/// The controller replays each acknowledged gesture on the live page. Those
/// echoes must not come back as new actions.
#[tokio::test(start_paused = true)]
async fn test_replay_echoes_are_not_recorded() {
    let mut handle = CaptureSession::spawn(CaptureTiming::default(), 0);
    handle.send_event(PageEvent::click("save", 40.0, 12.0, 1));
    let click = next_message(&mut handle).await;
    assert_eq!(click.action_type, ActionType::Click);

    handle.send_event(
        PageEvent::click("save", 40.0, 12.0, 1).with_timestamp(SYNTHETIC_EVENT_TIMESTAMP),
    );
    handle.respond(ControllerResponse::Ack { args: None });
    let next = next_message(&mut handle).await;
    assert_eq!(next.action_type, ActionType::Wait);

    handle.respond(ControllerResponse::Stop { args: None });
    let summary = handle.finish().await.unwrap();
    assert_eq!(summary.transmitted, 2);
}
