//! Shared test utilities for Retrace
//!
//! Screenshot and test fixtures used by the integration tests.

#![allow(dead_code)] // Used in integration tests via #[path] includes

use image::Rgba;
use retrace::model::{Action, Screenshot, Test};

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const OPAQUE: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// 800x600 page: white with a grey header bar.
pub fn page() -> Screenshot {
    let mut shot = Screenshot::filled(800, 600, WHITE);
    for y in 0..40 {
        for x in 0..800 {
            shot.image_mut().put_pixel(x, y, Rgba([60, 60, 60, 255]));
        }
    }
    shot
}

/// `base` with `count` pixels of the first body row turned black.
pub fn with_changed_pixels(base: &Screenshot, count: u32) -> Screenshot {
    let mut shot = base.clone();
    for x in 0..count {
        shot.image_mut().put_pixel(x, 100, BLACK);
    }
    shot
}

/// Mask covering every pixel of a `width` x `height` screenshot.
pub fn full_mask(width: u32, height: u32) -> Screenshot {
    Screenshot::filled(width, height, OPAQUE)
}

/// goto("http://x") followed by a click expecting `expected`.
pub fn goto_then_click(expected: Screenshot) -> Test {
    Test::from_actions(
        "goto-then-click",
        vec![
            Action::goto(1, "http://x"),
            Action::click(1, 100.0, 100.0).with_expected(expected),
        ],
    )
    .expect("valid test")
}
