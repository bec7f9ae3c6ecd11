//! Mock automation surface for deterministic testing
//!
//! Implements [`AutomationSurface`] without a browser: screenshots and
//! viewport measurements come from a script, and every call is recorded for
//! later assertions.
//!
//! # Example
//! ```no_run
//! use retrace::model::Screenshot;
//! use retrace::player::mock::MockSurface;
//!
//! let screen = Screenshot::blank(800, 600);
//! let surface = MockSurface::new()
//!     .with_screen(screen)
//!     .with_capture_failures(2);
//! // Hand `surface` to a Player...
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::Screenshot;
use crate::player::error::SurfaceError;
use crate::player::surface::{
    AutomationSurface, InputCommand, TargetHandle, ViewportMetrics, WindowSize,
};

/// One recorded call on the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Attach(TargetHandle),
    Detach(TargetHandle),
    Dispatch(TargetHandle, InputCommand),
    Navigate(TargetHandle, String),
    CreateTarget(String),
    CloseTarget(TargetHandle),
    CaptureScreenshot(TargetHandle),
    SetWindowSize(TargetHandle, WindowSize),
    SetZoom(TargetHandle, f64),
}

#[derive(Debug)]
struct MockState {
    calls: Vec<SurfaceCall>,
    /// Served once each, before `screen`
    screenshot_queue: VecDeque<Screenshot>,
    screen: Option<Screenshot>,
    capture_failures: u32,
    measurements: VecDeque<ViewportMetrics>,
    window: WindowSize,
    /// Browser chrome eating into the window: outer minus inner size
    chrome: (u32, u32),
    detach_failures: u32,
    dispatch_error: Option<SurfaceError>,
    next_target: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            screenshot_queue: VecDeque::new(),
            screen: None,
            capture_failures: 0,
            measurements: VecDeque::new(),
            window: WindowSize {
                width: 1280,
                height: 800,
            },
            chrome: (0, 0),
            detach_failures: 0,
            dispatch_error: None,
            next_target: 1,
        }
    }
}

/// Scripted in-memory surface.
///
/// Without scripted measurements the inner viewport is the window size minus
/// the configured chrome, so resizing converges like a real window would.
#[derive(Debug, Clone, Default)]
pub struct MockSurface {
    state: Arc<Mutex<MockState>>,
}

impl MockSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// What the page shows whenever no queued screenshot is left.
    pub fn with_screen(self, screen: Screenshot) -> Self {
        self.state.lock().screen = Some(screen);
        self
    }

    /// Screenshots served once each, in order, before the steady screen.
    pub fn with_screenshots(self, screenshots: Vec<Screenshot>) -> Self {
        self.state.lock().screenshot_queue.extend(screenshots);
        self
    }

    /// Fail the next `count` screenshot captures.
    pub fn with_capture_failures(self, count: u32) -> Self {
        self.state.lock().capture_failures = count;
        self
    }

    /// Viewport measurements served once each, before falling back to the
    /// window-derived size.
    pub fn with_measurements(self, measurements: Vec<ViewportMetrics>) -> Self {
        self.state.lock().measurements.extend(measurements);
        self
    }

    pub fn with_window(self, width: u32, height: u32) -> Self {
        self.state.lock().window = WindowSize { width, height };
        self
    }

    pub fn with_chrome(self, width: u32, height: u32) -> Self {
        self.state.lock().chrome = (width, height);
        self
    }

    /// Report the next `count` dispatches as detached.
    pub fn with_detach_failures(self, count: u32) -> Self {
        self.state.lock().detach_failures = count;
        self
    }

    /// Fail every dispatch with `error`.
    pub fn with_dispatch_error(self, error: SurfaceError) -> Self {
        self.state.lock().dispatch_error = Some(error);
        self
    }

    /// Change what the page shows from now on.
    pub fn set_screen(&self, screen: Screenshot) {
        self.state.lock().screen = Some(screen);
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.state.lock().calls.clone()
    }

    /// Input commands dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<InputCommand> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Dispatch(_, command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Navigate(_, url) | SurfaceCall::CreateTarget(url) => {
                    Some(url.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn window_resizes(&self) -> Vec<WindowSize> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::SetWindowSize(_, size) => Some(*size),
                _ => None,
            })
            .collect()
    }

    pub fn captured_screenshots(&self) -> Vec<TargetHandle> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::CaptureScreenshot(target) => Some(target.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SurfaceCall::Attach(_)))
            .count()
    }

    /// Reset all captured calls
    pub fn reset(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: SurfaceCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl AutomationSurface for MockSurface {
    async fn attach(&self, target: &TargetHandle) -> Result<(), SurfaceError> {
        self.record(SurfaceCall::Attach(target.clone()));
        Ok(())
    }

    async fn detach(&self, target: &TargetHandle) -> Result<(), SurfaceError> {
        self.record(SurfaceCall::Detach(target.clone()));
        Ok(())
    }

    async fn dispatch(
        &self,
        target: &TargetHandle,
        command: &InputCommand,
    ) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        if state.detach_failures > 0 {
            state.detach_failures -= 1;
            return Err(SurfaceError::Detached(target.to_string()));
        }
        if let Some(error) = state.dispatch_error.clone() {
            return Err(error);
        }
        state
            .calls
            .push(SurfaceCall::Dispatch(target.clone(), command.clone()));
        Ok(())
    }

    async fn navigate(&self, target: &TargetHandle, url: &str) -> Result<(), SurfaceError> {
        self.record(SurfaceCall::Navigate(target.clone(), url.to_string()));
        Ok(())
    }

    async fn create_target(&self, url: &str) -> Result<TargetHandle, SurfaceError> {
        let mut state = self.state.lock();
        let handle = TargetHandle::new(format!("target-{}", state.next_target));
        state.next_target += 1;
        state.calls.push(SurfaceCall::CreateTarget(url.to_string()));
        Ok(handle)
    }

    async fn close_target(&self, target: &TargetHandle) -> Result<(), SurfaceError> {
        self.record(SurfaceCall::CloseTarget(target.clone()));
        Ok(())
    }

    async fn capture_screenshot(&self, target: &TargetHandle) -> Result<String, SurfaceError> {
        let screenshot = {
            let mut state = self.state.lock();
            state
                .calls
                .push(SurfaceCall::CaptureScreenshot(target.clone()));
            if state.capture_failures > 0 {
                state.capture_failures -= 1;
                return Err(SurfaceError::CaptureFailed("tab is navigating".into()));
            }
            match state.screenshot_queue.pop_front() {
                Some(screenshot) => screenshot,
                None => state
                    .screen
                    .clone()
                    .ok_or_else(|| SurfaceError::CaptureFailed("nothing rendered".into()))?,
            }
        };
        screenshot
            .to_base64_png()
            .map_err(|err| SurfaceError::CaptureFailed(err.to_string()))
    }

    async fn measure_viewport(
        &self,
        _target: &TargetHandle,
    ) -> Result<ViewportMetrics, SurfaceError> {
        let mut state = self.state.lock();
        if let Some(measured) = state.measurements.pop_front() {
            return Ok(measured);
        }
        Ok(ViewportMetrics {
            width: state.window.width.saturating_sub(state.chrome.0),
            height: state.window.height.saturating_sub(state.chrome.1),
        })
    }

    async fn window_size(&self, _target: &TargetHandle) -> Result<WindowSize, SurfaceError> {
        Ok(self.state.lock().window)
    }

    async fn set_window_size(
        &self,
        target: &TargetHandle,
        size: WindowSize,
    ) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        state.window = size;
        state.calls.push(SurfaceCall::SetWindowSize(target.clone(), size));
        Ok(())
    }

    async fn set_zoom(&self, target: &TargetHandle, zoom_factor: f64) -> Result<(), SurfaceError> {
        self.record(SurfaceCall::SetZoom(target.clone(), zoom_factor));
        Ok(())
    }
}
