//! Virtual tabs: stable ids for targets the host keeps renumbering.

use std::collections::HashMap;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ResizeConfig;
use crate::model::TabViewport;
use crate::player::error::PlayerError;
use crate::player::surface::{AutomationSurface, TargetHandle, WindowSize};

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTab {
    pub virtual_id: u32,
    /// Live target, if one is currently registered.
    pub handle: Option<TargetHandle>,
    /// Geometry replay has to reproduce.
    pub viewport: Option<TabViewport>,
}

impl VirtualTab {
    fn new(virtual_id: u32) -> Self {
        Self {
            virtual_id,
            handle: None,
            viewport: None,
        }
    }

    pub fn is_blessed(&self) -> bool {
        self.viewport.map_or(false, |v| v.blessed)
    }
}

/// Maps virtual tab ids to live targets and keeps their viewports exact.
#[derive(Debug, Default)]
pub struct VirtualTabRegistry {
    tabs: HashMap<u32, VirtualTab>,
    resize: ResizeConfig,
}

impl VirtualTabRegistry {
    pub fn new(resize: ResizeConfig) -> Self {
        Self {
            tabs: HashMap::new(),
            resize,
        }
    }

    /// Bind `virtual_id` to a (new) live target. Known geometry is kept.
    pub fn register(&mut self, virtual_id: u32, handle: TargetHandle) {
        let tab = self
            .tabs
            .entry(virtual_id)
            .or_insert_with(|| VirtualTab::new(virtual_id));
        debug!(virtual_id, target = %handle, "Virtual tab bound");
        tab.handle = Some(handle);
    }

    pub fn resolve(&self, virtual_id: u32) -> Result<TargetHandle, PlayerError> {
        self.tabs
            .get(&virtual_id)
            .and_then(|tab| tab.handle.clone())
            .ok_or(PlayerError::UnresolvedTab(virtual_id))
    }

    pub fn tab(&self, virtual_id: u32) -> Option<&VirtualTab> {
        self.tabs.get(&virtual_id)
    }

    /// Record the geometry an action declares for its tab. A blessed size
    /// supersedes whatever was tracked before; an unblessed one never
    /// overrides a blessed one. Returns true if the tracked geometry changed.
    pub fn apply_viewport(&mut self, virtual_id: u32, viewport: &TabViewport) -> bool {
        let tab = self
            .tabs
            .entry(virtual_id)
            .or_insert_with(|| VirtualTab::new(virtual_id));
        match tab.viewport {
            Some(current) if current == *viewport => false,
            Some(current) if current.blessed && !viewport.blessed => false,
            _ => {
                if viewport.blessed {
                    info!(
                        virtual_id,
                        width = viewport.width,
                        height = viewport.height,
                        "Blessed viewport size is now authoritative"
                    );
                }
                tab.viewport = Some(*viewport);
                true
            }
        }
    }

    /// Drop the live handle, keeping geometry for a later re-registration.
    pub fn forget(&mut self, virtual_id: u32) -> Option<TargetHandle> {
        self.tabs.get_mut(&virtual_id)?.handle.take()
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
    }

    /// Bring the live target of `virtual_id` to its tracked geometry, if any.
    pub async fn reconcile(
        &self,
        surface: &dyn AutomationSurface,
        virtual_id: u32,
    ) -> Result<(), PlayerError> {
        let handle = self.resolve(virtual_id)?;
        let Some(viewport) = self.tabs.get(&virtual_id).and_then(|tab| tab.viewport) else {
            return Ok(());
        };
        self.resize_viewport(
            surface,
            &handle,
            viewport.width,
            viewport.height,
            viewport.zoom_factor,
        )
        .await
        .map(|_| ())
    }

    /// Nudge the outer window until the measured inner viewport is exactly
    /// `width` x `height`. Returns the number of measurements taken.
    pub async fn resize_viewport(
        &self,
        surface: &dyn AutomationSurface,
        handle: &TargetHandle,
        width: u32,
        height: u32,
        zoom_factor: f64,
    ) -> Result<u32, PlayerError> {
        surface.set_zoom(handle, zoom_factor).await?;

        let attempts = self.resize.max_attempts;
        for attempt in 1..=attempts {
            let measured = surface.measure_viewport(handle).await?;
            if measured.width == width && measured.height == height {
                debug!(target = %handle, width, height, attempt, "Viewport converged");
                return Ok(attempt);
            }
            if attempt == attempts {
                break;
            }

            let window = surface.window_size(handle).await?;
            let next = WindowSize {
                width: nudge(window.width, width, measured.width),
                height: nudge(window.height, height, measured.height),
            };
            debug!(
                target = %handle,
                attempt,
                measured_width = measured.width,
                measured_height = measured.height,
                window_width = next.width,
                window_height = next.height,
                "Resizing window"
            );
            surface.set_window_size(handle, next).await?;
            sleep(self.resize.settle_delay).await;
        }

        warn!(target = %handle, width, height, attempts, "Viewport did not converge");
        Err(PlayerError::ResizeViewport {
            width,
            height,
            attempts,
        })
    }
}

fn nudge(outer: u32, desired: u32, measured: u32) -> u32 {
    let next = i64::from(outer) + i64::from(desired) - i64::from(measured);
    next.clamp(1, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::player::mock::MockSurface;
    use crate::player::surface::ViewportMetrics;

    fn metrics(width: u32, height: u32) -> ViewportMetrics {
        ViewportMetrics { width, height }
    }

    #[test]
    fn unresolved_until_registered() {
        let mut tabs = VirtualTabRegistry::new(ResizeConfig::default());
        assert!(matches!(tabs.resolve(1), Err(PlayerError::UnresolvedTab(1))));

        tabs.register(1, TargetHandle::new("t-1"));
        assert_eq!(tabs.resolve(1).unwrap(), TargetHandle::new("t-1"));

        tabs.register(1, TargetHandle::new("t-9"));
        assert_eq!(tabs.resolve(1).unwrap(), TargetHandle::new("t-9"));

        assert_eq!(tabs.forget(1), Some(TargetHandle::new("t-9")));
        assert!(tabs.resolve(1).is_err());
    }

    #[test]
    fn blessed_geometry_wins() {
        let mut tabs = VirtualTabRegistry::new(ResizeConfig::default());
        assert!(tabs.apply_viewport(1, &TabViewport::new(800, 600)));
        assert!(!tabs.apply_viewport(1, &TabViewport::new(800, 600)));

        assert!(tabs.apply_viewport(1, &TabViewport::blessed(1024, 700)));
        assert!(tabs.tab(1).unwrap().is_blessed());
        assert!(!tabs.apply_viewport(1, &TabViewport::new(800, 600)));

        assert!(tabs.apply_viewport(1, &TabViewport::blessed(1024, 680)));
        assert_eq!(tabs.tab(1).unwrap().viewport.unwrap().height, 680);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_converges_on_fourth_measurement() {
        let surface = Arc::new(MockSurface::new().with_measurements(vec![
            metrics(1000, 750),
            metrics(1000, 750),
            metrics(1000, 750),
            metrics(1024, 768),
        ]));
        let tabs = VirtualTabRegistry::new(ResizeConfig::default());
        let handle = TargetHandle::new("t-1");

        let attempts = tabs
            .resize_viewport(surface.as_ref(), &handle, 1024, 768, 1.0)
            .await
            .unwrap();
        assert_eq!(attempts, 4);
        assert_eq!(surface.window_resizes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_gives_up_after_attempt_budget() {
        let surface = Arc::new(
            MockSurface::new().with_measurements(vec![metrics(1000, 750); 20]),
        );
        let tabs = VirtualTabRegistry::new(ResizeConfig {
            max_attempts: 3,
            settle_delay: Duration::from_millis(10),
        });

        let err = tabs
            .resize_viewport(surface.as_ref(), &TargetHandle::new("t-1"), 1024, 768, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlayerError::ResizeViewport {
                width: 1024,
                height: 768,
                attempts: 3
            }
        ));
    }

    #[test]
    fn nudge_moves_by_the_delta() {
        assert_eq!(nudge(1100, 1024, 1000), 1124);
        assert_eq!(nudge(1100, 900, 1000), 1000);
        assert_eq!(nudge(10, 0, 500), 1);
    }
}
