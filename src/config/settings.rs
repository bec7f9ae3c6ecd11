use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Debounce and aggregation windows used while recording
    pub capture: CaptureTiming,
    /// Replay step and verification parameters
    pub replay: ReplayConfig,
    /// Viewport reconciliation loop
    pub resize: ResizeConfig,
    /// Pixel comparison parameters
    pub diff: DiffConfig,
}

/// Timer windows for the event capture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTiming {
    /// Window in which a second click turns a click into a double click
    pub click_window: Duration,
    /// Idle gap that flushes buffered keystrokes as one `keys` action
    pub key_idle: Duration,
    /// Idle gap that flushes aggregated scroll offsets
    pub scroll_idle: Duration,
    /// Quiet period after the last pointer movement before a move is judged
    pub move_settle: Duration,
    /// Empty-queue period after which the last message is re-sent as `wait`
    pub idle_wait: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            click_window: Duration::from_millis(500),
            key_idle: Duration::from_millis(500),
            scroll_idle: Duration::from_millis(500),
            move_settle: Duration::from_millis(500),
            idle_wait: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Upper bound for a single verification call (MAX_VERIFY_TIMEOUT)
    pub max_verify_timeout: Duration,
    /// Delay after a failed or wrong-size screenshot capture
    pub capture_retry_backoff: Duration,
    /// Delay between two completed but mismatching comparisons
    pub poll_interval: Duration,
    /// Attempts per low-level command (first try plus re-attach retries)
    pub dispatch_attempts: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_verify_timeout: Duration::from_secs(15),
            capture_retry_backoff: Duration::from_millis(100),
            poll_interval: Duration::from_millis(50),
            dispatch_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeConfig {
    pub max_attempts: u32,
    pub settle_delay: Duration,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            settle_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffConfig {
    /// Perceptual colour distance threshold in `0.0..=1.0`
    pub threshold: f64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCaptureConfig {
    pub click_window_ms: Option<u64>,
    pub key_idle_ms: Option<u64>,
    pub scroll_idle_ms: Option<u64>,
    pub move_settle_ms: Option<u64>,
    pub idle_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlReplayConfig {
    pub max_verify_timeout_secs: Option<u64>,
    pub capture_retry_backoff_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub dispatch_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlResizeConfig {
    pub max_attempts: Option<u32>,
    pub settle_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlDiffConfig {
    pub threshold: Option<f64>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub capture: Option<TomlCaptureConfig>,
    pub replay: Option<TomlReplayConfig>,
    pub resize: Option<TomlResizeConfig>,
    pub diff: Option<TomlDiffConfig>,
}

fn override_ms(target: &mut Duration, value: Option<u64>) {
    if let Some(ms) = value {
        *target = Duration::from_millis(ms);
    }
}

impl Config {
    /// Load configuration from file, merging with defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match fs::read_to_string(&config_file) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(
                        path = %config_file.display(),
                        error = %err,
                        "Ignoring malformed config file"
                    );
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Parse a TOML document and merge it over the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();

        if let Some(capture) = toml_config.capture {
            override_ms(&mut config.capture.click_window, capture.click_window_ms);
            override_ms(&mut config.capture.key_idle, capture.key_idle_ms);
            override_ms(&mut config.capture.scroll_idle, capture.scroll_idle_ms);
            override_ms(&mut config.capture.move_settle, capture.move_settle_ms);
            override_ms(&mut config.capture.idle_wait, capture.idle_wait_ms);
        }

        if let Some(replay) = toml_config.replay {
            if let Some(secs) = replay.max_verify_timeout_secs {
                config.replay.max_verify_timeout = Duration::from_secs(secs);
            }
            override_ms(
                &mut config.replay.capture_retry_backoff,
                replay.capture_retry_backoff_ms,
            );
            override_ms(&mut config.replay.poll_interval, replay.poll_interval_ms);
            if let Some(attempts) = replay.dispatch_attempts {
                config.replay.dispatch_attempts = attempts.max(1);
            }
        }

        if let Some(resize) = toml_config.resize {
            if let Some(attempts) = resize.max_attempts {
                config.resize.max_attempts = attempts.max(1);
            }
            override_ms(&mut config.resize.settle_delay, resize.settle_delay_ms);
        }

        if let Some(diff) = toml_config.diff {
            if let Some(threshold) = diff.threshold {
                config.diff.threshold = threshold.clamp(0.0, 1.0);
            }
        }

        Ok(config)
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.replay.max_verify_timeout = timeout;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.diff.threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.capture.click_window, Duration::from_millis(500));
        assert_eq!(config.capture.idle_wait, Duration::from_millis(1000));
        assert_eq!(config.replay.dispatch_attempts, 2);
        assert_eq!(config.resize.max_attempts, 10);
        assert!((config.diff.threshold - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = Config::from_toml_str(
            r#"
            [capture]
            click_window_ms = 300

            [replay]
            max_verify_timeout_secs = 4

            [diff]
            threshold = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.click_window, Duration::from_millis(300));
        assert_eq!(config.capture.key_idle, Duration::from_millis(500));
        assert_eq!(config.replay.max_verify_timeout, Duration::from_secs(4));
        assert_eq!(config.replay.dispatch_attempts, 2);
        assert!((config.diff.threshold - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn example_config_parses() {
        let config = Config::from_toml_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.capture, CaptureTiming::default());
        assert_eq!(config.resize, ResizeConfig::default());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml_str("[capture\nclick_window_ms = ").is_err());
    }
}
