pub mod archive;
pub mod capture;
pub mod config;
pub mod model;
pub mod player;
pub mod raster;
pub mod util;

pub use archive::{BundleError, TestBundle};
pub use capture::{CaptureEffect, CaptureSession, EventCaptureStateMachine};
pub use config::Config;
pub use model::{Action, ActionType, MatchStatus, Screenshot, Test};
pub use player::{AutomationSurface, PlayOutcome, Player, PlayerError};
pub use raster::{diff, DiffResult};
