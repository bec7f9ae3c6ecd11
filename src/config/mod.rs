mod settings;

pub use settings::{
    CaptureTiming, Config, DiffConfig, ReplayConfig, ResizeConfig, EXAMPLE_CONFIG,
};
