//! Where retrace keeps its files.
//!
//! Everything lives under one data directory: `config.toml`, `logs/` and
//! `tests/`, the default home of recorded test bundles. The directory is
//! chosen once at startup from `--data-dir`, then `$RETRACE_HOME`, then
//! `~/.retrace`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "RETRACE_HOME";

pub const BUNDLE_EXTENSION: &str = "zip";

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Fix the data directory for the rest of the process. Call it from `main`
/// before anything reads a path; only the first call counts.
pub fn init_data_dir(flag: Option<PathBuf>) {
    let path = pick_data_dir(flag, std::env::var_os(DATA_DIR_ENV), dirs::home_dir());
    if let Err(ignored) = DATA_DIR.set(path) {
        tracing::debug!(
            ignored = %ignored.display(),
            "Data directory already chosen, keeping the first"
        );
    }
}

fn pick_data_dir(
    flag: Option<PathBuf>,
    env: Option<OsString>,
    home: Option<PathBuf>,
) -> PathBuf {
    flag.or_else(|| env.filter(|value| !value.is_empty()).map(PathBuf::from))
        .or_else(|| home.map(|home| home.join(".retrace")))
        .unwrap_or_else(|| PathBuf::from(".retrace"))
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(|| {
        pick_data_dir(None, std::env::var_os(DATA_DIR_ENV), dirs::home_dir())
    })
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join("retrace.log")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Default location of recorded test bundles.
pub fn bundles_dir() -> PathBuf {
    data_dir().join("tests")
}

/// Turn a bundle argument into a path. Existing files, and anything with a
/// directory part or an extension, are used as given. A bare name such as
/// `checkout` means `tests/checkout.zip` in the data directory.
pub fn resolve_bundle(arg: &Path) -> PathBuf {
    resolve_bundle_in(&bundles_dir(), arg)
}

fn resolve_bundle_in(bundles: &Path, arg: &Path) -> PathBuf {
    let has_dir = arg
        .parent()
        .map_or(false, |parent| !parent.as_os_str().is_empty());
    if arg.exists() || has_dir || arg.extension().is_some() {
        return arg.to_path_buf();
    }
    bundles.join(arg).with_extension(BUNDLE_EXTENSION)
}
