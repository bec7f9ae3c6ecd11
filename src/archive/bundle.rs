use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::FileOptions;

use crate::model::{Screenshot, ScreenshotError, ScreenshotRole, Test};

pub const TEST_BUNDLE_SCHEMA_VERSION: u32 = 1;

const TEST_JSON: &str = "test.json";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Invalid test.json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid screenshot {name}: {source}")]
    Image {
        name: String,
        #[source]
        source: ScreenshotError,
    },
    #[error("Unsupported test bundle schema_version {found} (max supported: {supported})")]
    Schema { found: u32, supported: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestBundleMeta {
    #[serde(default)]
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub app_version: String,
}

impl TestBundleMeta {
    pub fn current() -> Self {
        Self {
            schema_version: TEST_BUNDLE_SCHEMA_VERSION,
            created_at: Utc::now(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct BundleDocument {
    meta: TestBundleMeta,
    test: Test,
}

pub struct TestBundleOpen {
    pub meta: TestBundleMeta,
    pub test: Test,
    /// Actions whose stored index did not match their position.
    pub renumbered: usize,
    /// Images attached to actions
    pub images: usize,
}

/// Zip persistence of a test: `test.json` plus one PNG per action image,
/// named `screenshots/step{index}_{role}.png`.
pub struct TestBundle;

impl TestBundle {
    pub fn create(out_path: &Path, test: &Test) -> Result<TestBundleMeta, BundleError> {
        let meta = TestBundleMeta::current();

        let zip_file = File::create(out_path)?;
        let mut zip = zip::ZipWriter::new(zip_file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(TEST_JSON, options)?;
        let document = BundleDocument {
            meta: meta.clone(),
            test: test.clone(),
        };
        zip.write_all(&serde_json::to_vec_pretty(&document)?)?;

        // PNGs are already compressed
        let stored = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for action in test.actions() {
            for role in ScreenshotRole::ALL {
                let Some(screenshot) = action.screenshot(role) else {
                    continue;
                };
                let name = role.file_name(action.index);
                let png = screenshot
                    .to_png_bytes()
                    .map_err(|source| BundleError::Image {
                        name: name.clone(),
                        source,
                    })?;
                zip.start_file(name, stored)?;
                zip.write_all(&png)?;
            }
        }

        let mut zip_file = zip.finish()?;
        zip_file.flush()?;
        debug!(path = %out_path.display(), actions = test.len(), "Test bundle written");
        Ok(meta)
    }

    pub fn open(path: &Path) -> Result<TestBundleOpen, BundleError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let BundleDocument { mut meta, mut test } = {
            let mut entry = archive.by_name(TEST_JSON)?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            serde_json::from_slice(&buf)?
        };

        if meta.schema_version > TEST_BUNDLE_SCHEMA_VERSION {
            return Err(BundleError::Schema {
                found: meta.schema_version,
                supported: TEST_BUNDLE_SCHEMA_VERSION,
            });
        }
        if meta.schema_version == 0 {
            meta.schema_version = TEST_BUNDLE_SCHEMA_VERSION;
        }

        // Image names carry the index stored in test.json, which may not
        // match the position if the file was edited by hand.
        let positions: HashMap<usize, usize> = test
            .actions()
            .iter()
            .enumerate()
            .map(|(position, action)| (action.index, position))
            .collect();
        let renumbered = test.renumber();
        if renumbered > 0 {
            warn!(path = %path.display(), renumbered, "Bundle had non-contiguous action indices");
        }

        let mut images = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if name == TEST_JSON {
                continue;
            }
            let Some((stored_index, role)) = ScreenshotRole::parse_file_name(&name) else {
                debug!(name = %name, "Ignoring unknown bundle entry");
                continue;
            };
            let Some(action) = positions
                .get(&stored_index)
                .and_then(|position| test.action_mut(*position))
            else {
                debug!(name = %name, "Ignoring screenshot for a missing action");
                continue;
            };
            let mut png = Vec::new();
            entry.read_to_end(&mut png)?;
            let screenshot = Screenshot::from_png_bytes(&png)
                .map_err(|source| BundleError::Image { name, source })?;
            action.set_screenshot(role, screenshot);
            images += 1;
        }

        Ok(TestBundleOpen {
            meta,
            test,
            renumbered,
            images,
        })
    }
}
