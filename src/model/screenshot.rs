use std::fmt;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Not a PNG data URL")]
    NotDataUrl,
}

/// A captured or expected raster, always held as straight RGBA8.
#[derive(Clone, PartialEq, Eq)]
pub struct Screenshot {
    image: RgbaImage,
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screenshot")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Screenshot {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Fully transparent canvas of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::filled(width, height, Rgba([0, 0, 0, 0]))
    }

    pub fn filled(width: u32, height: u32, pixel: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, pixel),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self, ScreenshotError> {
        let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        Ok(Self {
            image: decoded.to_rgba8(),
        })
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>, ScreenshotError> {
        let mut png = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }

    /// Decode the base64 PNG payload returned by a screenshot capture command.
    pub fn from_base64_png(data: &str) -> Result<Self, ScreenshotError> {
        let bytes = STANDARD.decode(data.trim())?;
        Self::from_png_bytes(&bytes)
    }

    pub fn to_base64_png(&self) -> Result<String, ScreenshotError> {
        Ok(STANDARD.encode(self.to_png_bytes()?))
    }

    pub fn from_data_url(url: &str) -> Result<Self, ScreenshotError> {
        let payload = url
            .strip_prefix(PNG_DATA_URL_PREFIX)
            .ok_or(ScreenshotError::NotDataUrl)?;
        Self::from_base64_png(payload)
    }

    pub fn to_data_url(&self) -> Result<String, ScreenshotError> {
        Ok(format!("{PNG_DATA_URL_PREFIX}{}", self.to_base64_png()?))
    }
}

/// Which image of an action a raster plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenshotRole {
    Expected,
    Actual,
    AcceptableDiff,
}

impl ScreenshotRole {
    pub const ALL: [ScreenshotRole; 3] = [
        ScreenshotRole::Expected,
        ScreenshotRole::Actual,
        ScreenshotRole::AcceptableDiff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotRole::Expected => "expected",
            ScreenshotRole::Actual => "actual",
            ScreenshotRole::AcceptableDiff => "acceptable-diff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expected" => Some(ScreenshotRole::Expected),
            "actual" => Some(ScreenshotRole::Actual),
            "acceptable-diff" => Some(ScreenshotRole::AcceptableDiff),
            _ => None,
        }
    }

    /// Archive path of the image for the action at `index`.
    pub fn file_name(&self, index: usize) -> String {
        format!("screenshots/step{index}_{}.png", self.as_str())
    }

    /// Inverse of [`ScreenshotRole::file_name`].
    pub fn parse_file_name(name: &str) -> Option<(usize, ScreenshotRole)> {
        let stem = name.strip_prefix("screenshots/step")?.strip_suffix(".png")?;
        let (index, role) = stem.split_once('_')?;
        Some((index.parse().ok()?, ScreenshotRole::parse(role)?))
    }
}
