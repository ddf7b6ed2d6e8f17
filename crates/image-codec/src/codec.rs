//! Decoded image values and the codec that produces them

use crate::format::ImageFormat;
use image::{DynamicImage, ImageReader, RgbaImage};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// An image whose container has been validated.
///
/// Pixels are only materialised once [`ImageCodec::decompress`] has run;
/// until then the value carries the original encoded bytes and dimensions.
#[derive(Clone)]
pub struct DecodedImage {
    format: ImageFormat,
    width: u32,
    height: u32,
    scale: f32,
    data: Arc<[u8]>,
    pixels: Option<Arc<RgbaImage>>,
}

impl DecodedImage {
    /// Build an image directly from a pixel buffer (no encoded source)
    pub fn from_rgba(pixels: RgbaImage, scale: f32) -> Self {
        Self {
            format: ImageFormat::Unknown,
            width: pixels.width(),
            height: pixels.height(),
            scale,
            data: Arc::from(Vec::new()),
            pixels: Some(Arc::new(pixels)),
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Encoded bytes the image was decoded from (empty for pixel-only images)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.pixels.as_deref()
    }

    pub fn is_decompressed(&self) -> bool {
        self.pixels.is_some()
    }

    /// Memory cost of the image: `width * height * scale²`
    pub fn cost(&self) -> u32 {
        let cost = self.width as f64 * self.height as f64 * (self.scale as f64).powi(2);
        cost.min(u32::MAX as f64) as u32
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("scale", &self.scale)
            .field("bytes", &self.data.len())
            .field("decompressed", &self.is_decompressed())
            .finish()
    }
}

/// Turns payload bytes into images and back
pub trait ImageCodec: Send + Sync {
    /// Detect the container format of a payload
    fn sniff_format(&self, data: &[u8]) -> ImageFormat {
        ImageFormat::sniff(data)
    }

    /// Validate a payload and read its dimensions. Returns `None` for
    /// unknown formats and corrupt headers.
    fn decode(&self, data: &[u8], scale: f32) -> Option<DecodedImage>;

    /// Force the CPU-bound pixel decode of an image
    fn decompress(&self, image: &DecodedImage, scale: f32) -> Option<DecodedImage>;

    /// Encode an image in the given format
    fn encode(&self, image: &DecodedImage, format: ImageFormat) -> Option<Vec<u8>>;
}

/// Codec backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl StandardCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageCodec for StandardCodec {
    fn decode(&self, data: &[u8], scale: f32) -> Option<DecodedImage> {
        let format = self.sniff_format(data);
        let image_format = format.to_image_format()?;

        let (width, height) = match ImageReader::with_format(Cursor::new(data), image_format)
            .into_dimensions()
        {
            Ok(dimensions) => dimensions,
            Err(e) => {
                debug!(?format, error = %e, "Failed to read image header");
                return None;
            }
        };

        Some(DecodedImage {
            format,
            width,
            height,
            scale,
            data: Arc::from(data),
            pixels: None,
        })
    }

    fn decompress(&self, image: &DecodedImage, scale: f32) -> Option<DecodedImage> {
        if let Some(pixels) = &image.pixels {
            return Some(DecodedImage {
                scale,
                pixels: Some(Arc::clone(pixels)),
                ..image.clone()
            });
        }

        let image_format = image.format.to_image_format()?;
        let decoded = match image::load_from_memory_with_format(&image.data, image_format) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(format = ?image.format, error = %e, "Failed to decompress image");
                return None;
            }
        };

        Some(DecodedImage {
            scale,
            pixels: Some(Arc::new(decoded.to_rgba8())),
            ..image.clone()
        })
    }

    fn encode(&self, image: &DecodedImage, format: ImageFormat) -> Option<Vec<u8>> {
        if format == image.format && !image.data.is_empty() {
            return Some(image.data.to_vec());
        }

        let image_format = format.to_image_format()?;
        let pixels = match &image.pixels {
            Some(pixels) => DynamicImage::ImageRgba8(pixels.as_ref().clone()),
            None => {
                let source = image.format.to_image_format()?;
                image::load_from_memory_with_format(&image.data, source).ok()?
            }
        };

        // JPEG has no alpha channel
        let pixels = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(pixels.to_rgb8()),
            _ => pixels,
        };

        let mut out = Cursor::new(Vec::new());
        match pixels.write_to(&mut out, image_format) {
            Ok(()) => Some(out.into_inner()),
            Err(e) => {
                debug!(?format, error = %e, "Failed to encode image");
                None
            }
        }
    }
}
