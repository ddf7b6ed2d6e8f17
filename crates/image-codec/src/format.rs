//! Image format detection from magic bytes

const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_HEADER: [u8; 3] = [0xFF, 0xD8, 0xFF];
const GIF_HEADER: [u8; 3] = [0x47, 0x49, 0x46];

/// Container formats the cache knows how to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Unknown,
}

impl ImageFormat {
    /// Detect the format of a payload from its leading bytes
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(&PNG_HEADER) {
            ImageFormat::Png
        } else if data.starts_with(&JPEG_HEADER) {
            ImageFormat::Jpeg
        } else if data.starts_with(&GIF_HEADER) {
            ImageFormat::Gif
        } else {
            ImageFormat::Unknown
        }
    }

    /// MIME type used when serving the format over HTTP
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Unknown => "application/octet-stream",
        }
    }

    pub(crate) fn to_image_format(self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Gif => Some(image::ImageFormat::Gif),
            ImageFormat::Unknown => None,
        }
    }
}
