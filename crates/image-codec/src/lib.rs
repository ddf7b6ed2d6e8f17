//! Image codec for the image cache
//!
//! Sniffs PNG/JPEG/GIF payloads, validates and decodes them into
//! [`DecodedImage`] values, and re-encodes images for disk persistence.

mod codec;
mod format;

pub use codec::{DecodedImage, ImageCodec, StandardCodec};
pub use format::ImageFormat;
