//! Tagged image: a pixel buffer plus its JSON tags.

use crate::label::ImageLabel;
use crate::metadata::{ImageTags, MetadataError, PixelType};

/// One 2-D plane as produced by an acquisition or returned by a read
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedImage {
    /// Little-endian pixel bytes, row-major
    pub pixels: Vec<u8>,
    /// Per-image tags
    pub tags: ImageTags,
}

/// Geometry of a plane, derived from its tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Sample format
    pub pixel_type: PixelType,
}

impl PlaneGeometry {
    /// Bytes needed for one plane of this geometry
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_type.bytes_per_pixel()
    }
}

impl TaggedImage {
    /// Create an image from raw parts
    pub fn new(pixels: Vec<u8>, tags: ImageTags) -> Self {
        Self { pixels, tags }
    }

    /// Zero-filled plane with minimal tags for `label`
    pub fn blank(label: ImageLabel, width: u32, height: u32, pixel_type: PixelType) -> Self {
        let tags = ImageTags::for_plane(label, width, height, pixel_type);
        let geometry = PlaneGeometry {
            width,
            height,
            pixel_type,
        };
        Self {
            pixels: vec![0; geometry.byte_len()],
            tags,
        }
    }

    /// Label from the tags
    pub fn label(&self) -> Result<ImageLabel, MetadataError> {
        self.tags.label()
    }

    /// Width, height, and pixel type from the tags
    pub fn geometry(&self) -> Result<PlaneGeometry, MetadataError> {
        Ok(PlaneGeometry {
            width: self.tags.width()?,
            height: self.tags.height()?,
            pixel_type: self.tags.pixel_type()?,
        })
    }

    /// Check that the pixel buffer matches the declared geometry.
    ///
    /// Returns the geometry on success, or `(expected, actual)` byte lengths.
    pub fn validate(&self) -> Result<PlaneGeometry, ImageValidationError> {
        let geometry = self.geometry()?;
        let expected = geometry.byte_len();
        if expected == 0 {
            return Err(ImageValidationError::EmptyPlane);
        }
        if self.pixels.len() != expected {
            return Err(ImageValidationError::SizeMismatch {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(geometry)
    }
}

/// Reasons a [`TaggedImage`] cannot be stored
#[derive(Debug, thiserror::Error)]
pub enum ImageValidationError {
    /// Geometry tags missing or malformed
    #[error("{0}")]
    Tags(#[from] MetadataError),

    /// Width or height is zero
    #[error("Plane has zero width or height")]
    EmptyPlane,

    /// Pixel buffer length does not match the geometry
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Bytes required by the tags
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_plane_is_valid() {
        let image = TaggedImage::blank(ImageLabel::new(1, 0, 2, 0), 8, 4, PixelType::Gray16);
        let geometry = image.validate().unwrap();
        assert_eq!(geometry.byte_len(), 64);
        assert_eq!(image.label().unwrap(), ImageLabel::new(1, 0, 2, 0));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut image = TaggedImage::blank(ImageLabel::default(), 8, 4, PixelType::Gray8);
        image.pixels.pop();
        assert!(matches!(
            image.validate(),
            Err(ImageValidationError::SizeMismatch {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn test_missing_geometry_rejected() {
        let image = TaggedImage::new(vec![0; 4], ImageTags::new());
        assert!(matches!(
            image.validate(),
            Err(ImageValidationError::Tags(MetadataError::MissingTag("Width")))
        ));
    }

    #[test]
    fn test_zero_sized_plane_rejected() {
        let image = TaggedImage::blank(ImageLabel::default(), 0, 4, PixelType::Gray8);
        assert!(matches!(
            image.validate(),
            Err(ImageValidationError::EmptyPlane)
        ));
    }
}
