//! Per-image tags.
//!
//! Tags travel with every plane as a JSON object and are stored verbatim in the
//! plane's `MicroManagerMetadata` TIFF tag. Only a handful of keys are interpreted
//! by the storage engine; everything else is preserved untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::label::ImageLabel;

use super::MetadataError;

/// Tag keys understood by the storage engine
pub mod keys {
    /// Channel index
    pub const CHANNEL_INDEX: &str = "ChannelIndex";
    /// Z-slice index
    pub const SLICE_INDEX: &str = "SliceIndex";
    /// Time-frame index
    pub const FRAME_INDEX: &str = "FrameIndex";
    /// Stage-position index
    pub const POSITION_INDEX: &str = "PositionIndex";
    /// Image width in pixels
    pub const WIDTH: &str = "Width";
    /// Image height in pixels
    pub const HEIGHT: &str = "Height";
    /// Pixel type (`GRAY8` or `GRAY16`)
    pub const PIXEL_TYPE: &str = "PixelType";
    /// Milliseconds since acquisition start
    pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
    /// Stage X position in micrometers
    pub const X_POSITION_UM: &str = "XPositionUm";
    /// Stage Y position in micrometers
    pub const Y_POSITION_UM: &str = "YPositionUm";
    /// Focus position in micrometers
    pub const Z_POSITION_UM: &str = "ZPositionUm";
    /// Human-readable stage position name
    pub const POSITION_NAME: &str = "PositionName";
    /// Channel name
    pub const CHANNEL: &str = "Channel";
    /// Set on blank planes written to complete an aborted frame
    pub const FILLER: &str = "Filler";
}

/// Supported pixel types. Pixels are stored little-endian, one sample per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelType {
    /// 8-bit grayscale
    Gray8,
    /// 16-bit grayscale
    #[default]
    Gray16,
}

impl PixelType {
    /// Bytes occupied by one pixel
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelType::Gray8 => 1,
            PixelType::Gray16 => 2,
        }
    }

    /// Value of the TIFF BitsPerSample tag
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            PixelType::Gray8 => 8,
            PixelType::Gray16 => 16,
        }
    }

    /// Inverse of [`bits_per_sample`](Self::bits_per_sample)
    pub fn from_bits_per_sample(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(PixelType::Gray8),
            16 => Some(PixelType::Gray16),
            _ => None,
        }
    }

    /// Tag string form
    pub const fn as_str(self) -> &'static str {
        match self {
            PixelType::Gray8 => "GRAY8",
            PixelType::Gray16 => "GRAY16",
        }
    }

    /// OME `Pixels/@Type` value
    pub const fn ome_type(self) -> &'static str {
        match self {
            PixelType::Gray8 => "uint8",
            PixelType::Gray16 => "uint16",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GRAY8" => Ok(PixelType::Gray8),
            "GRAY16" => Ok(PixelType::Gray16),
            _ => Err(MetadataError::UnsupportedPixelType(s.to_string())),
        }
    }
}

/// JSON object of per-image tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageTags(Map<String, Value>);

impl ImageTags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the minimal tag set describing one plane.
    pub fn for_plane(label: ImageLabel, width: u32, height: u32, pixel_type: PixelType) -> Self {
        let mut tags = Self::new();
        tags.set_label(label);
        tags.insert(keys::WIDTH, width);
        tags.insert(keys::HEIGHT, height);
        tags.insert(keys::PIXEL_TYPE, pixel_type.as_str());
        tags
    }

    /// Wrap an existing JSON object
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Look up a raw tag value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or replace a tag
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parse from JSON. The document must be an object.
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        Ok(Self(serde_json::from_str(json)?))
    }

    fn index(&self, key: &'static str) -> Result<u32, MetadataError> {
        let value = self.0.get(key).ok_or(MetadataError::MissingTag(key))?;
        let parsed = match value {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse::<u32>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| MetadataError::InvalidTag {
            key,
            value: value.to_string(),
        })
    }

    fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// `ChannelIndex`
    pub fn channel_index(&self) -> Result<u32, MetadataError> {
        self.index(keys::CHANNEL_INDEX)
    }

    /// `SliceIndex`
    pub fn slice_index(&self) -> Result<u32, MetadataError> {
        self.index(keys::SLICE_INDEX)
    }

    /// `FrameIndex`
    pub fn frame_index(&self) -> Result<u32, MetadataError> {
        self.index(keys::FRAME_INDEX)
    }

    /// `PositionIndex`
    pub fn position_index(&self) -> Result<u32, MetadataError> {
        self.index(keys::POSITION_INDEX)
    }

    /// The plane's label. All four indices must be present.
    pub fn label(&self) -> Result<ImageLabel, MetadataError> {
        Ok(ImageLabel::new(
            self.channel_index()?,
            self.slice_index()?,
            self.frame_index()?,
            self.position_index()?,
        ))
    }

    /// Write all four indices of `label`
    pub fn set_label(&mut self, label: ImageLabel) {
        self.insert(keys::CHANNEL_INDEX, label.channel);
        self.insert(keys::SLICE_INDEX, label.slice);
        self.insert(keys::FRAME_INDEX, label.frame);
        self.insert(keys::POSITION_INDEX, label.position);
    }

    /// `Width`
    pub fn width(&self) -> Result<u32, MetadataError> {
        self.index(keys::WIDTH)
    }

    /// `Height`
    pub fn height(&self) -> Result<u32, MetadataError> {
        self.index(keys::HEIGHT)
    }

    /// `PixelType`
    pub fn pixel_type(&self) -> Result<PixelType, MetadataError> {
        match self.0.get(keys::PIXEL_TYPE) {
            Some(Value::String(s)) => s.parse(),
            Some(other) => Err(MetadataError::InvalidTag {
                key: keys::PIXEL_TYPE,
                value: other.to_string(),
            }),
            None => Err(MetadataError::MissingTag(keys::PIXEL_TYPE)),
        }
    }

    /// `ElapsedTime-ms`
    pub fn elapsed_time_ms(&self) -> Option<f64> {
        self.number(keys::ELAPSED_TIME_MS)
    }

    /// `XPositionUm`
    pub fn x_position_um(&self) -> Option<f64> {
        self.number(keys::X_POSITION_UM)
    }

    /// `YPositionUm`
    pub fn y_position_um(&self) -> Option<f64> {
        self.number(keys::Y_POSITION_UM)
    }

    /// `ZPositionUm`
    pub fn z_position_um(&self) -> Option<f64> {
        self.number(keys::Z_POSITION_UM)
    }

    /// `PositionName`
    pub fn position_name(&self) -> Option<&str> {
        self.0.get(keys::POSITION_NAME).and_then(Value::as_str)
    }

    /// Whether this plane was synthesized to complete an aborted frame
    pub fn is_filler(&self) -> bool {
        self.0
            .get(keys::FILLER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
