use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::label::LabelOrdering;

use super::tags::PixelType;
use super::MetadataError;

fn default_true() -> bool {
    true
}

/// Dataset-wide summary metadata.
///
/// Written once into the header block of every file. Unknown keys are kept in
/// [`extra`](Self::extra) so documents produced by other tools survive a
/// read/write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// File name prefix
    #[serde(rename = "Prefix", default)]
    pub prefix: String,

    /// Planned number of channels
    #[serde(rename = "Channels", default)]
    pub channels: u32,

    /// Planned number of z-slices
    #[serde(rename = "Slices", default)]
    pub slices: u32,

    /// Planned number of time frames
    #[serde(rename = "Frames", default)]
    pub frames: u32,

    /// Planned number of stage positions
    #[serde(rename = "Positions", default)]
    pub positions: u32,

    /// Z varies faster than channel in the label ordering
    #[serde(rename = "SlicesFirst", default = "default_true")]
    pub slices_first: bool,

    /// Time varies fastest in the label ordering
    #[serde(rename = "TimeFirst", default)]
    pub time_first: bool,

    /// Channel names
    #[serde(rename = "ChNames", default, skip_serializing_if = "Vec::is_empty")]
    pub channel_names: Vec<String>,

    /// Image width in pixels
    #[serde(rename = "Width", default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    /// Image height in pixels
    #[serde(rename = "Height", default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Pixel type string (`GRAY8`, `GRAY16`)
    #[serde(rename = "PixelType", default, skip_serializing_if = "Option::is_none")]
    pub pixel_type: Option<String>,

    /// Pixel size in micrometers
    #[serde(rename = "PixelSize_um", default, skip_serializing_if = "Option::is_none")]
    pub pixel_size_um: Option<f64>,

    /// Z step in micrometers
    #[serde(rename = "z-step_um", default, skip_serializing_if = "Option::is_none")]
    pub z_step_um: Option<f64>,

    /// Planned interval between frames
    #[serde(rename = "Interval_ms", default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<f64>,

    /// Acquisition start time, RFC 3339
    #[serde(rename = "StartTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// Free-text acquisition description
    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Keys not interpreted by this crate
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SummaryMetadata {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            channels: 0,
            slices: 0,
            frames: 0,
            positions: 0,
            slices_first: true,
            time_first: false,
            channel_names: Vec::new(),
            width: None,
            height: None,
            pixel_type: None,
            pixel_size_um: None,
            z_step_um: None,
            interval_ms: None,
            start_time: None,
            comment: None,
            extra: Map::new(),
        }
    }
}

impl SummaryMetadata {
    /// Create summary metadata for an acquisition with the given planned extent.
    pub fn new(prefix: impl Into<String>, channels: u32, slices: u32, frames: u32, positions: u32) -> Self {
        Self {
            prefix: prefix.into(),
            channels,
            slices,
            frames,
            positions,
            start_time: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    /// Set the label ordering flags
    pub fn with_ordering(mut self, ordering: LabelOrdering) -> Self {
        self.slices_first = ordering.slices_first;
        self.time_first = ordering.time_first;
        self
    }

    /// Set the image geometry
    pub fn with_image_size(mut self, width: u32, height: u32, pixel_type: PixelType) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self.pixel_type = Some(pixel_type.as_str().to_string());
        self
    }

    /// Set the channel names
    pub fn with_channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Ordering of the read index encoded by this summary
    pub fn ordering(&self) -> LabelOrdering {
        LabelOrdering::new(self.slices_first, self.time_first)
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(json)?)
    }
}
