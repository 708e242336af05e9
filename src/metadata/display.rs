use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::label::ImageLabel;

use super::MetadataError;

/// Comment key holding the dataset-level comment
pub const SUMMARY_COMMENT_KEY: &str = "Summary";

/// Contrast and color settings for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDisplay {
    /// Channel name
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Display color as `0xRRGGBB`
    #[serde(rename = "Color", default = "default_color")]
    pub color: u32,
    /// Lower contrast limit
    #[serde(rename = "Min", default)]
    pub min: u32,
    /// Upper contrast limit
    #[serde(rename = "Max", default = "default_max")]
    pub max: u32,
    /// Display gamma
    #[serde(rename = "Gamma", default = "default_gamma")]
    pub gamma: f64,
}

fn default_color() -> u32 {
    0xFF_FF_FF
}

fn default_max() -> u32 {
    u32::from(u16::MAX)
}

fn default_gamma() -> f64 {
    1.0
}

impl ChannelDisplay {
    /// White, full-range, linear settings for a named channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: default_color(),
            min: 0,
            max: default_max(),
            gamma: default_gamma(),
        }
    }
}

/// Per-channel display settings plus free-text comments.
///
/// Comments are keyed either by [`SUMMARY_COMMENT_KEY`] or by an image label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// One entry per channel
    #[serde(rename = "Channels", default)]
    pub channels: Vec<ChannelDisplay>,
    /// Free-text comments
    #[serde(rename = "Comments", default)]
    pub comments: BTreeMap<String, String>,
}

impl DisplaySettings {
    /// Default settings for the given channel names
    pub fn for_channels<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: names.into_iter().map(ChannelDisplay::new).collect(),
            comments: BTreeMap::new(),
        }
    }

    /// Attach a comment to one plane
    pub fn set_image_comment(&mut self, label: ImageLabel, comment: impl Into<String>) {
        self.comments.insert(label.to_string(), comment.into());
    }

    /// Comment attached to one plane
    pub fn image_comment(&self, label: &ImageLabel) -> Option<&str> {
        self.comments.get(&label.to_string()).map(String::as_str)
    }

    /// Set the dataset-level comment
    pub fn set_summary_comment(&mut self, comment: impl Into<String>) {
        self.comments
            .insert(SUMMARY_COMMENT_KEY.to_string(), comment.into());
    }

    /// JSON of the channel array alone, as stored in the display-settings block
    pub fn channels_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(&self.channels)?)
    }

    /// JSON of the comment map alone, as stored in the comments block
    pub fn comments_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(&self.comments)?)
    }

    /// Reassemble settings from the two stored blocks. Either may be absent.
    pub fn from_blocks(channels: Option<&str>, comments: Option<&str>) -> Result<Self, MetadataError> {
        let channels = match channels {
            Some(json) if !json.trim().is_empty() => serde_json::from_str(json)?,
            _ => Vec::new(),
        };
        let comments = match comments {
            Some(json) if !json.trim().is_empty() => serde_json::from_str(json)?,
            _ => BTreeMap::new(),
        };
        Ok(Self { channels, comments })
    }
}
