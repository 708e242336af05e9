//! Image labels and the persisted label ordering.
//!
//! Every plane in a dataset is keyed by its `(channel, slice, frame, position)`
//! coordinate. On disk the key is written as `"c_z_t_p"`; in memory the read index
//! is a sorted map whose order depends on two flags stored in the summary metadata
//! (`SlicesFirst`, `TimeFirst`). Reopening a dataset must reuse the same flags, so
//! the ordering travels with the summary rather than with the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coordinate of a single image plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageLabel {
    /// Channel index
    pub channel: u32,
    /// Z-slice index
    pub slice: u32,
    /// Time-frame index
    pub frame: u32,
    /// Stage-position index
    pub position: u32,
}

/// Coordinates used by the read API. Same shape as a label.
pub type Coords = ImageLabel;

impl ImageLabel {
    /// Create a label from its four indices.
    pub const fn new(channel: u32, slice: u32, frame: u32, position: u32) -> Self {
        Self {
            channel,
            slice,
            frame,
            position,
        }
    }

    /// Key used for the per-image entries of `_metadata.txt` files.
    pub fn frame_key(&self) -> String {
        format!("FrameKey-{}-{}-{}", self.frame, self.channel, self.slice)
    }
}

impl fmt::Display for ImageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.channel, self.slice, self.frame, self.position
        )
    }
}

/// Error returned when a label string is not of the form `c_z_t_p`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed image label: {0:?}")]
pub struct ParseLabelError(pub String);

impl FromStr for ImageLabel {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_').map(|p| p.trim().parse::<u32>());
        let mut next = || -> Result<u32, ParseLabelError> {
            match parts.next() {
                Some(Ok(v)) => Ok(v),
                _ => Err(ParseLabelError(s.to_string())),
            }
        };
        let label = ImageLabel::new(next()?, next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ParseLabelError(s.to_string()));
        }
        Ok(label)
    }
}

/// Sort key: four indices, outermost first.
pub type SortKey = [u32; 4];

/// Which axis varies fastest in the read index.
///
/// | slices_first | time_first | order (outer → inner)            |
/// |--------------|------------|----------------------------------|
/// | true         | false      | position, frame, channel, slice  |
/// | false        | false      | position, frame, slice, channel  |
/// | true         | true       | position, channel, slice, frame  |
/// | false        | true       | position, slice, channel, frame  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelOrdering {
    /// Z varies faster than channel
    pub slices_first: bool,
    /// Time varies fastest of all
    pub time_first: bool,
}

impl Default for LabelOrdering {
    fn default() -> Self {
        Self {
            slices_first: true,
            time_first: false,
        }
    }
}

impl LabelOrdering {
    /// Create an ordering from the two persisted flags.
    pub const fn new(slices_first: bool, time_first: bool) -> Self {
        Self {
            slices_first,
            time_first,
        }
    }

    /// Compute the sort key of a label under this ordering.
    pub fn sort_key(&self, label: &ImageLabel) -> SortKey {
        let (c, z, t, p) = (label.channel, label.slice, label.frame, label.position);
        match (self.slices_first, self.time_first) {
            (true, false) => [p, t, c, z],
            (false, false) => [p, t, z, c],
            (true, true) => [p, c, z, t],
            (false, true) => [p, z, c, t],
        }
    }

    /// Invert [`sort_key`](Self::sort_key).
    pub fn label_from_key(&self, key: &SortKey) -> ImageLabel {
        let [p, a, b, d] = *key;
        match (self.slices_first, self.time_first) {
            (true, false) => ImageLabel::new(b, d, a, p),
            (false, false) => ImageLabel::new(d, b, a, p),
            (true, true) => ImageLabel::new(a, b, d, p),
            (false, true) => ImageLabel::new(b, a, d, p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_label_string_round_trip() {
        let label = ImageLabel::new(1, 2, 3, 4);
        assert_eq!(label.to_string(), "1_2_3_4");
        assert_eq!("1_2_3_4".parse::<ImageLabel>().unwrap(), label);
    }

    #[test]
    fn test_malformed_labels_rejected() {
        assert!("1_2_3".parse::<ImageLabel>().is_err());
        assert!("1_2_3_4_5".parse::<ImageLabel>().is_err());
        assert!("a_2_3_4".parse::<ImageLabel>().is_err());
        assert!("".parse::<ImageLabel>().is_err());
    }

    #[test]
    fn test_slices_first_orders_z_innermost() {
        let ordering = LabelOrdering::new(true, false);
        let mut labels = vec![
            ImageLabel::new(1, 0, 0, 0),
            ImageLabel::new(0, 1, 0, 0),
            ImageLabel::new(0, 0, 0, 0),
        ];
        labels.sort_by_key(|l| ordering.sort_key(l));
        assert_eq!(
            labels,
            vec![
                ImageLabel::new(0, 0, 0, 0),
                ImageLabel::new(0, 1, 0, 0),
                ImageLabel::new(1, 0, 0, 0),
            ]
        );
    }

    #[test]
    fn test_channels_first_orders_channel_innermost() {
        let ordering = LabelOrdering::new(false, false);
        let mut labels = vec![
            ImageLabel::new(0, 1, 0, 0),
            ImageLabel::new(1, 0, 0, 0),
            ImageLabel::new(0, 0, 0, 0),
        ];
        labels.sort_by_key(|l| ordering.sort_key(l));
        assert_eq!(
            labels,
            vec![
                ImageLabel::new(0, 0, 0, 0),
                ImageLabel::new(1, 0, 0, 0),
                ImageLabel::new(0, 1, 0, 0),
            ]
        );
    }

    #[test]
    fn test_time_first_orders_frame_innermost() {
        let ordering = LabelOrdering::new(true, true);
        let mut labels = vec![
            ImageLabel::new(0, 1, 0, 0),
            ImageLabel::new(0, 0, 1, 0),
            ImageLabel::new(0, 0, 0, 0),
        ];
        labels.sort_by_key(|l| ordering.sort_key(l));
        assert_eq!(labels[1], ImageLabel::new(0, 0, 1, 0));
    }

    proptest! {
        #[test]
        fn prop_sort_key_is_invertible(
            c in 0u32..64, z in 0u32..64, t in 0u32..64, p in 0u32..64,
            slices_first: bool, time_first: bool,
        ) {
            let ordering = LabelOrdering::new(slices_first, time_first);
            let label = ImageLabel::new(c, z, t, p);
            prop_assert_eq!(ordering.label_from_key(&ordering.sort_key(&label)), label);
        }

        #[test]
        fn prop_position_is_always_outermost(
            a in (0u32..8, 0u32..8, 0u32..8),
            b in (0u32..8, 0u32..8, 0u32..8),
            slices_first: bool, time_first: bool,
        ) {
            let ordering = LabelOrdering::new(slices_first, time_first);
            let first = ImageLabel::new(a.0, a.1, a.2, 0);
            let second = ImageLabel::new(b.0, b.1, b.2, 1);
            prop_assert!(ordering.sort_key(&first) < ordering.sort_key(&second));
        }
    }
}
