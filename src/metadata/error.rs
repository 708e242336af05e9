/// Errors that can occur during metadata processing
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A required image tag is absent
    #[error("Missing image tag: {0}")]
    MissingTag(&'static str),

    /// An image tag is present but has the wrong type or range
    #[error("Invalid value for image tag {key}: {value}")]
    InvalidTag {
        /// Tag name
        key: &'static str,
        /// Offending value, rendered as JSON
        value: String,
    },

    /// Unsupported pixel type string
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// OME-XML writing or parsing error
    #[error("OME-XML error: {0}")]
    XmlError(String),

    /// I/O error while reading a referenced metadata file
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}
