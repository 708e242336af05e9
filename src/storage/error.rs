use crate::label::ImageLabel;

/// Errors that can occur while storing or reading a dataset
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error during directory or sidecar operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from the file codec
    #[error("TIFF error: {0}")]
    TiffError(#[from] crate::tiff::TiffError),

    /// Error processing metadata
    #[error("Metadata error: {0}")]
    MetadataError(#[from] crate::metadata::MetadataError),

    /// Dataset is finished or was opened read-only
    #[error("Dataset is read-only")]
    ReadOnly,

    /// An image with this label was already stored; the first one is kept
    #[error("Image {0} already stored")]
    DuplicateImage(ImageLabel),

    /// No image with this label
    #[error("Image {0} not found")]
    ImageNotFound(ImageLabel),

    /// Image cannot be stored as given
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Directory holds no readable file of this format
    #[error("No usable image files in {0}")]
    NoUsableFiles(String),

    /// Label ordering is fixed once the first image has been submitted
    #[error("Label ordering cannot change after images were stored")]
    OrderingLocked,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from background writer thread
    #[error("Background writer error: {0}")]
    BackgroundWriterError(String),

    /// Background writer thread panicked
    #[error("Background writer thread panicked")]
    ThreadPanicked,
}

impl From<crate::image::ImageValidationError> for StorageError {
    fn from(e: crate::image::ImageValidationError) -> Self {
        StorageError::InvalidImage(e.to_string())
    }
}
