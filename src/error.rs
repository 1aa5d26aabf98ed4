//! Custom error types and result handling for Seisho operations.
//!
//! This module defines the error handling system used throughout Seisho.
//! All fallible operations return a [`Result<T>`] which is a type alias for
//! `std::result::Result<T, Error>`.
//!
//! Only [`Error::Precondition`] is meant to stop a production run. Page and
//! volume level errors are caught by the exporter and recorded in the run
//! summary instead of being propagated.

/// Type alias for Results with Seisho errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Seisho operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Regular expression parsing errors
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// Image decoding and processing errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// JPEG encoding errors
    #[error(transparent)]
    Jpeg(#[from] jpeg_encoder::EncodingError),
    /// EPUB generation errors
    #[error(transparent)]
    Epub(#[from] epub_builder::Error),
    /// ZIP file operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ProductionBuilder(#[from] crate::production::ProductionConfigBuilderError),
    #[error(transparent)]
    EnhancementBuilder(#[from] crate::enhance::EnhancementConfigBuilderError),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// A condition that must hold before a run may touch the filesystem
    #[error("Precondition failed: {0}")]
    Precondition(String),
    /// An optional processing capability failed and its fallback should be used
    #[error("Capability '{0}' failed: {1}")]
    Capability(&'static str, String),
    /// The packager could not produce an ebook for a volume
    #[error("Packaging failed: {0}")]
    Packager(String),
    /// Error for unsupported operations or formats (e.g., unknown image extension)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Error for resources that couldn't be found (e.g., source directory, profile)
    #[error("Not found: {0}")]
    NotFound(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
