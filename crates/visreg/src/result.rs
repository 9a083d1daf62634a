//! Result and error types for visreg.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for visreg operations
pub type VisregResult<T> = Result<T, VisregError>;

/// Errors that can occur while capturing, comparing or storing snapshots
#[derive(Debug, Error)]
pub enum VisregError {
    /// Capture target did not become visible in time
    #[error("Capture of {target} timed out after {ms}ms")]
    CaptureTimeout {
        /// Selector or "page"
        target: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Baseline and actual rasters have different sizes
    #[error(
        "Image dimensions differ: baseline {}x{}, actual {}x{}",
        expected.0, expected.1, actual.0, actual.1
    )]
    DimensionMismatch {
        /// Baseline (width, height)
        expected: (u32, u32),
        /// Actual (width, height)
        actual: (u32, u32),
    },

    /// Comparison exceeded its tolerance policy (strict assertions only)
    #[error("Snapshot {name} differs: {diff_pixels} pixels ({diff_percentage:.4}%)")]
    ThresholdExceeded {
        /// Snapshot name
        name: String,
        /// Number of differing pixels
        diff_pixels: u64,
        /// Percentage of compared pixels that differ
        diff_percentage: f64,
    },

    /// No baseline exists and seeding is disabled
    #[error("Baseline not found: {}", path.display())]
    BaselineMissing {
        /// Resolved baseline path
        path: PathBuf,
    },

    /// A test or snapshot name cannot be used as a path segment
    #[error("Invalid name segment: {segment:?}")]
    InvalidName {
        /// Offending segment
        segment: String,
    },

    /// Snapshot options failed validation
    #[error("Invalid snapshot options: {message}")]
    InvalidOptions {
        /// Error message
        message: String,
    },

    /// Image bytes could not be decoded
    #[error("Image decode failed: {message}")]
    ImageDecode {
        /// Error message
        message: String,
    },

    /// Raster could not be encoded
    #[error("Image encode failed: {message}")]
    ImageEncode {
        /// Error message
        message: String,
    },

    /// Page interaction failed
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Browser launch failed
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Report attachment failed under the escalate policy
    #[error("Reporting failed: {0}")]
    Reporting(#[from] ReportingError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl VisregError {
    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create an invalid options error
    #[must_use]
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error is a precondition failure that must abort the test
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ThresholdExceeded { .. } | Self::Reporting(_))
    }
}

/// Failure to attach an artifact to the test report
#[derive(Debug, Error)]
pub enum ReportingError {
    /// Attachment file or index could not be written
    #[error("failed to write attachment {attachment}: {source}")]
    Io {
        /// Attachment name
        attachment: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Attachment index or summary could not be serialized
    #[error("failed to serialize attachment {attachment}: {source}")]
    Serialize {
        /// Attachment name
        attachment: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Image for an attachment could not be encoded
    #[error("failed to encode attachment {attachment}: {message}")]
    Encode {
        /// Attachment name
        attachment: String,
        /// Error message
        message: String,
    },
}

impl ReportingError {
    /// Name of the attachment that failed
    #[must_use]
    pub fn attachment(&self) -> &str {
        match self {
            Self::Io { attachment, .. }
            | Self::Serialize { attachment, .. }
            | Self::Encode { attachment, .. } => attachment,
        }
    }
}
