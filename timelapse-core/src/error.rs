use std::path::PathBuf;

use crate::pipeline::Stage;

/// Error type for pipeline operations.
///
/// Per-frame download problems are not represented here; they are recorded as
/// [`FailureReason`](crate::FailureReason)s and only become an error when no
/// usable frames remain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid geo query: latitude {latitude}, longitude {longitude}, half width {half_width}")]
    InvalidGeoQuery {
        latitude: f64,
        longitude: f64,
        half_width: f64,
    },

    #[error("not enough valid images downloaded ({succeeded} of {attempted} requested)")]
    NoFramesAvailable { attempted: usize, succeeded: usize },

    #[error("failed to decode frame {}: {source}", .path.display())]
    FrameDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("GIF encoding error: {0}")]
    Encode(#[from] gif::EncodingError),

    #[error("transcode failed: {message}")]
    Transcode { message: String },

    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller supplied bad input (as opposed to the pipeline failing).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::InvalidGeoQuery { .. })
    }

    /// The pipeline stage this error belongs to, if it is stage specific.
    /// I/O errors can surface from any stage that touches working storage.
    pub fn stage(&self) -> Option<Stage> {
        let stage = match self {
            Self::InvalidInput(_) | Self::InvalidGeoQuery { .. } | Self::Config(_) => {
                Stage::Validating
            }
            Self::NoFramesAvailable { .. } | Self::Http(_) => Stage::Fetching,
            Self::FrameDecode { .. } | Self::Encode(_) | Self::Task(_) => Stage::Assembling,
            Self::Transcode { .. } => Stage::Transcoding,
            Self::Cancelled { stage } => *stage,
            Self::Io(_) => return None,
        };
        Some(stage)
    }
}
