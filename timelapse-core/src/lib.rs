//! Satellite imagery time-lapse pipeline.
//!
//! Builds one WMS request per requested year around a geographic point,
//! downloads the returned rasters, assembles them into a looping GIF and
//! transcodes that animation into a video container.

#[macro_use]
extern crate tracing;

mod assemble;
mod config;
mod error;
mod fetch;
mod geo;
mod pipeline;
mod request;
mod transcode;
mod workspace;

pub use assemble::{assemble, AnimatedArtifact, FrameEntry, FrameSet};
pub use config::{AnimationConfig, FetchConfig, ImageryConfig, PipelineConfig, TranscodeConfig};
pub use error::Error;
pub use fetch::{FailureReason, FetchOutcome, FetchResult, FetchSummary, FrameFetcher};
pub use geo::{BoundingBox, GeoQuery};
pub use pipeline::{Pipeline, RunEvent, RunReport, RunRequest, Stage};
pub use request::{build_request, FrameRequest};
pub use transcode::{FfmpegTranscoder, Transcoder, VideoArtifact};
pub use workspace::{RunId, RunWorkspace};

pub type Result<T> = std::result::Result<T, Error>;
