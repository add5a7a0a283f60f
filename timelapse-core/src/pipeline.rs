//! Pipeline orchestration.
//!
//! A run moves through `Validating → Fetching → Assembling → Transcoding →
//! Delivering → Done`, or ends in `Failed` from any of them. Both trigger
//! adapters (HTTP and direct invocation) drive the same [`Pipeline::run`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;

use crate::assemble::{assemble, AnimatedArtifact, FrameSet};
use crate::config::PipelineConfig;
use crate::fetch::{FetchResult, FetchSummary, FrameFetcher};
use crate::geo::GeoQuery;
use crate::request::{build_request, FrameRequest};
use crate::transcode::{FfmpegTranscoder, Transcoder, VideoArtifact};
use crate::workspace::{RunId, RunWorkspace};
use crate::{Error, Result};

/// Base delay between retries of a frame; doubled per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validating,
    Fetching,
    Assembling,
    Transcoding,
    Delivering,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::Fetching => "fetching",
            Self::Assembling => "assembling",
            Self::Transcoding => "transcoding",
            Self::Delivering => "delivering",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Stage { run_id: RunId, stage: Stage },
    /// The normalized list of years about to be fetched
    Planned { run_id: RunId, years: Vec<i32> },
    Frame { run_id: RunId, year: i32, ok: bool },
}

/// Trigger input, as received from either adapter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub years: Option<Vec<i32>>,
}

impl RunRequest {
    pub fn new(lat: f64, lon: f64, years: Vec<i32>) -> Self {
        Self { lat: Some(lat), lon: Some(lon), years: Some(years) }
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport<T> {
    pub run_id: RunId,
    pub years: Vec<i32>,
    pub summary: FetchSummary,
    pub animation: AnimatedArtifact,
    pub video: VideoArtifact,
    /// Value returned by the delivery step
    pub delivered: T,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    fetcher: FrameFetcher,
    transcoder: Arc<dyn Transcoder>,
    events: Option<UnboundedSender<RunEvent>>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .field("events", &self.events.is_some())
            .field("interrupt", &self.interrupt.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build a pipeline using HTTP fetching and the configured ffmpeg binary.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = FrameFetcher::new(Duration::from_secs(config.fetch.timeout_secs))?;
        let transcoder = Arc::new(FfmpegTranscoder::new(config.transcode.program.clone()));
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            transcoder,
            events: None,
            interrupt: None,
        })
    }

    pub fn with_transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Arc::new(transcoder);
        self
    }

    pub fn with_fetcher(mut self, fetcher: FrameFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Flag checked at every stage boundary and between frames.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run, handing the finished video to `deliver`.
    ///
    /// Run directories are removed once delivery returns or the run fails,
    /// unless `keep_artifacts` is set. Dropping the returned future abandons
    /// the run: in-flight requests and the encoder process are cancelled, but
    /// its directories are left behind.
    pub async fn run<T, F, Fut>(&self, request: RunRequest, deliver: F) -> Result<RunReport<T>>
    where
        F: FnOnce(VideoArtifact) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let run_id = RunId::random();
        let workspace = RunWorkspace::new(&self.config.work_dir, run_id);
        let span = info_span!("run", %run_id);

        let result = self.run_stages(&workspace, request, deliver).instrument(span.clone()).await;

        if let Err(error) = &result {
            span.in_scope(|| {
                self.transition(run_id, Stage::Failed);
                match error.stage() {
                    Some(stage) => error!(%stage, %error, "run failed"),
                    None => error!(%error, "run failed"),
                }
            });
        }

        if !self.config.keep_artifacts {
            cleanup(&workspace).instrument(span).await;
        }

        result
    }

    async fn run_stages<T, F, Fut>(
        &self,
        workspace: &RunWorkspace,
        request: RunRequest,
        deliver: F,
    ) -> Result<RunReport<T>>
    where
        F: FnOnce(VideoArtifact) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let run_id = workspace.run_id();

        self.transition(run_id, Stage::Validating);
        let (query, years) = self.validate(&request)?;
        workspace.create().await?;
        self.check_interrupt(Stage::Validating)?;

        self.transition(run_id, Stage::Fetching);
        self.emit(RunEvent::Planned { run_id, years: years.clone() });
        let summary = self.fetch_all(&query, &years, workspace).await?;

        let frames = FrameSet::from_summary(&summary);
        info!(
            succeeded = frames.len(),
            failed = years.len() - frames.len(),
            years = ?frames.years(),
            "fetch complete"
        );
        if frames.is_empty() || frames.len() < self.config.fetch.min_frames {
            return Err(Error::NoFramesAvailable { attempted: years.len(), succeeded: frames.len() });
        }
        self.check_interrupt(Stage::Fetching)?;

        self.transition(run_id, Stage::Assembling);
        let animation = {
            let config = self.config.animation.clone();
            let output = workspace.animation_path();
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || span.in_scope(|| assemble(&frames, &config, &output)))
                .await??
        };
        self.check_interrupt(Stage::Assembling)?;

        self.transition(run_id, Stage::Transcoding);
        let output = workspace.video_path(&self.config.transcode.output_name);
        let video = match self.transcoder.transcode(&animation, &output).await {
            Ok(video) => video,
            Err(error) => {
                // an encoder killed by the interrupt is a cancellation, not a failure
                self.check_interrupt(Stage::Transcoding)?;
                return Err(error);
            }
        };
        self.check_interrupt(Stage::Transcoding)?;

        self.transition(run_id, Stage::Delivering);
        let delivered = deliver(video.clone()).await?;

        self.transition(run_id, Stage::Done);
        Ok(RunReport { run_id, years, summary, animation, video, delivered })
    }

    /// Check coordinates and normalize the year list: defaulted when absent,
    /// sorted ascending and deduplicated.
    fn validate(&self, request: &RunRequest) -> Result<(GeoQuery, Vec<i32>)> {
        let (Some(lat), Some(lon)) = (request.lat, request.lon) else {
            return Err(Error::InvalidInput("Latitude and longitude are required".into()));
        };

        let query = GeoQuery::new(lat, lon, self.config.half_width_degrees)?;

        let mut years = match &request.years {
            Some(years) if !years.is_empty() => years.clone(),
            _ => self.config.default_years.clone(),
        };

        if let Some(year) = years.iter().find(|y| !(1..=9999).contains(*y)) {
            return Err(Error::InvalidInput(format!("year out of range: {year}")));
        }

        years.sort_unstable();
        years.dedup();
        Ok((query, years))
    }

    async fn fetch_all(
        &self,
        query: &GeoQuery,
        years: &[i32],
        workspace: &RunWorkspace,
    ) -> Result<FetchSummary> {
        let requests: Vec<FrameRequest> = years
            .iter()
            .map(|&year| build_request(&self.config.imagery, query, year, workspace))
            .collect();

        // `buffered` yields in request order regardless of completion order.
        let mut stream = futures::stream::iter(requests)
            .map(|request| self.fetch_with_retries(request, workspace))
            .buffered(self.config.fetch.concurrency);

        let mut results = Vec::with_capacity(years.len());
        while let Some(result) = stream.next().await {
            self.emit(RunEvent::Frame {
                run_id: workspace.run_id(),
                year: result.year(),
                ok: result.is_success(),
            });
            results.push(result);

            // dropping the stream cancels whatever is still in flight
            self.check_interrupt(Stage::Fetching)?;
        }

        Ok(FetchSummary::new(results))
    }

    async fn fetch_with_retries(&self, request: FrameRequest, workspace: &RunWorkspace) -> FetchResult {
        let mut attempt = 0;
        loop {
            let result = self.fetcher.fetch(request.clone(), workspace).await;

            let retry = attempt < self.config.fetch.retries
                && result.failure().is_some_and(|reason| reason.is_retryable());
            if !retry {
                return result;
            }

            attempt += 1;
            let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1).min(16);
            warn!(year = request.year, attempt, ?delay, "retrying frame");
            tokio::time::sleep(delay).await;
        }
    }

    fn transition(&self, run_id: RunId, stage: Stage) {
        info!(%stage, "entering stage");
        self.emit(RunEvent::Stage { run_id, stage });
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // receiver going away only means nobody is watching
            let _ = events.send(event);
        }
    }

    fn check_interrupt(&self, stage: Stage) -> Result<()> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled { stage }),
            _ => Ok(()),
        }
    }
}

async fn cleanup(workspace: &RunWorkspace) {
    if let Err(error) = workspace.cleanup().await {
        warn!(?error, "failed to remove run directories");
    }
}
