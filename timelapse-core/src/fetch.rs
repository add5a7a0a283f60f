//! Frame download with content-type validation.
//!
//! A failed frame never aborts the run: every outcome is reported as a
//! [`FetchResult`] and the orchestrator decides what to do with the set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mime_guess::mime::{self, Mime};
use reqwest::header::CONTENT_TYPE;

use crate::request::FrameRequest;
use crate::workspace::RunWorkspace;
use crate::Result;

/// Why a single frame could not be used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {status}")]
    Status { status: u16, diagnostic: Option<PathBuf> },

    #[error("non-image response (content type {})", .content_type.as_deref().unwrap_or("missing"))]
    NonImage { content_type: Option<String>, diagnostic: Option<PathBuf> },

    #[error("failed to write frame: {0}")]
    Io(String),
}

impl FailureReason {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Path of the preserved response body, if one was written.
    pub fn diagnostic(&self) -> Option<&Path> {
        match self {
            Self::Status { diagnostic, .. } | Self::NonImage { diagnostic, .. } => {
                diagnostic.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success { local_path: PathBuf },
    Failed(FailureReason),
}

/// Outcome of fetching one [`FrameRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub request: FrameRequest,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn year(&self) -> i32 {
        self.request.year
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.outcome {
            FetchOutcome::Success { local_path } => Some(local_path),
            FetchOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            FetchOutcome::Success { .. } => None,
            FetchOutcome::Failed(reason) => Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success { .. })
    }
}

/// Every fetch result of a run, in ascending year order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchSummary {
    results: Vec<FetchResult>,
}

impl FetchSummary {
    pub fn new(mut results: Vec<FetchResult>) -> Self {
        results.sort_by_key(FetchResult::year);
        Self { results }
    }

    pub fn results(&self) -> &[FetchResult] {
        &self.results
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &FetchResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FetchResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }
}

/// Downloads frames over HTTP.
#[derive(Debug, Clone)]
pub struct FrameFetcher {
    client: reqwest::Client,
}

impl FrameFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Perform a single GET for `request`. No retries happen here.
    pub async fn fetch(&self, request: FrameRequest, workspace: &RunWorkspace) -> FetchResult {
        let outcome = match self.try_fetch(&request, workspace).await {
            Ok(local_path) => {
                info!(year = request.year, path = %local_path.display(), "downloaded frame");
                FetchOutcome::Success { local_path }
            }
            Err(reason) => {
                warn!(year = request.year, %reason, "discarding frame");
                FetchOutcome::Failed(reason)
            }
        };

        FetchResult { request, outcome }
    }

    async fn try_fetch(
        &self,
        request: &FrameRequest,
        workspace: &RunWorkspace,
    ) -> std::result::Result<PathBuf, FailureReason> {
        debug!(url = %request.url, "requesting frame");

        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|err| FailureReason::Network(err.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .map(str::to_owned);

        let body = response
            .bytes()
            .await
            .map_err(|err| FailureReason::Network(err.to_string()))?;

        let parsed = content_type.as_deref().and_then(|val| val.parse::<Mime>().ok());

        if !status.is_success() {
            let diagnostic = preserve_diagnostic(workspace, request.year, parsed.as_ref(), &body).await;
            return Err(FailureReason::Status { status: status.as_u16(), diagnostic });
        }

        if !parsed.as_ref().is_some_and(|m| m.type_() == mime::IMAGE) {
            warn!(year = request.year, content_type = ?content_type, "server did not return an image");
            let diagnostic = preserve_diagnostic(workspace, request.year, parsed.as_ref(), &body).await;
            return Err(FailureReason::NonImage { content_type, diagnostic });
        }

        tokio::fs::write(&request.destination, &body)
            .await
            .map_err(|err| FailureReason::Io(err.to_string()))?;

        Ok(request.destination.clone())
    }
}

/// Save a rejected response body for later inspection. Failing to do so is
/// logged but does not change the frame's failure reason.
async fn preserve_diagnostic(
    workspace: &RunWorkspace,
    year: i32,
    content_type: Option<&Mime>,
    body: &[u8],
) -> Option<PathBuf> {
    let path = workspace.diagnostic_path(year, diagnostic_extension(content_type));

    let write = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await
    };

    match write.await {
        Ok(()) => {
            info!(year, path = %path.display(), "saved response for inspection");
            Some(path)
        }
        Err(error) => {
            warn!(year, ?error, "failed to save diagnostic response");
            None
        }
    }
}

fn diagnostic_extension(content_type: Option<&Mime>) -> &'static str {
    let Some(ct) = content_type else {
        return "bin";
    };

    // OGC service exceptions come back as e.g. application/vnd.ogc.se_xml
    if ct.subtype().as_str().ends_with("xml") || ct.suffix() == Some(mime::XML) {
        "xml"
    } else if ct.subtype() == mime::HTML {
        "html"
    } else if ct.subtype() == mime::JSON || ct.suffix() == Some(mime::JSON) {
        "json"
    } else if ct.type_() == mime::TEXT {
        "txt"
    } else {
        "bin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Mime {
        s.parse().unwrap()
    }

    #[test]
    fn test_diagnostic_extension() {
        assert_eq!(diagnostic_extension(Some(&parse("application/vnd.ogc.se_xml"))), "xml");
        assert_eq!(diagnostic_extension(Some(&parse("application/octet-stream"))), "bin");
        assert_eq!(diagnostic_extension(Some(&parse("text/xml"))), "xml");
        assert_eq!(diagnostic_extension(Some(&parse("application/vnd.ogc.wms+xml"))), "xml");
        assert_eq!(diagnostic_extension(Some(&parse("text/html; charset=utf-8"))), "html");
        assert_eq!(diagnostic_extension(Some(&parse("application/json"))), "json");
        assert_eq!(diagnostic_extension(Some(&parse("text/plain"))), "txt");
        assert_eq!(diagnostic_extension(None), "bin");
    }

    #[test]
    fn test_retryable() {
        assert!(FailureReason::Network("reset".into()).is_retryable());
        assert!(!FailureReason::NonImage { content_type: None, diagnostic: None }.is_retryable());
        assert!(!FailureReason::Status { status: 500, diagnostic: None }.is_retryable());
    }

    #[test]
    fn test_summary_sorted() {
        let make = |year| FetchResult {
            request: FrameRequest {
                year,
                bbox: crate::geo::GeoQuery::new(0.0, 0.0, 0.5).unwrap().bounding_box(),
                url: String::new(),
                destination: PathBuf::from(format!("{year}.png")),
            },
            outcome: FetchOutcome::Success { local_path: PathBuf::from(format!("{year}.png")) },
        };

        let summary = FetchSummary::new(vec![make(2025), make(2023), make(2024)]);
        let years: Vec<_> = summary.results().iter().map(FetchResult::year).collect();
        assert_eq!(years, vec![2023, 2024, 2025]);
        assert_eq!(summary.success_count(), 3);
    }
}
