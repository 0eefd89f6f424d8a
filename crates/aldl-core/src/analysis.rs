//! Engine analysis service
//!
//! The engine-state summary and the trouble-code explanations come from an
//! external service. It is best-effort: [`Advisor`] turns every failure into a
//! fixed fallback message so callers never see an error.
//!
//! ## Usage
//!
//! ```ignore
//! let advisor = Advisor::new(HttpAnalyst::new("http://localhost:8080")?);
//! let summary = advisor.analyze(&sample).await;
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::decode::TelemetrySample;

/// Shown when the engine summary cannot be produced
pub const ANALYSIS_FALLBACK: &str = "Engine analysis is unavailable right now.";

/// Shown when a trouble code cannot be explained
pub const EXPLANATION_FALLBACK: &str =
    "Could not fetch an explanation for this trouble code right now.";

/// Errors from the analysis service
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Request failed or the service refused it
    #[error("Analysis service unavailable: {0}")]
    Unavailable(String),

    /// Reply had no usable text
    #[error("Analysis service returned no text")]
    Empty,
}

/// External analysis collaborator
pub trait EngineAnalyst {
    /// Summarise the engine state captured in `sample`
    fn analyze(
        &self,
        sample: &TelemetrySample,
    ) -> impl Future<Output = Result<String, AnalysisError>> + Send;

    /// Explain diagnostic trouble code `code`
    fn explain_code(&self, code: &str) -> impl Future<Output = Result<String, AnalysisError>> + Send;
}

/// Wraps an analyst so failures degrade to fallback text
pub struct Advisor<A> {
    analyst: A,
}

impl<A: EngineAnalyst> Advisor<A> {
    /// Wrap `analyst`
    pub fn new(analyst: A) -> Self {
        Self { analyst }
    }

    /// Engine summary, or [`ANALYSIS_FALLBACK`]
    pub async fn analyze(&self, sample: &TelemetrySample) -> String {
        match self.analyst.analyze(sample).await.and_then(non_empty) {
            Ok(text) => text,
            Err(e) => {
                warn!("engine analysis failed: {e}");
                ANALYSIS_FALLBACK.to_string()
            }
        }
    }

    /// Explanation for `code`, or [`EXPLANATION_FALLBACK`].
    ///
    /// A blank code is not sent and yields `None`.
    pub async fn explain_code(&self, code: &str) -> Option<String> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        Some(match self.analyst.explain_code(code).await.and_then(non_empty) {
            Ok(text) => text,
            Err(e) => {
                warn!(code, "trouble code explanation failed: {e}");
                EXPLANATION_FALLBACK.to_string()
            }
        })
    }
}

fn non_empty(text: String) -> Result<String, AnalysisError> {
    if text.trim().is_empty() {
        Err(AnalysisError::Empty)
    } else {
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ExplainRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TextReply {
    #[serde(default)]
    text: String,
}

/// Analyst backed by an HTTP JSON service.
///
/// `POST {base}/analyze` receives the sample, `POST {base}/explain` receives
/// `{"code": ...}`; both reply `{"text": ...}`.
pub struct HttpAnalyst {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalyst {
    /// Client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .user_agent("aldl-core/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<String, AnalysisError> {
        let url = format!("{}/{}", self.base_url, path);
        let reply: TextReply = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
        Ok(reply.text)
    }
}

impl EngineAnalyst for HttpAnalyst {
    async fn analyze(&self, sample: &TelemetrySample) -> Result<String, AnalysisError> {
        self.post("analyze", sample).await
    }

    async fn explain_code(&self, code: &str) -> Result<String, AnalysisError> {
        self.post("explain", &ExplainRequest { code }).await
    }
}
