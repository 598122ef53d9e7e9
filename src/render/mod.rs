//! Asynchronous rendering job submission and polling.
//!
//! The render stage is the only genuinely stateful, asynchronous piece of
//! the pipeline. A job is submitted once through a directly-connected
//! service account, then its status is read at a fixed interval until a
//! terminal state is observed:
//!
//! ```text
//! SUBMITTED --(poll: pending)--> SUBMITTED
//! SUBMITTED --(poll: completed)--> DONE(video_url)
//! SUBMITTED --(poll: failed)--> FAILED(detail)
//! ```
//!
//! The loop is bounded: after `max_polls` status reads without a terminal
//! state, the job is declared stuck and the stage fails with a timeout
//! rather than polling forever.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PollConfig;
use crate::error::{RenderError, SessionError};
use crate::session::AccountHandle;

/// Default API base for the proxying capability service.
const DEFAULT_API_BASE: &str = "https://backend.composio.dev/api/v3";

/// Avatar used for the onboarding presenter.
pub const AVATAR_ID: &str = "Georgia_sitting_office_front";

/// Voice used for the onboarding narration.
pub const VOICE_ID: &str = "bb7b00990ce0483ab1e6bd1122ec658f";

/// Specification of a talking-avatar video to render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderSpec {
    pub dimension: Dimension,
    pub video_inputs: Vec<VideoInput>,
}

/// Output video dimensions in pixels.
#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

/// One scene of the rendered video.
#[derive(Debug, Clone, Serialize)]
pub struct VideoInput {
    pub character: Character,
    pub voice: Voice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
}

/// The on-screen avatar.
#[derive(Debug, Clone, Serialize)]
pub struct Character {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub avatar_id: String,
    pub avatar_style: String,
}

/// Text-to-speech narration for a scene.
#[derive(Debug, Clone, Serialize)]
pub struct Voice {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub input_text: String,
    pub voice_id: String,
}

/// Scene background.
#[derive(Debug, Clone, Serialize)]
pub struct Background {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
}

impl RenderSpec {
    /// Builds the standard 30-second horizontal onboarding video spec for
    /// the given voiceover script.
    pub fn talking_avatar(script: impl Into<String>) -> Self {
        Self {
            dimension: Dimension {
                width: 1280,
                height: 720,
            },
            video_inputs: vec![VideoInput {
                character: Character {
                    kind: "avatar",
                    avatar_id: AVATAR_ID.to_string(),
                    avatar_style: "normal".to_string(),
                },
                voice: Voice {
                    kind: "text",
                    input_text: script.into(),
                    voice_id: VOICE_ID.to_string(),
                },
                background: Some(Background {
                    kind: "color",
                    value: "#ffffff".to_string(),
                }),
            }],
        }
    }
}

/// Status of a render job as observed by one poll.
///
/// Only `Completed` and `Failed` are terminal. The service's enumeration of
/// intermediate states is not assumed closed: any unrecognized status string
/// is carried in `Pending` and treated as still in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Job not finished; carries the raw status string for logging.
    Pending(String),
    /// Terminal success with the rendered video URL.
    Completed { video_url: String },
    /// Terminal failure with the service-reported diagnostic.
    Failed { detail: String },
}

/// The rendering service, reached through a connected account.
#[async_trait]
pub trait RenderApi: Send + Sync {
    /// Submits a render job and returns its job id.
    async fn submit(
        &self,
        account: &AccountHandle,
        spec: &RenderSpec,
    ) -> Result<String, RenderError>;

    /// Reads the current status of a render job.
    async fn fetch_status(
        &self,
        account: &AccountHandle,
        job_id: &str,
    ) -> Result<JobStatus, RenderError>;
}

/// Injected time source for the poll loop, so tests can observe sleeps
/// instead of waiting them out.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspends the calling task for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by the tokio timer.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Drives a render job to a terminal state.
pub struct PollingJobClient {
    api: Arc<dyn RenderApi>,
    clock: Arc<dyn Clock>,
    config: PollConfig,
}

impl PollingJobClient {
    /// Creates a client polling on the wall clock.
    pub fn new(api: Arc<dyn RenderApi>, config: PollConfig) -> Self {
        Self {
            api,
            clock: Arc::new(TokioClock),
            config,
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Submits a render job through the connected account.
    pub async fn submit(
        &self,
        account: &AccountHandle,
        spec: &RenderSpec,
    ) -> Result<String, RenderError> {
        let job_id = self.api.submit(account, spec).await?;
        tracing::info!(job_id = %job_id, "Render job submitted");
        Ok(job_id)
    }

    /// Polls the job until it reaches a terminal state.
    ///
    /// Issues one status read per interval. `completed` returns the video
    /// URL; `failed` surfaces the service diagnostic; any other status keeps
    /// polling. After `max_polls` reads without a terminal state, fails with
    /// [`RenderError::Timeout`].
    pub async fn await_completion(
        &self,
        account: &AccountHandle,
        job_id: &str,
    ) -> Result<String, RenderError> {
        let mut polls: u32 = 0;

        loop {
            let status = self.api.fetch_status(account, job_id).await?;
            polls += 1;

            match status {
                JobStatus::Completed { video_url } => {
                    tracing::info!(job_id = %job_id, polls, "Render job completed");
                    return Ok(video_url);
                }
                JobStatus::Failed { detail } => {
                    return Err(RenderError::RenderFailed {
                        job_id: job_id.to_string(),
                        detail,
                    });
                }
                JobStatus::Pending(raw) => {
                    tracing::debug!(job_id = %job_id, status = %raw, polls, "Render job still pending");
                    if polls >= self.config.max_polls {
                        return Err(RenderError::Timeout {
                            job_id: job_id.to_string(),
                            polls,
                        });
                    }
                    self.clock.sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

/// Proxy request routing a rendering-service call through a connected
/// account.
#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    endpoint: &'a str,
    method: &'static str,
    connected_account_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<ProxyParam<'a>>,
}

/// A query parameter forwarded by the proxy, placed per its `in` location.
#[derive(Debug, Serialize)]
struct ProxyParam<'a> {
    name: &'static str,
    value: &'a str,
    #[serde(rename = "in")]
    location: &'static str,
}

/// Proxy response wrapping the raw service body.
#[derive(Debug, Deserialize)]
struct ProxyResponse {
    data: serde_json::Value,
}

/// Submission response body from the rendering service.
#[derive(Debug, Deserialize)]
struct SubmitEnvelope {
    #[serde(default)]
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    #[serde(default)]
    video_id: Option<String>,
}

/// Status response body from the rendering service.
#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    #[serde(default)]
    data: Option<StatusData>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<StatusError>,
}

#[derive(Debug, Deserialize)]
struct StatusError {
    #[serde(default)]
    message: Option<String>,
}

/// Extracts the job id from a raw submission response body.
///
/// The raw body is included in the error so a rejected or reshaped response
/// can be diagnosed from the logs.
fn parse_submit_body(body: &serde_json::Value) -> Result<String, RenderError> {
    let envelope: SubmitEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| RenderError::ParseError(e.to_string()))?;

    envelope
        .data
        .and_then(|data| data.video_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RenderError::Submission {
            body: body.to_string(),
        })
}

/// Interprets a raw status response body.
///
/// Only the `status` field decides the transition; `completed` and `failed`
/// are terminal, anything else (including an absent status) is pending.
fn parse_status_body(body: &serde_json::Value) -> Result<JobStatus, RenderError> {
    let envelope: StatusEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| RenderError::ParseError(e.to_string()))?;
    let data = envelope.data.unwrap_or(StatusData {
        status: None,
        video_url: None,
        error: None,
    });

    match data.status.as_deref() {
        Some("completed") => {
            let video_url = data.video_url.filter(|url| !url.is_empty()).ok_or_else(|| {
                RenderError::ParseError("completed status without a video_url".to_string())
            })?;
            Ok(JobStatus::Completed { video_url })
        }
        Some("failed") => {
            let detail = data
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "no diagnostic provided".to_string());
            Ok(JobStatus::Failed { detail })
        }
        Some(other) => Ok(JobStatus::Pending(other.to_string())),
        None => Ok(JobStatus::Pending("<absent>".to_string())),
    }
}

/// HTTP implementation of [`RenderApi`] that proxies every call through the
/// capability service with a connected account id.
pub struct ProxiedRenderApi {
    /// Base URL of the proxying service.
    api_base: String,
    /// API key authenticating the proxy calls.
    api_key: String,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl ProxiedRenderApi {
    /// Creates a new proxied client with explicit configuration.
    pub fn new(api_base: String, api_key: String) -> Self {
        Self {
            api_base,
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Creates a new proxied client from environment variables.
    ///
    /// Reads the same `COMPOSIO_API_KEY` / `COMPOSIO_API_BASE` settings as
    /// the tool router client; both talk to the same service.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingApiKey`] if `COMPOSIO_API_KEY` is not
    /// set.
    pub fn from_env() -> Result<Self, SessionError> {
        let api_key = env::var("COMPOSIO_API_KEY").map_err(|_| SessionError::MissingApiKey)?;
        let api_base =
            env::var("COMPOSIO_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Ok(Self::new(api_base, api_key))
    }

    /// Issues one proxied call and returns the raw service body.
    async fn execute(&self, request: &ProxyRequest<'_>) -> Result<serde_json::Value, RenderError> {
        let url = format!("{}/tools/execute/proxy", self.api_base);

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| RenderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RenderError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(RenderError::RequestFailed(format!(
                "proxy returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let proxy: ProxyResponse =
            serde_json::from_str(&body).map_err(|e| RenderError::ParseError(e.to_string()))?;
        Ok(proxy.data)
    }
}

#[async_trait]
impl RenderApi for ProxiedRenderApi {
    async fn submit(
        &self,
        account: &AccountHandle,
        spec: &RenderSpec,
    ) -> Result<String, RenderError> {
        let body = serde_json::to_value(spec).map_err(|e| RenderError::ParseError(e.to_string()))?;
        let request = ProxyRequest {
            endpoint: "/v2/video/generate",
            method: "POST",
            connected_account_id: account.as_str(),
            body: Some(body),
            parameters: Vec::new(),
        };

        let data = self.execute(&request).await?;
        parse_submit_body(&data)
    }

    async fn fetch_status(
        &self,
        account: &AccountHandle,
        job_id: &str,
    ) -> Result<JobStatus, RenderError> {
        let request = ProxyRequest {
            endpoint: "/v1/video_status.get",
            method: "GET",
            connected_account_id: account.as_str(),
            body: None,
            parameters: vec![ProxyParam {
                name: "video_id",
                value: job_id,
                location: "query",
            }],
        };

        let data = self.execute(&request).await?;
        parse_status_body(&data)
    }
}
