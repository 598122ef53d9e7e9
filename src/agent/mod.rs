//! Hosted reasoning-engine adapter.
//!
//! Wraps a tool-calling agent API: given instruction text and a scoped
//! [`ToolSession`] endpoint as its sole capability surface, the engine
//! autonomously issues tool calls and reports one final textual result, or
//! nothing. This adapter performs no validation of the result content; the
//! agent's output is the agent's responsibility.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::AgentError;
use crate::session::ToolSession;

/// Default API base for the hosted reasoning engine.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Label under which the session endpoint is exposed to the engine.
const TOOL_SERVER_LABEL: &str = "tool_router";

/// Model capability tier for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Cheaper tier for mechanical instruction-following.
    Standard,
    /// Stronger tier for analysis and writing.
    Advanced,
}

impl ModelTier {
    /// Concrete model identifier for this tier.
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelTier::Standard => "gpt-4o-mini",
            ModelTier::Advanced => "gpt-4o",
        }
    }
}

/// A hosted reasoning engine that can exercise a tool session.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Runs the engine against the given instructions and session.
    ///
    /// Blocks until the engine reports a final result or an unrecoverable
    /// error. Returns `None` if the engine terminates without producing a
    /// final output; callers must treat that as a stage failure, never as an
    /// empty-string success.
    ///
    /// Side effects performed by the engine through the session (repository
    /// reads, chat posts) are non-transactional and are not rolled back if
    /// the engine fails partway.
    async fn invoke(
        &self,
        instructions: &str,
        session: &ToolSession,
        tier: ModelTier,
    ) -> Result<Option<String>, AgentError>;
}

/// Client for an OpenAI-style responses API with hosted MCP tool support.
pub struct HostedAgentRunner {
    /// Base URL for the API.
    api_base: String,
    /// API key for authentication.
    api_key: String,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl HostedAgentRunner {
    /// Creates a new runner with explicit configuration.
    pub fn new(api_base: String, api_key: String) -> Self {
        Self {
            api_base,
            api_key,
            // Agent runs can take minutes while the engine makes tool calls.
            http_client: Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Creates a new runner from environment variables.
    ///
    /// Reads `OPENAI_API_KEY` (required) and `OPENAI_API_BASE` (optional).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingApiKey`] if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, AgentError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| AgentError::MissingApiKey)?;
        let api_base = env::var("OPENAI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Ok(Self::new(api_base, api_key))
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

/// Request body for the responses API.
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    input: &'a str,
    tools: Vec<McpTool<'a>>,
}

/// Hosted MCP tool declaration pointing at the session endpoint.
#[derive(Debug, Serialize)]
struct McpTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    server_label: &'static str,
    server_url: &'a str,
    require_approval: &'static str,
}

/// Response body from the responses API.
///
/// On the wire the final text lives in the `output` array, as `output_text`
/// content parts of `message` items. A top-level `output_text` field is an
/// SDK convenience; it is kept as a fallback for compatible proxies.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    output_text: Option<String>,
}

/// One item of the response `output` array.
#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

/// One content part of a `message` output item.
#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ApiResponse {
    /// Collects the engine's final text, if any.
    fn final_text(&self) -> Option<String> {
        let collected = self
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if !collected.trim().is_empty() {
            return Some(collected);
        }

        self.output_text
            .clone()
            .filter(|text| !text.trim().is_empty())
    }
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl AgentRunner for HostedAgentRunner {
    async fn invoke(
        &self,
        instructions: &str,
        session: &ToolSession,
        tier: ModelTier,
    ) -> Result<Option<String>, AgentError> {
        let request = ApiRequest {
            model: tier.model_id(),
            input: instructions,
            tools: vec![McpTool {
                tool_type: "mcp",
                server_label: TOOL_SERVER_LABEL,
                server_url: &session.endpoint,
                require_approval: "never",
            }],
        };

        let url = format!("{}/responses", self.api_base);

        tracing::info!(model = tier.model_id(), "Invoking hosted agent");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|resp| resp.error.message)
                .unwrap_or(body);

            return Err(AgentError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))?;

        tracing::info!(status = %api_response.status, "Hosted agent finished");

        // An empty final output carries no stage value; surface it as absent.
        Ok(api_response.final_text())
    }
}
