//! Error types for onboard-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Connection configuration loading
//! - Tool router sessions and connected accounts
//! - Hosted reasoning-agent invocations
//! - Render job submission and polling
//!
//! Pipeline-level errors (stage failures and aborts) live in
//! [`crate::pipeline`] next to the orchestrator that produces them.

use thiserror::Error;

/// Errors that can occur while loading connection configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Errors reported by the capability-granting service.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Missing API key: COMPOSIO_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Session creation rejected ({code}): {message}")]
    SessionCreation { code: u16, message: String },

    #[error("Account connection rejected ({code}): {message}")]
    AccountConnection { code: u16, message: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse tool router response: {0}")]
    ParseError(String),
}

/// Errors that can occur while invoking the hosted reasoning engine.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Agent finished without producing a final output")]
    NoResult,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse agent response: {0}")]
    ParseError(String),
}

/// Errors that can occur while driving a rendering job.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render submission returned no job id; response body: {body}")]
    Submission { body: String },

    #[error("Render job '{job_id}' failed: {detail}")]
    RenderFailed { job_id: String, detail: String },

    #[error("Render job '{job_id}' not finished after {polls} status reads")]
    Timeout { job_id: String, polls: u32 },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse render response: {0}")]
    ParseError(String),
}
