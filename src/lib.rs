//! onboard_forge: automated GitHub onboarding video pipeline.
//!
//! A tool-calling agent analyzes a repository and writes a short narration
//! script, an asynchronous rendering job turns it into a talking-avatar
//! video, and the team is notified in a chat channel with the video link.

// Core modules
pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod render;
pub mod session;

// Re-export commonly used error types
pub use error::{AgentError, ConfigError, RenderError, SessionError};
pub use pipeline::{PipelineError, PipelineOrchestrator, PipelineResult, StageError};
