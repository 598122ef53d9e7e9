//! CLI command definitions for onboard_forge.

use std::sync::Arc;

use clap::Parser;
use regex::Regex;
use tracing::{error, info};

use crate::agent::HostedAgentRunner;
use crate::config::{ConnectionConfig, PollConfig};
use crate::pipeline::{OnboardingRequest, PipelineError, PipelineOrchestrator};
use crate::render::{PollingJobClient, ProxiedRenderApi};
use crate::session::ToolRouterClient;

/// Permissive "looks like a GitHub repository URL" pattern.
const GITHUB_URL_PATTERN: &str = r"^(https?://)?(www\.)?github\.com/[\w-]+/[\w.-]+$";

/// GitHub onboarding video pipeline.
#[derive(Parser)]
#[command(name = "onboard-forge")]
#[command(about = "Onboard a new team member: analyze a repo, render a video, notify the team")]
#[command(version)]
#[command(
    long_about = "onboard-forge automates new team member onboarding: a tool-calling agent\nanalyzes a GitHub repository and writes a short narration script, an\nasynchronous rendering job turns it into a talking-avatar video, and the\nteam is notified on Slack with the video link.\n\nExample usage:\n  onboard-forge run --name Ada --repo https://github.com/org/repo"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the onboarding pipeline for one new team member.
    Run(RunArgs),
}

/// Arguments for `onboard-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Name of the person being onboarded.
    #[arg(short, long)]
    pub name: String,

    /// GitHub repository URL to analyze.
    #[arg(short, long)]
    pub repo: String,

    /// Maximum number of render status reads before giving up.
    #[arg(long, default_value = "80")]
    pub max_polls: u32,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline(args).await,
    }
}

fn show_banner() {
    println!("========================================");
    println!(" GitHub Onboarding Video Pipeline ✨");
    println!("========================================");
    println!();
}

/// Validates the two free-form inputs before anything else runs.
fn validate_inputs(args: &RunArgs) -> anyhow::Result<OnboardingRequest> {
    let name = args.name.trim();
    if name.is_empty() {
        anyhow::bail!("Name cannot be empty");
    }

    let repo = args.repo.trim();
    let pattern = Regex::new(GITHUB_URL_PATTERN).expect("static pattern compiles");
    if !pattern.is_match(repo) {
        anyhow::bail!("'{repo}' is not a valid GitHub repository URL");
    }

    Ok(OnboardingRequest {
        name: name.to_string(),
        github_url: repo.to_string(),
    })
}

async fn run_pipeline(args: RunArgs) -> anyhow::Result<()> {
    show_banner();

    let request = validate_inputs(&args)?;

    // Configuration failures abort before any external call is made.
    let config = ConnectionConfig::from_env().map_err(PipelineError::Config)?;
    let capabilities = Arc::new(ToolRouterClient::from_env()?);
    let agent = Arc::new(HostedAgentRunner::from_env()?);
    let render_api = Arc::new(ProxiedRenderApi::from_env()?);
    let render = PollingJobClient::new(
        render_api,
        PollConfig::default().with_max_polls(args.max_polls),
    );

    let orchestrator = PipelineOrchestrator::new(capabilities, agent, render, config);

    info!(name = %request.name, repo = %request.github_url, "Starting the onboarding workflow");

    match orchestrator.run(&request).await {
        Ok(result) => {
            println!("Onboarding workflow complete!");
            println!("Video: {}", result.video_url);
            println!("[FINAL MESSAGE] {}", result.notification_confirmation);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Onboarding workflow failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(name: &str, repo: &str) -> RunArgs {
        RunArgs {
            name: name.to_string(),
            repo: repo.to_string(),
            max_polls: 80,
        }
    }

    #[test]
    fn test_validate_inputs_accepts_github_urls() {
        for repo in [
            "https://github.com/org/repo",
            "http://github.com/org/repo",
            "github.com/org/some-repo.rs",
            "www.github.com/a-b/c_d",
        ] {
            let request = validate_inputs(&args("Ada", repo)).expect("valid repo");
            assert_eq!(request.github_url, repo);
        }
    }

    #[test]
    fn test_validate_inputs_rejects_bad_urls() {
        for repo in [
            "",
            "https://gitlab.com/org/repo",
            "github.com/only-org",
            "not a url",
        ] {
            assert!(validate_inputs(&args("Ada", repo)).is_err(), "repo: {repo}");
        }
    }

    #[test]
    fn test_validate_inputs_rejects_empty_name() {
        assert!(validate_inputs(&args("   ", "github.com/org/repo")).is_err());
    }

    #[test]
    fn test_validate_inputs_trims_whitespace() {
        let request =
            validate_inputs(&args("  Ada ", "  https://github.com/org/repo  ")).expect("valid");
        assert_eq!(request.name, "Ada");
        assert_eq!(request.github_url, "https://github.com/org/repo");
    }
}
