//! Pipeline orchestrator for the onboarding workflow.
//!
//! Sequences the three dependent stages: script generation through a
//! repository-scoped agent session, video rendering through a directly
//! connected account driven by the polling client, and the team
//! notification through a chat-scoped agent session. Each stage's output is
//! the next stage's input; the first unrecoverable failure aborts the run.
//!
//! Reruns after a failure re-execute all stages from scratch. Side effects
//! already caused by the agent (repository reads, chat posts) are
//! non-transactional and are not deduplicated.

use std::sync::Arc;

use thiserror::Error;

use crate::agent::{AgentRunner, ModelTier};
use crate::config::ConnectionConfig;
use crate::error::{AgentError, ConfigError, RenderError, SessionError};
use crate::prompts;
use crate::render::{PollingJobClient, RenderSpec};
use crate::session::{CapabilityService, ToolkitGrant, UserIdentity};

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Repository analysis and script generation.
    Script,
    /// Asynchronous video rendering.
    Render,
    /// Team chat notification.
    Notify,
}

impl Stage {
    /// Stages that can no longer run once this stage has failed.
    fn downstream(&self) -> &'static [Stage] {
        match self {
            Stage::Script => &[Stage::Render, Stage::Notify],
            Stage::Render => &[Stage::Notify],
            Stage::Notify => &[],
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Script => write!(f, "script generation"),
            Stage::Render => write!(f, "video rendering"),
            Stage::Notify => write!(f, "team notification"),
        }
    }
}

/// Failure of a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Upstream stage produced an empty {0}")]
    EmptyOutput(&'static str),
}

/// Errors that can abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error, raised before any stage starts.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A stage failed; all downstream stages were aborted.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: StageError,
    },
}

/// The two free-form inputs of one onboarding run, validated by the caller
/// before the pipeline starts.
#[derive(Debug, Clone)]
pub struct OnboardingRequest {
    /// Name of the person being onboarded.
    pub name: String,
    /// Repository to analyze.
    pub github_url: String,
}

/// Accumulated output of the three stages, threaded linearly and write-once
/// per stage.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Voiceover script produced by the analysis stage.
    pub script_text: String,
    /// URL of the rendered onboarding video.
    pub video_url: String,
    /// Final confirmation text from the notification stage.
    pub notification_confirmation: String,
}

/// Orchestrates one onboarding run.
///
/// All collaborators are explicit dependencies with lifecycle scoped to one
/// run, so independent runs stay independent and each stage can be stubbed
/// in isolation.
pub struct PipelineOrchestrator {
    capabilities: Arc<dyn CapabilityService>,
    agent: Arc<dyn AgentRunner>,
    render: PollingJobClient,
    config: ConnectionConfig,
    user: UserIdentity,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with a fresh per-run user identity.
    pub fn new(
        capabilities: Arc<dyn CapabilityService>,
        agent: Arc<dyn AgentRunner>,
        render: PollingJobClient,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            capabilities,
            agent,
            render,
            config,
            user: UserIdentity::ephemeral(),
        }
    }

    /// Replaces the per-run identity with a stable one, for deployments that
    /// must reuse pre-registered connections across runs.
    pub fn with_identity(mut self, user: UserIdentity) -> Self {
        self.user = user;
        self
    }

    /// Runs the three stages strictly sequentially.
    ///
    /// The first failing stage aborts the run; downstream stages never
    /// start. A stage also never starts if its required upstream value is
    /// empty.
    pub async fn run(&self, request: &OnboardingRequest) -> Result<PipelineResult, PipelineError> {
        tracing::info!(name = %request.name, repo = %request.github_url, "Starting onboarding pipeline");

        let script_text = self
            .generate_script(request)
            .await
            .map_err(|source| self.abort(Stage::Script, source))?;
        if script_text.trim().is_empty() {
            return Err(self.abort(Stage::Script, StageError::EmptyOutput("script")));
        }
        tracing::info!(chars = script_text.len(), "Script generated");

        let video_url = self
            .render_video(&script_text)
            .await
            .map_err(|source| self.abort(Stage::Render, source))?;
        if video_url.trim().is_empty() {
            return Err(self.abort(Stage::Render, StageError::EmptyOutput("video URL")));
        }
        tracing::info!(video_url = %video_url, "Video rendered");

        let notification_confirmation = self
            .notify_team(request, &video_url)
            .await
            .map_err(|source| self.abort(Stage::Notify, source))?;
        tracing::info!("Team notified");

        Ok(PipelineResult {
            script_text,
            video_url,
            notification_confirmation,
        })
    }

    /// Stage 1: analyze the repository and produce the voiceover script.
    async fn generate_script(&self, request: &OnboardingRequest) -> Result<String, StageError> {
        let grants = [ToolkitGrant::new(
            "github",
            &self.config.repo_auth_config_id,
        )];
        let session = self.capabilities.create_session(&self.user, &grants).await?;

        let instructions = prompts::build_script_instructions(&request.github_url);
        let output = self
            .agent
            .invoke(&instructions, &session, ModelTier::Advanced)
            .await?;

        output.ok_or(StageError::Agent(AgentError::NoResult))
    }

    /// Stage 2: render the talking-avatar video and wait for completion.
    async fn render_video(&self, script: &str) -> Result<String, StageError> {
        let account = self
            .capabilities
            .connect_direct_account(
                &self.user,
                &self.config.render_auth_config_id,
                &self.config.render_api_key,
            )
            .await?;

        let spec = RenderSpec::talking_avatar(script);
        let job_id = self.render.submit(&account, &spec).await?;
        let video_url = self.render.await_completion(&account, &job_id).await?;
        Ok(video_url)
    }

    /// Stage 3: announce completion in the team chat channel.
    async fn notify_team(
        &self,
        request: &OnboardingRequest,
        video_url: &str,
    ) -> Result<String, StageError> {
        let grants = [ToolkitGrant::new("slack", &self.config.chat_auth_config_id)];
        let session = self.capabilities.create_session(&self.user, &grants).await?;

        let instructions = prompts::build_notification_instructions(
            &request.name,
            &self.config.chat_channel_id,
            video_url,
        );
        let output = self
            .agent
            .invoke(&instructions, &session, ModelTier::Standard)
            .await?;

        output.ok_or(StageError::Agent(AgentError::NoResult))
    }

    /// Records which downstream stages will never run, then wraps the stage
    /// failure.
    fn abort(&self, stage: Stage, source: StageError) -> PipelineError {
        for skipped in stage.downstream() {
            tracing::warn!(stage = %skipped, failed = %stage, "Stage aborted: upstream stage failed");
        }
        PipelineError::StageFailed { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::error::RenderError;
    use crate::render::{Clock, JobStatus, RenderApi};
    use crate::session::{AccountHandle, ToolSession};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Capability stub recording every requested scope.
    struct RecordingCapabilities {
        sessions: Mutex<Vec<Vec<ToolkitGrant>>>,
        accounts: Mutex<Vec<(String, String)>>,
    }

    impl RecordingCapabilities {
        fn new() -> Self {
            Self {
                sessions: Mutex::new(Vec::new()),
                accounts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CapabilityService for RecordingCapabilities {
        async fn create_session(
            &self,
            _user: &UserIdentity,
            grants: &[ToolkitGrant],
        ) -> Result<ToolSession, SessionError> {
            self.sessions.lock().unwrap().push(grants.to_vec());
            Ok(ToolSession {
                endpoint: format!("https://router.example/s/{}", grants[0].toolkit),
                grants: grants.to_vec(),
            })
        }

        async fn connect_direct_account(
            &self,
            _user: &UserIdentity,
            auth_config_id: &str,
            secret_key: &str,
        ) -> Result<AccountHandle, SessionError> {
            self.accounts
                .lock()
                .unwrap()
                .push((auth_config_id.to_string(), secret_key.to_string()));
            Ok(AccountHandle::new("ca_render"))
        }
    }

    /// Agent stub replaying scripted outputs and recording instructions.
    struct ScriptedAgent {
        outputs: Mutex<Vec<Option<String>>>,
        invocations: Mutex<Vec<(String, Vec<ToolkitGrant>)>>,
    }

    impl ScriptedAgent {
        fn new(outputs: Vec<Option<String>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentRunner for ScriptedAgent {
        async fn invoke(
            &self,
            instructions: &str,
            session: &ToolSession,
            _tier: ModelTier,
        ) -> Result<Option<String>, AgentError> {
            self.invocations
                .lock()
                .unwrap()
                .push((instructions.to_string(), session.grants.clone()));
            Ok(self.outputs.lock().unwrap().remove(0))
        }
    }

    /// Render stub returning a fixed job id and scripted statuses.
    struct StubRender {
        submits: AtomicUsize,
        statuses: Mutex<Vec<JobStatus>>,
        scripts: Mutex<Vec<String>>,
    }

    impl StubRender {
        fn new(statuses: Vec<JobStatus>) -> Self {
            Self {
                submits: AtomicUsize::new(0),
                statuses: Mutex::new(statuses),
                scripts: Mutex::new(Vec::new()),
            }
        }

        fn submit_count(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RenderApi for StubRender {
        async fn submit(
            &self,
            _account: &AccountHandle,
            spec: &RenderSpec,
        ) -> Result<String, RenderError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.scripts
                .lock()
                .unwrap()
                .push(spec.video_inputs[0].voice.input_text.clone());
            Ok("j1".to_string())
        }

        async fn fetch_status(
            &self,
            _account: &AccountHandle,
            _job_id: &str,
        ) -> Result<JobStatus, RenderError> {
            Ok(self.statuses.lock().unwrap().remove(0))
        }
    }

    struct NoopClock;

    #[async_trait]
    impl Clock for NoopClock {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            repo_auth_config_id: "ac_repo".to_string(),
            render_auth_config_id: "ac_render".to_string(),
            chat_auth_config_id: "ac_chat".to_string(),
            chat_channel_id: "C012345".to_string(),
            render_api_key: "sk-render".to_string(),
        }
    }

    fn orchestrator(
        capabilities: Arc<RecordingCapabilities>,
        agent: Arc<ScriptedAgent>,
        render_api: Arc<StubRender>,
    ) -> PipelineOrchestrator {
        let render = PollingJobClient::new(render_api, PollConfig::default())
            .with_clock(Arc::new(NoopClock));
        PipelineOrchestrator::new(capabilities, agent, render, test_config())
            .with_identity(UserIdentity::fixed("test-user"))
    }

    fn request() -> OnboardingRequest {
        OnboardingRequest {
            name: "Ada".to_string(),
            github_url: "https://github.com/org/repo".to_string(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_threads_stage_outputs_in_order() {
        let capabilities = Arc::new(RecordingCapabilities::new());
        let agent = Arc::new(ScriptedAgent::new(vec![
            Some("script text".to_string()),
            Some("Ada is onboarded ✨ https://host/v1".to_string()),
        ]));
        let render_api = Arc::new(StubRender::new(vec![JobStatus::Completed {
            video_url: "https://host/v1".to_string(),
        }]));

        let result = orchestrator(
            Arc::clone(&capabilities),
            Arc::clone(&agent),
            Arc::clone(&render_api),
        )
        .run(&request())
        .await
        .expect("pipeline succeeds");

        assert_eq!(result.script_text, "script text");
        assert_eq!(result.video_url, "https://host/v1");
        assert_eq!(
            result.notification_confirmation,
            "Ada is onboarded ✨ https://host/v1"
        );

        // Exactly one render submission, fed the stage-1 script.
        assert_eq!(render_api.submit_count(), 1);
        assert_eq!(render_api.scripts.lock().unwrap()[0], "script text");

        // Two sessions: repo-scoped first, chat-scoped second.
        let sessions = capabilities.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0], vec![ToolkitGrant::new("github", "ac_repo")]);
        assert_eq!(sessions[1], vec![ToolkitGrant::new("slack", "ac_chat")]);

        // One direct account, connected with the configured credential + key.
        let accounts = capabilities.accounts.lock().unwrap();
        assert_eq!(
            *accounts,
            vec![("ac_render".to_string(), "sk-render".to_string())]
        );
    }

    #[tokio::test]
    async fn test_agent_no_result_aborts_before_render() {
        let capabilities = Arc::new(RecordingCapabilities::new());
        let agent = Arc::new(ScriptedAgent::new(vec![None]));
        let render_api = Arc::new(StubRender::new(vec![]));

        let err = orchestrator(
            Arc::clone(&capabilities),
            Arc::clone(&agent),
            Arc::clone(&render_api),
        )
        .run(&request())
        .await
        .expect_err("stage 1 fails");

        match err {
            PipelineError::StageFailed { stage, source } => {
                assert_eq!(stage, Stage::Script);
                assert!(matches!(source, StageError::Agent(AgentError::NoResult)));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Stage 2 never ran: no account connected, nothing submitted.
        assert_eq!(render_api.submit_count(), 0);
        assert!(capabilities.accounts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notification_instructions_contain_name_and_url() {
        let capabilities = Arc::new(RecordingCapabilities::new());
        let agent = Arc::new(ScriptedAgent::new(vec![
            Some("Hello world".to_string()),
            Some("posted".to_string()),
        ]));
        let render_api = Arc::new(StubRender::new(vec![JobStatus::Completed {
            video_url: "https://example/v.mp4".to_string(),
        }]));

        orchestrator(
            Arc::clone(&capabilities),
            Arc::clone(&agent),
            Arc::clone(&render_api),
        )
        .run(&request())
        .await
        .expect("pipeline succeeds");

        let invocations = agent.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 2);
        let (notify_instructions, notify_grants) = &invocations[1];
        assert!(notify_instructions.contains("Ada"));
        assert!(notify_instructions.contains("https://example/v.mp4"));
        assert!(notify_instructions.contains("C012345"));
        assert_eq!(*notify_grants, vec![ToolkitGrant::new("slack", "ac_chat")]);
    }

    #[tokio::test]
    async fn test_render_failure_aborts_notification() {
        let capabilities = Arc::new(RecordingCapabilities::new());
        let agent = Arc::new(ScriptedAgent::new(vec![Some("script".to_string())]));
        let render_api = Arc::new(StubRender::new(vec![JobStatus::Failed {
            detail: "render crashed".to_string(),
        }]));

        let err = orchestrator(
            Arc::clone(&capabilities),
            Arc::clone(&agent),
            Arc::clone(&render_api),
        )
        .run(&request())
        .await
        .expect_err("stage 2 fails");

        match err {
            PipelineError::StageFailed { stage, source } => {
                assert_eq!(stage, Stage::Render);
                assert!(matches!(
                    source,
                    StageError::Render(RenderError::RenderFailed { .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The chat-scoped session was never requested.
        let sessions = capabilities.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0][0].toolkit, "github");
        // Agent invoked only once, for the script stage.
        assert_eq!(agent.invocations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_script_is_a_stage_failure() {
        let capabilities = Arc::new(RecordingCapabilities::new());
        let agent = Arc::new(ScriptedAgent::new(vec![Some("   ".to_string())]));
        let render_api = Arc::new(StubRender::new(vec![]));

        let err = orchestrator(
            Arc::clone(&capabilities),
            Arc::clone(&agent),
            Arc::clone(&render_api),
        )
        .run(&request())
        .await
        .expect_err("blank script rejected");

        match err {
            PipelineError::StageFailed { stage, source } => {
                assert_eq!(stage, Stage::Script);
                assert!(matches!(source, StageError::EmptyOutput("script")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(render_api.submit_count(), 0);
    }

    #[test]
    fn test_stage_display_and_downstream() {
        assert_eq!(Stage::Script.to_string(), "script generation");
        assert_eq!(
            Stage::Script.downstream(),
            &[Stage::Render, Stage::Notify][..]
        );
        assert_eq!(Stage::Notify.downstream(), &[] as &[Stage]);
    }
}
