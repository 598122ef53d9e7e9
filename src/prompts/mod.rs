//! Instruction text for the agent-driven pipeline stages.
//!
//! Prompt text is configuration, not logic: these builders only interpolate
//! stage inputs into fixed templates. The render stage has no prompt because
//! it is driven by the polling client, not by the agent.

/// Builds the repository-analysis and scriptwriting instructions for the
/// first pipeline stage.
pub fn build_script_instructions(github_url: &str) -> String {
    format!(
        r#"Analyze the GitHub repository at {github_url}, focusing on its README, file structure, and the last two commits. If the repository is private or inaccessible, stop and report that you cannot access it.

Then act as a creative scriptwriter for a video tutorial. Write a concise, engaging, 30-second video script for a human talking that feels conversational and casual.

Respond with only the voiceover text, without any titles, labels like 'SCRIPT:', or formatting."#
    )
}

/// Builds the team-notification instructions for the final pipeline stage.
///
/// Interpolates the onboarding subject's name, the chat channel and the
/// exact video URL produced by the render stage.
pub fn build_notification_instructions(name: &str, channel_id: &str, video_url: &str) -> String {
    format!(
        r#"Post a message to the Slack channel with ID "{channel_id}" announcing that '{name}' is onboarded, and include the link to the new onboarding video.

The message must be: "{name} is onboarded ✨" followed by the video URL {video_url}

Respond with the exact message that was posted."#
    )
}
