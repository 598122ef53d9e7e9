//! Connection configuration for the onboarding pipeline.
//!
//! Loads the credential references and channel identifiers that downstream
//! stages need. Loading fails fast: the first missing or empty setting aborts
//! the run before any external call is made.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable holding the GitHub toolkit credential reference.
pub const REPO_AUTH_CONFIG_KEY: &str = "GITHUB_AUTH_CONFIG_ID";
/// Environment variable holding the HeyGen toolkit credential reference.
pub const RENDER_AUTH_CONFIG_KEY: &str = "HEYGEN_AUTH_CONFIG_ID";
/// Environment variable holding the Slack toolkit credential reference.
pub const CHAT_AUTH_CONFIG_KEY: &str = "SLACK_AUTH_CONFIG_ID";
/// Environment variable holding the Slack channel to announce in.
pub const CHAT_CHANNEL_KEY: &str = "SLACK_CHANNEL_ID";
/// Environment variable holding the HeyGen API key for the direct account.
pub const RENDER_API_KEY: &str = "HEYGEN_API_KEY";

/// Credential references and identifiers required by the pipeline stages.
///
/// Immutable once constructed; one instance per process run.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Credential reference for the repository toolkit.
    pub repo_auth_config_id: String,
    /// Credential reference for the rendering toolkit.
    pub render_auth_config_id: String,
    /// Credential reference for the chat toolkit.
    pub chat_auth_config_id: String,
    /// Chat channel to post the completion announcement in.
    pub chat_channel_id: String,
    /// API key for the directly-connected rendering-service account.
    pub render_api_key: String,
}

impl ConnectionConfig {
    /// Loads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] naming the first required
    /// setting that is absent or empty. No partial configuration is ever
    /// returned.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            repo_auth_config_id: required(REPO_AUTH_CONFIG_KEY)?,
            render_auth_config_id: required(RENDER_AUTH_CONFIG_KEY)?,
            chat_auth_config_id: required(CHAT_AUTH_CONFIG_KEY)?,
            chat_channel_id: required(CHAT_CHANNEL_KEY)?,
            render_api_key: required(RENDER_API_KEY)?,
        })
    }
}

/// Reads a required environment variable, treating empty values as missing.
fn required(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Polling parameters for the render stage.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between consecutive status reads.
    pub poll_interval: Duration,
    /// Maximum number of status reads before the job is declared stuck.
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_polls: 80, // 20 minutes at the default interval
        }
    }
}

impl PollConfig {
    /// Sets the interval between status reads.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum number of status reads.
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests in this module mutate shared process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_KEYS: [&str; 5] = [
        REPO_AUTH_CONFIG_KEY,
        RENDER_AUTH_CONFIG_KEY,
        CHAT_AUTH_CONFIG_KEY,
        CHAT_CHANNEL_KEY,
        RENDER_API_KEY,
    ];

    fn set_all() {
        for key in ALL_KEYS {
            env::set_var(key, format!("value-for-{key}"));
        }
    }

    fn clear_all() {
        for key in ALL_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_from_env_with_all_keys() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_all();

        let config = ConnectionConfig::from_env().expect("all keys present");
        assert_eq!(
            config.repo_auth_config_id,
            format!("value-for-{REPO_AUTH_CONFIG_KEY}")
        );
        assert_eq!(config.chat_channel_id, format!("value-for-{CHAT_CHANNEL_KEY}"));
        assert_eq!(config.render_api_key, format!("value-for-{RENDER_API_KEY}"));

        clear_all();
    }

    #[test]
    fn test_from_env_names_each_missing_key() {
        let _guard = ENV_LOCK.lock().unwrap();

        for missing in ALL_KEYS {
            set_all();
            env::remove_var(missing);

            let err = ConnectionConfig::from_env().expect_err("one key missing");
            let ConfigError::MissingEnvVar(key) = err;
            assert_eq!(key, missing);
        }

        clear_all();
    }

    #[test]
    fn test_from_env_treats_empty_as_missing() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_all();
        env::set_var(CHAT_CHANNEL_KEY, "   ");

        let err = ConnectionConfig::from_env().expect_err("empty value");
        let ConfigError::MissingEnvVar(key) = err;
        assert_eq!(key, CHAT_CHANNEL_KEY);

        clear_all();
    }

    #[test]
    fn test_poll_config_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.max_polls, 80);
    }

    #[test]
    fn test_poll_config_builder() {
        let config = PollConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_max_polls(3);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.max_polls, 3);
    }
}
