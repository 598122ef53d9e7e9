//! Scoped tool sessions and connected accounts.
//!
//! Two capability paths exist. Agent-driven stages get an ephemeral
//! [`ToolSession`]: a single endpoint restricted to exactly the toolkits it
//! was granted. The render stage instead gets an [`AccountHandle`] for a
//! directly-connected account, because it is driven by deterministic polling
//! logic rather than agent-mediated tool calls.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use uuid::Uuid;

use crate::error::SessionError;

/// Default API base for the capability-granting service.
const DEFAULT_API_BASE: &str = "https://backend.composio.dev/api/v3";

/// Opaque identity of the acting principal, as presented to the
/// capability-granting service.
///
/// A fresh identity per run keeps independent pipeline runs from sharing
/// session state; a fixed identity lets a deployment reuse pre-registered
/// connections across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Mints a fresh identity for a single pipeline run.
    pub fn ephemeral() -> Self {
        Self(format!("onboarding-user-{}", Uuid::new_v4()))
    }

    /// Wraps a stable, deployment-managed identity.
    pub fn fixed(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A toolkit authorized for a session, bound to a specific credential.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolkitGrant {
    /// Name of the toolkit (e.g. "github", "slack").
    pub toolkit: String,
    /// Credential reference authorizing the toolkit.
    pub auth_config_id: String,
}

impl ToolkitGrant {
    /// Creates a grant for one toolkit.
    pub fn new(toolkit: impl Into<String>, auth_config_id: impl Into<String>) -> Self {
        Self {
            toolkit: toolkit.into(),
            auth_config_id: auth_config_id.into(),
        }
    }
}

/// An ephemeral, scoped capability grant.
///
/// The endpoint, when exercised by a reasoning agent, can invoke only the
/// declared toolkits; undeclared toolkits are rejected by the granting
/// service itself. Write-once: leased for one agent invocation, then
/// discarded.
#[derive(Debug, Clone)]
pub struct ToolSession {
    /// Addressable endpoint the agent calls to exercise the toolkits.
    pub endpoint: String,
    /// Toolkits this session is restricted to.
    pub grants: Vec<ToolkitGrant>,
}

/// Handle of a directly-connected service account, used by the polling
/// client instead of an agent-mediated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHandle(String);

impl AccountHandle {
    /// Wraps a connected-account identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the account identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The capability-granting service: issues scoped sessions and connected
/// accounts binding a user identity to specific toolkits and credentials.
#[async_trait]
pub trait CapabilityService: Send + Sync {
    /// Requests a session restricted to exactly the given toolkit grants.
    ///
    /// The service is instructed not to auto-attach any other previously
    /// connected accounts for this identity.
    async fn create_session(
        &self,
        user: &UserIdentity,
        grants: &[ToolkitGrant],
    ) -> Result<ToolSession, SessionError>;

    /// Establishes a connected account for a toolkit that authenticates via
    /// an API key, for direct use by the polling client.
    ///
    /// Intended to be idempotent, but the service may create duplicates on
    /// repeated calls because the request allows multiple accounts.
    async fn connect_direct_account(
        &self,
        user: &UserIdentity,
        auth_config_id: &str,
        secret_key: &str,
    ) -> Result<AccountHandle, SessionError>;
}

/// HTTP client for the tool router of the capability-granting service.
pub struct ToolRouterClient {
    /// Base URL for the API.
    api_base: String,
    /// API key authenticating this deployment.
    api_key: String,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl ToolRouterClient {
    /// Creates a new client with explicit configuration.
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

    /// Creates a new client from environment variables.
    ///
    /// Reads `COMPOSIO_API_KEY` (required) and `COMPOSIO_API_BASE`
    /// (optional, defaults to the hosted service).
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

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

/// Session-creation request body.
#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    user_id: &'a str,
    toolkits: &'a [ToolkitGrant],
    manually_manage_connections: bool,
}

/// Session-creation response body.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    url: String,
}

/// Direct-account connection request body.
#[derive(Debug, Serialize)]
struct AccountRequest<'a> {
    user_id: &'a str,
    auth_config_id: &'a str,
    credential: CredentialSpec<'a>,
    allow_multiple: bool,
}

/// API-key credential attached to an account connection request.
#[derive(Debug, Serialize)]
struct CredentialSpec<'a> {
    auth_scheme: &'static str,
    api_key: &'a str,
}

/// Direct-account connection response body.
#[derive(Debug, Deserialize)]
struct AccountResponse {
    id: String,
}

/// Error response from the service.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the service.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Extracts a human-readable message from an error response body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map(|resp| resp.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[async_trait]
impl CapabilityService for ToolRouterClient {
    async fn create_session(
        &self,
        user: &UserIdentity,
        grants: &[ToolkitGrant],
    ) -> Result<ToolSession, SessionError> {
        let url = format!("{}/tool_router/sessions", self.api_base);
        let request = SessionRequest {
            user_id: user.as_str(),
            toolkits: grants,
            manually_manage_connections: true,
        };

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(SessionError::SessionCreation {
                code: status.as_u16(),
                message: error_message(&body),
            });
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| SessionError::ParseError(e.to_string()))?;

        tracing::info!(
            user = %user,
            toolkits = grants.len(),
            "Tool router session created"
        );

        Ok(ToolSession {
            endpoint: session.url,
            grants: grants.to_vec(),
        })
    }

    async fn connect_direct_account(
        &self,
        user: &UserIdentity,
        auth_config_id: &str,
        secret_key: &str,
    ) -> Result<AccountHandle, SessionError> {
        let url = format!("{}/connected_accounts", self.api_base);
        let request = AccountRequest {
            user_id: user.as_str(),
            auth_config_id,
            credential: CredentialSpec {
                auth_scheme: "API_KEY",
                api_key: secret_key,
            },
            allow_multiple: true,
        };

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(SessionError::AccountConnection {
                code: status.as_u16(),
                message: error_message(&body),
            });
        }

        let account: AccountResponse = response
            .json()
            .await
            .map_err(|e| SessionError::ParseError(e.to_string()))?;

        tracing::info!(user = %user, account = %account.id, "Direct account connected");

        Ok(AccountHandle::new(account.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_identities_are_unique() {
        let a = UserIdentity::ephemeral();
        let b = UserIdentity::ephemeral();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("onboarding-user-"));
    }

    #[test]
    fn test_fixed_identity_round_trips() {
        let id = UserIdentity::fixed("deploy-7");
        assert_eq!(id.as_str(), "deploy-7");
        assert_eq!(id.to_string(), "deploy-7");
    }

    #[test]
    fn test_session_request_serialization() {
        let grants = vec![
            ToolkitGrant::new("github", "ac_repo"),
            ToolkitGrant::new("slack", "ac_chat"),
        ];
        let request = SessionRequest {
            user_id: "onboarding-user-1",
            toolkits: &grants,
            manually_manage_connections: true,
        };

        let json = serde_json::to_value(&request).expect("serialization should succeed");
        assert_eq!(json["manually_manage_connections"], true);
        assert_eq!(json["toolkits"][0]["toolkit"], "github");
        assert_eq!(json["toolkits"][0]["auth_config_id"], "ac_repo");
        assert_eq!(json["toolkits"][1]["toolkit"], "slack");
    }

    #[test]
    fn test_account_request_serialization() {
        let request = AccountRequest {
            user_id: "onboarding-user-1",
            auth_config_id: "ac_render",
            credential: CredentialSpec {
                auth_scheme: "API_KEY",
                api_key: "sk-secret",
            },
            allow_multiple: true,
        };

        let json = serde_json::to_value(&request).expect("serialization should succeed");
        assert_eq!(json["allow_multiple"], true);
        assert_eq!(json["credential"]["auth_scheme"], "API_KEY");
        assert_eq!(json["credential"]["api_key"], "sk-secret");
    }

    #[test]
    fn test_error_message_prefers_structured_body() {
        let structured = r#"{"error":{"message":"unknown auth config"}}"#;
        assert_eq!(error_message(structured), "unknown auth config");

        let raw = "gateway timeout";
        assert_eq!(error_message(raw), "gateway timeout");
    }

    #[tokio::test]
    async fn test_create_session_connection_error() {
        // Port that is unlikely to have a server behind it.
        let client = ToolRouterClient::new(
            "http://localhost:65535".to_string(),
            "test-key".to_string(),
        );

        assert_eq!(client.api_base(), "http://localhost:65535");

        let grants = [ToolkitGrant::new("github", "ac_repo")];
        let result = client
            .create_session(&UserIdentity::fixed("u1"), &grants)
            .await;

        assert!(matches!(result, Err(SessionError::RequestFailed(_))));
    }
}
