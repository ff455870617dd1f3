//! Platform HTTP API: ticket login and the handful of account queries the
//! client needs.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use parley_shared::constants::DEFAULT_API_BASE;

use crate::error::ApiError;
use crate::session::FirehoseCredentials;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendEntry {
    /// One of our own characters.
    pub source: String,
    #[serde(alias = "dest")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Remaining profile fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Authenticated account queries.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn friends(&self, cancel: &CancellationToken) -> Result<Vec<FriendEntry>, ApiError>;

    async fn bookmarks(&self, cancel: &CancellationToken) -> Result<Vec<String>, ApiError>;

    async fn character_profile(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CharacterProfile, ApiError>;
}

/// Everything one successful login yields.
#[derive(Clone)]
pub struct LoginGrant {
    pub api: Arc<dyn ChatApi>,
    pub credentials: FirehoseCredentials,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, cancel: &CancellationToken) -> Result<LoginGrant, ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpAuthenticator {
    client: reqwest::Client,
    base: String,
    account: String,
    password: String,
    character: Option<String>,
}

impl HttpAuthenticator {
    pub fn new(account: &str, password: &str, character: Option<String>) -> Self {
        Self::with_base(DEFAULT_API_BASE, account, password, character)
    }

    pub fn with_base(base: &str, account: &str, password: &str, character: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            account: account.to_string(),
            password: password.to_string(),
            character,
        }
    }
}

#[derive(Deserialize)]
struct TicketResponse {
    #[serde(default)]
    ticket: String,
    #[serde(default)]
    error: String,
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn login(&self, cancel: &CancellationToken) -> Result<LoginGrant, ApiError> {
        let url = format!("{}/json/getApiTicket.php", self.base);
        let form = [
            ("account", self.account.as_str()),
            ("password", self.password.as_str()),
            ("no_characters", "true"),
            ("no_friends", "true"),
            ("no_bookmarks", "true"),
        ];
        let request = self.client.post(&url).form(&form).send();
        let reply: TicketResponse = post_json(request, cancel).await?;

        if !reply.error.is_empty() {
            // A bad password is not something a retry can fix.
            return Err(ApiError::Api(reply.error));
        }
        if reply.ticket.is_empty() {
            return Err(ApiError::Api("login returned no ticket".into()));
        }
        info!(account = %self.account, "obtained API ticket");

        let api = HttpChatApi {
            client: self.client.clone(),
            base: self.base.clone(),
            account: self.account.clone(),
            ticket: reply.ticket.clone(),
        };
        Ok(LoginGrant {
            api: Arc::new(api),
            credentials: FirehoseCredentials {
                login: self.account.clone(),
                passcode: reply.ticket,
                character: self.character.clone(),
            },
        })
    }
}

/// API calls bound to one ticket. Produced by [`HttpAuthenticator::login`].
pub struct HttpChatApi {
    client: reqwest::Client,
    base: String,
    account: String,
    ticket: String,
}

#[derive(Deserialize)]
struct FriendsResponse {
    #[serde(default)]
    friends: Vec<FriendEntry>,
}

#[derive(Deserialize)]
struct BookmarksResponse {
    #[serde(default)]
    characters: Vec<String>,
}

impl HttpChatApi {
    async fn query<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        extra: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let url = format!("{}/json/api/{endpoint}", self.base);
        let mut form = vec![("account", self.account.as_str()), ("ticket", self.ticket.as_str())];
        form.extend_from_slice(extra);
        debug!(endpoint, "API request");

        let value: serde_json::Value = post_json(self.client.post(&url).form(&form).send(), cancel).await?;
        check_api_error(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn friends(&self, cancel: &CancellationToken) -> Result<Vec<FriendEntry>, ApiError> {
        let reply: FriendsResponse = self.query("friend-list.php", &[], cancel).await?;
        Ok(reply.friends)
    }

    async fn bookmarks(&self, cancel: &CancellationToken) -> Result<Vec<String>, ApiError> {
        let reply: BookmarksResponse = self.query("bookmark-list.php", &[], cancel).await?;
        Ok(reply.characters)
    }

    async fn character_profile(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CharacterProfile, ApiError> {
        self.query("character-data.php", &[("name", name)], cancel).await
    }
}

async fn post_json<T: DeserializeOwned>(
    request: impl Future<Output = Result<reqwest::Response, reqwest::Error>>,
    cancel: &CancellationToken,
) -> Result<T, ApiError> {
    let exchange = async {
        let response = request.await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok::<_, ApiError>(serde_json::from_slice(&body)?)
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        result = exchange => result,
    }
}

/// Map the API's in-band `error` field onto [`ApiError`].
pub fn check_api_error(value: &serde_json::Value) -> Result<(), ApiError> {
    let message = value.get("error").and_then(|e| e.as_str()).unwrap_or_default();
    if message.is_empty() {
        return Ok(());
    }
    if message.to_ascii_lowercase().contains("ticket") {
        Err(ApiError::Unauthorized(message.to_string()))
    } else {
        Err(ApiError::Api(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ticket_errors_are_unauthorized() {
        assert!(check_api_error(&json!({ "error": "" })).is_ok());
        assert!(check_api_error(&json!({ "friends": [] })).is_ok());
        assert!(check_api_error(&json!({ "error": "Invalid ticket." }))
            .unwrap_err()
            .is_unauthorized());
        assert!(matches!(
            check_api_error(&json!({ "error": "Character not found." })),
            Err(ApiError::Api(_))
        ));
    }

    #[test]
    fn test_friend_entry_accepts_wire_name() {
        let entry: FriendEntry = serde_json::from_value(json!({ "source": "Alice", "dest": "Bob" })).unwrap();
        assert_eq!(entry.target, "Bob");
    }

    #[test]
    fn test_profile_keeps_unknown_fields() {
        let profile: CharacterProfile =
            serde_json::from_value(json!({ "name": "Bob", "description": "hi", "views": 3 })).unwrap();
        assert_eq!(profile.name, "Bob");
        assert_eq!(profile.extra["views"], 3);
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_promptly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pending = std::future::pending::<Result<reqwest::Response, reqwest::Error>>();
        let result: Result<serde_json::Value, _> = post_json(pending, &cancel).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
