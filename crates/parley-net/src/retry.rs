//! Login-once-retry-once wrapper around an [`Authenticator`].
//!
//! Every API call and every firehose credential request goes through
//! [`RetryingSession::call`]. When the current ticket is rejected, the first
//! caller to notice logs in again; callers that failed against the same
//! ticket generation wait for that login instead of starting their own.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{Authenticator, CharacterProfile, ChatApi, FriendEntry, LoginGrant};
use crate::error::ApiError;
use crate::session::{CredentialSource, FirehoseCredentials};

struct Current {
    generation: u64,
    grant: LoginGrant,
}

pub struct RetryingSession {
    authenticator: Arc<dyn Authenticator>,
    current: RwLock<Option<Current>>,
}

impl RetryingSession {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            current: RwLock::new(None),
        }
    }

    /// Current grant and its generation, logging in first if there is none.
    async fn grant(&self, cancel: &CancellationToken) -> Result<(u64, LoginGrant), ApiError> {
        {
            let current = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                guard = self.current.read() => guard,
            };
            if let Some(current) = current.as_ref() {
                return Ok((current.generation, current.grant.clone()));
            }
        }
        self.relogin(None, cancel).await
    }

    /// Log in again unless someone already replaced generation `stale`.
    async fn relogin(
        &self,
        stale: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(u64, LoginGrant), ApiError> {
        let mut current = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            guard = self.current.write() => guard,
        };

        if let Some(existing) = current.as_ref() {
            if stale != Some(existing.generation) {
                debug!(generation = existing.generation, "login already refreshed");
                return Ok((existing.generation, existing.grant.clone()));
            }
        }

        let generation = current.as_ref().map_or(1, |c| c.generation + 1);
        let grant = self.authenticator.login(cancel).await?;
        info!(generation, "logged in");
        *current = Some(Current {
            generation,
            grant: grant.clone(),
        });
        Ok((generation, grant))
    }

    /// Run `op` against the current grant. An `Unauthorized` failure triggers
    /// one coordinated re-login and exactly one retry.
    pub async fn call<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T, ApiError>
    where
        F: Fn(LoginGrant) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let (generation, grant) = self.grant(cancel).await?;
        match op(grant).await {
            Err(e) if e.is_unauthorized() => {
                debug!(generation, error = %e, "ticket rejected, logging in again");
                let (_, grant) = self.relogin(Some(generation), cancel).await?;
                op(grant).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ChatApi for RetryingSession {
    async fn friends(&self, cancel: &CancellationToken) -> Result<Vec<FriendEntry>, ApiError> {
        self.call(cancel, |grant| async move { grant.api.friends(cancel).await })
            .await
    }

    async fn bookmarks(&self, cancel: &CancellationToken) -> Result<Vec<String>, ApiError> {
        self.call(cancel, |grant| async move { grant.api.bookmarks(cancel).await })
            .await
    }

    async fn character_profile(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CharacterProfile, ApiError> {
        self.call(cancel, |grant| async move {
            grant.api.character_profile(name, cancel).await
        })
        .await
    }
}

#[async_trait]
impl CredentialSource for RetryingSession {
    async fn credentials(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<FirehoseCredentials, ApiError> {
        if force_refresh {
            let stale = {
                let current = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                    guard = self.current.read() => guard,
                };
                current.as_ref().map(|c| c.generation)
            };
            let (_, grant) = self.relogin(stale, cancel).await?;
            return Ok(grant.credentials);
        }
        self.call(cancel, |grant| async move { Ok(grant.credentials) })
            .await
    }
}
