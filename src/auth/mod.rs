pub mod store;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{info, warn};

use crate::api::types::{AuthUser, TokenResponse};
use crate::api::{ApiErrorKind, BackendClient, classify_error};

pub use store::{CachedSession, SessionStore};

/// How far the startup reconciliation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// The backend confirmed the cached token.
    Verified,
    /// Validation timed out or the backend was unreachable; the cached
    /// identity is shown but may be stale.
    Unverified,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: AuthUser,
    pub access_token: String,
    pub refresh_token: String,
    pub health: SessionHealth,
}

/// Sign-in/sign-up/sign-out flows plus the optimistic session bootstrap.
#[derive(Debug, Clone)]
pub struct AuthManager {
    client: BackendClient,
    store: SessionStore,
    bootstrap_timeout: Duration,
}

impl AuthManager {
    pub fn new(client: BackendClient, store: SessionStore, bootstrap_timeout: Duration) -> Self {
        Self {
            client,
            store,
            bootstrap_timeout,
        }
    }

    fn cache_token(&self, tok: &TokenResponse) -> Result<CachedSession> {
        let cached = CachedSession {
            access_token: tok.access_token.clone(),
            refresh_token: tok.refresh_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(tok.expires_in),
            user: tok.user.clone(),
        };
        self.store.save(&cached).context("persist session cache")?;
        self.client.set_access_token(&cached.access_token);
        Ok(cached)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let tok = self.client.sign_in(email, password).await?;
        let cached = self.cache_token(&tok)?;
        info!(email=%cached.user.email, "signed in");
        Ok(AuthSession {
            user: cached.user,
            access_token: cached.access_token,
            refresh_token: cached.refresh_token,
            health: SessionHealth::Verified,
        })
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession> {
        let tok = self.client.sign_up(email, password).await?;
        let cached = self.cache_token(&tok)?;
        info!(email=%cached.user.email, "signed up");
        Ok(AuthSession {
            user: cached.user,
            access_token: cached.access_token,
            refresh_token: cached.refresh_token,
            health: SessionHealth::Verified,
        })
    }

    /// Best-effort server-side logout; the local cache is cleared regardless.
    pub async fn sign_out(&self) -> Result<()> {
        if let Err(e) = self.client.sign_out().await {
            warn!(err=%e, "server-side logout failed; clearing local session anyway");
        }
        self.store.clear().context("clear session cache")?;
        self.client.clear_access_token();
        Ok(())
    }

    /// Read the cached credential, render it optimistically, and reconcile
    /// against the server within a hard timeout. Returns `None` when there is
    /// no usable session and the caller should show the login screen.
    pub async fn bootstrap(&self) -> Result<Option<AuthSession>> {
        let Some(mut cached) = self.store.load().context("read session cache")? else {
            return Ok(None);
        };

        if cached.is_expired(Utc::now()) {
            info!("cached session expired; attempting refresh");
            match self.client.refresh(&cached.refresh_token).await {
                Ok(tok) => {
                    cached = self.cache_token(&tok)?;
                    return Ok(Some(AuthSession {
                        user: cached.user,
                        access_token: cached.access_token,
                        refresh_token: cached.refresh_token,
                        health: SessionHealth::Verified,
                    }));
                }
                Err(e) => {
                    warn!(err=%e, "refresh of expired session failed");
                    self.store.clear().context("clear session cache")?;
                    self.client.clear_access_token();
                    return Ok(None);
                }
            }
        }

        self.client.set_access_token(&cached.access_token);

        // The hard timeout keeps startup from hanging on a slow backend.
        match tokio::time::timeout(self.bootstrap_timeout, self.client.current_user()).await {
            Err(_elapsed) => {
                warn!(timeout_ms=%self.bootstrap_timeout.as_millis(), "session validation timed out");
                Ok(Some(AuthSession {
                    user: cached.user,
                    access_token: cached.access_token,
                    refresh_token: cached.refresh_token,
                    health: SessionHealth::Unverified,
                }))
            }
            Ok(Ok(user)) => Ok(Some(AuthSession {
                user,
                access_token: cached.access_token,
                refresh_token: cached.refresh_token,
                health: SessionHealth::Verified,
            })),
            Ok(Err(e)) => {
                let kind = classify_error(None, &e);
                if matches!(kind, ApiErrorKind::Auth | ApiErrorKind::Client) {
                    // Token rejected: one refresh attempt, then give up.
                    match self.client.refresh(&cached.refresh_token).await {
                        Ok(tok) => {
                            let cached = self.cache_token(&tok)?;
                            Ok(Some(AuthSession {
                                user: cached.user,
                                access_token: cached.access_token,
                                refresh_token: cached.refresh_token,
                                health: SessionHealth::Verified,
                            }))
                        }
                        Err(e2) => {
                            warn!(err=%e2, "refresh after rejected token failed");
                            self.store.clear().context("clear session cache")?;
                            self.client.clear_access_token();
                            Ok(None)
                        }
                    }
                } else {
                    // Offline or flaky backend: keep the cached identity.
                    warn!(err=%e, kind=?kind, "session validation unavailable");
                    Ok(Some(AuthSession {
                        user: cached.user,
                        access_token: cached.access_token,
                        refresh_token: cached.refresh_token,
                        health: SessionHealth::Unverified,
                    }))
                }
            }
        }
    }
}
