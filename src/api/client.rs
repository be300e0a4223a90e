use anyhow::{Context, Result};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::types::{AuthUser, PasswordGrant, RefreshGrant, TokenResponse};
use crate::config::BackendConfig;

mod network;

use network::ApiRequest;

/// Client for the hosted backend. Every request carries the project `apikey`
/// header; authenticated requests additionally carry the user's bearer token.
#[derive(Debug, Clone)]
pub struct BackendClient {
    pub base_url: String,
    pub anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
    pub(crate) inner: reqwest::Client,
    pub backend_cfg: BackendConfig,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            access_token: Arc::new(RwLock::new(None)),
            inner,
            backend_cfg: BackendConfig::default(),
        })
    }

    pub fn with_backend_config(mut self, cfg: BackendConfig) -> Self {
        // Rebuild the reqwest client so the configured timeouts actually apply.
        let builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Ok(c) = builder.build() {
            self.inner = c;
        }
        self.backend_cfg = cfg;
        self
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn clear_access_token(&self) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = None;
        }
    }

    /// Token used for the Authorization header. Unauthenticated calls fall
    /// back to the anon key, which the backend accepts for public rows.
    pub(crate) fn bearer(&self) -> String {
        self.access_token
            .read()
            .ok()
            .and_then(|g| g.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn root(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }

    pub(crate) fn auth_endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.root())
    }

    pub(crate) fn rest_endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.root())
    }

    pub(crate) fn functions_endpoint(&self, name: &str) -> String {
        format!("{}/functions/v1/{name}", self.root())
    }

    pub(crate) fn backoff_delay(&self, attempt: usize, retry_after_secs: Option<u64>) -> Duration {
        if self.backend_cfg.respect_retry_after
            && let Some(secs) = retry_after_secs
        {
            return Duration::from_secs(secs);
        }
        let base = self.backend_cfg.retry_base_ms;
        let exp = base.saturating_mul(1u64 << (attempt as u32 - 1));
        let jitter = self.backend_cfg.retry_jitter_ms as i64;
        let half = jitter / 2;
        let rnd = fastrand::i64(-half..=half).max(0) as u64;
        Duration::from_millis(exp.saturating_add(rnd))
    }

    // --- auth endpoints ---

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<TokenResponse> {
        let body = serde_json::to_value(PasswordGrant {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::POST,
                url: self.auth_endpoint("token"),
                query: vec![("grant_type".into(), "password".into())],
                body: Some(body),
                prefer: None,
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<TokenResponse> {
        let body = serde_json::to_value(PasswordGrant {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::POST,
                url: self.auth_endpoint("signup"),
                query: vec![],
                body: Some(body),
                prefer: None,
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let body = serde_json::to_value(RefreshGrant {
            refresh_token: refresh_token.to_string(),
        })?;
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::POST,
                url: self.auth_endpoint("token"),
                query: vec![("grant_type".into(), "refresh_token".into())],
                body: Some(body),
                prefer: None,
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    pub async fn sign_out(&self) -> Result<()> {
        network::send(
            self,
            ApiRequest {
                method: Method::POST,
                url: self.auth_endpoint("logout"),
                query: vec![],
                body: None,
                prefer: None,
            },
            None,
        )
        .await?;
        Ok(())
    }

    /// Validate the current bearer token against the backend.
    pub async fn current_user(&self) -> Result<AuthUser> {
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::GET,
                url: self.auth_endpoint("user"),
                query: vec![],
                body: None,
                prefer: None,
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    // --- table CRUD endpoints ---

    /// `filters` are PostgREST-style query pairs, e.g. `("user_id", "eq.<id>")`.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut query: Vec<(String, String)> =
            vec![("select".to_string(), "*".to_string())];
        for (k, v) in filters {
            query.push((k.to_string(), v.clone()));
        }
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::GET,
                url: self.rest_endpoint(table),
                query,
                body: None,
                prefer: None,
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
    ) -> Result<Vec<R>> {
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::POST,
                url: self.rest_endpoint(table),
                query: vec![],
                body: Some(serde_json::to_value(row)?),
                prefer: Some("return=representation"),
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    pub async fn update<R: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        patch: serde_json::Value,
    ) -> Result<Vec<R>> {
        let query: Vec<(String, String)> = filters
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::PATCH,
                url: self.rest_endpoint(table),
                query,
                body: Some(patch),
                prefer: Some("return=representation"),
            },
            None,
        )
        .await?;
        parse_body(&raw)
    }

    pub async fn delete(&self, table: &str, filters: &[(&str, String)]) -> Result<()> {
        let query: Vec<(String, String)> = filters
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        network::send(
            self,
            ApiRequest {
                method: Method::DELETE,
                url: self.rest_endpoint(table),
                query,
                body: None,
                prefer: None,
            },
            None,
        )
        .await?;
        Ok(())
    }

    // --- serverless function invocation ---

    pub async fn invoke<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        name: &str,
        req: &Req,
        cancel: Option<CancellationToken>,
    ) -> Result<Resp> {
        let raw = network::send(
            self,
            ApiRequest {
                method: Method::POST,
                url: self.functions_endpoint(name),
                query: vec![],
                body: Some(serde_json::to_value(req)?),
                prefer: None,
            },
            cancel,
        )
        .await?;
        parse_body(&raw)
    }
}

fn parse_body<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).context("parse backend response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::TokenResponse;
    use crate::models::Repository;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn test_client(server: &Server) -> BackendClient {
        BackendClient::new(server.url_str(""), "anon-key")
            .unwrap()
            .with_backend_config(BackendConfig {
                connect_timeout_ms: 5_000,
                request_timeout_ms: 5_000,
                max_retries: 0,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
            })
    }

    #[tokio::test]
    async fn sign_in_sends_password_grant() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/auth/v1/token"),
                request::query(url_decoded(contains(("grant_type", "password")))),
                request::headers(contains(("apikey", "anon-key"))),
            ])
            .respond_with(json_encoded(serde_json::json!({
                "access_token": "at",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "rt",
                "user": {"id": "7f8a9e1c-2f6d-4f0a-bb1f-111111111111", "email": "a@b.c"}
            }))),
        );

        let client = test_client(&server);
        let tok: TokenResponse = client.sign_in("a@b.c", "pw").await.unwrap();
        assert_eq!(tok.access_token, "at");
        assert_eq!(tok.user.email, "a@b.c");
    }

    #[tokio::test]
    async fn select_builds_filter_query_and_bearer() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/rest/v1/repositories"),
                request::query(url_decoded(contains(("owner_id", "eq.u1")))),
                request::headers(contains(("authorization", "Bearer user-token"))),
            ])
            .respond_with(json_encoded(serde_json::json!([{
                "id": "7f8a9e1c-2f6d-4f0a-bb1f-222222222222",
                "owner_id": "7f8a9e1c-2f6d-4f0a-bb1f-111111111111",
                "org_id": null,
                "full_name": "acme/widgets",
                "status": "ready",
                "readme_content": null,
                "error_message": null,
                "created_at": "2025-01-01T00:00:00Z",
                "updated_at": "2025-01-02T00:00:00Z"
            }]))),
        );

        let client = test_client(&server);
        client.set_access_token("user-token");
        let rows: Vec<Repository> = client
            .select("repositories", &[("owner_id", "eq.u1".to_string())])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].full_name, "acme/widgets");
    }

    #[tokio::test]
    async fn retries_on_500_then_succeeds() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/auth/v1/user"))
                .times(2)
                .respond_with(cycle![
                    status_code(500).body("oops"),
                    json_encoded(serde_json::json!({
                        "id": "7f8a9e1c-2f6d-4f0a-bb1f-111111111111",
                        "email": "a@b.c"
                    })),
                ]),
        );

        let client = BackendClient::new(server.url_str(""), "anon-key")
            .unwrap()
            .with_backend_config(BackendConfig {
                max_retries: 1,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
                ..BackendConfig::default()
            });
        let user = client.current_user().await.unwrap();
        assert_eq!(user.email, "a@b.c");
    }

    #[tokio::test]
    async fn does_not_retry_on_400() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/auth/v1/user"))
                .times(1)
                .respond_with(status_code(400).body("bad")),
        );

        let client = BackendClient::new(server.url_str(""), "anon-key")
            .unwrap()
            .with_backend_config(BackendConfig {
                max_retries: 3,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
                ..BackendConfig::default()
            });
        let err = client.current_user().await.unwrap_err();
        let failure = err.downcast_ref::<crate::api::ApiFailure>().unwrap();
        assert_eq!(failure.kind, crate::api::ApiErrorKind::Client);
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let server = Server::run();
        // max_retries = 2 means exactly three attempts, then the error sticks.
        server.expect(
            Expectation::matching(request::method_path("GET", "/auth/v1/user"))
                .times(3)
                .respond_with(status_code(503).body("down")),
        );

        let client = BackendClient::new(server.url_str(""), "anon-key")
            .unwrap()
            .with_backend_config(BackendConfig {
                max_retries: 2,
                retry_base_ms: 1,
                retry_jitter_ms: 0,
                respect_retry_after: false,
                ..BackendConfig::default()
            });
        let err = client.current_user().await.unwrap_err();
        let failure = err.downcast_ref::<crate::api::ApiFailure>().unwrap();
        assert_eq!(failure.kind, crate::api::ApiErrorKind::Server);
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/functions/v1/generate-readme"))
                .times(0..)
                .respond_with(json_encoded(serde_json::json!({"status": "pending"}))),
        );
        let client = test_client(&server);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .invoke::<_, crate::api::types::GenerateResponse>(
                "generate-readme",
                &serde_json::json!({"repository_id": "7f8a9e1c-2f6d-4f0a-bb1f-222222222222"}),
                Some(cancel),
            )
            .await
            .unwrap_err();
        let failure = err.downcast_ref::<crate::api::ApiFailure>().unwrap();
        assert_eq!(failure.kind, crate::api::ApiErrorKind::Cancelled);
    }

    #[test]
    fn endpoint_normalization() {
        let c = BackendClient::new("https://proj.example.co/", "k").unwrap();
        assert_eq!(c.auth_endpoint("token"), "https://proj.example.co/auth/v1/token");
        assert_eq!(
            c.rest_endpoint("repositories"),
            "https://proj.example.co/rest/v1/repositories"
        );
        assert_eq!(
            c.functions_endpoint("generate-diagram"),
            "https://proj.example.co/functions/v1/generate-diagram"
        );
    }

    #[test]
    fn backoff_is_exponential_and_respects_retry_after() {
        let c = BackendClient::new("https://proj.example.co", "k")
            .unwrap()
            .with_backend_config(BackendConfig {
                retry_base_ms: 100,
                retry_jitter_ms: 0,
                respect_retry_after: true,
                ..BackendConfig::default()
            });
        assert_eq!(c.backoff_delay(1, None), Duration::from_millis(100));
        assert_eq!(c.backoff_delay(2, None), Duration::from_millis(200));
        assert_eq!(c.backoff_delay(3, None), Duration::from_millis(400));
        assert_eq!(c.backoff_delay(1, Some(7)), Duration::from_secs(7));
    }
}
