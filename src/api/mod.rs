mod client;
pub mod types;

use reqwest::StatusCode;
use thiserror::Error;

pub use client::*;

/// Broad failure categories for calls into the hosted backend. Only a subset
/// is retryable; the rest surface to the user immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    RateLimited,
    Auth,
    Server,
    Network,
    Timeout,
    Client,
    Deserialize,
    Cancelled,
    Unknown,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::Auth => "auth",
            ApiErrorKind::Server => "server",
            ApiErrorKind::Network => "network",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Client => "client",
            ApiErrorKind::Deserialize => "deserialize",
            ApiErrorKind::Cancelled => "cancelled",
            ApiErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl ApiErrorKind {
    /// Stable message shown in the UI log for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.",
            ApiErrorKind::Auth => "Your session is no longer valid. Please sign in again.",
            ApiErrorKind::Server => "The service is having trouble. Please try again shortly.",
            ApiErrorKind::Network => "Could not reach the service. Check your connection.",
            ApiErrorKind::Timeout => "The request timed out. Please try again.",
            ApiErrorKind::Client => "The request was rejected. Please review your input.",
            ApiErrorKind::Deserialize => "Received an unexpected response from the service.",
            ApiErrorKind::Cancelled => "Cancelled.",
            ApiErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }
}

/// Failure produced by the network layer after retries are exhausted (or for
/// non-retryable categories, immediately).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ApiFailure {
    pub kind: ApiErrorKind,
    pub message: String,
}

pub fn classify_status(status: StatusCode) -> ApiErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ApiErrorKind::RateLimited;
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ApiErrorKind::Auth;
    }
    if status == StatusCode::REQUEST_TIMEOUT {
        return ApiErrorKind::Timeout;
    }
    if status.is_server_error() {
        return ApiErrorKind::Server;
    }
    if status.is_client_error() {
        return ApiErrorKind::Client;
    }
    ApiErrorKind::Unknown
}

pub fn classify_error(status: Option<StatusCode>, err: &anyhow::Error) -> ApiErrorKind {
    if let Some(st) = status {
        return classify_status(st);
    }
    if let Some(f) = err.downcast_ref::<ApiFailure>() {
        return f.kind.clone();
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return ApiErrorKind::Timeout;
        }
        if e.is_connect() || e.is_body() || e.is_request() {
            return ApiErrorKind::Network;
        }
    }
    ApiErrorKind::Unknown
}

pub fn should_retry(kind: &ApiErrorKind) -> bool {
    matches!(
        kind,
        ApiErrorKind::RateLimited
            | ApiErrorKind::Server
            | ApiErrorKind::Network
            | ApiErrorKind::Timeout
    )
}

/// Map any error coming out of the client into the message shown to the user.
pub fn user_facing(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiFailure>() {
        Some(f) => f.kind.user_message().to_string(),
        None => ApiErrorKind::Unknown.user_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_categories() {
        assert!(should_retry(&ApiErrorKind::RateLimited));
        assert!(should_retry(&ApiErrorKind::Server));
        assert!(should_retry(&ApiErrorKind::Network));
        assert!(should_retry(&ApiErrorKind::Timeout));
        assert!(!should_retry(&ApiErrorKind::Auth));
        assert!(!should_retry(&ApiErrorKind::Client));
        assert!(!should_retry(&ApiErrorKind::Deserialize));
        assert!(!should_retry(&ApiErrorKind::Cancelled));
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorKind::RateLimited
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ApiErrorKind::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ApiErrorKind::Auth);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ApiErrorKind::Server
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ApiErrorKind::Client);
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            ApiErrorKind::Timeout
        );
    }

    #[test]
    fn user_facing_falls_back_for_foreign_errors() {
        let err = anyhow::anyhow!("some local failure");
        assert_eq!(user_facing(&err), ApiErrorKind::Unknown.user_message());

        let err = anyhow::Error::new(ApiFailure {
            kind: ApiErrorKind::Auth,
            message: "401".into(),
        });
        assert_eq!(user_facing(&err), ApiErrorKind::Auth.user_message());
    }
}
