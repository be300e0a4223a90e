use anyhow::Result;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::BackendClient;
use crate::api::{ApiErrorKind, ApiFailure, classify_status, should_retry};

pub(crate) struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub prefer: Option<&'static str>,
}

fn failure(kind: ApiErrorKind, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(ApiFailure {
        kind,
        message: message.into(),
    })
}

/// Send one logical request, retrying retryable failures with exponential
/// backoff and jitter. Returns the raw response body; callers parse it.
pub(crate) async fn send(
    client: &BackendClient,
    req: ApiRequest,
    cancel: Option<CancellationToken>,
) -> Result<String> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        "apikey",
        client
            .anon_key
            .parse()
            .map_err(|_| failure(ApiErrorKind::Client, "invalid apikey header"))?,
    );
    headers.insert(
        AUTHORIZATION,
        format!("Bearer {}", client.bearer())
            .parse()
            .map_err(|_| failure(ApiErrorKind::Client, "invalid bearer header"))?,
    );
    if let Some(prefer) = req.prefer {
        headers.insert("Prefer", HeaderValue::from_static(prefer));
    }

    debug!(method=%req.method, url=%req.url, "sending backend request");

    let max_attempts = client.backend_cfg.max_retries.saturating_add(1);
    let mut last_err: Option<anyhow::Error> = None;
    let cancel_token = cancel.unwrap_or_default();

    for attempt in 1..=max_attempts {
        let mut builder = client
            .inner
            .request(req.method.clone(), &req.url)
            .headers(headers.clone());
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp_res = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!("request cancelled before send");
                return Err(failure(ApiErrorKind::Cancelled, "cancelled before send"));
            }
            res = builder.send() => res,
        };

        match resp_res {
            Err(e) => {
                error!(attempt, err=%e, "backend send error");
                let kind = if e.is_timeout() {
                    ApiErrorKind::Timeout
                } else {
                    ApiErrorKind::Network
                };
                if should_retry(&kind) && attempt < max_attempts {
                    let wait = client.backoff_delay(attempt, None);
                    info!(attempt, kind=?kind, wait_ms=%wait.as_millis(), "retrying request");
                    last_err = Some(failure(kind, e.to_string()));
                    tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => {
                            info!("request cancelled during retry sleep");
                            return Err(failure(ApiErrorKind::Cancelled, "cancelled during retry"));
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                    continue;
                }
                return Err(failure(kind, e.to_string()));
            }
            Ok(resp) => {
                let status = resp.status();
                if !status.is_success() {
                    let retry_after = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|h| h.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok());

                    let text = tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => {
                            info!("request cancelled during error body read");
                            return Err(failure(ApiErrorKind::Cancelled, "cancelled during body read"));
                        }
                        res = resp.text() => res.unwrap_or_default(),
                    };

                    error!(attempt, status=%status.as_u16(), body=%text, "backend non-success status");
                    let kind = classify_status(status);
                    if should_retry(&kind) && attempt < max_attempts {
                        let wait = client.backoff_delay(attempt, retry_after);
                        info!(attempt, kind=?kind, wait_ms=%wait.as_millis(), "retrying request");
                        tokio::select! {
                            biased;
                            _ = cancel_token.cancelled() => {
                                info!("request cancelled during retry sleep");
                                return Err(failure(ApiErrorKind::Cancelled, "cancelled during retry"));
                            }
                            _ = tokio::time::sleep(wait) => {}
                        }
                        last_err = Some(failure(kind, format!("{} - {}", status, text)));
                        continue;
                    }
                    return Err(failure(kind, format!("{} - {}", status, text)));
                }

                let text = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        info!("request cancelled during body read");
                        return Err(failure(ApiErrorKind::Cancelled, "cancelled during body read"));
                    }
                    res = resp.text() => res,
                };
                match text {
                    Ok(text) => {
                        debug!(attempt, "backend request ok");
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(attempt, err=%e, "backend read body error");
                        if attempt < max_attempts {
                            let wait = client.backoff_delay(attempt, None);
                            last_err = Some(failure(ApiErrorKind::Network, e.to_string()));
                            tokio::select! {
                                biased;
                                _ = cancel_token.cancelled() => {
                                    info!("request cancelled during retry sleep");
                                    return Err(failure(ApiErrorKind::Cancelled, "cancelled during retry"));
                                }
                                _ = tokio::time::sleep(wait) => {}
                            }
                            continue;
                        }
                        return Err(failure(ApiErrorKind::Network, e.to_string()));
                    }
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| failure(ApiErrorKind::Unknown, "request not attempted")))
}
