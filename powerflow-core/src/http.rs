use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::backoff::RetryPolicy;
use crate::rate_limit::RateLimiter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            ApiError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    /// Transport failures (timeouts, refused connections) and allowlisted
    /// statuses are retriable. Anything else is re-raised on first sight.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Api { status, .. } => RetryPolicy::is_retriable_status(*status),
            ApiError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// JSON-over-HTTP transport shared by the service clients.
///
/// Every request waits on the client's rate limiter, runs under the request
/// timeout, and is retried per the client's [`RetryPolicy`].
#[derive(Clone)]
pub(crate) struct HttpClient {
    http: Client,
    base_url: Url,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl HttpClient {
    pub(crate) fn new(
        base_url: &str,
        headers: HeaderMap,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: directory_url(base_url)?,
            limiter,
            retry,
        })
    }

    pub(crate) fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.execute(Method::GET, path, query, None).await
    }

    pub(crate) async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.execute(method, path, &[], Some(body)).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut attempt = 1u32;
        loop {
            self.limiter.acquire().await;
            let started = Instant::now();
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(body) = &body {
                request = request.json(body);
            }
            let outcome = match request.send().await {
                Ok(response) => Self::handle_response(response).await,
                Err(err) => Err(ApiError::Request(err)),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let err = match outcome {
                Ok(value) => {
                    debug!(%method, %url, attempt, duration_ms, "api call succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };
            let status = err.status().map(|s| s.as_u16());
            if !err.is_retryable() || attempt >= self.retry.max_attempts() {
                warn!(
                    %method,
                    %url,
                    attempt,
                    duration_ms,
                    ?status,
                    error = %err,
                    "api call failed"
                );
                return Err(err);
            }
            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.retry.delay_after(attempt));
            warn!(
                %method,
                %url,
                attempt,
                max_attempts = self.retry.max_attempts(),
                ?status,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying api call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, SystemTime::now()));
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Api {
                status,
                body,
                retry_after,
            })
        }
    }
}

/// Base URLs may carry a path prefix (`.../api/v1`); endpoints are joined
/// beneath it rather than replacing it.
fn directory_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// `Retry-After` is either delta-seconds or an HTTP-date.
pub(crate) fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_accepts_seconds() {
        let now = SystemTime::now();
        assert_eq!(parse_retry_after("2", now), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0.5 ", now), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("-1", now), None);
    }

    #[test]
    fn retry_after_accepts_http_dates() {
        let now = httpdate::parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:50:07 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:40:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn base_url_path_is_preserved() {
        let base = directory_url("https://public.example.com/api/v1").unwrap();
        assert_eq!(
            base.join("public/recordings").unwrap().as_str(),
            "https://public.example.com/api/v1/public/recordings"
        );
        let bare = directory_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(
            bare.join("pages").unwrap().as_str(),
            "http://127.0.0.1:8080/pages"
        );
    }

    #[test]
    fn api_errors_are_classified() {
        let err = |status| ApiError::Api {
            status,
            body: String::new(),
            retry_after: None,
        };
        assert_eq!(
            err(StatusCode::UNAUTHORIZED).classification(),
            Some(ApiErrorClass::Auth)
        );
        assert_eq!(
            err(StatusCode::TOO_MANY_REQUESTS).classification(),
            Some(ApiErrorClass::RateLimit)
        );
        assert_eq!(
            err(StatusCode::BAD_GATEWAY).classification(),
            Some(ApiErrorClass::Transient)
        );
        assert_eq!(
            err(StatusCode::NOT_FOUND).classification(),
            Some(ApiErrorClass::Permanent)
        );
        assert!(err(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(!err(StatusCode::NOT_FOUND).is_retryable());
        assert!(!err(StatusCode::BAD_REQUEST).is_retryable());
    }
}
