use std::collections::HashMap;
use std::time::Duration;

use apiwatch_protocol::{ApiResponse, RequestDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CACHE_CONTROL, ETAG, EXPIRES, IF_NONE_MATCH};
use reqwest::StatusCode;

use crate::config::HttpConfig;
use crate::params::{TokenCarrier, TokenSpec};
use crate::util::after;

/// What a single round trip produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportReply {
    /// A full response (successful or an upstream error status).
    Fresh(ApiResponse),
    /// The server confirmed the cached ETag; only the expiry moved.
    NotModified { expires_at: DateTime<Utc> },
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// One HTTP round trip. Retries are the caller's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<TransportReply, TransportError>;
}

/// Access tokens per (user, scope). Acquisition itself lives elsewhere.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, user: &str, scope: &str) -> Option<String>;
}

/// Fixed user -> token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(user.into(), token.into());
        self
    }
}

#[async_trait]
impl TokenSource for StaticTokens {
    async fn token(&self, user: &str, _scope: &str) -> Option<String> {
        self.tokens.get(user).cloned()
    }
}

/// `reqwest` transport that attaches the token per [`TokenSpec`] and maps
/// caching headers into the response.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    token: TokenSpec,
    default_expiry: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig, token: TokenSpec) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| TransportError::Invalid(err.to_string()))?;
        Ok(Self {
            client,
            token,
            default_expiry: Duration::from_secs(config.default_expiry_secs),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<TransportReply, TransportError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|err| TransportError::Invalid(err.to_string()))?;
        let mut builder = self.client.request(method, request.url());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(etag) = if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(token) = token {
            builder = match self.token.carrier {
                TokenCarrier::Header => builder.bearer_auth(token),
                TokenCarrier::Query => builder.query(&[(self.token.name.as_str(), token)]),
                TokenCarrier::None => builder,
            };
        }

        let started = std::time::Instant::now();
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(err.to_string())
            }
        })?;
        let status = response.status();
        let headers = response.headers().clone();
        let expires_at = expiry_from_headers(&headers, Utc::now(), self.default_expiry);
        tracing::debug!(
            url = %request.url(),
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http round trip"
        );

        if status == StatusCode::NOT_MODIFIED {
            return Ok(TransportReply::NotModified { expires_at });
        }

        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        if !status.is_success() {
            return Ok(TransportReply::Fresh(ApiResponse::error(
                Some(status.as_u16()),
                error_message(status, &body),
                expires_at,
            )));
        }

        let mut reply = ApiResponse::ok(body, expires_at);
        if let Some(etag) = header_str(&headers, ETAG.as_str()) {
            reply = reply.with_etag(etag);
        }
        Ok(TransportReply::Fresh(reply))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn expiry_from_headers(headers: &HeaderMap, now: DateTime<Utc>, fallback: Duration) -> DateTime<Utc> {
    parse_expiry(
        header_str(headers, EXPIRES.as_str()),
        header_str(headers, CACHE_CONTROL.as_str()),
        now,
        fallback,
    )
}

/// Expiry from `Expires`, then `Cache-Control: max-age`, then `now + fallback`.
pub fn parse_expiry(
    expires: Option<&str>,
    cache_control: Option<&str>,
    now: DateTime<Utc>,
    fallback: Duration,
) -> DateTime<Utc> {
    if let Some(at) = expires.and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok()) {
        return at.with_timezone(&Utc);
    }
    let max_age = cache_control.and_then(|raw| {
        raw.split(',')
            .filter_map(|directive| directive.trim().strip_prefix("max-age="))
            .find_map(|secs| secs.trim().parse::<u64>().ok())
    });
    match max_age {
        Some(secs) => after(now, Duration::from_secs(secs)),
        None => after(now, fallback),
    }
}

/// Prefer the `error` field of a JSON error body; fall back to the raw text.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned));
    match parsed {
        Some(msg) => msg,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string(),
        None => body.trim().to_string(),
    }
}
