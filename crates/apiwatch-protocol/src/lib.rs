use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// -------- Operations (read-only descriptions supplied by the API document) --------

/// Where a declared parameter travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Query,
    Path,
    Header,
    Cookie,
    /// Body parameters and anything else the request builder does not route.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, location: ParameterLocation, required: bool) -> Self {
        Self {
            name: name.into(),
            location,
            required,
        }
    }
}

/// One security requirement: scheme name -> scopes.
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

/// One documented API action (method + path template).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperationDescriptor {
    pub method: HttpMethod,
    /// Path template with `{name}` placeholders, e.g. `/characters/{id}/mail`.
    pub path: String,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub security: Vec<SecurityRequirement>,
}

impl OperationDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            operation_id: None,
            parameters: Vec::new(),
            security: Vec::new(),
        }
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        location: ParameterLocation,
        required: bool,
    ) -> Self {
        self.parameters
            .push(ParameterSpec::new(name, location, required));
        self
    }

    pub fn with_security(mut self, scheme: impl Into<String>, scopes: &[&str]) -> Self {
        let mut req = SecurityRequirement::new();
        req.insert(
            scheme.into(),
            scopes.iter().map(|s| (*s).to_string()).collect(),
        );
        self.security.push(req);
        self
    }

    /// First scope of the first security requirement, or `""` when none is declared.
    pub fn scope(&self) -> &str {
        self.security
            .first()
            .and_then(|req| req.values().next())
            .and_then(|scopes| scopes.first())
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method name with no HTTP mapping.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("operation type '{0}' has no http method mapping")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase();
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| UnknownMethod(raw.to_string()))
    }
}

// -------- Requests --------

/// Content-derived identity shared by the cache, the scheduler and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// SHA-256 over method, url, headers (sorted by name) and user.
    pub fn fingerprint(
        method: HttpMethod,
        url: &str,
        headers: &BTreeMap<String, String>,
        user: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(url.as_bytes());
        hasher.update([0u8]);
        for (name, value) in headers {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(user.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully resolved unit of work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RequestDescriptor {
    id: RequestId,
    method: HttpMethod,
    url: String,
    headers: BTreeMap<String, String>,
    user: String,
    scope: String,
}

impl RequestDescriptor {
    pub fn new(
        method: HttpMethod,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        user: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let user = user.into();
        let id = RequestId::fingerprint(method, &url, &headers, &user);
        Self {
            id,
            method,
            url,
            headers,
            user,
            scope: scope.into(),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Required security scope; empty when the operation declares none.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// -------- Responses and events --------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Fires on every successful poll.
    Update,
    /// Fires when the version marker differs from the previous response.
    Change,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Update => "update",
            EventKind::Change => "change",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseBody {
    pub body: String,
    pub expires_at: DateTime<Utc>,
    /// ETag when the server sent one, otherwise a SHA-256 of the body.
    pub version: String,
    #[serde(default)]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseError {
    #[serde(default)]
    pub status: Option<u16>,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of resolving a request through the cache coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApiResponse {
    Ok(ResponseBody),
    Error(ResponseError),
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        let body = body.into();
        let version = body_digest(&body);
        ApiResponse::Ok(ResponseBody {
            body,
            expires_at,
            version,
            etag: None,
        })
    }

    pub fn error(status: Option<u16>, message: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        ApiResponse::Error(ResponseError {
            status,
            message: message.into(),
            expires_at,
        })
    }

    /// Attach a server ETag; it becomes the version marker.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        if let ApiResponse::Ok(body) = &mut self {
            let etag = etag.into();
            body.version = etag.clone();
            body.etag = Some(etag);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ApiResponse::Error(_))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            ApiResponse::Ok(body) => body.expires_at,
            ApiResponse::Error(err) => err.expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            ApiResponse::Ok(body) => Some(body.version.as_str()),
            ApiResponse::Error(_) => None,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        match self {
            ApiResponse::Ok(body) => body.etag.as_deref(),
            ApiResponse::Error(_) => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            ApiResponse::Ok(body) => Some(body.body.as_str()),
            ApiResponse::Error(_) => None,
        }
    }

    /// Deserialize the body as JSON. Error responses fail with their message.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            ApiResponse::Ok(body) => serde_json::from_str(&body.body),
            ApiResponse::Error(err) => Err(serde::de::Error::custom(format!(
                "error response ({}): {}",
                err.status.map(|s| s.to_string()).unwrap_or_else(|| "no status".into()),
                err.message
            ))),
        }
    }

    /// Same payload, new expiry (used after a 304 revalidation).
    pub fn refreshed(&self, expires_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match &mut next {
            ApiResponse::Ok(body) => body.expires_at = expires_at,
            ApiResponse::Error(err) => err.expires_at = expires_at,
        }
        next
    }
}

fn body_digest(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn request_id_is_stable_and_content_derived() {
        let mut headers = BTreeMap::new();
        headers.insert("Accept-Language".to_string(), "en".to_string());
        let a = RequestDescriptor::new(HttpMethod::Get, "https://x/a", headers.clone(), "alice", "");
        let b = RequestDescriptor::new(HttpMethod::Get, "https://x/a", headers.clone(), "alice", "s");
        let c = RequestDescriptor::new(HttpMethod::Get, "https://x/a", headers, "bob", "");
        assert_eq!(a.id(), b.id(), "scope does not take part in identity");
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().as_str().len(), 64);
        assert_eq!(a.id().short().len(), 12);
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>(), Ok(HttpMethod::Get));
        assert_eq!(" Patch ".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
        assert_eq!(
            "CONNECT".parse::<HttpMethod>(),
            Err(UnknownMethod("CONNECT".into()))
        );
    }

    #[test]
    fn scope_defaults_to_empty() {
        let op = OperationDescriptor::new(HttpMethod::Get, "/status");
        assert_eq!(op.scope(), "");
        let op = op.with_security("evesso", &["esi-mail.read_mail.v1", "other"]);
        assert_eq!(op.scope(), "esi-mail.read_mail.v1");
    }

    #[test]
    fn etag_replaces_body_digest_as_version() {
        let now = Utc::now();
        let plain = ApiResponse::ok("[1,2]", now);
        let same_body = ApiResponse::ok("[1,2]", now + Duration::seconds(5));
        assert_eq!(plain.version(), same_body.version());
        let tagged = plain.clone().with_etag("\"abc\"");
        assert_eq!(tagged.version(), Some("\"abc\""));
        assert_eq!(tagged.etag(), Some("\"abc\""));
        assert!(ApiResponse::error(Some(502), "bad gateway", now).version().is_none());
    }

    #[test]
    fn ok_response_carries_body_expiry_and_version_only() {
        let tagged = ApiResponse::ok("[]", Utc::now()).with_etag("\"v1\"");
        let value = serde_json::to_value(&tagged).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["body", "etag", "expires_at", "outcome", "version"]);
    }

    #[test]
    fn json_body_deserializes_into_caller_type() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Mail {
            mail_id: u64,
            subject: String,
        }

        let now = Utc::now();
        let ok = ApiResponse::ok(r#"[{"mail_id":7,"subject":"hi"}]"#, now);
        let mails: Vec<Mail> = ok.json().unwrap();
        assert_eq!(
            mails,
            [Mail {
                mail_id: 7,
                subject: "hi".into()
            }]
        );
        assert!(ok.json::<Vec<u64>>().is_err());

        let failed = ApiResponse::error(Some(403), "token is expired", now);
        let err = failed.json::<Vec<Mail>>().unwrap_err();
        assert!(err.to_string().contains("403"), "{err}");
        assert!(err.to_string().contains("token is expired"), "{err}");
    }

    #[test]
    fn parameter_location_accepts_unknown_values() {
        let spec: ParameterSpec =
            serde_json::from_str(r#"{"name":"body","in":"body","required":true}"#).unwrap();
        assert_eq!(spec.location, ParameterLocation::Other);
        assert!(spec.required);
    }
}
