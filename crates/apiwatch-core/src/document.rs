//! Operation lookup backed by an OpenAPI / Swagger document.
//!
//! Only the fields the request builder needs are read: server url, paths,
//! parameters (inline or `$ref`) and security requirements. The document is
//! not validated against its schema.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use apiwatch_protocol::{
    HttpMethod, OperationDescriptor, ParameterSpec, SecurityRequirement,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, WatchError};

/// Supplies operation descriptors for a path + method.
pub trait OperationProvider: Send + Sync {
    fn base_url(&self) -> &str;

    fn operation(&self, path: &str, method: HttpMethod) -> Option<OperationDescriptor>;
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    servers: Vec<RawServer>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default, rename = "basePath")]
    base_path: Option<String>,
    #[serde(default)]
    schemes: Vec<String>,
    #[serde(default)]
    paths: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    components: RawComponents,
    #[serde(default)]
    security: Vec<SecurityRequirement>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawComponents {
    #[serde(default)]
    parameters: BTreeMap<String, ParameterSpec>,
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    #[serde(default, rename = "operationId")]
    operation_id: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(default)]
    security: Option<Vec<SecurityRequirement>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParameter {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Inline(ParameterSpec),
}

/// In-memory operation table built from a document or by hand.
#[derive(Debug, Clone, Default)]
pub struct ApiDocument {
    base_url: String,
    operations: HashMap<(HttpMethod, String), OperationDescriptor>,
}

impl ApiDocument {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            operations: HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: OperationDescriptor) -> Self {
        self.insert(operation);
        self
    }

    pub fn insert(&mut self, operation: OperationDescriptor) {
        let key = (operation.method, normalize_path(&operation.path));
        self.operations.insert(key, operation);
    }

    /// Override the server url taken from the document.
    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into();
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.values()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| WatchError::Document(format!("reading {}: {err}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| WatchError::Document(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawDocument =
            serde_json::from_value(value).map_err(|err| WatchError::Document(err.to_string()))?;
        let mut doc = ApiDocument::new(raw.base_url());

        for (path, item) in &raw.paths {
            let shared = match item.get("parameters") {
                Some(params) => parse_parameters(&raw, path, params)?,
                None => Vec::new(),
            };
            for (key, body) in item {
                let Ok(method) = key.parse::<HttpMethod>() else {
                    continue;
                };
                let op: RawOperation = serde_json::from_value(body.clone()).map_err(|err| {
                    WatchError::Document(format!("{} {path}: {err}", method))
                })?;
                let mut parameters = shared.clone();
                for param in resolve_all(&raw, path, &op.parameters)? {
                    match parameters
                        .iter_mut()
                        .find(|p| p.name == param.name && p.location == param.location)
                    {
                        Some(existing) => *existing = param,
                        None => parameters.push(param),
                    }
                }
                doc.insert(OperationDescriptor {
                    method,
                    path: path.clone(),
                    operation_id: op.operation_id,
                    parameters,
                    security: op.security.unwrap_or_else(|| raw.security.clone()),
                });
            }
        }
        tracing::debug!(operations = doc.len(), base_url = %doc.base_url, "api document loaded");
        Ok(doc)
    }
}

impl RawDocument {
    fn base_url(&self) -> String {
        if let Some(server) = self.servers.first() {
            return server.url.clone();
        }
        match &self.host {
            Some(host) => {
                let scheme = self.schemes.first().map(String::as_str).unwrap_or("https");
                let base_path = self.base_path.as_deref().unwrap_or("");
                format!("{scheme}://{host}{base_path}")
            }
            None => self.base_path.clone().unwrap_or_default(),
        }
    }

    fn lookup_ref(&self, reference: &str) -> Option<&ParameterSpec> {
        if let Some(name) = reference.strip_prefix("#/parameters/") {
            return self.parameters.get(name);
        }
        reference
            .strip_prefix("#/components/parameters/")
            .and_then(|name| self.components.parameters.get(name))
    }
}

fn parse_parameters(raw: &RawDocument, path: &str, value: &Value) -> Result<Vec<ParameterSpec>> {
    let params: Vec<RawParameter> = serde_json::from_value(value.clone())
        .map_err(|err| WatchError::Document(format!("{path} parameters: {err}")))?;
    resolve_all(raw, path, &params)
}

fn resolve_all(raw: &RawDocument, path: &str, params: &[RawParameter]) -> Result<Vec<ParameterSpec>> {
    params
        .iter()
        .map(|param| match param {
            RawParameter::Inline(spec) => Ok(spec.clone()),
            RawParameter::Ref { reference } => raw.lookup_ref(reference).cloned().ok_or_else(|| {
                WatchError::Document(format!("{path}: unresolved parameter reference {reference}"))
            }),
        })
        .collect()
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

impl OperationProvider for ApiDocument {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn operation(&self, path: &str, method: HttpMethod) -> Option<OperationDescriptor> {
        self.operations
            .get(&(method, normalize_path(path)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwatch_protocol::ParameterLocation;
    use serde_json::json;

    fn swagger() -> Value {
        json!({
            "swagger": "2.0",
            "host": "api.example",
            "basePath": "/latest",
            "schemes": ["https"],
            "parameters": {
                "datasource": {"name": "datasource", "in": "query", "required": false},
                "token": {"name": "token", "in": "query", "required": false}
            },
            "paths": {
                "/characters/{character_id}/mail/": {
                    "parameters": [{"name": "character_id", "in": "path", "required": true}],
                    "get": {
                        "operationId": "get_characters_character_id_mail",
                        "parameters": [
                            {"$ref": "#/parameters/datasource"},
                            {"name": "labels", "in": "query", "required": false},
                            {"$ref": "#/parameters/token"}
                        ],
                        "security": [{"evesso": ["esi-mail.read_mail.v1"]}]
                    },
                    "post": {
                        "parameters": [{"name": "mail", "in": "body", "required": true}]
                    }
                },
                "/status/": {
                    "get": {"parameters": [{"$ref": "#/parameters/datasource"}]}
                }
            }
        })
    }

    #[test]
    fn reads_swagger_operations_with_refs() {
        let doc = ApiDocument::from_value(swagger()).unwrap();
        assert_eq!(doc.base_url(), "https://api.example/latest");
        assert_eq!(doc.len(), 3);

        let op = doc
            .operation("/characters/{character_id}/mail/", HttpMethod::Get)
            .unwrap();
        let names: Vec<_> = op.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["character_id", "datasource", "labels", "token"]);
        assert_eq!(op.parameters[0].location, ParameterLocation::Path);
        assert_eq!(op.scope(), "esi-mail.read_mail.v1");
        assert_eq!(
            op.operation_id.as_deref(),
            Some("get_characters_character_id_mail")
        );

        let post = doc
            .operation("characters/{character_id}/mail/", HttpMethod::Post)
            .unwrap();
        assert_eq!(post.parameters[1].location, ParameterLocation::Other);
        assert_eq!(post.scope(), "");
    }

    #[test]
    fn prefers_openapi_servers() {
        let doc = ApiDocument::from_value(json!({
            "openapi": "3.0.0",
            "servers": [{"url": "https://api.example/v3"}],
            "components": {"parameters": {"page": {"name": "page", "in": "query"}}},
            "paths": {"/things": {"get": {"parameters": [{"$ref": "#/components/parameters/page"}]}}}
        }))
        .unwrap();
        assert_eq!(doc.base_url(), "https://api.example/v3");
        let op = doc.operation("/things", HttpMethod::Get).unwrap();
        assert!(!op.parameters[0].required);
    }

    #[test]
    fn unresolved_reference_is_a_document_error() {
        let err = ApiDocument::from_value(json!({
            "paths": {"/x": {"get": {"parameters": [{"$ref": "#/parameters/missing"}]}}}
        }))
        .unwrap_err();
        assert!(matches!(err, WatchError::Document(msg) if msg.contains("missing")));
    }

    #[test]
    fn unknown_method_is_absent() {
        let doc = ApiDocument::from_value(swagger()).unwrap();
        assert!(doc.operation("/status/", HttpMethod::Delete).is_none());
    }
}
