pub mod build;
pub mod schema;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use apiwatch_core::protocol::HttpMethod;
use apiwatch_core::{load_config, ApiDocument, ParameterBundle, WatchConfig};
use clap::Args;

/// Operation selection shared by `build` and `watch`.
#[derive(Args, Clone)]
pub struct TargetArgs {
    /// Swagger 2 / OpenAPI 3 JSON document describing the API
    #[arg(long = "doc")]
    pub doc_path: PathBuf,
    /// Override the base URL found in the document
    #[arg(long)]
    pub base_url: Option<String>,
    /// HTTP method of the operation
    #[arg(long, default_value = "GET")]
    pub method: HttpMethod,
    /// Path template as written in the document, e.g. /characters/{id}/mail
    #[arg(long)]
    pub path: String,
    /// Parameter values as name=v1,v2 (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Vec<String>)>,
    /// Users to issue requests as (repeatable; one user or one per batch element)
    #[arg(long = "user")]
    pub users: Vec<String>,
    /// TOML config file; defaults plus environment overrides when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl TargetArgs {
    pub fn bundle(&self) -> ParameterBundle {
        let mut bundle = if self.users.is_empty() {
            ParameterBundle::new()
        } else {
            ParameterBundle::new().with_users(self.users.iter().cloned())
        };
        for (name, values) in &self.params {
            bundle.insert(name.clone(), values.iter().cloned());
        }
        bundle
    }

    pub fn document(&self) -> Result<Arc<ApiDocument>> {
        let mut doc = ApiDocument::load(&self.doc_path)
            .with_context(|| format!("loading api document {}", self.doc_path.display()))?;
        if let Some(base) = &self.base_url {
            doc.set_base_url(base.clone());
        }
        Ok(Arc::new(doc))
    }

    pub fn config(&self) -> Result<WatchConfig> {
        match &self.config {
            Some(path) => {
                let path = path
                    .to_str()
                    .ok_or_else(|| anyhow!("config path is not valid UTF-8"))?;
                load_config(path)
            }
            None => Ok(WatchConfig::from_env()),
        }
    }
}

/// `name=v1,v2` -> (name, [v1, v2]). Values keep their inner whitespace.
pub fn parse_param(raw: &str) -> Result<(String, Vec<String>), String> {
    let (name, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value[,value...], got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name missing in '{raw}'"));
    }
    let values = if values.is_empty() {
        Vec::new()
    } else {
        values.split(',').map(str::to_string).collect()
    };
    Ok((name.to_string(), values))
}

/// `user=token` pairs for the static token source.
pub fn parse_token(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(user, token)| (user.trim().to_string(), token.to_string()))
        .ok_or_else(|| format!("expected user=token, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_split_on_commas() {
        assert_eq!(
            parse_param("character_id=100,200").unwrap(),
            ("character_id".to_string(), vec!["100".to_string(), "200".to_string()])
        );
        assert_eq!(parse_param("page=").unwrap().1, Vec::<String>::new());
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn tokens_keep_equals_in_value() {
        assert_eq!(
            parse_token("alice=abc=").unwrap(),
            ("alice".to_string(), "abc=".to_string())
        );
        assert!(parse_token("alice").is_err());
    }
}
