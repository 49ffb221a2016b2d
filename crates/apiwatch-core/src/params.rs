use std::collections::BTreeMap;

use apiwatch_protocol::{OperationDescriptor, ParameterLocation, ParameterSpec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};

/// Caller-supplied parameter values, possibly several per name, plus the
/// acting users. One value broadcasts to every batch index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBundle {
    params: BTreeMap<String, Vec<String>>,
    users: Vec<String>,
}

impl ParameterBundle {
    /// Empty bundle acting as the anonymous user (`""`).
    pub fn new() -> Self {
        Self {
            params: BTreeMap::new(),
            users: vec![String::new()],
        }
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            params: BTreeMap::new(),
            users: vec![user.into()],
        }
    }

    pub fn with_users<I, U>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn param<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        self.insert(name, values);
        self
    }

    pub fn insert<I, V>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        self.params.insert(
            name.into(),
            values.into_iter().map(|v| v.to_string()).collect(),
        );
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.params.get(name).map(Vec::as_slice)
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Default for ParameterBundle {
    fn default() -> Self {
        Self::new()
    }
}

/// How the access token reaches the server, outside the parameter bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenCarrier {
    #[default]
    Query,
    Header,
    /// The token is not attached automatically.
    None,
}

/// The API's designated token parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TokenSpec {
    pub name: String,
    pub carrier: TokenCarrier,
}

impl TokenSpec {
    /// True when `param` is the token parameter and the token is attached for the caller.
    pub fn carries(&self, param: &ParameterSpec) -> bool {
        self.carrier != TokenCarrier::None && self.name == param.name
    }
}

impl Default for TokenSpec {
    fn default() -> Self {
        Self {
            name: "token".to_string(),
            carrier: TokenCarrier::Query,
        }
    }
}

/// Parameter values grouped by wire location, validated for batch cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedParameters {
    batch_len: usize,
    query: Vec<(String, Vec<String>)>,
    path: Vec<(String, Vec<String>)>,
    headers: Vec<(String, Vec<String>)>,
    users: Vec<String>,
    scope: String,
}

impl ClassifiedParameters {
    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    pub fn query(&self) -> &[(String, Vec<String>)] {
        &self.query
    }

    pub fn path(&self) -> &[(String, Vec<String>)] {
        &self.path
    }

    pub fn headers(&self) -> &[(String, Vec<String>)] {
        &self.headers
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// Sort the bundle into query/path/header groups following the operation's
/// declared parameters, and work out the batch length.
///
/// Missing required parameters are reported before any cardinality problem.
pub fn classify(
    operation: &OperationDescriptor,
    bundle: &ParameterBundle,
    token: &TokenSpec,
) -> Result<ClassifiedParameters> {
    if let Some(missing) = operation
        .parameters
        .iter()
        .find(|p| p.required && bundle.get(&p.name).is_none() && !token.carries(p))
    {
        return Err(WatchError::MissingRequiredParameter(missing.name.clone()));
    }

    let mut batch_len = 1usize;
    let mut query = Vec::new();
    let mut path = Vec::new();
    let mut headers = Vec::new();

    for spec in &operation.parameters {
        let Some(values) = bundle.get(&spec.name) else {
            continue;
        };
        if values.is_empty() {
            return Err(WatchError::EmptyParameter(spec.name.clone()));
        }

        let found = values.len();
        if found > 1 {
            if batch_len == 1 {
                batch_len = found;
            } else if found != batch_len {
                return Err(WatchError::InconsistentBatchLength {
                    name: spec.name.clone(),
                    expected: batch_len,
                    found,
                });
            }
        }

        let group = match spec.location {
            ParameterLocation::Query => &mut query,
            ParameterLocation::Path => &mut path,
            ParameterLocation::Header => &mut headers,
            ParameterLocation::Cookie | ParameterLocation::Other => {
                tracing::trace!(param = %spec.name, location = ?spec.location, "parameter not routed");
                continue;
            }
        };
        group.push((spec.name.clone(), values.to_vec()));
    }

    let users = bundle.users();
    if users.len() != 1 && users.len() != batch_len {
        return Err(WatchError::InconsistentUserCount {
            expected: batch_len,
            found: users.len(),
        });
    }

    Ok(ClassifiedParameters {
        batch_len,
        query,
        path,
        headers,
        users: users.to_vec(),
        scope: operation.scope().to_string(),
    })
}

/// A single value serves every index; otherwise index `i` is used.
pub(crate) fn first_or_index(values: &[String], index: usize) -> &str {
    if values.len() == 1 {
        &values[0]
    } else {
        &values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwatch_protocol::HttpMethod;

    fn mail_op() -> OperationDescriptor {
        OperationDescriptor::new(HttpMethod::Get, "/characters/{character_id}/mail")
            .with_parameter("character_id", ParameterLocation::Path, true)
            .with_parameter("labels", ParameterLocation::Query, false)
            .with_parameter("last_mail_id", ParameterLocation::Query, false)
            .with_parameter("If-None-Match", ParameterLocation::Header, false)
            .with_parameter("token", ParameterLocation::Query, true)
            .with_security("evesso", &["esi-mail.read_mail.v1"])
    }

    #[test]
    fn groups_values_by_location_in_declaration_order() {
        let bundle = ParameterBundle::for_user("alice")
            .param("last_mail_id", [7])
            .param("character_id", [100])
            .param("labels", [1])
            .param("If-None-Match", ["\"etag\""]);
        let classified = classify(&mail_op(), &bundle, &TokenSpec::default()).unwrap();

        assert_eq!(classified.batch_len(), 1);
        let query_names: Vec<_> = classified.query().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(query_names, ["labels", "last_mail_id"]);
        assert_eq!(classified.path()[0].1, vec!["100".to_string()]);
        assert_eq!(classified.headers()[0].0, "If-None-Match");
        assert_eq!(classified.scope(), "esi-mail.read_mail.v1");
    }

    #[test]
    fn first_multi_value_sets_batch_length() {
        let bundle = ParameterBundle::for_user("alice")
            .param("character_id", [1, 2, 3])
            .param("labels", [9])
            .param("last_mail_id", [10, 20, 30]);
        let classified = classify(&mail_op(), &bundle, &TokenSpec::default()).unwrap();
        assert_eq!(classified.batch_len(), 3);
    }

    #[test]
    fn unequal_multi_value_lengths_fail() {
        let bundle = ParameterBundle::for_user("alice")
            .param("character_id", [1, 2, 3])
            .param("last_mail_id", [10, 20]);
        let err = classify(&mail_op(), &bundle, &TokenSpec::default()).unwrap_err();
        assert_eq!(
            err,
            WatchError::InconsistentBatchLength {
                name: "last_mail_id".into(),
                expected: 3,
                found: 2,
            }
        );
    }

    #[test]
    fn missing_required_wins_over_other_problems() {
        let bundle = ParameterBundle::for_user("alice")
            .param("labels", [1, 2, 3])
            .param("last_mail_id", [10, 20]);
        let err = classify(&mail_op(), &bundle, &TokenSpec::default()).unwrap_err();
        assert_eq!(err, WatchError::MissingRequiredParameter("character_id".into()));
    }

    #[test]
    fn token_parameter_is_only_excused_when_carried() {
        let bundle = ParameterBundle::for_user("alice").param("character_id", [1]);
        assert!(classify(&mail_op(), &bundle, &TokenSpec::default()).is_ok());

        let uncarried = TokenSpec {
            name: "token".into(),
            carrier: TokenCarrier::None,
        };
        assert_eq!(
            classify(&mail_op(), &bundle, &uncarried).unwrap_err(),
            WatchError::MissingRequiredParameter("token".into())
        );
    }

    #[test]
    fn user_count_must_match_batch() {
        let bundle = ParameterBundle::new()
            .with_users(["a", "b"])
            .param("character_id", [1, 2, 3]);
        assert_eq!(
            classify(&mail_op(), &bundle, &TokenSpec::default()).unwrap_err(),
            WatchError::InconsistentUserCount {
                expected: 3,
                found: 2
            }
        );

        let none = ParameterBundle::new()
            .with_users(Vec::<String>::new())
            .param("character_id", [1]);
        assert!(matches!(
            classify(&mail_op(), &none, &TokenSpec::default()),
            Err(WatchError::InconsistentUserCount { found: 0, .. })
        ));
    }

    #[test]
    fn empty_value_list_is_rejected() {
        let bundle = ParameterBundle::for_user("alice").param("character_id", Vec::<u32>::new());
        assert_eq!(
            classify(&mail_op(), &bundle, &TokenSpec::default()).unwrap_err(),
            WatchError::EmptyParameter("character_id".into())
        );
    }

    #[test]
    fn undeclared_bundle_entries_are_ignored() {
        let op = OperationDescriptor::new(HttpMethod::Get, "/status");
        let bundle = ParameterBundle::new().param("unused", [1, 2, 3]);
        let classified = classify(&op, &bundle, &TokenSpec::default()).unwrap();
        assert_eq!(classified.batch_len(), 1);
        assert!(classified.query().is_empty());
    }
}
