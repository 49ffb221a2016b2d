use std::collections::BTreeMap;
use std::sync::Arc;

use apiwatch_protocol::{HttpMethod, OperationDescriptor, RequestDescriptor};

use crate::document::OperationProvider;
use crate::error::{Result, WatchError};
use crate::params::{classify, first_or_index, ClassifiedParameters, ParameterBundle, TokenSpec};

/// Join a server base url and a path template without doubling or dropping `/`.
pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Expand classified parameters into one request per batch index, in index order.
pub fn build(
    base_path: &str,
    classified: &ClassifiedParameters,
    method: HttpMethod,
) -> Vec<RequestDescriptor> {
    (0..classified.batch_len())
        .map(|index| {
            let url = request_url(base_path, classified, index);
            let headers: BTreeMap<String, String> = classified
                .headers()
                .iter()
                .map(|(name, values)| (name.clone(), first_or_index(values, index).to_string()))
                .collect();
            RequestDescriptor::new(
                method,
                url,
                headers,
                first_or_index(classified.users(), index),
                classified.scope(),
            )
        })
        .collect()
}

fn request_url(base_path: &str, classified: &ClassifiedParameters, index: usize) -> String {
    let mut url = base_path.to_string();
    for (name, values) in classified.path() {
        url = url.replace(&format!("{{{name}}}"), first_or_index(values, index));
    }

    let query = classified
        .query()
        .iter()
        .map(|(name, values)| format!("{name}={}", first_or_index(values, index)))
        .collect::<Vec<_>>()
        .join("&");
    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query);
    }
    url
}

/// Classify and build in one step; nothing is returned unless every index is valid.
pub fn build_for_operation(
    base_url: &str,
    operation: &OperationDescriptor,
    bundle: &ParameterBundle,
    token: &TokenSpec,
) -> Result<Vec<RequestDescriptor>> {
    let classified = classify(operation, bundle, token)?;
    let requests = build(
        &join_url(base_url, &operation.path),
        &classified,
        operation.method,
    );
    tracing::debug!(
        method = %operation.method,
        path = %operation.path,
        batch = requests.len(),
        "built request batch"
    );
    Ok(requests)
}

/// Looks operations up in an API document and turns parameter bundles into requests.
#[derive(Clone)]
pub struct RequestBuilder {
    provider: Arc<dyn OperationProvider>,
    token: TokenSpec,
}

impl RequestBuilder {
    pub fn new(provider: Arc<dyn OperationProvider>, token: TokenSpec) -> Self {
        Self { provider, token }
    }

    pub fn provider(&self) -> &Arc<dyn OperationProvider> {
        &self.provider
    }

    pub fn requests(
        &self,
        method: HttpMethod,
        path: &str,
        bundle: &ParameterBundle,
    ) -> Result<Vec<RequestDescriptor>> {
        let operation =
            self.provider
                .operation(path, method)
                .ok_or_else(|| WatchError::UnknownPath {
                    method,
                    path: path.to_string(),
                })?;
        build_for_operation(self.provider.base_url(), &operation, bundle, &self.token)
    }

    /// Same as [`RequestBuilder::requests`] with the method given by name.
    pub fn requests_for(
        &self,
        method: &str,
        path: &str,
        bundle: &ParameterBundle,
    ) -> Result<Vec<RequestDescriptor>> {
        let method: HttpMethod = method.parse()?;
        self.requests(method, path, bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwatch_protocol::ParameterLocation;

    fn classified(op: &OperationDescriptor, bundle: &ParameterBundle) -> ClassifiedParameters {
        classify(op, bundle, &TokenSpec::default()).unwrap()
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://api.example/", "/a"), "https://api.example/a");
        assert_eq!(join_url("https://api.example", "a"), "https://api.example/a");
        assert_eq!(join_url("https://api.example/latest", ""), "https://api.example/latest");
    }

    #[test]
    fn query_parameters_join_without_trailing_separator() {
        let op = OperationDescriptor::new(HttpMethod::Get, "/markets/{region_id}/orders")
            .with_parameter("region_id", ParameterLocation::Path, true)
            .with_parameter("order_type", ParameterLocation::Query, true)
            .with_parameter("page", ParameterLocation::Query, false);
        let bundle = ParameterBundle::new()
            .param("region_id", [10000002])
            .param("order_type", ["all"])
            .param("page", [1, 2]);
        let requests = build(
            "https://api.example/markets/{region_id}/orders",
            &classified(&op, &bundle),
            HttpMethod::Get,
        );
        let urls: Vec<_> = requests.iter().map(|r| r.url()).collect();
        assert_eq!(
            urls,
            [
                "https://api.example/markets/10000002/orders?order_type=all&page=1",
                "https://api.example/markets/10000002/orders?order_type=all&page=2",
            ]
        );
    }

    #[test]
    fn empty_bundle_yields_the_unparameterized_call() {
        let op = OperationDescriptor::new(HttpMethod::Get, "/status");
        let requests = build(
            "https://api.example/status",
            &classified(&op, &ParameterBundle::new()),
            HttpMethod::Get,
        );
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url(), "https://api.example/status");
        assert_eq!(requests[0].user(), "");
        assert!(requests[0].headers().is_empty());
    }

    #[test]
    fn headers_and_users_resolve_per_index() {
        let op = OperationDescriptor::new(HttpMethod::Post, "/ui/openwindow")
            .with_parameter("Accept-Language", ParameterLocation::Header, false)
            .with_parameter("target_id", ParameterLocation::Query, true);
        let bundle = ParameterBundle::new()
            .with_users(["alice", "bob"])
            .param("Accept-Language", ["en", "de"])
            .param("target_id", [5]);
        let requests = build(
            "https://api.example/ui/openwindow",
            &classified(&op, &bundle),
            HttpMethod::Post,
        );
        assert_eq!(requests[0].user(), "alice");
        assert_eq!(requests[1].user(), "bob");
        assert_eq!(requests[1].headers().get("Accept-Language").unwrap(), "de");
        assert_eq!(requests[1].url(), "https://api.example/ui/openwindow?target_id=5");
        assert_eq!(requests[1].method(), HttpMethod::Post);
        assert_ne!(requests[0].id(), requests[1].id());
    }

    #[test]
    fn unknown_method_name_yields_no_batch() {
        let doc = crate::document::ApiDocument::new("https://api.example").with_operation(
            OperationDescriptor::new(HttpMethod::Get, "/status"),
        );
        let builder = RequestBuilder::new(Arc::new(doc), TokenSpec::default());

        let result = builder.requests_for("CONNECT", "/status", &ParameterBundle::new());
        assert_eq!(result, Err(WatchError::UnknownOperation("CONNECT".into())));

        let requests = builder
            .requests_for("get", "/status", &ParameterBundle::new())
            .unwrap();
        assert_eq!(requests.len(), 1);
    }
}
