//! Logical API requests and their cache policy

use super::config::DEFAULT_CACHE_TTL;
use crate::cache::CacheKey;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Endpoint label used for every GraphQL call
pub const GRAPHQL_ENDPOINT: &str = "graphql";

/// HTTP method of a REST call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET with parameters in the query string
    Get,
    /// POST with parameters as a JSON body
    Post,
}

/// A REST call against a GitHub API path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestCall {
    /// HTTP method
    pub method: HttpMethod,
    /// Path relative to the API root, e.g. `search/repositories`
    pub path: String,
    /// Query (GET) or body (POST) parameters
    pub params: BTreeMap<String, String>,
}

/// A GraphQL query
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlCall {
    /// Query document
    pub document: String,
    /// Variables object
    pub variables: Value,
}

/// The two call shapes the executor can issue
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    /// REST call
    Rest(RestCall),
    /// GraphQL query
    GraphQl(GraphQlCall),
}

/// How a request interacts with the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Never read or write the cache
    Bypass,
    /// Serve fresh hits, store successes for `ttl`. Permanent client errors
    /// are stored for `negative_ttl` when it is set.
    ReadWrite {
        /// TTL for successful payloads
        ttl: Duration,
        /// TTL for negative results; `None` disables negative caching
        negative_ttl: Option<Duration>,
    },
    /// Skip the lookup and overwrite the entry with the fresh response
    Refresh {
        /// TTL for the refreshed payload
        ttl: Duration,
    },
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::ReadWrite {
            ttl: DEFAULT_CACHE_TTL,
            negative_ttl: None,
        }
    }
}

/// A logical request: what to call plus how to cache it
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    call: ApiCall,
    cache_policy: CachePolicy,
}

impl ApiRequest {
    /// GET `path` with no parameters yet
    pub fn get(path: impl Into<String>) -> Self {
        Self::rest(HttpMethod::Get, path)
    }

    /// REST call with an explicit method
    pub fn rest(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            call: ApiCall::Rest(RestCall {
                method,
                path: path.into().trim_start_matches('/').to_string(),
                params: BTreeMap::new(),
            }),
            cache_policy: CachePolicy::default(),
        }
    }

    /// GraphQL query with a variables object
    pub fn graphql(document: impl Into<String>, variables: Value) -> Self {
        Self {
            call: ApiCall::GraphQl(GraphQlCall {
                document: document.into(),
                variables,
            }),
            cache_policy: CachePolicy::default(),
        }
    }

    /// Add a REST parameter. Ignored for GraphQL calls.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        if let ApiCall::Rest(rest) = &mut self.call {
            rest.params.insert(name.into(), value.to_string());
        }
        self
    }

    /// Replace the cache policy
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// The call to issue
    pub fn call(&self) -> &ApiCall {
        &self.call
    }

    /// Cache policy
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Whether this is a GraphQL query
    pub fn is_graphql(&self) -> bool {
        matches!(self.call, ApiCall::GraphQl(_))
    }

    /// Endpoint label used for the cache key, logs and metrics
    pub fn endpoint(&self) -> String {
        match &self.call {
            ApiCall::Rest(rest) => match rest.method {
                HttpMethod::Get => rest.path.clone(),
                HttpMethod::Post => format!("POST {}", rest.path),
            },
            ApiCall::GraphQl(_) => GRAPHQL_ENDPOINT.to_string(),
        }
    }

    /// Parameter set hashed into the cache key.
    ///
    /// GraphQL documents are whitespace-normalised and variables are
    /// serialised with sorted keys, so formatting never splits the cache.
    pub fn cache_params(&self) -> BTreeMap<String, String> {
        match &self.call {
            ApiCall::Rest(rest) => rest.params.clone(),
            ApiCall::GraphQl(gql) => {
                let mut params = BTreeMap::new();
                params.insert("query".to_string(), normalize_document(&gql.document));
                params.insert("variables".to_string(), canonical_json(&gql.variables));
                params
            }
        }
    }

    /// Deterministic cache key for this request
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.endpoint(), &self.cache_params())
    }
}

fn normalize_document(document: &str) -> String {
    document.split_whitespace().collect::<Vec<_>>().join(" ")
}

// serde_json maps are ordered by key unless `preserve_order` is enabled,
// which this crate never turns on.
fn canonical_json(value: &Value) -> String {
    value.to_string()
}
