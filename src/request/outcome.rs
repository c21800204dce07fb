//! Response classification

use super::transport::{RawResponse, TransportError};
use serde_json::Value;

/// Longest body excerpt kept in an error message
const MAX_MESSAGE_LEN: usize = 300;

/// Classified result of one network call
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 2xx with a usable payload. For GraphQL this is the `data` object.
    Success(Value),
    /// Quota exhausted or secondary limit hit; never surfaced to callers
    RateLimited,
    /// 5xx, timeout or network failure
    Transient(String),
    /// 4xx other than a rate limit, or a GraphQL error such as `NOT_FOUND`
    PermanentClient {
        /// HTTP status (404 for GraphQL `NOT_FOUND`)
        status: u16,
        /// Server-provided message
        message: String,
    },
    /// Body that is not the JSON shape the endpoint promises
    Malformed(String),
}

impl Outcome {
    /// Label used for the `outcome` metric dimension
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::RateLimited => "rate_limited",
            Outcome::Transient(_) => "transient",
            Outcome::PermanentClient { .. } => "client_error",
            Outcome::Malformed(_) => "malformed",
        }
    }
}

/// Network failures are always transient
pub fn classify_transport_error(error: &TransportError) -> Outcome {
    Outcome::Transient(error.to_string())
}

/// Classify a raw response. `graphql` selects GraphQL envelope handling.
pub fn classify(response: &RawResponse, graphql: bool) -> Outcome {
    let status = response.status;

    if status == 429 {
        return Outcome::RateLimited;
    }
    if status == 403 {
        let quota_spent = response.quota.map(|q| q.remaining == 0).unwrap_or(false);
        if quota_spent || mentions_rate_limit(&response.body) {
            return Outcome::RateLimited;
        }
    }
    if (500..600).contains(&status) {
        return Outcome::Transient(format!("server error {status}"));
    }
    if !(200..300).contains(&status) {
        return Outcome::PermanentClient {
            status,
            message: error_message(&response.body),
        };
    }

    // 204 No Content, e.g. the contributors of an empty repository
    if !graphql && (status == 204 || response.body.is_empty()) {
        return Outcome::Success(Value::Null);
    }

    let body: Value = match serde_json::from_slice(&response.body) {
        Ok(body) => body,
        Err(e) => return Outcome::Malformed(format!("invalid JSON body: {e}")),
    };

    if graphql {
        classify_graphql(status, body)
    } else {
        Outcome::Success(body)
    }
}

fn classify_graphql(status: u16, mut body: Value) -> Outcome {
    let errors: Vec<Value> = body
        .get("errors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let data = body.get_mut("data").map(Value::take);

    if errors.is_empty() && data.is_none() {
        return Outcome::Malformed("GraphQL body has neither data nor errors".to_string());
    }

    let error_type = |e: &Value| e.get("type").and_then(Value::as_str).map(str::to_string);
    if errors.iter().any(|e| error_type(e).as_deref() == Some("RATE_LIMITED")) {
        return Outcome::RateLimited;
    }

    let first_message = || {
        errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .next()
            .map(truncate)
            .unwrap_or_else(|| "GraphQL error".to_string())
    };

    if errors.iter().any(|e| error_type(e).as_deref() == Some("NOT_FOUND")) {
        return Outcome::PermanentClient {
            status: 404,
            message: first_message(),
        };
    }

    match data {
        Some(data) if !data.is_null() => Outcome::Success(data),
        _ => Outcome::PermanentClient {
            status,
            message: first_message(),
        },
    }
}

fn mentions_rate_limit(body: &[u8]) -> bool {
    String::from_utf8_lossy(body)
        .to_ascii_lowercase()
        .contains("rate limit")
}

fn error_message(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = json.get("message").and_then(Value::as_str) {
            return truncate(message);
        }
    }
    truncate(&String::from_utf8_lossy(body))
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_MESSAGE_LEN).collect()
}
