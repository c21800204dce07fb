//! Owner profiles for users and organisations

use super::enricher::{EnrichItem, Enricher, ItemError};
use crate::output::OwnerRecord;
use crate::request::{ApiRequest, CachePolicy, RequestExecutor};
use crate::FieldMap;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Profile fields copied from the users and orgs endpoints when present
const PROFILE_FIELDS: [&str; 16] = [
    "login",
    "name",
    "company",
    "blog",
    "location",
    "email",
    "bio",
    "description",
    "twitter_username",
    "public_repos",
    "public_gists",
    "followers",
    "following",
    "created_at",
    "updated_at",
    "type",
];

/// Field whose presence marks an owner as already fetched
const KNOWN_MARKER: &str = "login";

/// Account type of a repository owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    /// Personal account
    User,
    /// Organisation account
    Organization,
}

impl OwnerKind {
    /// Parse the `type` reported by the API; anything but an organisation is a user
    pub fn from_api_type(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("organization") {
            OwnerKind::Organization
        } else {
            OwnerKind::User
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            OwnerKind::User => "user",
            OwnerKind::Organization => "organization",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One owner account to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerItem {
    /// GitHub account id
    pub id: u64,
    /// Account login
    pub login: String,
    /// Account type
    pub kind: OwnerKind,
}

impl OwnerItem {
    /// Create an owner item
    pub fn new(id: u64, login: impl Into<String>, kind: OwnerKind) -> Self {
        Self {
            id,
            login: login.into(),
            kind,
        }
    }

    /// Build from an owner row of the repository file
    pub fn from_record(record: OwnerRecord) -> Self {
        let kind = OwnerKind::from_api_type(&record.owner_type);
        Self::new(record.owner_id, record.owner, kind)
    }
}

impl EnrichItem for OwnerItem {
    fn entity_id(&self) -> u64 {
        self.id
    }
}

/// Owners that have no stored profile yet.
///
/// `known` is the latest field map per entity, as loaded from the owner
/// store; an owner counts as known once its login was stored.
pub fn unknown_owners(owners: Vec<OwnerItem>, known: &BTreeMap<u64, FieldMap>) -> Vec<OwnerItem> {
    owners
        .into_iter()
        .filter(|owner| {
            !known
                .get(&owner.id)
                .is_some_and(|fields| fields.contains_key(KNOWN_MARKER))
        })
        .collect()
}

/// Fetches `users/{login}` or `orgs/{login}` and keeps the profile fields
#[derive(Debug, Clone)]
pub struct OwnerDetailsEnricher {
    cache_policy: CachePolicy,
}

impl Default for OwnerDetailsEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerDetailsEnricher {
    /// Enricher with the default cache policy
    pub fn new() -> Self {
        Self {
            cache_policy: CachePolicy::default(),
        }
    }

    /// Override the cache policy applied to every request
    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Profile request for `owner`
    pub fn build_request(&self, owner: &OwnerItem) -> ApiRequest {
        let path = match owner.kind {
            OwnerKind::User => format!("users/{}", owner.login),
            OwnerKind::Organization => format!("orgs/{}", owner.login),
        };
        ApiRequest::get(path).with_cache_policy(self.cache_policy)
    }

    /// Profile fields from a users or orgs payload. Null values are left out.
    pub fn extract(&self, owner: &OwnerItem, payload: &Value) -> Result<FieldMap, String> {
        let profile = payload
            .as_object()
            .filter(|p| p.get(KNOWN_MARKER).and_then(Value::as_str).is_some())
            .ok_or_else(|| format!("profile of {} has no login", owner.login))?;

        let mut fields: FieldMap = PROFILE_FIELDS
            .iter()
            .filter_map(|name| {
                profile
                    .get(*name)
                    .filter(|v| !v.is_null())
                    .map(|v| (name.to_string(), v.clone()))
            })
            .collect();
        fields.insert("owner_kind".to_string(), json!(owner.kind.as_str()));
        Ok(fields)
    }
}

#[async_trait]
impl Enricher for OwnerDetailsEnricher {
    type Item = OwnerItem;

    async fn enrich(&self, executor: &RequestExecutor, owner: &OwnerItem) -> Result<FieldMap, ItemError> {
        let response = executor.execute(&self.build_request(owner)).await?;
        self.extract(owner, &response.payload).map_err(ItemError::Malformed)
    }
}
