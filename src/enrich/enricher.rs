//! Request building and field extraction for work items

use super::item::{StatField, WorkItem};
use crate::request::{ApiRequest, CachePolicy, RequestError, RequestExecutor};
use crate::FieldMap;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Contributors requested per page when counting
const CONTRIBUTORS_PER_PAGE: usize = 100;

/// Anything the engine can partition, checkpoint and record in the ledger
pub trait EnrichItem: Send + Sync {
    /// Stable entity id; the population is ordered and deduplicated by it
    fn entity_id(&self) -> u64;
}

/// Why a single item could not be enriched
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    /// A request for the item failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The payload lacked a field the enricher needs
    #[error("{0}")]
    Malformed(String),
}

/// Fetches the derived fields of one work item through the shared executor
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Work item this enricher consumes
    type Item: EnrichItem;

    /// Derived fields for `item`
    async fn enrich(
        &self,
        executor: &RequestExecutor,
        item: &Self::Item,
    ) -> Result<FieldMap, ItemError>;
}

/// Per-repository statistics.
///
/// Pull requests, commits, issues and releases come from one GraphQL query
/// that only selects the fields the item is missing. The contributor count
/// has no GraphQL counterpart and is counted over the paged REST listing,
/// anonymous contributors included.
#[derive(Debug, Clone)]
pub struct RepoStatsEnricher {
    cache_policy: CachePolicy,
}

impl Default for RepoStatsEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoStatsEnricher {
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

    fn selection(field: StatField) -> &'static str {
        match field {
            StatField::PullRequests => "pullRequests { totalCount }",
            StatField::Commits => {
                "defaultBranchRef { target { ... on Commit { history { totalCount } } } }"
            }
            StatField::Issues => "issues { totalCount }",
            StatField::Releases => "releases { totalCount }",
            StatField::Contributors => "",
        }
    }

    /// GraphQL query for the missing statistics, if any are GraphQL-backed
    pub fn build_request(&self, item: &WorkItem) -> Option<ApiRequest> {
        let selections = item
            .missing
            .iter()
            .filter(|f| f.is_graphql())
            .map(|f| Self::selection(*f))
            .collect::<Vec<_>>();
        if selections.is_empty() {
            return None;
        }
        let selections = selections.join(" ");
        let document = format!(
            "query($owner: String!, $name: String!) {{ repository(owner: $owner, name: $name) {{ id {selections} }} }}"
        );
        Some(
            ApiRequest::graphql(document, json!({ "owner": item.owner, "name": item.name }))
                .with_cache_policy(self.cache_policy),
        )
    }

    /// One page of the contributor listing
    pub fn contributors_request(&self, item: &WorkItem, page: u32) -> ApiRequest {
        ApiRequest::get(format!("repos/{}/{}/contributors", item.owner, item.name))
            .param("anon", "1")
            .param("per_page", CONTRIBUTORS_PER_PAGE)
            .param("page", page)
            .with_cache_policy(self.cache_policy)
    }

    /// Derived fields from a GraphQL payload
    pub fn extract(&self, item: &WorkItem, payload: &Value) -> Result<FieldMap, String> {
        let repository = payload
            .get("repository")
            .filter(|r| !r.is_null())
            .ok_or_else(|| format!("repository {}/{} missing from payload", item.owner, item.name))?;

        let total = |node: Option<&Value>, field: StatField| -> Result<u64, String> {
            node.and_then(|n| n.get("totalCount"))
                .and_then(Value::as_u64)
                .ok_or_else(|| format!("{field} count missing from payload"))
        };

        let mut fields = FieldMap::new();
        for field in item.missing.iter().filter(|f| f.is_graphql()) {
            let count = match field {
                StatField::PullRequests => total(repository.get("pullRequests"), *field)?,
                StatField::Issues => total(repository.get("issues"), *field)?,
                StatField::Releases => total(repository.get("releases"), *field)?,
                StatField::Commits => match repository.get("defaultBranchRef") {
                    // Empty repositories have no default branch.
                    None | Some(Value::Null) => 0,
                    Some(branch) => total(
                        branch.get("target").and_then(|t| t.get("history")),
                        *field,
                    )?,
                },
                StatField::Contributors => continue,
            };
            fields.insert(field.as_str().to_string(), json!(count));
        }
        Ok(fields)
    }

    /// Count contributors page by page until a short page
    async fn count_contributors(
        &self,
        executor: &RequestExecutor,
        item: &WorkItem,
    ) -> Result<u64, ItemError> {
        let mut count = 0u64;
        let mut page = 1u32;
        loop {
            let response = executor.execute(&self.contributors_request(item, page)).await?;
            let listed = match &response.payload {
                Value::Null => 0,
                Value::Array(contributors) => contributors.len(),
                _ => {
                    return Err(ItemError::Malformed(format!(
                        "contributors of {}/{} is not a list",
                        item.owner, item.name
                    )))
                }
            };
            count += listed as u64;
            if listed < CONTRIBUTORS_PER_PAGE {
                return Ok(count);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl Enricher for RepoStatsEnricher {
    type Item = WorkItem;

    async fn enrich(&self, executor: &RequestExecutor, item: &WorkItem) -> Result<FieldMap, ItemError> {
        let mut fields = match self.build_request(item) {
            Some(request) => {
                let response = executor.execute(&request).await?;
                self.extract(item, &response.payload).map_err(ItemError::Malformed)?
            }
            None => FieldMap::new(),
        };
        if item.missing.contains(&StatField::Contributors) {
            let count = self.count_contributors(executor, item).await?;
            fields.insert(StatField::Contributors.as_str().to_string(), json!(count));
        }
        Ok(fields)
    }
}
