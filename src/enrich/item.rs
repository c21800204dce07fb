//! Work items and the derived fields they may be missing

use super::enricher::EnrichItem;
use super::EnrichError;
use crate::output::PopulationRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Derived repository statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatField {
    /// Pull request count
    PullRequests,
    /// Commits on the default branch
    Commits,
    /// Issue count
    Issues,
    /// Release count
    Releases,
    /// Contributor count, anonymous contributors included
    Contributors,
}

impl StatField {
    /// Every statistic
    pub const ALL: [StatField; 5] = [
        StatField::PullRequests,
        StatField::Commits,
        StatField::Issues,
        StatField::Releases,
        StatField::Contributors,
    ];

    /// Whether the GraphQL statistics query can answer this field
    pub fn is_graphql(self) -> bool {
        !matches!(self, StatField::Contributors)
    }

    /// Column / field name
    pub fn as_str(self) -> &'static str {
        match self {
            StatField::PullRequests => "pull_requests",
            StatField::Commits => "commits",
            StatField::Issues => "issues",
            StatField::Releases => "releases",
            StatField::Contributors => "contributors_count",
        }
    }
}

impl fmt::Display for StatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatField {
    type Err = EnrichError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pull_requests" | "prs" => Ok(StatField::PullRequests),
            "commits" => Ok(StatField::Commits),
            "issues" => Ok(StatField::Issues),
            "releases" => Ok(StatField::Releases),
            "contributors" | "contributors_count" => Ok(StatField::Contributors),
            other => Err(EnrichError::InvalidPopulation(format!(
                "unknown field '{other}'"
            ))),
        }
    }
}

/// One entity to enrich; transient, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Entity id; the population is ordered by it
    pub id: u64,
    /// Owner login
    pub owner: String,
    /// Repository name
    pub name: String,
    /// Derived fields still missing
    pub missing: BTreeSet<StatField>,
}

impl WorkItem {
    /// Item missing every statistic
    pub fn new(id: u64, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
            missing: StatField::ALL.into_iter().collect(),
        }
    }

    /// Restrict the missing set
    pub fn with_missing(mut self, missing: impl IntoIterator<Item = StatField>) -> Self {
        self.missing = missing.into_iter().collect();
        self
    }

    /// Build from a population row; an empty `missing` column means all fields
    pub fn from_record(record: PopulationRecord) -> Result<Self, EnrichError> {
        let item = WorkItem::new(record.id, record.owner, record.name);
        if record.missing.trim().is_empty() {
            return Ok(item);
        }
        let missing = record
            .missing
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .map(StatField::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(item.with_missing(missing))
    }
}

impl EnrichItem for WorkItem {
    fn entity_id(&self) -> u64 {
        self.id
    }
}
