//! Workflow activity as reported by the CI provider.
//!
//! These types mirror the subset of the GitHub Actions REST payloads the
//! monitor cares about. Every field other than the identity is optional:
//! the provider omits or nulls timestamps and conclusions until an entity
//! reaches the corresponding state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single workflow run, identified by its provider-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub head_branch: Option<String>,
    pub head_sha: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Whether the observable state of this run differs from a previously
    /// stored observation of the same run.
    pub fn differs_from(&self, stored: &WorkflowRun) -> bool {
        self.status != stored.status
            || self.conclusion != stored.conclusion
            || self.updated_at != stored.updated_at
    }
}

/// A job within a workflow run, together with its steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub run_id: Option<u64>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub steps: Vec<Step>,
}

impl Job {
    pub fn is_concluded(&self) -> bool {
        self.conclusion.is_some()
    }
}

/// A step within a job. Steps have no durable provider id; they are keyed by
/// `(job id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub number: Option<u64>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn is_concluded(&self) -> bool {
        self.conclusion.is_some()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Error returned when a repository argument is not of the form `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("repository must be in owner/repo format, got {input:?}")]
pub struct RepoSlugError {
    pub input: String,
}

/// Repository identity in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, RepoSlugError> {
        let err = || RepoSlugError {
            input: input.to_string(),
        };

        let (owner, name) = input.split_once('/').ok_or_else(err)?;
        // GitHub owner and repository names: ASCII alphanumerics, '.', '-', '_'
        let valid_part = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        };

        if name.contains('/') || !valid_part(owner) || !valid_part(name) {
            return Err(err());
        }

        Ok(Self::new(owner, name))
    }
}

impl FromStr for RepoSlug {
    type Err = RepoSlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
