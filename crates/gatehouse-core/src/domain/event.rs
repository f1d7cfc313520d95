//! Triggering events and the concurrency key derived from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};

/// A change notification delivered by the event platform.
///
/// Immutable once ingested; the field names follow the ingress payload
/// (`repository`, `ref`, `headCommit`, `workflowName`, `isPullRequest`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Repository identity, e.g. `org/name`.
    pub repository: String,

    /// Branch or pull-request ref, when the platform provides one.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    /// Head commit SHA of the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<String>,

    pub workflow_name: String,

    /// Whether the event comes from a pull/merge request.
    #[serde(default)]
    pub is_pull_request: bool,
}

impl Event {
    /// Create a push event on a ref.
    pub fn push(repository: &str, git_ref: &str, head_commit: &str, workflow_name: &str) -> Self {
        Self {
            repository: repository.to_string(),
            git_ref: Some(git_ref.to_string()),
            head_commit: Some(head_commit.to_string()),
            workflow_name: workflow_name.to_string(),
            is_pull_request: false,
        }
    }

    /// Parse an event from its JSON ingress form.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The line of work this event belongs to: the ref when present,
    /// otherwise the head commit.
    pub fn line_of_work(&self) -> Option<&str> {
        non_empty(self.git_ref.as_deref()).or_else(|| non_empty(self.head_commit.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Deduplication identity: `(repository, ref-or-head-commit, workflow)`.
///
/// Two events with equal keys belong to the same logical line of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConcurrencyKey {
    pub repository: String,
    pub line: String,
    pub workflow: String,
}

impl ConcurrencyKey {
    /// Derive the key for an event.
    pub fn from_event(event: &Event) -> Result<Self> {
        let repository = event.repository.trim();
        if repository.is_empty() {
            return Err(CoreError::InvalidEvent("repository is empty".to_string()));
        }
        let workflow = event.workflow_name.trim();
        if workflow.is_empty() {
            return Err(CoreError::InvalidEvent("workflow name is empty".to_string()));
        }
        let line = event.line_of_work().ok_or_else(|| {
            CoreError::InvalidEvent("event carries neither a ref nor a head commit".to_string())
        })?;

        Ok(Self {
            repository: repository.to_string(),
            line: line.to_string(),
            workflow: workflow.to_string(),
        })
    }

    /// Deterministic SHA-256 digest of the key parts.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.repository, &self.line, &self.workflow] {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }

    /// First 12 characters of the digest, for logs.
    pub fn short_digest(&self) -> String {
        self.digest()[..12].to_string()
    }
}

impl fmt::Display for ConcurrencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.workflow, self.repository, self.line)
    }
}
