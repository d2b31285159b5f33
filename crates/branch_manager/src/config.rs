use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BranchError, Result};

/// Most branches that may be forked from one message of one parent.
pub const DEFAULT_MAX_BRANCHES_PER_TRIGGER: usize = 6;

/// Lifetime of a branch-creation lock before it is considered stale.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// What happens to the children of a deleted branch.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse to delete a branch that still has children.
    #[default]
    Reject,
    /// Attach the children to the deleted branch's parent.
    Reparent,
    /// Delete the whole subtree.
    Cascade,
}

impl FromStr for DeletePolicy {
    type Err = BranchError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "reparent" => Ok(Self::Reparent),
            "cascade" => Ok(Self::Cascade),
            other => Err(BranchError::Config(format!("unknown delete policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchConfig {
    #[serde(default = "default_max_branches")]
    pub max_branches_per_trigger: usize,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

fn default_max_branches() -> usize {
    DEFAULT_MAX_BRANCHES_PER_TRIGGER
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            max_branches_per_trigger: DEFAULT_MAX_BRANCHES_PER_TRIGGER,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            delete_policy: DeletePolicy::Reject,
        }
    }
}

impl BranchConfig {
    /// Load from a `.json` or `.toml` file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BranchError::Config(format!("{}: {e}", path.display())))?;

        let config: BranchConfig = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| BranchError::Config(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| BranchError::Config(e.to_string()))?
        };

        config.with_env_overrides()
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max) = lookup("BRANCH_MAX_PER_TRIGGER") {
            self.max_branches_per_trigger = max
                .trim()
                .parse()
                .map_err(|_| BranchError::Config(format!("invalid BRANCH_MAX_PER_TRIGGER: {max}")))?;
        }
        if let Some(timeout) = lookup("BRANCH_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = timeout.trim().parse().map_err(|_| {
                BranchError::Config(format!("invalid BRANCH_LOCK_TIMEOUT_MS: {timeout}"))
            })?;
        }
        if let Some(policy) = lookup("BRANCH_DELETE_POLICY") {
            self.delete_policy = policy.parse()?;
        }
        Ok(self)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
