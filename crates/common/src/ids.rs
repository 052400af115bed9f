//! Typed identifiers shared across planner/runtime components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Cluster-wide identifier of one distributed job (query execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(
    /// Raw 128-bit id value.
    pub Uuid,
);

impl JobId {
    /// Fresh random job id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one execution node (plan stage instance) within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionNodeId(
    /// Raw numeric id value.
    pub i32,
);

impl fmt::Display for ExecutionNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ExecutionNodeId {
    fn from(v: i32) -> Self {
        Self(v)
    }
}
