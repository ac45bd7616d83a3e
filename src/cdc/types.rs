use serde::{Deserialize, Serialize};
use std::fmt;

/// A base table that must carry a capture instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CdcTableRef {
    pub schema: String,
    pub table: String,
}

impl CdcTableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Name SQL Server gives a capture instance when none is specified.
    pub fn default_capture_instance(&self) -> String {
        format!("{}_{}", self.schema, self.table)
    }
}

impl fmt::Display for CdcTableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Result of one database- or table-level transition, judged against the
/// catalog read back after the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The catalog confirms the requested state.
    Confirmed,
    /// The target state already held; no mutation was issued.
    AlreadySatisfied,
    /// The catalog reports the opposite of the requested state.
    Mismatch,
    /// The verification read failed or returned nothing.
    Unconfirmed(String),
    /// The mutating statement itself failed.
    Failed(String),
}

impl TransitionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TransitionOutcome::Confirmed | TransitionOutcome::AlreadySatisfied
        )
    }
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionOutcome::Confirmed => write!(f, "confirmed"),
            TransitionOutcome::AlreadySatisfied => write!(f, "already satisfied"),
            TransitionOutcome::Mismatch => write!(f, "catalog state mismatch"),
            TransitionOutcome::Unconfirmed(reason) => write!(f, "unconfirmed: {}", reason),
            TransitionOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
