use crate::catalog::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The feed parsed but held no entries.
    Empty,
    Completed,
}

/// Why a single entry did not fully reconcile.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub reference: String,
    pub record: Option<RecordId>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepSummary {
    Skipped {
        reason: String,
    },
    Performed {
        deleted: Vec<RecordId>,
        failed: Vec<RecordId>,
    },
}

impl SweepSummary {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SweepSummary::Skipped {
            reason: reason.into(),
        }
    }

    pub fn was_performed(&self) -> bool {
        matches!(self, SweepSummary::Performed { .. })
    }
}

/// Transcript of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub stages: Vec<StageReport>,
    pub entries_seen: usize,
    pub entries_succeeded: usize,
    pub created: usize,
    pub updated: usize,
    pub touched: BTreeSet<RecordId>,
    pub failures: Vec<EntryFailure>,
    pub sweep: SweepSummary,
}

impl RunReport {
    /// Every entry seen was reconciled without error.
    pub fn is_complete(&self) -> bool {
        self.entries_succeeded == self.entries_seen
    }
}
