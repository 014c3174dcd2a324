use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobProgress;

/// Failure of a single item. Recorded on the job, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("timeout")]
    Timeout,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("executor panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub item_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl ItemOutcome {
    pub fn succeeded(item_id: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            error: None,
            response: (!response.is_null()).then_some(response),
        }
    }

    pub fn failed(item_id: impl Into<String>, error: &ItemError) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            error: Some(error.to_string()),
            response: None,
        }
    }

    pub fn from_result(
        item_id: impl Into<String>,
        result: std::result::Result<serde_json::Value, ItemError>,
    ) -> Self {
        match result {
            Ok(response) => Self::succeeded(item_id, response),
            Err(err) => Self::failed(item_id, &err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub successes: Vec<ItemOutcome>,
    pub failures: Vec<ItemOutcome>,
}

/// Running aggregate of item outcomes for one job run.
#[derive(Debug, Clone)]
pub struct OutcomeTally {
    total: u64,
    results: JobResults,
}

impl OutcomeTally {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            results: JobResults::default(),
        }
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        if outcome.success {
            self.results.successes.push(outcome);
        } else {
            self.results.failures.push(outcome);
        }
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = ItemOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress::from_counts(
            self.total,
            self.results.successes.len() as u64,
            self.results.failures.len() as u64,
        )
    }

    pub fn into_results(self) -> JobResults {
        self.results
    }
}
