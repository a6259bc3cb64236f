use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collab::FraudFlag;
use crate::engine::scoring::{Improvement, Score};
use crate::module::config::Section;
use crate::module::result::{FirstAttemptResult, ResponsePayload, RetakeAnswerRecord};
use crate::session::flow::Family;

pub const EXPLAIN_SCHEMA_VERSION: u32 = 1;

const HISTORY_SCHEMA_VERSION: u32 = 1;

/// Everything the explain screen needs about one finished module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExplainRecord {
    pub schema_version: u32,
    pub section: Section,
    pub family: Family,
    pub total_items: usize,
    pub first_score: Option<Score>,
    pub retake_score: Option<Score>,
    pub improvement: Option<Improvement>,
    #[serde(default)]
    pub first_outcomes: Vec<bool>,
    #[serde(default)]
    pub final_outcomes: Vec<bool>,
    /// Free-text items; their entries in the outcome lists carry no credit.
    #[serde(default)]
    pub ungraded_items: Vec<usize>,
    #[serde(default)]
    pub retake_answers: RetakeAnswerRecord,
    #[serde(default)]
    pub first_attempt: FirstAttemptResult,
    pub first_response: Option<ResponsePayload>,
    pub second_response: Option<ResponsePayload>,
    pub fraud_flag: Option<FraudFlag>,
    pub completed_at: DateTime<Utc>,
}

impl ExplainRecord {
    pub fn needs_reset(&self) -> bool {
        self.schema_version != EXPLAIN_SCHEMA_VERSION
    }
}

/// Compact per-module summary kept across runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub section: Section,
    pub family: Family,
    pub total_items: usize,
    pub first_level: Option<f64>,
    pub retake_level: Option<f64>,
    pub score_diff: Option<i64>,
    #[serde(default)]
    pub flagged: bool,
    pub completed_at: DateTime<Utc>,
}

impl From<&ExplainRecord> for HistoryEntry {
    fn from(record: &ExplainRecord) -> Self {
        Self {
            section: record.section,
            family: record.family,
            total_items: record.total_items,
            first_level: record.first_score.as_ref().map(|s| s.level),
            retake_level: record.retake_score.as_ref().map(|s| s.level),
            score_diff: record.improvement.as_ref().map(|i| i.score_diff),
            flagged: record.fraud_flag.is_some(),
            completed_at: record.completed_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryData {
    pub schema_version: u32,
    pub entries: Vec<HistoryEntry>,
}

impl Default for HistoryData {
    fn default() -> Self {
        Self {
            schema_version: HISTORY_SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

impl HistoryData {
    pub fn needs_reset(&self) -> bool {
        self.schema_version != HISTORY_SCHEMA_VERSION
    }
}
