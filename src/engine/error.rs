use thiserror::Error;

use crate::session::flow::Phase;

/// Structural failures of the engine. Item-level grading anomalies are not
/// represented here: they degrade credit instead of failing an operation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("malformed module configuration: {0}")]
    MalformedConfig(String),

    #[error("flat index {index} out of range for {total} items")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("offset {offset} out of range for descriptor {descriptor_index} ({item_count} items)")]
    OffsetOutOfRange {
        descriptor_index: usize,
        offset: usize,
        item_count: usize,
    },

    #[error("no collaborator registered for group type '{group_type}'")]
    UnknownGroupType { group_type: String },

    #[error("no first-attempt result for {group_type}/{group_id} at item {flat_index}")]
    MissingFirstAttempt {
        group_type: String,
        group_id: String,
        flat_index: usize,
    },

    #[error("{count} first-attempt results for {descriptors} descriptors")]
    SurplusGroupResults { count: usize, descriptors: usize },

    #[error("group {descriptor_index} ({group_type}) at item {flat_index} is '{actual}', expected '{expected}'")]
    GroupMismatch {
        descriptor_index: usize,
        group_type: String,
        flat_index: usize,
        expected: String,
        actual: String,
    },

    #[error(
        "failed to load {group_type}/{group_id} at item {flat_index} after {attempts} attempts: {reason}"
    )]
    LoadFailed {
        group_type: String,
        group_id: String,
        flat_index: usize,
        attempts: u32,
        reason: String,
    },

    #[error("cannot {action} in phase {phase:?}")]
    InvalidTransition { phase: Phase, action: &'static str },

    #[error("first attempt incomplete: {recorded} of {expected} groups recorded")]
    FirstAttemptIncomplete { recorded: usize, expected: usize },

    #[error("second attempt incomplete: {recorded} of {expected} groups answered")]
    SecondAttemptIncomplete { recorded: usize, expected: usize },

    #[error("retake stopped at item {flat_index} of {total}")]
    RetakeIncomplete { flat_index: usize, total: usize },

    #[error("no group is mounted")]
    NoActiveGroup,
}
