use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::module::config::ModuleConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choice(u32),
    Order(Vec<u32>),
    Media { media_uri: String },
    Text(String),
}

impl FromStr for Answer {
    type Err = Infallible;

    /// `3` is a choice, `2,0,1` an ordering, `media:<uri>` a recording,
    /// anything else free text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(uri) = s.strip_prefix("media:") {
            return Ok(Answer::Media {
                media_uri: uri.to_string(),
            });
        }
        if let Ok(choice) = s.parse::<u32>() {
            return Ok(Answer::Choice(choice));
        }
        if s.contains(',') {
            let parts: Result<Vec<u32>, _> = s.split(',').map(|p| p.trim().parse()).collect();
            if let Ok(order) = parts {
                return Ok(Answer::Order(order));
            }
        }
        Ok(Answer::Text(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    #[serde(default)]
    pub user_answer: Option<Answer>,
    pub correct_answer: Answer,
    pub is_correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
    /// Collaborator-specific explanatory fields, passed through untouched.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ItemOutcome {
    pub fn new(user_answer: Option<Answer>, correct_answer: Answer, is_correct: bool) -> Self {
        Self {
            user_answer,
            correct_answer,
            is_correct,
            explanation: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    pub group_id: String,
    pub outcomes: Vec<ItemOutcome>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FirstAttemptResult {
    pub groups: Vec<GroupResult>,
}

impl FirstAttemptResult {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Checks that there is one group result per descriptor, in descriptor order.
    /// Per-group outcome counts are not checked here: a size drift degrades that
    /// group instead of refusing the whole retake.
    pub fn check_alignment(&self, config: &ModuleConfig) -> Result<(), EngineError> {
        if self.groups.len() < config.groups.len() {
            return Err(config.missing_result(self.groups.len()));
        }
        if self.groups.len() > config.groups.len() {
            return Err(EngineError::SurplusGroupResults {
                count: self.groups.len(),
                descriptors: config.groups.len(),
            });
        }
        for (i, (desc, result)) in config.groups.iter().zip(&self.groups).enumerate() {
            if desc.group_id != result.group_id {
                return Err(EngineError::GroupMismatch {
                    descriptor_index: i,
                    group_type: desc.group_type.clone(),
                    flat_index: config.group_start(i),
                    expected: desc.group_id.clone(),
                    actual: result.group_id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetakeAnswer {
    pub user_answer: Option<Answer>,
    pub is_correct: bool,
}

/// Retake answers keyed by stringified flat item index. A missing key means the
/// first-attempt outcome stands.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetakeAnswerRecord {
    entries: BTreeMap<String, RetakeAnswer>,
}

impl RetakeAnswerRecord {
    pub fn insert(&mut self, flat_index: usize, answer: RetakeAnswer) {
        self.entries.insert(flat_index.to_string(), answer);
    }

    pub fn get(&self, flat_index: usize) -> Option<&RetakeAnswer> {
        self.entries.get(&flat_index.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flat_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .entries
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect();
        indices.sort_unstable();
        indices
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupResponse {
    pub group_id: String,
    pub answers: Vec<Option<Answer>>,
}

/// Free-text or recorded response for one pass of a paired writing/speaking module.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub groups: Vec<GroupResponse>,
}

impl ResponsePayload {
    pub fn has_group(&self, group_id: &str) -> bool {
        self.groups.iter().any(|g| g.group_id == group_id)
    }

    /// Replaces an earlier response for the same group.
    pub fn upsert(&mut self, response: GroupResponse) {
        match self
            .groups
            .iter_mut()
            .find(|g| g.group_id == response.group_id)
        {
            Some(existing) => *existing = response,
            None => self.groups.push(response),
        }
    }
}
