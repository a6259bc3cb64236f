use std::ops::Range;

use crate::collab::Grading;
use crate::engine::error::EngineError;
use crate::module::config::{GroupDescriptor, ModuleConfig};
use crate::module::result::{FirstAttemptResult, ItemOutcome};

/// Coordinate system mapping flat item indices onto group descriptors.
///
/// Built once per module and never mutated, so repeated lookups with the same
/// index always agree.
#[derive(Clone, Debug)]
pub struct ItemIndex {
    config: ModuleConfig,
    starts: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location<'a> {
    pub descriptor_index: usize,
    pub group: &'a GroupDescriptor,
    pub offset_in_group: usize,
    pub item_count: usize,
}

impl Location<'_> {
    pub fn group_type(&self) -> &str {
        &self.group.group_type
    }

    pub fn group_id(&self) -> &str {
        &self.group.group_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutcomeLookup<'a> {
    Found(&'a ItemOutcome),
    /// The group result does not carry one outcome per declared item.
    Degraded { expected: usize, actual: usize },
}

impl OutcomeLookup<'_> {
    pub fn is_correct(&self) -> bool {
        match self {
            OutcomeLookup::Found(outcome) => outcome.is_correct,
            OutcomeLookup::Degraded { .. } => false,
        }
    }

    pub fn outcome(&self) -> Option<&ItemOutcome> {
        match self {
            OutcomeLookup::Found(outcome) => Some(outcome),
            OutcomeLookup::Degraded { .. } => None,
        }
    }
}

impl ItemIndex {
    pub fn new(config: ModuleConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut starts = Vec::with_capacity(config.groups.len());
        let mut running = 0;
        for group in &config.groups {
            starts.push(running);
            running += group.item_count;
        }
        Ok(Self { config, starts })
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn total_items(&self) -> usize {
        self.config.total_items
    }

    pub fn group_count(&self) -> usize {
        self.config.groups.len()
    }

    pub fn descriptor(&self, descriptor_index: usize) -> Option<&GroupDescriptor> {
        self.config.groups.get(descriptor_index)
    }

    pub fn locate(&self, flat_index: usize) -> Result<Location<'_>, EngineError> {
        let mut running = 0;
        for (descriptor_index, group) in self.config.groups.iter().enumerate() {
            let end = running + group.item_count;
            if flat_index < end {
                return Ok(Location {
                    descriptor_index,
                    group,
                    offset_in_group: flat_index - running,
                    item_count: group.item_count,
                });
            }
            running = end;
        }
        Err(EngineError::IndexOutOfRange {
            index: flat_index,
            total: self.total_items(),
        })
    }

    /// Inverse of [`ItemIndex::locate`].
    pub fn flat_index(&self, descriptor_index: usize, offset: usize) -> Result<usize, EngineError> {
        let group = self
            .descriptor(descriptor_index)
            .ok_or(EngineError::OffsetOutOfRange {
                descriptor_index,
                offset,
                item_count: 0,
            })?;
        if offset >= group.item_count {
            return Err(EngineError::OffsetOutOfRange {
                descriptor_index,
                offset,
                item_count: group.item_count,
            });
        }
        Ok(self.starts[descriptor_index] + offset)
    }

    pub fn group_start(&self, descriptor_index: usize) -> Option<usize> {
        self.starts.get(descriptor_index).copied()
    }

    pub fn group_span(&self, descriptor_index: usize) -> Option<Range<usize>> {
        let start = self.group_start(descriptor_index)?;
        let count = self.config.groups[descriptor_index].item_count;
        Some(start..start + count)
    }

    pub fn first_attempt_outcome<'r>(
        &self,
        first: &'r FirstAttemptResult,
        flat_index: usize,
    ) -> Result<OutcomeLookup<'r>, EngineError> {
        let loc = self.locate(flat_index)?;
        let result = first
            .groups
            .get(loc.descriptor_index)
            .ok_or_else(|| EngineError::MissingFirstAttempt {
                group_type: loc.group_type().to_string(),
                group_id: loc.group_id().to_string(),
                flat_index,
            })?;
        if result.group_id != loc.group_id() {
            return Err(EngineError::GroupMismatch {
                descriptor_index: loc.descriptor_index,
                group_type: loc.group_type().to_string(),
                flat_index,
                expected: loc.group_id().to_string(),
                actual: result.group_id.clone(),
            });
        }
        if result.outcomes.len() != loc.item_count {
            return Ok(OutcomeLookup::Degraded {
                expected: loc.item_count,
                actual: result.outcomes.len(),
            });
        }
        Ok(OutcomeLookup::Found(&result.outcomes[loc.offset_in_group]))
    }

    /// One flag per flat item: true when its group is objectively graded.
    /// `gradings` is indexed by descriptor.
    pub fn graded_items(&self, gradings: &[Grading]) -> Vec<bool> {
        self.config
            .groups
            .iter()
            .enumerate()
            .flat_map(|(i, g)| {
                let graded = gradings.get(i).is_none_or(|grading| *grading == Grading::Objective);
                std::iter::repeat_n(graded, g.item_count)
            })
            .collect()
    }

    /// Descriptor indices whose group result does not match the declared item count.
    pub fn degraded_groups(&self, first: &FirstAttemptResult) -> Vec<usize> {
        self.config
            .groups
            .iter()
            .zip(&first.groups)
            .enumerate()
            .filter(|(_, (desc, result))| desc.item_count != result.outcomes.len())
            .map(|(i, _)| i)
            .collect()
    }

    /// Flat correctness sequence for the first attempt. Degraded groups count as
    /// all incorrect.
    pub fn first_attempt_sequence(&self, first: &FirstAttemptResult) -> Result<Vec<bool>, EngineError> {
        first.check_alignment(&self.config)?;
        for i in self.degraded_groups(first) {
            let desc = &self.config.groups[i];
            tracing::warn!(
                group_type = %desc.group_type,
                group_id = %desc.group_id,
                flat_index = self.starts[i],
                expected = desc.item_count,
                actual = first.groups[i].outcomes.len(),
                "group result size mismatch; scoring group as incorrect"
            );
        }
        (0..self.total_items())
            .map(|flat| Ok(self.first_attempt_outcome(first, flat)?.is_correct()))
            .collect()
    }
}
