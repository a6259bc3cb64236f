use std::collections::BTreeSet;

use crate::collab::{AttemptContext, CollaboratorRegistry, Grading, HandleId};
use crate::engine::error::EngineError;
use crate::engine::index::{ItemIndex, OutcomeLookup};
use crate::engine::scoring::{self, Improvement, Score};
use crate::module::config::{GroupDescriptor, ModuleConfig};
use crate::module::result::{Answer, FirstAttemptResult, RetakeAnswer, RetakeAnswerRecord};
use crate::session::cache::{AnswerCache, InstanceCache, Mounted};
use crate::session::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetakeState {
    AtItem(usize),
    Loading(usize),
    LoadFailed { flat_index: usize, attempts: u32 },
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Now showing the group that starts at this flat index.
    Moved(usize),
    /// Every group has been visited.
    Completed,
    /// Stale, duplicate or out-of-bounds navigation; nothing changed.
    Ignored,
    /// The target group could not be mounted; `retry_load` or `retreat` to recover.
    LoadFailed(EngineError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitMode {
    /// Contains at least one item answered incorrectly; answers are re-graded.
    Retake,
    /// Free-text group; an untimed second draft is captured but not graded.
    Draft,
    /// Fully correct on the first attempt; shown read-only.
    Review,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visit {
    pub descriptor_index: usize,
    pub mode: VisitMode,
}

#[derive(Clone, Copy, Debug)]
struct ActiveGroup {
    descriptor_index: usize,
    handle: HandleId,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RetakeOptions {
    pub policy: RetryPolicy,
    pub skip_correct_groups: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetakeOutcome {
    pub first_score: Score,
    pub retake_score: Score,
    pub improvement: Improvement,
    pub first_outcomes: Vec<bool>,
    pub final_outcomes: Vec<bool>,
    /// Flat indices of free-text items, left out of both scores.
    pub ungraded_items: Vec<usize>,
    pub answers: RetakeAnswerRecord,
}

/// Walks the flat item space a second time, one group per screen, and
/// re-grades the groups the learner got wrong.
pub struct RetakeOrchestrator {
    index: ItemIndex,
    first: FirstAttemptResult,
    first_outcomes: Vec<bool>,
    graded: Vec<bool>,
    retake_set: BTreeSet<usize>,
    visits: Vec<Visit>,
    cursor: usize,
    state: RetakeState,
    answers: RetakeAnswerRecord,
    instances: InstanceCache,
    answer_cache: AnswerCache,
    active: Option<ActiveGroup>,
    policy: RetryPolicy,
}

impl RetakeOrchestrator {
    /// Builds the retake set and mounts the first group. A load failure here
    /// is reported through [`RetakeOrchestrator::state`], not as an error.
    pub fn start(
        config: ModuleConfig,
        first: FirstAttemptResult,
        registry: &mut CollaboratorRegistry,
        options: RetakeOptions,
    ) -> Result<Self, EngineError> {
        if first.is_empty() {
            return Err(config.missing_result(0));
        }
        let index = ItemIndex::new(config)?;
        let gradings = registry.resolve(index.config())?;
        let first_outcomes = index.first_attempt_sequence(&first)?;
        let graded = index.graded_items(&gradings);
        let retake_set: BTreeSet<usize> = first_outcomes
            .iter()
            .zip(&graded)
            .enumerate()
            .filter(|(_, (correct, graded))| **graded && !**correct)
            .map(|(i, _)| i)
            .collect();

        let mut visits = Vec::with_capacity(index.group_count());
        for (descriptor_index, grading) in gradings.iter().enumerate() {
            let needs_retake = index
                .group_span(descriptor_index)
                .is_some_and(|mut span| span.any(|flat| retake_set.contains(&flat)));
            let mode = match grading {
                Grading::FreeText => VisitMode::Draft,
                Grading::Objective if needs_retake => VisitMode::Retake,
                Grading::Objective => VisitMode::Review,
            };
            if mode == VisitMode::Review && options.skip_correct_groups {
                continue;
            }
            visits.push(Visit {
                descriptor_index,
                mode,
            });
        }

        tracing::info!(
            section = index.config().section.as_str(),
            total_items = index.total_items(),
            retake_items = retake_set.len(),
            visits = visits.len(),
            "starting retake"
        );

        let mut orchestrator = Self {
            index,
            first,
            first_outcomes,
            graded,
            retake_set,
            visits,
            cursor: 0,
            state: RetakeState::Done,
            answers: RetakeAnswerRecord::default(),
            instances: InstanceCache::default(),
            answer_cache: AnswerCache::default(),
            active: None,
            policy: options.policy,
        };
        if !orchestrator.visits.is_empty() {
            orchestrator.load(registry);
        }
        Ok(orchestrator)
    }

    pub fn state(&self) -> RetakeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == RetakeState::Done
    }

    pub fn total_items(&self) -> usize {
        self.index.total_items()
    }

    pub fn retake_set(&self) -> &BTreeSet<usize> {
        &self.retake_set
    }

    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    /// Flat index at which each visit starts.
    pub fn visit_starts(&self) -> Vec<usize> {
        self.visits
            .iter()
            .filter_map(|v| self.index.group_start(v.descriptor_index))
            .collect()
    }

    pub fn first_outcomes(&self) -> &[bool] {
        &self.first_outcomes
    }

    pub fn ungraded_items(&self) -> Vec<usize> {
        self.graded
            .iter()
            .enumerate()
            .filter(|(_, graded)| !**graded)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn answers(&self) -> &RetakeAnswerRecord {
        &self.answers
    }

    pub fn active_handle(&self) -> Option<HandleId> {
        self.active.map(|a| a.handle)
    }

    pub fn current_visit(&self) -> Option<Visit> {
        self.visits.get(self.cursor).copied()
    }

    pub fn current_group(&self) -> Option<&GroupDescriptor> {
        self.current_visit()
            .and_then(|v| self.index.descriptor(v.descriptor_index))
    }

    pub fn cached_instances(&self) -> usize {
        self.instances.len()
    }

    /// Flat index of the current visit, or the total once every group is done.
    pub fn position(&self) -> usize {
        self.current_visit()
            .and_then(|v| self.index.group_start(v.descriptor_index))
            .unwrap_or_else(|| self.index.total_items())
    }

    /// Routes learner input to the active group only.
    pub fn input(
        &mut self,
        registry: &mut CollaboratorRegistry,
        offset: usize,
        answer: Answer,
    ) -> Result<(), EngineError> {
        let active = match (self.state, self.active) {
            (RetakeState::AtItem(_), Some(active)) => active,
            _ => return Err(EngineError::NoActiveGroup),
        };
        let group = self.group(active.descriptor_index)?;
        registry
            .get_mut(&group.group_type)?
            .input(active.handle, offset, answer);
        Ok(())
    }

    pub fn advance(&mut self, registry: &mut CollaboratorRegistry) -> Result<Step, EngineError> {
        if !matches!(self.state, RetakeState::AtItem(_)) {
            return Ok(Step::Ignored);
        }
        self.commit(registry)?;
        self.active = None;
        self.cursor += 1;
        if self.cursor >= self.visits.len() {
            self.state = RetakeState::Done;
            tracing::info!(answered = self.answers.len(), "retake walk complete");
            return Ok(Step::Completed);
        }
        Ok(self.load(registry))
    }

    /// Advances only if still at `flat_index`, so a repeated "next" for an
    /// already committed item is dropped.
    pub fn advance_from(
        &mut self,
        registry: &mut CollaboratorRegistry,
        flat_index: usize,
    ) -> Result<Step, EngineError> {
        if self.state != RetakeState::AtItem(flat_index) {
            tracing::debug!(flat_index, state = ?self.state, "stale advance ignored");
            return Ok(Step::Ignored);
        }
        self.advance(registry)
    }

    /// Steps back one visit. Nothing is graded; the current group's answers
    /// are kept in the answer cache.
    pub fn retreat(&mut self, registry: &mut CollaboratorRegistry) -> Result<Step, EngineError> {
        if self.cursor == 0 {
            return Ok(Step::Ignored);
        }
        match self.state {
            RetakeState::AtItem(_) => {
                self.stash(registry)?;
            }
            RetakeState::LoadFailed { .. } => {}
            RetakeState::Loading(_) | RetakeState::Done => return Ok(Step::Ignored),
        }
        self.active = None;
        self.cursor -= 1;
        Ok(self.load(registry))
    }

    pub fn retreat_from(
        &mut self,
        registry: &mut CollaboratorRegistry,
        flat_index: usize,
    ) -> Result<Step, EngineError> {
        if self.position() != flat_index {
            tracing::debug!(flat_index, state = ?self.state, "stale retreat ignored");
            return Ok(Step::Ignored);
        }
        self.retreat(registry)
    }

    pub fn retry_load(&mut self, registry: &mut CollaboratorRegistry) -> Step {
        match self.state {
            RetakeState::LoadFailed { .. } => self.load(registry),
            _ => Step::Ignored,
        }
    }

    /// Scores both passes and releases every cached collaborator.
    pub fn finish(
        &mut self,
        registry: &mut CollaboratorRegistry,
    ) -> Result<RetakeOutcome, EngineError> {
        if self.state != RetakeState::Done {
            return Err(EngineError::RetakeIncomplete {
                flat_index: self.position(),
                total: self.total_items(),
            });
        }
        let table = self.index.config().section.band_table();
        let final_outcomes = scoring::merge_outcomes(&self.first_outcomes, &self.answers);
        let first_score = scoring::score_graded(&self.first_outcomes, &self.graded, table);
        let retake_score = scoring::score_graded(&final_outcomes, &self.graded, table);
        let improvement = scoring::improvement(&first_score, &retake_score);
        self.release(registry);

        tracing::info!(
            first = first_score.correct_count,
            retake = retake_score.correct_count,
            total = retake_score.total_items,
            level = retake_score.level,
            "retake scored"
        );

        Ok(RetakeOutcome {
            first_score,
            retake_score,
            improvement,
            first_outcomes: self.first_outcomes.clone(),
            final_outcomes,
            ungraded_items: self.ungraded_items(),
            answers: self.answers.clone(),
        })
    }

    /// Cancels the retake. Answers of the group on screen are dropped; nothing
    /// is scored.
    pub fn abandon(mut self, registry: &mut CollaboratorRegistry) {
        tracing::info!(
            position = self.position(),
            committed = self.answers.len(),
            "retake abandoned"
        );
        self.release(registry);
    }

    fn group(&self, descriptor_index: usize) -> Result<&GroupDescriptor, EngineError> {
        self.index
            .descriptor(descriptor_index)
            .ok_or(EngineError::OffsetOutOfRange {
                descriptor_index,
                offset: 0,
                item_count: 0,
            })
    }

    fn load(&mut self, registry: &mut CollaboratorRegistry) -> Step {
        let Some(visit) = self.current_visit() else {
            self.state = RetakeState::Done;
            return Step::Completed;
        };
        let flat_index = self.position();
        self.state = RetakeState::Loading(flat_index);

        let (group_type, group_id, no_time_limit) = match self.group(visit.descriptor_index) {
            Ok(g) => (g.group_type.clone(), g.group_id.clone(), g.no_time_limit),
            Err(err) => return self.fail_load(flat_index, 0, err),
        };
        let ctx = AttemptContext {
            second_attempt: true,
            no_time_limit: no_time_limit || visit.mode == VisitMode::Draft,
            read_only: visit.mode == VisitMode::Review,
        };
        let collaborator = match registry.get_mut(&group_type) {
            Ok(c) => c,
            Err(err) => return self.fail_load(flat_index, 0, err),
        };

        let policy = self.policy;
        let instances = &mut self.instances;
        let mounted = policy.run(|attempt| {
            let mounted =
                instances.get_or_try_create(&group_type, &group_id, || {
                    collaborator.mount_fresh(&group_id, &ctx)
                });
            let result = match mounted {
                Ok(Mounted::Fresh(handle)) => Ok(handle),
                Ok(Mounted::Reused(handle)) => collaborator
                    .mount_for_reentry(&group_id, handle, &ctx)
                    .inspect_err(|_| {
                        // A handle that cannot be re-entered is rebuilt from scratch.
                        instances.evict(&group_type, &group_id);
                        collaborator.teardown(handle);
                    }),
                Err(err) => Err(err),
            };
            result.inspect_err(|err| {
                tracing::warn!(
                    group_type = %group_type,
                    group_id = %group_id,
                    flat_index,
                    attempt,
                    error = %err,
                    "group load failed"
                );
            })
        });

        match mounted {
            Ok(handle) => {
                let restored = self
                    .answer_cache
                    .restore_answers(&group_type, &group_id)
                    .unwrap_or_else(|| self.seed_answers(visit));
                collaborator.restore_answers(handle, &restored);
                self.active = Some(ActiveGroup {
                    descriptor_index: visit.descriptor_index,
                    handle,
                });
                self.state = RetakeState::AtItem(flat_index);
                tracing::debug!(%group_type, %group_id, flat_index, mode = ?visit.mode, "group mounted");
                Step::Moved(flat_index)
            }
            Err((err, attempts)) => self.fail_load(
                flat_index,
                attempts,
                EngineError::LoadFailed {
                    group_type,
                    group_id,
                    flat_index,
                    attempts,
                    reason: err.to_string(),
                },
            ),
        }
    }

    fn fail_load(&mut self, flat_index: usize, attempts: u32, err: EngineError) -> Step {
        tracing::error!(flat_index, attempts, error = %err, "group unavailable; waiting for manual retry");
        self.active = None;
        self.state = RetakeState::LoadFailed {
            flat_index,
            attempts,
        };
        Step::LoadFailed(err)
    }

    /// Initial selections for a group with nothing cached: locked first-attempt
    /// answers for correct items, the first draft for free-text groups.
    fn seed_answers(&self, visit: Visit) -> Vec<Option<Answer>> {
        let Some(span) = self.index.group_span(visit.descriptor_index) else {
            return Vec::new();
        };
        span.map(|flat| match self.index.first_attempt_outcome(&self.first, flat) {
            Ok(OutcomeLookup::Found(o)) if o.is_correct || visit.mode == VisitMode::Draft => {
                o.user_answer.clone()
            }
            _ => None,
        })
        .collect()
    }

    /// Reads the active group's answers into the answer cache.
    fn stash(
        &mut self,
        registry: &mut CollaboratorRegistry,
    ) -> Result<Option<(Visit, Vec<Option<Answer>>)>, EngineError> {
        let (Some(active), Some(visit)) = (self.active, self.current_visit()) else {
            return Ok(None);
        };
        let group = self.group(active.descriptor_index)?;
        let (group_type, group_id, count) =
            (group.group_type.clone(), group.group_id.clone(), group.item_count);
        let collaborator = registry.get_mut(&group_type)?;
        let captured: Vec<Option<Answer>> = (0..count)
            .map(|offset| collaborator.capture_answer(active.handle, offset))
            .collect();
        self.answer_cache
            .save_answers(&group_type, &group_id, captured.clone());
        Ok(Some((visit, captured)))
    }

    /// Stashes and grades the active group into the retake answer record.
    /// Batch groups write every one of their flat indices.
    fn commit(&mut self, registry: &mut CollaboratorRegistry) -> Result<(), EngineError> {
        let Some((visit, captured)) = self.stash(registry)? else {
            return Ok(());
        };
        if visit.mode == VisitMode::Review {
            return Ok(());
        }
        let group = self.group(visit.descriptor_index)?;
        let collaborator = registry.get(&group.group_type)?;
        let mut entries = Vec::with_capacity(captured.len());
        for (offset, user_answer) in captured.into_iter().enumerate() {
            let flat = self.index.flat_index(visit.descriptor_index, offset)?;
            let entry = match self.index.first_attempt_outcome(&self.first, flat)? {
                OutcomeLookup::Degraded { .. } => RetakeAnswer {
                    user_answer,
                    is_correct: false,
                },
                OutcomeLookup::Found(o) if visit.mode == VisitMode::Draft => RetakeAnswer {
                    user_answer,
                    is_correct: o.is_correct,
                },
                OutcomeLookup::Found(o) if o.is_correct => RetakeAnswer {
                    user_answer: o.user_answer.clone(),
                    is_correct: true,
                },
                OutcomeLookup::Found(o) => {
                    let is_correct = user_answer
                        .as_ref()
                        .is_some_and(|a| collaborator.grade(a, &o.correct_answer));
                    RetakeAnswer {
                        user_answer,
                        is_correct,
                    }
                }
            };
            entries.push((flat, entry));
        }
        for (flat, entry) in entries {
            self.answers.insert(flat, entry);
        }
        Ok(())
    }

    fn release(&mut self, registry: &mut CollaboratorRegistry) {
        self.active = None;
        for (key, handle) in self.instances.drain() {
            match registry.get_mut(&key.group_type) {
                Ok(collaborator) => collaborator.teardown(handle),
                Err(err) => tracing::warn!(error = %err, "cannot tear down cached group"),
            }
        }
        self.answer_cache.clear();
    }
}
