use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::collab::{
    AttemptContext, AttemptSummary, CollaboratorRegistry, FraudCheck, FraudFlag, Grading,
    HandleId, SessionObserver,
};
use crate::engine::error::EngineError;
use crate::engine::index::ItemIndex;
use crate::engine::scoring::{self, Score};
use crate::module::config::{ModuleConfig, Section};
use crate::module::result::{
    Answer, FirstAttemptResult, GroupResponse, GroupResult, ResponsePayload,
};
use crate::session::retake::{RetakeOptions, RetakeOrchestrator, RetakeOutcome, Step};
use crate::store::ResultSink;
use crate::store::schema::{EXPLAIN_SCHEMA_VERSION, ExplainRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    FirstAttempt,
    FirstResult,
    Retake,
    RetakeResult,
    SecondAttempt,
    Explain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    /// Objectively graded: scored first attempt, retake of wrong items.
    Standard,
    /// Free-text drafts: untimed second draft, no intermediate result.
    PairedDraft,
    /// Spoken answers: the same prompt answered twice.
    PairedResponse,
}

const STANDARD_PHASES: &[Phase] = &[
    Phase::FirstAttempt,
    Phase::FirstResult,
    Phase::Retake,
    Phase::RetakeResult,
    Phase::Explain,
];

const PAIRED_PHASES: &[Phase] = &[Phase::FirstAttempt, Phase::SecondAttempt, Phase::Explain];

impl Family {
    /// Writing modules made only of free-text groups are paired drafts; a
    /// writing module with any objectively graded group follows the standard
    /// flow and its free-text groups become untimed drafts during the retake.
    pub fn select(section: Section, gradings: &[Grading]) -> Family {
        match section {
            Section::Reading | Section::Listening => Family::Standard,
            Section::Speaking => Family::PairedResponse,
            Section::Writing if gradings.iter().all(|g| *g == Grading::FreeText) => {
                Family::PairedDraft
            }
            Section::Writing => Family::Standard,
        }
    }

    /// Phases after `Idle`, in order. The last one returns to `Idle`.
    pub fn phases(self) -> &'static [Phase] {
        match self {
            Family::Standard => STANDARD_PHASES,
            Family::PairedDraft | Family::PairedResponse => PAIRED_PHASES,
        }
    }

    pub fn next(self, phase: Phase) -> Phase {
        let phases = self.phases();
        match phase {
            Phase::Idle => phases[0],
            _ => phases
                .iter()
                .position(|p| *p == phase)
                .and_then(|i| phases.get(i + 1))
                .copied()
                .unwrap_or(Phase::Idle),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ActiveHandle {
    descriptor_index: usize,
    handle: HandleId,
}

/// Drives one module through its phases and owns everything the attempt
/// produces until it returns to `Idle`.
pub struct Session {
    registry: CollaboratorRegistry,
    options: RetakeOptions,
    fraud_check: Option<Box<dyn FraudCheck>>,
    observer: Option<Box<dyn SessionObserver>>,
    sink: Option<Box<dyn ResultSink>>,
    phase: Phase,
    family: Family,
    module: Option<ModuleConfig>,
    first_groups: Vec<Option<GroupResult>>,
    /// Per flat item: false for free-text items, which are never scored.
    graded: Vec<bool>,
    first_attempt: Option<FirstAttemptResult>,
    first_score: Option<Score>,
    retake: Option<RetakeOrchestrator>,
    retake_outcome: Option<RetakeOutcome>,
    first_response: ResponsePayload,
    second_response: ResponsePayload,
    active: Option<ActiveHandle>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    fraud_flag: Option<FraudFlag>,
    last_record: Option<ExplainRecord>,
}

impl Session {
    pub fn new(registry: CollaboratorRegistry, options: RetakeOptions) -> Self {
        Self {
            registry,
            options,
            fraud_check: None,
            observer: None,
            sink: None,
            phase: Phase::Idle,
            family: Family::Standard,
            module: None,
            first_groups: Vec::new(),
            graded: Vec::new(),
            first_attempt: None,
            first_score: None,
            retake: None,
            retake_outcome: None,
            first_response: ResponsePayload::default(),
            second_response: ResponsePayload::default(),
            active: None,
            started_at: None,
            finished_at: None,
            fraud_flag: None,
            last_record: None,
        }
    }

    pub fn with_fraud_check(mut self, check: impl FraudCheck + 'static) -> Self {
        self.fraud_check = Some(Box::new(check));
        self
    }

    pub fn with_observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn module(&self) -> Option<&ModuleConfig> {
        self.module.as_ref()
    }

    pub fn registry(&self) -> &CollaboratorRegistry {
        &self.registry
    }

    pub fn first_attempt(&self) -> Option<&FirstAttemptResult> {
        self.first_attempt.as_ref()
    }

    pub fn first_score(&self) -> Option<&Score> {
        self.first_score.as_ref()
    }

    pub fn retake(&self) -> Option<&RetakeOrchestrator> {
        self.retake.as_ref()
    }

    pub fn retake_outcome(&self) -> Option<&RetakeOutcome> {
        self.retake_outcome.as_ref()
    }

    pub fn fraud_flag(&self) -> Option<&FraudFlag> {
        self.fraud_flag.as_ref()
    }

    /// Record handed to the explain layer on the last entry into `Explain`.
    pub fn last_record(&self) -> Option<&ExplainRecord> {
        self.last_record.as_ref()
    }

    pub fn active_handle(&self) -> Option<HandleId> {
        match self.phase {
            Phase::Retake => self.retake.as_ref().and_then(|r| r.active_handle()),
            _ => self.active.map(|a| a.handle),
        }
    }

    pub fn active_group(&self) -> Option<usize> {
        self.active.map(|a| a.descriptor_index)
    }

    pub fn elapsed_secs(&self) -> f64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Flat indices of free-text items in a standard module.
    pub fn ungraded_items(&self) -> Vec<usize> {
        if self.family != Family::Standard {
            return Vec::new();
        }
        self.graded
            .iter()
            .enumerate()
            .filter(|(_, graded)| !**graded)
            .map(|(i, _)| i)
            .collect()
    }

    /// Groups of the first attempt still waiting for a result or response.
    pub fn pending_groups(&self) -> Vec<usize> {
        let Some(module) = &self.module else {
            return Vec::new();
        };
        let payload = match self.phase {
            Phase::SecondAttempt => &self.second_response,
            _ => &self.first_response,
        };
        module
            .groups
            .iter()
            .enumerate()
            .filter(|(i, g)| match self.family {
                Family::Standard => self.first_groups.get(*i).is_none_or(|r| r.is_none()),
                Family::PairedDraft | Family::PairedResponse => !payload.has_group(&g.group_id),
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn begin(&mut self, module: ModuleConfig) -> Result<Family, EngineError> {
        if self.phase != Phase::Idle {
            return Err(EngineError::InvalidTransition {
                phase: self.phase,
                action: "begin a module",
            });
        }
        module.validate()?;
        let gradings = self.registry.resolve(&module)?;
        self.family = Family::select(module.section, &gradings);
        self.graded = ItemIndex::new(module.clone())?.graded_items(&gradings);
        self.first_groups = vec![None; module.groups.len()];
        self.started_at = Some(Instant::now());
        self.finished_at = None;
        tracing::info!(
            section = module.section.as_str(),
            family = ?self.family,
            groups = module.groups.len(),
            total_items = module.total_items,
            "module started"
        );
        self.module = Some(module);
        self.phase = Phase::FirstAttempt;
        Ok(self.family)
    }

    pub fn attempt_context(&self, descriptor_index: usize) -> AttemptContext {
        let no_time_limit = self
            .module
            .as_ref()
            .and_then(|m| m.groups.get(descriptor_index))
            .is_some_and(|g| g.no_time_limit);
        match self.phase {
            Phase::SecondAttempt => AttemptContext {
                second_attempt: true,
                no_time_limit: no_time_limit || self.family == Family::PairedDraft,
                read_only: false,
            },
            _ => AttemptContext {
                second_attempt: false,
                no_time_limit,
                read_only: false,
            },
        }
    }

    /// Mounts a group for the first or second attempt. The previous group is
    /// torn down before the new one is requested.
    pub fn mount(&mut self, descriptor_index: usize) -> Result<HandleId, EngineError> {
        if !matches!(self.phase, Phase::FirstAttempt | Phase::SecondAttempt) {
            return Err(EngineError::InvalidTransition {
                phase: self.phase,
                action: "mount a group",
            });
        }
        self.release_active();
        let (group_type, group_id) = {
            let module = self.module.as_ref().ok_or(EngineError::NoActiveGroup)?;
            let group = module.groups.get(descriptor_index).ok_or(
                EngineError::OffsetOutOfRange {
                    descriptor_index,
                    offset: 0,
                    item_count: 0,
                },
            )?;
            (group.group_type.clone(), group.group_id.clone())
        };
        let ctx = self.attempt_context(descriptor_index);
        let flat_index = self
            .module
            .as_ref()
            .map_or(0, |m| m.group_start(descriptor_index));
        let policy = self.options.policy;
        let collaborator = self.registry.get_mut(&group_type)?;
        let handle = policy
            .run(|attempt| {
                collaborator.mount_fresh(&group_id, &ctx).inspect_err(|err| {
                    tracing::warn!(%group_type, %group_id, attempt, error = %err, "group load failed");
                })
            })
            .map_err(|(err, attempts)| EngineError::LoadFailed {
                group_type: group_type.clone(),
                group_id: group_id.clone(),
                flat_index,
                attempts,
                reason: err.to_string(),
            })?;

        // A revised draft starts from the first draft; a spoken answer starts blank.
        if self.phase == Phase::SecondAttempt
            && self.family == Family::PairedDraft
            && let Some(previous) = self.first_response.groups.iter().find(|g| g.group_id == group_id)
        {
            collaborator.restore_answers(handle, &previous.answers);
        }

        self.active = Some(ActiveHandle {
            descriptor_index,
            handle,
        });
        Ok(handle)
    }

    /// Learner input, delivered only to the group currently on screen.
    pub fn input(&mut self, offset: usize, answer: Answer) -> Result<(), EngineError> {
        if self.phase == Phase::Retake {
            let retake = self.retake.as_mut().ok_or(EngineError::NoActiveGroup)?;
            return retake.input(&mut self.registry, offset, answer);
        }
        let active = self.active.ok_or(EngineError::NoActiveGroup)?;
        let group_type = self.group_type(active.descriptor_index)?;
        self.registry
            .get_mut(&group_type)?
            .input(active.handle, offset, answer);
        Ok(())
    }

    /// Finishes the group on screen: a scored result for standard modules, a
    /// captured response for paired ones.
    pub fn complete_group(&mut self) -> Result<(), EngineError> {
        if !matches!(self.phase, Phase::FirstAttempt | Phase::SecondAttempt) {
            return Err(EngineError::InvalidTransition {
                phase: self.phase,
                action: "complete a group",
            });
        }
        let active = self.active.ok_or(EngineError::NoActiveGroup)?;
        let module = self.module.as_ref().ok_or(EngineError::NoActiveGroup)?;
        let group = module.groups[active.descriptor_index].clone();
        let collaborator = self.registry.get_mut(&group.group_type)?;

        match self.family {
            Family::Standard => {
                let result =
                    collaborator.finish_group(active.handle, &group.group_id, group.item_count);
                self.release_active();
                self.record_group_result(active.descriptor_index, result)?;
            }
            Family::PairedDraft | Family::PairedResponse => {
                let answers = (0..group.item_count)
                    .map(|offset| collaborator.capture_answer(active.handle, offset))
                    .collect();
                let response = GroupResponse {
                    group_id: group.group_id.clone(),
                    answers,
                };
                self.release_active();
                match self.phase {
                    Phase::SecondAttempt => self.second_response.upsert(response),
                    _ => self.first_response.upsert(response),
                }
                tracing::debug!(group_id = %group.group_id, phase = ?self.phase, "response captured");
            }
        }
        Ok(())
    }

    /// Stores a first-attempt group result reported by a collaborator.
    pub fn record_group_result(
        &mut self,
        descriptor_index: usize,
        result: GroupResult,
    ) -> Result<(), EngineError> {
        if self.phase != Phase::FirstAttempt || self.family != Family::Standard {
            return Err(EngineError::InvalidTransition {
                phase: self.phase,
                action: "record a group result",
            });
        }
        let module = self.module.as_ref().ok_or(EngineError::NoActiveGroup)?;
        let group = module
            .groups
            .get(descriptor_index)
            .ok_or(EngineError::OffsetOutOfRange {
                descriptor_index,
                offset: 0,
                item_count: 0,
            })?;
        if group.group_id != result.group_id {
            return Err(EngineError::GroupMismatch {
                descriptor_index,
                group_type: group.group_type.clone(),
                flat_index: module.group_start(descriptor_index),
                expected: group.group_id.clone(),
                actual: result.group_id,
            });
        }
        if result.outcomes.len() != group.item_count {
            tracing::warn!(
                group_type = %group.group_type,
                group_id = %group.group_id,
                expected = group.item_count,
                actual = result.outcomes.len(),
                "group result size differs from descriptor"
            );
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_group_complete(&result);
        }
        self.first_groups[descriptor_index] = Some(result);
        Ok(())
    }

    pub fn retake_advance(&mut self) -> Result<Step, EngineError> {
        let (retake, registry) = self.retake_parts()?;
        retake.advance(registry)
    }

    pub fn retake_advance_from(&mut self, flat_index: usize) -> Result<Step, EngineError> {
        let (retake, registry) = self.retake_parts()?;
        retake.advance_from(registry, flat_index)
    }

    pub fn retake_retreat(&mut self) -> Result<Step, EngineError> {
        let (retake, registry) = self.retake_parts()?;
        retake.retreat(registry)
    }

    pub fn retake_retreat_from(&mut self, flat_index: usize) -> Result<Step, EngineError> {
        let (retake, registry) = self.retake_parts()?;
        retake.retreat_from(registry, flat_index)
    }

    pub fn retake_retry(&mut self) -> Result<Step, EngineError> {
        let (retake, registry) = self.retake_parts()?;
        Ok(retake.retry_load(registry))
    }

    /// Moves to the next phase of the module's family. A failed guard leaves
    /// the phase unchanged.
    pub fn advance_phase(&mut self) -> Result<Phase, EngineError> {
        match self.phase {
            Phase::Idle => {
                return Err(EngineError::InvalidTransition {
                    phase: Phase::Idle,
                    action: "advance",
                });
            }
            Phase::FirstAttempt => self.close_first_attempt()?,
            Phase::FirstResult => self.enter_retake()?,
            Phase::Retake => self.close_retake()?,
            Phase::SecondAttempt => self.close_second_attempt()?,
            Phase::RetakeResult => {}
            Phase::Explain => {
                self.reset();
                tracing::info!("module finished");
                return Ok(Phase::Idle);
            }
        }
        let next = self.family.next(self.phase);
        if next == Phase::Explain {
            self.enter_explain();
        }
        tracing::debug!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
        Ok(next)
    }

    /// Abandons the module from any phase. Committed results are discarded
    /// with the rest of the session.
    pub fn cancel(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }
        tracing::info!(phase = ?self.phase, "module cancelled");
        self.reset();
    }

    fn retake_parts(
        &mut self,
    ) -> Result<(&mut RetakeOrchestrator, &mut CollaboratorRegistry), EngineError> {
        if self.phase != Phase::Retake {
            return Err(EngineError::InvalidTransition {
                phase: self.phase,
                action: "navigate the retake",
            });
        }
        let retake = self.retake.as_mut().ok_or(EngineError::NoActiveGroup)?;
        Ok((retake, &mut self.registry))
    }

    fn group_type(&self, descriptor_index: usize) -> Result<String, EngineError> {
        self.module
            .as_ref()
            .and_then(|m| m.groups.get(descriptor_index))
            .map(|g| g.group_type.clone())
            .ok_or(EngineError::NoActiveGroup)
    }

    fn release_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        match self.group_type(active.descriptor_index) {
            Ok(group_type) => match self.registry.get_mut(&group_type) {
                Ok(collaborator) => collaborator.teardown(active.handle),
                Err(err) => tracing::warn!(error = %err, "cannot tear down active group"),
            },
            Err(err) => tracing::warn!(error = %err, "active group not in module"),
        }
    }

    fn run_fraud_check(&mut self) {
        let (Some(check), Some(module)) = (&self.fraud_check, &self.module) else {
            return;
        };
        let summary = AttemptSummary {
            section: module.section,
            total_items: module.total_items,
            elapsed_secs: self.elapsed_secs(),
        };
        if let Some(flag) = check.inspect(&summary) {
            tracing::warn!(reason = %flag.reason, "attempt flagged");
            self.fraud_flag = Some(flag);
        }
    }

    fn close_first_attempt(&mut self) -> Result<(), EngineError> {
        let pending = self.pending_groups();
        let expected = self.module.as_ref().map_or(0, |m| m.groups.len());
        if !pending.is_empty() {
            return Err(EngineError::FirstAttemptIncomplete {
                recorded: expected - pending.len(),
                expected,
            });
        }
        self.release_active();
        self.finished_at = Some(Instant::now());
        self.run_fraud_check();

        if self.family == Family::Standard {
            let module = self.module.clone().ok_or(EngineError::NoActiveGroup)?;
            let first = FirstAttemptResult {
                groups: self.first_groups.iter().flatten().cloned().collect(),
            };
            let index = ItemIndex::new(module)?;
            let outcomes = index.first_attempt_sequence(&first)?;
            let table = index.config().section.band_table();
            let score = scoring::score_graded(&outcomes, &self.graded, table);
            tracing::info!(
                correct = score.correct_count,
                total = score.total_items,
                level = score.level,
                "first attempt scored"
            );
            self.first_score = Some(score);
            self.first_attempt = Some(first);
        }
        Ok(())
    }

    fn close_second_attempt(&mut self) -> Result<(), EngineError> {
        let pending = self.pending_groups();
        if !pending.is_empty() {
            let expected = self.module.as_ref().map_or(0, |m| m.groups.len());
            return Err(EngineError::SecondAttemptIncomplete {
                recorded: expected - pending.len(),
                expected,
            });
        }
        self.release_active();
        Ok(())
    }

    fn enter_retake(&mut self) -> Result<(), EngineError> {
        let module = self.module.clone().ok_or(EngineError::NoActiveGroup)?;
        let Some(first) = self.first_attempt.clone() else {
            return Err(module.missing_result(0));
        };
        match RetakeOrchestrator::start(module, first, &mut self.registry, self.options) {
            Ok(retake) => {
                self.retake = Some(retake);
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot enter retake; staying on first result");
                Err(err)
            }
        }
    }

    fn close_retake(&mut self) -> Result<(), EngineError> {
        let retake = self.retake.as_mut().ok_or(EngineError::NoActiveGroup)?;
        let outcome = retake.finish(&mut self.registry)?;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_retake_complete(&outcome.retake_score, &outcome.improvement);
        }
        self.retake = None;
        self.retake_outcome = Some(outcome);
        Ok(())
    }

    fn enter_explain(&mut self) {
        let Some(module) = &self.module else {
            return;
        };
        let paired = self.family != Family::Standard;
        let outcome = self.retake_outcome.as_ref();
        let record = ExplainRecord {
            schema_version: EXPLAIN_SCHEMA_VERSION,
            section: module.section,
            family: self.family,
            total_items: module.total_items,
            first_score: self.first_score.clone(),
            retake_score: outcome.map(|o| o.retake_score.clone()),
            improvement: outcome.map(|o| o.improvement.clone()),
            first_outcomes: outcome.map(|o| o.first_outcomes.clone()).unwrap_or_default(),
            final_outcomes: outcome.map(|o| o.final_outcomes.clone()).unwrap_or_default(),
            ungraded_items: self.ungraded_items(),
            retake_answers: outcome.map(|o| o.answers.clone()).unwrap_or_default(),
            first_attempt: self.first_attempt.clone().unwrap_or_default(),
            first_response: paired.then(|| self.first_response.clone()),
            second_response: paired.then(|| self.second_response.clone()),
            fraud_flag: self.fraud_flag.clone(),
            completed_at: Utc::now(),
        };
        if let Some(sink) = self.sink.as_mut()
            && let Err(err) = sink.hand_off(&record)
        {
            tracing::error!(error = %err, "explain hand-off failed");
        }
        self.last_record = Some(record);
    }

    fn reset(&mut self) {
        self.release_active();
        if let Some(retake) = self.retake.take() {
            retake.abandon(&mut self.registry);
        }
        self.phase = Phase::Idle;
        self.family = Family::Standard;
        self.module = None;
        self.first_groups.clear();
        self.graded.clear();
        self.first_attempt = None;
        self.first_score = None;
        self.retake_outcome = None;
        self.first_response = ResponsePayload::default();
        self.second_response = ResponsePayload::default();
        self.started_at = None;
        self.finished_at = None;
        self.fraud_flag = None;
    }
}
