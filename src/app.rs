use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

use anyhow::Result;

use crate::collab::{CollaboratorRegistry, Grading, InMemoryGroups, SpeedCheck};
use crate::config::Config;
use crate::engine::error::EngineError;
use crate::engine::scoring::Score;
use crate::event::Command;
use crate::module::config::ModuleConfig;
use crate::module::file::ModuleFile;
use crate::session::flow::{Family, Phase, Session};
use crate::session::retake::{RetakeOptions, RetakeState, Step, VisitMode};
use crate::session::retry::RetryPolicy;
use crate::store::json_store::JsonStore;
use crate::store::schema::ExplainRecord;

/// One collaborator per group type, each holding the answer keys of its groups.
pub fn build_registry(file: &ModuleFile) -> CollaboratorRegistry {
    let mut by_type: BTreeMap<&str, InMemoryGroups> = BTreeMap::new();
    for group in &file.groups {
        let group_type = group.descriptor.group_type.as_str();
        let grading = if file.is_free_text(group_type) {
            Grading::FreeText
        } else {
            Grading::Objective
        };
        by_type
            .entry(group_type)
            .or_insert_with(|| InMemoryGroups::new(grading))
            .add_group(&group.descriptor.group_id, group.answer_key.clone());
    }
    let mut registry = CollaboratorRegistry::new();
    for (group_type, groups) in by_type {
        registry.register(group_type, Rc::new(RefCell::new(groups)));
    }
    registry
}

pub struct App {
    pub session: Session,
    pub should_quit: bool,
    module: ModuleConfig,
    explain: JsonStore,
}

impl App {
    pub fn new(config: &Config, file: &ModuleFile) -> Result<Self> {
        let module = file.config()?;
        let registry = build_registry(file);
        let sink = JsonStore::with_base_dir(config.data_path())?;
        let explain = JsonStore::with_base_dir(config.data_path())?;
        let options = RetakeOptions {
            policy: RetryPolicy::from_config(config),
            skip_correct_groups: config.skip_correct_groups,
        };
        let session = Session::new(registry, options)
            .with_sink(sink)
            .with_fraud_check(SpeedCheck {
                min_secs_per_item: config.min_secs_per_item,
            });
        Ok(Self {
            session,
            should_quit: false,
            module,
            explain,
        })
    }

    pub fn start(&mut self) -> Result<String> {
        let family = self.session.begin(self.module.clone())?;
        let mut out = format!(
            "{} module, {} items in {} groups ({})",
            self.module.section.as_str(),
            self.module.total_items,
            self.module.groups.len(),
            family_label(family)
        );
        for (i, group) in self.module.groups.iter().enumerate() {
            let _ = write!(
                out,
                "\n  [{i}] {} {} ({} items{})",
                group.group_type,
                group.group_id,
                group.item_count,
                if group.no_time_limit { ", untimed" } else { "" }
            );
        }
        out.push_str("\n'open <n>' to start a group");
        Ok(out)
    }

    pub fn handle(&mut self, command: Command) -> String {
        match self.dispatch(command) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, phase = ?self.session.phase(), "command refused");
                format!("error: {err}")
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<String, EngineError> {
        match command {
            Command::Open(index) => {
                self.session.mount(index)?;
                let group = &self.module.groups[index];
                let ctx = self.session.attempt_context(index);
                Ok(format!(
                    "group {index}: {} {} ({} items){}{}",
                    group.group_type,
                    group.group_id,
                    group.item_count,
                    if ctx.second_attempt { ", second attempt" } else { "" },
                    if ctx.no_time_limit { ", untimed" } else { "" }
                ))
            }
            Command::Answer { offset, answer } => {
                self.session.input(offset, answer)?;
                Ok(format!("item {offset} answered"))
            }
            Command::Submit => {
                self.session.complete_group()?;
                let pending = self.session.pending_groups();
                if pending.is_empty() {
                    Ok("all groups done; 'next' to continue".to_string())
                } else {
                    Ok(format!("group submitted; still open: {pending:?}"))
                }
            }
            Command::Next(item) => match (self.session.phase(), item) {
                (Phase::Retake, Some(item)) => {
                    let step = self.session.retake_advance_from(item.saturating_sub(1))?;
                    Ok(self.describe_step(step))
                }
                (Phase::Retake, None) => {
                    let step = self.session.retake_advance()?;
                    Ok(self.describe_step(step))
                }
                // A numbered "next" belongs to a retake item that is gone.
                (_, Some(_)) => Ok(self.describe_step(Step::Ignored)),
                (Phase::Idle, None) => {
                    self.should_quit = true;
                    Ok("module finished".to_string())
                }
                (_, None) => {
                    let phase = self.session.advance_phase()?;
                    if phase == Phase::Idle {
                        self.should_quit = true;
                    }
                    Ok(self.describe_phase(phase))
                }
            },
            Command::Back(item) => {
                let step = match item {
                    Some(item) => self.session.retake_retreat_from(item.saturating_sub(1))?,
                    None => self.session.retake_retreat()?,
                };
                Ok(self.describe_step(step))
            }
            Command::Retry => {
                let step = self.session.retake_retry()?;
                Ok(self.describe_step(step))
            }
            Command::Status => Ok(self.status()),
            Command::Cancel | Command::Quit => {
                self.session.cancel();
                self.should_quit = true;
                Ok("bye".to_string())
            }
        }
    }

    pub fn status(&self) -> String {
        let phase = self.session.phase();
        let mut out = format!("phase: {phase:?}");
        match phase {
            Phase::FirstAttempt | Phase::SecondAttempt => {
                if let Some(index) = self.session.active_group() {
                    let _ = write!(out, ", group {index} open");
                }
                let _ = write!(out, ", waiting on {:?}", self.session.pending_groups());
            }
            Phase::Retake => {
                if let Some(retake) = self.session.retake() {
                    let _ = write!(
                        out,
                        ", item {} of {}, {} answers committed",
                        retake.position() + 1,
                        retake.total_items(),
                        retake.answers().len()
                    );
                    if let RetakeState::LoadFailed { attempts, .. } = retake.state() {
                        let _ = write!(out, ", load failed after {attempts} attempts");
                    }
                }
            }
            _ => {}
        }
        let elapsed = self.session.elapsed_secs();
        if elapsed > 0.0 {
            let _ = write!(out, ", {elapsed:.0}s elapsed");
        }
        out
    }

    fn describe_step(&self, step: Step) -> String {
        match step {
            Step::Moved(flat_index) => {
                let Some(retake) = self.session.retake() else {
                    return format!("item {}", flat_index + 1);
                };
                let (Some(group), Some(visit)) = (retake.current_group(), retake.current_visit())
                else {
                    return format!("item {}", flat_index + 1);
                };
                let mode = match visit.mode {
                    VisitMode::Retake => "retake",
                    VisitMode::Draft => "untimed draft",
                    VisitMode::Review => "review only",
                };
                let size = if group.is_batch() {
                    format!("batch of {}", group.item_count)
                } else {
                    "1 item".to_string()
                };
                format!(
                    "item {}: {} {} ({size}, {mode})",
                    flat_index + 1,
                    group.group_type,
                    group.group_id
                )
            }
            Step::Completed => "retake complete; 'next' for results".to_string(),
            Step::Ignored => "nothing to do".to_string(),
            Step::LoadFailed(err) => format!("{err}; 'retry' or 'back'"),
        }
    }

    fn describe_phase(&self, phase: Phase) -> String {
        match phase {
            Phase::FirstResult => match self.session.first_score() {
                Some(score) => {
                    let mut out = format!("first attempt: {}", format_score(score));
                    if let Some(flag) = self.session.fraud_flag() {
                        let _ = write!(out, "\nflagged: {}", flag.reason);
                    }
                    out.push_str("\n'next' to start the retake");
                    out
                }
                None => "first attempt closed".to_string(),
            },
            Phase::Retake => {
                let first = self
                    .session
                    .retake()
                    .map(|r| (r.retake_set().len(), r.state()));
                match first {
                    Some((wrong, RetakeState::AtItem(flat_index))) => format!(
                        "retake: {wrong} items to revisit\n{}",
                        self.describe_step(Step::Moved(flat_index))
                    ),
                    Some((wrong, RetakeState::Done)) => {
                        format!("retake: {wrong} items to revisit; nothing to show, 'next' for results")
                    }
                    Some((_, state)) => format!("retake: {state:?}; 'retry' to load again"),
                    None => "retake".to_string(),
                }
            }
            Phase::RetakeResult => match self.session.retake_outcome() {
                Some(outcome) => format!(
                    "first: {}\nretake: {}\nchange: {:+} correct, {:+}%, {:+.1} level",
                    format_score(&outcome.first_score),
                    format_score(&outcome.retake_score),
                    outcome.improvement.score_diff,
                    outcome.improvement.percent_diff,
                    outcome.improvement.level_diff
                ),
                None => "retake closed".to_string(),
            },
            Phase::SecondAttempt => {
                "second attempt: open each group again with 'open <n>'".to_string()
            }
            Phase::Explain => {
                let record = self
                    .explain
                    .take_explain()
                    .or_else(|| self.session.last_record().cloned());
                match record {
                    Some(record) => format_explain(&record),
                    None => "no result to explain".to_string(),
                }
            }
            Phase::FirstAttempt | Phase::Idle => "module finished".to_string(),
        }
    }
}

fn family_label(family: Family) -> &'static str {
    match family {
        Family::Standard => "attempt and retake",
        Family::PairedDraft => "draft and revision",
        Family::PairedResponse => "two responses",
    }
}

fn format_score(score: &Score) -> String {
    format!(
        "{}/{} ({}%), level {:.1}",
        score.correct_count, score.total_items, score.percentage, score.level
    )
}

fn mark(correct: bool) -> &'static str {
    if correct { "ok" } else { "x" }
}

pub fn format_explain(record: &ExplainRecord) -> String {
    let mut out = format!(
        "{} module explained ({})",
        record.section.as_str(),
        family_label(record.family)
    );
    if let Some(score) = &record.first_score {
        let _ = write!(out, "\nfirst:  {}", format_score(score));
    }
    if let Some(score) = &record.retake_score {
        let _ = write!(out, "\nretake: {}", format_score(score));
    }
    let outcomes = record
        .first_attempt
        .groups
        .iter()
        .flat_map(|g| g.outcomes.iter());
    for (flat_index, outcome) in outcomes.enumerate() {
        let (first_mark, final_mark) = if record.ungraded_items.contains(&flat_index) {
            ("--", "--")
        } else {
            (
                mark(outcome.is_correct),
                record
                    .final_outcomes
                    .get(flat_index)
                    .copied()
                    .map_or("-", mark),
            )
        };
        let _ = write!(
            out,
            "\n  {:>3}  first {:<2} retake {:<2} answer {:?}",
            flat_index + 1,
            first_mark,
            final_mark,
            outcome.correct_answer
        );
        if let Some(explanation) = &outcome.explanation {
            let _ = write!(out, "  {explanation}");
        }
    }
    for (label, payload) in [
        ("first", &record.first_response),
        ("second", &record.second_response),
    ] {
        if let Some(payload) = payload {
            let answered: usize = payload
                .groups
                .iter()
                .map(|g| g.answers.iter().flatten().count())
                .sum();
            let _ = write!(out, "\n{label} response: {answered} answers");
        }
    }
    if let Some(flag) = &record.fraud_flag {
        let _ = write!(out, "\nflagged: {}", flag.reason);
    }
    out
}
