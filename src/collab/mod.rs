//! Interfaces to the question-group collaborators that render and collect
//! answers for one group type. The engine never looks inside a group; it only
//! mounts, captures, grades and tears down through [`GroupCollaborator`].

pub mod fraud;
pub mod memory;
pub mod registry;

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::scoring::{Improvement, Score};
use crate::module::result::{Answer, GroupResult};

pub use fraud::{AttemptSummary, FraudCheck, FraudFlag, SpeedCheck};
pub use memory::InMemoryGroups;
pub use registry::CollaboratorRegistry;

/// Opaque handle to a mounted group, issued by its collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grading {
    Objective,
    FreeText,
}

/// Per-call flags handed to every collaborator invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptContext {
    pub second_attempt: bool,
    pub no_time_limit: bool,
    pub read_only: bool,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LoadError {
    #[error("group '{group_id}' not found in question bank")]
    NotFound { group_id: String },
    #[error("group data unavailable: {0}")]
    Unavailable(String),
    #[error("handle {0:?} is not mounted")]
    StaleHandle(HandleId),
}

pub trait GroupCollaborator {
    fn grading(&self) -> Grading {
        Grading::Objective
    }

    fn mount_fresh(&mut self, group_id: &str, ctx: &AttemptContext) -> Result<HandleId, LoadError>;

    /// Re-displays an already mounted group without discarding its live state.
    fn mount_for_reentry(
        &mut self,
        group_id: &str,
        handle: HandleId,
        ctx: &AttemptContext,
    ) -> Result<HandleId, LoadError>;

    /// Learner input for one item of a mounted group.
    fn input(&mut self, handle: HandleId, offset: usize, answer: Answer);

    fn capture_answer(&self, handle: HandleId, offset: usize) -> Option<Answer>;

    fn restore_answers(&mut self, handle: HandleId, answers: &[Option<Answer>]);

    fn grade(&self, user_answer: &Answer, correct_answer: &Answer) -> bool {
        user_answer == correct_answer
    }

    /// Builds the first-attempt result for a mounted group.
    fn finish_group(&mut self, handle: HandleId, group_id: &str, item_count: usize) -> GroupResult;

    fn teardown(&mut self, handle: HandleId);
}

/// Lets a caller keep its own reference to a registered collaborator.
impl<C: GroupCollaborator> GroupCollaborator for Rc<RefCell<C>> {
    fn grading(&self) -> Grading {
        self.borrow().grading()
    }

    fn mount_fresh(&mut self, group_id: &str, ctx: &AttemptContext) -> Result<HandleId, LoadError> {
        self.borrow_mut().mount_fresh(group_id, ctx)
    }

    fn mount_for_reentry(
        &mut self,
        group_id: &str,
        handle: HandleId,
        ctx: &AttemptContext,
    ) -> Result<HandleId, LoadError> {
        self.borrow_mut().mount_for_reentry(group_id, handle, ctx)
    }

    fn input(&mut self, handle: HandleId, offset: usize, answer: Answer) {
        self.borrow_mut().input(handle, offset, answer)
    }

    fn capture_answer(&self, handle: HandleId, offset: usize) -> Option<Answer> {
        self.borrow().capture_answer(handle, offset)
    }

    fn restore_answers(&mut self, handle: HandleId, answers: &[Option<Answer>]) {
        self.borrow_mut().restore_answers(handle, answers)
    }

    fn grade(&self, user_answer: &Answer, correct_answer: &Answer) -> bool {
        self.borrow().grade(user_answer, correct_answer)
    }

    fn finish_group(&mut self, handle: HandleId, group_id: &str, item_count: usize) -> GroupResult {
        self.borrow_mut().finish_group(handle, group_id, item_count)
    }

    fn teardown(&mut self, handle: HandleId) {
        self.borrow_mut().teardown(handle)
    }
}

/// Outward notifications from a running session.
pub trait SessionObserver {
    fn on_group_complete(&mut self, _result: &GroupResult) {}

    fn on_retake_complete(&mut self, _score: &Score, _improvement: &Improvement) {}
}
