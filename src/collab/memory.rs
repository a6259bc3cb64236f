use std::collections::HashMap;

use crate::collab::{AttemptContext, GroupCollaborator, Grading, HandleId, LoadError};
use crate::module::result::{Answer, GroupResult, ItemOutcome};

struct MountedGroup {
    group_id: String,
    slots: Vec<Option<Answer>>,
    context: AttemptContext,
}

/// Collaborator backed by an in-memory answer key, one entry per group id.
///
/// Input for read-only mounts and for handles that are no longer mounted is
/// dropped.
pub struct InMemoryGroups {
    grading: Grading,
    bank: HashMap<String, Vec<Answer>>,
    mounted: HashMap<HandleId, MountedGroup>,
    next_handle: u64,
    pending_failures: u32,
    fresh_mounts: usize,
    reentries: usize,
}

impl InMemoryGroups {
    pub fn new(grading: Grading) -> Self {
        Self {
            grading,
            bank: HashMap::new(),
            mounted: HashMap::new(),
            next_handle: 1,
            pending_failures: 0,
            fresh_mounts: 0,
            reentries: 0,
        }
    }

    pub fn with_group(mut self, group_id: &str, answer_key: Vec<Answer>) -> Self {
        self.add_group(group_id, answer_key);
        self
    }

    pub fn add_group(&mut self, group_id: &str, answer_key: Vec<Answer>) {
        self.bank.insert(group_id.to_string(), answer_key);
    }

    /// The next `count` mount attempts fail as if the group data were unreachable.
    pub fn fail_next_mounts(&mut self, count: u32) {
        self.pending_failures = count;
    }

    pub fn is_mounted(&self, handle: HandleId) -> bool {
        self.mounted.contains_key(&handle)
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.len()
    }

    pub fn fresh_mounts(&self) -> usize {
        self.fresh_mounts
    }

    pub fn reentries(&self) -> usize {
        self.reentries
    }

    pub fn context(&self, handle: HandleId) -> Option<AttemptContext> {
        self.mounted.get(&handle).map(|m| m.context)
    }

    fn check_available(&mut self) -> Result<(), LoadError> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(LoadError::Unavailable("simulated load failure".to_string()));
        }
        Ok(())
    }
}

impl GroupCollaborator for InMemoryGroups {
    fn grading(&self) -> Grading {
        self.grading
    }

    fn mount_fresh(&mut self, group_id: &str, ctx: &AttemptContext) -> Result<HandleId, LoadError> {
        self.check_available()?;
        let key = self.bank.get(group_id).ok_or_else(|| LoadError::NotFound {
            group_id: group_id.to_string(),
        })?;
        let handle = HandleId(self.next_handle);
        self.next_handle += 1;
        self.mounted.insert(
            handle,
            MountedGroup {
                group_id: group_id.to_string(),
                slots: vec![None; key.len()],
                context: *ctx,
            },
        );
        self.fresh_mounts += 1;
        Ok(handle)
    }

    fn mount_for_reentry(
        &mut self,
        group_id: &str,
        handle: HandleId,
        ctx: &AttemptContext,
    ) -> Result<HandleId, LoadError> {
        self.check_available()?;
        match self.mounted.get_mut(&handle) {
            Some(mounted) if mounted.group_id == group_id => {
                mounted.context = *ctx;
                self.reentries += 1;
                Ok(handle)
            }
            _ => Err(LoadError::StaleHandle(handle)),
        }
    }

    fn input(&mut self, handle: HandleId, offset: usize, answer: Answer) {
        let Some(mounted) = self.mounted.get_mut(&handle) else {
            tracing::debug!(?handle, "input for unmounted handle dropped");
            return;
        };
        if mounted.context.read_only {
            return;
        }
        if let Some(slot) = mounted.slots.get_mut(offset) {
            *slot = Some(answer);
        }
    }

    fn capture_answer(&self, handle: HandleId, offset: usize) -> Option<Answer> {
        self.mounted
            .get(&handle)
            .and_then(|m| m.slots.get(offset).cloned().flatten())
    }

    fn restore_answers(&mut self, handle: HandleId, answers: &[Option<Answer>]) {
        if let Some(mounted) = self.mounted.get_mut(&handle) {
            for (slot, answer) in mounted.slots.iter_mut().zip(answers) {
                *slot = answer.clone();
            }
        }
    }

    fn grade(&self, user_answer: &Answer, correct_answer: &Answer) -> bool {
        match self.grading {
            Grading::Objective => user_answer == correct_answer,
            Grading::FreeText => false,
        }
    }

    fn finish_group(&mut self, handle: HandleId, group_id: &str, item_count: usize) -> GroupResult {
        let key = self.bank.get(group_id).cloned().unwrap_or_default();
        let outcomes = (0..item_count)
            .map(|offset| {
                let user_answer = self.capture_answer(handle, offset);
                let correct_answer = key
                    .get(offset)
                    .cloned()
                    .unwrap_or_else(|| Answer::Text(String::new()));
                let is_correct = user_answer
                    .as_ref()
                    .is_some_and(|a| self.grade(a, &correct_answer));
                ItemOutcome::new(user_answer, correct_answer, is_correct)
            })
            .collect();
        GroupResult {
            group_id: group_id.to_string(),
            outcomes,
        }
    }

    fn teardown(&mut self, handle: HandleId) {
        self.mounted.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> InMemoryGroups {
        InMemoryGroups::new(Grading::Objective)
            .with_group("b1", vec![Answer::Choice(1), Answer::Choice(2), Answer::Choice(0)])
    }

    #[test]
    fn test_mount_input_and_finish() {
        let mut g = groups();
        let h = g.mount_fresh("b1", &AttemptContext::default()).unwrap();
        g.input(h, 0, Answer::Choice(1));
        g.input(h, 2, Answer::Choice(3));
        let result = g.finish_group(h, "b1", 3);
        let flags: Vec<bool> = result.outcomes.iter().map(|o| o.is_correct).collect();
        assert_eq!(flags, vec![true, false, false]);
        assert!(result.outcomes[1].user_answer.is_none());
    }

    #[test]
    fn test_unknown_group_not_found() {
        let mut g = groups();
        assert_eq!(
            g.mount_fresh("zz", &AttemptContext::default()),
            Err(LoadError::NotFound {
                group_id: "zz".to_string()
            })
        );
    }

    #[test]
    fn test_read_only_mount_ignores_input() {
        let mut g = groups();
        let ctx = AttemptContext {
            read_only: true,
            ..AttemptContext::default()
        };
        let h = g.mount_fresh("b1", &ctx).unwrap();
        g.input(h, 0, Answer::Choice(1));
        assert!(g.capture_answer(h, 0).is_none());
    }

    #[test]
    fn test_reentry_preserves_slots() {
        let mut g = groups();
        let h = g.mount_fresh("b1", &AttemptContext::default()).unwrap();
        g.input(h, 1, Answer::Choice(2));
        let again = g.mount_for_reentry("b1", h, &AttemptContext::default()).unwrap();
        assert_eq!(again, h);
        assert_eq!(g.capture_answer(h, 1), Some(Answer::Choice(2)));
        assert_eq!(g.reentries(), 1);
        assert_eq!(g.fresh_mounts(), 1);
    }

    #[test]
    fn test_teardown_makes_handle_stale() {
        let mut g = groups();
        let h = g.mount_fresh("b1", &AttemptContext::default()).unwrap();
        g.teardown(h);
        assert!(!g.is_mounted(h));
        g.input(h, 0, Answer::Choice(1));
        assert!(g.capture_answer(h, 0).is_none());
        assert_eq!(
            g.mount_for_reentry("b1", h, &AttemptContext::default()),
            Err(LoadError::StaleHandle(h))
        );
    }

    #[test]
    fn test_injected_failures_are_transient() {
        let mut g = groups();
        g.fail_next_mounts(2);
        assert!(g.mount_fresh("b1", &AttemptContext::default()).is_err());
        assert!(g.mount_fresh("b1", &AttemptContext::default()).is_err());
        assert!(g.mount_fresh("b1", &AttemptContext::default()).is_ok());
    }

    #[test]
    fn test_free_text_is_never_auto_graded() {
        let g = InMemoryGroups::new(Grading::FreeText);
        let text = Answer::Text("same".to_string());
        assert!(!g.grade(&text, &text));
    }
}
