use std::collections::HashMap;

use crate::collab::HandleId;
use crate::module::result::Answer;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub group_type: String,
    pub group_id: String,
}

impl GroupKey {
    pub fn new(group_type: &str, group_id: &str) -> Self {
        Self {
            group_type: group_type.to_string(),
            group_id: group_id.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mounted {
    Fresh(HandleId),
    Reused(HandleId),
}

impl Mounted {
    pub fn handle(self) -> HandleId {
        match self {
            Mounted::Fresh(h) | Mounted::Reused(h) => h,
        }
    }
}

/// Live collaborator handles for the groups visited in one retake.
#[derive(Debug, Default)]
pub struct InstanceCache {
    entries: HashMap<GroupKey, HandleId>,
}

impl InstanceCache {
    pub fn get(&self, group_type: &str, group_id: &str) -> Option<HandleId> {
        self.entries.get(&GroupKey::new(group_type, group_id)).copied()
    }

    /// Returns the cached handle, or stores the one built by `factory`.
    /// A failing factory leaves the cache untouched.
    pub fn get_or_try_create<E>(
        &mut self,
        group_type: &str,
        group_id: &str,
        factory: impl FnOnce() -> Result<HandleId, E>,
    ) -> Result<Mounted, E> {
        let key = GroupKey::new(group_type, group_id);
        if let Some(&handle) = self.entries.get(&key) {
            return Ok(Mounted::Reused(handle));
        }
        let handle = factory()?;
        self.entries.insert(key, handle);
        Ok(Mounted::Fresh(handle))
    }

    pub fn evict(&mut self, group_type: &str, group_id: &str) -> Option<HandleId> {
        self.entries.remove(&GroupKey::new(group_type, group_id))
    }

    pub fn drain(&mut self) -> Vec<(GroupKey, HandleId)> {
        let mut drained: Vec<_> = self.entries.drain().collect();
        drained.sort();
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-progress answers per group, kept apart from the live handles so entered
/// data survives a collaborator being rebuilt.
#[derive(Debug, Default)]
pub struct AnswerCache {
    entries: HashMap<GroupKey, Vec<Option<Answer>>>,
}

impl AnswerCache {
    pub fn save_answers(&mut self, group_type: &str, group_id: &str, answers: Vec<Option<Answer>>) {
        self.entries
            .insert(GroupKey::new(group_type, group_id), answers);
    }

    pub fn restore_answers(&self, group_type: &str, group_id: &str) -> Option<Vec<Option<Answer>>> {
        self.entries.get(&GroupKey::new(group_type, group_id)).cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses_existing() {
        let mut cache = InstanceCache::default();
        let first = cache
            .get_or_try_create::<()>("batch", "b1", || Ok(HandleId(7)))
            .unwrap();
        assert_eq!(first, Mounted::Fresh(HandleId(7)));
        let second = cache
            .get_or_try_create::<()>("batch", "b1", || panic!("factory must not run"))
            .unwrap();
        assert_eq!(second, Mounted::Reused(HandleId(7)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_includes_group_type() {
        let mut cache = InstanceCache::default();
        cache
            .get_or_try_create::<()>("single", "x", || Ok(HandleId(1)))
            .unwrap();
        let other = cache
            .get_or_try_create::<()>("batch", "x", || Ok(HandleId(2)))
            .unwrap();
        assert_eq!(other, Mounted::Fresh(HandleId(2)));
    }

    #[test]
    fn test_failed_factory_caches_nothing() {
        let mut cache = InstanceCache::default();
        let result = cache.get_or_try_create("single", "x", || Err("offline"));
        assert_eq!(result, Err("offline"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_drain_empties_cache() {
        let mut cache = InstanceCache::default();
        cache
            .get_or_try_create::<()>("single", "b", || Ok(HandleId(2)))
            .unwrap();
        cache
            .get_or_try_create::<()>("single", "a", || Ok(HandleId(1)))
            .unwrap();
        let drained = cache.drain();
        assert_eq!(drained[0].0, GroupKey::new("single", "a"));
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
        assert!(cache.get("single", "a").is_none());
    }

    #[test]
    fn test_restore_answers_is_idempotent() {
        let mut cache = AnswerCache::default();
        cache.save_answers("batch", "b1", vec![Some(Answer::Choice(2)), None]);
        let once = cache.restore_answers("batch", "b1");
        let twice = cache.restore_answers("batch", "b1");
        assert_eq!(once, twice);
        assert_eq!(once.unwrap()[0], Some(Answer::Choice(2)));
    }

    #[test]
    fn test_restore_missing_group_is_none() {
        let cache = AnswerCache::default();
        assert!(cache.restore_answers("batch", "nope").is_none());
    }

    #[test]
    fn test_clear_drops_answers() {
        let mut cache = AnswerCache::default();
        cache.save_answers("single", "a", vec![None]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
