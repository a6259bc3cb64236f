use std::collections::HashMap;

use crate::collab::{GroupCollaborator, Grading};
use crate::engine::error::EngineError;
use crate::module::config::ModuleConfig;

/// Maps each group type to the collaborator that handles it.
#[derive(Default)]
pub struct CollaboratorRegistry {
    collaborators: HashMap<String, Box<dyn GroupCollaborator>>,
}

impl CollaboratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C>(&mut self, group_type: &str, collaborator: C) -> &mut Self
    where
        C: GroupCollaborator + 'static,
    {
        self.collaborators
            .insert(group_type.to_string(), Box::new(collaborator));
        self
    }

    pub fn contains(&self, group_type: &str) -> bool {
        self.collaborators.contains_key(group_type)
    }

    pub fn get(&self, group_type: &str) -> Result<&(dyn GroupCollaborator + 'static), EngineError> {
        self.collaborators
            .get(group_type)
            .map(|c| &**c)
            .ok_or_else(|| EngineError::UnknownGroupType {
                group_type: group_type.to_string(),
            })
    }

    pub fn get_mut(
        &mut self,
        group_type: &str,
    ) -> Result<&mut (dyn GroupCollaborator + 'static), EngineError> {
        self.collaborators
            .get_mut(group_type)
            .map(|c| &mut **c)
            .ok_or_else(|| EngineError::UnknownGroupType {
                group_type: group_type.to_string(),
            })
    }

    /// Checks every descriptor's group type up front and returns the grading
    /// mode for each descriptor, in order.
    pub fn resolve(&self, config: &ModuleConfig) -> Result<Vec<Grading>, EngineError> {
        config
            .groups
            .iter()
            .map(|g| self.get(&g.group_type).map(|c| c.grading()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryGroups;
    use crate::module::config::{GroupDescriptor, Section};

    #[test]
    fn test_resolve_reports_grading_per_descriptor() {
        let mut registry = CollaboratorRegistry::new();
        registry
            .register("single", InMemoryGroups::new(Grading::Objective))
            .register("essay", InMemoryGroups::new(Grading::FreeText));
        let config = ModuleConfig::new(
            Section::Writing,
            vec![
                GroupDescriptor::new("single", "q1", 1),
                GroupDescriptor::new("essay", "w1", 1),
            ],
        )
        .unwrap();
        assert_eq!(
            registry.resolve(&config).unwrap(),
            vec![Grading::Objective, Grading::FreeText]
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_type() {
        let registry = CollaboratorRegistry::new();
        let config =
            ModuleConfig::new(Section::Reading, vec![GroupDescriptor::new("cloze", "c1", 4)])
                .unwrap();
        assert_eq!(
            registry.resolve(&config),
            Err(EngineError::UnknownGroupType {
                group_type: "cloze".to_string()
            })
        );
        assert!(!registry.contains("cloze"));
    }
}
