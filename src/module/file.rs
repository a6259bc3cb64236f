use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::module::config::{GroupDescriptor, ModuleConfig, Section};
use crate::module::result::Answer;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleGroup {
    #[serde(flatten)]
    pub descriptor: GroupDescriptor,
    pub answer_key: Vec<Answer>,
}

/// A module on disk: the configuration plus the question bank's answer key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleFile {
    pub section: Section,
    pub groups: Vec<ModuleGroup>,
    /// Group types whose answers are free text rather than objectively graded.
    #[serde(default)]
    pub free_text_types: BTreeSet<String>,
}

impl ModuleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading module file {}", path.display()))?;
        let file: ModuleFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing module file {}", path.display()))?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The configuration half; item counts come from the descriptors.
    pub fn config(&self) -> Result<ModuleConfig, EngineError> {
        for group in &self.groups {
            if group.answer_key.len() != group.descriptor.item_count {
                return Err(EngineError::MalformedConfig(format!(
                    "group {} declares {} items but has {} answers",
                    group.descriptor.group_id,
                    group.descriptor.item_count,
                    group.answer_key.len()
                )));
            }
        }
        ModuleConfig::new(
            self.section,
            self.groups.iter().map(|g| g.descriptor.clone()).collect(),
        )
    }

    pub fn is_free_text(&self, group_type: &str) -> bool {
        self.free_text_types.contains(group_type)
    }
}
