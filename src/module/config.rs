use serde::{Deserialize, Serialize};

use crate::engine::bands::{BandTable, LISTENING_BANDS, READING_BANDS};
use crate::engine::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Reading,
    Listening,
    Writing,
    Speaking,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Reading => "reading",
            Section::Listening => "listening",
            Section::Writing => "writing",
            Section::Speaking => "speaking",
        }
    }

    /// Writing shares the reading table for its objectively graded groups,
    /// speaking shares the listening one.
    pub fn band_table(self) -> &'static BandTable {
        match self {
            Section::Reading | Section::Writing => &READING_BANDS,
            Section::Listening | Section::Speaking => &LISTENING_BANDS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub group_type: String,
    pub group_id: String,
    pub item_count: usize,
    #[serde(default)]
    pub no_time_limit: bool,
}

impl GroupDescriptor {
    pub fn new(group_type: &str, group_id: &str, item_count: usize) -> Self {
        Self {
            group_type: group_type.to_string(),
            group_id: group_id.to_string(),
            item_count,
            no_time_limit: false,
        }
    }

    pub fn is_batch(&self) -> bool {
        self.item_count > 1
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub section: Section,
    pub total_items: usize,
    pub groups: Vec<GroupDescriptor>,
}

impl ModuleConfig {
    pub fn new(section: Section, groups: Vec<GroupDescriptor>) -> Result<Self, EngineError> {
        let total_items = groups.iter().map(|g| g.item_count).sum();
        let config = Self {
            section,
            total_items,
            groups,
        };
        config.validate()?;
        Ok(config)
    }

    /// Flat index of the first item of descriptor `descriptor_index`.
    pub fn group_start(&self, descriptor_index: usize) -> usize {
        self.groups
            .iter()
            .take(descriptor_index)
            .map(|g| g.item_count)
            .sum()
    }

    /// Error for a descriptor with no first-attempt result.
    pub fn missing_result(&self, descriptor_index: usize) -> EngineError {
        let (group_type, group_id) = self
            .groups
            .get(descriptor_index)
            .map(|g| (g.group_type.clone(), g.group_id.clone()))
            .unwrap_or_default();
        EngineError::MissingFirstAttempt {
            group_type,
            group_id,
            flat_index: self.group_start(descriptor_index),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.groups.is_empty() {
            return Err(EngineError::MalformedConfig(
                "module has no group descriptors".to_string(),
            ));
        }
        if let Some(g) = self.groups.iter().find(|g| g.item_count == 0) {
            return Err(EngineError::MalformedConfig(format!(
                "group {}/{} declares zero items",
                g.group_type, g.group_id
            )));
        }
        let sum: usize = self.groups.iter().map(|g| g.item_count).sum();
        if sum != self.total_items {
            return Err(EngineError::MalformedConfig(format!(
                "declared {} items but groups contribute {}",
                self.total_items, sum
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sums_item_counts() {
        let config = ModuleConfig::new(
            Section::Reading,
            vec![
                GroupDescriptor::new("single", "a", 1),
                GroupDescriptor::new("batch", "b", 3),
            ],
        )
        .unwrap();
        assert_eq!(config.total_items, 4);
        assert!(config.groups[1].is_batch());
        assert!(!config.groups[0].is_batch());
    }

    #[test]
    fn test_missing_result_names_group_and_start() {
        let config = ModuleConfig::new(
            Section::Reading,
            vec![
                GroupDescriptor::new("batch", "a", 3),
                GroupDescriptor::new("single", "b", 1),
            ],
        )
        .unwrap();
        assert_eq!(config.group_start(1), 3);
        assert_eq!(
            config.missing_result(1),
            EngineError::MissingFirstAttempt {
                group_type: "single".to_string(),
                group_id: "b".to_string(),
                flat_index: 3,
            }
        );
    }

    #[test]
    fn test_declared_total_mismatch_is_rejected() {
        let config = ModuleConfig {
            section: Section::Listening,
            total_items: 5,
            groups: vec![GroupDescriptor::new("single", "a", 1)],
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::MalformedConfig(_)));
        assert!(err.to_string().contains("declared 5"));
    }

    #[test]
    fn test_zero_item_group_is_rejected() {
        let err = ModuleConfig::new(
            Section::Reading,
            vec![GroupDescriptor::new("batch", "empty", 0)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("zero items"));
    }

    #[test]
    fn test_empty_module_is_rejected() {
        assert!(ModuleConfig::new(Section::Reading, Vec::new()).is_err());
    }

    #[test]
    fn test_descriptor_serde_defaults_no_time_limit() {
        let json = r#"{"group_type":"single","group_id":"q1","item_count":1}"#;
        let desc: GroupDescriptor = serde_json::from_str(json).unwrap();
        assert!(!desc.no_time_limit);
    }

    #[test]
    fn test_section_band_tables() {
        assert_eq!(Section::Reading.band_table().ceiling, 6.0);
        assert!(std::ptr::eq(
            Section::Speaking.band_table(),
            Section::Listening.band_table()
        ));
    }
}
