use serde::{Deserialize, Serialize};

use crate::module::config::Section;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FraudFlag {
    pub reason: String,
    pub secs_per_item: f64,
}

#[derive(Clone, Debug)]
pub struct AttemptSummary {
    pub section: Section,
    pub total_items: usize,
    pub elapsed_secs: f64,
}

/// May flag a finished first attempt. Flags are informational and never
/// change a score.
pub trait FraudCheck {
    fn inspect(&self, summary: &AttemptSummary) -> Option<FraudFlag>;
}

/// Flags attempts answered faster than a plausible reading speed.
#[derive(Clone, Debug)]
pub struct SpeedCheck {
    pub min_secs_per_item: f64,
}

impl FraudCheck for SpeedCheck {
    fn inspect(&self, summary: &AttemptSummary) -> Option<FraudFlag> {
        if summary.total_items == 0 || self.min_secs_per_item <= 0.0 {
            return None;
        }
        let secs_per_item = summary.elapsed_secs / summary.total_items as f64;
        if secs_per_item < self.min_secs_per_item {
            Some(FraudFlag {
                reason: format!(
                    "{} attempt averaged {:.1}s per item (minimum {:.1}s)",
                    summary.section.as_str(),
                    secs_per_item,
                    self.min_secs_per_item
                ),
                secs_per_item,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(elapsed_secs: f64) -> AttemptSummary {
        AttemptSummary {
            section: Section::Reading,
            total_items: 10,
            elapsed_secs,
        }
    }

    #[test]
    fn test_flags_fast_attempts() {
        let check = SpeedCheck {
            min_secs_per_item: 2.0,
        };
        let flag = check.inspect(&summary(5.0)).unwrap();
        assert!((flag.secs_per_item - 0.5).abs() < f64::EPSILON);
        assert!(flag.reason.contains("reading"));
    }

    #[test]
    fn test_ignores_plausible_attempts() {
        let check = SpeedCheck {
            min_secs_per_item: 2.0,
        };
        assert!(check.inspect(&summary(20.0)).is_none());
    }

    #[test]
    fn test_disabled_when_minimum_is_zero() {
        let check = SpeedCheck {
            min_secs_per_item: 0.0,
        };
        assert!(check.inspect(&summary(0.0)).is_none());
    }
}
