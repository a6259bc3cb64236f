use serde::{Deserialize, Serialize};

use crate::engine::bands::BandTable;
use crate::module::result::RetakeAnswerRecord;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub correct_count: usize,
    pub total_items: usize,
    pub percentage: u32,
    pub level: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub score_diff: i64,
    pub percent_diff: i64,
    pub level_diff: f64,
}

pub fn score(outcomes: &[bool], table: &BandTable) -> Score {
    let correct_count = outcomes.iter().filter(|&&c| c).count();
    let total_items = outcomes.len();
    Score {
        correct_count,
        total_items,
        percentage: percentage(correct_count, total_items),
        level: table.level_for(correct_count),
    }
}

/// Scores the items flagged in `graded` only. Free-text items count towards
/// neither the correct count nor the total.
pub fn score_graded(outcomes: &[bool], graded: &[bool], table: &BandTable) -> Score {
    let kept: Vec<bool> = outcomes
        .iter()
        .zip(graded)
        .filter(|(_, graded)| **graded)
        .map(|(correct, _)| *correct)
        .collect();
    score(&kept, table)
}

pub fn percentage(correct_count: usize, total_items: usize) -> u32 {
    if total_items == 0 {
        return 0;
    }
    (100.0 * correct_count as f64 / total_items as f64).round() as u32
}

pub fn improvement(first: &Score, second: &Score) -> Improvement {
    Improvement {
        score_diff: second.correct_count as i64 - first.correct_count as i64,
        percent_diff: second.percentage as i64 - first.percentage as i64,
        level_diff: second.level - first.level,
    }
}

/// Overlays retake answers on the first-attempt sequence. Items without a
/// retake entry keep their first-attempt outcome.
pub fn merge_outcomes(first: &[bool], retake: &RetakeAnswerRecord) -> Vec<bool> {
    first
        .iter()
        .enumerate()
        .map(|(i, &was_correct)| retake.get(i).map_or(was_correct, |a| a.is_correct))
        .collect()
}
