use criterion::{Criterion, black_box, criterion_group, criterion_main};

use retakr::engine::index::ItemIndex;
use retakr::engine::scoring::{merge_outcomes, score};
use retakr::module::config::{GroupDescriptor, ModuleConfig, Section};
use retakr::module::result::{
    Answer, FirstAttemptResult, GroupResult, ItemOutcome, RetakeAnswer, RetakeAnswerRecord,
};

/// Alternating single items and batches of four, like a long reading paper.
fn make_config(groups: usize) -> ModuleConfig {
    let descriptors = (0..groups)
        .map(|i| {
            if i % 2 == 0 {
                GroupDescriptor::new("single", &format!("g{i}"), 1)
            } else {
                GroupDescriptor::new("batch", &format!("g{i}"), 4)
            }
        })
        .collect();
    ModuleConfig::new(Section::Reading, descriptors).expect("valid config")
}

fn make_first_attempt(config: &ModuleConfig) -> FirstAttemptResult {
    let mut flat = 0usize;
    let groups = config
        .groups
        .iter()
        .map(|g| {
            let outcomes = (0..g.item_count)
                .map(|_| {
                    flat += 1;
                    ItemOutcome::new(Some(Answer::Choice(1)), Answer::Choice(1), flat % 3 != 0)
                })
                .collect();
            GroupResult {
                group_id: g.group_id.clone(),
                outcomes,
            }
        })
        .collect();
    FirstAttemptResult { groups }
}

fn bench_locate(c: &mut Criterion) {
    let index = ItemIndex::new(make_config(400)).expect("valid index");
    let total = index.total_items();

    c.bench_function("locate (1000 items)", |b| {
        b.iter(|| {
            for flat in (0..total).step_by(7) {
                black_box(index.locate(black_box(flat)).ok());
            }
        })
    });
}

fn bench_first_attempt_sequence(c: &mut Criterion) {
    let config = make_config(400);
    let first = make_first_attempt(&config);
    let index = ItemIndex::new(config).expect("valid index");

    c.bench_function("first_attempt_sequence (1000 items)", |b| {
        b.iter(|| index.first_attempt_sequence(black_box(&first)))
    });
}

fn bench_score_and_merge(c: &mut Criterion) {
    let outcomes: Vec<bool> = (0..1000).map(|i| i % 3 != 0).collect();
    let mut answers = RetakeAnswerRecord::default();
    for flat in (0..1000).filter(|i| i % 3 == 0) {
        answers.insert(
            flat,
            RetakeAnswer {
                user_answer: Some(Answer::Choice(0)),
                is_correct: flat % 2 == 0,
            },
        );
    }
    let table = Section::Reading.band_table();

    c.bench_function("merge_outcomes + score (1000 items)", |b| {
        b.iter(|| {
            let merged = merge_outcomes(black_box(&outcomes), black_box(&answers));
            score(&merged, table)
        })
    });
}

criterion_group!(
    benches,
    bench_locate,
    bench_first_attempt_sequence,
    bench_score_and_merge
);
criterion_main!(benches);
