use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::Result;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use retakr::module::config::{GroupDescriptor, Section};
use retakr::module::file::{ModuleFile, ModuleGroup};
use retakr::module::result::Answer;

const OUT_DIR: &str = "fixtures";
const SEED: u64 = 0x5EED;

const BATCH_TYPES: &[&str] = &["true-false", "matching", "ordering"];

fn answer_for(group_type: &str, rng: &mut SmallRng) -> Answer {
    match group_type {
        "ordering" => {
            let mut order: Vec<u32> = (0..4).collect();
            order.shuffle(rng);
            Answer::Order(order)
        }
        "true-false" => Answer::Choice(rng.gen_range(0..2)),
        _ => Answer::Choice(rng.gen_range(0..4)),
    }
}

/// Objective module of `total_items`, split into single items and small batches.
fn objective_module(section: Section, total_items: usize, rng: &mut SmallRng) -> ModuleFile {
    let mut groups = Vec::new();
    let mut remaining = total_items;
    while remaining > 0 {
        let size = rng.gen_range(1..=5).min(remaining);
        let group_type = if size == 1 {
            "multiple-choice"
        } else {
            BATCH_TYPES[rng.gen_range(0..BATCH_TYPES.len())]
        };
        let group_id = format!("{}-{:02}", section.as_str(), groups.len() + 1);
        let answer_key = (0..size).map(|_| answer_for(group_type, rng)).collect();
        groups.push(ModuleGroup {
            descriptor: GroupDescriptor::new(group_type, &group_id, size),
            answer_key,
        });
        remaining -= size;
    }
    ModuleFile {
        section,
        groups,
        free_text_types: BTreeSet::new(),
    }
}

fn free_text_group(group_type: &str, group_id: &str, item_count: usize) -> ModuleGroup {
    ModuleGroup {
        descriptor: GroupDescriptor::new(group_type, group_id, item_count),
        answer_key: vec![Answer::Text(String::new()); item_count],
    }
}

fn writing_module() -> ModuleFile {
    ModuleFile {
        section: Section::Writing,
        groups: vec![
            free_text_group("essay", "writing-task-1", 1),
            free_text_group("essay", "writing-task-2", 1),
        ],
        free_text_types: BTreeSet::from(["essay".to_string()]),
    }
}

/// Writing module with an objective gap-fill, so it takes the standard flow.
fn mixed_writing_module() -> ModuleFile {
    let gap_fill = ModuleGroup {
        descriptor: GroupDescriptor::new("gap-fill", "writing-gaps", 3),
        answer_key: ["although", "whereas", "despite"]
            .iter()
            .map(|w| Answer::Text(w.to_string()))
            .collect(),
    };
    let mut essay = free_text_group("essay", "writing-summary", 1);
    essay.descriptor.no_time_limit = true;
    ModuleFile {
        section: Section::Writing,
        groups: vec![gap_fill, essay],
        free_text_types: BTreeSet::from(["essay".to_string()]),
    }
}

fn speaking_module() -> ModuleFile {
    ModuleFile {
        section: Section::Speaking,
        groups: vec![
            free_text_group("speaking-part", "speaking-part-1", 3),
            free_text_group("speaking-part", "speaking-part-2", 1),
            free_text_group("speaking-part", "speaking-part-3", 2),
        ],
        free_text_types: BTreeSet::from(["speaking-part".to_string()]),
    }
}

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| OUT_DIR.to_string());
    fs::create_dir_all(&out_dir)?;
    let mut rng = SmallRng::seed_from_u64(SEED);

    let modules: Vec<(&str, ModuleFile)> = vec![
        ("reading", objective_module(Section::Reading, 35, &mut rng)),
        ("listening", objective_module(Section::Listening, 32, &mut rng)),
        ("writing", writing_module()),
        ("writing-mixed", mixed_writing_module()),
        ("speaking", speaking_module()),
    ];

    for (name, module) in &modules {
        module.config()?;
        let path = Path::new(&out_dir).join(format!("{name}.json"));
        module.save(&path)?;
        println!(
            "Wrote {} ({} groups)",
            path.display(),
            module.groups.len()
        );
    }

    println!("\nGenerated {} modules.", modules.len());
    Ok(())
}
