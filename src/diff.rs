use anyhow::Result;
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::hunk::Hunk;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub struct DiffDisplayConfig {
    pub context: usize,
    pub colorize: bool,
}

pub fn display_diff(old: &str, new: &str, config: &DiffDisplayConfig) -> Result<()> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old, new);

    for (idx, group) in diff.grouped_ops(config.context).iter().enumerate() {
        if idx > 0 {
            println!("...");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let marker = match change.tag() {
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                    ChangeTag::Equal => ' ',
                };
                if config.colorize && change.tag() != ChangeTag::Equal {
                    let color = if change.tag() == ChangeTag::Delete {
                        RED
                    } else {
                        GREEN
                    };
                    print!("{color}{marker} {change}{RESET}");
                } else {
                    print!("{marker} {change}");
                }
                if change.missing_newline() {
                    println!();
                }
            }
        }
    }

    Ok(())
}

pub fn summarize_lines(old: &str, new: &str) -> String {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old, new);
    let mut added = 0usize;
    let mut removed = 0usize;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    format!("+{added} -{removed}")
}

// Produces hunks in the same shape the parser accepts, so a generated patch
// (e.g. an undo patch) can be re-applied by this tool.
pub fn diff_hunks(old: &str, new: &str, context: usize) -> Vec<Hunk> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old, new);

    let mut hunks = Vec::new();
    for group in diff.grouped_ops(context) {
        let Some(first) = group.first() else {
            continue;
        };
        let mut original_lines = Vec::new();
        let mut new_lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let value = change.value().to_string();
                match change.tag() {
                    ChangeTag::Equal => {
                        original_lines.push(value.clone());
                        new_lines.push(value);
                    }
                    ChangeTag::Delete => original_lines.push(value),
                    ChangeTag::Insert => new_lines.push(value),
                }
            }
        }
        hunks.push(Hunk {
            original_start: first.old_range().start + 1,
            new_start: first.new_range().start + 1,
            original_lines,
            new_lines,
        });
    }
    hunks
}
