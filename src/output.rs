//! CLI output formatting for build and check runs.
//!
//! # Output Format
//!
//! ## Build
//!
//! One line per changed entry: action letter, output path, and the origin
//! of the item that wrote it. Directories and deletions have no origin.
//!
//! ```text
//! A /
//! A /index.html << /index.md
//! U /posts
//! U /posts/hello.html << /posts/hello.md
//! D /posts/old.html
//! A /tags/rust.html << /tags.tpl[rust]
//!
//! Done! 6 files and directories touched
//! ```
//!
//! With `--all`, unchanged entries are listed too, marked `-`.
//!
//! ## Check
//!
//! ```text
//! 12 items in 2 waves (deepest generation 1)
//! 9 output paths, no conflicts
//! ```
//!
//! # Architecture
//!
//! Each run has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::graph::Expansion;
use crate::reconcile::{ChangeEntry, ChangeReport};

/// Format one report line: `A /path << origin`.
fn entry_line(entry: &ChangeEntry) -> String {
    match &entry.source {
        Some(item) => format!("{} {} << {}", entry.action.letter(), entry.path, item.origin()),
        None => format!("{} {}", entry.action.letter(), entry.path),
    }
}

/// Lines of a change report; unchanged entries only with `all`.
pub fn format_report(report: &ChangeReport, all: bool) -> Vec<String> {
    report
        .entries()
        .iter()
        .filter(|entry| all || entry.is_change())
        .map(entry_line)
        .collect()
}

pub fn format_summary(report: &ChangeReport) -> String {
    format!("Done! {} files and directories touched", report.touched())
}

pub fn format_check(expansion: &Expansion, outputs: usize) -> Vec<String> {
    let waves = if expansion.waves == 1 { "wave" } else { "waves" };
    vec![
        format!(
            "{} items in {} {} (deepest generation {})",
            expansion.items, expansion.waves, waves, expansion.max_generation
        ),
        format!("{outputs} output paths, no conflicts"),
    ]
}

pub fn print_report(report: &ChangeReport, all: bool) {
    for line in format_report(report, all) {
        println!("{line}");
    }
    println!();
    println!("{}", format_summary(report));
}

pub fn print_check(expansion: &Expansion, outputs: usize) {
    for line in format_check(expansion, outputs) {
        println!("{line}");
    }
}
