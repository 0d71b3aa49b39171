//! Index progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts. Human lines look like:
//!
//! ```text
//! index  embedding  3 / 12  docs/guide.md
//! ```
//!
//! JSON mode writes one object per line with `phase`, `completed`, `total`
//! and `path`.

use std::io::Write;
use std::sync::Arc;

use clap::ValueEnum;
use mdrag_core::progress::{IndexProgress, ProgressCallback};

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build the callback handed to the indexer. `None` when off.
    pub fn callback(&self) -> Option<ProgressCallback> {
        let callback: ProgressCallback = match self {
            ProgressMode::Off => return None,
            ProgressMode::Human => Arc::new(|p: &IndexProgress| {
                let _ = writeln!(std::io::stderr().lock(), "{}", human_line(p));
            }),
            ProgressMode::Json => Arc::new(|p: &IndexProgress| {
                if let Ok(line) = serde_json::to_string(p) {
                    let _ = writeln!(std::io::stderr().lock(), "{}", line);
                }
            }),
        };
        Some(callback)
    }
}

fn human_line(p: &IndexProgress) -> String {
    let mut line = format!(
        "index  {}  {} / {}",
        p.phase,
        format_number(p.completed as u64),
        format_number(p.total as u64)
    );
    if let Some(path) = &p.current_path {
        line.push_str("  ");
        line.push_str(path);
    }
    line
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrag_core::progress::IndexPhase;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_line_layout() {
        let p = IndexProgress {
            phase: IndexPhase::Embedding,
            completed: 3,
            total: 12,
            current_path: Some("docs/guide.md".into()),
        };
        assert_eq!(human_line(&p), "index  embedding  3 / 12  docs/guide.md");

        let start = IndexProgress {
            phase: IndexPhase::Scanning,
            completed: 0,
            total: 1200,
            current_path: None,
        };
        assert_eq!(human_line(&start), "index  scanning  0 / 1,200");
    }

    #[test]
    fn off_has_no_callback() {
        assert!(ProgressMode::Off.callback().is_none());
        assert!(ProgressMode::Json.callback().is_some());
    }
}
