//! Line-oriented `key = value` configuration templates.
//!
//! Blank lines and lines starting with `#` or `!` are comments. The first `=`
//! on a line separates key from value; both sides are trimmed. Rewriting keeps
//! every template line in place and only swaps values, so comments and
//! ordering survive into the generated file.

use std::collections::{BTreeMap, HashSet};

/// A parsed configuration template.
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    lines: Vec<Line>,
}

#[derive(Debug, Clone)]
enum Line {
    Verbatim(String),
    Entry { key: String, value: String },
}

impl ConfigTemplate {
    /// Parses template text.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let lines = text.lines().map(parse_line).collect();
        Self { lines }
    }

    /// Key/value entries in the template. Later duplicates win.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Entry { key, value } => Some((key.clone(), value.clone())),
                Line::Verbatim(_) => None,
            })
            .collect()
    }

    /// Renders the template with `overrides` applied.
    ///
    /// Keys present in the template are rewritten in place; the rest are
    /// appended in key order.
    #[must_use]
    pub fn render(&self, overrides: &BTreeMap<String, String>) -> String {
        let mut out = String::new();
        let mut written = HashSet::new();

        for line in &self.lines {
            match line {
                Line::Verbatim(text) => out.push_str(text),
                Line::Entry { key, value } => {
                    let value = overrides.get(key).unwrap_or(value);
                    written.insert(key.as_str());
                    push_entry(&mut out, key, value);
                }
            }
            out.push('\n');
        }

        let mut appended = overrides
            .iter()
            .filter(|(key, _)| !written.contains(key.as_str()))
            .peekable();
        if appended.peek().is_some() && !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        for (key, value) in appended {
            push_entry(&mut out, key, value);
            out.push('\n');
        }

        out
    }
}

/// Parses `key = value` text into a map, ignoring comments.
#[must_use]
pub fn parse_entries(text: &str) -> BTreeMap<String, String> {
    ConfigTemplate::parse(text).entries()
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return Line::Verbatim(raw.to_string());
    }

    match trimmed.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Line::Entry {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        },
        _ => Line::Verbatim(raw.to_string()),
    }
}

fn push_entry(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(" = ");
    out.push_str(value);
}
