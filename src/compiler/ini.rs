//! Definitions text grammar: quote normalization and section parsing.
//!
//! The grammar is deliberately narrow: `[label]` headers, `key=value` lines,
//! `;`/`#` comments and blank lines. Anything else is counted as malformed
//! and skipped.

use log::warn;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn quote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^(Browser|Parent)="?([^"]*)"?$"#).expect("static quote pattern is valid")
    })
}

/// Trims every line and wraps `Browser` and `Parent` values in double quotes.
///
/// Those two keys carry user-agent fragments that may contain characters the
/// section grammar would otherwise misread.
pub fn normalize(raw: &str) -> String {
    let pattern = quote_pattern();
    let mut content = String::with_capacity(raw.len() + raw.len() / 16);

    for line in raw.lines() {
        let line = line.trim();
        content.push_str(&pattern.replace(line, r#"${1}="${2}""#));
        content.push('\n');
    }

    content
}

/// One `[label]` block with its key/value pairs in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section {
    pub label: String,
    pub pairs: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: String, value: String) {
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key, value)),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ParsedDefinitions {
    pub sections: Vec<Section>,
    pub malformed_lines: usize,
}

/// Parses normalized definitions text into sections.
///
/// A label seen twice merges into its first occurrence; later keys win.
pub(crate) fn parse(text: &str) -> ParsedDefinitions {
    let mut parsed = ParsedDefinitions::default();
    let mut by_label: HashMap<String, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') {
            if let Some(end) = line.rfind(']') {
                let label = &line[1..end];
                let idx = *by_label.entry(label.to_string()).or_insert_with(|| {
                    parsed.sections.push(Section {
                        label: label.to_string(),
                        pairs: Vec::new(),
                    });
                    parsed.sections.len() - 1
                });
                current = Some(idx);
                continue;
            }
        }

        let Some(section) = current else {
            warn!("Definitions line {} outside of any section, skipped", line_no + 1);
            parsed.malformed_lines += 1;
            continue;
        };

        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                parsed.sections[section].set(key.trim().to_string(), unquote(value.trim()));
            }
            _ => {
                warn!("Unparsable definitions line {}: {:?}", line_no + 1, line);
                parsed.malformed_lines += 1;
            }
        }
    }

    parsed
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').unwrap_or(rest).to_string(),
        None => value.to_string(),
    }
}
