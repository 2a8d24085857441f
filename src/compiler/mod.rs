//! Definitions compiler - raw definitions text into a [`CompiledDatabase`].
//!
//! Compilation steps:
//! 1. Parse sections; the first section is the reserved version header
//! 2. Build the [`PropertySchema`] from the defaults section
//! 3. Order labels by descending length (stable on ties)
//! 4. Translate `Parent` labels into indices of the ordered list
//! 5. Translate wildcard labels into anchored regex sources
//!
//! Structural problems inside one entry never abort the whole compilation:
//! the entry is kept with whatever parsed and becomes a root when its parent
//! cannot be resolved.

pub mod ini;
pub mod pattern;

pub use ini::normalize;
pub use pattern::wildcard_to_regex;

use crate::database::{CompiledDatabase, PatternEntry, PropertySchema, SYNTHETIC_PROPERTIES};
use crate::error::{BrowscapError, Result};
use log::{debug, warn};
use std::collections::HashMap;

/// Name of the section whose keys define the schema.
pub const DEFAULTS_SECTION: &str = "DefaultProperties";

const PARENT_KEY: &str = SYNTHETIC_PROPERTIES[crate::database::PARENT];

/// Compiler configuration.
#[derive(Clone, Debug, Default)]
pub struct CompilerOptions {
    /// Lowercase every schema name after compilation
    pub lowercase: bool,
}

/// Statistics and provenance collected during one compilation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileStats {
    /// Number of compiled entries
    pub entries: usize,
    /// Lines skipped because they did not fit the grammar
    pub malformed_lines: usize,
    /// Entries whose parent could not be resolved
    pub dangling_parents: usize,
    /// `Version` from the header section
    pub version: Option<String>,
    /// `Released` from the header section
    pub released: Option<String>,
}

/// Output of [`Compiler::compile`].
#[derive(Clone, Debug)]
pub struct Compilation {
    pub database: CompiledDatabase,
    pub stats: CompileStats,
}

#[derive(Clone, Debug, Default)]
pub struct Compiler {
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compiles definitions text.
    ///
    /// The text is expected to be normalized already (see [`normalize`]).
    ///
    /// # Errors
    /// `MalformedDefinitions` when the text holds no section at all.
    pub fn compile(&self, text: &str) -> Result<Compilation> {
        let parsed = ini::parse(text);
        let mut stats = CompileStats {
            malformed_lines: parsed.malformed_lines,
            ..Default::default()
        };

        let mut sections = parsed.sections.into_iter();
        let header = sections.next().ok_or_else(|| {
            BrowscapError::MalformedDefinitions("no sections found in definitions".to_string())
        })?;
        stats.version = header.get("Version").map(str::to_string);
        stats.released = header.get("Released").map(str::to_string);

        let sections: Vec<ini::Section> = sections.collect();

        // Schema: synthetic slots, defaults keys, then any other key in file order
        let mut properties = PropertySchema::synthetic();
        if let Some(defaults) = sections
            .iter()
            .find(|s| s.label == DEFAULTS_SECTION)
            .or_else(|| sections.first())
        {
            for (key, _) in &defaults.pairs {
                properties.intern(key);
            }
        }
        for section in &sections {
            for (key, _) in &section.pairs {
                if properties.index_of(key).is_none() {
                    debug!(
                        "Property '{}' of '{}' is not a default property, appending",
                        key, section.label
                    );
                    properties.intern(key);
                }
            }
        }

        // Match priority: longest label first, file order on ties
        let mut order: Vec<usize> = (0..sections.len()).collect();
        order.sort_by(|&a, &b| sections[b].label.len().cmp(&sections[a].label.len()));

        let positions: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (sections[idx].label.as_str(), pos))
            .collect();

        let mut database = CompiledDatabase {
            patterns: Vec::with_capacity(order.len()),
            user_agents: Vec::with_capacity(order.len()),
            entries: Vec::with_capacity(order.len()),
            properties,
        };

        for (pos, &idx) in order.iter().enumerate() {
            let section = &sections[idx];

            let parent = match section.get(PARENT_KEY) {
                None | Some("") => None,
                Some(label) => match positions.get(label) {
                    Some(&target) if target != pos => Some(target),
                    Some(_) => {
                        warn!("Entry '{}' names itself as parent, treated as root", section.label);
                        stats.dangling_parents += 1;
                        None
                    }
                    None => {
                        warn!(
                            "Entry '{}' references unknown parent '{}', treated as root",
                            section.label, label
                        );
                        stats.dangling_parents += 1;
                        None
                    }
                },
            };

            let mut values: Vec<(usize, String)> = section
                .pairs
                .iter()
                .filter(|(key, _)| key != PARENT_KEY)
                .filter_map(|(key, value)| {
                    database
                        .properties
                        .index_of(key)
                        .map(|slot| (slot, value.clone()))
                })
                .collect();
            values.sort_by_key(|(slot, _)| *slot);

            database.patterns.push(wildcard_to_regex(&section.label));
            database.user_agents.push(section.label.clone());
            database.entries.push(PatternEntry { parent, values });
        }

        if self.options.lowercase {
            database.properties.lowercase();
        }

        stats.entries = database.len();
        debug!(
            "Compiled {} entries ({} properties, {} malformed lines, {} dangling parents)",
            stats.entries,
            database.properties.len(),
            stats.malformed_lines,
            stats.dangling_parents
        );

        Ok(Compilation { database, stats })
    }
}
