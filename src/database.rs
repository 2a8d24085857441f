//! Compiled lookup structure shared by the compiler, the cache store and the matcher.
//!
//! A [`CompiledDatabase`] is four aligned collections:
//! - `patterns`: anchored regular expression sources, one per label
//! - `user_agents`: the wildcard labels as written
//! - `entries`: positional property values plus the parent index
//! - `properties`: the [`PropertySchema`] mapping slots back to names
//!
//! Index `i` of the first three describes the same definitions section.
//! Entries are ordered by descending label length so the first structural
//! match is the most specific one.

use serde::{Deserialize, Serialize};

/// Schema slot of the synthetic user-agent field.
pub const BROWSER_NAME: usize = 0;
/// Schema slot of the synthetic lowercase regex field.
pub const BROWSER_NAME_REGEX: usize = 1;
/// Schema slot of the synthetic matched-label field.
pub const BROWSER_NAME_PATTERN: usize = 2;
/// Schema slot of the parent reference.
pub const PARENT: usize = 3;

/// Names of the four synthetic slots, in slot order.
pub const SYNTHETIC_PROPERTIES: [&str; 4] = [
    "browser_name",
    "browser_name_regex",
    "browser_name_pattern",
    "Parent",
];

// ================================================================================================
// PROPERTY SCHEMA
// ================================================================================================

/// Ordered list of property names for one compiled generation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    names: Vec<String>,
}

impl PropertySchema {
    /// Schema holding only the synthetic slots.
    pub fn synthetic() -> Self {
        Self {
            names: SYNTHETIC_PROPERTIES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Appends `name` unless already present and returns its slot.
    pub fn intern(&mut self, name: &str) -> usize {
        match self.index_of(name) {
            Some(idx) => idx,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        }
    }

    /// Slot of `name`, or `None` when the schema does not know it.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Case-insensitive variant of [`PropertySchema::index_of`].
    pub fn index_of_ignore_case(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn lowercase(&mut self) {
        for name in &mut self.names {
            *name = name.to_lowercase();
        }
    }
}

// ================================================================================================
// PATTERN ENTRY
// ================================================================================================

/// One user-agent definition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    /// Index of the parent entry in the ordered label list
    pub parent: Option<usize>,
    /// Own property values keyed by schema slot, sorted by slot
    pub values: Vec<(usize, String)>,
}

impl PatternEntry {
    pub fn value(&self, slot: usize) -> Option<&str> {
        self.values
            .binary_search_by_key(&slot, |(s, _)| *s)
            .ok()
            .map(|pos| self.values[pos].1.as_str())
    }
}

// ================================================================================================
// COMPILED DATABASE
// ================================================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledDatabase {
    pub patterns: Vec<String>,
    pub user_agents: Vec<String>,
    pub entries: Vec<PatternEntry>,
    pub properties: PropertySchema,
}

impl CompiledDatabase {
    /// A database that matches nothing.
    pub fn empty() -> Self {
        Self {
            properties: PropertySchema::synthetic(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of an exact label.
    pub fn position(&self, user_agent: &str) -> Option<usize> {
        self.user_agents.iter().position(|ua| ua == user_agent)
    }

    /// Checks collection alignment, parent bounds and value slots.
    pub fn validate(&self) -> Result<(), String> {
        let count = self.entries.len();
        if self.patterns.len() != count || self.user_agents.len() != count {
            return Err(format!(
                "misaligned collections: {} patterns, {} user agents, {} entries",
                self.patterns.len(),
                self.user_agents.len(),
                count
            ));
        }

        if self.properties.len() < SYNTHETIC_PROPERTIES.len() {
            return Err(format!(
                "schema has {} slots, expected at least {}",
                self.properties.len(),
                SYNTHETIC_PROPERTIES.len()
            ));
        }

        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(parent) = entry.parent {
                if parent >= count {
                    return Err(format!(
                        "entry {} references parent {} out of {}",
                        idx, parent, count
                    ));
                }
            }
            if let Some((slot, _)) = entry
                .values
                .iter()
                .find(|(slot, _)| *slot >= self.properties.len())
            {
                return Err(format!("entry {} uses unknown slot {}", idx, slot));
            }
        }

        Ok(())
    }
}
