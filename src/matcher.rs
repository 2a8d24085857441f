//! Runtime lookup over a [`CompiledDatabase`].
//!
//! Patterns are tried in stored order (longest label first). The first match
//! wins; its properties are completed by walking the parent chain, with the
//! child's own values always taking precedence.

use crate::database::{
    CompiledDatabase, BROWSER_NAME, BROWSER_NAME_PATTERN, BROWSER_NAME_REGEX, PARENT,
    SYNTHETIC_PROPERTIES,
};
use crate::types::PropertyValue;
use log::warn;
use regex::{Regex, RegexBuilder};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

// ================================================================================================
// MATCH RESULT
// ================================================================================================

/// Flat property map produced by one lookup, in schema order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchResult {
    values: Vec<(String, PropertyValue)>,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Value of `name`, or `None` when the result does not carry it.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_ignore_case(&self, name: &str) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(PropertyValue::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn into_map(self) -> HashMap<String, PropertyValue> {
        self.values.into_iter().collect()
    }
}

impl Serialize for MatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ================================================================================================
// MATCHER
// ================================================================================================

/// Immutable, shareable lookup structure.
///
/// Safe for concurrent lookups without locking; wrap in `Arc` to share.
#[derive(Debug)]
pub struct Matcher {
    database: CompiledDatabase,
    regexes: Vec<Option<Regex>>,
}

impl Matcher {
    /// Builds the runtime matcher, compiling every pattern once.
    ///
    /// A pattern that fails to compile is logged and never matches. A
    /// database that does not validate is repaired first: trailing entries
    /// beyond the shortest collection are dropped, as are parent references
    /// out of range.
    pub fn new(mut database: CompiledDatabase) -> Self {
        if let Err(e) = database.validate() {
            warn!("Repairing inconsistent database: {}", e);
            repair(&mut database);
        }

        let regexes = database
            .patterns
            .iter()
            .map(|pattern| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!("Pattern {:?} does not compile, disabled: {}", pattern, e);
                        None
                    }
                }
            })
            .collect();

        Self { database, regexes }
    }

    /// A matcher over an empty database.
    pub fn empty() -> Self {
        Self::new(CompiledDatabase::empty())
    }

    pub fn database(&self) -> &CompiledDatabase {
        &self.database
    }

    pub fn len(&self) -> usize {
        self.database.len()
    }

    pub fn is_empty(&self) -> bool {
        self.database.is_empty()
    }

    /// Index of the entry `user_agent` resolves to.
    pub fn find(&self, user_agent: &str) -> Option<usize> {
        if user_agent.is_empty() {
            return None;
        }

        self.regexes.iter().position(|regex| {
            regex
                .as_ref()
                .map(|r| r.is_match(user_agent))
                .unwrap_or(false)
        })
    }

    /// Looks up `user_agent`. Never fails; no match yields an empty result.
    pub fn match_agent(&self, user_agent: &str) -> MatchResult {
        match self.find(user_agent) {
            Some(idx) => self.resolve(idx, user_agent),
            None => MatchResult::empty(),
        }
    }

    /// Builds the flat property map for entry `idx`.
    fn resolve(&self, idx: usize, user_agent: &str) -> MatchResult {
        let db = &self.database;
        let mut slots: Vec<Option<&str>> = vec![None; db.properties.len()];

        let regex = db.patterns[idx].to_lowercase();
        slots[BROWSER_NAME] = Some(user_agent);
        slots[BROWSER_NAME_REGEX] = Some(&regex);
        slots[BROWSER_NAME_PATTERN] = Some(&db.user_agents[idx]);
        if let Some(parent) = db.entries[idx].parent {
            slots[PARENT] = Some(&db.user_agents[parent]);
        }

        fill_missing(&mut slots, &db.entries[idx].values);

        // Iterative parent walk; a chain can never be longer than the arena
        let mut current = db.entries[idx].parent;
        let mut hops = 0;
        while let Some(parent) = current {
            if hops >= db.len() {
                warn!(
                    "Parent chain of '{}' exceeds {} entries, stopping",
                    db.user_agents[idx],
                    db.len()
                );
                break;
            }
            fill_missing(&mut slots, &db.entries[parent].values);
            current = db.entries[parent].parent;
            hops += 1;
        }

        let values = slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| {
                let value = (*value)?;
                let name = db.properties.name(slot)?;
                Some((name.to_string(), PropertyValue::from_raw(value)))
            })
            .collect();

        MatchResult { values }
    }
}

fn repair(db: &mut CompiledDatabase) {
    if db.properties.len() < SYNTHETIC_PROPERTIES.len() {
        warn!("Database schema lacks the synthetic properties, discarding it");
        *db = CompiledDatabase::empty();
        return;
    }

    let count = db.patterns.len().min(db.user_agents.len()).min(db.entries.len());
    db.patterns.truncate(count);
    db.user_agents.truncate(count);
    db.entries.truncate(count);

    for entry in &mut db.entries {
        if entry.parent.is_some_and(|parent| parent >= count) {
            entry.parent = None;
        }
    }
}

fn fill_missing<'a>(slots: &mut [Option<&'a str>], values: &'a [(usize, String)]) {
    for (slot, value) in values {
        if let Some(target) = slots.get_mut(*slot) {
            if target.is_none() {
                *target = Some(value.as_str());
            }
        }
    }
}
