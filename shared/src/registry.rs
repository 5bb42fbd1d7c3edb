//! Command registry
//!
//! An ordered, immutable mapping from small command numbers to named
//! entries. The queen and the agents each build their own registry at
//! startup and pass it explicitly; the numbering is part of the wire
//! contract between them.

use std::collections::BTreeMap;

use thiserror::Error;

/// A registered command: a stable name plus the crate-specific entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry<C> {
    pub name: &'static str,
    pub command: C,
}

/// Ordered mapping from command numbers to entries.
#[derive(Debug, Clone)]
pub struct CommandRegistry<C> {
    entries: BTreeMap<u8, CommandEntry<C>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid command: {0}")]
    UnknownNumber(u8),

    #[error("unknown command name: {0}")]
    UnknownName(String),

    #[error("duplicate command number: {0}")]
    DuplicateNumber(u8),

    #[error("duplicate command name: {0}")]
    DuplicateName(&'static str),
}

impl<C> CommandRegistry<C> {
    /// Build a registry from `(number, name, command)` triples.
    ///
    /// Numbers and names must each be unique within one registry.
    pub fn new(
        entries: impl IntoIterator<Item = (u8, &'static str, C)>,
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for (num, name, command) in entries {
            if map.values().any(|e: &CommandEntry<C>| e.name == name) {
                return Err(RegistryError::DuplicateName(name));
            }
            if map.insert(num, CommandEntry { name, command }).is_some() {
                return Err(RegistryError::DuplicateNumber(num));
            }
        }
        Ok(Self { entries: map })
    }

    /// Look up a command by number.
    pub fn by_number(&self, num: u8) -> Result<&CommandEntry<C>, RegistryError> {
        self.entries
            .get(&num)
            .ok_or(RegistryError::UnknownNumber(num))
    }

    /// Reverse lookup: the number registered for a command name.
    pub fn number_for(&self, name: &str) -> Result<u8, RegistryError> {
        self.entries
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(num, _)| *num)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    /// All registered `(number, name)` pairs in number order.
    pub fn names(&self) -> Vec<(u8, &'static str)> {
        self.entries.iter().map(|(num, e)| (*num, e.name)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
