//! Keyspace commands

use super::Command;
use bytes::Bytes;
use kvwire_core::types::Key;

/// DEL command - Remove keys, returning how many existed
#[derive(Debug, Clone)]
pub struct DelCommand {
    keys: Vec<Key>,
}

impl DelCommand {
    /// Create a new DEL command
    pub fn new(keys: impl IntoIterator<Item = impl Into<Key>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Command for DelCommand {
    type Output = i64;

    fn command_name(&self) -> &'static str {
        "DEL"
    }

    fn args(&self) -> Vec<Bytes> {
        self.keys.iter().map(Key::to_bytes).collect()
    }
}

/// EXISTS command - Count how many of the given keys exist
#[derive(Debug, Clone)]
pub struct ExistsCommand {
    keys: Vec<Key>,
}

impl ExistsCommand {
    /// Create a new EXISTS command
    pub fn new(keys: impl IntoIterator<Item = impl Into<Key>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Command for ExistsCommand {
    type Output = i64;

    fn command_name(&self) -> &'static str {
        "EXISTS"
    }

    fn args(&self) -> Vec<Bytes> {
        self.keys.iter().map(Key::to_bytes).collect()
    }
}
