//! List commands
//!
//! This module provides command builders for list operations.

use super::{Command, ToArg};
use bytes::Bytes;
use kvwire_core::types::Key;

/// End of a list to operate on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDirection {
    /// Head of the list
    Left,
    /// Tail of the list
    Right,
}

impl ListDirection {
    /// Wire keyword
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

/// LPUSH command - Insert one or more values at the head of a list
#[derive(Debug, Clone)]
pub struct LPushCommand {
    key: Key,
    values: Vec<Bytes>,
}

impl LPushCommand {
    /// Create a new LPUSH command
    pub fn new(key: impl Into<Key>, values: impl IntoIterator<Item = impl ToArg>) -> Self {
        Self {
            key: key.into(),
            values: values.into_iter().map(|v| v.to_arg()).collect(),
        }
    }
}

impl Command for LPushCommand {
    type Output = i64;

    fn command_name(&self) -> &'static str {
        "LPUSH"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec![self.key.to_bytes()];
        args.extend(self.values.iter().cloned());
        args
    }
}

/// RPUSH command - Insert one or more values at the tail of a list
#[derive(Debug, Clone)]
pub struct RPushCommand {
    key: Key,
    values: Vec<Bytes>,
}

impl RPushCommand {
    /// Create a new RPUSH command
    pub fn new(key: impl Into<Key>, values: impl IntoIterator<Item = impl ToArg>) -> Self {
        Self {
            key: key.into(),
            values: values.into_iter().map(|v| v.to_arg()).collect(),
        }
    }
}

impl Command for RPushCommand {
    type Output = i64;

    fn command_name(&self) -> &'static str {
        "RPUSH"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec![self.key.to_bytes()];
        args.extend(self.values.iter().cloned());
        args
    }
}

/// LRANGE command - Get a range of elements from a list
#[derive(Debug, Clone)]
pub struct LRangeCommand {
    key: Key,
    start: i64,
    stop: i64,
}

impl LRangeCommand {
    /// Create a new LRANGE command
    pub fn new(key: impl Into<Key>, start: i64, stop: i64) -> Self {
        Self {
            key: key.into(),
            start,
            stop,
        }
    }
}

impl Command for LRangeCommand {
    type Output = Vec<String>;

    fn command_name(&self) -> &'static str {
        "LRANGE"
    }

    fn args(&self) -> Vec<Bytes> {
        vec![self.key.to_bytes(), self.start.to_arg(), self.stop.to_arg()]
    }
}

/// LLEN command - Get the length of a list
#[derive(Debug, Clone)]
pub struct LLenCommand {
    key: Key,
}

impl LLenCommand {
    /// Create a new LLEN command
    pub fn new(key: impl Into<Key>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for LLenCommand {
    type Output = i64;

    fn command_name(&self) -> &'static str {
        "LLEN"
    }

    fn args(&self) -> Vec<Bytes> {
        vec![self.key.to_bytes()]
    }
}

/// LMPOP command - Pop elements from the first non-empty list
///
/// The reply is absent when every list is empty, otherwise the name of the
/// list that was popped from together with the popped elements.
#[derive(Debug, Clone)]
pub struct LMPopCommand {
    keys: Vec<Key>,
    direction: ListDirection,
    count: Option<usize>,
}

impl LMPopCommand {
    /// Create a new LMPOP command popping a single element
    pub fn new(keys: impl IntoIterator<Item = impl Into<Key>>, direction: ListDirection) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            direction,
            count: None,
        }
    }

    /// Pop up to `count` elements
    #[must_use]
    pub const fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

impl Command for LMPopCommand {
    type Output = Option<(String, Vec<String>)>;

    fn command_name(&self) -> &'static str {
        "LMPOP"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = Vec::with_capacity(self.keys.len() + 4);
        args.push(self.keys.len().to_arg());
        args.extend(self.keys.iter().map(Key::to_bytes));
        args.push(self.direction.as_str().to_arg());
        if let Some(count) = self.count {
            args.push("COUNT".to_arg());
            args.push(count.to_arg());
        }
        args
    }
}

/// LMOVE command - Atomically move an element between two lists
#[derive(Debug, Clone)]
pub struct LMoveCommand {
    source: Key,
    destination: Key,
    from: ListDirection,
    to: ListDirection,
}

impl LMoveCommand {
    /// Create a new LMOVE command
    pub fn new(
        source: impl Into<Key>,
        destination: impl Into<Key>,
        from: ListDirection,
        to: ListDirection,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            from,
            to,
        }
    }
}

impl Command for LMoveCommand {
    type Output = Option<String>;

    fn command_name(&self) -> &'static str {
        "LMOVE"
    }

    fn args(&self) -> Vec<Bytes> {
        vec![
            self.source.to_bytes(),
            self.destination.to_bytes(),
            self.from.as_str().to_arg(),
            self.to.as_str().to_arg(),
        ]
    }
}
