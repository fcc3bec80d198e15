//! Wire values as decoded from the RESP2/RESP3 protocol

use bytes::Bytes;
use std::fmt;

/// A fully materialized protocol reply
///
/// Every variant owns its data; nothing borrows from the connection's
/// read buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Null: `_\r\n`, or the RESP2 forms `$-1\r\n` / `*-1\r\n`
    Null,
    /// Boolean: `#t\r\n` or `#f\r\n`
    Boolean(bool),
    /// Integer: `:1000\r\n`
    Integer(i64),
    /// Double: `,3.14\r\n`
    Double(f64),
    /// Big number: `(3492890328409238509324850943850943825024385\r\n`
    BigNumber(String),
    /// Simple string: `+OK\r\n`
    SimpleString(String),
    /// Bulk string: `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// Verbatim string: `=15\r\ntxt:Some string\r\n`
    VerbatimString {
        /// Three-letter format tag (`txt`, `mkd`)
        format: String,
        /// Payload after the `fmt:` prefix
        data: Bytes,
    },
    /// Simple error: `-ERR message\r\n`
    Error(String),
    /// Bulk error: `!21\r\nSYNTAX invalid syntax\r\n`
    BulkError(String),
    /// Array: `*2\r\n...`
    Array(Vec<WireValue>),
    /// Set: `~2\r\n...`, elements in the order received
    Set(Vec<WireValue>),
    /// Map: `%2\r\n...`, pairs in the order received
    Map(Vec<(WireValue, WireValue)>),
    /// Out-of-band push: `>3\r\n...`
    Push(Vec<WireValue>),
    /// Attribute map (`|1\r\n...`) merged onto the value that followed it
    Attribute {
        /// Metadata pairs in the order received
        attributes: Vec<(WireValue, WireValue)>,
        /// The value the metadata is attached to
        value: Box<WireValue>,
    },
}

/// Protocol type tag of a [`WireValue`], used in decode errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// `_`
    Null,
    /// `#`
    Boolean,
    /// `:`
    Integer,
    /// `,`
    Double,
    /// `(`
    BigNumber,
    /// `+`
    SimpleString,
    /// `$`
    BulkString,
    /// `=`
    VerbatimString,
    /// `-`
    Error,
    /// `!`
    BulkError,
    /// `*`
    Array,
    /// `~`
    Set,
    /// `%`
    Map,
    /// `>`
    Push,
    /// `|`
    Attribute,
}

impl Shape {
    /// Human readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::BigNumber => "big-number",
            Self::SimpleString => "simple-string",
            Self::BulkString => "bulk-string",
            Self::VerbatimString => "verbatim-string",
            Self::Error => "error",
            Self::BulkError => "bulk-error",
            Self::Array => "array",
            Self::Set => "set",
            Self::Map => "map",
            Self::Push => "push",
            Self::Attribute => "attribute",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl WireValue {
    /// Type tag of this value
    #[must_use]
    pub const fn shape(&self) -> Shape {
        match self {
            Self::Null => Shape::Null,
            Self::Boolean(_) => Shape::Boolean,
            Self::Integer(_) => Shape::Integer,
            Self::Double(_) => Shape::Double,
            Self::BigNumber(_) => Shape::BigNumber,
            Self::SimpleString(_) => Shape::SimpleString,
            Self::BulkString(_) => Shape::BulkString,
            Self::VerbatimString { .. } => Shape::VerbatimString,
            Self::Error(_) => Shape::Error,
            Self::BulkError(_) => Shape::BulkError,
            Self::Array(_) => Shape::Array,
            Self::Set(_) => Shape::Set,
            Self::Map(_) => Shape::Map,
            Self::Push(_) => Shape::Push,
            Self::Attribute { .. } => Shape::Attribute,
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error reply (simple or bulk)
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_) | Self::BulkError(_))
    }

    /// Check if this is an out-of-band push, looking through attributes
    #[must_use]
    pub fn is_push(&self) -> bool {
        match self {
            Self::Push(_) => true,
            Self::Attribute { value, .. } => value.is_push(),
            _ => false,
        }
    }

    /// Extract the error message if this is an error reply
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        match self {
            Self::Error(msg) | Self::BulkError(msg) => Some(msg),
            _ => None,
        }
    }

    /// Strip any attribute wrapper and return the primary value
    #[must_use]
    pub fn into_primary(self) -> Self {
        match self {
            Self::Attribute { value, .. } => value.into_primary(),
            other => other,
        }
    }

    /// Borrow the primary value, looking through attribute wrappers
    #[must_use]
    pub fn primary(&self) -> &Self {
        match self {
            Self::Attribute { value, .. } => value.primary(),
            other => other,
        }
    }

    /// Attribute pairs attached to this value, empty when there are none
    #[must_use]
    pub fn attributes(&self) -> &[(WireValue, WireValue)] {
        match self {
            Self::Attribute { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Raw bytes of a string-like value
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::SimpleString(s) | Self::BigNumber(s) => Some(s.as_bytes()),
            Self::BulkString(b) | Self::VerbatimString { data: b, .. } => Some(b),
            _ => None,
        }
    }

    /// Compare a string-like value against `text`, byte for byte
    #[must_use]
    pub fn eq_text(&self, text: &str) -> bool {
        self.as_bytes() == Some(text.as_bytes())
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<Bytes> for WireValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(b: Vec<u8>) -> Self {
        Self::BulkString(Bytes::from(b))
    }
}

impl From<i64> for WireValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for WireValue {
    fn from(f: f64) -> Self {
        Self::Double(f)
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(items: Vec<WireValue>) -> Self {
        Self::Array(items)
    }
}
