//! Typed decoding of wire values
//!
//! [`FromWire`] narrows a [`WireValue`] into a caller-chosen Rust type. Every
//! implementation dispatches explicitly on the value's protocol tag; a tag the
//! target does not accept is a [`KvError::Decode`], never a silent coercion.
//!
//! Attribute wrappers are transparent for every target except
//! [`Attributed`], which keeps the metadata pairs next to the decoded value.
//! Error replies met while decoding surface as [`KvError::Server`].

use crate::error::{KvError, KvResult};
use crate::types::Key;
use crate::value::WireValue;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Conversion from a decoded reply into a concrete type
pub trait FromWire: Sized {
    /// Decode `value` into `Self`
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Decode`] when the value's shape is not accepted,
    /// or [`KvError::Server`] when the value is an error reply.
    fn from_wire(value: WireValue) -> KvResult<Self>;
}

impl WireValue {
    /// Decode this value into `T`
    ///
    /// # Errors
    ///
    /// See [`FromWire::from_wire`].
    pub fn decode<T: FromWire>(self) -> KvResult<T> {
        T::from_wire(self)
    }
}

fn mismatch<T>(expected: &'static str, value: &WireValue) -> KvResult<T> {
    match value {
        WireValue::Error(msg) | WireValue::BulkError(msg) => Err(KvError::Server(msg.clone())),
        other => Err(KvError::decode(expected, other.shape())),
    }
}

fn parse_text<T: std::str::FromStr>(
    expected: &'static str,
    bytes: &[u8],
    value: &WireValue,
) -> KvResult<T> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| KvError::decode(expected, value.shape()))
}

impl FromWire for WireValue {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        Ok(value)
    }
}

impl FromWire for String {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::SimpleString(s) | WireValue::BigNumber(s) => Ok(s),
            WireValue::BulkString(b) | WireValue::VerbatimString { data: b, .. } => {
                String::from_utf8(b.to_vec()).map_err(|_| {
                    KvError::decode("utf-8 string", crate::value::Shape::BulkString)
                })
            }
            WireValue::Integer(i) => Ok(i.to_string()),
            WireValue::Double(f) => Ok(f.to_string()),
            other => mismatch("string", &other),
        }
    }
}

impl FromWire for Bytes {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::BulkString(b) | WireValue::VerbatimString { data: b, .. } => Ok(b),
            WireValue::SimpleString(s) | WireValue::BigNumber(s) => Ok(Bytes::from(s.into_bytes())),
            other => mismatch("bytes", &other),
        }
    }
}

impl FromWire for Key {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        Bytes::from_wire(value).map(Key::new)
    }
}

impl FromWire for i64 {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::Integer(i) => Ok(i),
            ref v @ (WireValue::SimpleString(_)
            | WireValue::BulkString(_)
            | WireValue::BigNumber(_)) => {
                let bytes = v.as_bytes().unwrap_or_default();
                parse_text("integer", bytes, v)
            }
            other => mismatch("integer", &other),
        }
    }
}

macro_rules! narrow_integer {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromWire for $ty {
                fn from_wire(value: WireValue) -> KvResult<Self> {
                    let shape = value.primary().shape();
                    let wide = i64::from_wire(value)?;
                    <$ty>::try_from(wide).map_err(|_| KvError::decode($name, shape))
                }
            }
        )*
    };
}

narrow_integer! {
    i32 => "i32",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    usize => "usize",
}

impl FromWire for f64 {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::Double(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            WireValue::Integer(i) => Ok(i as f64),
            ref v @ (WireValue::SimpleString(_)
            | WireValue::BulkString(_)
            | WireValue::BigNumber(_)) => {
                let bytes = v.as_bytes().unwrap_or_default();
                parse_text("double", bytes, v)
            }
            other => mismatch("double", &other),
        }
    }
}

impl FromWire for bool {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::Boolean(b) => Ok(b),
            WireValue::Integer(1) => Ok(true),
            WireValue::Integer(0) => Ok(false),
            other => mismatch("boolean", &other),
        }
    }
}

/// Status replies such as `+OK`
impl FromWire for () {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::SimpleString(_) => Ok(()),
            other => mismatch("status", &other),
        }
    }
}

impl<T: FromWire> FromWire for Option<T> {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        if value.primary().is_null() {
            return Ok(None);
        }
        T::from_wire(value).map(Some)
    }
}

impl<T: FromWire> FromWire for Vec<T> {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::Array(items) | WireValue::Set(items) => {
                items.into_iter().map(T::from_wire).collect()
            }
            other => mismatch("sequence", &other),
        }
    }
}

impl<K, V> FromWire for HashMap<K, V>
where
    K: FromWire + Eq + Hash,
    V: FromWire,
{
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_wire(k)?, V::from_wire(v)?)))
                .collect(),
            // RESP2 servers flatten maps into [k1, v1, k2, v2, ...]
            WireValue::Array(items) if items.len() % 2 == 0 => {
                let mut map = HashMap::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    map.insert(K::from_wire(k)?, V::from_wire(v)?);
                }
                Ok(map)
            }
            other => mismatch("map", &other),
        }
    }
}

macro_rules! tuple_from_wire {
    ($len:literal, $expected:literal => $($name:ident),+) => {
        impl<$($name: FromWire),+> FromWire for ($($name,)+) {
            fn from_wire(value: WireValue) -> KvResult<Self> {
                match value.into_primary() {
                    WireValue::Array(items) if items.len() == $len => {
                        let mut iter = items.into_iter();
                        Ok(($(
                            $name::from_wire(iter.next().unwrap_or(WireValue::Null))?,
                        )+))
                    }
                    other => mismatch($expected, &other),
                }
            }
        }
    };
}

tuple_from_wire!(1, "array of length 1" => A);
tuple_from_wire!(2, "array of length 2" => A, B);
tuple_from_wire!(3, "array of length 3" => A, B, C);
tuple_from_wire!(4, "array of length 4" => A, B, C, D);

/// A decoded value together with the attribute pairs the server attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct Attributed<T> {
    /// The primary value
    pub value: T,
    /// Attribute pairs in the order received; empty when none were sent
    pub attributes: Vec<(WireValue, WireValue)>,
}

impl<T> Attributed<T> {
    /// Look up an attribute by textual key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_text(key))
            .map(|(_, v)| v)
    }

    /// The attribute pair at `index`
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(&WireValue, &WireValue)> {
        self.attributes.get(index).map(|(k, v)| (k, v))
    }

    /// Decode the attribute stored under `key`
    ///
    /// # Errors
    ///
    /// Returns a decode error if the attribute exists but has the wrong shape.
    pub fn decode_attribute<U: FromWire>(&self, key: &str) -> KvResult<Option<U>> {
        self.get(key).cloned().map(U::from_wire).transpose()
    }

    /// Decode the value half of the attribute pair at `index`
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Exhausted`] if there is no pair at `index`, or a
    /// decode error if the value has the wrong shape.
    pub fn decode_attribute_at<U: FromWire>(&self, index: usize) -> KvResult<U> {
        let (_, value) = self.attributes.get(index).ok_or(KvError::Exhausted {
            position: index,
            len: self.attributes.len(),
        })?;
        U::from_wire(value.clone())
    }
}

impl<T: FromWire> FromWire for Attributed<T> {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        match value {
            WireValue::Attribute { attributes, value } => Ok(Self {
                value: T::from_wire(*value)?,
                attributes,
            }),
            other => Ok(Self {
                value: T::from_wire(other)?,
                attributes: Vec::new(),
            }),
        }
    }
}

/// Element-by-element reader over a sequence-shaped reply
///
/// Reading past the last element, or past the width of a sub-cursor created
/// with [`WireCursor::take`], fails with [`KvError::Exhausted`].
#[derive(Debug, Clone)]
pub struct WireCursor {
    items: VecDeque<WireValue>,
    position: usize,
    len: usize,
}

impl WireCursor {
    /// Create a cursor over the elements of an Array, Set or Push value
    ///
    /// # Errors
    ///
    /// Returns a decode error for any other shape.
    pub fn new(value: WireValue) -> KvResult<Self> {
        match value.into_primary() {
            WireValue::Array(items) | WireValue::Set(items) | WireValue::Push(items) => {
                Ok(Self::from_items(items))
            }
            other => mismatch("sequence", &other),
        }
    }

    fn from_items(items: impl Into<VecDeque<WireValue>>) -> Self {
        let items = items.into();
        let len = items.len();
        Self {
            items,
            position: 0,
            len,
        }
    }

    fn exhausted(&self) -> KvError {
        KvError::Exhausted {
            position: self.position,
            len: self.len,
        }
    }

    /// Total number of elements covered by this cursor
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the cursor covers no elements at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// Index of the next element
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Borrow the next element without consuming it
    #[must_use]
    pub fn peek(&self) -> Option<&WireValue> {
        self.items.front()
    }

    /// Consume the next element as a raw value
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Exhausted`] when no element is left.
    pub fn next_value(&mut self) -> KvResult<WireValue> {
        let value = self.items.pop_front().ok_or_else(|| self.exhausted())?;
        self.position += 1;
        Ok(value)
    }

    /// Decode the next element as `T`
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Exhausted`] when no element is left, or the
    /// element's decode error.
    #[allow(clippy::should_implement_trait)]
    pub fn next<T: FromWire>(&mut self) -> KvResult<T> {
        T::from_wire(self.next_value()?)
    }

    /// Decode the next element if there is one
    ///
    /// # Errors
    ///
    /// Returns the element's decode error.
    pub fn next_optional<T: FromWire>(&mut self) -> KvResult<Option<T>> {
        if self.items.is_empty() {
            return Ok(None);
        }
        self.next().map(Some)
    }

    /// Skip the next element
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Exhausted`] when no element is left.
    pub fn skip(&mut self) -> KvResult<()> {
        self.next_value().map(|_| ())
    }

    /// Split off the next `width` elements as a fixed-width sub-cursor
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Exhausted`] if fewer than `width` elements remain.
    pub fn take(&mut self, width: usize) -> KvResult<Self> {
        if width > self.items.len() {
            return Err(KvError::Exhausted {
                position: self.position + self.items.len(),
                len: self.len,
            });
        }
        let rest = self.items.split_off(width);
        let taken = std::mem::replace(&mut self.items, rest);
        self.position += width;
        Ok(Self::from_items(taken))
    }

    /// Assert that every element has been consumed
    ///
    /// # Errors
    ///
    /// Returns a decode error naming the first unconsumed element.
    pub fn finish(self) -> KvResult<()> {
        match self.items.front() {
            None => Ok(()),
            Some(extra) => Err(KvError::decode("end of sequence", extra.shape())),
        }
    }
}

impl FromWire for WireCursor {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        Self::new(value)
    }
}
