//! Incremental RESP2/RESP3 frame decoder
//!
//! The decoder owns an append-only read buffer. [`FrameDecoder::next_frame`]
//! parses one complete top-level reply from the front of the buffer; when the
//! buffer holds only part of a frame it reports `Ok(None)` and leaves every
//! byte in place, so the same parse is retried once more data arrives.

use bytes::{Buf, BytesMut};
use kvwire_core::{
    config::DecoderLimits,
    error::{KvError, KvResult},
    value::WireValue,
};
use std::io::Cursor;

/// Initial read buffer capacity
const INITIAL_CAPACITY: usize = 8192;

/// Unwrap a parse step, or report "need more data" to the caller
macro_rules! ready {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

/// Decodes a byte stream into [`WireValue`]s
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    limits: DecoderLimits,
    poisoned: Option<String>,
}

impl FrameDecoder {
    /// Create a decoder with default limits
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DecoderLimits::default())
    }

    /// Create a decoder with explicit limits
    #[must_use]
    pub fn with_limits(limits: DecoderLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            limits,
            poisoned: None,
        }
    }

    /// The read buffer, for `AsyncReadExt::read_buf`
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a complete frame
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a whole frame.
    /// A framing error is sticky: once returned, every later call returns it
    /// again, because no byte after a framing error can be trusted.
    pub fn next_frame(&mut self) -> KvResult<Option<WireValue>> {
        if let Some(reason) = &self.poisoned {
            return Err(KvError::Protocol(reason.clone()));
        }

        match decode_frame(&self.buffer, &self.limits) {
            Ok(Some((value, consumed))) => {
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                if let KvError::Protocol(reason) = &e {
                    self.poisoned = Some(reason.clone());
                }
                Err(e)
            }
        }
    }

    /// Iterate over every complete frame currently buffered
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            decoder: self,
            failed: false,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`FrameDecoder::frames`]
///
/// Ends when the buffer runs out of complete frames, or right after
/// yielding a framing error.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = KvResult<WireValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.decoder.next_frame() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode one frame from the front of `buf`
///
/// Returns the value and the number of bytes it occupied, or `Ok(None)` if
/// `buf` ends before the frame does.
pub fn decode_frame(buf: &[u8], limits: &DecoderLimits) -> KvResult<Option<(WireValue, usize)>> {
    let mut parser = Parser {
        cursor: Cursor::new(buf),
        limits,
    };
    let value = ready!(parser.parse_value(0));
    let consumed = parser.cursor.position() as usize;
    Ok(Some((value, consumed)))
}

struct Parser<'a> {
    cursor: Cursor<&'a [u8]>,
    limits: &'a DecoderLimits,
}

impl<'a> Parser<'a> {
    fn parse_value(&mut self, depth: usize) -> KvResult<Option<WireValue>> {
        if !self.cursor.has_remaining() {
            return Ok(None);
        }

        let type_byte = self.cursor.get_u8();
        match type_byte {
            b'+' => self.parse_simple_string(),
            b'-' => self.parse_error(),
            b':' => self.parse_integer(),
            b'$' => self.parse_bulk_string(),
            b'*' => self.parse_array(depth),
            b'_' => self.parse_null(),
            b'#' => self.parse_boolean(),
            b',' => self.parse_double(),
            b'(' => self.parse_big_number(),
            b'!' => self.parse_bulk_error(),
            b'=' => self.parse_verbatim_string(),
            b'%' => self.parse_map(depth),
            b'~' => self.parse_set(depth),
            b'>' => self.parse_push(depth),
            b'|' => self.parse_attribute(depth),
            _ => Err(KvError::Protocol(format!(
                "Unknown type byte: 0x{type_byte:02x}"
            ))),
        }
    }

    /// Read up to the next CRLF, positioned after it
    fn read_line(&mut self) -> KvResult<Option<&'a [u8]>> {
        let start = self.cursor.position() as usize;
        let data: &'a [u8] = *self.cursor.get_ref();
        let Some(offset) = data[start..].windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        let end = start + offset;
        self.cursor.set_position((end + 2) as u64);
        Ok(Some(&data[start..end]))
    }

    fn read_text(&mut self, what: &str) -> KvResult<Option<&'a str>> {
        let line = ready!(self.read_line());
        std::str::from_utf8(line)
            .map(Some)
            .map_err(|e| KvError::Protocol(format!("Invalid UTF-8 in {what}: {e}")))
    }

    /// Read a length header. `-1` is returned as `None` inside `Some` for the
    /// RESP2 null forms when `allow_null` is set.
    fn read_length(&mut self, what: &str, allow_null: bool) -> KvResult<Option<Option<usize>>> {
        let line = ready!(self.read_text(what));
        if allow_null && line == "-1" {
            return Ok(Some(None));
        }
        let len = line
            .parse::<usize>()
            .map_err(|_| KvError::Protocol(format!("Invalid {what} length: {line:?}")))?;
        Ok(Some(Some(len)))
    }

    fn read_payload(&mut self, what: &str, len: usize) -> KvResult<Option<&'a [u8]>> {
        if len > self.limits.max_bulk_len {
            return Err(KvError::Protocol(format!(
                "{what} length {len} exceeds limit {}",
                self.limits.max_bulk_len
            )));
        }
        if self.cursor.remaining() < len + 2 {
            return Ok(None);
        }
        let start = self.cursor.position() as usize;
        let data: &'a [u8] = *self.cursor.get_ref();
        if &data[start + len..start + len + 2] != b"\r\n" {
            return Err(KvError::Protocol(format!("Missing {what} terminator")));
        }
        self.cursor.advance(len + 2);
        Ok(Some(&data[start..start + len]))
    }

    fn check_aggregate(&self, what: &str, len: usize, depth: usize) -> KvResult<()> {
        if depth >= self.limits.max_depth {
            return Err(KvError::Protocol(format!(
                "Nesting deeper than {} levels",
                self.limits.max_depth
            )));
        }
        if len > self.limits.max_collection_len {
            return Err(KvError::Protocol(format!(
                "{what} of {len} elements exceeds limit {}",
                self.limits.max_collection_len
            )));
        }
        Ok(())
    }

    /// Capacity hint that a hostile length header cannot blow up
    fn capacity_hint(&self, len: usize) -> usize {
        // Each element takes at least three bytes (tag + CRLF)
        len.min(self.cursor.remaining() / 3)
    }

    fn parse_simple_string(&mut self) -> KvResult<Option<WireValue>> {
        let line = ready!(self.read_text("simple string"));
        Ok(Some(WireValue::SimpleString(line.to_string())))
    }

    fn parse_error(&mut self) -> KvResult<Option<WireValue>> {
        let line = ready!(self.read_line());
        Ok(Some(WireValue::Error(
            String::from_utf8_lossy(line).into_owned(),
        )))
    }

    fn parse_integer(&mut self) -> KvResult<Option<WireValue>> {
        let line = ready!(self.read_text("integer"));
        let num = line
            .parse::<i64>()
            .map_err(|_| KvError::Protocol(format!("Invalid integer: {line:?}")))?;
        Ok(Some(WireValue::Integer(num)))
    }

    fn parse_bulk_string(&mut self) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("bulk string", true)) else {
            return Ok(Some(WireValue::Null));
        };
        let data = ready!(self.read_payload("bulk string", len));
        Ok(Some(WireValue::BulkString(bytes::Bytes::copy_from_slice(
            data,
        ))))
    }

    fn parse_null(&mut self) -> KvResult<Option<WireValue>> {
        let line = ready!(self.read_line());
        if line.is_empty() {
            Ok(Some(WireValue::Null))
        } else {
            Err(KvError::Protocol("Invalid null format".to_string()))
        }
    }

    fn parse_boolean(&mut self) -> KvResult<Option<WireValue>> {
        match ready!(self.read_line()) {
            b"t" => Ok(Some(WireValue::Boolean(true))),
            b"f" => Ok(Some(WireValue::Boolean(false))),
            other => Err(KvError::Protocol(format!(
                "Invalid boolean: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn parse_double(&mut self) -> KvResult<Option<WireValue>> {
        let line = ready!(self.read_text("double"));
        let num = line
            .parse::<f64>()
            .map_err(|_| KvError::Protocol(format!("Invalid double: {line:?}")))?;
        Ok(Some(WireValue::Double(num)))
    }

    fn parse_big_number(&mut self) -> KvResult<Option<WireValue>> {
        let line = ready!(self.read_text("big number"));
        let digits = line.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(line);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KvError::Protocol(format!("Invalid big number: {line:?}")));
        }
        Ok(Some(WireValue::BigNumber(line.to_string())))
    }

    fn parse_bulk_error(&mut self) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("bulk error", false)) else {
            return Err(KvError::Protocol("Invalid bulk error length".to_string()));
        };
        let data = ready!(self.read_payload("bulk error", len));
        Ok(Some(WireValue::BulkError(
            String::from_utf8_lossy(data).into_owned(),
        )))
    }

    fn parse_verbatim_string(&mut self) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("verbatim string", false)) else {
            return Err(KvError::Protocol("Invalid verbatim string length".to_string()));
        };
        let data = ready!(self.read_payload("verbatim string", len));
        if data.len() < 4 || data[3] != b':' {
            return Err(KvError::Protocol(
                "Invalid verbatim string format".to_string(),
            ));
        }
        Ok(Some(WireValue::VerbatimString {
            format: String::from_utf8_lossy(&data[..3]).into_owned(),
            data: bytes::Bytes::copy_from_slice(&data[4..]),
        }))
    }

    fn parse_elements(
        &mut self,
        what: &str,
        len: usize,
        depth: usize,
    ) -> KvResult<Option<Vec<WireValue>>> {
        self.check_aggregate(what, len, depth)?;
        let mut items = Vec::with_capacity(self.capacity_hint(len));
        for _ in 0..len {
            items.push(ready!(self.parse_value(depth + 1)));
        }
        Ok(Some(items))
    }

    fn parse_pairs(
        &mut self,
        what: &str,
        len: usize,
        depth: usize,
    ) -> KvResult<Option<Vec<(WireValue, WireValue)>>> {
        self.check_aggregate(what, len.saturating_mul(2), depth)?;
        let mut pairs = Vec::with_capacity(self.capacity_hint(len));
        for _ in 0..len {
            let key = ready!(self.parse_value(depth + 1));
            let value = ready!(self.parse_value(depth + 1));
            pairs.push((key, value));
        }
        Ok(Some(pairs))
    }

    fn parse_array(&mut self, depth: usize) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("array", true)) else {
            return Ok(Some(WireValue::Null));
        };
        let items = ready!(self.parse_elements("array", len, depth));
        Ok(Some(WireValue::Array(items)))
    }

    fn parse_set(&mut self, depth: usize) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("set", false)) else {
            return Err(KvError::Protocol("Invalid set length".to_string()));
        };
        let items = ready!(self.parse_elements("set", len, depth));
        Ok(Some(WireValue::Set(items)))
    }

    fn parse_push(&mut self, depth: usize) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("push", false)) else {
            return Err(KvError::Protocol("Invalid push length".to_string()));
        };
        let items = ready!(self.parse_elements("push", len, depth));
        Ok(Some(WireValue::Push(items)))
    }

    fn parse_map(&mut self, depth: usize) -> KvResult<Option<WireValue>> {
        let Some(len) = ready!(self.read_length("map", false)) else {
            return Err(KvError::Protocol("Invalid map length".to_string()));
        };
        let pairs = ready!(self.parse_pairs("map", len, depth));
        Ok(Some(WireValue::Map(pairs)))
    }

    fn parse_attribute(&mut self, depth: usize) -> KvResult<Option<WireValue>> {
        let mut attributes = Vec::new();
        // Chained attribute maps all describe the value that follows them.
        // They are folded in a loop so a long chain cannot grow the stack.
        loop {
            let Some(len) = ready!(self.read_length("attribute", false)) else {
                return Err(KvError::Protocol("Invalid attribute length".to_string()));
            };
            attributes.extend(ready!(self.parse_pairs("attribute", len, depth)));
            if attributes.len() > self.limits.max_collection_len {
                return Err(KvError::Protocol(format!(
                    "attribute chain of {} pairs exceeds limit {}",
                    attributes.len(),
                    self.limits.max_collection_len
                )));
            }
            if self.cursor.chunk().first() == Some(&b'|') {
                self.cursor.advance(1);
            } else {
                break;
            }
        }
        let value = Box::new(ready!(self.parse_value(depth)));
        Ok(Some(WireValue::Attribute { attributes, value }))
    }
}
