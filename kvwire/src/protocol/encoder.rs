//! Frame encoder
//!
//! Requests always go out as an array of bulk strings. Replies can be any
//! [`WireValue`]; rendering them is only needed by peers and tooling.

use bytes::{BufMut, Bytes, BytesMut};
use kvwire_core::value::WireValue;

const CRLF: &[u8] = b"\r\n";

/// Encodes commands and values into wire bytes
pub struct FrameEncoder;

impl FrameEncoder {
    /// Encode a command (name followed by its arguments)
    #[must_use]
    pub fn encode_command(args: &[Bytes]) -> Bytes {
        let size = args.iter().map(|a| a.len() + 16).sum::<usize>() + 16;
        let mut buf = BytesMut::with_capacity(size);
        Self::encode_command_into(args, &mut buf);
        buf.freeze()
    }

    /// Append an encoded command to `buf`
    pub fn encode_command_into(args: &[Bytes], buf: &mut BytesMut) {
        put_header(buf, b'*', args.len());
        for arg in args {
            put_blob(buf, b'$', arg);
        }
    }

    /// Append the wire form of any value to `buf`
    pub fn encode_value(value: &WireValue, buf: &mut BytesMut) {
        match value {
            WireValue::Null => buf.put_slice(b"_\r\n"),
            WireValue::Boolean(b) => buf.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
            WireValue::Integer(i) => put_line(buf, b':', i.to_string().as_bytes()),
            WireValue::Double(d) => put_line(buf, b',', format_double(*d).as_bytes()),
            WireValue::BigNumber(n) => put_line(buf, b'(', n.as_bytes()),
            WireValue::SimpleString(s) => put_line(buf, b'+', s.as_bytes()),
            WireValue::Error(e) => put_line(buf, b'-', e.as_bytes()),
            WireValue::BulkString(data) => put_blob(buf, b'$', data),
            WireValue::BulkError(e) => put_blob(buf, b'!', e.as_bytes()),
            WireValue::VerbatimString { format, data } => {
                put_header(buf, b'=', format.len() + 1 + data.len());
                buf.put_slice(format.as_bytes());
                buf.put_u8(b':');
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            WireValue::Array(items) => Self::encode_items(buf, b'*', items),
            WireValue::Set(items) => Self::encode_items(buf, b'~', items),
            WireValue::Push(items) => Self::encode_items(buf, b'>', items),
            WireValue::Map(pairs) => Self::encode_pairs(buf, b'%', pairs),
            WireValue::Attribute { attributes, value } => {
                Self::encode_pairs(buf, b'|', attributes);
                Self::encode_value(value, buf);
            }
        }
    }

    /// Encode a value into a fresh buffer
    #[must_use]
    pub fn to_bytes(value: &WireValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_value(value, &mut buf);
        buf.freeze()
    }

    fn encode_items(buf: &mut BytesMut, tag: u8, items: &[WireValue]) {
        put_header(buf, tag, items.len());
        for item in items {
            Self::encode_value(item, buf);
        }
    }

    fn encode_pairs(buf: &mut BytesMut, tag: u8, pairs: &[(WireValue, WireValue)]) {
        put_header(buf, tag, pairs.len());
        for (key, value) in pairs {
            Self::encode_value(key, buf);
            Self::encode_value(value, buf);
        }
    }
}

fn put_line(buf: &mut BytesMut, tag: u8, line: &[u8]) {
    buf.put_u8(tag);
    buf.put_slice(line);
    buf.put_slice(CRLF);
}

fn put_header(buf: &mut BytesMut, tag: u8, len: usize) {
    put_line(buf, tag, len.to_string().as_bytes());
}

fn put_blob(buf: &mut BytesMut, tag: u8, data: &[u8]) {
    put_header(buf, tag, data.len());
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "nan".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        d.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let encoded = FrameEncoder::encode_command(&[
            Bytes::from("SET"),
            Bytes::from("key"),
            Bytes::from("value"),
        ]);
        assert_eq!(
            &encoded[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_encode_command_binary_and_empty_args() {
        let encoded =
            FrameEncoder::encode_command(&[Bytes::from("ECHO"), Bytes::from_static(b"\r\n\0")]);
        assert_eq!(&encoded[..], b"*2\r\n$4\r\nECHO\r\n$3\r\n\r\n\0\r\n");

        let encoded = FrameEncoder::encode_command(&[Bytes::from("GET"), Bytes::new()]);
        assert_eq!(&encoded[..], b"*2\r\n$3\r\nGET\r\n$0\r\n\r\n");
    }

    #[test]
    fn test_encode_command_into_appends() {
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
        FrameEncoder::encode_command_into(&[Bytes::from("PING")], &mut buf);
        assert_eq!(&buf[..], b"+OK\r\n*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_encode_resp3_values() {
        assert_eq!(&FrameEncoder::to_bytes(&WireValue::Null)[..], b"_\r\n");
        assert_eq!(&FrameEncoder::to_bytes(&WireValue::Boolean(true))[..], b"#t\r\n");
        assert_eq!(&FrameEncoder::to_bytes(&WireValue::Double(1.5))[..], b",1.5\r\n");
        assert_eq!(
            &FrameEncoder::to_bytes(&WireValue::Double(f64::INFINITY))[..],
            b",inf\r\n"
        );
        assert_eq!(
            &FrameEncoder::to_bytes(&WireValue::BulkError("ERR x".into()))[..],
            b"!5\r\nERR x\r\n"
        );
        assert_eq!(
            &FrameEncoder::to_bytes(&WireValue::VerbatimString {
                format: "txt".into(),
                data: Bytes::from("hi"),
            })[..],
            b"=6\r\ntxt:hi\r\n"
        );
        assert_eq!(
            &FrameEncoder::to_bytes(&WireValue::Map(vec![(
                WireValue::SimpleString("a".into()),
                WireValue::Integer(1)
            )]))[..],
            b"%1\r\n+a\r\n:1\r\n"
        );
    }

    #[test]
    fn test_encode_attribute_precedes_value() {
        let value = WireValue::Attribute {
            attributes: vec![(WireValue::SimpleString("ttl".into()), WireValue::Integer(3))],
            value: Box::new(WireValue::SimpleString("OK".into())),
        };
        assert_eq!(
            &FrameEncoder::to_bytes(&value)[..],
            b"|1\r\n+ttl\r\n:3\r\n+OK\r\n"
        );
    }
}
