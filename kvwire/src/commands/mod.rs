//! Command builders
//!
//! Every request is an ordered list of byte strings. [`Cmd`] builds that
//! list; the typed builders in the submodules wrap it behind the [`Command`]
//! trait and decide how their reply is decoded.

pub mod function;
pub mod geo;
pub mod keys;
pub mod list;
pub mod script;

use crate::protocol::FrameEncoder;
use bytes::Bytes;
use kvwire_core::{decode::FromWire, error::KvResult, types::Key, value::WireValue};

pub use function::{
    FCallCommand, FunctionDeleteCommand, FunctionFlushCommand, FunctionInfo, FunctionListCommand,
    FunctionLoadCommand, LibraryInfo,
};
pub use geo::{
    GeoAddCommand, GeoDistCommand, GeoMatch, GeoPosCommand, GeoSearchCommand, GeoUnit,
};
pub use keys::{DelCommand, ExistsCommand};
pub use list::{
    LLenCommand, LMPopCommand, LMoveCommand, LPushCommand, LRangeCommand, ListDirection,
    RPushCommand,
};
pub use script::{
    EvalCommand, EvalShaCommand, ScriptExistsCommand, ScriptFlushCommand, ScriptLoadCommand,
};

/// Conversion into a single command argument
pub trait ToArg {
    /// Render this value as the bytes sent on the wire
    fn to_arg(&self) -> Bytes;
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for Key {
    fn to_arg(&self) -> Bytes {
        self.to_bytes()
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

macro_rules! display_arg {
    ($($ty:ty),+) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )+
    };
}

display_arg!(i32, i64, u8, u16, u32, u64, usize, f64);

/// A command ready to be sent: its name followed by its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Start a command
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append every argument from an iterator
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    /// Append one argument in place
    pub fn push_arg(&mut self, arg: impl ToArg) {
        self.args.push(arg.to_arg());
    }

    /// Command name as sent
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Name and arguments, in wire order
    #[must_use]
    pub fn as_slice(&self) -> &[Bytes] {
        &self.args
    }

    /// Wire form of this command
    #[must_use]
    pub fn encode(&self) -> Bytes {
        FrameEncoder::encode_command(&self.args)
    }
}

/// Shorthand for [`Cmd::new`]
#[must_use]
pub fn cmd(name: &str) -> Cmd {
    Cmd::new(name)
}

/// Trait for typed commands
pub trait Command {
    /// The decoded reply type
    type Output: FromWire;

    /// Get the command name
    fn command_name(&self) -> &'static str;

    /// Get the command arguments, name excluded
    fn args(&self) -> Vec<Bytes>;

    /// Parse the reply into the output type
    fn parse_response(&self, response: WireValue) -> KvResult<Self::Output> {
        response.decode()
    }

    /// Build the wire command
    fn to_cmd(&self) -> Cmd {
        Cmd::new(self.command_name()).args(self.args())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_builder() {
        let cmd = cmd("SET").arg("key").arg(42_i64).arg(1.5_f64);
        assert_eq!(cmd.name(), b"SET");
        assert_eq!(
            cmd.as_slice(),
            &[
                Bytes::from("SET"),
                Bytes::from("key"),
                Bytes::from("42"),
                Bytes::from("1.5")
            ]
        );
    }

    #[test]
    fn test_cmd_args_from_iterator() {
        let keys = vec![Key::from("a"), Key::from("b")];
        let cmd = Cmd::new("DEL").args(&keys);
        assert_eq!(cmd.as_slice().len(), 3);
        assert_eq!(&cmd.encode()[..], b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n");
    }

    #[test]
    fn test_binary_arg_is_untouched() {
        let mut cmd = Cmd::new("SET");
        cmd.push_arg(&b"\x00\xff"[..]);
        assert_eq!(cmd.as_slice()[1], Bytes::from_static(b"\x00\xff"));
    }
}
