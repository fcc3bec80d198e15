//! Server-side function commands
//!
//! Libraries are opaque to the client: it loads their source, lists what the
//! server reports about them and calls functions by name.

use super::{Command, ToArg};
use bytes::Bytes;
use kvwire_core::{
    decode::FromWire,
    error::{KvError, KvResult},
    types::Key,
    value::{Shape, WireValue},
};
use std::collections::HashMap;
use std::marker::PhantomData;

/// A function as reported by `FUNCTION LIST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Function name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Flags such as `no-writes`
    pub flags: Vec<String>,
}

/// A library as reported by `FUNCTION LIST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    /// Library name
    pub library_name: String,
    /// Engine the library runs on
    pub engine: String,
    /// Functions the library registers
    pub functions: Vec<FunctionInfo>,
    /// Source code, with `WITHCODE`
    pub library_code: Option<String>,
}

impl LibraryInfo {
    /// Look up a function by name
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Field map of a map reply, or of a flat RESP2 `[name, value, ...]` array
fn fields(value: WireValue, what: &'static str) -> KvResult<HashMap<String, WireValue>> {
    match value.primary().shape() {
        Shape::Map | Shape::Array => value.decode(),
        shape => Err(KvError::decode(what, shape)),
    }
}

fn take_field<T: FromWire>(fields: &mut HashMap<String, WireValue>, name: &str) -> KvResult<T> {
    fields.remove(name).unwrap_or(WireValue::Null).decode()
}

impl FromWire for FunctionInfo {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        let mut fields = fields(value, "function description")?;
        Ok(Self {
            name: take_field(&mut fields, "name")?,
            description: take_field(&mut fields, "description")?,
            flags: take_field::<Option<Vec<String>>>(&mut fields, "flags")?.unwrap_or_default(),
        })
    }
}

impl FromWire for LibraryInfo {
    fn from_wire(value: WireValue) -> KvResult<Self> {
        let mut fields = fields(value, "library description")?;
        Ok(Self {
            library_name: take_field(&mut fields, "library_name")?,
            engine: take_field(&mut fields, "engine")?,
            functions: take_field(&mut fields, "functions")?,
            library_code: take_field(&mut fields, "library_code")?,
        })
    }
}

/// FUNCTION LOAD command - Load a library, returning its name
#[derive(Debug, Clone)]
pub struct FunctionLoadCommand {
    code: String,
    replace: bool,
}

impl FunctionLoadCommand {
    /// Create a new FUNCTION LOAD command
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            replace: false,
        }
    }

    /// Replace an existing library of the same name
    #[must_use]
    pub const fn replace(mut self) -> Self {
        self.replace = true;
        self
    }
}

impl Command for FunctionLoadCommand {
    type Output = String;

    fn command_name(&self) -> &'static str {
        "FUNCTION"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec!["LOAD".to_arg()];
        if self.replace {
            args.push("REPLACE".to_arg());
        }
        args.push(self.code.to_arg());
        args
    }
}

/// FUNCTION LIST command - Describe loaded libraries
#[derive(Debug, Clone, Default)]
pub struct FunctionListCommand {
    pattern: Option<String>,
    with_code: bool,
}

impl FunctionListCommand {
    /// Create a new FUNCTION LIST command covering every library
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only list libraries whose name matches `pattern`
    #[must_use]
    pub fn library_name(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Include each library's source code
    #[must_use]
    pub const fn with_code(mut self) -> Self {
        self.with_code = true;
        self
    }
}

impl Command for FunctionListCommand {
    type Output = Vec<LibraryInfo>;

    fn command_name(&self) -> &'static str {
        "FUNCTION"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec!["LIST".to_arg()];
        if let Some(pattern) = &self.pattern {
            args.push("LIBRARYNAME".to_arg());
            args.push(pattern.to_arg());
        }
        if self.with_code {
            args.push("WITHCODE".to_arg());
        }
        args
    }
}

/// FUNCTION DELETE command - Remove a library
#[derive(Debug, Clone)]
pub struct FunctionDeleteCommand {
    library: String,
}

impl FunctionDeleteCommand {
    /// Create a new FUNCTION DELETE command
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
        }
    }
}

impl Command for FunctionDeleteCommand {
    type Output = ();

    fn command_name(&self) -> &'static str {
        "FUNCTION"
    }

    fn args(&self) -> Vec<Bytes> {
        vec!["DELETE".to_arg(), self.library.to_arg()]
    }
}

/// FUNCTION FLUSH command - Remove every library
#[derive(Debug, Clone, Default)]
pub struct FunctionFlushCommand;

impl Command for FunctionFlushCommand {
    type Output = ();

    fn command_name(&self) -> &'static str {
        "FUNCTION"
    }

    fn args(&self) -> Vec<Bytes> {
        vec!["FLUSH".to_arg()]
    }
}

/// FCALL command - Invoke a loaded function
pub struct FCallCommand<T = WireValue> {
    function: String,
    keys: Vec<Key>,
    args: Vec<Bytes>,
    _output: PhantomData<fn() -> T>,
}

impl<T> FCallCommand<T> {
    /// Create a new FCALL command
    pub fn new(
        function: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> Self {
        Self {
            function: function.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            args: args.into_iter().map(|a| a.to_arg()).collect(),
            _output: PhantomData,
        }
    }
}

impl<T: FromWire> Command for FCallCommand<T> {
    type Output = T;

    fn command_name(&self) -> &'static str {
        "FCALL"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = Vec::with_capacity(2 + self.keys.len() + self.args.len());
        args.push(self.function.to_arg());
        args.push(self.keys.len().to_arg());
        args.extend(self.keys.iter().map(Key::to_bytes));
        args.extend(self.args.iter().cloned());
        args
    }
}
