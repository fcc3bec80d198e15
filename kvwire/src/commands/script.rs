//! Scripting commands

use super::{Command, ToArg};
use bytes::Bytes;
use kvwire_core::{decode::FromWire, types::Key, value::WireValue};
use std::marker::PhantomData;

fn script_args(head: Bytes, keys: &[Key], args: &[Bytes]) -> Vec<Bytes> {
    let mut out = Vec::with_capacity(2 + keys.len() + args.len());
    out.push(head);
    out.push(keys.len().to_arg());
    out.extend(keys.iter().map(Key::to_bytes));
    out.extend(args.iter().cloned());
    out
}

/// EVAL command - Run a script from its source
pub struct EvalCommand<T = WireValue> {
    script: String,
    keys: Vec<Key>,
    args: Vec<Bytes>,
    _output: PhantomData<fn() -> T>,
}

impl<T> EvalCommand<T> {
    /// Create a new EVAL command
    pub fn new(
        script: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> Self {
        Self {
            script: script.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            args: args.into_iter().map(|a| a.to_arg()).collect(),
            _output: PhantomData,
        }
    }
}

impl<T: FromWire> Command for EvalCommand<T> {
    type Output = T;

    fn command_name(&self) -> &'static str {
        "EVAL"
    }

    fn args(&self) -> Vec<Bytes> {
        script_args(self.script.to_arg(), &self.keys, &self.args)
    }
}

/// EVALSHA command - Run a cached script by its SHA1 digest
pub struct EvalShaCommand<T = WireValue> {
    sha: String,
    keys: Vec<Key>,
    args: Vec<Bytes>,
    _output: PhantomData<fn() -> T>,
}

impl<T> EvalShaCommand<T> {
    /// Create a new EVALSHA command
    pub fn new(
        sha: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> Self {
        Self {
            sha: sha.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            args: args.into_iter().map(|a| a.to_arg()).collect(),
            _output: PhantomData,
        }
    }
}

impl<T: FromWire> Command for EvalShaCommand<T> {
    type Output = T;

    fn command_name(&self) -> &'static str {
        "EVALSHA"
    }

    fn args(&self) -> Vec<Bytes> {
        script_args(self.sha.to_arg(), &self.keys, &self.args)
    }
}

/// SCRIPT LOAD command - Cache a script, returning its SHA1 digest
#[derive(Debug, Clone)]
pub struct ScriptLoadCommand {
    script: String,
}

impl ScriptLoadCommand {
    /// Create a new SCRIPT LOAD command
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl Command for ScriptLoadCommand {
    type Output = String;

    fn command_name(&self) -> &'static str {
        "SCRIPT"
    }

    fn args(&self) -> Vec<Bytes> {
        vec!["LOAD".to_arg(), self.script.to_arg()]
    }
}

/// SCRIPT EXISTS command - Check which digests are cached
#[derive(Debug, Clone)]
pub struct ScriptExistsCommand {
    shas: Vec<String>,
}

impl ScriptExistsCommand {
    /// Create a new SCRIPT EXISTS command
    pub fn new(shas: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            shas: shas.into_iter().map(Into::into).collect(),
        }
    }
}

impl Command for ScriptExistsCommand {
    type Output = Vec<bool>;

    fn command_name(&self) -> &'static str {
        "SCRIPT"
    }

    fn args(&self) -> Vec<Bytes> {
        let mut args = vec!["EXISTS".to_arg()];
        args.extend(self.shas.iter().map(ToArg::to_arg));
        args
    }
}

/// SCRIPT FLUSH command - Drop every cached script
#[derive(Debug, Clone, Default)]
pub struct ScriptFlushCommand;

impl Command for ScriptFlushCommand {
    type Output = ();

    fn command_name(&self) -> &'static str {
        "SCRIPT"
    }

    fn args(&self) -> Vec<Bytes> {
        vec!["FLUSH".to_arg()]
    }
}
