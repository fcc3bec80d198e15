//! Core types for the kvwire client
//!
//! This crate provides the transport-free building blocks shared by the
//! kvwire engine: the [`WireValue`] data model, typed reply decoding,
//! the error taxonomy and connection configuration.

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod decode;
pub mod error;
pub mod types;
pub mod value;

pub use config::{
    Address, ConnectionConfig, DecoderLimits, Endpoint, ProtocolVersion, ReconnectConfig,
};
pub use decode::{Attributed, FromWire, WireCursor};
pub use error::{ErrorKind, KvError, KvResult};
pub use types::Key;
pub use value::{Shape, WireValue};
