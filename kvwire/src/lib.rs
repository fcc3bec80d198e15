//! Async RESP3 client engine for Rust
//!
//! `kvwire` speaks the RESP3 wire protocol (with RESP2 fallback) to a
//! key-value server over a single multiplexed connection. Any number of
//! tasks can issue commands concurrently; replies are matched to requests
//! strictly in the order the requests were written.
//!
//! # Features
//!
//! - Incremental frame decoder covering every RESP3 type, attributes included
//! - FIFO command pipeline on one connection
//! - Typed reply decoding through [`FromWire`]
//! - Out-of-band push messages delivered on their own stream
//! - TCP, Unix socket and Sentinel-resolved addresses
//! - Optional reconnect with backoff
//!
//! # Quick Start
//!
//! ```no_run
//! use kvwire::{Client, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379");
//!     let client = Client::connect(config).await?;
//!
//!     client.lpush("tasks", ["first", "second"]).await?;
//!     let len = client.llen("tasks").await?;
//!     println!("Length: {}", len);
//!
//!     let reply: Option<String> = client.query(kvwire::cmd("GET").arg("missing")).await?;
//!     assert!(reply.is_none());
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod commands;
pub mod connection;
pub mod pipeline;
pub mod protocol;
pub mod script;
pub mod sentinel;

pub use client::{Client, PushStream};
pub use commands::{cmd, Cmd, Command, ToArg};
pub use connection::{Connection, ConnectionDriver, ConnectionState};
pub use pipeline::{CommandPipeline, ResponseHandle};
pub use protocol::{FrameDecoder, FrameEncoder};
pub use script::Script;

pub use kvwire_core::{
    Address, Attributed, ConnectionConfig, DecoderLimits, Endpoint, ErrorKind, FromWire, Key,
    KvError, KvResult, ProtocolVersion, ReconnectConfig, Shape, WireCursor, WireValue,
};
