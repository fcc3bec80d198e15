//! Wire protocol implementation
//!
//! RESP2 and RESP3 share one decoder: every RESP2 reply is also a valid
//! RESP3 frame, apart from the legacy null forms which decode to
//! [`WireValue::Null`](kvwire_core::WireValue::Null).

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_frame, FrameDecoder, Frames};
pub use encoder::FrameEncoder;
pub use kvwire_core::config::ProtocolVersion;
