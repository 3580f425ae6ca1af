//! Netron Transport Layer
//!
//! The engine never dials or accepts connections itself: session
//! establishment belongs to an external transport collaborator, which hands
//! the engine one bidirectional packet channel per peer. This module defines
//! that channel, an in-memory duplex pair for tests and local wiring, and
//! the JSON codec with length-prefixed framing a byte-stream transport can
//! build on.
//!
//! # Wire Format (byte-stream transports)
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON data]`, capped at
//! 100 MB per message to prevent memory exhaustion.

pub mod channel;
pub mod codec;


pub use channel::{memory_pair, PacketDuplex, PacketSink, PacketStream};
pub use codec::JsonCodec;
