//! Netron Common Types and Packet Channel
//!
//! This crate provides the protocol definitions shared by every endpoint of
//! the netron remote-object system. It contains no remoting logic of its own;
//! the engine lives in the `netron` crate.
//!
//! # Overview
//!
//! Netron lets one process transparently invoke methods, read and write
//! properties, and pass live object references across a connection to another
//! process. This crate defines the pieces both sides of such a connection must
//! agree on:
//!
//! - **Protocol Layer**: the [`Packet`](protocol::Packet) envelope with its
//!   action codes and correlation ids, the self-describing
//!   [`Value`](protocol::Value) data model, definitions and references, and
//!   the wire error descriptor.
//! - **Transport Layer**: the abstract bidirectional packet channel consumed
//!   by the engine, an in-memory duplex pair, and the JSON codec with
//!   length-prefixed framing for byte-stream transports.
//!
//! # Wire Format
//!
//! - **Serialization**: JSON, with every value carrying a type tag
//! - **Framing** (byte-stream transports): `[4-byte length as u32 big-endian] + [JSON data]`
//! - **Max Message Size**: 100 MB (prevents memory exhaustion)

pub mod protocol;
pub mod transport;

pub use protocol::{
    Action, Callable, ContextMeta, ContextObject, CorrelationId, Definition, DefinitionId,
    ErrorDescriptor, MethodMeta, NetronError, Packet, PropertyMeta, PublicMembers, Reference,
    Result, Value,
};
pub use transport::{memory_pair, JsonCodec, PacketDuplex, PacketSink, PacketStream};
