//! Netron Remote-Object Engine
//!
//! A peer-to-peer remoting layer: one process attaches application objects
//! ("contexts") to a [`Netron`] coordinator, and any connected peer can
//! transparently invoke their methods, read and write their properties, and
//! pass live object references back and forth — including inversion of
//! control, where a callback object handed over as an argument becomes a
//! live proxy that calls back into the originating process.
//!
//! # Architecture
//!
//! - [`Netron`] owns the attached contexts, the known peers and the stub
//!   table, and exposes its [`OwnPeer`](peer::OwnPeer) as a degenerate
//!   loopback peer so local and remote access share one code path.
//! - [`StubManager`](stub::StubManager) maps definition ids to live
//!   instances and tracks per-peer reference counts; weak contexts are
//!   collected when their last holder releases them.
//! - [`Interface`](interface::Interface) is the table-dispatched proxy a
//!   consumer calls through; member validation happens locally against the
//!   bound definition before a packet is sent.
//! - The task subsystem ([`task`]) carries bootstrap negotiation and
//!   batched ad-hoc procedures over the same channel.
//!
//! Transports are external collaborators: the engine consumes one abstract
//! bidirectional packet channel per peer (see `netron_common::transport`).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use netron::{Netron, NetronOptions, Peer};
//! use netron_common::{ContextMeta, ContextObject, PublicMembers, Result, Value};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl ContextObject for Greeter {
//!     fn meta(&self) -> ContextMeta {
//!         ContextMeta::new("Greeter", PublicMembers::new().method("hello"))
//!     }
//!
//!     async fn invoke(&self, _member: &str, _args: Vec<Value>) -> Result<Value> {
//!         Ok(Value::str("hello"))
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let netron = Netron::new(NetronOptions::default());
//! netron.attach_context(Arc::new(Greeter), None).await?;
//!
//! let peer = netron.own_peer();
//! let greeter = peer.query_interface("Greeter").await?;
//! let greeting = greeter.call("hello", vec![]).await?;
//! assert_eq!(greeting, Value::str("hello"));
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod interface;
pub mod netron;
pub mod options;
pub mod peer;
pub mod reflection;
pub mod stub;
pub mod task;
pub mod uid;

pub use events::{EventHandler, CONTEXT_ATTACH, CONTEXT_DETACH, PEER_CONNECT, PEER_DISCONNECT};
pub use interface::Interface;
pub use netron::Netron;
pub use options::{NetronOptions, DEFAULT_RESPONSE_TIMEOUT};
pub use peer::{ConnectionState, OwnPeer, Peer, PeerId, RemotePeer};
pub use reflection::{ObjectContext, Reflection, ReflectionResult};
pub use stub::{Stub, StubManager};
pub use task::{
    Task, TaskBatch, TaskManager, TaskOutcome, TaskRegistration, TaskResults, TaskSpec,
};
pub use uid::{FastUniqueId, IdSequence, LongUniqueId};
