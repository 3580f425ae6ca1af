//! Protocol endpoints.
//!
//! [`OwnPeer`] is the degenerate local-loopback peer; [`RemotePeer`] is the
//! network-backed endpoint. Both expose the same [`Peer`] contract so local
//! and remote access share one code path, including error shape.

pub mod own;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use netron_common::{
    Callable, ContextObject, Definition, DefinitionId, Result, Value,
};

use crate::events::EventHandler;
use crate::interface::Interface;
use crate::task::{TaskBatch, TaskResults};

pub use own::OwnPeer;
pub use remote::RemotePeer;

pub type PeerId = String;

/// Connection lifecycle of a remote endpoint. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// The endpoint contract shared by the loopback and remote peers.
#[async_trait]
pub trait Peer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Attaches a context on the owning netron. Fails with `Exists` if the
    /// name is already attached.
    async fn attach_context(
        &self,
        instance: Arc<dyn ContextObject>,
        name: Option<&str>,
    ) -> Result<DefinitionId>;

    /// Detaches a context from the owning netron. Fails with `NotExists` if
    /// the name is unknown.
    async fn detach_context(&self, name: &str) -> Result<()>;

    fn has_context(&self, name: &str) -> bool;

    fn has_contexts(&self) -> bool;

    fn context_names(&self) -> Vec<String>;

    /// Definition known to this peer under `name`; `NotExists` otherwise.
    fn context_definition(&self, name: &str) -> Result<Definition>;

    /// Resolves a context name into its memoized interface proxy.
    async fn query_interface(&self, name: &str) -> Result<Arc<Interface>>;

    /// Same, by raw definition id. Fails with `Unknown`/`NotExists` for an
    /// id this peer cannot resolve.
    async fn query_interface_by_definition(&self, def_id: DefinitionId) -> Result<Arc<Interface>>;

    /// Drops a previously queried interface. No-op-safe in the sense that a
    /// repeated release, or a handle this peer never issued, fails with
    /// `NotValid` instead of corrupting the cache.
    async fn release_interface(&self, iface: &Arc<Interface>) -> Result<()>;

    /// Executes one or more tasks against this peer, always answering with
    /// a map keyed by task name.
    async fn run_task(&self, batch: TaskBatch) -> Result<TaskResults>;

    /// Registers a handler for a reserved peer-scoped event
    /// (`peer:connect`, `peer:disconnect`, `context:attach`,
    /// `context:detach`).
    fn subscribe(&self, event: &str, handler: EventHandler);
}

/// Internal routing surface an [`Interface`] calls through. Implemented by
/// both peers; which one an interface holds decides whether a call crosses
/// the wire or loops back locally.
#[async_trait]
pub(crate) trait PeerCall: Send + Sync {
    fn peer_id(&self) -> &str;

    async fn invoke_member(
        &self,
        def_id: DefinitionId,
        member: &str,
        args: Vec<Value>,
        void: bool,
    ) -> Result<Value>;

    async fn get_member(&self, def_id: DefinitionId, member: &str) -> Result<Value>;

    async fn set_member(
        &self,
        def_id: DefinitionId,
        member: &str,
        value: Value,
        void: bool,
    ) -> Result<()>;
}

/// Inbound substitution: how a peer turns wire references back into live
/// proxies bound to itself.
pub(crate) trait Materializer {
    fn resolve(&self, def_id: DefinitionId) -> Result<Arc<Interface>>;

    fn learn(&self, definition: Definition) -> Result<Arc<Interface>>;
}

/// Replaces every embedded `Reference` or bundled `Definition` in an
/// argument or result tree with a freshly materialized interface. This is
/// what enables inversion of control: a callback object passed as an
/// argument becomes a live proxy on the receiving side.
pub(crate) fn materialize(peer: &dyn Materializer, value: Value) -> Result<Value> {
    Ok(match value {
        Value::Reference(reference) => {
            let iface: Arc<dyn Callable> = peer.resolve(reference.def_id)?;
            Value::Iface(iface)
        }
        Value::Definition(definition) => {
            let iface: Arc<dyn Callable> = peer.learn(*definition)?;
            Value::Iface(iface)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| materialize(peer, item))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| Ok((key, materialize(peer, item)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(key, item)| Ok((materialize(peer, key)?, materialize(peer, item)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Set(items) => Value::Set(
            items
                .into_iter()
                .map(|item| materialize(peer, item))
                .collect::<Result<_>>()?,
        ),
        other => other,
    })
}
