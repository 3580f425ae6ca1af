//! The coordinator: owns the set of locally attached contexts and the set
//! of known peers, and exposes the loopback peer so local and remote access
//! share one code path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::SystemTime;

use netron_common::{
    ContextObject, Definition, DefinitionId, NetronError, PacketDuplex, Reference, Result, Value,
};
use tracing::{debug, info};

use crate::events::{
    EventEmitter, EventHandler, CONTEXT_ATTACH, CONTEXT_DETACH, PEER_CONNECT, PEER_DISCONNECT,
};
use crate::interface::Interface;
use crate::options::NetronOptions;
use crate::peer::{ConnectionState, OwnPeer, Peer, PeerId, RemotePeer};
use crate::reflection::{ObjectContext, Reflection};
use crate::stub::StubManager;
use crate::task::{TaskBatch, TaskManager, TaskRegistration, TaskSpec, TASK_GET_CONFIG, TASK_GET_CONTEXT_DEFS};

pub struct Netron {
    id: PeerId,
    options: NetronOptions,
    self_ref: Weak<Netron>,
    /// Name of every locally attached context, mapped to its definition id.
    /// Stays consistent with the stub table: every attached context has
    /// exactly one stub and vice versa.
    contexts: RwLock<HashMap<String, DefinitionId>>,
    peers: RwLock<HashMap<PeerId, Arc<RemotePeer>>>,
    own_peer: OnceLock<Arc<OwnPeer>>,
    stub_manager: StubManager,
    task_manager: TaskManager,
    events: EventEmitter,
}

impl Netron {
    pub fn new(options: NetronOptions) -> Arc<Self> {
        let id = options.id.clone().unwrap_or_else(generate_peer_id);
        let netron = Arc::new_cyclic(|self_ref| Self {
            id,
            options,
            self_ref: self_ref.clone(),
            contexts: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            own_peer: OnceLock::new(),
            stub_manager: StubManager::new(),
            task_manager: TaskManager::new(),
            events: EventEmitter::new(),
        });
        let own = OwnPeer::new(netron.id.clone(), netron.self_ref.clone());
        let _ = netron.own_peer.set(own);
        info!(id = %netron.id, "netron created");
        netron
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &NetronOptions {
        &self.options
    }

    pub fn own_peer(&self) -> Arc<OwnPeer> {
        self.own_peer
            .get()
            .expect("own peer installed at construction")
            .clone()
    }

    pub(crate) fn stub_manager(&self) -> &StubManager {
        &self.stub_manager
    }

    pub(crate) fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    /// Registers a handler for the local view of the reserved events.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.events.on(event, handler);
    }

    /// Registers a custom task for remote peers to run against this netron.
    pub fn add_task(&self, registration: TaskRegistration) -> Result<()> {
        self.task_manager.register(registration)
    }

    // ------------------------------------------------------------------
    // Contexts
    // ------------------------------------------------------------------

    /// Attaches a context instance under `name` (or its own declared name),
    /// making it invocable by every connected peer.
    pub async fn attach_context(
        &self,
        instance: Arc<dyn ContextObject>,
        name: Option<&str>,
    ) -> Result<DefinitionId> {
        let reflection = Reflection::inspect(&instance, name)?;
        let definition = {
            let mut contexts = self.contexts.write().expect("context table poisoned");
            if contexts.contains_key(&reflection.name) {
                return Err(NetronError::Exists(format!(
                    "context '{}'",
                    reflection.name
                )));
            }
            let stub = self.stub_manager.create_stub(reflection, instance);
            let definition = stub.definition().clone();
            contexts.insert(definition.name.clone(), definition.id);
            definition
        };
        let def_id = definition.id;
        info!(context = %definition.name, def_id, "context attached");
        self.emit_event(
            CONTEXT_ATTACH,
            Value::object([
                ("name".to_string(), Value::str(definition.name.clone())),
                (
                    "definition".to_string(),
                    Value::Definition(Box::new(definition)),
                ),
            ]),
        )
        .await;
        Ok(def_id)
    }

    /// Detaches a context by name, invalidating every outstanding remote
    /// interface for it: subsequent calls fail with `NotExists`.
    pub async fn detach_context(&self, name: &str) -> Result<()> {
        let def_id = self
            .contexts
            .write()
            .expect("context table poisoned")
            .remove(name)
            .ok_or_else(|| NetronError::NotExists(format!("context '{}'", name)))?;
        self.stub_manager.remove_stub(def_id);
        info!(context = %name, def_id, "context detached");
        self.emit_event(
            CONTEXT_DETACH,
            Value::object([
                ("name".to_string(), Value::str(name)),
                ("defId".to_string(), Value::Int(def_id as i64)),
            ]),
        )
        .await;
        Ok(())
    }

    pub async fn detach_all_contexts(&self) -> Result<()> {
        let names = self.context_names();
        for name in names {
            self.detach_context(&name).await?;
        }
        Ok(())
    }

    /// Number of live stubs, strong and weak.
    pub fn stub_count(&self) -> usize {
        self.stub_manager.stub_count()
    }

    pub fn has_context(&self, name: &str) -> bool {
        self.contexts
            .read()
            .expect("context table poisoned")
            .contains_key(name)
    }

    pub fn has_contexts(&self) -> bool {
        !self
            .contexts
            .read()
            .expect("context table poisoned")
            .is_empty()
    }

    pub fn context_names(&self) -> Vec<String> {
        self.contexts
            .read()
            .expect("context table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn context_definition(&self, name: &str) -> Result<Definition> {
        let def_id = self
            .contexts
            .read()
            .expect("context table poisoned")
            .get(name)
            .copied()
            .ok_or_else(|| NetronError::NotExists(format!("context '{}'", name)))?;
        Ok(self.stub_manager.get_stub(def_id)?.definition().clone())
    }

    /// Map of currently attached context name to definition, as the
    /// `netronGetContextDefs` bootstrap task reports it.
    pub(crate) fn context_definitions_value(&self) -> Value {
        let names = self.context_names();
        let mut map = BTreeMap::new();
        for name in names {
            if let Ok(definition) = self.context_definition(&name) {
                map.insert(name, Value::Definition(Box::new(definition)));
            }
        }
        Value::Object(map)
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    /// With no id, the loopback peer; with this netron's own id, the same;
    /// with a known remote id, that peer; anything else is `Unknown`,
    /// including another netron's own-peer id.
    pub fn get_peer(&self, id: Option<&str>) -> Result<Arc<dyn Peer>> {
        match id {
            None => Ok(self.own_peer()),
            Some(id) if id == self.id => Ok(self.own_peer()),
            Some(id) => self
                .peers
                .read()
                .expect("peer table poisoned")
                .get(id)
                .cloned()
                .map(|peer| -> Arc<dyn Peer> { peer })
                .ok_or_else(|| NetronError::Unknown(format!("peer '{}'", id))),
        }
    }

    /// Reverse-maps an interface back to the peer that issued it. Fails
    /// with `NotValid` for a handle no peer of this netron knows.
    pub fn get_peer_for_interface(&self, iface: &Arc<Interface>) -> Result<Arc<dyn Peer>> {
        let peer_id = iface.peer_id();
        if peer_id == self.id {
            let own = self.own_peer();
            if own.holds_interface(iface) {
                return Ok(own);
            }
        } else if let Some(peer) = self
            .peers
            .read()
            .expect("peer table poisoned")
            .get(&peer_id)
            .cloned()
        {
            if peer.holds_interface(iface) {
                return Ok(peer);
            }
        }
        Err(NetronError::NotValid("not a known interface".into()))
    }

    /// Invoked by the transport collaborator once a connection to `id` is
    /// established. Runs the bootstrap task exchange against the new peer
    /// before it is considered usable, then emits `peer:connect`.
    pub async fn add_peer(
        &self,
        id: impl Into<String>,
        duplex: PacketDuplex,
    ) -> Result<Arc<RemotePeer>> {
        let id = id.into();
        if id == self.id
            || self
                .peers
                .read()
                .expect("peer table poisoned")
                .contains_key(&id)
        {
            return Err(NetronError::Exists(format!("peer '{}'", id)));
        }

        let (sink, stream) = duplex.split();
        let peer = RemotePeer::new(
            self.self_ref.clone(),
            id.clone(),
            sink,
            self.options.response_timeout,
        );
        peer.clone().spawn_reader(stream);

        let bootstrap = TaskBatch::from(vec![
            TaskSpec::new(TASK_GET_CONFIG),
            TaskSpec::new(TASK_GET_CONTEXT_DEFS),
        ]);
        match peer.run_task(bootstrap).await {
            Ok(results) => peer.apply_bootstrap(&results)?,
            Err(err) => {
                peer.disconnect();
                return Err(err);
            }
        }

        peer.set_state(ConnectionState::Connected);
        self.peers
            .write()
            .expect("peer table poisoned")
            .insert(id.clone(), peer.clone());
        info!(peer = %id, "peer connected");

        let payload = Value::object([("id".to_string(), Value::str(id))]);
        self.events.emit(PEER_CONNECT, &payload);
        peer.events().emit(PEER_CONNECT, &payload);
        Ok(peer)
    }

    /// Invoked by the transport collaborator (or the reader task) when a
    /// connection goes away. Drains the peer, drops its holds, and emits
    /// `peer:disconnect`.
    pub async fn delete_peer(&self, id: &str) -> Result<()> {
        let peer = self
            .peers
            .write()
            .expect("peer table poisoned")
            .remove(id)
            .ok_or_else(|| NetronError::Unknown(format!("peer '{}'", id)))?;
        peer.disconnect();

        let collected = self.stub_manager.release_peer(id);
        for stub in collected {
            let definition = stub.definition();
            self.emit_event(
                CONTEXT_DETACH,
                Value::object([
                    ("name".to_string(), Value::str(definition.name.clone())),
                    ("defId".to_string(), Value::Int(definition.id as i64)),
                ]),
            )
            .await;
        }

        info!(peer = %id, "peer deleted");
        let payload = Value::object([("id".to_string(), Value::str(id))]);
        self.events.emit(PEER_DISCONNECT, &payload);
        peer.events().emit(PEER_DISCONNECT, &payload);
        Ok(())
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .expect("peer table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Tears the process-scoped instance down: detaches every context and
    /// disconnects every peer.
    pub async fn shutdown(&self) -> Result<()> {
        self.detach_all_contexts().await?;
        for id in self.peer_ids() {
            let _ = self.delete_peer(&id).await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reference bookkeeping and value substitution
    // ------------------------------------------------------------------

    pub(crate) fn add_definition_ref(&self, peer_id: &str, def_id: DefinitionId) {
        if self.stub_manager.get_stub(def_id).is_ok() {
            self.stub_manager.add_peer_ref(peer_id, def_id);
        } else {
            debug!(peer = %peer_id, def_id, "ref for unknown definition ignored");
        }
    }

    /// Drops one peer's hold on a definition; a weak definition whose last
    /// hold this was is removed, with a detach notification fired.
    pub(crate) async fn release_definition(&self, peer_id: &str, def_id: DefinitionId) {
        if let Some(stub) = self.stub_manager.release_peer_ref(peer_id, def_id) {
            let definition = stub.definition();
            debug!(def_id, name = %definition.name, "weak context collected");
            self.emit_event(
                CONTEXT_DETACH,
                Value::object([
                    ("name".to_string(), Value::str(definition.name.clone())),
                    ("defId".to_string(), Value::Int(definition.id as i64)),
                ]),
            )
            .await;
        }
    }

    /// Outbound substitution: live handles never cross the codec. A proxy
    /// becomes a `Reference`; a local instance is weak-attached and crosses
    /// as a bundled `Definition` so the receiving peer learns the id.
    pub(crate) fn substitute(&self, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Ctx(instance) => {
                let stub = self.stub_manager.create_weak_stub(instance)?;
                Value::Definition(Box::new(stub.definition().clone()))
            }
            Value::Iface(iface) => {
                if iface.peer_id() == self.id {
                    // A proxy of one of our own definitions: bundle the
                    // definition so the other side can learn it.
                    let stub = self.stub_manager.get_stub(iface.def_id())?;
                    Value::Definition(Box::new(stub.definition().clone()))
                } else {
                    Value::Reference(Reference::new(iface.def_id()))
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.substitute(item))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| Ok((key, self.substitute(item)?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(pairs) => Value::Map(
                pairs
                    .into_iter()
                    .map(|(key, item)| Ok((self.substitute(key)?, self.substitute(item)?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Set(items) => Value::Set(
                items
                    .into_iter()
                    .map(|item| self.substitute(item))
                    .collect::<Result<_>>()?,
            ),
            other => other,
        })
    }

    /// Substitution for dispatch results. Under `proxify_contexts`, a plain
    /// object returned from a method becomes a remotable weak context
    /// instead of data; nested objects proxify lazily on later reads.
    pub(crate) fn substitute_result(&self, value: Value) -> Result<Value> {
        if self.options.proxify_contexts {
            if let Value::Object(map) = value {
                return self.substitute(Value::Ctx(Arc::new(ObjectContext::new(map))));
            }
        }
        self.substitute(value)
    }

    /// Emits locally, to every connected peer's channel, and to their local
    /// subscriber sets.
    async fn emit_event(&self, name: &str, payload: Value) {
        self.events.emit(name, &payload);
        let peers: Vec<Arc<RemotePeer>> = self
            .peers
            .read()
            .expect("peer table poisoned")
            .values()
            .cloned()
            .collect();
        for peer in peers {
            if let Err(err) = peer.send_event(name, payload.clone()).await {
                debug!(peer = %peer.id(), error = %err, "event delivery failed");
            }
        }
    }
}

static PEER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-unique peer identity in the absence of a configured one.
fn generate_peer_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = PEER_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("peer-{:x}-{:x}", nanos, seq)
}
