//! The network-backed protocol endpoint.
//!
//! A remote peer owns one bidirectional packet channel handed over by the
//! transport collaborator. A reader task consumes inbound packets: replies
//! settle the pending-request table, requests are dispatched against local
//! stubs on their own tasks so a slow context method never blocks the
//! reader, and event frames keep the learned-context table current.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use netron_common::{
    Action, ContextObject, CorrelationId, Definition, DefinitionId, NetronError, Packet,
    PacketSink, PacketStream, Result, Value,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::events::{EventEmitter, EventHandler, CONTEXT_ATTACH, CONTEXT_DETACH};
use crate::interface::Interface;
use crate::netron::Netron;
use crate::options::NetronOptions;
use crate::peer::{materialize, ConnectionState, Materializer, Peer, PeerCall, PeerId};
use crate::task::{
    results_from_value, results_to_value, TaskBatch, TaskOutcome, TaskResults, TaskSpec,
    TASK_GET_CONFIG, TASK_GET_CONTEXT_DEFS, TASK_REF_DEFINITION, TASK_RELEASE_DEFINITION,
};

pub struct RemotePeer {
    id: PeerId,
    netron: Weak<Netron>,
    self_ref: Weak<RemotePeer>,
    sink: PacketSink,
    state: Mutex<ConnectionState>,
    response_timeout: Duration,
    correlation: AtomicU64,
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Result<Value>>>>,
    interfaces: Mutex<HashMap<DefinitionId, Arc<Interface>>>,
    /// Contexts the other side currently exposes, by name. Seeded by the
    /// bootstrap task exchange, kept current via attach/detach events.
    contexts: RwLock<HashMap<String, Definition>>,
    /// Every definition learned from the other side, by id, including the
    /// ones bundled inside argument and result trees.
    defs: Mutex<HashMap<DefinitionId, Definition>>,
    remote_options: Mutex<Option<NetronOptions>>,
    events: EventEmitter,
}

impl std::fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer").field("id", &self.id).finish()
    }
}

impl RemotePeer {
    pub(crate) fn new(
        netron: Weak<Netron>,
        id: PeerId,
        sink: PacketSink,
        response_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            netron,
            self_ref: self_ref.clone(),
            sink,
            state: Mutex::new(ConnectionState::Connecting),
            response_timeout,
            correlation: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            interfaces: Mutex::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            defs: Mutex::new(HashMap::new()),
            remote_options: Mutex::new(None),
            events: EventEmitter::new(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("peer state poisoned")
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("peer state poisoned") = state;
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().expect("pending table poisoned").len()
    }

    /// Options the other side reported during bootstrap.
    pub fn remote_options(&self) -> Option<NetronOptions> {
        self.remote_options
            .lock()
            .expect("remote options poisoned")
            .clone()
    }

    fn netron(&self) -> Result<Arc<Netron>> {
        self.netron
            .upgrade()
            .ok_or_else(|| NetronError::Unknown("netron torn down".into()))
    }

    fn next_correlation(&self) -> CorrelationId {
        self.correlation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Sends a request packet and suspends until its response settles the
    /// pending entry, the window elapses, or the connection drops. The
    /// entry is removed on every exit path.
    async fn request(&self, packet: Packet) -> Result<Value> {
        let id = packet.id;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table poisoned")
            .insert(id, tx);

        if let Err(err) = self.sink.send(packet).await {
            self.pending
                .lock()
                .expect("pending table poisoned")
                .remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.response_timeout, rx).await {
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending table poisoned")
                    .remove(&id);
                Err(NetronError::Timeout(self.response_timeout.as_millis() as u64))
            }
            // Sender dropped by the drain path.
            Ok(Err(_)) => Err(NetronError::ConnectionLost),
            Ok(Ok(result)) => result,
        }
    }

    fn settle(&self, id: CorrelationId, result: Result<Value>) {
        let sender = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(peer = %self.id, id, "response for unknown correlation id"),
        }
    }

    /// Rejects every outstanding request with a connection-lost error so no
    /// caller hangs forever.
    fn drain_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending table poisoned");
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(NetronError::ConnectionLost));
        }
    }

    /// Deliberate teardown: `Connected → Disconnecting → Disconnected`,
    /// draining the pending table. Idempotent.
    pub(crate) fn disconnect(&self) {
        {
            let mut state = self.state.lock().expect("peer state poisoned");
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnecting;
        }
        self.drain_pending();
        self.set_state(ConnectionState::Disconnected);
        debug!(peer = %self.id, "peer disconnected");
    }

    pub(crate) fn spawn_reader(self: Arc<Self>, mut stream: PacketStream) {
        tokio::spawn(async move {
            while let Some(packet) = stream.recv().await {
                self.handle_packet(packet).await;
            }
            self.on_channel_closed().await;
        });
    }

    /// Unexpected channel close: `Connected → Disconnected` directly, still
    /// draining every pending request.
    async fn on_channel_closed(&self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        warn!(peer = %self.id, "channel closed unexpectedly");
        self.drain_pending();
        self.set_state(ConnectionState::Disconnected);
        if let Some(netron) = self.netron.upgrade() {
            let _ = netron.delete_peer(&self.id).await;
        }
    }

    async fn handle_packet(&self, packet: Packet) {
        match packet.action {
            Action::Response => {
                self.settle(packet.id, Ok(packet.payload));
            }
            Action::Error => {
                let result = match packet.error_descriptor() {
                    Some(descriptor) => {
                        Err(NetronError::from_descriptor(descriptor.clone()))
                    }
                    None => Err(NetronError::Codec(
                        "error packet without a descriptor".into(),
                    )),
                };
                self.settle(packet.id, result);
            }
            Action::Invoke | Action::Get | Action::Set => {
                // Dispatch on its own task so a slow context method never
                // blocks the reader.
                if let Some(peer) = self.self_ref.upgrade() {
                    tokio::spawn(async move {
                        peer.answer_request(packet).await;
                    });
                }
            }
            Action::Task => {
                if let Some(peer) = self.self_ref.upgrade() {
                    tokio::spawn(async move {
                        peer.answer_task(packet).await;
                    });
                }
            }
            Action::Event => {
                self.handle_event(packet);
            }
        }
    }

    async fn answer_request(&self, packet: Packet) {
        let id = packet.id;
        let void = packet.void;
        let outcome = self.dispatch_request(packet).await;

        if void {
            if let Err(err) = &outcome {
                debug!(peer = %self.id, error = %err, "void request failed");
            }
            return;
        }
        let reply = match outcome {
            Ok(value) => Packet::response(id, value),
            Err(err) => Packet::error(id, err.to_descriptor()),
        };
        if let Err(err) = self.sink.send(reply).await {
            debug!(peer = %self.id, error = %err, "reply dropped");
        }
    }

    /// Stub dispatch for an inbound request. Protocol failures become error
    /// packets for the caller; nothing here is allowed to take down the
    /// peer's event processing.
    async fn dispatch_request(&self, packet: Packet) -> Result<Value> {
        let netron = self.netron()?;
        let def_id = packet
            .def_id
            .ok_or_else(|| NetronError::InvalidArgument("request without a definition id".into()))?;
        let member = packet
            .member
            .as_deref()
            .ok_or_else(|| NetronError::InvalidArgument("request without a member name".into()))?;
        let stub = netron.stub_manager().get_stub(def_id)?;

        match packet.action {
            Action::Invoke => {
                let args = packet
                    .args
                    .into_iter()
                    .map(|arg| materialize(self, arg))
                    .collect::<Result<Vec<_>>>()?;
                let value = stub.invoke(member, args).await?;
                netron.substitute_result(value)
            }
            Action::Get => {
                let value = stub.get_property(member).await?;
                netron.substitute_result(value)
            }
            Action::Set => {
                let value = packet.args.into_iter().next().unwrap_or(Value::Undefined);
                let value = materialize(self, value)?;
                stub.set_property(member, value).await?;
                Ok(Value::Undefined)
            }
            _ => Err(NetronError::InvalidArgument("not a request action".into())),
        }
    }

    async fn answer_task(&self, packet: Packet) {
        let id = packet.id;
        let void = packet.void;
        let outcome = self.execute_task_batch(packet).await;

        if void {
            return;
        }
        let reply = match outcome {
            Ok(results) => Packet::response(id, results_to_value(&results)),
            Err(err) => Packet::error(id, err.to_descriptor()),
        };
        if let Err(err) = self.sink.send(reply).await {
            debug!(peer = %self.id, error = %err, "task reply dropped");
        }
    }

    async fn execute_task_batch(&self, packet: Packet) -> Result<TaskResults> {
        let netron = self.netron()?;
        let specs = match &packet.payload {
            Value::Array(entries) => entries
                .iter()
                .map(TaskSpec::from_value)
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(NetronError::InvalidArgument(
                    "task frame without a spec array".into(),
                ))
            }
        };
        Ok(netron
            .task_manager()
            .run_batch(&netron, &self.id, &specs)
            .await)
    }

    fn handle_event(&self, packet: Packet) {
        let name = match packet.member.as_deref() {
            Some(name) => name,
            None => {
                debug!(peer = %self.id, "event frame without a name");
                return;
            }
        };
        match name {
            CONTEXT_ATTACH => {
                if let Some(map) = packet.payload.as_object() {
                    if let (Some(context), Some(Value::Definition(definition))) =
                        (map.get("name").and_then(Value::as_str), map.get("definition"))
                    {
                        let definition = (**definition).clone();
                        self.defs
                            .lock()
                            .expect("definition table poisoned")
                            .insert(definition.id, definition.clone());
                        self.contexts
                            .write()
                            .expect("context table poisoned")
                            .insert(context.to_string(), definition);
                        debug!(peer = %self.id, context, "remote context attached");
                    }
                }
            }
            CONTEXT_DETACH => {
                if let Some(map) = packet.payload.as_object() {
                    if let Some(context) = map.get("name").and_then(Value::as_str) {
                        self.contexts
                            .write()
                            .expect("context table poisoned")
                            .remove(context);
                    }
                    if let Some(def_id) = map.get("defId").and_then(Value::as_i64) {
                        self.defs
                            .lock()
                            .expect("definition table poisoned")
                            .remove(&(def_id as DefinitionId));
                    }
                }
            }
            _ => {}
        }
        self.events.emit(name, &packet.payload);
    }

    fn interface_by_id(&self, def_id: DefinitionId) -> Result<Arc<Interface>> {
        if let Some(iface) = self
            .interfaces
            .lock()
            .expect("interface cache poisoned")
            .get(&def_id)
        {
            return Ok(iface.clone());
        }

        let definition = match self
            .defs
            .lock()
            .expect("definition table poisoned")
            .get(&def_id)
        {
            Some(definition) => definition.clone(),
            // A reference naming one of our own definitions resolves to the
            // loopback proxy: passing a remote's view of a local object back
            // home lands on the object itself.
            None => {
                let netron = self.netron()?;
                if netron.stub_manager().get_stub(def_id).is_ok() {
                    return netron.own_peer().interface_by_id(def_id);
                }
                return Err(NetronError::Unknown(format!("definition {}", def_id)));
            }
        };

        let caller: Arc<dyn PeerCall> = self
            .self_ref
            .upgrade()
            .ok_or(NetronError::ConnectionLost)?;
        let iface = Arc::new(Interface::new(definition, caller));
        self.interfaces
            .lock()
            .expect("interface cache poisoned")
            .insert(def_id, iface.clone());
        // First hold on this definition: tell the exposing side.
        self.notify(TASK_REF_DEFINITION, def_id);
        Ok(iface)
    }

    /// Fire-and-forget built-in task carrying a definition id.
    fn notify(&self, task: &str, def_id: DefinitionId) {
        let spec = TaskSpec::new(task).with_args(vec![Value::Int(def_id as i64)]);
        let packet = Packet::task(
            self.next_correlation(),
            Value::Array(vec![spec.to_value()]),
            true,
        );
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let _ = sink.send(packet).await;
        });
    }

    pub(crate) fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Pushes a reserved event frame to the other side.
    pub(crate) async fn send_event(&self, name: &str, payload: Value) -> Result<()> {
        self.sink.send(Packet::event(name, payload)).await
    }

    pub(crate) fn holds_interface(&self, iface: &Arc<Interface>) -> bool {
        self.interfaces
            .lock()
            .expect("interface cache poisoned")
            .get(&iface.def_id())
            .is_some_and(|held| Arc::ptr_eq(held, iface))
    }

    /// Applies the bootstrap exchange: the other side's options and its
    /// currently attached context definitions.
    pub(crate) fn apply_bootstrap(&self, results: &TaskResults) -> Result<()> {
        let config = results
            .get(TASK_GET_CONFIG)
            .and_then(TaskOutcome::result)
            .ok_or_else(|| NetronError::Codec("bootstrap without remote config".into()))?;
        *self.remote_options.lock().expect("remote options poisoned") =
            Some(NetronOptions::from_value(config)?);

        let defs = results
            .get(TASK_GET_CONTEXT_DEFS)
            .and_then(TaskOutcome::result)
            .and_then(Value::as_object)
            .ok_or_else(|| NetronError::Codec("bootstrap without remote contexts".into()))?;
        let mut contexts = self.contexts.write().expect("context table poisoned");
        let mut by_id = self.defs.lock().expect("definition table poisoned");
        for (name, value) in defs {
            if let Value::Definition(definition) = value {
                let definition = (**definition).clone();
                by_id.insert(definition.id, definition.clone());
                contexts.insert(name.clone(), definition);
            }
        }
        Ok(())
    }
}

impl Materializer for RemotePeer {
    fn resolve(&self, def_id: DefinitionId) -> Result<Arc<Interface>> {
        self.interface_by_id(def_id)
    }

    fn learn(&self, definition: Definition) -> Result<Arc<Interface>> {
        self.defs
            .lock()
            .expect("definition table poisoned")
            .insert(definition.id, definition.clone());
        self.interface_by_id(definition.id)
    }
}

#[async_trait]
impl PeerCall for RemotePeer {
    fn peer_id(&self) -> &str {
        &self.id
    }

    async fn invoke_member(
        &self,
        def_id: DefinitionId,
        member: &str,
        args: Vec<Value>,
        void: bool,
    ) -> Result<Value> {
        let netron = self.netron()?;
        let args = args
            .into_iter()
            .map(|arg| netron.substitute(arg))
            .collect::<Result<Vec<_>>>()?;
        let packet = Packet::invoke(self.next_correlation(), def_id, member, args, void);
        if void {
            self.sink.send(packet).await?;
            return Ok(Value::Undefined);
        }
        let payload = self.request(packet).await?;
        materialize(self, payload)
    }

    async fn get_member(&self, def_id: DefinitionId, member: &str) -> Result<Value> {
        let packet = Packet::get(self.next_correlation(), def_id, member);
        let payload = self.request(packet).await?;
        materialize(self, payload)
    }

    async fn set_member(
        &self,
        def_id: DefinitionId,
        member: &str,
        value: Value,
        void: bool,
    ) -> Result<()> {
        let netron = self.netron()?;
        let value = netron.substitute(value)?;
        let packet = Packet::set(self.next_correlation(), def_id, member, value, void);
        if void {
            self.sink.send(packet).await?;
            return Ok(());
        }
        self.request(packet).await.map(|_| ())
    }
}

#[async_trait]
impl Peer for RemotePeer {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn attach_context(
        &self,
        instance: Arc<dyn ContextObject>,
        name: Option<&str>,
    ) -> Result<DefinitionId> {
        self.netron()?.attach_context(instance, name).await
    }

    async fn detach_context(&self, name: &str) -> Result<()> {
        self.netron()?.detach_context(name).await
    }

    fn has_context(&self, name: &str) -> bool {
        self.contexts
            .read()
            .expect("context table poisoned")
            .contains_key(name)
    }

    fn has_contexts(&self) -> bool {
        !self
            .contexts
            .read()
            .expect("context table poisoned")
            .is_empty()
    }

    fn context_names(&self) -> Vec<String> {
        self.contexts
            .read()
            .expect("context table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn context_definition(&self, name: &str) -> Result<Definition> {
        self.contexts
            .read()
            .expect("context table poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| NetronError::NotExists(format!("context '{}'", name)))
    }

    async fn query_interface(&self, name: &str) -> Result<Arc<Interface>> {
        let definition = self.context_definition(name)?;
        self.interface_by_id(definition.id)
    }

    async fn query_interface_by_definition(&self, def_id: DefinitionId) -> Result<Arc<Interface>> {
        self.interface_by_id(def_id)
    }

    async fn release_interface(&self, iface: &Arc<Interface>) -> Result<()> {
        let removed = {
            let mut interfaces = self.interfaces.lock().expect("interface cache poisoned");
            match interfaces.get(&iface.def_id()) {
                Some(held) if Arc::ptr_eq(held, iface) => {
                    interfaces.remove(&iface.def_id());
                    true
                }
                _ => false,
            }
        };
        if !removed {
            return Err(NetronError::NotValid(
                "not an interface issued by this peer".into(),
            ));
        }
        self.notify(TASK_RELEASE_DEFINITION, iface.def_id());
        Ok(())
    }

    async fn run_task(&self, batch: TaskBatch) -> Result<TaskResults> {
        let specs = batch
            .specs
            .iter()
            .map(TaskSpec::to_value)
            .collect::<Vec<_>>();
        let packet = Packet::task(self.next_correlation(), Value::Array(specs), false);
        let payload = self.request(packet).await?;
        results_from_value(&payload)
    }

    fn subscribe(&self, event: &str, handler: EventHandler) {
        self.events.on(event, handler);
    }
}
