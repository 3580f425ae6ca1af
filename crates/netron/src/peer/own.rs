//! The degenerate local-loopback peer.
//!
//! Every operation funnels through the same stub dispatch and error
//! descriptor round-trip as the remote path, so application code cannot
//! distinguish local from remote failures by error shape.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use netron_common::{
    ContextObject, Definition, DefinitionId, NetronError, Result, Value,
};

use crate::events::EventHandler;
use crate::interface::Interface;
use crate::netron::Netron;
use crate::peer::{materialize, Materializer, Peer, PeerCall, PeerId};
use crate::task::{TaskBatch, TaskResults};

pub struct OwnPeer {
    id: PeerId,
    netron: Weak<Netron>,
    self_ref: Weak<OwnPeer>,
    interfaces: Mutex<HashMap<DefinitionId, Arc<Interface>>>,
}

impl std::fmt::Debug for OwnPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnPeer").field("id", &self.id).finish()
    }
}

impl OwnPeer {
    pub(crate) fn new(id: PeerId, netron: Weak<Netron>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            netron,
            self_ref: self_ref.clone(),
            interfaces: Mutex::new(HashMap::new()),
        })
    }

    fn netron(&self) -> Result<Arc<Netron>> {
        self.netron
            .upgrade()
            .ok_or_else(|| NetronError::Unknown("netron torn down".into()))
    }

    pub(crate) fn interface_by_id(&self, def_id: DefinitionId) -> Result<Arc<Interface>> {
        if let Some(iface) = self
            .interfaces
            .lock()
            .expect("interface cache poisoned")
            .get(&def_id)
        {
            return Ok(iface.clone());
        }

        let netron = self.netron()?;
        let definition = netron.stub_manager().get_stub(def_id)?.definition().clone();
        let caller: Arc<dyn PeerCall> = self
            .self_ref
            .upgrade()
            .ok_or_else(|| NetronError::Unknown("own peer torn down".into()))?;
        let iface = Arc::new(Interface::new(definition, caller));
        self.interfaces
            .lock()
            .expect("interface cache poisoned")
            .insert(def_id, iface.clone());
        netron.stub_manager().add_peer_ref(&self.id, def_id);
        Ok(iface)
    }

    pub(crate) fn holds_interface(&self, iface: &Arc<Interface>) -> bool {
        self.interfaces
            .lock()
            .expect("interface cache poisoned")
            .get(&iface.def_id())
            .is_some_and(|held| Arc::ptr_eq(held, iface))
    }

    /// Dispatches a loopback request with the full remote contract applied:
    /// arguments substituted and re-materialized, and failures pushed
    /// through the wire descriptor so error shape matches the remote path.
    async fn dispatch<F, Fut>(&self, op: F) -> Result<Value>
    where
        F: FnOnce(Arc<Netron>) -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let netron = self.netron()?;
        match op(netron).await {
            Ok(value) => Ok(value),
            Err(err) => Err(NetronError::from_descriptor(err.to_descriptor())),
        }
    }
}

impl Materializer for OwnPeer {
    fn resolve(&self, def_id: DefinitionId) -> Result<Arc<Interface>> {
        self.interface_by_id(def_id)
    }

    fn learn(&self, definition: Definition) -> Result<Arc<Interface>> {
        // Loopback substitution registered the stub already; the definition
        // itself carries nothing new here.
        self.interface_by_id(definition.id)
    }
}

#[async_trait]
impl PeerCall for OwnPeer {
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
        let result = self
            .dispatch(|netron| async move {
                let stub = netron.stub_manager().get_stub(def_id)?;
                let args = args
                    .into_iter()
                    .map(|arg| materialize(self, netron.substitute(arg)?))
                    .collect::<Result<Vec<_>>>()?;
                let value = stub.invoke(member, args).await?;
                materialize(self, netron.substitute_result(value)?)
            })
            .await;
        match result {
            Ok(_) if void => Ok(Value::Undefined),
            other => other,
        }
    }

    async fn get_member(&self, def_id: DefinitionId, member: &str) -> Result<Value> {
        self.dispatch(|netron| async move {
            let stub = netron.stub_manager().get_stub(def_id)?;
            let value = stub.get_property(member).await?;
            materialize(self, netron.substitute_result(value)?)
        })
        .await
    }

    async fn set_member(
        &self,
        def_id: DefinitionId,
        member: &str,
        value: Value,
        void: bool,
    ) -> Result<()> {
        let result = self
            .dispatch(|netron| async move {
                let stub = netron.stub_manager().get_stub(def_id)?;
                let value = materialize(self, netron.substitute(value)?)?;
                stub.set_property(member, value).await?;
                Ok(Value::Undefined)
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(_) if void => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Peer for OwnPeer {
    fn id(&self) -> &str {
        &self.id
    }

    /// The loopback peer is permanently connected.
    fn is_connected(&self) -> bool {
        true
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
        self.netron().map(|n| n.has_context(name)).unwrap_or(false)
    }

    fn has_contexts(&self) -> bool {
        self.netron()
            .map(|n| !n.context_names().is_empty())
            .unwrap_or(false)
    }

    fn context_names(&self) -> Vec<String> {
        self.netron().map(|n| n.context_names()).unwrap_or_default()
    }

    fn context_definition(&self, name: &str) -> Result<Definition> {
        self.netron()?.context_definition(name)
    }

    async fn query_interface(&self, name: &str) -> Result<Arc<Interface>> {
        let definition = self.netron()?.context_definition(name)?;
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
        self.netron()?
            .release_definition(&self.id, iface.def_id())
            .await;
        Ok(())
    }

    async fn run_task(&self, batch: TaskBatch) -> Result<TaskResults> {
        let netron = self.netron()?;
        Ok(netron
            .task_manager()
            .run_batch(&netron, &self.id, &batch.specs)
            .await)
    }

    fn subscribe(&self, event: &str, handler: EventHandler) {
        if let Ok(netron) = self.netron() {
            netron.on(event, handler);
        }
    }
}
