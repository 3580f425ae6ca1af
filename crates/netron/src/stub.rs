//! Server-side bookkeeping: stubs bind definition ids to live instances,
//! the manager tracks per-peer reference counts and removes weak contexts
//! when their last holder lets go.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use netron_common::{ContextObject, Definition, DefinitionId, NetronError, Result, Value};
use tracing::debug;

use crate::reflection::{Reflection, ReflectionResult};
use crate::uid::{IdSequence, LongUniqueId};

/// Binding between one definition id and a live local instance. The stub is
/// the sole authority translating wire calls into direct calls on the
/// instance; concurrent invocations may interleave, and the instance author
/// is responsible for internal consistency, as with any concurrent object.
pub struct Stub {
    definition: Definition,
    instance: Arc<dyn ContextObject>,
    weak: bool,
}

impl Stub {
    fn new(definition: Definition, instance: Arc<dyn ContextObject>, weak: bool) -> Self {
        Self {
            definition,
            instance,
            weak,
        }
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn id(&self) -> DefinitionId {
        self.definition.id
    }

    /// Weak stubs were created implicitly by a value crossing the wire and
    /// are removed automatically once unreferenced.
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub(crate) fn instance(&self) -> &Arc<dyn ContextObject> {
        &self.instance
    }

    pub async fn invoke(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        if !self.definition.public.has_method(member) {
            return Err(NetronError::NotExists(format!(
                "method '{}' on '{}'",
                member, self.definition.name
            )));
        }
        self.instance.invoke(member, args).await
    }

    pub async fn get_property(&self, member: &str) -> Result<Value> {
        if self.definition.public.property_meta(member).is_none() {
            return Err(NetronError::NotExists(format!(
                "property '{}' on '{}'",
                member, self.definition.name
            )));
        }
        self.instance.get(member).await
    }

    pub async fn set_property(&self, member: &str, value: Value) -> Result<()> {
        match self.definition.public.property_meta(member) {
            None => {
                return Err(NetronError::NotExists(format!(
                    "property '{}' on '{}'",
                    member, self.definition.name
                )))
            }
            Some(meta) if meta.readonly => {
                return Err(NetronError::InvalidArgument(format!(
                    "property '{}' on '{}' is readonly",
                    member, self.definition.name
                )))
            }
            Some(_) => {}
        }
        self.instance.set(member, value).await
    }
}

/// Owns the stub table and the per-peer reference counts.
///
/// `peer_refs` records which definition ids each peer currently holds an
/// interface for: incremented on a peer's first materialization, decremented
/// on release or disconnect. A weak definition whose count across all peers
/// reaches zero is removed here; in-flight dispatches keep their own
/// `Arc<Stub>`, so removal only unlinks the table entry and never cancels a
/// call already underway.
pub struct StubManager {
    uid: LongUniqueId,
    stubs: RwLock<HashMap<DefinitionId, Arc<Stub>>>,
    /// Dedup for weak attachment: one definition per live instance.
    by_instance: Mutex<HashMap<usize, DefinitionId>>,
    peer_refs: Mutex<HashMap<String, HashSet<DefinitionId>>>,
}

impl StubManager {
    pub fn new() -> Self {
        Self {
            uid: LongUniqueId::new(),
            stubs: RwLock::new(HashMap::new()),
            by_instance: Mutex::new(HashMap::new()),
            peer_refs: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a strong stub for an explicitly attached context.
    pub fn create_stub(
        &self,
        reflection: ReflectionResult,
        instance: Arc<dyn ContextObject>,
    ) -> Arc<Stub> {
        let definition = Definition::new(
            self.uid.get(),
            reflection.name,
            reflection.description,
            reflection.public,
        );
        let stub = Arc::new(Stub::new(definition, instance, false));
        self.stubs
            .write()
            .expect("stub table poisoned")
            .insert(stub.id(), stub.clone());
        debug!(def_id = stub.id(), name = %stub.definition().name, "stub created");
        stub
    }

    /// Creates (or reuses) a weak stub for an instance crossing the wire as
    /// a value. Repeated crossings of the same instance share one
    /// definition.
    pub fn create_weak_stub(&self, instance: Arc<dyn ContextObject>) -> Result<Arc<Stub>> {
        let key = Arc::as_ptr(&instance) as *const () as usize;
        {
            let by_instance = self.by_instance.lock().expect("instance table poisoned");
            if let Some(def_id) = by_instance.get(&key) {
                if let Some(stub) = self.stubs.read().expect("stub table poisoned").get(def_id) {
                    return Ok(stub.clone());
                }
            }
        }

        let reflection = Reflection::inspect(&instance, None)?;
        let definition = Definition::new(
            self.uid.get(),
            reflection.name,
            reflection.description,
            reflection.public,
        );
        let stub = Arc::new(Stub::new(definition, instance, true));
        self.stubs
            .write()
            .expect("stub table poisoned")
            .insert(stub.id(), stub.clone());
        self.by_instance
            .lock()
            .expect("instance table poisoned")
            .insert(key, stub.id());
        debug!(def_id = stub.id(), name = %stub.definition().name, "weak stub created");
        Ok(stub)
    }

    pub fn get_stub(&self, def_id: DefinitionId) -> Result<Arc<Stub>> {
        self.stubs
            .read()
            .expect("stub table poisoned")
            .get(&def_id)
            .cloned()
            .ok_or_else(|| NetronError::NotExists(format!("definition {}", def_id)))
    }

    /// Unlinks a stub regardless of outstanding remote holders (hard
    /// detach); their interfaces fail with `NotExists` on next use.
    pub fn remove_stub(&self, def_id: DefinitionId) -> Option<Arc<Stub>> {
        let stub = self
            .stubs
            .write()
            .expect("stub table poisoned")
            .remove(&def_id)?;
        let key = Arc::as_ptr(stub.instance()) as *const () as usize;
        self.by_instance
            .lock()
            .expect("instance table poisoned")
            .remove(&key);
        let mut peer_refs = self.peer_refs.lock().expect("peer ref table poisoned");
        for refs in peer_refs.values_mut() {
            refs.remove(&def_id);
        }
        debug!(def_id, "stub removed");
        Some(stub)
    }

    /// Records that `peer_id` now holds an interface for `def_id`. Returns
    /// false if the peer already held one.
    pub fn add_peer_ref(&self, peer_id: &str, def_id: DefinitionId) -> bool {
        self.peer_refs
            .lock()
            .expect("peer ref table poisoned")
            .entry(peer_id.to_string())
            .or_default()
            .insert(def_id)
    }

    /// Drops one peer's hold on a definition. Returns the stub if this was
    /// the last hold on a weak definition and it was removed.
    pub fn release_peer_ref(&self, peer_id: &str, def_id: DefinitionId) -> Option<Arc<Stub>> {
        {
            let mut peer_refs = self.peer_refs.lock().expect("peer ref table poisoned");
            let refs = peer_refs.get_mut(peer_id)?;
            if !refs.remove(&def_id) {
                return None;
            }
        }
        self.collect_if_unreferenced(def_id)
    }

    /// Drops every hold of a disconnecting peer, returning the weak stubs
    /// that became unreferenced and were removed.
    pub fn release_peer(&self, peer_id: &str) -> Vec<Arc<Stub>> {
        let held = match self
            .peer_refs
            .lock()
            .expect("peer ref table poisoned")
            .remove(peer_id)
        {
            Some(refs) => refs,
            None => return Vec::new(),
        };
        held.into_iter()
            .filter_map(|def_id| self.collect_if_unreferenced(def_id))
            .collect()
    }

    fn collect_if_unreferenced(&self, def_id: DefinitionId) -> Option<Arc<Stub>> {
        if self.ref_count(def_id) > 0 {
            return None;
        }
        let weak = self
            .stubs
            .read()
            .expect("stub table poisoned")
            .get(&def_id)
            .map(|stub| stub.is_weak())?;
        if !weak {
            return None;
        }
        self.remove_stub(def_id)
    }

    /// Holds on `def_id` summed across all peers.
    pub fn ref_count(&self, def_id: DefinitionId) -> usize {
        self.peer_refs
            .lock()
            .expect("peer ref table poisoned")
            .values()
            .filter(|refs| refs.contains(&def_id))
            .count()
    }

    pub fn stub_count(&self) -> usize {
        self.stubs.read().expect("stub table poisoned").len()
    }
}

impl Default for StubManager {
    fn default() -> Self {
        Self::new()
    }
}
