//! The local proxy standing in for a remote (or local) definition.
//!
//! An [`Interface`] is a generic table-dispatched proxy: member names are
//! validated against the bound definition's public-member map before a
//! packet is sent, then routed through the owning peer. Method members are
//! async callables; property members expose the `get`/`set`/`set_void`
//! triad, with writes refused locally for readonly properties.

use std::sync::Arc;

use async_trait::async_trait;
use netron_common::{Callable, Definition, DefinitionId, NetronError, Result, Value};

use crate::peer::PeerCall;

pub struct Interface {
    definition: Definition,
    caller: Arc<dyn PeerCall>,
}

impl Interface {
    pub(crate) fn new(definition: Definition, caller: Arc<dyn PeerCall>) -> Self {
        Self { definition, caller }
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn def_id(&self) -> DefinitionId {
        self.definition.id
    }

    /// Id of the peer this proxy routes through.
    pub fn peer_id(&self) -> String {
        self.caller.peer_id().to_string()
    }

    fn require_method(&self, member: &str) -> Result<()> {
        if self.definition.public.has_method(member) {
            Ok(())
        } else {
            Err(NetronError::NotExists(format!(
                "method '{}' on '{}'",
                member, self.definition.name
            )))
        }
    }

    fn require_property(&self, member: &str, writing: bool) -> Result<()> {
        match self.definition.public.property_meta(member) {
            None => Err(NetronError::NotExists(format!(
                "property '{}' on '{}'",
                member, self.definition.name
            ))),
            Some(meta) if writing && meta.readonly => Err(NetronError::InvalidArgument(format!(
                "property '{}' on '{}' is readonly",
                member, self.definition.name
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Invokes a method member and awaits its result.
    pub async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        self.require_method(member)?;
        self.caller
            .invoke_member(self.definition.id, member, args, false)
            .await
    }

    /// Invokes a method member without awaiting a response.
    pub async fn call_void(&self, member: &str, args: Vec<Value>) -> Result<()> {
        self.require_method(member)?;
        self.caller
            .invoke_member(self.definition.id, member, args, true)
            .await
            .map(|_| ())
    }

    /// Reads a property member.
    pub async fn get(&self, member: &str) -> Result<Value> {
        self.require_property(member, false)?;
        self.caller.get_member(self.definition.id, member).await
    }

    /// Writes a property member and awaits the acknowledgement.
    pub async fn set(&self, member: &str, value: Value) -> Result<()> {
        self.require_property(member, true)?;
        self.caller
            .set_member(self.definition.id, member, value, false)
            .await
    }

    /// Fires a property write to the wire without awaiting delivery; the
    /// caller accepts eventual delivery with no confirmation.
    pub async fn set_void(&self, member: &str, value: Value) -> Result<()> {
        self.require_property(member, true)?;
        self.caller
            .set_member(self.definition.id, member, value, true)
            .await
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("def_id", &self.definition.id)
            .field("name", &self.definition.name)
            .field("peer", &self.caller.peer_id())
            .finish()
    }
}

#[async_trait]
impl Callable for Interface {
    fn def_id(&self) -> DefinitionId {
        self.definition.id
    }

    fn peer_id(&self) -> String {
        Interface::peer_id(self)
    }

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        Interface::call(self, member, args).await
    }

    async fn get(&self, member: &str) -> Result<Value> {
        Interface::get(self, member).await
    }

    async fn set(&self, member: &str, value: Value) -> Result<()> {
        Interface::set(self, member, value).await
    }

    async fn set_void(&self, member: &str, value: Value) -> Result<()> {
        Interface::set_void(self, member, value).await
    }
}
