//! Dispatch seams shared by every endpoint.
//!
//! [`ContextObject`] is the explicit descriptor-plus-dispatch surface a type
//! implements to become remotable; [`Callable`] is the uniform face of a live
//! proxy. Both are object-safe so instances and proxies can travel inside
//! [`Value`] trees.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::{NetronError, Result};
use super::reference::{DefinitionId, PublicMembers};
use super::value::Value;

/// Description of a context's invocable surface, produced by the
/// implementing type itself rather than runtime introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMeta {
    /// Logical name, used as the context name unless an explicit one is
    /// given at attach time.
    pub name: String,
    pub description: String,
    pub public: PublicMembers,
}

impl ContextMeta {
    pub fn new(name: impl Into<String>, public: PublicMembers) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            public,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// An application object exposed for remote invocation.
///
/// Implementations provide their member table via [`meta`](Self::meta) and
/// translate member names into direct calls. The engine validates member
/// existence and access kind against the table before dispatching, so the
/// default bodies here only fire for members a type declared but did not
/// route.
#[async_trait]
pub trait ContextObject: Send + Sync {
    fn meta(&self) -> ContextMeta;

    async fn invoke(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        let _ = args;
        Err(NetronError::NotExists(format!("method '{}'", member)))
    }

    async fn get(&self, member: &str) -> Result<Value> {
        Err(NetronError::NotExists(format!("property '{}'", member)))
    }

    async fn set(&self, member: &str, value: Value) -> Result<()> {
        let _ = value;
        Err(NetronError::NotExists(format!("property '{}'", member)))
    }
}

/// The uniform call surface of a live proxy.
///
/// A materialized interface implements this, which is what lets a proxy be
/// embedded in an argument tree and invoked by the receiving side without
/// knowing which peer it routes through.
#[async_trait]
pub trait Callable: Send + Sync {
    fn def_id(&self) -> DefinitionId;

    /// Id of the peer this proxy routes through.
    fn peer_id(&self) -> String;

    async fn call(&self, member: &str, args: Vec<Value>) -> Result<Value>;

    async fn get(&self, member: &str) -> Result<Value>;

    async fn set(&self, member: &str, value: Value) -> Result<()>;

    /// Fire-and-forget property write: delivered to the wire without
    /// awaiting acknowledgement.
    async fn set_void(&self, member: &str, value: Value) -> Result<()>;
}

/// Identity comparison for trait objects held in [`Value`] trees.
pub(crate) fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
