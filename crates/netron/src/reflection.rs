//! Reflection over a context's declared public surface.
//!
//! Remotable types provide an explicit descriptor table through
//! [`ContextObject::meta`]; this module turns that, plus an optional attach
//! name, into the immutable description embedded in a definition. It is a
//! pure transform with no network or storage I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use netron_common::{
    ContextMeta, ContextObject, NetronError, PublicMembers, Result, Value,
};

/// Immutable description of a context's invocable surface, suitable for
/// embedding directly into a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionResult {
    /// Logical context name: the class name unless an explicit name was
    /// given at attach time.
    pub name: String,
    pub description: String,
    pub public: PublicMembers,
}

pub struct Reflection;

impl Reflection {
    /// Builds the description for `instance`, overriding its own name with
    /// `name` when given.
    ///
    /// Fails with `InvalidArgument` if the instance exposes zero public
    /// members: a context must expose at least one method or property.
    pub fn inspect(
        instance: &Arc<dyn ContextObject>,
        name: Option<&str>,
    ) -> Result<ReflectionResult> {
        let meta = instance.meta();
        if meta.public.is_empty() {
            return Err(NetronError::InvalidArgument(format!(
                "context '{}' exposes no public members",
                name.unwrap_or(&meta.name)
            )));
        }
        Ok(ReflectionResult {
            name: name.unwrap_or(&meta.name).to_string(),
            description: meta.description,
            public: meta.public,
        })
    }
}

/// Adapter that turns a plain object value into a remotable context, used by
/// the `proxify_contexts` option: every key becomes a read/write property.
pub struct ObjectContext {
    values: RwLock<BTreeMap<String, Value>>,
}

impl ObjectContext {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl ContextObject for ObjectContext {
    fn meta(&self) -> ContextMeta {
        let values = self.values.read().expect("object context poisoned");
        let mut public = PublicMembers::new();
        for key in values.keys() {
            public = public.property(key.clone(), false);
        }
        ContextMeta::new("Object", public)
    }

    async fn get(&self, member: &str) -> Result<Value> {
        let values = self.values.read().expect("object context poisoned");
        values
            .get(member)
            .cloned()
            .ok_or_else(|| NetronError::NotExists(format!("property '{}'", member)))
    }

    async fn set(&self, member: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().expect("object context poisoned");
        match values.get_mut(member) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(NetronError::NotExists(format!("property '{}'", member))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl ContextObject for Empty {
        fn meta(&self) -> ContextMeta {
            ContextMeta::new("Empty", PublicMembers::new())
        }
    }

    struct Calc;

    impl ContextObject for Calc {
        fn meta(&self) -> ContextMeta {
            ContextMeta::new(
                "Calc",
                PublicMembers::new().method("add").property("total", true),
            )
            .with_description("running total")
        }
    }

    #[test]
    fn test_inspect_uses_class_name_by_default() {
        let instance: Arc<dyn ContextObject> = Arc::new(Calc);
        let result = Reflection::inspect(&instance, None).unwrap();
        assert_eq!(result.name, "Calc");
        assert_eq!(result.description, "running total");
        assert!(result.public.has_method("add"));
    }

    #[test]
    fn test_inspect_honors_explicit_name() {
        let instance: Arc<dyn ContextObject> = Arc::new(Calc);
        let result = Reflection::inspect(&instance, Some("calculator")).unwrap();
        assert_eq!(result.name, "calculator");
    }

    #[test]
    fn test_inspect_rejects_zero_member_context() {
        let instance: Arc<dyn ContextObject> = Arc::new(Empty);
        let err = Reflection::inspect(&instance, None).unwrap_err();
        assert!(matches!(err, NetronError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_object_context_property_surface() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let ctx = ObjectContext::new(map);

        assert!(ctx.meta().public.property_meta("a").is_some());
        assert_eq!(ctx.get("a").await.unwrap(), Value::Int(1));
        ctx.set("a", Value::Int(2)).await.unwrap();
        assert_eq!(ctx.get("a").await.unwrap(), Value::Int(2));
        assert!(ctx.get("missing").await.is_err());
    }
}
