//! Loopback integration tests.
//!
//! Everything here runs against the own peer: local and remote access share
//! one code path, so the attach/detach lifecycle, dispatch, error shape and
//! weak-context collection must all behave identically to the wire path.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use netron::{Netron, NetronOptions, Peer, Task, TaskRegistration, TaskSpec};
use netron_common::{
    Callable, ContextMeta, ContextObject, NetronError, PublicMembers, Result, Value,
};

struct Sample {
    prop_a: Mutex<Value>,
}

impl Sample {
    fn new() -> Self {
        Self {
            prop_a: Mutex::new(Value::str("aaa")),
        }
    }
}

#[async_trait]
impl ContextObject for Sample {
    fn meta(&self) -> ContextMeta {
        ContextMeta::new(
            "Sample",
            PublicMembers::new()
                .method("methodA")
                .method("echo")
                .property("propA", false)
                .property("fixed", true),
        )
    }

    async fn invoke(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        match member {
            "methodA" => Ok(Value::str("aaa")),
            "echo" => Ok(args.into_iter().next().unwrap_or(Value::Undefined)),
            other => Err(NetronError::NotExists(format!("method '{}'", other))),
        }
    }

    async fn get(&self, member: &str) -> Result<Value> {
        match member {
            "propA" => Ok(self.prop_a.lock().unwrap().clone()),
            "fixed" => Ok(Value::str("ccc")),
            other => Err(NetronError::NotExists(format!("property '{}'", other))),
        }
    }

    async fn set(&self, member: &str, value: Value) -> Result<()> {
        match member {
            "propA" => {
                *self.prop_a.lock().unwrap() = value;
                Ok(())
            }
            other => Err(NetronError::NotExists(format!("property '{}'", other))),
        }
    }
}

struct Empty;

impl ContextObject for Empty {
    fn meta(&self) -> ContextMeta {
        ContextMeta::new("Empty", PublicMembers::new())
    }
}

#[tokio::test]
async fn test_attach_detach_roundtrip() {
    let netron = Netron::new(NetronOptions::default());
    assert!(!netron.has_contexts());

    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    assert!(netron.has_context("Sample"));
    assert_eq!(netron.stub_count(), 1);

    netron.detach_context("Sample").await.unwrap();
    assert!(!netron.has_contexts());
    assert_eq!(netron.stub_count(), 0);
}

#[tokio::test]
async fn test_detach_unknown_context() {
    let netron = Netron::new(NetronOptions::default());
    let err = netron.detach_context("nope").await.unwrap_err();
    assert!(matches!(err, NetronError::NotExists(_)));
}

#[tokio::test]
async fn test_duplicate_attach_rejected() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let err = netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetronError::Exists(_)));
}

#[tokio::test]
async fn test_same_instance_under_two_names() {
    let netron = Netron::new(NetronOptions::default());
    let instance = Arc::new(Sample::new());
    let first = netron
        .attach_context(instance.clone(), Some("one"))
        .await
        .unwrap();
    let second = netron
        .attach_context(instance, Some("two"))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert!(netron.has_context("one"));
    assert!(netron.has_context("two"));
}

#[tokio::test]
async fn test_attach_rejects_zero_member_context() {
    let netron = Netron::new(NetronOptions::default());
    let err = netron
        .attach_context(Arc::new(Empty), None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetronError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_call_roundtrip_through_own_peer() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();

    let peer = netron.own_peer();
    let iface = peer.query_interface("Sample").await.unwrap();

    assert_eq!(
        iface.call("methodA", vec![]).await.unwrap(),
        Value::str("aaa")
    );
    assert_eq!(iface.get("propA").await.unwrap(), Value::str("aaa"));

    iface.set("propA", Value::str("bbb")).await.unwrap();
    assert_eq!(iface.get("propA").await.unwrap(), Value::str("bbb"));
}

#[tokio::test]
async fn test_readonly_property_refuses_writes() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let iface = netron.own_peer().query_interface("Sample").await.unwrap();

    assert_eq!(iface.get("fixed").await.unwrap(), Value::str("ccc"));
    assert!(matches!(
        iface.set("fixed", Value::str("x")).await.unwrap_err(),
        NetronError::InvalidArgument(_)
    ));
    assert!(matches!(
        iface.set_void("fixed", Value::str("x")).await.unwrap_err(),
        NetronError::InvalidArgument(_)
    ));
}

#[tokio::test]
async fn test_unknown_member_rejected_locally() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let iface = netron.own_peer().query_interface("Sample").await.unwrap();

    assert!(matches!(
        iface.call("absent", vec![]).await.unwrap_err(),
        NetronError::NotExists(_)
    ));
    assert!(matches!(
        iface.get("absent").await.unwrap_err(),
        NetronError::NotExists(_)
    ));
}

#[tokio::test]
async fn test_query_interface_is_memoized() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let peer = netron.own_peer();
    let first = peer.query_interface("Sample").await.unwrap();
    let second = peer.query_interface("Sample").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_post_detach_invalidation_local() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let iface = netron.own_peer().query_interface("Sample").await.unwrap();

    netron.detach_context("Sample").await.unwrap();
    assert!(matches!(
        iface.call("methodA", vec![]).await.unwrap_err(),
        NetronError::NotExists(_)
    ));
    assert!(matches!(
        iface.get("propA").await.unwrap_err(),
        NetronError::NotExists(_)
    ));
}

#[tokio::test]
async fn test_release_interface_twice_fails_not_valid() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let peer = netron.own_peer();
    let iface = peer.query_interface("Sample").await.unwrap();

    peer.release_interface(&iface).await.unwrap();
    let err = peer.release_interface(&iface).await.unwrap_err();
    assert!(matches!(err, NetronError::NotValid(_)));
}

#[tokio::test]
async fn test_weak_context_collected_on_local_release() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let peer = netron.own_peer();
    let iface = peer.query_interface("Sample").await.unwrap();

    // Pass a live instance as an argument: it crosses as a weak definition
    // and comes back as a proxy for the caller to hold.
    let callback: Arc<dyn ContextObject> = Arc::new(Sample::new());
    let echoed = iface
        .call("echo", vec![Value::Ctx(callback)])
        .await
        .unwrap();
    let proxy = echoed.as_iface().expect("echoed value is a proxy").clone();
    assert_eq!(netron.stub_count(), 2);

    assert_eq!(
        proxy.call("methodA", vec![]).await.unwrap(),
        Value::str("aaa")
    );

    let weak_iface = peer
        .query_interface_by_definition(proxy.def_id())
        .await
        .unwrap();
    peer.release_interface(&weak_iface).await.unwrap();

    // Last holder gone: the weak stub is collected, the strong one stays.
    assert_eq!(netron.stub_count(), 1);
    assert!(matches!(
        proxy.call("methodA", vec![]).await.unwrap_err(),
        NetronError::NotExists(_)
    ));
}

#[tokio::test]
async fn test_batch_task_isolation() {
    let netron = Netron::new(NetronOptions::default());
    let peer = netron.own_peer();

    let results = peer
        .run_task(vec![TaskSpec::new("netronGetConfig"), TaskSpec::new("doesNotExist")].into())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results["netronGetConfig"].result().unwrap(),
        &netron.options().to_value()
    );
    let error = results["doesNotExist"].error().unwrap();
    assert_eq!(error.kind, "NotExists");
}

struct SumTask;

#[async_trait]
impl Task for SumTask {
    async fn run(&self, _netron: &Arc<Netron>, _origin: &str, args: Vec<Value>) -> Result<Value> {
        let mut total = 0i64;
        for arg in args {
            total += arg.as_i64().ok_or_else(|| {
                NetronError::InvalidArgument("sum expects integers".into())
            })?;
        }
        Ok(Value::Int(total))
    }
}

#[tokio::test]
async fn test_custom_task_registration_and_run() {
    let netron = Netron::new(NetronOptions::default());
    netron
        .add_task(TaskRegistration {
            name: "sum".into(),
            singleton: true,
            factory: Arc::new(|| Arc::new(SumTask)),
        })
        .unwrap();

    let results = netron
        .own_peer()
        .run_task(TaskSpec::new("sum").with_args(vec![Value::Int(2), Value::Int(40)]).into())
        .await
        .unwrap();
    assert_eq!(results["sum"].result().unwrap(), &Value::Int(42));

    let err = netron
        .add_task(TaskRegistration {
            name: "sum".into(),
            singleton: false,
            factory: Arc::new(|| Arc::new(SumTask)),
        })
        .unwrap_err();
    assert!(matches!(err, NetronError::Exists(_)));
}

struct Nested;

#[async_trait]
impl ContextObject for Nested {
    fn meta(&self) -> ContextMeta {
        ContextMeta::new("Nested", PublicMembers::new().method("stats"))
    }

    async fn invoke(&self, member: &str, _args: Vec<Value>) -> Result<Value> {
        match member {
            "stats" => Ok(Value::object([
                ("count".to_string(), Value::Int(3)),
                ("label".to_string(), Value::str("live")),
            ])),
            other => Err(NetronError::NotExists(format!("method '{}'", other))),
        }
    }
}

#[tokio::test]
async fn test_proxify_contexts_wraps_returned_objects() {
    let netron = Netron::new(NetronOptions::new().with_proxify_contexts(true));
    netron.attach_context(Arc::new(Nested), None).await.unwrap();
    let iface = netron.own_peer().query_interface("Nested").await.unwrap();

    // The returned object comes back as a live proxy, not plain data.
    let stats = iface.call("stats", vec![]).await.unwrap();
    let proxy = stats.as_iface().expect("proxified object").clone();

    assert_eq!(proxy.get("count").await.unwrap(), Value::Int(3));
    proxy.set("count", Value::Int(4)).await.unwrap();
    assert_eq!(proxy.get("count").await.unwrap(), Value::Int(4));
    assert_eq!(proxy.get("label").await.unwrap(), Value::str("live"));
}

#[tokio::test]
async fn test_local_attach_event() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let netron = Netron::new(NetronOptions::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    netron.on(
        netron::CONTEXT_ATTACH,
        Arc::new(move |payload| {
            if payload
                .as_object()
                .and_then(|map| map.get("name"))
                .and_then(Value::as_str)
                == Some("Sample")
            {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );

    netron
        .attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
