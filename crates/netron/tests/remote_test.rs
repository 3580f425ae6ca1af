//! End-to-end tests over the in-memory wire: two netrons, each side running
//! the full bootstrap exchange, with calls, property access, events,
//! inversion-of-control callbacks and weak-context collection crossing the
//! channel.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netron::{Netron, NetronOptions, Peer, RemotePeer, TaskSpec};
use netron_common::{
    memory_pair, Callable, ContextMeta, ContextObject, NetronError, PublicMembers, Result, Value,
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
                .property("propA", false)
                .property("fixed", true),
        )
    }

    async fn invoke(&self, member: &str, _args: Vec<Value>) -> Result<Value> {
        match member {
            "methodA" => Ok(Value::str("aaa")),
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

/// Stores a callback proxy handed over as an argument and rings it later:
/// the inversion-of-control path.
struct Consumer {
    captured: Mutex<Option<Arc<dyn Callable>>>,
}

impl Consumer {
    fn new() -> Self {
        Self {
            captured: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ContextObject for Consumer {
    fn meta(&self) -> ContextMeta {
        ContextMeta::new(
            "Consumer",
            PublicMembers::new().method("register").method("ring"),
        )
    }

    async fn invoke(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        match member {
            "register" => {
                let callback = match args.into_iter().next() {
                    Some(Value::Iface(iface)) => iface,
                    _ => {
                        return Err(NetronError::InvalidArgument(
                            "expected a callback object".into(),
                        ))
                    }
                };
                let def_id = callback.def_id();
                *self.captured.lock().unwrap() = Some(callback);
                Ok(Value::Int(def_id as i64))
            }
            "ring" => {
                let callback = self
                    .captured
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| NetronError::NotExists("no callback registered".into()))?;
                callback.call("notify", vec![Value::str("ding")]).await
            }
            other => Err(NetronError::NotExists(format!("method '{}'", other))),
        }
    }
}

/// The callback object a consumer rings back into.
struct Bell {
    rings: Mutex<Vec<Value>>,
}

impl Bell {
    fn new() -> Self {
        Self {
            rings: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContextObject for Bell {
    fn meta(&self) -> ContextMeta {
        ContextMeta::new("Bell", PublicMembers::new().method("notify"))
    }

    async fn invoke(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        match member {
            "notify" => {
                let arg = args.into_iter().next().unwrap_or(Value::Undefined);
                self.rings.lock().unwrap().push(arg);
                Ok(Value::str("rung"))
            }
            other => Err(NetronError::NotExists(format!("method '{}'", other))),
        }
    }
}

async fn pair(alpha: &Arc<Netron>, beta: &Arc<Netron>) -> (Arc<RemotePeer>, Arc<RemotePeer>) {
    let (left, right) = memory_pair(64);
    let (to_beta, to_alpha) = tokio::join!(
        alpha.add_peer(beta.id().to_string(), left),
        beta.add_peer(alpha.id().to_string(), right),
    );
    (to_beta.unwrap(), to_alpha.unwrap())
}

fn options(id: &str) -> NetronOptions {
    NetronOptions::new()
        .with_id(id)
        .with_response_timeout(Duration::from_secs(5))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_bootstrap_reports_existing_contexts() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    beta.attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();

    let (to_beta, to_alpha) = pair(&alpha, &beta).await;

    assert!(to_beta.is_connected());
    assert!(to_alpha.is_connected());
    assert!(to_beta.has_context("Sample"));
    assert_eq!(to_beta.context_names(), vec!["Sample".to_string()]);
    assert!(!to_alpha.has_contexts());
    assert!(to_beta.remote_options().is_some());
}

#[tokio::test]
async fn test_attach_event_updates_connected_peer() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    let (to_beta, _to_alpha) = pair(&alpha, &beta).await;

    assert!(!to_beta.has_context("Sample"));
    beta.attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();

    let probe = to_beta.clone();
    eventually(move || probe.has_context("Sample")).await;

    beta.detach_context("Sample").await.unwrap();
    let probe = to_beta.clone();
    eventually(move || !probe.has_context("Sample")).await;
}

#[tokio::test]
async fn test_remote_call_roundtrip() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    beta.attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let (to_beta, _keep) = pair(&alpha, &beta).await;

    let iface = to_beta.query_interface("Sample").await.unwrap();
    assert_eq!(
        iface.call("methodA", vec![]).await.unwrap(),
        Value::str("aaa")
    );
    assert_eq!(iface.get("propA").await.unwrap(), Value::str("aaa"));

    iface.set("propA", Value::str("bbb")).await.unwrap();
    assert_eq!(iface.get("propA").await.unwrap(), Value::str("bbb"));

    assert!(matches!(
        iface.set("fixed", Value::Null).await.unwrap_err(),
        NetronError::InvalidArgument(_)
    ));
}

#[tokio::test]
async fn test_common_types_roundtrip_over_wire() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    beta.attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let (to_beta, _keep) = pair(&alpha, &beta).await;
    let iface = to_beta.query_interface("Sample").await.unwrap();

    let mut nested = BTreeMap::new();
    nested.insert("list".to_string(), Value::Array(vec![Value::Int(1)]));
    nested.insert(
        "inner".to_string(),
        Value::object([("flag".to_string(), Value::Bool(true))]),
    );

    let samples = vec![
        Value::str("text"),
        Value::Int(-7),
        Value::Float(2.75),
        Value::Date(1_700_000_000_000),
        Value::Bool(true),
        Value::Null,
        Value::Undefined,
        Value::Array(vec![Value::Int(1), Value::str("two"), Value::Null]),
        Value::Object(nested),
        Value::BigInt(36_893_488_147_419_103_232),
        Value::Set(vec![Value::str("a"), Value::str("b")]),
        Value::Map(vec![
            (Value::Int(1), Value::str("one")),
            (Value::str("k"), Value::Bool(false)),
        ]),
    ];
    for sample in samples {
        iface.set("propA", sample.clone()).await.unwrap();
        assert_eq!(iface.get("propA").await.unwrap(), sample);
    }
}

#[tokio::test]
async fn test_post_detach_invalidation_remote() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    beta.attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let (to_beta, _keep) = pair(&alpha, &beta).await;

    let iface = to_beta.query_interface("Sample").await.unwrap();
    assert_eq!(
        iface.call("methodA", vec![]).await.unwrap(),
        Value::str("aaa")
    );

    beta.detach_context("Sample").await.unwrap();
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
async fn test_inversion_of_control_callback() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    alpha
        .attach_context(Arc::new(Consumer::new()), None)
        .await
        .unwrap();
    let (_to_beta, to_alpha) = pair(&alpha, &beta).await;

    let consumer = to_alpha.query_interface("Consumer").await.unwrap();

    // The bell lives on beta; crossing the wire attaches it weakly and the
    // consumer on alpha receives a live proxy for it.
    let bell = Arc::new(Bell::new());
    let ctx: Arc<dyn ContextObject> = bell.clone();
    consumer
        .call("register", vec![Value::Ctx(ctx)])
        .await
        .unwrap();
    assert_eq!(beta.stub_count(), 1);

    // Ringing on alpha calls back into beta's process.
    let answer = consumer.call("ring", vec![]).await.unwrap();
    assert_eq!(answer, Value::str("rung"));
    assert_eq!(bell.rings.lock().unwrap().as_slice(), &[Value::str("ding")]);
}

#[tokio::test]
async fn test_weak_context_collected_after_remote_release() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    alpha
        .attach_context(Arc::new(Consumer::new()), None)
        .await
        .unwrap();
    let (_to_beta, to_alpha) = pair(&alpha, &beta).await;

    let consumer = to_alpha.query_interface("Consumer").await.unwrap();
    let bell: Arc<dyn ContextObject> = Arc::new(Bell::new());
    let def_id = consumer
        .call("register", vec![Value::Ctx(bell)])
        .await
        .unwrap()
        .as_i64()
        .unwrap() as u64;
    assert_eq!(beta.stub_count(), 1);

    // Alpha drops its sole hold on the weak bell definition.
    let alpha_peer = alpha.get_peer(Some(beta.id())).unwrap();
    let held = alpha_peer
        .query_interface_by_definition(def_id)
        .await
        .unwrap();
    alpha_peer.release_interface(&held).await.unwrap();

    let probe = beta.clone();
    eventually(move || probe.stub_count() == 0).await;

    // Anything still holding a proxy for that definition now gets the
    // not-exists failure from the exposing side.
    assert!(matches!(
        consumer.call("ring", vec![]).await.unwrap_err(),
        NetronError::NotExists(_)
    ));
}

#[tokio::test]
async fn test_batch_task_isolation_remote() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    let (to_beta, _keep) = pair(&alpha, &beta).await;

    let results = to_beta
        .run_task(vec![TaskSpec::new("netronGetConfig"), TaskSpec::new("doesNotExist")].into())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results["netronGetConfig"].result().unwrap(),
        &beta.options().to_value()
    );
    assert_eq!(results["doesNotExist"].error().unwrap().kind, "NotExists");
}

#[tokio::test]
async fn test_get_peer_resolution() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    let stranger = Netron::new(options("gamma"));
    let (_to_beta, _to_alpha) = pair(&alpha, &beta).await;

    assert_eq!(alpha.get_peer(None).unwrap().id(), "alpha");
    assert_eq!(alpha.get_peer(Some("alpha")).unwrap().id(), "alpha");
    assert_eq!(alpha.get_peer(Some("beta")).unwrap().id(), "beta");
    assert!(matches!(
        alpha.get_peer(Some(stranger.id())).unwrap_err(),
        NetronError::Unknown(_)
    ));
}

#[tokio::test]
async fn test_get_peer_for_interface() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    beta.attach_context(Arc::new(Sample::new()), None)
        .await
        .unwrap();
    let (to_beta, _keep) = pair(&alpha, &beta).await;

    let iface = to_beta.query_interface("Sample").await.unwrap();
    let owner = alpha.get_peer_for_interface(&iface).unwrap();
    assert_eq!(owner.id(), "beta");

    to_beta.release_interface(&iface).await.unwrap();
    assert!(matches!(
        alpha.get_peer_for_interface(&iface).unwrap_err(),
        NetronError::NotValid(_)
    ));
}

#[tokio::test]
async fn test_application_error_crosses_wire_intact() {
    struct Thrower;

    #[async_trait]
    impl ContextObject for Thrower {
        fn meta(&self) -> ContextMeta {
            ContextMeta::new("Thrower", PublicMembers::new().method("boom"))
        }

        async fn invoke(&self, _member: &str, _args: Vec<Value>) -> Result<Value> {
            Err(NetronError::Remote(
                netron_common::ErrorDescriptor::new("RangeError", "index 9 out of range")
                    .with_field("index", Value::Int(9)),
            ))
        }
    }

    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    beta.attach_context(Arc::new(Thrower), None).await.unwrap();
    let (to_beta, _keep) = pair(&alpha, &beta).await;

    let iface = to_beta.query_interface("Thrower").await.unwrap();
    match iface.call("boom", vec![]).await.unwrap_err() {
        NetronError::Remote(descriptor) => {
            assert_eq!(descriptor.kind, "RangeError");
            assert_eq!(descriptor.message, "index 9 out of range");
            assert_eq!(descriptor.fields.get("index"), Some(&Value::Int(9)));
        }
        other => panic!("expected application error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_peer_disconnect_event_and_cleanup() {
    let alpha = Netron::new(options("alpha"));
    let beta = Netron::new(options("beta"));
    let (_to_beta, _to_alpha) = pair(&alpha, &beta).await;

    alpha.delete_peer("beta").await.unwrap();
    assert!(matches!(
        alpha.get_peer(Some("beta")).unwrap_err(),
        NetronError::Unknown(_)
    ));
    assert!(matches!(
        alpha.delete_peer("beta").await.unwrap_err(),
        NetronError::Unknown(_)
    ));
}
