//! Minimal end-to-end demo: two netrons wired over an in-memory channel,
//! one exposing a counter context, the other driving it through a proxy.
//!
//! ```bash
//! cargo run --example loopback
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use netron::{Netron, NetronOptions, Peer};
use netron_common::{
    memory_pair, ContextMeta, ContextObject, NetronError, PublicMembers, Result, Value,
};

struct Counter {
    total: AtomicI64,
}

#[async_trait]
impl ContextObject for Counter {
    fn meta(&self) -> ContextMeta {
        ContextMeta::new(
            "Counter",
            PublicMembers::new()
                .method("add")
                .property("total", true),
        )
        .with_description("a running total")
    }

    async fn invoke(&self, member: &str, args: Vec<Value>) -> Result<Value> {
        match member {
            "add" => {
                let n = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| NetronError::InvalidArgument("add expects an integer".into()))?;
                Ok(Value::Int(self.total.fetch_add(n, Ordering::SeqCst) + n))
            }
            other => Err(NetronError::NotExists(format!("method '{}'", other))),
        }
    }

    async fn get(&self, member: &str) -> Result<Value> {
        match member {
            "total" => Ok(Value::Int(self.total.load(Ordering::SeqCst))),
            other => Err(NetronError::NotExists(format!("property '{}'", other))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server = Netron::new(NetronOptions::new().with_id("server"));
    let client = Netron::new(NetronOptions::new().with_id("client"));
    server
        .attach_context(Arc::new(Counter { total: AtomicI64::new(0) }), None)
        .await?;

    let (left, right) = memory_pair(64);
    let (to_client, to_server) = tokio::join!(
        server.add_peer("client", left),
        client.add_peer("server", right),
    );
    let (_to_client, to_server) = (to_client?, to_server?);

    let counter = to_server.query_interface("Counter").await?;
    for n in [3, 4, 35] {
        let total = counter.call("add", vec![Value::Int(n)]).await?;
        tracing::info!(added = n, ?total, "call answered");
    }
    let total = counter.get("total").await?;
    tracing::info!(?total, "final total");

    client.shutdown().await?;
    server.shutdown().await?;
    Ok(())
}
