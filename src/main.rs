//! Wire an agent and an inspector together over an in-process channel and
//! exercise events, calls, and backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devtools_bridge::{
    Bridge, BridgeConfig, BridgeError, ChannelTransport, HandlerError, SHUTDOWN_EVENT,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    devtools_bridge::init_tracing();

    if let Err(error) = run().await {
        eprintln!("bridge demo failed: {}", devtools_bridge::flatten_error(&error));
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BridgeError> {
    let config = BridgeConfig::from_env();
    let (agent_side, inspector_side) = ChannelTransport::pair();
    let agent = Bridge::builder(agent_side).config(config.clone()).build();
    let inspector = Bridge::builder(inspector_side).config(config).build();

    agent.on_call_sync("echo", |args| {
        Ok(args.into_iter().next().unwrap_or(Value::Null))
    })?;
    agent.on_call("slowSum", |args: Vec<Value>| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok::<_, HandlerError>(json!(sum))
    })?;

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    inspector.on("storeChanged", move |data: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%data, "inspector saw store change");
    });
    let shutdown = Arc::new(Notify::new());
    let notify = shutdown.clone();
    inspector.once(SHUTDOWN_EVENT, move |_: &Value| notify.notify_one());

    for value in [json!(null), json!(42), json!("s"), json!([1, 2, 3]), json!({"a": 1})] {
        let echoed = inspector.call("echo", vec![value.clone()]).await?;
        tracing::info!(sent = %value, %echoed, "echo round trip");
    }

    let sum: i64 = inspector.call_as("slowSum", (1, 2, 3)).await?;
    tracing::info!(sum, "slow handler answered");

    match inspector.call("missing", vec![]).await {
        Err(err) => tracing::info!(error = %err, "unknown call rejected"),
        Ok(value) => tracing::warn!(%value, "unexpected answer for unknown call"),
    }

    inspector.pause();
    for i in 0..500 {
        agent.emit("storeChanged", json!({ "revision": i }));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    inspector.resume();

    agent.emit(SHUTDOWN_EVENT, Value::Null);
    shutdown.notified().await;
    tracing::info!(
        events = received.load(Ordering::SeqCst),
        agent = ?agent.stats(),
        inspector = ?inspector.stats(),
        "demo finished"
    );
    Ok(())
}
