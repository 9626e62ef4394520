//! Echo server - serves `Test.echo` on a tcp endpoint.
//!
//! ```text
//! cargo run --example echo_server -- @tcp+127.0.0.1+19999
//! cargo run --example echo_client -- "Test @tcp+127.0.0.1+19999"
//! ```
//!
//! Diagnostic records go to `tracing`; set `RUST_LOG=xic=debug` to see
//! connection lifecycle events as well.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use xic::codec::Map;
use xic::{Engine, MethodServant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let endpoints = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "@tcp+127.0.0.1+19999".to_string());

    let engine = Engine::builder().identity("echo_server").build();
    let adapter = engine.create_adapter("", &endpoints).await?;

    let servant = MethodServant::builder()
        // Returns its arguments unchanged.
        .method("echo", |quest, _current| async move { Ok(quest.args) })
        .method("time", |_quest, _current| async move {
            let now = chrono::Local::now().to_rfc3339();
            Ok(Map::from([("time", now)]))
        })
        .build();
    let proxy = adapter.add_servant("Test", Arc::new(servant))?;
    adapter.activate();
    tracing::info!(%proxy, "serving");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => engine.shutdown(),
        _ = engine.wait_for_shutdown() => {}
    }
    engine.wait_closed().await;

    Ok(())
}
