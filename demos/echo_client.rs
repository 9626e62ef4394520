//! Echo client - calls `Test.echo` and prints the answer.
//!
//! Run [`echo_server`](../echo_server.rs) first.

use tracing_subscriber::EnvFilter;
use xic::codec::{textify, Map, Value};
use xic::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Test @tcp+127.0.0.1+19999".to_string());

    let engine = Engine::builder().identity("echo_client").build();
    let proxy = engine.string_to_proxy(&target)?;

    let mut args = Map::new();
    args.insert("message", "hello");
    args.insert("n", 42);
    let answer = proxy.invoke("echo", args).await?;
    println!("{}", textify(&Value::from(answer)));

    // Oneway: no answer comes back.
    proxy.invoke_oneway("echo", Map::new())?;

    engine.shutdown();
    engine.wait_closed().await;
    Ok(())
}
