//! # xic
//!
//! Asynchronous XIC RPC engine.
//!
//! ## Layers
//!
//! - **Codec** ([`codec`]): the VBS self-describing binary value format
//! - **Framing** ([`protocol`]): 8-byte headers and Quest/Answer bodies
//! - **Connections** ([`connection`]): one socket multiplexing many
//!   concurrent requests, with a graceful close protocol
//! - **Engine** ([`Engine`], [`Adapter`], [`Proxy`]): listeners and
//!   servants on the server side, routed proxies on the client side
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xic::{codec::Map, Engine, MethodServant};
//!
//! #[tokio::main]
//! async fn main() -> xic::Result<()> {
//!     let engine = Engine::builder().build();
//!     let adapter = engine.create_adapter("", "@tcp+127.0.0.1+19999").await?;
//!     adapter.add_servant(
//!         "Test",
//!         Arc::new(
//!             MethodServant::builder()
//!                 .method("echo", |quest, _current| async move { Ok(quest.args) })
//!                 .build(),
//!         ),
//!     )?;
//!     adapter.activate();
//!
//!     let proxy = engine.string_to_proxy("Test @tcp+127.0.0.1+19999")?;
//!     let answer = proxy.invoke("echo", Map::from([("a", 1)])).await?;
//!     assert_eq!(answer.get_int("a"), Some(1));
//!
//!     engine.shutdown();
//!     engine.wait_closed().await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dlog;
pub mod engine;
pub mod error;
pub mod handler;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod transport;

mod writer;

pub use adapter::Adapter;
pub use config::{EngineConfig, Tunables};
pub use connection::{Completion, Connection, ConnectionState, QuestResult};
pub use engine::{Engine, EngineBuilder};
pub use error::{RemoteException, Result, VbsError, XicError};
pub use handler::{Current, MethodServant, Servant, Waiter};
pub use proxy::Proxy;
