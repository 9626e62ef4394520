//! Engine: the process-wide owner of adapters, proxies and connections.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use xic::{codec::Map, Engine, MethodServant};
//!
//! let engine = Engine::builder().identity("demo").build();
//! let adapter = engine.create_adapter("", "@tcp+127.0.0.1+0").await?;
//! adapter.add_servant(
//!     "Test",
//!     Arc::new(
//!         MethodServant::builder()
//!             .method("echo", |quest, _| async move { Ok(quest.args) })
//!             .build(),
//!     ),
//! )?;
//! adapter.activate();
//!
//! let proxy = engine.string_to_proxy(&format!("Test {}", adapter.endpoints_string()))?;
//! let answer = proxy.invoke("echo", Map::from([("a", 1)])).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::adapter::Adapter;
use crate::codec::{Map, Value};
use crate::config::{EngineConfig, Tunables, TUNABLE_SECTIONS};
use crate::connection::{Connection, Direction};
use crate::dlog::{default_sink, LogSink};
use crate::error::{Result, XicError};
use crate::handler::{MethodServant, Servant};
use crate::pool::TaskPool;
use crate::proxy::Proxy;
use crate::transport::Endpoint;

/// Reserved service name of the built-in engine servant.
pub const ENGINE_SERVICE: &str = "\0";

/// Adapter name used when none is given.
pub const DEFAULT_ADAPTER_NAME: &str = "xic";

const BASE57: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const BASE57_LETTERS: usize = 49;

/// Random id in base 57. The first character is always a letter.
fn random_base57_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|i| {
            let bound = if i == 0 { BASE57_LETTERS } else { BASE57.len() };
            BASE57[rng.gen_range(0..bound)] as char
        })
        .collect()
}

/// Engine version string.
pub fn version() -> String {
    format!("RS.xic.{}", env!("CARGO_PKG_VERSION"))
}

/// State shared by the engine and every connection it owns.
pub struct EngineCore {
    id: String,
    start_time: String,
    started: Instant,
    identity: String,
    tunables: RwLock<Tunables>,
    server_pool: TaskPool,
    client_pool: TaskPool,
    sink: Arc<dyn LogSink>,
    outgoing: Mutex<HashMap<String, Arc<Connection>>>,
    incoming: Mutex<HashMap<u64, Arc<Connection>>>,
    next_con_id: AtomicU64,
    servant: OnceLock<Arc<dyn Servant>>,
    shutdown: watch::Sender<bool>,
}

impl EngineCore {
    fn new(config: &EngineConfig, sink: Arc<dyn LogSink>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: random_base57_id(23),
            start_time: chrono::Local::now().format("%Y%m%d-%H%M%S").to_string(),
            started: Instant::now(),
            identity: config.identity.clone(),
            tunables: RwLock::new(config.tunables),
            server_pool: TaskPool::new("server", config.server_pool_size),
            client_pool: TaskPool::new("client", config.client_pool_size),
            sink,
            outgoing: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            next_con_id: AtomicU64::new(1),
            servant: OnceLock::new(),
            shutdown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current tunables, copied out.
    pub fn tunables(&self) -> Tunables {
        *self.tunables.read()
    }

    /// Apply a partial update, returning the changed sections.
    pub fn tune(&self, args: &Map) -> Result<Map> {
        let changed = self.tunables.write().tune(args)?;
        tracing::info!(changed = %crate::codec::textify(&changed.clone().into()), "tunables updated");
        Ok(changed)
    }

    pub(crate) fn server_pool(&self) -> &TaskPool {
        &self.server_pool
    }

    pub(crate) fn client_pool(&self) -> &TaskPool {
        &self.client_pool
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_con_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn dlog(&self, tag: &str, locus: &str, fields: &str) {
        self.sink.log(&self.identity, tag, locus, fields);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The built-in servant answering the reserved service.
    pub(crate) fn engine_servant(&self) -> Option<Arc<dyn Servant>> {
        self.servant.get().cloned()
    }

    /// Live outgoing connection to `endpoint`, created if needed.
    pub(crate) fn make_connection(self: &Arc<Self>, endpoint: &Endpoint) -> Result<Arc<Connection>> {
        if self.is_shut_down() {
            return Err(XicError::EngineStopped);
        }
        let key = endpoint.to_string();
        let mut outgoing = self.outgoing.lock();
        if let Some(conn) = outgoing.get(&key) {
            if conn.is_live() {
                return Ok(conn.clone());
            }
        }
        let runtime = Handle::try_current().map_err(|_| {
            XicError::ConnectFailed(format!("{} (no tokio runtime)", key))
        })?;
        let conn = Connection::connect(self.clone(), runtime, endpoint.clone());
        tracing::debug!(id = conn.id(), endpoint = %key, "connecting");
        outgoing.insert(key, conn.clone());
        Ok(conn)
    }

    pub(crate) fn track_incoming(&self, conn: Arc<Connection>) {
        let id = conn.id();
        self.incoming.lock().insert(id, conn.clone());
        // It may have closed before it was tracked.
        if conn.state().is_closed() {
            self.incoming.lock().remove(&id);
        }
    }

    pub(crate) fn forget_connection(&self, conn: &Connection) {
        match conn.direction() {
            Direction::Incoming => {
                self.incoming.lock().remove(&conn.id());
            }
            Direction::Outgoing => {
                let key = conn.endpoint().to_string();
                let mut outgoing = self.outgoing.lock();
                if outgoing.get(&key).is_some_and(|c| c.id() == conn.id()) {
                    outgoing.remove(&key);
                }
            }
        }
    }

    /// Every tracked connection, outgoing first.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut all: Vec<Arc<Connection>> = self.outgoing.lock().values().cloned().collect();
        all.extend(self.incoming.lock().values().cloned());
        all
    }
}

impl std::fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCore")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("shutdown", &self.is_shut_down())
            .finish()
    }
}

pub(crate) struct EngineInner {
    core: Arc<EngineCore>,
    adapters: Mutex<HashMap<String, Arc<Adapter>>>,
    proxies: Mutex<HashMap<String, Arc<Proxy>>>,
    adapter_endpoints: HashMap<String, String>,
}

impl EngineInner {
    pub(crate) fn string_to_proxy(&self, s: &str) -> Result<Arc<Proxy>> {
        let key = s.trim().to_string();
        if let Some(proxy) = self.proxies.lock().get(&key) {
            return Ok(proxy.clone());
        }
        let proxy = Arc::new(Proxy::parse(self.core.clone(), &key)?);
        self.proxies.lock().insert(key, proxy.clone());
        Ok(proxy)
    }

    fn info(&self) -> Map {
        let core = &self.core;
        let tunables = core.tunables();

        let adapters: Map = self
            .adapters
            .lock()
            .iter()
            .map(|(name, a)| {
                let services: Vec<Value> = a.services().into_iter().map(Value::from).collect();
                let entry = Map::from([
                    ("endpoints", Value::from(a.endpoints_string())),
                    ("services", Value::from(services)),
                    ("catchall", Value::from(a.default_servant().is_some())),
                ]);
                (Value::from(name.as_str()), Value::from(entry))
            })
            .collect();
        let proxies: Vec<Value> = self
            .proxies
            .lock()
            .keys()
            .map(|k| Value::from(k.as_str()))
            .collect();

        let mut info = Map::new();
        info.insert("dlog.identity", core.identity());
        info.insert("engine.id", core.id());
        info.insert("engine.start_time", core.start_time.as_str());
        info.insert("engine.version", version());
        info.insert("engine.uptime", core.started.elapsed().as_secs());
        info.insert("adapter.count", adapters.len());
        info.insert("proxy.count", proxies.len());
        info.insert("connection.count", core.connections().len());
        info.insert("adapters", adapters);
        info.insert("proxies", proxies);
        info.insert("xic.message.size", tunables.message_size);
        for name in TUNABLE_SECTIONS {
            if let Some(section) = tunables.section(name) {
                info.insert(format!("xic.{}", name), section);
            }
        }
        info
    }
}

fn engine_servant(engine: Weak<EngineInner>) -> MethodServant {
    let for_info = engine.clone();
    MethodServant::builder()
        .method("info", move |_, _| {
            let engine = for_info.upgrade();
            async move { engine.map(|e| e.info()).ok_or(XicError::EngineStopped) }
        })
        .method("tune", move |quest, _| {
            let engine = engine.upgrade();
            async move {
                let engine = engine.ok_or(XicError::EngineStopped)?;
                engine.core.tune(&quest.args)
            }
        })
        .build()
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    sink: Option<Arc<dyn LogSink>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: None,
        }
    }

    /// Replace every setting with `config`.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity stamped on diagnostic log records.
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.config.identity = identity.into();
        self
    }

    pub fn server_pool_size(mut self, size: usize) -> Self {
        self.config.server_pool_size = size;
        self
    }

    pub fn client_pool_size(mut self, size: usize) -> Self {
        self.config.client_pool_size = size;
        self
    }

    /// Endpoints for an adapter created without any.
    pub fn adapter_endpoints(mut self, name: &str, endpoints: &str) -> Self {
        self.config
            .adapter_endpoints
            .insert(name.to_string(), endpoints.to_string());
        self
    }

    pub fn tunables(mut self, tunables: Tunables) -> Self {
        self.config.tunables = tunables;
        self
    }

    /// Largest message body accepted or sent.
    pub fn message_size(mut self, size: usize) -> Self {
        self.config.tunables.message_size = size;
        self
    }

    /// Destination of diagnostic records. Defaults to `tracing`.
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Engine {
        let sink = self.sink.unwrap_or_else(default_sink);
        let core = Arc::new(EngineCore::new(&self.config, sink));
        let inner = Arc::new(EngineInner {
            core: core.clone(),
            adapters: Mutex::new(HashMap::new()),
            proxies: Mutex::new(HashMap::new()),
            adapter_endpoints: self.config.adapter_endpoints,
        });
        let servant: Arc<dyn Servant> = Arc::new(engine_servant(Arc::downgrade(&inner)));
        let _ = core.servant.set(servant);

        tracing::debug!(id = %core.id, identity = %core.identity, "engine started");
        Engine { inner }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn core(&self) -> &Arc<EngineCore> {
        &self.inner.core
    }

    /// Random id chosen at startup.
    pub fn id(&self) -> &str {
        self.inner.core.id()
    }

    pub fn version(&self) -> String {
        version()
    }

    pub fn tunables(&self) -> Tunables {
        self.inner.core.tunables()
    }

    /// Apply a partial tunables update, as the built-in `tune` method does.
    pub fn tune(&self, args: &Map) -> Result<Map> {
        self.inner.core.tune(args)
    }

    /// Snapshot served by the built-in `info` method.
    pub fn info(&self) -> Map {
        self.inner.info()
    }

    /// Bind an adapter's listeners.
    ///
    /// An empty `name` means `xic`. Empty `endpoints` fall back to the
    /// configured endpoints for that name. Call [`Adapter::activate`] to
    /// start accepting.
    pub async fn create_adapter(&self, name: &str, endpoints: &str) -> Result<Arc<Adapter>> {
        let core = &self.inner.core;
        if core.is_shut_down() {
            return Err(XicError::EngineStopped);
        }
        let name = if name.is_empty() { DEFAULT_ADAPTER_NAME } else { name };
        let endpoints = if endpoints.trim().is_empty() {
            self.inner
                .adapter_endpoints
                .get(name)
                .map(String::as_str)
                .unwrap_or("")
        } else {
            endpoints
        };

        let parsed = Endpoint::parse_list(endpoints)?;
        if parsed.is_empty() {
            return Err(XicError::EndpointMissing(format!("adapter={}", name)));
        }
        if self.inner.adapters.lock().contains_key(name) {
            return Err(XicError::ParameterData(format!("adapter {} already exists", name)));
        }

        let adapter = Adapter::bind(core.clone(), Arc::downgrade(&self.inner), name, parsed).await?;
        self.inner
            .adapters
            .lock()
            .insert(name.to_string(), adapter.clone());
        tracing::info!(adapter = name, endpoints = %adapter.endpoints_string(), "adapter bound");
        Ok(adapter)
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<Adapter>> {
        self.inner.adapters.lock().get(name).cloned()
    }

    /// Proxy for a string such as `Test @tcp+127.0.0.1+19999`. The same
    /// string yields the same proxy.
    pub fn string_to_proxy(&self, s: &str) -> Result<Arc<Proxy>> {
        self.inner.string_to_proxy(s)
    }

    /// Every tracked connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.core.connections()
    }

    /// Stop accepting and close every connection gracefully. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.core.shutdown.send_replace(true) {
            return;
        }
        tracing::info!(id = %self.inner.core.id, "engine shutting down");

        let adapters: Vec<Arc<Adapter>> = self.inner.adapters.lock().values().cloned().collect();
        for adapter in adapters {
            adapter.deactivate();
        }
        for conn in self.inner.core.connections() {
            conn.close(false);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.core.is_shut_down()
    }

    /// Resolve once [`shutdown`](Self::shutdown) has been called.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.core.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Resolve once every tracked connection has closed.
    pub async fn wait_closed(&self) {
        loop {
            let mut open = self.inner.core.connections();
            open.retain(|c| !c.state().is_closed());
            if open.is_empty() {
                return;
            }
            for conn in open {
                conn.wait_closed().await;
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("core", &self.inner.core).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Current;
    use crate::protocol::Quest;

    #[test]
    fn test_random_id_shape() {
        let id = random_base57_id(23);
        assert_eq!(id.len(), 23);
        assert!(id.chars().next().unwrap().is_ascii_alphabetic());
        assert!(id.bytes().all(|b| BASE57.contains(&b)));
        assert!(!id.contains('0') && !id.contains('l') && !id.contains('I'));
    }

    #[test]
    fn test_version() {
        assert!(version().starts_with("RS.xic."));
    }

    #[tokio::test]
    async fn test_info_lists_sections() {
        let engine = Engine::builder().identity("unit").build();
        let info = engine.info();

        assert_eq!(info.get_str("dlog.identity"), Some("unit"));
        assert_eq!(info.get_str("engine.id"), Some(engine.id()));
        assert_eq!(info.get_int("connection.count"), Some(0));
        assert_eq!(info.get_int("xic.message.size"), Some(16 * 1024 * 1024));
        for name in TUNABLE_SECTIONS {
            assert!(info.get_map(&format!("xic.{}", name)).is_some(), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_engine_servant_tune() {
        let engine = Engine::builder().build();
        let servant = engine.core().engine_servant().unwrap();

        let args = Map::from([("timeout", Map::from([("message", 2500)]))]);
        let quest = Quest::new(ENGINE_SERVICE, "tune", args);
        let current = Current::detached(&quest);
        let changed = servant.process(quest, current).await.unwrap().unwrap();

        assert_eq!(changed.get_map("timeout").unwrap().get_int("message"), Some(2500));
        assert_eq!(engine.tunables().timeout.message, 2500);
    }

    #[tokio::test]
    async fn test_create_adapter_needs_endpoints() {
        let engine = Engine::builder().build();
        assert!(matches!(
            engine.create_adapter("none", "").await,
            Err(XicError::EndpointMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_create_adapter_uses_configured_endpoints() {
        let engine = Engine::builder()
            .adapter_endpoints(DEFAULT_ADAPTER_NAME, "@tcp+127.0.0.1+0")
            .build();
        let adapter = engine.create_adapter("", "").await.unwrap();
        assert_eq!(adapter.name(), DEFAULT_ADAPTER_NAME);
        assert_ne!(adapter.endpoints()[0].port(), 0);
        assert!(engine.adapter(DEFAULT_ADAPTER_NAME).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let engine = Engine::builder().build();
        engine.shutdown();
        engine.shutdown();
        engine.wait_for_shutdown().await;
        engine.wait_closed().await;
        assert!(matches!(
            engine.create_adapter("x", "@tcp+127.0.0.1+0").await,
            Err(XicError::EngineStopped)
        ));
    }

    #[test]
    fn test_string_to_proxy_is_cached() {
        let engine = Engine::builder().build();
        let a = engine.string_to_proxy("Test @tcp+127.0.0.1+19999").unwrap();
        let b = engine.string_to_proxy(" Test @tcp+127.0.0.1+19999 ").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.info().get_int("proxy.count"), Some(1));
    }
}
