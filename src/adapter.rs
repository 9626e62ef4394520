//! Adapter: listeners plus the servants they dispatch to.
//!
//! An adapter binds its endpoints when it is created and starts accepting
//! on [`activate`](Adapter::activate). Each accepted socket becomes an
//! incoming [`Connection`] whose quests are routed by service name:
//!
//! ```text
//! quest.service ─► registered servant
//!              ├─► "\0" ─► engine servant (info, tune)
//!              ├─► default servant
//!              └─► ServiceNotFound
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;

use crate::connection::Connection;
use crate::engine::{EngineCore, EngineInner, ENGINE_SERVICE};
use crate::error::{Result, XicError};
use crate::handler::Servant;
use crate::proxy::Proxy;
use crate::transport::{format_list, tcp, Endpoint};

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub struct Adapter {
    me: Weak<Adapter>,
    name: String,
    core: Arc<EngineCore>,
    engine: Weak<EngineInner>,
    listeners: Vec<(Endpoint, Arc<TcpListener>)>,
    accepting: Mutex<Vec<AbortHandle>>,
    servants: RwLock<HashMap<String, Arc<dyn Servant>>>,
    default: RwLock<Option<Arc<dyn Servant>>>,
}

impl Adapter {
    /// Bind every endpoint. A port of 0 is replaced by the bound port.
    pub(crate) async fn bind(
        core: Arc<EngineCore>,
        engine: Weak<EngineInner>,
        name: &str,
        endpoints: Vec<Endpoint>,
    ) -> Result<Arc<Self>> {
        let mut listeners = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let listener = tcp::bind(&endpoint).await?;
            let port = listener.local_addr()?.port();
            listeners.push((endpoint.with_port(port), Arc::new(listener)));
        }

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            name: name.to_string(),
            core,
            engine,
            listeners,
            accepting: Mutex::new(Vec::new()),
            servants: RwLock::new(HashMap::new()),
            default: RwLock::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoints as bound.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.listeners.iter().map(|(ep, _)| ep.clone()).collect()
    }

    /// Bound endpoints joined as `@ep@ep`.
    pub fn endpoints_string(&self) -> String {
        format_list(&self.endpoints())
    }

    pub fn is_active(&self) -> bool {
        !self.accepting.lock().is_empty()
    }

    /// Start accepting on every listener. A second call does nothing.
    pub fn activate(&self) {
        let mut accepting = self.accepting.lock();
        if !accepting.is_empty() {
            return;
        }
        for (endpoint, listener) in &self.listeners {
            let task = tokio::spawn(accept_loop(
                self.me.clone(),
                endpoint.clone(),
                listener.clone(),
            ));
            accepting.push(task.abort_handle());
        }
        tracing::debug!(adapter = %self.name, endpoints = %self.endpoints_string(), "adapter active");
    }

    /// Stop accepting. Existing connections stay open.
    pub fn deactivate(&self) {
        let tasks = std::mem::take(&mut *self.accepting.lock());
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        tracing::debug!(adapter = %self.name, "adapter deactivated");
    }

    fn serve(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, endpoint: &Endpoint) {
        if self.core.is_shut_down() {
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(adapter = %self.name, %peer, "set_nodelay failed: {}", e);
        }
        let local = stream.local_addr().ok();
        let conn = Connection::accept(
            self.core.clone(),
            Some(self.clone()),
            endpoint.clone(),
            stream,
            local,
            Some(peer),
        );
        self.core.track_incoming(conn);
    }

    /// Register `servant` under `service` and return a proxy to it.
    pub fn add_servant(&self, service: &str, servant: Arc<dyn Servant>) -> Result<Arc<Proxy>> {
        if service.is_empty() {
            return Err(XicError::ServiceEmpty);
        }
        let engine = self.engine.upgrade().ok_or(XicError::EngineStopped)?;
        self.servants.write().insert(service.to_string(), servant);
        engine.string_to_proxy(&format!("{} {}", service, self.endpoints_string()))
    }

    pub fn remove_servant(&self, service: &str) -> Option<Arc<dyn Servant>> {
        self.servants.write().remove(service)
    }

    /// Servant registered under `service`. The reserved name `"\0"` finds
    /// the engine servant.
    pub fn find_servant(&self, service: &str) -> Option<Arc<dyn Servant>> {
        if service == ENGINE_SERVICE {
            return self.core.engine_servant();
        }
        self.servants.read().get(service).cloned()
    }

    pub fn default_servant(&self) -> Option<Arc<dyn Servant>> {
        self.default.read().clone()
    }

    /// Servant for quests whose service has no registered servant.
    pub fn set_default_servant(&self, servant: Arc<dyn Servant>) {
        *self.default.write() = Some(servant);
    }

    pub fn unset_default_servant(&self) {
        *self.default.write() = None;
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servants.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        for task in self.accepting.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints_string())
            .field("services", &self.services())
            .finish()
    }
}

async fn accept_loop(adapter: Weak<Adapter>, endpoint: Endpoint, listener: Arc<TcpListener>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let Some(adapter) = adapter.upgrade() else {
                    return;
                };
                adapter.serve(stream, peer, &endpoint);
            }
            Err(e) => {
                tracing::error!(endpoint = %endpoint, "accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::handler::MethodServant;

    fn echo() -> Arc<dyn Servant> {
        Arc::new(
            MethodServant::builder()
                .method("echo", |quest, _| async move { Ok(quest.args) })
                .build(),
        )
    }

    #[tokio::test]
    async fn test_bind_resolves_port() {
        let engine = Engine::builder().build();
        let adapter = engine.create_adapter("a", "@tcp+127.0.0.1+0").await.unwrap();
        let eps = adapter.endpoints();
        assert_eq!(eps.len(), 1);
        assert_ne!(eps[0].port(), 0);
        assert_eq!(adapter.endpoints_string(), format!("@tcp+127.0.0.1+{}", eps[0].port()));
    }

    #[tokio::test]
    async fn test_servant_registry() {
        let engine = Engine::builder().build();
        let adapter = engine.create_adapter("a", "@tcp+127.0.0.1+0").await.unwrap();

        let proxy = adapter.add_servant("Test", echo()).unwrap();
        assert_eq!(proxy.service(), "Test");
        assert_eq!(proxy.endpoints()[0].port(), adapter.endpoints()[0].port());
        assert!(adapter.find_servant("Test").is_some());
        assert!(adapter.find_servant("Other").is_none());
        assert!(adapter.find_servant(ENGINE_SERVICE).is_some());
        assert!(matches!(adapter.add_servant("", echo()), Err(XicError::ServiceEmpty)));

        adapter.set_default_servant(echo());
        assert!(adapter.default_servant().is_some());
        adapter.unset_default_servant();
        assert!(adapter.default_servant().is_none());

        assert!(adapter.remove_servant("Test").is_some());
        assert!(adapter.services().is_empty());
    }

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let engine = Engine::builder().build();
        let adapter = engine.create_adapter("a", "@tcp+127.0.0.1+0").await.unwrap();
        assert!(!adapter.is_active());

        adapter.activate();
        adapter.activate();
        assert!(adapter.is_active());

        adapter.deactivate();
        assert!(!adapter.is_active());
    }
}
