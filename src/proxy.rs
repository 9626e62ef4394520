//! Client-side handle to a remote service.
//!
//! A proxy string names a service and its endpoints:
//!
//! ```text
//! Test @tcp+10.0.0.1+5000@tcp+10.0.0.2+5000 timeout=3000
//! └┬─┘ └──────────────┬─────────────────────────────┘
//! service          endpoints, tried round-robin
//! ```
//!
//! Connections are shared through the engine: two proxies naming the same
//! endpoint use the same connection. When the selected connection is gone
//! or closing, the proxy moves on to the next endpoint.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec::Map;
use crate::connection::{Completion, Connection, QuestResult};
use crate::engine::EngineCore;
use crate::error::{Result, XicError};
use crate::protocol::Quest;
use crate::transport::Endpoint;

struct Selector {
    index: usize,
    cons: Vec<Option<Arc<Connection>>>,
}

enum Target {
    Endpoints {
        endpoints: Vec<Endpoint>,
        selector: Mutex<Selector>,
    },
    /// Bound to one connection, usually an incoming one.
    Fixed(Arc<Connection>),
}

/// Handle for invoking methods of one remote service.
pub struct Proxy {
    core: Arc<EngineCore>,
    service: String,
    text: String,
    target: Target,
    context: RwLock<Map>,
}

impl Proxy {
    /// Parse a proxy string such as `Test @tcp+127.0.0.1+19999`.
    pub(crate) fn parse(core: Arc<EngineCore>, s: &str) -> Result<Self> {
        let text = s.trim();
        let (service, endpoints) = match text.split_once('@') {
            Some((service, rest)) => (service.trim(), rest),
            None => (text, ""),
        };
        if service.is_empty() || service.contains(char::is_whitespace) {
            return Err(XicError::ServiceParse(text.to_string()));
        }

        let endpoints = Endpoint::parse_list(endpoints)?;
        if endpoints.is_empty() {
            return Err(XicError::EndpointMissing(text.to_string()));
        }

        // Start on the last slot so the first selection lands on endpoint 0.
        let selector = Selector {
            index: endpoints.len() - 1,
            cons: vec![None; endpoints.len()],
        };
        Ok(Self {
            core,
            service: service.to_string(),
            text: text.to_string(),
            target: Target::Endpoints {
                endpoints,
                selector: Mutex::new(selector),
            },
            context: RwLock::new(Map::new()),
        })
    }

    pub(crate) fn fixed(core: Arc<EngineCore>, service: &str, conn: Arc<Connection>) -> Result<Self> {
        let service = service.trim();
        if service.is_empty() {
            return Err(XicError::ServiceParse(service.to_string()));
        }
        Ok(Self {
            core,
            service: service.to_string(),
            text: format!("{} @{}", service, conn.endpoint()),
            target: Target::Fixed(conn),
            context: RwLock::new(Map::new()),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.target, Target::Fixed(_))
    }

    /// Endpoints of a routed proxy, empty for a fixed one.
    pub fn endpoints(&self) -> &[Endpoint] {
        match &self.target {
            Target::Endpoints { endpoints, .. } => endpoints,
            Target::Fixed(_) => &[],
        }
    }

    /// Context sent with every quest.
    pub fn context(&self) -> Map {
        self.context.read().clone()
    }

    pub fn set_context(&self, context: Map) {
        *self.context.write() = context;
    }

    /// Same service at other endpoints.
    pub fn with_endpoints(&self, endpoints: &str) -> Result<Proxy> {
        if self.is_fixed() {
            return Err(XicError::ProxyFixed);
        }
        let proxy = Proxy::parse(self.core.clone(), &format!("{} {}", self.service, endpoints))?;
        proxy.set_context(self.context());
        Ok(proxy)
    }

    /// The connection the next quest goes out on.
    pub fn connection(&self) -> Result<Arc<Connection>> {
        let (endpoints, selector) = match &self.target {
            Target::Fixed(conn) => return Ok(conn.clone()),
            Target::Endpoints {
                endpoints,
                selector,
            } => (endpoints, selector),
        };

        let mut sel = selector.lock();
        if let Some(conn) = &sel.cons[sel.index] {
            if conn.is_live() {
                return Ok(conn.clone());
            }
        }

        sel.index = (sel.index + 1) % endpoints.len();
        let conn = self.core.make_connection(&endpoints[sel.index])?;
        let index = sel.index;
        sel.cons[index] = Some(conn.clone());
        Ok(conn)
    }

    /// A quest carrying `ctx`, or the proxy context when none is given.
    fn quest(&self, method: &str, args: Map, ctx: Option<Map>) -> Quest {
        let ctx = ctx.unwrap_or_else(|| self.context());
        Quest::new(self.service.as_str(), method, args).with_context(ctx)
    }

    /// Call a method and wait for its answer.
    pub async fn invoke(&self, method: &str, args: Map) -> Result<Map> {
        self.invoke_with_context(method, args, None).await
    }

    /// [`Proxy::invoke`] with a context for this call only.
    pub async fn invoke_with_context(
        &self,
        method: &str,
        args: Map,
        ctx: Option<Map>,
    ) -> Result<Map> {
        self.invoke_async_with_context(method, args, None, ctx)
            .args()
            .await
    }

    /// Send a twoway quest and return its result without waiting.
    ///
    /// Failures to obtain a connection show up as an already failed result.
    pub fn invoke_async(
        &self,
        method: &str,
        args: Map,
        callback: Option<Arc<dyn Completion>>,
    ) -> QuestResult {
        self.invoke_async_with_context(method, args, callback, None)
    }

    pub fn invoke_async_with_context(
        &self,
        method: &str,
        args: Map,
        callback: Option<Arc<dyn Completion>>,
        ctx: Option<Map>,
    ) -> QuestResult {
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(e) => return QuestResult::failed(self.service.as_str(), method, callback, e),
        };
        conn.send_quest(self.quest(method, args, ctx), callback.clone())
            .unwrap_or_else(|| {
                QuestResult::failed(self.service.as_str(), method, callback, XicError::ConnectionClosed)
            })
    }

    /// Send a oneway quest. Returns once it is queued.
    pub fn invoke_oneway(&self, method: &str, args: Map) -> Result<()> {
        self.invoke_oneway_with_context(method, args, None)
    }

    pub fn invoke_oneway_with_context(
        &self,
        method: &str,
        args: Map,
        ctx: Option<Map>,
    ) -> Result<()> {
        let conn = self.connection()?;
        let mut quest = self.quest(method, args, ctx);
        quest.txid = crate::protocol::TXID_ONEWAY;
        conn.send_quest(quest, None);
        Ok(())
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("service", &self.service)
            .field("text", &self.text)
            .field("fixed", &self.is_fixed())
            .finish()
    }
}
