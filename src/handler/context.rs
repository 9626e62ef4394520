//! Per-call context for servants.
//!
//! Every quest is processed with a [`Current`]. A handler that cannot
//! answer before returning calls [`Current::asynchronous`], keeps the
//! returned [`Waiter`] and returns `Ok(None)`. Exactly one answer goes out
//! per twoway quest: the first `response` wins, and a waiter dropped
//! without responding answers with a `ServantException`.
//!
//! # Example
//!
//! ```ignore
//! let servant = MethodServant::builder()
//!     .deferred("slow", |quest, current| async move {
//!         let waiter = current.asynchronous();
//!         tokio::spawn(async move {
//!             tokio::time::sleep(Duration::from_millis(50)).await;
//!             waiter.response(Ok(quest.args));
//!         });
//!         Ok(None)
//!     })
//!     .build();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::codec::Map;
use crate::connection::Connection;
use crate::error::{Result, XicError};
use crate::protocol::{Quest, TXID_ONEWAY};

/// What a connection remembers about a quest while it is processed.
#[derive(Debug, Clone)]
pub struct QuestInfo {
    pub txid: i32,
    pub service: String,
    pub method: String,
    started: Instant,
}

impl QuestInfo {
    pub fn new(quest: &Quest) -> Self {
        Self {
            txid: quest.txid,
            service: quest.service.clone(),
            method: quest.method.clone(),
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn is_oneway(&self) -> bool {
        self.txid == TXID_ONEWAY
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

struct Pending {
    con: Arc<Connection>,
    info: QuestInfo,
}

struct WaiterInner {
    pending: Mutex<Option<Pending>>,
}

impl Drop for WaiterInner {
    fn drop(&mut self) {
        if let Some(p) = self.pending.get_mut().take() {
            tracing::warn!(
                service = %p.info.service,
                method = %p.info.method,
                "deferred answer dropped without a response"
            );
            p.con.answer_quest(
                &p.info,
                Err(XicError::servant("deferred answer dropped without a response")),
            );
        }
    }
}

/// Channel for a deferred answer.
#[derive(Clone)]
pub struct Waiter {
    inner: Arc<WaiterInner>,
}

impl Waiter {
    fn new(pending: Option<Pending>) -> Self {
        Self {
            inner: Arc::new(WaiterInner {
                pending: Mutex::new(pending),
            }),
        }
    }

    /// Deliver the answer. Returns false if one was already delivered.
    pub fn response(&self, result: Result<Map>) -> bool {
        let Some(p) = self.inner.pending.lock().take() else {
            return false;
        };
        p.con.answer_quest(&p.info, result);
        true
    }

    pub fn is_responded(&self) -> bool {
        self.inner.pending.lock().is_none()
    }
}

enum Mode {
    Direct,
    Deferred(Waiter),
    Settled,
}

struct CurrentInner {
    con: Option<Arc<Connection>>,
    info: QuestInfo,
    mode: Mutex<Mode>,
}

/// Context of one quest being processed.
#[derive(Clone)]
pub struct Current {
    inner: Arc<CurrentInner>,
}

impl Current {
    pub(crate) fn new(con: Arc<Connection>, info: QuestInfo) -> Self {
        Self::build(Some(con), info)
    }

    /// Context not tied to a connection. Deferred answers go nowhere.
    pub fn detached(quest: &Quest) -> Self {
        Self::build(None, QuestInfo::new(quest))
    }

    fn build(con: Option<Arc<Connection>>, info: QuestInfo) -> Self {
        Self {
            inner: Arc::new(CurrentInner {
                con,
                info,
                mode: Mutex::new(Mode::Direct),
            }),
        }
    }

    /// The connection the quest arrived on.
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.inner.con.as_ref()
    }

    pub fn info(&self) -> &QuestInfo {
        &self.inner.info
    }

    pub fn is_oneway(&self) -> bool {
        self.inner.info.is_oneway()
    }

    /// Switch to deferred mode and return the waiter.
    ///
    /// Repeated calls return the same waiter. Called after the connection
    /// has already settled the quest, it returns an inert waiter.
    pub fn asynchronous(&self) -> Waiter {
        let mut mode = self.inner.mode.lock();
        match &*mode {
            Mode::Deferred(w) => w.clone(),
            Mode::Settled => Waiter::new(None),
            Mode::Direct => {
                let pending = self.inner.con.clone().map(|con| Pending {
                    con,
                    info: self.inner.info.clone(),
                });
                let waiter = Waiter::new(pending);
                *mode = Mode::Deferred(waiter.clone());
                waiter
            }
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(*self.inner.mode.lock(), Mode::Deferred(_))
    }

    /// End the servant call and hand over the waiter, if any.
    pub(crate) fn settle(&self) -> Option<Waiter> {
        match std::mem::replace(&mut *self.inner.mode.lock(), Mode::Settled) {
            Mode::Deferred(w) => Some(w),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asynchronous_is_idempotent() {
        let quest = Quest::new("S", "m", Map::new());
        let current = Current::detached(&quest);
        assert!(!current.is_deferred());

        let a = current.asynchronous();
        let b = current.asynchronous();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert!(current.is_deferred());
    }

    #[test]
    fn test_settle_hands_over_waiter_once() {
        let quest = Quest::new("S", "m", Map::new());
        let current = Current::detached(&quest);
        let _w = current.asynchronous();

        assert!(current.settle().is_some());
        assert!(current.settle().is_none());

        // After settling, a new waiter is inert.
        let late = current.asynchronous();
        assert!(late.is_responded());
        assert!(!late.response(Ok(Map::new())));
    }

    #[test]
    fn test_quest_info() {
        let info = QuestInfo::new(&Quest::oneway("S", "m", Map::new()));
        assert!(info.is_oneway());
        assert_eq!(info.service, "S");
    }
}
