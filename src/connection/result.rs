//! Pending result of a twoway quest.
//!
//! A [`QuestResult`] is created when a quest is registered with a
//! connection and resolved exactly once: by the matching answer, or by the
//! connection failing. Waiting on it never hangs past the connection's
//! lifetime because disconnect resolves every pending entry.
//!
//! ```text
//! send_quest ─► register ─► writer ─► quest_sent() ─► Completion::sent
//!                   │
//!     answer ───────┴──► resolve(Ok(answer)) ─► Completion::completed
//!     disconnect ───────► resolve(Err(cause))
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::codec::Map;
use crate::error::{Result, XicError};
use crate::protocol::{Answer, TXID_ASSIGN};

/// Callbacks for an asynchronous invocation.
///
/// Both run on the connection's tasks and must not block.
pub trait Completion: Send + Sync {
    /// The quest has been written to the socket.
    fn sent(&self, _result: &QuestResult) {}

    /// The result has been resolved. Called exactly once.
    fn completed(&self, result: &QuestResult);
}

impl<F> Completion for F
where
    F: Fn(&QuestResult) + Send + Sync,
{
    fn completed(&self, result: &QuestResult) {
        self(result)
    }
}

struct Inner {
    service: String,
    method: String,
    txid: AtomicI32,
    started: Instant,
    sent: AtomicBool,
    callback: Option<Arc<dyn Completion>>,
    outcome: OnceLock<Result<Answer>>,
    done: watch::Sender<bool>,
}

/// Shared handle to a pending answer.
#[derive(Clone)]
pub struct QuestResult {
    inner: Arc<Inner>,
}

impl QuestResult {
    pub(crate) fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        callback: Option<Arc<dyn Completion>>,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                service: service.into(),
                method: method.into(),
                txid: AtomicI32::new(TXID_ASSIGN),
                started: Instant::now(),
                sent: AtomicBool::new(false),
                callback,
                outcome: OnceLock::new(),
                done,
            }),
        }
    }

    /// A result that has already failed.
    pub(crate) fn failed(
        service: impl Into<String>,
        method: impl Into<String>,
        callback: Option<Arc<dyn Completion>>,
        err: XicError,
    ) -> Self {
        let result = Self::new(service, method, callback);
        result.resolve(Err(err));
        result
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Assigned transaction id, -1 before assignment.
    pub fn txid(&self) -> i32 {
        self.inner.txid.load(Ordering::Acquire)
    }

    pub(crate) fn set_txid(&self, txid: i32) {
        self.inner.txid.store(txid, Ordering::Release);
    }

    /// Time since the quest was issued.
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn is_sent(&self) -> bool {
        self.inner.sent.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// The outcome, if resolved.
    pub fn outcome(&self) -> Option<&Result<Answer>> {
        self.inner.outcome.get()
    }

    /// Wait for resolution and return the answer or the local failure.
    ///
    /// A failure answer from the peer is still `Ok` here; use
    /// [`QuestResult::args`] to turn it into an error.
    pub async fn wait(&self) -> Result<Answer> {
        let mut rx = self.inner.done.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|done| *done).await;
        match self.inner.outcome.get() {
            Some(outcome) => outcome.clone(),
            None => Err(XicError::ConnectionClosed),
        }
    }

    /// Wait and return the answer arguments, or the remote or local error.
    pub async fn args(&self) -> Result<Map> {
        self.wait().await?.into_result()
    }

    pub(crate) fn quest_sent(&self) {
        if self.inner.sent.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cb) = &self.inner.callback {
            cb.sent(self);
        }
    }

    /// Resolve the result. Returns false if it was already resolved.
    pub(crate) fn resolve(&self, outcome: Result<Answer>) -> bool {
        let answered = outcome.is_ok();
        if self.inner.outcome.set(outcome).is_err() {
            tracing::error!(
                txid = self.txid(),
                service = %self.inner.service,
                method = %self.inner.method,
                "quest result resolved twice"
            );
            debug_assert!(false, "quest result resolved twice");
            return false;
        }
        // An answer can overtake the writer's sent notice.
        if answered {
            self.quest_sent();
        }
        self.inner.done.send_replace(true);
        if let Some(cb) = &self.inner.callback {
            cb.completed(self);
        }
        true
    }
}

impl fmt::Debug for QuestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestResult")
            .field("txid", &self.txid())
            .field("service", &self.inner.service)
            .field("method", &self.inner.method)
            .field("sent", &self.is_sent())
            .field("completed", &self.is_completed())
            .finish()
    }
}
