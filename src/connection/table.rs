//! Transaction table: live txid to pending result.
//!
//! Id assignment and insertion happen under one lock, before the quest is
//! queued, so an answer can never arrive ahead of its entry. Draining on
//! disconnect takes the same lock and marks the table closed, after which
//! registration fails.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::result::QuestResult;
use crate::error::{Result, XicError};

/// Next transaction id after `last`. Never 0 or negative.
#[inline]
pub fn next_txid(last: i32) -> i32 {
    if last < 1 || last == i32::MAX {
        1
    } else {
        last + 1
    }
}

#[derive(Default)]
struct Inner {
    last_txid: i32,
    pending: HashMap<i32, QuestResult>,
    closed: Option<XicError>,
}

/// Per-connection map of outstanding twoway quests.
#[derive(Default)]
pub struct TransactionTable {
    inner: Mutex<Inner>,
    armed: Notify,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a txid to `result` and insert it.
    ///
    /// Fails with the drain cause once the table has been drained.
    pub fn register(&self, result: &QuestResult) -> Result<i32> {
        let mut inner = self.inner.lock();
        if let Some(cause) = &inner.closed {
            return Err(cause.clone());
        }

        let mut txid = next_txid(inner.last_txid);
        while inner.pending.contains_key(&txid) {
            txid = next_txid(txid);
        }
        inner.last_txid = txid;

        result.set_txid(txid);
        let was_empty = inner.pending.is_empty();
        inner.pending.insert(txid, result.clone());
        drop(inner);

        if was_empty {
            self.armed.notify_one();
        }
        Ok(txid)
    }

    /// Remove the entry for `txid`.
    pub fn take(&self, txid: i32) -> Option<QuestResult> {
        self.inner.lock().pending.remove(&txid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Remove every entry and refuse further registration.
    ///
    /// The caller resolves the returned results outside the lock.
    pub fn drain(&self, cause: XicError) -> Vec<QuestResult> {
        let mut inner = self.inner.lock();
        if inner.closed.is_none() {
            inner.closed = Some(cause);
        }
        inner.pending.drain().map(|(_, r)| r).collect()
    }

    /// Notified when the table goes from empty to non-empty.
    pub(crate) fn armed(&self) -> &Notify {
        &self.armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn result() -> QuestResult {
        QuestResult::new("S", "m", None)
    }

    #[test]
    fn test_next_txid_wraps() {
        assert_eq!(next_txid(0), 1);
        assert_eq!(next_txid(1), 2);
        assert_eq!(next_txid(i32::MAX - 1), i32::MAX);
        assert_eq!(next_txid(i32::MAX), 1);
        assert_eq!(next_txid(-7), 1);
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let table = TransactionTable::new();
        let a = result();
        let b = result();
        assert_eq!(table.register(&a).unwrap(), 1);
        assert_eq!(table.register(&b).unwrap(), 2);
        assert_eq!(a.txid(), 1);
        assert_eq!(table.len(), 2);

        assert!(table.take(1).is_some());
        assert!(table.take(1).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_wrap_skips_ids_in_use() {
        let table = TransactionTable::new();
        let first = result();
        table.register(&first).unwrap();
        table.inner.lock().last_txid = i32::MAX;

        let next = result();
        assert_eq!(table.register(&next).unwrap(), 2);
    }

    #[test]
    fn test_drain_closes_table() {
        let table = TransactionTable::new();
        for _ in 0..3 {
            table.register(&result()).unwrap();
        }
        let drained = table.drain(XicError::ConnectionLost("peer gone".into()));
        assert_eq!(drained.len(), 3);
        assert!(table.is_empty());

        let err = table.register(&result()).unwrap_err();
        assert!(matches!(err, XicError::ConnectionLost(_)));
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let table = Arc::new(TransactionTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| table.register(&result()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(id > 0);
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[tokio::test]
    async fn test_armed_fires_on_first_entry() {
        let table = TransactionTable::new();
        table.register(&result()).unwrap();
        // The permit is stored even though nobody was waiting.
        tokio::time::timeout(std::time::Duration::from_secs(1), table.armed().notified())
            .await
            .unwrap();
    }
}
