//! Diagnostic log sink.
//!
//! Quest and answer tracing goes through a [`LogSink`] rather than straight
//! to `tracing`, so an embedding process can ship the records elsewhere.
//! Each record carries the engine identity, a tag such as `XIC.SQ`, a locus
//! and a free-form message.

use std::sync::Arc;

pub const TAG_SQ: &str = "XIC.SQ";
pub const TAG_SA: &str = "XIC.SA";
pub const TAG_SAE: &str = "XIC.SAE";
pub const TAG_CQ: &str = "XIC.CQ";
pub const TAG_CA: &str = "XIC.CA";
pub const TAG_CAE: &str = "XIC.CAE";
pub const TAG_WARN: &str = "XIC.WARN";
pub const TAG_SLOW: &str = "XIC.SLOW";
pub const TAG_EXCEPT: &str = "XIC.EXCEPT";

/// Receiver of diagnostic records. Must not block or panic.
pub trait LogSink: Send + Sync {
    fn log(&self, identity: &str, tag: &str, locus: &str, fields: &str);
}

/// Forwards records to `tracing` under target `xic::dlog`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, identity: &str, tag: &str, locus: &str, fields: &str) {
        tracing::info!(target: "xic::dlog", identity, tag, locus, "{}", fields);
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _identity: &str, _tag: &str, _locus: &str, _fields: &str) {}
}

pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}
