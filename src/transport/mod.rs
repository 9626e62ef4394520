//! Transport module - endpoints and TCP sockets.
//!
//! Provides:
//! - Endpoint string parsing (`tcp+host+port timeout=...`)
//! - TCP connect/bind helpers

mod endpoint;
pub mod tcp;

pub use endpoint::{format_list, Endpoint, EndpointTimeouts};
