//! Connection lifecycle states.
//!
//! ```text
//! Init ──────────────┐
//!                    ├──► Active ──► Close ──► Closing ──► Closed
//! WaitingHello ──────┘                                       ▲
//!        └──────────────── any failure ──────────────► Error ┘ (terminal)
//! ```
//!
//! States are ordered. Most checks are range checks on that order.

use std::fmt;

/// State of a connection. The numeric order is significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, hello not yet queued.
    Init = 0,
    /// Outbound, connecting or waiting for the peer's hello.
    WaitingHello = 1,
    Active = 2,
    /// Graceful shutdown requested, draining in-flight work.
    Close = 3,
    /// Bye sent.
    Closing = 4,
    Closed = 5,
    /// Closed because of a failure.
    Error = 6,
}

impl ConnectionState {
    /// New work may be started.
    #[inline]
    pub fn is_live(self) -> bool {
        self < ConnectionState::Close
    }

    /// The handshake has not completed yet.
    #[inline]
    pub fn is_waiting(self) -> bool {
        self < ConnectionState::Active
    }

    #[inline]
    pub fn is_active(self) -> bool {
        self == ConnectionState::Active
    }

    /// Shutting down gracefully, not yet closed.
    #[inline]
    pub fn is_graceful(self) -> bool {
        matches!(self, ConnectionState::Close | ConnectionState::Closing)
    }

    #[inline]
    pub fn is_closed(self) -> bool {
        self >= ConnectionState::Closed
    }

    #[inline]
    pub fn is_bad(self) -> bool {
        self >= ConnectionState::Error
    }

    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Init => "INIT",
            ConnectionState::WaitingHello => "WAITING_HELLO",
            ConnectionState::Active => "ACTIVE",
            ConnectionState::Close => "CLOSE",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
