//! Handler module - servants and per-call context.
//!
//! Provides:
//! - [`Servant`] - handles the quests of one service
//! - [`MethodServant`] - explicit method-name to handler table
//! - [`Current`] / [`Waiter`] - call context and deferred answers
//!
//! # Example
//!
//! ```
//! use xic::handler::MethodServant;
//!
//! let servant = MethodServant::builder()
//!     .method("echo", |quest, _current| async move { Ok(quest.args) })
//!     .deferred("later", |quest, current| async move {
//!         let waiter = current.asynchronous();
//!         tokio::spawn(async move {
//!             waiter.response(Ok(quest.args));
//!         });
//!         Ok(None)
//!     })
//!     .build();
//! ```

mod context;
mod registry;

pub use context::{Current, QuestInfo, Waiter};
pub use registry::{
    BoxFuture, Method, MethodServant, MethodServantBuilder, Servant, ServantResult,
    METHODS_METHOD, PING_METHOD,
};
