//! Servants and method dispatch.
//!
//! A [`Servant`] handles every quest addressed to one service name. The
//! usual servant is a [`MethodServant`], built once from an explicit table
//! of method name to handler and dispatched by exact match.
//!
//! # Example
//!
//! ```
//! use xic::handler::MethodServant;
//!
//! let servant = MethodServant::builder()
//!     .method("echo", |quest, _current| async move { Ok(quest.args) })
//!     .build();
//! assert_eq!(servant.method_names(), vec!["echo".to_string()]);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::Current;
use crate::codec::{Map, Value};
use crate::error::{Result, XicError};
use crate::protocol::Quest;

/// Boxed future for servant results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of processing a quest.
///
/// `Ok(Some(args))` answers now. `Ok(None)` means the handler switched the
/// [`Current`] to asynchronous mode and answers later through the waiter.
pub type ServantResult = Result<Option<Map>>;

/// Method name answered with `{}` by every method servant.
pub const PING_METHOD: &str = "\0ping";

/// Method name answered with the method list by every method servant.
pub const METHODS_METHOD: &str = "\0methods";

/// Handler for all quests of one service.
pub trait Servant: Send + Sync + 'static {
    fn process(&self, quest: Quest, current: Current) -> BoxFuture<'static, ServantResult>;

    /// Names of the methods this servant answers.
    fn methods(&self) -> Vec<String> {
        Vec::new()
    }
}

/// One registered method.
pub trait Method: Send + Sync + 'static {
    fn call(&self, quest: Quest, current: Current) -> BoxFuture<'static, ServantResult>;
}

/// Method that always answers from its return value.
struct Immediate<F>(F);

impl<F, Fut> Method for Immediate<F>
where
    F: Fn(Quest, Current) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Map>> + Send + 'static,
{
    fn call(&self, quest: Quest, current: Current) -> BoxFuture<'static, ServantResult> {
        let fut = (self.0)(quest, current);
        Box::pin(async move { fut.await.map(Some) })
    }
}

/// Method that may defer its answer.
struct Deferrable<F>(F);

impl<F, Fut> Method for Deferrable<F>
where
    F: Fn(Quest, Current) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServantResult> + Send + 'static,
{
    fn call(&self, quest: Quest, current: Current) -> BoxFuture<'static, ServantResult> {
        Box::pin((self.0)(quest, current))
    }
}

/// Servant dispatching on the quest's method name.
pub struct MethodServant {
    methods: HashMap<String, Box<dyn Method>>,
}

impl MethodServant {
    pub fn builder() -> MethodServantBuilder {
        MethodServantBuilder::default()
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Servant for MethodServant {
    fn process(&self, quest: Quest, current: Current) -> BoxFuture<'static, ServantResult> {
        if quest.method.is_empty() {
            return Box::pin(async { Err(XicError::MethodEmpty) });
        }
        if let Some(method) = self.methods.get(&quest.method) {
            return method.call(quest, current);
        }

        let outcome = match quest.method.as_str() {
            PING_METHOD => Ok(Some(Map::new())),
            METHODS_METHOD => {
                let names: Vec<Value> = self.method_names().into_iter().map(Value::from).collect();
                Ok(Some(Map::from([("methods", names)])))
            }
            _ => Err(XicError::MethodNotFound(quest.method)),
        };
        Box::pin(async move { outcome })
    }

    fn methods(&self) -> Vec<String> {
        self.method_names()
    }
}

/// Builder for [`MethodServant`].
#[derive(Default)]
pub struct MethodServantBuilder {
    methods: HashMap<String, Box<dyn Method>>,
}

impl MethodServantBuilder {
    /// Register a method that answers with the returned map.
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Quest, Current) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Map>> + Send + 'static,
    {
        self.methods
            .insert(name.to_string(), Box::new(Immediate(handler)));
        self
    }

    /// Register a method that may return `Ok(None)` and answer later
    /// through [`Current::asynchronous`].
    pub fn deferred<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Quest, Current) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServantResult> + Send + 'static,
    {
        self.methods
            .insert(name.to_string(), Box::new(Deferrable(handler)));
        self
    }

    pub fn build(self) -> MethodServant {
        MethodServant {
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servant() -> MethodServant {
        MethodServant::builder()
            .method("echo", |quest, _| async move { Ok(quest.args) })
            .method("fail", |_, _| async { Err(XicError::servant("nope")) })
            .deferred("later", |_, _| async { Ok(None) })
            .build()
    }

    async fn call(servant: &MethodServant, method: &str) -> ServantResult {
        let quest = Quest::new("Test", method, Map::from([("a", 1)]));
        let current = Current::detached(&quest);
        servant.process(quest, current).await
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let s = servant();
        let args = call(&s, "echo").await.unwrap().unwrap();
        assert_eq!(args.get_int("a"), Some(1));

        assert!(matches!(call(&s, "fail").await, Err(XicError::Servant(_))));
        assert!(call(&s, "later").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_empty_method() {
        let s = servant();
        match call(&s, "missing").await {
            Err(XicError::MethodNotFound(m)) => assert_eq!(m, "missing"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(call(&s, "").await, Err(XicError::MethodEmpty)));
    }

    #[tokio::test]
    async fn test_builtin_methods() {
        let s = servant();
        assert_eq!(call(&s, PING_METHOD).await.unwrap(), Some(Map::new()));

        let listed = call(&s, METHODS_METHOD).await.unwrap().unwrap();
        let names: Vec<&str> = listed
            .want_list("methods")
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(names, vec!["echo", "fail", "later"]);
    }
}
