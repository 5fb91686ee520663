//! Closure-registry dispatcher.

use std::collections::HashMap;
use std::fmt;

use mprpc_core::{Codec, Value};

use super::{Dispatcher, Responder};

type Handler = Box<dyn Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync>;

/// Prefix of the error value sent for unregistered methods.
pub const NO_METHOD_ERROR: &str = "NoMethodError";

/// A [`Dispatcher`] that maps method names to closures.
///
/// A handler returns `Ok(result)` or `Err(error_value)`. Requests for
/// unregistered methods are answered with `"NoMethodError: <name>"`.
/// Notifications run the same handlers and discard the outcome.
///
/// ```rust,ignore
/// let methods = MethodMap::new()
///     .method("add", |params| {
///         let sum: i64 = params.iter().filter_map(Value::as_i64).sum();
///         Ok(Value::from(sum))
///     });
/// ```
#[derive(Default)]
pub struct MethodMap {
    handlers: HashMap<String, Handler>,
}

impl MethodMap {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    /// Returns `true` if `name` has a handler.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `name` directly.
    pub fn invoke(&self, name: &str, params: Vec<Value>) -> Result<Value, Value> {
        match self.handlers.get(name) {
            Some(handler) => handler(params),
            None => Err(Value::from(format!("{}: {}", NO_METHOD_ERROR, name))),
        }
    }
}

impl fmt::Debug for MethodMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("MethodMap").field("methods", &names).finish()
    }
}

impl<C: Codec> Dispatcher<C> for MethodMap {
    fn dispatch(&self, method: &str, params: Vec<Value>, responder: Responder<C>) {
        match self.invoke(method, params) {
            Ok(result) => responder.result(result),
            Err(error) => {
                tracing::debug!(method, %error, "MethodMap: call failed");
                responder.error(error);
            }
        }
    }

    fn notify(&self, method: &str, params: Vec<Value>) {
        if !self.contains(method) {
            tracing::debug!(method, "MethodMap: notification for unknown method");
            return;
        }
        if let Err(error) = self.invoke(method, params) {
            tracing::debug!(method, %error, "MethodMap: notification handler failed");
        }
    }
}
