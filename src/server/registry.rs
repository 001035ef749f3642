//! Function registry: operation name → typed handler.
//!
//! The registry is the seam all concrete remote operations plug into.
//! Adding a capability means one [`FunctionRegistry::register`] call; the
//! dispatcher never changes. Handlers take their typed input and return a
//! typed output; the registry adapts both ends through structural casts so
//! the dispatcher only ever sees documents.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cast;
use crate::{AppError, Result};

/// Future produced by a registered handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// Type-erased handler: args document in, result document out.
type HandlerFn = Box<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Append-only table of named operations.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl FunctionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under a stable operation name.
    ///
    /// The wrapper casts the inbound args document into `I` (a missing
    /// required field is a cast error returned to the caller), invokes the
    /// handler, and casts its output back into a document. Registering the
    /// same name twice replaces the earlier handler.
    pub fn register<I, O, F, Fut>(&mut self, name: &'static str, handler: F)
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let wrapped: HandlerFn = Box::new(move |doc| -> HandlerFuture {
            match cast::from_document::<I>(doc) {
                Ok(args) => {
                    let fut = handler(args);
                    Box::pin(async move {
                        let output = fut.await?;
                        cast::to_document(&output)
                    })
                }
                Err(e) => Box::pin(std::future::ready(Err(e))),
            }
        });
        self.handlers.insert(name, wrapped);
    }

    /// Look up `name` and invoke its handler with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unregistered name — a
    /// handler-not-found error carried back to the caller, never a fatal
    /// server condition. Handler and cast failures propagate as-is.
    pub fn invoke(&self, name: &str, args: serde_json::Value) -> HandlerFuture {
        match self.handlers.get(name) {
            Some(handler) => handler(args),
            None => Box::pin(std::future::ready(Err(AppError::NotFound(format!(
                "unsupported function: {name}"
            ))))),
        }
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered operation names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
