//! Mapping from event category to the handler that processes it.
//!
//! # Duplicate registrations
//!
//! A category has at most one handler. Registering a handler for a category that already
//! has one replaces it: the last registration wins, and `register` hands back the handler
//! it displaced so callers can detect the replacement.
//!
//! Registration normally happens once at startup. It remains safe afterwards: writers
//! serialize on a lock and publish a new immutable snapshot of the mapping, and readers
//! only hold the lock long enough to clone the current snapshot.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use gateway_common::codec;
use gateway_common::record::Payload;
use tracing::{info, warn};

use crate::error::HandlerError;

/// The category a record declares. Well-known categories get their own variant,
/// anything else is carried by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Default,
    Sensor,
    Named(String),
}

impl Category {
    /// The category declared by a decoded payload.
    pub fn of(payload: &Payload) -> Self {
        Self::from(codec::category_of(payload))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::Default => codec::DEFAULT_CATEGORY,
            Category::Sensor => "sensor",
            Category::Named(name) => name,
        }
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        match name {
            codec::DEFAULT_CATEGORY => Category::Default,
            "sensor" => Category::Sensor,
            other => Category::Named(other.to_owned()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing step: takes a decoded payload and produces the value to persist.
///
/// Handlers get a shared reference and cannot touch the dispatcher's bookkeeping.
/// They are plain synchronous calls and are run off the async executor.
pub trait Handler: Send + Sync {
    fn handle(&self, payload: &Payload) -> Result<Payload, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Payload) -> Result<Payload, HandlerError> + Send + Sync,
{
    fn handle(&self, payload: &Payload) -> Result<Payload, HandlerError> {
        self(payload)
    }
}

pub type SharedHandler = Arc<dyn Handler>;

type HandlerMap = HashMap<Category, SharedHandler>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Arc<HandlerMap>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `category`, replacing and returning any previous handler.
    pub fn register<H>(&self, category: impl Into<Category>, handler: H) -> Option<SharedHandler>
    where
        H: Handler + 'static,
    {
        let category = category.into();
        let mut current = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut next = HandlerMap::clone(&current);
        let previous = next.insert(category.clone(), Arc::new(handler));
        *current = Arc::new(next);

        match previous {
            Some(_) => warn!(category = %category, "replaced existing handler"),
            None => info!(category = %category, "registered handler"),
        }

        previous
    }

    pub fn lookup(&self, category: &Category) -> Option<SharedHandler> {
        self.snapshot().get(category).cloned()
    }

    /// The mapping as of now. Later registrations do not affect a snapshot already taken.
    pub fn snapshot(&self) -> Arc<HandlerMap> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
