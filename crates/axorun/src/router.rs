//! One-to-many listener fan-out for observer-style interfaces.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use axopack::Value;

use crate::target::HandlerFn;
use crate::target::HandlerFuture;

/// A listener. Returning `Some` counts as replying to the event.
pub type ListenerFn = Arc<dyn Fn(&[Value]) -> Option<Vec<Value>> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum RouterError {
    /// Two listeners both produced a reply for one event.
    MultipleReplies,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleReplies => {
                write!(f, "multiple listeners attempted to reply to a message")
            }
        }
    }
}

impl std::error::Error for RouterError {}

/// An id-keyed listener registry.
///
/// Fire-and-forget events go to every listener, return values ignored.
/// Reply-carrying events also go to every listener, but at most one of
/// them may answer; a second answer is a hard error at the dispatch site.
pub struct CallbackRouter {
    listeners: Mutex<BTreeMap<u64, ListenerFn>>,
    next_id: AtomicU64,
}

impl CallbackRouter {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a listener and returns its removal id. Ids start at 1.
    pub fn add_listener(&self, listener: ListenerFn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners.lock().unwrap().insert(id, listener);
        id
    }

    /// True iff the id named a registered listener.
    pub fn remove_listener(&self, id: u64) -> bool {
        self.listeners.lock().unwrap().remove(&id).is_some()
    }

    /// Invokes every listener, ignoring return values.
    pub fn dispatch(&self, args: &[Value]) {
        let listeners: Vec<ListenerFn> =
            self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener(args);
        }
    }

    /// Invokes every listener and collects the single reply, if any.
    pub fn dispatch_with_reply(&self, args: &[Value]) -> Result<Option<Vec<Value>>, RouterError> {
        let listeners: Vec<ListenerFn> =
            self.listeners.lock().unwrap().values().cloned().collect();
        let mut reply = None;
        for listener in listeners {
            if let Some(value) = listener(args) {
                if reply.is_some() {
                    return Err(RouterError::MultipleReplies);
                }
                reply = Some(value);
            }
        }
        Ok(reply)
    }

    /// Adapts the router into a [`Target`](crate::Target) handler for one
    /// ordinal, choosing the dispatch mode by whether the method carries a
    /// reply.
    pub fn handler(self: &Arc<Self>, expects_reply: bool) -> HandlerFn {
        let router = self.clone();
        if expects_reply {
            Arc::new(move |args: Vec<Value>| {
                let router = router.clone();
                Box::pin(async move {
                    let reply = router.dispatch_with_reply(&args)?;
                    Ok::<Option<Vec<Value>>, anyhow::Error>(reply)
                }) as HandlerFuture
            })
        } else {
            Arc::new(move |args: Vec<Value>| {
                router.dispatch(&args);
                Box::pin(async move { Ok::<Option<Vec<Value>>, anyhow::Error>(None) })
                    as HandlerFuture
            })
        }
    }
}

impl Default for CallbackRouter {
    fn default() -> Self {
        Self::new()
    }
}
