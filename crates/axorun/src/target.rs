//! The server stub: decodes requests, dispatches to per-ordinal handlers,
//! writes replies.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use axopack::StructSpec;
use axopack::Value;
use axopipe::PipeHandle;
use axopipe::PipeMessage;
use axorpc::deserialize_payload;
use axorpc::serialize_message;
use axorpc::MessageHeader;
use axorpc::FLAG_IS_RESPONSE;

use crate::reader::PipeReader;

pub type HandlerFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<Vec<Value>>>> + Send>>;

/// A method handler. Receives the request struct's field values in
/// declaration order; resolves to `Some(response fields)` when it replies,
/// `None` when it has nothing to say.
pub type HandlerFn = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

struct MessageHandler {
    param_spec: Arc<StructSpec>,
    response_spec: Option<Arc<StructSpec>>,
    handler: HandlerFn,
}

/// Listens for requests on bound pipes and dispatches them by ordinal.
///
/// Handlers are registered at setup time; re-registering an ordinal
/// replaces the previous handler. A protocol violation on a binding — an
/// unexpected response message, an unknown ordinal, a malformed payload,
/// or a handler that fails to produce a required reply — closes that
/// binding rather than being retried: a half-answered request would leave
/// the remote proxy with an unresolvable slot.
pub struct Target {
    inner: Arc<TargetInner>,
}

struct TargetInner {
    handlers: DashMap<u32, MessageHandler>,
    readers: DashMap<u64, Arc<PipeReader>>,
    next_binding: AtomicU64,
}

impl Target {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TargetInner {
                handlers: DashMap::new(),
                readers: DashMap::new(),
                next_binding: AtomicU64::new(0),
            }),
        }
    }

    pub fn register_handler(
        &self,
        ordinal: u32,
        param_spec: Arc<StructSpec>,
        response_spec: Option<Arc<StructSpec>>,
        handler: HandlerFn,
    ) {
        self.inner.handlers.insert(
            ordinal,
            MessageHandler {
                param_spec,
                response_spec,
                handler,
            },
        );
    }

    /// Starts serving requests arriving on `handle`. A target may hold any
    /// number of bindings; each fails independently. Must be called from
    /// within a tokio runtime.
    pub fn bind_handle(&self, handle: PipeHandle) {
        let binding = self.inner.next_binding.fetch_add(1, Ordering::SeqCst);
        let reader = Arc::new(PipeReader::new(handle));
        self.inner.readers.insert(binding, reader.clone());

        let on_read = Arc::downgrade(&self.inner);
        let on_error = Arc::downgrade(&self.inner);
        reader.start(
            Box::new(move |message| {
                if let Some(inner) = on_read.upgrade() {
                    TargetInner::on_message(&inner, binding, message);
                }
            }),
            Box::new(move || {
                if let Some(inner) = on_error.upgrade() {
                    TargetInner::drop_binding(&inner, binding);
                }
            }),
        );
    }

    /// Stops every binding and closes its pipe.
    pub fn unbind_all(&self) {
        let bindings: Vec<u64> = self.inner.readers.iter().map(|entry| *entry.key()).collect();
        for binding in bindings {
            TargetInner::drop_binding(&self.inner, binding);
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetInner {
    fn on_message(inner: &Arc<TargetInner>, binding: u64, message: PipeMessage) {
        if let Err(reason) = Self::dispatch_request(inner, binding, message) {
            warn!(reason = %reason, "closing binding after protocol violation");
            Self::drop_binding(inner, binding);
        }
    }

    fn dispatch_request(
        inner: &Arc<TargetInner>,
        binding: u64,
        message: PipeMessage,
    ) -> Result<(), String> {
        let header = MessageHeader::decode(&message.data).map_err(|err| err.to_string())?;
        if header.is_response() {
            return Err("received unexpected response on interface target".to_string());
        }
        let (param_spec, response_spec, handler) = {
            let entry = inner
                .handlers
                .get(&header.ordinal)
                .ok_or_else(|| format!("received message with unknown ordinal {}", header.ordinal))?;
            (
                entry.param_spec.clone(),
                entry.response_spec.clone(),
                entry.handler.clone(),
            )
        };
        let fields = deserialize_payload(&message.data, &message.handles, &header, &param_spec)
            .map_err(|err| format!("received malformed message: {}", err))?;

        let future = handler(fields);
        let inner = inner.clone();
        let ordinal = header.ordinal;
        let request_id = header.request_id;
        tokio::spawn(async move {
            let result = future.await;
            let Some(response_spec) = response_spec else {
                // Fire-and-forget: nothing to send back either way.
                return;
            };
            let reply = match result {
                Ok(Some(fields)) => fields,
                Ok(None) => {
                    warn!("message expects a reply but its handler did not provide one");
                    Self::drop_binding(&inner, binding);
                    return;
                }
                Err(err) => {
                    // The handler rejected the request's contents; close the
                    // binding so no further messages arrive from that client.
                    warn!(error = %err, "handler failed");
                    Self::drop_binding(&inner, binding);
                    return;
                }
            };
            let outgoing =
                match serialize_message(ordinal, request_id, FLAG_IS_RESPONSE, &response_spec, &reply)
                {
                    Ok(outgoing) => outgoing,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize reply");
                        Self::drop_binding(&inner, binding);
                        return;
                    }
                };
            let written = match inner.readers.get(&binding) {
                Some(reader) => reader
                    .handle()
                    .write_message(outgoing.data, outgoing.handles),
                None => return,
            };
            if written.is_err() {
                Self::drop_binding(&inner, binding);
            }
        });
        Ok(())
    }

    fn drop_binding(inner: &Arc<TargetInner>, binding: u64) {
        if let Some((_, reader)) = inner.readers.remove(&binding) {
            reader.stop_and_close();
        }
    }
}
