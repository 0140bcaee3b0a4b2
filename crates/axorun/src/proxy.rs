//! The client stub: serializes calls, tracks pending responses.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use axopack::StructSpec;
use axopack::Value;
use axopipe::PipeHandle;
use axopipe::PipeMessage;
use axorpc::deserialize_payload;
use axorpc::serialize_message;
use axorpc::MessageHeader;
use axorpc::FLAG_EXPECTS_RESPONSE;

use crate::reader::PipeReader;

#[derive(Debug, Clone)]
pub enum ProxyError {
    /// The proxy was never bound to a pipe.
    Unbound,
    /// The proxy already holds a pipe; rebinding is not allowed.
    AlreadyBound,
    /// The proxy was unbound or its channel shut down; terminal.
    Closed,
    /// Positional arguments do not line up with the parameter struct.
    BadArgumentCount { expected: usize, found: usize },
    /// The request could not be serialized.
    Codec(axorpc::Error),
    /// The channel failed or the peer violated the protocol.
    ChannelError(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => write!(f, "attempted to use an unbound proxy"),
            Self::AlreadyBound => write!(f, "proxy already bound"),
            Self::Closed => write!(f, "proxy is closed"),
            Self::BadArgumentCount { expected, found } => {
                write!(f, "call takes {} arguments, got {}", expected, found)
            }
            Self::Codec(err) => write!(f, "failed to serialize request: {}", err),
            Self::ChannelError(reason) => write!(f, "channel error: {}", reason),
        }
    }
}

impl std::error::Error for ProxyError {}

/// Correlates one sent request with its eventual reply.
struct PendingResponse {
    ordinal: u32,
    response_spec: Arc<StructSpec>,
    tx: oneshot::Sender<Result<Vec<Value>, ProxyError>>,
}

enum State {
    Unbound,
    Bound {
        handle: PipeHandle,
        reader: Arc<PipeReader>,
    },
    Closed,
}

/// Generic helper behind generated proxy classes. Knows how to serialize
/// requests and decode their replies according to declarative struct
/// specs; the generated code supplies ordinals and specs per method.
///
/// Lifecycle: unbound until [`Proxy::bind_handle`], then bound until
/// [`Proxy::unbind`] or a channel error closes it for good. Calls are
/// pipelined; replies are matched by request id, never by arrival order.
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    state: Mutex<State>,
    next_request_id: AtomicU64,
    pending: DashMap<u64, PendingResponse>,
}

impl Proxy {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                state: Mutex::new(State::Unbound),
                next_request_id: AtomicU64::new(0),
                pending: DashMap::new(),
            }),
        }
    }

    /// Binds the proxy to its channel endpoint and starts reading replies.
    /// Must be called from within a tokio runtime.
    pub fn bind_handle(&self, handle: PipeHandle) -> Result<(), ProxyError> {
        let mut state = self.inner.state.lock().unwrap();
        match *state {
            State::Unbound => {}
            State::Bound { .. } => return Err(ProxyError::AlreadyBound),
            State::Closed => return Err(ProxyError::Closed),
        }

        let reader = Arc::new(PipeReader::new(handle.clone()));
        let on_read = Arc::downgrade(&self.inner);
        let on_error: Weak<ProxyInner> = Arc::downgrade(&self.inner);
        reader.start(
            Box::new(move |message| {
                if let Some(inner) = on_read.upgrade() {
                    ProxyInner::on_message(&inner, message);
                }
            }),
            Box::new(move || {
                if let Some(inner) = on_error.upgrade() {
                    ProxyInner::fail(&inner, "pipe closed by peer");
                }
            }),
        );

        self.inner.next_request_id.store(0, Ordering::SeqCst);
        *state = State::Bound { handle, reader };
        debug!("proxy bound to pipe");
        Ok(())
    }

    /// Stops local processing and rejects every outstanding call. Sends
    /// nothing on the wire. The proxy cannot be rebound afterwards.
    pub fn unbind(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if let State::Bound { reader, .. } = &*state {
                reader.stop();
            }
            *state = State::Closed;
        }
        ProxyInner::reject_all(&self.inner, ProxyError::Closed);
        debug!("proxy unbound");
    }

    /// Serializes a request for `ordinal` and sends it down the pipe.
    ///
    /// `args` are matched positionally against `param_spec`'s field order.
    /// With a `response_spec` the returned [`PendingCall`] resolves when
    /// the matching reply arrives (or the channel dies); without one it is
    /// already complete. An unbound proxy is a caller bug and errors
    /// immediately; a closed channel yields an already-rejected call.
    pub fn send_message(
        &self,
        ordinal: u32,
        param_spec: &StructSpec,
        response_spec: Option<&Arc<StructSpec>>,
        args: Vec<Value>,
    ) -> Result<PendingCall, ProxyError> {
        let handle = {
            let state = self.inner.state.lock().unwrap();
            match &*state {
                State::Unbound => return Err(ProxyError::Unbound),
                State::Closed => return Ok(PendingCall::rejected(ProxyError::Closed)),
                State::Bound { handle, reader } => {
                    if reader.is_stopped() {
                        return Ok(PendingCall::rejected(ProxyError::Closed));
                    }
                    handle.clone()
                }
            }
        };

        if args.len() != param_spec.fields.len() {
            return Err(ProxyError::BadArgumentCount {
                expected: param_spec.fields.len(),
                found: args.len(),
            });
        }

        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let flags = if response_spec.is_some() {
            FLAG_EXPECTS_RESPONSE
        } else {
            0
        };
        let message = serialize_message(ordinal, request_id, flags, param_spec, &args)
            .map_err(ProxyError::Codec)?;

        // Register before writing so an instant reply cannot race the map.
        let call = match response_spec {
            None => PendingCall::resolved_empty(),
            Some(spec) => {
                let (tx, rx) = oneshot::channel();
                self.inner.pending.insert(
                    request_id,
                    PendingResponse {
                        ordinal,
                        response_spec: spec.clone(),
                        tx,
                    },
                );
                PendingCall::waiting(rx)
            }
        };

        if handle.write_message(message.data, message.handles).is_err() {
            self.inner.pending.remove(&request_id);
            ProxyInner::fail(&self.inner, "pipe write failed");
            return Ok(PendingCall::rejected(ProxyError::ChannelError(
                "pipe write failed".to_string(),
            )));
        }
        Ok(call)
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyInner {
    fn on_message(inner: &Arc<ProxyInner>, message: PipeMessage) {
        if let Err(reason) = Self::dispatch_response(inner, message) {
            Self::fail(inner, &reason);
        }
    }

    fn dispatch_response(inner: &Arc<ProxyInner>, message: PipeMessage) -> Result<(), String> {
        let header = MessageHeader::decode(&message.data).map_err(|err| err.to_string())?;
        if !header.is_response() || header.expects_response() {
            return Err("received unexpected request message".to_string());
        }
        let Some((_, pending)) = inner.pending.remove(&header.request_id) else {
            return Err("received unexpected response message".to_string());
        };
        if header.ordinal != pending.ordinal {
            let reason = "received response with mismatched ordinal".to_string();
            let _ = pending
                .tx
                .send(Err(ProxyError::ChannelError(reason.clone())));
            return Err(reason);
        }
        let fields = match deserialize_payload(
            &message.data,
            &message.handles,
            &header,
            &pending.response_spec,
        ) {
            Ok(fields) => fields,
            Err(err) => {
                let reason = format!("received malformed response message: {}", err);
                let _ = pending
                    .tx
                    .send(Err(ProxyError::ChannelError(reason.clone())));
                return Err(reason);
            }
        };
        let _ = pending.tx.send(Ok(fields));
        Ok(())
    }

    /// Connection-level failure: close the binding and reject every
    /// outstanding call so no caller is left pending indefinitely.
    fn fail(inner: &Arc<ProxyInner>, reason: &str) {
        warn!(reason, "proxy channel error");
        {
            let mut state = inner.state.lock().unwrap();
            if let State::Bound { reader, .. } = &*state {
                reader.stop_and_close();
            }
            *state = State::Closed;
        }
        Self::reject_all(inner, ProxyError::ChannelError(reason.to_string()));
    }

    fn reject_all(inner: &Arc<ProxyInner>, error: ProxyError) {
        let ids: Vec<u64> = inner.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = inner.pending.remove(&id) {
                let _ = pending.tx.send(Err(error.clone()));
            }
        }
    }
}

/// The awaitable half of a sent call.
///
/// For a call without a response struct this is already complete; for one
/// with a response it resolves when the proxy matches the reply, or with
/// an error when the channel dies first.
#[derive(Debug)]
pub struct PendingCall(CallState);

#[derive(Debug)]
enum CallState {
    Ready(Result<Vec<Value>, ProxyError>),
    Waiting(oneshot::Receiver<Result<Vec<Value>, ProxyError>>),
}

impl PendingCall {
    fn resolved_empty() -> Self {
        Self(CallState::Ready(Ok(Vec::new())))
    }

    fn rejected(error: ProxyError) -> Self {
        Self(CallState::Ready(Err(error)))
    }

    fn waiting(rx: oneshot::Receiver<Result<Vec<Value>, ProxyError>>) -> Self {
        Self(CallState::Waiting(rx))
    }

    /// Waits for the response struct's field values.
    pub async fn response(self) -> Result<Vec<Value>, ProxyError> {
        match self.0 {
            CallState::Ready(result) => result,
            CallState::Waiting(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(ProxyError::ChannelError(
                    "response channel dropped".to_string(),
                )),
            },
        }
    }
}
