//! # axopipe
//!
//! The message-pipe primitive the bindings run over.
//!
//! A pipe endpoint carries whole messages (a byte buffer plus a list of
//! handles transferred alongside it), supports non-blocking reads, and
//! notifies readers asynchronously when something arrives or the remote
//! side goes away. The hosting runtime normally provides the endpoints;
//! [`duplex`] builds a connected in-memory pair for in-process use and
//! for tests.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

pub mod duplex;

pub use duplex::duplex;

/// A single message as it travels over a pipe: payload bytes plus any
/// endpoints handed over with them.
#[derive(Debug, Default)]
pub struct PipeMessage {
    pub data: Vec<u8>,
    pub handles: Vec<PipeHandle>,
}

/// Outcome of a non-blocking read attempt.
#[derive(Debug)]
pub enum ReadResult {
    /// A complete message was dequeued.
    Message(PipeMessage),
    /// Nothing buffered; wait for the next readability wake-up.
    ShouldWait,
    /// The remote endpoint is closed and nothing is left to drain.
    PeerClosed,
}

#[derive(Debug, Clone)]
pub enum Error {
    /// The local or remote endpoint is closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "pipe endpoint is closed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One endpoint of a duplex message pipe.
///
/// `read_message` never blocks; callers wait on `readable` and then drain
/// reads until [`ReadResult::ShouldWait`]. Closing an endpoint is the sole
/// teardown action and may be repeated safely.
#[async_trait::async_trait]
pub trait MessagePipe: Send + Sync + 'static {
    /// Dequeues the next buffered message, if any.
    fn read_message(&self) -> ReadResult;

    /// Queues a message for the remote endpoint.
    fn write_message(&self, data: Vec<u8>, handles: Vec<PipeHandle>) -> Result<()>;

    /// Resolves once a message is buffered or the peer has closed.
    async fn readable(&self);

    /// Closes this endpoint. Idempotent.
    fn close(&self);
}

/// Shared ownership of one pipe endpoint.
///
/// Handles are cheap to clone and compare by endpoint identity, which is
/// what lets a decoded handle be matched back to the endpoint it came from.
#[derive(Clone)]
pub struct PipeHandle(Arc<dyn MessagePipe>);

impl PipeHandle {
    pub fn new(pipe: Arc<dyn MessagePipe>) -> Self {
        Self(pipe)
    }

    /// True when both handles refer to the same endpoint.
    pub fn same_endpoint(&self, other: &PipeHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for PipeHandle {
    type Target = dyn MessagePipe;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for PipeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_endpoint(other)
    }
}

impl fmt::Debug for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeHandle({:p})", Arc::as_ptr(&self.0))
    }
}
