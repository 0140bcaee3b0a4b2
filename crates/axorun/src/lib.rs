//! # axorun
//!
//! The asynchronous binding runtime on top of the axopack/axorpc codec:
//!
//! - [`PipeReader`]: adapts one pipe endpoint into a pull-based read loop
//! - [`Proxy`]: the client stub — turns calls into request messages and
//!   correlates responses back to callers by request id
//! - [`Target`]: the server stub — dispatches decoded requests to
//!   registered per-ordinal handlers and writes replies back
//! - [`CallbackRouter`]: one-to-many listener fan-out with an
//!   at-most-one-responder rule for reply-carrying events
//!
//! Everything here is cooperative and callback-driven; "concurrency" means
//! interleaved request/response lifecycles, not parallel decoding. Calls
//! through one proxy are pipelined — responses may arrive in any order and
//! are matched purely by request id.

pub mod proxy;
pub mod reader;
pub mod router;
pub mod target;

pub use proxy::PendingCall;
pub use proxy::Proxy;
pub use proxy::ProxyError;
pub use reader::PipeReader;
pub use router::CallbackRouter;
pub use router::RouterError;
pub use target::HandlerFn;
pub use target::HandlerFuture;
pub use target::Target;
