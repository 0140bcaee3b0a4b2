//! Adapts a single pipe endpoint into a pull-based read loop.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Notify;

use axopipe::PipeHandle;
use axopipe::PipeMessage;
use axopipe::ReadResult;

pub type ReadCallback = Box<dyn FnMut(PipeMessage) + Send>;
pub type ErrorCallback = Box<dyn FnOnce() + Send>;

/// Watches one endpoint for readability and peer closure, forwarding either
/// event to one of two callbacks.
///
/// [`PipeReader::start`] spawns the pump task: each wake-up drains
/// `read_message` until the pipe reports "would block" (wait for the next
/// wake-up) or "peer closed" (invoke the error callback once, then stop).
/// Stopping is terminal; a stopped reader issues no further reads.
pub struct PipeReader {
    handle: PipeHandle,
    stopped: Arc<AtomicBool>,
    stop_wake: Arc<Notify>,
}

impl PipeReader {
    pub fn new(handle: PipeHandle) -> Self {
        Self {
            handle,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_wake: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> &PipeHandle {
        &self.handle
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Spawns the read loop. Must be called from within a tokio runtime.
    pub fn start(&self, mut on_read: ReadCallback, on_error: ErrorCallback) {
        let handle = self.handle.clone();
        let stopped = self.stopped.clone();
        let stop_wake = self.stop_wake.clone();
        tokio::spawn(async move {
            let mut on_error = Some(on_error);
            loop {
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                tokio::select! {
                    _ = stop_wake.notified() => return,
                    _ = handle.readable() => {}
                }
                // More than one message can arrive per wake-up; drain them
                // all before waiting again.
                loop {
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    match handle.read_message() {
                        ReadResult::ShouldWait => break,
                        ReadResult::PeerClosed => {
                            stopped.store(true, Ordering::SeqCst);
                            if let Some(callback) = on_error.take() {
                                callback();
                            }
                            return;
                        }
                        ReadResult::Message(message) => on_read(message),
                    }
                }
            }
        });
    }

    /// Tears down the watch. Sends nothing on the wire.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_wake.notify_one();
    }

    /// Tears down the watch and closes the endpoint.
    pub fn stop_and_close(&self) {
        self.stop();
        self.handle.close();
    }
}
