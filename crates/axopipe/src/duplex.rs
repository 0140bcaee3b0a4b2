//! In-memory duplex pipe for in-process bindings and tests.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::Error;
use crate::MessagePipe;
use crate::PipeHandle;
use crate::PipeMessage;
use crate::ReadResult;
use crate::Result;

/// One direction of flow: messages queued by the writer, drained by the
/// reader on the other side.
struct Channel {
    queue: Mutex<VecDeque<PipeMessage>>,
    writer_closed: AtomicBool,
    wake: Notify,
}

impl Channel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            writer_closed: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }
}

/// One endpoint of an in-memory pipe pair.
struct DuplexPipe {
    incoming: Arc<Channel>,
    outgoing: Arc<Channel>,
    closed: AtomicBool,
}

/// Creates a connected pair of in-memory pipe endpoints.
///
/// Messages written on one end appear, in order, on the other. Closing
/// either end wakes the peer and makes further writes fail.
pub fn duplex() -> (PipeHandle, PipeHandle) {
    let a_to_b = Channel::new();
    let b_to_a = Channel::new();

    let a = DuplexPipe {
        incoming: b_to_a.clone(),
        outgoing: a_to_b.clone(),
        closed: AtomicBool::new(false),
    };
    let b = DuplexPipe {
        incoming: a_to_b,
        outgoing: b_to_a,
        closed: AtomicBool::new(false),
    };

    (PipeHandle::new(Arc::new(a)), PipeHandle::new(Arc::new(b)))
}

#[async_trait::async_trait]
impl MessagePipe for DuplexPipe {
    fn read_message(&self) -> ReadResult {
        if self.closed.load(Ordering::SeqCst) {
            return ReadResult::PeerClosed;
        }
        if let Some(message) = self.incoming.queue.lock().unwrap().pop_front() {
            return ReadResult::Message(message);
        }
        if self.incoming.writer_closed.load(Ordering::SeqCst) {
            ReadResult::PeerClosed
        } else {
            ReadResult::ShouldWait
        }
    }

    fn write_message(&self, data: Vec<u8>, handles: Vec<PipeHandle>) -> Result<()> {
        // incoming.writer_closed set means the peer endpoint is gone.
        if self.closed.load(Ordering::SeqCst) || self.incoming.writer_closed.load(Ordering::SeqCst)
        {
            return Err(Error::Closed);
        }
        self.outgoing
            .queue
            .lock()
            .unwrap()
            .push_back(PipeMessage { data, handles });
        self.outgoing.wake.notify_one();
        Ok(())
    }

    async fn readable(&self) {
        loop {
            {
                let queue = self.incoming.queue.lock().unwrap();
                if !queue.is_empty()
                    || self.incoming.writer_closed.load(Ordering::SeqCst)
                    || self.closed.load(Ordering::SeqCst)
                {
                    return;
                }
            }
            self.incoming.wake.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Tell the peer its writer is gone and wake both sides.
        self.outgoing.writer_closed.store(true, Ordering::SeqCst);
        self.outgoing.wake.notify_one();
        self.incoming.wake.notify_one();
    }
}
