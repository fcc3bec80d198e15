//! In-order matching of replies to outstanding requests
//!
//! The server answers commands on one connection strictly in the order they
//! were written. [`CommandPipeline`] keeps one completion slot per written
//! command and hands each decoded reply to the oldest slot.
//!
//! Enqueueing a request and handing its bytes to the writer happen under the
//! same lock, so the queue order is always the write order no matter how many
//! tasks call [`CommandPipeline::enqueue`] concurrently.

use bytes::Bytes;
use kvwire_core::{
    error::{KvError, KvResult},
    value::WireValue,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

type Slot = oneshot::Sender<KvResult<WireValue>>;

struct PipelineState {
    pending: VecDeque<Slot>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    closed_reason: Option<String>,
}

/// FIFO queue of outstanding requests on one connection
pub struct CommandPipeline {
    state: Mutex<PipelineState>,
}

impl CommandPipeline {
    /// Create a pipeline that forwards encoded commands to `writer`
    #[must_use]
    pub fn new(writer: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                pending: VecDeque::new(),
                writer: Some(writer),
                closed_reason: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request and queue its frame for writing
    ///
    /// Fails without queueing anything once the pipeline has been closed.
    pub fn enqueue(&self, frame: Bytes) -> KvResult<ResponseHandle> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed_reason {
            return Err(KvError::Connection(reason.clone()));
        }
        let writer = state
            .writer
            .as_ref()
            .ok_or_else(|| KvError::Connection("Connection closed".to_string()))?;

        let (tx, rx) = oneshot::channel();
        writer
            .send(frame)
            .map_err(|_| KvError::Connection("Connection writer stopped".to_string()))?;
        state.pending.push_back(tx);
        trace!(pending = state.pending.len(), "Request enqueued");

        Ok(ResponseHandle { rx })
    }

    /// Complete the oldest outstanding request with `value`
    ///
    /// Top-level error replies complete the request with
    /// [`KvError::Server`]. A reply with no request waiting for it means the
    /// stream is out of step with the queue, which is a protocol error.
    pub fn complete_next(&self, value: WireValue) -> KvResult<()> {
        let slot = self.lock().pending.pop_front().ok_or_else(|| {
            KvError::Protocol("Received a reply with no pending request".to_string())
        })?;

        if slot.send(into_reply(value)).is_err() {
            // The caller stopped waiting; its reply is dropped in order
            trace!("Discarded reply for a cancelled request");
        }
        Ok(())
    }

    /// Fail every outstanding request and refuse new ones
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&self, error: &KvError) -> usize {
        let drained: Vec<Slot> = {
            let mut state = self.lock();
            if state.closed_reason.is_none() {
                state.closed_reason = Some(error.to_string());
            }
            state.writer = None;
            state.pending.drain(..).collect()
        };

        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(error.duplicate()));
        }
        count
    }

    /// Number of requests awaiting a reply
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Check if no request is awaiting a reply
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Check if the pipeline refuses new requests
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed_reason.is_some()
    }
}

/// Turn a top-level error reply into [`KvError::Server`]
pub(crate) fn into_reply(value: WireValue) -> KvResult<WireValue> {
    if !value.primary().is_error() {
        return Ok(value);
    }
    match value.into_primary().into_error() {
        Some(msg) => Err(KvError::Server(msg)),
        None => Err(KvError::Protocol("Malformed error reply".to_string())),
    }
}

impl std::fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CommandPipeline")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed_reason)
            .finish()
    }
}

/// Completion of one enqueued request
///
/// Dropping the handle detaches the caller. The request stays queued and its
/// reply is consumed and discarded when it arrives.
#[must_use = "a response handle does nothing unless awaited"]
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<KvResult<WireValue>>,
}

impl Future for ResponseHandle {
    type Output = KvResult<WireValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(KvError::Connection(
                    "Connection dropped before the reply arrived".to_string(),
                ))
            })
        })
    }
}
