//! Per-session shared state.
//!
//! A [`SessionHandle`] is held by the hub (for dispatch and eviction) and by
//! the session's own read and write loops. The hub and the teardown path only
//! ever use the non-blocking operations here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use peerlink_core::{AccountId, DeviceId, SessionId};

use crate::auth::Identity;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    Full,
    /// The session is shutting down.
    Closed,
}

/// Handle to one live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    device_id: DeviceId,
    account_id: AccountId,
    tx: mpsc::Sender<String>,
    queue_closed: CancellationToken,
    terminated: CancellationToken,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    dropped_frames: AtomicU64,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn new(identity: Identity, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let handle = Arc::new(Self {
            id: SessionId::new(),
            device_id: identity.device_id,
            account_id: identity.account_id,
            tx,
            queue_closed: CancellationToken::new(),
            terminated: CancellationToken::new(),
            connected_at: now,
            last_activity: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        });
        (handle, rx)
    }

    /// Session identifier (logging only).
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Authenticated device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Owner of the device.
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Queue a text frame without waiting.
    pub fn try_enqueue(&self, frame: String) -> Result<(), EnqueueError> {
        if self.queue_closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            }
        })
    }

    /// Stop accepting frames and tell the write loop to send a close frame
    /// and exit. Idempotent.
    pub fn close_queue(&self) {
        self.queue_closed.cancel();
    }

    /// Close the queue and the transport. Idempotent.
    pub fn terminate(&self) {
        self.queue_closed.cancel();
        self.terminated.cancel();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.queue_closed.is_cancelled()
    }

    /// Whether the transport has been told to close.
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Resolves once the queue is closed.
    pub fn queue_closed(&self) -> WaitForCancellationFuture<'_> {
        self.queue_closed.cancelled()
    }

    /// Resolves once the transport must close.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.terminated.cancelled()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames refused by [`try_enqueue`](Self::try_enqueue).
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}
