//! Request/response correlation with deadlines.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::packet::{ChannelId, CorrelationId};

/// One-shot continuation invoked with a reply payload.
pub type ResponseCallback = Box<dyn FnOnce(Value) + Send>;

/// Who is waiting for a reply.
pub(crate) enum Waiter {
    Callback(ResponseCallback),
    Future(oneshot::Sender<BridgeResult<Value>>),
}

impl Waiter {
    /// Deliver a reply. Callbacks run on the caller's stack.
    pub(crate) fn complete(self, payload: Value) {
        match self {
            Self::Callback(callback) => callback(payload),
            Self::Future(tx) => {
                let _ = tx.send(Ok(payload));
            },
        }
    }

    /// Give up on the reply. Callbacks are dropped without being called.
    pub(crate) fn fail(self, error: BridgeError) {
        if let Self::Future(tx) = self {
            let _ = tx.send(Err(error));
        }
    }
}

struct Pending {
    deadline: Option<Instant>,
    waiter: Waiter,
}

/// Outstanding requests on one side of a channel.
pub(crate) struct PendingRequests {
    channel: ChannelId,
    entries: HashMap<CorrelationId, Pending>,
    timeout: Duration,
    limit: usize,
}

impl PendingRequests {
    pub(crate) fn new(channel: ChannelId, timeout: Duration, limit: usize) -> Self {
        Self {
            channel,
            entries: HashMap::new(),
            timeout,
            limit,
        }
    }

    pub(crate) fn deadline_from(&self, now: Instant) -> Option<Instant> {
        now.checked_add(self.timeout)
    }

    /// Track a request. Expired entries are swept first.
    pub(crate) fn insert(
        &mut self,
        id: CorrelationId,
        waiter: Waiter,
        now: Instant,
    ) -> Result<(), (BridgeError, Waiter)> {
        if self.entries.len() >= self.limit {
            for (expired, waiter) in self.take_expired(now) {
                waiter.fail(BridgeError::Timeout { id: expired });
            }
        }
        if self.entries.len() >= self.limit {
            return Err((BridgeError::TooManyPending { limit: self.limit }, waiter));
        }
        let deadline = self.deadline_from(now);
        self.entries.insert(id, Pending { deadline, waiter });
        Ok(())
    }

    /// Claim the waiter for a reply.
    ///
    /// Replies to unknown or expired requests yield `None`; an expired
    /// future is failed with [`BridgeError::Timeout`].
    pub(crate) fn resolve(&mut self, id: CorrelationId, now: Instant) -> Option<Waiter> {
        let Some(pending) = self.entries.remove(&id) else {
            debug!(channel = %self.channel, id = %id, "Discarding reply to unknown request");
            return None;
        };
        if pending.deadline.is_some_and(|deadline| now >= deadline) {
            debug!(channel = %self.channel, id = %id, "Discarding reply after deadline");
            pending.waiter.fail(BridgeError::Timeout { id });
            return None;
        }
        Some(pending.waiter)
    }

    /// Remove a request without resolving it.
    pub(crate) fn forget(&mut self, id: CorrelationId) -> Option<Waiter> {
        self.entries.remove(&id).map(|p| p.waiter)
    }

    /// Remove every request whose deadline has passed.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<(CorrelationId, Waiter)> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|deadline| now >= deadline))
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|p| (id, p.waiter)))
            .collect()
    }

    /// Drop every outstanding request. Futures observe a closed channel.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            pending.waiter.fail(BridgeError::ChannelClosed {
                channel: self.channel,
            });
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Future form of a request: resolves with the reply payload.
///
/// Created by [`RuntimeCapability::request`](crate::RuntimeCapability::request).
/// The reply is only delivered once the page side dispatches its inbox.
#[derive(Debug)]
pub struct ResponseFuture {
    channel: ChannelId,
    id: CorrelationId,
    deadline: Option<Instant>,
    rx: oneshot::Receiver<BridgeResult<Value>>,
}

impl ResponseFuture {
    pub(crate) fn new(
        channel: ChannelId,
        id: CorrelationId,
        deadline: Option<Instant>,
        rx: oneshot::Receiver<BridgeResult<Value>>,
    ) -> Self {
        Self {
            channel,
            id,
            deadline,
            rx,
        }
    }

    /// A future that has already failed.
    pub(crate) fn failed(channel: ChannelId, id: CorrelationId, error: BridgeError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            channel,
            id,
            deadline: None,
            rx,
        }
    }

    /// Correlation ID of the request.
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait for the reply, up to the request deadline.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Timeout`] if the deadline passes, or
    /// [`BridgeError::ChannelClosed`] if the channel is torn down first.
    pub async fn wait(self) -> BridgeResult<Value> {
        let id = self.id;
        let channel = self.channel;
        let closed = |rx_err: oneshot::error::RecvError| {
            debug!(channel = %channel, id = %id, error = %rx_err, "Request abandoned");
            BridgeError::ChannelClosed { channel }
        };
        match self.deadline {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, self.rx).await {
                    Ok(result) => result.map_err(closed)?,
                    Err(_) => Err(BridgeError::Timeout { id }),
                }
            },
            None => self.rx.await.map_err(closed)?,
        }
    }

    /// Poll for the reply without blocking.
    ///
    /// Returns `None` while the request is still outstanding and the
    /// deadline has not passed.
    pub fn try_resolve(&mut self) -> Option<BridgeResult<Value>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => {
                if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    Some(Err(BridgeError::Timeout { id: self.id }))
                } else {
                    None
                }
            },
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BridgeError::ChannelClosed {
                channel: self.channel,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn requests(limit: usize) -> PendingRequests {
        PendingRequests::new(ChannelId::new(), Duration::from_millis(100), limit)
    }

    fn after(now: Instant, millis: u64) -> Instant {
        now.checked_add(Duration::from_millis(millis)).unwrap()
    }

    fn capture() -> (Arc<Mutex<Vec<Value>>>, Waiter) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            seen,
            Waiter::Callback(Box::new(move |v| sink.lock().unwrap().push(v))),
        )
    }

    #[test]
    fn test_resolve_is_one_shot() {
        let mut pending = requests(4);
        let now = Instant::now();
        let (seen, waiter) = capture();
        pending.insert(CorrelationId(1), waiter, now).ok().unwrap();

        pending
            .resolve(CorrelationId(1), now)
            .unwrap()
            .complete(json!("pong"));
        assert!(pending.resolve(CorrelationId(1), now).is_none());
        assert_eq!(*seen.lock().unwrap(), vec![json!("pong")]);
    }

    #[test]
    fn test_late_reply_is_discarded() {
        let mut pending = requests(4);
        let now = Instant::now();
        let (seen, waiter) = capture();
        pending.insert(CorrelationId(1), waiter, now).ok().unwrap();

        let later = after(now, 150);
        assert!(pending.resolve(CorrelationId(1), later).is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_limit_enforced_after_sweep() {
        let mut pending = requests(1);
        let now = Instant::now();
        let (_, first) = capture();
        let (_, second) = capture();
        let (_, third) = capture();

        pending.insert(CorrelationId(1), first, now).ok().unwrap();
        let (err, _) = pending.insert(CorrelationId(2), second, now).err().unwrap();
        assert_eq!(err, BridgeError::TooManyPending { limit: 1 });

        // Once the first request expires there is room again.
        let later = after(now, 150);
        assert!(pending.insert(CorrelationId(3), third, later).is_ok());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_future_fails_on_clear() {
        let mut pending = requests(4);
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let future = ResponseFuture::new(
            ChannelId::new(),
            CorrelationId(9),
            pending.deadline_from(now),
            rx,
        );
        pending
            .insert(CorrelationId(9), Waiter::Future(tx), now)
            .ok()
            .unwrap();

        assert_eq!(pending.clear(), 1);
        let err = future.wait().await.unwrap_err();
        assert!(matches!(err, BridgeError::ChannelClosed { .. }));
    }

    #[tokio::test]
    async fn test_future_times_out() {
        let (_tx, rx) = oneshot::channel();
        let deadline = Instant::now().checked_add(Duration::from_millis(10));
        let future = ResponseFuture::new(ChannelId::new(), CorrelationId(4), deadline, rx);
        assert_eq!(
            future.wait().await.unwrap_err(),
            BridgeError::Timeout {
                id: CorrelationId(4)
            }
        );
    }
}
