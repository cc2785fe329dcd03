//! bounded message buffer backing both data plane pipelines.
//!
//! the buffer is a strict FIFO with a supplying lifecycle. capacity is either
//! a queued message count or the sum of serialized message sizes, chosen at
//! construction. producers optionally block on a full buffer (back-pressure);
//! consumers block on an empty one. all waits observe the buffer cancellation
//! token and release within bounded time.

use std::{collections::VecDeque, sync::Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Capacity,
    error::{Canceled, ClosedQueue, Error},
};

/// serialized byte size of a queued message, the allocation unit of an
/// allocation bounded buffer.
pub trait MessageSize {
    fn message_size(&self) -> usize;
}

impl<M> MessageSize for M
where
    M: prost::Message,
{
    #[inline]
    fn message_size(&self) -> usize {
        self.encoded_len()
    }
}

/// lifecycle of a [BoundedBuffer].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// constructed, not yet accepting messages.
    Idle,
    /// accepting and serving messages.
    Supplying,
    /// producers rejected; consumers served until the queue runs dry.
    Draining,
    /// final state. residual messages are gone.
    Terminated,
}

/// outcome of a consumer side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polled<T> {
    Item(T),
    /// queue empty within the allowed wait.
    Empty,
    /// bounded wait reached its deadline.
    TimedOut,
    /// buffer terminated with an empty queue; the consumer loop must stop.
    Closed,
    /// the cancellation token fired.
    Canceled,
}

impl<T> Polled<T> {
    /// unwrap the item variant, mapping every other outcome to an error.
    pub fn into_result(self) -> Result<Option<T>, Error> {
        match self {
            Self::Item(msg) => Ok(Some(msg)),
            Self::Empty | Self::Closed => Ok(None),
            Self::TimedOut => Err(crate::error::Timeout.into()),
            Self::Canceled => Err(Canceled.into()),
        }
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    allocation: usize,
    state: BufferState,
}

/// typed FIFO shared by one producer stage and one consumer stage.
///
/// shared through [`std::sync::Arc`]; every method takes `&self`. wake ups of
/// blocked producers and consumers proceed in arrival order.
pub struct BoundedBuffer<T> {
    capacity: Capacity,
    backpressure: bool,
    inner: Mutex<Inner<T>>,
    producers: Notify,
    consumers: Notify,
    on_empty: Notify,
    token: CancellationToken,
}

impl<T: MessageSize> BoundedBuffer<T> {
    pub fn new(capacity: Capacity, backpressure: bool) -> Self {
        Self::with_cancellation(capacity, backpressure, CancellationToken::new())
    }

    /// buffer participating in a caller owned cancellation hierarchy.
    pub fn with_cancellation(capacity: Capacity, backpressure: bool, token: CancellationToken) -> Self {
        Self {
            capacity,
            backpressure,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                allocation: 0,
                state: BufferState::Idle,
            }),
            producers: Notify::new(),
            consumers: Notify::new(),
            on_empty: Notify::new(),
            token,
        }
    }

    #[inline]
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    #[inline]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().unwrap().state
    }

    /// queued message count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// sum of serialized sizes of queued messages.
    pub fn allocation(&self) -> usize {
        self.inner.lock().unwrap().allocation
    }

    /// true while consumers may still observe messages: supplying, or
    /// draining with a non empty queue.
    pub fn is_supplying(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            BufferState::Supplying => true,
            BufferState::Draining => !inner.queue.is_empty(),
            _ => false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == BufferState::Terminated
    }

    /// move the buffer from idle to supplying.
    pub fn activate(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BufferState::Idle {
            return Err(crate::error::AlreadyStarted.into());
        }
        inner.state = BufferState::Supplying;
        drop(inner);
        self.producers.notify_waiters();
        Ok(())
    }

    // true when msg fits under the capacity regime. an allocation bounded
    // buffer admits an oversized message alone on an empty queue, otherwise
    // a producer could never make progress.
    fn fits(&self, inner: &Inner<T>, size: usize) -> bool {
        match self.capacity {
            Capacity::Count(limit) => inner.queue.len() < limit,
            Capacity::Allocation(limit) => inner.queue.is_empty() || inner.allocation + size <= limit,
        }
    }

    fn below_capacity(&self, inner: &Inner<T>) -> bool {
        match self.capacity {
            Capacity::Count(limit) => inner.queue.len() < limit,
            Capacity::Allocation(limit) => inner.allocation < limit,
        }
    }

    /// admit one message, preserving offer order.
    ///
    /// fails with [ClosedQueue] while the buffer is not supplying. with
    /// back-pressure on the call waits until the message fits under capacity;
    /// with back-pressure off it admits unconditionally.
    pub async fn offer(&self, msg: T) -> Result<(), Error> {
        let size = msg.message_size();
        let notified = self.producers.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                match inner.state {
                    BufferState::Supplying => {
                        if !self.backpressure || self.fits(&inner, size) {
                            inner.queue.push_back(msg);
                            inner.allocation += size;
                            drop(inner);
                            self.consumers.notify_one();
                            return Ok(());
                        }
                    }
                    _ => return Err(ClosedQueue.into()),
                }
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = self.token.cancelled() => return Err(Canceled.into()),
            }
            notified.set(self.producers.notified());
        }
    }

    /// admit a batch in order. stops at the first failure.
    pub async fn offer_all(&self, msgs: Vec<T>) -> Result<(), Error> {
        for msg in msgs {
            self.offer(msg).await?;
        }
        Ok(())
    }

    fn pop(&self, inner: &mut Inner<T>) -> Option<T> {
        let msg = inner.queue.pop_front()?;
        inner.allocation -= msg.message_size();
        if inner.queue.is_empty() {
            inner.allocation = 0;
            if inner.state == BufferState::Draining {
                inner.state = BufferState::Terminated;
            }
            self.on_empty.notify_waiters();
        }
        self.producers.notify_waiters();
        Some(msg)
    }

    /// remove and return the head message, waiting while the queue is empty.
    ///
    /// resolves to [Polled::Closed] once the buffer terminated with an empty
    /// queue, [Polled::Canceled] when the cancellation token fires.
    pub async fn take(&self) -> Polled<T> {
        let notified = self.consumers.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(msg) = self.pop(&mut inner) {
                    return Polled::Item(msg);
                }
                match inner.state {
                    BufferState::Terminated => return Polled::Closed,
                    BufferState::Draining => {
                        inner.state = BufferState::Terminated;
                        drop(inner);
                        self.notify_all();
                        return Polled::Closed;
                    }
                    _ => {}
                }
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = self.token.cancelled() => return Polled::Canceled,
            }
            notified.set(self.consumers.notified());
        }
    }

    /// non blocking head removal.
    pub fn poll(&self) -> Polled<T> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(msg) = self.pop(&mut inner) {
            return Polled::Item(msg);
        }
        match inner.state {
            BufferState::Terminated => Polled::Closed,
            BufferState::Draining => {
                inner.state = BufferState::Terminated;
                drop(inner);
                self.notify_all();
                Polled::Closed
            }
            _ => Polled::Empty,
        }
    }

    /// head removal with a bounded wait.
    pub async fn poll_timeout(&self, timeout: core::time::Duration) -> Polled<T> {
        match tokio::time::timeout(timeout, self.take()).await {
            Ok(polled) => polled,
            Err(_) => Polled::TimedOut,
        }
    }

    /// wait until the queue load is below capacity, or the buffer stopped
    /// supplying.
    pub async fn await_queue_ready(&self) -> Result<(), Error> {
        let notified = self.producers.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().unwrap();
                if self.below_capacity(&inner) || !matches!(inner.state, BufferState::Supplying) {
                    return Ok(());
                }
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = self.token.cancelled() => return Err(Canceled.into()),
            }
            notified.set(self.producers.notified());
        }
    }

    /// wait until the queue is empty.
    pub async fn await_queue_empty(&self) -> Result<(), Error> {
        let notified = self.on_empty.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            if self.inner.lock().unwrap().queue.is_empty() {
                return Ok(());
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = self.token.cancelled() => return Err(Canceled.into()),
            }
            notified.set(self.on_empty.notified());
        }
    }

    /// stop producers, keep serving consumers until the queue runs dry, then
    /// terminate. repeated calls are no-ops.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BufferState::Idle => inner.state = BufferState::Terminated,
            BufferState::Supplying => {
                inner.state = if inner.queue.is_empty() {
                    BufferState::Terminated
                } else {
                    BufferState::Draining
                };
            }
            _ => {}
        }
        drop(inner);
        self.notify_all();
    }

    /// terminate immediately, returning the residual messages in FIFO order.
    pub fn shutdown_now(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BufferState::Terminated;
        inner.allocation = 0;
        let residual = inner.queue.drain(..).collect();
        drop(inner);
        self.notify_all();
        residual
    }

    fn notify_all(&self) {
        self.producers.notify_waiters();
        self.consumers.notify_waiters();
        self.on_empty.notify_waiters();
    }
}

#[cfg(test)]
mod test {
    use core::time::Duration;
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Msg {
        #[prost(uint64, tag = "1")]
        seq: u64,
        #[prost(bytes = "vec", tag = "2")]
        payload: Vec<u8>,
    }

    fn msg(seq: u64) -> Msg {
        Msg { seq, payload: vec![] }
    }

    fn padded(seq: u64, len: usize) -> Msg {
        Msg {
            seq,
            payload: vec![0; len],
        }
    }

    fn active(capacity: Capacity, backpressure: bool) -> Arc<BoundedBuffer<Msg>> {
        let buf = Arc::new(BoundedBuffer::new(capacity, backpressure));
        buf.activate().unwrap();
        buf
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let buf = active(Capacity::Count(100), true);
        for i in 0..50 {
            buf.offer(msg(i)).await.unwrap();
        }
        buf.shutdown();
        let mut seen = Vec::new();
        loop {
            match buf.take().await {
                Polled::Item(m) => seen.push(m.seq),
                Polled::Closed => break,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        assert!(buf.is_terminated());
    }

    #[tokio::test]
    async fn offer_before_activation_rejected() {
        let buf: BoundedBuffer<Msg> = BoundedBuffer::new(Capacity::Count(4), true);
        let err = buf.offer(msg(0)).await.unwrap_err();
        assert!(err.is_closed_queue());
    }

    #[tokio::test]
    async fn count_capacity_blocks_producer() {
        let buf = active(Capacity::Count(2), true);
        buf.offer(msg(0)).await.unwrap();
        buf.offer(msg(1)).await.unwrap();
        assert_eq!(buf.len(), 2);

        let producer = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.offer(msg(2)).await })
        };
        // producer must be parked on the full buffer.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(buf.len(), 2);

        assert!(matches!(buf.take().await, Polled::Item(m) if m.seq == 0));
        producer.await.unwrap().unwrap();
        assert_eq!(buf.len(), 2);
    }

    #[tokio::test]
    async fn allocation_capacity_accounting() {
        let limit = 256;
        let buf = active(Capacity::Allocation(limit), true);
        buf.offer(padded(0, 100)).await.unwrap();
        buf.offer(padded(1, 100)).await.unwrap();
        assert!(buf.allocation() <= limit);

        // third message would exceed the allocation budget.
        let producer = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.offer(padded(2, 100)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert!(matches!(buf.take().await, Polled::Item(_)));
        producer.await.unwrap().unwrap();
        assert!(buf.allocation() <= limit);
    }

    #[tokio::test]
    async fn backpressure_off_admits_over_capacity() {
        let buf = active(Capacity::Count(1), false);
        for i in 0..10 {
            buf.offer(msg(i)).await.unwrap();
        }
        assert_eq!(buf.len(), 10);
    }

    #[tokio::test]
    async fn draining_serves_consumers_then_terminates() {
        let buf = active(Capacity::Count(8), true);
        buf.offer(msg(0)).await.unwrap();
        buf.shutdown();

        assert_eq!(buf.state(), BufferState::Draining);
        assert!(buf.is_supplying());
        assert!(buf.offer(msg(1)).await.unwrap_err().is_closed_queue());

        assert!(matches!(buf.take().await, Polled::Item(m) if m.seq == 0));
        assert!(matches!(buf.take().await, Polled::Closed));
        assert_eq!(buf.state(), BufferState::Terminated);
        assert!(!buf.is_supplying());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let buf = active(Capacity::Count(8), true);
        buf.shutdown();
        assert!(buf.is_terminated());
        buf.shutdown();
        assert!(buf.shutdown_now().is_empty());
        assert!(buf.is_terminated());
    }

    #[tokio::test]
    async fn shutdown_now_drops_residual() {
        let buf = active(Capacity::Count(8), true);
        for i in 0..3 {
            buf.offer(msg(i)).await.unwrap();
        }
        let residual = buf.shutdown_now();
        assert_eq!(residual.len(), 3);
        assert!(matches!(buf.take().await, Polled::Closed));
        assert_eq!(buf.allocation(), 0);
    }

    #[tokio::test]
    async fn poll_variants() {
        let buf = active(Capacity::Count(8), true);
        assert!(matches!(buf.poll(), Polled::Empty));
        assert!(matches!(buf.poll_timeout(Duration::from_millis(10)).await, Polled::TimedOut));

        buf.offer(msg(7)).await.unwrap();
        assert!(matches!(buf.poll(), Polled::Item(m) if m.seq == 7));

        buf.shutdown();
        assert!(matches!(buf.poll(), Polled::Closed));
    }

    #[tokio::test]
    async fn take_wakes_on_late_offer() {
        let buf = active(Capacity::Count(8), true);
        let consumer = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.take().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.offer(msg(42)).await.unwrap();
        assert!(matches!(consumer.await.unwrap(), Polled::Item(m) if m.seq == 42));
    }

    #[tokio::test]
    async fn await_queue_ready_and_empty() {
        let buf = active(Capacity::Count(1), true);
        buf.await_queue_ready().await.unwrap();
        buf.offer(msg(0)).await.unwrap();

        let ready = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.await_queue_ready().await })
        };
        let empty = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.await_queue_empty().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ready.is_finished());
        assert!(!empty.is_finished());

        assert!(matches!(buf.take().await, Polled::Item(_)));
        ready.await.unwrap().unwrap();
        empty.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_releases_waiters() {
        let token = CancellationToken::new();
        let buf = Arc::new(BoundedBuffer::<Msg>::with_cancellation(
            Capacity::Count(1),
            true,
            token.clone(),
        ));
        buf.activate().unwrap();
        buf.offer(msg(0)).await.unwrap();

        let producer = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.offer(msg(1)).await })
        };
        let consumer = {
            let buf = buf.clone();
            tokio::spawn(async move {
                // park a second consumer behind the first message.
                let _ = buf.take().await;
                buf.take().await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert!(producer.await.unwrap().unwrap_err().is_canceled());
        assert!(matches!(consumer.await.unwrap(), Polled::Canceled | Polled::Item(_)));
    }
}
