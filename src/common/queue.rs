//! Message queues for inter-component communication.
//!
//! `Queue` is point-to-point (each message consumed once), `BroadcastQueue`
//! fans every message out to all subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{AutoflowError, Result};

/// Bounded MPMC queue backed by flume.
///
/// The monitor uses it to hand run notifications to the sink worker so a slow
/// webhook never stalls the event broadcast.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: flume::Receiver<T>,
    sender: flume::Sender<T>,
}

impl<T> Queue<T> {
    pub fn new(cap: usize) -> Arc<Self> {
        let (sender, receiver) = flume::bounded(cap);
        Arc::new(Self {
            receiver,
            sender,
        })
    }

    /// Enqueue without waiting; fails when the queue is full or closed.
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.try_send(msg).map_err(|e| AutoflowError::Queue(e.to_string()))
    }

    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }
}

/// Broadcast queue for one-to-many message distribution.
#[derive(Clone)]
pub struct BroadcastQueue<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> BroadcastQueue<T> {
    pub fn new(cap: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(cap);
        Arc::new(Self {
            sender,
        })
    }

    /// Publish a message. Having no subscribers is not an error.
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender.send(msg).map_err(|e| AutoflowError::Queue(e.to_string()))?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}
