//! Closable job queue used to feed level workers.

use std::sync::Mutex;

use crate::{ResflowError, Result};

/// Bounded MPMC (multi-producer, multi-consumer) queue.
///
/// Every job is consumed by exactly one receiver. Once [`Queue::close`] has
/// been called, receivers drain what is left and then observe `None`.
/// Backed by flume.
pub struct Queue<T> {
    receiver: flume::Receiver<T>,
    sender: Mutex<Option<flume::Sender<T>>>,
}

impl<T> Queue<T> {
    /// create a new queue
    pub fn new(cap: usize) -> Self {
        let (tx, rx) = flume::bounded(cap.max(1));

        Self {
            receiver: rx,
            sender: Mutex::new(Some(tx)),
        }
    }

    /// send a message to the queue, fails once the queue is closed or full
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        let guard = self.sender.lock().map_err(|e| ResflowError::Queue(e.to_string()))?;
        match guard.as_ref() {
            Some(tx) => tx.try_send(msg).map_err(|e| ResflowError::Queue(e.to_string())),
            None => Err(ResflowError::Queue("queue is closed".to_string())),
        }
    }

    /// close the sending side; pending messages stay receivable
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    /// receive a message from the queue asynchronously
    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }

    /// number of messages waiting to be received
    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}
