//! Generation-tagged channels between a consumer and its background worker.
//!
//! Each request kind owns a [`GenerationSlot`]. Starting a request cancels the
//! previous worker, bumps the generation id and hands out a [`Ticket`] that
//! tags every message the new worker sends. Draining keeps only messages of
//! the current generation, so a superseded worker can never change state.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long [`GenerationSlot::stop`] waits for a worker before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub generation: u64,
    pub payload: T,
}

/// Handle given to a worker: its generation, stop flag and outbox.
#[derive(Debug, Clone)]
pub struct Ticket<T> {
    generation: u64,
    cancel: CancellationToken,
    sender: mpsc::UnboundedSender<Tagged<T>>,
}

impl<T> Ticket<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send a message tagged with this ticket's generation. Returns `false`
    /// once the slot is gone.
    pub fn send(&self, payload: T) -> bool {
        self.sender
            .send(Tagged {
                generation: self.generation,
                payload,
            })
            .is_ok()
    }
}

pub struct GenerationSlot<T> {
    generation: u64,
    cancel: Option<CancellationToken>,
    sender: mpsc::UnboundedSender<Tagged<T>>,
    receiver: mpsc::UnboundedReceiver<Tagged<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T> Default for GenerationSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GenerationSlot<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            generation: 0,
            cancel: None,
            sender,
            receiver,
            task: None,
        }
    }

    /// Id of the most recent request (0 before the first one).
    pub fn current(&self) -> u64 {
        self.generation
    }

    /// Supersede the running request and issue a ticket for a new one.
    pub fn begin(&mut self) -> Ticket<T> {
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        // The previous worker is only signalled; its leftovers are filtered
        // out by generation when drained.
        self.task = None;
        self.generation += 1;

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        debug!(generation = self.generation, "New request generation");

        Ticket {
            generation: self.generation,
            cancel,
            sender: self.sender.clone(),
        }
    }

    /// Remember the task serving the current ticket so `stop` can await it.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Consume every queued message, keeping current-generation payloads in
    /// send order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut current = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            if message.generation == self.generation {
                current.push(message.payload);
            }
        }
        current
    }

    /// Latest current-generation payload, if any was queued.
    pub fn drain_latest(&mut self) -> Option<T> {
        self.drain().pop()
    }

    /// Cancel the running worker and wait for it, aborting it after
    /// [`STOP_TIMEOUT`].
    pub async fn stop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                warn!(generation = self.generation, "Worker did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl<T> Drop for GenerationSlot<T> {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
