//! Per-contact serialisation of conversation turns.
//!
//! The [`ConversationRouter`] runs one Tokio task per sender, fed by a
//! bounded mpsc channel. A sender's messages are handled strictly in
//! arrival order; different senders run concurrently.
//!
//! Routing never waits on a worker. When a sender's channel is full the
//! message goes to that sender's backlog, and a drain task moves the
//! backlog into the channel as the worker frees slots. Workers that stay
//! idle for the configured period exit and are forgotten.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::engine::ConversationEngine;
use super::ConversationError;
use crate::types::ClassifiedMessage;

/// Default per-contact channel buffer.
pub const DEFAULT_SESSION_BUFFER: usize = 32;

/// Default time a worker waits for its next message before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);

type WorkerMap = Arc<Mutex<HashMap<String, WorkerSlot>>>;

/// Overflow for one sender, in arrival order.
#[derive(Debug, Default)]
struct Backlog {
    queue: VecDeque<ClassifiedMessage>,
    /// A drain task owns the channel until the queue empties.
    draining: bool,
}

#[derive(Debug)]
struct WorkerSlot {
    id: u64,
    tx: mpsc::Sender<ClassifiedMessage>,
    backlog: Arc<StdMutex<Backlog>>,
}

/// Routes classified messages to per-contact workers, creating them on demand.
pub struct ConversationRouter {
    /// Worker slots keyed by sender id.
    workers: WorkerMap,
    engine: Arc<ConversationEngine>,
    buffer: usize,
    idle_timeout: Duration,
    next_id: StdMutex<u64>,
}

impl std::fmt::Debug for ConversationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRouter")
            .field("buffer", &self.buffer)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl ConversationRouter {
    /// Create a router. `buffer` is the per-contact queue length.
    pub fn new(engine: Arc<ConversationEngine>, buffer: usize) -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            engine,
            buffer: buffer.max(1),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            next_id: StdMutex::new(0),
        }
    }

    /// Exit a contact's worker after `idle` with no messages.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Consume classified messages until the inbound channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<ClassifiedMessage>) {
        while let Some(message) = inbound.recv().await {
            if let Err(e) = self.route(message).await {
                warn!(error = %e, "failed to route inbound message");
            }
        }
        info!("inbound channel closed, router stopping");
    }

    /// Queue a message on its sender's worker, spawning one if needed.
    ///
    /// Never waits for the worker: a full queue spills into the sender's
    /// backlog. A worker whose channel has closed is replaced once.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::WorkerUnavailable`] if the replacement
    /// worker also refuses the message.
    pub async fn route(&self, message: ClassifiedMessage) -> Result<(), ConversationError> {
        let sender_id = message.sender_id.clone();
        let mut message = message;
        let mut workers = self.workers.lock().await;

        for _ in 0..2 {
            let slot = workers
                .entry(sender_id.clone())
                .or_insert_with(|| self.spawn_worker(&sender_id));

            let mut backlog = lock_backlog(&slot.backlog);
            if backlog.draining {
                backlog.queue.push_back(message);
                return Ok(());
            }

            match slot.tx.try_send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    debug!(sender_id = %sender_id, "worker queue full, spilling to backlog");
                    backlog.queue.push_back(returned);
                    backlog.draining = true;
                    tokio::spawn(drain_backlog(
                        sender_id.clone(),
                        slot.tx.clone(),
                        Arc::clone(&slot.backlog),
                    ));
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    info!(sender_id = %sender_id, "worker channel closed, replacing worker");
                    message = returned;
                    drop(backlog);
                    workers.remove(&sender_id);
                }
            }
        }

        Err(ConversationError::WorkerUnavailable(sender_id))
    }

    /// Forget every worker. Each one finishes its queued messages and exits.
    pub async fn shutdown_all(&self) {
        let mut workers = self.workers.lock().await;
        let count = workers.len();
        workers.clear();
        info!(count, "all conversation workers shut down");
    }

    /// Returns the number of live workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    fn spawn_worker(&self, sender_id: &str) -> WorkerSlot {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next = next.wrapping_add(1);
            *next
        };
        let (tx, rx) = mpsc::channel(self.buffer);
        let backlog = Arc::new(StdMutex::new(Backlog::default()));
        debug!(sender_id, worker_id = id, "spawning conversation worker");
        let worker = Worker {
            sender_id: sender_id.to_owned(),
            id,
            engine: Arc::clone(&self.engine),
            workers: Arc::clone(&self.workers),
            idle_timeout: self.idle_timeout,
        };
        tokio::spawn(run_worker(worker, rx));
        WorkerSlot { id, tx, backlog }
    }
}

fn lock_backlog(backlog: &StdMutex<Backlog>) -> MutexGuard<'_, Backlog> {
    backlog.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feed a sender's backlog into its channel, one free slot at a time.
async fn drain_backlog(
    sender_id: String,
    tx: mpsc::Sender<ClassifiedMessage>,
    backlog: Arc<StdMutex<Backlog>>,
) {
    loop {
        let Ok(permit) = tx.reserve().await else {
            let mut backlog = lock_backlog(&backlog);
            warn!(
                sender_id = %sender_id,
                dropped = backlog.queue.len(),
                "worker gone, dropping backlog"
            );
            backlog.queue.clear();
            backlog.draining = false;
            return;
        };

        let mut backlog = lock_backlog(&backlog);
        if let Some(message) = backlog.queue.pop_front() {
            permit.send(message);
        }
        if backlog.queue.is_empty() {
            backlog.draining = false;
            return;
        }
    }
}

enum Retire {
    Done,
    Stay,
    Handle(ClassifiedMessage),
}

struct Worker {
    sender_id: String,
    id: u64,
    engine: Arc<ConversationEngine>,
    workers: WorkerMap,
    idle_timeout: Duration,
}

impl Worker {
    /// Remove this worker's slot if nothing is queued for it.
    ///
    /// Every send happens under the map lock or while the backlog is
    /// draining, so an empty channel seen here stays empty.
    async fn retire(&self, rx: &mut mpsc::Receiver<ClassifiedMessage>) -> Retire {
        let mut workers = self.workers.lock().await;
        let Some(slot) = workers.get(&self.sender_id).filter(|s| s.id == self.id) else {
            // Already forgotten by shutdown; run until the channel closes.
            return Retire::Stay;
        };
        if lock_backlog(&slot.backlog).draining {
            return Retire::Stay;
        }
        if let Ok(message) = rx.try_recv() {
            return Retire::Handle(message);
        }
        workers.remove(&self.sender_id);
        Retire::Done
    }
}

async fn run_worker(worker: Worker, mut rx: mpsc::Receiver<ClassifiedMessage>) {
    loop {
        match tokio::time::timeout(worker.idle_timeout, rx.recv()).await {
            Ok(Some(message)) => {
                worker.engine.handle(&message.sender_id, &message.text).await;
            }
            Ok(None) => break,
            Err(_elapsed) => match worker.retire(&mut rx).await {
                Retire::Done => {
                    debug!(sender_id = %worker.sender_id, "conversation worker idle, retiring");
                    break;
                }
                Retire::Handle(message) => {
                    worker.engine.handle(&message.sender_id, &message.text).await;
                }
                Retire::Stay => {}
            },
        }
    }
    debug!(sender_id = %worker.sender_id, "conversation worker stopped");
}
