//! Inbound event dispatcher
//!
//! One loop drains the bounded inbound queue and routes each event to a
//! worker task owned by its conversation key. A worker handles its events
//! strictly in arrival order and exits after sitting idle; the next event for
//! that key spawns a fresh one. Different keys proceed concurrently.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::orchestrator::{ReplyOrchestrator, TurnOutcome};
use crate::config::DispatcherConfig;
use crate::memory::ConversationKey;
use crate::transport::InboundEvent;

/// Something that consumes one event to completion
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> TurnOutcome;
}

#[async_trait]
impl EventHandler for ReplyOrchestrator {
    async fn handle(&self, event: InboundEvent) -> TurnOutcome {
        ReplyOrchestrator::handle(self, event).await
    }
}

/// Bounded inbound queue
pub fn inbound_queue(capacity: usize) -> (mpsc::Sender<InboundEvent>, mpsc::Receiver<InboundEvent>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: u64,
    pub workers_spawned: u64,
}

/// Per-conversation worker. Its queue is unbounded so handing an event over
/// never waits; the bounded inbound queue is the only backpressure.
struct Worker {
    queue: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    idle: Duration,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn EventHandler>, config: &DispatcherConfig) -> Self {
        Self {
            handler,
            idle: Duration::from_secs(config.idle_worker_secs),
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Consume `inbound` until every sender is dropped, then drain workers
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundEvent>) -> DispatchSummary {
        let mut workers: HashMap<ConversationKey, Worker> = HashMap::new();
        let mut summary = DispatchSummary::default();

        info!("Dispatcher started");

        while let Some(event) = inbound.recv().await {
            summary.dispatched += 1;
            workers.retain(|_, w| !w.handle.is_finished());

            let key = event.conversation.clone();
            let (event, predecessor) = match workers.remove(&key) {
                Some(worker) => match worker.queue.send(event) {
                    Ok(()) => {
                        workers.insert(key, worker);
                        continue;
                    }
                    // Worker went idle and closed its queue
                    Err(mpsc::error::SendError(event)) => (event, Some(worker.handle)),
                },
                None => (event, None),
            };

            let worker = self.spawn_worker(key.clone(), predecessor);
            summary.workers_spawned += 1;
            if let Err(mpsc::error::SendError(event)) = worker.queue.send(event) {
                error!(conversation = %event.conversation, "Fresh worker rejected event");
            }
            workers.insert(key, worker);
        }

        info!("Inbound queue closed, draining {} workers", workers.len());
        for (_, worker) in workers {
            drop(worker.queue);
            let _ = worker.handle.await;
        }

        info!(
            dispatched = summary.dispatched,
            workers = summary.workers_spawned,
            "Dispatcher stopped"
        );
        summary
    }

    /// Spawn a worker for `key`. A closing `predecessor` for the same key is
    /// awaited first so per-key order holds across respawns.
    fn spawn_worker(&self, key: ConversationKey, predecessor: Option<JoinHandle<()>>) -> Worker {
        let (queue, mut events) = mpsc::unbounded_channel::<InboundEvent>();
        let handler = Arc::clone(&self.handler);
        let idle = self.idle;

        let handle = tokio::spawn(async move {
            if let Some(previous) = predecessor {
                let _ = previous.await;
            }
            debug!(conversation = %key, "Worker started");
            loop {
                match tokio::time::timeout(idle, events.recv()).await {
                    Ok(Some(event)) => process(handler.as_ref(), event).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new events, then finish what was already queued
                        events.close();
                        while let Some(event) = events.recv().await {
                            process(handler.as_ref(), event).await;
                        }
                        break;
                    }
                }
            }
            debug!(conversation = %key, "Worker stopped");
        });

        Worker { queue, handle }
    }
}

async fn process(handler: &dyn EventHandler, event: InboundEvent) {
    let key = event.conversation.clone();
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(outcome) => debug!(conversation = %key, ?outcome, "Event handled"),
        Err(_) => error!(conversation = %key, "Turn panicked; worker continues"),
    }
}
