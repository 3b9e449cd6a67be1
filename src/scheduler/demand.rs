use crate::core::{DemandUpdate, EntityId, KeyPool, ResultCache, Settings};
use crate::remote::StatusApi;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub enum VisibilityEvent {
    Shown(EntityId),
    Hidden(EntityId),
}

struct DemandState {
    visible: HashSet<EntityId>,
    queue: VecDeque<EntityId>,
    task: Option<JoinHandle<()>>,
}

// Visibility-driven fetch scheduler: keeps a deduplicated FIFO of in-view
// entities and drains it at the pool's global spacing, short-circuiting
// through the result cache when an entry is still fresh.
#[derive(Clone)]
pub struct DemandScheduler {
    pool: Arc<KeyPool>,
    cache: Arc<ResultCache>,
    api: Arc<dyn StatusApi>,
    updates_tx: mpsc::UnboundedSender<DemandUpdate>,
    visibility_tx: mpsc::UnboundedSender<VisibilityEvent>,
    // The run loop holds this lock for its lifetime; the channel itself
    // outlives any single init()/destroy() cycle so host-held senders
    // stay valid across restarts.
    visibility_rx: Arc<Mutex<mpsc::UnboundedReceiver<VisibilityEvent>>>,
    rescan_interval: Duration,
    state: Arc<Mutex<DemandState>>,
}

impl DemandScheduler {
    pub fn new(
        pool: Arc<KeyPool>,
        cache: Arc<ResultCache>,
        api: Arc<dyn StatusApi>,
        settings: &Settings,
        updates_tx: mpsc::UnboundedSender<DemandUpdate>,
    ) -> Self {
        let (visibility_tx, visibility_rx) = mpsc::unbounded_channel();
        Self {
            pool,
            cache,
            api,
            updates_tx,
            visibility_tx,
            visibility_rx: Arc::new(Mutex::new(visibility_rx)),
            rescan_interval: settings.rescan_interval(),
            state: Arc::new(Mutex::new(DemandState {
                visible: HashSet::new(),
                queue: VecDeque::new(),
                task: None,
            })),
        }
    }

    // Edge-event channel for the host's visibility signal. Events are
    // consumed by the loop started in init().
    pub fn visibility_sender(&self) -> mpsc::UnboundedSender<VisibilityEvent> {
        self.visibility_tx.clone()
    }

    pub async fn init(&self) {
        let mut state = self.state.lock().await;
        if state.task.is_some() {
            tracing::debug!("Demand scheduler already running, ignoring init");
            return;
        }
        state.task = Some(tokio::spawn(self.clone().run_loop()));
        tracing::info!("Demand scheduler started");
    }

    // Stops the loop and forgets pending work; the cache and anything
    // already committed durably survive.
    pub async fn destroy(&self) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.queue.clear();
        state.visible.clear();
        tracing::info!("Demand scheduler stopped");
    }

    pub async fn become_visible(&self, entity_id: EntityId) {
        {
            let mut state = self.state.lock().await;
            state.visible.insert(entity_id.clone());
        }
        self.enqueue_if_due(&entity_id).await;
    }

    // Hiding also purges the queue, whether or not the id was ever dequeued.
    pub async fn become_hidden(&self, entity_id: &str) {
        let mut state = self.state.lock().await;
        state.visible.remove(entity_id);
        state.queue.retain(|queued| queued != entity_id);
    }

    pub async fn enqueue_if_due(&self, entity_id: &str) {
        if self.cache.is_fresh(entity_id).await {
            tracing::debug!(entity_id, "Cache entry still fresh, skipping enqueue");
            return;
        }

        let mut state = self.state.lock().await;
        if !state.visible.contains(entity_id) {
            return;
        }
        if state.queue.iter().any(|queued| queued == entity_id) {
            return;
        }
        state.queue.push_back(entity_id.to_string());
    }

    async fn run_loop(self) {
        // Released when the loop's future is dropped on destroy(), so a
        // later init() can pick the receiver up again
        let mut visibility_rx = self.visibility_rx.lock().await;
        let mut pool_rx = self.pool.subscribe();
        let period = self.pool.effective_interval().await;
        let mut drain = tokio::time::interval_at(Instant::now() + period, period);
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rescan = tokio::time::interval_at(
            Instant::now() + self.rescan_interval,
            self.rescan_interval,
        );
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = drain.tick() => {
                    // Detached so a hung fetch delays its own bookkeeping,
                    // never the drain timer or event handling
                    let scheduler = self.clone();
                    tokio::spawn(async move { scheduler.drain_one().await });
                }
                _ = rescan.tick() => {
                    self.rescan().await;
                }
                event = visibility_rx.recv() => {
                    match event {
                        Some(VisibilityEvent::Shown(id)) => self.become_visible(id).await,
                        Some(VisibilityEvent::Hidden(id)) => self.become_hidden(&id).await,
                        // Host dropped the visibility signal
                        None => break,
                    }
                }
                changed = pool_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = self.pool.effective_interval().await;
                    tracing::info!(period_ms = period.as_millis() as u64, "Demand drain interval updated");
                    drain = tokio::time::interval_at(Instant::now() + period, period);
                    drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }
        }
    }

    // One drain step. An item popped while quota is exhausted is dropped
    // rather than retried immediately; the periodic rescan brings it back
    // if the entity is still visible.
    pub async fn drain_one(&self) {
        let entity_id = {
            let mut state = self.state.lock().await;
            let Some(entity_id) = state.queue.pop_front() else {
                return;
            };
            if !state.visible.contains(&entity_id) {
                // Visibility changed since enqueue; not an error
                tracing::debug!(entity_id = %entity_id, "Entity hidden since enqueue, dropping");
                return;
            }
            entity_id
        };

        let Some(credential) = self.pool.acquire().await else {
            tracing::debug!(entity_id = %entity_id, "No credential with remaining quota, deferring demand fetch");
            return;
        };

        match self.api.fetch_status(&entity_id, &credential).await {
            Ok(snapshot) => {
                self.cache.put(entity_id.clone(), snapshot.clone()).await;
                let _ = self.updates_tx.send(DemandUpdate {
                    entity_id,
                    result: Ok(snapshot),
                });
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity_id, error = %e, "Demand fetch failed");
                let _ = self.updates_tx.send(DemandUpdate {
                    entity_id,
                    result: Err(e),
                });
            }
        }
    }

    // Keeps entities that stay on screen fresh without a new visibility edge.
    pub async fn rescan(&self) {
        let visible: Vec<EntityId> = {
            let state = self.state.lock().await;
            state.visible.iter().cloned().collect()
        };

        for entity_id in visible {
            self.enqueue_if_due(&entity_id).await;
        }
    }

    #[cfg(test)]
    async fn queue_snapshot(&self) -> Vec<EntityId> {
        self.state.lock().await.queue.iter().cloned().collect()
    }
}
