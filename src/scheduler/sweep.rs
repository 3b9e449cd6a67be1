use crate::core::{EntityId, KeyPool, SweepCheckpoint};
use crate::directory::EntityDirectory;
use crate::remote::StatusApi;
use crate::storage::{self, DocumentStore};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Uninitialized,
    Loading,
    Running,
}

#[derive(Debug, Clone)]
pub struct SweepStatus {
    pub phase: SweepPhase,
    pub cursor_index: usize,
    pub entity_count: usize,
    pub total_processed: u64,
    pub total_errors: u64,
}

struct SweepState {
    phase: SweepPhase,
    entities: Vec<EntityId>,
    cursor_index: usize,
    total_processed: u64,
    total_errors: u64,
    started_at: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl SweepState {
    fn new() -> Self {
        Self {
            phase: SweepPhase::Uninitialized,
            entities: Vec::new(),
            cursor_index: 0,
            total_processed: 0,
            total_errors: 0,
            started_at: None,
            task: None,
        }
    }

    fn checkpoint(&self) -> SweepCheckpoint {
        SweepCheckpoint {
            cursor_index: self.cursor_index,
            total_processed: self.total_processed,
            total_errors: self.total_errors,
            entity_count: self.entities.len(),
            last_updated: Some(Utc::now()),
        }
    }
}

// Indefinite full re-poll of the tracked entity roster, one entity per tick,
// resuming across restarts from the persisted checkpoint.
#[derive(Clone)]
pub struct SweepPoller {
    pool: Arc<KeyPool>,
    directory: Arc<dyn EntityDirectory>,
    api: Arc<dyn StatusApi>,
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<SweepState>>,
}

impl SweepPoller {
    pub fn new(
        pool: Arc<KeyPool>,
        directory: Arc<dyn EntityDirectory>,
        api: Arc<dyn StatusApi>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            pool,
            directory,
            api,
            store,
            state: Arc::new(Mutex::new(SweepState::new())),
        }
    }

    // Loads the roster and the persisted checkpoint, then starts the tick
    // loop. Idempotent: a second call while initialized is a no-op.
    pub async fn init(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.phase != SweepPhase::Uninitialized {
                tracing::debug!(phase = ?state.phase, "Sweep already initialized, ignoring init");
                return Ok(());
            }
            state.phase = SweepPhase::Loading;
            state.started_at = Some(Instant::now());
        }

        let entities = match self.directory.list_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                self.state.lock().await.phase = SweepPhase::Uninitialized;
                return Err(e).context("Failed to list entities for sweep");
            }
        };
        let ids: Vec<EntityId> = entities.into_iter().map(|e| e.id).collect();

        if ids.is_empty() {
            // Halted without a timer; an explicit destroy() + init() retries
            tracing::info!("Entity directory is empty, nothing to sweep");
            return Ok(());
        }

        let checkpoint = match storage::load_checkpoint(self.store.as_ref()).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load sweep checkpoint, starting fresh");
                None
            }
        };

        {
            let mut state = self.state.lock().await;
            match checkpoint {
                Some(cp) if cp.matches(ids.len()) => {
                    tracing::info!(
                        cursor_index = cp.cursor_index,
                        entity_count = ids.len(),
                        "Resuming sweep from saved checkpoint"
                    );
                    state.cursor_index = cp.cursor_index;
                    state.total_processed = cp.total_processed;
                    state.total_errors = cp.total_errors;
                }
                Some(_) => {
                    tracing::info!(
                        entity_count = ids.len(),
                        "Entity list changed shape since last run, starting fresh sweep"
                    );
                    state.cursor_index = 0;
                    state.total_processed = 0;
                    state.total_errors = 0;
                }
                None => {
                    tracing::info!(entity_count = ids.len(), "Starting sweep from the beginning");
                    state.cursor_index = 0;
                    state.total_processed = 0;
                    state.total_errors = 0;
                }
            }
            state.entities = ids;
            state.phase = SweepPhase::Running;
            state.task = Some(tokio::spawn(self.clone().run_loop()));
        }

        Ok(())
    }

    // Cancels the tick loop; durable state (checkpoint, entity records) is
    // kept, so a later init() resumes where the sweep left off.
    pub async fn destroy(&self) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        *state = SweepState::new();
        tracing::info!("Sweep poller stopped");
    }

    pub async fn status(&self) -> SweepStatus {
        let state = self.state.lock().await;
        SweepStatus {
            phase: state.phase,
            cursor_index: state.cursor_index,
            entity_count: state.entities.len(),
            total_processed: state.total_processed,
            total_errors: state.total_errors,
        }
    }

    async fn run_loop(self) {
        let mut pool_rx = self.pool.subscribe();
        let period = self.pool.effective_interval().await;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Detached so a hung fetch delays its own bookkeeping,
                    // never the timer or pool-change handling
                    let poller = self.clone();
                    tokio::spawn(async move { poller.tick().await });
                }
                changed = pool_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // The global rate budget changed; restart the timer so
                    // the new spacing applies from the next tick
                    let period = self.pool.effective_interval().await;
                    tracing::info!(period_ms = period.as_millis() as u64, "Sweep interval updated");
                    interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }
        }
    }

    // One scheduling step: consume a credential, fetch the entity under the
    // cursor, advance, persist the checkpoint. Fetch failures are counted
    // and logged, never propagated; a tick without quota is a no-op.
    pub async fn tick(&self) {
        {
            let state = self.state.lock().await;
            if state.phase != SweepPhase::Running {
                return;
            }
            if state.entities.is_empty() {
                tracing::debug!("No entities to process");
                return;
            }
        }

        let Some(credential) = self.pool.acquire().await else {
            tracing::debug!("No credential with remaining quota, deferring sweep tick");
            return;
        };

        let (entity_id, cycle_checkpoint) = {
            let mut state = self.state.lock().await;
            let mut cycle_checkpoint = None;

            if state.cursor_index >= state.entities.len() {
                state.cursor_index = 0;
                let elapsed_secs = state
                    .started_at
                    .map(|t| t.elapsed().as_secs())
                    .unwrap_or(0);
                tracing::info!(
                    entity_count = state.entities.len(),
                    total_processed = state.total_processed,
                    total_errors = state.total_errors,
                    elapsed_secs,
                    "Completed full sweep cycle, restarting from the beginning"
                );
                cycle_checkpoint = Some(state.checkpoint());
            }

            let entity_id = state.entities[state.cursor_index].clone();
            // Advance regardless of the fetch outcome so one bad entity
            // can never stall the sweep
            state.cursor_index += 1;
            (entity_id, cycle_checkpoint)
        };

        if let Some(checkpoint) = cycle_checkpoint {
            self.persist_checkpoint(&checkpoint).await;
        }

        match self.api.fetch_status(&entity_id, &credential).await {
            Ok(snapshot) => {
                {
                    let mut state = self.state.lock().await;
                    state.total_processed += 1;
                }
                if let Err(e) =
                    storage::persist_entity_record(self.store.as_ref(), &entity_id, &snapshot).await
                {
                    tracing::warn!(entity_id = %entity_id, error = %e, "Failed to persist entity record");
                }
                tracing::debug!(entity_id = %entity_id, "Sweep fetch succeeded");
            }
            Err(e) => {
                {
                    let mut state = self.state.lock().await;
                    state.total_errors += 1;
                }
                tracing::warn!(entity_id = %entity_id, error = %e, "Sweep fetch failed");
            }
        }

        // Persisted after every credential-consuming tick: a crash loses at
        // most the in-flight entity
        let checkpoint = self.state.lock().await.checkpoint();
        self.persist_checkpoint(&checkpoint).await;
    }

    async fn persist_checkpoint(&self, checkpoint: &SweepCheckpoint) {
        if let Err(e) = storage::save_checkpoint(self.store.as_ref(), checkpoint).await {
            // Best effort: the next tick writes a newer index anyway
            tracing::warn!(error = %e, "Failed to persist sweep checkpoint");
        }
    }
}
