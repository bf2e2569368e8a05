//! Poll engine.
//!
//! Each station is either idle (no hooks, no poll task) or active (at least
//! one hook, exactly one poll task). Registering the first hook starts the
//! task; removing the last hook, by unregistration or by the hook finishing,
//! aborts it. All of a station's state lives behind that station's own
//! lock, so stations never contend with each other.

use chargewatch_client::{ClientError, RateLimitedSession};
use chargewatch_protocol::{Coordinates, StationId, StationState, StationSummary};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatch;
use crate::hook::{same_hook, Hook};
use crate::record::StationRecord;
use crate::registry::{StationKey, StationRegistry};
use crate::sink::EventSink;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Station name not in the registry.
    #[error("Station not found: {0}")]
    UnknownStation(String),

    /// Upstream call failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between polls of one station.
    pub poll_interval: Duration,
    /// Age up to which a cached state is replayed to new hooks.
    pub expire_time: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            expire_time: Duration::from_secs(30),
        }
    }
}

/// A running poll task.
#[derive(Debug)]
struct Poller {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Mutable state of one station, guarded by the station's lock.
#[derive(Default)]
pub(crate) struct SlotState {
    pub(crate) hooks: Vec<Arc<dyn Hook>>,
    pub(crate) record: Option<StationRecord>,
    poller: Option<Poller>,
    generation: u64,
}

impl SlotState {
    pub(crate) fn contains(&self, hook: &Arc<dyn Hook>) -> bool {
        self.hooks.iter().any(|h| same_hook(h, hook))
    }

    pub(crate) fn remove(&mut self, hook: &Arc<dyn Hook>) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|h| !same_hook(h, hook));
        self.hooks.len() != before
    }

    /// Abort the poll task, if any. Returns `true` if one was running.
    pub(crate) fn stop_poller(&mut self) -> bool {
        match self.poller.take() {
            Some(poller) => {
                poller.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the poll task handle if it still belongs to `generation`.
    fn release_poller(&mut self, generation: u64) {
        if self.poller.as_ref().map(|p| p.generation) == Some(generation) {
            self.poller = None;
        }
    }
}

/// One monitored station.
pub(crate) struct StationSlot {
    pub(crate) key: StationKey,
    pub(crate) id: StationId,
    pub(crate) state: Mutex<SlotState>,
}

impl StationSlot {
    fn new(key: impl Into<StationKey>, id: StationId) -> Self {
        Self {
            key: key.into(),
            id,
            state: Mutex::new(SlotState::default()),
        }
    }
}

/// Everything a poll task needs, detached from the engine.
#[derive(Clone)]
struct PollContext {
    slot: Arc<StationSlot>,
    session: Arc<RateLimitedSession>,
    sink: Option<Arc<dyn EventSink>>,
    interval: Duration,
}

/// The polling and notification engine.
pub struct PollEngine {
    registry: Arc<StationRegistry>,
    session: Arc<RateLimitedSession>,
    slots: DashMap<StationKey, Arc<StationSlot>>,
    config: EngineConfig,
    sink: Option<Arc<dyn EventSink>>,
}

impl PollEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        registry: Arc<StationRegistry>,
        session: Arc<RateLimitedSession>,
        config: EngineConfig,
    ) -> Self {
        info!(stations = registry.len(), "Creating poll engine with config: {:?}", config);
        Self {
            registry,
            session,
            slots: DashMap::new(),
            config,
            sink: None,
        }
    }

    /// Attach an error/warning sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Get the station registry.
    #[must_use]
    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    /// Get the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// All known station names, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.registry.keys().map(str::to_string).collect()
    }

    /// Register a hook for a station.
    ///
    /// Registering the same hook twice is a no-op. A newly added hook is
    /// immediately called with the cached state when that state is still
    /// fresh, and the station's poll task is started if it is not running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownStation`] if the station is not in the
    /// registry.
    pub async fn register_hook(&self, key: &str, hook: Arc<dyn Hook>) -> Result<(), EngineError> {
        let slot = self.slot(key)?;
        let mut state = slot.state.lock().await;

        if state.contains(&hook) {
            debug!(station = %key, "Hook already registered");
        } else {
            state.hooks.push(hook.clone());
            debug!(station = %key, hooks = state.hooks.len(), "Hook registered");

            let cached = state
                .record
                .as_ref()
                .filter(|r| r.is_fresh(self.config.expire_time))
                .map(|r| r.data().clone());
            if let Some(current) = cached {
                debug!(station = %key, "Replaying cached state to new hook");
                Dispatch {
                    slot: slot.clone(),
                    hook,
                    current,
                    previous: None,
                    sink: self.sink.clone(),
                }
                .spawn();
            }
        }

        if state.poller.is_none() {
            state.generation += 1;
            let generation = state.generation;
            let ctx = PollContext {
                slot: slot.clone(),
                session: self.session.clone(),
                sink: self.sink.clone(),
                interval: self.config.poll_interval,
            };
            let handle = tokio::spawn(run_poller(ctx, generation));
            state.poller = Some(Poller { generation, handle });
            debug!(station = %key, generation, "Poller started");
        }

        Ok(())
    }

    /// Unregister a hook. Removing a hook that is not registered is a no-op.
    ///
    /// Returns `true` if the hook was removed. Removing the last hook stops
    /// the station's poll task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownStation`] if the station is not in the
    /// registry.
    pub async fn unregister_hook(
        &self,
        key: &str,
        hook: &Arc<dyn Hook>,
    ) -> Result<bool, EngineError> {
        let slot = self.slot(key)?;
        let mut state = slot.state.lock().await;

        let removed = state.remove(hook);
        if removed {
            debug!(station = %key, hooks = state.hooks.len(), "Hook unregistered");
            if state.hooks.is_empty() && state.stop_poller() {
                debug!(station = %key, "Poller stopped");
            }
        }
        Ok(removed)
    }

    /// Get a station's state: the cached one while fresh, otherwise a new
    /// fetch. A fetched state is returned but not cached.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown stations or a failed fetch.
    pub async fn get_cached_state(&self, key: &str) -> Result<Arc<StationState>, EngineError> {
        let slot = self.slot(key)?;
        {
            let state = slot.state.lock().await;
            if let Some(record) = state
                .record
                .as_ref()
                .filter(|r| r.is_fresh(self.config.expire_time))
            {
                return Ok(record.data().clone());
            }
        }

        debug!(station = %key, "Cached state missing or stale, fetching");
        let data = self.session.fetch_station_state(slot.id).await?;
        Ok(Arc::new(data))
    }

    /// Fetch the whole station directory and warn about registered
    /// stations missing from it.
    ///
    /// # Errors
    ///
    /// Returns the upstream error.
    pub async fn refresh_directory(
        &self,
        position: Coordinates,
    ) -> Result<HashMap<StationId, StationSummary>, EngineError> {
        let all = self.session.fetch_all_states(position).await?;
        for (key, id) in self.registry.iter() {
            if !all.contains_key(&id) {
                let message = format!("Station '{}' (id {}) not found in refreshed data", key, id);
                warn!(station = %key, station_id = id, "Station missing from refresh");
                if let Some(sink) = &self.sink {
                    sink.on_warning(&message);
                }
            }
        }
        Ok(all)
    }

    /// Number of hooks registered for a station.
    pub async fn hook_count(&self, key: &str) -> usize {
        match self.existing_slot(key) {
            Some(slot) => slot.state.lock().await.hooks.len(),
            None => 0,
        }
    }

    /// Whether a station's poll task is running.
    pub async fn is_polling(&self, key: &str) -> bool {
        match self.existing_slot(key) {
            Some(slot) => slot.state.lock().await.poller.is_some(),
            None => false,
        }
    }

    /// Drop every hook and stop every poll task.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<StationSlot>> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut stopped = 0;
        for slot in slots {
            let mut state = slot.state.lock().await;
            state.hooks.clear();
            if state.stop_poller() {
                stopped += 1;
            }
        }
        info!(stopped, "Poll engine shut down");
    }

    /// Get or create the slot of a registered station.
    fn slot(&self, key: &str) -> Result<Arc<StationSlot>, EngineError> {
        let id = self
            .registry
            .id(key)
            .ok_or_else(|| EngineError::UnknownStation(key.to_string()))?;
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(StationSlot::new(key, id)))
            .clone();
        Ok(slot)
    }

    fn existing_slot(&self, key: &str) -> Option<Arc<StationSlot>> {
        self.slots.get(key).map(|e| e.value().clone())
    }
}

/// Poll loop of one station.
///
/// Exits on its own when it finds no hooks at the top of an iteration; is
/// otherwise aborted by whoever removes the last hook.
async fn run_poller(ctx: PollContext, generation: u64) {
    let key = ctx.slot.key.clone();
    loop {
        {
            let mut state = ctx.slot.state.lock().await;
            if state.hooks.is_empty() {
                state.release_poller(generation);
                debug!(station = %key, generation, "No hooks left, poller exiting");
                return;
            }
        }

        match ctx.session.fetch_station_state(ctx.slot.id).await {
            Ok(data) => {
                let current = Arc::new(data);
                let (previous, hooks) = {
                    let mut state = ctx.slot.state.lock().await;
                    if state.hooks.is_empty() {
                        continue;
                    }
                    let previous = state
                        .record
                        .replace(StationRecord::new(current.clone()))
                        .map(|r| r.data().clone());
                    (previous, state.hooks.clone())
                };

                debug!(
                    station = %key,
                    free = current.free_count(),
                    hooks = hooks.len(),
                    "Station polled"
                );
                for hook in hooks {
                    Dispatch {
                        slot: ctx.slot.clone(),
                        hook,
                        current: current.clone(),
                        previous: previous.clone(),
                        sink: ctx.sink.clone(),
                    }
                    .spawn();
                }
            }
            Err(e) => {
                let message = if e.is_transient() {
                    warn!(station = %key, error = %e, "Poll failed");
                    format!("Error refreshing station '{}': {}", key, e)
                } else {
                    error!(station = %key, error = %e, "Poll failed, upstream login rejected");
                    format!("Login failed while refreshing station '{}': {}", key, e)
                };
                if let Some(sink) = &ctx.sink {
                    sink.on_error(&e, &message);
                }
            }
        }

        tokio::time::sleep(ctx.interval).await;
    }
}
