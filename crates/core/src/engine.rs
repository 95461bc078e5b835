//! The recovery engine: one failure handler, one success handler, and the
//! retry tasks they spawn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::sync::Mutex;

use crate::classifier::{ErrorCategory, FailureObservation, classify, is_silent};
use crate::config::RecoveryConfig;
use crate::health::{HealthReporter, ServiceHealth};
use crate::locator::TileLocator;
use crate::models::{ResourceClass, ResourceDescriptor};
use crate::monitoring;
use crate::notify::{Notification, NotificationGate, NotificationSink, NotificationState, TracingSink};
use crate::scheduler::RecoveryScheduler;
use crate::state::ResourceState;
use crate::strategy::StrategyLadder;
use crate::transport::{HttpTransport, TilePayload, TileTransport};

/// A tile delivered by a successful retry
#[derive(Debug, Clone)]
pub struct RecoveredTile {
    pub resource_id: String,
    pub attempt: u32,
    pub payload: TilePayload,
}

pub type RecoveredCallback = Arc<dyn Fn(RecoveredTile) + Send + Sync>;

/// Turns a resource into the request to retry
pub trait LocatorSource: Send + Sync {
    fn locator_for(&self, resource: &ResourceDescriptor) -> Option<TileLocator>;
}

impl<F> LocatorSource for F
where
    F: Fn(&ResourceDescriptor) -> Option<TileLocator> + Send + Sync,
{
    fn locator_for(&self, resource: &ResourceDescriptor) -> Option<TileLocator> {
        self(resource)
    }
}

/// Locators registered up front, keyed by resource id
#[derive(Debug, Default)]
pub struct StaticLocators {
    locators: RwLock<HashMap<String, TileLocator>>,
}

impl StaticLocators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_id: &str, locator: TileLocator) {
        if let Ok(mut map) = self.locators.write() {
            map.insert(resource_id.to_string(), locator);
        }
    }

    pub fn remove(&self, resource_id: &str) {
        if let Ok(mut map) = self.locators.write() {
            map.remove(resource_id);
        }
    }
}

impl LocatorSource for StaticLocators {
    fn locator_for(&self, resource: &ResourceDescriptor) -> Option<TileLocator> {
        self.locators.read().ok()?.get(&resource.id).cloned()
    }
}

struct TrackedResource {
    state: ResourceState,
    notifications: NotificationState,
    /// A retry is scheduled or running
    in_flight: bool,
    /// Replaced on success and (re)registration; stale retries compare against it.
    /// Drawn from an engine-wide counter so a rebuilt entry never reuses one.
    episode: u64,
}

impl TrackedResource {
    fn new(descriptor: &ResourceDescriptor, episode: u64) -> Self {
        Self {
            state: ResourceState::new(descriptor),
            notifications: NotificationState::default(),
            in_flight: false,
            episode,
        }
    }
}

/// Everything a retry task needs, captured under the lock
struct RetryJob {
    resource_id: String,
    locator: TileLocator,
    attempt: u32,
    category: ErrorCategory,
    episode: u64,
}

pub struct RecoveryEngineBuilder {
    config: RecoveryConfig,
    transport: Option<Arc<dyn TileTransport>>,
    sink: Arc<dyn NotificationSink>,
    locators: Arc<dyn LocatorSource>,
    on_recovered: Option<RecoveredCallback>,
}

impl RecoveryEngineBuilder {
    pub fn config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn TileTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn locators(mut self, locators: Arc<dyn LocatorSource>) -> Self {
        self.locators = locators;
        self
    }

    pub fn on_recovered<F>(mut self, callback: F) -> Self
    where
        F: Fn(RecoveredTile) + Send + Sync + 'static,
    {
        self.on_recovered = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> anyhow::Result<RecoveryEngine> {
        self.config.validate()?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()) as Arc<dyn TileTransport>);

        Ok(RecoveryEngine {
            inner: Arc::new(EngineInner {
                scheduler: RecoveryScheduler::from_config(&self.config),
                ladder: StrategyLadder::new(transport, &self.config),
                gate: NotificationGate::from_config(&self.config),
                health: HealthReporter::new(
                    self.config.max_retries,
                    self.config.problematic_threshold,
                ),
                config: self.config,
                sink: self.sink,
                locators: self.locators,
                on_recovered: self.on_recovered,
                resources: Mutex::new(HashMap::new()),
                episodes: AtomicU64::new(0),
            }),
        })
    }
}

struct EngineInner {
    config: RecoveryConfig,
    scheduler: RecoveryScheduler,
    ladder: StrategyLadder,
    gate: NotificationGate,
    health: HealthReporter,
    sink: Arc<dyn NotificationSink>,
    locators: Arc<dyn LocatorSource>,
    on_recovered: Option<RecoveredCallback>,
    resources: Mutex<HashMap<String, TrackedResource>>,
    episodes: AtomicU64,
}

/// Tracks failing tiles and recovers them in the background.
///
/// Cloning is cheap and every clone shares the same resource table.
#[derive(Clone)]
pub struct RecoveryEngine {
    inner: Arc<EngineInner>,
}

impl RecoveryEngine {
    pub fn builder() -> RecoveryEngineBuilder {
        RecoveryEngineBuilder {
            config: RecoveryConfig::default(),
            transport: None,
            sink: Arc::new(TracingSink),
            locators: Arc::new(StaticLocators::new()),
            on_recovered: None,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// Register a resource before its first fetch. Registering a known id
    /// only refreshes its metadata; counters and exhaustion are kept.
    pub async fn initialize_resource(&self, id: &str, name: &str, class: ResourceClass) {
        let descriptor = ResourceDescriptor::new(id, name, class);
        let mut resources = self.inner.resources.lock().await;
        match resources.get_mut(id) {
            None => {
                let episode = self.inner.next_episode();
                resources.insert(id.to_string(), TrackedResource::new(&descriptor, episode));
                tracing::debug!(resource = %id, class = %class, "resource registered");
            }
            Some(tracked) => {
                tracked.state.resource_name = descriptor.name;
                tracked.state.resource_class = descriptor.class;
            }
        }
    }

    /// Clear a resource's history, including exhaustion. Returns false for
    /// unknown ids.
    pub async fn reinitialize_resource(&self, id: &str) -> bool {
        let mut resources = self.inner.resources.lock().await;
        match resources.get_mut(id) {
            Some(tracked) => {
                let descriptor = tracked.state.descriptor();
                *tracked = TrackedResource::new(&descriptor, self.inner.next_episode());
                tracing::debug!(resource = %id, "resource reinitialized");
                true
            }
            None => false,
        }
    }

    /// Stop tracking a resource; pending retries for it are discarded
    pub async fn remove_resource(&self, id: &str) -> Option<ResourceState> {
        self.inner
            .resources
            .lock()
            .await
            .remove(id)
            .map(|tracked| tracked.state)
    }

    /// Failure entry point
    pub async fn report_failure(&self, id: &str, observation: FailureObservation) {
        EngineInner::handle_failure(&self.inner, id, observation, None).await;
    }

    /// Success entry point
    pub async fn report_success(&self, id: &str) {
        self.inner.handle_success(id, None).await;
    }

    pub async fn resource_state(&self, id: &str) -> Option<ResourceState> {
        self.inner
            .resources
            .lock()
            .await
            .get(id)
            .map(|tracked| tracked.state.clone())
    }

    pub async fn notification_state(&self, id: &str) -> Option<NotificationState> {
        self.inner
            .resources
            .lock()
            .await
            .get(id)
            .map(|tracked| tracked.notifications)
    }

    pub async fn service_health(&self) -> ServiceHealth {
        let resources = self.inner.resources.lock().await;
        let health = self
            .inner
            .health
            .snapshot(resources.values().map(|tracked| &tracked.state));
        monitoring::record_health(&health);
        health
    }

    pub(crate) fn locator_for(&self, descriptor: &ResourceDescriptor) -> Option<TileLocator> {
        self.inner.locators.locator_for(descriptor)
    }

    pub(crate) async fn fetch_original(
        &self,
        locator: &TileLocator,
    ) -> Result<TilePayload, FailureObservation> {
        self.inner.ladder.fetch_original(locator).await
    }
}

impl EngineInner {
    fn next_episode(&self) -> u64 {
        self.episodes.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, notification: Option<Notification>) {
        if let Some(n) = notification {
            tracing::debug!(resource = %n.resource_id, severity = ?n.severity, "notification");
            self.sink.notify(n.severity, &n.message, n.duration);
        }
    }

    /// The single failure handler. `retry_episode` is set when the failure
    /// comes from one of our own retry tasks.
    async fn handle_failure(
        this: &Arc<Self>,
        id: &str,
        observation: FailureObservation,
        retry_episode: Option<u64>,
    ) {
        let mut notes = Vec::new();
        let job = {
            let mut resources = this.resources.lock().await;
            let tracked = match retry_episode {
                Some(episode) => match resources.get_mut(id) {
                    Some(tracked) if tracked.episode == episode => {
                        tracked.in_flight = false;
                        tracked
                    }
                    _ => {
                        tracing::debug!(resource = %id, "discarding stale retry failure");
                        return;
                    }
                },
                None => resources.entry(id.to_string()).or_insert_with(|| {
                    let descriptor = ResourceDescriptor::new(id, id, ResourceClass::default());
                    TrackedResource::new(&descriptor, this.next_episode())
                }),
            };

            if tracked.state.is_exhausted() {
                tracing::debug!(resource = %id, "resource exhausted, failure ignored");
                return;
            }

            let category = classify(tracked.state.resource_class, &observation);
            tracked.state.record_failure(category, SystemTime::now());
            monitoring::record_failure(category);

            if is_silent(category) {
                tracing::debug!(
                    resource = %id,
                    category = %category,
                    consecutive = tracked.state.consecutive_errors,
                    "expected tile failure"
                );
                return;
            }

            notes.push(
                this.gate
                    .on_failure(&mut tracked.notifications, &tracked.state, category),
            );

            if tracked.in_flight {
                // Retries for one resource are strictly sequential
                None
            } else {
                let descriptor = tracked.state.descriptor();
                match this.locators.locator_for(&descriptor) {
                    None => {
                        tracing::warn!(resource = %id, "no locator for resource, cannot retry");
                        None
                    }
                    Some(locator) => match tracked.state.advance_recovery(this.config.max_retries)
                    {
                        Some(attempt) => {
                            tracked.in_flight = true;
                            tracing::debug!(
                                resource = %id,
                                category = %category,
                                attempt,
                                consecutive = tracked.state.consecutive_errors,
                                "scheduling tile recovery"
                            );
                            Some(RetryJob {
                                resource_id: id.to_string(),
                                locator,
                                attempt,
                                category,
                                episode: tracked.episode,
                            })
                        }
                        None => {
                            tracing::warn!(
                                resource = %id,
                                category = %category,
                                total_errors = tracked.state.total_errors,
                                "tile recovery exhausted"
                            );
                            monitoring::record_exhausted();
                            notes.push(
                                this.gate
                                    .on_exhausted(&mut tracked.notifications, &tracked.state),
                            );
                            None
                        }
                    },
                }
            }
        };

        for note in notes {
            this.emit(note);
        }
        if let Some(job) = job {
            Self::schedule(this, job);
        }
    }

    /// The single success handler. `retry_episode` is set when the success
    /// comes from one of our own retry tasks.
    async fn handle_success(&self, id: &str, retry_episode: Option<u64>) -> bool {
        let note = {
            let mut resources = self.resources.lock().await;
            let Some(tracked) = resources.get_mut(id) else {
                tracing::debug!(resource = %id, "success for untracked resource");
                return false;
            };
            if retry_episode.is_some_and(|episode| episode != tracked.episode) {
                tracing::debug!(resource = %id, "discarding stale retry result");
                return false;
            }
            if tracked.state.is_exhausted() {
                tracing::debug!(resource = %id, "success ignored for exhausted resource");
                return false;
            }

            let was_failing = tracked.state.consecutive_errors > 0;
            tracked.state.record_success();
            tracked.in_flight = false;
            // Cancels any retry still sleeping or running
            tracked.episode = self.next_episode();
            if was_failing {
                tracing::info!(resource = %id, "tile recovered");
            }
            self.gate
                .on_recovered(&mut tracked.notifications, &tracked.state)
        };
        self.emit(note);
        true
    }

    async fn is_current(&self, id: &str, episode: u64) -> bool {
        self.resources
            .lock()
            .await
            .get(id)
            .is_some_and(|tracked| tracked.episode == episode)
    }

    fn schedule(this: &Arc<Self>, job: RetryJob) {
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            let delay = inner.scheduler.wait(job.category, job.attempt).await;
            if !inner.is_current(&job.resource_id, job.episode).await {
                tracing::debug!(resource = %job.resource_id, "retry cancelled");
                return;
            }

            monitoring::record_retry(job.category, job.attempt);
            tracing::debug!(
                resource = %job.resource_id,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                "running recovery attempt"
            );

            match inner
                .ladder
                .attempt(&job.locator, job.attempt, job.category)
                .await
            {
                Ok(payload) => {
                    if inner
                        .handle_success(&job.resource_id, Some(job.episode))
                        .await
                    {
                        monitoring::record_recovered();
                        if let Some(callback) = &inner.on_recovered {
                            callback(RecoveredTile {
                                resource_id: job.resource_id.clone(),
                                attempt: job.attempt,
                                payload,
                            });
                        }
                    }
                }
                Err(observation) => {
                    EngineInner::handle_failure(
                        &inner,
                        &job.resource_id,
                        observation,
                        Some(job.episode),
                    )
                    .await;
                }
            }
        });
    }
}
