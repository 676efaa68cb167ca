//! The drosse registry: canonical in-memory view of every known drosse.
//!
//! Every mutation ends with a full-registry save through the command
//! gateway. Event handlers never fail: they keep the model as correct as
//! they can and log what they had to absorb. Operations triggered by the
//! presentation layer surface gateway failures instead.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use serde_json::Value;
use shared::{
    domain::{Drosse, DrosseId, DrosseMap, RouteTable},
    protocol::{BusMessage, DrosseEvent, TrafficRequest},
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch, Mutex, OnceCell},
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    bus::NotificationBus,
    config_fetch::{ConfigFetchError, ConfigFetcher, DEFAULT_FETCH_TIMEOUT},
    events::{EventSource, EventSourceError},
    gateway::{CommandGateway, GatewayError},
    routes,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("drosse {0} is not registered")]
    NotFound(DrosseId),
    #[error("route '{route}' is not known for drosse {uuid}")]
    RouteNotFound { uuid: DrosseId, route: String },
    #[error("failed to hydrate drosse registry: {0}")]
    Hydration(#[source] GatewayError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Upper bound on the remote config fetch done for every `up` event.
    pub fetch_timeout: Duration,
    /// Save the registry after a `down` event as well.
    pub persist_on_down: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            persist_on_down: true,
        }
    }
}

pub struct DrosseRegistry {
    gateway: Arc<dyn CommandGateway>,
    fetcher: Arc<dyn ConfigFetcher>,
    bus: NotificationBus,
    options: RegistryOptions,
    drosses: Mutex<DrosseMap>,
    hydrated: OnceCell<()>,
    persist_lock: Mutex<()>,
    revision: watch::Sender<u64>,
}

impl DrosseRegistry {
    pub fn new(
        gateway: Arc<dyn CommandGateway>,
        fetcher: Arc<dyn ConfigFetcher>,
        bus: NotificationBus,
        options: RegistryOptions,
    ) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            gateway,
            fetcher,
            bus,
            options,
            drosses: Mutex::new(DrosseMap::new()),
            hydrated: OnceCell::new(),
            persist_lock: Mutex::new(()),
            revision,
        })
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Returns the registry, reading the persisted snapshot the first time.
    ///
    /// Concurrent first callers share a single read. A failed read is
    /// reported and retried on the next call.
    pub async fn load(&self) -> Result<DrosseMap, RegistryError> {
        self.hydrated.get_or_try_init(|| self.hydrate()).await?;
        Ok(self.snapshot().await)
    }

    async fn hydrate(&self) -> Result<(), RegistryError> {
        let Some(persisted) = self.gateway.list().await.map_err(RegistryError::Hydration)? else {
            info!("no persisted drosses; starting with an empty registry");
            return Ok(());
        };

        let mut drosses = self.drosses.lock().await;
        let mut selection_taken = drosses.values().any(|drosse| drosse.selected);
        let mut restored = 0usize;
        for (key, mut drosse) in persisted {
            if key != drosse.uuid {
                warn!(%key, uuid = %drosse.uuid, "persisted drosse stored under a foreign key; re-keying");
            }
            if drosses.contains_key(&drosse.uuid) {
                debug!(uuid = %drosse.uuid, "keeping live entry over persisted one");
                continue;
            }
            if drosse.selected {
                if selection_taken {
                    warn!(uuid = %drosse.uuid, "dropping duplicate persisted selection");
                    drosse.selected = false;
                } else {
                    selection_taken = true;
                }
            }
            drosses.insert(drosse.uuid.clone(), drosse);
            restored += 1;
        }
        drop(drosses);

        info!(restored, "drosse registry hydrated");
        self.bump_revision();
        Ok(())
    }

    pub async fn snapshot(&self) -> DrosseMap {
        self.drosses.lock().await.clone()
    }

    pub async fn get(&self, uuid: &DrosseId) -> Option<Drosse> {
        self.drosses.lock().await.get(uuid).cloned()
    }

    pub async fn selected(&self) -> Option<DrosseId> {
        self.drosses
            .lock()
            .await
            .values()
            .find(|drosse| drosse.selected)
            .map(|drosse| drosse.uuid.clone())
    }

    /// True when no drosse holds the focus.
    pub async fn is_home(&self) -> bool {
        !self
            .drosses
            .lock()
            .await
            .values()
            .any(|drosse| drosse.selected)
    }

    /// Revision counter bumped after every in-memory mutation.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn handle_event(&self, event: DrosseEvent) {
        match event {
            DrosseEvent::Up { drosse } => self.on_up(drosse).await,
            DrosseEvent::Down { uuid } => self.on_down(&uuid).await,
            DrosseEvent::Request { request } => self.on_traffic(request),
            DrosseEvent::Log { uuid, msg } => self.on_log(uuid, msg),
        }
    }

    /// A drosse reported it started: record it, then pull its route table.
    ///
    /// A drosse whose config cannot be fetched is not considered live and
    /// is marked down, its routes left as they were. The routes of a known
    /// entry are the local side of the merge, since they may be ahead of
    /// the stored snapshot the event was built from.
    pub async fn on_up(&self, mut drosse: Drosse) {
        let uuid = drosse.uuid.clone();
        {
            let mut drosses = self.drosses.lock().await;
            if let Some(previous) = drosses.get(&uuid) {
                drosse.open = previous.open;
                drosse.selected = previous.selected;
                if previous.routes.is_some() {
                    drosse.routes = previous.routes.clone();
                }
            } else if drosse.selected
                && drosses
                    .values()
                    .any(|other| other.selected && other.uuid != uuid)
            {
                drosse.selected = false;
            }
            drosses.insert(uuid.clone(), drosse.clone());
        }
        self.bump_revision();
        info!(%uuid, "drosse up");

        let fetched = if drosse.up {
            self.fetch_routes(&drosse).await
        } else {
            warn!(%uuid, "up event for a drosse reported as down; skipping config fetch");
            None
        };

        {
            let mut drosses = self.drosses.lock().await;
            if let Some(entry) = drosses.get_mut(&uuid) {
                match fetched {
                    Some(remote) => {
                        let local = entry.routes.take().unwrap_or_default();
                        entry.routes = Some(routes::merge(&remote, &local));
                    }
                    None => entry.up = false,
                }
            }
        }
        self.bump_revision();

        self.persist_quietly("up").await;
    }

    async fn fetch_routes(&self, drosse: &Drosse) -> Option<RouteTable> {
        let outcome = match timeout(
            self.options.fetch_timeout,
            self.fetcher.fetch_routes(drosse),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ConfigFetchError::Timeout),
        };

        match outcome {
            Ok(routes) => {
                debug!(uuid = %drosse.uuid, routes = routes.len(), "fetched drosse config");
                Some(routes)
            }
            Err(err) => {
                warn!(
                    uuid = %drosse.uuid,
                    kind = err.kind(),
                    error = %err,
                    "drosse config unavailable; marking drosse down"
                );
                None
            }
        }
    }

    pub async fn on_down(&self, uuid: &DrosseId) {
        let known = match self.drosses.lock().await.get_mut(uuid) {
            Some(entry) => {
                entry.up = false;
                true
            }
            None => false,
        };
        if !known {
            warn!(%uuid, "down event for an unknown drosse");
            return;
        }
        self.bump_revision();
        info!(%uuid, "drosse down");

        if self.options.persist_on_down {
            self.persist_quietly("down").await;
        } else {
            debug!(%uuid, "down state kept in memory only");
        }
    }

    pub fn on_traffic(&self, request: TrafficRequest) {
        self.bus.publish(BusMessage::Request {
            uuid: request.uuid,
            method: request.method,
            url: request.url,
        });
    }

    pub fn on_log(&self, uuid: DrosseId, msg: Value) {
        self.bus.publish(BusMessage::Log { uuid, msg });
    }

    /// Focuses `uuid`: it becomes the only selected drosse and is opened.
    pub async fn open(&self, uuid: &DrosseId) -> Result<(), RegistryError> {
        {
            let mut drosses = self.drosses.lock().await;
            if !drosses.contains_key(uuid) {
                return Err(RegistryError::NotFound(uuid.clone()));
            }
            for drosse in drosses.values_mut() {
                drosse.selected = false;
            }
            if let Some(target) = drosses.get_mut(uuid) {
                target.open = true;
                target.selected = true;
            }
        }
        self.bump_revision();
        self.persist().await
    }

    pub async fn close(&self, uuid: &DrosseId) -> Result<(), RegistryError> {
        {
            let mut drosses = self.drosses.lock().await;
            let target = drosses
                .get_mut(uuid)
                .ok_or_else(|| RegistryError::NotFound(uuid.clone()))?;
            target.open = false;
            target.selected = false;
        }
        self.bump_revision();
        self.persist().await
    }

    /// Clears the focus; no drosse is selected afterwards.
    pub async fn open_home(&self) -> Result<(), RegistryError> {
        {
            let mut drosses = self.drosses.lock().await;
            for drosse in drosses.values_mut() {
                drosse.selected = false;
            }
        }
        self.bump_revision();
        self.persist().await
    }

    /// Sets a front-end-only field on a route; it survives later config
    /// refreshes as long as the drosse keeps reporting the route.
    pub async fn annotate_route(
        &self,
        uuid: &DrosseId,
        route: &str,
        field: &str,
        value: Value,
    ) -> Result<(), RegistryError> {
        {
            let mut drosses = self.drosses.lock().await;
            let drosse = drosses
                .get_mut(uuid)
                .ok_or_else(|| RegistryError::NotFound(uuid.clone()))?;
            let entry = drosse
                .routes
                .as_mut()
                .and_then(|routes| routes.get_mut(route))
                .ok_or_else(|| RegistryError::RouteNotFound {
                    uuid: uuid.clone(),
                    route: route.to_string(),
                })?;
            entry.0.insert(field.to_string(), value);
        }
        self.bump_revision();
        self.persist().await
    }

    async fn persist(&self) -> Result<(), RegistryError> {
        // saves go out one at a time, each carrying the latest snapshot
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot().await;
        self.gateway.save(&snapshot).await?;
        debug!(drosses = snapshot.len(), "drosse registry persisted");
        Ok(())
    }

    async fn persist_quietly(&self, trigger: &'static str) {
        if let Err(err) = self.persist().await {
            error!(trigger, error = %err, "failed to persist drosse registry");
        }
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Subscribes to `source` and applies its events until the stream ends
    /// or the returned subscription is stopped.
    ///
    /// Lifecycle events of one drosse are applied strictly in delivery
    /// order, so a `down` can never interleave with an in-flight `up` for
    /// the same uuid. Distinct drosses progress independently.
    pub async fn start(
        self: &Arc<Self>,
        source: &dyn EventSource,
    ) -> Result<Subscription, EventSourceError> {
        let mut stream = source.subscribe().await?;
        let registry = Arc::clone(self);

        let (done, finished) = watch::channel(());

        let task = tokio::spawn(async move {
            let _done = done;
            let mut lanes = EventLanes::new(registry.clone());

            loop {
                tokio::select! {
                    event = stream.next() => match event {
                        Some(DrosseEvent::Request { request }) => registry.on_traffic(request),
                        Some(DrosseEvent::Log { uuid, msg }) => registry.on_log(uuid, msg),
                        Some(lifecycle) => lanes.dispatch(lifecycle),
                        None => break,
                    },
                    Some(joined) = lanes.workers.join_next(), if !lanes.workers.is_empty() => {
                        if let Err(err) = joined {
                            error!(error = %err, "drosse event lane failed");
                        }
                    }
                }
            }

            lanes.drain().await;
            debug!("drosse event stream ended");
        });

        Ok(Subscription { task, finished })
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<DrosseEvent>,
    pending: Arc<AtomicUsize>,
}

/// One worker per drosse with queued lifecycle events. A lane whose queue
/// ran empty is dropped on the next dispatch and its worker exits.
struct EventLanes {
    registry: Arc<DrosseRegistry>,
    lanes: HashMap<DrosseId, Lane>,
    workers: JoinSet<()>,
}

impl EventLanes {
    fn new(registry: Arc<DrosseRegistry>) -> Self {
        Self {
            registry,
            lanes: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    fn dispatch(&mut self, event: DrosseEvent) {
        self.reap_idle();
        let uuid = event.uuid().clone();
        let lane = match self.lanes.entry(uuid.clone()) {
            Entry::Occupied(lane) => lane.into_mut(),
            Entry::Vacant(slot) => slot.insert(spawn_lane(&self.registry, &mut self.workers)),
        };
        lane.pending.fetch_add(1, Ordering::SeqCst);
        if lane.tx.send(event).is_err() {
            error!(%uuid, "drosse event lane closed; event dropped");
            self.lanes.remove(&uuid);
            return;
        }
        debug!(%uuid, lanes = self.active(), "drosse lifecycle event queued");
    }

    fn reap_idle(&mut self) {
        self.lanes
            .retain(|_, lane| lane.pending.load(Ordering::SeqCst) > 0);
    }

    fn active(&self) -> usize {
        self.lanes.len()
    }

    async fn drain(mut self) {
        self.lanes.clear();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "drosse event lane failed");
            }
        }
    }
}

fn spawn_lane(registry: &Arc<DrosseRegistry>, workers: &mut JoinSet<()>) -> Lane {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let registry = Arc::clone(registry);
    let remaining = Arc::clone(&pending);
    workers.spawn(async move {
        while let Some(event) = rx.recv().await {
            registry.handle_event(event).await;
            remaining.fetch_sub(1, Ordering::SeqCst);
        }
    });
    Lane { tx, pending }
}

/// Handle on a running event subscription.
pub struct Subscription {
    task: JoinHandle<()>,
    finished: watch::Receiver<()>,
}

impl Subscription {
    /// Stops applying events; work already in flight is abandoned.
    pub fn stop(self) {
        self.task.abort();
    }

    /// Waits until the event stream ends and every queued event was applied.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                error!(error = %err, "drosse event pump failed");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the event pump has ended, for whatever reason.
    /// Can be awaited repeatedly, e.g. as a `select!` branch.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        while finished.changed().await.is_ok() {}
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
