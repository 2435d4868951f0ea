//! # Fleet Service
//!
//! Wires the store, the single-writer ingestor, the bus, the router and the
//! scheduler into one running process.

use crate::bus::Bus;
use crate::client::BusClient;
use crate::config::{Config, StoreKind};
use crate::effects::{BusActionExecutor, LogMessageService, LogSinkFactory};
use crate::error::AppError;
use crate::metrics::HandlerMetrics;
use crate::router::MessageRouter;
use crate::scheduler::Scheduler;
use fleetgraph_core::{
    GraphCounts, GraphError, GraphRead, GraphStore, NodeId, PointIngestor, RuleEngine, UpstreamPropagator,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct FleetService {
    ingestor: Arc<PointIngestor>,
    bus: Bus,
    client: BusClient,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for FleetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetService")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Open the store named by `config`.
pub fn open_store(config: &Config) -> Result<GraphStore, AppError> {
    let store = match config.store.kind {
        StoreKind::Memory => GraphStore::in_memory()?,
        StoreKind::Redb => GraphStore::open(&config.store.path)?,
    };
    Ok(store)
}

impl FleetService {
    /// Start the router and, if `scheduler_interval` is set, the scheduler.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        store: GraphStore,
        bus: Bus,
        scheduler_interval: Option<Duration>,
        metrics_period: Duration,
    ) -> Result<Self, AppError> {
        let ingestor = Arc::new(PointIngestor::new(Arc::new(store)));
        let rules = RuleEngine::new(Arc::new(BusActionExecutor::new(bus.clone())));
        let propagator = Arc::new(UpstreamPropagator::new(rules, Arc::new(LogSinkFactory)));

        let router = Arc::new(MessageRouter::new(
            bus.clone(),
            Arc::clone(&ingestor),
            Arc::clone(&propagator),
            Arc::new(LogMessageService),
            HandlerMetrics::new(metrics_period),
        ));
        let mut tasks = router.start()?;

        if let Some(interval) = scheduler_interval {
            tasks.push(Scheduler::new(Arc::clone(&ingestor), propagator, interval).start());
            tracing::info!(interval_ms = interval.as_millis() as u64, "scheduler started");
        }

        Ok(Self {
            ingestor,
            client: BusClient::new(bus.clone()),
            bus,
            tasks: Mutex::new(tasks),
        })
    }

    /// Build from a loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let store = open_store(config)?;
        Self::start(
            store,
            Bus::new(config.bus.capacity),
            Some(config.scheduler_interval()),
            config.metrics_period(),
        )
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn client(&self) -> &BusClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        self.ingestor.store()
    }

    /// Node and edge totals with the current root.
    pub async fn status(&self) -> Result<(GraphCounts, Option<NodeId>), AppError> {
        self.blocking(|ingestor| {
            let store = ingestor.store();
            Ok((store.counts()?, store.root_id()?))
        })
        .await
    }

    /// Move the `(old_parent, id)` edge under `new_parent`.
    pub async fn move_edge(&self, id: NodeId, old_parent: NodeId, new_parent: NodeId) -> Result<(), AppError> {
        self.blocking(move |ingestor| {
            let guard = ingestor.lock()?;
            let store = ingestor.store();
            let read = store.read()?;
            let id = read.resolve(&id)?;
            let old_parent = read.resolve(&old_parent)?;
            let new_parent = read.resolve(&new_parent)?;
            drop(read);
            store.move_edge(&guard, &id, &old_parent, &new_parent)?;
            tracing::info!(node_id = %id, from = %old_parent, to = %new_parent, "edge moved");
            Ok(())
        })
        .await
    }

    /// Link `id` under an additional parent.
    pub async fn copy_edge(&self, id: NodeId, new_parent: NodeId) -> Result<(), AppError> {
        self.blocking(move |ingestor| {
            let guard = ingestor.lock()?;
            let store = ingestor.store();
            let read = store.read()?;
            let id = read.resolve(&id)?;
            let new_parent = read.resolve(&new_parent)?;
            drop(read);
            store.copy_edge(&guard, &id, &new_parent)?;
            tracing::info!(node_id = %id, to = %new_parent, "edge copied");
            Ok(())
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&PointIngestor) -> Result<T, GraphError> + Send + 'static,
    {
        let ingestor = Arc::clone(&self.ingestor);
        Ok(tokio::task::spawn_blocking(move || f(&ingestor)).await??)
    }

    /// Stop the router and scheduler tasks.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("fleet service stopped");
    }
}

impl Drop for FleetService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
