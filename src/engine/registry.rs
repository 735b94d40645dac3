use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::engine::config::EngineConfig;
use crate::engine::fsm::Transition;
use crate::engine::metrics::Snapshot;
use crate::engine::topology::Topology;
use crate::engine::Engine;
use crate::error::{BrokerSimError, Result};

pub type ComponentId = String;

/// Shared access to one engine. Snapshot reads go through the watch channel and never wait on
/// the engine lock.
#[derive(Clone)]
pub struct EngineHandle {
    id: ComponentId,
    engine: Arc<Mutex<Engine>>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EngineHandle {{ id: {} }}", self.id)
    }
}

impl EngineHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    /// Waits for the next published snapshot.
    pub async fn changed(&mut self) -> Result<Arc<Snapshot>> {
        self.snapshots
            .changed()
            .await
            .map_err(|e| BrokerSimError::Internal {
                error_msg: e.to_string(),
            })?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        let mut engine = self.engine.lock()?;
        f(&mut engine)
    }

    pub fn initialize(&self, topology: Topology) -> Result<()> {
        self.with(|engine| engine.initialize(topology))
    }

    pub fn transition(&self, transition: Transition) -> Result<()> {
        self.with(|engine| engine.transition(transition))
    }

    pub fn tick(&self, dt: Duration) -> Result<()> {
        self.with(|engine| {
            engine.tick(dt);
            Ok(())
        })
    }
}

/// Engines keyed by the canvas component they simulate.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    components: Arc<Mutex<HashMap<ComponentId, EngineHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(skip(self, config))]
    pub fn create(&self, id: &str, config: EngineConfig) -> Result<EngineHandle> {
        if id.trim().is_empty() {
            return Err(BrokerSimError::validation("id", "component id cannot be empty"));
        }
        let mut components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
        if components.contains_key(id) {
            return Err(BrokerSimError::validation(
                "id",
                format!("component {} already has an engine", id),
            ));
        }

        let engine = Engine::new(config)?;
        let handle = EngineHandle {
            id: id.to_string(),
            snapshots: engine.subscribe(),
            engine: Arc::new(Mutex::new(engine)),
        };
        components.insert(id.to_string(), handle.clone());
        tracing::info!(component = id, "engine created");
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<EngineHandle> {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Drops the registry's reference to an engine. Outstanding handles keep working.
    pub fn dispose(&self, id: &str) -> bool {
        let removed = self
            .components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(component = id, "engine disposed");
        }
        removed
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self
            .components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
