pub mod config;
pub mod engine;
pub mod error;
pub mod governance;
pub mod util;

use futures::FutureExt;

use crate::config::SimConfig;
use crate::engine::registry::Registry;
use crate::engine::runner::Runner;
use crate::engine::topology::Scenario;
use crate::error::Result;
use crate::util::Shutdown;

pub use crate::engine::metrics::Snapshot;
pub use crate::engine::Engine;

#[macro_use]
extern crate serde_derive;

/// Simulates the cluster described by `scenario` under the given component id until shutdown
/// or, if set, until `ticks` ticks have run. Returns the final snapshot.
pub async fn brokersim(
    config: SimConfig,
    component: &str,
    scenario: Scenario,
    ticks: Option<u64>,
    shutdown: Shutdown,
) -> Result<std::sync::Arc<Snapshot>> {
    let registry = Registry::new();
    let handle = registry.create(component, config.engine.clone())?;
    handle.initialize(scenario.topology)?;

    let mut runner = Runner::new(handle.clone(), config.engine.tick_interval()).with_events(scenario.events);
    if let Some(ticks) = ticks {
        runner = runner.with_limit(ticks);
    }
    let (task, ran) = runner.run(shutdown).remote_handle();
    tokio::spawn(task);
    let ticks = ran.await?;

    let snapshot = handle.snapshot();
    tracing::info!(component, ticks, topics = snapshot.topics.len(), groups = snapshot.groups.len(), "simulation finished");
    registry.dispose(component);
    Ok(snapshot)
}
