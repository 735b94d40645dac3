use std::time::Duration;

use anyhow::Result;

use crate::engine::assignment::Strategy;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// The configuration for a simulated broker engine.
pub struct EngineConfig {
    /// Wall-clock period between ticks when driven by a runner.
    pub tick_interval_ms: u64,
    /// Producer rate (messages/sec) for topics that do not declare one.
    pub default_producer_rate: f64,
    /// Average message size for topics that do not declare one.
    pub default_message_bytes: u64,
    /// Per-member consumption rate (messages/sec) for groups that do not declare one.
    pub default_consumer_rate: f64,
    /// Per tick chance that an in-sync follower falls out of the ISR.
    pub replica_failure_probability: f64,
    /// Per tick chance that an out-of-sync replica on a live broker rejoins the ISR.
    pub replica_recovery_probability: f64,
    /// Seed for replica churn, so that runs are reproducible.
    pub seed: u64,
    /// Move leadership back to the preferred replica whenever it is in sync.
    pub auto_leader_rebalance: bool,
    /// Fraction of a closed segment that survives compaction.
    pub compaction_ratio: f64,
    /// Partition assignment strategy used by every consumer group.
    pub assignment_strategy: Strategy,
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validates the configuration, ensuring all values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("tick interval cannot be 0"));
        }
        if !(self.default_producer_rate.is_finite() && self.default_producer_rate >= 0.0) {
            return Err(anyhow::anyhow!("default producer rate must be non-negative"));
        }
        if !(self.default_consumer_rate.is_finite() && self.default_consumer_rate >= 0.0) {
            return Err(anyhow::anyhow!("default consumer rate must be non-negative"));
        }
        if self.default_message_bytes == 0 {
            return Err(anyhow::anyhow!("default message size cannot be 0"));
        }
        if !(0.0..=1.0).contains(&self.replica_failure_probability) {
            return Err(anyhow::anyhow!("replica failure probability must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.replica_recovery_probability) {
            return Err(anyhow::anyhow!("replica recovery probability must be within [0, 1]"));
        }
        if !(self.compaction_ratio > 0.0 && self.compaction_ratio <= 1.0) {
            return Err(anyhow::anyhow!("compaction ratio must be within (0, 1]"));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_interval_ms: 1000,
            default_producer_rate: 0.0,
            default_message_bytes: 1024,
            default_consumer_rate: 100.0,
            replica_failure_probability: 0.0,
            replica_recovery_probability: 0.0,
            seed: 0,
            auto_leader_rebalance: true,
            compaction_ratio: 0.5,
            assignment_strategy: Strategy::Range,
        }
    }
}
