use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use derive_more::Display;
use regex::Regex;
use uuid::Uuid;

use crate::engine::config::EngineConfig;
use crate::engine::state::broker::Cluster;
use crate::engine::state::partition::{Partition, PartitionIdx, Traffic};
use crate::error::{BrokerSimError, Result};

pub const MAX_NAME_LENGTH: usize = 249;
pub const MAX_PARTITIONS: i32 = 10_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
pub enum CleanupPolicy {
    #[default]
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "compact")]
    Compact,
    #[serde(
        rename = "delete+compact",
        alias = "compact,delete",
        alias = "delete,compact"
    )]
    DeleteCompact,
}

impl CleanupPolicy {
    pub fn deletes(self) -> bool {
        matches!(self, CleanupPolicy::Delete | CleanupPolicy::DeleteCompact)
    }

    pub fn compacts(self) -> bool {
        matches!(self, CleanupPolicy::Compact | CleanupPolicy::DeleteCompact)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Keep whatever the producer sent.
    #[default]
    Producer,
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// Bytes stored per byte produced.
    pub fn ratio(self) -> f64 {
        match self {
            CompressionType::Producer | CompressionType::None => 1.0,
            CompressionType::Gzip => 0.5,
            CompressionType::Snappy | CompressionType::Lz4 => 0.7,
            CompressionType::Zstd => 0.45,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicConfig {
    /// -1 keeps data forever.
    pub retention_ms: i64,
    /// -1 means no size limit.
    pub retention_bytes: i64,
    pub cleanup_policy: CleanupPolicy,
    pub compression_type: CompressionType,
    pub max_message_bytes: u64,
    pub min_insync_replicas: u32,
    pub segment_ms: i64,
    pub segment_bytes: u64,
}

impl Default for TopicConfig {
    fn default() -> Self {
        TopicConfig {
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            retention_bytes: -1,
            cleanup_policy: CleanupPolicy::Delete,
            compression_type: CompressionType::Producer,
            max_message_bytes: 1_048_588,
            min_insync_replicas: 1,
            segment_ms: 7 * 24 * 60 * 60 * 1000,
            segment_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Declarative description of a topic, as edited in the UI.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    pub name: String,
    #[serde(alias = "partitionCount")]
    pub partitions: i32,
    pub replication_factor: i32,
    #[serde(default)]
    pub config: TopicConfig,
    /// Messages per second produced into the topic as a whole.
    #[serde(default)]
    pub producer_rate: Option<f64>,
    #[serde(default)]
    pub message_bytes: Option<u64>,
}

impl TopicSpec {
    pub fn new(name: &str, partitions: i32, replication_factor: i32) -> Self {
        TopicSpec {
            name: name.to_string(),
            partitions,
            replication_factor,
            config: TopicConfig::default(),
            producer_rate: None,
            message_bytes: None,
        }
    }

    pub fn with_producer_rate(mut self, rate: f64) -> Self {
        self.producer_rate = Some(rate);
        self
    }

    pub fn with_config(mut self, config: TopicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn validate(&self, broker_count: usize) -> Result<()> {
        validate_name(&self.name)?;
        if !(1..=MAX_PARTITIONS).contains(&self.partitions) {
            return Err(BrokerSimError::validation(
                "partitions",
                format!("{} is not between 1 and {}", self.partitions, MAX_PARTITIONS),
            ));
        }
        if self.replication_factor < 1 || self.replication_factor as usize > broker_count {
            return Err(BrokerSimError::validation(
                "replication_factor",
                format!(
                    "{} is not between 1 and the broker count {}",
                    self.replication_factor, broker_count
                ),
            ));
        }
        if let Some(rate) = self.producer_rate {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(BrokerSimError::validation(
                    "producer_rate",
                    "must be a non-negative number",
                ));
            }
        }
        if let Some(bytes) = self.message_bytes {
            if bytes == 0 || bytes > self.config.max_message_bytes {
                return Err(BrokerSimError::validation(
                    "message_bytes",
                    format!("must be between 1 and {}", self.config.max_message_bytes),
                ));
            }
        }
        self.validate_config()
    }

    fn validate_config(&self) -> Result<()> {
        let config = &self.config;
        if config.retention_ms < -1 {
            return Err(BrokerSimError::validation("retention_ms", "must be -1 or greater"));
        }
        if config.retention_bytes < -1 {
            return Err(BrokerSimError::validation("retention_bytes", "must be -1 or greater"));
        }
        if config.max_message_bytes == 0 {
            return Err(BrokerSimError::validation("max_message_bytes", "cannot be 0"));
        }
        if config.min_insync_replicas < 1 {
            return Err(BrokerSimError::validation("min_insync_replicas", "must be at least 1"));
        }
        if config.segment_ms < 1 {
            return Err(BrokerSimError::validation("segment_ms", "must be at least 1"));
        }
        if config.segment_bytes == 0 {
            return Err(BrokerSimError::validation("segment_bytes", "cannot be 0"));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    static LEGAL: OnceLock<Regex> = OnceLock::new();
    let legal = LEGAL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("topic name pattern is valid")
    });

    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(BrokerSimError::validation(
            "name",
            format!("must be 1 to {} characters", MAX_NAME_LENGTH),
        ));
    }
    if name.starts_with("__") {
        return Err(BrokerSimError::validation(
            "name",
            format!("{} is reserved for internal topics", name),
        ));
    }
    if !legal.is_match(name) {
        return Err(BrokerSimError::validation(
            "name",
            format!("{} contains illegal characters", name),
        ));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TopicChange {
    pub partitions_changed: bool,
    pub replicas_changed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
    pub replication_factor: i32,
    pub config: TopicConfig,
    pub producer_rate: Option<f64>,
    pub message_bytes: Option<u64>,
    partitions: BTreeMap<PartitionIdx, Partition>,
}

impl Topic {
    /// Builds a topic from an already validated spec.
    pub fn new(spec: TopicSpec, cluster: &Cluster, now_ms: u64) -> Self {
        let mut topic = Topic {
            id: Uuid::new_v4(),
            name: spec.name,
            replication_factor: spec.replication_factor,
            config: spec.config,
            producer_rate: spec.producer_rate,
            message_bytes: spec.message_bytes,
            partitions: BTreeMap::new(),
        };
        topic.resize(spec.partitions, cluster, now_ms);
        topic
    }

    /// Applies an already validated spec to an existing topic.
    pub fn apply(&mut self, spec: TopicSpec, cluster: &Cluster, now_ms: u64) -> TopicChange {
        let mut change = TopicChange::default();
        self.config = spec.config;
        self.producer_rate = spec.producer_rate;
        self.message_bytes = spec.message_bytes;

        if spec.replication_factor != self.replication_factor {
            self.replication_factor = spec.replication_factor;
            for (idx, partition) in self.partitions.iter_mut() {
                partition.reassign(
                    cluster.place_replicas(*idx, spec.replication_factor as usize),
                    cluster,
                );
            }
            change.replicas_changed = true;
        }

        change.partitions_changed = self.resize(spec.partitions, cluster, now_ms);
        change
    }

    /// Grows or shrinks to `count` partitions. Trailing partitions and their data are dropped.
    fn resize(&mut self, count: i32, cluster: &Cluster, now_ms: u64) -> bool {
        let before = self.partitions.len();
        self.partitions.retain(|idx, _| idx.0 < count);
        for i in 0..count {
            let idx = PartitionIdx(i);
            if !self.partitions.contains_key(&idx) {
                let replicas = cluster.place_replicas(idx, self.replication_factor as usize);
                self.partitions
                    .insert(idx, Partition::new(&self.name, idx, replicas, now_ms));
            }
        }
        if before != self.partitions.len() {
            tracing::debug!(topic = %self.name, from = before, to = self.partitions.len(), "resized topic");
        }
        before != self.partitions.len()
    }

    pub fn partition(&self, idx: PartitionIdx) -> Option<&Partition> {
        self.partitions.get(&idx)
    }

    pub fn partition_mut(&mut self, idx: PartitionIdx) -> Option<&mut Partition> {
        self.partitions.get_mut(&idx)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn partitions_mut(&mut self) -> impl Iterator<Item = &mut Partition> {
        self.partitions.values_mut()
    }

    pub fn partition_ids(&self) -> Vec<PartitionIdx> {
        self.partitions.keys().copied().collect()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn messages(&self) -> u64 {
        self.partitions.values().map(|p| p.messages()).sum()
    }

    pub fn size_bytes(&self) -> u64 {
        self.partitions.values().map(|p| p.size_bytes()).sum()
    }

    pub fn producer_rate(&self, defaults: &EngineConfig) -> f64 {
        self.producer_rate.unwrap_or(defaults.default_producer_rate)
    }

    /// The topic's producer load, spread evenly over its partitions.
    pub fn traffic(&self, defaults: &EngineConfig) -> Traffic {
        let count = self.partitions.len().max(1) as f64;
        Traffic {
            rate_per_sec: self.producer_rate(defaults) / count,
            message_bytes: self.message_bytes.unwrap_or(defaults.default_message_bytes),
        }
    }

    /// Produces into every partition and applies the cleanup policy. Returns messages appended.
    pub fn advance(&mut self, dt: Duration, defaults: &EngineConfig, now_ms: u64) -> u64 {
        let traffic = self.traffic(defaults);
        let config = &self.config;
        self.partitions
            .values_mut()
            .map(|partition| {
                let appended = partition.advance(dt, traffic, config, now_ms);
                partition.enforce_retention(config, now_ms, defaults.compaction_ratio);
                appended
            })
            .sum()
    }
}
