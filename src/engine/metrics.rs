//! Immutable, read-only views of an engine's state, published after every tick and every
//! successful topology edit.

use std::collections::BTreeMap;

use crate::engine::assignment::Assignment;
use crate::engine::config::EngineConfig;
use crate::engine::state::broker::{Broker, BrokerId};
use crate::engine::state::group::{ConsumerGroup, GroupState};
use crate::engine::state::partition::{Health, Offset, Partition, PartitionIdx};
use crate::engine::state::topic::Topic;
use crate::engine::State;
use crate::error::Result;
use crate::governance::acl::AclRule;
use crate::governance::schema::RegisteredSchema;
use crate::governance::Governance;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopicMetrics {
    pub name: String,
    pub topic_id: String,
    pub messages: u64,
    pub size: u64,
    pub partition_count: usize,
    pub replication_factor: i32,
    pub producer_rate: f64,
    pub under_replicated_partitions: usize,
    pub offline_partitions: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMetrics {
    pub partition_id: PartitionIdx,
    pub messages: u64,
    pub size: u64,
    /// Log end offset.
    pub offset: Offset,
    pub log_start_offset: Offset,
    pub high_watermark: Offset,
    pub leader: Option<BrokerId>,
    pub leader_epoch: i32,
    pub replicas: Vec<BrokerId>,
    pub isr: Vec<BrokerId>,
    pub health: Health,
}

/// The assignment view the UI renders for a group.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroupState {
    pub partition_assignment: Assignment,
    pub is_rebalancing: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetrics {
    pub group_id: String,
    pub topic: String,
    pub members: Vec<String>,
    pub state: GroupState,
    pub generation: u32,
    pub partition_assignment: Assignment,
    pub is_rebalancing: bool,
    pub orphaned: bool,
    pub lag: u64,
    pub lag_by_partition: BTreeMap<PartitionIdx, u64>,
    pub committed_offsets: BTreeMap<PartitionIdx, Offset>,
    pub consumption_rate: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub ticks: u64,
    pub clock_ms: u64,
    pub brokers: Vec<Broker>,
    pub topics: BTreeMap<String, TopicMetrics>,
    pub partitions: BTreeMap<String, Vec<PartitionMetrics>>,
    pub groups: BTreeMap<String, GroupMetrics>,
    pub acls: Vec<AclRule>,
    pub schemas: Vec<RegisteredSchema>,
}

impl Snapshot {
    pub(crate) fn capture(state: &State, governance: &Governance, config: &EngineConfig) -> Self {
        Snapshot {
            ticks: state.ticks,
            clock_ms: state.clock_ms,
            brokers: state.cluster.brokers().to_vec(),
            topics: state
                .topics
                .values()
                .map(|t| (t.name.clone(), topic_metrics(t, config)))
                .collect(),
            partitions: state
                .topics
                .values()
                .map(|t| (t.name.clone(), t.partitions().map(partition_metrics).collect()))
                .collect(),
            groups: state
                .groups
                .values()
                .map(|g| (g.id.clone(), group_metrics(g, state.topics.get(&g.topic))))
                .collect(),
            acls: governance.acls().to_vec(),
            schemas: governance.schemas().all().cloned().collect(),
        }
    }

    pub fn topic_metrics(&self, topic: &str) -> Option<&TopicMetrics> {
        self.topics.get(topic)
    }

    /// Empty for unknown topics.
    pub fn all_partition_metrics(&self, topic: &str) -> Vec<PartitionMetrics> {
        self.partitions.get(topic).cloned().unwrap_or_default()
    }

    /// Zero when the group is unknown, orphaned or bound to a different topic.
    pub fn consumer_group_lag(&self, group: &str, topic: &str) -> u64 {
        self.group_on(group, topic).map_or(0, |g| g.lag)
    }

    pub fn consumption_rate(&self, group: &str, topic: &str) -> f64 {
        self.group_on(group, topic).map_or(0.0, |g| g.consumption_rate)
    }

    pub fn consumer_group_state(&self, group: &str) -> Option<ConsumerGroupState> {
        self.groups.get(group).map(|g| ConsumerGroupState {
            partition_assignment: g.partition_assignment.clone(),
            is_rebalancing: g.is_rebalancing,
        })
    }

    pub fn group_metrics(&self, group: &str) -> Option<&GroupMetrics> {
        self.groups.get(group)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn group_on(&self, group: &str, topic: &str) -> Option<&GroupMetrics> {
        self.groups.get(group).filter(|g| g.topic == topic)
    }
}

fn topic_metrics(topic: &Topic, config: &EngineConfig) -> TopicMetrics {
    let count = |health| topic.partitions().filter(|p| p.health() == health).count();
    TopicMetrics {
        name: topic.name.clone(),
        topic_id: topic.id.to_string(),
        messages: topic.messages(),
        size: topic.size_bytes(),
        partition_count: topic.partition_count(),
        replication_factor: topic.replication_factor,
        producer_rate: topic.producer_rate(config),
        under_replicated_partitions: count(Health::UnderReplicated),
        offline_partitions: count(Health::Offline),
    }
}

fn partition_metrics(partition: &Partition) -> PartitionMetrics {
    PartitionMetrics {
        partition_id: partition.idx,
        messages: partition.messages(),
        size: partition.size_bytes(),
        offset: partition.log_end_offset(),
        log_start_offset: partition.log_start_offset(),
        high_watermark: partition.high_watermark(),
        leader: partition.leader(),
        leader_epoch: partition.leader_epoch(),
        replicas: partition.replicas().to_vec(),
        isr: partition.isr().to_vec(),
        health: partition.health(),
    }
}

fn group_metrics(group: &ConsumerGroup, topic: Option<&Topic>) -> GroupMetrics {
    let lag_by_partition = topic
        .map(|t| group.lag_by_partition(t))
        .unwrap_or_default();
    let lag = topic.map_or(0, |t| group.total_lag(t));
    GroupMetrics {
        group_id: group.id.clone(),
        topic: group.topic.clone(),
        members: group.members().to_vec(),
        state: group.state(),
        generation: group.generation(),
        partition_assignment: group.assignment().clone(),
        is_rebalancing: group.is_rebalancing(),
        orphaned: group.is_orphaned(),
        lag,
        lag_by_partition,
        committed_offsets: group.committed().clone(),
        consumption_rate: group.consumption_rate(),
    }
}
