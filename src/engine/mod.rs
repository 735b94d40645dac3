//! The simulation engine for one Kafka-style cluster.
//!
//! Every edit and every tick is applied to a copy of the current [`State`], which replaces the
//! live state only on success, and is followed by a freshly published [`Snapshot`]. Readers
//! therefore never observe a half-applied change, and a rejected edit leaves no trace.

pub mod assignment;
pub mod config;
pub mod fsm;
pub mod metrics;
pub mod registry;
pub mod runner;
pub mod state;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::engine::config::EngineConfig;
use crate::engine::fsm::Transition;
use crate::engine::metrics::{ConsumerGroupState, PartitionMetrics, Snapshot, TopicMetrics};
use crate::engine::state::broker::{Broker, BrokerId, Cluster};
use crate::engine::state::group::{ConsumerGroup, GroupSpec, GroupState};
use crate::engine::state::partition::{Offset, PartitionIdx, ReplicaEvent};
use crate::engine::state::topic::{Topic, TopicSpec};
use crate::engine::topology::Topology;
use crate::error::{BrokerSimError, Result};
use crate::governance::acl::AclRule;
use crate::governance::schema::{RegisteredSchema, SchemaType};
use crate::governance::Governance;

pub use state::State;

pub struct Engine {
    config: EngineConfig,
    state: State,
    governance: Governance,
    rng: StdRng,
    snapshots: watch::Sender<Arc<Snapshot>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ticks", &self.state.ticks)
            .field("brokers", &self.state.cluster.len())
            .field("topics", &self.state.topics.len())
            .field("groups", &self.state.groups.len())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BrokerSimError::validation("config", e.to_string()))?;
        let rng = StdRng::seed_from_u64(config.seed);
        let (snapshots, _) = watch::channel(Arc::new(Snapshot::default()));
        let engine = Engine {
            config,
            state: State::default(),
            governance: Governance::default(),
            rng,
            snapshots,
        };
        engine.publish();
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receives every snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    fn publish(&self) {
        let snapshot = Snapshot::capture(&self.state, &self.governance, &self.config);
        self.snapshots.send_replace(Arc::new(snapshot));
    }

    /// Runs `f` against a copy of the state and keeps the copy only if `f` succeeds.
    fn apply<T>(&mut self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        self.state = next;
        self.publish();
        Ok(out)
    }

    /// Reconciles the engine with a complete topology. Either every entry is applied or, on the
    /// first invalid one, nothing is.
    #[tracing::instrument(skip(self, topology))]
    pub fn initialize(&mut self, topology: Topology) -> Result<()> {
        let brokers = topology.validate()?;
        let Topology {
            topics,
            consumer_groups,
            ..
        } = topology;
        self.apply(|state| state.reconcile(brokers, topics, consumer_groups))?;
        tracing::info!(
            brokers = self.state.cluster.len(),
            topics = self.state.topics.len(),
            groups = self.state.groups.len(),
            "topology initialized"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn add_broker(&mut self, broker: Broker) -> Result<bool> {
        if broker.address.trim().is_empty() {
            return Err(BrokerSimError::validation("address", "broker address cannot be empty"));
        }
        self.apply(|state| Ok(state.add_broker(broker)))
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_broker(&mut self, id: BrokerId) -> Result<Broker> {
        self.apply(|state| state.remove_broker(id))
    }

    #[tracing::instrument(skip(self, spec), fields(topic = %spec.name))]
    pub fn upsert_topic(&mut self, spec: TopicSpec) -> Result<()> {
        self.apply(|state| state.upsert_topic(spec))
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_topic(&mut self, name: &str) -> Result<()> {
        self.apply(|state| state.remove_topic(name).map(|_| ()))
    }

    #[tracing::instrument(skip(self))]
    pub fn set_producer_rate(&mut self, topic: &str, rate: f64) -> Result<()> {
        self.apply(|state| state.set_producer_rate(topic, rate))
    }

    #[tracing::instrument(skip(self, spec), fields(group = %spec.id))]
    pub fn upsert_group(&mut self, spec: GroupSpec) -> Result<()> {
        self.apply(|state| state.upsert_group(spec))
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_group(&mut self, id: &str) -> Result<()> {
        self.apply(|state| state.remove_group(id).map(|_| ()))
    }

    /// Commits an offset for a group, clamped to the partition's high watermark.
    #[tracing::instrument(skip(self))]
    pub fn commit_offset(&mut self, group: &str, partition: PartitionIdx, offset: Offset) -> Result<Offset> {
        self.apply(|state| state.commit_offset(group, partition, offset))
    }

    #[tracing::instrument(skip(self))]
    pub fn fail_replica(&mut self, topic: &str, partition: PartitionIdx, broker: BrokerId) -> Result<bool> {
        self.apply(|state| state.mutate_replication(topic, partition, ReplicaEvent::Fail(broker)))
    }

    #[tracing::instrument(skip(self))]
    pub fn recover_replica(&mut self, topic: &str, partition: PartitionIdx, broker: BrokerId) -> Result<bool> {
        self.apply(|state| state.mutate_replication(topic, partition, ReplicaEvent::Recover(broker)))
    }

    pub fn register_schema(
        &mut self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> Result<RegisteredSchema> {
        let registered = self.governance.register_schema(subject, schema_type, schema)?;
        self.publish();
        Ok(registered)
    }

    pub fn add_acl(&mut self, rule: AclRule) -> Result<()> {
        self.governance.add_acl(rule)?;
        self.publish();
        Ok(())
    }

    pub fn governance(&self) -> &Governance {
        &self.governance
    }

    pub fn transition(&mut self, transition: Transition) -> Result<()> {
        match transition {
            Transition::AddBroker { broker } => self.add_broker(broker).map(|_| ()),
            Transition::RemoveBroker { id } => self.remove_broker(id).map(|_| ()),
            Transition::UpsertTopic { topic } => self.upsert_topic(topic),
            Transition::RemoveTopic { name } => self.remove_topic(&name),
            Transition::SetProducerRate { topic, rate } => self.set_producer_rate(&topic, rate),
            Transition::UpsertGroup { group } => self.upsert_group(group),
            Transition::RemoveGroup { id } => self.remove_group(&id),
            Transition::CommitOffset {
                group,
                partition,
                offset,
            } => self.commit_offset(&group, partition, offset).map(|_| ()),
            Transition::FailReplica {
                topic,
                partition,
                broker,
            } => self.fail_replica(&topic, partition, broker).map(|_| ()),
            Transition::RecoverReplica {
                topic,
                partition,
                broker,
            } => self.recover_replica(&topic, partition, broker).map(|_| ()),
            Transition::RegisterSchema {
                subject,
                schema_type,
                schema,
            } => self.register_schema(&subject, schema_type, &schema).map(|_| ()),
            Transition::AddAcl { acl } => self.add_acl(acl),
        }
    }

    /// Advances simulated time by `dt`.
    ///
    /// In order: replica churn, preferred leader election, production and retention for every
    /// topic, then consumer groups. A group that was rebalancing at the start of the tick receives
    /// its new assignment but consumes nothing until the next tick.
    pub fn tick(&mut self, dt: Duration) {
        let mut next = self.state.clone();
        next.ticks += 1;
        next.clock_ms += dt.as_millis() as u64;
        let now_ms = next.clock_ms;

        churn(&mut self.rng, &self.config, &mut next);

        if self.config.auto_leader_rebalance {
            for topic in next.topics.values_mut() {
                for partition in topic.partitions_mut() {
                    partition.elect_preferred_leader();
                }
            }
        }

        let mut produced = 0;
        for topic in next.topics.values_mut() {
            produced += topic.advance(dt, &self.config, now_ms);
        }

        let strategy = self.config.assignment_strategy.strategy();
        for group in next.groups.values_mut() {
            advance_group(group, next.topics.get(&group.topic), dt, &self.config, strategy.as_ref());
        }

        self.state = next;
        self.publish();
        tracing::trace!(tick = self.state.ticks, clock_ms = now_ms, produced, "tick");
    }

    pub fn ticks(&self) -> u64 {
        self.state.ticks
    }

    pub fn cluster(&self) -> &Cluster {
        &self.state.cluster
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.state.topics.get(name)
    }

    pub fn group(&self, id: &str) -> Option<&ConsumerGroup> {
        self.state.groups.get(id)
    }

    pub fn topic_metrics(&self, topic: &str) -> Option<TopicMetrics> {
        self.snapshot().topic_metrics(topic).cloned()
    }

    pub fn all_partition_metrics(&self, topic: &str) -> Vec<PartitionMetrics> {
        self.snapshot().all_partition_metrics(topic)
    }

    pub fn consumer_group_lag(&self, group: &str, topic: &str) -> u64 {
        self.snapshot().consumer_group_lag(group, topic)
    }

    pub fn consumption_rate(&self, group: &str, topic: &str) -> f64 {
        self.snapshot().consumption_rate(group, topic)
    }

    pub fn consumer_group_state(&self, group: &str) -> Option<ConsumerGroupState> {
        self.snapshot().consumer_group_state(group)
    }
}

/// Seeded replica churn: in-sync followers may drop out of the ISR and out-of-sync replicas on
/// live brokers may rejoin it. Leaders are never failed here.
fn churn(rng: &mut StdRng, config: &EngineConfig, state: &mut State) {
    let fail = config.replica_failure_probability;
    let recover = config.replica_recovery_probability;
    if fail <= 0.0 && recover <= 0.0 {
        return;
    }

    let cluster = &state.cluster;
    for topic in state.topics.values_mut() {
        for partition in topic.partitions_mut() {
            let mut events = Vec::new();
            for &replica in partition.replicas() {
                let in_sync = partition.isr().contains(&replica);
                if in_sync && partition.leader() != Some(replica) {
                    if fail > 0.0 && rng.gen_bool(fail) {
                        events.push(ReplicaEvent::Fail(replica));
                    }
                } else if !in_sync && cluster.contains(replica) && recover > 0.0 && rng.gen_bool(recover) {
                    events.push(ReplicaEvent::Recover(replica));
                }
            }
            for event in events {
                if partition.mutate_replication(event) {
                    tracing::debug!(topic = %partition.topic, partition = %partition.idx, ?event, "replica churn");
                }
            }
        }
    }
}

fn advance_group(
    group: &mut ConsumerGroup,
    topic: Option<&Topic>,
    dt: Duration,
    config: &EngineConfig,
    strategy: &dyn assignment::AssignmentStrategy,
) {
    let Some(topic) = topic else {
        group.orphan();
        return;
    };
    match group.state() {
        GroupState::Rebalancing | GroupState::Orphaned => group.complete_rebalance(topic, strategy),
        GroupState::Stable => {
            group.repair(topic);
            group.consume(dt, topic, config.default_consumer_rate);
        }
    }
    group.update_rate(dt, topic);
}
