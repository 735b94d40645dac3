pub mod broker;
pub mod group;
pub mod partition;
pub mod topic;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::engine::state::broker::{Broker, BrokerId, Cluster};
use crate::engine::state::group::{ConsumerGroup, GroupSpec};
use crate::engine::state::partition::{Offset, PartitionIdx, ReplicaEvent};
use crate::engine::state::topic::{Topic, TopicSpec};
use crate::error::{BrokerSimError, Result};

/// Everything one simulated cluster owns apart from governance data. Cheap enough to clone, which
/// is how edits and ticks are made atomic: mutate a copy, then swap it in.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub(crate) cluster: Cluster,
    pub(crate) topics: BTreeMap<String, Topic>,
    pub(crate) groups: BTreeMap<String, ConsumerGroup>,
    pub(crate) clock_ms: u64,
    pub(crate) ticks: u64,
}

impl State {
    /// Adds a broker; if it hosts replicas they rejoin their ISRs. Returns true if it was new.
    pub fn add_broker(&mut self, broker: Broker) -> bool {
        let id = broker.id;
        if !self.cluster.add(broker) {
            return false;
        }
        tracing::debug!(broker = %id, "broker added");
        self.replicate(ReplicaEvent::Recover(id));
        true
    }

    /// Removes a broker. Its replicas leave every ISR and partitions it led elect a new leader.
    pub fn remove_broker(&mut self, id: BrokerId) -> Result<Broker> {
        let broker = self
            .cluster
            .remove(id)
            .ok_or_else(|| BrokerSimError::not_found("broker", id))?;
        tracing::debug!(broker = %id, "broker removed");
        self.replicate(ReplicaEvent::Fail(id));
        Ok(broker)
    }

    fn replicate(&mut self, event: ReplicaEvent) {
        for topic in self.topics.values_mut() {
            for partition in topic.partitions_mut() {
                partition.mutate_replication(event);
            }
        }
    }

    pub fn upsert_topic(&mut self, spec: TopicSpec) -> Result<()> {
        spec.validate(self.cluster.len())?;
        let name = spec.name.clone();
        let now_ms = self.clock_ms;

        match self.topics.get_mut(&name) {
            Some(topic) => {
                let change = topic.apply(spec, &self.cluster, now_ms);
                if change.partitions_changed {
                    for group in self.groups.values_mut().filter(|g| g.topic == name) {
                        group.begin_rebalance("partition count changed");
                    }
                }
            }
            None => {
                tracing::debug!(topic = %name, "topic created");
                self.topics
                    .insert(name.clone(), Topic::new(spec, &self.cluster, now_ms));
                for group in self.groups.values_mut().filter(|g| g.topic == name) {
                    group.begin_rebalance("topic created");
                }
            }
        }
        Ok(())
    }

    /// Removes a topic along with every consumer group bound to it.
    pub fn remove_topic(&mut self, name: &str) -> Result<Topic> {
        let topic = self
            .topics
            .remove(name)
            .ok_or_else(|| BrokerSimError::not_found("topic", name))?;
        self.groups.retain(|id, group| {
            let keep = group.topic != name;
            if !keep {
                tracing::debug!(group = %id, topic = %name, "group removed with its topic");
            }
            keep
        });
        Ok(topic)
    }

    pub fn set_producer_rate(&mut self, name: &str, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate >= 0.0) {
            return Err(BrokerSimError::validation(
                "producer_rate",
                "must be a non-negative number",
            ));
        }
        self.topic_mut(name)?.producer_rate = Some(rate);
        Ok(())
    }

    pub fn upsert_group(&mut self, spec: GroupSpec) -> Result<()> {
        spec.validate()?;
        let group = match self.groups.entry(spec.id.clone()) {
            Entry::Occupied(entry) => {
                let group = entry.into_mut();
                group.apply(spec);
                group
            }
            Entry::Vacant(entry) => {
                tracing::debug!(group = %spec.id, "group created");
                entry.insert(ConsumerGroup::new(spec))
            }
        };
        if !self.topics.contains_key(&group.topic) {
            group.orphan();
        } else if group.is_orphaned() {
            group.begin_rebalance("topic available");
        }
        Ok(())
    }

    pub fn remove_group(&mut self, id: &str) -> Result<ConsumerGroup> {
        self.groups
            .remove(id)
            .ok_or_else(|| BrokerSimError::not_found("group", id))
    }

    pub fn commit_offset(&mut self, group: &str, idx: PartitionIdx, offset: Offset) -> Result<Offset> {
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| BrokerSimError::not_found("group", group))?;
        let topic = self
            .topics
            .get(&group.topic)
            .ok_or_else(|| BrokerSimError::not_found("topic", &group.topic))?;
        group.commit_offset(topic, idx, offset)
    }

    /// Explicit replica failure or recovery for one partition. Recovery requires a live broker.
    pub fn mutate_replication(
        &mut self,
        topic: &str,
        idx: PartitionIdx,
        event: ReplicaEvent,
    ) -> Result<bool> {
        let broker = match event {
            ReplicaEvent::Fail(b) | ReplicaEvent::Recover(b) => b,
        };
        if matches!(event, ReplicaEvent::Recover(_)) && !self.cluster.contains(broker) {
            return Err(BrokerSimError::validation(
                "broker",
                format!("broker {} is not live", broker),
            ));
        }
        let partition = self
            .topic_mut(topic)?
            .partition_mut(idx)
            .ok_or_else(|| BrokerSimError::not_found("partition", format!("{}-{}", topic, idx)))?;
        if !partition.replicas().contains(&broker) {
            return Err(BrokerSimError::validation(
                "broker",
                format!("broker {} is not a replica of {}-{}", broker, topic, idx),
            ));
        }
        Ok(partition.mutate_replication(event))
    }

    /// Brings the state in line with a full declarative topology. Specs must already be valid.
    pub fn reconcile(
        &mut self,
        brokers: Vec<Broker>,
        topics: Vec<TopicSpec>,
        groups: Vec<GroupSpec>,
    ) -> Result<()> {
        let wanted: BTreeSet<BrokerId> = brokers.iter().map(|b| b.id).collect();
        for id in self.cluster.ids() {
            if !wanted.contains(&id) {
                self.remove_broker(id)?;
            }
        }
        for broker in brokers {
            self.add_broker(broker);
        }

        let wanted: BTreeSet<&str> = topics.iter().map(|t| t.name.as_str()).collect();
        self.topics.retain(|name, _| wanted.contains(name.as_str()));
        for spec in topics {
            self.upsert_topic(spec)?;
        }

        let wanted: BTreeSet<&str> = groups.iter().map(|g| g.id.as_str()).collect();
        self.groups.retain(|id, _| wanted.contains(id.as_str()));
        for spec in groups {
            self.upsert_group(spec)?;
        }
        Ok(())
    }

    fn topic_mut(&mut self, name: &str) -> Result<&mut Topic> {
        self.topics
            .get_mut(name)
            .ok_or_else(|| BrokerSimError::not_found("topic", name))
    }
}
