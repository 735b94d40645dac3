use std::collections::BTreeMap;
use std::time::Duration;

use derive_more::Display;

use crate::engine::assignment::{Assignment, AssignmentStrategy, MemberId};
use crate::engine::state::partition::{Offset, PartitionIdx};
use crate::engine::state::topic::Topic;
use crate::error::{BrokerSimError, Result};

pub const MAX_MEMBERS: usize = 10_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
pub enum OffsetStrategy {
    Earliest,
    #[default]
    Latest,
    /// Do not consume a partition until an offset has been committed for it.
    None,
}

/// Group membership, either as a member count or as explicit member ids.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Members {
    Count(u32),
    Ids(Vec<MemberId>),
}

impl Members {
    /// Sorted, de-duplicated member ids. Generated ids are zero-padded so that they sort in
    /// numeric order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        let mut ids = match self {
            Members::Count(n) => (0..*n).map(|i| format!("consumer-{i:04}")).collect(),
            Members::Ids(ids) => ids.clone(),
        };
        ids.sort();
        ids.dedup();
        ids
    }
}

impl Default for Members {
    fn default() -> Self {
        Members::Count(1)
    }
}

/// Declarative description of a consumer group, as edited in the UI.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub members: Members,
    #[serde(default)]
    pub offset_strategy: OffsetStrategy,
    #[serde(default = "auto_commit_default")]
    pub auto_commit: bool,
    /// Messages per second each member consumes.
    #[serde(default)]
    pub consumer_rate: Option<f64>,
}

fn auto_commit_default() -> bool {
    true
}

impl GroupSpec {
    pub fn new(id: &str, topic: &str, members: u32) -> Self {
        GroupSpec {
            id: id.to_string(),
            topic: topic.to_string(),
            members: Members::Count(members),
            offset_strategy: OffsetStrategy::default(),
            auto_commit: true,
            consumer_rate: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BrokerSimError::validation("id", "group id cannot be empty"));
        }
        if self.topic.trim().is_empty() {
            return Err(BrokerSimError::validation("topic", "topic cannot be empty"));
        }
        let count = match &self.members {
            Members::Count(n) => *n as usize,
            Members::Ids(ids) => {
                if ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(BrokerSimError::validation("members", "member ids cannot be empty"));
                }
                ids.len()
            }
        };
        if !(1..=MAX_MEMBERS).contains(&count) {
            return Err(BrokerSimError::validation(
                "members",
                format!("{} is not between 1 and {}", count, MAX_MEMBERS),
            ));
        }
        if let Some(rate) = self.consumer_rate {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(BrokerSimError::validation(
                    "consumer_rate",
                    "must be a non-negative number",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum GroupState {
    Stable,
    Rebalancing,
    /// The group's topic does not exist; nothing is assigned.
    Orphaned,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConsumerGroup {
    pub id: String,
    pub topic: String,
    pub offset_strategy: OffsetStrategy,
    pub auto_commit: bool,
    pub consumer_rate: Option<f64>,
    members: Vec<MemberId>,
    state: GroupState,
    generation: u32,
    assignment: Assignment,
    committed: BTreeMap<PartitionIdx, Offset>,
    positions: BTreeMap<PartitionIdx, Offset>,
    // fractional messages carried between ticks
    carry: BTreeMap<PartitionIdx, f64>,
    last_lag: Option<u64>,
    // lag dropped by offset resets since the last rate sample
    skipped: u64,
    consumption_rate: f64,
}

impl ConsumerGroup {
    /// A new group starts out rebalancing; its first assignment is published on the next tick.
    pub fn new(spec: GroupSpec) -> Self {
        ConsumerGroup {
            members: spec.members.member_ids(),
            id: spec.id,
            topic: spec.topic,
            offset_strategy: spec.offset_strategy,
            auto_commit: spec.auto_commit,
            consumer_rate: spec.consumer_rate,
            state: GroupState::Rebalancing,
            generation: 0,
            assignment: Assignment::new(),
            committed: BTreeMap::new(),
            positions: BTreeMap::new(),
            carry: BTreeMap::new(),
            last_lag: None,
            skipped: 0,
            consumption_rate: 0.0,
        }
    }

    /// Applies an edited spec. Returns true if the edit triggered a rebalance.
    pub fn apply(&mut self, spec: GroupSpec) -> bool {
        self.offset_strategy = spec.offset_strategy;
        self.auto_commit = spec.auto_commit;
        self.consumer_rate = spec.consumer_rate;

        let mut rebalance = false;
        if spec.topic != self.topic {
            self.topic = spec.topic;
            self.committed.clear();
            self.positions.clear();
            self.carry.clear();
            self.last_lag = None;
            self.skipped = 0;
            rebalance = true;
        }
        let members = spec.members.member_ids();
        if members != self.members {
            self.members = members;
            rebalance = true;
        }
        if rebalance {
            self.begin_rebalance("membership changed");
        }
        rebalance
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn is_rebalancing(&self) -> bool {
        self.state == GroupState::Rebalancing
    }

    pub fn is_orphaned(&self) -> bool {
        self.state == GroupState::Orphaned
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn committed(&self) -> &BTreeMap<PartitionIdx, Offset> {
        &self.committed
    }

    pub fn committed_offset(&self, idx: PartitionIdx) -> Option<Offset> {
        self.committed.get(&idx).copied()
    }

    pub fn consumption_rate(&self) -> f64 {
        self.consumption_rate
    }

    /// Enters `Rebalancing` and drops the current assignment. Re-entering while already
    /// rebalancing restarts the round.
    pub fn begin_rebalance(&mut self, reason: &str) {
        tracing::debug!(group = %self.id, reason, "rebalance started");
        self.state = GroupState::Rebalancing;
        self.assignment.clear();
        // aggregate lag drops to zero until reassignment
        self.last_lag = None;
    }

    /// Computes a fresh assignment over the topic's current partitions and returns to `Stable`.
    pub fn complete_rebalance(&mut self, topic: &Topic, strategy: &dyn AssignmentStrategy) {
        self.repair(topic);
        self.assignment = strategy.assign(&self.members, &topic.partition_ids());
        self.state = GroupState::Stable;
        self.generation += 1;
        self.last_lag = None;
        tracing::debug!(
            group = %self.id,
            generation = self.generation,
            strategy = strategy.name(),
            assignment = ?self.assignment,
            "rebalance completed"
        );
    }

    pub fn orphan(&mut self) {
        if !self.is_orphaned() {
            tracing::warn!(group = %self.id, topic = %self.topic, "consumer group references a missing topic");
        }
        self.state = GroupState::Orphaned;
        self.assignment.clear();
        self.last_lag = None;
        self.skipped = 0;
        self.consumption_rate = 0.0;
    }

    /// Commits `offset` for a partition, clamped to `[0, high_watermark]`. Returns the stored offset.
    pub fn commit_offset(&mut self, topic: &Topic, idx: PartitionIdx, offset: Offset) -> Result<Offset> {
        let partition = topic
            .partition(idx)
            .ok_or_else(|| BrokerSimError::not_found("partition", format!("{}-{}", topic.name, idx)))?;
        let offset = offset.min(partition.high_watermark());
        self.committed.insert(idx, offset);
        self.positions.insert(idx, offset);
        self.carry.remove(&idx);
        Ok(offset)
    }

    /// `high_watermark - committed`, never negative. Partitions without a committed offset count
    /// every retained message as lag.
    pub fn lag(&self, topic: &Topic, idx: PartitionIdx) -> u64 {
        match topic.partition(idx) {
            Some(partition) => {
                let committed = self
                    .committed_offset(idx)
                    .unwrap_or_else(|| partition.log_start_offset());
                partition.high_watermark().saturating_sub(committed)
            }
            None => 0,
        }
    }

    /// Lag for every partition of the group's topic, assigned or not. Empty for orphaned groups.
    pub fn lag_by_partition(&self, topic: &Topic) -> BTreeMap<PartitionIdx, u64> {
        if self.is_orphaned() {
            return BTreeMap::new();
        }
        topic
            .partition_ids()
            .into_iter()
            .map(|idx| (idx, self.lag(topic, idx)))
            .collect()
    }

    /// Sum of lag over the partitions currently assigned to members, so zero while a rebalance
    /// is pending.
    pub fn total_lag(&self, topic: &Topic) -> u64 {
        self.assignment
            .values()
            .flatten()
            .map(|idx| self.lag(topic, *idx))
            .sum()
    }

    /// Drops offsets for partitions that no longer exist and caps the rest at the high watermark.
    pub fn repair(&mut self, topic: &Topic) {
        let before = self.committed.clone();
        for offsets in [&mut self.committed, &mut self.positions] {
            offsets.retain(|idx, _| topic.partition(*idx).is_some());
            for (idx, offset) in offsets.iter_mut() {
                if let Some(partition) = topic.partition(*idx) {
                    *offset = (*offset).min(partition.high_watermark());
                }
            }
        }
        self.carry.retain(|idx, _| topic.partition(*idx).is_some());
        if before != self.committed {
            tracing::debug!(group = %self.id, committed = ?self.committed, "repaired committed offsets");
        }
    }

    /// Each member consumes up to `rate * dt` messages, split evenly over its partitions and
    /// bounded by each partition's high watermark.
    pub fn consume(&mut self, dt: Duration, topic: &Topic, default_rate: f64) {
        if self.state != GroupState::Stable {
            return;
        }
        let rate = self.consumer_rate.unwrap_or(default_rate);
        let assignment = self.assignment.clone();

        for partitions in assignment.values().filter(|p| !p.is_empty()) {
            let share = rate * dt.as_secs_f64() / partitions.len() as f64;
            for idx in partitions {
                let Some(partition) = topic.partition(*idx) else {
                    continue;
                };
                let Some(position) = self.position(topic, *idx) else {
                    continue;
                };

                let carry = self.carry.entry(*idx).or_insert(0.0);
                *carry += share;
                let whole = carry.floor();
                *carry -= whole;

                let position = (position + whole as u64).min(partition.high_watermark());
                self.positions.insert(*idx, position);
                if self.auto_commit {
                    self.committed.insert(*idx, position);
                }
            }
        }
    }

    /// The next offset to consume, initialising it from the offset strategy when missing and
    /// resetting it when retention has deleted past it. Lag removed by a reset is not consumption
    /// and is set aside for the next rate sample.
    fn position(&mut self, topic: &Topic, idx: PartitionIdx) -> Option<Offset> {
        let partition = topic.partition(idx)?;
        let log_start = partition.log_start_offset();
        let current = self
            .positions
            .get(&idx)
            .copied()
            .or_else(|| self.committed_offset(idx));
        if let Some(position) = current.filter(|p| *p >= log_start) {
            return Some(position);
        }

        let reset = match self.offset_strategy {
            OffsetStrategy::Earliest => Some(log_start),
            OffsetStrategy::Latest => Some(partition.high_watermark()),
            OffsetStrategy::None => None,
        };
        let position = reset.or(current)?;
        self.positions.insert(idx, position);
        if self.auto_commit {
            let before = self.committed_offset(idx).unwrap_or(log_start);
            self.skipped += position.saturating_sub(before);
            self.committed.insert(idx, position);
        }
        Some(position)
    }

    /// Consumption throughput: how fast total lag fell over the last tick, floored at zero.
    /// Offset resets are not counted.
    pub fn update_rate(&mut self, dt: Duration, topic: &Topic) {
        let lag = self.total_lag(topic);
        let skipped = std::mem::take(&mut self.skipped);
        let secs = dt.as_secs_f64();
        self.consumption_rate = match self.last_lag {
            Some(previous) if secs > 0.0 => {
                previous.saturating_sub(lag.saturating_add(skipped)) as f64 / secs
            }
            _ => 0.0,
        };
        self.last_lag = Some(lag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assignment::RangeStrategy;
    use crate::engine::config::EngineConfig;
    use crate::engine::state::broker::{Broker, Cluster};
    use crate::engine::state::topic::TopicSpec;

    const SECOND: Duration = Duration::from_secs(1);

    fn topic(partitions: i32, rate: f64) -> Topic {
        let cluster = Cluster::new(vec![Broker::new(0, "a:9092")]);
        Topic::new(
            TopicSpec::new("orders", partitions, 1).with_producer_rate(rate),
            &cluster,
            0,
        )
    }

    fn produce(topic: &mut Topic, secs: u64) {
        let defaults = EngineConfig::default();
        for s in 0..secs {
            topic.advance(SECOND, &defaults, (s + 1) * 1000);
        }
    }

    fn stable(spec: GroupSpec, topic: &Topic) -> ConsumerGroup {
        let mut group = ConsumerGroup::new(spec);
        group.complete_rebalance(topic, &RangeStrategy);
        group
    }

    #[test]
    fn members_from_count_or_ids() {
        assert_eq!(
            vec!["consumer-0000", "consumer-0001"],
            Members::Count(2).member_ids()
        );
        assert_eq!(
            vec!["a", "b"],
            Members::Ids(vec!["b".into(), "a".into(), "b".into()]).member_ids()
        );
        let members: Members = serde_json::from_str("3").unwrap();
        assert_eq!(Members::Count(3), members);
        let members: Members = serde_json::from_str("[\"x\"]").unwrap();
        assert_eq!(Members::Ids(vec!["x".into()]), members);
    }

    #[test]
    fn spec_validation() {
        assert_eq!(Some("id"), GroupSpec::new(" ", "orders", 1).validate().unwrap_err().field());
        assert_eq!(Some("topic"), GroupSpec::new("g1", "", 1).validate().unwrap_err().field());
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.members = Members::Ids(vec!["".into()]);
        assert_eq!(Some("members"), spec.validate().unwrap_err().field());
    }

    #[test]
    fn membership_must_be_bounded_and_non_empty() {
        for members in [
            Members::Count(0),
            Members::Ids(vec![]),
            Members::Count(MAX_MEMBERS as u32 + 1),
            Members::Count(u32::MAX),
        ] {
            let mut spec = GroupSpec::new("g1", "orders", 1);
            spec.members = members;
            assert_eq!(Some("members"), spec.validate().unwrap_err().field());
        }
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.members = Members::Count(MAX_MEMBERS as u32);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn generated_ids_sort_numerically() {
        let ids = Members::Count(12).member_ids();
        assert_eq!("consumer-0002", ids[2]);
        assert_eq!("consumer-0011", ids[11]);

        let topic = topic(13, 0.0);
        let group = stable(GroupSpec::new("g1", "orders", 12), &topic);
        // the first member in numeric order takes the extra partition
        assert_eq!(2, group.assignment()["consumer-0000"].len());
        assert_eq!(vec![PartitionIdx(3)], group.assignment()["consumer-0002"]);
    }

    #[test]
    fn new_group_rebalances_then_stabilises() {
        let topic = topic(3, 0.0);
        let mut group = ConsumerGroup::new(GroupSpec::new("g1", "orders", 2));
        assert!(group.is_rebalancing());
        assert!(group.assignment().is_empty());

        group.complete_rebalance(&topic, &RangeStrategy);
        assert_eq!(GroupState::Stable, group.state());
        assert_eq!(1, group.generation());
        let sizes: Vec<usize> = group.assignment().values().map(Vec::len).collect();
        assert_eq!(vec![2, 1], sizes);
    }

    #[test]
    fn membership_change_rebalances() {
        let topic = topic(3, 0.0);
        let mut group = stable(GroupSpec::new("g1", "orders", 2), &topic);
        assert!(!group.apply(GroupSpec::new("g1", "orders", 2)));
        assert!(!group.is_rebalancing());

        assert!(group.apply(GroupSpec::new("g1", "orders", 3)));
        assert!(group.is_rebalancing());
        assert!(group.assignment().is_empty());

        group.complete_rebalance(&topic, &RangeStrategy);
        let sizes: Vec<usize> = group.assignment().values().map(Vec::len).collect();
        assert_eq!(vec![1, 1, 1], sizes);
        assert_eq!(2, group.generation());
    }

    #[test]
    fn commit_is_clamped_to_high_watermark() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 2);
        let mut group = stable(GroupSpec::new("g1", "orders", 1), &topic);

        assert_eq!(20, group.commit_offset(&topic, PartitionIdx(0), 500).unwrap());
        assert_eq!(Some(20), group.committed_offset(PartitionIdx(0)));
        assert_eq!(0, group.lag(&topic, PartitionIdx(0)));

        assert_eq!(5, group.commit_offset(&topic, PartitionIdx(0), 5).unwrap());
        assert_eq!(15, group.lag(&topic, PartitionIdx(0)));

        let err = group.commit_offset(&topic, PartitionIdx(9), 1).unwrap_err();
        assert!(matches!(err, BrokerSimError::NotFound { .. }));
    }

    #[test]
    fn earliest_consumes_from_log_start() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 3);
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.offset_strategy = OffsetStrategy::Earliest;
        spec.consumer_rate = Some(5.0);
        let mut group = stable(spec, &topic);

        assert_eq!(30, group.total_lag(&topic));
        group.consume(SECOND, &topic, 0.0);
        assert_eq!(Some(5), group.committed_offset(PartitionIdx(0)));
        assert_eq!(25, group.total_lag(&topic));
    }

    #[test]
    fn latest_starts_at_high_watermark() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 3);
        let mut group = stable(GroupSpec::new("g1", "orders", 1), &topic);
        group.consume(SECOND, &topic, 100.0);
        assert_eq!(Some(30), group.committed_offset(PartitionIdx(0)));
        assert_eq!(0, group.total_lag(&topic));
    }

    #[test]
    fn none_waits_for_an_explicit_commit() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 3);
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.offset_strategy = OffsetStrategy::None;
        let mut group = stable(spec, &topic);

        group.consume(SECOND, &topic, 100.0);
        assert_eq!(None, group.committed_offset(PartitionIdx(0)));
        assert_eq!(30, group.total_lag(&topic));

        group.commit_offset(&topic, PartitionIdx(0), 10).unwrap();
        group.consume(SECOND, &topic, 5.0);
        assert_eq!(Some(15), group.committed_offset(PartitionIdx(0)));
    }

    #[test]
    fn manual_commit_leaves_committed_offset_alone() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 3);
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.offset_strategy = OffsetStrategy::Earliest;
        spec.auto_commit = false;
        let mut group = stable(spec, &topic);

        group.consume(SECOND, &topic, 100.0);
        assert_eq!(None, group.committed_offset(PartitionIdx(0)));
        assert_eq!(30, group.total_lag(&topic));
    }

    #[test]
    fn rebalancing_group_does_not_consume() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 1);
        let mut group = ConsumerGroup::new(GroupSpec::new("g1", "orders", 1));
        group.consume(SECOND, &topic, 100.0);
        assert!(group.committed().is_empty());
    }

    #[test]
    fn repair_after_shrink() {
        let cluster = Cluster::new(vec![Broker::new(0, "a:9092")]);
        let mut topic = topic(3, 30.0);
        produce(&mut topic, 1);
        let mut group = stable(GroupSpec::new("g1", "orders", 1), &topic);
        for i in 0..3 {
            group.commit_offset(&topic, PartitionIdx(i), 10).unwrap();
        }

        topic.apply(TopicSpec::new("orders", 1, 1), &cluster, 1000);
        group.repair(&topic);
        assert_eq!(1, group.committed().len());
        assert_eq!(0, group.lag(&topic, PartitionIdx(2)));
    }

    #[test]
    fn consumption_rate_tracks_falling_lag() {
        let mut topic = topic(1, 10.0);
        produce(&mut topic, 10);
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.offset_strategy = OffsetStrategy::Earliest;
        spec.consumer_rate = Some(40.0);
        let mut group = stable(spec, &topic);

        group.update_rate(SECOND, &topic);
        assert_eq!(0.0, group.consumption_rate());

        group.consume(SECOND, &topic, 0.0);
        group.update_rate(SECOND, &topic);
        assert_eq!(40.0, group.consumption_rate());

        // lag growing reports zero throughput
        produce(&mut topic, 1);
        group.commit_offset(&topic, PartitionIdx(0), 0).unwrap();
        group.update_rate(SECOND, &topic);
        assert_eq!(0.0, group.consumption_rate());
    }

    #[test]
    fn offset_reset_is_not_counted_as_consumption() {
        let mut topic = topic(1, 100.0);
        produce(&mut topic, 1);
        let mut spec = GroupSpec::new("g1", "orders", 1);
        spec.consumer_rate = Some(1.0);
        let mut group = stable(spec, &topic);
        group.update_rate(SECOND, &topic);
        assert_eq!(100, group.total_lag(&topic));

        // latest jumps straight to the high watermark
        group.consume(SECOND, &topic, 0.0);
        group.update_rate(SECOND, &topic);
        assert_eq!(0, group.total_lag(&topic));
        assert_eq!(0.0, group.consumption_rate());
    }

    #[test]
    fn aggregate_lag_counts_assigned_partitions_only() {
        let mut topic = topic(3, 30.0);
        produce(&mut topic, 1);
        let mut group = stable(GroupSpec::new("g1", "orders", 2), &topic);
        assert_eq!(30, group.total_lag(&topic));

        group.update_rate(SECOND, &topic);
        group.apply(GroupSpec::new("g1", "orders", 3));
        assert!(group.is_rebalancing());
        assert_eq!(0, group.total_lag(&topic));
        assert_eq!(30, group.lag_by_partition(&topic).values().sum::<u64>());
        // the drop to zero is not consumption
        group.update_rate(SECOND, &topic);
        assert_eq!(0.0, group.consumption_rate());

        group.complete_rebalance(&topic, &RangeStrategy);
        assert_eq!(30, group.total_lag(&topic));
    }

    #[test]
    fn orphaned_group_has_no_assignment_or_lag() {
        let topic = topic(2, 0.0);
        let mut group = stable(GroupSpec::new("g1", "orders", 2), &topic);
        group.orphan();
        assert!(group.is_orphaned());
        assert!(!group.is_rebalancing());
        assert!(group.assignment().is_empty());
        assert_eq!(0, group.total_lag(&topic));
    }
}
