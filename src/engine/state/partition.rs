use std::collections::VecDeque;
use std::time::Duration;

use derive_more::Display;

use crate::engine::state::broker::{BrokerId, Cluster};
use crate::engine::state::topic::TopicConfig;

pub type Offset = u64;

#[derive(
    Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Display,
)]
#[serde(transparent)]
pub struct PartitionIdx(pub i32);

/// Replication health, always derived from the replica and ISR sets.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum Health {
    Healthy,
    UnderReplicated,
    /// No replica is in sync, so there is no leader to accept writes.
    Offline,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplicaEvent {
    Fail(BrokerId),
    Recover(BrokerId),
}

/// Producer load applied to a single partition for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Traffic {
    pub rate_per_sec: f64,
    pub message_bytes: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub base_offset: Offset,
    /// Exclusive.
    pub end_offset: Offset,
    pub messages: u64,
    pub size_bytes: u64,
    pub created_ms: u64,
    pub last_append_ms: u64,
    pub compacted: bool,
}

impl Segment {
    fn new(base_offset: Offset, now_ms: u64) -> Self {
        Segment {
            base_offset,
            end_offset: base_offset,
            messages: 0,
            size_bytes: 0,
            created_ms: now_ms,
            last_append_ms: now_ms,
            compacted: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.end_offset == self.base_offset
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retention {
    pub deleted_segments: usize,
    pub compacted_segments: usize,
}

/// Counter model of a partition log. Holds no payloads, only offsets, sizes and replica state.
///
/// Invariants: `isr ⊆ replicas`, `leader ∈ isr` whenever there is a leader, and
/// `high_watermark ≤ log_end_offset`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub idx: PartitionIdx,
    pub topic: String,
    leader: Option<BrokerId>,
    replicas: Vec<BrokerId>,
    isr: Vec<BrokerId>,
    leader_epoch: i32,
    log_end_offset: Offset,
    high_watermark: Offset,
    segments: VecDeque<Segment>,
    // fractional messages carried between ticks
    pending: f64,
}

impl Partition {
    pub fn new(topic: &str, idx: PartitionIdx, replicas: Vec<BrokerId>, now_ms: u64) -> Self {
        Partition {
            idx,
            topic: topic.to_string(),
            leader: replicas.first().copied(),
            isr: replicas.clone(),
            replicas,
            leader_epoch: 0,
            log_end_offset: 0,
            high_watermark: 0,
            segments: VecDeque::from(vec![Segment::new(0, now_ms)]),
            pending: 0.0,
        }
    }

    pub fn leader(&self) -> Option<BrokerId> {
        self.leader
    }

    pub fn replicas(&self) -> &[BrokerId] {
        &self.replicas
    }

    pub fn isr(&self) -> &[BrokerId] {
        &self.isr
    }

    pub fn leader_epoch(&self) -> i32 {
        self.leader_epoch
    }

    pub fn log_end_offset(&self) -> Offset {
        self.log_end_offset
    }

    pub fn high_watermark(&self) -> Offset {
        self.high_watermark
    }

    pub fn log_start_offset(&self) -> Offset {
        self.segments
            .front()
            .map(|s| s.base_offset)
            .unwrap_or(self.log_end_offset)
    }

    /// Retained messages.
    pub fn messages(&self) -> u64 {
        self.segments.iter().map(|s| s.messages).sum()
    }

    /// Retained bytes.
    pub fn size_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size_bytes).sum()
    }

    pub fn segments(&self) -> &VecDeque<Segment> {
        &self.segments
    }

    pub fn health(&self) -> Health {
        match self.leader {
            None => Health::Offline,
            Some(_) if self.isr.len() < self.replicas.len() => Health::UnderReplicated,
            Some(_) => Health::Healthy,
        }
    }

    /// Appends `rate * dt` messages through the leader, then moves the high watermark up to the
    /// log end offset if enough replicas are in sync. Returns the number of messages appended.
    pub fn advance(
        &mut self,
        dt: Duration,
        traffic: Traffic,
        config: &TopicConfig,
        now_ms: u64,
    ) -> u64 {
        let appended = if self.leader.is_some() {
            self.pending += traffic.rate_per_sec.max(0.0) * dt.as_secs_f64();
            let whole = self.pending.floor();
            self.pending -= whole;
            whole as u64
        } else {
            self.pending = 0.0;
            0
        };

        if appended > 0 {
            let bytes = (appended as f64
                * traffic.message_bytes as f64
                * config.compression_type.ratio())
            .round() as u64;
            self.roll_if_needed(config, now_ms);
            let active = self.active_mut(now_ms);
            active.end_offset += appended;
            active.messages += appended;
            active.size_bytes += bytes;
            active.last_append_ms = now_ms;
            self.log_end_offset += appended;
        }

        if self.isr.len() >= config.min_insync_replicas as usize {
            self.high_watermark = self.log_end_offset;
        }

        appended
    }

    fn roll_if_needed(&mut self, config: &TopicConfig, now_ms: u64) {
        let log_end_offset = self.log_end_offset;
        let active = self.active_mut(now_ms);
        let full = active.size_bytes >= config.segment_bytes;
        let aged = now_ms.saturating_sub(active.created_ms) >= config.segment_ms.max(0) as u64;
        if !active.is_empty() && (full || aged) {
            tracing::trace!(topic = %self.topic, partition = %self.idx, base_offset = log_end_offset, "roll segment");
            self.segments.push_back(Segment::new(log_end_offset, now_ms));
        }
    }

    fn active_mut(&mut self, now_ms: u64) -> &mut Segment {
        if self.segments.is_empty() {
            self.segments
                .push_back(Segment::new(self.log_end_offset, now_ms));
        }
        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }

    /// Applies the topic's cleanup policy to closed segments. Data past the high watermark is
    /// never cleaned, and the active segment is never touched.
    pub fn enforce_retention(
        &mut self,
        config: &TopicConfig,
        now_ms: u64,
        compaction_ratio: f64,
    ) -> Retention {
        let mut outcome = Retention::default();

        if config.cleanup_policy.deletes() {
            while self.segments.len() > 1 {
                let total = self.size_bytes();
                let front = &self.segments[0];
                if front.end_offset > self.high_watermark {
                    break;
                }
                let expired = config.retention_ms >= 0
                    && now_ms.saturating_sub(front.last_append_ms) > config.retention_ms as u64;
                let oversized = config.retention_bytes >= 0 && total > config.retention_bytes as u64;
                if !(expired || oversized) {
                    break;
                }
                self.segments.pop_front();
                outcome.deleted_segments += 1;
            }
        }

        if config.cleanup_policy.compacts() {
            let closed = self.segments.len().saturating_sub(1);
            let high_watermark = self.high_watermark;
            for segment in self
                .segments
                .iter_mut()
                .take(closed)
                .filter(|s| !s.compacted && s.end_offset <= high_watermark)
            {
                segment.messages = (segment.messages as f64 * compaction_ratio).ceil() as u64;
                segment.size_bytes = (segment.size_bytes as f64 * compaction_ratio).ceil() as u64;
                segment.compacted = true;
                outcome.compacted_segments += 1;
            }
        }

        if outcome != Retention::default() {
            tracing::debug!(
                topic = %self.topic,
                partition = %self.idx,
                deleted = outcome.deleted_segments,
                compacted = outcome.compacted_segments,
                log_start_offset = self.log_start_offset(),
                "cleaned log"
            );
        }
        outcome
    }

    /// Simulated replica failure or recovery. Only the ISR changes; the replica list is fixed.
    /// Returns whether anything changed.
    pub fn mutate_replication(&mut self, event: ReplicaEvent) -> bool {
        match event {
            ReplicaEvent::Fail(broker) => {
                let Some(pos) = self.isr.iter().position(|r| *r == broker) else {
                    return false;
                };
                self.isr.remove(pos);
                if self.leader == Some(broker) {
                    self.elect_leader();
                }
                tracing::debug!(topic = %self.topic, partition = %self.idx, %broker, isr = ?self.isr, leader = ?self.leader, "replica left isr");
                true
            }
            ReplicaEvent::Recover(broker) => {
                if !self.replicas.contains(&broker) || self.isr.contains(&broker) {
                    return false;
                }
                self.isr.push(broker);
                self.sort_isr();
                if self.leader.is_none() {
                    self.leader = Some(broker);
                    self.leader_epoch += 1;
                }
                tracing::debug!(topic = %self.topic, partition = %self.idx, %broker, isr = ?self.isr, leader = ?self.leader, "replica rejoined isr");
                true
            }
        }
    }

    /// Moves leadership back to `replicas[0]` if it is in sync and not already leading.
    pub fn elect_preferred_leader(&mut self) -> bool {
        match self.replicas.first().copied() {
            Some(preferred) if self.leader != Some(preferred) && self.isr.contains(&preferred) => {
                self.leader = Some(preferred);
                self.leader_epoch += 1;
                tracing::debug!(topic = %self.topic, partition = %self.idx, leader = %preferred, "preferred leader elected");
                true
            }
            _ => false,
        }
    }

    /// Replaces the replica set (replication factor change). Offsets are kept; replicas on
    /// brokers that are not live start out of sync.
    pub fn reassign(&mut self, replicas: Vec<BrokerId>, cluster: &Cluster) {
        self.isr = replicas
            .iter()
            .copied()
            .filter(|b| cluster.contains(*b))
            .collect();
        self.replicas = replicas;
        if !self.leader.map_or(false, |l| self.isr.contains(&l)) {
            self.elect_leader();
        }
    }

    fn elect_leader(&mut self) {
        let isr = &self.isr;
        self.leader = self.replicas.iter().find(|r| isr.contains(r)).copied();
        self.leader_epoch += 1;
        if self.leader.is_none() {
            tracing::warn!(topic = %self.topic, partition = %self.idx, "partition has no in-sync replica to lead");
        }
    }

    fn sort_isr(&mut self) {
        let replicas = &self.replicas;
        self.isr
            .sort_by_key(|b| replicas.iter().position(|r| r == b));
    }
}
