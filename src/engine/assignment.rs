//! Partition assignment for consumer groups.
//!
//! Strategies are pure functions of the member and partition sets: both are sorted before
//! assignment, so identical inputs always produce identical assignments. Every member gets an
//! entry, possibly empty, and every partition is assigned to exactly one member.

use std::collections::BTreeMap;

use crate::engine::state::partition::PartitionIdx;

pub type MemberId = String;
pub type Assignment = BTreeMap<MemberId, Vec<PartitionIdx>>;

pub trait AssignmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn assign(&self, members: &[MemberId], partitions: &[PartitionIdx]) -> Assignment;
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Range,
    RoundRobin,
}

impl Strategy {
    pub fn strategy(self) -> Box<dyn AssignmentStrategy> {
        match self {
            Strategy::Range => Box::new(RangeStrategy),
            Strategy::RoundRobin => Box::new(RoundRobinStrategy),
        }
    }
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut items = items.to_vec();
    items.sort();
    items.dedup();
    items
}

/// Contiguous ranges: the first `partitions % members` members get one extra partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeStrategy;

impl AssignmentStrategy for RangeStrategy {
    fn name(&self) -> &'static str {
        "range"
    }

    fn assign(&self, members: &[MemberId], partitions: &[PartitionIdx]) -> Assignment {
        let members = sorted(members);
        let partitions = sorted(partitions);
        let mut result: Assignment = members.iter().map(|m| (m.clone(), vec![])).collect();
        if members.is_empty() {
            return result;
        }

        let base = partitions.len() / members.len();
        let extra = partitions.len() % members.len();
        let mut remaining = partitions.as_slice();
        for (i, member) in members.iter().enumerate() {
            let size = base + usize::from(i < extra);
            let (range, rest) = remaining.split_at(size);
            result.insert(member.clone(), range.to_vec());
            remaining = rest;
        }
        result
    }
}

/// Deals partitions out one at a time in member order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinStrategy;

impl AssignmentStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn assign(&self, members: &[MemberId], partitions: &[PartitionIdx]) -> Assignment {
        let members = sorted(members);
        let mut result: Assignment = members.iter().map(|m| (m.clone(), vec![])).collect();
        if members.is_empty() {
            return result;
        }

        for (i, partition) in sorted(partitions).into_iter().enumerate() {
            if let Some(assigned) = result.get_mut(&members[i % members.len()]) {
                assigned.push(partition);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn members(n: usize) -> Vec<MemberId> {
        (0..n).map(|i| format!("consumer-{i}")).collect()
    }

    fn partitions(n: i32) -> Vec<PartitionIdx> {
        (0..n).map(PartitionIdx).collect()
    }

    fn sizes(assignment: &Assignment) -> Vec<usize> {
        assignment.values().map(Vec::len).collect()
    }

    fn assert_complete(assignment: &Assignment, n: i32) {
        let assigned: Vec<PartitionIdx> = assignment.values().flatten().copied().collect();
        let unique: BTreeSet<PartitionIdx> = assigned.iter().copied().collect();
        assert_eq!(assigned.len(), unique.len(), "overlapping assignment");
        assert_eq!(partitions(n), unique.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn range_uneven_distribution() {
        let assignment = RangeStrategy.assign(&members(3), &partitions(7));
        assert_eq!(vec![3, 2, 2], sizes(&assignment));
        assert_eq!(
            partitions(3),
            assignment["consumer-0"]
        );
        assert_eq!(vec![PartitionIdx(3), PartitionIdx(4)], assignment["consumer-1"]);
        assert_eq!(vec![PartitionIdx(5), PartitionIdx(6)], assignment["consumer-2"]);
        assert_complete(&assignment, 7);
    }

    #[test]
    fn range_more_members_than_partitions() {
        let assignment = RangeStrategy.assign(&members(4), &partitions(2));
        assert_eq!(vec![1, 1, 0, 0], sizes(&assignment));
        assert_complete(&assignment, 2);
    }

    #[test]
    fn range_is_order_independent() {
        let mut shuffled = members(5);
        shuffled.reverse();
        let mut ps = partitions(11);
        ps.reverse();
        assert_eq!(
            RangeStrategy.assign(&members(5), &partitions(11)),
            RangeStrategy.assign(&shuffled, &ps)
        );
    }

    #[test]
    fn range_covers_every_partition() {
        for m in 1..8 {
            for p in 0..20 {
                let assignment = RangeStrategy.assign(&members(m), &partitions(p));
                assert_complete(&assignment, p);
                let sizes = sizes(&assignment);
                let max = sizes.iter().max().copied().unwrap_or(0);
                let min = sizes.iter().min().copied().unwrap_or(0);
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn no_members() {
        assert!(RangeStrategy.assign(&[], &partitions(3)).is_empty());
        assert!(RoundRobinStrategy.assign(&[], &partitions(3)).is_empty());
    }

    #[test]
    fn round_robin_deals_partitions() {
        let assignment = RoundRobinStrategy.assign(&members(3), &partitions(7));
        assert_eq!(
            vec![PartitionIdx(0), PartitionIdx(3), PartitionIdx(6)],
            assignment["consumer-0"]
        );
        assert_eq!(vec![3, 2, 2], sizes(&assignment));
        assert_complete(&assignment, 7);
    }

    #[test]
    fn strategy_names() {
        assert_eq!("range", Strategy::Range.strategy().name());
        assert_eq!("roundrobin", Strategy::RoundRobin.strategy().name());
    }
}
