use derive_more::Display;

use crate::engine::state::partition::PartitionIdx;

#[derive(
    Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Display,
)]
#[serde(transparent)]
pub struct BrokerId(pub i32);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Broker {
    pub id: BrokerId,
    pub address: String,
}

impl Broker {
    pub fn new(id: i32, address: impl Into<String>) -> Self {
        Self {
            id: BrokerId(id),
            address: address.into(),
        }
    }
}

/// The live broker set, kept ordered by id so placement is reproducible.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    brokers: Vec<Broker>,
}

impl Cluster {
    pub fn new(brokers: Vec<Broker>) -> Self {
        let mut cluster = Cluster::default();
        for broker in brokers {
            cluster.add(broker);
        }
        cluster
    }

    /// Adds a broker, or updates its address if it is already present. Returns true if it was new.
    pub fn add(&mut self, broker: Broker) -> bool {
        match self.brokers.binary_search_by_key(&broker.id, |b| b.id) {
            Ok(pos) => {
                self.brokers[pos].address = broker.address;
                false
            }
            Err(pos) => {
                self.brokers.insert(pos, broker);
                true
            }
        }
    }

    pub fn remove(&mut self, id: BrokerId) -> Option<Broker> {
        self.brokers
            .binary_search_by_key(&id, |b| b.id)
            .ok()
            .map(|pos| self.brokers.remove(pos))
    }

    pub fn contains(&self, id: BrokerId) -> bool {
        self.brokers.binary_search_by_key(&id, |b| b.id).is_ok()
    }

    pub fn ids(&self) -> Vec<BrokerId> {
        self.brokers.iter().map(|b| b.id).collect()
    }

    pub fn brokers(&self) -> &[Broker] {
        &self.brokers
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }

    /// Round-robin placement: the first `replication_factor` brokers, rotated by partition index.
    /// `replicas[0]` is the preferred leader.
    pub fn place_replicas(&self, idx: PartitionIdx, replication_factor: usize) -> Vec<BrokerId> {
        let n = self.brokers.len();
        if n == 0 {
            return vec![];
        }
        let start = idx.0.max(0) as usize;
        (0..replication_factor.min(n))
            .map(|j| self.brokers[(start + j) % n].id)
            .collect()
    }
}
