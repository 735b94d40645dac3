use std::collections::BTreeSet;
use std::path::Path;

use crate::engine::fsm::ScheduledTransition;
use crate::engine::state::broker::Broker;
use crate::engine::state::group::GroupSpec;
use crate::engine::state::topic::TopicSpec;
use crate::error::{BrokerSimError, Result};

/// A broker as declared on the canvas: either a bare address, which takes its position in the
/// list as its id, or an explicit broker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BrokerEntry {
    Address(String),
    Broker(Broker),
}

/// The complete declarative configuration of one simulated cluster.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Topology {
    pub brokers: Vec<BrokerEntry>,
    pub topics: Vec<TopicSpec>,
    pub consumer_groups: Vec<GroupSpec>,
}

impl Topology {
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Self {
        Topology {
            brokers: addresses
                .iter()
                .map(|a| BrokerEntry::Address(a.as_ref().to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: TopicSpec) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.consumer_groups.push(group);
        self
    }

    pub fn brokers(&self) -> Vec<Broker> {
        self.brokers
            .iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                BrokerEntry::Address(address) => Broker::new(i as i32, address.clone()),
                BrokerEntry::Broker(broker) => broker.clone(),
            })
            .collect()
    }

    /// Checks the whole topology up front so that a bad entry leaves the engine untouched.
    pub fn validate(&self) -> Result<Vec<Broker>> {
        let brokers = self.brokers();
        let mut ids = BTreeSet::new();
        for broker in &brokers {
            if broker.address.trim().is_empty() {
                return Err(BrokerSimError::validation("address", "broker address cannot be empty"));
            }
            if !ids.insert(broker.id) {
                return Err(BrokerSimError::validation(
                    "brokers",
                    format!("duplicate broker id {}", broker.id),
                ));
            }
        }

        let mut names = BTreeSet::new();
        for topic in &self.topics {
            topic.validate(brokers.len())?;
            if !names.insert(topic.name.as_str()) {
                return Err(BrokerSimError::validation(
                    "name",
                    format!("duplicate topic {}", topic.name),
                ));
            }
        }

        let mut groups = BTreeSet::new();
        for group in &self.consumer_groups {
            group.validate()?;
            if !groups.insert(group.id.as_str()) {
                return Err(BrokerSimError::validation(
                    "id",
                    format!("duplicate consumer group {}", group.id),
                ));
            }
        }
        Ok(brokers)
    }
}

/// A topology file as read from disk: the initial topology plus events to replay while running.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    #[serde(flatten)]
    pub topology: Topology,
    #[serde(default)]
    pub events: Vec<ScheduledTransition>,
}

impl Scenario {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| BrokerSimError::ConfigError {
            file_path: path.display().to_string(),
            error_msg: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| BrokerSimError::ConfigError {
            file_path: path.display().to_string(),
            error_msg: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::engine::state::broker::BrokerId;

    #[test]
    fn addresses_get_positional_ids() {
        let topology = Topology::from_addresses(&["a:9092", "b:9092"]);
        let brokers = topology.validate().unwrap();
        assert_eq!(vec![BrokerId(0), BrokerId(1)], brokers.iter().map(|b| b.id).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_duplicates() {
        let topology: Topology = serde_json::from_str(
            r#"{"brokers":["a:9092",{"id":0,"address":"b:9092"}]}"#,
        )
        .unwrap();
        assert_eq!(Some("brokers"), topology.validate().unwrap_err().field());

        let topology = Topology::from_addresses(&["a"])
            .with_topic(TopicSpec::new("orders", 1, 1))
            .with_topic(TopicSpec::new("orders", 2, 1));
        assert_eq!(Some("name"), topology.validate().unwrap_err().field());

        let topology = Topology::from_addresses(&["a"])
            .with_group(GroupSpec::new("g1", "orders", 1))
            .with_group(GroupSpec::new("g1", "orders", 2));
        assert_eq!(Some("id"), topology.validate().unwrap_err().field());
    }

    #[test]
    fn replication_factor_checked_against_declared_brokers() {
        let topology = Topology::from_addresses(&["a", "b"]).with_topic(TopicSpec::new("orders", 1, 3));
        assert_eq!(Some("replication_factor"), topology.validate().unwrap_err().field());
    }

    #[test]
    fn load_scenario() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "brokers": ["broker-0:9092", "broker-1:9092"],
                "topics": [{{"name": "orders", "partitions": 2, "replicationFactor": 2}}],
                "consumerGroups": [{{"id": "g1", "topic": "orders", "members": 2}}],
                "events": [{{"atTick": 2, "transition": {{"type": "removeBroker", "id": 1}}}}]
            }}"#
        )
        .unwrap();

        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(2, scenario.topology.brokers().len());
        assert_eq!(1, scenario.topology.topics.len());
        assert_eq!(1, scenario.topology.consumer_groups.len());
        assert_eq!(2, scenario.events[0].at_tick);

        assert!(matches!(
            Scenario::load("/nonexistent/topology.json"),
            Err(BrokerSimError::ConfigError { .. })
        ));
    }
}
