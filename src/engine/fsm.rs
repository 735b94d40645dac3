use crate::engine::state::broker::{Broker, BrokerId};
use crate::engine::state::group::GroupSpec;
use crate::engine::state::partition::{Offset, PartitionIdx};
use crate::engine::state::topic::TopicSpec;
use crate::governance::acl::AclRule;
use crate::governance::schema::SchemaType;

/// Every state change a caller can request of an engine, in serializable form so that panels
/// and scripted scenarios can hand them over as data.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Transition {
    AddBroker {
        broker: Broker,
    },
    RemoveBroker {
        id: BrokerId,
    },
    UpsertTopic {
        topic: TopicSpec,
    },
    RemoveTopic {
        name: String,
    },
    SetProducerRate {
        topic: String,
        rate: f64,
    },
    UpsertGroup {
        group: GroupSpec,
    },
    RemoveGroup {
        id: String,
    },
    CommitOffset {
        group: String,
        partition: PartitionIdx,
        offset: Offset,
    },
    FailReplica {
        topic: String,
        partition: PartitionIdx,
        broker: BrokerId,
    },
    RecoverReplica {
        topic: String,
        partition: PartitionIdx,
        broker: BrokerId,
    },
    RegisterSchema {
        subject: String,
        schema_type: SchemaType,
        schema: String,
    },
    AddAcl {
        acl: AclRule,
    },
}

/// A transition the runner applies just before the given tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransition {
    pub at_tick: u64,
    pub transition: Transition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_tagged() {
        let t: Transition =
            serde_json::from_str(r#"{"type":"removeBroker","id":1}"#).unwrap();
        assert_eq!(Transition::RemoveBroker { id: BrokerId(1) }, t);

        let t: Transition = serde_json::from_str(
            r#"{"type":"registerSchema","subject":"orders-value","schemaType":"AVRO","schema":"{}"}"#,
        )
        .unwrap();
        assert!(matches!(
            t,
            Transition::RegisterSchema {
                schema_type: SchemaType::Avro,
                ..
            }
        ));

        let t: ScheduledTransition = serde_json::from_str(
            r#"{"atTick":3,"transition":{"type":"upsertGroup","group":{"id":"g1","topic":"orders","members":3}}}"#,
        )
        .unwrap();
        assert_eq!(3, t.at_tick);
    }
}
