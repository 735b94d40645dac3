//! ACL rules and Schema-Registry subjects owned by one simulated cluster. Validated on insert,
//! then read-only; the tick never touches them.

pub mod acl;
pub mod schema;

use crate::error::Result;
use acl::{AclRule, ResourceType};
use schema::{RegisteredSchema, SchemaRegistry, SchemaType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Governance {
    acls: Vec<AclRule>,
    schemas: SchemaRegistry,
}

impl Governance {
    /// Stores a rule. Duplicate and overlapping rules are kept as given.
    #[tracing::instrument(skip(self))]
    pub fn add_acl(&mut self, rule: AclRule) -> Result<()> {
        rule.validate()?;
        self.acls.push(rule);
        Ok(())
    }

    pub fn acls(&self) -> &[AclRule] {
        &self.acls
    }

    pub fn matching_acls(&self, resource_type: ResourceType, name: &str) -> Vec<&AclRule> {
        self.acls
            .iter()
            .filter(|rule| rule.matches(resource_type, name))
            .collect()
    }

    #[tracing::instrument(skip(self, schema))]
    pub fn register_schema(
        &mut self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> Result<RegisteredSchema> {
        self.schemas.register(subject, schema_type, schema)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }
}

#[cfg(test)]
mod tests {
    use super::acl::{Operation, PatternType, Permission};
    use super::*;

    #[test]
    fn duplicate_acls_are_kept() {
        let mut governance = Governance::default();
        let rule = AclRule::new(
            "User:alice",
            ResourceType::Topic,
            "orders",
            Operation::Write,
            Permission::Deny,
        );
        governance.add_acl(rule.clone()).unwrap();
        governance.add_acl(rule).unwrap();
        governance
            .add_acl(
                AclRule::new(
                    "User:*",
                    ResourceType::Topic,
                    "ord",
                    Operation::Read,
                    Permission::Allow,
                )
                .with_pattern(PatternType::Prefixed),
            )
            .unwrap();

        assert_eq!(3, governance.acls().len());
        assert_eq!(3, governance.matching_acls(ResourceType::Topic, "orders").len());
        assert_eq!(1, governance.matching_acls(ResourceType::Topic, "ordinal").len());
        assert!(governance.matching_acls(ResourceType::Group, "orders").is_empty());
    }

    #[test]
    fn invalid_acl_is_not_stored() {
        let mut governance = Governance::default();
        let rule = AclRule::new("", ResourceType::Cluster, "kafka-cluster", Operation::All, Permission::Allow);
        assert!(governance.add_acl(rule).is_err());
        assert!(governance.acls().is_empty());
    }

    #[test]
    fn schemas_round_trip() {
        let mut governance = Governance::default();
        governance
            .register_schema("orders-value", SchemaType::Avro, "schemaA")
            .unwrap();
        let second = governance
            .register_schema("orders-value", SchemaType::Avro, "schemaB")
            .unwrap();
        assert_eq!(2, second.version);
        assert_eq!(
            "schemaA",
            governance.schemas().get("orders-value", 1).unwrap().schema
        );
    }
}
