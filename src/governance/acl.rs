//! Kafka-style access control lists. Rules are stored and listed for display only; nothing in the
//! simulation consults them to reject traffic.

use derive_more::Display;

use crate::error::{BrokerSimError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ResourceType {
    Topic,
    Group,
    Cluster,
    TransactionalId,
    DelegationToken,
}

/// How `resource_name` is matched against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, Display)]
pub enum PatternType {
    #[default]
    Literal,
    Prefixed,
    /// Matches literal names, prefixes and the `*` wildcard.
    Match,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Operation {
    All,
    Read,
    Write,
    Create,
    Delete,
    Alter,
    Describe,
    ClusterAction,
    DescribeConfigs,
    AlterConfigs,
    IdempotentWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, Display)]
pub enum Permission {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRule {
    /// e.g. `User:alice`
    pub principal: String,
    pub resource_type: ResourceType,
    pub resource_name: String,
    #[serde(default)]
    pub resource_pattern_type: PatternType,
    pub operation: Operation,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default = "any_host")]
    pub host: String,
}

fn any_host() -> String {
    "*".to_string()
}

impl AclRule {
    pub fn new(
        principal: &str,
        resource_type: ResourceType,
        resource_name: &str,
        operation: Operation,
        permission: Permission,
    ) -> Self {
        AclRule {
            principal: principal.to_string(),
            resource_type,
            resource_name: resource_name.to_string(),
            resource_pattern_type: PatternType::Literal,
            operation,
            permission,
            host: any_host(),
        }
    }

    pub fn with_pattern(mut self, pattern: PatternType) -> Self {
        self.resource_pattern_type = pattern;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.principal.trim().is_empty() {
            return Err(BrokerSimError::validation("principal", "principal cannot be empty"));
        }
        if self.resource_name.trim().is_empty() {
            return Err(BrokerSimError::validation(
                "resource_name",
                "resource name cannot be empty",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(BrokerSimError::validation("host", "host cannot be empty"));
        }
        Ok(())
    }

    /// Whether this rule's resource pattern covers the named resource.
    pub fn matches(&self, resource_type: ResourceType, name: &str) -> bool {
        if self.resource_type != resource_type {
            return false;
        }
        match self.resource_pattern_type {
            PatternType::Literal => self.resource_name == "*" || self.resource_name == name,
            PatternType::Prefixed => name.starts_with(&self.resource_name),
            PatternType::Match => {
                self.resource_name == "*"
                    || self.resource_name == name
                    || name.starts_with(&self.resource_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, pattern: PatternType) -> AclRule {
        AclRule::new(
            "User:alice",
            ResourceType::Topic,
            name,
            Operation::Read,
            Permission::Allow,
        )
        .with_pattern(pattern)
    }

    #[test]
    fn validation() {
        assert!(rule("orders", PatternType::Literal).validate().is_ok());

        let mut acl = rule("orders", PatternType::Literal);
        acl.principal = "".to_string();
        assert_eq!(Some("principal"), acl.validate().unwrap_err().field());

        let acl = rule(" ", PatternType::Literal);
        assert_eq!(Some("resource_name"), acl.validate().unwrap_err().field());
    }

    #[test]
    fn literal_match() {
        let acl = rule("orders", PatternType::Literal);
        assert!(acl.matches(ResourceType::Topic, "orders"));
        assert!(!acl.matches(ResourceType::Topic, "orders-eu"));
        assert!(!acl.matches(ResourceType::Group, "orders"));
        assert!(rule("*", PatternType::Literal).matches(ResourceType::Topic, "anything"));
    }

    #[test]
    fn prefixed_match() {
        let acl = rule("orders", PatternType::Prefixed);
        assert!(acl.matches(ResourceType::Topic, "orders-eu"));
        assert!(!acl.matches(ResourceType::Topic, "payments"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let acl: AclRule = serde_json::from_str(
            r#"{"principal":"User:bob","resourceType":"Group","resourceName":"g1","operation":"Describe"}"#,
        )
        .unwrap();
        assert_eq!(PatternType::Literal, acl.resource_pattern_type);
        assert_eq!(Permission::Allow, acl.permission);
        assert_eq!("*", acl.host);
    }
}
