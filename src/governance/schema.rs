//! Schema-Registry subjects: an append-only version history per subject name.

use std::collections::BTreeMap;

use derive_more::Display;

use crate::error::{BrokerSimError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    #[display(fmt = "AVRO")]
    Avro,
    #[display(fmt = "JSON")]
    Json,
    #[display(fmt = "PROTOBUF")]
    Protobuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredSchema {
    /// Unique across every subject in the registry.
    pub id: u32,
    pub subject: String,
    /// Starts at 1 for each subject.
    pub version: u32,
    pub schema_type: SchemaType,
    pub schema: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    subjects: BTreeMap<String, Vec<RegisteredSchema>>,
    next_id: u32,
}

impl SchemaRegistry {
    /// Appends a new version to `subject`. Earlier versions are never modified.
    pub fn register(
        &mut self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> Result<RegisteredSchema> {
        if subject.trim().is_empty() {
            return Err(BrokerSimError::validation("subject", "subject cannot be empty"));
        }
        if schema.trim().is_empty() {
            return Err(BrokerSimError::validation("schema", "schema cannot be empty"));
        }

        let versions = self.subjects.entry(subject.to_string()).or_default();
        self.next_id += 1;
        let registered = RegisteredSchema {
            id: self.next_id,
            subject: subject.to_string(),
            version: versions.last().map_or(1, |s| s.version + 1),
            schema_type,
            schema: schema.to_string(),
        };
        versions.push(registered.clone());
        tracing::debug!(subject, version = registered.version, id = registered.id, "registered schema");
        Ok(registered)
    }

    pub fn get(&self, subject: &str, version: u32) -> Option<&RegisteredSchema> {
        self.subjects
            .get(subject)?
            .iter()
            .find(|s| s.version == version)
    }

    pub fn latest(&self, subject: &str) -> Option<&RegisteredSchema> {
        self.subjects.get(subject)?.last()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.keys().cloned().collect()
    }

    pub fn versions(&self, subject: &str) -> Vec<u32> {
        self.subjects
            .get(subject)
            .map(|versions| versions.iter().map(|s| s.version).collect())
            .unwrap_or_default()
    }

    /// Every version of every subject, ordered by subject then version.
    pub fn all(&self) -> impl Iterator<Item = &RegisteredSchema> {
        self.subjects.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_increment_per_subject() {
        let mut registry = SchemaRegistry::default();
        let a = registry
            .register("orders-value", SchemaType::Avro, "schemaA")
            .unwrap();
        let b = registry
            .register("orders-value", SchemaType::Avro, "schemaB")
            .unwrap();
        let other = registry
            .register("payments-value", SchemaType::Json, "{}")
            .unwrap();

        assert_eq!((1, 2, 1), (a.version, b.version, other.version));
        assert_eq!(vec![1, 2], registry.versions("orders-value"));
        assert_eq!("schemaA", registry.get("orders-value", 1).unwrap().schema);
        assert_eq!("schemaB", registry.latest("orders-value").unwrap().schema);
        assert_eq!(
            vec!["orders-value".to_string(), "payments-value".to_string()],
            registry.subjects()
        );
        assert_eq!(3, registry.all().count());
    }

    #[test]
    fn ids_are_unique_across_subjects() {
        let mut registry = SchemaRegistry::default();
        let a = registry.register("a", SchemaType::Protobuf, "message A {}").unwrap();
        let b = registry.register("b", SchemaType::Protobuf, "message B {}").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejects_empty_fields() {
        let mut registry = SchemaRegistry::default();
        let err = registry.register("", SchemaType::Avro, "x").unwrap_err();
        assert_eq!(Some("subject"), err.field());
        let err = registry.register("s", SchemaType::Avro, "  ").unwrap_err();
        assert_eq!(Some("schema"), err.field());
        assert!(registry.subjects().is_empty());
    }

    #[test]
    fn unknown_subject() {
        let registry = SchemaRegistry::default();
        assert!(registry.latest("missing").is_none());
        assert!(registry.get("missing", 1).is_none());
        assert!(registry.versions("missing").is_empty());
    }
}
