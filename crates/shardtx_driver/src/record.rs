//! Dynamic record model exchanged with the ORM session.

use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a persisted record.
///
/// Ids are assigned by the driver on save and start at 1. `RecordId::UNSET`
/// marks a reference that has not been assigned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    /// Placeholder for an id that has not been assigned.
    pub const UNSET: RecordId = RecordId(0);

    /// Creates a record id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if the id was assigned by a driver.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a record participates in horizontal partitioning.
///
/// Roots anchor an entity group and are placed by their own id. Children
/// live on the shard of their root. Unsharded records live in an unsharded
/// keyspace and belong to no group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityGroup {
    /// Top-level entity anchoring its own group.
    Root,
    /// Entity stored alongside its root.
    Child {
        /// Id of the owning root.
        root: RecordId,
    },
    /// Entity in an unsharded keyspace.
    Unsharded,
}

/// A row as seen through the ORM session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Table the record belongs to.
    pub table: String,
    /// Assigned id, `None` until saved.
    pub id: Option<RecordId>,
    /// Partitioning category.
    pub group: EntityGroup,
    /// Optimistic-lock version.
    pub version: u64,
    /// Column values.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Creates a new, unsaved record.
    pub fn new(table: impl Into<String>, group: EntityGroup) -> Self {
        Self {
            table: table.into(),
            id: None,
            group,
            version: 0,
            fields: BTreeMap::new(),
        }
    }

    /// Creates a new root record.
    pub fn root(table: impl Into<String>) -> Self {
        Self::new(table, EntityGroup::Root)
    }

    /// Creates a new child record owned by `root`.
    pub fn child(table: impl Into<String>, root: RecordId) -> Self {
        Self::new(table, EntityGroup::Child { root })
    }

    /// Creates a new unsharded record.
    pub fn unsharded(table: impl Into<String>) -> Self {
        Self::new(table, EntityGroup::Unsharded)
    }

    /// Sets a column value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a column value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a column value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders() {
        let record = Record::child("orders", RecordId::new(3)).with_field("sku", "A-1");
        assert_eq!(record.table, "orders");
        assert_eq!(record.id, None);
        assert_eq!(
            record.group,
            EntityGroup::Child {
                root: RecordId::new(3)
            }
        );
        assert_eq!(record.field("sku"), Some("A-1"));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn unset_id() {
        assert!(!RecordId::UNSET.is_assigned());
        assert!(RecordId::new(1).is_assigned());
        assert_eq!(RecordId::new(42).to_string(), "42");
    }
}
