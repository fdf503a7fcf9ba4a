//! Typed record vectors behind an object-safe facade.
//!
//! The store keeps collections of different record types in one map; the
//! cascade walk only needs ids, owners and lifecycle flags, so those are
//! exposed through [`StoredCollection`] while typed reads downcast.

use crate::model::entity::{Entity, EntityId, EntityMeta};
use crate::persist::encode_collection;
use std::any::Any;
use std::collections::HashSet;

/// Link from a dependent collection to its owner collection.
pub(crate) struct OwnerLink<T> {
    pub(crate) collection: &'static str,
    pub(crate) owner_of: fn(&T) -> EntityId,
}

pub(crate) struct Collection<T: Entity> {
    records: Vec<T>,
    owner: Option<OwnerLink<T>>,
}

impl<T: Entity> Collection<T> {
    pub(crate) fn new(records: Vec<T>, owner: Option<OwnerLink<T>>) -> Self {
        Self { records, owner }
    }

    pub(crate) fn records(&self) -> &[T] {
        &self.records
    }

    pub(crate) fn get(&self, id: EntityId) -> Option<&T> {
        self.records.iter().find(|record| record.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.records.iter_mut().find(|record| record.id() == id)
    }

    pub(crate) fn push(&mut self, record: T) {
        self.records.push(record);
    }

    pub(crate) fn owner_of(&self, record: &T) -> Option<EntityId> {
        self.owner.as_ref().map(|link| (link.owner_of)(record))
    }
}

/// Drops repeated ids (first wins) and repairs archive flags.
///
/// Returns the cleaned records and how many duplicates were dropped.
pub(crate) fn prepare_records<T: Entity>(records: Vec<T>, now_ms: i64) -> (Vec<T>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let total = records.len();
    let cleaned: Vec<T> = records
        .into_iter()
        .filter(|record| seen.insert(record.id()))
        .map(|mut record| {
            record.meta_mut().normalize_archive_state(now_ms);
            record
        })
        .collect();
    let dropped = total - cleaned.len();
    (cleaned, dropped)
}

/// Type-erased view used by cascades, persistence and snapshots.
pub(crate) trait StoredCollection: Send {
    fn name(&self) -> &'static str;
    fn owner_collection(&self) -> Option<&'static str>;
    fn len(&self) -> usize;
    fn meta_of(&self, id: EntityId) -> Option<EntityMeta>;
    fn owned_by(&self, owner: EntityId) -> Vec<EntityId>;
    fn archive(&mut self, id: EntityId, at: i64) -> bool;
    fn restore(&mut self, id: EntityId) -> bool;
    fn remove(&mut self, id: EntityId) -> bool;
    fn archived_ids(&self) -> Vec<EntityId>;
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error>;
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
    /// Decodes a snapshot array without touching live records.
    fn stage_json(&self, value: serde_json::Value, now_ms: i64) -> Result<Box<dyn Any>, String>;
    /// Replaces live records with a value produced by `stage_json`.
    fn install(&mut self, staged: Box<dyn Any>) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> StoredCollection for Collection<T> {
    fn name(&self) -> &'static str {
        T::COLLECTION
    }

    fn owner_collection(&self) -> Option<&'static str> {
        self.owner.as_ref().map(|link| link.collection)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn meta_of(&self, id: EntityId) -> Option<EntityMeta> {
        self.get(id).map(|record| record.meta().clone())
    }

    fn owned_by(&self, owner: EntityId) -> Vec<EntityId> {
        let Some(link) = self.owner.as_ref() else {
            return Vec::new();
        };
        self.records
            .iter()
            .filter(|record| (link.owner_of)(record) == owner)
            .map(Entity::id)
            .collect()
    }

    fn archive(&mut self, id: EntityId, at: i64) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.meta_mut().archive(at);
                true
            }
            None => false,
        }
    }

    fn restore(&mut self, id: EntityId) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.meta_mut().restore();
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: EntityId) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.id() != id);
        self.records.len() != before
    }

    fn archived_ids(&self) -> Vec<EntityId> {
        self.records
            .iter()
            .filter(|record| record.is_archived())
            .map(Entity::id)
            .collect()
    }

    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        encode_collection(&self.records)
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.records)
    }

    fn stage_json(&self, value: serde_json::Value, now_ms: i64) -> Result<Box<dyn Any>, String> {
        let records: Vec<T> = serde_json::from_value(value).map_err(|err| err.to_string())?;
        let (records, dropped) = prepare_records(records, now_ms);
        if dropped > 0 {
            return Err(format!("{dropped} duplicate id(s)"));
        }
        Ok(Box::new(records))
    }

    fn install(&mut self, staged: Box<dyn Any>) -> bool {
        match staged.downcast::<Vec<T>>() {
            Ok(records) => {
                self.records = *records;
                true
            }
            Err(_) => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
