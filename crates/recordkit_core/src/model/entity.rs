//! Entity metadata and record contracts.
//!
//! # Responsibility
//! - Define identity and lifecycle fields carried by every record.
//! - Define how records name their collection, their owner, and the facets
//!   the query layer filters and sorts on.
//!
//! # Invariants
//! - `id` is generated once and never reused within a collection.
//! - `archived_at` is `Some` exactly when `archived` is `true`.
//! - Timestamps are Unix epoch milliseconds.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for every record.
pub type EntityId = Uuid;

/// `created_at` value meaning "let the store stamp it".
pub const UNASSIGNED_TIMESTAMP: i64 = 0;

/// Identity and lifecycle fields shared by all record types.
///
/// Records embed this with `#[serde(flatten)]`, so the wire shape is a flat
/// JSON object (`id`, `created_at`, `archived`, `archived_at`, domain fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: EntityId,
    pub created_at: i64,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub archived_at: Option<i64>,
}

impl EntityMeta {
    /// Metadata with a generated id and an unassigned creation time.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Metadata with a caller-provided id, used by import paths.
    pub fn with_id(id: EntityId) -> Self {
        Self {
            id,
            created_at: UNASSIGNED_TIMESTAMP,
            archived: false,
            archived_at: None,
        }
    }

    /// Metadata with neither id nor timestamp; the store assigns both.
    pub fn unassigned() -> Self {
        Self::with_id(Uuid::nil())
    }

    pub fn archive(&mut self, at: i64) {
        self.archived = true;
        self.archived_at = Some(at);
    }

    pub fn restore(&mut self) {
        self.archived = false;
        self.archived_at = None;
    }

    pub fn is_active(&self) -> bool {
        !self.archived
    }

    /// Repairs `archived`/`archived_at` drift coming from callers or old blobs.
    pub(crate) fn normalize_archive_state(&mut self, now_ms: i64) {
        match (self.archived, self.archived_at) {
            (true, None) => self.archived_at = Some(now_ms),
            (false, Some(_)) => self.archived_at = None,
            _ => {}
        }
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted record living in one named collection.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + 'static {
    /// Collection name; also the suffix of the persistence key.
    const COLLECTION: &'static str;

    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn id(&self) -> EntityId {
        self.meta().id
    }

    fn created_at(&self) -> i64 {
        self.meta().created_at
    }

    fn is_archived(&self) -> bool {
        self.meta().archived
    }

    fn archived_at(&self) -> Option<i64> {
        self.meta().archived_at
    }
}

/// A record that references an owner record by id.
///
/// Ownership is by reference: the dependent collection is stored under its
/// own key and queried independently. Archive and permanent delete of the
/// owner cascade to dependents; restore does not.
pub trait Dependent: Entity {
    type Owner: Entity;

    fn owner_id(&self) -> EntityId;
}

/// Facets a record exposes to filtering and sorting.
pub trait Queryable: Entity {
    /// Primary string sort key.
    fn display_name(&self) -> &str;

    /// Category/tag values used by the category predicate.
    fn categories(&self) -> Vec<&str> {
        Vec::new()
    }

    /// The designated boolean field (favorite, watched, completed, ...).
    fn flag(&self) -> Option<bool> {
        None
    }

    /// The designated numeric field (rating, price, weight, ...).
    fn numeric(&self) -> Option<f64> {
        None
    }

    /// The designated date field; defaults to the creation time.
    fn date(&self) -> Option<i64> {
        Some(self.created_at())
    }

    /// Fields searched by the free-text predicate.
    fn search_fields(&self) -> Vec<&str>;
}

#[cfg(test)]
mod tests {
    use super::EntityMeta;

    #[test]
    fn archive_and_restore_keep_timestamp_in_sync() {
        let mut meta = EntityMeta::new();
        assert!(meta.is_active());

        meta.archive(1_700);
        assert!(meta.archived);
        assert_eq!(meta.archived_at, Some(1_700));

        meta.restore();
        assert!(meta.is_active());
        assert_eq!(meta.archived_at, None);
    }

    #[test]
    fn normalize_repairs_drifted_archive_state() {
        let mut meta = EntityMeta::new();
        meta.archived = true;
        meta.normalize_archive_state(99);
        assert_eq!(meta.archived_at, Some(99));

        meta.archived = false;
        meta.normalize_archive_state(100);
        assert_eq!(meta.archived_at, None);
    }

    #[test]
    fn unassigned_meta_has_nil_id() {
        assert!(EntityMeta::unassigned().id.is_nil());
        assert!(!EntityMeta::new().id.is_nil());
    }
}
