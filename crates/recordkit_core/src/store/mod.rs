//! Authoritative in-memory entity store.
//!
//! # Responsibility
//! - Own every registered collection and route all mutations through one
//!   place.
//! - Cascade archive and permanent delete from owners to dependents.
//! - Persist touched collections and emit one change event per operation.
//!
//! # Invariants
//! - Record ids are unique within a collection.
//! - Archive cascades transitively with one shared `archived_at`; restore
//!   never cascades.
//! - Memory is updated before the persistence write; a failed write leaves
//!   memory authoritative and is reported, not swallowed.
//! - Reads never persist and never notify.

mod collection;
pub mod events;

use crate::clock::{Clock, SystemClock};
use crate::kv::KeyValueStore;
use crate::model::entity::{Dependent, Entity, EntityId, UNASSIGNED_TIMESTAMP};
use crate::persist::{
    CollectionWrite, DecodeWarning, PersistError, PersistResult, PersistenceAdapter,
};
use collection::{prepare_records, Collection, OwnerLink, StoredCollection};
use events::{ChangeKind, StoreEvent, Subscribers};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const DEFAULT_NAMESPACE: &str = "recordkit";

pub type StoreResult<T> = Result<T, StoreError>;

/// Store construction options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix of every persistence key (`<namespace>/<collection>`).
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Result of a command addressed at one record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// No record with that id; nothing was written or notified.
    NotFound,
}

impl Outcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Summary of a snapshot import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub collections: Vec<&'static str>,
    /// Snapshot entries that matched no registered collection.
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub enum StoreError {
    UnknownCollection(&'static str),
    DuplicateCollection(&'static str),
    UnregisteredOwner {
        collection: &'static str,
        owner: &'static str,
    },
    DuplicateId {
        collection: &'static str,
        id: EntityId,
    },
    InvalidSnapshot {
        collection: String,
        message: String,
    },
    /// The change is applied in memory and was notified, but is not durable.
    WriteFailed {
        ids: Vec<EntityId>,
        source: PersistError,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCollection(name) => write!(f, "collection `{name}` is not registered"),
            Self::DuplicateCollection(name) => {
                write!(f, "collection `{name}` is already registered")
            }
            Self::UnregisteredOwner { collection, owner } => write!(
                f,
                "collection `{collection}` depends on `{owner}`, which is not registered"
            ),
            Self::DuplicateId { collection, id } => {
                write!(f, "id {id} already exists in `{collection}`")
            }
            Self::InvalidSnapshot {
                collection,
                message,
            } => write!(f, "invalid snapshot entry `{collection}`: {message}"),
            Self::WriteFailed { source, .. } => write!(
                f,
                "change applied in memory but not persisted: {source}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::WriteFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Single source of truth for every registered collection.
pub struct EntityStore<K: KeyValueStore> {
    adapter: PersistenceAdapter<K>,
    clock: Arc<dyn Clock>,
    collections: BTreeMap<&'static str, Box<dyn StoredCollection>>,
    revision: u64,
    subscribers: Subscribers<StoreEvent>,
    load_warnings: Vec<DecodeWarning>,
    /// Collections whose last write failed; retried with the next commit.
    unsaved: BTreeSet<&'static str>,
    last_write_error: Option<String>,
}

impl<K: KeyValueStore> EntityStore<K> {
    pub fn new(kv: K, config: StoreConfig) -> Self {
        Self::with_clock(kv, config, Arc::new(SystemClock))
    }

    pub fn with_clock(kv: K, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            adapter: PersistenceAdapter::new(kv, config.namespace),
            clock,
            collections: BTreeMap::new(),
            revision: 0,
            subscribers: Subscribers::new(),
            load_warnings: Vec::new(),
            unsaved: BTreeSet::new(),
            last_write_error: None,
        }
    }

    /// Registers an independent collection and loads its persisted records.
    pub fn register<T: Entity>(&mut self) -> StoreResult<usize> {
        self.install_collection::<T>(None)
    }

    /// Registers a dependent collection; its owner must be registered first.
    pub fn register_dependent<D: Dependent>(&mut self) -> StoreResult<usize> {
        let owner = <D::Owner as Entity>::COLLECTION;
        if !self.collections.contains_key(owner) {
            return Err(StoreError::UnregisteredOwner {
                collection: D::COLLECTION,
                owner,
            });
        }
        self.install_collection::<D>(Some(OwnerLink {
            collection: owner,
            owner_of: <D as Dependent>::owner_id,
        }))
    }

    /// Subscribes to change events. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<StoreEvent> {
        self.subscribers.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Collections that came back empty because their blob was unreadable.
    pub fn load_warnings(&self) -> &[DecodeWarning] {
        &self.load_warnings
    }

    /// Error of the latest failed write, cleared once everything is durable.
    pub fn last_write_error(&self) -> Option<&str> {
        self.last_write_error.as_deref()
    }

    /// `true` when every in-memory change has reached the persistence port.
    pub fn is_durable(&self) -> bool {
        self.unsaved.is_empty()
    }

    pub fn kv(&self) -> &K {
        self.adapter.kv()
    }

    pub fn persistence_key<T: Entity>(&self) -> String {
        self.adapter.key_for(T::COLLECTION)
    }

    /// Every record of a collection, archived included, in insertion order.
    pub fn records<T: Entity>(&self) -> StoreResult<&[T]> {
        Ok(self.typed::<T>()?.records())
    }

    pub fn get<T: Entity>(&self, id: EntityId) -> StoreResult<Option<&T>> {
        Ok(self.typed::<T>()?.get(id))
    }

    /// Non-archived records in insertion order.
    pub fn active_of<T: Entity>(&self) -> StoreResult<Vec<&T>> {
        Ok(self
            .typed::<T>()?
            .records()
            .iter()
            .filter(|record| !record.is_archived())
            .collect())
    }

    /// Archived records, most recently archived first.
    pub fn archived_of<T: Entity>(&self) -> StoreResult<Vec<&T>> {
        let mut archived: Vec<&T> = self
            .typed::<T>()?
            .records()
            .iter()
            .filter(|record| record.is_archived())
            .collect();
        // Stable sort: equal timestamps keep insertion order.
        archived.sort_by(|a, b| b.archived_at().cmp(&a.archived_at()));
        Ok(archived)
    }

    /// Dependents referencing `owner`, ordered by creation time.
    pub fn dependents_of<D: Dependent>(
        &self,
        owner: EntityId,
        include_archived: bool,
    ) -> StoreResult<Vec<&D>> {
        let collection = self.typed::<D>()?;
        let mut dependents: Vec<&D> = collection
            .records()
            .iter()
            .filter(|record| collection.owner_of(record) == Some(owner))
            .filter(|record| include_archived || !record.is_archived())
            .collect();
        dependents.sort_by_key(|record| record.created_at());
        Ok(dependents)
    }

    /// Appends a record, assigning an id and creation time when absent.
    pub fn create<T: Entity>(&mut self, mut record: T) -> StoreResult<EntityId> {
        let now = self.clock.now_ms();
        let meta = record.meta_mut();
        if meta.id.is_nil() {
            meta.id = Uuid::new_v4();
        }
        if meta.created_at == UNASSIGNED_TIMESTAMP {
            meta.created_at = now;
        }
        meta.normalize_archive_state(now);
        let id = meta.id;

        let collection = self.typed_mut::<T>()?;
        if collection.get(id).is_some() {
            return Err(StoreError::DuplicateId {
                collection: T::COLLECTION,
                id,
            });
        }
        collection.push(record);

        self.commit(ChangeKind::Created, BTreeSet::from([T::COLLECTION]), vec![id])?;
        Ok(id)
    }

    /// Replaces the domain fields of record `id` with `new_shape`.
    ///
    /// Identity and lifecycle fields (`id`, `created_at`, `archived`,
    /// `archived_at`) are kept from the stored record; archive state only
    /// changes through [`Self::archive`] and [`Self::restore`].
    pub fn update<T: Entity>(&mut self, id: EntityId, mut new_shape: T) -> StoreResult<Outcome> {
        let collection = self.typed_mut::<T>()?;
        let Some(current) = collection.get_mut(id) else {
            debug!("event=store_update module=store status=not_found collection={} id={id}", T::COLLECTION);
            return Ok(Outcome::NotFound);
        };
        *new_shape.meta_mut() = current.meta().clone();
        *current = new_shape;

        self.commit(ChangeKind::Updated, BTreeSet::from([T::COLLECTION]), vec![id])?;
        Ok(Outcome::Applied)
    }

    /// Soft-deletes a record and, transitively, every dependent of it.
    ///
    /// All touched records share one `archived_at`. Re-archiving an archived
    /// record keeps its original timestamp and re-syncs its dependents to it.
    pub fn archive<T: Entity>(&mut self, id: EntityId) -> StoreResult<Outcome> {
        let Some(meta) = self.erased(T::COLLECTION)?.meta_of(id) else {
            debug!("event=store_archive module=store status=not_found collection={} id={id}", T::COLLECTION);
            return Ok(Outcome::NotFound);
        };
        let at = match (meta.archived, meta.archived_at) {
            (true, Some(at)) => at,
            _ => self.clock.now_ms(),
        };

        self.erased_mut(T::COLLECTION)?.archive(id, at);
        let mut touched = BTreeSet::from([T::COLLECTION]);
        let mut ids = vec![id];
        self.cascade(T::COLLECTION, id, &mut touched, &mut ids, |collection, dependent| {
            collection.archive(dependent, at);
        });

        self.commit(ChangeKind::Archived, touched, ids)?;
        Ok(Outcome::Applied)
    }

    /// Clears the archive flag on this record only; dependents stay archived.
    pub fn restore<T: Entity>(&mut self, id: EntityId) -> StoreResult<Outcome> {
        if !self.erased_mut(T::COLLECTION)?.restore(id) {
            debug!("event=store_restore module=store status=not_found collection={} id={id}", T::COLLECTION);
            return Ok(Outcome::NotFound);
        }
        self.commit(ChangeKind::Restored, BTreeSet::from([T::COLLECTION]), vec![id])?;
        Ok(Outcome::Applied)
    }

    /// Removes a record and every transitive dependent, in memory and in
    /// storage. Irreversible.
    pub fn delete_forever<T: Entity>(&mut self, id: EntityId) -> StoreResult<Outcome> {
        if !self.erased_mut(T::COLLECTION)?.remove(id) {
            debug!("event=store_delete module=store status=not_found collection={} id={id}", T::COLLECTION);
            return Ok(Outcome::NotFound);
        }
        let mut touched = BTreeSet::from([T::COLLECTION]);
        let mut ids = vec![id];
        self.cascade(T::COLLECTION, id, &mut touched, &mut ids, |collection, dependent| {
            collection.remove(dependent);
        });

        self.commit(ChangeKind::Deleted, touched, ids)?;
        Ok(Outcome::Applied)
    }

    /// Permanently deletes every archived record in every collection, plus
    /// the dependents of those records. Returns how many records were removed.
    ///
    /// With nothing archived this is a no-op: no write, no event.
    pub fn clear_archive(&mut self) -> StoreResult<usize> {
        let archived: Vec<(&'static str, EntityId)> = self
            .collections
            .values()
            .flat_map(|collection| {
                let name = collection.name();
                collection
                    .archived_ids()
                    .into_iter()
                    .map(move |id| (name, id))
            })
            .collect();
        if archived.is_empty() {
            return Ok(0);
        }

        let mut touched = BTreeSet::new();
        let mut ids = Vec::new();
        for (name, id) in archived {
            let Some(collection) = self.collections.get_mut(name) else {
                continue;
            };
            // Already gone when an archived owner was removed first.
            if !collection.remove(id) {
                continue;
            }
            touched.insert(name);
            ids.push(id);
            self.cascade(name, id, &mut touched, &mut ids, |collection, dependent| {
                collection.remove(dependent);
            });
        }

        let removed = ids.len();
        self.commit(ChangeKind::ArchiveCleared, touched, ids)?;
        Ok(removed)
    }

    /// JSON object mapping collection name to its record array.
    pub fn export_snapshot(&self) -> StoreResult<serde_json::Value> {
        let mut snapshot = serde_json::Map::new();
        for (name, collection) in &self.collections {
            let records = collection
                .to_json()
                .map_err(|err| StoreError::InvalidSnapshot {
                    collection: (*name).to_string(),
                    message: err.to_string(),
                })?;
            snapshot.insert((*name).to_string(), records);
        }
        Ok(serde_json::Value::Object(snapshot))
    }

    /// Replaces registered collections named in `snapshot`.
    ///
    /// Every entry is decoded before anything is replaced, so a bad entry
    /// leaves the store untouched. Collections absent from the snapshot are
    /// kept; entries naming unknown collections are skipped.
    pub fn import_snapshot(&mut self, snapshot: serde_json::Value) -> StoreResult<ImportReport> {
        let serde_json::Value::Object(entries) = snapshot else {
            return Err(StoreError::InvalidSnapshot {
                collection: "<root>".to_string(),
                message: "expected a JSON object".to_string(),
            });
        };

        let now = self.clock.now_ms();
        let mut staged = Vec::new();
        let mut skipped = Vec::new();
        for (name, records) in entries {
            match self.collections.get(name.as_str()) {
                Some(collection) => {
                    let value = collection.stage_json(records, now).map_err(|message| {
                        StoreError::InvalidSnapshot {
                            collection: name.clone(),
                            message,
                        }
                    })?;
                    staged.push((collection.name(), value));
                }
                None => {
                    warn!("event=snapshot_import module=store status=warn skipped_collection={name}");
                    skipped.push(name);
                }
            }
        }

        let mut touched = BTreeSet::new();
        for (name, value) in staged {
            if let Some(collection) = self.collections.get_mut(name) {
                if collection.install(value) {
                    touched.insert(name);
                }
            }
        }

        let collections = touched.iter().copied().collect();
        self.commit(ChangeKind::Imported, touched, Vec::new())?;
        Ok(ImportReport {
            collections,
            skipped,
        })
    }

    fn install_collection<T: Entity>(&mut self, owner: Option<OwnerLink<T>>) -> StoreResult<usize> {
        if self.collections.contains_key(T::COLLECTION) {
            return Err(StoreError::DuplicateCollection(T::COLLECTION));
        }

        let loaded = self.adapter.load::<T>(T::COLLECTION);
        if let Some(warning) = loaded.warning {
            self.load_warnings.push(warning);
        }
        let (records, dropped) = prepare_records(loaded.records, self.clock.now_ms());
        if dropped > 0 {
            let key = self.adapter.key_for(T::COLLECTION);
            warn!("event=collection_register module=store status=warn key={key} duplicate_ids={dropped}");
            self.load_warnings.push(DecodeWarning {
                key,
                message: format!("dropped {dropped} record(s) with duplicate ids"),
            });
        }

        let count = records.len();
        let owner_name = owner.as_ref().map_or("-", |link| link.collection);
        self.collections
            .insert(T::COLLECTION, Box::new(Collection::new(records, owner)));
        info!(
            "event=collection_register module=store status=ok collection={} owner={owner_name} records={count}",
            T::COLLECTION
        );

        self.revision += 1;
        self.subscribers.publish(&StoreEvent {
            revision: self.revision,
            kind: ChangeKind::Loaded,
            collections: vec![T::COLLECTION],
            ids: Vec::new(),
            durable: true,
        });
        Ok(count)
    }

    fn typed<T: Entity>(&self) -> StoreResult<&Collection<T>> {
        self.collections
            .get(T::COLLECTION)
            .and_then(|collection| collection.as_any().downcast_ref::<Collection<T>>())
            .ok_or(StoreError::UnknownCollection(T::COLLECTION))
    }

    fn typed_mut<T: Entity>(&mut self) -> StoreResult<&mut Collection<T>> {
        self.collections
            .get_mut(T::COLLECTION)
            .and_then(|collection| collection.as_any_mut().downcast_mut::<Collection<T>>())
            .ok_or(StoreError::UnknownCollection(T::COLLECTION))
    }

    fn erased(&self, name: &'static str) -> StoreResult<&(dyn StoredCollection + 'static)> {
        self.collections
            .get(name)
            .map(|collection| &**collection)
            .ok_or(StoreError::UnknownCollection(name))
    }

    fn erased_mut(
        &mut self,
        name: &'static str,
    ) -> StoreResult<&mut (dyn StoredCollection + 'static)> {
        self.collections
            .get_mut(name)
            .map(|collection| &mut **collection)
            .ok_or(StoreError::UnknownCollection(name))
    }

    /// Walks the owner -> dependent graph from `(root_collection, root_id)`
    /// and applies `apply` to every transitive dependent.
    fn cascade(
        &mut self,
        root_collection: &'static str,
        root_id: EntityId,
        touched: &mut BTreeSet<&'static str>,
        ids: &mut Vec<EntityId>,
        mut apply: impl FnMut(&mut (dyn StoredCollection + 'static), EntityId),
    ) {
        let mut pending = vec![(root_collection, root_id)];
        while let Some((owner_collection, owner_id)) = pending.pop() {
            let dependent_collections: Vec<&'static str> = self
                .collections
                .values()
                .filter(|collection| collection.owner_collection() == Some(owner_collection))
                .map(|collection| collection.name())
                .collect();

            for name in dependent_collections {
                let Some(collection) = self.collections.get_mut(name) else {
                    continue;
                };
                for dependent in collection.owned_by(owner_id) {
                    apply(&mut **collection, dependent);
                    touched.insert(name);
                    ids.push(dependent);
                    pending.push((name, dependent));
                }
            }
        }
    }

    fn commit(
        &mut self,
        kind: ChangeKind,
        touched: BTreeSet<&'static str>,
        ids: Vec<EntityId>,
    ) -> StoreResult<()> {
        let started_at = Instant::now();
        let mut pending = self.unsaved.clone();
        pending.extend(touched.iter().copied());
        let persisted = self.persist(&pending);

        self.revision += 1;
        let collections: Vec<&'static str> = touched.into_iter().collect();
        match &persisted {
            Ok(()) => info!(
                "event=store_commit module=store status=ok kind={kind} collections={} records={} revision={} duration_ms={}",
                collections.join(","),
                ids.len(),
                self.revision,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=store_commit module=store status=error kind={kind} collections={} records={} revision={} error={err}",
                collections.join(","),
                ids.len(),
                self.revision
            ),
        }

        self.subscribers.publish(&StoreEvent {
            revision: self.revision,
            kind,
            collections,
            ids: ids.clone(),
            durable: persisted.is_ok(),
        });

        match persisted {
            Ok(()) => {
                self.unsaved.clear();
                self.last_write_error = None;
                Ok(())
            }
            Err(source) => {
                self.unsaved = pending;
                self.last_write_error = Some(source.to_string());
                Err(StoreError::WriteFailed { ids, source })
            }
        }
    }

    fn persist(&self, names: &BTreeSet<&'static str>) -> PersistResult<()> {
        let mut writes = Vec::with_capacity(names.len());
        for name in names {
            let Some(collection) = self.collections.get(name) else {
                continue;
            };
            if collection.len() == 0 {
                writes.push(CollectionWrite::Purge {
                    collection: (*name).to_string(),
                });
                continue;
            }
            let bytes = collection.encode().map_err(|source| PersistError::Encode {
                key: self.adapter.key_for(name),
                source,
            })?;
            writes.push(CollectionWrite::Replace {
                collection: (*name).to_string(),
                bytes,
            });
        }
        self.adapter.write(writes)
    }
}
