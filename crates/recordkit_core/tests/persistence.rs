use recordkit_core::kv::KeyValueStore;
use recordkit_core::{
    EntityStore, ManualClock, MemoryKvStore, Pet, SqliteKvStore, StoreConfig, StoreError,
    Vaccination,
};
use std::sync::Arc;

fn open<K: KeyValueStore>(kv: K) -> EntityStore<K> {
    let mut store =
        EntityStore::with_clock(kv, StoreConfig::default(), Arc::new(ManualClock::new(1_000)));
    store.register::<Pet>().unwrap();
    store.register_dependent::<Vaccination>().unwrap();
    store
}

#[test]
fn records_survive_a_reload_through_the_same_kv() {
    let kv = MemoryKvStore::new();
    let owner = {
        let mut store = open(kv.clone());
        let owner = store.create(Pet::new("Max", "dog")).unwrap();
        store.create(Vaccination::new(owner, "rabies", 100)).unwrap();
        store.archive::<Pet>(owner).unwrap();
        owner
    };

    let store = open(kv);
    let pet = store.get::<Pet>(owner).unwrap().unwrap();
    assert_eq!(pet.name, "Max");
    assert_eq!(pet.meta.archived_at, Some(1_000));
    assert_eq!(store.dependents_of::<Vaccination>(owner, true).unwrap().len(), 1);
    assert!(store.load_warnings().is_empty());
}

#[test]
fn collections_are_stored_under_namespaced_keys() {
    let kv = MemoryKvStore::new();
    let mut store = EntityStore::new(
        kv.clone(),
        StoreConfig {
            namespace: "petlog".to_string(),
        },
    );
    store.register::<Pet>().unwrap();
    store.create(Pet::new("Max", "dog")).unwrap();

    assert_eq!(store.persistence_key::<Pet>(), "petlog/pets");
    assert_eq!(kv.keys(), ["petlog/pets".to_string()]);
}

#[test]
fn emptied_collection_removes_its_key() {
    let kv = MemoryKvStore::new();
    let mut store = open(kv.clone());
    let id = store.create(Pet::new("Max", "dog")).unwrap();
    store.delete_forever::<Pet>(id).unwrap();

    assert!(kv.keys().is_empty());
}

#[test]
fn corrupt_blob_loads_empty_with_warning() {
    let kv = MemoryKvStore::new();
    kv.set("recordkit/pets", b"{not json").unwrap();

    let store = open(kv);
    assert!(store.records::<Pet>().unwrap().is_empty());
    let warnings = store.load_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].key, "recordkit/pets");
}

#[test]
fn duplicate_ids_in_storage_keep_the_first_record() {
    let kv = MemoryKvStore::new();
    let first = Pet::new("Max", "dog");
    let mut second = Pet::new("Impostor", "cat");
    second.meta.id = first.meta.id;
    kv.set(
        "recordkit/pets",
        &serde_json::to_vec(&vec![first.clone(), second]).unwrap(),
    )
    .unwrap();

    let store = open(kv);
    let records = store.records::<Pet>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Max");
    assert_eq!(store.load_warnings().len(), 1);
}

#[test]
fn write_failure_is_reported_and_memory_stays_authoritative() {
    let kv = MemoryKvStore::new();
    let mut store = open(kv.clone());
    let events = store.subscribe();
    kv.fail_writes(true);

    let err = store.create(Pet::new("Max", "dog")).unwrap_err();
    assert!(matches!(err, StoreError::WriteFailed { ref ids, .. } if ids.len() == 1));
    assert_eq!(store.records::<Pet>().unwrap().len(), 1);
    assert!(!store.is_durable());
    assert!(store.last_write_error().is_some());

    let event = events.try_recv().unwrap();
    assert!(!event.durable);
}

#[test]
fn next_successful_commit_persists_previously_failed_collections() {
    let kv = MemoryKvStore::new();
    let mut store = open(kv.clone());
    kv.fail_writes(true);
    let owner = store
        .create(Pet::new("Max", "dog"))
        .err()
        .and_then(|err| match err {
            StoreError::WriteFailed { ids, .. } => ids.first().copied(),
            _ => None,
        })
        .unwrap();

    kv.fail_writes(false);
    store.create(Vaccination::new(owner, "rabies", 100)).unwrap();
    assert!(store.is_durable());
    assert!(store.last_write_error().is_none());

    let reloaded = open(kv);
    assert!(reloaded.get::<Pet>(owner).unwrap().is_some());
}

#[test]
fn sqlite_backend_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recordkit.db");

    let owner = {
        let mut store = open(SqliteKvStore::open(&path).unwrap());
        let owner = store.create(Pet::new("Max", "dog")).unwrap();
        store.create(Vaccination::new(owner, "rabies", 100)).unwrap();
        store.archive::<Pet>(owner).unwrap();
        owner
    };

    let mut store = open(SqliteKvStore::open(&path).unwrap());
    assert_eq!(store.archived_of::<Pet>().unwrap().len(), 1);
    assert_eq!(store.clear_archive().unwrap(), 2);
    drop(store);

    let store = open(SqliteKvStore::open(&path).unwrap());
    assert!(store.get::<Pet>(owner).unwrap().is_none());
    assert!(store.records::<Vaccination>().unwrap().is_empty());
}
