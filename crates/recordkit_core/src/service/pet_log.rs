//! Pet-care log use-case service.
//!
//! # Responsibility
//! - Register the pet, vaccination and reminder collections on one store.
//! - Validate input before it reaches the store.
//! - Keep the visible pet list in sync after every command.
//!
//! # Invariants
//! - Vaccinations reference an existing pet; reminders an existing
//!   vaccination.
//! - Commands on unknown ids fail with `NotFound` and change nothing.
//! - A failed write still refreshes the visible list; memory is authoritative.

use crate::clock::Clock;
use crate::kv::KeyValueStore;
use crate::model::entity::{Entity, EntityId};
use crate::model::pet::{Pet, PetValidationError, Reminder, Vaccination};
use crate::query::filter::FilterPatch;
use crate::query::pipeline::{PipelineConfig, PipelineEvent, QueryPipeline};
use crate::query::sort::SortOption;
use crate::store::events::StoreEvent;
use crate::store::{EntityStore, Outcome, StoreConfig, StoreError};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

pub type PetLogResult<T> = Result<T, PetLogError>;

#[derive(Debug)]
pub enum PetLogError {
    Validation(PetValidationError),
    /// Target record does not exist.
    NotFound {
        collection: &'static str,
        id: EntityId,
    },
    /// Referenced owner does not exist or is archived.
    OwnerNotFound {
        collection: &'static str,
        id: EntityId,
    },
    Store(StoreError),
}

impl Display for PetLogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { collection, id } => write!(f, "{collection} record not found: {id}"),
            Self::OwnerNotFound { collection, id } => {
                write!(f, "owner {id} not found in `{collection}`")
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PetLogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PetValidationError> for PetLogError {
    fn from(value: PetValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for PetLogError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Store plus the visible pet list of the pet-care log.
pub struct PetLogService<K: KeyValueStore> {
    store: EntityStore<K>,
    pets: QueryPipeline<Pet>,
}

impl<K: KeyValueStore> PetLogService<K> {
    pub fn open(kv: K, store_config: StoreConfig, pipeline: PipelineConfig) -> PetLogResult<Self> {
        Self::from_store(EntityStore::new(kv, store_config), pipeline)
    }

    pub fn open_with_clock(
        kv: K,
        store_config: StoreConfig,
        pipeline: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> PetLogResult<Self> {
        Self::from_store(EntityStore::with_clock(kv, store_config, clock), pipeline)
    }

    fn from_store(mut store: EntityStore<K>, pipeline: PipelineConfig) -> PetLogResult<Self> {
        let pets = store.register::<Pet>()?;
        let vaccinations = store.register_dependent::<Vaccination>()?;
        let reminders = store.register_dependent::<Reminder>()?;
        info!(
            "event=pet_log_open module=service status=ok pets={pets} vaccinations={vaccinations} reminders={reminders} warnings={}",
            store.load_warnings().len()
        );
        let pets = QueryPipeline::attach(&mut store, pipeline);
        Ok(Self { store, pets })
    }

    pub fn store(&self) -> &EntityStore<K> {
        &self.store
    }

    pub fn pets(&self) -> &QueryPipeline<Pet> {
        &self.pets
    }

    pub fn create_pet(&mut self, pet: Pet) -> PetLogResult<EntityId> {
        pet.validate()?;
        let result = self.store.create(pet);
        self.refresh();
        Ok(result?)
    }

    pub fn update_pet(&mut self, id: EntityId, pet: Pet) -> PetLogResult<()> {
        pet.validate()?;
        let result = self.store.update(id, pet);
        self.refresh();
        expect_applied::<Pet>(result?, id)
    }

    /// Archives the pet with its vaccinations and their reminders.
    pub fn archive_pet(&mut self, id: EntityId) -> PetLogResult<()> {
        let result = self.store.archive::<Pet>(id);
        self.refresh();
        expect_applied::<Pet>(result?, id)
    }

    /// Restores the pet only; its vaccinations stay archived.
    pub fn restore_pet(&mut self, id: EntityId) -> PetLogResult<()> {
        let result = self.store.restore::<Pet>(id);
        self.refresh();
        expect_applied::<Pet>(result?, id)
    }

    pub fn delete_pet_forever(&mut self, id: EntityId) -> PetLogResult<()> {
        let result = self.store.delete_forever::<Pet>(id);
        self.refresh();
        expect_applied::<Pet>(result?, id)
    }

    pub fn add_vaccination(&mut self, vaccination: Vaccination) -> PetLogResult<EntityId> {
        vaccination.validate()?;
        self.require_active_owner::<Pet>(vaccination.pet_id)?;
        let result = self.store.create(vaccination);
        self.refresh();
        Ok(result?)
    }

    pub fn archive_vaccination(&mut self, id: EntityId) -> PetLogResult<()> {
        let result = self.store.archive::<Vaccination>(id);
        self.refresh();
        expect_applied::<Vaccination>(result?, id)
    }

    pub fn restore_vaccination(&mut self, id: EntityId) -> PetLogResult<()> {
        let result = self.store.restore::<Vaccination>(id);
        self.refresh();
        expect_applied::<Vaccination>(result?, id)
    }

    pub fn delete_vaccination_forever(&mut self, id: EntityId) -> PetLogResult<()> {
        let result = self.store.delete_forever::<Vaccination>(id);
        self.refresh();
        expect_applied::<Vaccination>(result?, id)
    }

    pub fn add_reminder(&mut self, reminder: Reminder) -> PetLogResult<EntityId> {
        self.require_active_owner::<Vaccination>(reminder.vaccination_id)?;
        let result = self.store.create(reminder);
        self.refresh();
        Ok(result?)
    }

    /// Permanently removes every archived pet, vaccination and reminder.
    pub fn clear_archive(&mut self) -> PetLogResult<usize> {
        let result = self.store.clear_archive();
        self.refresh();
        Ok(result?)
    }

    /// Non-text fields apply at once; text waits for the debounce.
    pub fn set_filter(&mut self, patch: FilterPatch, now: Instant) {
        self.pets.set_filter(patch, now);
        self.refresh();
    }

    pub fn set_search_text(&mut self, text: impl Into<String>, now: Instant) {
        self.pets.set_search_text(text, now);
    }

    pub fn toggle_species(&mut self, species: &str) {
        self.pets.toggle_category(species);
        self.refresh();
    }

    pub fn set_sort(&mut self, option: SortOption) {
        self.pets.set_sort(option);
        self.refresh();
    }

    pub fn clear_filters(&mut self) {
        self.pets.clear_filters();
        self.refresh();
    }

    /// When pending search text settles; the host's next `tick` time.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pets.next_deadline()
    }

    /// Drives debounced input; call from the host's timer or frame loop.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.pets.poll(&self.store, now)
    }

    pub fn active_pets(&self) -> &[Pet] {
        self.pets.active()
    }

    pub fn archived_pets(&self) -> &[Pet] {
        self.pets.archived()
    }

    pub fn vaccinations_of(
        &self,
        pet_id: EntityId,
        include_archived: bool,
    ) -> PetLogResult<Vec<&Vaccination>> {
        Ok(self.store.dependents_of::<Vaccination>(pet_id, include_archived)?)
    }

    pub fn reminders_of(&self, vaccination_id: EntityId) -> PetLogResult<Vec<&Reminder>> {
        Ok(self.store.dependents_of::<Reminder>(vaccination_id, false)?)
    }

    pub fn subscribe_store(&mut self) -> Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn subscribe_pets(&mut self) -> Receiver<PipelineEvent> {
        self.pets.subscribe()
    }

    fn refresh(&mut self) {
        self.pets.sync(&self.store);
    }

    fn require_active_owner<T: Entity>(&self, id: EntityId) -> PetLogResult<()> {
        match self.store.get::<T>(id)? {
            Some(owner) if !owner.is_archived() => Ok(()),
            _ => Err(PetLogError::OwnerNotFound {
                collection: T::COLLECTION,
                id,
            }),
        }
    }
}

fn expect_applied<T: Entity>(outcome: Outcome, id: EntityId) -> PetLogResult<()> {
    if outcome.is_applied() {
        Ok(())
    } else {
        Err(PetLogError::NotFound {
            collection: T::COLLECTION,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{PetLogError, PetLogService};
    use crate::kv::MemoryKvStore;
    use crate::model::pet::{Pet, Vaccination};
    use crate::query::pipeline::PipelineConfig;
    use crate::store::StoreConfig;
    use uuid::Uuid;

    fn service() -> PetLogService<MemoryKvStore> {
        PetLogService::open(
            MemoryKvStore::new(),
            StoreConfig::default(),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn create_pet_rejects_blank_name() {
        let mut service = service();
        let err = service.create_pet(Pet::new("  ", "dog")).unwrap_err();
        assert!(matches!(err, PetLogError::Validation(_)));
        assert!(service.active_pets().is_empty());
    }

    #[test]
    fn commands_refresh_visible_list() {
        let mut service = service();
        let id = service.create_pet(Pet::new("Max", "dog")).unwrap();
        assert_eq!(service.active_pets().len(), 1);

        service.archive_pet(id).unwrap();
        assert!(service.active_pets().is_empty());
        assert_eq!(service.archived_pets().len(), 1);
    }

    #[test]
    fn vaccination_requires_active_pet() {
        let mut service = service();
        let err = service
            .add_vaccination(Vaccination::new(Uuid::new_v4(), "rabies", 10))
            .unwrap_err();
        assert!(matches!(err, PetLogError::OwnerNotFound { .. }));

        let pet = service.create_pet(Pet::new("Max", "dog")).unwrap();
        service.archive_pet(pet).unwrap();
        let err = service
            .add_vaccination(Vaccination::new(pet, "rabies", 10))
            .unwrap_err();
        assert!(matches!(err, PetLogError::OwnerNotFound { .. }));
    }

    #[test]
    fn unknown_id_reports_not_found() {
        let mut service = service();
        let err = service.restore_pet(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PetLogError::NotFound { collection: "pets", .. }));
    }
}
