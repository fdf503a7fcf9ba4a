//! Core of a local-first record keeper.
//!
//! Owns typed record collections in memory, persists them through a
//! key-value port, cascades archive/delete from owners to dependents and
//! publishes filtered, sorted views that follow store and UI changes.

pub mod clock;
pub mod db;
pub mod kv;
pub mod logging;
pub mod model;
pub mod persist;
pub mod query;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use kv::{KeyValueStore, KvError, MemoryKvStore, SqliteKvStore};
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status, LoggingConfig};
pub use model::entity::{Dependent, Entity, EntityId, EntityMeta, Queryable};
pub use model::pet::{Pet, PetValidationError, Reminder, Vaccination};
pub use persist::{DecodeWarning, PersistError, PersistenceAdapter};
pub use query::filter::{DateRange, FilterConfig, FilterPatch, FilterPredicateSet, NumericRange};
pub use query::pipeline::{PipelineConfig, PipelineEvent, QueryPipeline};
pub use query::sort::SortOption;
pub use service::pet_log::{PetLogError, PetLogService};
pub use store::events::{ChangeKind, StoreEvent};
pub use store::{EntityStore, Outcome, StoreConfig, StoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
