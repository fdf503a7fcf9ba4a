//! Reactive query pipeline: keeps a visible collection in sync with the
//! store, the filter and the sort option.
//!
//! # Responsibility
//! - Consume store change events and filter/sort edits as named inputs.
//! - Debounce free-text input; apply every other input without delay.
//! - Recompute `sort(filter(records))` in full, once per poll, and publish
//!   the result.
//!
//! # Invariants
//! - Several input changes between two polls produce one recomputation.
//! - Published collections are only replaced, never edited in place.
//! - Staleness is limited to the debounce window of free-text input.

use crate::clock::Clock;
use crate::kv::KeyValueStore;
use crate::model::entity::Queryable;
use crate::query::debounce::DebounceTimer;
use crate::query::filter::{normalize_category, FilterConfig, FilterPatch, FilterPredicateSet};
use crate::query::sort::{sort_records, SortOption};
use crate::store::events::{StoreEvent, Subscribers};
use crate::store::EntityStore;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Quiet interval before free-text input is applied.
    pub debounce_ms: u64,
}

impl PipelineConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// Published after every recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineEvent {
    pub generation: u64,
    pub active: usize,
    pub archived: usize,
    /// `false` when the source collection could not be read.
    pub fresh: bool,
}

/// Visible active/archived views of one collection.
///
/// Setters only record input. Call [`Self::sync`] after non-text edits to
/// republish at once, and [`Self::poll`] on a timer to settle search text;
/// edits made between two such calls share one recomputation.
pub struct QueryPipeline<T: Queryable> {
    clock: Arc<dyn Clock>,
    store_events: Receiver<StoreEvent>,
    filter: FilterConfig,
    sort: SortOption,
    search: DebounceTimer<String>,
    dirty: bool,
    active: Vec<T>,
    archived: Vec<T>,
    facets: BTreeMap<String, usize>,
    generation: u64,
    seen_revision: u64,
    stale_reason: Option<String>,
    listeners: Subscribers<PipelineEvent>,
}

impl<T: Queryable> QueryPipeline<T> {
    /// Subscribes to `store` and publishes the initial views.
    pub fn attach<K: KeyValueStore>(store: &mut EntityStore<K>, config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            clock: store.clock(),
            store_events: store.subscribe(),
            filter: FilterConfig::default(),
            sort: SortOption::default(),
            search: DebounceTimer::new(config.debounce_window()),
            dirty: true,
            active: Vec::new(),
            archived: Vec::new(),
            facets: BTreeMap::new(),
            generation: 0,
            seen_revision: store.revision(),
            stale_reason: None,
            listeners: Subscribers::new(),
        };
        pipeline.recompute(store);
        pipeline
    }

    /// Applies a partial filter. Free text is debounced; other fields take
    /// effect at the next `sync` or `poll`.
    pub fn set_filter(&mut self, mut patch: FilterPatch, now: Instant) {
        if let Some(text) = patch.take_text() {
            self.set_search_text(text, now);
        }
        if !patch.is_empty() {
            self.filter.apply(patch);
            self.dirty = true;
        }
    }

    /// Restarts the debounce window with `text` as the pending query.
    pub fn set_search_text(&mut self, text: impl Into<String>, now: Instant) {
        self.search.schedule(text.into(), now);
    }

    pub fn toggle_category(&mut self, category: &str) {
        self.filter.toggle_category(category);
        self.dirty = true;
    }

    pub fn set_sort(&mut self, option: SortOption) {
        if self.sort != option {
            self.sort = option;
            self.dirty = true;
        }
    }

    /// Resets every predicate and drops any pending search text.
    pub fn clear_filters(&mut self) {
        self.search.cancel();
        if self.filter != FilterConfig::default() {
            self.filter = FilterConfig::default();
            self.dirty = true;
        }
    }

    /// Processes pending inputs and recomputes at most once.
    ///
    /// Returns `true` when the views were republished.
    pub fn poll<K: KeyValueStore>(&mut self, store: &EntityStore<K>, now: Instant) -> bool {
        self.drain_store_events();
        if let Some(text) = self.search.poll(now) {
            self.settle_search(text);
        }
        self.recompute_if_dirty(store)
    }

    /// Republishes after store changes or non-text edits, leaving pending
    /// search text pending.
    pub fn sync<K: KeyValueStore>(&mut self, store: &EntityStore<K>) -> bool {
        self.drain_store_events();
        self.recompute_if_dirty(store)
    }

    /// Applies pending search text now (e.g. on submit) and recomputes.
    pub fn flush_search<K: KeyValueStore>(&mut self, store: &EntityStore<K>) -> bool {
        self.drain_store_events();
        if let Some(text) = self.search.flush() {
            self.settle_search(text);
        }
        self.recompute_if_dirty(store)
    }

    pub fn subscribe(&mut self) -> Receiver<PipelineEvent> {
        self.listeners.subscribe()
    }

    /// Active records after filter and sort.
    pub fn active(&self) -> &[T] {
        &self.active
    }

    /// Archived records after filter, most recently archived first.
    pub fn archived(&self) -> &[T] {
        &self.archived
    }

    /// Category -> count over all active records, ignoring the filter.
    pub fn facets(&self) -> &BTreeMap<String, usize> {
        &self.facets
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn sort(&self) -> SortOption {
        self.sort
    }

    /// Search text typed but not yet applied.
    pub fn pending_search(&self) -> Option<&str> {
        self.search.pending_value().map(String::as_str)
    }

    /// When the pending search text will settle.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.search.due_at()
    }

    /// Number of recomputations so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn seen_revision(&self) -> u64 {
        self.seen_revision
    }

    /// Why the last recomputation published empty views, if it did.
    pub fn stale_reason(&self) -> Option<&str> {
        self.stale_reason.as_deref()
    }

    fn settle_search(&mut self, text: String) {
        if self.filter.text != text {
            self.filter.text = text;
            self.dirty = true;
        }
    }

    fn drain_store_events(&mut self) {
        loop {
            match self.store_events.try_recv() {
                Ok(event) => {
                    self.seen_revision = event.revision;
                    if event.touches(T::COLLECTION) {
                        self.dirty = true;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    fn recompute_if_dirty<K: KeyValueStore>(&mut self, store: &EntityStore<K>) -> bool {
        if !self.dirty {
            return false;
        }
        self.recompute(store);
        true
    }

    fn recompute<K: KeyValueStore>(&mut self, store: &EntityStore<K>) {
        let started_at = Instant::now();
        match store.records::<T>() {
            Ok(records) => {
                let predicates = FilterPredicateSet::new(&self.filter, self.clock.now_ms());
                let (archived, active): (Vec<&T>, Vec<&T>) =
                    records.iter().partition(|record| record.is_archived());

                self.facets = facet_counts(&active);
                self.active = sort_records(predicates.apply(active), self.sort)
                    .into_iter()
                    .cloned()
                    .collect();

                let mut archived = predicates.apply(archived);
                archived.sort_by(|a, b| b.archived_at().cmp(&a.archived_at()));
                self.archived = archived.into_iter().cloned().collect();
                self.stale_reason = None;
            }
            Err(err) => {
                warn!(
                    "event=pipeline_recompute module=query status=warn collection={} error={err}",
                    T::COLLECTION
                );
                self.active.clear();
                self.archived.clear();
                self.facets.clear();
                self.stale_reason = Some(err.to_string());
            }
        }

        self.dirty = false;
        self.generation += 1;
        debug!(
            "event=pipeline_recompute module=query status=ok collection={} generation={} active={} archived={} duration_us={}",
            T::COLLECTION,
            self.generation,
            self.active.len(),
            self.archived.len(),
            started_at.elapsed().as_micros()
        );
        self.listeners.publish(&PipelineEvent {
            generation: self.generation,
            active: self.active.len(),
            archived: self.archived.len(),
            fresh: self.stale_reason.is_none(),
        });
    }
}

fn facet_counts<T: Queryable>(records: &[&T]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        for category in record.categories().into_iter().filter_map(normalize_category) {
            *counts.entry(category).or_insert(0) += 1;
        }
    }
    counts
}
