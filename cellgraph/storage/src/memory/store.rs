use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cellgraph_common::types::{Direction, ElementKey, ElementType};
use cellgraph_security::Authorizations;
use cellgraph_version::{ClockMode, Timestamp, TimestampGenerator, VersionChain};
use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::adjacency::AdjacencyIndex;
use crate::error::{NotFoundError, StorageError, StorageResult};
use crate::history::{
    HistoricalEvent, HistoricalEventId, HistoricalEvents, HistoricalEventsFetchHints, Purge,
    apply_event, replay_until, select_events,
};
use crate::merge::merge;
use crate::model::element::{EdgeRef, Element};
use crate::model::extended_data::{ExtendedDataRow, materialize_rows};
use crate::model::fetch_hints::FetchHints;
use crate::model::metadata::MetadataDefaultsPolicy;
use crate::model::record::ElementRecord;
use crate::mutation::Mutation;
use crate::wal::graph_wal::{Operation, WalConfig, WalManager};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Durable log of accepted changes. Without it the store is purely in memory.
    pub wal: Option<WalConfig>,
    pub clock: ClockMode,
}

/// What an accepted mutation produced.
#[derive(Debug, Clone)]
pub struct AppliedMutation {
    pub record: Arc<ElementRecord>,
    pub events: Vec<HistoricalEvent>,
    pub timestamp: Timestamp,
}

struct ElementState {
    chain: VersionChain<Arc<ElementRecord>>,
    events: Vec<HistoricalEvent>,
}

impl ElementState {
    fn current(&self) -> &Arc<ElementRecord> {
        &self.chain.current().data
    }
}

#[derive(Default)]
struct SlotState {
    state: Option<ElementState>,
    /// Set once the slot has been unlinked from the element map. Writers that raced with the
    /// unlink retry against a fresh slot.
    removed: bool,
}

type ElementSlot = Arc<Mutex<SlotState>>;

/// In-memory element store with version chains, per-element event logs and an optional WAL.
///
/// Writes to one element are serialized by that element's mutex; writes to different elements
/// proceed in parallel. Readers lock an element only long enough to clone what they need.
pub struct MemoryStore {
    elements: DashMap<ElementKey, ElementSlot>,
    adjacency: AdjacencyIndex,
    clock: TimestampGenerator,
    sequence: AtomicU64,
    wal: Option<WalManager>,
    policy: Option<Arc<dyn MetadataDefaultsPolicy>>,
}

impl MemoryStore {
    /// Opens a store, replaying the WAL if one is configured.
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        Self::open_with_policy(config, None)
    }

    pub fn open_with_policy(
        config: StoreConfig,
        policy: Option<Arc<dyn MetadataDefaultsPolicy>>,
    ) -> StorageResult<Self> {
        let wal = config.wal.as_ref().map(WalManager::open).transpose()?;
        let store = Self {
            elements: DashMap::new(),
            adjacency: AdjacencyIndex::new(),
            clock: TimestampGenerator::new(config.clock),
            sequence: AtomicU64::new(0),
            wal,
            policy,
        };
        store.recover()?;
        Ok(store)
    }

    /// An empty, purely in-memory store with a logical clock.
    pub fn in_memory() -> Self {
        Self {
            elements: DashMap::new(),
            adjacency: AdjacencyIndex::new(),
            clock: TimestampGenerator::new(ClockMode::Logical),
            sequence: AtomicU64::new(0),
            wal: None,
            policy: None,
        }
    }

    pub fn clock(&self) -> &TimestampGenerator {
        &self.clock
    }

    fn slot(&self, key: &ElementKey) -> Option<ElementSlot> {
        self.elements.get(key).map(|slot| Arc::clone(&slot))
    }

    fn unlink(&self, key: &ElementKey, slot: &ElementSlot) {
        self.elements
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    // ===== Writes =====

    /// Merges `mutation` into its element and records the result.
    ///
    /// The mutation is all-or-nothing: on error nothing is installed, logged or indexed.
    pub fn apply(&self, mutation: &Mutation) -> StorageResult<AppliedMutation> {
        self.apply_checked(mutation, None)
    }

    /// Like [`MemoryStore::apply`], but fails with [`StorageError::SecurityViolation`] when a
    /// live element being updated is not readable under `authorizations`. The check runs under
    /// the element's lock.
    pub fn apply_as(
        &self,
        mutation: &Mutation,
        authorizations: &Authorizations,
    ) -> StorageResult<AppliedMutation> {
        self.apply_checked(mutation, Some(authorizations))
    }

    fn apply_checked(
        &self,
        mutation: &Mutation,
        authorizations: Option<&Authorizations>,
    ) -> StorageResult<AppliedMutation> {
        let key = mutation.key();
        loop {
            let slot = Arc::clone(&self.elements.entry(key.clone()).or_default());
            let mut guard = slot.lock();
            if guard.removed {
                continue;
            }
            let result = match authorizations {
                Some(authorizations) => check_readable(&guard, key, authorizations)
                    .and_then(|()| self.apply_locked(&mut guard, mutation)),
                None => self.apply_locked(&mut guard, mutation),
            };
            if guard.state.is_none() {
                guard.removed = true;
                drop(guard);
                self.unlink(key, &slot);
            }
            return result;
        }
    }

    fn apply_locked(
        &self,
        slot: &mut SlotState,
        mutation: &Mutation,
    ) -> StorageResult<AppliedMutation> {
        let current = slot.state.as_ref().map(|state| Arc::clone(state.current()));
        let floor = slot
            .state
            .as_ref()
            .map_or(Timestamp::MIN, |state| state.chain.commit_ts());
        let timestamp = match mutation.timestamp() {
            Some(ts) => {
                self.clock.update_if_greater(ts);
                ts
            }
            None => self.clock.next_after(floor)?,
        };
        // A backfill merges against the version that was current at its timestamp.
        let base = match &slot.state {
            Some(state) if timestamp <= floor => state.chain.visible_at(timestamp).cloned(),
            _ => current.clone(),
        };

        let outcome = merge(
            base.as_deref(),
            mutation,
            timestamp,
            self.policy.as_deref(),
            || self.sequence.fetch_add(1, Ordering::SeqCst),
        )?;
        if outcome.is_noop() {
            let record = current.ok_or_else(|| NotFoundError::Element(mutation.key().clone()))?;
            debug!(element = %mutation.key(), "mutation changed nothing");
            return Ok(AppliedMutation {
                record,
                events: Vec::new(),
                timestamp,
            });
        }

        let rebuilt = rebuilt_state(slot, timestamp, &outcome.events, &outcome.purges)?;
        if let Some(wal) = &self.wal {
            wal.append(Operation::Apply {
                key: mutation.key().clone(),
                timestamp,
                events: outcome.events.clone(),
                purges: outcome.purges.clone(),
            })?;
        }
        let record = self.install(
            slot,
            mutation.key(),
            timestamp,
            &outcome.events,
            rebuilt,
            outcome.record,
        )?;
        debug!(
            element = %mutation.key(),
            %timestamp,
            events = outcome.events.len(),
            purges = outcome.purges.len(),
            "mutation applied"
        );
        Ok(AppliedMutation {
            record,
            events: outcome.events,
            timestamp,
        })
    }

    /// Appends `events` to the element's log and installs the resulting version, or installs
    /// `rebuilt` when the log had to be rewritten.
    fn install(
        &self,
        slot: &mut SlotState,
        key: &ElementKey,
        timestamp: Timestamp,
        events: &[HistoricalEvent],
        rebuilt: Option<ElementState>,
        record: Option<ElementRecord>,
    ) -> StorageResult<Arc<ElementRecord>> {
        let previous = slot.state.as_ref().map(|state| Arc::clone(state.current()));

        if let Some(rebuilt) = rebuilt {
            slot.state = Some(rebuilt);
        } else {
            let record = match record {
                Some(record) => record,
                None => {
                    let mut folded = previous.as_deref().cloned();
                    for event in events {
                        apply_event(&mut folded, event)?;
                    }
                    folded.ok_or_else(|| NotFoundError::Element(key.clone()))?
                }
            };
            let record = Arc::new(record);
            match slot.state.as_mut() {
                Some(state) => {
                    if !state.chain.install(Arc::clone(&record), timestamp) {
                        return Err(StorageError::InvalidMutation(format!(
                            "version at {timestamp} is not newer than the current version of {key}",
                        )));
                    }
                    state.events.extend_from_slice(events);
                }
                None => {
                    slot.state = Some(ElementState {
                        chain: VersionChain::new(Arc::clone(&record), timestamp),
                        events: events.to_vec(),
                    });
                }
            }
        }

        let current = slot
            .state
            .as_ref()
            .map(|state| Arc::clone(state.current()))
            .ok_or_else(|| NotFoundError::Element(key.clone()))?;
        self.update_adjacency(key, previous.as_deref(), &current);
        Ok(current)
    }

    fn update_adjacency(
        &self,
        key: &ElementKey,
        previous: Option<&ElementRecord>,
        current: &ElementRecord,
    ) {
        let Some(endpoints) = current.edge.as_ref() else {
            return;
        };
        match previous.and_then(|record| record.edge.as_ref()) {
            None => self.adjacency.insert_edge(&key.id, endpoints),
            Some(old) if old.label != endpoints.label => {
                self.adjacency.relabel_edge(&key.id, old, &endpoints.label)
            }
            Some(_) => {}
        }
    }

    /// Hard-deletes an element with its versions, history and extended data.
    ///
    /// Deleting a vertex also hard-deletes every edge attached to it. Returns the keys of all
    /// deleted elements, the requested one first.
    pub fn delete_element(&self, key: &ElementKey) -> StorageResult<Vec<ElementKey>> {
        if self.delete_single(key, true)?.is_none() {
            return Err(NotFoundError::Element(key.clone()).into());
        }
        let mut deleted = vec![key.clone()];
        if key.element_type == ElementType::Vertex {
            for edge_id in self.adjacency.edge_ids(&key.id) {
                let edge_key = ElementKey::edge(edge_id);
                if self.delete_single(&edge_key, true)?.is_some() {
                    deleted.push(edge_key);
                }
            }
            self.adjacency.remove_vertex(&key.id);
        }
        info!(element = %key, deleted = deleted.len(), "element hard deleted");
        Ok(deleted)
    }

    fn delete_single(
        &self,
        key: &ElementKey,
        log: bool,
    ) -> StorageResult<Option<Arc<ElementRecord>>> {
        let Some(slot) = self.slot(key) else {
            return Ok(None);
        };
        let mut guard = slot.lock();
        if guard.removed || guard.state.is_none() {
            return Ok(None);
        }
        if log && let Some(wal) = &self.wal {
            wal.append(Operation::DeleteElement { key: key.clone() })?;
        }
        let record = guard
            .state
            .take()
            .map(|state| Arc::clone(state.current()));
        guard.removed = true;
        drop(guard);
        self.unlink(key, &slot);

        if let Some(endpoints) = record.as_ref().and_then(|r| r.edge.as_ref()) {
            self.adjacency.remove_edge(&key.id, endpoints);
        }
        Ok(record)
    }

    /// Makes every accepted change durable.
    pub fn flush(&self) -> StorageResult<()> {
        if let Some(wal) = &self.wal {
            wal.flush()?;
            debug!(path = %wal.path().display(), "wal flushed");
        }
        Ok(())
    }

    fn recover(&self) -> StorageResult<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let entries = wal.read_all()?;
        if entries.is_empty() {
            return Ok(());
        }
        info!(path = %wal.path().display(), entries = entries.len(), "replaying wal");
        let mut max_sequence = None;
        for entry in entries {
            wal.set_next_lsn(entry.lsn + 1);
            match entry.op {
                Operation::Apply {
                    key,
                    timestamp,
                    events,
                    purges,
                } => {
                    let slot = Arc::clone(&self.elements.entry(key.clone()).or_default());
                    let mut guard = slot.lock();
                    let rebuilt = rebuilt_state(&guard, timestamp, &events, &purges)?;
                    self.install(&mut guard, &key, timestamp, &events, rebuilt, None)?;
                    self.clock.update_if_greater(timestamp);
                    max_sequence = events
                        .iter()
                        .map(|event| event.id.sequence)
                        .chain(max_sequence)
                        .max();
                }
                Operation::DeleteElement { key } => {
                    self.delete_single(&key, false)?;
                    if key.element_type == ElementType::Vertex {
                        self.adjacency.remove_vertex(&key.id);
                    }
                }
            }
        }
        if let Some(sequence) = max_sequence {
            self.sequence.store(sequence + 1, Ordering::SeqCst);
        }
        info!(elements = self.elements.len(), "wal replay finished");
        Ok(())
    }

    // ===== Reads =====

    /// The stored record of `key`, as of `at` or latest. Unfiltered.
    pub fn element_record(
        &self,
        key: &ElementKey,
        at: Option<Timestamp>,
    ) -> Option<Arc<ElementRecord>> {
        let slot = self.slot(key)?;
        let guard = slot.lock();
        let state = guard.state.as_ref()?;
        match at {
            None => Some(Arc::clone(state.current())),
            Some(ts) => state.chain.visible_at(ts).cloned(),
        }
    }

    /// The element as `authorizations` sees it, or `None` when it does not exist for them.
    pub fn get_element(
        &self,
        key: &ElementKey,
        fetch_hints: &FetchHints,
        at: Option<Timestamp>,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Element>> {
        let Some(record) = self.element_record(key, at) else {
            return Ok(None);
        };
        if !record.is_visible_to(fetch_hints, authorizations) {
            return Ok(None);
        }
        self.materialize(&record, fetch_hints, authorizations, at)
            .map(Some)
    }

    /// Lazily reads `keys`, skipping the ones not visible.
    pub fn get_elements<'a>(
        &'a self,
        keys: impl IntoIterator<Item = ElementKey> + 'a,
        fetch_hints: &'a FetchHints,
        authorizations: &'a Authorizations,
    ) -> impl Iterator<Item = StorageResult<Element>> + 'a {
        keys.into_iter().filter_map(move |key| {
            self.get_element(&key, fetch_hints, None, authorizations)
                .transpose()
        })
    }

    /// Lazily reads every visible element of `element_type`, in key order.
    pub fn elements<'a>(
        &'a self,
        element_type: ElementType,
        fetch_hints: &'a FetchHints,
        authorizations: &'a Authorizations,
    ) -> impl Iterator<Item = StorageResult<Element>> + 'a {
        let keys: Vec<ElementKey> = self
            .elements
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.element_type == element_type)
            .sorted()
            .collect();
        self.get_elements(keys, fetch_hints, authorizations)
    }

    /// Builds the caller's view of `record`, including its edge refs when requested.
    pub fn materialize(
        &self,
        record: &ElementRecord,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
        at: Option<Timestamp>,
    ) -> StorageResult<Element> {
        let edge_refs = match record.key.element_type {
            ElementType::Edge => Vec::new(),
            ElementType::Vertex => {
                let direction = if fetch_hints.is_include_edge_labels_and_counts()
                    || fetch_hints.is_include_edge_refs(Direction::Both)
                {
                    Some(Direction::Both)
                } else if fetch_hints.is_include_edge_refs(Direction::Out) {
                    Some(Direction::Out)
                } else if fetch_hints.is_include_edge_refs(Direction::In) {
                    Some(Direction::In)
                } else {
                    None
                };
                match direction {
                    Some(direction) => {
                        self.edge_refs(&record.key, direction, fetch_hints, authorizations, at)
                    }
                    None => Vec::new(),
                }
            }
        };
        Element::from_record(record, fetch_hints, authorizations, edge_refs)
    }

    /// Edges of `vertex` visible to the caller at `at`, in (label, other vertex, edge) order.
    ///
    /// An edge is only returned if the vertex on its other side is visible too.
    pub fn edge_refs(
        &self,
        vertex: &ElementKey,
        direction: Direction,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
        at: Option<Timestamp>,
    ) -> Vec<EdgeRef> {
        let mut refs: Vec<EdgeRef> = self
            .adjacency
            .neighbors(&vertex.id, direction)
            .into_iter()
            .filter_map(|(side, neighbor)| {
                let edge = self.element_record(&ElementKey::edge(neighbor.edge_id().clone()), at)?;
                if !edge.is_visible_to(fetch_hints, authorizations) {
                    return None;
                }
                let other_key = ElementKey::vertex(neighbor.neighbor_id().clone());
                let other = self.element_record(&other_key, at)?;
                if !other.is_visible_to(fetch_hints, authorizations) {
                    return None;
                }
                let label = edge.edge.as_ref()?.label.clone();
                Some(EdgeRef {
                    label,
                    other_vertex_id: neighbor.neighbor_id().clone(),
                    edge_id: neighbor.edge_id().clone(),
                    direction: side,
                })
            })
            .collect();
        refs.sort();
        refs
    }

    /// Visible extended data rows of an element, optionally of one table.
    pub fn extended_data(
        &self,
        key: &ElementKey,
        table: Option<&str>,
        at: Option<Timestamp>,
        authorizations: &Authorizations,
        include_hidden: bool,
    ) -> Vec<ExtendedDataRow> {
        let Some(record) = self.element_record(key, at) else {
            return Vec::new();
        };
        let element_hints = if include_hidden {
            FetchHints::ALL_INCLUDING_HIDDEN
        } else {
            FetchHints::ALL
        };
        if !record.is_visible_to(&element_hints, authorizations) {
            return Vec::new();
        }
        let cells = record
            .extended_data
            .iter()
            .filter(|(id, _)| table.is_none_or(|t| id.table.as_str() == t));
        materialize_rows(key, cells, authorizations, include_hidden)
    }

    /// Historical events of `keys` readable by the caller, shaped by `fetch_hints`.
    ///
    /// Pass the previous page's [`HistoricalEvents::last_event_id`] as `after` to continue.
    pub fn historical_events(
        &self,
        keys: &[ElementKey],
        after: Option<&HistoricalEventId>,
        fetch_hints: &HistoricalEventsFetchHints,
        authorizations: &Authorizations,
    ) -> HistoricalEvents {
        let events: Vec<HistoricalEvent> = keys
            .iter()
            .sorted()
            .dedup()
            .filter(|key| {
                self.element_record(key, None).is_none_or(|record| {
                    record
                        .additional_visibilities
                        .iter()
                        .all(|v| authorizations.can_read(v))
                })
            })
            .flat_map(|key| self.events_of(key))
            .collect();
        select_events(&events, after, fetch_hints, authorizations)
    }

    fn events_of(&self, key: &ElementKey) -> Vec<HistoricalEvent> {
        self.slot(key)
            .and_then(|slot| slot.lock().state.as_ref().map(|state| state.events.clone()))
            .unwrap_or_default()
    }

    /// Rebuilds the element from its event log alone, as of `at` or latest.
    pub fn replay_element(
        &self,
        key: &ElementKey,
        at: Option<Timestamp>,
    ) -> StorageResult<Option<ElementRecord>> {
        let events = self.events_of(key);
        replay_until(&events, at.unwrap_or(Timestamp::MAX))
    }
}

/// Fails with [`StorageError::SecurityViolation`] if the live element in `slot` is not readable.
fn check_readable(
    slot: &SlotState,
    key: &ElementKey,
    authorizations: &Authorizations,
) -> StorageResult<()> {
    let Some(state) = slot.state.as_ref() else {
        return Ok(());
    };
    let record = state.current();
    if !record.is_soft_deleted() && !authorizations.can_read(&record.visibility) {
        return Err(StorageError::SecurityViolation(format!(
            "{key} is not visible to the given authorizations"
        )));
    }
    Ok(())
}

/// The element state after appending `events` at `timestamp`, if the log has to be rewritten.
///
/// Purges remove history and backfills land before the latest version, so in both cases the
/// log is re-sorted and the version chain rebuilt from it. Returns `None` when the events can
/// simply be appended.
fn rebuilt_state(
    slot: &SlotState,
    timestamp: Timestamp,
    events: &[HistoricalEvent],
    purges: &[Purge],
) -> StorageResult<Option<ElementState>> {
    let backfill = slot
        .state
        .as_ref()
        .is_some_and(|state| timestamp <= state.chain.commit_ts());
    if purges.is_empty() && !backfill {
        return Ok(None);
    }
    let mut log: Vec<HistoricalEvent> = slot
        .state
        .as_ref()
        .map(|state| state.events.clone())
        .unwrap_or_default();
    log.retain(|event| !purges.iter().any(|purge| event.kind.touches(purge)));
    log.extend_from_slice(events);
    log.sort_by_key(|event| event.id);
    let Some(chain) = rebuild_chain(&log)? else {
        return Err(StorageError::InvalidMutation(
            "history has no element creation left".to_string(),
        ));
    };
    Ok(Some(ElementState { chain, events: log }))
}

/// Folds a log into a version chain, one version per distinct timestamp.
fn rebuild_chain(
    events: &[HistoricalEvent],
) -> StorageResult<Option<VersionChain<Arc<ElementRecord>>>> {
    let mut record = None;
    let mut chain: Option<VersionChain<Arc<ElementRecord>>> = None;
    for (timestamp, group) in &events.iter().chunk_by(|event| event.id.timestamp) {
        for event in group {
            apply_event(&mut record, event)?;
        }
        let Some(current) = record.as_ref() else {
            continue;
        };
        let snapshot = Arc::new(current.clone());
        match chain.as_mut() {
            Some(chain) => {
                chain.install(snapshot, timestamp);
            }
            None => chain = Some(VersionChain::new(snapshot, timestamp)),
        }
    }
    Ok(chain)
}
