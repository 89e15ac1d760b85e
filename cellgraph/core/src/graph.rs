use std::sync::Arc;

use cellgraph_common::types::{Direction, ElementId, ElementKey, ElementType, Name};
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_storage::error::{NotFoundError, StorageError, StorageResult};
use cellgraph_storage::history::{HistoricalEventId, HistoricalEvents, HistoricalEventsFetchHints};
use cellgraph_storage::model::element::{Edge, Element, Vertex};
use cellgraph_storage::model::extended_data::ExtendedDataRow;
use cellgraph_storage::model::fetch_hints::FetchHints;
use cellgraph_storage::model::metadata::MetadataDefaultsPolicy;
use cellgraph_storage::model::record::ElementRecord;
use cellgraph_storage::mutation::{ElementMutation, Mutation, MutationOp};
use cellgraph_storage::MemoryStore;
use cellgraph_version::Timestamp;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::GraphConfig;
use crate::definition::{PropertyDefinition, PropertyDefinitions};
use crate::notification::GraphEvent;
use crate::search::{NoopSearchIndex, SearchIndex};

/// A property graph with cell-level visibility.
///
/// Writes go through [`Graph::save`], which checks the caller's authorizations, applies the
/// mutation to the store and forwards the result to the search index. Reads filter everything
/// by the caller's authorizations and fetch hints.
pub struct Graph {
    store: MemoryStore,
    search_index: Arc<dyn SearchIndex>,
    definitions: PropertyDefinitions,
    strict_typing: bool,
    index_on_save: bool,
    notifications: Mutex<Vec<GraphEvent>>,
}

impl Graph {
    pub fn open(config: GraphConfig) -> StorageResult<Self> {
        Self::open_with(config, Arc::new(NoopSearchIndex), None)
    }

    pub fn open_with(
        config: GraphConfig,
        search_index: Arc<dyn SearchIndex>,
        metadata_defaults: Option<Arc<dyn MetadataDefaultsPolicy>>,
    ) -> StorageResult<Self> {
        let store = MemoryStore::open_with_policy(config.store, metadata_defaults)?;
        info!(
            strict_typing = config.strict_typing,
            index_on_save = config.index_on_save,
            "graph opened"
        );
        Ok(Self {
            store,
            search_index,
            definitions: PropertyDefinitions::new(),
            strict_typing: config.strict_typing,
            index_on_save: config.index_on_save,
            notifications: Mutex::new(Vec::new()),
        })
    }

    /// A graph without a write-ahead log or search index.
    pub fn in_memory() -> Self {
        Self {
            store: MemoryStore::in_memory(),
            search_index: Arc::new(NoopSearchIndex),
            definitions: PropertyDefinitions::new(),
            strict_typing: false,
            index_on_save: true,
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn search_index(&self) -> &Arc<dyn SearchIndex> {
        &self.search_index
    }

    fn generate_id() -> ElementId {
        uuid::Uuid::new_v4().simple().to_string().into()
    }

    // ===== Writes =====

    /// Starts a mutation that creates or updates a vertex. A random id is used if none is given.
    pub fn prepare_vertex(&self, id: Option<&str>, visibility: Visibility) -> ElementMutation {
        let id = id.map_or_else(Self::generate_id, ElementId::from);
        ElementMutation::vertex(id, visibility)
    }

    /// Starts a mutation that creates or updates an edge. A random id is used if none is given.
    pub fn prepare_edge(
        &self,
        id: Option<&str>,
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
        label: impl Into<Name>,
        visibility: Visibility,
    ) -> ElementMutation {
        let id = id.map_or_else(Self::generate_id, ElementId::from);
        ElementMutation::edge(id, out_vertex_id, in_vertex_id, label, visibility)
    }

    /// Applies `mutation` on behalf of a caller holding `authorizations`.
    ///
    /// Fails with [`StorageError::SecurityViolation`] before anything changes if the caller
    /// cannot read a visibility the mutation writes, or the current visibility of an element it
    /// updates. Returns the element as stored, hidden parts included.
    ///
    /// Once the store accepted the mutation it stays committed: a failing search index is logged
    /// and left to catch up, it does not fail the save.
    #[instrument(skip_all, fields(element = %mutation.key()))]
    pub fn save(
        &self,
        mutation: &Mutation,
        authorizations: &Authorizations,
    ) -> StorageResult<Element> {
        self.check_writable(mutation, authorizations)?;
        self.definitions.check(mutation, self.strict_typing)?;

        let applied = self.store.apply_as(mutation, authorizations)?;
        debug!(events = applied.events.len(), timestamp = %applied.timestamp, "mutation saved");
        self.notifications
            .lock()
            .extend(applied.events.iter().cloned().map(GraphEvent::Changed));

        let element = self.store.materialize(
            &applied.record,
            &FetchHints::ALL_INCLUDING_HIDDEN,
            authorizations,
            None,
        )?;
        if self.index_on_save
            && mutation.should_index()
            && let Err(error) = self.index(mutation, &applied.record, &element, authorizations)
        {
            warn!(%error, "search index update failed");
        }
        Ok(element)
    }

    /// Rejects mutations writing a visibility the caller cannot read.
    fn check_writable(
        &self,
        mutation: &Mutation,
        authorizations: &Authorizations,
    ) -> StorageResult<()> {
        if let Some(visibility) = mutation
            .written_visibilities()
            .find(|v| !authorizations.can_read(v))
        {
            return Err(StorageError::SecurityViolation(format!(
                "visibility {visibility:?} of {} is not satisfiable by the given authorizations",
                mutation.key()
            )));
        }
        Ok(())
    }

    /// Soft-deleted elements leave the index; everything else is re-sent.
    fn index(
        &self,
        mutation: &Mutation,
        record: &ElementRecord,
        element: &Element,
        authorizations: &Authorizations,
    ) -> StorageResult<()> {
        if record.is_soft_deleted() {
            return self
                .search_index
                .delete_element(mutation.key(), authorizations);
        }
        self.search_index
            .add_elements(std::slice::from_ref(element), authorizations)?;
        let touches_extended_data = mutation.ops().iter().any(|op| {
            matches!(
                op,
                MutationOp::AddExtendedData { .. }
                    | MutationOp::SoftDeleteExtendedData { .. }
                    | MutationOp::MarkExtendedDataHidden { .. }
                    | MutationOp::MarkExtendedDataVisible { .. }
                    | MutationOp::DeleteExtendedData { .. }
                    | MutationOp::DeleteExtendedDataRow { .. }
            )
        });
        if touches_extended_data {
            let rows = self
                .store
                .extended_data(mutation.key(), None, None, authorizations, true);
            self.search_index
                .add_extended_data(mutation.key(), &rows, authorizations)?;
        }
        Ok(())
    }

    /// Hard-deletes an element and, for a vertex, every edge attached to it.
    #[instrument(skip(self, authorizations))]
    pub fn delete_element(
        &self,
        key: &ElementKey,
        authorizations: &Authorizations,
    ) -> StorageResult<()> {
        let record = self
            .store
            .element_record(key, None)
            .ok_or_else(|| NotFoundError::Element(key.clone()))?;
        if !authorizations.can_read(&record.visibility) {
            return Err(StorageError::SecurityViolation(format!(
                "{key} is not visible to the given authorizations"
            )));
        }
        let deleted = self.store.delete_element(key)?;
        for key in &deleted {
            self.search_index.delete_element(key, authorizations)?;
        }
        self.notifications
            .lock()
            .extend(deleted.into_iter().map(GraphEvent::Deleted));
        Ok(())
    }

    /// Makes accepted changes durable and searchable, and returns the notifications produced
    /// since the previous flush.
    pub fn flush(&self) -> StorageResult<Vec<GraphEvent>> {
        self.store.flush()?;
        self.search_index.flush()?;
        Ok(std::mem::take(&mut *self.notifications.lock()))
    }

    // ===== Property definitions =====

    pub fn define_property(&self, definition: PropertyDefinition) {
        self.definitions.define(definition);
    }

    pub fn property_definition(&self, name: &str) -> StorageResult<PropertyDefinition> {
        self.definitions.get(name)
    }

    // ===== Reads =====

    pub fn get_element(
        &self,
        key: &ElementKey,
        fetch_hints: &FetchHints,
        at: Option<Timestamp>,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Element>> {
        self.store.get_element(key, fetch_hints, at, authorizations)
    }

    pub fn get_vertex(
        &self,
        id: &str,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Vertex>> {
        self.get_vertex_at(id, fetch_hints, None, authorizations)
    }

    /// The vertex as it was at `at`, or latest.
    pub fn get_vertex_at(
        &self,
        id: &str,
        fetch_hints: &FetchHints,
        at: Option<Timestamp>,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Vertex>> {
        Ok(self
            .get_element(&ElementKey::vertex(id), fetch_hints, at, authorizations)?
            .and_then(Element::into_vertex))
    }

    pub fn get_edge(
        &self,
        id: &str,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Edge>> {
        self.get_edge_at(id, fetch_hints, None, authorizations)
    }

    pub fn get_edge_at(
        &self,
        id: &str,
        fetch_hints: &FetchHints,
        at: Option<Timestamp>,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Edge>> {
        Ok(self
            .get_element(&ElementKey::edge(id), fetch_hints, at, authorizations)?
            .and_then(Element::into_edge))
    }

    /// Lazily reads `keys`, skipping the ones that are absent or not visible.
    pub fn get_elements<'a>(
        &'a self,
        keys: impl IntoIterator<Item = ElementKey> + 'a,
        fetch_hints: &'a FetchHints,
        authorizations: &'a Authorizations,
    ) -> impl Iterator<Item = StorageResult<Element>> + 'a {
        self.store.get_elements(keys, fetch_hints, authorizations)
    }

    pub fn get_vertices<'a>(
        &'a self,
        fetch_hints: &'a FetchHints,
        authorizations: &'a Authorizations,
    ) -> impl Iterator<Item = StorageResult<Vertex>> + 'a {
        self.store
            .elements(ElementType::Vertex, fetch_hints, authorizations)
            .filter_map_ok(Element::into_vertex)
    }

    pub fn get_edges<'a>(
        &'a self,
        fetch_hints: &'a FetchHints,
        authorizations: &'a Authorizations,
    ) -> impl Iterator<Item = StorageResult<Edge>> + 'a {
        self.store
            .elements(ElementType::Edge, fetch_hints, authorizations)
            .filter_map_ok(Element::into_edge)
    }

    /// The vertex at the `direction` end of `edge`, if the caller can see it.
    pub fn get_edge_vertex(
        &self,
        edge: &Edge,
        direction: Direction,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
    ) -> StorageResult<Option<Vertex>> {
        let id = edge.vertex_id(direction)?;
        self.get_vertex(id, fetch_hints, authorizations)
    }

    /// Extended data rows of an element visible to the caller, optionally of one table.
    pub fn get_extended_data(
        &self,
        key: &ElementKey,
        table: Option<&str>,
        authorizations: &Authorizations,
    ) -> Vec<ExtendedDataRow> {
        self.store
            .extended_data(key, table, None, authorizations, false)
    }

    pub fn get_historical_events(
        &self,
        keys: &[ElementKey],
        after: Option<&HistoricalEventId>,
        fetch_hints: &HistoricalEventsFetchHints,
        authorizations: &Authorizations,
    ) -> HistoricalEvents {
        self.store
            .historical_events(keys, after, fetch_hints, authorizations)
    }
}
