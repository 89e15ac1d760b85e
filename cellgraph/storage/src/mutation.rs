//! Batches of intended changes to one element.
//!
//! A builder accumulates typed operations and records the first validation failure instead of
//! panicking or returning early from every setter; [`ElementMutationBuilder::build`] surfaces it.
//! Nothing touches stored state until the finished [`Mutation`] is applied.

use cellgraph_common::identifier::{IdentifierKind, validate_identifier};
use cellgraph_common::types::{ElementId, ElementKey, ElementType, Name};
use cellgraph_common::value::Value;
use cellgraph_security::Visibility;
use cellgraph_version::Timestamp;

use crate::error::{NotFoundError, StorageError, StorageResult};
use crate::model::element::Element;
use crate::model::extended_data::ExtendedDataCellId;
use crate::model::metadata::Metadata;
use crate::model::property::PropertyIdentity;
use crate::model::record::EdgeEndpoints;

/// One typed operation of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    /// Creates the element, restores it after a soft delete, or updates its visibility.
    AddOrUpdateElement {
        visibility: Visibility,
        edge: Option<EdgeEndpoints>,
    },
    AlterElementVisibility {
        visibility: Visibility,
    },
    SoftDeleteElement,
    MarkElementHidden {
        visibility: Visibility,
    },
    MarkElementVisible {
        visibility: Visibility,
    },
    AddAdditionalVisibility {
        visibility: Visibility,
    },
    DeleteAdditionalVisibility {
        visibility: Visibility,
    },
    AlterEdgeLabel {
        label: Name,
    },
    SetProperty {
        property: PropertyIdentity,
        value: Value,
        metadata: Metadata,
        timestamp: Option<Timestamp>,
    },
    /// Hard removal: no event, and the property's history is purged.
    DeleteProperty {
        property: PropertyIdentity,
    },
    SoftDeleteProperty {
        property: PropertyIdentity,
    },
    MarkPropertyHidden {
        property: PropertyIdentity,
        visibility: Visibility,
    },
    MarkPropertyVisible {
        property: PropertyIdentity,
        visibility: Visibility,
    },
    /// Moves the value to a new visibility. Metadata is dropped.
    AlterPropertyVisibility {
        property: PropertyIdentity,
        visibility: Visibility,
    },
    /// Moves the value to a new visibility, copying the metadata forward.
    AlterPropertyVisibilityCarryMetadata {
        property: PropertyIdentity,
        visibility: Visibility,
    },
    SetPropertyMetadata {
        property: PropertyIdentity,
        name: Name,
        value: Value,
        visibility: Visibility,
    },
    AddExtendedData {
        cell: ExtendedDataCellId,
        value: Value,
        timestamp: Option<Timestamp>,
    },
    SoftDeleteExtendedData {
        cell: ExtendedDataCellId,
    },
    MarkExtendedDataHidden {
        cell: ExtendedDataCellId,
        visibility: Visibility,
    },
    MarkExtendedDataVisible {
        cell: ExtendedDataCellId,
        visibility: Visibility,
    },
    DeleteExtendedData {
        cell: ExtendedDataCellId,
    },
    DeleteExtendedDataRow {
        table: Name,
        row_id: Name,
    },
}

impl MutationOp {
    /// Every visibility this operation writes.
    pub fn written_visibilities(&self) -> Vec<&Visibility> {
        match self {
            MutationOp::AddOrUpdateElement { visibility, .. }
            | MutationOp::AlterElementVisibility { visibility }
            | MutationOp::MarkElementHidden { visibility }
            | MutationOp::MarkElementVisible { visibility }
            | MutationOp::AddAdditionalVisibility { visibility }
            | MutationOp::DeleteAdditionalVisibility { visibility } => vec![visibility],
            MutationOp::SoftDeleteElement
            | MutationOp::AlterEdgeLabel { .. }
            | MutationOp::DeleteExtendedDataRow { .. } => vec![],
            MutationOp::SetProperty {
                property, metadata, ..
            } => std::iter::once(&property.visibility)
                .chain(metadata.visibilities())
                .collect(),
            MutationOp::DeleteProperty { property }
            | MutationOp::SoftDeleteProperty { property } => vec![&property.visibility],
            MutationOp::MarkPropertyHidden {
                property,
                visibility,
            }
            | MutationOp::MarkPropertyVisible {
                property,
                visibility,
            }
            | MutationOp::AlterPropertyVisibility {
                property,
                visibility,
            }
            | MutationOp::AlterPropertyVisibilityCarryMetadata {
                property,
                visibility,
            }
            | MutationOp::SetPropertyMetadata {
                property,
                visibility,
                ..
            } => vec![&property.visibility, visibility],
            MutationOp::AddExtendedData { cell, .. }
            | MutationOp::SoftDeleteExtendedData { cell }
            | MutationOp::DeleteExtendedData { cell } => vec![&cell.visibility],
            MutationOp::MarkExtendedDataHidden { cell, visibility }
            | MutationOp::MarkExtendedDataVisible { cell, visibility } => {
                vec![&cell.visibility, visibility]
            }
        }
    }
}

/// A validated, immutable batch of operations against one element.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    key: ElementKey,
    ops: Vec<MutationOp>,
    timestamp: Option<Timestamp>,
    index: bool,
}

impl Mutation {
    #[inline]
    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    #[inline]
    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    /// Explicit timestamp for historical backfills.
    #[inline]
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// False when the caller asked for the search index to be skipped.
    #[inline]
    pub fn should_index(&self) -> bool {
        self.index
    }

    pub fn written_visibilities(&self) -> impl Iterator<Item = &Visibility> {
        self.ops.iter().flat_map(MutationOp::written_visibilities)
    }

    /// (name, value) of every property value this mutation sets.
    pub fn property_writes(&self) -> impl Iterator<Item = (&Name, &Value)> {
        self.ops.iter().filter_map(|op| match op {
            MutationOp::SetProperty {
                property, value, ..
            } => Some((&property.name, value)),
            _ => None,
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Operations accumulated by a builder, plus the first validation failure.
#[derive(Debug)]
pub struct PendingMutation {
    key: ElementKey,
    ops: Vec<MutationOp>,
    timestamp: Option<Timestamp>,
    index: bool,
    error: Option<StorageError>,
}

impl PendingMutation {
    fn new(key: ElementKey) -> Self {
        let mut pending = Self {
            key,
            ops: Vec::new(),
            timestamp: None,
            index: true,
            error: None,
        };
        let id = pending.key.id.clone();
        pending.check_identifier(IdentifierKind::ElementId, &id);
        pending
    }

    fn fail(&mut self, error: StorageError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn check_identifier(&mut self, kind: IdentifierKind, value: &str) {
        if let Err(e) = validate_identifier(kind, value) {
            self.fail(e.into());
        }
    }

    fn check_property(&mut self, property: &PropertyIdentity) {
        self.check_identifier(IdentifierKind::PropertyKey, &property.key);
        self.check_identifier(IdentifierKind::PropertyName, &property.name);
    }

    fn check_cell(&mut self, cell: &ExtendedDataCellId) {
        self.check_identifier(IdentifierKind::TableName, &cell.table);
        self.check_identifier(IdentifierKind::RowId, &cell.row_id);
        self.check_identifier(IdentifierKind::ColumnName, &cell.column);
        self.check_identifier(IdentifierKind::PropertyKey, &cell.key);
    }

    fn check_value(&mut self, key: &Name, name: &Name, value: &Value) {
        if value.is_null() {
            self.fail(StorageError::NullPropertyValue {
                key: key.clone(),
                name: name.clone(),
            });
        }
    }

    fn push(&mut self, op: MutationOp) {
        self.ops.push(op);
    }

    fn finish(self) -> StorageResult<Mutation> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Mutation {
            key: self.key,
            ops: self.ops,
            timestamp: self.timestamp,
            index: self.index,
        })
    }
}

/// Operations shared by new-element and existing-element mutations.
///
/// Setters consume and return the builder so calls chain; invalid input is reported by
/// [`build`](ElementMutationBuilder::build).
pub trait ElementMutationBuilder: Sized {
    fn pending(&mut self) -> &mut PendingMutation;

    fn into_pending(self) -> PendingMutation;

    fn key(&mut self) -> ElementKey {
        self.pending().key.clone()
    }

    /// Adds or overwrites the property identified by (key, name, visibility).
    fn set_property(
        self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        value: impl Into<Value>,
        visibility: Visibility,
    ) -> Self {
        self.set_property_with_metadata(key, name, value, Metadata::create(), visibility)
    }

    /// Adds or overwrites a property, replacing its metadata wholesale.
    fn set_property_with_metadata(
        mut self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        value: impl Into<Value>,
        metadata: Metadata,
        visibility: Visibility,
    ) -> Self {
        push_set_property(
            self.pending(),
            PropertyIdentity::new(key, name, visibility),
            value.into(),
            metadata,
            None,
        );
        self
    }

    /// Like [`set_property_with_metadata`](Self::set_property_with_metadata) with an explicit
    /// property timestamp.
    fn set_property_at(
        mut self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        value: impl Into<Value>,
        metadata: Metadata,
        visibility: Visibility,
        timestamp: Timestamp,
    ) -> Self {
        push_set_property(
            self.pending(),
            PropertyIdentity::new(key, name, visibility),
            value.into(),
            metadata,
            Some(timestamp),
        );
        self
    }

    fn delete_property(
        self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        visibility: Visibility,
    ) -> Self {
        self.property_op(PropertyIdentity::new(key, name, visibility), |property| {
            MutationOp::DeleteProperty { property }
        })
    }

    fn soft_delete_property(
        self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        visibility: Visibility,
    ) -> Self {
        self.property_op(PropertyIdentity::new(key, name, visibility), |property| {
            MutationOp::SoftDeleteProperty { property }
        })
    }

    fn mark_property_hidden(
        self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        property_visibility: Visibility,
        hidden_visibility: Visibility,
    ) -> Self {
        self.property_op(
            PropertyIdentity::new(key, name, property_visibility),
            |property| MutationOp::MarkPropertyHidden {
                property,
                visibility: hidden_visibility,
            },
        )
    }

    fn mark_property_visible(
        self,
        key: impl Into<Name>,
        name: impl Into<Name>,
        property_visibility: Visibility,
        hidden_visibility: Visibility,
    ) -> Self {
        self.property_op(
            PropertyIdentity::new(key, name, property_visibility),
            |property| MutationOp::MarkPropertyVisible {
                property,
                visibility: hidden_visibility,
            },
        )
    }

    /// Sets one metadata entry in place, keeping the property's value.
    fn set_property_metadata(
        mut self,
        property: PropertyIdentity,
        metadata_name: impl Into<Name>,
        value: impl Into<Value>,
        metadata_visibility: Visibility,
    ) -> Self {
        let name = metadata_name.into();
        let value = value.into();
        let pending = self.pending();
        pending.check_property(&property);
        pending.check_identifier(IdentifierKind::MetadataName, &name);
        pending.check_value(&property.key, &property.name, &value);
        pending.push(MutationOp::SetPropertyMetadata {
            property,
            name,
            value,
            visibility: metadata_visibility,
        });
        self
    }

    fn alter_element_visibility(mut self, visibility: Visibility) -> Self {
        self.pending()
            .push(MutationOp::AlterElementVisibility { visibility });
        self
    }

    fn mark_hidden(mut self, visibility: Visibility) -> Self {
        self.pending()
            .push(MutationOp::MarkElementHidden { visibility });
        self
    }

    fn mark_visible(mut self, visibility: Visibility) -> Self {
        self.pending()
            .push(MutationOp::MarkElementVisible { visibility });
        self
    }

    fn soft_delete(mut self) -> Self {
        self.pending().push(MutationOp::SoftDeleteElement);
        self
    }

    fn add_additional_visibility(mut self, visibility: Visibility) -> Self {
        self.pending()
            .push(MutationOp::AddAdditionalVisibility { visibility });
        self
    }

    fn delete_additional_visibility(mut self, visibility: Visibility) -> Self {
        self.pending()
            .push(MutationOp::DeleteAdditionalVisibility { visibility });
        self
    }

    fn alter_edge_label(mut self, label: impl Into<Name>) -> Self {
        let label = label.into();
        let pending = self.pending();
        if pending.key.element_type != ElementType::Edge {
            let message = format!("cannot alter the label of {}", pending.key);
            pending.fail(StorageError::InvalidMutation(message));
        }
        pending.check_identifier(IdentifierKind::EdgeLabel, &label);
        pending.push(MutationOp::AlterEdgeLabel { label });
        self
    }

    fn add_extended_data(self, cell: ExtendedDataCellId, value: impl Into<Value>) -> Self {
        self.add_extended_data_inner(cell, value.into(), None)
    }

    fn add_extended_data_at(
        self,
        cell: ExtendedDataCellId,
        value: impl Into<Value>,
        timestamp: Timestamp,
    ) -> Self {
        self.add_extended_data_inner(cell, value.into(), Some(timestamp))
    }

    #[doc(hidden)]
    fn add_extended_data_inner(
        mut self,
        cell: ExtendedDataCellId,
        value: Value,
        timestamp: Option<Timestamp>,
    ) -> Self {
        let pending = self.pending();
        pending.check_cell(&cell);
        pending.check_value(&cell.key, &cell.column, &value);
        pending.push(MutationOp::AddExtendedData {
            cell,
            value,
            timestamp,
        });
        self
    }

    fn soft_delete_extended_data(self, cell: ExtendedDataCellId) -> Self {
        self.cell_op(cell, |cell| MutationOp::SoftDeleteExtendedData { cell })
    }

    fn mark_extended_data_hidden(self, cell: ExtendedDataCellId, visibility: Visibility) -> Self {
        self.cell_op(cell, |cell| MutationOp::MarkExtendedDataHidden { cell, visibility })
    }

    fn mark_extended_data_visible(self, cell: ExtendedDataCellId, visibility: Visibility) -> Self {
        self.cell_op(cell, |cell| MutationOp::MarkExtendedDataVisible { cell, visibility })
    }

    /// Hard removal of one cell and its history.
    fn delete_extended_data(self, cell: ExtendedDataCellId) -> Self {
        self.cell_op(cell, |cell| MutationOp::DeleteExtendedData { cell })
    }

    /// Hard removal of every cell of a row and their history.
    fn delete_extended_data_row(mut self, table: impl Into<Name>, row_id: impl Into<Name>) -> Self {
        let table = table.into();
        let row_id = row_id.into();
        let pending = self.pending();
        pending.check_identifier(IdentifierKind::TableName, &table);
        pending.check_identifier(IdentifierKind::RowId, &row_id);
        pending.push(MutationOp::DeleteExtendedDataRow { table, row_id });
        self
    }

    /// Uses `timestamp` instead of the clock. It must be later than the element's latest change.
    fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.pending().timestamp = Some(timestamp);
        self
    }

    /// Skips the search index for this mutation.
    fn without_indexing(mut self) -> Self {
        self.pending().index = false;
        self
    }

    fn build(self) -> StorageResult<Mutation> {
        self.into_pending().finish()
    }

    #[doc(hidden)]
    fn property_op(
        mut self,
        property: PropertyIdentity,
        op: impl FnOnce(PropertyIdentity) -> MutationOp,
    ) -> Self {
        let pending = self.pending();
        pending.check_property(&property);
        pending.push(op(property));
        self
    }

    #[doc(hidden)]
    fn cell_op(
        mut self,
        cell: ExtendedDataCellId,
        op: impl FnOnce(ExtendedDataCellId) -> MutationOp,
    ) -> Self {
        let pending = self.pending();
        pending.check_cell(&cell);
        pending.push(op(cell));
        self
    }
}

fn push_set_property(
    pending: &mut PendingMutation,
    property: PropertyIdentity,
    value: Value,
    metadata: Metadata,
    timestamp: Option<Timestamp>,
) {
    pending.check_property(&property);
    pending.check_value(&property.key, &property.name, &value);
    for entry in metadata.iter() {
        pending.check_identifier(IdentifierKind::MetadataName, entry.name);
        pending.check_value(&property.key, &property.name, entry.value);
    }
    pending.push(MutationOp::SetProperty {
        property,
        value,
        metadata,
        timestamp,
    });
}

/// Mutation that creates an element, or updates it if it already exists.
#[derive(Debug)]
pub struct ElementMutation {
    pending: PendingMutation,
}

impl ElementMutation {
    pub fn vertex(id: impl Into<ElementId>, visibility: Visibility) -> Self {
        let mut pending = PendingMutation::new(ElementKey::vertex(id));
        pending.push(MutationOp::AddOrUpdateElement {
            visibility,
            edge: None,
        });
        Self { pending }
    }

    pub fn edge(
        id: impl Into<ElementId>,
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
        label: impl Into<Name>,
        visibility: Visibility,
    ) -> Self {
        let endpoints = EdgeEndpoints::new(out_vertex_id, in_vertex_id, label);
        let mut pending = PendingMutation::new(ElementKey::edge(id));
        pending.check_identifier(IdentifierKind::ElementId, &endpoints.out_vertex_id);
        pending.check_identifier(IdentifierKind::ElementId, &endpoints.in_vertex_id);
        pending.check_identifier(IdentifierKind::EdgeLabel, &endpoints.label);
        pending.push(MutationOp::AddOrUpdateElement {
            visibility,
            edge: Some(endpoints),
        });
        Self { pending }
    }
}

impl ElementMutationBuilder for ElementMutation {
    fn pending(&mut self) -> &mut PendingMutation {
        &mut self.pending
    }

    fn into_pending(self) -> PendingMutation {
        self.pending
    }
}

/// Mutation of an element the caller has already read.
///
/// Operations that address properties by name or by partial identity are resolved against that
/// snapshot, so they only touch properties the caller could see.
#[derive(Debug)]
pub struct ExistingElementMutation {
    element: Element,
    pending: PendingMutation,
}

impl ExistingElementMutation {
    pub fn new(element: Element) -> Self {
        let pending = PendingMutation::new(element.key().clone());
        Self { element, pending }
    }

    #[inline]
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Hard-deletes every visible instance of property `name`.
    pub fn delete_properties(mut self, name: &str) -> Self {
        for property in self.resolve_named(name) {
            self.pending.push(MutationOp::DeleteProperty { property });
        }
        self
    }

    /// Soft-deletes every visible instance of property `name`.
    pub fn soft_delete_properties(mut self, name: &str) -> Self {
        for property in self.resolve_named(name) {
            self.pending
                .push(MutationOp::SoftDeleteProperty { property });
        }
        self
    }

    /// Moves the visible property (key, name) to `visibility`, dropping its metadata.
    pub fn alter_property_visibility(
        mut self,
        key: &str,
        name: &str,
        visibility: Visibility,
    ) -> Self {
        if let Some(property) = self.resolve_one(key, name) {
            self.pending.push(MutationOp::AlterPropertyVisibility {
                property,
                visibility,
            });
        }
        self
    }

    /// Moves the visible property (key, name) to `visibility` and keeps its metadata.
    pub fn alter_property_visibility_carrying_metadata(
        mut self,
        key: &str,
        name: &str,
        visibility: Visibility,
    ) -> Self {
        if let Some(property) = self.resolve_one(key, name) {
            self.pending
                .push(MutationOp::AlterPropertyVisibilityCarryMetadata {
                    property,
                    visibility,
                });
        }
        self
    }

    fn resolve_named(&mut self, name: &str) -> Vec<PropertyIdentity> {
        match self.element.properties_named(name) {
            Ok(properties) => properties.map(|p| p.identity().clone()).collect(),
            Err(e) => {
                self.pending.fail(e);
                Vec::new()
            }
        }
    }

    fn resolve_one(&mut self, key: &str, name: &str) -> Option<PropertyIdentity> {
        match self.element.property(Some(key), name, None) {
            Ok(Some(property)) => Some(property.identity().clone()),
            Ok(None) => {
                self.pending.fail(
                    NotFoundError::Property {
                        element: self.element.key().clone(),
                        key: key.into(),
                        name: name.into(),
                    }
                    .into(),
                );
                None
            }
            Err(e) => {
                self.pending.fail(e);
                None
            }
        }
    }
}

impl ElementMutationBuilder for ExistingElementMutation {
    fn pending(&mut self) -> &mut PendingMutation {
        &mut self.pending
    }

    fn into_pending(self) -> PendingMutation {
        self.pending
    }
}
