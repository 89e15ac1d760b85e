//! Applies a [`Mutation`] to the current state of an element.
//!
//! The merge is a pure function of (current record, mutation, timestamp): it returns the new
//! record, the historical events describing the transition and the history purges implied by
//! hard deletes. Every emitted event is folded into the working record through
//! [`apply_event`], so the returned record is exactly what replaying the events produces.

use std::collections::BTreeSet;

use cellgraph_common::types::ElementType;
use cellgraph_security::Visibility;
use cellgraph_version::Timestamp;
use tracing::debug;

use crate::error::{NotFoundError, StorageError, StorageResult};
use crate::history::{HistoricalEvent, HistoricalEventId, HistoricalEventKind, Purge, apply_event};
use crate::model::metadata::{Metadata, MetadataDefaultsPolicy};
use crate::model::property::PropertyIdentity;
use crate::model::record::{EdgeEndpoints, ElementRecord};
use crate::mutation::{Mutation, MutationOp};

/// Result of merging one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// State after the mutation. `None` only if the element never existed and the mutation
    /// emitted nothing.
    pub record: Option<ElementRecord>,
    pub events: Vec<HistoricalEvent>,
    /// History to remove from the element's log, from hard deletes.
    pub purges: Vec<Purge>,
}

impl MergeOutcome {
    /// True when the mutation changed nothing and recorded nothing.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.purges.is_empty()
    }
}

/// Merges `mutation` into `current` at `timestamp`.
///
/// `next_sequence` hands out the tie-breaking sequence numbers of the emitted events. Metadata
/// entries `policy` reports as defaults are not stored.
pub fn merge(
    current: Option<&ElementRecord>,
    mutation: &Mutation,
    timestamp: Timestamp,
    policy: Option<&dyn MetadataDefaultsPolicy>,
    next_sequence: impl FnMut() -> u64,
) -> StorageResult<MergeOutcome> {
    let starts_with_add = matches!(
        mutation.ops().first(),
        Some(MutationOp::AddOrUpdateElement { .. })
    );
    let live = current.is_some_and(|record| !record.is_soft_deleted());
    if !starts_with_add && !live {
        if mutation.is_empty() {
            return Ok(MergeOutcome {
                record: current.cloned(),
                events: Vec::new(),
                purges: Vec::new(),
            });
        }
        return Err(NotFoundError::Element(mutation.key().clone()).into());
    }

    let mut merger = Merger {
        record: current.cloned(),
        events: Vec::new(),
        purges: Vec::new(),
        timestamp,
        policy,
        next_sequence,
    };
    for op in mutation.ops() {
        merger.apply_op(mutation, op)?;
    }
    Ok(MergeOutcome {
        record: merger.record,
        events: merger.events,
        purges: merger.purges,
    })
}

struct Merger<'a, F> {
    record: Option<ElementRecord>,
    events: Vec<HistoricalEvent>,
    purges: Vec<Purge>,
    timestamp: Timestamp,
    policy: Option<&'a dyn MetadataDefaultsPolicy>,
    next_sequence: F,
}

impl<F: FnMut() -> u64> Merger<'_, F> {
    fn record(&self, mutation: &Mutation) -> StorageResult<&ElementRecord> {
        self.record
            .as_ref()
            .ok_or_else(|| NotFoundError::Element(mutation.key().clone()).into())
    }

    /// Records `kind` and folds it into the working record. The event carries the element's
    /// visibilities as they are after it.
    fn emit(&mut self, mutation: &Mutation, kind: HistoricalEventKind) -> StorageResult<()> {
        let mut event = HistoricalEvent {
            id: HistoricalEventId::new(self.timestamp, (self.next_sequence)()),
            element: mutation.key().clone(),
            element_visibility: Visibility::empty(),
            additional_visibilities: BTreeSet::new(),
            kind,
        };
        apply_event(&mut self.record, &event)?;
        let record = self.record(mutation)?;
        event.element_visibility = record.visibility.clone();
        event.additional_visibilities = record.additional_visibilities.clone();
        self.events.push(event);
        Ok(())
    }

    fn purge(&mut self, purge: Purge) {
        self.events.retain(|event| !event.kind.touches(&purge));
        self.purges.push(purge);
    }

    fn stored_metadata(&self, metadata: Metadata) -> Metadata {
        match self.policy {
            Some(policy) => metadata.without_defaults(policy),
            None => metadata,
        }
    }

    fn apply_op(&mut self, mutation: &Mutation, op: &MutationOp) -> StorageResult<()> {
        match op {
            MutationOp::AddOrUpdateElement { visibility, edge } => {
                self.add_or_update(mutation, visibility, edge.as_ref())
            }
            MutationOp::AlterElementVisibility { visibility } => {
                let old = self.record(mutation)?.visibility.clone();
                if &old == visibility {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::AlterElementVisibility {
                        old_visibility: old,
                        new_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::SoftDeleteElement => {
                if self.record(mutation)?.is_soft_deleted() {
                    return Ok(());
                }
                self.emit(mutation, HistoricalEventKind::SoftDeleteElement)
            }
            MutationOp::MarkElementHidden { visibility } => {
                if self.record(mutation)?.hidden.contains_key(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::MarkHiddenElement {
                        hidden_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::MarkElementVisible { visibility } => {
                if !self.record(mutation)?.hidden.contains_key(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::MarkVisibleElement {
                        hidden_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::AddAdditionalVisibility { visibility } => {
                let record = self.record(mutation)?;
                if record.additional_visibilities.contains(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::AddAdditionalVisibility {
                        visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::DeleteAdditionalVisibility { visibility } => {
                let record = self.record(mutation)?;
                if !record.additional_visibilities.contains(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::DeleteAdditionalVisibility {
                        visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::AlterEdgeLabel { label } => {
                let record = self.record(mutation)?;
                let Some(edge) = record.edge.as_ref() else {
                    return Err(StorageError::InvalidMutation(format!(
                        "cannot alter the label of {}",
                        mutation.key()
                    )));
                };
                if &edge.label == label {
                    return Ok(());
                }
                let old_label = edge.label.clone();
                self.emit(
                    mutation,
                    HistoricalEventKind::AlterEdgeLabel {
                        old_label,
                        new_label: label.clone(),
                    },
                )
            }
            MutationOp::SetProperty {
                property,
                value,
                metadata,
                timestamp,
            } => {
                let previous_value = self
                    .record(mutation)?
                    .properties
                    .get(property)
                    .map(|p| p.value.clone());
                let metadata = self.stored_metadata(metadata.clone());
                self.emit(
                    mutation,
                    HistoricalEventKind::AddProperty {
                        property: property.clone(),
                        previous_value,
                        value: Some(value.clone()),
                        metadata,
                        property_timestamp: timestamp.unwrap_or(self.timestamp),
                    },
                )
            }
            MutationOp::DeleteProperty { property } => {
                if let Some(record) = self.record.as_mut() {
                    record.properties.remove(property);
                }
                self.purge(Purge::Property(property.clone()));
                Ok(())
            }
            MutationOp::SoftDeleteProperty { property } => {
                let Some(existing) = self.record(mutation)?.properties.get(property) else {
                    debug!(element = %mutation.key(), %property, "soft delete of absent property");
                    return Ok(());
                };
                let previous_value = Some(existing.value.clone());
                self.emit(
                    mutation,
                    HistoricalEventKind::SoftDeleteProperty {
                        property: property.clone(),
                        previous_value,
                    },
                )
            }
            MutationOp::MarkPropertyHidden {
                property,
                visibility,
            } => {
                let Some(existing) = self.record(mutation)?.properties.get(property) else {
                    debug!(element = %mutation.key(), %property, "hide of absent property");
                    return Ok(());
                };
                if existing.hidden.contains_key(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::MarkHiddenProperty {
                        property: property.clone(),
                        hidden_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::MarkPropertyVisible {
                property,
                visibility,
            } => {
                let Some(existing) = self.record(mutation)?.properties.get(property) else {
                    debug!(element = %mutation.key(), %property, "reveal of absent property");
                    return Ok(());
                };
                if !existing.hidden.contains_key(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::MarkVisibleProperty {
                        property: property.clone(),
                        hidden_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::AlterPropertyVisibility {
                property,
                visibility,
            } => self.alter_property_visibility(mutation, property, visibility, false),
            MutationOp::AlterPropertyVisibilityCarryMetadata {
                property,
                visibility,
            } => self.alter_property_visibility(mutation, property, visibility, true),
            MutationOp::SetPropertyMetadata {
                property,
                name,
                value,
                visibility,
            } => {
                let Some(existing) = self.record(mutation)?.properties.get(property) else {
                    debug!(element = %mutation.key(), %property, "metadata of absent property");
                    return Ok(());
                };
                let current_value = existing.value.clone();
                let mut metadata = existing.metadata.clone();
                metadata.add(name.clone(), value.clone(), visibility.clone());
                let metadata = self.stored_metadata(metadata);
                self.emit(
                    mutation,
                    HistoricalEventKind::AddProperty {
                        property: property.clone(),
                        previous_value: Some(current_value.clone()),
                        value: Some(current_value),
                        metadata,
                        property_timestamp: self.timestamp,
                    },
                )
            }
            MutationOp::AddExtendedData {
                cell,
                value,
                timestamp,
            } => {
                let previous_value = self
                    .record(mutation)?
                    .extended_data
                    .get(cell)
                    .map(|c| c.value.clone());
                self.emit(
                    mutation,
                    HistoricalEventKind::AddExtendedData {
                        cell: cell.clone(),
                        previous_value,
                        value: Some(value.clone()),
                        cell_timestamp: timestamp.unwrap_or(self.timestamp),
                    },
                )
            }
            MutationOp::SoftDeleteExtendedData { cell } => {
                let Some(existing) = self.record(mutation)?.extended_data.get(cell) else {
                    debug!(element = %mutation.key(), %cell, "soft delete of absent cell");
                    return Ok(());
                };
                let previous_value = Some(existing.value.clone());
                self.emit(
                    mutation,
                    HistoricalEventKind::SoftDeleteExtendedData {
                        cell: cell.clone(),
                        previous_value,
                    },
                )
            }
            MutationOp::MarkExtendedDataHidden { cell, visibility } => {
                let Some(existing) = self.record(mutation)?.extended_data.get(cell) else {
                    debug!(element = %mutation.key(), %cell, "hide of absent cell");
                    return Ok(());
                };
                if existing.hidden.contains_key(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::MarkHiddenExtendedData {
                        cell: cell.clone(),
                        hidden_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::MarkExtendedDataVisible { cell, visibility } => {
                let Some(existing) = self.record(mutation)?.extended_data.get(cell) else {
                    debug!(element = %mutation.key(), %cell, "reveal of absent cell");
                    return Ok(());
                };
                if !existing.hidden.contains_key(visibility) {
                    return Ok(());
                }
                self.emit(
                    mutation,
                    HistoricalEventKind::MarkVisibleExtendedData {
                        cell: cell.clone(),
                        hidden_visibility: visibility.clone(),
                    },
                )
            }
            MutationOp::DeleteExtendedData { cell } => {
                if let Some(record) = self.record.as_mut() {
                    record.extended_data.remove(cell);
                }
                self.purge(Purge::ExtendedDataCell(cell.clone()));
                Ok(())
            }
            MutationOp::DeleteExtendedDataRow { table, row_id } => {
                if let Some(record) = self.record.as_mut() {
                    record
                        .extended_data
                        .retain(|cell, _| !cell.in_row(table, row_id));
                }
                self.purge(Purge::ExtendedDataRow {
                    table: table.clone(),
                    row_id: row_id.clone(),
                });
                Ok(())
            }
        }
    }

    fn add_or_update(
        &mut self,
        mutation: &Mutation,
        visibility: &Visibility,
        edge: Option<&EdgeEndpoints>,
    ) -> StorageResult<()> {
        let key = mutation.key();
        match (key.element_type, edge) {
            (ElementType::Vertex, Some(_)) => {
                return Err(StorageError::InvalidMutation(format!(
                    "vertex {} cannot have endpoints",
                    key.id
                )));
            }
            (ElementType::Edge, None) => {
                return Err(StorageError::InvalidMutation(format!(
                    "edge {} needs endpoints",
                    key.id
                )));
            }
            _ => {}
        }

        let Some(record) = self.record.as_ref() else {
            return self.emit(
                mutation,
                HistoricalEventKind::AddElement {
                    visibility: visibility.clone(),
                    edge: edge.cloned(),
                },
            );
        };

        let mut relabel = None;
        if let (Some(existing), Some(requested)) = (record.edge.as_ref(), edge) {
            if existing.out_vertex_id != requested.out_vertex_id
                || existing.in_vertex_id != requested.in_vertex_id
            {
                return Err(StorageError::InvalidMutation(format!(
                    "edge {} already connects {} to {}",
                    key.id, existing.out_vertex_id, existing.in_vertex_id
                )));
            }
            if existing.label != requested.label {
                relabel = Some((existing.label.clone(), requested.label.clone()));
            }
        }

        if record.is_soft_deleted() {
            // Restores the element under the requested visibility.
            self.emit(
                mutation,
                HistoricalEventKind::AddElement {
                    visibility: visibility.clone(),
                    edge: None,
                },
            )?;
        } else if &record.visibility != visibility {
            let old_visibility = record.visibility.clone();
            self.emit(
                mutation,
                HistoricalEventKind::AlterElementVisibility {
                    old_visibility,
                    new_visibility: visibility.clone(),
                },
            )?;
        }
        if let Some((old_label, new_label)) = relabel {
            self.emit(
                mutation,
                HistoricalEventKind::AlterEdgeLabel {
                    old_label,
                    new_label,
                },
            )?;
        }
        Ok(())
    }

    fn alter_property_visibility(
        &mut self,
        mutation: &Mutation,
        property: &PropertyIdentity,
        visibility: &Visibility,
        carry_metadata: bool,
    ) -> StorageResult<()> {
        let record = self.record(mutation)?;
        let Some(existing) = record.properties.get(property) else {
            return Err(NotFoundError::Property {
                element: mutation.key().clone(),
                key: property.key.clone(),
                name: property.name.clone(),
            }
            .into());
        };
        if &property.visibility == visibility {
            return Ok(());
        }
        let value = existing.value.clone();
        let metadata = existing.metadata.clone();
        let target = PropertyIdentity::new(
            property.key.clone(),
            property.name.clone(),
            visibility.clone(),
        );
        let previous_at_target = record.properties.get(&target).map(|p| p.value.clone());

        self.emit(
            mutation,
            HistoricalEventKind::SoftDeleteProperty {
                property: property.clone(),
                previous_value: Some(value.clone()),
            },
        )?;
        let (previous_value, metadata) = if carry_metadata {
            (Some(value.clone()), metadata)
        } else {
            (previous_at_target, Metadata::create())
        };
        self.emit(
            mutation,
            HistoricalEventKind::AddProperty {
                property: target,
                previous_value,
                value: Some(value),
                metadata,
                property_timestamp: self.timestamp,
            },
        )
    }
}
