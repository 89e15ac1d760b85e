//! The append-only log of accepted state transitions.
//!
//! Every event carries enough to be folded back into an [`ElementRecord`] by [`apply_event`],
//! the same function the merge engine uses to advance live state. Replaying an element's log up
//! to a time therefore yields exactly the record the version chain holds for that time.

use std::collections::BTreeSet;
use std::fmt;

use cellgraph_common::types::{ElementKey, Name};
use cellgraph_common::value::Value;
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_version::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::model::extended_data::{ExtendedDataCellId, ExtendedDataCellRecord};
use crate::model::metadata::Metadata;
use crate::model::property::{PropertyIdentity, PropertyRecord};
use crate::model::record::{EdgeEndpoints, ElementRecord};

/// Total order of events: by timestamp, then by insertion sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct HistoricalEventId {
    pub timestamp: Timestamp,
    pub sequence: u64,
}

impl HistoricalEventId {
    pub fn new(timestamp: Timestamp, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }
}

impl fmt::Display for HistoricalEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.timestamp, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoricalEventKind {
    AddElement {
        visibility: Visibility,
        edge: Option<EdgeEndpoints>,
    },
    AlterElementVisibility {
        old_visibility: Visibility,
        new_visibility: Visibility,
    },
    SoftDeleteElement,
    MarkHiddenElement {
        hidden_visibility: Visibility,
    },
    MarkVisibleElement {
        hidden_visibility: Visibility,
    },
    AddAdditionalVisibility {
        visibility: Visibility,
    },
    DeleteAdditionalVisibility {
        visibility: Visibility,
    },
    AlterEdgeLabel {
        old_label: Name,
        new_label: Name,
    },
    AddProperty {
        property: PropertyIdentity,
        previous_value: Option<Value>,
        /// `None` only when values were stripped for a lighter audit trail.
        value: Option<Value>,
        metadata: Metadata,
        property_timestamp: Timestamp,
    },
    SoftDeleteProperty {
        property: PropertyIdentity,
        previous_value: Option<Value>,
    },
    MarkHiddenProperty {
        property: PropertyIdentity,
        hidden_visibility: Visibility,
    },
    MarkVisibleProperty {
        property: PropertyIdentity,
        hidden_visibility: Visibility,
    },
    AddExtendedData {
        cell: ExtendedDataCellId,
        previous_value: Option<Value>,
        value: Option<Value>,
        cell_timestamp: Timestamp,
    },
    SoftDeleteExtendedData {
        cell: ExtendedDataCellId,
        previous_value: Option<Value>,
    },
    MarkHiddenExtendedData {
        cell: ExtendedDataCellId,
        hidden_visibility: Visibility,
    },
    MarkVisibleExtendedData {
        cell: ExtendedDataCellId,
        hidden_visibility: Visibility,
    },
}

/// History removed together with a hard delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purge {
    Property(PropertyIdentity),
    ExtendedDataCell(ExtendedDataCellId),
    ExtendedDataRow { table: Name, row_id: Name },
}

impl HistoricalEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            HistoricalEventKind::AddElement { .. } => "AddElement",
            HistoricalEventKind::AlterElementVisibility { .. } => "AlterElementVisibility",
            HistoricalEventKind::SoftDeleteElement => "SoftDeleteElement",
            HistoricalEventKind::MarkHiddenElement { .. } => "MarkHiddenElement",
            HistoricalEventKind::MarkVisibleElement { .. } => "MarkVisibleElement",
            HistoricalEventKind::AddAdditionalVisibility { .. } => "AddAdditionalVisibility",
            HistoricalEventKind::DeleteAdditionalVisibility { .. } => "DeleteAdditionalVisibility",
            HistoricalEventKind::AlterEdgeLabel { .. } => "AlterEdgeLabel",
            HistoricalEventKind::AddProperty { .. } => "AddProperty",
            HistoricalEventKind::SoftDeleteProperty { .. } => "SoftDeleteProperty",
            HistoricalEventKind::MarkHiddenProperty { .. } => "MarkHiddenProperty",
            HistoricalEventKind::MarkVisibleProperty { .. } => "MarkVisibleProperty",
            HistoricalEventKind::AddExtendedData { .. } => "AddExtendedData",
            HistoricalEventKind::SoftDeleteExtendedData { .. } => "SoftDeleteExtendedData",
            HistoricalEventKind::MarkHiddenExtendedData { .. } => "MarkHiddenExtendedData",
            HistoricalEventKind::MarkVisibleExtendedData { .. } => "MarkVisibleExtendedData",
        }
    }

    /// The property this event concerns, if any.
    pub fn property(&self) -> Option<&PropertyIdentity> {
        match self {
            HistoricalEventKind::AddProperty { property, .. }
            | HistoricalEventKind::SoftDeleteProperty { property, .. }
            | HistoricalEventKind::MarkHiddenProperty { property, .. }
            | HistoricalEventKind::MarkVisibleProperty { property, .. } => Some(property),
            _ => None,
        }
    }

    /// The extended data cell this event concerns, if any.
    pub fn cell(&self) -> Option<&ExtendedDataCellId> {
        match self {
            HistoricalEventKind::AddExtendedData { cell, .. }
            | HistoricalEventKind::SoftDeleteExtendedData { cell, .. }
            | HistoricalEventKind::MarkHiddenExtendedData { cell, .. }
            | HistoricalEventKind::MarkVisibleExtendedData { cell, .. } => Some(cell),
            _ => None,
        }
    }

    /// Whether `purge` removes this event from the log.
    pub fn touches(&self, purge: &Purge) -> bool {
        match purge {
            Purge::Property(id) => self.property() == Some(id),
            Purge::ExtendedDataCell(id) => self.cell() == Some(id),
            Purge::ExtendedDataRow { table, row_id } => {
                self.cell().is_some_and(|cell| cell.in_row(table, row_id))
            }
        }
    }

    fn strip_values(&mut self, previous: bool, current: bool) {
        match self {
            HistoricalEventKind::AddProperty {
                previous_value,
                value,
                ..
            }
            | HistoricalEventKind::AddExtendedData {
                previous_value,
                value,
                ..
            } => {
                if !previous {
                    *previous_value = None;
                }
                if !current {
                    *value = None;
                }
            }
            HistoricalEventKind::SoftDeleteProperty { previous_value, .. }
            | HistoricalEventKind::SoftDeleteExtendedData { previous_value, .. } => {
                if !previous {
                    *previous_value = None;
                }
            }
            _ => {}
        }
    }

    /// Drops the metadata entries `authorizations` cannot read.
    fn filter_metadata(&mut self, authorizations: &Authorizations) {
        if let HistoricalEventKind::AddProperty { metadata, .. } = self {
            *metadata = metadata.filtered(authorizations, |_| true);
        }
    }
}

/// One accepted state transition of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub id: HistoricalEventId,
    pub element: ElementKey,
    /// Visibility of the element right after this event.
    pub element_visibility: Visibility,
    /// Additional visibilities of the element right after this event.
    pub additional_visibilities: BTreeSet<Visibility>,
    pub kind: HistoricalEventKind,
}

impl HistoricalEvent {
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.id.timestamp
    }

    /// Element events need the element visibility and its additional visibilities; property and
    /// cell events also need the visibility of the property or cell.
    pub fn is_visible_to(&self, authorizations: &Authorizations) -> bool {
        if !authorizations.can_read(&self.element_visibility)
            || !self
                .additional_visibilities
                .iter()
                .all(|v| authorizations.can_read(v))
        {
            return false;
        }
        if let Some(property) = self.kind.property() {
            return authorizations.can_read(&property.visibility);
        }
        if let Some(cell) = self.kind.cell() {
            return authorizations.can_read(&cell.visibility);
        }
        true
    }
}

impl fmt::Display for HistoricalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.element, self.kind.name())?;
        if let Some(property) = self.kind.property() {
            write!(f, " {property}")?;
        }
        if let Some(cell) = self.kind.cell() {
            write!(f, " {cell}")?;
        }
        Ok(())
    }
}

/// Folds one event into `record`.
///
/// `record` is `None` until the element's first `AddElement`. Live mutation and replay both go
/// through here, so the two can never disagree.
pub fn apply_event(
    record: &mut Option<ElementRecord>,
    event: &HistoricalEvent,
) -> StorageResult<()> {
    let ts = event.id.timestamp;
    if let HistoricalEventKind::AddElement { visibility, edge } = &event.kind {
        if let Some(current) = record.as_mut() {
            current.visibility = visibility.clone();
            current.soft_deleted = None;
            if edge.is_some() {
                current.edge = edge.clone();
            }
            current.timestamp = current.timestamp.max(ts);
        } else {
            *record = Some(ElementRecord::new(
                event.element.clone(),
                visibility.clone(),
                edge.clone(),
                ts,
            ));
        }
        return Ok(());
    }

    let Some(current) = record.as_mut() else {
        return Err(StorageError::InvalidMutation(format!(
            "{} event for {} precedes the element's creation",
            event.kind.name(),
            event.element
        )));
    };
    match &event.kind {
        HistoricalEventKind::AddElement { .. } => {}
        HistoricalEventKind::AlterElementVisibility { new_visibility, .. } => {
            current.visibility = new_visibility.clone();
        }
        HistoricalEventKind::SoftDeleteElement => {
            current.soft_deleted = Some(ts);
        }
        HistoricalEventKind::MarkHiddenElement { hidden_visibility } => {
            current.hidden.insert(hidden_visibility.clone(), ts);
        }
        HistoricalEventKind::MarkVisibleElement { hidden_visibility } => {
            current.hidden.remove(hidden_visibility);
        }
        HistoricalEventKind::AddAdditionalVisibility { visibility } => {
            current.additional_visibilities.insert(visibility.clone());
        }
        HistoricalEventKind::DeleteAdditionalVisibility { visibility } => {
            current.additional_visibilities.remove(visibility);
        }
        HistoricalEventKind::AlterEdgeLabel { new_label, .. } => match current.edge.as_mut() {
            Some(edge) => edge.label = new_label.clone(),
            None => {
                return Err(StorageError::InvalidMutation(format!(
                    "{} has no label",
                    event.element
                )));
            }
        },
        HistoricalEventKind::AddProperty {
            property,
            value,
            metadata,
            property_timestamp,
            ..
        } => {
            let value = required_value(value, event)?;
            match current.properties.get_mut(property) {
                Some(existing) => {
                    existing.value = value;
                    existing.metadata = metadata.clone();
                    existing.timestamp = *property_timestamp;
                }
                None => {
                    current.properties.insert(
                        property.clone(),
                        PropertyRecord::new(value, metadata.clone(), *property_timestamp),
                    );
                }
            }
        }
        HistoricalEventKind::SoftDeleteProperty { property, .. } => {
            current.properties.remove(property);
        }
        HistoricalEventKind::MarkHiddenProperty {
            property,
            hidden_visibility,
        } => {
            if let Some(existing) = current.properties.get_mut(property) {
                existing.hidden.insert(hidden_visibility.clone(), ts);
            }
        }
        HistoricalEventKind::MarkVisibleProperty {
            property,
            hidden_visibility,
        } => {
            if let Some(existing) = current.properties.get_mut(property) {
                existing.hidden.remove(hidden_visibility);
            }
        }
        HistoricalEventKind::AddExtendedData {
            cell,
            value,
            cell_timestamp,
            ..
        } => {
            let value = required_value(value, event)?;
            match current.extended_data.get_mut(cell) {
                Some(existing) => {
                    existing.value = value;
                    existing.timestamp = *cell_timestamp;
                }
                None => {
                    current.extended_data.insert(
                        cell.clone(),
                        ExtendedDataCellRecord::new(value, *cell_timestamp),
                    );
                }
            }
        }
        HistoricalEventKind::SoftDeleteExtendedData { cell, .. } => {
            current.extended_data.remove(cell);
        }
        HistoricalEventKind::MarkHiddenExtendedData {
            cell,
            hidden_visibility,
        } => {
            if let Some(existing) = current.extended_data.get_mut(cell) {
                existing.hidden.insert(hidden_visibility.clone(), ts);
            }
        }
        HistoricalEventKind::MarkVisibleExtendedData {
            cell,
            hidden_visibility,
        } => {
            if let Some(existing) = current.extended_data.get_mut(cell) {
                existing.hidden.remove(hidden_visibility);
            }
        }
    }
    current.timestamp = current.timestamp.max(ts);
    Ok(())
}

fn required_value(value: &Option<Value>, event: &HistoricalEvent) -> StorageResult<Value> {
    value.clone().ok_or_else(|| {
        StorageError::InvalidArgument(format!(
            "event {} was read without property values and cannot be replayed",
            event.id
        ))
    })
}

/// Rebuilds an element from its events, in log order.
pub fn replay<'a>(
    events: impl IntoIterator<Item = &'a HistoricalEvent>,
) -> StorageResult<Option<ElementRecord>> {
    let mut record = None;
    for event in events {
        apply_event(&mut record, event)?;
    }
    Ok(record)
}

/// Rebuilds an element as of `at`, ignoring later events.
pub fn replay_until<'a>(
    events: impl IntoIterator<Item = &'a HistoricalEvent>,
    at: Timestamp,
) -> StorageResult<Option<ElementRecord>> {
    replay(
        events
            .into_iter()
            .take_while(|event| event.id.timestamp <= at),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Shapes a historical events query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalEventsFetchHints {
    pub start_time: Option<Timestamp>,
    /// Inclusive.
    pub end_time: Option<Timestamp>,
    pub sort_direction: SortDirection,
    pub limit: Option<usize>,
    pub include_previous_property_values: bool,
    pub include_property_values: bool,
}

impl Default for HistoricalEventsFetchHints {
    fn default() -> Self {
        Self::ALL
    }
}

impl HistoricalEventsFetchHints {
    pub const ALL: HistoricalEventsFetchHints = HistoricalEventsFetchHints {
        start_time: None,
        end_time: None,
        sort_direction: SortDirection::Ascending,
        limit: None,
        include_previous_property_values: true,
        include_property_values: true,
    };

    pub fn with_time_range(mut self, start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = direction;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drops value payloads from the returned events.
    pub fn without_values(mut self) -> Self {
        self.include_previous_property_values = false;
        self.include_property_values = false;
        self
    }

    pub fn include_previous_property_values(mut self, include: bool) -> Self {
        self.include_previous_property_values = include;
        self
    }

    pub fn include_property_values(mut self, include: bool) -> Self {
        self.include_property_values = include;
        self
    }

    fn in_window(&self, id: &HistoricalEventId) -> bool {
        self.start_time.is_none_or(|start| id.timestamp >= start)
            && self.end_time.is_none_or(|end| id.timestamp <= end)
    }

    fn is_past_cursor(&self, id: &HistoricalEventId, after: Option<&HistoricalEventId>) -> bool {
        match (after, self.sort_direction) {
            (None, _) => true,
            (Some(after), SortDirection::Ascending) => id > after,
            (Some(after), SortDirection::Descending) => id < after,
        }
    }
}

/// A page of events plus the cursor to resume after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalEvents {
    events: Vec<HistoricalEvent>,
    last_event_id: Option<HistoricalEventId>,
}

impl HistoricalEvents {
    pub fn events(&self) -> &[HistoricalEvent] {
        &self.events
    }

    /// Id of the last event of this page. Pass it back as `after` to continue.
    pub fn last_event_id(&self) -> Option<HistoricalEventId> {
        self.last_event_id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoricalEvent> {
        self.events.iter()
    }
}

impl IntoIterator for HistoricalEvents {
    type IntoIter = std::vec::IntoIter<HistoricalEvent>;
    type Item = HistoricalEvent;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Orders, windows, authorization-filters and pages `events`.
///
/// Property metadata is filtered entry by entry, as on a live read.
pub fn select_events<'a>(
    events: impl IntoIterator<Item = &'a HistoricalEvent>,
    after: Option<&HistoricalEventId>,
    fetch_hints: &HistoricalEventsFetchHints,
    authorizations: &Authorizations,
) -> HistoricalEvents {
    let mut selected: Vec<&HistoricalEvent> = events
        .into_iter()
        .filter(|event| fetch_hints.in_window(&event.id))
        .filter(|event| fetch_hints.is_past_cursor(&event.id, after))
        .filter(|event| event.is_visible_to(authorizations))
        .collect();
    selected.sort_by_key(|event| event.id);
    if fetch_hints.sort_direction == SortDirection::Descending {
        selected.reverse();
    }
    if let Some(limit) = fetch_hints.limit {
        selected.truncate(limit);
    }
    let events: Vec<HistoricalEvent> = selected
        .into_iter()
        .map(|event| {
            let mut event = event.clone();
            event.kind.filter_metadata(authorizations);
            event.kind.strip_values(
                fetch_hints.include_previous_property_values,
                fetch_hints.include_property_values,
            );
            event
        })
        .collect();
    let last_event_id = events.last().map(|event| event.id);
    HistoricalEvents {
        events,
        last_event_id,
    }
}
