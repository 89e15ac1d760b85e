//! Per-element side tables.
//!
//! A cell is addressed by (table, row, column, key, visibility) and follows the same overwrite,
//! soft-delete and hide rules as a property.

use std::collections::BTreeMap;
use std::fmt;

use cellgraph_common::types::{ElementKey, Name};
use cellgraph_common::value::Value;
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_version::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtendedDataCellId {
    pub table: Name,
    pub row_id: Name,
    pub column: Name,
    pub visibility: Visibility,
    pub key: Name,
}

impl ExtendedDataCellId {
    pub fn new(
        table: impl Into<Name>,
        row_id: impl Into<Name>,
        column: impl Into<Name>,
        key: impl Into<Name>,
        visibility: Visibility,
    ) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
            column: column.into(),
            visibility,
            key: key.into(),
        }
    }

    #[inline]
    pub fn in_row(&self, table: &str, row_id: &str) -> bool {
        self.table.as_str() == table && self.row_id.as_str() == row_id
    }
}

impl fmt::Display for ExtendedDataCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}[{}]",
            self.table, self.row_id, self.column, self.key, self.visibility
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedDataCellRecord {
    pub value: Value,
    pub timestamp: Timestamp,
    pub hidden: BTreeMap<Visibility, Timestamp>,
}

impl ExtendedDataCellRecord {
    pub fn new(value: Value, timestamp: Timestamp) -> Self {
        Self {
            value,
            timestamp,
            hidden: BTreeMap::new(),
        }
    }

    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        self.hidden.keys().any(|v| authorizations.can_read(v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtendedDataRowId {
    pub element: ElementKey,
    pub table: Name,
    pub row_id: Name,
}

impl fmt::Display for ExtendedDataRowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.element, self.table, self.row_id)
    }
}

/// A visible cell of an extended data row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedDataCell {
    pub column: Name,
    pub key: Name,
    pub visibility: Visibility,
    pub value: Value,
    pub timestamp: Timestamp,
    /// Hidden markers readable by the caller.
    pub hidden_visibilities: Vec<Visibility>,
}

/// One row of a side table as seen by one caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedDataRow {
    id: ExtendedDataRowId,
    cells: Vec<ExtendedDataCell>,
}

impl ExtendedDataRow {
    pub fn new(id: ExtendedDataRowId, cells: Vec<ExtendedDataCell>) -> Self {
        Self { id, cells }
    }

    #[inline]
    pub fn id(&self) -> &ExtendedDataRowId {
        &self.id
    }

    pub fn cells(&self) -> &[ExtendedDataCell] {
        &self.cells
    }

    /// Value of the first visible cell in `column`.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values(column).next()
    }

    pub fn values<'a>(&'a self, column: &str) -> impl Iterator<Item = &'a Value> + use<'a> {
        let column = Name::new(column);
        self.cells
            .iter()
            .filter(move |cell| cell.column == column)
            .map(|cell| &cell.value)
    }

    /// Latest timestamp of any cell in the row.
    pub fn timestamp(&self) -> Timestamp {
        self.cells
            .iter()
            .map(|cell| cell.timestamp)
            .max()
            .unwrap_or_default()
    }
}

/// Groups the cells of `cells` into rows, keeping those readable by `authorizations`.
///
/// Rows without a single readable cell are omitted.
pub fn materialize_rows<'a>(
    element: &ElementKey,
    cells: impl Iterator<Item = (&'a ExtendedDataCellId, &'a ExtendedDataCellRecord)>,
    authorizations: &Authorizations,
    include_hidden: bool,
) -> Vec<ExtendedDataRow> {
    let mut rows: BTreeMap<(Name, Name), Vec<ExtendedDataCell>> = BTreeMap::new();
    for (id, cell) in cells {
        if !authorizations.can_read(&id.visibility) {
            continue;
        }
        if !include_hidden && cell.is_hidden(authorizations) {
            continue;
        }
        rows.entry((id.table.clone(), id.row_id.clone()))
            .or_default()
            .push(ExtendedDataCell {
                column: id.column.clone(),
                key: id.key.clone(),
                visibility: id.visibility.clone(),
                value: cell.value.clone(),
                timestamp: cell.timestamp,
                hidden_visibilities: cell
                    .hidden
                    .keys()
                    .filter(|v| authorizations.can_read(v))
                    .cloned()
                    .collect(),
            });
    }
    rows.into_iter()
        .map(|((table, row_id), cells)| {
            ExtendedDataRow::new(
                ExtendedDataRowId {
                    element: element.clone(),
                    table,
                    row_id,
                },
                cells,
            )
        })
        .collect()
}
