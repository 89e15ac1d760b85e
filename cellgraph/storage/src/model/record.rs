use std::collections::{BTreeMap, BTreeSet};

use cellgraph_common::types::{Direction, ElementId, ElementKey, ElementType, Name};
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_version::Timestamp;
use serde::{Deserialize, Serialize};

use super::extended_data::{ExtendedDataCellId, ExtendedDataCellRecord};
use super::fetch_hints::FetchHints;
use super::property::{PropertyIdentity, PropertyRecord};

/// Endpoints and label of an edge. Endpoints never change once the edge exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeEndpoints {
    pub out_vertex_id: ElementId,
    pub in_vertex_id: ElementId,
    pub label: Name,
}

impl EdgeEndpoints {
    pub fn new(
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
        label: impl Into<Name>,
    ) -> Self {
        Self {
            out_vertex_id: out_vertex_id.into(),
            in_vertex_id: in_vertex_id.into(),
            label: label.into(),
        }
    }

    /// Id of the vertex on the given side. `Both` has no single answer.
    pub fn vertex_id(&self, direction: Direction) -> Option<&ElementId> {
        match direction {
            Direction::Out => Some(&self.out_vertex_id),
            Direction::In => Some(&self.in_vertex_id),
            Direction::Both => None,
        }
    }

    /// The endpoint opposite to `vertex_id`.
    pub fn other_vertex_id(&self, vertex_id: &str) -> Option<&ElementId> {
        if self.out_vertex_id.as_str() == vertex_id {
            Some(&self.in_vertex_id)
        } else if self.in_vertex_id.as_str() == vertex_id {
            Some(&self.out_vertex_id)
        } else {
            None
        }
    }
}

/// The full, unfiltered state of an element at one version.
///
/// Records are what the version chain stores and what replaying historical events produces.
/// Callers never see them directly; reads materialize an [`Element`](super::element::Element)
/// filtered by authorizations and fetch hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub key: ElementKey,
    pub visibility: Visibility,
    /// Timestamp of the latest event applied to this element.
    pub timestamp: Timestamp,
    pub soft_deleted: Option<Timestamp>,
    pub hidden: BTreeMap<Visibility, Timestamp>,
    pub additional_visibilities: BTreeSet<Visibility>,
    pub properties: BTreeMap<PropertyIdentity, PropertyRecord>,
    pub edge: Option<EdgeEndpoints>,
    pub extended_data: BTreeMap<ExtendedDataCellId, ExtendedDataCellRecord>,
}

impl ElementRecord {
    pub fn new(
        key: ElementKey,
        visibility: Visibility,
        edge: Option<EdgeEndpoints>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key,
            visibility,
            timestamp,
            soft_deleted: None,
            hidden: BTreeMap::new(),
            additional_visibilities: BTreeSet::new(),
            properties: BTreeMap::new(),
            edge,
            extended_data: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.key.element_type
    }

    #[inline]
    pub fn is_soft_deleted(&self) -> bool {
        self.soft_deleted.is_some()
    }

    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        self.hidden.keys().any(|v| authorizations.can_read(v))
    }

    /// Whether a caller may see this element at all.
    ///
    /// Soft-deleted elements are never visible. Hidden elements are visible only when the fetch
    /// hints include hidden data. Additional visibilities are extra requirements on top of the
    /// primary visibility unless the fetch hints ignore them.
    pub fn is_visible_to(&self, fetch_hints: &FetchHints, authorizations: &Authorizations) -> bool {
        if self.is_soft_deleted() || !authorizations.can_read(&self.visibility) {
            return false;
        }
        if !fetch_hints.is_include_hidden() && self.is_hidden(authorizations) {
            return false;
        }
        fetch_hints.is_ignore_additional_visibilities()
            || self
                .additional_visibilities
                .iter()
                .all(|v| authorizations.can_read(v))
    }

    /// Property instances named `name`, in identity order.
    pub fn properties_named<'a>(
        &'a self,
        name: &str,
    ) -> impl Iterator<Item = (&'a PropertyIdentity, &'a PropertyRecord)> + use<'a> {
        let name = Name::new(name);
        self.properties
            .iter()
            .filter(move |(id, _)| id.name == name)
    }

    /// Names of the tables holding at least one cell.
    pub fn extended_data_table_names(&self) -> BTreeSet<&Name> {
        self.extended_data.keys().map(|id| &id.table).collect()
    }
}

#[cfg(test)]
mod tests {
    use cellgraph_common::value::Value;

    use super::*;
    use crate::model::metadata::Metadata;

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).unwrap()
    }

    fn record() -> ElementRecord {
        ElementRecord::new(
            ElementKey::vertex("v1"),
            vis("a"),
            None,
            Timestamp::with_ts(1),
        )
    }

    #[test]
    fn test_visibility_rules() {
        let a = Authorizations::new(["a"]);
        let mut rec = record();
        assert!(rec.is_visible_to(&FetchHints::ALL, &a));
        assert!(!rec.is_visible_to(&FetchHints::ALL, &Authorizations::empty()));

        rec.hidden.insert(vis("a"), Timestamp::with_ts(2));
        assert!(!rec.is_visible_to(&FetchHints::ALL, &a));
        assert!(rec.is_visible_to(&FetchHints::ALL_INCLUDING_HIDDEN, &a));
        rec.hidden.clear();

        rec.additional_visibilities.insert(vis("b"));
        assert!(!rec.is_visible_to(&FetchHints::ALL, &a));
        let ignore = FetchHints::ALL
            .to_builder()
            .ignore_additional_visibilities(true)
            .build()
            .unwrap();
        assert!(rec.is_visible_to(&ignore, &a));
        assert!(rec.is_visible_to(&FetchHints::ALL, &Authorizations::new(["a", "b"])));

        rec.soft_deleted = Some(Timestamp::with_ts(3));
        let ab = Authorizations::new(["a", "b"]);
        assert!(!rec.is_visible_to(&FetchHints::ALL_INCLUDING_HIDDEN, &ab));
    }

    #[test]
    fn test_properties_named() {
        let mut rec = record();
        for (key, v) in [("k2", "a"), ("k1", "b"), ("k1", "a")] {
            rec.properties.insert(
                PropertyIdentity::new(key, "p", vis(v)),
                PropertyRecord::new(Value::from(key), Metadata::create(), Timestamp::with_ts(1)),
            );
        }
        let order: Vec<(String, String)> = rec
            .properties_named("p")
            .map(|(id, _)| (id.visibility.to_string(), id.key.to_string()))
            .collect();
        assert_eq!(order, vec![
            ("a".to_string(), "k1".to_string()),
            ("a".to_string(), "k2".to_string()),
            ("b".to_string(), "k1".to_string()),
        ]);
    }

    #[test]
    fn test_edge_endpoints() {
        let edge = EdgeEndpoints::new("v1", "v2", "knows");
        assert_eq!(edge.vertex_id(Direction::Out).map(|id| id.as_str()), Some("v1"));
        assert_eq!(edge.other_vertex_id("v2").map(|id| id.as_str()), Some("v1"));
        assert!(edge.other_vertex_id("v3").is_none());
        assert!(edge.vertex_id(Direction::Both).is_none());
    }
}
