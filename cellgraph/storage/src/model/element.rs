use std::collections::BTreeSet;
use std::ops::Deref;

use cellgraph_common::types::{Direction, ElementId, ElementKey, ElementType, Name};
use cellgraph_common::value::Value;
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_version::Timestamp;
use itertools::Itertools;

use super::fetch_hints::FetchHints;
use super::property::Property;
use super::record::{EdgeEndpoints, ElementRecord};
use crate::error::{NotFoundError, StorageError, StorageResult};
use crate::mutation::ExistingElementMutation;

/// One edge incident to a vertex, as seen from that vertex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeRef {
    pub label: Name,
    pub other_vertex_id: ElementId,
    pub edge_id: ElementId,
    /// `Out` when the vertex is the edge's out vertex, `In` otherwise.
    pub direction: Direction,
}

/// State shared by vertices and edges, filtered for one caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    key: ElementKey,
    visibility: Visibility,
    timestamp: Timestamp,
    properties: Vec<Property>,
    additional_visibilities: Vec<Visibility>,
    hidden_visibilities: Vec<Visibility>,
    extended_data_table_names: Vec<Name>,
    fetch_hints: FetchHints,
}

impl ElementData {
    fn from_record(
        record: &ElementRecord,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
    ) -> Self {
        let properties = record
            .properties
            .iter()
            .filter(|(id, _)| fetch_hints.is_include_property(&id.name))
            .filter(|(id, _)| authorizations.can_read(&id.visibility))
            .filter(|(_, p)| fetch_hints.is_include_hidden() || !p.is_hidden(authorizations))
            .map(|(id, p)| Property::from_record(id, p, fetch_hints, authorizations))
            .collect();
        let extended_data_table_names = if fetch_hints.is_include_extended_data_table_names() {
            record
                .extended_data
                .iter()
                .filter(|(id, _)| authorizations.can_read(&id.visibility))
                .filter(|(_, c)| fetch_hints.is_include_hidden() || !c.is_hidden(authorizations))
                .map(|(id, _)| id.table.clone())
                .dedup()
                .collect()
        } else {
            Vec::new()
        };
        Self {
            key: record.key.clone(),
            visibility: record.visibility.clone(),
            timestamp: record.timestamp,
            properties,
            additional_visibilities: record.additional_visibilities.iter().cloned().collect(),
            hidden_visibilities: record
                .hidden
                .keys()
                .filter(|v| authorizations.can_read(v))
                .cloned()
                .collect(),
            extended_data_table_names,
            fetch_hints: fetch_hints.clone(),
        }
    }

    #[inline]
    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    #[inline]
    pub fn id(&self) -> &ElementId {
        &self.key.id
    }

    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.key.element_type
    }

    #[inline]
    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    /// Timestamp of the latest change to this element.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn fetch_hints(&self) -> &FetchHints {
        &self.fetch_hints
    }

    pub fn additional_visibilities(&self) -> &[Visibility] {
        &self.additional_visibilities
    }

    /// Hidden markers readable by the caller.
    pub fn hidden_visibilities(&self) -> &[Visibility] {
        &self.hidden_visibilities
    }

    /// True iff any hidden marker evaluates true under `authorizations`.
    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        self.hidden_visibilities
            .iter()
            .any(|v| authorizations.can_read(v))
    }

    /// Every fetched, visible property in (name, visibility, key) order.
    pub fn properties(&self) -> StorageResult<&[Property]> {
        if !self.fetch_hints.is_include_properties() {
            return Err(StorageError::FetchHintsMismatch("properties".to_string()));
        }
        Ok(&self.properties)
    }

    /// Visible properties named `name`.
    pub fn properties_named<'a>(
        &'a self,
        name: &str,
    ) -> StorageResult<impl Iterator<Item = &'a Property> + use<'a>> {
        self.fetch_hints.assert_property_included(name)?;
        let name = Name::new(name);
        Ok(self.properties.iter().filter(move |p| *p.name() == name))
    }

    /// The property matching a possibly partial identity.
    pub fn property(
        &self,
        key: Option<&str>,
        name: &str,
        visibility: Option<&Visibility>,
    ) -> StorageResult<Option<&Property>> {
        self.fetch_hints.assert_property_included(name)?;
        Ok(self
            .properties
            .iter()
            .find(|p| p.identity().matches(key, name, visibility)))
    }

    /// Value of the first visible property named `name`.
    pub fn property_value(&self, name: &str) -> StorageResult<Option<&Value>> {
        Ok(self.properties_named(name)?.next().map(Property::value))
    }

    pub fn property_values(&self, name: &str) -> StorageResult<Vec<&Value>> {
        Ok(self.properties_named(name)?.map(Property::value).collect())
    }

    pub fn extended_data_table_names(&self) -> StorageResult<&[Name]> {
        self.fetch_hints
            .assert_extended_data_table_names_included()?;
        Ok(&self.extended_data_table_names)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    data: ElementData,
    edge_refs: Vec<EdgeRef>,
}

impl Vertex {
    pub fn edge_refs(&self, direction: Direction) -> StorageResult<Vec<&EdgeRef>> {
        self.data.fetch_hints.assert_edge_refs_included(direction)?;
        Ok(self
            .edge_refs
            .iter()
            .filter(|r| direction.matches(r.direction))
            .filter(|r| self.data.fetch_hints.is_include_edge_ref_label(&r.label))
            .collect())
    }

    pub fn edge_ids(&self, direction: Direction) -> StorageResult<Vec<&ElementId>> {
        Ok(self
            .edge_refs(direction)?
            .into_iter()
            .map(|r| &r.edge_id)
            .collect())
    }

    pub fn vertex_ids(&self, direction: Direction) -> StorageResult<Vec<&ElementId>> {
        Ok(self
            .edge_refs(direction)?
            .into_iter()
            .map(|r| &r.other_vertex_id)
            .collect())
    }

    /// Distinct labels of the visible edges on the given side.
    pub fn edge_labels(&self, direction: Direction) -> StorageResult<BTreeSet<&Name>> {
        self.data.fetch_hints.assert_edge_labels_included()?;
        Ok(self
            .edge_refs
            .iter()
            .filter(|r| direction.matches(r.direction))
            .map(|r| &r.label)
            .collect())
    }

    pub fn edge_count(&self, direction: Direction) -> StorageResult<usize> {
        if !self.data.fetch_hints.is_include_edge_refs(direction) {
            self.data.fetch_hints.assert_edge_labels_included()?;
        }
        Ok(self
            .edge_refs
            .iter()
            .filter(|r| direction.matches(r.direction))
            .count())
    }
}

impl Deref for Vertex {
    type Target = ElementData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    data: ElementData,
    endpoints: EdgeEndpoints,
}

impl Edge {
    #[inline]
    pub fn label(&self) -> &Name {
        &self.endpoints.label
    }

    /// Id of the vertex on the given side. Fails with `NotFound` unless edge references were
    /// fetched for that side.
    pub fn vertex_id(&self, direction: Direction) -> StorageResult<&ElementId> {
        let Some(id) = self.endpoints.vertex_id(direction) else {
            return cellgraph_common::error::not_supported(
                "vertex id of both sides",
                Some("ask for Direction::Out or Direction::In"),
            );
        };
        if !self.data.fetch_hints.is_include_edge_refs(direction) {
            return Err(NotFoundError::VertexId {
                edge_id: self.data.key.id.clone(),
                direction,
            }
            .into());
        }
        Ok(id)
    }

    /// The endpoint opposite to `vertex_id`.
    pub fn other_vertex_id(&self, vertex_id: &str) -> StorageResult<&ElementId> {
        let direction = if self.endpoints.out_vertex_id.as_str() == vertex_id {
            Direction::In
        } else {
            Direction::Out
        };
        let other = self.vertex_id(direction)?;
        match self.endpoints.other_vertex_id(vertex_id) {
            Some(_) => Ok(other),
            None => Err(StorageError::InvalidArgument(format!(
                "vertex {vertex_id} is not an endpoint of edge {}",
                self.data.key.id
            ))),
        }
    }
}

impl Deref for Edge {
    type Target = ElementData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// A vertex or an edge as seen by one caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
}

impl Element {
    /// Materializes `record` for a caller. The caller must have checked that the element itself
    /// is visible; this only filters properties, metadata and side-table names.
    pub fn from_record(
        record: &ElementRecord,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
        edge_refs: Vec<EdgeRef>,
    ) -> StorageResult<Self> {
        let data = ElementData::from_record(record, fetch_hints, authorizations);
        match (record.key.element_type, &record.edge) {
            (ElementType::Vertex, _) => Ok(Element::Vertex(Vertex { data, edge_refs })),
            (ElementType::Edge, Some(endpoints)) => Ok(Element::Edge(Edge {
                data,
                endpoints: endpoints.clone(),
            })),
            (ElementType::Edge, None) => Err(StorageError::InvalidMutation(format!(
                "edge {} has no endpoints",
                record.key.id
            ))),
        }
    }

    pub fn as_vertex(&self) -> Option<&Vertex> {
        match self {
            Element::Vertex(v) => Some(v),
            Element::Edge(_) => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Element::Edge(e) => Some(e),
            Element::Vertex(_) => None,
        }
    }

    pub fn into_vertex(self) -> Option<Vertex> {
        match self {
            Element::Vertex(v) => Some(v),
            Element::Edge(_) => None,
        }
    }

    pub fn into_edge(self) -> Option<Edge> {
        match self {
            Element::Edge(e) => Some(e),
            Element::Vertex(_) => None,
        }
    }

    /// Starts a mutation of this element seeded with its id and visibility.
    pub fn prepare_mutation(&self) -> ExistingElementMutation {
        ExistingElementMutation::new(self.clone())
    }
}

impl Deref for Element {
    type Target = ElementData;

    fn deref(&self) -> &Self::Target {
        match self {
            Element::Vertex(v) => &v.data,
            Element::Edge(e) => &e.data,
        }
    }
}

impl From<Vertex> for Element {
    fn from(value: Vertex) -> Self {
        Element::Vertex(value)
    }
}

impl From<Edge> for Element {
    fn from(value: Edge) -> Self {
        Element::Edge(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metadata::Metadata;
    use crate::model::property::{PropertyIdentity, PropertyRecord};

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).unwrap()
    }

    fn vertex_record() -> ElementRecord {
        let mut rec = ElementRecord::new(
            ElementKey::vertex("v1"),
            vis("a"),
            None,
            Timestamp::with_ts(1),
        );
        for (value, v) in [("v1a", "a"), ("v1b", "b")] {
            rec.properties.insert(
                PropertyIdentity::new("k1", "p", vis(v)),
                PropertyRecord::new(Value::from(value), Metadata::create(), Timestamp::with_ts(1)),
            );
        }
        rec
    }

    #[test]
    fn test_properties_filtered_per_caller() {
        let rec = vertex_record();
        let read = |labels: &[&str]| {
            let auths = Authorizations::new(labels.iter().copied());
            Element::from_record(&rec, &FetchHints::ALL, &auths, vec![]).unwrap()
        };

        let a = read(&["a"]);
        assert_eq!(a.property_values("p").unwrap(), vec![&Value::from("v1a")]);
        let b = read(&["b"]);
        assert_eq!(b.property_values("p").unwrap(), vec![&Value::from("v1b")]);
        let ab = read(&["a", "b"]);
        assert_eq!(ab.property_values("p").unwrap().len(), 2);
        assert_eq!(
            ab.property(Some("k1"), "p", Some(&vis("b")))
                .unwrap()
                .map(|p| p.value()),
            Some(&Value::from("v1b"))
        );
    }

    #[test]
    fn test_unfetched_facets_fail_fast() {
        let rec = vertex_record();
        let auths = Authorizations::new(["a"]);
        let element = Element::from_record(&rec, &FetchHints::NONE, &auths, vec![]).unwrap();
        assert!(matches!(
            element.property_value("p"),
            Err(StorageError::FetchHintsMismatch(_))
        ));
        assert!(element.extended_data_table_names().is_err());
        let vertex = element.as_vertex().unwrap();
        assert!(vertex.edge_refs(Direction::Out).is_err());
        assert!(vertex.edge_count(Direction::Out).is_err());
    }

    #[test]
    fn test_vertex_edge_refs() {
        let rec = vertex_record();
        let refs = vec![
            EdgeRef {
                label: "knows".into(),
                other_vertex_id: "v2".into(),
                edge_id: "e1".into(),
                direction: Direction::Out,
            },
            EdgeRef {
                label: "likes".into(),
                other_vertex_id: "v3".into(),
                edge_id: "e2".into(),
                direction: Direction::In,
            },
        ];
        let element =
            Element::from_record(&rec, &FetchHints::ALL, &Authorizations::new(["a"]), refs)
                .unwrap();
        let vertex = element.as_vertex().unwrap();
        assert_eq!(vertex.edge_count(Direction::Both).unwrap(), 2);
        assert_eq!(vertex.edge_ids(Direction::Out).unwrap(), vec!["e1"]);
        assert_eq!(vertex.vertex_ids(Direction::In).unwrap(), vec!["v3"]);
        assert_eq!(vertex.edge_labels(Direction::Both).unwrap().len(), 2);
    }

    #[test]
    fn test_edge_vertex_id_requires_edge_refs() {
        let rec = ElementRecord::new(
            ElementKey::edge("e1"),
            Visibility::empty(),
            Some(EdgeEndpoints::new("v1", "v2", "knows")),
            Timestamp::with_ts(1),
        );
        let auths = Authorizations::empty();
        let edge = Element::from_record(&rec, &FetchHints::PROPERTIES, &auths, vec![])
            .unwrap()
            .into_edge()
            .unwrap();
        assert_eq!(edge.label(), "knows");
        assert!(matches!(
            edge.vertex_id(Direction::Out),
            Err(StorageError::NotFound(NotFoundError::VertexId { .. }))
        ));

        let edge = Element::from_record(&rec, &FetchHints::EDGE_REFS, &auths, vec![])
            .unwrap()
            .into_edge()
            .unwrap();
        assert_eq!(edge.vertex_id(Direction::In).unwrap(), "v2");
        assert_eq!(edge.other_vertex_id("v2").unwrap(), "v1");
        assert!(matches!(
            edge.vertex_id(Direction::Both),
            Err(StorageError::NotSupported(_))
        ));
        assert!(edge.other_vertex_id("v9").is_err());
    }
}
