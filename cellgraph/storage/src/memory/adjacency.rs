//! Incident-edge index of every vertex.
//!
//! The index tracks every edge ever attached to a vertex, soft-deleted ones included; readers
//! decide visibility from the edge's version at their read time. Only hard deletes remove
//! entries.

use cellgraph_common::types::{Direction, ElementId, Name};
use crossbeam_skiplist::SkipSet;
use dashmap::DashMap;

use crate::model::record::EdgeEndpoints;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Neighbor {
    label: Name,
    neighbor_id: ElementId,
    edge_id: ElementId,
}

impl Neighbor {
    pub fn new(label: Name, neighbor_id: ElementId, edge_id: ElementId) -> Self {
        Self {
            label,
            neighbor_id,
            edge_id,
        }
    }

    pub fn label(&self) -> &Name {
        &self.label
    }

    pub fn neighbor_id(&self) -> &ElementId {
        &self.neighbor_id
    }

    pub fn edge_id(&self) -> &ElementId {
        &self.edge_id
    }
}

#[derive(Debug, Default)]
pub struct AdjacencyContainer {
    incoming: SkipSet<Neighbor>,
    outgoing: SkipSet<Neighbor>,
}

impl AdjacencyContainer {
    pub fn incoming(&self) -> &SkipSet<Neighbor> {
        &self.incoming
    }

    pub fn outgoing(&self) -> &SkipSet<Neighbor> {
        &self.outgoing
    }

    fn side(&self, direction: Direction) -> &SkipSet<Neighbor> {
        match direction {
            Direction::In => &self.incoming,
            _ => &self.outgoing,
        }
    }

    fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AdjacencyIndex {
    containers: DashMap<ElementId, AdjacencyContainer>,
}

impl AdjacencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_edge(&self, edge_id: &ElementId, endpoints: &EdgeEndpoints) {
        self.containers
            .entry(endpoints.out_vertex_id.clone())
            .or_default()
            .outgoing
            .insert(Neighbor::new(
                endpoints.label.clone(),
                endpoints.in_vertex_id.clone(),
                edge_id.clone(),
            ));
        self.containers
            .entry(endpoints.in_vertex_id.clone())
            .or_default()
            .incoming
            .insert(Neighbor::new(
                endpoints.label.clone(),
                endpoints.out_vertex_id.clone(),
                edge_id.clone(),
            ));
    }

    pub fn remove_edge(&self, edge_id: &ElementId, endpoints: &EdgeEndpoints) {
        let out = Neighbor::new(
            endpoints.label.clone(),
            endpoints.in_vertex_id.clone(),
            edge_id.clone(),
        );
        if let Some(container) = self.containers.get(&endpoints.out_vertex_id) {
            container.outgoing.remove(&out);
        }
        let incoming = Neighbor::new(
            endpoints.label.clone(),
            endpoints.out_vertex_id.clone(),
            edge_id.clone(),
        );
        if let Some(container) = self.containers.get(&endpoints.in_vertex_id) {
            container.incoming.remove(&incoming);
        }
        self.containers
            .remove_if(&endpoints.out_vertex_id, |_, c| c.is_empty());
        self.containers
            .remove_if(&endpoints.in_vertex_id, |_, c| c.is_empty());
    }

    /// Moves an edge to its new label. `old` carries the label being replaced.
    pub fn relabel_edge(&self, edge_id: &ElementId, old: &EdgeEndpoints, new_label: &Name) {
        self.remove_edge(edge_id, old);
        let mut relabeled = old.clone();
        relabeled.label = new_label.clone();
        self.insert_edge(edge_id, &relabeled);
    }

    /// Snapshot of the neighbors of `vertex_id` on `direction`, tagged with their side.
    pub fn neighbors(&self, vertex_id: &str, direction: Direction) -> Vec<(Direction, Neighbor)> {
        let Some(container) = self.containers.get(vertex_id) else {
            return Vec::new();
        };
        [Direction::Out, Direction::In]
            .into_iter()
            .filter(|side| direction.matches(*side))
            .flat_map(|side| {
                container
                    .side(side)
                    .iter()
                    .map(move |entry| (side, entry.value().clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Ids of every edge attached to `vertex_id`, deduplicated.
    pub fn edge_ids(&self, vertex_id: &str) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .neighbors(vertex_id, Direction::Both)
            .into_iter()
            .map(|(_, neighbor)| neighbor.edge_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn remove_vertex(&self, vertex_id: &str) {
        self.containers.remove(vertex_id);
    }
}
