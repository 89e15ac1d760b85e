use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Identifier of a vertex or an edge (graph-wide unique per element type).
pub type ElementId = SmolStr;

/// Name of a property, metadata entry, table or column.
pub type Name = SmolStr;

/// Distinguishes the two kinds of graph elements.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ElementType {
    Vertex,
    Edge,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Vertex => f.write_str("vertex"),
            ElementType::Edge => f.write_str("edge"),
        }
    }
}

/// Direction of an edge relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    /// Returns true if an edge seen from the given side matches this direction.
    #[inline]
    pub fn matches(&self, side: Direction) -> bool {
        matches!(
            (self, side),
            (Direction::Both, _) | (Direction::Out, Direction::Out) | (Direction::In, Direction::In)
        )
    }

    #[inline]
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => Direction::Both,
        }
    }
}

/// Addresses a single element in the graph.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ElementKey {
    pub element_type: ElementType,
    pub id: ElementId,
}

impl ElementKey {
    #[inline]
    pub fn new(element_type: ElementType, id: impl Into<ElementId>) -> Self {
        Self {
            element_type,
            id: id.into(),
        }
    }

    #[inline]
    pub fn vertex(id: impl Into<ElementId>) -> Self {
        Self::new(ElementType::Vertex, id)
    }

    #[inline]
    pub fn edge(id: impl Into<ElementId>) -> Self {
        Self::new(ElementType::Edge, id)
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.element_type, self.id)
    }
}
