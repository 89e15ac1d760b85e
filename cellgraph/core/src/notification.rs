use std::fmt;

use cellgraph_common::types::ElementKey;
use cellgraph_storage::history::HistoricalEvent;

/// Change notification handed out by [`Graph::flush`](crate::Graph::flush).
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    Changed(HistoricalEvent),
    Deleted(ElementKey),
}

impl GraphEvent {
    pub fn element(&self) -> &ElementKey {
        match self {
            GraphEvent::Changed(event) => &event.element,
            GraphEvent::Deleted(key) => key,
        }
    }
}

impl fmt::Display for GraphEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphEvent::Changed(event) => write!(f, "changed {event}"),
            GraphEvent::Deleted(key) => write!(f, "deleted {key}"),
        }
    }
}
