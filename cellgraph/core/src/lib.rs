pub mod config;
pub mod definition;
pub mod graph;
pub mod notification;
pub mod search;

pub use cellgraph_security::{Authorizations, Visibility};
pub use cellgraph_storage::error::{NotFoundError, StorageError, StorageResult};
pub use cellgraph_storage::model::element::{Edge, Element, Vertex};
pub use cellgraph_storage::model::fetch_hints::FetchHints;
pub use cellgraph_storage::mutation::{
    ElementMutation, ElementMutationBuilder, ExistingElementMutation, Mutation,
};
pub use config::GraphConfig;
pub use graph::Graph;
