use cellgraph_storage::StoreConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub store: StoreConfig,
    /// Reject property writes whose name has no registered definition.
    pub strict_typing: bool,
    /// Hand saved elements to the search index unless a mutation opts out.
    pub index_on_save: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            strict_typing: false,
            index_on_save: true,
        }
    }
}
