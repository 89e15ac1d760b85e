use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use cellgraph::search::MemorySearchIndex;
use cellgraph::{Authorizations, Graph, GraphConfig, Visibility};
use cellgraph_storage::StoreConfig;
use cellgraph_storage::wal::graph_wal::WalConfig;

pub struct TestCleaner {
    wal_path: PathBuf,
}

impl Drop for TestCleaner {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.wal_path);
    }
}

pub fn create_test_config() -> (GraphConfig, TestCleaner) {
    let file_name = format!(
        "test_cellgraph_graph_{}_{}.log",
        chrono::Utc::now().timestamp(),
        rand::random::<u32>()
    );
    let wal = WalConfig::new(std::env::temp_dir().join(file_name));
    let cleaner = TestCleaner {
        wal_path: wal.wal_path.clone(),
    };
    let config = GraphConfig {
        store: StoreConfig {
            wal: Some(wal),
            ..StoreConfig::default()
        },
        ..GraphConfig::default()
    };
    (config, cleaner)
}

#[allow(dead_code)]
pub fn create_indexed_graph() -> (Graph, Arc<MemorySearchIndex>, TestCleaner) {
    let (config, cleaner) = create_test_config();
    let index = Arc::new(MemorySearchIndex::new());
    let graph = Graph::open_with(config, index.clone(), None).unwrap();
    (graph, index, cleaner)
}

#[allow(dead_code)]
pub fn vis(expression: &str) -> Visibility {
    Visibility::new(expression).unwrap()
}

#[allow(dead_code)]
pub fn auths(labels: &[&str]) -> Authorizations {
    Authorizations::new(labels.iter().copied())
}
