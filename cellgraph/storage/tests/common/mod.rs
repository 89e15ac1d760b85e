use std::fs;
use std::path::PathBuf;

use cellgraph_security::{Authorizations, Visibility};
use cellgraph_storage::model::record::ElementRecord;
use cellgraph_storage::mutation::{ElementMutation, ElementMutationBuilder};
use cellgraph_storage::wal::graph_wal::WalConfig;
use cellgraph_storage::{MemoryStore, StoreConfig};

pub struct TestCleaner {
    wal_path: PathBuf,
}

impl TestCleaner {
    pub fn new(wal_config: &WalConfig) -> Self {
        Self {
            wal_path: wal_config.wal_path.clone(),
        }
    }
}

impl Drop for TestCleaner {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.wal_path);
    }
}

pub fn create_test_wal_config() -> WalConfig {
    let file_name = format!(
        "test_cellgraph_wal_{}_{}.log",
        chrono::Utc::now().timestamp(),
        rand::random::<u32>()
    );
    WalConfig::new(std::env::temp_dir().join(file_name))
}

pub fn store_config(wal_config: &WalConfig) -> StoreConfig {
    StoreConfig {
        wal: Some(wal_config.clone()),
        ..StoreConfig::default()
    }
}

pub fn create_empty_store() -> (MemoryStore, TestCleaner) {
    let wal_config = create_test_wal_config();
    let cleaner = TestCleaner::new(&wal_config);
    let store = MemoryStore::open(store_config(&wal_config)).unwrap();
    (store, cleaner)
}

#[allow(dead_code)]
pub fn vis(expression: &str) -> Visibility {
    Visibility::new(expression).unwrap()
}

#[allow(dead_code)]
pub fn auths(labels: &[&str]) -> Authorizations {
    Authorizations::new(labels.iter().copied())
}

/// Two people who know each other, with a city in between.
#[allow(dead_code)]
pub fn create_test_store() -> (MemoryStore, TestCleaner) {
    let (store, cleaner) = create_empty_store();
    for (id, name) in [("alice", "Alice"), ("bob", "Bob")] {
        store
            .apply(
                &ElementMutation::vertex(id, Visibility::empty())
                    .set_property("", "name", name, Visibility::empty())
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }
    store
        .apply(
            &ElementMutation::vertex("paris", vis("geo"))
                .set_property("", "name", "Paris", Visibility::empty())
                .build()
                .unwrap(),
        )
        .unwrap();
    for (id, out, r#in, label) in [
        ("e1", "alice", "bob", "knows"),
        ("e2", "alice", "paris", "lives_in"),
        ("e3", "bob", "paris", "lives_in"),
    ] {
        store
            .apply(
                &ElementMutation::edge(id, out, r#in, label, Visibility::empty())
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }
    (store, cleaner)
}

/// Asserts that replaying the event log reproduces the stored record at `at`.
#[allow(dead_code)]
pub fn assert_replay_matches(
    store: &MemoryStore,
    key: &cellgraph_common::types::ElementKey,
    at: Option<cellgraph_version::Timestamp>,
) {
    let stored: Option<ElementRecord> = store.element_record(key, at).map(|r| (*r).clone());
    let replayed = store.replay_element(key, at).unwrap();
    assert_eq!(replayed, stored, "replay of {key} diverged at {at:?}");
}
