//! The search index collaborator.
//!
//! The graph hands every saved element to a [`SearchIndex`] after the store accepted it. Indexes
//! are eventually consistent: writes become searchable after [`SearchIndex::flush`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use cellgraph_common::error::not_supported;
use cellgraph_common::types::ElementKey;
use cellgraph_security::Authorizations;
use cellgraph_storage::error::StorageResult;
use cellgraph_storage::model::element::Element;
use cellgraph_storage::model::extended_data::ExtendedDataRow;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

pub trait SearchIndex: Send + Sync {
    fn add_elements(
        &self,
        elements: &[Element],
        authorizations: &Authorizations,
    ) -> StorageResult<()>;

    fn delete_element(&self, key: &ElementKey, authorizations: &Authorizations)
    -> StorageResult<()>;

    /// Replaces the indexed extended data rows of `key`.
    fn add_extended_data(
        &self,
        key: &ElementKey,
        rows: &[ExtendedDataRow],
        authorizations: &Authorizations,
    ) -> StorageResult<()>;

    fn flush(&self) -> StorageResult<()>;

    /// Removes every document but keeps the index usable.
    fn truncate(&self) -> StorageResult<()>;

    fn drop_index(&self) -> StorageResult<()>;
}

/// Index that accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearchIndex;

impl SearchIndex for NoopSearchIndex {
    fn add_elements(&self, _: &[Element], _: &Authorizations) -> StorageResult<()> {
        Ok(())
    }

    fn delete_element(&self, _: &ElementKey, _: &Authorizations) -> StorageResult<()> {
        Ok(())
    }

    fn add_extended_data(
        &self,
        _: &ElementKey,
        _: &[ExtendedDataRow],
        _: &Authorizations,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&self) -> StorageResult<()> {
        Ok(())
    }

    fn drop_index(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Element(Box<Element>),
    Delete(ElementKey),
    Rows(ElementKey, Vec<ExtendedDataRow>),
}

#[derive(Debug, Default)]
struct Documents {
    elements: BTreeMap<ElementKey, Element>,
    rows: BTreeMap<ElementKey, Vec<ExtendedDataRow>>,
}

/// In-memory index that buffers writes until flushed.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    pending: Mutex<Vec<PendingWrite>>,
    documents: RwLock<Documents>,
    dropped: AtomicBool,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.dropped.load(Ordering::Acquire) {
            return not_supported("writes to a dropped search index", Some("create a new index"));
        }
        Ok(())
    }

    fn enqueue(&self, write: PendingWrite) -> StorageResult<()> {
        self.ensure_open()?;
        self.pending.lock().push(write);
        Ok(())
    }

    /// The searchable copy of `key`, as of the last flush.
    pub fn element(&self, key: &ElementKey) -> Option<Element> {
        self.documents.read().elements.get(key).cloned()
    }

    pub fn extended_data(&self, key: &ElementKey) -> Vec<ExtendedDataRow> {
        self.documents
            .read()
            .rows
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Keys of every searchable element, in key order.
    pub fn keys(&self) -> Vec<ElementKey> {
        self.documents.read().elements.keys().cloned().collect()
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.lock().len()
    }
}

impl SearchIndex for MemorySearchIndex {
    fn add_elements(
        &self,
        elements: &[Element],
        _authorizations: &Authorizations,
    ) -> StorageResult<()> {
        for element in elements {
            self.enqueue(PendingWrite::Element(Box::new(element.clone())))?;
        }
        Ok(())
    }

    fn delete_element(
        &self,
        key: &ElementKey,
        _authorizations: &Authorizations,
    ) -> StorageResult<()> {
        self.enqueue(PendingWrite::Delete(key.clone()))
    }

    fn add_extended_data(
        &self,
        key: &ElementKey,
        rows: &[ExtendedDataRow],
        _authorizations: &Authorizations,
    ) -> StorageResult<()> {
        self.enqueue(PendingWrite::Rows(key.clone(), rows.to_vec()))
    }

    fn flush(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }
        let writes = pending.len();
        let mut documents = self.documents.write();
        for write in pending {
            match write {
                PendingWrite::Element(element) => {
                    documents.elements.insert(element.key().clone(), *element);
                }
                PendingWrite::Delete(key) => {
                    documents.elements.remove(&key);
                    documents.rows.remove(&key);
                }
                PendingWrite::Rows(key, rows) => {
                    documents.rows.insert(key, rows);
                }
            }
        }
        debug!(writes, documents = documents.elements.len(), "search index flushed");
        Ok(())
    }

    fn truncate(&self) -> StorageResult<()> {
        self.pending.lock().clear();
        *self.documents.write() = Documents::default();
        Ok(())
    }

    fn drop_index(&self) -> StorageResult<()> {
        self.truncate()?;
        self.dropped.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cellgraph_security::Visibility;
    use cellgraph_storage::model::fetch_hints::FetchHints;
    use cellgraph_storage::model::record::ElementRecord;
    use cellgraph_storage::StorageError;
    use cellgraph_version::Timestamp;

    use super::*;

    fn element(id: &str) -> Element {
        let record = ElementRecord::new(
            ElementKey::vertex(id),
            Visibility::empty(),
            None,
            Timestamp::with_ts(1),
        );
        Element::from_record(&record, &FetchHints::ALL, &Authorizations::empty(), vec![]).unwrap()
    }

    #[test]
    fn test_writes_become_visible_on_flush() {
        let index = MemorySearchIndex::new();
        let auths = Authorizations::empty();
        index.add_elements(&[element("v1"), element("v2")], &auths).unwrap();
        assert!(index.keys().is_empty());
        assert_eq!(index.pending_writes(), 2);

        index.flush().unwrap();
        assert_eq!(index.keys(), vec![ElementKey::vertex("v1"), ElementKey::vertex("v2")]);

        index.delete_element(&ElementKey::vertex("v1"), &auths).unwrap();
        assert!(index.element(&ElementKey::vertex("v1")).is_some());
        index.flush().unwrap();
        assert!(index.element(&ElementKey::vertex("v1")).is_none());
    }

    #[test]
    fn test_dropped_index_rejects_writes() {
        let index = MemorySearchIndex::new();
        let auths = Authorizations::empty();
        index.add_elements(&[element("v1")], &auths).unwrap();
        index.flush().unwrap();
        index.truncate().unwrap();
        assert!(index.keys().is_empty());

        index.drop_index().unwrap();
        assert!(matches!(
            index.add_elements(&[element("v1")], &auths),
            Err(StorageError::NotSupported(_))
        ));
    }
}
