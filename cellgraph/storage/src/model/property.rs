use std::collections::BTreeMap;
use std::fmt;

use cellgraph_common::types::Name;
use cellgraph_common::value::Value;
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_version::Timestamp;
use serde::{Deserialize, Serialize};

use super::fetch_hints::FetchHints;
use super::metadata::{Metadata, MetadataEntry};
use crate::error::StorageResult;

/// Identity of a property instance on an element.
///
/// Field order gives the iteration order of an element's properties: by name, then visibility
/// string, then key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyIdentity {
    pub name: Name,
    pub visibility: Visibility,
    pub key: Name,
}

impl PropertyIdentity {
    pub fn new(key: impl Into<Name>, name: impl Into<Name>, visibility: Visibility) -> Self {
        Self {
            name: name.into(),
            visibility,
            key: key.into(),
        }
    }

    /// Returns true if this identity matches a possibly partial (key, name, visibility).
    pub fn matches(&self, key: Option<&str>, name: &str, visibility: Option<&Visibility>) -> bool {
        self.name.as_str() == name
            && key.is_none_or(|k| self.key.as_str() == k)
            && visibility.is_none_or(|v| &self.visibility == v)
    }
}

impl fmt::Display for PropertyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.key, self.name, self.visibility)
    }
}

/// Stored state of one property instance. The identity is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub value: Value,
    pub metadata: Metadata,
    pub timestamp: Timestamp,
    /// Hidden-visibility markers and the time each was placed.
    pub hidden: BTreeMap<Visibility, Timestamp>,
}

impl PropertyRecord {
    pub fn new(value: Value, metadata: Metadata, timestamp: Timestamp) -> Self {
        Self {
            value,
            metadata,
            timestamp,
            hidden: BTreeMap::new(),
        }
    }

    /// True iff any hidden marker evaluates true under `authorizations`.
    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        self.hidden.keys().any(|v| authorizations.can_read(v))
    }
}

/// A property as seen by one caller: filtered by authorizations and fetch hints.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    identity: PropertyIdentity,
    value: Value,
    timestamp: Timestamp,
    metadata: Metadata,
    /// Hints the property was read with; they decide which metadata may be asked for.
    fetch_hints: FetchHints,
    hidden_visibilities: Vec<Visibility>,
}

impl Property {
    /// Materializes `record` for a caller. Metadata entries and hidden markers are filtered
    /// independently from the property itself.
    pub fn from_record(
        identity: &PropertyIdentity,
        record: &PropertyRecord,
        fetch_hints: &FetchHints,
        authorizations: &Authorizations,
    ) -> Self {
        let metadata = record
            .metadata
            .filtered(authorizations, |name| fetch_hints.is_include_metadata(name));
        Self {
            identity: identity.clone(),
            value: record.value.clone(),
            timestamp: record.timestamp,
            metadata,
            fetch_hints: fetch_hints.clone(),
            hidden_visibilities: record
                .hidden
                .keys()
                .filter(|v| authorizations.can_read(v))
                .cloned()
                .collect(),
        }
    }

    #[inline]
    pub fn identity(&self) -> &PropertyIdentity {
        &self.identity
    }

    #[inline]
    pub fn key(&self) -> &Name {
        &self.identity.key
    }

    #[inline]
    pub fn name(&self) -> &Name {
        &self.identity.name
    }

    #[inline]
    pub fn visibility(&self) -> &Visibility {
        &self.identity.visibility
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The visible, fetched metadata of this property.
    pub fn metadata(&self) -> StorageResult<&Metadata> {
        self.fetch_hints.assert_any_metadata_included()?;
        Ok(&self.metadata)
    }

    /// The visible metadata entry named `name`. Fails unless the fetch hints requested `name`.
    pub fn metadata_entry(
        &self,
        name: &str,
        visibility: Option<&Visibility>,
    ) -> StorageResult<Option<MetadataEntry<'_>>> {
        self.fetch_hints.assert_metadata_included(name)?;
        Ok(self.metadata.entry(name, visibility))
    }

    pub fn metadata_value(&self, name: &str) -> StorageResult<Option<&Value>> {
        Ok(self.metadata_entry(name, None)?.map(|entry| entry.value))
    }

    /// Hidden markers readable by the caller.
    pub fn hidden_visibilities(&self) -> &[Visibility] {
        &self.hidden_visibilities
    }

    pub fn is_hidden(&self, authorizations: &Authorizations) -> bool {
        self.hidden_visibilities
            .iter()
            .any(|v| authorizations.can_read(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).unwrap()
    }

    #[test]
    fn test_identity_ordering() {
        let mut ids: Vec<_> = ["a", "aa", "b", "0", "A", "Z"]
            .into_iter()
            .map(|key| PropertyIdentity::new(key, "p", vis("v")))
            .collect();
        ids.sort();
        let keys: Vec<&str> = ids.iter().map(|id| id.key.as_str()).collect();
        assert_eq!(keys, vec!["0", "A", "Z", "a", "aa", "b"]);

        // Visibility sorts before key.
        let a = PropertyIdentity::new("z", "p", vis("a"));
        let b = PropertyIdentity::new("a", "p", vis("b"));
        assert!(a < b);
    }

    #[test]
    fn test_partial_match() {
        let id = PropertyIdentity::new("k1", "name", vis("a"));
        assert!(id.matches(None, "name", None));
        assert!(id.matches(Some("k1"), "name", Some(&vis("a"))));
        assert!(!id.matches(Some("k2"), "name", None));
        assert!(!id.matches(None, "name", Some(&vis("b"))));
        assert!(!id.matches(None, "other", None));
    }

    #[test]
    fn test_metadata_requires_fetch_hints() {
        let id = PropertyIdentity::new("k", "p", Visibility::empty());
        let mut record = PropertyRecord::new(
            Value::from("x"),
            Metadata::create()
                .with("m1", 1, Visibility::empty())
                .with("m2", 2, vis("secret")),
            Timestamp::with_ts(1),
        );
        record.hidden.insert(vis("h"), Timestamp::with_ts(2));
        let auths = Authorizations::new(["h"]);

        let without = Property::from_record(&id, &record, &FetchHints::PROPERTIES, &auths);
        assert!(matches!(
            without.metadata(),
            Err(StorageError::FetchHintsMismatch(_))
        ));
        assert!(without.is_hidden(&auths));
        assert!(!without.is_hidden(&Authorizations::empty()));

        let with = Property::from_record(&id, &record, &FetchHints::ALL, &auths);
        assert_eq!(with.metadata().unwrap().len(), 1);
        assert_eq!(with.metadata_value("m1").unwrap(), Some(&Value::from(1)));
        assert_eq!(with.metadata_value("m2").unwrap(), None);
        assert_eq!(with.hidden_visibilities(), &[vis("h")]);
        let empty = Authorizations::empty();
        let blind = Property::from_record(&id, &record, &FetchHints::ALL, &empty);
        assert!(blind.hidden_visibilities().is_empty());
    }

    #[test]
    fn test_unrequested_metadata_name_fails() {
        let id = PropertyIdentity::new("k", "p", Visibility::empty());
        let record = PropertyRecord::new(
            Value::from("x"),
            Metadata::create()
                .with("a", 1, Visibility::empty())
                .with("b", 2, Visibility::empty()),
            Timestamp::with_ts(1),
        );
        let hints = FetchHints::builder()
            .include_all_properties(true)
            .metadata_keys_to_include(["a"])
            .build()
            .unwrap();
        let property = Property::from_record(&id, &record, &hints, &Authorizations::empty());
        assert_eq!(property.metadata_value("a").unwrap(), Some(&Value::from(1)));
        assert!(matches!(
            property.metadata_value("b"),
            Err(StorageError::FetchHintsMismatch(_))
        ));
        assert_eq!(property.metadata().unwrap().len(), 1);
    }
}
