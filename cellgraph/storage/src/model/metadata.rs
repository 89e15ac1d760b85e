use std::collections::BTreeMap;

use cellgraph_common::types::Name;
use cellgraph_common::value::Value;
use cellgraph_security::{Authorizations, Visibility};
use serde::{Deserialize, Serialize};

/// One metadata entry of a property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetadataEntry<'a> {
    pub name: &'a Name,
    pub visibility: &'a Visibility,
    pub value: &'a Value,
}

/// Auxiliary facts about a property, addressed by (name, visibility).
///
/// Entries iterate in (name, visibility) order. Metadata is filtered by the caller's
/// authorizations independently from the property that carries it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    entries: BTreeMap<(Name, Visibility), Value>,
}

impl Metadata {
    pub fn create() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the (name, visibility) entry.
    pub fn add(
        &mut self,
        name: impl Into<Name>,
        value: impl Into<Value>,
        visibility: Visibility,
    ) -> &mut Self {
        self.entries.insert((name.into(), visibility), value.into());
        self
    }

    /// Consuming variant of [`Metadata::add`] for building literals.
    pub fn with(
        mut self,
        name: impl Into<Name>,
        value: impl Into<Value>,
        visibility: Visibility,
    ) -> Self {
        self.add(name, value, visibility);
        self
    }

    /// Looks an entry up. Without a visibility the first entry named `name` is returned.
    pub fn entry(
        &self,
        name: &str,
        visibility: Option<&Visibility>,
    ) -> Option<MetadataEntry<'_>> {
        self.entries_named(name)
            .find(|entry| visibility.is_none_or(|v| v == entry.visibility))
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entry(name, None).map(|entry| entry.value)
    }

    pub fn entries_named<'a>(
        &'a self,
        name: &str,
    ) -> impl Iterator<Item = MetadataEntry<'a>> + use<'a> {
        let name = Name::new(name);
        self.iter().filter(move |entry| *entry.name == name)
    }

    pub fn remove(&mut self, name: &str, visibility: &Visibility) -> Option<Value> {
        self.entries.remove(&(Name::new(name), visibility.clone()))
    }

    /// Removes every entry named `name` regardless of visibility.
    pub fn remove_all(&mut self, name: &str) {
        self.entries.retain(|(n, _), _| n.as_str() != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = MetadataEntry<'_>> {
        self.entries
            .iter()
            .map(|((name, visibility), value)| MetadataEntry {
                name,
                visibility,
                value,
            })
    }

    pub fn visibilities(&self) -> impl Iterator<Item = &Visibility> {
        self.entries.keys().map(|(_, visibility)| visibility)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies `other`'s entries over ours, entry by entry.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Keeps the entries readable under `authorizations` whose name passes `include`.
    pub fn filtered(
        &self,
        authorizations: &Authorizations,
        include: impl Fn(&str) -> bool,
    ) -> Metadata {
        Metadata {
            entries: self
                .entries
                .iter()
                .filter(|((name, visibility), _)| {
                    include(name) && authorizations.can_read(visibility)
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }

    /// Drops the entries `policy` reports as default-valued.
    pub fn without_defaults(mut self, policy: &dyn MetadataDefaultsPolicy) -> Metadata {
        self.entries
            .retain(|(name, _), value| !policy.is_default(name, value));
        self
    }
}

/// Decides which metadata values are defaults that need not be stored.
pub trait MetadataDefaultsPolicy: Send + Sync {
    fn is_default(&self, name: &str, value: &Value) -> bool;
}

/// A [`MetadataDefaultsPolicy`] backed by a table of default values per metadata name.
#[derive(Debug, Clone, Default)]
pub struct MetadataDefaults {
    defaults: BTreeMap<Name, Value>,
}

impl MetadataDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, name: impl Into<Name>, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }
}

impl MetadataDefaultsPolicy for MetadataDefaults {
    fn is_default(&self, name: &str, value: &Value) -> bool {
        self.defaults.get(name).is_some_and(|default| default == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).unwrap()
    }

    #[test]
    fn test_add_overwrites_same_name_and_visibility() {
        let mut metadata = Metadata::create();
        metadata.add("source", "a", vis("x"));
        metadata.add("source", "b", vis("x"));
        metadata.add("source", "c", vis("y"));
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.entry("source", Some(&vis("x"))).map(|e| e.value),
            Some(&Value::from("b"))
        );
        // Without a visibility, the first entry in (name, visibility) order wins.
        assert_eq!(metadata.value("source"), Some(&Value::from("b")));
    }

    #[test]
    fn test_filtered_by_authorizations() {
        let metadata = Metadata::create()
            .with("source", "public", Visibility::empty())
            .with("source", "secret", vis("s"))
            .with("confidence", 0.5, Visibility::empty());

        let visible = metadata.filtered(&Authorizations::empty(), |_| true);
        assert_eq!(visible.len(), 2);
        assert_eq!(visible.value("source"), Some(&Value::from("public")));

        let named = metadata.filtered(&Authorizations::new(["s"]), |name| name == "source");
        assert_eq!(named.len(), 2);
        assert!(named.value("confidence").is_none());
    }

    #[test]
    fn test_remove_all_and_merge() {
        let mut metadata = Metadata::create()
            .with("a", 1, Visibility::empty())
            .with("a", 2, vis("x"))
            .with("b", 3, Visibility::empty());
        metadata.remove_all("a");
        assert_eq!(metadata.len(), 1);

        let update = Metadata::create()
            .with("b", 4, Visibility::empty())
            .with("c", 5, Visibility::empty());
        metadata.merge(&update);
        assert_eq!(metadata.value("b"), Some(&Value::from(4)));
        assert_eq!(metadata.len(), 2);
    }

    #[test]
    fn test_defaults_policy() {
        let policy = MetadataDefaults::new().with_default("confidence", 1.0);
        let metadata = Metadata::create()
            .with("confidence", 1.0, Visibility::empty())
            .with("source", "x", Visibility::empty())
            .without_defaults(&policy);
        assert_eq!(metadata.len(), 1);
        assert!(metadata.value("confidence").is_none());
    }
}
