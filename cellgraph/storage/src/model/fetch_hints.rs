//! Which facets of an element are materialized on a read.
//!
//! Reading a facet that the hints used to load an element did not request fails with
//! [`StorageError::FetchHintsMismatch`], so "not fetched" is never mistaken for "absent".

use std::collections::BTreeSet;

use cellgraph_common::types::{Direction, Name};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHints {
    include_all_properties: bool,
    property_names_to_include: Option<BTreeSet<Name>>,
    include_all_property_metadata: bool,
    metadata_keys_to_include: Option<BTreeSet<Name>>,
    include_hidden: bool,
    include_all_edge_refs: bool,
    include_out_edge_refs: bool,
    include_in_edge_refs: bool,
    include_edge_labels_and_counts: bool,
    edge_labels_of_edge_refs_to_include: Option<BTreeSet<Name>>,
    include_extended_data_table_names: bool,
    ignore_additional_visibilities: bool,
}

impl FetchHints {
    /// Only the element itself: id, visibility, timestamp and edge endpoints.
    pub const NONE: FetchHints = FetchHints::flags(false, false, false, false, false, false);
    pub const PROPERTIES: FetchHints = FetchHints::flags(true, false, false, false, false, false);
    pub const PROPERTIES_AND_METADATA: FetchHints =
        FetchHints::flags(true, true, false, false, false, false);
    pub const EDGE_REFS: FetchHints = FetchHints::flags(false, false, true, false, false, false);
    pub const EDGE_LABELS: FetchHints = FetchHints::flags(false, false, false, true, false, false);
    pub const ALL: FetchHints = FetchHints::flags(true, true, true, true, true, false);
    pub const ALL_INCLUDING_HIDDEN: FetchHints =
        FetchHints::flags(true, true, true, true, true, true);

    const fn flags(
        properties: bool,
        metadata: bool,
        edge_refs: bool,
        edge_labels: bool,
        table_names: bool,
        hidden: bool,
    ) -> FetchHints {
        FetchHints {
            include_all_properties: properties,
            property_names_to_include: None,
            include_all_property_metadata: metadata,
            metadata_keys_to_include: None,
            include_hidden: hidden,
            include_all_edge_refs: edge_refs,
            include_out_edge_refs: false,
            include_in_edge_refs: false,
            include_edge_labels_and_counts: edge_labels,
            edge_labels_of_edge_refs_to_include: None,
            include_extended_data_table_names: table_names,
            ignore_additional_visibilities: false,
        }
    }

    pub fn builder() -> FetchHintsBuilder {
        FetchHintsBuilder::default()
    }

    /// Starts a builder pre-populated with these hints.
    pub fn to_builder(&self) -> FetchHintsBuilder {
        FetchHintsBuilder {
            hints: self.clone(),
        }
    }

    #[inline]
    pub fn is_include_all_properties(&self) -> bool {
        self.include_all_properties
    }

    /// True if at least some properties are fetched.
    pub fn is_include_properties(&self) -> bool {
        self.include_all_properties
            || self
                .property_names_to_include
                .as_ref()
                .is_some_and(|names| !names.is_empty())
    }

    pub fn is_include_property(&self, name: &str) -> bool {
        self.include_all_properties
            || self
                .property_names_to_include
                .as_ref()
                .is_some_and(|names| names.contains(name))
    }

    pub fn property_names_to_include(&self) -> Option<&BTreeSet<Name>> {
        self.property_names_to_include.as_ref()
    }

    pub fn is_include_any_metadata(&self) -> bool {
        self.include_all_property_metadata
            || self
                .metadata_keys_to_include
                .as_ref()
                .is_some_and(|names| !names.is_empty())
    }

    pub fn is_include_metadata(&self, name: &str) -> bool {
        self.include_all_property_metadata
            || self
                .metadata_keys_to_include
                .as_ref()
                .is_some_and(|names| names.contains(name))
    }

    #[inline]
    pub fn is_include_hidden(&self) -> bool {
        self.include_hidden
    }

    /// True if edge references on the given side are fetched. `Both` requires both sides.
    pub fn is_include_edge_refs(&self, direction: Direction) -> bool {
        if self.include_all_edge_refs {
            return true;
        }
        match direction {
            Direction::Out => self.include_out_edge_refs,
            Direction::In => self.include_in_edge_refs,
            Direction::Both => self.include_out_edge_refs && self.include_in_edge_refs,
        }
    }

    pub fn is_include_any_edge_refs(&self) -> bool {
        self.include_all_edge_refs || self.include_out_edge_refs || self.include_in_edge_refs
    }

    #[inline]
    pub fn is_include_edge_labels_and_counts(&self) -> bool {
        self.include_edge_labels_and_counts
    }

    /// True if an edge reference with `label` passes the label filter.
    pub fn is_include_edge_ref_label(&self, label: &str) -> bool {
        self.edge_labels_of_edge_refs_to_include
            .as_ref()
            .is_none_or(|labels| labels.contains(label))
    }

    #[inline]
    pub fn is_include_extended_data_table_names(&self) -> bool {
        self.include_extended_data_table_names
    }

    #[inline]
    pub fn is_ignore_additional_visibilities(&self) -> bool {
        self.ignore_additional_visibilities
    }

    /// Returns true if everything `other` requests is also requested by `self`.
    pub fn has_fetch_hints(&self, other: &FetchHints) -> bool {
        let properties = self.include_all_properties
            || (!other.include_all_properties
                && subset(
                    &other.property_names_to_include,
                    &self.property_names_to_include,
                ));
        let metadata = self.include_all_property_metadata
            || (!other.include_all_property_metadata
                && subset(
                    &other.metadata_keys_to_include,
                    &self.metadata_keys_to_include,
                ));
        let edge_refs = [Direction::Out, Direction::In]
            .into_iter()
            .all(|d| !other.is_include_edge_refs(d) || self.is_include_edge_refs(d));
        let edge_labels = match (
            &self.edge_labels_of_edge_refs_to_include,
            &other.edge_labels_of_edge_refs_to_include,
        ) {
            (None, _) => true,
            (Some(_), None) => !other.is_include_any_edge_refs(),
            (Some(mine), Some(theirs)) => theirs.is_subset(mine),
        };
        properties
            && metadata
            && edge_refs
            && edge_labels
            && (self.include_hidden || !other.include_hidden)
            && (self.include_edge_labels_and_counts || !other.include_edge_labels_and_counts)
            && (self.include_extended_data_table_names || !other.include_extended_data_table_names)
            && (!self.ignore_additional_visibilities || other.ignore_additional_visibilities)
    }

    pub fn assert_property_included(&self, name: &str) -> StorageResult<()> {
        if self.is_include_property(name) {
            Ok(())
        } else {
            Err(mismatch(format!("property {name:?}")))
        }
    }

    pub fn assert_metadata_included(&self, name: &str) -> StorageResult<()> {
        if self.is_include_metadata(name) {
            Ok(())
        } else {
            Err(mismatch(format!("metadata {name:?}")))
        }
    }

    pub fn assert_any_metadata_included(&self) -> StorageResult<()> {
        if self.is_include_any_metadata() {
            Ok(())
        } else {
            Err(mismatch("property metadata"))
        }
    }

    pub fn assert_edge_refs_included(&self, direction: Direction) -> StorageResult<()> {
        if self.is_include_edge_refs(direction) {
            Ok(())
        } else {
            Err(mismatch(format!("{direction:?} edge refs")))
        }
    }

    pub fn assert_edge_labels_included(&self) -> StorageResult<()> {
        if self.include_edge_labels_and_counts || self.include_all_edge_refs {
            Ok(())
        } else {
            Err(mismatch("edge labels"))
        }
    }

    pub fn assert_extended_data_table_names_included(&self) -> StorageResult<()> {
        if self.include_extended_data_table_names {
            Ok(())
        } else {
            Err(mismatch("extended data table names"))
        }
    }
}

impl Default for FetchHints {
    fn default() -> Self {
        FetchHints::ALL
    }
}

fn subset(needed: &Option<BTreeSet<Name>>, available: &Option<BTreeSet<Name>>) -> bool {
    match (needed, available) {
        (None, _) => true,
        (Some(needed), None) => needed.is_empty(),
        (Some(needed), Some(available)) => needed.is_subset(available),
    }
}

fn mismatch(facet: impl Into<String>) -> StorageError {
    StorageError::FetchHintsMismatch(facet.into())
}

#[derive(Debug, Clone)]
pub struct FetchHintsBuilder {
    hints: FetchHints,
}

impl Default for FetchHintsBuilder {
    fn default() -> Self {
        Self {
            hints: FetchHints::NONE,
        }
    }
}

impl FetchHintsBuilder {
    pub fn include_all_properties(mut self, include: bool) -> Self {
        self.hints.include_all_properties = include;
        self
    }

    pub fn property_names_to_include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        self.hints.property_names_to_include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn include_all_property_metadata(mut self, include: bool) -> Self {
        self.hints.include_all_property_metadata = include;
        self
    }

    pub fn metadata_keys_to_include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        self.hints.metadata_keys_to_include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.hints.include_hidden = include;
        self
    }

    pub fn include_all_edge_refs(mut self, include: bool) -> Self {
        self.hints.include_all_edge_refs = include;
        self
    }

    pub fn include_out_edge_refs(mut self, include: bool) -> Self {
        self.hints.include_out_edge_refs = include;
        self
    }

    pub fn include_in_edge_refs(mut self, include: bool) -> Self {
        self.hints.include_in_edge_refs = include;
        self
    }

    pub fn include_edge_labels_and_counts(mut self, include: bool) -> Self {
        self.hints.include_edge_labels_and_counts = include;
        self
    }

    pub fn edge_labels_of_edge_refs_to_include<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        self.hints.edge_labels_of_edge_refs_to_include =
            Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn include_extended_data_table_names(mut self, include: bool) -> Self {
        self.hints.include_extended_data_table_names = include;
        self
    }

    pub fn ignore_additional_visibilities(mut self, ignore: bool) -> Self {
        self.hints.ignore_additional_visibilities = ignore;
        self
    }

    /// Fails when metadata is requested without requesting any property to attach it to.
    pub fn build(self) -> StorageResult<FetchHints> {
        let hints = self.hints;
        if hints.is_include_any_metadata() && !hints.is_include_properties() {
            return Err(StorageError::InvalidFetchHints(
                "property metadata requested without any properties".to_string(),
            ));
        }
        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert!(!FetchHints::NONE.is_include_properties());
        assert!(FetchHints::PROPERTIES.is_include_property("anything"));
        assert!(!FetchHints::PROPERTIES.is_include_metadata("m"));
        assert!(FetchHints::EDGE_REFS.is_include_edge_refs(Direction::Both));
        assert!(!FetchHints::ALL.is_include_hidden());
        assert!(FetchHints::ALL_INCLUDING_HIDDEN.is_include_hidden());
        assert!(FetchHints::ALL_INCLUDING_HIDDEN.has_fetch_hints(&FetchHints::ALL));
        assert!(!FetchHints::ALL.has_fetch_hints(&FetchHints::ALL_INCLUDING_HIDDEN));
    }

    #[test]
    fn test_named_properties() {
        let hints = FetchHints::builder()
            .property_names_to_include(["name", "age"])
            .metadata_keys_to_include(["source"])
            .build()
            .unwrap();
        assert!(hints.is_include_property("name"));
        assert!(!hints.is_include_property("city"));
        assert!(hints.is_include_metadata("source"));
        assert!(!hints.is_include_metadata("confidence"));
        assert!(matches!(
            hints.assert_property_included("city"),
            Err(StorageError::FetchHintsMismatch(_))
        ));
        assert!(FetchHints::ALL.has_fetch_hints(&hints));
        assert!(!hints.has_fetch_hints(&FetchHints::PROPERTIES));
    }

    #[test]
    fn test_metadata_without_properties_is_rejected() {
        let result = FetchHints::builder()
            .include_all_property_metadata(true)
            .build();
        assert!(matches!(result, Err(StorageError::InvalidFetchHints(_))));
    }

    #[test]
    fn test_edge_ref_directions_and_labels() {
        let hints = FetchHints::builder()
            .include_out_edge_refs(true)
            .edge_labels_of_edge_refs_to_include(["knows"])
            .build()
            .unwrap();
        assert!(hints.is_include_edge_refs(Direction::Out));
        assert!(!hints.is_include_edge_refs(Direction::In));
        assert!(!hints.is_include_edge_refs(Direction::Both));
        assert!(hints.is_include_edge_ref_label("knows"));
        assert!(!hints.is_include_edge_ref_label("likes"));
        assert!(hints.assert_edge_labels_included().is_err());
        assert!(FetchHints::EDGE_REFS.has_fetch_hints(&hints));
        assert!(!hints.has_fetch_hints(&FetchHints::EDGE_REFS));
    }
}
