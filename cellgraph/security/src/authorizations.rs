use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use smol_str::SmolStr;

use crate::visibility::Visibility;

/// The labels a caller holds for one request. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorizations {
    labels: BTreeSet<SmolStr>,
}

impl Authorizations {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Holds no labels; only unrestricted data is readable.
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    #[inline]
    pub fn can_read(&self, visibility: &Visibility) -> bool {
        visibility.is_visible(self)
    }

    /// Returns the labels held by either `self` or `other`.
    pub fn union(&self, other: &Authorizations) -> Authorizations {
        Authorizations {
            labels: self.labels.union(&other.labels).cloned().collect(),
        }
    }

    /// Returns true if every label of `self` is also held by `other`.
    pub fn is_subset(&self, other: &Authorizations) -> bool {
        self.labels.is_subset(&other.labels)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SmolStr> {
        self.labels.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl fmt::Display for Authorizations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "auths[{}]", self.labels.iter().join(","))
    }
}

impl<S: Into<SmolStr>> FromIterator<S> for Authorizations {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}
