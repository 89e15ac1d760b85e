use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::authorizations::Authorizations;
use crate::error::{VisibilityError, VisibilityResult};
use crate::parser::{is_label_char, parse_visibility};

/// Parsed form of a visibility expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityExpr {
    Label(SmolStr),
    Not(Box<VisibilityExpr>),
    And(Vec<VisibilityExpr>),
    Or(Vec<VisibilityExpr>),
}

impl VisibilityExpr {
    /// Builds a conjunction, flattening nested conjunctions and unwrapping single terms.
    pub fn and(terms: Vec<VisibilityExpr>) -> Self {
        Self::flatten(terms, true)
    }

    /// Builds a disjunction, flattening nested disjunctions and unwrapping single terms.
    pub fn or(terms: Vec<VisibilityExpr>) -> Self {
        Self::flatten(terms, false)
    }

    fn flatten(terms: Vec<VisibilityExpr>, conjunction: bool) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                VisibilityExpr::And(inner) if conjunction => flat.extend(inner),
                VisibilityExpr::Or(inner) if !conjunction => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.swap_remove(0);
        }
        if conjunction {
            VisibilityExpr::And(flat)
        } else {
            VisibilityExpr::Or(flat)
        }
    }

    /// Evaluates the expression against the caller's labels. The empty label is always held.
    pub fn evaluate(&self, authorizations: &Authorizations) -> bool {
        match self {
            VisibilityExpr::Label(label) => label.is_empty() || authorizations.contains(label),
            VisibilityExpr::Not(inner) => !inner.evaluate(authorizations),
            VisibilityExpr::And(terms) => terms.iter().all(|t| t.evaluate(authorizations)),
            VisibilityExpr::Or(terms) => terms.iter().any(|t| t.evaluate(authorizations)),
        }
    }

    /// Returns every label referenced by the expression, in order of appearance.
    pub fn labels(&self) -> Vec<&SmolStr> {
        let mut out = Vec::new();
        self.collect_labels(&mut out);
        out
    }

    fn collect_labels<'a>(&'a self, out: &mut Vec<&'a SmolStr>) {
        match self {
            VisibilityExpr::Label(label) => out.push(label),
            VisibilityExpr::Not(inner) => inner.collect_labels(out),
            VisibilityExpr::And(terms) | VisibilityExpr::Or(terms) => {
                terms.iter().for_each(|t| t.collect_labels(out))
            }
        }
    }
}

impl fmt::Display for VisibilityExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisibilityExpr::Label(label) => {
                if !label.is_empty() && label.chars().all(is_label_char) {
                    f.write_str(label)
                } else {
                    let escaped = label.replace('\\', "\\\\").replace('"', "\\\"");
                    write!(f, "\"{escaped}\"")
                }
            }
            VisibilityExpr::Not(inner) => match inner.as_ref() {
                VisibilityExpr::And(_) | VisibilityExpr::Or(_) => write!(f, "!({inner})"),
                _ => write!(f, "!{inner}"),
            },
            VisibilityExpr::And(terms) => {
                let rendered = terms
                    .iter()
                    .map(|t| match t {
                        VisibilityExpr::Or(_) => format!("({t})"),
                        _ => t.to_string(),
                    })
                    .join("&");
                f.write_str(&rendered)
            }
            VisibilityExpr::Or(terms) => f.write_str(&terms.iter().join("|")),
        }
    }
}

/// A boolean expression over authorization labels gating read access.
///
/// The expression is parsed once on construction. Equality, ordering and hashing use the
/// source string, which is also the serialized form.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Visibility {
    source: SmolStr,
    expr: Option<Arc<VisibilityExpr>>,
}

impl Visibility {
    pub fn new(expression: impl AsRef<str>) -> VisibilityResult<Self> {
        let expression = expression.as_ref();
        let expr = parse_visibility(expression)?;
        Ok(Self {
            source: SmolStr::new(expression),
            expr: expr.map(Arc::new),
        })
    }

    /// The visibility every caller can read.
    pub fn empty() -> Self {
        Self {
            source: SmolStr::default(),
            expr: None,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn expr(&self) -> Option<&VisibilityExpr> {
        self.expr.as_deref()
    }

    /// Returns true if `authorizations` satisfy this visibility.
    #[inline]
    pub fn is_visible(&self, authorizations: &Authorizations) -> bool {
        self.expr
            .as_ref()
            .is_none_or(|expr| expr.evaluate(authorizations))
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Visibility {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Visibility {}

impl PartialOrd for Visibility {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Visibility {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source.cmp(&other.source)
    }
}

impl Hash for Visibility {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Visibility({:?})", self.source.as_str())
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Visibility {
    type Err = VisibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Visibility {
    type Error = VisibilityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Visibility> for String {
    fn from(value: Visibility) -> Self {
        value.source.to_string()
    }
}

/// Parses `expression` and evaluates it against `authorizations` in one step.
pub fn is_visibility_valid(
    expression: &str,
    authorizations: &Authorizations,
) -> VisibilityResult<bool> {
    Ok(Visibility::new(expression)?.is_visible(authorizations))
}
