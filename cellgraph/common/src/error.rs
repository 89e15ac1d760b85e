use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Explains what a caller can do when a capability is missing.
#[derive(Debug, Clone, Default)]
pub struct SupportHint(Option<String>);

impl SupportHint {
    pub fn new(hint: Option<String>) -> Self {
        Self(hint)
    }
}

impl From<&str> for SupportHint {
    fn from(hint: &str) -> Self {
        Self(Some(hint.to_string()))
    }
}

impl From<Option<&str>> for SupportHint {
    fn from(hint: Option<&str>) -> Self {
        Self(hint.map(String::from))
    }
}

impl fmt::Display for SupportHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(hint) => f.write_str(hint),
            None => f.write_str("the active backend does not provide this capability"),
        }
    }
}

/// A requested capability (predicate, aggregation, fetch-hint combination, ...) is not
/// implemented. Test suites treat this as a skip condition.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("not supported: {feature}")]
pub struct NotSupported {
    feature: String,
    #[help]
    hint: SupportHint,
}

impl NotSupported {
    #[inline]
    pub fn new(feature: String, hint: SupportHint) -> Self {
        Self { feature, hint }
    }

    #[inline]
    pub fn feature(&self) -> &str {
        &self.feature
    }

    #[inline]
    pub fn hint(&self) -> &SupportHint {
        &self.hint
    }
}

#[inline]
pub fn not_supported<T, E>(feature: impl Into<String>, hint: Option<&str>) -> Result<T, E>
where
    E: From<NotSupported>,
{
    Err(E::from(NotSupported::new(feature.into(), hint.into())))
}
