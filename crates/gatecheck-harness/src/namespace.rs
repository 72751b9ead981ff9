//! Logical to physical naming.
//!
//! Scenarios are written against logical principal and bucket names. A run
//! namespace suffixes every physical name so that independent runs against
//! the same store never collide.

use crate::error::ScenarioError;

/// Maps logical names to the names sent to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    suffix: Option<String>,
}

impl Namespace {
    /// Creates a namespace. `None` leaves names untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::InvalidNamespace`] if the suffix would make
    /// bucket names invalid.
    pub fn new(suffix: Option<String>) -> Result<Self, ScenarioError> {
        if let Some(s) = &suffix {
            let valid = !s.is_empty()
                && !s.starts_with('-')
                && !s.ends_with('-')
                && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !valid {
                return Err(ScenarioError::InvalidNamespace(s.clone()));
            }
        }
        Ok(Self { suffix })
    }

    /// Returns the suffix, if any.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Physical user id of a root principal.
    #[must_use]
    pub fn user(&self, logical: &str) -> String {
        self.apply(logical)
    }

    /// Physical bucket name.
    #[must_use]
    pub fn bucket(&self, logical: &str) -> String {
        self.apply(logical)
    }

    /// Translates a physical bucket name back. Names from outside the
    /// namespace are returned unchanged so they show up in listing mismatches.
    #[must_use]
    pub fn logical_bucket(&self, physical: &str) -> String {
        match &self.suffix {
            Some(s) => physical
                .strip_suffix(s.as_str())
                .and_then(|rest| rest.strip_suffix('-'))
                .unwrap_or(physical)
                .to_string(),
            None => physical.to_string(),
        }
    }

    fn apply(&self, logical: &str) -> String {
        match &self.suffix {
            Some(s) => format!("{logical}-{s}"),
            None => logical.to_string(),
        }
    }
}
