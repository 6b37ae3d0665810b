//! Value objects: immutable, compared by value.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Longest accepted username, in characters.
pub const MAX_USERNAME_LEN: usize = 64;

/// A validated submission username.
///
/// Construction is the admission-time validation step: a job can only be
/// enqueued for a `Username`, so empty or oversized input never reaches the
/// queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Trim and validate raw user input.
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("username is required"));
        }
        if trimmed.chars().count() > MAX_USERNAME_LEN {
            return Err(DomainError::validation(format!(
                "username must be at most {MAX_USERNAME_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Username {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let u = Username::parse("  alice \n").unwrap();
        assert_eq!(u.as_str(), "alice");
    }

    #[test]
    fn rejects_blank_input() {
        assert!(matches!(Username::parse(""), Err(DomainError::Validation(_))));
        assert!(matches!(Username::parse("   "), Err(DomainError::Validation(_))));
    }

    #[test]
    fn rejects_oversized_input() {
        let long = "x".repeat(MAX_USERNAME_LEN + 1);
        assert!(Username::parse(&long).is_err());
        assert!(Username::parse("x".repeat(MAX_USERNAME_LEN)).is_ok());
    }

    #[test]
    fn equal_by_value() {
        assert_eq!(Username::parse("bob").unwrap(), Username::parse(" bob").unwrap());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn accepted_names_are_trimmed_and_bounded(raw in "\\PC{0,80}") {
                if let Ok(u) = Username::parse(&raw) {
                    prop_assert!(!u.as_str().is_empty());
                    prop_assert_eq!(u.as_str(), u.as_str().trim());
                    prop_assert!(u.as_str().chars().count() <= MAX_USERNAME_LEN);
                    prop_assert_eq!(Username::parse(u.as_str()).unwrap(), u);
                }
            }
        }
    }
}
