//! Layer key validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StratumError, StratumResult};

/// A validated layer key.
///
/// Layer keys must:
/// - Be 1-200 bytes long
/// - Contain only printable, non-whitespace ASCII
/// - Not contain `@`, which delimits backend snapshot names
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerKey(String);

impl LayerKey {
    /// Maximum length of a layer key in bytes.
    pub const MAX_LENGTH: usize = 200;

    /// Character that separates a dataset name from a snapshot name.
    pub const SNAPSHOT_DELIMITER: char = '@';

    /// Create a new layer key, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::InvalidKey`] if the key format is invalid.
    pub fn new(key: impl Into<String>) -> StratumResult<Self> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    fn validate(key: &str) -> StratumResult<()> {
        let invalid = |reason: &str| StratumError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        if key.len() > Self::MAX_LENGTH {
            return Err(invalid("key is longer than 200 bytes"));
        }
        if key.contains(Self::SNAPSHOT_DELIMITER) {
            return Err(invalid("'@' is reserved for backend snapshot names"));
        }
        if let Some(c) = key.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(invalid(&format!("character {c:?} is not allowed")));
        }

        Ok(())
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LayerKey {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LayerKey {
    type Error = StratumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LayerKey> for String {
    fn from(key: LayerKey) -> Self {
        key.0
    }
}

impl AsRef<str> for LayerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
