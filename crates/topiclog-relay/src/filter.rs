//! Topic filters with hierarchical wildcard syntax.
//!
//! Levels are separated by `/`. `+` matches exactly one level and `#`
//! matches any number of trailing levels, including none.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::RelayError;

const MAX_FILTER_LEN: usize = 65_535;

/// A validated subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validates `filter`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidFilter` if the filter is empty, too long,
    /// contains NUL, uses a wildcard inside a level, or has `#` anywhere but
    /// the last level.
    pub fn new(filter: impl Into<String>) -> Result<Self, RelayError> {
        let filter = filter.into();
        let invalid = |reason| RelayError::InvalidFilter {
            filter: filter.clone(),
            reason,
        };

        if filter.is_empty() {
            return Err(invalid("filter is empty"));
        }
        if filter.len() > MAX_FILTER_LEN {
            return Err(invalid("filter is longer than 65535 bytes"));
        }
        if filter.contains('\0') {
            return Err(invalid("filter contains NUL"));
        }

        let levels: Vec<&str> = filter.split('/').collect();
        for (i, level) in levels.iter().enumerate() {
            if level.contains('+') && *level != "+" {
                return Err(invalid("'+' must occupy a whole level"));
            }
            if level.contains('#') {
                if *level != "#" {
                    return Err(invalid("'#' must occupy a whole level"));
                }
                if i != levels.len() - 1 {
                    return Err(invalid("'#' must be the last level"));
                }
            }
        }

        Ok(Self(filter))
    }

    /// Returns the filter text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the filter contains `+` or `#`.
    pub fn has_wildcards(&self) -> bool {
        self.0.contains(['+', '#'])
    }

    /// Returns true if `topic` is selected by this filter.
    ///
    /// Topics starting with `$` are reserved for broker internals and are
    /// never matched by a leading wildcard.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return false;
        }
        if topic.starts_with('$') && (self.0.starts_with('+') || self.0.starts_with('#')) {
            return false;
        }

        let mut filter_levels = self.0.split('/');
        let mut topic_levels = topic.split('/');
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => continue,
                (Some(f), Some(t)) if f == t => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Default for TopicFilter {
    /// Everything (`#`).
    fn default() -> Self {
        Self("#".to_string())
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicFilter {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for TopicFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}
