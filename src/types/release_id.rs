// ABOUTME: Timestamp-based release identifiers.
// ABOUTME: Lexicographic order matches chronological order, with collision suffixes.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Format of the timestamp portion: 14 numeric characters, second resolution.
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;

#[derive(Debug, Error)]
pub enum ParseReleaseIdError {
    #[error("release id must start with a 14-digit timestamp: '{0}'")]
    BadTimestamp(String),

    #[error("release id has an invalid collision suffix: '{0}'")]
    BadSuffix(String),
}

/// Identifier of one release directory under `releases/`.
///
/// The base form is a `YYYYMMDDHHMMSS` timestamp, which string-sorts in
/// chronological order. Two releases started within the same second are
/// disambiguated with a `-2`, `-3`, ... suffix; the suffixed id still sorts
/// after the bare id and before the next second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseId(String);

impl ReleaseId {
    /// Generate a release id for the given instant.
    pub fn generate(at: DateTime<Utc>) -> Self {
        Self(at.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Parse a directory name as a release id.
    ///
    /// Accepts the bare 14-digit form and the suffixed collision form.
    /// Anything else under `releases/` is not ours and is rejected.
    pub fn parse(value: &str) -> Result<Self, ParseReleaseIdError> {
        let (stamp, rest) = if value.len() >= TIMESTAMP_LEN {
            value.split_at(TIMESTAMP_LEN)
        } else {
            return Err(ParseReleaseIdError::BadTimestamp(value.to_string()));
        };

        if !stamp.chars().all(|c| c.is_ascii_digit()) {
            return Err(ParseReleaseIdError::BadTimestamp(value.to_string()));
        }

        if !rest.is_empty() {
            let suffix = rest
                .strip_prefix('-')
                .ok_or_else(|| ParseReleaseIdError::BadSuffix(value.to_string()))?;
            let n: u32 = suffix
                .parse()
                .map_err(|_| ParseReleaseIdError::BadSuffix(value.to_string()))?;
            if n < 2 {
                return Err(ParseReleaseIdError::BadSuffix(value.to_string()));
            }
        }

        Ok(Self(value.to_string()))
    }

    /// Produce an id that does not collide with any of `existing`.
    ///
    /// Starts from the bare timestamp id and appends `-2`, `-3`, ... until
    /// the result is unused. Two deploys dispatched within one wall-clock
    /// second therefore get distinct, still correctly ordered ids.
    pub fn disambiguate(at: DateTime<Utc>, existing: &[ReleaseId]) -> Self {
        let base = Self::generate(at);
        if !existing.contains(&base) {
            return base;
        }

        let mut n = 2u32;
        loop {
            let candidate = Self(format!("{}-{}", base.0, n));
            if !existing.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for ReleaseId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ReleaseId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ReleaseId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn generates_14_digit_timestamp() {
        let id = ReleaseId::generate(at("2026-03-01 08:30:15"));
        assert_eq!(id.as_str(), "20260301083015");
        assert_eq!(id.as_str().len(), 14);
    }

    #[test]
    fn string_order_matches_chronological_order() {
        let earlier = ReleaseId::generate(at("2026-03-01 08:30:15"));
        let later = ReleaseId::generate(at("2026-03-01 08:30:16"));
        assert!(earlier < later);
    }

    #[test]
    fn collision_gets_suffix() {
        let t = at("2026-03-01 08:30:15");
        let first = ReleaseId::generate(t);
        let second = ReleaseId::disambiguate(t, &[first.clone()]);
        assert_eq!(second.as_str(), "20260301083015-2");

        let third = ReleaseId::disambiguate(t, &[first.clone(), second.clone()]);
        assert_eq!(third.as_str(), "20260301083015-3");

        // Suffixed ids keep their place in the sort order.
        assert!(first < second);
        assert!(second < third);
        assert!(third < ReleaseId::generate(at("2026-03-01 08:30:16")));
    }

    #[test]
    fn parse_accepts_bare_and_suffixed_forms() {
        assert!(ReleaseId::parse("20260301083015").is_ok());
        assert!(ReleaseId::parse("20260301083015-2").is_ok());
    }

    #[test]
    fn parse_rejects_foreign_directory_names() {
        assert!(ReleaseId::parse("current").is_err());
        assert!(ReleaseId::parse("2026030108301").is_err());
        assert!(ReleaseId::parse("20260301083015-1").is_err());
        assert!(ReleaseId::parse("20260301083015x").is_err());
        assert!(ReleaseId::parse("20260301083015-abc").is_err());
    }
}
