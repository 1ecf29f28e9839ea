//! Serde support for human-readable `Duration` values (`"5m"`, `"200ms"`).
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Foo {
//!     #[serde(with = "casekit_utils::humantime_serde")]
//!     timeout: Duration,
//!     #[serde(default, with = "casekit_utils::humantime_serde::option")]
//!     grace: Option<Duration>,
//!     #[serde(with = "casekit_utils::humantime_serde::vec")]
//!     delays: Vec<Duration>,
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer, de};

struct DurationVisitor;

impl de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration such as \"250ms\" or \"5m\"")
    }

    fn visit_str<E>(self, v: &str) -> Result<Duration, E>
    where
        E: de::Error,
    {
        humantime::parse_duration(v)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

/// Wrapper used for the collection helpers below.
struct Human(Duration);

impl<'de> Deserialize<'de> for Human {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        d.deserialize_str(DurationVisitor).map(Human)
    }
}

/// Deserializes a `Duration` from a humantime string.
///
/// # Errors
/// Returns the deserializer's error when the value is not a valid duration.
pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_str(DurationVisitor)
}

/// Serializes a `Duration` as a humantime string.
///
/// # Errors
/// Propagates serializer errors.
pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_str(&humantime::format_duration(*d))
}

pub mod option {
    use super::{Deserialize, Deserializer, Duration, Human, Serializer};

    /// # Errors
    /// Returns the deserializer's error when the value is not a valid duration.
    pub fn deserialize<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Human>::deserialize(d)?.map(|h| h.0))
    }

    /// # Errors
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d {
            Some(d) => super::serialize(d, s),
            None => s.serialize_none(),
        }
    }
}

pub mod vec {
    use serde::ser::SerializeSeq;

    use super::{Deserialize, Deserializer, Duration, Human, Serializer};

    /// # Errors
    /// Returns the deserializer's error when any element is not a valid duration.
    pub fn deserialize<'de, D>(d: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Vec::<Human>::deserialize(d)?
            .into_iter()
            .map(|h| h.0)
            .collect())
    }

    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S>(d: &[Duration], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = s.serialize_seq(Some(d.len()))?;
        for item in d {
            seq.serialize_element(&humantime::format_duration(*item).to_string())?;
        }
        seq.end()
    }
}
