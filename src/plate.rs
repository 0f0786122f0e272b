//! Plate identity types.
//!
//! `PlateText` is the store key. It can only be built through normalization,
//! so every key that reaches a `PlateStore` is uppercase, whitespace-free and
//! non-empty.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp layout used in the `plates` table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalized plate text (primary key of the plate store).
///
/// The inner string is private:
///
/// ```compile_fail
/// let _plate = plate_sentry::PlateText("ab 12 cd".to_string());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PlateText(String);

impl PlateText {
    /// Strip all whitespace and uppercase. Returns `None` when nothing is left.
    pub fn normalize(raw: &str) -> Option<Self> {
        let text: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlateText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PlateText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        PlateText::normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom("plate text must not be empty"))
    }
}

/// A confirmed plate as persisted by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateRecord {
    pub plate_text: PlateText,
    #[serde(with = "timestamp_format")]
    pub first_seen: NaiveDateTime,
    pub confidence: f32,
}

mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
