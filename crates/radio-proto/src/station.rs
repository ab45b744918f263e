//! Station records and the normalizer that builds them from raw directory
//! entries.
//!
//! The directory reports every field loosely: strings may be empty or null,
//! counters arrive as JSON numbers or as numeric strings.  `RawStation`
//! accepts all of that; `RawStation::normalize` decides what is playable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Codec value the directory uses for streams it could not probe.
pub const UNKNOWN_CODEC: &str = "UNKNOWN";

const DEFAULT_COUNTRY: &str = "Unknown";
const DEFAULT_COUNTRY_CODE: &str = "XX";
const DEFAULT_LANGUAGE: &str = "Unknown";
const DEFAULT_GENRE: &str = "Various";

/// A normalized, playable station.  Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationRecord {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    pub country: String,
    pub country_code: String,
    pub language: String,
    /// First tag reported by the directory, or "Various".
    pub genre: String,
    pub votes: u64,
    pub click_count: u64,
    #[serde(default)]
    pub favicon_url: Option<String>,
    #[serde(default)]
    pub codec: String,
}

/// One station object as returned by the directory service.
///
/// Only the fields we consume are listed; everything else in the payload is
/// ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStation {
    #[serde(default)]
    pub stationuuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url_resolved: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub countrycode: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Comma-separated tag list, e.g. "jazz,smooth".
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub votes: Option<Value>,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub clickcount: Option<Value>,
    #[serde(default)]
    pub codec: Option<String>,
}

impl RawStation {
    /// Build a `StationRecord`, or `None` when the entry cannot be played:
    /// no resolved stream URL, no name, or an unknown codec.
    pub fn normalize(self) -> Option<StationRecord> {
        let stream_url = non_empty(self.url_resolved)?;
        let name = non_empty(self.name)?;
        let codec = self.codec.unwrap_or_default().trim().to_string();
        if codec.eq_ignore_ascii_case(UNKNOWN_CODEC) {
            return None;
        }

        let genre = self
            .tags
            .as_deref()
            .and_then(|tags| tags.split(',').next())
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .unwrap_or(DEFAULT_GENRE)
            .to_string();

        Some(StationRecord {
            id: self.stationuuid.unwrap_or_default(),
            name,
            stream_url,
            country: non_empty(self.country).unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            country_code: non_empty(self.countrycode)
                .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string()),
            language: non_empty(self.language).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            genre,
            votes: parse_count(self.votes.as_ref()),
            click_count: parse_count(self.clickcount.as_ref()),
            favicon_url: non_empty(self.favicon),
            codec,
        })
    }
}

/// Normalize a batch of raw entries, keeping the directory's order.
pub fn normalize_stations(raw: impl IntoIterator<Item = RawStation>) -> Vec<StationRecord> {
    raw.into_iter().filter_map(RawStation::normalize).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Counters are reported as numbers or numeric strings.  Anything negative
/// or unparseable counts as zero.
fn parse_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f >= 0.0)
                        .map(|f| f as u64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}
