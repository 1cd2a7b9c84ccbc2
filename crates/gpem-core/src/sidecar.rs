use std::path::Path;

use anyhow::Context;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};

use crate::geo::GeoData;

/// The parts of a Google per-asset JSON sidecar this tool reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub geo_data: GeoData,
    #[serde(default)]
    pub photo_taken_time: Option<TimeEntry>,
    #[serde(default)]
    pub creation_time: Option<TimeEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeEntry {
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<i64>,
}

/// Google writes epoch seconds as a string; accept plain numbers as well.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    #[allow(dead_code)]
    enum Raw {
        Number(i64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse::<i64>().ok(),
        Some(Raw::Other(_)) | None => None,
    })
}

impl Sidecar {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read sidecar {}", path.display()))?;
        Self::from_slice(&bytes)
            .with_context(|| format!("failed to parse sidecar {}", path.display()))
    }

    pub fn photo_taken_timestamp(&self) -> Option<i64> {
        self.photo_taken_time.as_ref().and_then(|t| t.timestamp)
    }

    pub fn creation_timestamp(&self) -> Option<i64> {
        self.creation_time.as_ref().and_then(|t| t.timestamp)
    }

    /// photoTakenTime, or creationTime when the former is missing or zero.
    pub fn best_timestamp(&self) -> Option<i64> {
        best_timestamp(self.photo_taken_timestamp(), self.creation_timestamp())
    }
}

pub fn best_timestamp(photo_taken: Option<i64>, creation: Option<i64>) -> Option<i64> {
    photo_taken.filter(|t| *t != 0).or(creation.filter(|t| *t != 0))
}

/// Convert UTC epoch seconds to a local naive datetime, as EXIF dates carry no zone.
pub fn to_local_datetime(epoch: i64) -> Option<NaiveDateTime> {
    let utc = chrono::DateTime::from_timestamp(epoch, 0)?;
    Some(utc.with_timezone(&chrono::Local).naive_local())
}
