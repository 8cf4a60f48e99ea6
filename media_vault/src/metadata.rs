//! Embedded entry metadata (stored encrypted inside the stream file)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultResult;
use crate::format::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// Metadata document for one photo or video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Original filename
    pub filename: String,
    pub media_type: MediaType,
    /// Plaintext size in bytes
    pub size: u64,
    /// Original creation date (from EXIF or the media library)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub imported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub favorite: bool,
    /// Fields written by other app versions, kept as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EntryMetadata {
    pub fn new(filename: impl Into<String>, media_type: MediaType, size: u64) -> Self {
        Self {
            filename: filename.into(),
            media_type,
            size,
            created_at: None,
            modified_at: None,
            imported_at: Utc::now(),
            location: None,
            favorite: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
