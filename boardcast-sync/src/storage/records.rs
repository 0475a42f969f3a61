//! Durable record types.
//!
//! Values are bincode-encoded; history and snapshot values are additionally
//! LZ4-compressed since they hold whole documents of text.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::tabs::Tab;

/// Row of the `tabs` column family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabRecord {
    pub id: String,
    pub name: String,
    pub content: String,
    pub updated: DateTime<Utc>,
}

impl TabRecord {
    pub fn from_tab(tab: &Tab) -> Self {
        Self {
            id: tab.id.clone(),
            name: tab.name.clone(),
            content: tab.content.clone(),
            updated: Utc::now(),
        }
    }

    pub fn into_tab(self) -> Tab {
        Tab {
            id: self.id,
            name: self.name,
            content: self.content,
        }
    }
}

/// A point-in-time copy of one tab's content.
///
/// `tab_id` may outlive the tab it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: u64,
    pub tab_id: String,
    pub content: String,
    pub created: DateTime<Utc>,
}

/// A named capture of the whole tab set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    /// JSON array of `{id, name, content}` objects
    pub tabs_data: String,
    pub created: DateTime<Utc>,
}

impl SnapshotRecord {
    /// Parse the captured tab list back into values.
    pub fn tabs(&self) -> Result<Vec<Tab>, StoreError> {
        serde_json::from_str(&self.tabs_data)
            .map_err(|e| StoreError::DeserializationError(e.to_string()))
    }
}

/// An uploaded binary image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub filename: String,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub size: u64,
    pub created: DateTime<Utc>,
}

impl ImageRecord {
    /// Build a record with a fresh id; `size` is taken from `data`.
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            filename: filename.into(),
            size: data.len() as u64,
            data,
            mime_type: mime_type.into(),
            created: Utc::now(),
        }
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

pub(crate) fn encode_compressed<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(lz4_flex::compress_prepend_size(&encode(value)?))
}

pub(crate) fn decode_compressed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    decode(&raw)
}
