//! Media library item
//!
//! The persisted JSON uses the field names `ID`, `Path`, `Name`, `MIMEType`
//! and `Metadata` so store directories written by earlier indexers load
//! unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// A media file's identity plus descriptive metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Content-derived identifier, empty until derived
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Current filesystem location
    #[serde(rename = "Path", default)]
    pub path: PathBuf,

    /// Display name supplied by discovery
    #[serde(rename = "Name", default)]
    pub name: String,

    /// MIME type supplied by discovery (e.g. `video/mp4`)
    #[serde(rename = "MIMEType", default)]
    pub mime_type: String,

    /// Opaque classifier output; `null` until classified
    #[serde(rename = "Metadata", default)]
    pub metadata: Option<Value>,
}

impl Item {
    /// Create an item for a discovered file without an ID
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            path: path.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            metadata: None,
        }
    }

    /// Builder-style ID assignment
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder-style metadata assignment
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the classification station handles this MIME type
    pub fn is_video(&self) -> bool {
        self.mime_type.contains("video")
    }

    /// Video without metadata, i.e. a classification candidate
    pub fn needs_classification(&self) -> bool {
        self.metadata.is_none() && self.is_video()
    }
}
