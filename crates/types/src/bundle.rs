//! Bundle-related types and structures

use crate::error::BundleError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Auto-assigned bundle identifier, unique per gamespace
pub type BundleId = i64;

/// Tenant scope identifier
pub type GamespaceId = i64;

/// Identifier of the data set (version) a bundle belongs to
pub type VersionId = i64;

/// Application identifier, used only to lay out artifacts on disk
pub type AppId = i64;

/// String-keyed JSON mapping used for bundle filters and payload
pub type JsonMap = Map<String, Value>;

/// Lifecycle state of a bundle
///
/// No transition graph is enforced: any status may follow any other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BundleStatus {
    /// Record exists, content not uploaded yet
    Created,
    /// Content stored, hash and size published
    Uploaded,
    /// Content is being pushed to its delivery location
    Delivering,
    /// Content is available at its delivery url
    Delivered,
    /// Delivery failed
    Error,
}

impl BundleStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [BundleStatus; 5] = [
        BundleStatus::Created,
        BundleStatus::Uploaded,
        BundleStatus::Delivering,
        BundleStatus::Delivered,
        BundleStatus::Error,
    ];

    /// Persisted representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Created => "CREATED",
            BundleStatus::Uploaded => "UPLOADED",
            BundleStatus::Delivering => "DELIVERING",
            BundleStatus::Delivered => "DELIVERED",
            BundleStatus::Error => "ERROR",
        }
    }

    /// Whether upload results (hash and size) are meaningful in this status
    pub fn has_content(&self) -> bool {
        !matches!(self, BundleStatus::Created)
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleStatus {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BundleStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BundleError::Validation(format!("unknown bundle status: {}", s)))
    }
}

impl Default for BundleStatus {
    fn default() -> Self {
        BundleStatus::Created
    }
}

/// Metadata of one bundle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleRecord {
    /// Bundle identifier
    pub bundle_id: BundleId,
    /// Data set this bundle belongs to
    pub version_id: VersionId,
    /// Owning gamespace
    pub gamespace_id: GamespaceId,
    /// Name, unique within (gamespace_id, version_id)
    pub name: String,
    /// Current lifecycle state
    pub status: BundleStatus,
    /// Hex-encoded SHA-256 of the uploaded content
    pub hash: Option<String>,
    /// External delivery location
    pub url: Option<String>,
    /// Uploaded content size in bytes
    pub size: Option<i64>,
    /// Tenant-defined filter tags
    pub filters: JsonMap,
    /// Tenant-defined opaque metadata
    pub payload: JsonMap,
    /// Client-supplied key fragment of the artifact file name
    pub key: String,
}

impl BundleRecord {
    /// Name of the artifact file inside the bundle directory
    pub fn file_name(&self) -> String {
        format!("{}_{}", self.bundle_id, self.key)
    }

    /// Hash and size, if the content has been uploaded
    pub fn content(&self) -> Option<(&str, i64)> {
        if !self.status.has_content() {
            return None;
        }
        match (&self.hash, self.size) {
            (Some(hash), Some(size)) => Some((hash.as_str(), size)),
            _ => None,
        }
    }
}

/// Request to create a new bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBundle {
    pub gamespace_id: GamespaceId,
    pub version_id: VersionId,
    pub name: String,
    pub filters: JsonMap,
    pub payload: JsonMap,
    pub key: String,
}

/// One page of bundles returned by a listing query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundlePage {
    /// Bundles ordered by descending id
    pub items: Vec<BundleRecord>,
    /// Total matches ignoring pagination, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Require `value` to be a JSON object, returning its mapping
pub fn ensure_mapping(field: &str, value: Value) -> Result<JsonMap, BundleError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(BundleError::Validation(format!(
            "{} should be a mapping, got {}",
            field,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}
