//! Drive API types and the cached node model
//!
//! Wire structs for Drive API responses plus the `Node` record the cache
//! stores. Raw records merge into existing nodes: a later fetch extends or
//! overwrites known fields for the same id, it never removes a field an
//! earlier fetch filled in.

use serde::{Deserialize, Deserializer, Serialize};

/// MIME type marking a folder node
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// MIME type marking a shortcut node
pub const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";

/// Deserialize a number that might be encoded as a string or null.
/// The Drive API returns numeric fields like `size` and the quota byte counts
/// as JSON strings, and omits `size` entirely on folders.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// One owner entry on a node. `me` is relative to the identity that fetched
/// the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub me: bool,
}

/// Shortcut target reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    pub target_id: String,
}

/// A raw node record as returned by `files.list` / `files.get` / mutations
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub size: u64,
    /// Multi-parent records are collapsed to the first parent downstream.
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub shortcut_details: Option<ShortcutDetails>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

/// One page of a `files.list` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListPage {
    #[serde(default)]
    pub files: Vec<RawNode>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// `about.get` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    pub storage_quota: StorageQuota,
}

/// Storage quota for the active identity, all byte counts
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub limit: u64,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub usage: u64,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub usage_in_drive: u64,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub usage_in_drive_trash: u64,
}

impl StorageQuota {
    /// Remaining free space in bytes
    pub fn free(&self) -> u64 {
        self.limit.saturating_sub(self.usage)
    }
}

/// Metadata body for `files.create` and `files.copy`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut_details: Option<ShortcutDetails>,
}

/// What a node is, derived from its MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    Shortcut,
}

/// A remote node as mirrored in the cache
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub mime_type: String,
    /// Bytes for files; folders derive their size recursively
    pub size: u64,
    /// Single logical parent (first of a multi-parent record)
    pub parent: Option<String>,
    pub owners: Vec<Owner>,
    pub shortcut_target: Option<String>,
    /// ISO-8601 UTC with fractional seconds, as returned by the API
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self.mime_type.as_str() {
            FOLDER_MIME => NodeKind::Folder,
            SHORTCUT_MIME => NodeKind::Shortcut,
            _ => NodeKind::File,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind() == NodeKind::Folder
    }

    pub fn is_shortcut(&self) -> bool {
        self.kind() == NodeKind::Shortcut
    }

    /// Whether the identity that fetched this record owns the node
    pub fn owned_by_me(&self) -> bool {
        self.owners.iter().any(|o| o.me)
    }

    /// Fold a freshly fetched record into this node. Fields the new record
    /// does not carry keep their previously fetched values.
    pub fn merge(&mut self, raw: RawNode) {
        if let Some(name) = raw.name {
            self.name = name;
        }
        if let Some(mime_type) = raw.mime_type {
            self.mime_type = mime_type;
        }
        if raw.size != 0 {
            self.size = raw.size;
        }
        if let Some(parent) = raw.parents.into_iter().next() {
            self.parent = Some(parent);
        }
        if !raw.owners.is_empty() {
            self.owners = raw.owners;
        }
        if let Some(details) = raw.shortcut_details {
            self.shortcut_target = Some(details.target_id);
        }
        if raw.created_time.is_some() {
            self.created_time = raw.created_time;
        }
        if raw.modified_time.is_some() {
            self.modified_time = raw.modified_time;
        }
    }
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        let mut node = Node::default();
        node.merge(raw);
        node
    }
}
