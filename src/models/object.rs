//! Represents an object (blob) stored under a key, plus the write options
//! that accompany a put or copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Metadata row for a single stored object.
///
/// The payload bytes live on disk; this struct only describes them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Object key (path-like identifier).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: String,

    /// Storage class (STANDARD, STANDARD_IA, DEEP_ARCHIVE).
    pub storage_class: String,

    /// Canned ACL (private, public-read).
    pub acl: String,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn storage_class(&self) -> Result<StorageClass, String> {
        self.storage_class.parse()
    }
}

/// Cost/latency class assigned to an object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClass {
    Standard,
    InfrequentAccess,
    DeepArchive,
}

impl StorageClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::InfrequentAccess => "STANDARD_IA",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STANDARD" => Ok(StorageClass::Standard),
            "STANDARD_IA" => Ok(StorageClass::InfrequentAccess),
            "DEEP_ARCHIVE" => Ok(StorageClass::DeepArchive),
            other => Err(format!("unknown storage class `{other}`")),
        }
    }
}

/// Canned access policy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acl {
    Private,
    PublicRead,
}

impl Acl {
    pub fn as_str(self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

/// Tag set as stored out-of-band from the object body.
pub type TagSet = BTreeMap<String, String>;

/// Options applied to the destination of a put or copy.
///
/// Tags replace the destination's tag set entirely. When `acl` is `None`
/// the destination keeps its current ACL (or `private` if it is new).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectWrite {
    pub tags: TagSet,
    pub storage_class: StorageClass,
    pub acl: Option<Acl>,
}

impl ObjectWrite {
    pub fn new(tags: TagSet, storage_class: StorageClass) -> Self {
        Self {
            tags,
            storage_class,
            acl: None,
        }
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = Some(acl);
        self
    }
}
