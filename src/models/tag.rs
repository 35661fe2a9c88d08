//! Classification tags: the sole durable progress marker for an object.

use crate::models::object::TagSet;
use std::fmt;

/// Reserved tag name carrying the classification value.
pub const CLASSIFICATION_TAG: &str = "preview-compactor";

/// Value of the reserved classification tag.
///
/// Absence of the tag is modelled as `Option::None` by callers, never as a
/// variant here. Anything outside the closed set is kept verbatim so that it
/// can be reported and left untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassificationTag {
    Backup,
    Compressed,
    CompressionFailed,
    Unrecognized(String),
}

impl ClassificationTag {
    pub fn parse(value: &str) -> Self {
        match value {
            "backup" => ClassificationTag::Backup,
            "compressed" => ClassificationTag::Compressed,
            "compression-failed" => ClassificationTag::CompressionFailed,
            other => ClassificationTag::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ClassificationTag::Backup => "backup",
            ClassificationTag::Compressed => "compressed",
            ClassificationTag::CompressionFailed => "compression-failed",
            ClassificationTag::Unrecognized(value) => value,
        }
    }

    /// Read the classification from a full tag set. Other tags are ignored.
    pub fn from_tags(tags: &TagSet) -> Option<Self> {
        tags.get(CLASSIFICATION_TAG).map(|value| Self::parse(value))
    }

    /// A tag set containing only this classification.
    pub fn to_tags(&self) -> TagSet {
        TagSet::from([(CLASSIFICATION_TAG.to_string(), self.as_str().to_string())])
    }
}

impl fmt::Display for ClassificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
