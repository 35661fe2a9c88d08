//! Structured view of a preview object key.
//!
//! Keys look like `outfits/000/001/234/preview.png`: three zero-padded,
//! three-digit segments spell the upstream entity id and the file stem names
//! the image size class.

use std::fmt;

/// Suffix appended to a key to form its snapshot key.
pub const BACKUP_SUFFIX: &str = ".bkup";

const ID_SEGMENTS: usize = 3;
const ID_SEGMENT_LEN: usize = 3;

/// Upstream entity identifier shared by every size variant of one entity.
pub type EntityId = u64;

/// Rendered image size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Preview,
    Square(u32),
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClass::Preview => f.write_str("preview"),
            SizeClass::Square(px) => write!(f, "{px}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    raw: String,
    entity_id: EntityId,
    size: SizeClass,
}

impl ObjectKey {
    /// Parse a key, returning `None` if it does not carry an entity id and
    /// size class, or if it is itself a backup key.
    pub fn parse(key: &str) -> Option<Self> {
        if key.ends_with(BACKUP_SUFFIX) {
            return None;
        }

        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() < ID_SEGMENTS + 2 {
            return None;
        }

        let file = segments[segments.len() - 1];
        let id_parts = &segments[segments.len() - 1 - ID_SEGMENTS..segments.len() - 1];
        if !id_parts
            .iter()
            .all(|part| part.len() == ID_SEGMENT_LEN && part.bytes().all(|b| b.is_ascii_digit()))
        {
            return None;
        }
        let entity_id = id_parts.concat().parse::<EntityId>().ok()?;

        let stem = file.split_once('.').map(|(stem, _)| stem)?;
        let size = match stem {
            "preview" => SizeClass::Preview,
            digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                SizeClass::Square(digits.parse().ok()?)
            }
            _ => return None,
        };

        Some(Self {
            raw: key.to_string(),
            entity_id,
            size,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn size(&self) -> SizeClass {
        self.size
    }

    /// Key under which the original bytes are preserved.
    pub fn backup_key(&self) -> String {
        format!("{}{}", self.raw, BACKUP_SUFFIX)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
