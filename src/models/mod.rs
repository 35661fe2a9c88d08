//! Core data models for the preview compaction pipeline.
//!
//! Keys encode which upstream entity an object belongs to, tags carry the
//! only durable progress state, and stored objects map cleanly to the
//! metadata tables via `sqlx::FromRow`.

pub mod object;
pub mod object_key;
pub mod tag;
