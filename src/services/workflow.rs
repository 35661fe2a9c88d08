//! Per-key snapshot-then-replace workflow.
//!
//! For one preview key:
//! 1. read the original's tags (the key must exist),
//! 2. snapshot the original to `<key>.bkup` unless the backup is already tagged,
//! 3. gate the replace stage on the tags read in step 1,
//! 4. fetch upstream data for the key's entity through the shared cache,
//! 5. render and compress a fresh variant,
//! 6. store it if it is no larger than the original, otherwise only record
//!    `compression-failed`.
//!
//! The snapshot stage always settles before the replace stage starts; a key
//! whose backup is in an unrecognized state is never replaced.

use crate::{
    errors::{UpstreamError, WorkflowError},
    models::{
        object::{Acl, ObjectWrite, StorageClass, TagSet},
        object_key::{EntityId, ObjectKey},
        tag::{CLASSIFICATION_TAG, ClassificationTag},
    },
    services::{
        capabilities::{
            Compressor, ObjectStore, RenderStatus, Renderer, UpstreamData, UpstreamPayload,
        },
        fetch_cache::SharedFetchCache,
        metadata_gate::{self, Stage, Transition},
    },
};
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

pub type SharedFetch = Result<Arc<UpstreamPayload>, UpstreamError>;
pub type UpstreamCache = SharedFetchCache<EntityId, SharedFetch>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Created,
    Skipped(Transition),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Compressed {
        original_size: usize,
        compressed_size: usize,
    },
    /// Compression would have grown the object; only the tag changed.
    CompressionFailed {
        original_size: usize,
        compressed_size: usize,
    },
    Skipped(Transition),
    /// The snapshot stage found unrecognized state, so replace never ran.
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub snapshot: SnapshotOutcome,
    pub replace: ReplaceOutcome,
}

impl WorkflowOutcome {
    /// Whether any stored state was mutated.
    pub fn made_change(&self) -> bool {
        matches!(self.snapshot, SnapshotOutcome::Created)
            || matches!(
                self.replace,
                ReplaceOutcome::Compressed { .. } | ReplaceOutcome::CompressionFailed { .. }
            )
    }
}

#[derive(Clone)]
pub struct KeyWorkflow {
    store: Arc<dyn ObjectStore>,
    upstream: Arc<dyn UpstreamData>,
    renderer: Arc<dyn Renderer>,
    compressor: Arc<dyn Compressor>,
    cache: Arc<UpstreamCache>,
    force: bool,
}

impl KeyWorkflow {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        upstream: Arc<dyn UpstreamData>,
        renderer: Arc<dyn Renderer>,
        compressor: Arc<dyn Compressor>,
        cache: Arc<UpstreamCache>,
    ) -> Self {
        Self {
            store,
            upstream,
            renderer,
            compressor,
            cache,
            force: false,
        }
    }

    /// Re-run the replace stage regardless of the original's tag.
    ///
    /// Never applies to the snapshot stage: an existing backup is the only
    /// copy of the pre-compression bytes.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[tracing::instrument(name = "key", skip_all, fields(key = %key))]
    pub async fn process(&self, key: &ObjectKey) -> Result<WorkflowOutcome, WorkflowError> {
        let original_tags = self.store.get_tags(key.as_str()).await?;

        let snapshot = self
            .snapshot(key)
            .instrument(info_span!("snapshot"))
            .await?;

        let replace = if snapshot == SnapshotOutcome::Skipped(Transition::SkipUnexpectedTag) {
            ReplaceOutcome::Blocked
        } else {
            self.replace(key, original_tags)
                .instrument(info_span!("replace"))
                .await?
        };

        Ok(WorkflowOutcome { snapshot, replace })
    }

    async fn snapshot(&self, key: &ObjectKey) -> Result<SnapshotOutcome, WorkflowError> {
        let backup_key = key.backup_key();
        let backup_tag = match self.store.get_tags(&backup_key).await {
            Ok(tags) => ClassificationTag::from_tags(&tags),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        let transition = metadata_gate::decide(Stage::Snapshot, backup_tag.as_ref(), false);
        match transition {
            Transition::Proceed => {}
            Transition::SkipUnexpectedTag => {
                warn!(
                    "backup `{}` carries unrecognized tag `{}`, leaving key untouched",
                    backup_key,
                    backup_tag.as_ref().map(ClassificationTag::as_str).unwrap_or_default()
                );
                return Ok(SnapshotOutcome::Skipped(transition));
            }
            other => {
                debug!("snapshot skipped: {:?}", other);
                return Ok(SnapshotOutcome::Skipped(other));
            }
        }

        let write = ObjectWrite::new(ClassificationTag::Backup.to_tags(), StorageClass::DeepArchive)
            .with_acl(Acl::Private);
        self.store
            .copy_object(key.as_str(), &backup_key, write)
            .await?;
        info!("snapshot written to {}", backup_key);

        Ok(SnapshotOutcome::Created)
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        original_tags: TagSet,
    ) -> Result<ReplaceOutcome, WorkflowError> {
        let original_tag = ClassificationTag::from_tags(&original_tags);
        let transition = metadata_gate::decide(Stage::Replace, original_tag.as_ref(), self.force);
        match transition {
            Transition::Proceed => {}
            Transition::SkipUnexpectedTag => {
                warn!(
                    "original carries unrecognized tag `{}`, leaving it untouched",
                    original_tag.as_ref().map(ClassificationTag::as_str).unwrap_or_default()
                );
                return Ok(ReplaceOutcome::Skipped(transition));
            }
            other => {
                debug!("replace skipped: {:?}", other);
                return Ok(ReplaceOutcome::Skipped(other));
            }
        }

        let payload = self.fetch_shared(key.entity_id()).await.map_err(|source| {
            WorkflowError::Upstream {
                key: key.to_string(),
                source,
            }
        })?;

        let rendered = self
            .renderer
            .render(&payload, key.size())
            .await
            .map_err(|source| WorkflowError::Transform {
                key: key.to_string(),
                source,
            })?;
        if let RenderStatus::PartialFailure { missing } = rendered.status {
            return Err(WorkflowError::PartialRender {
                key: key.to_string(),
                missing,
            });
        }

        let compressed = self
            .compressor
            .compress(rendered.bytes)
            .await
            .map_err(|source| WorkflowError::Transform {
                key: key.to_string(),
                source,
            })?;

        let original_size = self.store.get_object(key.as_str()).await?.len();
        let compressed_size = compressed.len();

        if compressed_size <= original_size {
            let write = ObjectWrite::new(
                with_classification(original_tags, ClassificationTag::Compressed),
                StorageClass::InfrequentAccess,
            )
            .with_acl(Acl::PublicRead);
            self.store
                .put_object(key.as_str(), compressed, write)
                .await?;
            info!("compressed {} -> {} bytes", original_size, compressed_size);
            Ok(ReplaceOutcome::Compressed {
                original_size,
                compressed_size,
            })
        } else {
            let write = ObjectWrite::new(
                with_classification(original_tags, ClassificationTag::CompressionFailed),
                StorageClass::InfrequentAccess,
            )
            .with_acl(Acl::PublicRead);
            self.store
                .copy_object(key.as_str(), key.as_str(), write)
                .await?;
            info!(
                "compression grew object ({} -> {} bytes), kept original",
                original_size, compressed_size
            );
            Ok(ReplaceOutcome::CompressionFailed {
                original_size,
                compressed_size,
            })
        }
    }

    async fn fetch_shared(&self, entity: EntityId) -> SharedFetch {
        let upstream = self.upstream.clone();
        self.cache
            .get_or_fetch(entity, move || async move {
                upstream.fetch(entity).await.map(Arc::new)
            })
            .await
    }
}

/// Replace the classification in a tag set, keeping foreign tags.
fn with_classification(mut tags: TagSet, tag: ClassificationTag) -> TagSet {
    tags.insert(CLASSIFICATION_TAG.to_string(), tag.as_str().to_string());
    tags
}
