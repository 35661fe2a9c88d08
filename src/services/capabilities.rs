//! Collaborators the pipeline consumes: the object store, the upstream data
//! source and the image transform.

use crate::{
    errors::{StoreError, TransformError, UpstreamError},
    models::{
        object::{ObjectWrite, TagSet},
        object_key::{EntityId, SizeClass},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix` strictly greater than `start_after`, ascending,
    /// at most `max_keys` of them.
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<Vec<String>>;

    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    async fn get_tags(&self, key: &str) -> StoreResult<TagSet>;

    async fn put_object(&self, key: &str, body: Bytes, write: ObjectWrite) -> StoreResult<()>;

    /// Server-side copy. `source == dest` rewrites metadata only.
    async fn copy_object(&self, source: &str, dest: &str, write: ObjectWrite) -> StoreResult<()>;

    async fn put_tags(&self, key: &str, tags: TagSet) -> StoreResult<()>;
}

/// Payload returned by a successful upstream fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamPayload(pub Value);

#[async_trait]
pub trait UpstreamData: Send + Sync {
    async fn fetch(&self, entity: EntityId) -> Result<UpstreamPayload, UpstreamError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderStatus {
    Complete,
    /// Some constituent pieces could not be loaded; the bytes are degraded.
    PartialFailure { missing: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct Rendered {
    pub bytes: Bytes,
    pub status: RenderStatus,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        payload: &UpstreamPayload,
        size: SizeClass,
    ) -> Result<Rendered, TransformError>;
}

#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(&self, bytes: Bytes) -> Result<Bytes, TransformError>;
}
