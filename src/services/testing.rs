//! In-memory collaborators for unit tests.

use crate::{
    errors::{StoreError, TransformError, UpstreamError},
    models::{
        object::{Acl, ObjectWrite, StorageClass, TagSet},
        object_key::{EntityId, SizeClass},
    },
    services::capabilities::{
        Compressor, ObjectStore, RenderStatus, Rendered, Renderer, StoreResult, UpstreamData,
        UpstreamPayload,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemObject {
    pub body: Bytes,
    pub tags: TagSet,
    pub storage_class: StorageClass,
    pub acl: Acl,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    List { start_after: Option<String> },
    Get { key: String },
    GetTags { key: String },
    Put { key: String },
    Copy { source: String, dest: String },
    PutTags { key: String },
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, MemObject>>,
    calls: Mutex<Vec<StoreCall>>,
    list_failures: Mutex<VecDeque<io::ErrorKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: &[u8], tags: TagSet) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            MemObject {
                body: Bytes::copy_from_slice(body),
                tags,
                storage_class: StorageClass::Standard,
                acl: Acl::PublicRead,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<MemObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    StoreCall::Put { .. } | StoreCall::Copy { .. } | StoreCall::PutTags { .. }
                )
            })
            .count()
    }

    /// Make the next `list` calls fail, one per queued error kind.
    pub fn fail_next_lists(&self, kinds: &[io::ErrorKind]) {
        self.list_failures.lock().unwrap().extend(kinds);
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<Vec<String>> {
        self.record(StoreCall::List {
            start_after: start_after.map(str::to_string),
        });
        if let Some(kind) = self.list_failures.lock().unwrap().pop_front() {
            return Err(StoreError::Io(io::Error::new(kind, "injected list failure")));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| start_after.is_none_or(|cursor| key.as_str() > cursor))
            .take(max_keys)
            .cloned()
            .collect())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.record(StoreCall::Get { key: key.into() });
        self.object(key)
            .map(|obj| obj.body)
            .ok_or_else(|| StoreError::NotFound(key.into()))
    }

    async fn get_tags(&self, key: &str) -> StoreResult<TagSet> {
        self.record(StoreCall::GetTags { key: key.into() });
        self.object(key)
            .map(|obj| obj.tags)
            .ok_or_else(|| StoreError::NotFound(key.into()))
    }

    async fn put_object(&self, key: &str, body: Bytes, write: ObjectWrite) -> StoreResult<()> {
        self.record(StoreCall::Put { key: key.into() });
        let mut objects = self.objects.lock().unwrap();
        let acl = write
            .acl
            .or_else(|| objects.get(key).map(|obj| obj.acl))
            .unwrap_or(Acl::Private);
        objects.insert(
            key.to_string(),
            MemObject {
                body,
                tags: write.tags,
                storage_class: write.storage_class,
                acl,
            },
        );
        Ok(())
    }

    async fn copy_object(&self, source: &str, dest: &str, write: ObjectWrite) -> StoreResult<()> {
        self.record(StoreCall::Copy {
            source: source.into(),
            dest: dest.into(),
        });
        let mut objects = self.objects.lock().unwrap();
        let body = objects
            .get(source)
            .map(|obj| obj.body.clone())
            .ok_or_else(|| StoreError::NotFound(source.into()))?;
        let acl = write
            .acl
            .or_else(|| objects.get(dest).map(|obj| obj.acl))
            .unwrap_or(Acl::Private);
        objects.insert(
            dest.to_string(),
            MemObject {
                body,
                tags: write.tags,
                storage_class: write.storage_class,
                acl,
            },
        );
        Ok(())
    }

    async fn put_tags(&self, key: &str, tags: TagSet) -> StoreResult<()> {
        self.record(StoreCall::PutTags { key: key.into() });
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.into()))?;
        obj.tags = tags;
        Ok(())
    }
}

/// Upstream that succeeds for every entity unless told otherwise.
#[derive(Default)]
pub struct FakeUpstream {
    failures: Mutex<HashMap<EntityId, Vec<String>>>,
    fetches: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, entity: EntityId, messages: &[&str]) {
        self.failures.lock().unwrap().insert(
            entity,
            messages.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamData for FakeUpstream {
    async fn fetch(&self, entity: EntityId) -> Result<UpstreamPayload, UpstreamError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(messages) = self.failures.lock().unwrap().get(&entity) {
            return Err(UpstreamError::Reported {
                entity,
                messages: messages.clone(),
            });
        }
        Ok(UpstreamPayload(json!({ "outfit": { "id": entity } })))
    }
}

pub struct FakeRenderer {
    bytes: Bytes,
    status: RenderStatus,
}

impl FakeRenderer {
    pub fn complete(bytes: &'static [u8]) -> Self {
        Self {
            bytes: Bytes::from_static(bytes),
            status: RenderStatus::Complete,
        }
    }

    pub fn partial(missing: &[&str]) -> Self {
        Self {
            bytes: Bytes::from_static(b"degraded"),
            status: RenderStatus::PartialFailure {
                missing: missing.iter().map(|m| m.to_string()).collect(),
            },
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        _payload: &UpstreamPayload,
        _size: SizeClass,
    ) -> Result<Rendered, TransformError> {
        Ok(Rendered {
            bytes: self.bytes.clone(),
            status: self.status.clone(),
        })
    }
}

/// Compressor with a fixed output, ignoring its input.
pub struct FakeCompressor {
    output: Bytes,
}

impl FakeCompressor {
    pub fn returning(output: &'static [u8]) -> Self {
        Self {
            output: Bytes::from_static(output),
        }
    }
}

#[async_trait]
impl Compressor for FakeCompressor {
    async fn compress(&self, _bytes: Bytes) -> Result<Bytes, TransformError> {
        Ok(self.output.clone())
    }
}
