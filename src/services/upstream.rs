//! Upstream entity data read from a directory of JSON documents.
//!
//! `{dir}/{entity_id}.json` holds either `{"data": ...}` or
//! `{"errors": [{"message": ...}, ...]}`.

use crate::{
    errors::UpstreamError,
    models::object_key::EntityId,
    services::capabilities::{UpstreamData, UpstreamPayload},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::{io, path::PathBuf};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    message: String,
}

#[derive(Clone, Debug)]
pub struct DirectoryUpstream {
    root: PathBuf,
}

impl DirectoryUpstream {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn document_path(&self, entity: EntityId) -> PathBuf {
        self.root.join(format!("{entity}.json"))
    }
}

#[async_trait]
impl UpstreamData for DirectoryUpstream {
    async fn fetch(&self, entity: EntityId) -> Result<UpstreamPayload, UpstreamError> {
        let path = self.document_path(entity);
        debug!("fetching entity {} from {}", entity, path.display());

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(UpstreamError::Missing(entity));
            }
            Err(err) => {
                return Err(UpstreamError::Unavailable {
                    entity,
                    message: err.to_string(),
                });
            }
        };

        let envelope: Envelope =
            serde_json::from_slice(&raw).map_err(|err| UpstreamError::Unavailable {
                entity,
                message: format!("malformed document: {err}"),
            })?;

        if !envelope.errors.is_empty() {
            return Err(UpstreamError::Reported {
                entity,
                messages: envelope.errors.into_iter().map(|e| e.message).collect(),
            });
        }

        match envelope.data {
            Some(Value::Null) | None => Err(UpstreamError::Missing(entity)),
            Some(data) => Ok(UpstreamPayload(data)),
        }
    }
}
