//! src/services/storage_service.rs
//!
//! LocalObjectStore: the object store the compactor runs against, backed by
//! SQLite for metadata and tags and local disk for payloads sharded beneath
//! `base_path/{shard}/{shard}/{key}`.

use crate::{
    errors::StoreError,
    models::object::{Acl, ObjectWrite, StoredObject, TagSet},
    services::capabilities::{ObjectStore, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Schema applied by `--migrate` and at startup.
pub const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// LocalObjectStore provides the S3-like operations the pipeline needs:
/// - List keys under a prefix after a cursor (query SQLite)
/// - Get an object's bytes or tags
/// - Put an object (writes bytes to disk, upserts metadata and tags)
/// - Copy an object server-side, including onto itself to change tier
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the schema, one statement at a time.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Two-level shard identifiers from MD5(key), as lowercase hex (00–ff).
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch an object's metadata row, or NotFound.
    pub async fn fetch_object(&self, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT key, size_bytes, etag, storage_class, acl, last_modified
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn read_payload(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Write a payload durably: temp file, fsync, then rename into place.
    /// Returns the MD5 etag.
    async fn write_payload(&self, key: &str, body: &[u8]) -> StoreResult<String> {
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        Ok(format!("{:x}", md5::compute(body)))
    }

    /// Upsert the metadata row and replace the tag set in one transaction.
    async fn upsert_metadata(
        &self,
        key: &str,
        size_bytes: i64,
        etag: &str,
        write: &ObjectWrite,
    ) -> StoreResult<()> {
        let acl = match write.acl {
            Some(acl) => acl.as_str().to_string(),
            None => match self.fetch_object(key).await {
                Ok(existing) => existing.acl,
                Err(StoreError::NotFound(_)) => Acl::Private.as_str().to_string(),
                Err(err) => return Err(err),
            },
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO objects (key, size_bytes, etag, storage_class, acl, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                storage_class = excluded.storage_class,
                acl = excluded.acl,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(key)
        .bind(size_bytes)
        .bind(etag)
        .bind(write.storage_class.as_str())
        .bind(&acl)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        replace_tags(&mut tx, key, &write.tags).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn replace_tags(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    key: &str,
    tags: &TagSet,
) -> StoreResult<()> {
    sqlx::query("DELETE FROM object_tags WHERE key = ?")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    for (name, value) in tags {
        sqlx::query("INSERT INTO object_tags (key, name, value) VALUES (?, ?, ?)")
            .bind(key)
            .bind(name)
            .bind(value)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Lexicographic, prefix-filtered listing strictly after `start_after`.
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<Vec<String>> {
        let max_keys = max_keys.clamp(1, 1000);

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE 1 = 1");
        if !prefix.is_empty() {
            // Byte-wise: `substr` on TEXT counts characters, not bytes.
            builder.push(" AND substr(CAST(key AS BLOB), 1, ");
            builder.push_bind(prefix.len() as i64);
            builder.push(") = CAST(");
            builder.push_bind(prefix);
            builder.push(" AS BLOB)");
        }
        if let Some(cursor) = start_after {
            builder.push(" AND key > ");
            builder.push_bind(cursor);
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(max_keys as i64);

        let keys: Vec<String> = builder.build_query_scalar().fetch_all(&*self.db).await?;
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.ensure_key_safe(key)?;
        self.fetch_object(key).await?;
        self.read_payload(key).await
    }

    async fn get_tags(&self, key: &str) -> StoreResult<TagSet> {
        self.ensure_key_safe(key)?;
        self.fetch_object(key).await?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, value FROM object_tags WHERE key = ?")
                .bind(key)
                .fetch_all(&*self.db)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn put_object(&self, key: &str, body: Bytes, write: ObjectWrite) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let etag = self.write_payload(key, &body).await?;
        self.upsert_metadata(key, body.len() as i64, &etag, &write).await
    }

    async fn copy_object(&self, source: &str, dest: &str, write: ObjectWrite) -> StoreResult<()> {
        self.ensure_key_safe(source)?;
        self.ensure_key_safe(dest)?;
        let source_meta = self.fetch_object(source).await?;

        if source == dest {
            debug!("metadata-only copy of {}", source);
            return self
                .upsert_metadata(dest, source_meta.size_bytes, &source_meta.etag, &write)
                .await;
        }

        let body = self.read_payload(source).await?;
        let etag = self.write_payload(dest, &body).await?;
        self.upsert_metadata(dest, body.len() as i64, &etag, &write).await
    }

    async fn put_tags(&self, key: &str, tags: TagSet) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        self.fetch_object(key).await?;
        let mut tx = self.db.begin().await?;
        replace_tags(&mut tx, key, &tags).await?;
        tx.commit().await?;
        Ok(())
    }
}
