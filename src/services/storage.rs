//! Object storage for multipart uploads.
//!
//! [`ObjectStore`] is the seam between the upload orchestrator and whatever
//! holds the bytes. The shipped backend, [`LocalObjectStore`], keeps objects
//! on the local filesystem and accepts parts through signed URLs served by
//! this process, so browsers upload exactly as they would to S3.
//!
//! # File Organization
//!
//! Objects are sharded by the MD5 of their key so that keys with slashes
//! never turn into directories and no directory grows unbounded.
//!
//! ```text
//! data/
//! ├── objects/             # Completed objects
//! │   └── ab/cd/           # First 2 chars / next 2 chars of md5(key)
//! │       └── abcd1234...  # md5(key)
//! └── temp/                # In-flight multipart uploads
//!     └── {upload_id}/
//!         ├── manifest.json
//!         ├── part_00001
//!         ├── part_00001.etag
//!         └── ...
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::AppError;
use crate::models::UploadedPart;

/// Highest part number a multipart upload accepts
pub const MAX_PART_NUMBER: u32 = 10_000;

type HmacSha256 = Hmac<Sha256>;

/// How a declared object size is cut into parts
///
/// Every part is `part_size` bytes except the last, which holds the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLayout {
    pub size: u64,
    pub part_size: u64,
}

impl PartLayout {
    pub fn new(size: u64, part_size: u64) -> Self {
        Self {
            size,
            part_size: part_size.max(1),
        }
    }

    pub fn part_count(&self) -> u64 {
        self.size.div_ceil(self.part_size).max(1)
    }

    /// Exact length of part `part_number`, `None` when out of range
    pub fn part_len(&self, part_number: u32) -> Option<u64> {
        let count = self.part_count();
        let number = u64::from(part_number);

        if number == 0 || number > count {
            return None;
        }
        if number < count {
            return Some(self.part_size);
        }
        Some(self.size - self.part_size * (count - 1))
    }
}

/// Errors reported by an object store
///
/// Messages are shown to API clients verbatim, so they never contain paths.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("The specified multipart upload does not exist: {0}")]
    NoSuchUpload(String),

    #[error("Part {0} could not be found or its ETag does not match")]
    InvalidPart(u32),

    #[error("Parts must be listed in ascending order without duplicates")]
    InvalidPartOrder,

    #[error("Part number {0} is out of range")]
    InvalidPartNumber(u32),

    #[error("The request signature is invalid or expired")]
    InvalidSignature,

    #[error("Failed to read part body: {0}")]
    Body(String),

    #[error("Part {part_number} is larger than its {max} bytes")]
    PartTooLarge { part_number: u32, max: u64 },

    #[error("Uploaded parts hold {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Storage I/O failure")]
    Io(#[from] std::io::Error),

    #[error("Corrupt upload manifest")]
    Manifest(#[from] serde_json::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NoSuchUpload(_) => AppError::not_found(err.to_string()),
            StorageError::InvalidSignature => AppError::forbidden(err.to_string()),
            StorageError::InvalidPartNumber(_)
            | StorageError::Body(_)
            | StorageError::PartTooLarge { .. }
            | StorageError::SizeMismatch { .. } => AppError::validation(err.to_string()),
            StorageError::Io(e) => AppError::Io(e),
            other => AppError::upstream(other.to_string()),
        }
    }
}

/// Multipart object storage, modelled on the S3 API
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Start a multipart upload for `key` and return its upload id
    ///
    /// Parts are accepted only where `layout` puts them.
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        layout: PartLayout,
    ) -> Result<String, StorageError>;

    /// URL the client PUTs one part to, valid until `expires_at`
    fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StorageError>;

    /// Parts received so far, in part number order
    async fn list_parts(&self, key: &str, upload_id: &str)
        -> Result<Vec<UploadedPart>, StorageError>;

    /// Assemble the listed parts into the object at `key` and return its size
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<u64, StorageError>;

    /// Discard all parts of an upload
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str)
        -> Result<(), StorageError>;

    async fn object_exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadManifest {
    key: String,
    content_type: String,
    layout: PartLayout,
    created_at: DateTime<Utc>,
}

/// Filesystem-backed [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Path to completed objects
    objects_dir: PathBuf,
    /// Path to in-flight uploads
    temp_dir: PathBuf,
    /// Number of directory nesting levels (0-4)
    directory_levels: u8,
    /// Public base URL part uploads are addressed to
    base_url: String,
    signing_secret: String,
}

impl LocalObjectStore {
    /// Create the store and initialize directories
    ///
    /// # Errors
    /// Returns error if directories cannot be created
    pub async fn new(config: &StorageConfig, base_url: &str) -> Result<Self, StorageError> {
        let store = Self {
            objects_dir: config.objects_path(),
            temp_dir: config.temp_path(),
            directory_levels: config.directory_levels,
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret: config.signing_secret.clone(),
        };

        for dir in [&store.objects_dir, &store.temp_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir).await?;
                debug!(path = %dir.display(), "Created storage directory");
            }
        }

        info!(
            objects = %store.objects_dir.display(),
            temp = %store.temp_dir.display(),
            directory_levels = store.directory_levels,
            "Object store initialized"
        );

        Ok(store)
    }

    /// Generate the object path for a key
    ///
    /// For md5(key) "5d41402abc4b2a76b9719d911017c592":
    /// - level 0: "5d41402abc4b2a76b9719d911017c592"
    /// - level 2: "5d/41/5d41402abc4b2a76b9719d911017c592"
    fn object_path(&self, key: &str) -> PathBuf {
        let digest = format!("{:x}", md5::compute(key.as_bytes()));
        let mut path = self.objects_dir.clone();

        for level in 0..self.directory_levels.min(4) {
            let start = (level as usize) * 2;
            path.push(&digest[start..start + 2]);
        }

        path.push(digest);
        path
    }

    /// Upload ids are generated here, but they also arrive in URLs
    fn upload_dir(&self, upload_id: &str) -> Result<PathBuf, StorageError> {
        let valid = !upload_id.is_empty()
            && upload_id.len() <= 64
            && upload_id.chars().all(|c| c.is_ascii_alphanumeric());

        if !valid {
            return Err(StorageError::NoSuchUpload(upload_id.to_string()));
        }

        Ok(self.temp_dir.join(upload_id))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("part_{:05}", part_number))
    }

    fn etag_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("part_{:05}.etag", part_number))
    }

    async fn read_manifest(&self, upload_id: &str) -> Result<(PathBuf, UploadManifest), StorageError> {
        let dir = self.upload_dir(upload_id)?;

        match fs::read(dir.join("manifest.json")).await {
            Ok(data) => Ok((dir, serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NoSuchUpload(upload_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Manifest lookup that also checks the upload belongs to `key`
    async fn upload_for_key(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(PathBuf, UploadManifest), StorageError> {
        let (dir, manifest) = self.read_manifest(upload_id).await?;

        if manifest.key != key {
            return Err(StorageError::NoSuchUpload(upload_id.to_string()));
        }

        Ok((dir, manifest))
    }

    fn signing_mac(
        &self,
        upload_id: &str,
        part_number: u32,
        expires: i64,
    ) -> Result<HmacSha256, StorageError> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|_| StorageError::InvalidSignature)?;
        mac.update(upload_id.as_bytes());
        mac.update(b"\n");
        mac.update(part_number.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(
        &self,
        upload_id: &str,
        part_number: u32,
        expires: i64,
    ) -> Result<String, StorageError> {
        let mac = self.signing_mac(upload_id, part_number, expires)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a presigned part URL's `expires` and `signature` query values
    pub fn verify_signature(
        &self,
        upload_id: &str,
        part_number: u32,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if now.timestamp() > expires {
            return Err(StorageError::InvalidSignature);
        }

        let signature = hex::decode(signature).map_err(|_| StorageError::InvalidSignature)?;

        self.signing_mac(upload_id, part_number, expires)?
            .verify_slice(&signature)
            .map_err(|_| StorageError::InvalidSignature)
    }

    /// Store one part from a body stream and return its quoted MD5 ETag
    ///
    /// Re-uploading a part number replaces the previous part. A body longer
    /// than the part's slot in the upload layout is rejected.
    pub async fn write_part<S, E>(
        &self,
        upload_id: &str,
        part_number: u32,
        mut body: S,
    ) -> Result<String, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: std::fmt::Display,
    {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StorageError::InvalidPartNumber(part_number));
        }

        let (dir, manifest) = self.read_manifest(upload_id).await?;
        let max = manifest
            .layout
            .part_len(part_number)
            .ok_or(StorageError::InvalidPartNumber(part_number))?;
        let part_path = Self::part_path(&dir, part_number);
        let tmp_path = dir.join(format!("part_{:05}.{}.tmp", part_number, Uuid::new_v4().simple()));

        let mut file = fs::File::create(&tmp_path).await?;
        let mut context = md5::Context::new();
        let mut size = 0_u64;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Body(e.to_string()));
                }
            };

            if size + chunk.len() as u64 > max {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::PartTooLarge { part_number, max });
            }

            context.consume(&chunk);
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }

        file.flush().await?;
        drop(file);

        let etag = format!("\"{:x}\"", context.compute());
        fs::rename(&tmp_path, &part_path).await?;
        fs::write(Self::etag_path(&dir, part_number), &etag).await?;

        debug!(
            upload_id = %upload_id,
            part_number,
            size,
            etag = %etag,
            "Stored part"
        );

        Ok(etag)
    }

    /// Remove in-flight uploads untouched for longer than `max_age`
    ///
    /// # Returns
    /// Number of uploads cleaned up
    pub async fn cleanup_stale_uploads(&self, max_age: std::time::Duration) -> Result<usize, StorageError> {
        let mut cleaned = 0;
        let now = std::time::SystemTime::now();

        let mut entries = fs::read_dir(&self.temp_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !path.is_dir() {
                continue;
            }

            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };

            if now.duration_since(modified).is_ok_and(|age| age > max_age) {
                if let Err(e) = fs::remove_dir_all(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to clean up stale upload");
                } else {
                    info!(path = %path.display(), "Cleaned up stale upload");
                    cleaned += 1;
                }
            }
        }

        Ok(cleaned)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        layout: PartLayout,
    ) -> Result<String, StorageError> {
        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = self.upload_dir(&upload_id)?;
        fs::create_dir_all(&dir).await?;

        let manifest = UploadManifest {
            key: key.to_string(),
            content_type: content_type.to_string(),
            layout,
            created_at: Utc::now(),
        };
        fs::write(dir.join("manifest.json"), serde_json::to_vec(&manifest)?).await?;

        debug!(upload_id = %upload_id, key = %key, "Created multipart upload");
        Ok(upload_id)
    }

    fn presign_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StorageError::InvalidPartNumber(part_number));
        }

        let expires = expires_at.timestamp();
        Ok(format!(
            "{}/storage/parts/{}/{}?expires={}&signature={}",
            self.base_url,
            upload_id,
            part_number,
            expires,
            self.signature(upload_id, part_number, expires)?
        ))
    }

    async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<UploadedPart>, StorageError> {
        let (dir, _) = self.upload_for_key(key, upload_id).await?;
        let mut parts = Vec::new();

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix("part_"))
                .and_then(|n| n.strip_suffix(".etag"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };

            let etag = fs::read_to_string(entry.path()).await?;
            parts.push(UploadedPart {
                part_number: number,
                etag,
            });
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<u64, StorageError> {
        let (dir, manifest) = self.upload_for_key(key, upload_id).await?;

        if parts.is_empty() || parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StorageError::InvalidPartOrder);
        }

        for part in parts {
            let stored = match fs::read_to_string(Self::etag_path(&dir, part.part_number)).await {
                Ok(etag) => etag,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::InvalidPart(part.part_number));
                }
                Err(e) => return Err(e.into()),
            };

            if stored.trim_matches('"') != part.etag.trim_matches('"') {
                return Err(StorageError::InvalidPart(part.part_number));
            }
        }

        let mut stored_size = 0_u64;
        for part in parts {
            stored_size += fs::metadata(Self::part_path(&dir, part.part_number)).await?.len();
        }

        if stored_size != manifest.layout.size {
            return Err(StorageError::SizeMismatch {
                expected: manifest.layout.size,
                actual: stored_size,
            });
        }

        let object_path = self.object_path(key);
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = object_path.with_extension(format!("{}.tmp", upload_id));
        let mut output = fs::File::create(&tmp_path).await?;
        let mut size = 0_u64;

        for part in parts {
            let mut input = fs::File::open(Self::part_path(&dir, part.part_number)).await?;
            size += tokio::io::copy(&mut input, &mut output).await?;
        }

        output.flush().await?;
        drop(output);

        fs::rename(&tmp_path, &object_path).await?;
        fs::remove_dir_all(&dir).await?;

        info!(
            upload_id = %upload_id,
            key = %key,
            parts = parts.len(),
            size,
            "Completed multipart upload"
        );

        Ok(size)
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let (dir, _) = self.upload_for_key(key, upload_id).await?;
        fs::remove_dir_all(&dir).await?;

        debug!(upload_id = %upload_id, key = %key, "Aborted multipart upload");
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => {
                debug!(key = %key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
