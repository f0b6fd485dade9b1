//! Upload orchestration.
//!
//! Drives multipart uploads through `Created -> PartsInProgress ->
//! Completed | Aborted`, keeping the persisted [`FileRecord`] in step with
//! the object store. Ownership is checked before any call that mutates
//! storage or the record.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::{AppError, Result};
use crate::models::{
    CompleteUploadRequest, CreateUploadRequest, FileRecord, SignPartRequest, SignedPartResponse,
    UploadStatus, UploadedPart,
};
use crate::services::storage::{ObjectStore, PartLayout, StorageError, MAX_PART_NUMBER};
use crate::services::DatabaseService;

/// Longest filename kept in object keys
const MAX_FILENAME_LEN: usize = 128;

/// Outcome of one reconcile sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: usize,
    pub aborted: usize,
    /// Uploads left for the next sweep after a storage or database error
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct UploadOrchestrator {
    db: DatabaseService,
    store: Arc<dyn ObjectStore>,
    config: UploadConfig,
    presign_ttl: chrono::Duration,
}

impl UploadOrchestrator {
    pub fn new(
        db: DatabaseService,
        store: Arc<dyn ObjectStore>,
        config: UploadConfig,
        presign_ttl_seconds: u64,
    ) -> Self {
        Self {
            db,
            store,
            config,
            presign_ttl: chrono::Duration::seconds(presign_ttl_seconds as i64),
        }
    }

    pub fn part_size(&self) -> u64 {
        self.config.part_size
    }

    /// Start a multipart upload and persist its record in `Created`
    pub async fn create(&self, owner_id: Uuid, request: CreateUploadRequest) -> Result<FileRecord> {
        let filename = sanitize_filename(&request.filename)
            .ok_or_else(|| AppError::validation("Filename is empty or invalid"))?;

        let content_type = match request.content_type.as_deref() {
            Some(ct) => normalize_content_type(ct),
            None => mime_guess::from_path(&filename)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string(),
        };

        if !self.config.is_allowed_type(&content_type) {
            return Err(AppError::validation(format!(
                "Content type '{}' is not allowed",
                content_type
            )));
        }

        if request.size == 0 {
            return Err(AppError::validation("File is empty"));
        }

        if request.size > self.config.max_file_size {
            return Err(AppError::validation(format!(
                "File size {} exceeds maximum allowed size {}",
                request.size, self.config.max_file_size
            )));
        }

        let id = Uuid::new_v4();
        let key = format!("uploads/{}/{}/{}", owner_id, id, filename);

        let upload_id = self
            .store
            .create_multipart_upload(
                &key,
                &content_type,
                PartLayout::new(request.size, self.config.part_size),
            )
            .await?;

        let record = FileRecord::new(
            id,
            owner_id,
            key,
            filename,
            content_type,
            request.size,
            upload_id,
        );

        if let Err(e) = self.db.insert_file(&record) {
            // Leave no orphaned upload behind in storage
            if let Err(abort_err) = self
                .store
                .abort_multipart_upload(&record.key, &record.upload_id)
                .await
            {
                warn!(
                    upload_id = %record.upload_id,
                    error = %abort_err,
                    "Failed to abort orphaned upload"
                );
            }
            return Err(e);
        }

        info!(
            file_id = %record.id,
            owner_id = %owner_id,
            upload_id = %record.upload_id,
            size = record.size,
            content_type = %record.content_type,
            "Created upload"
        );

        Ok(record)
    }

    /// Issue a signed URL for one part; state is left untouched
    pub async fn sign_part(
        &self,
        owner_id: Uuid,
        request: SignPartRequest,
    ) -> Result<SignedPartResponse> {
        let record = self.owned_upload(owner_id, &request.upload_id)?;

        if !record.status.accepts_parts() {
            return Err(AppError::validation(format!(
                "Upload {} no longer accepts parts",
                record.upload_id
            )));
        }

        let expected_parts = self.config.part_count(record.size);
        if request.part_number == 0
            || request.part_number > MAX_PART_NUMBER
            || u64::from(request.part_number) > expected_parts
        {
            return Err(AppError::validation(format!(
                "Part number must be between 1 and {}",
                expected_parts.min(u64::from(MAX_PART_NUMBER))
            )));
        }

        let expires_at = Utc::now() + self.presign_ttl;
        let url = self.store.presign_part(
            &record.key,
            &record.upload_id,
            request.part_number,
            expires_at,
        )?;

        debug!(upload_id = %record.upload_id, part_number = request.part_number, "Signed part");

        Ok(SignedPartResponse {
            upload_id: record.upload_id,
            part_number: request.part_number,
            url,
            expires_at,
        })
    }

    /// Mirror the parts storage holds into the record
    pub async fn list_parts(&self, owner_id: Uuid, upload_id: &str) -> Result<FileRecord> {
        let mut record = self.owned_upload(owner_id, upload_id)?;

        if record.status.accepts_parts() {
            let parts = self.store.list_parts(&record.key, &record.upload_id).await?;
            record.record_parts(parts);
            self.db.update_file(&record)?;
        }

        Ok(record)
    }

    /// Assemble the object from `parts` and mark the record `Completed`
    pub async fn complete(
        &self,
        owner_id: Uuid,
        request: CompleteUploadRequest,
    ) -> Result<FileRecord> {
        let Some(upload_id) = request.upload_id.as_deref() else {
            return self.complete_without_parts(owner_id, request).await;
        };

        let mut record = self.owned_upload(owner_id, upload_id)?;

        if let Some(key) = request.key.as_deref() {
            if key != record.key {
                return Err(AppError::validation("Key does not match the upload"));
            }
        }

        if record.status == UploadStatus::Completed {
            return Ok(record);
        }

        validate_part_list(&request.parts, self.config.part_count(record.size))?;

        let stored_size = self
            .store
            .complete_multipart_upload(&record.key, &record.upload_id, &request.parts)
            .await?;

        if stored_size != record.size {
            warn!(
                file_id = %record.id,
                expected = record.size,
                actual = stored_size,
                "Assembled object does not match the declared size"
            );
            self.store.delete_object(&record.key).await?;
            return Err(AppError::validation(format!(
                "Uploaded {} bytes, expected {}",
                stored_size, record.size
            )));
        }

        record.mark_completed(request.parts);
        self.db.update_file(&record)?;

        info!(
            file_id = %record.id,
            upload_id = %record.upload_id,
            parts = record.parts.len(),
            "Completed upload"
        );

        Ok(record)
    }

    /// Legacy completion addressed by key with no parts: the record is
    /// marked completed and storage is not consulted
    async fn complete_without_parts(
        &self,
        owner_id: Uuid,
        request: CompleteUploadRequest,
    ) -> Result<FileRecord> {
        if !request.parts.is_empty() {
            return Err(AppError::validation("uploadId is required when parts are given"));
        }

        let key = request
            .key
            .ok_or_else(|| AppError::validation("Either key or uploadId is required"))?;

        let mut record = self
            .db
            .find_file_by_key(&key)?
            .ok_or_else(|| AppError::not_found(format!("No upload for key {}", key)))?;

        ensure_owner(&record, owner_id)?;

        if record.status != UploadStatus::Completed {
            warn!(
                file_id = %record.id,
                key = %record.key,
                "Completing upload without parts; storage was not consulted"
            );
            let parts = std::mem::take(&mut record.parts);
            record.mark_completed(parts);
            self.db.update_file(&record)?;
        }

        Ok(record)
    }

    /// Discard the upload in storage and delete its record
    pub async fn abort(&self, owner_id: Uuid, upload_id: &str) -> Result<()> {
        let mut record = self.owned_upload(owner_id, upload_id)?;

        if record.status == UploadStatus::Completed {
            return Err(AppError::validation(
                "Upload is already completed; delete the file instead",
            ));
        }

        self.abort_in_storage(&record).await?;

        record.mark_aborted();
        self.db.delete_file(&record)?;

        info!(file_id = %record.id, upload_id = %record.upload_id, "Aborted upload");
        Ok(())
    }

    /// Records owned by `owner_id`, newest first
    pub fn list_files(&self, owner_id: Uuid) -> Result<Vec<FileRecord>> {
        self.db.list_files_by_owner(owner_id)
    }

    /// Delete a file: its object (or pending upload) and its record
    pub async fn delete_file(&self, owner_id: Uuid, file_id: Uuid) -> Result<()> {
        let record = self
            .db
            .get_file(file_id)?
            .ok_or_else(|| AppError::not_found(format!("File not found: {}", file_id)))?;

        ensure_owner(&record, owner_id)?;

        if record.status == UploadStatus::Completed {
            self.store.delete_object(&record.key).await?;
        } else {
            self.abort_in_storage(&record).await?;
        }

        self.db.delete_file(&record)?;

        info!(file_id = %record.id, owner_id = %owner_id, "Deleted file");
        Ok(())
    }

    /// Settle uploads idle since before `now - upload_session_timeout`
    ///
    /// Uploads whose object exists in storage were completed but never
    /// recorded; they are marked completed. The rest are aborted.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let cutoff = now - chrono::Duration::seconds(self.config.upload_session_timeout as i64);
        let mut report = ReconcileReport::default();

        for record in self.db.list_stale_uploads(cutoff)? {
            let file_id = record.id;

            match self.settle(record).await {
                Ok(UploadStatus::Completed) => {
                    report.completed += 1;
                    info!(file_id = %file_id, "Reconciled completed upload");
                }
                Ok(_) => {
                    report.aborted += 1;
                    info!(file_id = %file_id, "Reconciled stale upload");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(file_id = %file_id, error = %e, "Failed to reconcile upload");
                }
            }
        }

        Ok(report)
    }

    /// Mark one stale upload completed or abort it, returning the new status
    async fn settle(&self, mut record: FileRecord) -> Result<UploadStatus> {
        if self.store.object_exists(&record.key).await? {
            let parts = std::mem::take(&mut record.parts);
            record.mark_completed(parts);
            self.db.update_file(&record)?;
        } else {
            self.abort_in_storage(&record).await?;
            record.mark_aborted();
            self.db.delete_file(&record)?;
        }

        Ok(record.status)
    }

    fn owned_upload(&self, owner_id: Uuid, upload_id: &str) -> Result<FileRecord> {
        let record = self
            .db
            .find_file_by_upload_id(upload_id)?
            .ok_or_else(|| AppError::not_found(format!("Upload not found: {}", upload_id)))?;

        ensure_owner(&record, owner_id)?;
        Ok(record)
    }

    async fn abort_in_storage(&self, record: &FileRecord) -> Result<()> {
        match self
            .store
            .abort_multipart_upload(&record.key, &record.upload_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(StorageError::NoSuchUpload(_)) => {
                warn!(upload_id = %record.upload_id, "Upload already gone from storage");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_owner(record: &FileRecord, user_id: Uuid) -> Result<()> {
    if !record.is_owned_by(user_id) {
        warn!(file_id = %record.id, user_id = %user_id, "Rejected access to foreign upload");
        return Err(AppError::forbidden("You do not own this upload"));
    }
    Ok(())
}

/// Parts must be ascending, unique and cover `1..=expected` exactly
fn validate_part_list(parts: &[UploadedPart], expected: u64) -> Result<()> {
    if parts.is_empty() {
        return Err(AppError::validation("At least one part is required"));
    }

    if parts
        .iter()
        .any(|p| p.part_number == 0 || p.part_number > MAX_PART_NUMBER)
    {
        return Err(AppError::validation(format!(
            "Part numbers must be between 1 and {}",
            MAX_PART_NUMBER
        )));
    }

    if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
        return Err(AppError::validation(
            "Parts must be in ascending order without duplicates",
        ));
    }

    // Ascending and unique, so the list is 1..=n exactly when the length and
    // the last number both match
    let last = parts.last().map_or(0, |p| u64::from(p.part_number));
    if parts.len() as u64 != expected || last != expected {
        return Err(AppError::validation(format!(
            "All {} parts are required to complete this upload",
            expected
        )));
    }

    Ok(())
}

/// Strip a content type of its parameters and lowercase it
fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Reduce a client filename to `[A-Za-z0-9._-]`
///
/// Path components are dropped and leading dots removed, so the result is
/// always a single safe key segment.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return None;
    }

    // Keep the tail, which carries the extension
    let start = trimmed.len().saturating_sub(MAX_FILENAME_LEN);
    Some(trimmed[start..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::tests::create_test_db;
    use crate::services::storage::tests::create_test_store;
    use crate::services::storage::LocalObjectStore;
    use bytes::Bytes;
    use tempfile::TempDir;

    struct Fixture {
        uploads: UploadOrchestrator,
        store: Arc<LocalObjectStore>,
        db: DatabaseService,
        _db_dir: TempDir,
        store_dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let (db, db_dir) = create_test_db();
        let (store, store_dir) = create_test_store().await;
        let store = Arc::new(store);

        let config = UploadConfig {
            max_file_size: 10 * 1024 * 1024,
            part_size: 1024,
            allowed_content_types: vec!["image/png".to_string(), "application/pdf".to_string()],
            upload_session_timeout: 3600,
        };

        Fixture {
            uploads: UploadOrchestrator::new(db.clone(), store.clone(), config, 60),
            store,
            db,
            _db_dir: db_dir,
            store_dir,
        }
    }

    fn create_request(size: u64) -> CreateUploadRequest {
        CreateUploadRequest {
            filename: "holiday photo.png".to_string(),
            content_type: None,
            size,
        }
    }

    async fn put_part(
        store: &LocalObjectStore,
        upload_id: &str,
        number: u32,
        data: Vec<u8>,
    ) -> UploadedPart {
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(data))]);
        let etag = store.write_part(upload_id, number, body).await.unwrap();
        UploadedPart {
            part_number: number,
            etag,
        }
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let f = fixture().await;
        let owner = Uuid::new_v4();

        let record = f.uploads.create(owner, create_request(2048)).await.unwrap();
        assert_eq!(record.status, UploadStatus::Created);
        assert_eq!(record.content_type, "image/png");
        assert_eq!(record.filename, "holiday_photo.png");
        assert_eq!(
            record.key,
            format!("uploads/{}/{}/holiday_photo.png", owner, record.id)
        );

        let empty = f.uploads.create(owner, create_request(0)).await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let huge = f.uploads.create(owner, create_request(11 * 1024 * 1024)).await;
        assert!(matches!(huge, Err(AppError::Validation(_))));

        let html = CreateUploadRequest {
            filename: "page.html".to_string(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            size: 10,
        };
        assert!(matches!(
            f.uploads.create(owner, html).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_full_upload_flow() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(1500)).await.unwrap();

        let signed = f
            .uploads
            .sign_part(
                owner,
                SignPartRequest {
                    upload_id: record.upload_id.clone(),
                    part_number: 2,
                },
            )
            .await
            .unwrap();
        assert!(signed.url.contains(&format!("/storage/parts/{}/2?", record.upload_id)));

        // Only two parts exist for 1500 bytes with 1024 byte parts
        let too_far = f
            .uploads
            .sign_part(
                owner,
                SignPartRequest {
                    upload_id: record.upload_id.clone(),
                    part_number: 3,
                },
            )
            .await;
        assert!(matches!(too_far, Err(AppError::Validation(_))));

        let p1 = put_part(&f.store, &record.upload_id, 1, vec![1; 1024]).await;
        let p2 = put_part(&f.store, &record.upload_id, 2, vec![2; 476]).await;

        let listed = f.uploads.list_parts(owner, &record.upload_id).await.unwrap();
        assert_eq!(listed.status, UploadStatus::PartsInProgress);
        assert_eq!(listed.parts.len(), 2);

        let completed = f
            .uploads
            .complete(
                owner,
                CompleteUploadRequest {
                    key: None,
                    upload_id: Some(record.upload_id.clone()),
                    parts: vec![p1, p2],
                },
            )
            .await
            .unwrap();

        assert_eq!(completed.status, UploadStatus::Completed);
        assert!(f.store.object_exists(&record.key).await.unwrap());
        assert_eq!(
            f.db.get_file(record.id).unwrap().unwrap().status,
            UploadStatus::Completed
        );
        assert_eq!(f.uploads.list_files(owner).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_rejects_invalid_part_lists() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(10)).await.unwrap();

        let part = |n: u32| UploadedPart {
            part_number: n,
            etag: "\"x\"".to_string(),
        };

        for parts in [vec![], vec![part(2), part(1)], vec![part(1), part(1)]] {
            let result = f
                .uploads
                .complete(
                    owner,
                    CompleteUploadRequest {
                        key: None,
                        upload_id: Some(record.upload_id.clone()),
                        parts,
                    },
                )
                .await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }

        // Unknown etag is a storage rejection, passed through
        let result = f
            .uploads
            .complete(
                owner,
                CompleteUploadRequest {
                    key: None,
                    upload_id: Some(record.upload_id.clone()),
                    parts: vec![part(1)],
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
        assert_eq!(
            f.db.get_file(record.id).unwrap().unwrap().status,
            UploadStatus::Created
        );
    }

    fn complete_request(record: &FileRecord, parts: Vec<UploadedPart>) -> CompleteUploadRequest {
        CompleteUploadRequest {
            key: None,
            upload_id: Some(record.upload_id.clone()),
            parts,
        }
    }

    #[tokio::test]
    async fn test_complete_requires_every_part() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(3000)).await.unwrap();

        let p1 = put_part(&f.store, &record.upload_id, 1, vec![1; 1024]).await;

        let result = f
            .uploads
            .complete(owner, complete_request(&record, vec![p1.clone()]))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        // Every part listed, but the middle one is short
        let p2 = put_part(&f.store, &record.upload_id, 2, vec![2; 10]).await;
        let p3 = put_part(&f.store, &record.upload_id, 3, vec![3; 952]).await;

        let result = f
            .uploads
            .complete(owner, complete_request(&record, vec![p1, p2, p3]))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        assert_eq!(f.db.get_file(record.id).unwrap().unwrap(), record);
        assert!(!f.store.object_exists(&record.key).await.unwrap());
        assert_eq!(
            f.store
                .list_parts(&record.key, &record.upload_id)
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_part_larger_than_its_slot_is_rejected() {
        let f = fixture().await;
        let record = f
            .uploads
            .create(Uuid::new_v4(), create_request(1500))
            .await
            .unwrap();

        let body = vec![Ok::<_, std::io::Error>(Bytes::from(vec![0; 1025]))];
        let result = f
            .store
            .write_part(&record.upload_id, 1, futures::stream::iter(body))
            .await;

        assert!(matches!(
            result.map_err(AppError::from),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_then_complete_is_not_found() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(10)).await.unwrap();
        let part = put_part(&f.store, &record.upload_id, 1, b"data".to_vec()).await;

        f.uploads.abort(owner, &record.upload_id).await.unwrap();
        assert!(f.db.get_file(record.id).unwrap().is_none());

        let result = f
            .uploads
            .complete(
                owner,
                CompleteUploadRequest {
                    key: None,
                    upload_id: Some(record.upload_id.clone()),
                    parts: vec![part],
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        // Aborting twice is a benign not found
        let again = f.uploads.abort(owner, &record.upload_id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_foreign_user_cannot_mutate() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(10)).await.unwrap();

        assert!(matches!(
            f.uploads.abort(intruder, &record.upload_id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.uploads.delete_file(intruder, record.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.uploads
                .sign_part(
                    intruder,
                    SignPartRequest {
                        upload_id: record.upload_id.clone(),
                        part_number: 1,
                    },
                )
                .await,
            Err(AppError::Forbidden(_))
        ));

        // Record and storage upload untouched
        assert_eq!(f.db.get_file(record.id).unwrap().unwrap(), record);
        assert!(f.store.list_parts(&record.key, &record.upload_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_complete_by_key_without_parts() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(10)).await.unwrap();

        let completed = f
            .uploads
            .complete(
                owner,
                CompleteUploadRequest {
                    key: Some(record.key.clone()),
                    upload_id: None,
                    parts: Vec::new(),
                },
            )
            .await
            .unwrap();

        assert_eq!(completed.status, UploadStatus::Completed);
        // Storage was not asked to assemble anything
        assert!(!f.store.object_exists(&record.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_completed_file() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let record = f.uploads.create(owner, create_request(4)).await.unwrap();
        let part = put_part(&f.store, &record.upload_id, 1, b"data".to_vec()).await;

        f.uploads
            .complete(
                owner,
                CompleteUploadRequest {
                    key: None,
                    upload_id: Some(record.upload_id.clone()),
                    parts: vec![part],
                },
            )
            .await
            .unwrap();

        f.uploads.delete_file(owner, record.id).await.unwrap();

        assert!(!f.store.object_exists(&record.key).await.unwrap());
        assert!(f.uploads.list_files(owner).unwrap().is_empty());
        assert!(matches!(
            f.uploads.delete_file(owner, record.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_stale_uploads() {
        let f = fixture().await;
        let owner = Uuid::new_v4();

        let stale = f.uploads.create(owner, create_request(10)).await.unwrap();

        // Assembled in storage, but the record update never happened
        let finished = f.uploads.create(owner, create_request(4)).await.unwrap();
        let part = put_part(&f.store, &finished.upload_id, 1, b"data".to_vec()).await;
        f.store
            .complete_multipart_upload(&finished.key, &finished.upload_id, &[part])
            .await
            .unwrap();

        let fresh = f.uploads.reconcile(Utc::now()).await.unwrap();
        assert_eq!(fresh, ReconcileReport::default());

        let later = Utc::now() + chrono::Duration::hours(2);
        let report = f.uploads.reconcile(later).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                completed: 1,
                aborted: 1,
                failed: 0
            }
        );

        assert!(f.db.get_file(stale.id).unwrap().is_none());
        assert_eq!(
            f.db.get_file(finished.id).unwrap().unwrap().status,
            UploadStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_reconcile_continues_past_failures() {
        let f = fixture().await;
        let owner = Uuid::new_v4();

        let broken = f.uploads.create(owner, create_request(10)).await.unwrap();
        let stale = f.uploads.create(owner, create_request(10)).await.unwrap();

        std::fs::write(
            f.store_dir
                .path()
                .join("temp")
                .join(&broken.upload_id)
                .join("manifest.json"),
            b"not json",
        )
        .unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        let report = f.uploads.reconcile(later).await.unwrap();

        assert_eq!(report.aborted, 1);
        assert_eq!(report.failed, 1);
        assert!(f.db.get_file(stale.id).unwrap().is_none());
        assert_eq!(f.db.get_file(broken.id).unwrap().unwrap(), broken);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\tmp\\a b.png").as_deref(), Some("a_b.png"));
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("").as_deref(), None);
        assert_eq!(sanitize_filename("///").as_deref(), None);
        assert_eq!(sanitize_filename("日本").as_deref(), None);
    }
}
