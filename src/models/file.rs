//! File record model for multipart uploads.
//!
//! A `FileRecord` mirrors the state of one multipart upload held by the
//! object store. The record, not the store, is what the API lists and what
//! ownership checks run against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Multipart upload created, no part seen yet
    Created,
    /// At least one part accepted by storage
    PartsInProgress,
    /// Storage assembled the object
    Completed,
    /// Parts discarded; the record is deleted right after
    Aborted,
}

impl UploadStatus {
    /// Check if the upload can still accept parts
    pub fn accepts_parts(&self) -> bool {
        matches!(self, Self::Created | Self::PartsInProgress)
    }

    /// Check if the upload is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// A part accepted by storage, identified by its ETag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Persisted record of an uploaded (or uploading) file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,

    /// User who created the upload
    pub owner_id: Uuid,

    /// Object key in storage
    pub key: String,

    pub filename: String,
    pub content_type: String,

    /// Declared size in bytes
    pub size: u64,

    /// Multipart upload id issued by storage
    pub upload_id: String,

    /// Parts mirrored from storage
    pub parts: Vec<UploadedPart>,

    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create a new record in `Created`
    pub fn new(
        id: Uuid,
        owner_id: Uuid,
        key: String,
        filename: String,
        content_type: String,
        size: u64,
        upload_id: String,
    ) -> Self {
        let now = Utc::now();

        Self {
            id,
            owner_id,
            key,
            filename,
            content_type,
            size,
            upload_id,
            parts: Vec::new(),
            status: UploadStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    /// Mirror the parts storage reports; leaves `Created` once any part exists
    pub fn record_parts(&mut self, parts: Vec<UploadedPart>) {
        if !parts.is_empty() && self.status == UploadStatus::Created {
            self.status = UploadStatus::PartsInProgress;
        }
        self.parts = parts;
        self.updated_at = Utc::now();
    }

    /// Mark as completed with the parts storage accepted
    pub fn mark_completed(&mut self, parts: Vec<UploadedPart>) {
        self.parts = parts;
        self.status = UploadStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn mark_aborted(&mut self) {
        self.status = UploadStatus::Aborted;
        self.updated_at = Utc::now();
    }
}

/// Request DTO for starting an upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub filename: String,

    /// Guessed from the filename when absent
    #[serde(default)]
    pub content_type: Option<String>,

    pub size: u64,
}

/// Request DTO for signing one part
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPartRequest {
    pub upload_id: String,
    pub part_number: u32,
}

/// Request DTO for endpoints addressing an upload by id (list, abort)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIdRequest {
    pub upload_id: String,
}

/// Request DTO for completing an upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub parts: Vec<UploadedPart>,
}

/// Presigned URL for a single part
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPartResponse {
    pub upload_id: String,
    pub part_number: u32,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// File record as returned to the client
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub id: Uuid,
    pub key: String,
    pub upload_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub status: UploadStatus,
    pub completed: bool,
    pub part_size: u64,
    pub part_count: u64,
    pub parts: Vec<UploadedPart>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileResponse {
    /// Create response from a record; part layout depends on the configured part size
    pub fn from_record(record: &FileRecord, part_size: u64) -> Self {
        Self {
            id: record.id,
            key: record.key.clone(),
            upload_id: record.upload_id.clone(),
            filename: record.filename.clone(),
            content_type: record.content_type.clone(),
            size: record.size,
            status: record.status,
            completed: record.status == UploadStatus::Completed,
            part_size,
            part_count: record.size.div_ceil(part_size).max(1),
            parts: record.parts.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
