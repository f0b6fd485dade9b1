//! Database service using RocksDB.
//!
//! RocksDB provides crash safety through its write-ahead log. Every mutation
//! that touches a record and its indexes is a single atomic `WriteBatch`.
//!
//! # Data Organization
//!
//! Uses column families to separate data types:
//! - `users`: User records (key: UUID)
//! - `user_emails`: Normalized email → user UUID
//! - `sessions`: Sessions (key: token hash)
//! - `session_expires`: Expiration index (key: `{expires_ms:020}:{hash}`)
//! - `user_sessions`: Sessions per user (key: `{user_id}:{hash}`)
//! - `magic_links`: Login links (key: token hash)
//! - `files`: File records (key: UUID)
//! - `file_uploads`: Multipart upload id → file UUID
//! - `file_keys`: Object key → file UUID
//! - `owner_files`: Files per owner (key: `{owner_id}:{file_id}`)

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::models::{FileRecord, MagicLink, Session, UploadStatus, User};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

type DB = DBWithThreadMode<MultiThreaded>;

/// Column family names
const CF_USERS: &str = "users";
const CF_USER_EMAILS: &str = "user_emails";
const CF_SESSIONS: &str = "sessions";
const CF_SESSION_EXPIRES: &str = "session_expires";
const CF_USER_SESSIONS: &str = "user_sessions";
const CF_MAGIC_LINKS: &str = "magic_links";
const CF_FILES: &str = "files";
const CF_FILE_UPLOADS: &str = "file_uploads";
const CF_FILE_KEYS: &str = "file_keys";
const CF_OWNER_FILES: &str = "owner_files";

const COLUMN_FAMILIES: [&str; 10] = [
    CF_USERS,
    CF_USER_EMAILS,
    CF_SESSIONS,
    CF_SESSION_EXPIRES,
    CF_USER_SESSIONS,
    CF_MAGIC_LINKS,
    CF_FILES,
    CF_FILE_UPLOADS,
    CF_FILE_KEYS,
    CF_OWNER_FILES,
];

/// Database service for users, sessions and file records
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<DB>,
    db_path: PathBuf,
    /// Serializes the email lookup and insert of new users
    user_writes: Arc<Mutex<()>>,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("path", &self.db_path)
            .finish()
    }
}

impl DatabaseService {
    /// Open (or create) the database below `data_dir/rocksdb`
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let db_path = config.database_path();

        std::fs::create_dir_all(&db_path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(3);
        opts.set_max_total_wal_size(64 * 1024 * 1024); // 64MB
        opts.set_write_buffer_size(16 * 1024 * 1024); // 16MB
        opts.set_max_write_buffer_number(3);

        let cf_descriptors: Vec<_> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &db_path, cf_descriptors)?;

        info!(path = %db_path.display(), "Database initialized (RocksDB)");

        Ok(Self {
            db: Arc::new(db),
            db_path,
            user_writes: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| AppError::internal(format!("Column family {} is missing", name)))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(&self.cf(cf)?, key)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Values of all keys in `cf` starting with `prefix`
    fn scan_prefix(&self, cf: &str, prefix: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.cf(cf)?;
        let iter = self.db.iterator_cf(
            &handle,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );

        let mut items = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            items.push((key.to_vec(), value.to_vec()));
        }

        Ok(items)
    }

    /// Check the database answers reads
    pub fn ping(&self) -> Result<()> {
        self.db.get_cf(&self.cf(CF_USERS)?, b"ping")?;
        Ok(())
    }

    // =========================================================================
    // User operations
    // =========================================================================

    /// Insert a new user with its email index
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let _guard = self.lock_user_writes()?;
        self.write_user(user)
    }

    /// Return the user registered under `email`, creating it if absent
    ///
    /// The flag is `true` when the user was created by this call.
    pub fn find_or_insert_user(&self, email: &str) -> Result<(User, bool)> {
        let _guard = self.lock_user_writes()?;

        if let Some(user) = self.find_user_by_email(email)? {
            return Ok((user, false));
        }

        let user = User::new(email);
        self.write_user(&user)?;
        Ok((user, true))
    }

    fn lock_user_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.user_writes
            .lock()
            .map_err(|_| AppError::internal("User write lock poisoned"))
    }

    fn write_user(&self, user: &User) -> Result<()> {
        let data = serde_json::to_vec(user)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_USERS)?, user.id.as_bytes(), &data);
        batch.put_cf(
            &self.cf(CF_USER_EMAILS)?,
            user.email.as_bytes(),
            user.id.as_bytes(),
        );
        self.db.write(batch)?;

        debug!(id = %user.id, "Inserted user");
        Ok(())
    }

    /// Get a user by ID
    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.get_json(CF_USERS, id.as_bytes())
    }

    /// Find a user by normalized email
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.db.get_cf(&self.cf(CF_USER_EMAILS)?, email.as_bytes())? {
            Some(id_bytes) => self.get_user(Uuid::from_slice(&id_bytes)?),
            None => Ok(None),
        }
    }

    /// Overwrite a user record (email is immutable)
    pub fn update_user(&self, user: &User) -> Result<()> {
        let data = serde_json::to_vec(user)?;
        self.db.put_cf(&self.cf(CF_USERS)?, user.id.as_bytes(), data)?;
        debug!(id = %user.id, "Updated user");
        Ok(())
    }

    /// List users ordered by id
    pub fn list_users(&self, offset: usize, limit: usize) -> Result<Vec<User>> {
        let handle = self.cf(CF_USERS)?;
        let mut users = Vec::new();

        for item in self
            .db
            .iterator_cf(&handle, IteratorMode::Start)
            .skip(offset)
            .take(limit)
        {
            let (_, value) = item?;
            users.push(serde_json::from_slice(&value)?);
        }

        Ok(users)
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    fn expires_key(session: &Session) -> String {
        format!("{:020}:{}", session.expires_at.timestamp_millis(), session.id)
    }

    fn user_session_key(session: &Session) -> String {
        format!("{}:{}", session.user_id, session.id)
    }

    /// Insert a new session with its indexes
    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let data = serde_json::to_vec(session)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_SESSIONS)?, session.id.as_bytes(), &data);
        batch.put_cf(
            &self.cf(CF_SESSION_EXPIRES)?,
            Self::expires_key(session).as_bytes(),
            session.id.as_bytes(),
        );
        batch.put_cf(
            &self.cf(CF_USER_SESSIONS)?,
            Self::user_session_key(session).as_bytes(),
            b"",
        );
        self.db.write(batch)?;

        debug!(user_id = %session.user_id, "Inserted session");
        Ok(())
    }

    /// Get a session by token hash
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.get_json(CF_SESSIONS, id.as_bytes())
    }

    /// Persist a renewed expiry, moving the expiration index entry
    pub fn update_session_expiry(&self, old: &Session, renewed: &Session) -> Result<()> {
        let data = serde_json::to_vec(renewed)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_SESSIONS)?, renewed.id.as_bytes(), &data);
        batch.delete_cf(
            &self.cf(CF_SESSION_EXPIRES)?,
            Self::expires_key(old).as_bytes(),
        );
        batch.put_cf(
            &self.cf(CF_SESSION_EXPIRES)?,
            Self::expires_key(renewed).as_bytes(),
            renewed.id.as_bytes(),
        );
        self.db.write(batch)?;

        debug!(user_id = %renewed.user_id, expires_at = %renewed.expires_at, "Renewed session");
        Ok(())
    }

    /// Delete a session and its indexes
    pub fn delete_session(&self, session: &Session) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_delete_session(&mut batch, session)?;
        self.db.write(batch)?;

        debug!(user_id = %session.user_id, "Deleted session");
        Ok(())
    }

    fn batch_delete_session(&self, batch: &mut WriteBatch, session: &Session) -> Result<()> {
        batch.delete_cf(&self.cf(CF_SESSIONS)?, session.id.as_bytes());
        batch.delete_cf(
            &self.cf(CF_SESSION_EXPIRES)?,
            Self::expires_key(session).as_bytes(),
        );
        batch.delete_cf(
            &self.cf(CF_USER_SESSIONS)?,
            Self::user_session_key(session).as_bytes(),
        );
        Ok(())
    }

    /// Delete every session of a user, returns the number removed
    pub fn delete_user_sessions(&self, user_id: Uuid) -> Result<usize> {
        let prefix = format!("{}:", user_id);
        let mut batch = WriteBatch::default();
        let mut count = 0;

        for (key, _) in self.scan_prefix(CF_USER_SESSIONS, &prefix)? {
            let session_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            match self.get_session(&session_id)? {
                Some(session) => self.batch_delete_session(&mut batch, &session)?,
                None => batch.delete_cf(&self.cf(CF_USER_SESSIONS)?, &key),
            }
            count += 1;
        }

        self.db.write(batch)?;
        Ok(count)
    }

    /// Delete sessions that expired before `now`, returns the number removed
    pub fn cleanup_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = format!("{:020}", now.timestamp_millis());
        let handle = self.cf(CF_SESSION_EXPIRES)?;
        let mut expired = Vec::new();

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (key, value) = item?;

            // Index keys sort by expiry; stop at the first one still valid
            if &key[..] > cutoff.as_bytes() {
                break;
            }

            let id = String::from_utf8_lossy(&value).into_owned();
            if let Some(session) = self.get_session(&id)? {
                expired.push(session);
            }
        }

        if !expired.is_empty() {
            let mut batch = WriteBatch::default();
            for session in &expired {
                self.batch_delete_session(&mut batch, session)?;
            }
            self.db.write(batch)?;

            info!(count = expired.len(), "Cleaned up expired sessions");
        }

        Ok(expired.len())
    }

    // =========================================================================
    // Magic link operations
    // =========================================================================

    pub fn insert_magic_link(&self, link: &MagicLink) -> Result<()> {
        let data = serde_json::to_vec(link)?;
        self.db
            .put_cf(&self.cf(CF_MAGIC_LINKS)?, link.id.as_bytes(), data)?;
        Ok(())
    }

    /// Remove and return a magic link; a link can be taken only once
    pub fn take_magic_link(&self, id: &str) -> Result<Option<MagicLink>> {
        let link: Option<MagicLink> = self.get_json(CF_MAGIC_LINKS, id.as_bytes())?;
        if link.is_some() {
            self.db.delete_cf(&self.cf(CF_MAGIC_LINKS)?, id.as_bytes())?;
        }
        Ok(link)
    }

    /// Delete magic links that expired before `now`
    pub fn cleanup_expired_magic_links(&self, now: DateTime<Utc>) -> Result<usize> {
        let handle = self.cf(CF_MAGIC_LINKS)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (key, value) = item?;
            let link: MagicLink = serde_json::from_slice(&value)?;
            if link.is_expired_at(now) {
                batch.delete_cf(&handle, &key);
                count += 1;
            }
        }

        if count > 0 {
            self.db.write(batch)?;
            info!(count, "Cleaned up expired magic links");
        }

        Ok(count)
    }

    // =========================================================================
    // File record operations
    // =========================================================================

    fn owner_file_key(file: &FileRecord) -> String {
        format!("{}:{}", file.owner_id, file.id)
    }

    /// Insert a new file record with its indexes
    pub fn insert_file(&self, file: &FileRecord) -> Result<()> {
        let data = serde_json::to_vec(file)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_FILES)?, file.id.as_bytes(), &data);
        batch.put_cf(
            &self.cf(CF_FILE_UPLOADS)?,
            file.upload_id.as_bytes(),
            file.id.as_bytes(),
        );
        batch.put_cf(
            &self.cf(CF_FILE_KEYS)?,
            file.key.as_bytes(),
            file.id.as_bytes(),
        );
        batch.put_cf(
            &self.cf(CF_OWNER_FILES)?,
            Self::owner_file_key(file).as_bytes(),
            b"",
        );
        self.db.write(batch)?;

        debug!(id = %file.id, upload_id = %file.upload_id, "Inserted file record");
        Ok(())
    }

    /// Get a file record by ID
    pub fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>> {
        self.get_json(CF_FILES, id.as_bytes())
    }

    /// Find a file record by multipart upload id
    pub fn find_file_by_upload_id(&self, upload_id: &str) -> Result<Option<FileRecord>> {
        match self
            .db
            .get_cf(&self.cf(CF_FILE_UPLOADS)?, upload_id.as_bytes())?
        {
            Some(id_bytes) => self.get_file(Uuid::from_slice(&id_bytes)?),
            None => Ok(None),
        }
    }

    /// Find a file record by object key
    pub fn find_file_by_key(&self, key: &str) -> Result<Option<FileRecord>> {
        match self.db.get_cf(&self.cf(CF_FILE_KEYS)?, key.as_bytes())? {
            Some(id_bytes) => self.get_file(Uuid::from_slice(&id_bytes)?),
            None => Ok(None),
        }
    }

    /// Overwrite a file record (key, owner and upload id are immutable)
    pub fn update_file(&self, file: &FileRecord) -> Result<()> {
        let data = serde_json::to_vec(file)?;
        self.db.put_cf(&self.cf(CF_FILES)?, file.id.as_bytes(), data)?;

        debug!(id = %file.id, status = ?file.status, "Updated file record");
        Ok(())
    }

    /// Delete a file record and its indexes
    pub fn delete_file(&self, file: &FileRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete_cf(&self.cf(CF_FILES)?, file.id.as_bytes());
        batch.delete_cf(&self.cf(CF_FILE_UPLOADS)?, file.upload_id.as_bytes());
        batch.delete_cf(&self.cf(CF_FILE_KEYS)?, file.key.as_bytes());
        batch.delete_cf(
            &self.cf(CF_OWNER_FILES)?,
            Self::owner_file_key(file).as_bytes(),
        );
        self.db.write(batch)?;

        debug!(id = %file.id, "Deleted file record");
        Ok(())
    }

    /// List the file records of one owner, newest first
    pub fn list_files_by_owner(&self, owner_id: Uuid) -> Result<Vec<FileRecord>> {
        let prefix = format!("{}:", owner_id);
        let mut files = Vec::new();

        for (key, _) in self.scan_prefix(CF_OWNER_FILES, &prefix)? {
            let id = Uuid::parse_str(&String::from_utf8_lossy(&key[prefix.len()..]))?;
            if let Some(file) = self.get_file(id)? {
                files.push(file);
            }
        }

        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    /// Unfinished uploads not touched since `cutoff`
    pub fn list_stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let handle = self.cf(CF_FILES)?;
        let mut stale = Vec::new();

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_, value) = item?;
            let file: FileRecord = serde_json::from_slice(&value)?;
            if file.status != UploadStatus::Completed && file.updated_at < cutoff {
                stale.push(file);
            }
        }

        Ok(stale)
    }
}
