//! SQLite database storage backend
//!
//! This backend stores repository data in a SQLite database file,
//! providing better concurrent access and query performance. Unlike the
//! YAML backend it enforces the one-open-transfer-per-work rule with a
//! partial unique index, so concurrent writers cannot both open a transfer.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::traits::{BackendType, DatabaseBackend};
use crate::error::{DepotError, ValidationErrors};
use crate::models::{DepotStore, TransferRequest, TransferStatus, User, Work};
use crate::transfer::{OPEN_TRANSFER_FIELD, OPEN_TRANSFER_MESSAGE};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const WORK_COLUMNS: &str = "id, title, depositor, edit_users, created_at, modified_at";
const USER_COLUMNS: &str = "id, user_key, name, email, created_at";
const TRANSFER_COLUMNS: &str = "id, work_id, sending_user, receiving_user, sender_comment,
     receiver_comment, status, fulfillment_date, created_at, updated_at";

/// Raw transfer row; the status is parsed after the row is read so that an
/// unknown value surfaces as [`DepotError::InvalidStatus`]
type TransferRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
);

type WorkRow = (String, String, String, String, String, String);

/// SQLite backend implementation
pub struct SqliteBackend {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates a new SQLite backend
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open SQLite database {:?}", path))?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let backend = Self {
            path,
            conn: Mutex::new(conn),
        };

        backend.init_schema()?;
        Ok(backend)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection mutex poisoned"))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        let has_version_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;

        let current_version: i32 = if has_version_table {
            conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()
            .context("Failed to read schema version")?
            .unwrap_or(0)
        } else {
            0
        };

        if current_version == 0 {
            conn.execute_batch(include_str!("schema.sql"))?;
            log::debug!("initialised SQLite schema v{}", SCHEMA_VERSION);
        } else if current_version < SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is outdated, expected {}",
                current_version,
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
        serde_json::to_string(value).context("Failed to serialize to JSON")
    }

    fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
        serde_json::from_str(json).context("Failed to deserialize from JSON")
    }

    fn parse_uuid(s: &str) -> Result<Uuid> {
        Uuid::parse_str(s).with_context(|| format!("Invalid UUID in database: {}", s))
    }

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("Invalid timestamp in database: {}", s))
    }

    // =========================================================================
    // Row mapping
    // =========================================================================

    fn work_row(row: &Row<'_>) -> rusqlite::Result<WorkRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn work_from_row(conn: &Connection, raw: WorkRow) -> Result<Work> {
        let (id_str, title, depositor, edit_users_json, created_at_str, modified_at_str) = raw;
        let edit_users: BTreeSet<String> = Self::from_json(&edit_users_json)?;

        Ok(Work {
            id: Self::parse_uuid(&id_str)?,
            ordered_member_ids: Self::load_members(conn, &id_str)?,
            title,
            depositor,
            edit_users,
            created_at: Self::parse_timestamp(&created_at_str)?,
            modified_at: Self::parse_timestamp(&modified_at_str)?,
        })
    }

    fn load_members(conn: &Connection, parent_id: &str) -> Result<Vec<Uuid>> {
        let mut stmt = conn.prepare(
            "SELECT member_id FROM work_members WHERE parent_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map([parent_id], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for member in rows {
            members.push(Self::parse_uuid(&member?)?);
        }
        Ok(members)
    }

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn user_from_raw(raw: (String, String, String, String, String)) -> Result<User> {
        let (id_str, user_key, name, email, created_at_str) = raw;
        Ok(User {
            id: Self::parse_uuid(&id_str)?,
            user_key,
            name,
            email,
            created_at: Self::parse_timestamp(&created_at_str)?,
        })
    }

    fn transfer_row(row: &Row<'_>) -> rusqlite::Result<TransferRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ))
    }

    fn transfer_from_raw(raw: TransferRow) -> Result<TransferRequest> {
        let (
            id_str,
            work_id_str,
            sending_str,
            receiving_str,
            sender_comment,
            receiver_comment,
            status_str,
            fulfillment_str,
            created_at_str,
            updated_at_str,
        ) = raw;

        let status: TransferStatus = status_str.parse()?;
        let fulfillment_date = fulfillment_str
            .as_deref()
            .map(Self::parse_timestamp)
            .transpose()?;

        Ok(TransferRequest {
            id: Self::parse_uuid(&id_str)?,
            work_id: Self::parse_uuid(&work_id_str)?,
            sending_user: Self::parse_uuid(&sending_str)?,
            receiving_user: Self::parse_uuid(&receiving_str)?,
            sender_comment,
            receiver_comment,
            status,
            fulfillment_date,
            created_at: Self::parse_timestamp(&created_at_str)?,
            updated_at: Self::parse_timestamp(&updated_at_str)?,
        })
    }

    // =========================================================================
    // Bulk loads
    // =========================================================================

    fn load_works(&self, conn: &Connection) -> Result<Vec<Work>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM works ORDER BY created_at",
            WORK_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::work_row)?;

        let mut works = Vec::new();
        for raw in rows {
            works.push(Self::work_from_row(conn, raw?)?);
        }
        Ok(works)
    }

    fn load_users(&self, conn: &Connection) -> Result<Vec<User>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::user_from_row)?;

        let mut users = Vec::new();
        for raw in rows {
            users.push(Self::user_from_raw(raw?)?);
        }
        Ok(users)
    }

    fn load_transfer_requests(&self, conn: &Connection) -> Result<Vec<TransferRequest>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_requests ORDER BY created_at",
            TRANSFER_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::transfer_row)?;

        let mut requests = Vec::new();
        for raw in rows {
            requests.push(Self::transfer_from_raw(raw?)?);
        }
        Ok(requests)
    }

    fn load_name(&self, conn: &Connection) -> Result<String> {
        let name = conn
            .query_row("SELECT name FROM metadata WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(name.unwrap_or_default())
    }

    // =========================================================================
    // Single-record writes
    // =========================================================================

    fn write_work(conn: &Connection, work: &Work) -> Result<()> {
        let id = work.id.to_string();
        conn.execute(
            "INSERT INTO works (id, title, depositor, edit_users, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                depositor = excluded.depositor,
                edit_users = excluded.edit_users,
                modified_at = excluded.modified_at",
            params![
                id,
                work.title,
                work.depositor,
                Self::to_json(&work.edit_users)?,
                work.created_at.to_rfc3339(),
                work.modified_at.to_rfc3339(),
            ],
        )?;

        conn.execute("DELETE FROM work_members WHERE parent_id = ?1", [&id])?;
        for (position, member_id) in work.ordered_member_ids.iter().enumerate() {
            conn.execute(
                "INSERT INTO work_members (parent_id, member_id, position) VALUES (?1, ?2, ?3)",
                params![id, member_id.to_string(), position as i64],
            )?;
        }
        Ok(())
    }

    fn write_user(conn: &Connection, user: &User) -> Result<()> {
        conn.execute(
            "INSERT INTO users (id, user_key, name, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.user_key,
                user.name,
                user.email,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn write_transfer_request(conn: &Connection, request: &TransferRequest) -> Result<()> {
        let result = conn.execute(
            "INSERT INTO transfer_requests
             (id, work_id, sending_user, receiving_user, sender_comment, receiver_comment,
              status, fulfillment_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                receiver_comment = excluded.receiver_comment,
                status = excluded.status,
                fulfillment_date = excluded.fulfillment_date,
                updated_at = excluded.updated_at",
            params![
                request.id.to_string(),
                request.work_id.to_string(),
                request.sending_user.to_string(),
                request.receiving_user.to_string(),
                request.sender_comment,
                request.receiver_comment,
                request.status.as_str(),
                request.fulfillment_date.map(|d| d.to_rfc3339()),
                request.created_at.to_rfc3339(),
                request.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation && request.is_pending() =>
            {
                log::warn!(
                    "store refused second open transfer on work {}",
                    request.work_id
                );
                let mut errors = ValidationErrors::new();
                errors.add(OPEN_TRANSFER_FIELD, OPEN_TRANSFER_MESSAGE);
                Err(DepotError::Validation(errors).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl DatabaseBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<DepotStore> {
        let conn = self.conn()?;

        Ok(DepotStore {
            name: self.load_name(&conn)?,
            works: self.load_works(&conn)?,
            users: self.load_users(&conn)?,
            transfer_requests: self.load_transfer_requests(&conn)?,
        })
    }

    fn save(&self, store: &DepotStore) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM work_members", [])?;
        tx.execute("DELETE FROM works", [])?;
        tx.execute("DELETE FROM users", [])?;
        tx.execute("DELETE FROM transfer_requests", [])?;

        // Parents reference works rows, so every work row goes in first
        for work in &store.works {
            Self::write_work(&tx, work)?;
        }
        for user in &store.users {
            Self::write_user(&tx, user)?;
        }
        for request in &store.transfer_requests {
            Self::write_transfer_request(&tx, request)?;
        }

        tx.execute(
            "INSERT INTO metadata (id, name) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            [&store.name],
        )?;

        tx.commit()?;
        Ok(())
    }

    // Override for more efficient single-record operations

    fn get_work(&self, id: &Uuid) -> Result<Option<Work>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM works WHERE id = ?1", WORK_COLUMNS),
                [id.to_string()],
                Self::work_row,
            )
            .optional()?;

        raw.map(|raw| Self::work_from_row(&conn, raw)).transpose()
    }

    fn save_work(&self, work: &Work) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::write_work(&tx, work)?;
        tx.commit()?;
        Ok(())
    }

    fn destroy_work(&self, id: &Uuid) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = id.to_string();

        // Detach from parents; own member rows go with the cascade
        tx.execute("DELETE FROM work_members WHERE member_id = ?1", [&id])?;
        let rows_affected = tx.execute("DELETE FROM works WHERE id = ?1", [&id])?;

        tx.commit()?;
        Ok(rows_affected > 0)
    }

    fn in_works_ids(&self, id: &Uuid) -> Result<Vec<Uuid>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT parent_id FROM work_members WHERE member_id = ?1 ORDER BY parent_id",
        )?;
        let rows = stmt.query_map([id.to_string()], |row| row.get::<_, String>(0))?;

        let mut parents = Vec::new();
        for parent in rows {
            parents.push(Self::parse_uuid(&parent?)?);
        }
        Ok(parents)
    }

    fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id.to_string()],
                Self::user_from_row,
            )
            .optional()?;
        raw.map(Self::user_from_raw).transpose()
    }

    fn get_user_by_key(&self, user_key: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE user_key = ?1", USER_COLUMNS),
                [user_key],
                Self::user_from_row,
            )
            .optional()?;
        raw.map(Self::user_from_raw).transpose()
    }

    fn add_user(&self, user: User) -> Result<User> {
        let conn = self.conn()?;
        Self::write_user(&conn, &user)
            .with_context(|| format!("User key already taken: {}", user.user_key))?;
        Ok(user)
    }

    fn get_transfer_request(&self, id: &Uuid) -> Result<Option<TransferRequest>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM transfer_requests WHERE id = ?1", TRANSFER_COLUMNS),
                [id.to_string()],
                Self::transfer_row,
            )
            .optional()?;
        raw.map(Self::transfer_from_raw).transpose()
    }

    fn save_transfer_request(&self, request: &TransferRequest) -> Result<()> {
        let conn = self.conn()?;
        Self::write_transfer_request(&conn, request)
    }

    fn open_transfer_for_work(
        &self,
        work_id: &Uuid,
        excluding: Option<&Uuid>,
    ) -> Result<Option<TransferRequest>> {
        let conn = self.conn()?;
        let excluding = excluding.map(|id| id.to_string()).unwrap_or_default();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transfer_requests
                     WHERE work_id = ?1 AND status = 'pending' AND id != ?2
                     LIMIT 1",
                    TRANSFER_COLUMNS
                ),
                params![work_id.to_string(), excluding],
                Self::transfer_row,
            )
            .optional()?;
        raw.map(Self::transfer_from_raw).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Repository;
    use tempfile::NamedTempFile;

    fn backend() -> (NamedTempFile, SqliteBackend) {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        let backend = SqliteBackend::new(temp_file.path()).unwrap();
        (temp_file, backend)
    }

    #[test]
    fn test_reopening_keeps_schema_and_data() {
        let (file, backend) = backend();
        let user = backend.add_user(User::new("ada@example.org", "Ada")).unwrap();
        drop(backend);

        let reopened = SqliteBackend::new(file.path()).unwrap();
        let conn = reopened.conn().unwrap();
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        drop(conn);
        assert_eq!(versions, 1);
        assert_eq!(reopened.find_user_by_key("ada@example.org").unwrap().id, user.id);
    }

    #[test]
    fn test_unreadable_schema_version_is_an_error() {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute_batch("CREATE TABLE schema_version (label TEXT);").unwrap();
        drop(conn);

        let err = SqliteBackend::new(temp_file.path()).err().expect("open should fail");
        assert!(format!("{:#}", err).contains("schema version"));
    }

    #[test]
    fn test_sqlite_backend_create_and_load() {
        let (_file, backend) = backend();
        backend.create_if_not_exists().unwrap();

        let store = backend.load().unwrap();
        assert!(store.works.is_empty());
        assert!(store.users.is_empty());
    }

    #[test]
    fn test_sqlite_backend_save_and_load() {
        let (_file, backend) = backend();

        let mut store = DepotStore::new();
        store.name = "Test DB".to_string();
        let mut parent = Work::new("Parent");
        let child = Work::new("Child");
        parent.push_member(child.id);
        parent.edit_users.insert("bob@example.org".into());
        store.works.push(child.clone());
        store.works.push(parent.clone());

        backend.save(&store).unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded.name, "Test DB");
        let loaded_parent = loaded.get_work(&parent.id).unwrap();
        assert_eq!(loaded_parent.ordered_member_ids, vec![child.id]);
        assert!(loaded_parent.edit_users.contains("bob@example.org"));
    }

    #[test]
    fn test_sqlite_backend_member_order_and_destroy() {
        let (_file, backend) = backend();

        let mut parent = Work::new("Parent");
        let first = Work::new("First");
        let second = Work::new("Second");
        backend.save_work(&first).unwrap();
        backend.save_work(&second).unwrap();
        parent.push_member(second.id);
        parent.push_member(first.id);
        backend.save_work(&parent).unwrap();

        let loaded = backend.find_work(&parent.id).unwrap();
        assert_eq!(loaded.ordered_member_ids, vec![second.id, first.id]);
        assert_eq!(backend.in_works_ids(&first.id).unwrap(), vec![parent.id]);

        assert!(backend.destroy_work(&first.id).unwrap());
        assert!(!backend.destroy_work(&first.id).unwrap());
        let loaded = backend.find_work(&parent.id).unwrap();
        assert_eq!(loaded.ordered_member_ids, vec![second.id]);
    }

    #[test]
    fn test_sqlite_backend_refuses_second_open_transfer() {
        let (_file, backend) = backend();
        let work_id = Uuid::new_v4();

        let first = TransferRequest::new(work_id, Uuid::new_v4(), Uuid::new_v4(), None);
        backend.save_transfer_request(&first).unwrap();

        let second = TransferRequest::new(work_id, Uuid::new_v4(), Uuid::new_v4(), None);
        let err: DepotError = backend.save_transfer_request(&second).unwrap_err().into();
        let errors = err.validation_errors().expect("validation error");
        assert_eq!(errors.on(OPEN_TRANSFER_FIELD), vec![OPEN_TRANSFER_MESSAGE]);

        // Once the first is closed the slot is free again
        let mut first = first;
        first.cancel().unwrap();
        backend.save_transfer_request(&first).unwrap();
        backend.save_transfer_request(&second).unwrap();

        let open = backend.open_transfer_for_work(&work_id, None).unwrap();
        assert_eq!(open.map(|r| r.id), Some(second.id));
        assert!(backend
            .open_transfer_for_work(&work_id, Some(&second.id))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sqlite_backend_status_persisted_as_string() {
        let (_file, backend) = backend();
        let mut request = TransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None);
        request.cancel().unwrap();
        backend.save_transfer_request(&request).unwrap();

        let conn = backend.conn().unwrap();
        let status: String = conn
            .query_row("SELECT status FROM transfer_requests", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "canceled");
    }

    #[test]
    fn test_sqlite_backend_user_lookup() {
        let (_file, backend) = backend();
        let alice = backend.add_user(User::new("alice@example.org", "Alice")).unwrap();
        assert!(backend.add_user(User::new("alice@example.org", "Again")).is_err());

        assert_eq!(backend.find_user_by_key("alice@example.org").unwrap(), alice);
        assert!(matches!(
            backend.find_user_by_key("dave"),
            Err(DepotError::UserNotFound(_))
        ));
    }
}
