//! The one concrete adapter pair this crate ships: an in-memory sqlite-backed
//! `FolderAdapter`/`AccountAdapter` used by tests and the demo binary
//! (`SPEC_FULL.md` §4.4). Schema-on-connect over a `sqlx::SqlitePool` with
//! `anyhow::Context` on every query — in-memory only, since this crate does
//! not own a production on-disk store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use super::{AccountAdapter, Boundaries, FieldSet, FolderAdapter, ListFlags, OpenState, SpecialFolderKind};
use crate::errors::MonitorResult;
use crate::model::{Email, EmailFlag, EmailFlags, EmailId, FolderPath, MessageId};

/// Shared sqlite-backed store behind a [`MemoryFolder`]/[`MemoryAccount`]
/// pair. Multiple `MemoryFolder`s over the same `MemoryStore` model one
/// account with several folders.
pub struct MemoryStore {
    pool: SqlitePool,
    special_folders: RwLock<HashMap<SpecialFolderKind, FolderPath>>,
}

impl MemoryStore {
    pub async fn new_in_memory() -> MonitorResult<Arc<Self>> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .context("connecting to in-memory sqlite store")?;
        let store = Self {
            pool,
            special_folders: RwLock::new(HashMap::new()),
        };
        store.migrate().await?;
        Ok(Arc::new(store))
    }

    async fn migrate(&self) -> MonitorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                email_id INTEGER NOT NULL,
                folder_path TEXT NOT NULL,
                message_id TEXT,
                references_json TEXT NOT NULL,
                date INTEGER NOT NULL,
                flags TEXT NOT NULL,
                PRIMARY KEY (email_id, folder_path)
            );
            CREATE INDEX IF NOT EXISTS idx_emails_folder ON emails(folder_path, email_id DESC);
            CREATE INDEX IF NOT EXISTS idx_emails_message_id ON emails(message_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running in-memory store migrations")?;
        Ok(())
    }

    /// Insert or replace an email into its folder. Exposed for tests and
    /// the demo binary to seed fixture data; not part of either adapter
    /// trait.
    pub async fn seed(&self, email: &Email) -> MonitorResult<()> {
        let references_json = serde_json::to_string(
            &email
                .references
                .iter()
                .map(MessageId::as_str)
                .collect::<Vec<_>>(),
        )
        .context("serializing references")?;
        let flags_json = serde_json::to_string(&email.flags.to_vec()).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO emails (email_id, folder_path, message_id, references_json, date, flags)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(email_id, folder_path) DO UPDATE SET
                message_id = excluded.message_id,
                references_json = excluded.references_json,
                date = excluded.date,
                flags = excluded.flags;
            "#,
        )
        .bind(email.id.value() as i64)
        .bind(email.folder_path.to_string())
        .bind(email.message_id.as_ref().map(MessageId::as_str))
        .bind(references_json)
        .bind(email.date.timestamp())
        .bind(flags_json)
        .execute(&self.pool)
        .await
        .context("seeding email into in-memory store")?;
        Ok(())
    }

    pub async fn set_special_folder(&self, kind: SpecialFolderKind, path: FolderPath) {
        self.special_folders.write().await.insert(kind, path);
    }

    fn row_to_email(row: &sqlx::sqlite::SqliteRow, fields: FieldSet) -> anyhow::Result<Email> {
        let id = EmailId::new(row.try_get::<i64, _>("email_id")? as u64);
        let folder_path = FolderPath::from_delimited(&row.try_get::<String, _>("folder_path")?, '/');

        let message_id = row
            .try_get::<Option<String>, _>("message_id")?
            .and_then(|s| MessageId::parse(&s));

        let references = if fields.contains(FieldSet::REFERENCES) {
            let raw: String = row.try_get("references_json")?;
            let tokens: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            tokens.iter().filter_map(|s| MessageId::parse(s)).collect()
        } else {
            Vec::new()
        };

        let date = if fields.contains(FieldSet::DATE) {
            DateTime::<Utc>::from_timestamp(row.try_get::<i64, _>("date")?, 0)
                .unwrap_or_else(Utc::now)
        } else {
            Utc::now()
        };

        let flags = if fields.contains(FieldSet::FLAGS) {
            let raw: String = row.try_get("flags")?;
            let tokens: Vec<EmailFlag> = serde_json::from_str(&raw).unwrap_or_default();
            tokens.into_iter().collect()
        } else {
            EmailFlags::empty()
        };

        Ok(Email::new(id, message_id, references, date, flags, folder_path))
    }
}

/// One folder within a [`MemoryStore`] (component C4 reference implementation).
pub struct MemoryFolder {
    store: Arc<MemoryStore>,
    path: FolderPath,
    open_state: RwLock<OpenState>,
}

impl MemoryFolder {
    pub fn new(store: Arc<MemoryStore>, path: FolderPath) -> Self {
        Self {
            store,
            path,
            open_state: RwLock::new(OpenState::Closed),
        }
    }
}

impl FolderAdapter for MemoryFolder {
    fn path(&self) -> &FolderPath {
        &self.path
    }

    async fn open(&self, _flags: ListFlags) -> MonitorResult<()> {
        *self.open_state.write().await = OpenState::Both;
        Ok(())
    }

    async fn close(&self) -> MonitorResult<()> {
        *self.open_state.write().await = OpenState::Closed;
        Ok(())
    }

    fn open_state(&self) -> OpenState {
        self.open_state
            .try_read()
            .map(|g| *g)
            .unwrap_or(OpenState::Opening)
    }

    async fn list_by_id(
        &self,
        start: Option<EmailId>,
        count: usize,
        fields: FieldSet,
        flags: ListFlags,
    ) -> MonitorResult<Vec<Email>> {
        let oldest_first = flags.contains(ListFlags::OLDEST_TO_NEWEST);
        let including = flags.contains(ListFlags::INCLUDING_ID);

        let rows = match (start, oldest_first) {
            (None, false) => {
                sqlx::query("SELECT * FROM emails WHERE folder_path = ?1 ORDER BY email_id DESC LIMIT ?2")
                    .bind(self.path.to_string())
                    .bind(count as i64)
                    .fetch_all(&self.store.pool)
                    .await
            }
            (None, true) => {
                sqlx::query("SELECT * FROM emails WHERE folder_path = ?1 ORDER BY email_id ASC LIMIT ?2")
                    .bind(self.path.to_string())
                    .bind(count as i64)
                    .fetch_all(&self.store.pool)
                    .await
            }
            (Some(start), false) => {
                let op = if including { "<=" } else { "<" };
                sqlx::query(&format!(
                    "SELECT * FROM emails WHERE folder_path = ?1 AND email_id {op} ?2 ORDER BY email_id DESC LIMIT ?3"
                ))
                .bind(self.path.to_string())
                .bind(start.value() as i64)
                .bind(count as i64)
                .fetch_all(&self.store.pool)
                .await
            }
            (Some(start), true) => {
                let op = if including { ">=" } else { ">" };
                sqlx::query(&format!(
                    "SELECT * FROM emails WHERE folder_path = ?1 AND email_id {op} ?2 ORDER BY email_id ASC LIMIT ?3"
                ))
                .bind(self.path.to_string())
                .bind(start.value() as i64)
                .bind(count as i64)
                .fetch_all(&self.store.pool)
                .await
            }
        }
        .context("listing emails by id")?;

        rows.iter()
            .map(|r| MemoryStore::row_to_email(r, fields))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn list_by_sparse_id(
        &self,
        ids: &[EmailId],
        fields: FieldSet,
        _flags: ListFlags,
    ) -> MonitorResult<Vec<Email>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT * FROM emails WHERE folder_path = ? AND email_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(self.path.to_string());
        for id in ids {
            query = query.bind(id.value() as i64);
        }
        let rows = query
            .fetch_all(&self.store.pool)
            .await
            .context("listing emails by sparse id")?;

        rows.iter()
            .map(|r| MemoryStore::row_to_email(r, fields))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn find_boundaries(&self, ids: &[EmailId]) -> MonitorResult<Boundaries> {
        if ids.is_empty() {
            return Ok(Boundaries::default());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT MIN(email_id) as lo, MAX(email_id) as hi FROM emails WHERE folder_path = ? AND email_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(self.path.to_string());
        for id in ids {
            query = query.bind(id.value() as i64);
        }
        let row = query
            .fetch_one(&self.store.pool)
            .await
            .context("finding boundaries")?;

        let lo: Option<i64> = row.try_get("lo").context("reading boundary lo")?;
        let hi: Option<i64> = row.try_get("hi").context("reading boundary hi")?;
        Ok(Boundaries {
            earliest: lo.map(|v| EmailId::new(v as u64)),
            latest: hi.map(|v| EmailId::new(v as u64)),
        })
    }

    async fn fetch_local_newest(&self) -> MonitorResult<Option<(EmailId, usize)>> {
        let row = sqlx::query(
            "SELECT email_id FROM emails WHERE folder_path = ?1 ORDER BY email_id DESC LIMIT 1",
        )
        .bind(self.path.to_string())
        .fetch_optional(&self.store.pool)
        .await
        .context("fetching local newest")?;

        Ok(row
            .map(|r| r.try_get::<i64, _>("email_id"))
            .transpose()
            .context("reading newest email_id")?
            .map(|id| (EmailId::new(id as u64), 0)))
    }

    async fn email_total(&self) -> MonitorResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM emails WHERE folder_path = ?1")
            .bind(self.path.to_string())
            .fetch_one(&self.store.pool)
            .await
            .context("counting emails")?;
        Ok(row.try_get::<i64, _>("n").context("reading email count")? as usize)
    }
}

/// Account-wide view over a [`MemoryStore`] (component C5 reference implementation).
pub struct MemoryAccount {
    store: Arc<MemoryStore>,
}

impl MemoryAccount {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl AccountAdapter for MemoryAccount {
    async fn local_fetch(&self, id: EmailId, fields: FieldSet) -> MonitorResult<Option<Email>> {
        let row = sqlx::query("SELECT * FROM emails WHERE email_id = ?1 LIMIT 1")
            .bind(id.value() as i64)
            .fetch_optional(&self.store.pool)
            .await
            .context("local_fetch")?;

        row.as_ref()
            .map(|r| MemoryStore::row_to_email(r, fields))
            .transpose()
            .map_err(Into::into)
    }

    async fn local_search_by_message_ids(
        &self,
        needed: &[MessageId],
        fields: FieldSet,
        folder_blacklist: &[FolderPath],
        flag_blacklist: EmailFlags,
    ) -> MonitorResult<Vec<Email>> {
        if needed.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM emails")
            .fetch_all(&self.store.pool)
            .await
            .context("local_search_by_message_ids")?;

        let mut out = Vec::new();
        for row in &rows {
            let email = MemoryStore::row_to_email(row, fields.union(FieldSet::REFERENCES))?;
            if folder_blacklist
                .iter()
                .any(|b| email.folder_path.is_descendant_of(b))
            {
                continue;
            }
            if email.flags.intersects(&flag_blacklist) {
                continue;
            }
            if email.ancestors().iter().any(|a| needed.contains(a)) {
                out.push(email);
            }
        }
        Ok(out)
    }

    fn get_special_folder(&self, kind: SpecialFolderKind) -> Option<FolderPath> {
        self.store
            .special_folders
            .try_read()
            .ok()
            .and_then(|m| m.get(&kind).cloned())
    }
}
