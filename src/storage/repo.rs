//! SQLite-backed mailbox repository.
//!
//! All multi-row writes go through a single transaction: a message and its
//! attachment metadata become visible together or not at all. Every read,
//! update and delete is scoped by project id; an id belonging to another
//! project is indistinguishable from a nonexistent one.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::error::{DevinboxError, Result};
use crate::model::project::is_valid_slug;
use crate::model::{
    AttachmentRecord, InboundMessage, MessagePage, MessageSummary, NewMessage, Project,
    StoredAttachment,
};

/// Handle to the relational store. Cheap to clone; all clones share one
/// connection pool.
#[derive(Clone)]
pub struct Mailbox {
    pool: SqlitePool,
}

impl Mailbox {
    /// Open (creating if missing) the database at `path` and run
    /// migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// A pool that never connects, for unit tests that only need the type.
    #[cfg(test)]
    pub(crate) fn lazy_for_tests() -> Self {
        let pool = SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .expect("valid connection string");
        Self { pool }
    }

    // ── Project directory ───────────────────────────────────────

    /// Create a project. The slug is normalized to lowercase and must be a
    /// valid subdomain label, unique across all accounts.
    pub async fn create_project(
        &self,
        account_id: &str,
        slug: &str,
        name: &str,
    ) -> Result<Project> {
        let slug = slug.trim().to_ascii_lowercase();
        if !is_valid_slug(&slug) {
            return Err(DevinboxError::InvalidSlug(slug));
        }

        let project = Project {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            slug,
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO projects (id, account_id, slug, name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project.id)
        .bind(&project.account_id)
        .bind(&project.slug)
        .bind(&project.name)
        .bind(project.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(project),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DevinboxError::SlugTaken(project.slug))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a project by slug, case-insensitively. Unscoped by account:
    /// inbound SMTP has no user session.
    pub async fn find_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT id, account_id, slug, name, created_at FROM projects WHERE slug = ?",
        )
        .bind(slug.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            "SELECT id, account_id, slug, name, created_at FROM projects ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    /// Delete a project; its messages and attachment rows cascade.
    pub async fn delete_project(&self, project_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DevinboxError::ProjectNotFound);
        }
        Ok(())
    }

    // ── Ingestion ───────────────────────────────────────────────

    /// Commit a message and its attachment metadata in one transaction.
    ///
    /// Blobs must already be durably stored; only their paths are recorded
    /// here. Fails closed with [`DevinboxError::ProjectNotFound`] when the
    /// project vanished after recipient validation.
    pub async fn commit_message(
        &self,
        project_id: Uuid,
        message: &NewMessage,
        attachments: &[StoredAttachment],
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DevinboxError::ProjectNotFound);
        }

        let id = Uuid::new_v4();
        let to_json = encode_json(&message.to_recipients)?;
        let headers_json = encode_json(&message.headers)?;

        sqlx::query(
            "INSERT INTO messages \
             (id, project_id, from_addr, to_recipients, subject, body_text, body_html, headers, received_at, is_read) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(project_id)
        .bind(&message.from_addr)
        .bind(to_json)
        .bind(&message.subject)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(headers_json)
        .bind(Utc::now())
        .bind(false)
        .execute(&mut *tx)
        .await?;

        for attachment in attachments {
            sqlx::query(
                "INSERT INTO attachments (id, message_id, filename, content_type, size, storage_path) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(&attachment.filename)
            .bind(&attachment.content_type)
            .bind(attachment.size)
            .bind(attachment.storage_path.to_string_lossy().into_owned())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    // ── Reads ───────────────────────────────────────────────────

    /// List a project's messages, newest first, with the total count.
    pub async fn list_messages(
        &self,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<MessagePage> {
        let limit = limit.max(1);
        let offset = offset.max(0);

        let messages = sqlx::query_as::<_, MessageSummary>(
            "SELECT m.id, m.from_addr, m.subject, m.received_at, m.is_read, \
             (SELECT COUNT(*) FROM attachments a WHERE a.message_id = m.id) AS attachment_count \
             FROM messages m \
             WHERE m.project_id = ? \
             ORDER BY m.received_at DESC, m.id \
             LIMIT ? OFFSET ?",
        )
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(MessagePage {
            messages,
            total,
            limit,
            offset,
        })
    }

    /// Fetch one message with its attachments, scoped to the project.
    pub async fn fetch_message(
        &self,
        project_id: Uuid,
        message_id: Uuid,
    ) -> Result<InboundMessage> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, project_id, from_addr, to_recipients, subject, body_text, body_html, \
             headers, received_at, is_read \
             FROM messages WHERE id = ? AND project_id = ?",
        )
        .bind(message_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DevinboxError::MessageNotFound)?;

        let attachments = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT id, message_id, filename, content_type, size, storage_path \
             FROM attachments WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        row.into_message(attachments)
    }

    /// Set the read flag. Idempotent: setting an already-set value is a
    /// successful no-op.
    pub async fn set_read_flag(
        &self,
        project_id: Uuid,
        message_id: Uuid,
        is_read: bool,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET is_read = ? WHERE id = ? AND project_id = ?")
            .bind(is_read)
            .bind(message_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DevinboxError::MessageNotFound);
        }
        Ok(())
    }

    /// Delete a message and its attachment rows, returning the deleted
    /// attachment records so the caller can unlink the blobs.
    pub async fn delete_message(
        &self,
        project_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<AttachmentRecord>> {
        let mut tx = self.pool.begin().await?;

        let attachments = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT a.id, a.message_id, a.filename, a.content_type, a.size, a.storage_path \
             FROM attachments a \
             JOIN messages m ON m.id = a.message_id \
             WHERE a.message_id = ? AND m.project_id = ?",
        )
        .bind(message_id)
        .bind(project_id)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM messages WHERE id = ? AND project_id = ?")
            .bind(message_id)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DevinboxError::MessageNotFound);
        }

        tx.commit().await?;
        Ok(attachments)
    }

    /// Fetch one attachment's metadata for download, scoped to the project
    /// through its owning message.
    pub async fn attachment(
        &self,
        project_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<AttachmentRecord> {
        sqlx::query_as::<_, AttachmentRecord>(
            "SELECT a.id, a.message_id, a.filename, a.content_type, a.size, a.storage_path \
             FROM attachments a \
             JOIN messages m ON m.id = a.message_id \
             WHERE a.id = ? AND m.project_id = ?",
        )
        .bind(attachment_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DevinboxError::AttachmentNotFound)
    }
}

/// Database row for a message; JSON columns decoded separately.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    project_id: Uuid,
    from_addr: String,
    to_recipients: String,
    subject: Option<String>,
    body_text: Option<String>,
    body_html: Option<String>,
    headers: String,
    received_at: DateTime<Utc>,
    is_read: bool,
}

impl MessageRow {
    fn into_message(self, attachments: Vec<AttachmentRecord>) -> Result<InboundMessage> {
        Ok(InboundMessage {
            id: self.id,
            project_id: self.project_id,
            from_addr: self.from_addr,
            to_recipients: decode_json(&self.to_recipients)?,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            headers: decode_json(&self.headers)?,
            received_at: self.received_at,
            is_read: self.is_read,
            attachments,
        })
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DevinboxError::Corrupt(e.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| DevinboxError::Corrupt(e.to_string()))
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            from_addr TEXT NOT NULL,
            to_recipients TEXT NOT NULL,
            subject TEXT,
            body_text TEXT,
            body_html TEXT,
            headers TEXT NOT NULL,
            received_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            storage_path TEXT NOT NULL UNIQUE
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_project_received \
         ON messages(project_id, received_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_mailbox(dir: &tempfile::TempDir) -> Mailbox {
        Mailbox::open(&dir.path().join("test.db")).await.unwrap()
    }

    #[tokio::test]
    async fn slug_is_normalized_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = open_mailbox(&dir).await;

        let project = mailbox.create_project("acct", "  Demo  ", "Demo").await.unwrap();
        assert_eq!(project.slug, "demo");

        let found = mailbox.find_project_by_slug("DEMO").await.unwrap();
        assert_eq!(found.unwrap().id, project.id);

        let dup = mailbox.create_project("other", "demo", "Demo 2").await;
        assert!(matches!(dup, Err(DevinboxError::SlugTaken(_))));
    }

    #[tokio::test]
    async fn invalid_slug_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = open_mailbox(&dir).await;

        let result = mailbox.create_project("acct", "no spaces", "x").await;
        assert!(matches!(result, Err(DevinboxError::InvalidSlug(_))));
    }

    #[tokio::test]
    async fn commit_fails_closed_without_project() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = open_mailbox(&dir).await;

        let message = NewMessage {
            from_addr: "a@b.com".into(),
            to_recipients: vec!["x@demo.devinbox.local".into()],
            subject: None,
            body_text: None,
            body_html: None,
            headers: Default::default(),
        };

        let result = mailbox
            .commit_message(Uuid::new_v4(), &message, &[])
            .await;
        assert!(matches!(result, Err(DevinboxError::ProjectNotFound)));
    }
}
