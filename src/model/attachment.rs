//! Attachment records.
//!
//! The blob itself lives on disk under the attachment store root; these
//! types carry only metadata and the storage path.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata row for a stored attachment, owned by exactly one message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttachmentRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    /// Filename as declared in the MIME part.
    pub filename: String,
    /// Declared MIME content type (e.g. `"application/pdf"`).
    pub content_type: String,
    /// Decoded size in bytes.
    pub size: i64,
    /// Unique path of the blob under the attachment store root.
    pub storage_path: String,
}

/// An attachment whose blob has been durably written but whose metadata
/// row has not yet been committed.
#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub storage_path: PathBuf,
}
