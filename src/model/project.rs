//! Tenant project record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant: one inbox group addressed as `*@<slug>.<base-domain>`.
///
/// The slug doubles as a DNS subdomain label and is immutable once the
/// project is created. Uniqueness is enforced by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    /// Owning account; opaque to the ingestion pipeline.
    pub account_id: String,
    /// Unique lowercase alphanumeric-and-hyphen identifier.
    pub slug: String,
    /// Human-readable display name.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Check that a slug is a valid subdomain label: non-empty, lowercase
/// alphanumeric and hyphens, not starting or ending with a hyphen.
pub fn is_valid_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.starts_with('-') || slug.ends_with('-') {
        return false;
    }
    slug.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
