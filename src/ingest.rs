//! Delivery orchestration: parse the DATA payload, store attachment blobs,
//! commit the message record.
//!
//! Blobs are written before the metadata commit, so a failure in between
//! can leave unreferenced files on disk. Those orphans are invisible to
//! users; their paths are logged at WARN so an out-of-band sweep can
//! reclaim them.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{NewMessage, Project, StoredAttachment};
use crate::parser::mime::{self, AttachmentPart};
use crate::storage::{AttachmentStore, Mailbox};
use crate::tenant::TenantResolver;

/// The seam between the SMTP session and the persistence components.
///
/// One instance is shared by all connections; it owns no per-transaction
/// state.
pub struct Ingestor {
    resolver: TenantResolver,
    blobs: Arc<AttachmentStore>,
    mailbox: Mailbox,
}

impl Ingestor {
    pub fn new(resolver: TenantResolver, blobs: Arc<AttachmentStore>, mailbox: Mailbox) -> Self {
        Self {
            resolver,
            blobs,
            mailbox,
        }
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Resolve an envelope recipient to its project (RCPT TO phase).
    pub async fn resolve_recipient(&self, recipient: &str) -> Result<Project> {
        self.resolver.resolve(recipient).await
    }

    /// Deliver a completed DATA payload to the project resolved at RCPT
    /// time. All-or-nothing: on any failure no message is visible.
    pub async fn deliver(
        &self,
        project: &Project,
        envelope_from: &str,
        envelope_to: &[String],
        raw: &[u8],
    ) -> Result<Uuid> {
        let mail = mime::parse_message(raw)?;

        let stored = self.store_attachments(&mail.attachments).await?;

        let record = NewMessage {
            from_addr: mail.from.unwrap_or_else(|| envelope_from.to_string()),
            to_recipients: if mail.to.is_empty() {
                envelope_to.to_vec()
            } else {
                mail.to
            },
            subject: mail.subject,
            body_text: mail.body_text,
            body_html: mail.body_html,
            headers: mail.headers,
        };

        match self
            .mailbox
            .commit_message(project.id, &record, &stored)
            .await
        {
            Ok(id) => {
                info!(
                    project = %project.slug,
                    message = %id,
                    subject = record.subject.as_deref().unwrap_or(""),
                    attachments = stored.len(),
                    "message accepted"
                );
                Ok(id)
            }
            Err(e) => {
                // The blobs are durable but unreferenced now; leave them
                // for the sweep rather than deleting in the hot path.
                for blob in &stored {
                    warn!(
                        path = %blob.storage_path.display(),
                        "orphaned attachment blob after failed commit"
                    );
                }
                Err(e)
            }
        }
    }

    /// Store attachment payloads sequentially. If any write fails, blobs
    /// already written for this message are removed best-effort and the
    /// whole delivery is aborted.
    async fn store_attachments(&self, parts: &[AttachmentPart]) -> Result<Vec<StoredAttachment>> {
        let mut stored = Vec::with_capacity(parts.len());

        for part in parts {
            match self.blobs.store(&part.filename, &part.data).await {
                Ok(path) => stored.push(StoredAttachment {
                    filename: part.filename.clone(),
                    content_type: part.content_type.clone(),
                    size: part.data.len() as i64,
                    storage_path: path,
                }),
                Err(e) => {
                    warn!(
                        filename = %part.filename,
                        error = %e,
                        "attachment write failed, aborting delivery"
                    );
                    for blob in &stored {
                        self.blobs.remove(&blob.storage_path).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(stored)
    }
}
