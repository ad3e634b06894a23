//! # devinbox
//!
//! A developer email-testing inbox. devinbox runs a long-lived SMTP
//! listener that accepts mail for `*@<project>.<base-domain>`, resolves
//! each message to a project by its subdomain slug, parses the MIME
//! payload, writes attachments to durable blob storage, and commits the
//! message record to SQLite atomically with its attachment metadata.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use devinbox::config::Config;
//! use devinbox::ingest::Ingestor;
//! use devinbox::smtp::IngestServer;
//! use devinbox::storage::{AttachmentStore, Mailbox};
//! use devinbox::tenant::TenantResolver;
//!
//! # async fn run() -> devinbox::Result<()> {
//! let config = Config::default();
//! let mailbox = Mailbox::open(&config.storage.database_path).await?;
//! let blobs = Arc::new(AttachmentStore::open(&config.storage.attachment_root)?);
//! let resolver = TenantResolver::new(&config.smtp.base_domain, mailbox.clone());
//! let ingestor = Arc::new(Ingestor::new(resolver, blobs, mailbox.clone()));
//!
//! mailbox.create_project("local", "demo", "Demo").await?;
//!
//! // Mail for hello@demo.devinbox.local now lands in the demo project.
//! let server = IngestServer::bind(&config.smtp, ingestor).await?;
//! server.run().await
//! # }
//! ```
//!
//! Messages are rejected at the SMTP level when the recipient domain is
//! foreign or the project does not exist (permanent, 5xx), and when
//! storage misbehaves (transient, 4xx; a well-behaved sender retries).
//! The server is an open relay for its configured domain only; there is
//! no SMTP AUTH. It is a testing tool, not a production mail server.

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod smtp;
pub mod storage;
pub mod tenant;

pub use error::{DevinboxError, Result};
pub use ingest::Ingestor;
pub use smtp::IngestServer;
pub use storage::{AttachmentStore, Mailbox};
pub use tenant::TenantResolver;
