//! End-to-end ingestion tests: real SMTP dialogues over a socket against a
//! server bound to port 0, with a temporary database and blob root.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use devinbox::config::SmtpConfig;
use devinbox::ingest::Ingestor;
use devinbox::smtp::IngestServer;
use devinbox::storage::{AttachmentStore, Mailbox};
use devinbox::tenant::TenantResolver;

struct Harness {
    addr: SocketAddr,
    mailbox: Mailbox,
    blob_root: PathBuf,
    _dir: tempfile::TempDir,
    _server: tokio::task::JoinHandle<()>,
}

async fn start_server(max_message_bytes: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let blob_root = dir.path().join("blobs");

    let mailbox = Mailbox::open(&dir.path().join("devinbox.db")).await.unwrap();
    let blobs = Arc::new(AttachmentStore::open(&blob_root).unwrap());
    let resolver = TenantResolver::new("devinbox.local", mailbox.clone());
    let ingestor = Arc::new(Ingestor::new(resolver, blobs, mailbox.clone()));

    let config = SmtpConfig {
        listen: "127.0.0.1:0".to_string(),
        base_domain: "devinbox.local".to_string(),
        max_message_bytes,
        idle_timeout_secs: 10,
    };

    let server = IngestServer::bind(&config, ingestor).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    Harness {
        addr,
        mailbox,
        blob_root,
        _dir: dir,
        _server: handle,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        let greeting = client.read_reply().await;
        assert!(greeting.starts_with("220"), "greeting was {greeting:?}");
        client
    }

    async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// Write a line without waiting for a reply (DATA content).
    async fn write_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Send a command and read the single-line reply.
    async fn send(&mut self, line: &str) -> String {
        self.write_line(line).await;
        self.read_reply().await
    }
}

#[tokio::test]
async fn delivers_plain_message() {
    let harness = start_server(10 * 1024 * 1024).await;
    let project = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    assert!(client.send("HELO client.local").await.starts_with("250"));
    assert!(client.send("MAIL FROM:<a@b.com>").await.starts_with("250"));
    assert!(client
        .send("RCPT TO:<hello@demo.devinbox.local>")
        .await
        .starts_with("250"));
    assert!(client.send("DATA").await.starts_with("354"));

    client.write_line("From: a@b.com").await;
    client.write_line("To: hello@demo.devinbox.local").await;
    client.write_line("Subject: Test").await;
    client.write_line("").await;
    client.write_line("hi").await;
    let reply = client.send(".").await;
    assert!(reply.starts_with("250 OK id="), "final reply was {reply:?}");
    assert!(client.send("QUIT").await.starts_with("221"));

    let page = harness.mailbox.list_messages(project.id, 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    let summary = &page.messages[0];
    assert_eq!(summary.subject.as_deref(), Some("Test"));
    assert!(!summary.is_read);
    assert_eq!(summary.attachment_count, 0);

    let message = harness
        .mailbox
        .fetch_message(project.id, summary.id)
        .await
        .unwrap();
    assert_eq!(message.from_addr, "a@b.com");
    assert_eq!(message.to_recipients, vec!["hello@demo.devinbox.local"]);
    assert_eq!(message.body_text.as_deref().map(str::trim_end), Some("hi"));
    assert!(message.body_html.is_none());
    assert!(message.attachments.is_empty());
}

#[tokio::test]
async fn rejects_foreign_domain_without_persisting() {
    let harness = start_server(10 * 1024 * 1024).await;
    let project = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;

    let reply = client.send("RCPT TO:<hello@demo.unknown-domain.com>").await;
    assert!(reply.starts_with("550"), "reply was {reply:?}");

    // No accepted recipient, so DATA is out of sequence.
    assert!(client.send("DATA").await.starts_with("503"));
    client.send("QUIT").await;

    let page = harness.mailbox.list_messages(project.id, 10, 0).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn rejects_unknown_project() {
    let harness = start_server(10 * 1024 * 1024).await;

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;

    let reply = client.send("RCPT TO:<x@ghost.devinbox.local>").await;
    assert!(reply.starts_with("550"), "reply was {reply:?}");
    assert!(reply.contains("Project not found"));
}

#[tokio::test]
async fn attachment_round_trips_byte_identical() {
    let harness = start_server(10 * 1024 * 1024).await;
    let project = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;
    client.send("RCPT TO:<hello@demo.devinbox.local>").await;
    client.send("DATA").await;

    client.write_line("From: a@b.com").await;
    client.write_line("To: hello@demo.devinbox.local").await;
    client.write_line("Subject: report attached").await;
    client.write_line("MIME-Version: 1.0").await;
    client
        .write_line("Content-Type: multipart/mixed; boundary=\"sep\"")
        .await;
    client.write_line("").await;
    client.write_line("--sep").await;
    client.write_line("Content-Type: text/plain").await;
    client.write_line("").await;
    client.write_line("see attached").await;
    client.write_line("--sep").await;
    client.write_line("Content-Type: application/pdf").await;
    client
        .write_line("Content-Disposition: attachment; filename=\"report.pdf\"")
        .await;
    client.write_line("Content-Transfer-Encoding: base64").await;
    client.write_line("").await;
    client.write_line("aGVsbG8gd29ybGQ=").await;
    client.write_line("--sep--").await;
    assert!(client.send(".").await.starts_with("250"));
    client.send("QUIT").await;

    let page = harness.mailbox.list_messages(project.id, 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].attachment_count, 1);

    let message = harness
        .mailbox
        .fetch_message(project.id, page.messages[0].id)
        .await
        .unwrap();
    assert_eq!(message.attachments.len(), 1);

    let attachment = &message.attachments[0];
    assert_eq!(attachment.filename, "report.pdf");
    assert_eq!(attachment.content_type, "application/pdf");
    assert_eq!(attachment.size, 11);

    let blob = tokio::fs::read(&attachment.storage_path).await.unwrap();
    assert_eq!(blob, b"hello world");
    assert!(PathBuf::from(&attachment.storage_path).starts_with(&harness.blob_root));
}

#[tokio::test]
async fn recipients_spanning_projects_deliver_to_the_first() {
    let harness = start_server(10 * 1024 * 1024).await;
    let demo = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();
    let other = harness
        .mailbox
        .create_project("local", "other", "Other")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;
    assert!(client
        .send("RCPT TO:<x@demo.devinbox.local>")
        .await
        .starts_with("250"));
    assert!(client
        .send("RCPT TO:<y@other.devinbox.local>")
        .await
        .starts_with("250"));
    client.send("DATA").await;
    client.write_line("Subject: fan-out").await;
    client.write_line("").await;
    client.write_line("body").await;
    assert!(client.send(".").await.starts_with("250"));
    client.send("QUIT").await;

    let demo_page = harness.mailbox.list_messages(demo.id, 10, 0).await.unwrap();
    let other_page = harness.mailbox.list_messages(other.id, 10, 0).await.unwrap();
    assert_eq!(demo_page.total, 1);
    assert_eq!(other_page.total, 0);

    // Both envelope recipients are recorded on the stored message.
    let message = harness
        .mailbox
        .fetch_message(demo.id, demo_page.messages[0].id)
        .await
        .unwrap();
    assert_eq!(
        message.to_recipients,
        vec!["x@demo.devinbox.local", "y@other.devinbox.local"]
    );
}

#[tokio::test]
async fn oversized_data_is_rejected() {
    let harness = start_server(256).await;
    let project = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;
    client.send("RCPT TO:<x@demo.devinbox.local>").await;
    client.send("DATA").await;

    client.write_line("Subject: big").await;
    client.write_line("").await;
    client.write_line(&"x".repeat(512)).await;
    let reply = client.read_reply().await;
    assert!(reply.starts_with("552"), "reply was {reply:?}");

    let page = harness.mailbox.list_messages(project.id, 10, 0).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn empty_payload_is_permanently_rejected() {
    let harness = start_server(10 * 1024 * 1024).await;
    let project = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;
    client.send("RCPT TO:<x@demo.devinbox.local>").await;
    client.send("DATA").await;

    let reply = client.send(".").await;
    assert!(reply.starts_with("550"), "reply was {reply:?}");

    let page = harness.mailbox.list_messages(project.id, 10, 0).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn project_deleted_mid_transaction_fails_closed() {
    let harness = start_server(10 * 1024 * 1024).await;
    let project = harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;
    assert!(client
        .send("RCPT TO:<x@demo.devinbox.local>")
        .await
        .starts_with("250"));

    // The project vanishes between recipient validation and commit.
    harness.mailbox.delete_project(project.id).await.unwrap();

    client.send("DATA").await;
    client.write_line("Subject: late").await;
    client.write_line("").await;
    client.write_line("body").await;
    let reply = client.send(".").await;
    assert!(reply.starts_with("451"), "reply was {reply:?}");
}

#[tokio::test]
async fn out_of_sequence_commands_are_rejected() {
    let harness = start_server(10 * 1024 * 1024).await;

    let mut client = Client::connect(harness.addr).await;
    assert!(client
        .send("MAIL FROM:<a@b.com>")
        .await
        .starts_with("503"));
    assert!(client.send("NOOP").await.starts_with("250"));
    assert!(client.send("BOGUS").await.starts_with("500"));
    assert!(client.send("QUIT").await.starts_with("221"));
}

#[tokio::test]
async fn rset_discards_the_transaction() {
    let harness = start_server(10 * 1024 * 1024).await;
    harness
        .mailbox
        .create_project("local", "demo", "Demo")
        .await
        .unwrap();

    let mut client = Client::connect(harness.addr).await;
    client.send("HELO client.local").await;
    client.send("MAIL FROM:<a@b.com>").await;
    client.send("RCPT TO:<x@demo.devinbox.local>").await;
    assert!(client.send("RSET").await.starts_with("250"));
    assert!(client.send("DATA").await.starts_with("503"));
    client.send("QUIT").await;
}
