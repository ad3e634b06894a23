//! The SMTP ingestion listener.
//!
//! One long-lived listener accepts concurrent client connections; each
//! connection runs its own task and its own transaction state machine.
//! The server holds its collaborators explicitly and has no global state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;
use crate::error::{DevinboxError, Result};
use crate::ingest::Ingestor;

use super::response::Reply;
use super::session::{Command, Session, MAX_COMMAND_LINE, MAX_RECIPIENTS};

/// The long-lived SMTP ingestion server.
///
/// Constructed once at startup with its dependencies, bound with
/// [`IngestServer::bind`], and driven by [`IngestServer::run`]. Binding to
/// port 0 is supported; tests read the actual port from
/// [`IngestServer::local_addr`].
pub struct IngestServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

/// Immutable per-server state shared by all connection tasks.
struct Shared {
    ingestor: Arc<Ingestor>,
    hostname: String,
    max_message_bytes: usize,
    idle_timeout: Duration,
}

impl IngestServer {
    /// Bind the listener. SMTP AUTH is deliberately absent: the server
    /// accepts unauthenticated mail for its configured domain only.
    pub async fn bind(config: &SmtpConfig, ingestor: Arc<Ingestor>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| DevinboxError::Config(format!("cannot bind '{}': {e}", config.listen)))?;

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                ingestor,
                hostname: config.base_domain.clone(),
                max_message_bytes: config.max_message_bytes,
                idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the surrounding task is cancelled.
    pub async fn run(self) -> Result<()> {
        let addr = self
            .local_addr()
            .map_err(|e| DevinboxError::Config(e.to_string()))?;
        info!(
            %addr,
            "SMTP listener started, accepting mail for *@*.{}",
            self.shared.hostname
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &shared).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}

/// Outcome of one bounded, timed line read.
enum LineRead {
    Line,
    Eof,
    TooLong,
    TimedOut,
}

/// Read one line into `buf`, enforcing a length cap and the idle timeout.
///
/// Unlike `read_until`, an over-long line stops consuming input instead of
/// buffering without bound.
async fn read_line_bounded<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    idle: Duration,
) -> std::io::Result<LineRead> {
    loop {
        let chunk = match timeout(idle, reader.fill_buf()).await {
            Ok(result) => result?,
            Err(_) => return Ok(LineRead::TimedOut),
        };
        if chunk.is_empty() {
            return Ok(if buf.is_empty() { LineRead::Eof } else { LineRead::Line });
        }

        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&chunk[..=pos]);
            reader.consume(pos + 1);
            return Ok(if buf.len() > max {
                LineRead::TooLong
            } else {
                LineRead::Line
            });
        }

        buf.extend_from_slice(chunk);
        let n = chunk.len();
        reader.consume(n);
        if buf.len() > max {
            return Ok(LineRead::TooLong);
        }
    }
}

async fn send(writer: &mut OwnedWriteHalf, reply: Reply) -> std::io::Result<()> {
    writer.write_all(reply.format().as_bytes()).await?;
    writer.flush().await
}

/// Drive one client connection through the transaction state machine.
async fn handle_connection(stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut session = Session::new();
    let mut line: Vec<u8> = Vec::new();

    debug!(%peer, "client connected");
    send(&mut writer, Reply::greeting(&shared.hostname)).await?;

    loop {
        line.clear();
        match read_line_bounded(&mut reader, &mut line, MAX_COMMAND_LINE, shared.idle_timeout).await? {
            LineRead::Eof => break,
            LineRead::TimedOut => {
                send(&mut writer, Reply::idle_timeout()).await?;
                break;
            }
            LineRead::TooLong => {
                send(&mut writer, Reply::line_too_long()).await?;
                break;
            }
            LineRead::Line => {}
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            continue;
        }
        debug!(%peer, command = text, "smtp <=");

        match Command::parse(text) {
            Command::Helo(domain) | Command::Ehlo(domain) if domain.is_empty() => {
                send(&mut writer, Reply::syntax("domain argument required")).await?;
            }
            Command::Helo(domain) => {
                session.greet(domain.clone());
                send(&mut writer, Reply::helo(&shared.hostname, &domain)).await?;
            }
            Command::Ehlo(domain) => {
                session.greet(domain.clone());
                let reply = Reply::ehlo(&shared.hostname, &domain, shared.max_message_bytes);
                send(&mut writer, reply).await?;
            }
            Command::Mail(sender) => {
                if !session.can_mail() {
                    send(&mut writer, Reply::bad_sequence("MAIL requires HELO first")).await?;
                    continue;
                }
                session.set_sender(sender);
                send(&mut writer, Reply::ok()).await?;
            }
            Command::Rcpt(recipient) => {
                if !session.can_rcpt() {
                    send(&mut writer, Reply::bad_sequence("RCPT requires MAIL first")).await?;
                    continue;
                }
                if session.recipient_count() >= MAX_RECIPIENTS {
                    send(&mut writer, Reply::too_many_recipients(MAX_RECIPIENTS)).await?;
                    continue;
                }
                match shared.ingestor.resolve_recipient(&recipient).await {
                    Ok(project) => {
                        debug!(%peer, recipient = %recipient, project = %project.slug, "recipient accepted");
                        session.add_recipient(recipient, project);
                        send(&mut writer, Reply::ok()).await?;
                    }
                    Err(e) => {
                        warn!(%peer, recipient = %recipient, error = %e, "recipient rejected");
                        send(&mut writer, Reply::rejected(&e)).await?;
                    }
                }
            }
            Command::Data => {
                if !session.can_data() {
                    send(&mut writer, Reply::bad_sequence("DATA requires RCPT first")).await?;
                    continue;
                }
                let envelope = match session.take_envelope() {
                    Some(envelope) => envelope,
                    None => {
                        send(&mut writer, Reply::bad_sequence("DATA requires RCPT first")).await?;
                        continue;
                    }
                };
                send(&mut writer, Reply::data_start()).await?;

                let data = match collect_data(&mut reader, shared).await? {
                    DataRead::Complete(data) => data,
                    DataRead::Abandoned => {
                        debug!(%peer, "client disconnected during DATA; transaction abandoned");
                        break;
                    }
                    DataRead::TooLarge => {
                        send(&mut writer, Reply::too_large(shared.max_message_bytes)).await?;
                        break;
                    }
                    DataRead::TimedOut => {
                        send(&mut writer, Reply::idle_timeout()).await?;
                        break;
                    }
                };

                let reply = match shared
                    .ingestor
                    .deliver(&envelope.project, &envelope.from, &envelope.recipients, &data)
                    .await
                {
                    Ok(id) => Reply::delivered(id),
                    Err(e) => {
                        warn!(%peer, project = %envelope.project.slug, error = %e, "delivery failed");
                        Reply::rejected(&e)
                    }
                };

                // The commit, if it happened, stands even when the client
                // is no longer there to hear about it.
                if let Err(e) = send(&mut writer, reply).await {
                    debug!(%peer, error = %e, "client gone before final reply");
                    break;
                }
            }
            Command::Rset => {
                session.reset();
                send(&mut writer, Reply::ok()).await?;
            }
            Command::Noop => {
                send(&mut writer, Reply::ok()).await?;
            }
            Command::Quit => {
                send(&mut writer, Reply::quit()).await?;
                break;
            }
            Command::Unknown => {
                send(&mut writer, Reply::unrecognized()).await?;
            }
        }
    }

    debug!(%peer, "client disconnected");
    Ok(())
}

/// Outcome of the DATA collection subloop.
enum DataRead {
    Complete(Vec<u8>),
    Abandoned,
    TooLarge,
    TimedOut,
}

/// Accumulate DATA lines until the lone-dot terminator, un-stuffing
/// leading dots and enforcing the configured size cap.
async fn collect_data<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    shared: &Shared,
) -> std::io::Result<DataRead> {
    let mut data: Vec<u8> = Vec::new();
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        // Any single line is also bounded by the total message cap.
        match read_line_bounded(
            reader,
            &mut line,
            shared.max_message_bytes,
            shared.idle_timeout,
        )
        .await?
        {
            LineRead::Eof => return Ok(DataRead::Abandoned),
            LineRead::TimedOut => return Ok(DataRead::TimedOut),
            LineRead::TooLong => return Ok(DataRead::TooLarge),
            LineRead::Line => {}
        }

        if line == b".\r\n" || line == b".\n" {
            return Ok(DataRead::Complete(data));
        }

        let content: &[u8] = if line.starts_with(b"..") { &line[1..] } else { &line };
        if data.len() + content.len() > shared.max_message_bytes {
            return Ok(DataRead::TooLarge);
        }
        data.extend_from_slice(content);
    }
}
