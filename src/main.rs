//! CLI entry point for `devinbox`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use devinbox::config::{self, Config};
use devinbox::ingest::Ingestor;
use devinbox::smtp::IngestServer;
use devinbox::storage::{AttachmentStore, Mailbox};
use devinbox::tenant::TenantResolver;

#[derive(Parser)]
#[command(name = "devinbox", version, about = "Developer email-testing inbox")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true, env = "DEVINBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SMTP ingestion server (the default)
    Serve,
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Browse stored messages
    Messages {
        #[command(subcommand)]
        action: MessageAction,
    },
    /// Export stored attachments
    Attachments {
        #[command(subcommand)]
        action: AttachmentAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project; mail for *@<slug>.<base-domain> will land in it
    Add {
        slug: String,
        /// Owning account identifier
        #[arg(long, default_value = "local")]
        account: String,
        /// Display name (defaults to the slug)
        #[arg(long)]
        name: Option<String>,
    },
    /// List all projects
    List,
}

#[derive(Subcommand)]
enum MessageAction {
    /// List a project's messages, newest first
    List {
        /// Project slug
        #[arg(short, long)]
        project: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show one message with its attachments
    Show {
        id: Uuid,
        #[arg(short, long)]
        project: String,
    },
    /// Set the read flag
    Mark {
        id: Uuid,
        #[arg(short, long)]
        project: String,
        /// Mark as unread instead of read
        #[arg(long)]
        unread: bool,
    },
    /// Delete a message and its attachment blobs
    Delete {
        id: Uuid,
        #[arg(short, long)]
        project: String,
    },
}

#[derive(Subcommand)]
enum AttachmentAction {
    /// Copy a stored attachment out under its original filename
    Save {
        id: Uuid,
        #[arg(short, long)]
        project: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    setup_logging(&config, cli.verbose);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cmd_serve(&config).await,
        Commands::Project { action } => cmd_project(&config, action).await,
        Commands::Messages { action } => cmd_messages(&config, action).await,
        Commands::Attachments { action } => cmd_attachments(&config, action).await,
    }
}

/// Set up tracing on stderr. `RUST_LOG` wins over config and verbosity.
fn setup_logging(config: &Config, verbose: u8) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = match verbose {
        0 => config.log.filter.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_mailbox(config: &Config) -> anyhow::Result<Mailbox> {
    Mailbox::open(&config.storage.database_path)
        .await
        .with_context(|| {
            format!(
                "opening database '{}'",
                config.storage.database_path.display()
            )
        })
}

async fn resolve_project(
    mailbox: &Mailbox,
    slug: &str,
) -> anyhow::Result<devinbox::model::Project> {
    mailbox
        .find_project_by_slug(slug)
        .await?
        .with_context(|| format!("no project with slug '{slug}'"))
}

async fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let mailbox = open_mailbox(config).await?;
    let blobs = Arc::new(
        AttachmentStore::open(&config.storage.attachment_root)
            .context("preparing attachment storage")?,
    );
    let resolver = TenantResolver::new(&config.smtp.base_domain, mailbox.clone());
    let ingestor = Arc::new(Ingestor::new(resolver, blobs, mailbox));

    let server = IngestServer::bind(&config.smtp, ingestor).await?;

    tokio::select! {
        result = server.run() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

async fn cmd_project(config: &Config, action: ProjectAction) -> anyhow::Result<()> {
    let mailbox = open_mailbox(config).await?;

    match action {
        ProjectAction::Add {
            slug,
            account,
            name,
        } => {
            let name = name.unwrap_or_else(|| slug.clone());
            let project = mailbox.create_project(&account, &slug, &name).await?;
            println!(
                "created project '{}'; mail to *@{}.{} will land here",
                project.slug, project.slug, config.smtp.base_domain
            );
        }
        ProjectAction::List => {
            let projects = mailbox.list_projects().await?;
            if projects.is_empty() {
                println!("no projects yet; create one with `devinbox project add <slug>`");
                return Ok(());
            }
            for project in projects {
                println!(
                    "{}  {:<20} {} ({})",
                    project.id, project.slug, project.name, project.account_id
                );
            }
        }
    }
    Ok(())
}

async fn cmd_messages(config: &Config, action: MessageAction) -> anyhow::Result<()> {
    let mailbox = open_mailbox(config).await?;

    match action {
        MessageAction::List {
            project,
            limit,
            offset,
        } => {
            let project = resolve_project(&mailbox, &project).await?;
            let page = mailbox.list_messages(project.id, limit, offset).await?;
            println!(
                "{} message(s) in '{}' (showing {} from offset {})",
                page.total,
                project.slug,
                page.messages.len(),
                page.offset
            );
            for message in &page.messages {
                let flag = if message.is_read { " " } else { "*" };
                println!(
                    "{flag} {}  {}  {:<30} {}",
                    message.id,
                    message.received_at.format("%Y-%m-%d %H:%M:%S"),
                    message.from_addr,
                    message.subject.as_deref().unwrap_or("(no subject)"),
                );
                if message.attachment_count > 0 {
                    println!("    [{} attachment(s)]", message.attachment_count);
                }
            }
        }
        MessageAction::Show { id, project } => {
            let project = resolve_project(&mailbox, &project).await?;
            let message = mailbox.fetch_message(project.id, id).await?;
            println!("From:     {}", message.from_addr);
            println!("To:       {}", message.to_recipients.join(", "));
            println!(
                "Subject:  {}",
                message.subject.as_deref().unwrap_or("(no subject)")
            );
            println!("Received: {}", message.received_at.to_rfc3339());
            println!("Read:     {}", message.is_read);
            if let Some(text) = &message.body_text {
                println!("\n{text}");
            } else if let Some(html) = &message.body_html {
                println!("\n(HTML only)\n{html}");
            }
            if !message.attachments.is_empty() {
                println!("\nAttachments:");
                for attachment in &message.attachments {
                    println!(
                        "  {}  {} ({}, {} bytes)",
                        attachment.id,
                        attachment.filename,
                        attachment.content_type,
                        attachment.size
                    );
                }
            }
        }
        MessageAction::Mark {
            id,
            project,
            unread,
        } => {
            let project = resolve_project(&mailbox, &project).await?;
            mailbox.set_read_flag(project.id, id, !unread).await?;
            println!("marked {}", if unread { "unread" } else { "read" });
        }
        MessageAction::Delete { id, project } => {
            let project = resolve_project(&mailbox, &project).await?;
            let blobs = AttachmentStore::open(&config.storage.attachment_root)?;
            let removed = mailbox.delete_message(project.id, id).await?;
            for attachment in &removed {
                blobs.remove(std::path::Path::new(&attachment.storage_path)).await;
            }
            println!("deleted message {id} ({} attachment(s))", removed.len());
        }
    }
    Ok(())
}

async fn cmd_attachments(config: &Config, action: AttachmentAction) -> anyhow::Result<()> {
    let mailbox = open_mailbox(config).await?;

    match action {
        AttachmentAction::Save {
            id,
            project,
            output,
        } => {
            let project = resolve_project(&mailbox, &project).await?;
            let attachment = mailbox.attachment(project.id, id).await?;

            tokio::fs::create_dir_all(&output).await?;
            let target = output.join(devinbox::storage::blob::sanitize_filename(
                &attachment.filename,
            ));
            tokio::fs::copy(&attachment.storage_path, &target)
                .await
                .with_context(|| format!("copying blob '{}'", attachment.storage_path))?;
            println!(
                "saved {} ({} bytes, {}) to {}",
                attachment.filename,
                attachment.size,
                attachment.content_type,
                target.display()
            );
        }
    }
    Ok(())
}
