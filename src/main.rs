//! `inbox-probe` -- Gmail-backed retrieval CLI for end-to-end auth tests.
//!
//! Subcommands:
//!
//! - `inbox-probe authorize` -- one-time OAuth consent flow, writes the token file.
//! - `inbox-probe verify-link <recipient>` -- wait for a verification email, print its link.
//! - `inbox-probe reset-link <recipient>` -- wait for a password reset email, print its link.
//! - `inbox-probe reset-code <recipient>` -- wait for a reset email, print its 6-digit code.
//! - `inbox-probe cleanup <recipient>` -- trash all mail addressed to the recipient.
//! - `inbox-probe alias <base>` -- derive a unique plus-addressed recipient.
//!
//! Retrieval subcommands print JSON on stdout (`null` when nothing arrived)
//! and exit 0 either way; configuration and credential failures go to stderr
//! with exit 1. Test glue branches on the output, not the exit status.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use inbox_probe::auth::Authenticator;
use inbox_probe::client::{GmailClient, MailboxClient};
use inbox_probe::config::{GmailConfig, RetrievalOptions};
use inbox_probe::tasks::{MailTasks, test_alias};

/// Email retrieval for end-to-end authentication tests.
#[derive(Parser)]
#[command(name = "inbox-probe", about = "Email retrieval for end-to-end auth tests", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the one-time OAuth consent flow and write the token file.
    Authorize {
        #[command(flatten)]
        files: FileArgs,
    },

    /// Wait for a signup verification email and print its link.
    VerifyLink(RetrievalArgs),

    /// Wait for a password reset email and print its link.
    ResetLink(ResetLinkArgs),

    /// Wait for a password reset email and print its 6-digit code.
    ResetCode(RetrievalArgs),

    /// Trash all mail addressed to a recipient.
    Cleanup {
        /// Recipient address to clean up.
        recipient: String,

        #[command(flatten)]
        files: FileArgs,
    },

    /// Derive a unique plus-addressed recipient from a base mailbox.
    Alias {
        /// Base mailbox, e.g. user@example.com.
        base: String,
    },
}

/// Credential file locations, overriding the environment.
#[derive(Args)]
struct FileArgs {
    /// OAuth client file downloaded from the provider console.
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Token file written by the authorize flow.
    #[arg(long, value_name = "PATH")]
    token: Option<PathBuf>,
}

impl FileArgs {
    fn config(&self) -> GmailConfig {
        let mut config = GmailConfig::from_env();
        if let Some(path) = &self.credentials {
            config.credentials_path = path.clone();
        }
        if let Some(path) = &self.token {
            config.token_path = path.clone();
        }
        config
    }
}

#[derive(Args)]
struct RetrievalArgs {
    /// Recipient address to watch.
    recipient: String,

    #[command(flatten)]
    files: FileArgs,

    /// Search attempts before giving up.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Milliseconds to sleep between attempts.
    #[arg(long)]
    retry_delay_ms: Option<u64>,
}

impl RetrievalArgs {
    fn options(&self) -> RetrievalOptions {
        RetrievalOptions::overridden(self.max_retries, self.retry_delay_ms)
    }
}

#[derive(Args)]
struct ResetLinkArgs {
    #[command(flatten)]
    retrieval: RetrievalArgs,

    /// Trusted domain substring for ranking redirect-wrapped links (repeatable).
    #[arg(long = "domain-hint", value_name = "SUBSTRING")]
    domain_hints: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Ctrl-C stops a running retrieval at its next attempt boundary.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping after the current attempt");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Authorize { files } => authorize(&files.config()).await?,
        Commands::VerifyLink(args) => {
            let tasks = tasks_for(&args.files.config(), Vec::new(), cancel)?;
            let result = tasks
                .get_verification_email(&args.recipient, &args.options())
                .await
                .context("verification email retrieval failed")?;
            print_json(&result)?;
        }
        Commands::ResetLink(args) => {
            let tasks = tasks_for(&args.retrieval.files.config(), args.domain_hints, cancel)?;
            let result = tasks
                .get_password_reset_email(&args.retrieval.recipient, &args.retrieval.options())
                .await
                .context("password reset email retrieval failed")?;
            print_json(&result)?;
        }
        Commands::ResetCode(args) => {
            let tasks = tasks_for(&args.files.config(), Vec::new(), cancel)?;
            let result = tasks
                .get_password_reset_code(&args.recipient, &args.options())
                .await
                .context("password reset code retrieval failed")?;
            print_json(&result)?;
        }
        Commands::Cleanup { recipient, files } => {
            let tasks = tasks_for(&files.config(), Vec::new(), cancel)?;
            let trashed = tasks
                .cleanup(&recipient)
                .await
                .context("mailbox cleanup failed")?;
            print_json(&serde_json::json!({ "trashed": trashed }))?;
        }
        Commands::Alias { base } => {
            print_json(&serde_json::json!({ "alias": test_alias(&base) }))?;
        }
    }

    Ok(())
}

fn tasks_for(
    config: &GmailConfig,
    domain_hints: Vec<String>,
    cancel: CancellationToken,
) -> anyhow::Result<MailTasks> {
    let auth = Authenticator::load(config).context("loading mail credentials")?;
    let client: Arc<dyn MailboxClient> = Arc::new(GmailClient::new(auth));
    Ok(MailTasks::new(client)
        .with_domain_hints(domain_hints)
        .with_cancellation(cancel))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Interactive consent flow: print the URL, read the pasted code, persist
/// the exchanged token.
async fn authorize(config: &GmailConfig) -> anyhow::Result<()> {
    let auth = Authenticator::without_token(config).context("loading OAuth client")?;
    let url = auth.authorize_url().context("building consent URL")?;

    println!("Open this URL in a browser and approve access:");
    println!("\n  {url}\n");
    print!("Paste the code from that page here: ");
    std::io::stdout().flush()?;

    let mut code = String::new();
    std::io::stdin()
        .read_line(&mut code)
        .context("reading consent code")?;
    let code = code.trim();
    anyhow::ensure!(!code.is_empty(), "no consent code entered");

    auth.exchange_code(code)
        .await
        .context("exchanging consent code")?;
    println!("Token stored at {}", config.token_path.display());
    Ok(())
}
