//! Task facade: the operations UI-driving test glue actually calls.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::{MailboxClient, SearchQuery};
use crate::config::RetrievalOptions;
use crate::decode::DecodedMessage;
use crate::error::Error;
use crate::retrieval::{Intent, Retriever, RetrievalOutcome};

/// A retrieved link and the message it came from.
#[derive(Debug, Clone, Serialize)]
pub struct LinkRetrieval {
    pub link: String,
    pub message: DecodedMessage,
}

/// A retrieved 6-digit code and the message it came from.
#[derive(Debug, Clone, Serialize)]
pub struct CodeRetrieval {
    pub code: String,
    pub message: DecodedMessage,
}

/// One facade per mailbox client. "No mail" is `None` or `0`; `Err` is
/// reserved for configuration and credential failures.
pub struct MailTasks {
    client: Arc<dyn MailboxClient>,
    retriever: Retriever,
    cancel: CancellationToken,
}

impl MailTasks {
    pub fn new(client: Arc<dyn MailboxClient>) -> Self {
        Self {
            retriever: Retriever::new(client.clone()),
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Trusted domain substrings for ranking redirect-wrapped reset links.
    pub fn with_domain_hints(mut self, hints: Vec<String>) -> Self {
        self.retriever = self.retriever.with_domain_hints(hints);
        self
    }

    /// Cancelling the token stops any in-progress retrieval at its next
    /// attempt boundary.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wait for a signup verification email and return its link.
    pub async fn get_verification_email(
        &self,
        recipient: &str,
        options: &RetrievalOptions,
    ) -> Result<Option<LinkRetrieval>, Error> {
        let outcome = self
            .retriever
            .retrieve(Intent::VerificationLink, recipient, options, &self.cancel)
            .await?;
        Ok(into_link(outcome))
    }

    /// Wait for a password reset email and return its link.
    pub async fn get_password_reset_email(
        &self,
        recipient: &str,
        options: &RetrievalOptions,
    ) -> Result<Option<LinkRetrieval>, Error> {
        let outcome = self
            .retriever
            .retrieve(Intent::ResetLink, recipient, options, &self.cancel)
            .await?;
        Ok(into_link(outcome))
    }

    /// Wait for a password reset email and return its 6-digit code.
    pub async fn get_password_reset_code(
        &self,
        recipient: &str,
        options: &RetrievalOptions,
    ) -> Result<Option<CodeRetrieval>, Error> {
        let outcome = self
            .retriever
            .retrieve(Intent::ResetCode, recipient, options, &self.cancel)
            .await?;
        Ok(into_code(outcome))
    }

    /// Trash everything addressed to `recipient`, up to 100 messages.
    /// Returns the number trashed; individual transient failures are
    /// logged and skipped.
    pub async fn cleanup(&self, recipient: &str) -> Result<usize, Error> {
        let refs = self
            .client
            .list_candidates(&SearchQuery::all_mail_to(recipient))
            .await?;

        let mut trashed = 0usize;
        for r in &refs {
            match self.client.trash(&r.id).await {
                Ok(()) => trashed += 1,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => tracing::warn!(id = %r.id, error = %e, "trash failed, skipping"),
            }
        }
        tracing::info!(recipient, trashed, "mailbox cleaned");
        Ok(trashed)
    }
}

fn into_link(outcome: RetrievalOutcome) -> Option<LinkRetrieval> {
    match (outcome.link_or_code, outcome.message) {
        (Some(link), Some(message)) => Some(LinkRetrieval { link, message }),
        _ => None,
    }
}

fn into_code(outcome: RetrievalOutcome) -> Option<CodeRetrieval> {
    match (outcome.link_or_code, outcome.message) {
        (Some(code), Some(message)) => Some(CodeRetrieval { code, message }),
        _ => None,
    }
}

// ── Aliasing ────────────────────────────────────────────────────────

/// Derive a unique plus-addressed recipient from a base mailbox, so each
/// test run gets a fresh logical inbox inside one real account.
pub fn test_alias(base: &str) -> String {
    let (local, domain) = base.split_once('@').unwrap_or((base, ""));
    let millis = chrono::Utc::now().timestamp_millis();
    let salt: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(4)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    if domain.is_empty() {
        format!("{local}+auto{millis}{salt}")
    } else {
        format!("{local}+auto{millis}{salt}@{domain}")
    }
}

// ── Tests ───────────────────────────────────────────────────────────
