//! Mailbox access over the Gmail REST API.
//!
//! The [`MailboxClient`] trait is the seam between retrieval logic and the
//! provider: production code talks to Gmail through [`GmailClient`], tests
//! substitute scripted implementations.

use async_trait::async_trait;

use crate::auth::Authenticator;
use crate::error::MailboxError;
use crate::gmail_types::{Message, MessageList, MessageRef};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

// ── Search queries ──────────────────────────────────────────────────

/// A provider-independent description of a mailbox search. Rendered to the
/// provider's query syntax at request time.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub recipient: String,
    pub subject_terms: Vec<String>,
    pub sender_terms: Vec<String>,
    pub unread_only: bool,
    pub newer_than_minutes: Option<u32>,
    pub max_candidates: u32,
}

impl SearchQuery {
    /// Everything addressed to `recipient`, read or not, any age.
    pub fn all_mail_to(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            subject_terms: Vec::new(),
            sender_terms: Vec::new(),
            unread_only: false,
            newer_than_minutes: None,
            max_candidates: 100,
        }
    }

    /// Render to Gmail search syntax, e.g.
    /// `to:a@b.c (subject:(reset OR forgot) OR from:noreply) newer_than:10m`.
    /// Subject and sender terms are alternatives to each other; the other
    /// clauses all narrow the match.
    pub fn to_provider_query(&self) -> String {
        let mut clauses = vec![format!("to:{}", self.recipient)];

        let subject = match self.subject_terms.as_slice() {
            [] => None,
            terms => Some(format!("subject:({})", terms.join(" OR "))),
        };
        let sender = match self.sender_terms.as_slice() {
            [] => None,
            [one] => Some(format!("from:{one}")),
            terms => Some(format!("from:({})", terms.join(" OR "))),
        };
        match (subject, sender) {
            (Some(subject), Some(sender)) => clauses.push(format!("({subject} OR {sender})")),
            (Some(subject), None) => clauses.push(subject),
            (None, Some(sender)) => clauses.push(sender),
            (None, None) => {}
        }

        if self.unread_only {
            clauses.push("is:unread".to_string());
        }
        if let Some(minutes) = self.newer_than_minutes {
            clauses.push(format!("newer_than:{minutes}m"));
        }
        clauses.join(" ")
    }
}

// ── Client trait ────────────────────────────────────────────────────

#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Message ids matching the query, newest first, capped at
    /// `query.max_candidates`.
    async fn list_candidates(&self, query: &SearchQuery) -> Result<Vec<MessageRef>, MailboxError>;

    /// The full message, headers and body parts included.
    async fn fetch_full(&self, id: &str) -> Result<Message, MailboxError>;

    /// Clear the unread label so repeated polls stop matching the message.
    async fn mark_read(&self, id: &str) -> Result<(), MailboxError>;

    /// Move the message to the trash.
    async fn trash(&self, id: &str) -> Result<(), MailboxError>;
}

// ── Gmail implementation ────────────────────────────────────────────

pub struct GmailClient {
    http: reqwest::Client,
    auth: Authenticator,
    base_url: String,
}

impl GmailClient {
    pub fn new(auth: Authenticator) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API host (tests use a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MailboxClient for GmailClient {
    async fn list_candidates(&self, query: &SearchQuery) -> Result<Vec<MessageRef>, MailboxError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/users/me/messages", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("q", query.to_provider_query()),
                ("maxResults", query.max_candidates.to_string()),
            ])
            .send()
            .await?;
        let response = check(response).await?;
        let list: MessageList = response.json().await?;
        // An empty mailbox omits the array entirely.
        Ok(list.messages.unwrap_or_default())
    }

    async fn fetch_full(&self, id: &str) -> Result<Message, MailboxError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/users/me/messages/{id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/users/me/messages/{id}/modify", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn trash(&self, id: &str) -> Result<(), MailboxError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/users/me/messages/{id}/trash", self.base_url);
        let response = self.http.post(&url).bearer_auth(&token).send().await?;
        check(response).await?;
        Ok(())
    }
}

/// Map non-success responses onto the fatal/transient split: credential
/// problems are fatal, everything else is worth retrying.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, MailboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = format!("{status}: {}", snippet(&body));
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        Err(MailboxError::Auth { reason })
    } else {
        Err(MailboxError::Transient(reason))
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 200 {
        return trimmed.to_string();
    }
    let mut cut = 200;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

// ── Tests ───────────────────────────────────────────────────────────
