//! Bounded-retry polling loop that waits for an email and extracts from it.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::{MailboxClient, SearchQuery};
use crate::config::RetrievalOptions;
use crate::decode::{DecodedMessage, decode_message};
use crate::error::Error;
use crate::extract::{self, ExtractionResult, LinkKind};

// ── Intents and query profiles ──────────────────────────────────────

/// What the caller is waiting for. Each intent carries its own search
/// profile and extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    VerificationLink,
    ResetLink,
    ResetCode,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::VerificationLink => "verification-link",
            Intent::ResetLink => "reset-link",
            Intent::ResetCode => "reset-code",
        }
    }

    fn profile(self) -> &'static QueryProfile {
        match self {
            Intent::VerificationLink => &VERIFICATION_PROFILE,
            Intent::ResetLink => &RESET_LINK_PROFILE,
            Intent::ResetCode => &RESET_CODE_PROFILE,
        }
    }
}

/// Static per-intent search parameters. Data, not code: tuning a window or
/// keyword set never touches the loop below.
struct QueryProfile {
    subject_terms: &'static [&'static str],
    sender_terms: &'static [&'static str],
    unread_only: bool,
    window_minutes: Option<u32>,
    max_candidates: u32,
}

static VERIFICATION_PROFILE: QueryProfile = QueryProfile {
    subject_terms: &["verify", "verification", "confirm"],
    sender_terms: &[],
    unread_only: true,
    window_minutes: Some(5),
    max_candidates: 5,
};

// Reset mail often comes from a bare noreply sender with a vague subject,
// so the sender clause is an alternative, not a narrowing filter.
static RESET_LINK_PROFILE: QueryProfile = QueryProfile {
    subject_terms: &["reset", "forgot", "password"],
    sender_terms: &["noreply"],
    unread_only: false,
    window_minutes: Some(10),
    max_candidates: 10,
};

static RESET_CODE_PROFILE: QueryProfile = QueryProfile {
    subject_terms: &["reset", "forgot", "password", "code", "verification"],
    sender_terms: &[],
    unread_only: true,
    window_minutes: Some(5),
    max_candidates: 5,
};

fn query_for(intent: Intent, recipient: &str) -> SearchQuery {
    let profile = intent.profile();
    SearchQuery {
        recipient: recipient.to_string(),
        subject_terms: profile.subject_terms.iter().map(|s| s.to_string()).collect(),
        sender_terms: profile.sender_terms.iter().map(|s| s.to_string()).collect(),
        unread_only: profile.unread_only,
        newer_than_minutes: profile.window_minutes,
        max_candidates: profile.max_candidates,
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// What a retrieval produced. `found: false` means the mail never showed up
/// within the attempt budget; it is a normal outcome, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_or_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<DecodedMessage>,
}

impl RetrievalOutcome {
    pub fn hit(value: String, message: DecodedMessage) -> Self {
        Self {
            found: true,
            link_or_code: Some(value),
            message: Some(message),
        }
    }

    pub fn empty() -> Self {
        Self {
            found: false,
            link_or_code: None,
            message: None,
        }
    }
}

// ── Retriever ───────────────────────────────────────────────────────

/// Polls the mailbox until one candidate yields the intent's content or the
/// attempt budget runs out.
pub struct Retriever {
    client: Arc<dyn MailboxClient>,
    domain_hints: Vec<String>,
}

impl Retriever {
    pub fn new(client: Arc<dyn MailboxClient>) -> Self {
        Self {
            client,
            domain_hints: Vec::new(),
        }
    }

    /// Trusted domain substrings that let reset links wrapped in redirect
    /// URLs rank above the broad fallback tier.
    pub fn with_domain_hints(mut self, hints: Vec<String>) -> Self {
        self.domain_hints = hints;
        self
    }

    /// Run up to `options.max_retries` attempts, sleeping `retry_delay`
    /// between them. Auth failures abort immediately; transient mailbox
    /// errors cost the current attempt and nothing else. Cancellation is
    /// honored at attempt boundaries and during the inter-attempt sleep.
    pub async fn retrieve(
        &self,
        intent: Intent,
        recipient: &str,
        options: &RetrievalOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome, Error> {
        let query = query_for(intent, recipient);

        for attempt in 1..=options.max_retries {
            if cancel.is_cancelled() {
                tracing::info!(attempt, recipient, "retrieval cancelled");
                return Ok(RetrievalOutcome::empty());
            }
            tracing::info!(
                attempt,
                max = options.max_retries,
                recipient,
                intent = intent.as_str(),
                "searching mailbox"
            );

            if let Some((value, message)) = self.attempt_once(intent, &query).await? {
                // Best-effort: a failed label change never undoes a hit.
                if let Err(e) = self.client.mark_read(&message.id).await {
                    tracing::warn!(id = %message.id, error = %e, "could not mark message read");
                }
                tracing::info!(attempt, id = %message.id, intent = intent.as_str(), "content extracted");
                return Ok(RetrievalOutcome::hit(value, message));
            }

            if attempt < options.max_retries {
                tokio::select! {
                    _ = tokio::time::sleep(options.retry_delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::info!(attempt, recipient, "retrieval cancelled");
                        return Ok(RetrievalOutcome::empty());
                    }
                }
            }
        }

        tracing::info!(
            recipient,
            intent = intent.as_str(),
            attempts = options.max_retries,
            "retrieval exhausted, no matching mail"
        );
        Ok(RetrievalOutcome::empty())
    }

    /// One pass over the current candidates. `Ok(None)` means this attempt
    /// found nothing, for whatever reason short of a fatal auth failure.
    async fn attempt_once(
        &self,
        intent: Intent,
        query: &SearchQuery,
    ) -> Result<Option<(String, DecodedMessage)>, Error> {
        let candidates = match self.client.list_candidates(query).await {
            Ok(candidates) => candidates,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "listing candidates failed, will retry");
                return Ok(None);
            }
        };
        if candidates.is_empty() {
            return Ok(None);
        }
        tracing::debug!(count = candidates.len(), "candidates listed");

        for candidate in &candidates {
            let message = match self.client.fetch_full(&candidate.id).await {
                Ok(message) => message,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(id = %candidate.id, error = %e, "fetch failed, abandoning attempt");
                    return Ok(None);
                }
            };

            let decoded = match decode_message(&message) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::debug!(id = %candidate.id, error = %e, "skipping undecodable candidate");
                    continue;
                }
            };
            tracing::debug!(id = %decoded.id, subject = %decoded.subject, "evaluating candidate");

            let result = match intent {
                Intent::VerificationLink => {
                    extract::extract_link(LinkKind::Verification, &self.domain_hints, &decoded)
                }
                Intent::ResetLink => {
                    extract::extract_link(LinkKind::Reset, &self.domain_hints, &decoded)
                }
                Intent::ResetCode => extract::extract_code(&decoded),
            };
            match result {
                ExtractionResult::Link(value) | ExtractionResult::Code(value) => {
                    return Ok(Some((value, decoded)));
                }
                ExtractionResult::NotFound => {}
            }
        }
        Ok(None)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
