//! Integration tests for the polling orchestrator and the task facade.
//!
//! Each test drives the real retrieval loop against a scripted mailbox
//! client and asserts on exact call counts, outcomes, and short-circuits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use inbox_probe::client::{MailboxClient, SearchQuery};
use inbox_probe::config::RetrievalOptions;
use inbox_probe::error::{Error, MailboxError};
use inbox_probe::gmail_types::{Header, Message, MessagePart, MessageRef, PartBody};
use inbox_probe::retrieval::{Intent, Retriever};
use inbox_probe::tasks::MailTasks;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Scripted mailbox client ─────────────────────────────────────────

/// Mailbox client driven by a per-call script. Every method counts its
/// calls; list responses are consumed in order, then fall back to "empty".
struct ScriptedClient {
    lists: AtomicUsize,
    fetches: AtomicUsize,
    trashes: AtomicUsize,
    marked: Mutex<Vec<String>>,
    list_script: Mutex<VecDeque<Result<Vec<MessageRef>, MailboxError>>>,
    messages: Vec<Message>,
    fail_mark_read: bool,
    trash_transient_ids: Vec<String>,
    trash_auth_id: Option<String>,
}

impl ScriptedClient {
    fn new(list_script: Vec<Result<Vec<MessageRef>, MailboxError>>) -> Self {
        Self {
            lists: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            trashes: AtomicUsize::new(0),
            marked: Mutex::new(Vec::new()),
            list_script: Mutex::new(list_script.into()),
            messages: Vec::new(),
            fail_mark_read: false,
            trash_transient_ids: Vec::new(),
            trash_auth_id: None,
        }
    }

    fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn trash_calls(&self) -> usize {
        self.trashes.load(Ordering::SeqCst)
    }

    fn marked_ids(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailboxClient for ScriptedClient {
    async fn list_candidates(&self, _query: &SearchQuery) -> Result<Vec<MessageRef>, MailboxError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.list_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn fetch_full(&self, id: &str) -> Result<Message, MailboxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MailboxError::Transient(format!("no scripted message {id}")))
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        self.marked.lock().unwrap().push(id.to_string());
        if self.fail_mark_read {
            return Err(MailboxError::Transient("label change failed".to_string()));
        }
        Ok(())
    }

    async fn trash(&self, id: &str) -> Result<(), MailboxError> {
        self.trashes.fetch_add(1, Ordering::SeqCst);
        if self.trash_auth_id.as_deref() == Some(id) {
            return Err(MailboxError::Auth {
                reason: "token revoked".to_string(),
            });
        }
        if self.trash_transient_ids.iter().any(|t| t == id) {
            return Err(MailboxError::Transient("rate limited".to_string()));
        }
        Ok(())
    }
}

// ── Message builders ────────────────────────────────────────────────

fn message_ref(id: &str) -> MessageRef {
    MessageRef {
        id: id.to_string(),
        thread_id: Some(format!("t-{id}")),
    }
}

fn message_with_body(id: &str, subject: &str, mime_type: &str, body: &str) -> Message {
    Message {
        id: id.to_string(),
        internal_date: Some("1700000000000".to_string()),
        payload: Some(MessagePart {
            mime_type: Some(mime_type.to_string()),
            headers: Some(vec![
                Header {
                    name: "Subject".to_string(),
                    value: subject.to_string(),
                },
                Header {
                    name: "From".to_string(),
                    value: "noreply@portal.example".to_string(),
                },
            ]),
            body: Some(PartBody {
                data: Some(URL_SAFE.encode(body)),
                size: Some(body.len() as i64),
            }),
            parts: None,
        }),
    }
}

fn verification_message(id: &str) -> Message {
    message_with_body(
        id,
        "Verify your account",
        "text/html",
        r#"<p>Welcome!</p><a href="https://portal.example/verify?token=abc123&amp;tenant=t1">Verify</a>"#,
    )
}

fn code_message(id: &str) -> Message {
    message_with_body(id, "Password reset", "text/plain", "Your code is: 123456")
}

/// A payload whose parts carry no data at all; decoding must reject it.
fn undecodable_message(id: &str) -> Message {
    Message {
        id: id.to_string(),
        internal_date: Some("1700000000000".to_string()),
        payload: Some(MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            headers: Some(vec![Header {
                name: "Subject".to_string(),
                value: "Broken".to_string(),
            }]),
            body: None,
            parts: Some(Vec::new()),
        }),
    }
}

fn fast(max_retries: u32) -> RetrievalOptions {
    RetrievalOptions {
        max_retries,
        retry_delay: Duration::ZERO,
    }
}

// ── Orchestrator properties ─────────────────────────────────────────

#[tokio::test]
async fn exhaustion_uses_exactly_the_attempt_budget() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let retriever = Retriever::new(client.clone());

        let outcome = retriever
            .retrieve(
                Intent::VerificationLink,
                "u@example.com",
                &fast(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.found);
        assert_eq!(client.list_calls(), 3);
        assert_eq!(client.fetch_calls(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn arrival_on_a_later_attempt_stops_the_loop() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(
            ScriptedClient::new(vec![Ok(Vec::new()), Ok(vec![message_ref("m1")])])
                .with_message(verification_message("m1")),
        );
        let retriever = Retriever::new(client.clone());

        let outcome = retriever
            .retrieve(
                Intent::VerificationLink,
                "u@example.com",
                &fast(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.found);
        assert_eq!(
            outcome.link_or_code.as_deref(),
            Some("https://portal.example/verify?token=abc123&tenant=t1")
        );
        assert_eq!(outcome.message.unwrap().id, "m1");
        // Budget was 10; arrival on attempt 2 must stop the loop there.
        assert_eq!(client.list_calls(), 2);
        assert_eq!(client.fetch_calls(), 1);
        assert_eq!(client.marked_ids(), vec!["m1".to_string()]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn auth_failure_short_circuits_without_retries() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(ScriptedClient::new(vec![Err(MailboxError::Auth {
            reason: "invalid credentials".to_string(),
        })]));
        let retriever = Retriever::new(client.clone());

        let err = retriever
            .retrieve(
                Intent::ResetLink,
                "u@example.com",
                &fast(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Mailbox(MailboxError::Auth { .. })));
        assert_eq!(client.list_calls(), 1);
        assert_eq!(client.fetch_calls(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transient_failures_cost_only_their_attempt() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(MailboxError::Transient("502 bad gateway".to_string())),
            Ok(Vec::new()),
            Ok(Vec::new()),
        ]));
        let retriever = Retriever::new(client.clone());

        let outcome = retriever
            .retrieve(
                Intent::ResetCode,
                "u@example.com",
                &fast(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.found);
        // The transient attempt counts like any other: three total.
        assert_eq!(client.list_calls(), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn pre_cancelled_token_skips_all_attempts() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let retriever = Retriever::new(client.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = retriever
            .retrieve(Intent::VerificationLink, "u@example.com", &fast(10), &cancel)
            .await
            .unwrap();

        assert!(!outcome.found);
        assert_eq!(client.list_calls(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancellation_interrupts_the_retry_sleep() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let retriever = Retriever::new(client.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let options = RetrievalOptions {
            max_retries: 5,
            retry_delay: Duration::from_secs(30),
        };
        let started = std::time::Instant::now();
        let outcome = retriever
            .retrieve(Intent::ResetLink, "u@example.com", &options, &cancel)
            .await
            .unwrap();

        assert!(!outcome.found);
        assert_eq!(client.list_calls(), 1);
        // Must return as soon as the token fires, not after the 30s delay.
        assert!(started.elapsed() < Duration::from_secs(2));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn undecodable_candidates_are_skipped() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(
            ScriptedClient::new(vec![Ok(vec![message_ref("m1"), message_ref("m2")])])
                .with_message(undecodable_message("m1"))
                .with_message(code_message("m2")),
        );
        let retriever = Retriever::new(client.clone());

        let outcome = retriever
            .retrieve(
                Intent::ResetCode,
                "u@example.com",
                &fast(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.found);
        assert_eq!(outcome.link_or_code.as_deref(), Some("123456"));
        assert_eq!(client.fetch_calls(), 2);
        assert_eq!(client.marked_ids(), vec!["m2".to_string()]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn mark_read_failure_keeps_the_hit() {
    timeout(TEST_TIMEOUT, async {
        let mut client =
            ScriptedClient::new(vec![Ok(vec![message_ref("m1")])]).with_message(verification_message("m1"));
        client.fail_mark_read = true;
        let client = Arc::new(client);
        let retriever = Retriever::new(client.clone());

        let outcome = retriever
            .retrieve(
                Intent::VerificationLink,
                "u@example.com",
                &fast(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.found);
        assert_eq!(client.marked_ids(), vec!["m1".to_string()]);
    })
    .await
    .expect("test timed out");
}

// ── Task facade ─────────────────────────────────────────────────────

#[tokio::test]
async fn facade_returns_code_payload() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(
            ScriptedClient::new(vec![Ok(vec![message_ref("m1")])]).with_message(code_message("m1")),
        );
        let tasks = MailTasks::new(client);

        let result = tasks
            .get_password_reset_code("u@example.com", &fast(1))
            .await
            .unwrap()
            .expect("code should be found");

        assert_eq!(result.code, "123456");
        assert_eq!(result.message.subject, "Password reset");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn facade_maps_miss_to_none() {
    timeout(TEST_TIMEOUT, async {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let tasks = MailTasks::new(client);

        let result = tasks
            .get_verification_email("u@example.com", &fast(2))
            .await
            .unwrap();
        assert!(result.is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cleanup_counts_hits_and_skips_transient_failures() {
    timeout(TEST_TIMEOUT, async {
        let mut client = ScriptedClient::new(vec![Ok(vec![
            message_ref("m1"),
            message_ref("m2"),
            message_ref("m3"),
        ])]);
        client.trash_transient_ids = vec!["m2".to_string()];
        let client = Arc::new(client);
        let tasks = MailTasks::new(client.clone());

        let trashed = tasks.cleanup("u@example.com").await.unwrap();

        assert_eq!(trashed, 2);
        assert_eq!(client.trash_calls(), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cleanup_propagates_auth_failures() {
    timeout(TEST_TIMEOUT, async {
        let mut client =
            ScriptedClient::new(vec![Ok(vec![message_ref("m1"), message_ref("m2")])]);
        client.trash_auth_id = Some("m1".to_string());
        let client = Arc::new(client);
        let tasks = MailTasks::new(client.clone());

        let err = tasks.cleanup("u@example.com").await.unwrap_err();
        assert!(matches!(err, Error::Mailbox(MailboxError::Auth { .. })));
        assert_eq!(client.trash_calls(), 1);
    })
    .await
    .expect("test timed out");
}
