//! Ranked pattern cascades that pull links and codes out of decoded bodies.
//!
//! Both extractors share one algorithm: try ordered pattern tiers from most
//! specific to most general and accept the first structurally valid
//! candidate. The tiers are static data so priorities can be read, tested,
//! and tuned without touching the scanning logic.

use std::sync::LazyLock;

use regex::Regex;

use crate::decode::DecodedMessage;

/// Result of running an extractor against one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    Link(String),
    /// Always exactly six ASCII digits.
    Code(String),
    NotFound,
}

/// Which link cascade to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Verification,
    Reset,
}

// ── Link pattern tiers ──────────────────────────────────────────────

const HREF_VERIFY: &str =
    r#"(?i)href=["']([^"']*(?:verify|confirm|validation|activate|token)[^"']*)["']"#;
const URL_VERIFY: &str =
    r#"(?i)(https?://[^\s<>"']*(?:verify|confirm|validation|activate|token)[^\s<>"']*)"#;
const HREF_RESET: &str = r#"(?i)href=["']([^"']*(?:reset|forgot|password|change)[^"']*)["']"#;
const HREF_REDIRECT: &str = r#"(?i)href=["']([^"']*(?:tracking|click)[^"']*)["']"#;
const URL_RESET: &str = r#"(?i)(https?://[^\s<>"']*(?:reset|forgot|password|change)[^\s<>"']*)"#;
const HREF_ANY: &str = r#"(?i)href=["']([^"']+)["']"#;

/// One tier of a link cascade.
enum LinkTier {
    /// Ranked regex; capture group 1 holds the URL candidate.
    Pattern(Regex),
    /// Any linked URL containing a caller-supplied trusted-domain substring.
    /// Skipped when the caller supplies none.
    TrustedDomain,
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("hardcoded pattern compiles")
}

static VERIFY_TIERS: LazyLock<Vec<LinkTier>> = LazyLock::new(|| {
    vec![
        LinkTier::Pattern(rx(HREF_VERIFY)),
        LinkTier::Pattern(rx(URL_VERIFY)),
        LinkTier::Pattern(rx(HREF_ANY)),
    ]
});

static RESET_TIERS: LazyLock<Vec<LinkTier>> = LazyLock::new(|| {
    vec![
        LinkTier::Pattern(rx(HREF_RESET)),
        LinkTier::Pattern(rx(HREF_REDIRECT)),
        LinkTier::TrustedDomain,
        LinkTier::Pattern(rx(URL_RESET)),
        LinkTier::Pattern(rx(HREF_ANY)),
    ]
});

static HREF_ANY_RX: LazyLock<Regex> = LazyLock::new(|| rx(HREF_ANY));

const VERIFY_DISQUALIFIERS: &[&str] = &["unsubscribe", "privacy", "terms"];
const RESET_DISQUALIFIERS: &[&str] = &["unsubscribe", "privacy", "terms", "support"];

impl LinkKind {
    fn tiers(self) -> &'static [LinkTier] {
        match self {
            LinkKind::Verification => &VERIFY_TIERS,
            LinkKind::Reset => &RESET_TIERS,
        }
    }

    fn disqualifiers(self) -> &'static [&'static str] {
        match self {
            LinkKind::Verification => VERIFY_DISQUALIFIERS,
            LinkKind::Reset => RESET_DISQUALIFIERS,
        }
    }
}

// ── Link extraction ─────────────────────────────────────────────────

/// Extract the first qualifying link from a message.
///
/// Scans `body_html` before `body_text` (links normally live in anchor
/// attributes). `domain_hints` feeds the trusted-domain tier of the reset
/// cascade; pass an empty slice to disable it.
pub fn extract_link(
    kind: LinkKind,
    domain_hints: &[String],
    message: &DecodedMessage,
) -> ExtractionResult {
    let content = format!("{} {}", message.body_html, message.body_text);

    for tier in kind.tiers() {
        let hit = match tier {
            LinkTier::Pattern(regex) => {
                first_passing(regex, &content, kind.disqualifiers(), None)
            }
            LinkTier::TrustedDomain if domain_hints.is_empty() => None,
            LinkTier::TrustedDomain => first_passing(
                &HREF_ANY_RX,
                &content,
                kind.disqualifiers(),
                Some(domain_hints),
            ),
        };
        if let Some(link) = hit {
            return ExtractionResult::Link(link);
        }
    }
    ExtractionResult::NotFound
}

/// First match of `regex` that survives cleaning and validation, in text
/// order. `required_substrings`, when given, must have at least one member
/// contained in the cleaned candidate.
fn first_passing(
    regex: &Regex,
    content: &str,
    disqualifiers: &[&str],
    required_substrings: Option<&[String]>,
) -> Option<String> {
    for caps in regex.captures_iter(content) {
        let raw = match caps.get(1).or_else(|| caps.get(0)) {
            Some(m) => m.as_str(),
            None => continue,
        };
        let link = clean_link(raw);
        if !qualifies(&link, disqualifiers) {
            continue;
        }
        if let Some(required) = required_substrings
            && !required.iter().any(|hint| link.contains(hint.as_str()))
        {
            continue;
        }
        return Some(link);
    }
    None
}

/// Normalize a raw pattern match into a candidate URL: drop quote and angle
/// characters (anywhere, not just surrounding), unescape `&amp;`, discard
/// `&gt;`/`&lt;`, undo the quoted-printable `=3D`, trim.
fn clean_link(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '<' | '>'))
        .collect();
    stripped
        .replace("&amp;", "&")
        .replace("&gt;", "")
        .replace("&lt;", "")
        .replace("=3D", "=")
        .replace("=3d", "=")
        .trim()
        .to_string()
}

fn qualifies(link: &str, disqualifiers: &[&str]) -> bool {
    link.starts_with("http") && !disqualifiers.iter().any(|d| link.contains(d))
}

// ── Code extraction ─────────────────────────────────────────────────

/// Ordered code patterns, contextual first; the bare 6-digit run is the
/// lowest-priority fallback so surrounding keywords keep their meaning.
static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)code[:\s]+(\d{6})",
        r"(?i)verification[:\s]+(\d{6})",
        r"(?i)reset[:\s]+(\d{6})",
        r"(?i)your\s+code\s+is[:\s]+(\d{6})",
        r"(?i)enter[:\s]+(\d{6})",
        r"(?i)use[:\s]+(\d{6})",
        r"\b(\d{6})\b",
    ]
    .iter()
    .map(|p| rx(p))
    .collect()
});

/// Extract a 6-digit code from a message.
///
/// Scans `body_text` before `body_html`; the space join keeps digit runs
/// from fusing across the boundary.
pub fn extract_code(message: &DecodedMessage) -> ExtractionResult {
    let content = format!("{} {}", message.body_text, message.body_html);

    for pattern in CODE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&content)
            && let Some(code) = caps.get(1)
        {
            return ExtractionResult::Code(code.as_str().to_string());
        }
    }
    ExtractionResult::NotFound
}

// ── Tests ───────────────────────────────────────────────────────────
