//! Decodes raw provider payloads into a normalized `DecodedMessage`.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::DecodeError;
use crate::gmail_types::{Message, MessagePart};

/// Body transport is base64url; padding varies by provider path, so accept
/// both padded and unpadded data.
const BODY_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A provider message normalized for extraction. Immutable once built; owned
/// by the retrieval call that decoded it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub body_text: String,
    pub body_html: String,
    pub received_at: DateTime<Utc>,
}

/// Shape of a message payload, classified once before decoding.
enum BodyShape<'a> {
    /// Single-part message carrying its own inline body.
    Inline { mime_type: &'a str, data: &'a str },
    /// Multipart container; bodies live in (possibly nested) parts.
    Multipart(&'a [MessagePart]),
    /// Nothing decodable at all.
    Empty,
}

fn classify(payload: &MessagePart) -> BodyShape<'_> {
    if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
        return BodyShape::Inline {
            mime_type: payload.mime_type.as_deref().unwrap_or(""),
            data,
        };
    }
    if let Some(parts) = payload.parts.as_deref()
        && !parts.is_empty()
    {
        return BodyShape::Multipart(parts);
    }
    BodyShape::Empty
}

/// Decode a raw provider message into a `DecodedMessage`.
///
/// Fails only when the message yields neither a text nor an html body; that
/// is fatal for this message, not for the retrieval, and callers skip it
/// and move to the next candidate.
pub fn decode_message(raw: &Message) -> Result<DecodedMessage, DecodeError> {
    let payload = raw
        .payload
        .as_ref()
        .ok_or_else(|| DecodeError::NoPayload { id: raw.id.clone() })?;

    let mut text: Option<String> = None;
    let mut html: Option<String> = None;

    match classify(payload) {
        BodyShape::Inline { mime_type, data } => {
            if let Some(decoded) = decode_part_data(data) {
                if mime_type.eq_ignore_ascii_case("text/html") {
                    html = Some(decoded);
                } else {
                    text = Some(decoded);
                }
            }
        }
        BodyShape::Multipart(parts) => {
            for part in parts {
                collect_bodies(part, &mut text, &mut html);
            }
        }
        BodyShape::Empty => {}
    }

    let body_text = text.unwrap_or_default();
    let body_html = html.unwrap_or_default();
    if body_text.is_empty() && body_html.is_empty() {
        return Err(DecodeError::EmptyBody { id: raw.id.clone() });
    }

    Ok(DecodedMessage {
        id: raw.id.clone(),
        subject: header_value(payload, "Subject").unwrap_or_default(),
        from: header_value(payload, "From").unwrap_or_default(),
        body_text,
        body_html,
        received_at: parse_internal_date(raw.internal_date.as_deref()),
    })
}

/// Walk a part tree depth-first, keeping the first `text/plain` and the
/// first `text/html` body encountered. Nested containers are descended.
fn collect_bodies(part: &MessagePart, text: &mut Option<String>, html: &mut Option<String>) {
    if text.is_some() && html.is_some() {
        return;
    }

    let mime = part.mime_type.as_deref().unwrap_or("");
    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        if mime.eq_ignore_ascii_case("text/plain") && text.is_none() {
            *text = decode_part_data(data);
        } else if mime.eq_ignore_ascii_case("text/html") && html.is_none() {
            *html = decode_part_data(data);
        }
    }

    if let Some(children) = &part.parts {
        for child in children {
            collect_bodies(child, text, html);
        }
    }
}

/// Decode base64url part data to text. Returns `None` for undecodable or
/// empty data; the part then contributes no body.
fn decode_part_data(data: &str) -> Option<String> {
    let bytes = BODY_B64.decode(data).ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn header_value(payload: &MessagePart, name: &str) -> Option<String> {
    payload
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// `internalDate` is epoch milliseconds as a decimal string; anything
/// missing or unparsable collapses to the epoch.
fn parse_internal_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

// ── Tests ───────────────────────────────────────────────────────────
