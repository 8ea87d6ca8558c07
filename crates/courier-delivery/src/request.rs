//! Request body and header construction.
//!
//! Building a request is pure apart from the timestamp and request id, which
//! the caller passes in, and the HMAC over the finished body.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use courier_core::{PayloadMode, Settings};
use uuid::Uuid;

use crate::{
    context::PageMetadata,
    error::{DeliveryError, Result},
    signing,
};

/// Value of the `source` template field.
pub const SOURCE_TAG: &str = "courier";

/// Header carrying the request timestamp.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Page details feeding the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestInput<'a> {
    /// Canonicalized URL being sent.
    pub base_url: &'a str,
    /// Page title, empty if unknown.
    pub title: &'a str,
    /// Selected text, if it was gathered.
    pub selection: Option<&'a str>,
    /// Open Graph metadata, if it was gathered.
    pub page_metadata: Option<&'a PageMetadata>,
}

/// Finished request body and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltRequest {
    /// Request body.
    pub body: String,
    /// All headers, `Content-Type` included.
    pub headers: HashMap<String, String>,
}

/// Fields available to `{{key}}` placeholders.
pub type TemplateData<'a> = HashMap<&'static str, &'a str>;

/// Builds body and headers for `input` under `settings`.
///
/// `now` becomes both the `isoTimestamp` field and `X-Timestamp`;
/// `request_id` becomes `X-Request-ID`. Selection and page metadata only
/// reach the payload when the matching settings toggle is on.
///
/// # Errors
///
/// Returns `DeliveryError::Configuration` if the signing secret is rejected.
pub fn build_request(
    input: &RequestInput<'_>,
    settings: &Settings,
    now: DateTime<Utc>,
    request_id: Uuid,
) -> Result<BuiltRequest> {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let metadata = if settings.include_og_data { input.page_metadata } else { None };

    let data: TemplateData<'_> = HashMap::from([
        ("url", input.base_url),
        ("title", input.title),
        ("isoTimestamp", timestamp.as_str()),
        ("selection", if settings.include_selection { input.selection.unwrap_or("") } else { "" }),
        ("ogTitle", metadata.map_or("", |m| m.og_title.as_str())),
        ("ogType", metadata.map_or("", |m| m.og_type.as_str())),
        ("publishedTime", metadata.map_or("", |m| m.published_time.as_str())),
        ("source", SOURCE_TAG),
    ]);

    let (body, content_type) = match settings.payload_mode {
        PayloadMode::Json => (render_template(settings.template(), &data), "application/json"),
        PayloadMode::Plain => (input.base_url.to_string(), "text/plain"),
    };

    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());
    for header in &settings.custom_headers {
        if !header.name.is_empty() {
            headers.insert(header.name.clone(), header.value.clone());
        }
    }
    headers.insert(TIMESTAMP_HEADER.to_string(), timestamp.clone());
    headers.insert(REQUEST_ID_HEADER.to_string(), request_id.to_string());

    if let Some(secret) = settings.signing_secret() {
        let signature = signing::sign_body(body.as_bytes(), secret)
            .map_err(|e| DeliveryError::configuration(format!("cannot sign request: {e}")))?;
        headers.insert(SIGNATURE_HEADER.to_string(), signature);
    }

    Ok(BuiltRequest { body, headers })
}

/// Replaces every `{{key}}` in `template` with the JSON-escaped value of
/// `key` (surrounding whitespace ignored).
///
/// Unknown keys render as the empty string. A placeholder never spans a
/// line break.
pub fn render_template(template: &str, data: &TemplateData<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let close = after_open
            .find("}}")
            .filter(|&end| !after_open[..end].contains(is_line_terminator));

        match close {
            Some(end) => {
                out.push_str(&rest[..start]);
                if let Some(value) = data.get(after_open[..end].trim()) {
                    escape_json_into(value, &mut out);
                }
                rest = &after_open[end + 2..];
            },
            None => {
                out.push_str(&rest[..start + 2]);
                rest = after_open;
            },
        }
    }

    out.push_str(rest);
    out
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn escape_json_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}
