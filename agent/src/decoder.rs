//! Request decoding: turns the raw bytes of a session into a [`ServiceRequest`].
//!
//! Three encodings are accepted, tried in order:
//! 1. a JSON `ServiceRequest` document as the request body,
//! 2. a `Message` parameter in the query string or a form-encoded body,
//! 3. the legacy request line `GET /&SPEAK=<text>&@DONE@ HTTP/1.1`.
//!
//! The two legacy encodings become a single `speak` command for the default device.

use core::str;
use std::sync::LazyLock;

use autobridge_common::{DeviceCommand, ServiceRequest};
use regex::Regex;
use url::form_urlencoded;

use crate::error::DecodeError;

/// Query or form parameter carrying the text to speak.
const MESSAGE_PARAM: &str = "Message";

static LEGACY_SPEAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^GET /&SPEAK=(.*)&@DONE@ HTTP/1\.1$").expect("legacy pattern is valid")
});

/// The parts of a raw session the decoder looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawSession<'raw> {
    /// First line of the head, without the line terminator.
    pub request_line: Option<&'raw str>,
    pub headers: &'raw str,
    pub body: &'raw [u8],
}

impl<'raw> RawSession<'raw> {
    /// Splits raw bytes into head and body. A session without an HTTP head is all body.
    pub(crate) fn parse(raw: &'raw [u8]) -> Self {
        let trimmed = raw.trim_ascii_start();
        if trimmed.starts_with(b"{") {
            return Self {
                request_line: None,
                headers: "",
                body: trimmed,
            };
        }
        let (head, body) = match find_head_end(raw) {
            Some((head_len, body_start)) => (
                raw.get(..head_len).unwrap_or_default(),
                raw.get(body_start..).unwrap_or_default(),
            ),
            None => (raw, &[][..]),
        };
        let head = str::from_utf8(head).unwrap_or_default();
        let (request_line, headers) = head.split_once('\n').unwrap_or((head, ""));
        let request_line = request_line.trim_end_matches('\r');
        Self {
            request_line: (!request_line.is_empty()).then_some(request_line),
            headers,
            body,
        }
    }

    /// Method and path of the request line, with the query string removed.
    pub(crate) fn route(&self) -> Option<(&'raw str, &'raw str)> {
        let mut parts = self.request_line?.split(' ');
        let method = parts.next()?;
        let target = parts.next()?;
        let path = target.split_once('?').map_or(target, |(path, _)| path);
        Some((method, path))
    }

    fn query(&self) -> Option<&'raw str> {
        let target = self.request_line?.split(' ').nth(1)?;
        target.split_once('?').map(|(_, query)| query)
    }

    fn has_form_body(&self) -> bool {
        self.headers.lines().any(|line| {
            line.split_once(':').is_some_and(|(name, value)| {
                name.trim().eq_ignore_ascii_case("content-type")
                    && value
                        .trim()
                        .to_ascii_lowercase()
                        .starts_with("application/x-www-form-urlencoded")
            })
        })
    }
}

/// Returns `(head_len, body_start)` for the first blank line.
pub(crate) fn find_head_end(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    raw.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

fn message_param(encoded: &[u8]) -> Option<String> {
    form_urlencoded::parse(encoded)
        .find(|(key, _)| key == MESSAGE_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Decodes sessions into requests; legacy encodings target `default_device`.
#[derive(Debug, Clone)]
pub struct RequestDecoder {
    default_device: String,
}

impl RequestDecoder {
    pub fn new(default_device: impl Into<String>) -> Self {
        Self {
            default_device: default_device.into(),
        }
    }

    /// Decodes one session.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] if a JSON body violates the request schema and no
    /// legacy form is present, or [`DecodeError::Unrecognized`] if nothing matched.
    pub fn decode(&self, raw: &[u8]) -> Result<ServiceRequest, DecodeError> {
        self.decode_session(&RawSession::parse(raw))
    }

    pub(crate) fn decode_session(
        &self,
        session: &RawSession<'_>,
    ) -> Result<ServiceRequest, DecodeError> {
        let body = session.body.trim_ascii();

        let mut structured_error = None;
        if !body.is_empty() {
            match serde_json::from_slice::<ServiceRequest>(body) {
                Ok(request) => return Ok(request),
                Err(e) if body.starts_with(b"{") || body.starts_with(b"[") => {
                    structured_error = Some(e.to_string());
                }
                Err(_) => {}
            }
        }

        if let Some(message) = Self::legacy_message(session, body) {
            return Ok(ServiceRequest::single_command(
                self.default_device.clone(),
                DeviceCommand::speak(message),
            ));
        }

        Err(structured_error.map_or(DecodeError::Unrecognized, DecodeError::Malformed))
    }

    /// `body` is the session body with surrounding whitespace already trimmed.
    fn legacy_message(session: &RawSession<'_>, body: &[u8]) -> Option<String> {
        if let Some(message) = session.query().and_then(|query| message_param(query.as_bytes())) {
            return Some(message);
        }
        if session.has_form_body() {
            if let Some(message) = message_param(body) {
                return Some(message);
            }
        }
        let captures = LEGACY_SPEAK.captures(session.request_line?)?;
        captures.get(1).map(|text| text.as_str().to_string())
    }
}
