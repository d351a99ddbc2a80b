//! HTTP body codec
//!
//! [`parse_body`] turns the raw request bytes into a structured [`Body`]
//! based on the content type: strict JSON, URL-encoded key/value pairs, a
//! multipart/form-data stream, or raw passthrough for anything else.
//!
//! The multipart decoder is a byte-level finite state machine over the
//! boundary-delimited stream:
//!
//! ```text
//! Preamble → HeaderLine → InfoLine (skipped if no filename) → Payload
//!     ↑                                                          │
//!     └────────────── emit part on boundary ───────────────────┘
//!                                 │
//!                           closing boundary → Epilogue
//! ```

use crate::error::{BodyError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A decoded request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// `application/json`, strictly parsed
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` key/value pairs
    Form(HashMap<String, String>),
    /// `multipart/form-data` parts in stream order
    Multipart(Vec<Part>),
    /// Any other content type, passed through untouched
    Raw(Bytes),
}

/// One multipart part: a plain named field or an uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Field {
        name: String,
        data: String,
    },
    File {
        filename: String,
        content_type: String,
        data: Bytes,
    },
}

/// Decode `raw` according to `content_type`.
///
/// JSON and multipart failures surface as [`BodyError`] (a 4xx-equivalent
/// condition on the HTTP path); unknown content types are never an error.
pub fn parse_body(raw: &[u8], content_type: &str) -> Result<Body> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/json" => {
            let value = serde_json::from_slice(raw)
                .map_err(|e| BodyError::MalformedJson(e.to_string()))?;
            Ok(Body::Json(value))
        }
        "application/x-www-form-urlencoded" => Ok(Body::Form(parse_urlencoded(raw))),
        "multipart/form-data" => {
            let boundary = boundary_param(content_type).ok_or(BodyError::MissingBoundary)?;
            Ok(Body::Multipart(parse_multipart(raw, &boundary)?))
        }
        _ => Ok(Body::Raw(Bytes::copy_from_slice(raw))),
    }
}

/// Extract the boundary parameter from a multipart content type
fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Decode `a=1&b=two+words&c=%2Fpath` into a map. Repeated keys keep the
/// last value, matching the flat map the workers expect.
fn parse_urlencoded(raw: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let mut halves = pair.splitn(2, |&b| b == b'=');
        let key = halves.next().unwrap_or(&[]);
        let value = halves.next().unwrap_or(&[]);
        map.insert(percent_decode(key), percent_decode(value));
    }
    map
}

/// Percent-decode with `+` as space; invalid escapes pass through as-is
fn percent_decode(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(raw.get(i + 1)), hex_val(raw.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decoder states, named for where the cursor sits in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultipartState {
    /// Before the first boundary
    Preamble,
    /// At a part's Content-Disposition line
    HeaderLine,
    /// At a file part's Content-Type line
    InfoLine,
    /// Accumulating part bytes until the next boundary
    Payload,
    /// After the closing boundary
    Epilogue,
}

impl MultipartState {
    fn name(self) -> &'static str {
        match self {
            MultipartState::Preamble => "Preamble",
            MultipartState::HeaderLine => "HeaderLine",
            MultipartState::InfoLine => "InfoLine",
            MultipartState::Payload => "Payload",
            MultipartState::Epilogue => "Epilogue",
        }
    }
}

/// Fields of the part currently being decoded
#[derive(Default)]
struct PendingPart {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PendingPart {
    fn emit(self, data: &[u8]) -> Result<Part> {
        match (self.name, self.filename) {
            (_, Some(filename)) => Ok(Part::File {
                filename,
                content_type: self.content_type.unwrap_or_default(),
                data: Bytes::copy_from_slice(data),
            }),
            (Some(name), None) => Ok(Part::Field {
                name,
                data: String::from_utf8_lossy(data).into_owned(),
            }),
            (None, None) => Err(BodyError::MalformedPartHeader(
                "part has neither name nor filename".to_string(),
            )
            .into()),
        }
    }
}

/// Byte-level multipart decoder. `boundary` is the raw boundary token
/// from the content type, without the leading dashes.
fn parse_multipart(raw: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = [b"--", boundary.as_bytes()].concat();
    let mut parts = Vec::new();
    let mut state = MultipartState::Preamble;
    let mut pending = PendingPart::default();
    let mut pos = 0usize;

    loop {
        match state {
            MultipartState::Preamble => {
                // Everything before the first delimiter is ignored
                let at = find(raw, &delimiter, pos)
                    .ok_or_else(|| truncated(MultipartState::Preamble))?;
                pos = at + delimiter.len();
                state = after_boundary(raw, &mut pos, MultipartState::Preamble)?;
            }
            MultipartState::HeaderLine => {
                let line = read_line(raw, &mut pos, MultipartState::HeaderLine)?;
                let (name, filename) = parse_disposition(&line)?;
                pending = PendingPart {
                    name,
                    filename: filename.clone(),
                    content_type: None,
                };
                if filename.is_some() {
                    state = MultipartState::InfoLine;
                } else {
                    expect_blank(raw, &mut pos, MultipartState::HeaderLine)?;
                    state = MultipartState::Payload;
                }
            }
            MultipartState::InfoLine => {
                let line = read_line(raw, &mut pos, MultipartState::InfoLine)?;
                if line.to_ascii_lowercase().starts_with("content-type:") {
                    pending.content_type =
                        Some(line["content-type:".len()..].trim().to_string());
                }
                expect_blank(raw, &mut pos, MultipartState::InfoLine)?;
                state = MultipartState::Payload;
            }
            MultipartState::Payload => {
                // Payload runs until CRLF followed by the delimiter
                let terminator = [b"\r\n", delimiter.as_slice()].concat();
                let at = find(raw, &terminator, pos)
                    .ok_or_else(|| truncated(MultipartState::Payload))?;
                let part = std::mem::take(&mut pending).emit(&raw[pos..at])?;
                parts.push(part);
                pos = at + terminator.len();
                state = after_boundary(raw, &mut pos, MultipartState::Payload)?;
            }
            MultipartState::Epilogue => return Ok(parts),
        }
    }
}

/// Decide the next state after a boundary crossing: `--` closes the
/// stream, otherwise a CRLF leads into the next part's header line. A
/// stream ending at the boundary itself reports the state the cursor
/// came from.
fn after_boundary(raw: &[u8], pos: &mut usize, from: MultipartState) -> Result<MultipartState> {
    if raw[*pos..].starts_with(b"--") {
        return Ok(MultipartState::Epilogue);
    }
    if raw[*pos..].starts_with(b"\r\n") {
        *pos += 2;
        return Ok(MultipartState::HeaderLine);
    }
    Err(truncated(from))
}

fn truncated(state: MultipartState) -> crate::error::DispatchError {
    BodyError::TruncatedMultipart {
        state: state.name().to_string(),
    }
    .into()
}

/// Read one CRLF-terminated line as text, advancing the cursor past it
fn read_line(raw: &[u8], pos: &mut usize, state: MultipartState) -> Result<String> {
    let at = find(raw, b"\r\n", *pos).ok_or_else(|| truncated(state))?;
    let line = String::from_utf8_lossy(&raw[*pos..at]).into_owned();
    *pos = at + 2;
    Ok(line)
}

/// Consume the blank line separating part headers from the payload
fn expect_blank(raw: &[u8], pos: &mut usize, state: MultipartState) -> Result<()> {
    if raw[*pos..].starts_with(b"\r\n") {
        *pos += 2;
        Ok(())
    } else {
        Err(truncated(state))
    }
}

/// Parse a Content-Disposition line into (name, filename)
fn parse_disposition(line: &str) -> Result<(Option<String>, Option<String>)> {
    let lower = line.to_ascii_lowercase();
    if !lower.starts_with("content-disposition:") {
        return Err(BodyError::MalformedPartHeader(line.to_string()).into());
    }
    let mut name = None;
    let mut filename = None;
    for param in line.split(';').skip(1) {
        if let Some((key, value)) = param.trim().split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(value),
                "filename" => filename = Some(value),
                _ => {}
            }
        }
    }
    Ok((name, filename))
}

/// First occurrence of `needle` in `haystack` at or after `from`
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| from + at)
}
