//! Turns the run configuration into a `videos.insert` request body for one video of a batch.

use crate::error::UploadError;
use crate::options::Config;
use crate::youtube_api::categories;
use crate::youtube_api::videos::{RecordingDetails, VideoInsertRequest, VideoSnippet, VideoStatus};
use std::collections::BTreeMap;
use std::path::Path;

/// Builds the request body for the video at `index` (zero-based) of a batch of `total` videos.
///
/// Fails with [`UploadError::InvalidCategory`] or [`UploadError::InvalidLocation`]; never
/// touches the network or the disk.
#[tracing::instrument(skip(config), level = "debug")]
pub fn build_request_body(
    config: &Config,
    video_path: &Path,
    index: usize,
    total: usize,
) -> Result<VideoInsertRequest, UploadError> {
    let title = if total > 1 {
        render_title(&config.title_template, &config.title, index + 1, total)
    } else {
        config.title.clone()
    };

    let category_id = config
        .category
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(|name| {
            categories::category_id(name)
                .map(|id| id.to_string())
                .ok_or_else(|| UploadError::InvalidCategory(name.to_string()))
        })
        .transpose()?;

    let recording_details = config
        .location
        .as_deref()
        .filter(|location| !location.is_empty())
        .map(parse_location)
        .transpose()?
        .map(|location| RecordingDetails { location });

    Ok(VideoInsertRequest {
        snippet: VideoSnippet {
            title,
            description: unescape(config.description.as_deref().unwrap_or("")),
            tags: config.tags.as_deref().map(split_tags).unwrap_or_default(),
            category_id,
        },
        status: VideoStatus {
            privacy_status: config.privacy.clone(),
        },
        recording_details,
    })
}

/// Substitutes `{title}`, `{n}` and `{total}` in a title template.
///
/// `{{` and `}}` stand for literal braces. A field may carry a width, optionally zero-padded,
/// as in `{n:02}` or `{title:20}`; numbers are right-aligned, the title left-aligned. Unknown
/// fields and any other format spec are copied through unchanged. Substitution is single-pass,
/// so braces inside the title itself are left alone.
pub fn render_title(template: &str, title: &str, n: usize, total: usize) -> String {
    let mut out = String::with_capacity(template.len() + title.len());
    let mut rest = template;
    while let Some(at) = rest.find(['{', '}']) {
        out.push_str(&rest[..at]);
        let brace = &rest[at..at + 1];
        let after = &rest[at + 1..];
        if brace == "}" || after.starts_with('{') {
            // `{{`, `}}`, or a stray `}`
            out.push_str(brace);
            rest = after.strip_prefix(brace).unwrap_or(after);
            continue;
        }
        let Some(close) = after.find('}') else {
            out.push_str(&rest[at..]);
            return out;
        };
        let field = &after[..close];
        let (name, spec) = field.split_once(':').unwrap_or((field, ""));
        let value = match name {
            "title" => Some((title.to_string(), false)),
            "n" => Some((n.to_string(), true)),
            "total" => Some((total.to_string(), true)),
            _ => None,
        };
        match value.and_then(|(value, numeric)| pad(&value, numeric, spec)) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(field);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Applies a `[0]width` format spec. `None` for specs we don't understand.
fn pad(value: &str, numeric: bool, spec: &str) -> Option<String> {
    if spec.is_empty() {
        return Some(value.to_string());
    }
    if !spec.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let zero = spec.starts_with('0');
    let width: usize = spec.parse().ok()?;
    Some(match (numeric, zero) {
        (true, true) => format!("{value:0>width$}"),
        (true, false) => format!("{value:>width$}"),
        (false, true) => format!("{value:0<width$}"),
        (false, false) => format!("{value:<width$}"),
    })
}

/// Splits a comma-separated tag list, trimming each entry.
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',').map(|t| t.trim().to_string()).collect()
}

/// Parses `latitude=VAL,longitude=VAL[,altitude=VAL]`.
pub fn parse_location(input: &str) -> Result<BTreeMap<String, f64>, UploadError> {
    let invalid = |reason: String| UploadError::InvalidLocation {
        input: input.to_string(),
        reason,
    };

    let mut location = BTreeMap::new();
    for pair in input.split(',').map(str::trim) {
        let mut kv = pair.split('=');
        let (Some(key), Some(value), None) = (kv.next(), kv.next(), kv.next()) else {
            return Err(invalid(format!("expected key=value, got {pair:?}")));
        };
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| invalid(format!("{value:?} is not a number")))?;
        location.insert(key.trim().to_string(), value);
    }
    Ok(location)
}

/// Decodes backslash escapes (`\n`, `\t`, `\xHH`, octal, ...) in user-supplied text.
///
/// Unknown escapes are kept verbatim, including the backslash.
pub fn unescape(input: &str) -> String {
    let mut bytes = Vec::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            None => bytes.push(b'\\'),
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('a') => bytes.push(0x07),
            Some('b') => bytes.push(0x08),
            Some('f') => bytes.push(0x0c),
            Some('v') => bytes.push(0x0b),
            Some('\\') => bytes.push(b'\\'),
            Some('\'') => bytes.push(b'\''),
            Some('"') => bytes.push(b'"'),
            // escaped line continuation
            Some('\n') => {}
            Some('x') => {
                let hex: String = std::iter::from_fn(|| chars.next_if(char::is_ascii_hexdigit))
                    .take(2)
                    .collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) if hex.len() == 2 => bytes.push(b),
                    _ => {
                        bytes.extend_from_slice(b"\\x");
                        bytes.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.next_if(|c| ('0'..='7').contains(c)) {
                        Some(d) => value = value * 8 + d.to_digit(8).unwrap_or(0),
                        None => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => {
                let mut buf = [0; 4];
                bytes.push(b'\\');
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
