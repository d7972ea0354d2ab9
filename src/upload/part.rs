//! Part classification
//!
//! A part is a file when its `Content-Disposition` carries a `filename` or
//! `filename*` parameter, even an empty one. `filename*` (RFC 5987) wins over
//! `filename` when both are present.

use http::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use percent_encoding::percent_decode_str;

/// Filename as it appeared on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFilename {
    /// `filename="photo.jpg"`
    Plain(String),
    /// `filename*=UTF-8''na%C3%AFve.jpg`
    Extended {
        charset: String,
        language: String,
        value: String,
    },
}

impl RawFilename {
    /// Parse the value of a `filename*` parameter
    pub fn extended(raw: &str) -> Self {
        let mut pieces = raw.splitn(3, '\'');
        match (pieces.next(), pieces.next(), pieces.next()) {
            (Some(charset), Some(language), Some(value)) => RawFilename::Extended {
                charset: charset.to_string(),
                language: language.to_string(),
                value: value.to_string(),
            },
            _ => RawFilename::Extended {
                charset: "UTF-8".to_string(),
                language: String::new(),
                value: raw.to_string(),
            },
        }
    }

    /// Single string form; `None` when empty or undecodable
    pub fn normalize(&self) -> Option<String> {
        let name = match self {
            RawFilename::Plain(name) => name.clone(),
            RawFilename::Extended { charset, value, .. } => {
                let bytes: Vec<u8> = percent_decode_str(value).collect();
                if charset.eq_ignore_ascii_case("utf-8") {
                    String::from_utf8(bytes).ok()?
                } else if charset.eq_ignore_ascii_case("iso-8859-1") {
                    bytes.iter().map(|&b| b as char).collect()
                } else {
                    String::from_utf8_lossy(&bytes).into_owned()
                }
            }
        };

        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// What a part carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKind {
    Field {
        name: String,
    },
    File {
        name: String,
        filename: Option<String>,
        content_type: Option<String>,
    },
}

impl PartKind {
    pub fn field_name(&self) -> &str {
        match self {
            PartKind::Field { name } | PartKind::File { name, .. } => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, PartKind::File { .. })
    }
}

/// Classify a part from its headers
pub fn classify(headers: &HeaderMap) -> PartKind {
    let disposition = headers
        .get(CONTENT_DISPOSITION)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    let mut name = String::new();
    let mut plain = None;
    let mut extended = None;
    for (key, value) in disposition_params(&disposition) {
        match key.as_str() {
            "name" => name = value,
            "filename" => plain = Some(RawFilename::Plain(value)),
            "filename*" => extended = Some(RawFilename::extended(&value)),
            _ => {}
        }
    }

    let raw = match (extended, plain) {
        (Some(extended), Some(plain)) => Some(extended.normalize().map_or(plain, RawFilename::Plain)),
        (extended, plain) => extended.or(plain),
    };

    match raw {
        Some(raw) => PartKind::File {
            name,
            filename: raw.normalize(),
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from),
        },
        None => PartKind::Field { name },
    }
}

/// `key=value` parameters after the disposition type. Keys are lower-cased,
/// quoted values unescaped.
fn disposition_params(header: &str) -> Vec<(String, String)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in header.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), unquote(value.trim())))
        })
        .collect()
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
