//! JSON Pointer fragments (RFC 6901) as they appear after `#` in `$ref` strings.

use serde_json::Value;

use crate::error::{DecodeError, FragmentError};

/// Escape one path segment: `~` becomes `~0`, then `/` becomes `~1`.
///
/// The order matters: escaping `/` first would turn its `~1` into `~01`.
pub fn encode(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescape one path segment.
///
/// Equivalent to replacing `~1` with `/` and then `~0` with `~`, done in a
/// single pass so that a `~` not followed by `0` or `1` is rejected.
pub fn decode(segment: &str) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.char_indices();
    while let Some((position, c)) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some((_, '0')) => out.push('~'),
            Some((_, '1')) => out.push('/'),
            _ => {
                return Err(DecodeError {
                    segment: segment.to_string(),
                    position,
                })
            }
        }
    }
    Ok(out)
}

/// A fragment is canonical iff it is empty or begins with `/`.
pub fn is_canonical(fragment: &str) -> bool {
    fragment.is_empty() || fragment.starts_with('/')
}

/// Split a canonical fragment into decoded segments.
///
/// The empty fragment addresses the whole document and has no segments.
pub fn segments(fragment: &str) -> Result<Vec<String>, FragmentError> {
    if fragment.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = fragment.strip_prefix('/') else {
        return Err(FragmentError::NonCanonical {
            fragment: fragment.to_string(),
        });
    };

    let mut offset = 1;
    let mut out = Vec::new();
    for raw in rest.split('/') {
        let decoded = decode(raw).map_err(|e| FragmentError::InvalidEscape {
            fragment: fragment.to_string(),
            position: offset + e.position,
        })?;
        out.push(decoded);
        offset += raw.len() + 1;
    }
    Ok(out)
}

/// Walk decoded segments into a value.
///
/// Mappings are indexed by key, sequences by decimal index.
pub fn navigate<'a, S: AsRef<str>>(value: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Append an escaped segment to a pointer.
pub fn join(parent: &str, segment: &str) -> String {
    format!("{}/{}", parent, encode(segment))
}
