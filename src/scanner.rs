//! Reference scanning: a structural walk that finds every `$ref` string.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::pointer;
use crate::types::{is_document_path, is_url, REF_KEY};

/// Where a reference points, judged only by its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// `#...`, or a prefix that names no document.
    Internal,
    /// `<file>#...` where the file ends in a document suffix, or `<url>#...`.
    External,
}

/// One `$ref` occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub source_document: PathBuf,
    /// JSON Pointer to the mapping holding the `$ref` key.
    pub location: String,
    /// The reference exactly as written.
    pub raw: String,
    /// Everything before the first `#`, when non-empty.
    pub target_file: Option<String>,
    /// Everything after the first `#`; empty when there is no `#`.
    pub fragment: String,
    pub kind: RefKind,
}

impl Reference {
    /// Classify a raw reference string. Never fails: interpretation of the
    /// fragment is left to the resolver.
    pub fn parse(
        raw: &str,
        source_document: impl Into<PathBuf>,
        location: impl Into<String>,
    ) -> Self {
        let (target, fragment) = split_reference(raw);
        let target_file = (!target.is_empty()).then(|| target.to_string());
        let kind = if is_document_path(target) || is_url(target) {
            RefKind::External
        } else {
            RefKind::Internal
        };

        Self {
            source_document: source_document.into(),
            location: location.into(),
            raw: raw.to_string(),
            target_file,
            fragment: fragment.to_string(),
            kind,
        }
    }

    /// True if the target is a remote URL rather than a file in the set.
    pub fn is_remote(&self) -> bool {
        self.target_file.as_deref().map(is_url).unwrap_or(false)
    }
}

/// Split at the first `#` into (target, fragment).
pub fn split_reference(raw: &str) -> (&str, &str) {
    raw.split_once('#').unwrap_or((raw, ""))
}

/// Lazily yield every reference in `document`, in document order.
///
/// Each call starts a fresh walk; nothing is cached between calls.
pub fn scan<'a>(document: &'a Value, document_id: &'a Path) -> Scan<'a> {
    Scan {
        document_id,
        stack: vec![(String::new(), document)],
    }
}

/// Iterator returned by [`scan`].
#[derive(Debug, Clone)]
pub struct Scan<'a> {
    document_id: &'a Path,
    stack: Vec<(String, &'a Value)>,
}

impl<'a> Scan<'a> {
    fn push_children(&mut self, location: &str, value: &'a Value) {
        // Reverse order so children pop in document order.
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter().rev() {
                    if child.is_object() || child.is_array() {
                        self.stack.push((pointer::join(location, key), child));
                    }
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate().rev() {
                    if child.is_object() || child.is_array() {
                        self.stack.push((format!("{}/{}", location, index), child));
                    }
                }
            }
            _ => {}
        }
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = Reference;

    fn next(&mut self) -> Option<Reference> {
        while let Some((location, value)) = self.stack.pop() {
            self.push_children(&location, value);
            if let Some(Value::String(raw)) = value.get(REF_KEY) {
                return Some(Reference::parse(raw, self.document_id, location));
            }
        }
        None
    }
}
