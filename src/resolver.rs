//! Reference resolution against the component registry.
//!
//! Resolution is a pure function of the reference and a registry snapshot:
//! no I/O, no caching, so the same inputs always classify the same way.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::FragmentError;
use crate::loader::normalize;
use crate::pointer;
use crate::registry::{Component, ComponentRegistry, RegisteredDocument};
use crate::scanner::{split_reference, Reference};
use crate::types::{is_url, Category, COMPONENTS_KEY};

/// The location a valid reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub document: PathBuf,
    pub pointer: String,
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    Valid(Target),
    MissingFile {
        path: PathBuf,
    },
    /// The document exists but has nothing at the fragment. `category` is
    /// set when the fragment addressed a component.
    MissingFragment {
        category: Option<Category>,
        name: String,
    },
    MalformedFragment {
        reason: FragmentError,
    },
    /// Same-document reference whose document is not in the registry.
    InternalUnverified,
    /// Remote documents are never fetched.
    RemoteUnverified {
        url: String,
    },
}

/// Classification used for grouping and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Valid,
    MissingFile,
    MissingFragment,
    MalformedFragment,
    InternalUnverified,
    RemoteUnverified,
}

impl Classification {
    pub const ALL: [Classification; 6] = [
        Classification::Valid,
        Classification::MissingFile,
        Classification::MissingFragment,
        Classification::MalformedFragment,
        Classification::InternalUnverified,
        Classification::RemoteUnverified,
    ];

    /// Broken references: these fail a validation run.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Classification::MissingFile
                | Classification::MissingFragment
                | Classification::MalformedFragment
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::MissingFile => "missing file",
            Classification::MissingFragment => "missing fragment",
            Classification::MalformedFragment => "malformed fragment",
            Classification::InternalUnverified => "internal, unverified",
            Classification::RemoteUnverified => "remote, unverified",
        }
    }
}

impl ResolutionResult {
    pub fn classification(&self) -> Classification {
        match self {
            ResolutionResult::Valid(_) => Classification::Valid,
            ResolutionResult::MissingFile { .. } => Classification::MissingFile,
            ResolutionResult::MissingFragment { .. } => Classification::MissingFragment,
            ResolutionResult::MalformedFragment { .. } => Classification::MalformedFragment,
            ResolutionResult::InternalUnverified => Classification::InternalUnverified,
            ResolutionResult::RemoteUnverified { .. } => Classification::RemoteUnverified,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ResolutionResult::Valid(_))
    }
}

/// Resolve a reference found in `base_document`.
///
/// External targets are resolved relative to the base document's directory
/// and must be registered documents. Internal references are checked only
/// when the base document itself is registered.
pub fn resolve(
    reference: &Reference,
    base_document: &Path,
    registry: &ComponentRegistry,
) -> ResolutionResult {
    let base = normalize(base_document);
    // Dispatch on the target text, not the kind: a prefix without a document
    // suffix is still another file.
    let (path, document) = match reference.target_file.as_deref() {
        Some(url) if is_url(url) => {
            return ResolutionResult::RemoteUnverified {
                url: url.to_string(),
            }
        }
        Some(file) => {
            let target = target_document(&base, file);
            match registry.document(&target) {
                Some(document) => (target, document),
                None => return ResolutionResult::MissingFile { path: target },
            }
        }
        None => match registry.document(&base) {
            Some(document) => (base, document),
            None => return ResolutionResult::InternalUnverified,
        },
    };

    let segments = match pointer::segments(&reference.fragment) {
        Ok(segments) => segments,
        Err(reason) => return ResolutionResult::MalformedFragment { reason },
    };

    match locate(document, &segments) {
        Located::Found => ResolutionResult::Valid(Target {
            document: path,
            pointer: reference.fragment.clone(),
        }),
        Located::NoComponent { category, name } => ResolutionResult::MissingFragment {
            category: Some(category),
            name,
        },
        Located::NoPath { category } => ResolutionResult::MissingFragment {
            category,
            name: reference.fragment.clone(),
        },
    }
}

/// Resolve a raw `allOf` member reference to the component it names.
///
/// Returns `None` unless the reference addresses exactly one registered
/// component; broken member references are reported by [`resolve`].
pub fn resolve_component<'r>(
    raw: &str,
    base_document: &Path,
    registry: &'r ComponentRegistry,
) -> Option<&'r Component> {
    let (file, fragment) = split_reference(raw);
    if is_url(file) {
        return None;
    }
    let target = if file.is_empty() {
        normalize(base_document)
    } else {
        target_document(base_document, file)
    };

    let document = registry.document(&target)?;
    let segments = pointer::segments(fragment).ok()?;
    let (category, name, rest) = component_address(document, &segments)?;
    if !rest.is_empty() {
        return None;
    }
    document.component(category, name)
}

/// Target document id for a file reference written in `base`.
pub fn target_document(base: &Path, file: &str) -> PathBuf {
    normalize(&base.parent().unwrap_or(Path::new("")).join(file))
}

enum Located {
    Found,
    NoComponent { category: Category, name: String },
    NoPath { category: Option<Category> },
}

/// Split segments into (category, component name, remaining path) when they
/// address a component of this document.
fn component_address<'s>(
    document: &RegisteredDocument,
    segments: &'s [String],
) -> Option<(Category, &'s str, &'s [String])> {
    if let Some(category) = document.category() {
        let (name, rest) = segments.split_first()?;
        return Some((category, name.as_str(), rest));
    }
    match segments {
        [section, category, name, rest @ ..] if section == COMPONENTS_KEY => {
            Some((Category::parse(category)?, name.as_str(), rest))
        }
        _ => None,
    }
}

fn locate(document: &RegisteredDocument, segments: &[String]) -> Located {
    if segments.is_empty() {
        return Located::Found;
    }

    match component_address(document, segments) {
        Some((category, name, rest)) => match document.component(category, name) {
            None => Located::NoComponent {
                category,
                name: name.to_string(),
            },
            Some(component) if pointer::navigate(&component.raw, rest).is_some() => {
                Located::Found
            }
            Some(_) => Located::NoPath {
                category: Some(category),
            },
        },
        None if pointer::navigate(document.content(), segments).is_some() => Located::Found,
        None => Located::NoPath { category: None },
    }
}
