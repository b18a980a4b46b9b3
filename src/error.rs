//! Error types for loading, resolving and repairing references.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Category;

/// Errors while loading a document or building the component registry.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("cannot read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot walk {}: {source}", path.display())]
    WalkError {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid YAML in {}: {source}", path.display())]
    InvalidYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} must be a mapping of {category} components, got {actual}", path.display())]
    NotAMapping {
        path: PathBuf,
        category: Category,
        actual: String,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::WalkError { .. } => 3,
            _ => 2,
        }
    }
}

/// A `~` escape in a fragment segment that is neither `~0` nor `~1`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid escape at byte {position} in \"{segment}\": expected ~0 or ~1")]
pub struct DecodeError {
    pub segment: String,
    /// Byte offset of the offending `~`.
    pub position: usize,
}

/// Why a fragment could not be used to address a component.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentError {
    #[error("fragment \"{fragment}\" does not start with '/'")]
    NonCanonical { fragment: String },

    #[error("fragment \"{fragment}\": invalid escape at byte {position}")]
    InvalidEscape { fragment: String, position: usize },
}

/// Identifies one registered component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ComponentId {
    pub document: PathBuf,
    pub category: Category,
    pub name: String,
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#/{}", self.document.display(), self.name)
    }
}

/// An `allOf` chain that revisits a component already on the current path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cyclic allOf reference: {}", chain.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" -> "))]
pub struct CyclicReferenceError {
    /// Components from the first visit to the repeated one, inclusive.
    pub chain: Vec<ComponentId>,
}

/// Errors while repairing or persisting a document.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("{}: cannot locate reference \"{reference}\" at {location} in the source text", document.display())]
    Unlocated {
        document: PathBuf,
        location: String,
        reference: String,
    },

    #[error("cannot write backup {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize {}: {source}", document.display())]
    Serialize {
        document: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl RepairError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            RepairError::Backup { .. } | RepairError::Write { .. } => 3,
            _ => 2,
        }
    }
}
