//! OpenAPI Reference Checker
//!
//! Validation and repair of `$ref` references in an OpenAPI description
//! split across many YAML/JSON documents.
//!
//! The pipeline: load a [`DocumentSet`], build a [`ComponentRegistry`] from
//! it, [`scan`] each document for references, and [`resolve`] each one. The
//! [`validate`] entry point runs all of that and returns a [`Report`].
//!
//! # Example
//!
//! ```
//! use oas_refcheck::{validate, Category, ComponentRegistry, Document, DocumentSet, ValidateOptions};
//! use serde_json::json;
//!
//! let set: DocumentSet = [
//!     Document::new("components/schemas.yaml", json!({ "Widget": { "type": "object" } }))
//!         .with_category(Category::Schemas),
//!     Document::new(
//!         "paths/widgets.yaml",
//!         json!({ "get": { "responses": { "200": {
//!             "$ref": "../components/schemas.yaml#/Widget"
//!         } } } }),
//!     ),
//! ]
//! .into_iter()
//! .collect();
//!
//! let registry = ComponentRegistry::from_documents(&set).unwrap();
//! let report = validate(&set, &registry, &ValidateOptions::default());
//! assert!(report.is_ok());
//! ```
//!
//! # Classifications
//!
//! | Result | Fails the run |
//! |--------|---------------|
//! | `valid` | no |
//! | `missing_file` | yes |
//! | `missing_fragment` | yes |
//! | `malformed_fragment` | yes |
//! | `internal_unverified` | no |
//! | `remote_unverified` | no |
//!
//! A malformed fragment is almost always a missing `/` after `#`
//! (`schemas.yaml#Widget`); [`repair`] fixes exactly that.

mod error;
mod inheritance;
mod loader;
pub mod pointer;
mod registry;
mod repair;
mod resolver;
mod scanner;
mod types;
mod validator;

pub use error::{
    ComponentId, CyclicReferenceError, DecodeError, FragmentError, LoadError, RepairError,
};
pub use inheritance::{has_component_field, has_field, FieldPresence};
pub use loader::{
    default_category, load_document, load_document_str, load_tree, normalize, Document,
    DocumentSet, LoadFailure, LoadOptions, LoadedTree,
};
pub use registry::{Component, ComponentRegistry, Definition, Duplicate, Member, RegisteredDocument};
pub use repair::{
    backup_path, needs_repair, persist, repair, repair_document, repair_value, Change,
    DocumentRepair, Repair,
};
pub use resolver::{resolve, resolve_component, target_document, Classification, ResolutionResult, Target};
pub use scanner::{scan, split_reference, RefKind, Reference, Scan};
pub use types::{is_url, Category};
pub use validator::{
    field_coverage, lint_definitions, security_gaps, validate, ComponentCoverage, Coverage,
    FieldCoverage, Finding, ModuleCoverage, Report, SchemaWarning, SecurityGap, ValidateOptions,
};
