//! Validation run over a whole document set.
//!
//! Scans every document, resolves every reference, and assembles a
//! [`Report`]. Optional checks ride along: field coverage per schema module,
//! duplicate component names, meta-validation of schema definitions, and
//! operations without an explicit `security` requirement.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::error::ComponentId;
use crate::inheritance::{has_component_field, FieldPresence};
use crate::loader::{DocumentSet, LoadFailure};
use crate::registry::{ComponentRegistry, Duplicate};
use crate::resolver::{resolve, Classification, ResolutionResult};
use crate::scanner::{scan, Reference};
use crate::types::{Category, REF_KEY};

/// Options for a validation run.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Field every schema module must carry on at least one component.
    pub required_field: Option<String>,
    /// Check each schema definition against the JSON Schema meta-schema.
    pub lint_schemas: bool,
    /// Report path operations that declare no `security`.
    pub check_security: bool,
}

impl ValidateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required_field(mut self, field: impl Into<String>) -> Self {
        self.required_field = Some(field.into());
        self
    }

    pub fn lint_schemas(mut self, lint: bool) -> Self {
        self.lint_schemas = lint;
        self
    }

    pub fn check_security(mut self, check: bool) -> Self {
        self.check_security = check;
        self
    }
}

/// One reference and how it resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub reference: Reference,
    pub result: ResolutionResult,
}

impl Finding {
    pub fn classification(&self) -> Classification {
        self.result.classification()
    }
}

/// Field lookup outcome for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "coverage", rename_all = "snake_case")]
pub enum Coverage {
    Present { depth: usize },
    Absent,
    /// The `allOf` chain loops; the field counts as absent.
    Cyclic { chain: Vec<ComponentId> },
}

impl Coverage {
    pub fn is_present(&self) -> bool {
        matches!(self, Coverage::Present { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentCoverage {
    pub name: String,
    #[serde(flatten)]
    pub coverage: Coverage,
}

/// Coverage of one schema module (one schema document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleCoverage {
    pub document: PathBuf,
    /// At least one component carries the field.
    pub compliant: bool,
    pub components: Vec<ComponentCoverage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCoverage {
    pub field: String,
    pub modules: Vec<ModuleCoverage>,
}

impl FieldCoverage {
    /// Modules where no component carries the field.
    pub fn gaps(&self) -> impl Iterator<Item = &ModuleCoverage> {
        self.modules.iter().filter(|m| !m.compliant)
    }

    /// Components whose `allOf` chain loops.
    pub fn cycles(&self) -> impl Iterator<Item = (&ModuleCoverage, &ComponentCoverage)> {
        self.modules.iter().flat_map(|module| {
            module
                .components
                .iter()
                .filter(|c| matches!(c.coverage, Coverage::Cyclic { .. }))
                .map(move |c| (module, c))
        })
    }
}

/// A schema definition that is not a valid JSON Schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaWarning {
    pub component: ComponentId,
    pub message: String,
}

/// A path operation with no `security` of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityGap {
    pub document: PathBuf,
    pub path: String,
    pub method: String,
}

/// Result of a validation run.
#[derive(Debug, Serialize)]
pub struct Report {
    pub documents_checked: usize,
    pub references: usize,
    pub counts: BTreeMap<Classification, usize>,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub load_failures: Vec<LoadFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<Duplicate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_coverage: Option<FieldCoverage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema_warnings: Vec<SchemaWarning>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_gaps: Vec<SecurityGap>,
}

impl Report {
    /// Attach documents that failed to load; they fail the run.
    pub fn with_load_failures(mut self, failures: Vec<LoadFailure>) -> Self {
        self.load_failures = failures;
        self
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(&classification).copied().unwrap_or(0)
    }

    /// Number of broken references.
    pub fn failures(&self) -> usize {
        self.counts
            .iter()
            .filter(|(class, _)| class.is_failure())
            .map(|(_, n)| n)
            .sum()
    }

    /// Returns true if no reference is broken and every document loaded.
    pub fn is_ok(&self) -> bool {
        self.failures() == 0 && self.load_failures.is_empty()
    }

    /// Like [`Report::is_ok`]; in strict mode coverage gaps, cycles, schema
    /// warnings and security gaps fail the run too.
    pub fn is_clean(&self, strict: bool) -> bool {
        if !self.is_ok() {
            return false;
        }
        if !strict {
            return true;
        }
        let coverage_ok = self
            .field_coverage
            .as_ref()
            .map(|c| c.gaps().next().is_none() && c.cycles().next().is_none())
            .unwrap_or(true);
        coverage_ok && self.schema_warnings.is_empty() && self.security_gaps.is_empty()
    }

    /// First `n` findings with this classification, in document order.
    pub fn examples(&self, classification: Classification, n: usize) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |f| f.classification() == classification)
            .take(n)
    }
}

/// Validate every reference in `documents` against `registry`.
pub fn validate(
    documents: &DocumentSet,
    registry: &ComponentRegistry,
    options: &ValidateOptions,
) -> Report {
    let mut findings = Vec::new();
    for document in documents.iter() {
        for reference in scan(&document.content, &document.id) {
            let result = resolve(&reference, &document.id, registry);
            if !result.is_valid() {
                tracing::debug!(
                    document = %document.id.display(),
                    location = %reference.location,
                    reference = %reference.raw,
                    status = result.classification().label(),
                    "reference did not resolve"
                );
            }
            findings.push(Finding { reference, result });
        }
    }

    let mut counts: BTreeMap<Classification, usize> =
        Classification::ALL.iter().map(|c| (*c, 0)).collect();
    for finding in &findings {
        *counts.entry(finding.classification()).or_default() += 1;
    }

    let field_coverage = options
        .required_field
        .as_deref()
        .map(|field| field_coverage(field, registry));
    let schema_warnings = if options.lint_schemas {
        lint_definitions(registry)
    } else {
        Vec::new()
    };
    let security_gaps = if options.check_security {
        security_gaps(documents)
    } else {
        Vec::new()
    };

    let report = Report {
        documents_checked: documents.len(),
        references: findings.len(),
        counts,
        findings,
        load_failures: Vec::new(),
        duplicates: registry.duplicates(),
        field_coverage,
        schema_warnings,
        security_gaps,
    };

    tracing::info!(
        documents = report.documents_checked,
        references = report.references,
        broken = report.failures(),
        "validation finished"
    );
    report
}

/// Check each schema module for `field`, following `allOf` inheritance.
pub fn field_coverage(field: &str, registry: &ComponentRegistry) -> FieldCoverage {
    let mut modules: BTreeMap<PathBuf, Vec<ComponentCoverage>> = BTreeMap::new();

    let schema_components = registry.components().filter(|c| {
        c.id.category == Category::Schemas
            && registry
                .document(&c.id.document)
                .and_then(|doc| doc.category())
                == Some(Category::Schemas)
    });

    for component in schema_components {
        let coverage = match has_component_field(component, field, registry) {
            Ok(FieldPresence::Present { depth }) => Coverage::Present { depth },
            Ok(FieldPresence::Absent) => Coverage::Absent,
            Err(cycle) => {
                tracing::warn!(component = %component.id, %cycle, "cyclic allOf chain");
                Coverage::Cyclic { chain: cycle.chain }
            }
        };
        modules
            .entry(component.id.document.clone())
            .or_default()
            .push(ComponentCoverage {
                name: component.id.name.clone(),
                coverage,
            });
    }

    FieldCoverage {
        field: field.to_string(),
        modules: modules
            .into_iter()
            .map(|(document, components)| ModuleCoverage {
                compliant: components.iter().any(|c| c.coverage.is_present()),
                document,
                components,
            })
            .collect(),
    }
}

/// Check schema definitions against the JSON Schema meta-schema.
///
/// Definitions that declare their own `$schema` are skipped. References are
/// dropped before compiling: whether they resolve is the resolver's concern.
pub fn lint_definitions(registry: &ComponentRegistry) -> Vec<SchemaWarning> {
    registry
        .components()
        .filter(|c| c.id.category == Category::Schemas)
        .filter_map(|c| {
            let message = match &c.raw {
                Value::Object(map) if map.contains_key("$schema") => return None,
                Value::Object(_) => {
                    let mut schema = c.raw.clone();
                    strip_refs(&mut schema);
                    jsonschema::validator_for(&schema).err()?.to_string()
                }
                Value::Bool(_) => return None,
                _ => "expected an object".to_string(),
            };
            tracing::debug!(component = %c.id, %message, "schema definition rejected");
            Some(SchemaWarning {
                component: c.id.clone(),
                message: format!("not a valid JSON Schema: {}", message),
            })
        })
        .collect()
}

fn strip_refs(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get(REF_KEY).is_some_and(Value::is_string) {
                map.remove(REF_KEY);
            }
            map.values_mut().for_each(strip_refs);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_refs),
        _ => {}
    }
}

const HTTP_METHODS: [&str; 5] = ["get", "post", "put", "delete", "patch"];

/// Paths that are public by convention.
fn is_public_path(path: &str) -> bool {
    path.starts_with("/public/") || matches!(path, "/health" | "/status" | "/version")
}

/// Operations under `paths` that carry no `security` key, in document order.
pub fn security_gaps(documents: &DocumentSet) -> Vec<SecurityGap> {
    let mut gaps = Vec::new();
    for document in documents.iter() {
        let Some(Value::Object(paths)) = document.content.get("paths") else {
            continue;
        };
        for (path, item) in paths {
            if is_public_path(path) {
                continue;
            }
            for method in HTTP_METHODS {
                let Some(Value::Object(operation)) = item.get(method) else {
                    continue;
                };
                if !operation.contains_key("security") {
                    gaps.push(SecurityGap {
                        document: document.id.clone(),
                        path: path.clone(),
                        method: method.to_string(),
                    });
                }
            }
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Document;
    use serde_json::json;
    use std::path::Path;

    fn fixture() -> DocumentSet {
        [
            Document::new(
                "components/schemas.yaml",
                json!({
                    "Widget": { "type": "object", "properties": { "name": { "type": "string" } } },
                    "Error": { "type": "object" }
                }),
            )
            .with_category(Category::Schemas),
            Document::new(
                "components/responses.yaml",
                json!({ "NotFound": { "description": "not found" } }),
            )
            .with_category(Category::Responses),
            Document::new(
                "paths/widgets.yaml",
                json!({
                    "get": {
                        "responses": {
                            "200": { "$ref": "../components/schemas.yaml#/Widget" },
                            "404": { "$ref": "../components/responses.yaml#/NotFound" },
                            "409": { "$ref": "../components/responses.yaml#Conflict" },
                            "410": { "$ref": "../components/schemas.yaml#/Gone" },
                            "500": { "$ref": "../components/errors.yaml#/Error" }
                        }
                    }
                }),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn counts_each_classification() {
        let set = fixture();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let report = validate(&set, &registry, &ValidateOptions::default());

        assert_eq!(report.documents_checked, 3);
        assert_eq!(report.references, 5);
        assert_eq!(report.count(Classification::Valid), 2);
        assert_eq!(report.count(Classification::MalformedFragment), 1);
        assert_eq!(report.count(Classification::MissingFragment), 1);
        assert_eq!(report.count(Classification::MissingFile), 1);
        assert_eq!(report.count(Classification::RemoteUnverified), 0);
        assert_eq!(report.failures(), 3);
        assert!(!report.is_ok());
    }

    #[test]
    fn examples_are_limited_and_ordered() {
        let set = fixture();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let report = validate(&set, &registry, &ValidateOptions::default());

        let valid: Vec<&str> = report
            .examples(Classification::Valid, 1)
            .map(|f| f.reference.raw.as_str())
            .collect();
        assert_eq!(valid, ["../components/schemas.yaml#/Widget"]);
        assert_eq!(report.examples(Classification::Valid, 10).count(), 2);
    }

    #[test]
    fn report_is_deterministic() {
        let set = fixture();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let options = ValidateOptions::new().required_field("tenant_id");

        let first = serde_json::to_value(validate(&set, &registry, &options)).unwrap();
        let second = serde_json::to_value(validate(&set, &registry, &options)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn clean_set_is_ok() {
        let set: DocumentSet = [
            Document::new("schemas.yaml", json!({ "Widget": {} })).with_category(Category::Schemas),
            Document::new("paths/w.yaml", json!({ "$ref": "../schemas.yaml#/Widget" })),
            Document::new("remote.yaml", json!({ "$ref": "https://example.com/s.yaml#/X" })),
        ]
        .into_iter()
        .collect();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let report = validate(&set, &registry, &ValidateOptions::default());

        assert!(report.is_ok());
        assert!(report.is_clean(true));
        assert_eq!(report.count(Classification::RemoteUnverified), 1);
    }

    #[test]
    fn field_coverage_follows_inheritance() {
        let set: DocumentSet = [
            Document::new(
                "schemas/common/base.yaml",
                json!({ "BaseEntity": { "properties": { "tenant_id": {}, "id": {} } } }),
            )
            .with_category(Category::Schemas),
            Document::new(
                "schemas/catalog/products.yaml",
                json!({
                    "Product": { "allOf": [ { "$ref": "../common/base.yaml#/BaseEntity" } ] },
                    "Price": { "properties": { "amount": {} } }
                }),
            )
            .with_category(Category::Schemas),
            Document::new(
                "schemas/catalog/tags.yaml",
                json!({ "Tag": { "properties": { "label": {} } } }),
            )
            .with_category(Category::Schemas),
            Document::new(
                "schemas/loops.yaml",
                json!({
                    "A": { "allOf": [ { "$ref": "#/B" } ] },
                    "B": { "allOf": [ { "$ref": "#/A" } ] }
                }),
            )
            .with_category(Category::Schemas),
        ]
        .into_iter()
        .collect();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let coverage = field_coverage("tenant_id", &registry);

        let compliant: Vec<(&Path, bool)> = coverage
            .modules
            .iter()
            .map(|m| (m.document.as_path(), m.compliant))
            .collect();
        assert_eq!(
            compliant,
            [
                (Path::new("schemas/catalog/products.yaml"), true),
                (Path::new("schemas/catalog/tags.yaml"), false),
                (Path::new("schemas/common/base.yaml"), true),
                (Path::new("schemas/loops.yaml"), false),
            ]
        );

        let products = &coverage.modules[0];
        assert_eq!(
            products.components,
            vec![
                ComponentCoverage {
                    name: "Price".into(),
                    coverage: Coverage::Absent,
                },
                ComponentCoverage {
                    name: "Product".into(),
                    coverage: Coverage::Present { depth: 1 },
                },
            ]
        );
        assert_eq!(coverage.gaps().count(), 2);
        assert_eq!(coverage.cycles().count(), 2);
    }

    #[test]
    fn strict_fails_on_coverage_gap() {
        let set: DocumentSet = [Document::new(
            "schemas.yaml",
            json!({ "Widget": { "properties": { "name": {} } } }),
        )
        .with_category(Category::Schemas)]
        .into_iter()
        .collect();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let report = validate(
            &set,
            &registry,
            &ValidateOptions::new().required_field("tenant_id"),
        );

        assert!(report.is_ok());
        assert!(report.is_clean(false));
        assert!(!report.is_clean(true));
    }

    #[test]
    fn lint_flags_invalid_definitions() {
        let registry = ComponentRegistry::load(
            Category::Schemas,
            "schemas.yaml",
            &json!({
                "Good": { "type": "object", "properties": { "id": { "type": "string" } } },
                "BadType": { "type": 12 },
                "Scalar": "just a string",
                "Declared": { "$schema": "https://example.com/custom", "type": 12 },
                "Always": true,
                "Linked": {
                    "allOf": [
                        { "$ref": "#/Good" },
                        { "$ref": "../other.yaml#/Elsewhere" },
                        { "properties": { "name": { "type": "string" } } }
                    ]
                }
            }),
        )
        .unwrap();

        let warnings = lint_definitions(&registry);
        let names: Vec<&str> = warnings.iter().map(|w| w.component.name.as_str()).collect();
        assert_eq!(names, ["BadType", "Scalar"]);
        assert!(warnings[1].message.ends_with("expected an object"));
    }

    #[test]
    fn security_gaps_skip_public_paths() {
        let set: DocumentSet = [Document::new(
            "openapi.yaml",
            json!({
                "paths": {
                    "/widgets": {
                        "get": { "security": [ { "bearer": [] } ] },
                        "post": {},
                        "parameters": []
                    },
                    "/widgets/{id}": {
                        "delete": { "responses": {} },
                        "patch": { "security": [] }
                    },
                    "/health": { "get": {} },
                    "/public/catalog": { "get": {} },
                    "/publications": { "get": {} },
                    "/legacy": { "$ref": "paths/legacy.yaml" }
                }
            }),
        )]
        .into_iter()
        .collect();

        let found: Vec<(String, String)> = security_gaps(&set)
            .into_iter()
            .map(|gap| (gap.method, gap.path))
            .collect();
        assert_eq!(
            found,
            [
                ("post".to_string(), "/widgets".to_string()),
                ("delete".to_string(), "/widgets/{id}".to_string()),
                ("get".to_string(), "/publications".to_string()),
            ]
        );
    }

    #[test]
    fn security_gaps_fail_only_in_strict_mode() {
        let set: DocumentSet = [Document::new(
            "openapi.yaml",
            json!({ "paths": { "/widgets": { "get": {} } } }),
        )]
        .into_iter()
        .collect();
        let registry = ComponentRegistry::from_documents(&set).unwrap();

        let report = validate(&set, &registry, &ValidateOptions::new());
        assert!(report.security_gaps.is_empty());

        let report = validate(&set, &registry, &ValidateOptions::new().check_security(true));
        assert_eq!(report.security_gaps.len(), 1);
        assert!(report.is_clean(false));
        assert!(!report.is_clean(true));
    }

    #[test]
    fn duplicates_are_informational() {
        let set: DocumentSet = [
            Document::new("schemas/a.yaml", json!({ "Money": {} })).with_category(Category::Schemas),
            Document::new("schemas/b.yaml", json!({ "Money": {} })).with_category(Category::Schemas),
        ]
        .into_iter()
        .collect();
        let registry = ComponentRegistry::from_documents(&set).unwrap();
        let report = validate(&set, &registry, &ValidateOptions::default());

        assert_eq!(report.duplicates.len(), 1);
        assert!(report.is_clean(true));
    }
}
