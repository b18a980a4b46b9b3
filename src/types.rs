//! Core types shared across reference checking.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key that marks a reference object.
pub const REF_KEY: &str = "$ref";

/// Key holding composition members.
pub const ALL_OF_KEY: &str = "allOf";

/// Key holding a definition's fields.
pub const PROPERTIES_KEY: &str = "properties";

/// Section of a root document that groups components by category.
pub const COMPONENTS_KEY: &str = "components";

/// File extensions treated as loadable documents.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Returns true if the path-like string ends in a document extension.
pub fn is_document_path(s: &str) -> bool {
    s.rsplit_once('.')
        .map(|(_, ext)| DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Component category.
///
/// Names are case-sensitive and match the OpenAPI `components` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Parameters,
    Responses,
    Schemas,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Parameters, Category::Responses, Category::Schemas];

    /// Parse a category from its exact name.
    ///
    /// Returns `None` for unknown names (including other casings).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parameters" => Some(Category::Parameters),
            "responses" => Some(Category::Responses),
            "schemas" => Some(Category::Schemas),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Parameters => "parameters",
            Category::Responses => "responses",
            Category::Schemas => "schemas",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
