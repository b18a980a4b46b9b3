//! Component registry: named definitions grouped by category, per document.
//!
//! A component document (category declared) contributes its top-level
//! entries. Any other document contributes the entries of its
//! `components/<category>` sections. Every document is registered, so the
//! resolver can tell a missing file from a missing component.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ComponentId, LoadError};
use crate::loader::{normalize, Document, DocumentSet};
use crate::types::{json_type_name, Category, ALL_OF_KEY, COMPONENTS_KEY, PROPERTIES_KEY, REF_KEY};

/// Shape of a definition, as far as inheritance lookup cares.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// A mapping with `properties` and/or `allOf`.
    Object {
        properties: Vec<String>,
        all_of: Vec<Member>,
    },
    /// Anything else: a scalar, a sequence, or a mapping with neither key.
    Opaque(Value),
}

/// One entry of an `allOf` sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// `{ $ref: ... }`, raw reference string.
    Ref(String),
    Inline(Definition),
}

impl Definition {
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return Definition::Opaque(value.clone());
        };
        if !map.contains_key(PROPERTIES_KEY) && !map.contains_key(ALL_OF_KEY) {
            return Definition::Opaque(value.clone());
        }

        let properties = match map.get(PROPERTIES_KEY) {
            Some(Value::Object(props)) => props.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let all_of = match map.get(ALL_OF_KEY) {
            Some(Value::Array(items)) => items.iter().map(Member::from_value).collect(),
            _ => Vec::new(),
        };
        Definition::Object { properties, all_of }
    }

    /// Fields declared directly on this definition.
    pub fn properties(&self) -> &[String] {
        match self {
            Definition::Object { properties, .. } => properties,
            Definition::Opaque(_) => &[],
        }
    }
}

impl Member {
    fn from_value(value: &Value) -> Self {
        match value.get(REF_KEY).and_then(Value::as_str) {
            Some(reference) => Member::Ref(reference.to_string()),
            None => Member::Inline(Definition::from_value(value)),
        }
    }
}

/// A named definition and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: ComponentId,
    pub definition: Definition,
    /// The definition as written.
    pub raw: Value,
}

/// Everything the registry keeps about one document.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredDocument {
    category: Option<Category>,
    content: Value,
    components: BTreeMap<Category, BTreeMap<String, Component>>,
}

impl RegisteredDocument {
    /// Category declared for the whole document, if any.
    pub fn category(&self) -> Option<Category> {
        self.category
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn component(&self, category: Category, name: &str) -> Option<&Component> {
        self.components.get(&category)?.get(name)
    }
}

/// A component name defined by more than one document in a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Duplicate {
    pub category: Category,
    pub name: String,
    pub documents: Vec<PathBuf>,
}

/// Read-only view of every component in a validation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentRegistry {
    documents: BTreeMap<PathBuf, RegisteredDocument>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a single component document.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::NotAMapping` if `source` is not a mapping.
    pub fn load(
        category: Category,
        id: impl AsRef<Path>,
        source: &Value,
    ) -> Result<Self, LoadError> {
        let mut registry = Self::new();
        registry.insert(&Document::new(id, source.clone()).with_category(category))?;
        Ok(registry)
    }

    /// Build a registry from every document in a set.
    ///
    /// # Errors
    ///
    /// Fails if any component document is not a mapping. That aborts the run.
    pub fn from_documents(documents: &DocumentSet) -> Result<Self, LoadError> {
        let mut registry = Self::new();
        for document in documents.iter() {
            registry.insert(document)?;
        }
        tracing::debug!(
            documents = registry.documents.len(),
            components = registry.components().count(),
            "component registry built"
        );
        Ok(registry)
    }

    /// Register one document, replacing a previous one with the same id.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::NotAMapping` if a component document's top level
    /// is not a mapping. An empty document counts as an empty mapping.
    pub fn insert(&mut self, document: &Document) -> Result<(), LoadError> {
        let id = normalize(&document.id);
        let mut components = BTreeMap::new();

        match document.category {
            Some(category) => {
                let entries = match &document.content {
                    Value::Object(map) => register_entries(&id, category, map),
                    Value::Null => BTreeMap::new(),
                    other => {
                        return Err(LoadError::NotAMapping {
                            path: id,
                            category,
                            actual: json_type_name(other).to_string(),
                        })
                    }
                };
                components.insert(category, entries);
            }
            None => {
                let sections = document
                    .content
                    .get(COMPONENTS_KEY)
                    .and_then(Value::as_object);
                for (key, section) in sections.into_iter().flatten() {
                    let Some(category) = Category::parse(key) else {
                        continue;
                    };
                    match section {
                        Value::Object(map) => {
                            components.insert(category, register_entries(&id, category, map));
                        }
                        other => tracing::warn!(
                            document = %id.display(),
                            %category,
                            actual = json_type_name(other),
                            "components section is not a mapping"
                        ),
                    }
                }
            }
        }

        self.documents.insert(
            id,
            RegisteredDocument {
                category: document.category,
                content: document.content.clone(),
                components,
            },
        );
        Ok(())
    }

    /// First component with this name in the category, in document id order.
    pub fn lookup(&self, category: Category, name: &str) -> Option<&Component> {
        self.documents
            .values()
            .find_map(|doc| doc.component(category, name))
    }

    /// Component with this name in the category, defined by one document.
    pub fn lookup_in(&self, document: &Path, category: Category, name: &str) -> Option<&Component> {
        self.documents.get(document)?.component(category, name)
    }

    pub fn document(&self, id: &Path) -> Option<&RegisteredDocument> {
        self.documents.get(id)
    }

    pub fn contains(&self, id: &Path) -> bool {
        self.documents.contains_key(id)
    }

    /// Every component, by document id, then category, then name.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.documents
            .values()
            .flat_map(|doc| doc.components.values())
            .flat_map(|entries| entries.values())
    }

    /// Names defined in more than one document within a category.
    pub fn duplicates(&self) -> Vec<Duplicate> {
        let mut seen: BTreeMap<(Category, &str), Vec<PathBuf>> = BTreeMap::new();
        for component in self.components() {
            seen.entry((component.id.category, component.id.name.as_str()))
                .or_default()
                .push(component.id.document.clone());
        }
        seen.into_iter()
            .filter(|(_, documents)| documents.len() > 1)
            .map(|((category, name), documents)| Duplicate {
                category,
                name: name.to_string(),
                documents,
            })
            .collect()
    }
}

fn register_entries(
    document: &Path,
    category: Category,
    map: &Map<String, Value>,
) -> BTreeMap<String, Component> {
    map.iter()
        .map(|(name, raw)| {
            let component = Component {
                id: ComponentId {
                    document: document.to_path_buf(),
                    category,
                    name: name.clone(),
                },
                definition: Definition::from_value(raw),
                raw: raw.clone(),
            };
            (name.clone(), component)
        })
        .collect()
}
