//! Document loading.
//!
//! Handles parsing single YAML/JSON files and collecting a whole directory
//! tree into a [`DocumentSet`]. Each document carries an explicit category so
//! that nothing downstream has to re-derive it from file names.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::LoadError;
use crate::types::{is_document_path, Category};

/// Load a document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or a parse error if the content isn't valid YAML/JSON.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    load_document_text(path).map(|(value, _)| value)
}

fn load_document_text(path: &Path) -> Result<(Value, String), LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let value = load_document_str(&content, path)?;
    Ok((value, content))
}

/// Parse document text. `path` selects the format (`.json` is parsed as
/// JSON, anything else as YAML) and names the document in errors.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` or `LoadError::InvalidYaml`.
pub fn load_document_str(content: &str, path: &Path) -> Result<Value, LoadError> {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(content).map_err(|source| LoadError::InvalidJson {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_yaml::from_str(content).map_err(|source| LoadError::InvalidYaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Lexically normalize a relative path: drop `.`, fold `..` into its parent.
///
/// A leading `..` that cannot be folded is kept, so the result never
/// silently escapes to a different document.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// A parsed document with its identity and declared category.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Normalized path relative to the document set root.
    pub id: PathBuf,
    /// Where the document lives on disk, if it came from a file.
    pub path: Option<PathBuf>,
    /// Component category when the top level is a map of components.
    pub category: Option<Category>,
    pub content: Value,
    /// Original text, used by repair to rewrite without reformatting.
    pub text: Option<String>,
}

impl Document {
    /// Create an in-memory document with no category.
    pub fn new(id: impl AsRef<Path>, content: Value) -> Self {
        Self {
            id: normalize(id.as_ref()),
            path: None,
            category: None,
            content,
            text: None,
        }
    }

    /// Set the component category.
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Attach the source text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Caller-supplied collection of documents, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    documents: BTreeMap<PathBuf, Document>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document, replacing any previous one with the same id.
    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    pub fn get(&self, id: &Path) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn contains(&self, id: &Path) -> bool {
        self.documents.contains_key(id)
    }

    /// Documents in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<Document> for DocumentSet {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        let mut set = DocumentSet::new();
        for document in iter {
            set.insert(document);
        }
        set
    }
}

/// How categories are assigned while loading a tree.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit `(path prefix, category)` declarations, relative to the root.
    /// The longest matching prefix wins over the default.
    pub categories: Vec<(PathBuf, Category)>,
}

impl LoadOptions {
    /// Declare the category of a file or of every file under a directory.
    pub fn category(mut self, prefix: impl AsRef<Path>, category: Category) -> Self {
        self.categories.push((normalize(prefix.as_ref()), category));
        self
    }

    /// Category for a document id: explicit declaration first, then the
    /// file stem, then the nearest ancestor directory named after a category.
    pub fn category_for(&self, id: &Path) -> Option<Category> {
        let declared = self
            .categories
            .iter()
            .filter(|(prefix, _)| id.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.components().count())
            .map(|(_, category)| *category);
        if declared.is_some() {
            return declared;
        }
        default_category(id)
    }
}

/// Category implied by naming convention alone.
pub fn default_category(id: &Path) -> Option<Category> {
    if let Some(category) = id
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(Category::parse)
    {
        return Some(category);
    }
    id.parent()?
        .components()
        .rev()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .find_map(Category::parse)
}

/// A document that could not be loaded. The rest of the run continues.
#[derive(Debug, Serialize)]
pub struct LoadFailure {
    pub document: PathBuf,
    pub category: Option<Category>,
    pub message: String,
    #[serde(skip)]
    pub error: LoadError,
}

impl LoadFailure {
    fn new(document: PathBuf, category: Option<Category>, error: LoadError) -> Self {
        Self {
            document,
            category,
            message: error.to_string(),
            error,
        }
    }
}

/// Result of loading a directory tree.
#[derive(Debug, Default)]
pub struct LoadedTree {
    pub root: PathBuf,
    pub documents: DocumentSet,
    pub failures: Vec<LoadFailure>,
}

/// Load every document under `root`.
///
/// Hidden entries are skipped. A file that fails to parse is recorded in
/// `failures` and does not stop the walk.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` only when `root` itself is missing.
pub fn load_tree(root: &Path, options: &LoadOptions) -> Result<LoadedTree, LoadError> {
    if !root.exists() {
        return Err(LoadError::FileNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut tree = LoadedTree {
        root: root.to_path_buf(),
        ..LoadedTree::default()
    };

    // A single file is its own tree, identified by its file name.
    let base = if root.is_file() {
        root.parent().unwrap_or(Path::new("")).to_path_buf()
    } else {
        root.to_path_buf()
    };

    let entries = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                let path = source.path().unwrap_or(root).to_path_buf();
                tracing::warn!(path = %path.display(), error = %source, "skipping unreadable entry");
                tree.failures.push(LoadFailure::new(
                    path.clone(),
                    None,
                    LoadError::WalkError { path, source },
                ));
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !is_document_path(&path.to_string_lossy()) {
            continue;
        }

        let id = normalize(path.strip_prefix(&base).unwrap_or(path));
        let category = options.category_for(&id);

        match load_document_text(path) {
            Ok((content, text)) => {
                tracing::debug!(document = %id.display(), ?category, "loaded document");
                tree.documents.insert(Document {
                    id,
                    path: Some(path.to_path_buf()),
                    category,
                    content,
                    text: Some(text),
                });
            }
            Err(error) => {
                tracing::warn!(document = %id.display(), %error, "failed to load document");
                tree.failures.push(LoadFailure::new(id, category, error));
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        loaded = tree.documents.len(),
        failed = tree.failures.len(),
        "document tree loaded"
    );
    Ok(tree)
}
