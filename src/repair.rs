//! Fragment repair.
//!
//! Fixes exactly one defect: a fragment missing its leading `/`
//! (`schemas.yaml#Widget` becomes `schemas.yaml#/Widget`). Whether the
//! component exists is a separate question for the resolver, so repair
//! never looks at the registry.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::RepairError;
use crate::loader::{load_document_str, Document};
use crate::pointer::{self, is_canonical};
use crate::scanner::{scan, split_reference};
use crate::types::REF_KEY;

/// Outcome of repairing one raw reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Repair {
    Repaired { original: String, repaired: String },
    NoOpNeeded,
}

/// Insert the missing `/` after `#`. Anything else is left alone.
pub fn repair(raw: &str) -> Repair {
    let Some((target, fragment)) = raw.split_once('#') else {
        return Repair::NoOpNeeded;
    };
    if is_canonical(fragment) {
        return Repair::NoOpNeeded;
    }
    Repair::Repaired {
        original: raw.to_string(),
        repaired: format!("{}#/{}", target, fragment),
    }
}

/// One rewritten reference, for the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    /// JSON Pointer of the mapping holding the `$ref`.
    pub location: String,
    /// 1-based line in the source text, when the text was rewritten.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub original: String,
    pub repaired: String,
}

/// Repairs planned for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRepair {
    pub document: PathBuf,
    pub changes: Vec<Change>,
    /// New document text; `None` when nothing changed.
    #[serde(skip)]
    pub rewritten: Option<String>,
}

impl DocumentRepair {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Plan and apply repairs to a document.
///
/// With source text, only the `$ref` values are rewritten in place and
/// every other byte is kept. Without it, the parsed content is repaired
/// and serialized as YAML.
///
/// # Errors
///
/// Returns `RepairError::Unlocated` if a reference that needs repair cannot
/// be found on a `$ref` line of the text, or if the rewritten text would not
/// parse to the repaired content. The document is left untouched.
pub fn repair_document(document: &Document) -> Result<DocumentRepair, RepairError> {
    let planned: Vec<Change> = scan(&document.content, &document.id)
        .filter_map(|reference| match repair(&reference.raw) {
            Repair::Repaired { original, repaired } => Some(Change {
                location: reference.location,
                line: None,
                original,
                repaired,
            }),
            Repair::NoOpNeeded => None,
        })
        .collect();

    if planned.is_empty() {
        return Ok(DocumentRepair {
            document: document.id.clone(),
            changes: planned,
            rewritten: None,
        });
    }

    let (changes, rewritten) = match &document.text {
        Some(text) => rewrite_text(document, text, planned)?,
        None => {
            let mut content = document.content.clone();
            repair_value(&mut content);
            let text = serde_yaml::to_string(&content).map_err(|source| RepairError::Serialize {
                document: document.id.clone(),
                source,
            })?;
            (planned, text)
        }
    };

    Ok(DocumentRepair {
        document: document.id.clone(),
        changes,
        rewritten: Some(rewritten),
    })
}

/// Repair every `$ref` string in a parsed value. Returns how many changed.
pub fn repair_value(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let mut count = 0;
            if let Some(Value::String(raw)) = map.get_mut(REF_KEY) {
                if let Repair::Repaired { repaired, .. } = repair(raw) {
                    *raw = repaired;
                    count += 1;
                }
            }
            for child in map.values_mut() {
                count += repair_value(child);
            }
            count
        }
        Value::Array(items) => items.iter_mut().map(repair_value).sum(),
        _ => 0,
    }
}

/// A `$ref` value as it appears in the text.
#[derive(Debug, PartialEq, Eq)]
struct Span {
    line: usize,
    value: ValueSpan,
}

/// Byte range of a scalar's content on its line, and its quote style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueSpan {
    start: usize,
    end: usize,
    quote: Option<char>,
}

impl ValueSpan {
    /// The scalar as the parser sees it, with quoting and escapes resolved.
    fn decode(&self, line: &str) -> Option<String> {
        match self.quote {
            // The YAML parser also accepts JSON strings.
            Some(_) => serde_yaml::from_str::<String>(&line[self.start - 1..self.end + 1]).ok(),
            None => Some(line[self.start..self.end].to_string()),
        }
    }

    /// Offset just past the first literal `#` of the content.
    fn slash_offset(&self, line: &str) -> Option<usize> {
        line[self.start..self.end]
            .find('#')
            .map(|i| self.start + i + 1)
    }
}

/// Pair each planned change with the next unused `$ref` value decoding to
/// the same string, in document order, then insert the missing `/`.
///
/// The result is parsed again and must equal the original content with
/// every reference repaired.
fn rewrite_text(
    document: &Document,
    text: &str,
    planned: Vec<Change>,
) -> Result<(Vec<Change>, String), RepairError> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let in_block = block_scalar_lines(&lines);
    let spans: Vec<Span> = lines
        .iter()
        .enumerate()
        .filter(|(line, _)| !in_block[*line])
        .flat_map(|(line, content)| {
            ref_values(content)
                .into_iter()
                .map(move |value| Span { line, value })
        })
        .collect();
    let decoded: Vec<Option<String>> = spans
        .iter()
        .map(|span| span.value.decode(lines[span.line]))
        .collect();

    let mut used = vec![false; spans.len()];
    let mut edits: Vec<(usize, &Change)> = Vec::new();
    for change in &planned {
        let slot = (0..spans.len()).find(|&i| {
            !used[i]
                && decoded[i].as_deref() == Some(change.original.as_str())
                && spans[i].value.slash_offset(lines[spans[i].line]).is_some()
        });
        let Some(slot) = slot else {
            return Err(unlocated(document, change));
        };
        used[slot] = true;
        edits.push((slot, change));
    }

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    // Later spans first so earlier byte offsets on the same line stay valid.
    let mut ordered = edits.clone();
    ordered.sort_by_key(|(slot, _)| std::cmp::Reverse(*slot));
    for (slot, _) in ordered {
        let span = &spans[slot];
        if let Some(at) = span.value.slash_offset(lines[span.line]) {
            out[span.line].insert(at, '/');
        }
    }

    let changes: Vec<Change> = edits
        .into_iter()
        .map(|(slot, change)| Change {
            line: Some(spans[slot].line + 1),
            ..change.clone()
        })
        .collect();
    let rewritten = out.concat();

    verify(document, &rewritten, &changes)?;
    Ok((changes, rewritten))
}

/// The rewritten text must parse to the original content with every `$ref`
/// repaired and nothing else touched.
fn verify(document: &Document, rewritten: &str, changes: &[Change]) -> Result<(), RepairError> {
    let mut expected = document.content.clone();
    repair_value(&mut expected);
    let parsed = load_document_str(rewritten, &document.id).ok();
    if parsed.as_ref() == Some(&expected) {
        return Ok(());
    }

    let culprit = changes
        .iter()
        .find(|c| parsed.as_ref().and_then(|v| ref_at(v, &c.location)) != Some(c.repaired.as_str()))
        .or_else(|| changes.first());
    match culprit {
        Some(change) => {
            tracing::warn!(
                document = %document.id.display(),
                location = %change.location,
                "rewritten text does not match the planned repair"
            );
            Err(unlocated(document, change))
        }
        None => Ok(()),
    }
}

fn unlocated(document: &Document, change: &Change) -> RepairError {
    RepairError::Unlocated {
        document: document.id.clone(),
        location: change.location.clone(),
        reference: change.original.clone(),
    }
}

/// The `$ref` string of the mapping at `location`.
fn ref_at<'a>(value: &'a Value, location: &str) -> Option<&'a str> {
    let segments = pointer::segments(location).ok()?;
    pointer::navigate(value, &segments)?.get(REF_KEY)?.as_str()
}

/// Marks the lines that form the body of a `|` or `>` block scalar.
fn block_scalar_lines(lines: &[&str]) -> Vec<bool> {
    let mut inside = vec![false; lines.len()];
    let mut parent: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some(indent) = parent {
            if line.trim().is_empty() || leading_spaces(line) > indent {
                inside[i] = true;
                continue;
            }
            parent = None;
        }
        parent = block_scalar_parent(line);
    }
    inside
}

/// Indentation of the node that owns a block scalar opened on this line.
fn block_scalar_parent(line: &str) -> Option<usize> {
    if line.trim_start().starts_with('#') {
        return None;
    }
    let content = line.trim_end();
    let content = match content.find(" #") {
        Some(i) => content[..i].trim_end(),
        None => content,
    };
    let (before, indicator) = content.rsplit_once(' ')?;

    let mut chars = indicator.chars();
    if !matches!(chars.next(), Some('|' | '>'))
        || !chars.all(|c| matches!(c, '+' | '-' | '1'..='9'))
    {
        return None;
    }

    let before = before.trim_end();
    if before.ends_with(':') {
        Some(key_indent(line))
    } else if before.ends_with('-') {
        Some(before.len() - 1)
    } else {
        None
    }
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Column of the mapping key on a line, past any `- ` sequence markers.
fn key_indent(line: &str) -> usize {
    let mut indent = leading_spaces(line);
    let mut rest = &line[indent..];
    while let Some(after) = rest.strip_prefix("- ") {
        let pad = leading_spaces(after);
        indent += 2 + pad;
        rest = &after[pad..];
    }
    indent
}

/// `$ref` values on one line, for YAML block or flow style and JSON.
/// Comment lines are skipped.
fn ref_values(line: &str) -> Vec<ValueSpan> {
    let mut found = Vec::new();
    if line.trim_start().starts_with('#') {
        return found;
    }

    let mut from = 0;
    while let Some(offset) = line[from..].find(REF_KEY) {
        let key_end = from + offset + REF_KEY.len();
        from = key_end;

        let rest = &line[key_end..];
        let after_quote = rest.strip_prefix(['"', '\'']).unwrap_or(rest);
        let Some(after_colon) = after_quote.trim_start().strip_prefix(':') else {
            continue;
        };
        let value = after_colon.trim_start();
        let value_start = line.len() - value.len();

        let span = match value.chars().next() {
            Some(quote @ ('"' | '\'')) => closing_quote(&value[1..], quote).map(|len| ValueSpan {
                start: value_start + 1,
                end: value_start + 1 + len,
                quote: Some(quote),
            }),
            // A plain scalar cannot start with `#`: that is a comment.
            Some('#') | None => None,
            Some(_) => {
                let len = unquoted_len(value);
                (len > 0).then_some(ValueSpan {
                    start: value_start,
                    end: value_start + len,
                    quote: None,
                })
            }
        };

        if let Some(span) = span {
            from = span.end;
            found.push(span);
        }
    }
    found
}

/// Length of a quoted scalar's content: `''` escapes a single quote, a
/// backslash escapes the next character in a double-quoted one.
fn closing_quote(body: &str, quote: char) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            ('"', b'\\') => i += 2,
            ('\'', b'\'') if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            (_, b) if b == quote as u8 => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Length of an unquoted YAML scalar: up to a flow delimiter, a comment,
/// or the end of the line.
fn unquoted_len(value: &str) -> usize {
    let bytes = value.as_bytes();
    let mut end = 0;
    while end < bytes.len() {
        match bytes[end] {
            b',' | b'}' | b']' | b'\n' | b'\r' => break,
            b' ' | b'\t' if bytes.get(end + 1) == Some(&b'#') => break,
            _ => end += 1,
        }
    }
    value[..end].trim_end().len()
}

/// Backup location for a document: `<file name>.bak` next to it.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Write repaired text, keeping a one-time backup of the original.
///
/// An existing backup is never overwritten, so repeated runs keep the true
/// original. Returns the backup path when one was created by this call.
///
/// # Errors
///
/// Returns `RepairError::Backup` or `RepairError::Write` on I/O failure.
pub fn persist(path: &Path, text: &str) -> Result<Option<PathBuf>, RepairError> {
    let backup = backup_path(path);
    let created = if backup.exists() {
        tracing::debug!(backup = %backup.display(), "backup already present, keeping it");
        None
    } else {
        std::fs::copy(path, &backup).map_err(|source| RepairError::Backup {
            path: backup.clone(),
            source,
        })?;
        tracing::info!(backup = %backup.display(), "backup written");
        Some(backup)
    };

    std::fs::write(path, text).map_err(|source| RepairError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(created)
}

/// True if the fragment of `raw` would be changed by [`repair`].
pub fn needs_repair(raw: &str) -> bool {
    let (_, fragment) = split_reference(raw);
    raw.contains('#') && !is_canonical(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn repairs_missing_slash() {
        assert_eq!(
            repair("../components/schemas.yaml#Widget"),
            Repair::Repaired {
                original: "../components/schemas.yaml#Widget".into(),
                repaired: "../components/schemas.yaml#/Widget".into(),
            }
        );
        assert_eq!(
            repair("#Widget"),
            Repair::Repaired {
                original: "#Widget".into(),
                repaired: "#/Widget".into(),
            }
        );
    }

    #[test]
    fn canonical_is_no_op() {
        assert_eq!(repair("schemas.yaml#/Widget"), Repair::NoOpNeeded);
        assert_eq!(repair("schemas.yaml#"), Repair::NoOpNeeded);
        assert_eq!(repair("schemas.yaml"), Repair::NoOpNeeded);
        assert_eq!(repair("#/components/schemas/Error"), Repair::NoOpNeeded);
    }

    #[test]
    fn repair_is_idempotent() {
        for raw in ["a.yaml#Widget", "#X", "a.yaml#/Y", "b.yaml#Wid~1get"] {
            let once = match repair(raw) {
                Repair::Repaired { repaired, .. } => repaired,
                Repair::NoOpNeeded => raw.to_string(),
            };
            assert_eq!(repair(&once), Repair::NoOpNeeded, "raw {:?}", raw);
            assert!(!needs_repair(&once));
        }
    }

    #[test]
    fn does_not_touch_other_defects() {
        // A bad escape behind a proper slash is reported, not guessed at.
        assert_eq!(repair("a.yaml#/Wid~9get"), Repair::NoOpNeeded);
    }

    fn values(line: &str) -> Vec<&str> {
        ref_values(line)
            .into_iter()
            .map(|span| &line[span.start..span.end])
            .collect()
    }

    fn text_document(id: &str, text: &str) -> Document {
        let content = crate::loader::load_document_str(text, Path::new(id)).unwrap();
        Document::new(id, content).with_text(text)
    }

    #[test]
    fn ref_values_yaml_and_json() {
        assert_eq!(
            values("      $ref: '../components/schemas.yaml#Widget'\n"),
            ["../components/schemas.yaml#Widget"]
        );
        assert_eq!(
            values(r#"  "$ref": "schemas.json#Widget","#),
            ["schemas.json#Widget"]
        );
        assert_eq!(
            values("- $ref: schemas.yaml#Widget # legacy\n"),
            ["schemas.yaml#Widget"]
        );
        assert_eq!(
            values("allOf: [{ $ref: a.yaml#A }, { $ref: \"b.yaml#B\" }]\n"),
            ["a.yaml#A", "b.yaml#B"]
        );

        assert!(ref_values("# $ref: a.yaml#A\n").is_empty());
        assert!(ref_values("description: uses $ref semantics\n").is_empty());
        assert!(ref_values("$ref: #A\n").is_empty());
    }

    #[test]
    fn quoted_values_keep_their_escapes() {
        let line = r#"$ref: "a.yaml#Say \"hi\"""#;
        let spans = ref_values(line);
        assert_eq!(&line[spans[0].start..spans[0].end], r#"a.yaml#Say \"hi\""#);
        assert_eq!(spans[0].decode(line).as_deref(), Some(r#"a.yaml#Say "hi""#));

        let line = "$ref: 'it''s.yaml#X'\n";
        let spans = ref_values(line);
        assert_eq!(&line[spans[0].start..spans[0].end], "it''s.yaml#X");
        assert_eq!(spans[0].decode(line).as_deref(), Some("it's.yaml#X"));
    }

    #[test]
    fn block_scalar_bodies_are_marked() {
        let text = "\
get:
  description: |
    $ref: 'a.yaml#Widget'

    more text
  summary: >-
    folded
  responses:
    - |
      listed
    - $ref: 'a.yaml#Widget'
";
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let marked: Vec<usize> = block_scalar_lines(&lines)
            .iter()
            .enumerate()
            .filter(|(_, inside)| **inside)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(marked, [3, 4, 5, 7, 10]);
    }

    #[test]
    fn rewrites_text_preserving_everything_else() {
        let text = "\
# Widgets
get:
  responses:
    '200':
      # keep this comment
      $ref: '../components/responses.yaml#WidgetList'
    '404':
      $ref: '../components/responses.yaml#/NotFound'
  parameters:
    - $ref: ../components/parameters.yaml#TenantHeader
";
        let content = crate::loader::load_document_str(text, Path::new("widgets.yaml")).unwrap();
        let document = Document::new("paths/widgets.yaml", content).with_text(text);

        let result = repair_document(&document).unwrap();
        assert_eq!(
            result.changes,
            vec![
                Change {
                    location: "/get/responses/200".into(),
                    line: Some(6),
                    original: "../components/responses.yaml#WidgetList".into(),
                    repaired: "../components/responses.yaml#/WidgetList".into(),
                },
                Change {
                    location: "/get/parameters/0".into(),
                    line: Some(10),
                    original: "../components/parameters.yaml#TenantHeader".into(),
                    repaired: "../components/parameters.yaml#/TenantHeader".into(),
                },
            ]
        );
        assert_eq!(
            result.rewritten.unwrap(),
            text.replace("#WidgetList", "#/WidgetList")
                .replace("#TenantHeader", "#/TenantHeader")
        );
    }

    #[test]
    fn same_reference_twice_on_one_line() {
        let text = "allOf: [{ $ref: '#Base' }, { $ref: '#Base' }]\n";
        let content = crate::loader::load_document_str(text, Path::new("s.yaml")).unwrap();
        let document = Document::new("s.yaml", content).with_text(text);

        let result = repair_document(&document).unwrap();
        assert_eq!(result.changes.len(), 2);
        assert_eq!(
            result.rewritten.unwrap(),
            "allOf: [{ $ref: '#/Base' }, { $ref: '#/Base' }]\n"
        );
    }

    #[test]
    fn unlocatable_reference_is_an_error() {
        // Text that does not match the parsed content.
        let document = Document::new("s.yaml", json!({ "a": { "$ref": "#Base" } }))
            .with_text("a:\n  $ref: '#/Base'\n");
        let err = repair_document(&document).unwrap_err();
        assert!(matches!(err, RepairError::Unlocated { ref reference, .. } if reference == "#Base"));
    }

    #[test]
    fn ref_text_inside_block_scalar_is_left_alone() {
        let text = "\
get:
  description: |
    Example usage:
      $ref: '../components/schemas.yaml#Widget'
  responses:
    '200':
      $ref: '../components/schemas.yaml#Widget'
";
        let document = text_document("paths/widgets.yaml", text);

        let result = repair_document(&document).unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].location, "/get/responses/200");
        assert_eq!(result.changes[0].line, Some(7));

        let rewritten = result.rewritten.unwrap();
        let before: Vec<&str> = text.lines().collect();
        let after: Vec<&str> = rewritten.lines().collect();
        assert_eq!(after.len(), before.len());
        for (i, (old, new)) in before.iter().zip(&after).enumerate() {
            if i == 6 {
                assert_eq!(*new, "      $ref: '../components/schemas.yaml#/Widget'");
            } else {
                assert_eq!(old, new, "line {}", i + 1);
            }
        }
    }

    #[test]
    fn ref_text_in_quoted_multiline_scalar_is_refused() {
        // The first matching line belongs to the description, not the $ref.
        let text = "\
get:
  description: \"Example usage:
    $ref: '../components/schemas.yaml#Widget'\"
  responses:
    '200':
      $ref: '../components/schemas.yaml#Widget'
";
        let document = text_document("paths/widgets.yaml", text);

        let err = repair_document(&document).unwrap_err();
        assert!(matches!(
            err,
            RepairError::Unlocated { ref location, ref reference, .. }
                if location == "/get/responses/200"
                    && reference == "../components/schemas.yaml#Widget"
        ));
    }

    #[test]
    fn escaped_double_quoted_value() {
        let text = "get:\n  $ref: \"../components/schemas.yaml#Wid\\u0067et\"\n";
        let document = text_document("paths/widgets.yaml", text);
        assert_eq!(document.content["get"]["$ref"], "../components/schemas.yaml#Widget");

        let result = repair_document(&document).unwrap();
        assert_eq!(result.changes[0].line, Some(2));
        assert_eq!(result.changes[0].repaired, "../components/schemas.yaml#/Widget");
        assert_eq!(
            result.rewritten.unwrap(),
            "get:\n  $ref: \"../components/schemas.yaml#/Wid\\u0067et\"\n"
        );
    }

    #[test]
    fn single_quote_escape_survives() {
        let text = "a:\n  $ref: 'it''s.yaml#X'\n";
        let result = repair_document(&text_document("s.yaml", text)).unwrap();
        assert_eq!(result.changes[0].repaired, "it's.yaml#/X");
        assert_eq!(result.rewritten.unwrap(), "a:\n  $ref: 'it''s.yaml#/X'\n");
    }

    #[test]
    fn clean_document_is_untouched() {
        let document = Document::new("s.yaml", json!({ "a": { "$ref": "#/Base" } }))
            .with_text("a:\n  $ref: '#/Base'\n");
        let result = repair_document(&document).unwrap();
        assert!(result.is_empty());
        assert!(result.rewritten.is_none());
    }

    #[test]
    fn structural_repair_without_text() {
        let document = Document::new(
            "s.yaml",
            json!({ "Widget": { "allOf": [ { "$ref": "#Base" }, { "$ref": "#/Other" } ] } }),
        );
        let result = repair_document(&document).unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].line, None);
        let rewritten: Value = serde_yaml::from_str(result.rewritten.as_deref().unwrap()).unwrap();
        assert_eq!(rewritten["Widget"]["allOf"][0]["$ref"], "#/Base");
        assert_eq!(rewritten["Widget"]["allOf"][1]["$ref"], "#/Other");
    }

    #[test]
    fn persist_keeps_first_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("widgets.yaml");
        std::fs::write(&path, "original\n").unwrap();

        let backup = persist(&path, "first\n").unwrap();
        assert_eq!(backup, Some(dir.path().join("widgets.yaml.bak")));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");

        let backup = persist(&path, "second\n").unwrap();
        assert_eq!(backup, None);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("widgets.yaml.bak")).unwrap(),
            "original\n"
        );
    }
}
