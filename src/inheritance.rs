//! Field lookup through `allOf` composition.
//!
//! Business schemas usually pick up shared fields (a tenant id, audit
//! timestamps) from a base definition via `allOf`. Checking only the direct
//! `properties` of a definition misses those, so lookup follows the chain.

use std::path::Path;

use serde::Serialize;

use crate::error::{ComponentId, CyclicReferenceError};
use crate::registry::{Component, ComponentRegistry, Definition, Member};
use crate::resolver::resolve_component;

/// Whether a definition declares a field, and how far down the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "presence", rename_all = "snake_case")]
pub enum FieldPresence {
    /// Found at `depth` references away; 0 means the definition itself or
    /// one of its inline `allOf` members.
    Present { depth: usize },
    Absent,
}

impl FieldPresence {
    pub fn is_present(&self) -> bool {
        matches!(self, FieldPresence::Present { .. })
    }

    pub fn depth(&self) -> Option<usize> {
        match self {
            FieldPresence::Present { depth } => Some(*depth),
            FieldPresence::Absent => None,
        }
    }
}

/// Does `definition` declare `field`, directly or through `allOf`?
///
/// `origin` is the document holding the definition; member references are
/// resolved relative to it. Members are tried in order and the first match
/// wins. Member references that do not resolve to a component contribute
/// nothing.
///
/// # Errors
///
/// Returns `CyclicReferenceError` if the chain revisits a component.
pub fn has_field(
    definition: &Definition,
    origin: &Path,
    field: &str,
    registry: &ComponentRegistry,
) -> Result<FieldPresence, CyclicReferenceError> {
    let mut chain = Vec::new();
    search(definition, origin, field, registry, 0, &mut chain)
}

/// Like [`has_field`], with the component itself already on the chain so a
/// self-reference is reported as a cycle.
pub fn has_component_field(
    component: &Component,
    field: &str,
    registry: &ComponentRegistry,
) -> Result<FieldPresence, CyclicReferenceError> {
    let mut chain = vec![component.id.clone()];
    search(
        &component.definition,
        &component.id.document,
        field,
        registry,
        0,
        &mut chain,
    )
}

fn search(
    definition: &Definition,
    origin: &Path,
    field: &str,
    registry: &ComponentRegistry,
    depth: usize,
    chain: &mut Vec<ComponentId>,
) -> Result<FieldPresence, CyclicReferenceError> {
    let Definition::Object { properties, all_of } = definition else {
        return Ok(FieldPresence::Absent);
    };

    if properties.iter().any(|p| p == field) {
        return Ok(FieldPresence::Present { depth });
    }

    for member in all_of {
        let found = match member {
            Member::Inline(inline) => search(inline, origin, field, registry, depth, chain)?,
            Member::Ref(raw) => {
                let Some(target) = resolve_component(raw, origin, registry) else {
                    tracing::debug!(reference = %raw, origin = %origin.display(), "allOf member does not resolve");
                    continue;
                };

                if let Some(start) = chain.iter().position(|id| *id == target.id) {
                    let mut cycle = chain[start..].to_vec();
                    cycle.push(target.id.clone());
                    return Err(CyclicReferenceError { chain: cycle });
                }

                chain.push(target.id.clone());
                let found = search(
                    &target.definition,
                    &target.id.document,
                    field,
                    registry,
                    depth + 1,
                    chain,
                );
                chain.pop();
                found?
            }
        };

        if found.is_present() {
            return Ok(found);
        }
    }

    Ok(FieldPresence::Absent)
}
