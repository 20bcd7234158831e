//! Name and identifier resolution.
//!
//! Two tables with different lifetimes:
//!
//! - **name → identifier**: filled at parse time and never changed. Referencing a name
//!   before its declaration registers it early, so forward references need no fix-up.
//! - **identifier → live field**: rebuilt by [`FieldMapper::identify_fields`] at the start
//!   of every pass's fill phase. A binding stores the field's path from the root and the
//!   pre-order span of its subtree.
//!
//! Template clones keep the prototype's identifiers, so one identifier can have several
//! bindings in a pass. [`FieldMapper::find_field`] returns the last one visited.
//! [`FieldMapper::resolve_from`] picks the binding closest to the referencing field, so a
//! reference inside a template clone stays in that clone.

use crate::error::{Error, Result};
use crate::field::{Field, FieldId};
use std::collections::HashMap;
use std::ops::Range;

/// Live position of one identifier-bearing field in the current tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Child indices from the root.
    pub path: Vec<usize>,
    /// Pre-order indices covered by the field's subtree.
    pub span: Range<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct FieldMapper {
    ids: HashMap<String, FieldId>,
    names: Vec<String>,
    live: HashMap<FieldId, Vec<Binding>>,
}

impl FieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for `name`, assigning the next free one on first sight.
    pub fn register_field(&mut self, name: &str) -> FieldId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = FieldId(self.names.len() as u32);
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn lookup(&self, name: &str) -> Option<FieldId> {
        self.ids.get(name).copied()
    }

    pub fn name_of(&self, id: FieldId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    /// Human-readable label for diagnostics.
    pub fn label(&self, id: FieldId) -> String {
        match self.name_of(id) {
            Some(name) => name.to_string(),
            None => id.to_string(),
        }
    }

    pub fn registered_count(&self) -> usize {
        self.names.len()
    }

    /// Rebuild the live table from `root`, depth-first in declaration order.
    ///
    /// One pass over the tree: each binding's span is closed once its subtree has been
    /// numbered. Bindings of one identifier therefore end up sorted by path.
    pub fn identify_fields(&mut self, root: &Field) {
        self.live.clear();
        let mut path = Vec::new();
        let mut next = 0;
        bind(&mut self.live, root, &mut path, &mut next);
        tracing::trace!(bindings = self.binding_count(), "identified fields");
    }

    /// Total number of live bindings, one per identifier-bearing field visited.
    pub fn binding_count(&self) -> usize {
        self.live.values().map(Vec::len).sum()
    }

    pub fn bindings(&self, id: FieldId) -> &[Binding] {
        self.live.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Last binding for `id` in this pass.
    pub fn resolve(&self, id: FieldId) -> Result<&Binding> {
        self.bindings(id)
            .last()
            .ok_or_else(|| Error::UnboundField(self.label(id)))
    }

    /// Binding for `id` nearest to the field at `origin`: the one sharing the longest
    /// path prefix with it, the latest one on ties.
    ///
    /// Bindings are sorted by path, so the longest shared prefix is found next to
    /// `origin`'s insertion point, and the bindings sharing it form one run.
    pub fn resolve_from(&self, id: FieldId, origin: &[usize]) -> Result<&Binding> {
        let bindings = self.bindings(id);
        let shared = |binding: &Binding| {
            binding
                .path
                .iter()
                .zip(origin)
                .take_while(|(x, y)| x == y)
                .count()
        };
        let at = bindings.partition_point(|b| b.path.as_slice() < origin);
        let neighbours = &bindings[at.saturating_sub(1)..(at + 1).min(bindings.len())];
        let longest = neighbours
            .iter()
            .map(shared)
            .max()
            .ok_or_else(|| Error::UnboundField(self.label(id)))?;
        let prefix = &origin[..longest];
        let end = bindings.partition_point(|b| &b.path[..longest.min(b.path.len())] <= prefix);
        end.checked_sub(1)
            .and_then(|last| bindings.get(last))
            .ok_or_else(|| Error::UnboundField(self.label(id)))
    }

    /// Live field for `id` in the tree rooted at `root`.
    pub fn find_field<'f>(&self, root: &'f Field, id: FieldId) -> Result<&'f Field> {
        let binding = self.resolve(id)?;
        root.at_path(&binding.path)
            .ok_or_else(|| Error::UnboundField(self.label(id)))
    }
}

fn bind(
    live: &mut HashMap<FieldId, Vec<Binding>>,
    field: &Field,
    path: &mut Vec<usize>,
    next: &mut usize,
) {
    let start = *next;
    *next += 1;
    let slot = field.id().map(|id| {
        let bindings = live.entry(id).or_default();
        bindings.push(Binding {
            path: path.clone(),
            span: start..start,
        });
        (id, bindings.len() - 1)
    });
    for (i, child) in field.children().iter().enumerate() {
        path.push(i);
        bind(live, child, path, next);
        path.pop();
    }
    if let Some(binding) = slot.and_then(|(id, index)| live.get_mut(&id)?.get_mut(index)) {
        binding.span.end = *next;
    }
}
