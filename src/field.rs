//! The [`Field`] handle: one owned [`FieldValue`] plus its identifier and bound filler.

use crate::ast::FillerId;
use crate::error::{Error, Result};
use crate::value::{FieldKind, FieldValue, Unit};
use std::fmt;

/// Stable identifier assigned to a declared name at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addressable, cloneable value produced by allocating a declaration node.
#[derive(Debug, Clone)]
pub struct Field {
    id: Option<FieldId>,
    filler: Option<FillerId>,
    value: Box<dyn FieldValue>,
}

impl Field {
    pub fn new(value: impl FieldValue + 'static) -> Self {
        Field {
            id: None,
            filler: None,
            value: Box::new(value),
        }
    }

    pub fn with_id(mut self, id: Option<FieldId>) -> Self {
        self.id = id;
        self
    }

    pub fn with_filler(mut self, filler: Option<FillerId>) -> Self {
        self.filler = filler;
        self
    }

    pub fn id(&self) -> Option<FieldId> {
        self.id
    }

    pub fn filler(&self) -> Option<FillerId> {
        self.filler
    }

    pub fn value(&self) -> &dyn FieldValue {
        self.value.as_ref()
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    pub fn size(&self) -> usize {
        self.value.size()
    }

    pub fn unit_bits(&self) -> u32 {
        self.value.unit_bits()
    }

    pub fn get(&self, index: usize) -> Result<Unit> {
        self.value.get(index)
    }

    pub fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        self.value.set(index, value)
    }

    pub fn children(&self) -> &[Field] {
        self.value.children()
    }

    pub fn children_mut(&mut self) -> &mut [Field] {
        self.value.children_mut()
    }

    /// Call `visitor` on this field, then on every descendant in declaration order.
    pub fn accept_visitor(&self, visitor: &mut dyn FnMut(&Field)) {
        visitor(self);
        for child in self.children() {
            child.accept_visitor(visitor);
        }
    }

    /// Pre-order walk that also reports each field's path (child indices from `self`)
    /// and its pre-order index. This numbering is what fill ordering is checked against.
    pub fn walk(&self, visitor: &mut dyn FnMut(&Field, &[usize], usize)) {
        fn go(
            field: &Field,
            path: &mut Vec<usize>,
            counter: &mut usize,
            visitor: &mut dyn FnMut(&Field, &[usize], usize),
        ) {
            visitor(field, path, *counter);
            *counter += 1;
            for (i, child) in field.children().iter().enumerate() {
                path.push(i);
                go(child, path, counter, visitor);
                path.pop();
            }
        }
        let mut path = Vec::new();
        let mut counter = 0;
        go(self, &mut path, &mut counter, visitor);
    }

    /// Number of fields in this subtree, self included.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(Field::node_count).sum::<usize>()
    }

    pub fn at_path(&self, path: &[usize]) -> Option<&Field> {
        path.iter()
            .try_fold(self, |field, &i| field.children().get(i))
    }

    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Field> {
        let mut field = self;
        for &i in path {
            field = field.children_mut().get_mut(i)?;
        }
        Some(field)
    }

    /// All units in index order.
    pub fn units(&self) -> Result<Vec<Unit>> {
        (0..self.size()).map(|i| self.get(i)).collect()
    }

    /// Rendered bytes: byte-unit fields as-is, bit-unit fields packed MSB first with
    /// zero padding in the last byte.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let units = self.units()?;
        if self.unit_bits() == 8 {
            return Ok(units);
        }
        let mut out = vec![0u8; units.len().div_ceil(8)];
        for (i, bit) in units.iter().enumerate() {
            out[i / 8] |= (bit & 1) << (7 - i % 8);
        }
        Ok(out)
    }

    /// Write `units` from index 0. Content wider than the field is rejected before any
    /// unit is written; a shorter run leaves the remaining units untouched.
    pub fn write_units(&mut self, units: &[Unit]) -> Result<()> {
        let size = self.size();
        if units.len() > size {
            return Err(Error::InvalidFieldSize {
                len: units.len(),
                size,
            });
        }
        for (i, &unit) in units.iter().enumerate() {
            self.set(i, unit)?;
        }
        Ok(())
    }
}
