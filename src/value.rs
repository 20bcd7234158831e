//! Field value storage: the concrete strategies behind a [`Field`](crate::field::Field).
//!
//! Every variant exposes the same unit-indexed contract (`size`, `get`, `set`). Leaf
//! variants own their storage; container variants own child [`Field`]s and map a single
//! flat index space onto them.
//!
//! | Variant | Units | Size |
//! |---------|-------|------|
//! | [`BlockValue`] | bytes | fixed at construction |
//! | [`BitfieldValue`] | bits (packed) | bit width |
//! | [`VariableBlockValue`] | bytes | drawn once from `[min, max]` |
//! | [`CompoundValue`] | child units | sum of children |
//! | [`CompoundBitfieldValue`] | bytes over packed child bits | `ceil(bits / 8)` |
//! | [`RepeatValue`] | child units | sum of template clones |

use crate::error::{Error, Result};
use crate::field::Field;
use rand::{Rng, RngCore};
use std::cell::Cell;
use std::fmt;

/// One addressable value unit. Byte-unit fields use all 8 bits; bit-unit fields use bit 0.
pub type Unit = u8;

/// Most units a single declaration may ask for, and the allocation budget of one
/// generated tree. Larger declarations are rejected by the parse context.
pub const MAX_UNITS: usize = 1 << 24;

/// Budget charged per allocated field on top of its units, so trees of many empty
/// fields stay bounded too.
pub const NODE_WEIGHT: usize = 64;

/// Kind of a field value, used for diagnostics and `count`-style type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Block,
    Bitfield,
    VariableBlock,
    Compound,
    CompoundBitfield,
    Repeat,
}

impl FieldKind {
    pub fn is_container(self) -> bool {
        matches!(
            self,
            FieldKind::Compound | FieldKind::CompoundBitfield | FieldKind::Repeat
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Block => "block",
            FieldKind::Bitfield => "bitfield",
            FieldKind::VariableBlock => "varblock",
            FieldKind::Compound => "compound",
            FieldKind::CompoundBitfield => "bits",
            FieldKind::Repeat => "template",
        }
    }
}

/// Storage/behavior strategy behind a field.
pub trait FieldValue: fmt::Debug {
    fn kind(&self) -> FieldKind;

    /// Number of addressable units.
    fn size(&self) -> usize;

    fn get(&self, index: usize) -> Result<Unit>;

    fn set(&mut self, index: usize, value: Unit) -> Result<()>;

    /// Width of one unit in bits: 8 for byte-unit values, 1 for bitfields.
    fn unit_bits(&self) -> u32 {
        8
    }

    fn children(&self) -> &[Field] {
        &[]
    }

    /// Mutable access to children. Callers must not change child sizes: containers
    /// compute their offset tables once, at construction.
    fn children_mut(&mut self) -> &mut [Field] {
        &mut []
    }

    /// Deep copy with independent storage.
    fn clone_box(&self) -> Box<dyn FieldValue>;
}

impl Clone for Box<dyn FieldValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn check_index(index: usize, size: usize) -> Result<()> {
    if index < size {
        Ok(())
    } else {
        Err(Error::InvalidIndex { index, size })
    }
}

/// Fixed-size contiguous block of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockValue {
    data: Vec<Unit>,
}

impl BlockValue {
    pub fn new(size: usize) -> Self {
        BlockValue {
            data: vec![0; size],
        }
    }
}

impl FieldValue for BlockValue {
    fn kind(&self) -> FieldKind {
        FieldKind::Block
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> Result<Unit> {
        check_index(index, self.data.len())?;
        Ok(self.data[index])
    }

    fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        check_index(index, self.data.len())?;
        self.data[index] = value;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }
}

/// Bit-unit field: `width` units of one bit each, packed eight per byte (MSB first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldValue {
    bits: Vec<u8>,
    width: usize,
}

impl BitfieldValue {
    pub fn new(width: usize) -> Self {
        BitfieldValue {
            bits: vec![0; width.div_ceil(8)],
            width,
        }
    }
}

impl FieldValue for BitfieldValue {
    fn kind(&self) -> FieldKind {
        FieldKind::Bitfield
    }

    fn size(&self) -> usize {
        self.width
    }

    fn get(&self, index: usize) -> Result<Unit> {
        check_index(index, self.width)?;
        Ok((self.bits[index / 8] >> (7 - index % 8)) & 1)
    }

    fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        check_index(index, self.width)?;
        let mask = 1u8 << (7 - index % 8);
        if value & 1 == 1 {
            self.bits[index / 8] |= mask;
        } else {
            self.bits[index / 8] &= !mask;
        }
        Ok(())
    }

    fn unit_bits(&self) -> u32 {
        1
    }

    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }
}

/// Block whose size is drawn uniformly from `[min, max]` when it is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBlockValue {
    data: Vec<Unit>,
    min: usize,
    max: usize,
}

impl VariableBlockValue {
    pub fn new(min: usize, max: usize, rng: &mut dyn RngCore) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidBounds { min, max });
        }
        Self::sized(min, max, rng.gen_range(min..=max))
    }

    /// Block with an already drawn `size`, which must lie in `[min, max]`.
    pub fn sized(min: usize, max: usize, size: usize) -> Result<Self> {
        if min > max || size < min || size > max {
            return Err(Error::InvalidBounds { min, max });
        }
        Ok(VariableBlockValue {
            data: vec![0; size],
            min,
            max,
        })
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }
}

impl FieldValue for VariableBlockValue {
    fn kind(&self) -> FieldKind {
        FieldKind::VariableBlock
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> Result<Unit> {
        check_index(index, self.data.len())?;
        Ok(self.data[index])
    }

    fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        check_index(index, self.data.len())?;
        self.data[index] = value;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }
}

/// Ordered sequence of child fields addressed through one flat index space.
///
/// `offsets[i]` is the first global index of child `i`. Lookups check the last resolved
/// `(child, offset)` pair first, since filling walks indices sequentially, and fall back
/// to a binary search over `offsets`.
#[derive(Debug, Clone)]
pub struct CompoundValue {
    fields: Vec<Field>,
    offsets: Vec<usize>,
    total: usize,
    hint: Cell<Option<(usize, usize)>>,
}

impl CompoundValue {
    pub fn new(fields: Vec<Field>) -> Self {
        let mut compound = CompoundValue {
            fields: Vec::with_capacity(fields.len()),
            offsets: Vec::with_capacity(fields.len()),
            total: 0,
            hint: Cell::new(None),
        };
        for field in fields {
            compound.push(field);
        }
        compound
    }

    /// Append a child; its units follow the current last unit.
    pub fn push(&mut self, field: Field) {
        self.offsets.push(self.total);
        // allocation keeps trees under MAX_UNITS; saturate rather than wrap
        self.total = self.total.saturating_add(field.size());
        self.fields.push(field);
    }

    /// Resolve a global index to `(child, local offset)`, using the cached hint when it applies.
    pub fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if let Some((child, start)) = self.hint.get() {
            if index >= start && index < start + self.fields[child].size() {
                return Ok((child, index - start));
            }
        }
        let (child, local) = self.locate_uncached(index)?;
        self.hint.set(Some((child, self.offsets[child])));
        Ok((child, local))
    }

    /// Resolve a global index by binary search only. Never touches the hint.
    pub fn locate_uncached(&self, index: usize) -> Result<(usize, usize)> {
        check_index(index, self.total)?;
        // Last child starting at or before `index`; empty children sharing that start come
        // earlier, so this is always the one that holds the unit.
        let child = self.offsets.partition_point(|&start| start <= index) - 1;
        Ok((child, index - self.offsets[child]))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FieldValue for CompoundValue {
    fn kind(&self) -> FieldKind {
        FieldKind::Compound
    }

    fn size(&self) -> usize {
        self.total
    }

    fn get(&self, index: usize) -> Result<Unit> {
        let (child, local) = self.locate(index)?;
        self.fields[child].get(local)
    }

    fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        let (child, local) = self.locate(index)?;
        self.fields[child].set(local, value)
    }

    fn children(&self) -> &[Field] {
        &self.fields
    }

    fn children_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }
}

/// Children addressed at bit granularity, exposed as bytes.
///
/// Child bits are concatenated in declaration order (a byte-unit child contributes its
/// bytes MSB first). Byte `i` holds bits `8i..8i+8`; trailing padding bits read as zero
/// and writes to them are dropped.
#[derive(Debug, Clone)]
pub struct CompoundBitfieldValue {
    fields: Vec<Field>,
    bit_offsets: Vec<usize>,
    total_bits: usize,
}

impl CompoundBitfieldValue {
    pub fn new(fields: Vec<Field>) -> Self {
        let mut bit_offsets = Vec::with_capacity(fields.len());
        let mut total_bits: usize = 0;
        for field in &fields {
            bit_offsets.push(total_bits);
            total_bits = field
                .size()
                .checked_mul(field.unit_bits() as usize)
                .and_then(|bits| total_bits.checked_add(bits))
                .unwrap_or(usize::MAX);
        }
        CompoundBitfieldValue {
            fields,
            bit_offsets,
            total_bits,
        }
    }

    pub fn total_bits(&self) -> usize {
        self.total_bits
    }

    /// Child, unit index within it, and bit position inside that unit (0 = MSB).
    fn locate_bit(&self, bit: usize) -> (usize, usize, u32) {
        let child = self.bit_offsets.partition_point(|&start| start <= bit) - 1;
        let local = bit - self.bit_offsets[child];
        let width = self.fields[child].unit_bits() as usize;
        (child, local / width, (width - 1 - local % width) as u32)
    }

    fn get_bit(&self, bit: usize) -> Result<u8> {
        let (child, unit, shift) = self.locate_bit(bit);
        Ok((self.fields[child].get(unit)? >> shift) & 1)
    }

    fn set_bit(&mut self, bit: usize, value: u8) -> Result<()> {
        let (child, unit, shift) = self.locate_bit(bit);
        let field = &mut self.fields[child];
        let current = field.get(unit)?;
        let updated = if value & 1 == 1 {
            current | (1 << shift)
        } else {
            current & !(1 << shift)
        };
        field.set(unit, updated)
    }
}

impl FieldValue for CompoundBitfieldValue {
    fn kind(&self) -> FieldKind {
        FieldKind::CompoundBitfield
    }

    fn size(&self) -> usize {
        self.total_bits.div_ceil(8)
    }

    fn get(&self, index: usize) -> Result<Unit> {
        check_index(index, self.size())?;
        let mut byte = 0u8;
        for b in 0..8 {
            let bit = index * 8 + b;
            if bit < self.total_bits {
                byte |= self.get_bit(bit)? << (7 - b);
            }
        }
        Ok(byte)
    }

    fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        check_index(index, self.size())?;
        for b in 0..8 {
            let bit = index * 8 + b;
            if bit < self.total_bits {
                self.set_bit(bit, (value >> (7 - b)) & 1)?;
            }
        }
        Ok(())
    }

    fn children(&self) -> &[Field] {
        &self.fields
    }

    fn children_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }
}

/// Compound built from clones of a template prototype.
#[derive(Debug, Clone)]
pub struct RepeatValue {
    inner: CompoundValue,
}

impl RepeatValue {
    pub fn new(clones: Vec<Field>) -> Self {
        RepeatValue {
            inner: CompoundValue::new(clones),
        }
    }

    pub fn repeat_count(&self) -> usize {
        self.inner.len()
    }

    pub fn locate(&self, index: usize) -> Result<(usize, usize)> {
        self.inner.locate(index)
    }
}

impl FieldValue for RepeatValue {
    fn kind(&self) -> FieldKind {
        FieldKind::Repeat
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn get(&self, index: usize) -> Result<Unit> {
        self.inner.get(index)
    }

    fn set(&mut self, index: usize, value: Unit) -> Result<()> {
        self.inner.set(index, value)
    }

    fn children(&self) -> &[Field] {
        self.inner.children()
    }

    fn children_mut(&mut self) -> &mut [Field] {
        self.inner.children_mut()
    }

    fn clone_box(&self) -> Box<dyn FieldValue> {
        Box::new(self.clone())
    }
}
