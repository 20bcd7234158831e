//! Content-filling and derived-value operations.
//!
//! A [`Filler`] produces the units of one target field during the fill phase. A
//! [`ValueOp`] computes a number from other fields (sizes, counts, checksums, numeric
//! content); [`ValueFiller`] writes that number into its target.
//!
//! Operations read other fields through a [`FillContext`], which resolves identifiers
//! through the pass's [`FieldMapper`]. Reading a field's *content* is only allowed once
//! that field has been filled: its whole subtree must come before the target in
//! declaration (pre-order) order, otherwise [`Error::FillOrder`] is returned. Size and
//! count reads only need the field to exist.
//!
//! New operations are plugged in through [`FunctionRegistry`] before parsing.

use crate::error::{Error, Result};
use crate::field::{Field, FieldId};
use crate::mapper::FieldMapper;
use crate::value::Unit;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use rand::{Rng, RngCore};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Byte order used when numbers are written into or read from byte-unit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Read access to the tree while one target field is being filled.
#[derive(Debug, Clone, Copy)]
pub struct FillContext<'a> {
    pub root: &'a Field,
    pub mapper: &'a FieldMapper,
    /// Path of the field being filled.
    pub origin: &'a [usize],
    /// Pre-order index of the field being filled.
    pub position: usize,
    pub endianness: Endianness,
}

impl<'a> FillContext<'a> {
    /// Live field for `id`, nearest to the target. Shape only: no ordering requirement.
    pub fn field(&self, id: FieldId) -> Result<&'a Field> {
        let binding = self.mapper.resolve_from(id, self.origin)?;
        self.root
            .at_path(&binding.path)
            .ok_or_else(|| Error::UnboundField(self.mapper.label(id)))
    }

    /// Filled content of `id` as bytes.
    pub fn content(&self, id: FieldId) -> Result<Vec<u8>> {
        self.filled_field(id)?.to_bytes()
    }

    /// Live field for `id`, checked to have been filled before the target.
    pub fn filled_field(&self, id: FieldId) -> Result<&'a Field> {
        let binding = self.mapper.resolve_from(id, self.origin)?;
        if binding.span.end > self.position {
            return Err(Error::FillOrder {
                source_name: self.mapper.label(id),
                target: self.target_label(),
            });
        }
        self.field(id)
    }

    fn target_label(&self) -> String {
        self.root
            .at_path(self.origin)
            .and_then(Field::id)
            .map(|id| self.mapper.label(id))
            .unwrap_or_else(|| format!("<field at {:?}>", self.origin))
    }
}

/// Writes content into a field during the fill phase.
pub trait Filler: fmt::Debug {
    /// Units for `target`, starting at index 0. At most `target.size()` units.
    fn produce(
        &self,
        target: &Field,
        ctx: &FillContext<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Unit>>;

    /// Natural content length in bytes, when it does not depend on the target.
    fn intrinsic_len(&self) -> Option<usize> {
        None
    }

    /// Fields this operation reads.
    fn references(&self) -> Vec<FieldId> {
        Vec::new()
    }
}

/// Computes a derived number from resolved fields.
pub trait ValueOp: fmt::Debug {
    fn eval(&self, ctx: &FillContext<'_>) -> Result<u64>;

    /// Natural width of the result in bytes, if it has one.
    fn width(&self) -> Option<usize> {
        None
    }

    fn references(&self) -> Vec<FieldId> {
        Vec::new()
    }
}

/// Lay `bytes` out as units of `target`: one unit per byte, or eight bits per byte
/// (MSB first) for bit-unit targets.
fn bytes_to_units(bytes: &[u8], target: &Field) -> Result<Vec<Unit>> {
    let units: Vec<Unit> = if target.unit_bits() == 1 {
        bytes
            .iter()
            .flat_map(|&b| (0..8).map(move |i| (b >> (7 - i)) & 1))
            .collect()
    } else {
        bytes.to_vec()
    };
    if units.len() > target.size() {
        return Err(Error::InvalidFieldSize {
            len: units.len(),
            size: target.size(),
        });
    }
    Ok(units)
}

/// Units of `target` holding the low bits of `value`.
pub fn number_to_units(value: u64, target: &Field, endianness: Endianness) -> Vec<Unit> {
    let size = target.size();
    if target.unit_bits() == 1 {
        return (0..size)
            .map(|i| {
                let shift = size - 1 - i;
                if shift >= 64 {
                    0
                } else {
                    ((value >> shift) & 1) as Unit
                }
            })
            .collect();
    }
    let mut buf = [0u8; 8];
    let mut out = vec![0u8; size];
    match endianness {
        Endianness::Big => {
            BigEndian::write_u64(&mut buf, value);
            let n = size.min(8);
            out[size - n..].copy_from_slice(&buf[8 - n..]);
        }
        Endianness::Little => {
            LittleEndian::write_u64(&mut buf, value);
            let n = size.min(8);
            out[..n].copy_from_slice(&buf[..n]);
        }
    }
    out
}

/// Numeric reading of a field's units, each `unit_bits` wide; low 64 bits kept.
pub fn units_to_number(field: &Field, endianness: Endianness) -> Result<u64> {
    let mut units = field.units()?;
    let width = field.unit_bits();
    if width == 8 && endianness == Endianness::Little {
        units.reverse();
    }
    Ok(units
        .into_iter()
        .fold(0u64, |acc, unit| (acc << width) | unit as u64))
}

// ==================== Fillers ====================

/// Copies fixed content; fails if the content is wider than the target.
#[derive(Debug, Clone)]
pub struct ConstFiller {
    bytes: Vec<u8>,
}

impl ConstFiller {
    pub fn new(bytes: Vec<u8>) -> Self {
        ConstFiller { bytes }
    }
}

impl Filler for ConstFiller {
    fn produce(&self, target: &Field, _: &FillContext<'_>, _: &mut dyn RngCore) -> Result<Vec<Unit>> {
        bytes_to_units(&self.bytes, target)
    }

    fn intrinsic_len(&self) -> Option<usize> {
        Some(self.bytes.len())
    }
}

/// Uniformly random bytes; bit-unit targets keep the low bit of each.
#[derive(Debug, Clone, Default)]
pub struct RandomFiller;

impl Filler for RandomFiller {
    fn produce(&self, target: &Field, _: &FillContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Unit>> {
        let mut units = vec![0u8; target.size()];
        rng.fill_bytes(&mut units);
        Ok(units)
    }
}

/// Uniformly random values in `[0, 2^unit_bits)` per unit.
#[derive(Debug, Clone, Default)]
pub struct BitRandomFiller;

impl Filler for BitRandomFiller {
    fn produce(&self, target: &Field, _: &FillContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Unit>> {
        let max = ((1u16 << target.unit_bits()) - 1) as Unit;
        Ok((0..target.size()).map(|_| rng.gen_range(0..=max)).collect())
    }
}

/// Digest over the filled content of one or more source fields, in order.
pub struct DigestFiller<D> {
    name: &'static str,
    sources: Vec<FieldId>,
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestFiller<D> {
    pub fn new(name: &'static str, sources: Vec<FieldId>) -> Self {
        DigestFiller {
            name,
            sources,
            _digest: PhantomData,
        }
    }
}

impl<D> fmt::Debug for DigestFiller<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestFiller")
            .field("name", &self.name)
            .field("sources", &self.sources)
            .finish()
    }
}

impl<D: sha2::Digest> Filler for DigestFiller<D> {
    fn produce(&self, target: &Field, ctx: &FillContext<'_>, _: &mut dyn RngCore) -> Result<Vec<Unit>> {
        let mut hasher = D::new();
        for &source in &self.sources {
            hasher.update(ctx.content(source)?);
        }
        bytes_to_units(&hasher.finalize(), target)
    }

    fn intrinsic_len(&self) -> Option<usize> {
        Some(<D as sha2::Digest>::output_size())
    }

    fn references(&self) -> Vec<FieldId> {
        self.sources.clone()
    }
}

/// Writes the result of a value operation as a number.
#[derive(Debug)]
pub struct ValueFiller {
    op: Box<dyn ValueOp>,
}

impl ValueFiller {
    pub fn new(op: Box<dyn ValueOp>) -> Self {
        ValueFiller { op }
    }
}

impl Filler for ValueFiller {
    fn produce(&self, target: &Field, ctx: &FillContext<'_>, _: &mut dyn RngCore) -> Result<Vec<Unit>> {
        let value = self.op.eval(ctx)?;
        Ok(number_to_units(value, target, ctx.endianness))
    }

    fn intrinsic_len(&self) -> Option<usize> {
        self.op.width()
    }

    fn references(&self) -> Vec<FieldId> {
        self.op.references()
    }
}

// ==================== Value operations ====================

#[derive(Debug, Clone, Copy)]
pub struct ConstValue(pub u64);

impl ValueOp for ConstValue {
    fn eval(&self, _: &FillContext<'_>) -> Result<u64> {
        Ok(self.0)
    }
}

/// Unit count of a field (bits for a bitfield).
#[derive(Debug, Clone, Copy)]
pub struct SizeOf(pub FieldId);

impl ValueOp for SizeOf {
    fn eval(&self, ctx: &FillContext<'_>) -> Result<u64> {
        Ok(ctx.field(self.0)?.size() as u64)
    }

    fn references(&self) -> Vec<FieldId> {
        vec![self.0]
    }
}

/// Child count of a container field.
#[derive(Debug, Clone, Copy)]
pub struct CountOf(pub FieldId);

impl ValueOp for CountOf {
    fn eval(&self, ctx: &FillContext<'_>) -> Result<u64> {
        let field = ctx.field(self.0)?;
        if !field.kind().is_container() {
            return Err(Error::TypeMismatch(format!(
                "`count` needs a container, `{}` is a {}",
                ctx.mapper.label(self.0),
                field.kind().name()
            )));
        }
        Ok(field.children().len() as u64)
    }

    fn references(&self) -> Vec<FieldId> {
        vec![self.0]
    }
}

/// CRC-32 of a field's filled content.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumOf(pub FieldId);

impl ValueOp for ChecksumOf {
    fn eval(&self, ctx: &FillContext<'_>) -> Result<u64> {
        Ok(crc32fast::hash(&ctx.content(self.0)?) as u64)
    }

    fn width(&self) -> Option<usize> {
        Some(4)
    }

    fn references(&self) -> Vec<FieldId> {
        vec![self.0]
    }
}

/// Numeric interpretation of a field's filled content.
#[derive(Debug, Clone, Copy)]
pub struct NodeValue(pub FieldId);

impl ValueOp for NodeValue {
    fn eval(&self, ctx: &FillContext<'_>) -> Result<u64> {
        units_to_number(ctx.filled_field(self.0)?, ctx.endianness)
    }

    fn references(&self) -> Vec<FieldId> {
        vec![self.0]
    }
}

// ==================== Registry ====================

/// Builds a filler bound to the fields it reads.
pub type FillerFactory = Box<dyn Fn(Vec<FieldId>) -> Box<dyn Filler>>;
/// Builds a value operation bound to the field it reads.
pub type ValueFactory = Box<dyn Fn(FieldId) -> Box<dyn ValueOp>>;

/// Function keys available to scripts.
///
/// Defaults: fillers `random`, `bitrandom`, `md5`, `sha1`, `sha224`, `sha256`, `sha384`,
/// `sha512`; values `size`, `count`, `crc32`.
pub struct FunctionRegistry {
    fillers: HashMap<String, FillerFactory>,
    values: HashMap<String, ValueFactory>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        FunctionRegistry {
            fillers: HashMap::new(),
            values: HashMap::new(),
        }
    }

    pub fn register_filler<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Vec<FieldId>) -> Box<dyn Filler> + 'static,
    {
        self.fillers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_value<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(FieldId) -> Box<dyn ValueOp> + 'static,
    {
        self.values.insert(name.to_string(), Box::new(factory));
    }

    /// Register a digest filler under `name` for any RustCrypto hash.
    pub fn register_digest<D: sha2::Digest + 'static>(&mut self, name: &'static str) {
        self.register_filler(name, move |sources| {
            Box::new(DigestFiller::<D>::new(name, sources))
        });
    }

    pub fn is_filler(&self, name: &str) -> bool {
        self.fillers.contains_key(name)
    }

    pub fn is_value(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn make_filler(&self, name: &str, sources: Vec<FieldId>) -> Option<Box<dyn Filler>> {
        self.fillers.get(name).map(|factory| factory(sources))
    }

    pub fn make_value(&self, name: &str, id: FieldId) -> Option<Box<dyn ValueOp>> {
        self.values.get(name).map(|factory| factory(id))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = FunctionRegistry::empty();
        registry.register_filler("random", |_| Box::new(RandomFiller));
        registry.register_filler("bitrandom", |_| Box::new(BitRandomFiller));
        registry.register_digest::<md5::Md5>("md5");
        registry.register_digest::<sha1::Sha1>("sha1");
        registry.register_digest::<sha2::Sha224>("sha224");
        registry.register_digest::<sha2::Sha256>("sha256");
        registry.register_digest::<sha2::Sha384>("sha384");
        registry.register_digest::<sha2::Sha512>("sha512");
        registry.register_value("size", |id| Box::new(SizeOf(id)));
        registry.register_value("count", |id| Box::new(CountOf(id)));
        registry.register_value("crc32", |id| Box::new(ChecksumOf(id)));
        registry
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fillers: Vec<_> = self.fillers.keys().collect();
        let mut values: Vec<_> = self.values.keys().collect();
        fillers.sort();
        values.sort();
        f.debug_struct("FunctionRegistry")
            .field("fillers", &fillers)
            .field("values", &values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{BitfieldValue, BlockValue, CompoundValue};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Fixture {
        root: Field,
        mapper: FieldMapper,
        a: FieldId,
        b: FieldId,
        c: FieldId,
    }

    // root { a: block<4>, c { block<1>, block<1> }, b: block<4> }
    fn fixture() -> Fixture {
        let mut mapper = FieldMapper::new();
        let a = mapper.register_field("a");
        let b = mapper.register_field("b");
        let c = mapper.register_field("c");
        let inner = CompoundValue::new(vec![
            Field::new(BlockValue::new(1)),
            Field::new(BlockValue::new(1)),
        ]);
        let root = Field::new(CompoundValue::new(vec![
            Field::new(BlockValue::new(4)).with_id(Some(a)),
            Field::new(inner).with_id(Some(c)),
            Field::new(BlockValue::new(4)).with_id(Some(b)),
        ]));
        mapper.identify_fields(&root);
        Fixture { root, mapper, a, b, c }
    }

    fn ctx<'a>(f: &'a Fixture, origin: &'a [usize], position: usize) -> FillContext<'a> {
        FillContext {
            root: &f.root,
            mapper: &f.mapper,
            origin,
            position,
            endianness: Endianness::Big,
        }
    }

    #[test]
    fn const_filler_checks_width() {
        let f = fixture();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let target = f.root.at_path(&[0]).unwrap();
        let exact = ConstFiller::new(vec![1, 2, 3, 4]);
        assert_eq!(exact.produce(target, &ctx(&f, &[0], 1), &mut rng), Ok(vec![1, 2, 3, 4]));
        let wide = ConstFiller::new(vec![0; 5]);
        assert_eq!(
            wide.produce(target, &ctx(&f, &[0], 1), &mut rng),
            Err(Error::InvalidFieldSize { len: 5, size: 4 })
        );
    }

    #[test]
    fn content_read_requires_earlier_field() {
        let f = fixture();
        // filling `b` (pre-order 5) may read `a` (1) but `a` may not read `b`
        assert!(ctx(&f, &[2], 5).content(f.a).is_ok());
        assert_eq!(
            ctx(&f, &[0], 1).content(f.b),
            Err(Error::FillOrder {
                source_name: "b".to_string(),
                target: "a".to_string()
            })
        );
        // a field inside `c` cannot read `c` itself
        assert!(ctx(&f, &[1, 1], 4).content(f.c).is_err());
        // sizes are readable in any order
        assert_eq!(SizeOf(f.b).eval(&ctx(&f, &[0], 1)), Ok(4));
    }

    #[test]
    fn count_needs_container() {
        let f = fixture();
        assert_eq!(CountOf(f.c).eval(&ctx(&f, &[2], 5)), Ok(2));
        assert!(matches!(
            CountOf(f.a).eval(&ctx(&f, &[2], 5)),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn numbers_round_into_units() {
        let block = Field::new(BlockValue::new(3));
        assert_eq!(number_to_units(0x0102_0304, &block, Endianness::Big), vec![2, 3, 4]);
        assert_eq!(number_to_units(0x0102_0304, &block, Endianness::Little), vec![4, 3, 2]);
        let wide = Field::new(BlockValue::new(10));
        assert_eq!(
            number_to_units(0x0102, &wide, Endianness::Big),
            vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 2]
        );
        let bits = Field::new(BitfieldValue::new(4));
        assert_eq!(number_to_units(5, &bits, Endianness::Big), vec![0, 1, 0, 1]);
    }

    #[test]
    fn node_value_reads_units() {
        let mut block = Field::new(BlockValue::new(2));
        block.write_units(&[0x12, 0x34]).unwrap();
        assert_eq!(units_to_number(&block, Endianness::Big), Ok(0x1234));
        assert_eq!(units_to_number(&block, Endianness::Little), Ok(0x3412));
        let mut bits = Field::new(BitfieldValue::new(3));
        bits.write_units(&[1, 1, 0]).unwrap();
        assert_eq!(units_to_number(&bits, Endianness::Big), Ok(6));
    }

    #[test]
    fn default_registry_keys() {
        let registry = FunctionRegistry::default();
        for key in ["random", "bitrandom", "md5", "sha1", "sha256", "sha512"] {
            assert!(registry.is_filler(key), "{}", key);
        }
        for key in ["size", "count", "crc32"] {
            assert!(registry.is_value(key), "{}", key);
        }
        let md5 = registry.make_filler("md5", vec![FieldId(0)]).unwrap();
        assert_eq!(md5.intrinsic_len(), Some(16));
        assert_eq!(md5.references(), vec![FieldId(0)]);
        assert!(registry.make_value("nope", FieldId(0)).is_none());
    }

    #[test]
    fn bitrandom_respects_unit_width() {
        let f = fixture();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let bits = Field::new(BitfieldValue::new(64));
        let units = BitRandomFiller.produce(&bits, &ctx(&f, &[0], 1), &mut rng).unwrap();
        assert_eq!(units.len(), 64);
        assert!(units.iter().all(|&u| u <= 1));
        assert!(units.iter().any(|&u| u == 1));
    }
}
