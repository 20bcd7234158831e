//! Abstract syntax tree for fuzz scripts and the allocation protocol.
//!
//! Nodes live in an [`Arena`] owned by the parsed [`Program`](crate::program::Program)
//! and refer to each other by typed index. They are built once by the
//! [`ParseContext`](crate::context::ParseContext) and never modified afterwards; every
//! generation pass allocates a fresh [`Field`] tree from them.

use crate::error::{Error, Result};
use crate::field::{Field, FieldId};
use crate::functions::Filler;
use crate::value::{
    BitfieldValue, BlockValue, CompoundBitfieldValue, CompoundValue, RepeatValue,
    VariableBlockValue, MAX_UNITS, NODE_WEIGHT,
};
use rand::{Rng, RngCore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FillerId(pub usize);

/// Owner of every node of one parsed script.
#[derive(Debug, Default)]
pub struct Arena {
    decls: Vec<FieldDecl>,
    templates: Vec<TemplateDef>,
    fillers: Vec<Box<dyn Filler>>,
}

impl Arena {
    pub fn add_decl(&mut self, decl: FieldDecl) -> DeclId {
        self.decls.push(decl);
        DeclId(self.decls.len() - 1)
    }

    pub fn add_template(&mut self, template: TemplateDef) -> TemplateId {
        self.templates.push(template);
        TemplateId(self.templates.len() - 1)
    }

    pub fn add_filler(&mut self, filler: Box<dyn Filler>) -> FillerId {
        self.fillers.push(filler);
        FillerId(self.fillers.len() - 1)
    }

    pub fn decl(&self, id: DeclId) -> &FieldDecl {
        &self.decls[id.0]
    }

    pub fn template(&self, id: TemplateId) -> &TemplateDef {
        &self.templates[id.0]
    }

    pub fn filler(&self, id: FillerId) -> &dyn Filler {
        self.fillers[id.0].as_ref()
    }

    pub fn fillers(&self) -> impl Iterator<Item = &dyn Filler> + '_ {
        self.fillers.iter().map(|f| f.as_ref())
    }

    pub fn decls(&self) -> impl Iterator<Item = &FieldDecl> + '_ {
        self.decls.iter()
    }

    /// Allocate the declaration `id`.
    pub fn allocate(&self, id: DeclId, rng: &mut dyn RngCore) -> Result<Field> {
        self.decl(id).allocate(self, rng)
    }

    fn allocate_in(
        &self,
        id: DeclId,
        rng: &mut dyn RngCore,
        budget: &mut Budget,
    ) -> Result<Field> {
        self.decl(id).allocate_in(self, rng, budget)
    }

    fn allocate_all(
        &self,
        ids: &[DeclId],
        rng: &mut dyn RngCore,
        budget: &mut Budget,
    ) -> Result<Vec<Field>> {
        ids.iter()
            .map(|&id| self.allocate_in(id, rng, budget))
            .collect()
    }
}

/// Units one allocation may still claim. Each field costs its units plus
/// [`NODE_WEIGHT`], charged before its storage is reserved.
#[derive(Debug)]
struct Budget {
    remaining: usize,
}

impl Budget {
    fn new() -> Self {
        Budget {
            remaining: MAX_UNITS,
        }
    }

    fn charge(&mut self, units: usize) -> Result<()> {
        self.remaining = self
            .remaining
            .checked_sub(units)
            .ok_or(Error::TooLarge {
                units,
                limit: MAX_UNITS,
            })?;
        Ok(())
    }

    fn charge_node(&mut self, units: usize) -> Result<()> {
        self.charge(units.saturating_add(NODE_WEIGHT))
    }
}

/// Field declaration node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDecl {
    /// `block<size> name = filler;`
    Block {
        filler: FillerId,
        size: usize,
        id: Option<FieldId>,
    },
    /// `auto name = filler;` with the size taken from the filler's content length.
    Auto {
        filler: FillerId,
        size: usize,
        id: Option<FieldId>,
    },
    /// `bitfield<width> name = value;`
    Bitfield {
        filler: FillerId,
        width: usize,
        id: Option<FieldId>,
    },
    /// `varblock<min, max> name = filler;`
    VarBlock {
        filler: FillerId,
        min: usize,
        max: usize,
        id: Option<FieldId>,
    },
    Compound {
        children: Vec<DeclId>,
        id: Option<FieldId>,
    },
    /// Exactly one child is allocated per pass.
    Choice {
        children: Vec<DeclId>,
        id: Option<FieldId>,
    },
    /// `bits name { ... }`: children share bit-granular addressing.
    CompoundBitfield {
        children: Vec<DeclId>,
        id: Option<FieldId>,
    },
    /// `Template<min, max>;`
    TemplateRef {
        template: TemplateId,
        min: usize,
        max: usize,
    },
}

impl FieldDecl {
    pub fn id(&self) -> Option<FieldId> {
        match self {
            FieldDecl::Block { id, .. }
            | FieldDecl::Auto { id, .. }
            | FieldDecl::Bitfield { id, .. }
            | FieldDecl::VarBlock { id, .. }
            | FieldDecl::Compound { id, .. }
            | FieldDecl::Choice { id, .. }
            | FieldDecl::CompoundBitfield { id, .. } => *id,
            FieldDecl::TemplateRef { .. } => None,
        }
    }

    /// Whether every allocation of this node draws nothing from the rng and so has the
    /// same shape: no size range, no repeat range, at most one alternative.
    pub fn has_fixed_shape(&self) -> bool {
        match self {
            FieldDecl::VarBlock { min, max, .. } | FieldDecl::TemplateRef { min, max, .. } => {
                min == max
            }
            FieldDecl::Choice { children, .. } => children.len() <= 1,
            _ => true,
        }
    }

    /// Whether the allocated field uses bit units.
    pub fn is_bit_unit(&self) -> bool {
        matches!(self, FieldDecl::Bitfield { .. })
    }

    /// Build this pass's field. Random choices (variable sizes, choice branches,
    /// repeat counts) draw from `rng` depth-first in declaration order.
    ///
    /// Fails with [`Error::TooLarge`] when the subtree outgrows [`MAX_UNITS`].
    pub fn allocate(&self, arena: &Arena, rng: &mut dyn RngCore) -> Result<Field> {
        self.allocate_in(arena, rng, &mut Budget::new())
    }

    fn allocate_in(
        &self,
        arena: &Arena,
        rng: &mut dyn RngCore,
        budget: &mut Budget,
    ) -> Result<Field> {
        let field = match self {
            FieldDecl::Block { filler, size, .. } | FieldDecl::Auto { filler, size, .. } => {
                budget.charge_node(*size)?;
                Field::new(BlockValue::new(*size)).with_filler(Some(*filler))
            }
            FieldDecl::Bitfield { filler, width, .. } => {
                budget.charge_node(*width)?;
                Field::new(BitfieldValue::new(*width)).with_filler(Some(*filler))
            }
            FieldDecl::VarBlock {
                filler, min, max, ..
            } => {
                if min > max {
                    return Err(Error::InvalidBounds {
                        min: *min,
                        max: *max,
                    });
                }
                let size = rng.gen_range(*min..=*max);
                budget.charge_node(size)?;
                Field::new(VariableBlockValue::sized(*min, *max, size)?).with_filler(Some(*filler))
            }
            FieldDecl::Compound { children, .. } => {
                budget.charge_node(0)?;
                Field::new(CompoundValue::new(arena.allocate_all(children, rng, budget)?))
            }
            FieldDecl::Choice { children, .. } => {
                if children.is_empty() {
                    return Err(Error::Parse("choice without alternatives".to_string()));
                }
                budget.charge_node(0)?;
                let pick = children[rng.gen_range(0..children.len())];
                Field::new(CompoundValue::new(vec![arena.allocate_in(pick, rng, budget)?]))
            }
            FieldDecl::CompoundBitfield { children, .. } => {
                budget.charge_node(0)?;
                Field::new(CompoundBitfieldValue::new(arena.allocate_all(children, rng, budget)?))
            }
            FieldDecl::TemplateRef { template, min, max } => {
                return arena
                    .template(*template)
                    .allocate_in(arena, rng, *min, *max, budget);
            }
        };
        Ok(field.with_id(self.id()))
    }
}

/// Reusable subtree, instantiated a random number of times per allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDef {
    pub name: String,
    pub children: Vec<DeclId>,
}

impl TemplateDef {
    /// Draw a repeat count in `[min, max]`, allocate the prototype once and clone it that
    /// many times. Clones keep the prototype's identifiers.
    pub fn allocate(
        &self,
        arena: &Arena,
        rng: &mut dyn RngCore,
        min: usize,
        max: usize,
    ) -> Result<Field> {
        self.allocate_in(arena, rng, min, max, &mut Budget::new())
    }

    fn allocate_in(
        &self,
        arena: &Arena,
        rng: &mut dyn RngCore,
        min: usize,
        max: usize,
        budget: &mut Budget,
    ) -> Result<Field> {
        if min > max {
            return Err(Error::InvalidBounds { min, max });
        }
        let repeats = rng.gen_range(min..=max);
        budget.charge_node(0)?;
        let before = budget.remaining;
        budget.charge_node(0)?;
        let prototype = Field::new(CompoundValue::new(arena.allocate_all(
            &self.children,
            rng,
            budget,
        )?));
        // the prototype itself was paid for; charge the remaining clones up front
        let cost = before - budget.remaining;
        budget.charge(cost.saturating_mul(repeats.saturating_sub(1)))?;
        let clones = vec![prototype; repeats];
        tracing::trace!(template = %self.name, repeats, "instantiated template");
        Ok(Field::new(RepeatValue::new(clones)))
    }
}

/// Root node: ordered top-level declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub fields: Vec<DeclId>,
}

impl Script {
    /// Root compound of one pass: every top-level declaration, in order.
    pub fn allocate(&self, arena: &Arena, rng: &mut dyn RngCore) -> Result<Field> {
        let mut budget = Budget::new();
        budget.charge_node(0)?;
        Ok(Field::new(CompoundValue::new(arena.allocate_all(
            &self.fields,
            rng,
            &mut budget,
        )?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::RandomFiller;
    use crate::value::FieldKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn arena_with_filler() -> (Arena, FillerId) {
        let mut arena = Arena::default();
        let filler = arena.add_filler(Box::new(RandomFiller));
        (arena, filler)
    }

    #[test]
    fn choice_allocates_one_branch() {
        let (mut arena, filler) = arena_with_filler();
        let a = arena.add_decl(FieldDecl::Block { filler, size: 1, id: None });
        let b = arena.add_decl(FieldDecl::Block { filler, size: 2, id: None });
        let choice = arena.add_decl(FieldDecl::Choice {
            children: vec![a, b],
            id: Some(FieldId(0)),
        });
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut sizes = std::collections::HashSet::new();
        for _ in 0..64 {
            let field = arena.allocate(choice, &mut rng).unwrap();
            assert_eq!(field.children().len(), 1);
            assert_eq!(field.id(), Some(FieldId(0)));
            sizes.insert(field.size());
        }
        assert_eq!(sizes.len(), 2);
    }

    #[test]
    fn template_clones_prototype() {
        let (mut arena, filler) = arena_with_filler();
        let var = arena.add_decl(FieldDecl::VarBlock {
            filler,
            min: 1,
            max: 50,
            id: Some(FieldId(3)),
        });
        let template = arena.add_template(TemplateDef {
            name: "T".to_string(),
            children: vec![var],
        });
        let decl = arena.add_decl(FieldDecl::TemplateRef { template, min: 3, max: 3 });
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let field = arena.allocate(decl, &mut rng).unwrap();
        assert_eq!(field.kind(), FieldKind::Repeat);
        assert_eq!(field.children().len(), 3);
        let size = field.children()[0].size();
        for clone in field.children() {
            assert_eq!(clone.size(), size);
            assert_eq!(clone.children()[0].id(), Some(FieldId(3)));
        }
        assert_eq!(field.size(), 3 * size);
    }

    #[test]
    fn template_rejects_inverted_bounds() {
        let (mut arena, _) = arena_with_filler();
        let template = arena.add_template(TemplateDef {
            name: "T".to_string(),
            children: vec![],
        });
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            arena.template(template).allocate(&arena, &mut rng, 4, 2).unwrap_err(),
            Error::InvalidBounds { min: 4, max: 2 }
        );
    }

    #[test]
    fn fixed_shape_excludes_random_draws() {
        let (mut arena, filler) = arena_with_filler();
        let a = arena.add_decl(FieldDecl::Block { filler, size: 1, id: None });
        let b = arena.add_decl(FieldDecl::VarBlock { filler, min: 2, max: 2, id: None });
        assert!(arena.decls().all(FieldDecl::has_fixed_shape));
        let one = arena.add_decl(FieldDecl::Choice { children: vec![a], id: None });
        assert!(arena.decl(one).has_fixed_shape());
        let two = arena.add_decl(FieldDecl::Choice { children: vec![a, b], id: None });
        assert!(!arena.decl(two).has_fixed_shape());
        let ranged = FieldDecl::VarBlock { filler, min: 0, max: 2, id: None };
        assert!(!ranged.has_fixed_shape());
    }

    #[test]
    fn allocation_stops_at_unit_limit() {
        let (mut arena, filler) = arena_with_filler();
        let block = arena.add_decl(FieldDecl::Block {
            filler,
            size: MAX_UNITS / 4,
            id: None,
        });
        let template = arena.add_template(TemplateDef {
            name: "T".to_string(),
            children: vec![block],
        });
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let three = arena.add_decl(FieldDecl::TemplateRef { template, min: 3, max: 3 });
        assert_eq!(arena.allocate(three, &mut rng).unwrap().size(), 3 * (MAX_UNITS / 4));
        let many = arena.add_decl(FieldDecl::TemplateRef {
            template,
            min: MAX_UNITS,
            max: MAX_UNITS,
        });
        assert!(matches!(
            arena.allocate(many, &mut rng),
            Err(Error::TooLarge { .. })
        ));
        let nested = arena.add_decl(FieldDecl::Compound {
            children: vec![three, three],
            id: None,
        });
        assert!(matches!(
            arena.allocate(nested, &mut rng),
            Err(Error::TooLarge { .. })
        ));
    }
}
