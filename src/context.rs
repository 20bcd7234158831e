//! Node factory used by script front ends.
//!
//! A [`ParseContext`] holds the state one script's front end needs: the arena, the
//! name→identifier table, the function registry, and the names that have been
//! declared or referenced. Front ends call its `make`-style methods bottom-up and end
//! with [`ParseContext::finish`], which runs the post-parse constraint check once and
//! yields a [`Program`].
//!
//! Field names may be referenced before they are declared. Unknown names are reported
//! by `finish`. Function keys and templates must already exist when they are used.

use crate::ast::{Arena, DeclId, FieldDecl, FillerId, Script, TemplateDef, TemplateId};
use crate::error::{Error, Result};
use crate::field::FieldId;
use crate::functions::{
    BitRandomFiller, ConstFiller, ConstValue, Filler, FunctionRegistry, NodeValue,
    RandomFiller, ValueFiller, ValueOp,
};
use crate::mapper::FieldMapper;
use crate::program::Program;
use crate::value::MAX_UNITS;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct ParseContext {
    arena: Arena,
    mapper: FieldMapper,
    registry: FunctionRegistry,
    templates: HashMap<String, TemplateId>,
    declared: HashSet<FieldId>,
    referenced: Vec<FieldId>,
    default_filler: Option<FillerId>,
    default_bit_filler: Option<FillerId>,
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::new(FunctionRegistry::default())
    }
}

impl ParseContext {
    pub fn new(registry: FunctionRegistry) -> Self {
        ParseContext {
            arena: Arena::default(),
            mapper: FieldMapper::new(),
            registry,
            templates: HashMap::new(),
            declared: HashSet::new(),
            referenced: Vec::new(),
            default_filler: None,
            default_bit_filler: None,
        }
    }

    pub fn mapper(&self) -> &FieldMapper {
        &self.mapper
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    fn declare(&mut self, name: Option<&str>) -> Option<FieldId> {
        let id = self.mapper.register_field(name?);
        self.declared.insert(id);
        Some(id)
    }

    fn reference(&mut self, name: &str) -> FieldId {
        let id = self.mapper.register_field(name);
        self.referenced.push(id);
        id
    }

    fn add_filler(&mut self, filler: Box<dyn Filler>) -> FillerId {
        self.arena.add_filler(filler)
    }

    /// Shared uniform-random filler for blocks declared without one.
    pub fn default_filler(&mut self) -> FillerId {
        match self.default_filler {
            Some(id) => id,
            None => {
                let id = self.add_filler(Box::new(RandomFiller));
                self.default_filler = Some(id);
                id
            }
        }
    }

    /// Shared random-bit filler for bitfields declared without one.
    pub fn default_bit_filler(&mut self) -> FillerId {
        match self.default_bit_filler {
            Some(id) => id,
            None => {
                let id = self.add_filler(Box::new(BitRandomFiller));
                self.default_bit_filler = Some(id);
                id
            }
        }
    }

    // ==================== Fillers and values ====================

    /// Filler writing the result of `op` as a number.
    pub fn value_filler(&mut self, op: Box<dyn ValueOp>) -> FillerId {
        self.add_filler(Box::new(ValueFiller::new(op)))
    }

    pub fn const_string(&mut self, bytes: Vec<u8>) -> FillerId {
        self.add_filler(Box::new(ConstFiller::new(bytes)))
    }

    pub fn const_value(&mut self, value: u64) -> FillerId {
        self.value_filler(Box::new(ConstValue(value)))
    }

    /// Numeric content of the field called `name`.
    pub fn node_value(&mut self, name: &str) -> FillerId {
        let id = self.reference(name);
        self.value_filler(Box::new(NodeValue(id)))
    }

    /// `function(args...)`: a registered filler bound to `args`, or a registered value
    /// function (exactly one argument) written as a number.
    pub fn function_filler(&mut self, function: &str, args: &[&str]) -> Result<FillerId> {
        if self.registry.is_filler(function) {
            let ids = args.iter().map(|name| self.reference(name)).collect();
            let filler = self
                .registry
                .make_filler(function, ids)
                .ok_or_else(|| Error::UnregisteredName(function.to_string()))?;
            return Ok(self.add_filler(filler));
        }
        if self.registry.is_value(function) {
            let [arg] = args else {
                return Err(Error::Parse(format!(
                    "{}() takes exactly one field, got {}",
                    function,
                    args.len()
                )));
            };
            let id = self.reference(arg);
            let op = self
                .registry
                .make_value(function, id)
                .ok_or_else(|| Error::UnregisteredName(function.to_string()))?;
            return Ok(self.value_filler(op));
        }
        Err(Error::UnregisteredName(format!("function `{}`", function)))
    }

    // ==================== Field declarations ====================

    pub fn block(
        &mut self,
        filler: Option<FillerId>,
        size: usize,
        name: Option<&str>,
    ) -> Result<DeclId> {
        check_units(size)?;
        let filler = filler.unwrap_or_else(|| self.default_filler());
        let id = self.declare(name);
        Ok(self.arena.add_decl(FieldDecl::Block { filler, size, id }))
    }

    /// Block sized by its filler's intrinsic content length.
    pub fn auto(&mut self, filler: FillerId, name: Option<&str>) -> Result<DeclId> {
        let size = self.arena.filler(filler).intrinsic_len().ok_or_else(|| {
            Error::Parse(format!(
                "auto field {} needs a filler with a fixed length",
                name.unwrap_or("<anonymous>")
            ))
        })?;
        let id = self.declare(name);
        Ok(self.arena.add_decl(FieldDecl::Auto { filler, size, id }))
    }

    pub fn bitfield(
        &mut self,
        filler: Option<FillerId>,
        width: usize,
        name: Option<&str>,
    ) -> Result<DeclId> {
        check_units(width)?;
        let filler = filler.unwrap_or_else(|| self.default_bit_filler());
        let id = self.declare(name);
        Ok(self.arena.add_decl(FieldDecl::Bitfield { filler, width, id }))
    }

    pub fn var_block(
        &mut self,
        filler: Option<FillerId>,
        min: usize,
        max: usize,
        name: Option<&str>,
    ) -> Result<DeclId> {
        if min > max {
            return Err(Error::InvalidBounds { min, max });
        }
        check_units(max)?;
        let filler = filler.unwrap_or_else(|| self.default_filler());
        let id = self.declare(name);
        Ok(self.arena.add_decl(FieldDecl::VarBlock { filler, min, max, id }))
    }

    pub fn compound(&mut self, children: Vec<DeclId>, name: Option<&str>) -> DeclId {
        let children = self.pack_bits(children);
        let id = self.declare(name);
        self.arena.add_decl(FieldDecl::Compound { children, id })
    }

    pub fn choice(&mut self, children: Vec<DeclId>, name: Option<&str>) -> Result<DeclId> {
        if children.is_empty() {
            return Err(Error::Parse(format!(
                "choice {} has no alternatives",
                name.unwrap_or("<anonymous>")
            )));
        }
        // alternatives are exclusive, so each bit-unit branch gets its own byte
        let children = children
            .into_iter()
            .map(|child| {
                if self.arena.decl(child).is_bit_unit() {
                    self.compound_bitfield(vec![child], None)
                } else {
                    child
                }
            })
            .collect();
        let id = self.declare(name);
        Ok(self.arena.add_decl(FieldDecl::Choice { children, id }))
    }

    pub fn compound_bitfield(&mut self, children: Vec<DeclId>, name: Option<&str>) -> DeclId {
        let id = self.declare(name);
        self.arena.add_decl(FieldDecl::CompoundBitfield { children, id })
    }

    pub fn template_def(&mut self, name: &str, children: Vec<DeclId>) -> Result<TemplateId> {
        if self.templates.contains_key(name) {
            return Err(Error::Parse(format!("template {} defined twice", name)));
        }
        let children = self.pack_bits(children);
        let template = self.arena.add_template(TemplateDef {
            name: name.to_string(),
            children,
        });
        self.templates.insert(name.to_string(), template);
        Ok(template)
    }

    pub fn template_ref(&mut self, name: &str, min: usize, max: usize) -> Result<DeclId> {
        let template = *self
            .templates
            .get(name)
            .ok_or_else(|| Error::UnregisteredName(format!("template `{}`", name)))?;
        if min > max {
            return Err(Error::InvalidBounds { min, max });
        }
        // each clone weighs at least one unit of the tree budget
        check_units(max)?;
        Ok(self.arena.add_decl(FieldDecl::TemplateRef { template, min, max }))
    }

    /// Runs of bit-unit siblings outside a `bits` block are grouped into an implicit
    /// compound bitfield so byte-unit containers stay byte aligned.
    fn pack_bits(&mut self, children: Vec<DeclId>) -> Vec<DeclId> {
        let mut out = Vec::with_capacity(children.len());
        let mut run = Vec::new();
        for child in children {
            if self.arena.decl(child).is_bit_unit() {
                run.push(child);
                continue;
            }
            if !run.is_empty() {
                let bits = std::mem::take(&mut run);
                out.push(self.compound_bitfield(bits, None));
            }
            out.push(child);
        }
        if !run.is_empty() {
            out.push(self.compound_bitfield(run, None));
        }
        out
    }

    /// Post-parse constraint check; yields the program on success.
    pub fn finish(mut self, fields: Vec<DeclId>) -> Result<Program> {
        if fields.is_empty() {
            return Err(Error::Parse("script declares no fields".to_string()));
        }
        for &id in &self.referenced {
            if !self.declared.contains(&id) {
                return Err(Error::UnregisteredName(format!(
                    "field `{}`",
                    self.mapper.label(id)
                )));
            }
        }
        let fields = self.pack_bits(fields);
        tracing::debug!(
            fields = fields.len(),
            names = self.mapper.registered_count(),
            templates = self.templates.len(),
            "script checked"
        );
        Ok(Program::new(self.arena, Script { fields }, self.mapper))
    }
}

/// Sizes, widths and repeat counts are capped so allocation cannot overflow.
fn check_units(units: usize) -> Result<()> {
    if units > MAX_UNITS {
        return Err(Error::TooLarge {
            units,
            limit: MAX_UNITS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_reference_resolves_at_finish() {
        let mut ctx = ParseContext::default();
        let crc = ctx.function_filler("crc32", &["data"]).unwrap();
        let a = ctx.block(Some(crc), 4, Some("sum")).unwrap();
        let b = ctx.block(None, 8, Some("data")).unwrap();
        let program = ctx.finish(vec![a, b]).unwrap();
        assert!(program.mapper().lookup("data").is_some());
    }

    #[test]
    fn undeclared_reference_fails_finish() {
        let mut ctx = ParseContext::default();
        let size = ctx.function_filler("size", &["ghost"]).unwrap();
        let a = ctx.block(Some(size), 4, None).unwrap();
        assert_eq!(
            ctx.finish(vec![a]).unwrap_err(),
            Error::UnregisteredName("field `ghost`".to_string())
        );
    }

    #[test]
    fn unknown_function_is_rejected() {
        let mut ctx = ParseContext::default();
        assert!(matches!(
            ctx.function_filler("whirlpool", &["x"]),
            Err(Error::UnregisteredName(_))
        ));
        assert!(matches!(
            ctx.function_filler("size", &["x", "y"]),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn auto_takes_filler_length() {
        let mut ctx = ParseContext::default();
        let magic = ctx.const_string(b"PK\x03\x04".to_vec());
        let decl = ctx.auto(magic, Some("magic")).unwrap();
        assert!(matches!(ctx.arena().decl(decl), FieldDecl::Auto { size: 4, .. }));
        let random = ctx.default_filler();
        assert!(matches!(ctx.auto(random, None), Err(Error::Parse(_))));
    }

    #[test]
    fn loose_bitfields_are_grouped() {
        let mut ctx = ParseContext::default();
        let a = ctx.bitfield(None, 3, Some("a")).unwrap();
        let b = ctx.bitfield(None, 5, Some("b")).unwrap();
        let c = ctx.block(None, 1, None).unwrap();
        let d = ctx.bitfield(None, 1, None).unwrap();
        let compound = ctx.compound(vec![a, b, c, d], None);
        let FieldDecl::Compound { children, .. } = ctx.arena().decl(compound) else {
            panic!("expected compound");
        };
        assert_eq!(children.len(), 3);
        assert!(matches!(
            ctx.arena().decl(children[0]),
            FieldDecl::CompoundBitfield { children, .. } if children == &vec![a, b]
        ));
        assert_eq!(children[1], c);
    }

    #[test]
    fn template_must_exist() {
        let mut ctx = ParseContext::default();
        assert!(matches!(
            ctx.template_ref("Missing", 1, 2),
            Err(Error::UnregisteredName(_))
        ));
        let b = ctx.block(None, 1, None).unwrap();
        ctx.template_def("T", vec![b]).unwrap();
        assert!(ctx.template_ref("T", 1, 2).is_ok());
        assert_eq!(
            ctx.template_ref("T", 3, 2).unwrap_err(),
            Error::InvalidBounds { min: 3, max: 2 }
        );
        assert!(ctx.template_def("T", vec![]).is_err());
    }

    #[test]
    fn oversized_declarations_are_rejected() {
        let mut ctx = ParseContext::default();
        let too_large = Error::TooLarge {
            units: MAX_UNITS + 1,
            limit: MAX_UNITS,
        };
        assert_eq!(ctx.block(None, MAX_UNITS + 1, None).unwrap_err(), too_large);
        assert_eq!(ctx.bitfield(None, MAX_UNITS + 1, None).unwrap_err(), too_large);
        assert_eq!(ctx.var_block(None, 0, MAX_UNITS + 1, None).unwrap_err(), too_large);
        assert!(ctx.block(None, MAX_UNITS, None).is_ok());
        let b = ctx.block(None, 1, None).unwrap();
        ctx.template_def("T", vec![b]).unwrap();
        assert_eq!(ctx.template_ref("T", 0, usize::MAX).unwrap_err(), Error::TooLarge {
            units: usize::MAX,
            limit: MAX_UNITS,
        });
    }

    #[test]
    fn choice_wraps_each_bit_branch() {
        let mut ctx = ParseContext::default();
        let a = ctx.bitfield(None, 1, None).unwrap();
        let b = ctx.bitfield(None, 2, None).unwrap();
        let choice = ctx.choice(vec![a, b], None).unwrap();
        let FieldDecl::Choice { children, .. } = ctx.arena().decl(choice) else {
            panic!("expected choice");
        };
        assert_eq!(children.len(), 2);
        assert!(children
            .iter()
            .all(|&c| matches!(ctx.arena().decl(c), FieldDecl::CompoundBitfield { children, .. } if children.len() == 1)));
    }
}
