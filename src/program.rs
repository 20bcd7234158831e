//! A parsed script and its generation pass: allocate → identify → fill.

use crate::ast::{Arena, FieldDecl, Script};
use crate::error::{Error, Result};
use crate::field::Field;
use crate::functions::{Endianness, FillContext};
use crate::mapper::FieldMapper;
use rand::RngCore;

/// Parsed script, reusable across any number of generation passes.
#[derive(Debug)]
pub struct Program {
    arena: Arena,
    script: Script,
    mapper: FieldMapper,
    endianness: Endianness,
    fixed_shape: bool,
}

impl Program {
    pub(crate) fn new(arena: Arena, script: Script, mapper: FieldMapper) -> Self {
        let fixed_shape = arena.decls().all(FieldDecl::has_fixed_shape);
        Program {
            arena,
            script,
            mapper,
            endianness: Endianness::default(),
            fixed_shape,
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn mapper(&self) -> &FieldMapper {
        &self.mapper
    }

    /// Whether every pass allocates the same tree shape. Built-in fillers fail only on
    /// shape (ordering, names, widths), so a failing pass of such a program fails on
    /// every seed.
    pub fn has_fixed_shape(&self) -> bool {
        self.fixed_shape
    }

    /// Allocate a fresh tree and bind its identifiers. The result is ready for [`fill`].
    ///
    /// [`fill`]: Program::fill
    pub fn root_field(&mut self, rng: &mut dyn RngCore) -> Result<Field> {
        let root = self.script.allocate(&self.arena, rng)?;
        self.mapper.identify_fields(&root);
        tracing::debug!(
            size = root.size(),
            fields = root.node_count(),
            "allocated root field"
        );
        Ok(root)
    }

    /// Run every bound filler once, in pre-order. `root` must be the tree returned by the
    /// latest [`root_field`](Program::root_field) call.
    pub fn fill(&self, root: &mut Field, rng: &mut dyn RngCore) -> Result<()> {
        let mut jobs = Vec::new();
        root.walk(&mut |field, path, position| {
            if let Some(filler) = field.filler() {
                jobs.push((path.to_vec(), position, filler));
            }
        });
        for (path, position, filler) in jobs {
            let units = {
                let target = root.at_path(&path).ok_or_else(|| lost(&path))?;
                let ctx = FillContext {
                    root: &*root,
                    mapper: &self.mapper,
                    origin: &path,
                    position,
                    endianness: self.endianness,
                };
                self.arena.filler(filler).produce(target, &ctx, rng)?
            };
            root.at_path_mut(&path)
                .ok_or_else(|| lost(&path))?
                .write_units(&units)?;
        }
        Ok(())
    }

    /// One complete generation pass.
    pub fn generate(&mut self, rng: &mut dyn RngCore) -> Result<Field> {
        let mut root = self.root_field(rng)?;
        self.fill(&mut root, rng)?;
        Ok(root)
    }
}

fn lost(path: &[usize]) -> Error {
    Error::UnboundField(format!("<field at {:?}>", path))
}
