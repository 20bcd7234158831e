//! Parse script source into a [`Program`] using PEST.
//!
//! The front end only walks the pest tree and drives a [`ParseContext`]; all semantic
//! checks live in the context.

use crate::ast::{DeclId, FillerId};
use crate::context::ParseContext;
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::program::Program;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct ScriptParser;

/// Parse script source with the default function registry.
pub fn parse(source: &str) -> Result<Program> {
    parse_with(source, FunctionRegistry::default())
}

/// Parse script source with a caller-supplied function registry.
pub fn parse_with(source: &str, registry: FunctionRegistry) -> Result<Program> {
    let pairs = ScriptParser::parse(Rule::script, source)
        .map_err(|e| Error::Parse(e.to_string()))?;
    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("empty parse".to_string()))?;
    let mut ctx = ParseContext::new(registry);
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::template_def => build_template(&mut ctx, inner)?,
            Rule::field_decl => fields.push(build_field(&mut ctx, inner)?),
            _ => {}
        }
    }
    ctx.finish(fields)
}

/// Pieces shared by every declaration rule, in source order.
#[derive(Default)]
struct DeclParts<'i> {
    nums: Vec<usize>,
    name: Option<&'i str>,
    filler: Option<FillerId>,
    children: Vec<DeclId>,
}

impl<'i> DeclParts<'i> {
    fn read(ctx: &mut ParseContext, pair: Pair<'i, Rule>) -> Result<Self> {
        let mut parts = DeclParts::default();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::num => parts.nums.push(parse_num(inner.as_str())?),
                Rule::ident => parts.name = Some(inner.as_str()),
                Rule::filler => parts.filler = Some(build_filler(ctx, inner)?),
                Rule::field_decl => parts.children.push(build_field(ctx, inner)?),
                _ => {}
            }
        }
        Ok(parts)
    }

    fn num(&self, i: usize) -> Result<usize> {
        self.nums
            .get(i)
            .copied()
            .ok_or_else(|| Error::Parse("missing size".to_string()))
    }
}

fn build_template(ctx: &mut ParseContext, pair: Pair<Rule>) -> Result<()> {
    let parts = DeclParts::read(ctx, pair)?;
    let name = parts
        .name
        .ok_or_else(|| Error::Parse("template: missing name".to_string()))?;
    ctx.template_def(name, parts.children)?;
    Ok(())
}

fn build_field(ctx: &mut ParseContext, pair: Pair<Rule>) -> Result<DeclId> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| Error::Parse("empty field declaration".to_string()))?;
    let rule = inner.as_rule();
    let parts = DeclParts::read(ctx, inner)?;
    match rule {
        Rule::block_decl => ctx.block(parts.filler, parts.num(0)?, parts.name),
        Rule::varblock_decl => {
            ctx.var_block(parts.filler, parts.num(0)?, parts.num(1)?, parts.name)
        }
        Rule::bitfield_decl => ctx.bitfield(parts.filler, parts.num(0)?, parts.name),
        Rule::auto_decl => {
            let filler = parts
                .filler
                .ok_or_else(|| Error::Parse("auto: missing filler".to_string()))?;
            ctx.auto(filler, parts.name)
        }
        Rule::compound_decl => Ok(ctx.compound(parts.children, parts.name)),
        Rule::choice_decl => ctx.choice(parts.children, parts.name),
        Rule::bits_decl => Ok(ctx.compound_bitfield(parts.children, parts.name)),
        Rule::template_ref => {
            let name = parts
                .name
                .ok_or_else(|| Error::Parse("template reference: missing name".to_string()))?;
            let min = parts.num(0)?;
            let max = parts.nums.get(1).copied().unwrap_or(min);
            ctx.template_ref(name, min, max)
        }
        other => Err(Error::Parse(format!("unhandled declaration: {:?}", other))),
    }
}

fn build_filler(ctx: &mut ParseContext, pair: Pair<Rule>) -> Result<FillerId> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| Error::Parse("empty filler".to_string()))?;
    match inner.as_rule() {
        Rule::string_lit => Ok(ctx.const_string(parse_string(inner.as_str())?)),
        Rule::num => Ok(ctx.const_value(parse_u64(inner.as_str())?)),
        Rule::ident => Ok(ctx.node_value(inner.as_str())),
        Rule::call => {
            let mut it = inner.into_inner();
            let function = it
                .next()
                .ok_or_else(|| Error::Parse("call: missing function".to_string()))?;
            let args: Vec<&str> = it.map(|p| p.as_str()).collect();
            ctx.function_filler(function.as_str(), &args)
        }
        other => Err(Error::Parse(format!("unhandled filler: {:?}", other))),
    }
}

fn parse_u64(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| Error::Parse(format!("number out of range: {}", s)))
}

fn parse_num(s: &str) -> Result<usize> {
    usize::try_from(parse_u64(s)?).map_err(|_| Error::Parse(format!("size out of range: {}", s)))
}

/// Bytes of a quoted literal with `\xHH \n \r \t \0 \\ \"` escapes.
fn parse_string(s: &str) -> Result<Vec<u8>> {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| Error::Parse(format!("bad string literal: {}", s)))?;
    let mut out = Vec::with_capacity(inner.len());
    let mut bytes = inner.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let escaped = bytes
            .next()
            .ok_or_else(|| Error::Parse("dangling escape".to_string()))?;
        out.push(match escaped {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'0' => 0,
            b'\\' => b'\\',
            b'"' => b'"',
            b'x' => {
                let hex = [bytes.next(), bytes.next()];
                let [Some(hi), Some(lo)] = hex else {
                    return Err(Error::Parse("\\x needs two hex digits".to_string()));
                };
                let digits = [hi, lo];
                let text = std::str::from_utf8(&digits)
                    .map_err(|_| Error::Parse("invalid \\x escape".to_string()))?;
                u8::from_str_radix(text, 16)
                    .map_err(|_| Error::Parse(format!("invalid \\x escape: {}", text)))?
            }
            other => {
                return Err(Error::Parse(format!(
                    "unknown escape \\{}",
                    other as char
                )))
            }
        });
    }
    Ok(out)
}
