//! Format a generated field tree for display.

use crate::field::Field;
use crate::mapper::FieldMapper;
use crate::value::FieldKind;

/// Hex string of `bytes`, space separated.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One line per field, indented by depth. Leaves show their content; bitfields show bits.
pub fn dump_field(root: &Field, mapper: &FieldMapper) -> String {
    let mut lines = Vec::new();
    dump_into(root, mapper, 0, &mut lines);
    lines.join("\n")
}

fn dump_into(field: &Field, mapper: &FieldMapper, depth: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(depth);
    let name = field
        .id()
        .map(|id| mapper.label(id))
        .unwrap_or_else(|| "_".to_string());
    let kind = field.kind();
    if kind.is_container() {
        lines.push(format!(
            "{}{} {} ({} units, {} children)",
            pad,
            kind.name(),
            name,
            field.size(),
            field.children().len()
        ));
        for child in field.children() {
            dump_into(child, mapper, depth + 1, lines);
        }
        return;
    }
    let content = match field.units() {
        Ok(units) if kind == FieldKind::Bitfield => {
            units.iter().map(|u| char::from(b'0' + u)).collect()
        }
        Ok(units) => hex_string(&units),
        Err(e) => format!("<{}>", e),
    };
    lines.push(format!(
        "{}{} {} [{}] = {}",
        pad,
        kind.name(),
        name,
        field.size(),
        content
    ));
}
