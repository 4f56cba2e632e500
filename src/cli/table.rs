//! # Result Formatting
//!
//! Fixed-width column rendering for SELECT output. Widths derive from
//! the value types, so rows line up without buffering the whole result
//! set first.

use crate::types::{DataType, TypedValue};

/// Display width for a column of this type.
pub fn column_width(ty: DataType) -> usize {
    match ty {
        DataType::U8 | DataType::U16 | DataType::U32 => 10,
        DataType::I8 | DataType::I16 | DataType::I32 => 10,
        DataType::U64 | DataType::I64 => 15,
        DataType::F32 | DataType::F64 => 12,
        DataType::Char8 => 8,
        DataType::Char16 => 16,
        DataType::Char32 => 32,
        DataType::Char64 => 48,
        DataType::Char128 | DataType::Char256 => 48,
        DataType::Pair => 20,
    }
}

/// One row, columns padded to their type widths.
pub fn format_row(row: &[TypedValue]) -> String {
    let mut out = String::new();
    for value in row {
        let width = column_width(value.ty());
        let text = value.to_string();
        if text.len() >= width {
            out.push_str(&text[..width]);
        } else {
            out.push_str(&text);
            out.push_str(&" ".repeat(width - text.len()));
        }
        out.push_str("  ");
    }
    out.trim_end().to_string()
}

/// Header line plus separator for the given column names and types.
pub fn format_header(names: &[&str], types: &[DataType]) -> String {
    let mut header = String::new();
    let mut rule = String::new();
    for (name, ty) in names.iter().zip(types.iter()) {
        let width = column_width(*ty);
        let shown = if name.len() > width { &name[..width] } else { name };
        header.push_str(shown);
        header.push_str(&" ".repeat(width - shown.len() + 2));
        rule.push_str(&"-".repeat(width));
        rule.push_str("  ");
    }
    format!("{}\n{}", header.trim_end(), rule.trim_end())
}
