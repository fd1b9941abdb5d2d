//! Pretty printing utilities.
//!
//! This module provides the `PrettyPrint` trait implemented by IR views
//! and a few string helpers used by diagnostics.

use pretty::{DocAllocator, DocBuilder, BoxAllocator};
use std::fmt;

/// Default line width for pretty printing.
pub const DEFAULT_WIDTH: usize = 80;

/// A pretty-printable value.
pub trait PrettyPrint {
    /// Convert to a pretty document.
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D>;

    /// Pretty print to a string with the given width.
    fn pretty_print(&self, width: usize) -> String {
        let allocator = BoxAllocator;
        let doc = self.to_doc(&allocator);
        let mut output = String::new();
        doc.render_fmt(width, &mut output).expect("render to String");
        output
    }

    /// Pretty print with default width.
    fn pretty(&self) -> String {
        self.pretty_print(DEFAULT_WIDTH)
    }
}

/// Indent a block of text.
pub fn indent(s: &str, spaces: usize) -> String {
    let indent_str = " ".repeat(spaces);
    s.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", indent_str, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Format a list with separators using a custom formatter.
pub fn format_list_with<T, F: Fn(&T) -> String>(items: &[T], sep: &str, f: F) -> String {
    items
        .iter()
        .map(f)
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_helper() {
        let text = "line1\n\nline3";
        let indented = indent(text, 4);
        assert!(indented.starts_with("    line1"));
        assert!(indented.contains("\n\n    line3"));
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1, 2, 3], ", "), "1, 2, 3");
        assert_eq!(format_list_with(&[1, 2], "x", |v| (v * 2).to_string()), "2x4");
    }
}
