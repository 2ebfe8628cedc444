//! Text formatting helpers shared by the emitters.

use std::fmt::Display;

/// Line-oriented writer for generated code.
///
/// Every line is prefixed with one copy of `unit` per open block.
#[derive(Debug)]
pub struct CodeFormatter {
    lines: Vec<String>,
    depth: usize,
    unit: String,
    comment_prefix: String,
}

impl CodeFormatter {
    /// Create a formatter with C-style `//` comments.
    pub fn new(unit: &str) -> Self {
        Self {
            lines: Vec::new(),
            depth: 0,
            unit: unit.to_string(),
            comment_prefix: "//".to_string(),
        }
    }

    /// Use a different line-comment prefix (e.g. `#` for pseudo-code).
    pub fn with_comment_prefix(mut self, prefix: &str) -> Self {
        self.comment_prefix = prefix.to_string();
        self
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append one or more lines at the current depth. Blank lines stay blank.
    pub fn writeln(&mut self, text: &str) {
        for line in text.split('\n') {
            if line.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{}{}", self.unit.repeat(self.depth), line));
            }
        }
    }

    pub fn newline(&mut self) {
        self.lines.push(String::new());
    }

    pub fn comment(&mut self, text: &str) {
        let line = format!("{} {}", self.comment_prefix, text);
        self.writeln(&line);
    }

    /// `header {`, then `body` one level deeper, then `}`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, body: F) {
        self.writeln(&format!("{} {{", header));
        self.indent();
        body(self);
        self.dedent();
        self.writeln("}");
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        if !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Join displayable items with a separator.
pub fn format_list<T: Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks() {
        let mut fmt = CodeFormatter::new("  ");
        fmt.block("for (idx_t t = t0; t < t1; t++)", |f| {
            f.block("for (idx_t x = bx0; x < bx1; x += CLEN_X)", |f| {
                f.writeln("calc_vector(t, x);");
            });
        });

        let output = fmt.finish();
        assert!(output.contains("  for (idx_t x = bx0; x < bx1; x += CLEN_X) {"));
        assert!(output.contains("    calc_vector(t, x);"));
        assert!(output.ends_with("}\n"));
    }

    #[test]
    fn test_comment_prefix() {
        let mut fmt = CodeFormatter::new("    ").with_comment_prefix("#");
        fmt.comment("bundle stencil_bundle_0");
        assert_eq!(fmt.finish(), "# bundle stencil_bundle_0\n");
    }

    #[test]
    fn test_multiline_text_is_indented() {
        let mut fmt = CodeFormatter::new("\t");
        fmt.indent();
        fmt.writeln("a\n\nb");
        assert_eq!(fmt.finish(), "\ta\n\n\tb\n");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[4, 4, 1], " * "), "4 * 4 * 1");
    }
}
