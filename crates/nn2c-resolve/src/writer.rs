//! Indented source-text sink used by operator emission.

use std::fmt;

use nn2c_ir::BuildError;

/// Writes generated C statements to a caller-supplied sink, tracking the
/// current indentation depth. Node bodies are emitted at depth 1 (inside
/// the enclosing function).
pub struct SourceWriter<'a> {
    out: &'a mut dyn fmt::Write,
    depth: usize,
}

impl<'a> SourceWriter<'a> {
    /// Writer at function-body depth.
    pub fn new(out: &'a mut dyn fmt::Write) -> Self {
        Self { out, depth: 1 }
    }

    /// One full line at the current depth.
    pub fn line(&mut self, text: &str) -> Result<(), BuildError> {
        for _ in 0..self.depth {
            self.out.write_char('\t')?;
        }
        self.out.write_str(text)?;
        self.out.write_char('\n')?;
        Ok(())
    }

    /// An empty line.
    pub fn blank(&mut self) -> Result<(), BuildError> {
        self.out.write_char('\n')?;
        Ok(())
    }

    /// Increase indentation for subsequent lines.
    pub fn push(&mut self) {
        self.depth += 1;
    }

    /// Decrease indentation.
    pub fn pop(&mut self) {
        debug_assert!(self.depth > 0);
        self.depth = self.depth.saturating_sub(1);
    }

    /// `text` followed by an indented block, then a closing line.
    /// Used for brace-delimited loop nests.
    pub fn block<F>(&mut self, open: &str, close: &str, body: F) -> Result<(), BuildError>
    where
        F: FnOnce(&mut Self) -> Result<(), BuildError>,
    {
        self.line(open)?;
        self.push();
        body(self)?;
        self.pop();
        self.line(close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tab_indented() {
        let mut buf = String::new();
        let mut w = SourceWriter::new(&mut buf);
        w.line("a;").unwrap();
        w.push();
        w.line("b;").unwrap();
        w.pop();
        w.line("c;").unwrap();
        assert_eq!(buf, "\ta;\n\t\tb;\n\tc;\n");
    }

    #[test]
    fn block_restores_depth() {
        let mut buf = String::new();
        let mut w = SourceWriter::new(&mut buf);
        w.block("for (;;) {", "}", |w| w.line("x++;")).unwrap();
        assert_eq!(buf, "\tfor (;;) {\n\t\tx++;\n\t}\n");
    }
}
