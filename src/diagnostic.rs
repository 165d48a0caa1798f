//! Rendering of codegen errors against the source they came from.

use std::fmt;

use unicode_width::UnicodeWidthStr;

use crate::error::CodegenError;

/// A codegen error together with the full source, displayed with the
/// offending line and a caret under the failing byte.
#[derive(Debug)]
pub struct Diagnostic<'a> {
    error: &'a CodegenError,
    source: &'a [u8],
}

impl<'a> Diagnostic<'a> {
    pub fn new(error: &'a CodegenError, source: &'a [u8]) -> Self {
        Self { error, source }
    }
}

impl<'a> fmt::Display for Diagnostic<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let i = match self.error.position {
            Some(i) if i <= self.source.len() => i,
            _ => return write!(f, "{}", self.error),
        };

        let (line, linenum, offset) = find_line(self.source, i);
        let width = UnicodeWidthStr::width(&*String::from_utf8_lossy(&line[..offset]));

        writeln!(f, "{}:{}: {}", linenum + 1, offset + 1, self.error.message)?;
        writeln!(f, "{}", String::from_utf8_lossy(line))?;
        write!(f, "{}^", " ".repeat(width))
    }
}

/// Returns the line holding byte `i`, its zero-based number, and the
/// offset of `i` within it.
fn find_line(code: &[u8], i: usize) -> (&[u8], usize, usize) {
    let offset = code[0..i].iter().rev().take_while(|x| **x != b'\n').count();
    let end = i + code[i..].iter().take_while(|x| **x != b'\n').count();
    let linenum = code[0..(i - offset)]
        .iter()
        .filter(|x| **x == b'\n')
        .count();
    (&code[(i - offset)..end], linenum, offset)
}
