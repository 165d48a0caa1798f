use log::debug;

use crate::object::{ObjectContainer, ObjectError, SectionFlags, Symbol, SymbolFlags};

/// Alignment of the emitted code section
pub const SECTION_ALIGNMENT: u64 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    pub name: &'static str,
    /// Offset from the start of the code
    pub offset: usize,
}

/// A linked function: its bytes and the offsets of its exported labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenCode {
    code: Vec<u8>,
    symbols: Vec<ExportedSymbol>,
}

impl FrozenCode {
    pub(crate) fn new(code: Vec<u8>, symbols: Vec<ExportedSymbol>) -> Self {
        Self { code, symbols }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn symbol(&self, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .find(|symbol| symbol.name == name)
            .map(|symbol| symbol.offset)
    }

    /// Writes one `.text` section holding the code and one global function
    /// symbol per exported label, valued relative to the section.
    pub fn emit(&self, object: &mut dyn ObjectContainer) -> Result<(), ObjectError> {
        let size = self.code.len() as u64;

        let text = object.make_section(".text")?;
        object.set_section_size(text, size)?;
        object.set_section_alignment(text, SECTION_ALIGNMENT)?;
        object.set_section_flags(
            text,
            SectionFlags::CODE
                | SectionFlags::LOAD
                | SectionFlags::READONLY
                | SectionFlags::HAS_CONTENTS,
        )?;

        for symbol in &self.symbols {
            object.add_symbol(Symbol {
                name: symbol.name.to_string(),
                section: text,
                flags: SymbolFlags::GLOBAL | SymbolFlags::EXPORT | SymbolFlags::FUNCTION,
                value: symbol.offset as u64,
            })?;
        }

        object.set_section_contents(text, &self.code, 0)?;

        debug!(
            "dumped {} bytes of code with symbols {:?}",
            size,
            self.symbols.iter().map(|s| s.name).collect::<Vec<_>>()
        );
        Ok(())
    }
}
