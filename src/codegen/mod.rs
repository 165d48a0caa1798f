use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

use crate::elf::types::{EM_386, EM_X86_64};
use crate::elf::ElfClass;
use crate::error::CodegenError;
use crate::object::ObjectContainer;

mod backend;
mod emit;
pub mod target;

pub use backend::Backend;
pub use emit::{ExportedSymbol, FrozenCode, SECTION_ALIGNMENT};

/// Tape size of the reference runtime
pub const DEFAULT_TAPE_SIZE: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Reject bytes that are neither commands nor whitespace/control
    pub strict: bool,
    /// Tape length in bytes, `1..=i32::MAX`
    pub tape_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict: false,
            tape_size: DEFAULT_TAPE_SIZE,
        }
    }
}

/// Supported instruction sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    I386,
}

lazy_static! {
    pub static ref ARCHES: HashMap<&'static str, Arch> = {
        let mut m = HashMap::new();
        m.insert(Arch::X86_64.name(), Arch::X86_64);
        m.insert(Arch::I386.name(), Arch::I386);
        m
    };
}

impl Arch {
    pub fn name(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::I386 => "i386",
        }
    }

    pub fn from_name(name: &str) -> Option<Arch> {
        ARCHES.get(name).copied()
    }

    /// Architecture name as spelled by BFD
    pub fn bfd_name(self) -> &'static str {
        match self {
            Arch::X86_64 => "i386:x86-64",
            Arch::I386 => "i386",
        }
    }

    pub fn elf_class(self) -> ElfClass {
        match self {
            Arch::X86_64 => ElfClass::Elf64,
            Arch::I386 => ElfClass::Elf32,
        }
    }

    pub fn elf_machine(self) -> u16 {
        match self {
            Arch::X86_64 => EM_X86_64,
            Arch::I386 => EM_386,
        }
    }

    /// The host's own architecture, if it is one we generate code for
    pub fn host() -> Option<Arch> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else if cfg!(target_arch = "x86") {
            Some(Arch::I386)
        } else {
            None
        }
    }

    pub fn codegen(self, config: Config) -> Box<dyn Codegen> {
        match self {
            Arch::X86_64 => Box::new(Backend::<target::X86_64>::new(config)),
            Arch::I386 => Box::new(Backend::<target::I386>::new(config)),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A native code generator for one translation unit.
///
/// Source is fed through `consume`, the function is closed with `freeze`,
/// and `dump` writes it to an object container as often as needed.
/// Dropping an instance that was never frozen freezes it first.
pub trait Codegen {
    fn arch(&self) -> Arch;

    fn strict(&self) -> bool;
    fn set_strict(&mut self, strict: bool);

    /// Compiles the next chunk of source, returning the number of bytes
    /// accepted. Runs of foldable commands and the `[-]` idiom may span
    /// chunks. Panics if called after `freeze`.
    fn consume(&mut self, source: &[u8]) -> Result<usize, CodegenError>;

    /// Closes the function and resolves labels. Later calls do nothing.
    fn freeze(&mut self) -> Result<(), CodegenError>;

    /// Freezes if needed, then writes the code section and its symbols.
    fn dump(&mut self, object: &mut dyn ObjectContainer) -> Result<(), CodegenError>;

    /// The finished function, once frozen
    fn frozen(&self) -> Option<&FrozenCode>;

    /// Textual listing of the code buffer
    fn listing(&mut self) -> String;

    /// Source bytes scanned so far
    fn consumed(&self) -> usize;

    /// Loops currently open
    fn loop_depth(&self) -> usize;

    /// Labels allocated so far, exported ones included
    fn label_count(&self) -> usize;
}
