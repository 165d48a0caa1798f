//! Single-pass Brainfuck compiler backend.
//!
//! Source is fed in chunks to a [`Codegen`], which emits position
//! independent x86 machine code for one function, `_main`, taking a
//! [`BfState`]. The frozen function is written through the
//! [`ObjectContainer`] interface, for which [`ElfObject`] produces
//! relocatable ELF files.

pub mod asm;
pub mod codegen;
pub mod diagnostic;
pub mod elf;
pub mod error;
pub mod label;
pub mod loops;
pub mod object;
pub mod state;

pub use codegen::target::ENTRY_SYMBOL;
pub use codegen::{Arch, Backend, Codegen, Config, FrozenCode, ARCHES, DEFAULT_TAPE_SIZE};
pub use diagnostic::Diagnostic;
pub use elf::{ElfClass, ElfObject};
pub use error::{CodegenError, ErrorKind};
pub use loops::MAX_NESTING;
pub use object::{ObjectContainer, ObjectError, SectionFlags, SectionId, Symbol, SymbolFlags};
pub use state::BfState;
