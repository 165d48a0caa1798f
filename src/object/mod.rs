//! Minimal interface to an object file being built: sections with contents
//! and a table of symbols pointing into them. `Codegen::dump` only talks to
//! this trait, so the container format is chosen by the caller.

use std::ops::BitOr;

use thiserror::Error;

/// Failure reported by an object container, carrying its message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ObjectError {
    message: String,
}

impl ObjectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Handle to a section created by `ObjectContainer::make_section`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub usize);

/// Defines a small bit set type with named constants
macro_rules! flag_set {
    ( $name:ident { $( $flag:ident = $bit:expr ),* } ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u32);

        impl $name {
            $( pub const $flag: $name = $name(1 << $bit); )*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

flag_set!(SectionFlags {
    CODE = 0,
    LOAD = 1,
    READONLY = 2,
    HAS_CONTENTS = 3
});

flag_set!(SymbolFlags {
    GLOBAL = 0,
    EXPORT = 1,
    FUNCTION = 2
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub section: SectionId,
    pub flags: SymbolFlags,
    /// Offset from the start of `section`
    pub value: u64,
}

pub trait ObjectContainer {
    fn make_section(&mut self, name: &str) -> Result<SectionId, ObjectError>;
    fn set_section_size(&mut self, section: SectionId, size: u64) -> Result<(), ObjectError>;
    fn set_section_alignment(&mut self, section: SectionId, align: u64)
        -> Result<(), ObjectError>;
    fn set_section_flags(
        &mut self,
        section: SectionId,
        flags: SectionFlags,
    ) -> Result<(), ObjectError>;
    fn add_symbol(&mut self, symbol: Symbol) -> Result<(), ObjectError>;
    fn set_section_contents(
        &mut self,
        section: SectionId,
        data: &[u8],
        offset: u64,
    ) -> Result<(), ObjectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = SectionFlags::CODE | SectionFlags::LOAD;
        assert!(flags.contains(SectionFlags::CODE));
        assert!(flags.contains(SectionFlags::LOAD));
        assert!(!flags.contains(SectionFlags::READONLY));
        assert!(flags.contains(SectionFlags::empty()));
    }
}
