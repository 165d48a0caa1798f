#![allow(non_camel_case_types)]

use std::mem::transmute;

use static_assertions::assert_eq_size;

type Elf64_Half = u16;
type Elf64_Word = u32;
type Elf64_Xword = u64;
type Elf64_Addr = u64;
type Elf64_Off = u64;

type Elf32_Half = u16;
type Elf32_Word = u32;
type Elf32_Addr = u32;
type Elf32_Off = u32;

pub const ELFMAG: [u8; 4] = *b"\x7fELF";
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const ELFOSABI_SYSV: u8 = 0;
pub const EV_CURRENT: u8 = 1;

pub const ET_REL: u16 = 1;
pub const EM_386: u16 = 3;
pub const EM_X86_64: u16 = 62;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;

pub const SHF_WRITE: u64 = 1;
pub const SHF_ALLOC: u64 = 1 << 1;
pub const SHF_EXECINSTR: u64 = 1 << 2;

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STT_NOTYPE: u8 = 0;
pub const STT_FUNC: u8 = 2;
pub const STV_DEFAULT: u8 = 0;

pub const EI_NIDENT: usize = 16;

pub const EHDR64_SIZE: usize = 64;
pub const SHDR64_SIZE: usize = 64;
pub const SYM64_SIZE: usize = 24;
pub const EHDR32_SIZE: usize = 52;
pub const SHDR32_SIZE: usize = 40;
pub const SYM32_SIZE: usize = 16;

/// Adds conversions between a padding-free `repr(C)` header and its
/// on-disk bytes. Fields are in host order, so the bytes are only valid
/// ELFDATA2LSB on little-endian hosts.
macro_rules! raw_header {
    ($label:ident; $name:ident, $size:expr) => {
        assert_eq_size!($label; $name, [u8; $size]);

        impl $name {
            pub fn to_bytes(self) -> [u8; $size] {
                unsafe { transmute(self) }
            }

            pub fn from_bytes(bytes: [u8; $size]) -> Self {
                unsafe { transmute(bytes) }
            }
        }
    };
}

raw_header!(ident_size_assert; Elf_Ident, EI_NIDENT);
raw_header!(ehdr64_size_assert; Elf64_Ehdr, EHDR64_SIZE);
raw_header!(shdr64_size_assert; Elf64_Shdr, SHDR64_SIZE);
raw_header!(sym64_size_assert; Elf64_Sym, SYM64_SIZE);
raw_header!(ehdr32_size_assert; Elf32_Ehdr, EHDR32_SIZE);
raw_header!(shdr32_size_assert; Elf32_Shdr, SHDR32_SIZE);
raw_header!(sym32_size_assert; Elf32_Sym, SYM32_SIZE);

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf_Ident {
    pub ei_mag: [u8; 4],
    pub ei_class: u8,
    pub ei_data: u8,
    pub ei_version: u8,
    pub ei_osabi: u8,
    pub ei_abiversion: u8,
    pub ei_pad: [u8; 7],
}

// ELF header
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf64_Ehdr {
    pub e_ident: Elf_Ident,
    pub e_type: Elf64_Half,
    pub e_machine: Elf64_Half,
    pub e_version: Elf64_Word,
    pub e_entry: Elf64_Addr,
    pub e_phoff: Elf64_Off,
    pub e_shoff: Elf64_Off,
    pub e_flags: Elf64_Word,
    pub e_ehsize: Elf64_Half,
    pub e_phentsize: Elf64_Half,
    pub e_phnum: Elf64_Half,
    pub e_shentsize: Elf64_Half,
    pub e_shnum: Elf64_Half,
    pub e_shstrndx: Elf64_Half,
}

// Section header
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf64_Shdr {
    pub sh_name: Elf64_Word,
    pub sh_type: Elf64_Word,
    pub sh_flags: Elf64_Xword,
    pub sh_addr: Elf64_Addr,
    pub sh_offset: Elf64_Off,
    pub sh_size: Elf64_Xword,
    pub sh_link: Elf64_Word,
    pub sh_info: Elf64_Word,
    pub sh_addralign: Elf64_Xword,
    pub sh_entsize: Elf64_Xword,
}

// Symbol table entry
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf64_Sym {
    pub st_name: Elf64_Word,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: Elf64_Half,
    pub st_value: Elf64_Addr,
    pub st_size: Elf64_Xword,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf32_Ehdr {
    pub e_ident: Elf_Ident,
    pub e_type: Elf32_Half,
    pub e_machine: Elf32_Half,
    pub e_version: Elf32_Word,
    pub e_entry: Elf32_Addr,
    pub e_phoff: Elf32_Off,
    pub e_shoff: Elf32_Off,
    pub e_flags: Elf32_Word,
    pub e_ehsize: Elf32_Half,
    pub e_phentsize: Elf32_Half,
    pub e_phnum: Elf32_Half,
    pub e_shentsize: Elf32_Half,
    pub e_shnum: Elf32_Half,
    pub e_shstrndx: Elf32_Half,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf32_Shdr {
    pub sh_name: Elf32_Word,
    pub sh_type: Elf32_Word,
    pub sh_flags: Elf32_Word,
    pub sh_addr: Elf32_Addr,
    pub sh_offset: Elf32_Off,
    pub sh_size: Elf32_Word,
    pub sh_link: Elf32_Word,
    pub sh_info: Elf32_Word,
    pub sh_addralign: Elf32_Word,
    pub sh_entsize: Elf32_Word,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Elf32_Sym {
    pub st_name: Elf32_Word,
    pub st_value: Elf32_Addr,
    pub st_size: Elf32_Word,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: Elf32_Half,
}

pub fn st_info(bind: u8, kind: u8) -> u8 {
    bind << 4 | (kind & 0xf)
}
