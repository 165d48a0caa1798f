use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::debug;

use crate::codegen::Arch;
use crate::object::{ObjectContainer, ObjectError, SectionFlags, SectionId, Symbol, SymbolFlags};

pub mod types;
use types::*;

// Minimal ELF support, sufficient for a relocatable object holding
// position independent code and the symbols pointing into it.

// Sources:
// * /usr/include/elf.h
// * https://wiki.osdev.org/ELF_Tutorial
// * http://www.sco.com/developers/gabi/latest/ch4.eheader.html
// * http://www.sco.com/developers/gabi/latest/ch4.symtab.html

/// Sections added after the caller's own ones
const RESERVED_SECTIONS: &[&str] = &[".symtab", ".strtab", ".note.GNU-stack", ".shstrtab"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn ident(self) -> u8 {
        match self {
            ElfClass::Elf32 => ELFCLASS32,
            ElfClass::Elf64 => ELFCLASS64,
        }
    }

    fn word_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }

    fn ehdr_size(self) -> usize {
        match self {
            ElfClass::Elf32 => EHDR32_SIZE,
            ElfClass::Elf64 => EHDR64_SIZE,
        }
    }

    fn shdr_size(self) -> usize {
        match self {
            ElfClass::Elf32 => SHDR32_SIZE,
            ElfClass::Elf64 => SHDR64_SIZE,
        }
    }

    fn sym_size(self) -> usize {
        match self {
            ElfClass::Elf32 => SYM32_SIZE,
            ElfClass::Elf64 => SYM64_SIZE,
        }
    }
}

/// Class independent view of a section header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionHeader {
    pub name: u32,
    pub kind: u32,
    pub flags: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub align: u64,
    pub entsize: u64,
}

impl SectionHeader {
    fn write(&self, class: ElfClass, out: &mut Vec<u8>) {
        match class {
            ElfClass::Elf64 => out.extend_from_slice(
                &Elf64_Shdr {
                    sh_name: self.name,
                    sh_type: self.kind,
                    sh_flags: self.flags,
                    sh_addr: 0,
                    sh_offset: self.offset,
                    sh_size: self.size,
                    sh_link: self.link,
                    sh_info: self.info,
                    sh_addralign: self.align,
                    sh_entsize: self.entsize,
                }
                .to_bytes(),
            ),
            ElfClass::Elf32 => out.extend_from_slice(
                &Elf32_Shdr {
                    sh_name: self.name,
                    sh_type: self.kind,
                    sh_flags: self.flags as u32,
                    sh_addr: 0,
                    sh_offset: self.offset as u32,
                    sh_size: self.size as u32,
                    sh_link: self.link,
                    sh_info: self.info,
                    sh_addralign: self.align as u32,
                    sh_entsize: self.entsize as u32,
                }
                .to_bytes(),
            ),
        }
    }

    fn read(class: ElfClass, f: &mut impl Read) -> io::Result<Self> {
        Ok(match class {
            ElfClass::Elf64 => {
                let mut buf = [0; SHDR64_SIZE];
                f.read_exact(&mut buf)?;
                let shdr = Elf64_Shdr::from_bytes(buf);
                SectionHeader {
                    name: shdr.sh_name,
                    kind: shdr.sh_type,
                    flags: shdr.sh_flags,
                    offset: shdr.sh_offset,
                    size: shdr.sh_size,
                    link: shdr.sh_link,
                    info: shdr.sh_info,
                    align: shdr.sh_addralign,
                    entsize: shdr.sh_entsize,
                }
            }
            ElfClass::Elf32 => {
                let mut buf = [0; SHDR32_SIZE];
                f.read_exact(&mut buf)?;
                let shdr = Elf32_Shdr::from_bytes(buf);
                SectionHeader {
                    name: shdr.sh_name,
                    kind: shdr.sh_type,
                    flags: shdr.sh_flags as u64,
                    offset: shdr.sh_offset as u64,
                    size: shdr.sh_size as u64,
                    link: shdr.sh_link,
                    info: shdr.sh_info,
                    align: shdr.sh_addralign as u64,
                    entsize: shdr.sh_entsize as u64,
                }
            }
        })
    }
}

#[derive(Debug)]
struct Section {
    name: String,
    size: Option<u64>,
    align: u64,
    flags: SectionFlags,
    data: Vec<u8>,
}

impl Section {
    fn header_flags(&self) -> u64 {
        let mut flags = 0;
        if self.flags.contains(SectionFlags::LOAD) {
            flags |= SHF_ALLOC;
        }
        if self.flags.contains(SectionFlags::CODE) {
            flags |= SHF_EXECINSTR;
        }
        if !self.flags.contains(SectionFlags::READONLY) {
            flags |= SHF_WRITE;
        }
        flags
    }

    fn has_contents(&self) -> bool {
        self.flags.contains(SectionFlags::HAS_CONTENTS)
    }
}

/// String table under construction, starting with the empty string
struct StrTab(Vec<u8>);

impl StrTab {
    fn new() -> Self {
        StrTab(vec![0])
    }

    fn add(&mut self, s: &str) -> u32 {
        let index = self.0.len() as u32;
        self.0.extend_from_slice(s.as_bytes());
        self.0.push(0);
        index
    }
}

fn pad_to(out: &mut Vec<u8>, align: usize) {
    let len = (out.len() + align - 1) & !(align - 1);
    out.resize(len, 0);
}

fn check_name(name: &str, what: &str) -> Result<(), ObjectError> {
    if name.is_empty() || name.contains('\0') {
        return Err(ObjectError::new(format!("invalid {} name {:?}", what, name)));
    }
    Ok(())
}

/// An ELF relocatable object built through `ObjectContainer`.
///
/// Every section is placed in the file in creation order, followed by the
/// symbol table, its string table, an empty `.note.GNU-stack` and the
/// section name table. Headers are written in host byte order, so valid
/// output needs a little-endian host.
#[derive(Debug)]
pub struct ElfObject {
    class: ElfClass,
    machine: u16,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
}

impl ElfObject {
    pub fn new(class: ElfClass, machine: u16) -> Self {
        Self {
            class,
            machine,
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn for_arch(arch: Arch) -> Self {
        Self::new(arch.elf_class(), arch.elf_machine())
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .map(SectionId)
    }

    /// Contents of a section, zero filled up to its size
    pub fn section_data(&self, section: SectionId) -> Option<&[u8]> {
        self.sections.get(section.0).map(|s| &s.data[..])
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn section_mut(&mut self, section: SectionId) -> Result<&mut Section, ObjectError> {
        self.sections
            .get_mut(section.0)
            .ok_or_else(|| ObjectError::new(format!("no section with index {}", section.0)))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let class = self.class;
        let word = class.word_size();
        let mut shstrtab = StrTab::new();
        let mut strtab = StrTab::new();

        // Filled in last, once the section header table is placed
        let mut out = vec![0; class.ehdr_size()];
        let mut headers = vec![SectionHeader::default()];

        for section in &self.sections {
            let align = section.align.max(1);
            pad_to(&mut out, align as usize);
            let offset = out.len() as u64;
            let kind = if section.has_contents() {
                out.extend_from_slice(&section.data);
                SHT_PROGBITS
            } else {
                SHT_NOBITS
            };
            headers.push(SectionHeader {
                name: shstrtab.add(&section.name),
                kind,
                flags: section.header_flags(),
                offset,
                size: section.size.unwrap_or(0),
                align,
                ..SectionHeader::default()
            });
        }

        // Locals have to precede globals in the symbol table
        let (globals, locals): (Vec<&Symbol>, Vec<&Symbol>) = self
            .symbols
            .iter()
            .partition(|s| s.flags.contains(SymbolFlags::GLOBAL));
        let symtab_index = headers.len() as u32;
        let first_global = 1 + locals.len() as u32;

        pad_to(&mut out, word);
        let symtab_offset = out.len() as u64;
        out.resize(out.len() + class.sym_size(), 0);
        for symbol in locals.iter().chain(globals.iter()) {
            let section = &self.sections[symbol.section.0];
            let bind = if symbol.flags.contains(SymbolFlags::GLOBAL) {
                STB_GLOBAL
            } else {
                STB_LOCAL
            };
            let kind = if symbol.flags.contains(SymbolFlags::FUNCTION) {
                STT_FUNC
            } else {
                STT_NOTYPE
            };
            let name = strtab.add(&symbol.name);
            let info = st_info(bind, kind);
            let shndx = symbol.section.0 as u16 + 1;
            let size = section.size.unwrap_or(0).saturating_sub(symbol.value);
            match class {
                ElfClass::Elf64 => out.extend_from_slice(
                    &Elf64_Sym {
                        st_name: name,
                        st_info: info,
                        st_other: STV_DEFAULT,
                        st_shndx: shndx,
                        st_value: symbol.value,
                        st_size: size,
                    }
                    .to_bytes(),
                ),
                ElfClass::Elf32 => out.extend_from_slice(
                    &Elf32_Sym {
                        st_name: name,
                        st_value: symbol.value as u32,
                        st_size: size as u32,
                        st_info: info,
                        st_other: STV_DEFAULT,
                        st_shndx: shndx,
                    }
                    .to_bytes(),
                ),
            }
        }
        headers.push(SectionHeader {
            name: shstrtab.add(".symtab"),
            kind: SHT_SYMTAB,
            offset: symtab_offset,
            size: out.len() as u64 - symtab_offset,
            link: symtab_index + 1,
            info: first_global,
            align: word as u64,
            entsize: class.sym_size() as u64,
            ..SectionHeader::default()
        });

        headers.push(SectionHeader {
            name: shstrtab.add(".strtab"),
            kind: SHT_STRTAB,
            offset: out.len() as u64,
            size: strtab.0.len() as u64,
            align: 1,
            ..SectionHeader::default()
        });
        out.extend_from_slice(&strtab.0);

        // Marks the stack as non-executable
        headers.push(SectionHeader {
            name: shstrtab.add(".note.GNU-stack"),
            kind: SHT_PROGBITS,
            offset: out.len() as u64,
            align: 1,
            ..SectionHeader::default()
        });

        let shstrndx = headers.len();
        let name = shstrtab.add(".shstrtab");
        headers.push(SectionHeader {
            name,
            kind: SHT_STRTAB,
            offset: out.len() as u64,
            size: shstrtab.0.len() as u64,
            align: 1,
            ..SectionHeader::default()
        });
        out.extend_from_slice(&shstrtab.0);

        pad_to(&mut out, word);
        let shoff = out.len() as u64;
        for header in &headers {
            header.write(class, &mut out);
        }

        let e_ident = Elf_Ident {
            ei_mag: ELFMAG,
            ei_class: class.ident(),
            ei_data: ELFDATA2LSB,
            ei_version: EV_CURRENT,
            ei_osabi: ELFOSABI_SYSV,
            ei_abiversion: 0,
            ei_pad: [0; 7],
        };
        match class {
            ElfClass::Elf64 => {
                let ehdr = Elf64_Ehdr {
                    e_ident,
                    e_type: ET_REL,
                    e_machine: self.machine,
                    e_version: EV_CURRENT as u32,
                    e_entry: 0,
                    e_phoff: 0,
                    e_shoff: shoff,
                    e_flags: 0,
                    e_ehsize: EHDR64_SIZE as u16,
                    e_phentsize: 0,
                    e_phnum: 0,
                    e_shentsize: SHDR64_SIZE as u16,
                    e_shnum: headers.len() as u16,
                    e_shstrndx: shstrndx as u16,
                };
                out[..EHDR64_SIZE].copy_from_slice(&ehdr.to_bytes());
            }
            ElfClass::Elf32 => {
                let ehdr = Elf32_Ehdr {
                    e_ident,
                    e_type: ET_REL,
                    e_machine: self.machine,
                    e_version: EV_CURRENT as u32,
                    e_entry: 0,
                    e_phoff: 0,
                    e_shoff: shoff as u32,
                    e_flags: 0,
                    e_ehsize: EHDR32_SIZE as u16,
                    e_phentsize: 0,
                    e_phnum: 0,
                    e_shentsize: SHDR32_SIZE as u16,
                    e_shnum: headers.len() as u16,
                    e_shstrndx: shstrndx as u16,
                };
                out[..EHDR32_SIZE].copy_from_slice(&ehdr.to_bytes());
            }
        }

        debug!(
            "laid out {:?} object: {} sections, {} symbols, {} bytes",
            class,
            headers.len(),
            self.symbols.len(),
            out.len()
        );
        out
    }

    pub fn write_to(&self, f: &mut impl Write) -> io::Result<()> {
        f.write_all(&self.to_bytes())
    }
}

impl ObjectContainer for ElfObject {
    fn make_section(&mut self, name: &str) -> Result<SectionId, ObjectError> {
        check_name(name, "section")?;
        if RESERVED_SECTIONS.contains(&name) || self.section_by_name(name).is_some() {
            return Err(ObjectError::new(format!("section {} already exists", name)));
        }
        self.sections.push(Section {
            name: name.to_string(),
            size: None,
            align: 1,
            flags: SectionFlags::empty(),
            data: Vec::new(),
        });
        Ok(SectionId(self.sections.len() - 1))
    }

    fn set_section_size(&mut self, section: SectionId, size: u64) -> Result<(), ObjectError> {
        let limit = match self.class {
            ElfClass::Elf32 => u32::MAX as u64,
            ElfClass::Elf64 => u64::MAX,
        };
        let section = self.section_mut(section)?;
        let name = section.name.clone();
        let too_large = || {
            ObjectError::new(format!(
                "size {:#x} of section {} is too large",
                size, name
            ))
        };
        if size > limit {
            return Err(too_large());
        }
        let len = usize::try_from(size).map_err(|_| too_large())?;
        section
            .data
            .try_reserve(len.saturating_sub(section.data.len()))
            .map_err(|_| too_large())?;
        section.data.resize(len, 0);
        section.size = Some(size);
        Ok(())
    }

    fn set_section_alignment(
        &mut self,
        section: SectionId,
        align: u64,
    ) -> Result<(), ObjectError> {
        let section = self.section_mut(section)?;
        if !align.is_power_of_two() {
            return Err(ObjectError::new(format!(
                "alignment {} of section {} is not a power of two",
                align, section.name
            )));
        }
        section.align = align;
        Ok(())
    }

    fn set_section_flags(
        &mut self,
        section: SectionId,
        flags: SectionFlags,
    ) -> Result<(), ObjectError> {
        self.section_mut(section)?.flags = flags;
        Ok(())
    }

    fn add_symbol(&mut self, symbol: Symbol) -> Result<(), ObjectError> {
        check_name(&symbol.name, "symbol")?;
        let section = self.section_mut(symbol.section)?;
        let size = section.size.unwrap_or(0);
        if symbol.value > size {
            return Err(ObjectError::new(format!(
                "symbol {} at {:#x} lies outside section {} of size {:#x}",
                symbol.name, symbol.value, section.name, size
            )));
        }
        if self.symbols.iter().any(|s| s.name == symbol.name) {
            return Err(ObjectError::new(format!(
                "symbol {} already defined",
                symbol.name
            )));
        }
        self.symbols.push(symbol);
        Ok(())
    }

    fn set_section_contents(
        &mut self,
        section: SectionId,
        data: &[u8],
        offset: u64,
    ) -> Result<(), ObjectError> {
        let section = self.section_mut(section)?;
        let size = section
            .size
            .ok_or_else(|| ObjectError::new(format!("section {} has no size", section.name)))?;
        let end = offset.checked_add(data.len() as u64);
        match end {
            Some(end) if end <= size => {
                section.data[offset as usize..end as usize].copy_from_slice(data);
                Ok(())
            }
            _ => Err(ObjectError::new(format!(
                "{} bytes at {:#x} overflow section {} of size {:#x}",
                data.len(),
                offset,
                section.name,
                size
            ))),
        }
    }
}

fn read_ident(f: &mut (impl Read + Seek)) -> io::Result<ElfClass> {
    let mut buf = [0; EI_NIDENT];
    f.seek(SeekFrom::Start(0))?;
    f.read_exact(&mut buf)?;
    let ident = Elf_Ident::from_bytes(buf);
    if ident.ei_mag != ELFMAG {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not an ELF file"));
    }
    match ident.ei_class {
        ELFCLASS32 => Ok(ElfClass::Elf32),
        ELFCLASS64 => Ok(ElfClass::Elf64),
        class => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown ELF class {}", class),
        )),
    }
}

/// Section header table location: `(e_shoff, e_shnum, e_shstrndx)`
fn read_ehdr(f: &mut (impl Read + Seek), class: ElfClass) -> io::Result<(u64, u16, u16)> {
    f.seek(SeekFrom::Start(0))?;
    Ok(match class {
        ElfClass::Elf64 => {
            let mut buf = [0; EHDR64_SIZE];
            f.read_exact(&mut buf)?;
            let ehdr = Elf64_Ehdr::from_bytes(buf);
            (ehdr.e_shoff, ehdr.e_shnum, ehdr.e_shstrndx)
        }
        ElfClass::Elf32 => {
            let mut buf = [0; EHDR32_SIZE];
            f.read_exact(&mut buf)?;
            let ehdr = Elf32_Ehdr::from_bytes(buf);
            (ehdr.e_shoff as u64, ehdr.e_shnum, ehdr.e_shstrndx)
        }
    })
}

fn read_at(f: &mut (impl Read + Seek), offset: u64, size: u64) -> io::Result<Vec<u8>> {
    let mut data = vec![0; size as usize];
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(&mut data)?;
    Ok(data)
}

/// Finds the header of the section called `name` in an ELF file of either
/// class.
pub fn elf_get_section(
    f: &mut (impl Read + Seek),
    name: &[u8],
) -> io::Result<Option<SectionHeader>> {
    let class = read_ident(f)?;
    let (shoff, shnum, shstrndx) = read_ehdr(f, class)?;
    let shdr_size = class.shdr_size() as u64;

    // Read section header for the string table
    f.seek(SeekFrom::Start(shoff + shstrndx as u64 * shdr_size))?;
    let strtab_hdr = SectionHeader::read(class, f)?;
    let strtab = read_at(f, strtab_hdr.offset, strtab_hdr.size)?;

    f.seek(SeekFrom::Start(shoff))?;
    for _ in 0..shnum {
        let shdr = SectionHeader::read(class, f)?;

        let mut cur_name = strtab.get(shdr.name as usize..).unwrap_or(&[]);
        if let Some(idx) = cur_name.iter().position(|c| *c == b'\0') {
            cur_name = &cur_name[..idx];
        }
        if cur_name == name {
            return Ok(Some(shdr));
        }
    }

    Ok(None)
}

/// Reads the file contents of the section called `name`.
pub fn elf_read_section(f: &mut (impl Read + Seek), name: &[u8]) -> io::Result<Option<Vec<u8>>> {
    match elf_get_section(f, name)? {
        Some(shdr) if shdr.kind == SHT_NOBITS => Ok(Some(Vec::new())),
        Some(shdr) => read_at(f, shdr.offset, shdr.size).map(Some),
        None => Ok(None),
    }
}
