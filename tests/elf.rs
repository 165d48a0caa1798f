mod common;

use std::io::{Seek, SeekFrom, Write};

use bfcc::elf::types::{
    Elf32_Sym, Elf64_Sym, EM_386, EM_X86_64, SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS, SYM32_SIZE,
    SYM64_SIZE,
};
use bfcc::elf::{elf_get_section, elf_read_section};
use bfcc::{Arch, Codegen, Config, ElfObject, ENTRY_SYMBOL};

const SOURCE: &[u8] = b"++[>+<-]>[-],.";

fn write_object(arch: Arch) -> (std::fs::File, Vec<u8>) {
    let mut codegen = arch.codegen(Config::default());
    codegen.consume(SOURCE).unwrap();
    let mut object = ElfObject::for_arch(arch);
    codegen.dump(&mut object).unwrap();
    let code = codegen.frozen().unwrap().code().to_vec();

    let mut file = tempfile::tempfile().unwrap();
    object.write_to(&mut file).unwrap();
    file.flush().unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    (file, code)
}

fn symbol_name(strtab: &[u8], offset: u32) -> &[u8] {
    let name = &strtab[offset as usize..];
    &name[..name.iter().position(|c| *c == 0).unwrap()]
}

#[test]
fn x86_64_object_reads_back() {
    let (mut file, code) = write_object(Arch::X86_64);

    let mut header = [0; 20];
    std::io::Read::read_exact(&mut file, &mut header).unwrap();
    assert_eq!(header[4], 2);
    assert_eq!(u16::from_le_bytes([header[18], header[19]]), EM_X86_64);

    let text = elf_get_section(&mut file, b".text").unwrap().unwrap();
    assert_eq!(text.kind, SHT_PROGBITS);
    assert_eq!(text.flags, SHF_ALLOC | SHF_EXECINSTR);
    assert_eq!(text.align, 8);
    assert_eq!(elf_read_section(&mut file, b".text").unwrap().unwrap(), code);

    let symtab = elf_read_section(&mut file, b".symtab").unwrap().unwrap();
    let strtab = elf_read_section(&mut file, b".strtab").unwrap().unwrap();
    assert_eq!(symtab.len(), 2 * SYM64_SIZE);
    let mut entry = [0; SYM64_SIZE];
    entry.copy_from_slice(&symtab[SYM64_SIZE..]);
    let main = Elf64_Sym::from_bytes(entry);
    assert_eq!(symbol_name(&strtab, main.st_name), ENTRY_SYMBOL.as_bytes());
    assert_eq!(main.st_value, 0);
    assert_eq!(main.st_size, code.len() as u64);
}

#[test]
fn i386_object_reads_back() {
    let (mut file, code) = write_object(Arch::I386);

    let mut header = [0; 20];
    std::io::Read::read_exact(&mut file, &mut header).unwrap();
    assert_eq!(header[4], 1);
    assert_eq!(u16::from_le_bytes([header[18], header[19]]), EM_386);

    assert_eq!(elf_read_section(&mut file, b".text").unwrap().unwrap(), code);
    let symtab = elf_get_section(&mut file, b".symtab").unwrap().unwrap();
    assert_eq!(symtab.entsize, SYM32_SIZE as u64);
    assert_eq!(symtab.info, 1);

    let symtab = elf_read_section(&mut file, b".symtab").unwrap().unwrap();
    let strtab = elf_read_section(&mut file, b".strtab").unwrap().unwrap();
    let mut entry = [0; SYM32_SIZE];
    entry.copy_from_slice(&symtab[SYM32_SIZE..]);
    let main = Elf32_Sym::from_bytes(entry);
    assert_eq!(symbol_name(&strtab, main.st_name), ENTRY_SYMBOL.as_bytes());
    assert_eq!(main.st_size as usize, code.len());
}

#[test]
fn objects_mark_the_stack_non_executable() {
    for &arch in &[Arch::X86_64, Arch::I386] {
        let (mut file, _) = write_object(arch);
        let note = elf_get_section(&mut file, b".note.GNU-stack")
            .unwrap()
            .unwrap();
        assert_eq!(note.size, 0);
        assert_eq!(note.flags, 0);
    }
}

#[test]
fn tape_size_changes_only_constants() {
    let small = common::compile_chunks(
        Arch::X86_64,
        Config {
            strict: false,
            tape_size: 4096,
        },
        Some(SOURCE),
    );
    let large = common::compile(Arch::X86_64, SOURCE);
    assert_eq!(small.code().len(), large.code().len());
    assert_ne!(small.code(), large.code());
}
