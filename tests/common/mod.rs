#![allow(dead_code)]

use bfcc::{Arch, Codegen, Config, FrozenCode};

/// Feeds `chunks` to a fresh codegen and freezes it.
pub fn compile_chunks<'a>(
    arch: Arch,
    config: Config,
    chunks: impl IntoIterator<Item = &'a [u8]>,
) -> FrozenCode {
    let mut codegen = arch.codegen(config);
    for chunk in chunks {
        codegen.consume(chunk).unwrap();
    }
    codegen.freeze().unwrap();
    codegen.frozen().unwrap().clone()
}

pub fn compile(arch: Arch, source: &[u8]) -> FrozenCode {
    compile_chunks(arch, Config::default(), Some(source))
}

/// Splits `source` into pieces whose lengths cycle through `sizes`.
pub fn rechunk<'a>(source: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut rest = source;
    for size in sizes.iter().cycle() {
        if rest.is_empty() {
            break;
        }
        let (chunk, tail) = rest.split_at((*size).max(1).min(rest.len()));
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub use exec::*;

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
mod exec {
    use std::collections::VecDeque;
    use std::mem::transmute;

    use memmap2::MmapMut;

    use bfcc::{Arch, BfState, Config, ENTRY_SYMBOL};

    /// State record followed by the host side of the I/O callbacks. The
    /// generated code only sees the leading `BfState`.
    #[repr(C)]
    struct Harness {
        state: BfState,
        input: VecDeque<u8>,
        output: Vec<u8>,
    }

    extern "C" fn read_one(state: *mut BfState) -> u8 {
        let harness = unsafe { &mut *(state as *mut Harness) };
        harness.input.pop_front().unwrap_or(0)
    }

    extern "C" fn write_one(state: *mut BfState, c: u8) {
        let harness = unsafe { &mut *(state as *mut Harness) };
        harness.output.push(c);
    }

    pub struct Run {
        pub output: Vec<u8>,
        pub tape: Vec<u8>,
    }

    /// Compiles `source` for the host and calls it on a zeroed tape.
    pub fn run_with(source: &[u8], tape_size: u32, input: &[u8]) -> Run {
        let config = Config {
            strict: false,
            tape_size,
        };
        let frozen = super::compile_chunks(Arch::X86_64, config, Some(source));
        let entry = frozen.symbol(ENTRY_SYMBOL).unwrap();

        let mut map = MmapMut::map_anon(frozen.code().len()).unwrap();
        map.copy_from_slice(frozen.code());
        let map = map.make_exec().unwrap();

        let mut tape = vec![0u8; tape_size as usize];
        let mut harness = Harness {
            state: BfState {
                tape: tape.as_mut_ptr(),
                getc: read_one,
                putc: write_one,
            },
            input: input.iter().copied().collect(),
            output: Vec::new(),
        };

        unsafe {
            let main: extern "C" fn(*mut BfState) = transmute(map.as_ptr().add(entry));
            main(&mut harness as *mut Harness as *mut BfState);
        }

        Run {
            output: harness.output,
            tape,
        }
    }

    pub fn run(source: &[u8], input: &[u8]) -> Vec<u8> {
        run_with(source, bfcc::DEFAULT_TAPE_SIZE, input).output
    }
}
