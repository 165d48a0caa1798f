//! Layout of the record the generated function receives as its only
//! argument. The generated code reaches its fields by offset, so the
//! host-side struct is packed to match on both targets.

use std::io::{self, Read, Write};

/// Field order of the state record, in pointer-sized slots
pub const TAPE_SLOT: i32 = 0;
pub const GETC_SLOT: i32 = 1;
pub const PUTC_SLOT: i32 = 2;

/// Reads one byte for `,`
pub type GetcFn = extern "C" fn(state: *mut BfState) -> u8;
/// Writes one byte for `.`
pub type PutcFn = extern "C" fn(state: *mut BfState, c: u8);

#[repr(C, packed)]
pub struct BfState {
    pub tape: *mut u8,
    pub getc: GetcFn,
    pub putc: PutcFn,
}

impl BfState {
    /// State wired to the process's stdin and stdout
    pub fn with_stdio(tape: *mut u8) -> Self {
        Self {
            tape,
            getc: std_getc,
            putc: std_putc,
        }
    }
}

/// Reads a byte from stdin. End of input reads as 0xff, like C's `getc`
/// returning EOF truncated to a byte.
pub extern "C" fn std_getc(_state: *mut BfState) -> u8 {
    let mut buf = [0u8; 1];
    match io::stdin().read(&mut buf) {
        Ok(1) => buf[0],
        _ => 0xff,
    }
}

pub extern "C" fn std_putc(_state: *mut BfState, c: u8) {
    let mut stdout = io::stdout();
    // Nowhere to report a failed write from inside generated code
    let _ = stdout.write_all(&[c]);
    if c == b'\n' {
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;
    use std::ptr::addr_of;

    #[test]
    fn record_is_three_packed_pointers() {
        assert_eq!(size_of::<BfState>(), 3 * size_of::<usize>());
    }

    #[test]
    fn stdio_state_fills_the_slots_codegen_reads() {
        let mut tape = [0u8; 4];
        let state = BfState::with_stdio(tape.as_mut_ptr());
        let base = &state as *const BfState as usize;
        let slot = |field: usize| (field - base) / size_of::<usize>();

        assert_eq!(slot(addr_of!(state.tape) as usize), TAPE_SLOT as usize);
        assert_eq!(slot(addr_of!(state.getc) as usize), GETC_SLOT as usize);
        assert_eq!(slot(addr_of!(state.putc) as usize), PUTC_SLOT as usize);

        assert_eq!({ state.tape }, tape.as_mut_ptr());
        assert_eq!({ state.getc } as usize, std_getc as usize);
        assert_eq!({ state.putc } as usize, std_putc as usize);
    }
}
