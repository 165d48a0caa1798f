//! Per-ISA parts of the backend: register assignment, the exported entry
//! point, and the calling convention glue around the generated function
//! and the state callbacks. Everything here is fixed at compile time.

use crate::asm::x86::{self, mem, Alu, Reg, Width};
use crate::codegen::Arch;
use crate::state::{GETC_SLOT, PUTC_SLOT, TAPE_SLOT};

/// Name of the generated function in the object file
pub const ENTRY_SYMBOL: &str = "_main";

pub trait Target: 'static {
    const ARCH: Arch;
    /// Operand size of pointer arithmetic
    const WIDTH: Width;
    /// Size of a pointer, and of each state record slot
    const WORD: i32;

    /// Current cell pointer
    const TAPE: Reg;
    /// The state record passed to the generated function
    const STATE: Reg;
    /// `tape - 1`, compared against after moving left
    const BEGIN: Reg;
    /// `tape + tape_size - 1`, compared against after moving right
    const END: Reg;

    /// Symbols bound by the prologue, in label order
    const EXPORTS: &'static [&'static str] = &[ENTRY_SYMBOL];

    /// Saves the registers taken over by the function and sets up the
    /// tape registers from the state record.
    fn prologue(code: &mut Vec<u8>, tape_size: i32);

    /// Undoes `prologue` and returns.
    fn epilogue(code: &mut Vec<u8>);

    /// Calls `state.getc(state)`, leaving the byte in `al`.
    fn call_getc(code: &mut Vec<u8>);

    /// Calls `state.putc(state, eax)`.
    fn call_putc(code: &mut Vec<u8>);

    fn slot(slot: i32) -> x86::Mem {
        mem(Self::STATE, slot * Self::WORD)
    }

    fn load_tape_bounds(code: &mut Vec<u8>, tape_size: i32) {
        x86::mov_load(code, Self::WIDTH, Self::TAPE, Self::slot(TAPE_SLOT));
        x86::lea(code, Self::WIDTH, Self::BEGIN, mem(Self::TAPE, -1));
        x86::lea(code, Self::WIDTH, Self::END, mem(Self::TAPE, tape_size - 1));
    }
}

/// System V AMD64
pub struct X86_64;

impl Target for X86_64 {
    const ARCH: Arch = Arch::X86_64;
    const WIDTH: Width = Width::W64;
    const WORD: i32 = 8;

    const TAPE: Reg = Reg::RBX;
    const STATE: Reg = Reg::R12;
    const BEGIN: Reg = Reg::R13;
    const END: Reg = Reg::R14;

    fn prologue(code: &mut Vec<u8>, tape_size: i32) {
        x86::push(code, Self::TAPE);
        x86::push(code, Self::STATE);
        x86::push(code, Self::BEGIN);
        x86::push(code, Self::END);
        // Return address plus four pushes leaves rsp 8 bytes off a call boundary
        x86::alu_imm(code, Width::W64, Alu::Sub, Reg::RSP, 8);
        x86::mov_rr(code, Width::W64, Self::STATE, Reg::RDI);
        Self::load_tape_bounds(code, tape_size);
    }

    fn epilogue(code: &mut Vec<u8>) {
        x86::alu_imm(code, Width::W64, Alu::Add, Reg::RSP, 8);
        x86::pop(code, Self::END);
        x86::pop(code, Self::BEGIN);
        x86::pop(code, Self::STATE);
        x86::pop(code, Self::TAPE);
        x86::ret(code);
    }

    fn call_getc(code: &mut Vec<u8>) {
        x86::mov_rr(code, Width::W64, Reg::RDI, Self::STATE);
        x86::call_indirect(code, Self::slot(GETC_SLOT));
    }

    fn call_putc(code: &mut Vec<u8>) {
        x86::mov_rr(code, Width::W32, Reg::RSI, Reg::RAX);
        x86::mov_rr(code, Width::W64, Reg::RDI, Self::STATE);
        x86::call_indirect(code, Self::slot(PUTC_SLOT));
    }
}

/// 32-bit cdecl
pub struct I386;

impl I386 {
    /// Pads the stack so that after pushing `args` words the call site is
    /// 16-byte aligned, then pushes them last to first.
    fn call_with(code: &mut Vec<u8>, args: &[Reg], slot: i32) {
        let pad = 16 - 4 * args.len() as i32;
        x86::alu_imm(code, Width::W32, Alu::Sub, Reg::ESP, pad);
        for arg in args.iter().rev() {
            x86::push(code, *arg);
        }
        x86::call_indirect(code, Self::slot(slot));
        x86::alu_imm(code, Width::W32, Alu::Add, Reg::ESP, 16);
    }
}

impl Target for I386 {
    const ARCH: Arch = Arch::I386;
    const WIDTH: Width = Width::W32;
    const WORD: i32 = 4;

    const TAPE: Reg = Reg::EBX;
    const STATE: Reg = Reg::EBP;
    const BEGIN: Reg = Reg::ESI;
    const END: Reg = Reg::EDI;

    fn prologue(code: &mut Vec<u8>, tape_size: i32) {
        x86::push(code, Self::TAPE);
        x86::push(code, Self::STATE);
        x86::push(code, Self::BEGIN);
        x86::push(code, Self::END);
        // Argument sits above the return address and the four pushes
        x86::mov_load(code, Width::W32, Self::STATE, mem(Reg::ESP, 20));
        x86::alu_imm(code, Width::W32, Alu::Sub, Reg::ESP, 12);
        Self::load_tape_bounds(code, tape_size);
    }

    fn epilogue(code: &mut Vec<u8>) {
        x86::alu_imm(code, Width::W32, Alu::Add, Reg::ESP, 12);
        x86::pop(code, Self::END);
        x86::pop(code, Self::BEGIN);
        x86::pop(code, Self::STATE);
        x86::pop(code, Self::TAPE);
        x86::ret(code);
    }

    fn call_getc(code: &mut Vec<u8>) {
        Self::call_with(code, &[Self::STATE], GETC_SLOT);
    }

    fn call_putc(code: &mut Vec<u8>) {
        Self::call_with(code, &[Self::STATE, Reg::EAX], PUTC_SLOT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_64_prologue_and_epilogue() {
        let mut code = Vec::new();
        X86_64::prologue(&mut code, 8192);
        assert_eq!(
            code,
            [
                0x53, // push rbx
                0x41, 0x54, // push r12
                0x41, 0x55, // push r13
                0x41, 0x56, // push r14
                0x48, 0x83, 0xec, 0x08, // sub rsp, 8
                0x49, 0x89, 0xfc, // mov r12, rdi
                0x49, 0x8b, 0x1c, 0x24, // mov rbx, [r12]
                0x4c, 0x8d, 0x6b, 0xff, // lea r13, [rbx-1]
                0x4c, 0x8d, 0xb3, 0xff, 0x1f, 0x00, 0x00, // lea r14, [rbx+8191]
            ]
        );

        let mut code = Vec::new();
        X86_64::epilogue(&mut code);
        assert_eq!(
            code,
            [0x48, 0x83, 0xc4, 0x08, 0x41, 0x5e, 0x41, 0x5d, 0x41, 0x5c, 0x5b, 0xc3]
        );
    }

    #[test]
    fn x86_64_callbacks_use_state_slots() {
        let mut code = Vec::new();
        X86_64::call_putc(&mut code);
        assert_eq!(
            code,
            [
                0x89, 0xc6, // mov esi, eax
                0x4c, 0x89, 0xe7, // mov rdi, r12
                0x41, 0xff, 0x54, 0x24, 0x10, // call [r12+16]
            ]
        );
    }

    #[test]
    fn i386_prologue_reads_the_stack_argument() {
        let mut code = Vec::new();
        I386::prologue(&mut code, 16);
        assert_eq!(
            code,
            [
                0x53, 0x55, 0x56, 0x57, // push ebx, ebp, esi, edi
                0x8b, 0x6c, 0x24, 0x14, // mov ebp, [esp+20]
                0x83, 0xec, 0x0c, // sub esp, 12
                0x8b, 0x5d, 0x00, // mov ebx, [ebp]
                0x8d, 0x73, 0xff, // lea esi, [ebx-1]
                0x8d, 0x7b, 0x0f, // lea edi, [ebx+15]
            ]
        );
    }

    #[test]
    fn i386_calls_keep_the_stack_aligned() {
        let mut code = Vec::new();
        I386::call_putc(&mut code);
        assert_eq!(
            code,
            [
                0x83, 0xec, 0x08, // sub esp, 8
                0x50, // push eax
                0x55, // push ebp
                0xff, 0x55, 0x08, // call [ebp+8]
                0x83, 0xc4, 0x10, // add esp, 16
            ]
        );
    }
}
