//! Encoder for the handful of x86 instructions the backends select. The
//! same functions serve i386 and x86_64: a REX prefix is only produced for
//! 64-bit operands or registers r8-r15, neither of which the i386 backend
//! uses.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Reg(u8);

impl Reg {
    pub const RAX: Reg = Reg(0);
    pub const RCX: Reg = Reg(1);
    pub const RDX: Reg = Reg(2);
    pub const RBX: Reg = Reg(3);
    pub const RSP: Reg = Reg(4);
    pub const RBP: Reg = Reg(5);
    pub const RSI: Reg = Reg(6);
    pub const RDI: Reg = Reg(7);
    pub const R8: Reg = Reg(8);
    pub const R9: Reg = Reg(9);
    pub const R10: Reg = Reg(10);
    pub const R11: Reg = Reg(11);
    pub const R12: Reg = Reg(12);
    pub const R13: Reg = Reg(13);
    pub const R14: Reg = Reg(14);
    pub const R15: Reg = Reg(15);

    pub const EAX: Reg = Reg::RAX;
    pub const ECX: Reg = Reg::RCX;
    pub const EDX: Reg = Reg::RDX;
    pub const EBX: Reg = Reg::RBX;
    pub const ESP: Reg = Reg::RSP;
    pub const EBP: Reg = Reg::RBP;
    pub const ESI: Reg = Reg::RSI;
    pub const EDI: Reg = Reg::RDI;

    fn low(self) -> u8 {
        self.0 & 7
    }

    fn ext(self) -> bool {
        self.0 >= 8
    }
}

/// Operand size of register instructions
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width {
    W32,
    W64,
}

/// `[base + disp]`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mem {
    pub base: Reg,
    pub disp: i32,
}

pub fn mem(base: Reg, disp: i32) -> Mem {
    Mem { base, disp }
}

/// Opcode extensions of the group 1 immediate instructions
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Alu {
    Add = 0,
    Sub = 5,
    Cmp = 7,
}

/// Condition codes, as the low nibble of `Jcc`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond {
    Z = 0x4,
    NZ = 0x5,
    BE = 0x6,
    A = 0x7,
}

impl Cond {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Z => "jz",
            Cond::NZ => "jnz",
            Cond::BE => "jbe",
            Cond::A => "ja",
        }
    }
}

fn fits_i8(value: i32) -> bool {
    value >= i32::from(i8::MIN) && value <= i32::from(i8::MAX)
}

fn rex(code: &mut Vec<u8>, width: Width, reg: Reg, rm: Reg) {
    let w = width == Width::W64;
    if w || reg.ext() || rm.ext() {
        code.push(0x40 | (w as u8) << 3 | (reg.ext() as u8) << 2 | rm.ext() as u8);
    }
}

fn modrm_reg(code: &mut Vec<u8>, reg: u8, rm: Reg) {
    code.push(0xc0 | (reg & 7) << 3 | rm.low());
}

fn modrm_mem(code: &mut Vec<u8>, reg: u8, mem: Mem) {
    let base = mem.base.low();
    // rbp/r13 have no displacement-free form
    let mode = if mem.disp == 0 && base != 5 {
        0b00
    } else if fits_i8(mem.disp) {
        0b01
    } else {
        0b10
    };
    code.push(mode << 6 | (reg & 7) << 3 | base);
    // rsp/r12 as a base need a SIB byte
    if base == 4 {
        code.push(0x24);
    }
    match mode {
        0b01 => code.push(mem.disp as i8 as u8),
        0b10 => code.extend_from_slice(&mem.disp.to_le_bytes()),
        _ => (),
    }
}

pub fn push(code: &mut Vec<u8>, reg: Reg) {
    rex(code, Width::W32, Reg::RAX, reg);
    code.push(0x50 + reg.low());
}

pub fn pop(code: &mut Vec<u8>, reg: Reg) {
    rex(code, Width::W32, Reg::RAX, reg);
    code.push(0x58 + reg.low());
}

/// `mov dst, src`
pub fn mov_rr(code: &mut Vec<u8>, width: Width, dst: Reg, src: Reg) {
    rex(code, width, src, dst);
    code.push(0x89);
    modrm_reg(code, src.0, dst);
}

/// `mov dst, [mem]`
pub fn mov_load(code: &mut Vec<u8>, width: Width, dst: Reg, mem: Mem) {
    rex(code, width, dst, mem.base);
    code.push(0x8b);
    modrm_mem(code, dst.0, mem);
}

/// `lea dst, [mem]`
pub fn lea(code: &mut Vec<u8>, width: Width, dst: Reg, mem: Mem) {
    rex(code, width, dst, mem.base);
    code.push(0x8d);
    modrm_mem(code, dst.0, mem);
}

/// `add/sub/cmp dst, imm`
pub fn alu_imm(code: &mut Vec<u8>, width: Width, op: Alu, dst: Reg, imm: i32) {
    rex(code, width, Reg::RAX, dst);
    if fits_i8(imm) {
        code.push(0x83);
        modrm_reg(code, op as u8, dst);
        code.push(imm as i8 as u8);
    } else {
        code.push(0x81);
        modrm_reg(code, op as u8, dst);
        code.extend_from_slice(&imm.to_le_bytes());
    }
}

/// `cmp a, b`
pub fn cmp_rr(code: &mut Vec<u8>, width: Width, a: Reg, b: Reg) {
    rex(code, width, b, a);
    code.push(0x39);
    modrm_reg(code, b.0, a);
}

/// `add/sub/cmp byte [mem], imm`
pub fn alu_byte_imm(code: &mut Vec<u8>, op: Alu, mem: Mem, imm: u8) {
    rex(code, Width::W32, Reg::RAX, mem.base);
    code.push(0x80);
    modrm_mem(code, op as u8, mem);
    code.push(imm);
}

/// `mov byte [mem], imm`
pub fn mov_byte_imm(code: &mut Vec<u8>, mem: Mem, imm: u8) {
    rex(code, Width::W32, Reg::RAX, mem.base);
    code.push(0xc6);
    modrm_mem(code, 0, mem);
    code.push(imm);
}

/// `mov byte [mem], al`
pub fn store_al(code: &mut Vec<u8>, mem: Mem) {
    rex(code, Width::W32, Reg::RAX, mem.base);
    code.push(0x88);
    modrm_mem(code, Reg::RAX.0, mem);
}

/// `movzx dst32, byte [mem]`
pub fn movzx_byte(code: &mut Vec<u8>, dst: Reg, mem: Mem) {
    rex(code, Width::W32, dst, mem.base);
    code.extend_from_slice(&[0x0f, 0xb6]);
    modrm_mem(code, dst.0, mem);
}

/// `call [mem]`; the operand is pointer sized in either mode
pub fn call_indirect(code: &mut Vec<u8>, mem: Mem) {
    rex(code, Width::W32, Reg::RAX, mem.base);
    code.push(0xff);
    modrm_mem(code, 2, mem);
}

/// Short conditional jump over the next `skip` bytes
pub fn jcc_short(code: &mut Vec<u8>, cond: Cond, skip: u8) {
    code.push(0x70 | cond as u8);
    code.push(skip);
}

/// Opcode bytes of a near conditional jump, whose rel32 follows
pub fn jcc_near_opcode(cond: Cond) -> [u8; 2] {
    [0x0f, 0x80 | cond as u8]
}

/// Length of `jcc_near_opcode` plus its displacement
pub const JCC_NEAR_LEN: usize = 6;

pub fn ret(code: &mut Vec<u8>) {
    code.push(0xc3);
}
