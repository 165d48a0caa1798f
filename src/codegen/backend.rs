use std::marker::PhantomData;
use std::mem::replace;
use std::thread;

use log::{debug, error, trace, warn};

use super::emit::{ExportedSymbol, FrozenCode};
use super::target::Target;
use super::{Arch, Codegen, Config};
use crate::asm::x86::{self, mem, Alu, Cond, Mem, Reg};
use crate::asm::CodeBuffer;
use crate::error::CodegenError;
use crate::label::LabelTable;
use crate::loops::{LoopFrame, LoopStack};
use crate::object::ObjectContainer;

/// Commands that are folded into a single instruction when repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fold {
    Left,
    Right,
    Inc,
    Dec,
}

impl Fold {
    fn from_byte(byte: u8) -> Option<Fold> {
        match byte {
            b'<' => Some(Fold::Left),
            b'>' => Some(Fold::Right),
            b'+' => Some(Fold::Inc),
            b'-' => Some(Fold::Dec),
            _ => None,
        }
    }
}

/// Source seen but not yet compiled, because the next byte decides what
/// to emit for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Nothing,
    Run(Fold, usize),
    /// `[`, which could still become `[-]`
    Open(usize),
    /// `[-`
    OpenDec(usize),
}

#[derive(Debug)]
enum Phase {
    Open,
    Frozen(FrozenCode),
    Failed(CodegenError),
}

/// The Brainfuck state machine, instantiated once per target.
pub struct Backend<T: Target> {
    config: Config,
    buf: CodeBuffer,
    labels: LabelTable,
    loops: LoopStack,
    /// Source bytes scanned so far
    consumed: usize,
    pending: Pending,
    phase: Phase,
    target: PhantomData<T>,
}

fn cell<T: Target>() -> Mem {
    mem(T::TAPE, 0)
}

impl<T: Target> Backend<T> {
    /// Creates a backend with the function prologue already emitted.
    pub fn new(config: Config) -> Self {
        assert!(
            config.tape_size >= 1 && config.tape_size <= i32::MAX as u32,
            "tape size {} out of range",
            config.tape_size
        );

        let labels = LabelTable::new(T::EXPORTS);
        let mut buf = CodeBuffer::new(labels.capacity());
        // Every exported label marks the entry point
        for (_, label) in labels.exported_labels() {
            buf.bind(label);
        }
        T::prologue(buf.code(), config.tape_size as i32);

        debug!(
            "{} codegen: tape size {}, strict {}",
            T::ARCH,
            config.tape_size,
            config.strict
        );

        Self {
            config,
            buf,
            labels,
            loops: LoopStack::new(),
            consumed: 0,
            pending: Pending::Nothing,
            phase: Phase::Open,
            target: PhantomData,
        }
    }

    fn fail(&mut self, err: CodegenError) -> CodegenError {
        self.phase = Phase::Failed(err.clone());
        err
    }

    fn scan(&mut self, byte: u8, position: usize) -> Result<(), CodegenError> {
        match replace(&mut self.pending, Pending::Nothing) {
            Pending::Open(open) => {
                if byte == b'-' {
                    self.pending = Pending::OpenDec(open);
                    return Ok(());
                }
                self.open_loop(open)?;
            }
            Pending::OpenDec(open) => {
                if byte == b']' {
                    self.clear_cell(open);
                    return Ok(());
                }
                self.open_loop(open)?;
                self.pending = Pending::Run(Fold::Dec, 1);
            }
            other => self.pending = other,
        }

        if let Some(fold) = Fold::from_byte(byte) {
            if let Pending::Run(current, count) = &mut self.pending {
                if *current == fold {
                    *count += 1;
                    return Ok(());
                }
            }
            self.flush();
            self.pending = Pending::Run(fold, 1);
            return Ok(());
        }

        self.flush();
        match byte {
            b'[' => {
                if self.loops.is_full() {
                    return Err(CodegenError::nesting_too_deep(position));
                }
                self.pending = Pending::Open(position);
            }
            b']' => self.close_loop(position)?,
            b',' => self.input(),
            b'.' => self.output(),
            _ => {
                if self.config.strict && !byte.is_ascii_control() && !byte.is_ascii_whitespace() {
                    return Err(CodegenError::unknown_symbol(position, byte));
                }
            }
        }
        Ok(())
    }

    /// Emits whatever is pending. Only an unclosed loop can be left over.
    fn flush_lookahead(&mut self) -> Result<(), CodegenError> {
        match replace(&mut self.pending, Pending::Nothing) {
            Pending::Open(open) => self.open_loop(open),
            Pending::OpenDec(open) => {
                self.open_loop(open)?;
                self.emit_run(Fold::Dec, 1);
                Ok(())
            }
            Pending::Run(fold, count) => {
                self.emit_run(fold, count);
                Ok(())
            }
            Pending::Nothing => Ok(()),
        }
    }

    fn flush(&mut self) {
        if let Pending::Run(fold, count) = replace(&mut self.pending, Pending::Nothing) {
            self.emit_run(fold, count);
        }
    }

    fn emit_run(&mut self, fold: Fold, count: usize) {
        let tape_size = self.config.tape_size as usize;
        let code = self.buf.code();
        match fold {
            Fold::Inc => x86::alu_byte_imm(code, Alu::Add, cell::<T>(), count as u8),
            Fold::Dec => x86::alu_byte_imm(code, Alu::Sub, cell::<T>(), count as u8),
            Fold::Left => Self::shift(code, Alu::Sub, count % tape_size, T::BEGIN, Cond::A, tape_size),
            Fold::Right => Self::shift(code, Alu::Add, count % tape_size, T::END, Cond::BE, tape_size),
        }
    }

    /// Moves the tape pointer by `distance` and wraps it back by a whole
    /// tape length when it steps past `bound`. Nothing is emitted for a
    /// zero move, which cannot leave the tape.
    fn shift(code: &mut Vec<u8>, op: Alu, distance: usize, bound: Reg, inside: Cond, tape_size: usize) {
        if distance == 0 {
            return;
        }
        let undo = match op {
            Alu::Add => Alu::Sub,
            _ => Alu::Add,
        };
        let mut fixup = Vec::new();
        x86::alu_imm(&mut fixup, T::WIDTH, undo, T::TAPE, tape_size as i32);

        x86::alu_imm(code, T::WIDTH, op, T::TAPE, distance as i32);
        x86::cmp_rr(code, T::WIDTH, T::TAPE, bound);
        x86::jcc_short(code, inside, fixup.len() as u8);
        code.extend_from_slice(&fixup);
    }

    fn clear_cell(&mut self, open: usize) {
        trace!("{}: clear idiom", open);
        x86::mov_byte_imm(self.buf.code(), cell::<T>(), 0);
    }

    fn open_loop(&mut self, position: usize) -> Result<(), CodegenError> {
        let ((begin, end), grown) = self.labels.alloc_pair();
        if let Some(capacity) = grown {
            self.buf.grow_labels(capacity);
        }

        x86::alu_byte_imm(self.buf.code(), Alu::Cmp, cell::<T>(), 0);
        self.buf.jump(Cond::Z, end);
        self.buf.bind(begin);

        self.loops
            .push(LoopFrame {
                begin,
                end,
                position,
            })
            .map_err(|frame| CodegenError::nesting_too_deep(frame.position))
    }

    fn close_loop(&mut self, position: usize) -> Result<(), CodegenError> {
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| CodegenError::unmatched_close(position))?;

        x86::alu_byte_imm(self.buf.code(), Alu::Cmp, cell::<T>(), 0);
        self.buf.jump(Cond::NZ, frame.begin);
        self.buf.bind(frame.end);
        Ok(())
    }

    fn input(&mut self) {
        let code = self.buf.code();
        T::call_getc(code);
        x86::store_al(code, cell::<T>());
    }

    fn output(&mut self) {
        let code = self.buf.code();
        x86::movzx_byte(code, Reg::EAX, cell::<T>());
        T::call_putc(code);
    }

    fn link(&mut self) -> Result<FrozenCode, CodegenError> {
        self.flush_lookahead()?;
        if let Some(frame) = self.loops.innermost() {
            return Err(CodegenError::unclosed_loop(frame.position));
        }

        T::epilogue(self.buf.code());
        let linked = self.buf.link();

        let symbols = self
            .labels
            .exported_labels()
            .map(|(name, label)| ExportedSymbol {
                name,
                offset: linked
                    .offset(label)
                    .unwrap_or_else(|| panic!("exported label {} never bound", name)),
            })
            .collect();

        debug!(
            "{} codegen frozen: {} bytes, {} labels",
            T::ARCH,
            linked.code.len(),
            self.labels.len()
        );
        Ok(FrozenCode::new(linked.code, symbols))
    }
}

impl<T: Target> Codegen for Backend<T> {
    fn arch(&self) -> Arch {
        T::ARCH
    }

    fn strict(&self) -> bool {
        self.config.strict
    }

    fn set_strict(&mut self, strict: bool) {
        self.config.strict = strict;
    }

    fn consume(&mut self, source: &[u8]) -> Result<usize, CodegenError> {
        match &self.phase {
            Phase::Open => (),
            Phase::Failed(err) => return Err(err.clone()),
            Phase::Frozen(_) => panic!("consume called on a frozen codegen"),
        }

        for &byte in source {
            let position = self.consumed;
            if let Err(err) = self.scan(byte, position) {
                return Err(self.fail(err));
            }
            self.consumed += 1;
        }
        Ok(source.len())
    }

    fn freeze(&mut self) -> Result<(), CodegenError> {
        match &self.phase {
            Phase::Open => (),
            Phase::Frozen(_) => return Ok(()),
            Phase::Failed(err) => return Err(err.clone()),
        }

        match self.link() {
            Ok(frozen) => {
                self.phase = Phase::Frozen(frozen);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn dump(&mut self, object: &mut dyn ObjectContainer) -> Result<(), CodegenError> {
        self.freeze()?;
        match &self.phase {
            Phase::Frozen(frozen) => Ok(frozen.emit(object)?),
            _ => unreachable!("freeze succeeded without freezing"),
        }
    }

    fn frozen(&self) -> Option<&FrozenCode> {
        match &self.phase {
            Phase::Frozen(frozen) => Some(frozen),
            _ => None,
        }
    }

    fn listing(&mut self) -> String {
        self.buf.listing()
    }

    fn consumed(&self) -> usize {
        self.consumed
    }

    fn loop_depth(&self) -> usize {
        self.loops.depth()
    }

    fn label_count(&self) -> usize {
        self.labels.len()
    }
}

impl<T: Target> Drop for Backend<T> {
    fn drop(&mut self) {
        if let Phase::Open = self.phase {
            warn!("{} codegen dropped before freeze, freezing now", T::ARCH);
            if let Err(err) = self.freeze() {
                error!("freeze on drop failed: {}", err);
                if !thread::panicking() {
                    panic!("codegen dropped in a state that cannot be frozen: {}", err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::target::{I386, X86_64};
    use crate::elf::ElfObject;
    use crate::error::ErrorKind;
    use crate::loops::MAX_NESTING;

    fn body<T: Target>(source: &[u8]) -> Vec<u8> {
        let mut prologue = Vec::new();
        T::prologue(&mut prologue, 8192);
        let mut epilogue = Vec::new();
        T::epilogue(&mut epilogue);

        let mut backend = Backend::<T>::new(Config::default());
        backend.consume(source).unwrap();
        backend.freeze().unwrap();
        let code = backend.frozen().unwrap().code();
        assert!(code.starts_with(&prologue));
        assert!(code.ends_with(&epilogue));
        code[prologue.len()..code.len() - epilogue.len()].to_vec()
    }

    #[test]
    fn increments_fold_into_one_add() {
        assert_eq!(body::<X86_64>(b"+++"), [0x80, 0x03, 0x03]);
        assert_eq!(body::<X86_64>(b"--"), [0x80, 0x2b, 0x02]);
        // 256 wraps to an add of zero
        assert_eq!(body::<X86_64>(&[b'+'; 256]), [0x80, 0x03, 0x00]);
    }

    #[test]
    fn moves_wrap_around_the_tape() {
        assert_eq!(
            body::<X86_64>(b">>"),
            [
                0x48, 0x83, 0xc3, 0x02, // add rbx, 2
                0x4c, 0x39, 0xf3, // cmp rbx, r14
                0x76, 0x07, // jbe +7
                0x48, 0x81, 0xeb, 0x00, 0x20, 0x00, 0x00, // sub rbx, 8192
            ]
        );
        assert_eq!(
            body::<I386>(b"<"),
            [
                0x83, 0xeb, 0x01, // sub ebx, 1
                0x39, 0xf3, // cmp ebx, esi
                0x77, 0x06, // ja +6
                0x81, 0xc3, 0x00, 0x20, 0x00, 0x00, // add ebx, 8192
            ]
        );
        assert_eq!(
            body::<I386>(b">>>"),
            [
                0x83, 0xc3, 0x03, // add ebx, 3
                0x39, 0xfb, // cmp ebx, edi
                0x76, 0x06, // jbe +6
                0x81, 0xeb, 0x00, 0x20, 0x00, 0x00, // sub ebx, 8192
            ]
        );
    }

    #[test]
    fn whole_tape_moves_emit_nothing() {
        assert_eq!(body::<X86_64>(&[b'>'; 8192]), Vec::<u8>::new());
        assert_eq!(body::<X86_64>(&[b'<'; 16384]), Vec::<u8>::new());
    }

    #[test]
    fn clear_idiom_is_a_single_store() {
        assert_eq!(body::<X86_64>(b"[-]"), [0xc6, 0x03, 0x00]);
    }

    #[test]
    fn loops_compare_and_branch() {
        assert_eq!(
            body::<X86_64>(b"[+]"),
            [
                0x80, 0x3b, 0x00, // cmp byte [rbx], 0
                0x0f, 0x84, 0x0c, 0x00, 0x00, 0x00, // jz end
                0x80, 0x03, 0x01, // add byte [rbx], 1
                0x80, 0x3b, 0x00, // cmp byte [rbx], 0
                0x0f, 0x85, 0xf4, 0xff, 0xff, 0xff, // jnz begin
            ]
        );
    }

    #[test]
    fn almost_idioms_are_ordinary_loops() {
        let mut backend = Backend::<X86_64>::new(Config::default());
        backend.consume(b"[--]").unwrap();
        assert_eq!(backend.label_count(), 3);
        backend.consume(b"[-").unwrap();
        backend.consume(b"+]").unwrap();
        assert_eq!(backend.label_count(), 5);
        backend.freeze().unwrap();
    }

    #[test]
    fn comments_break_runs() {
        assert_eq!(body::<X86_64>(b"+ +"), [0x80, 0x03, 0x01, 0x80, 0x03, 0x01]);
    }

    #[test]
    fn io_calls_go_through_the_state() {
        assert_eq!(
            body::<X86_64>(b","),
            [
                0x4c, 0x89, 0xe7, // mov rdi, r12
                0x41, 0xff, 0x54, 0x24, 0x08, // call [r12+8]
                0x88, 0x03, // mov [rbx], al
            ]
        );
        assert_eq!(
            body::<I386>(b"."),
            [
                0x0f, 0xb6, 0x03, // movzx eax, byte [ebx]
                0x83, 0xec, 0x08, 0x50, 0x55, // sub esp, 8; push eax; push ebp
                0xff, 0x55, 0x08, // call [ebp+8]
                0x83, 0xc4, 0x10, // add esp, 16
            ]
        );
    }

    #[test]
    fn entry_symbol_is_at_offset_zero() {
        let mut backend = Backend::<I386>::new(Config::default());
        backend.freeze().unwrap();
        assert_eq!(backend.frozen().unwrap().symbol("_main"), Some(0));
    }

    #[test]
    fn label_table_grows_with_loop_count() {
        let mut backend = Backend::<X86_64>::new(Config::default());
        backend.consume(&b"[+]".repeat(10)).unwrap();
        assert_eq!(backend.label_count(), 21);
        assert!(backend.labels.capacity() >= 21);
        backend.freeze().unwrap();
    }

    #[test]
    fn failure_is_sticky() {
        let mut backend = Backend::<X86_64>::new(Config::default());
        let err = backend.consume(b"+]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnmatchedLoop);
        assert_eq!(err.position, Some(1));
        assert_eq!(backend.consume(b"+").unwrap_err(), err);
        assert_eq!(backend.freeze().unwrap_err(), err);

        let mut object = ElfObject::for_arch(Arch::X86_64);
        assert_eq!(backend.dump(&mut object).unwrap_err(), err);
        assert!(object.section_by_name(".text").is_none());
    }

    #[test]
    fn freeze_failure_is_returned_by_dump() {
        let mut backend = Backend::<I386>::new(Config::default());
        backend.consume(b"[>").unwrap();
        let err = backend.freeze().unwrap_err();
        let mut object = ElfObject::for_arch(Arch::I386);
        assert_eq!(backend.dump(&mut object).unwrap_err(), err);
    }

    #[test]
    fn clear_idiom_at_full_depth_is_too_deep() {
        let mut source = vec![b'['; MAX_NESTING];
        source.extend_from_slice(b"[-]");
        let mut backend = Backend::<X86_64>::new(Config::default());
        let err = backend.consume(&source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NestingTooDeep);
        assert_eq!(err.position, Some(MAX_NESTING));
    }

    #[test]
    #[should_panic(expected = "frozen codegen")]
    fn consume_after_freeze_panics() {
        let mut backend = Backend::<X86_64>::new(Config::default());
        backend.freeze().unwrap();
        let _ = backend.consume(b"+");
    }

    #[test]
    fn drop_freezes_pending_code() {
        let mut backend = Backend::<X86_64>::new(Config::default());
        backend.consume(b"+[-]").unwrap();
        drop(backend);
    }

    #[test]
    #[should_panic(expected = "cannot be frozen")]
    fn drop_with_an_open_loop_panics() {
        let mut backend = Backend::<X86_64>::new(Config::default());
        backend.consume(b"[").unwrap();
        drop(backend);
    }

    #[test]
    #[should_panic(expected = "tape size")]
    fn zero_tape_is_rejected() {
        Backend::<X86_64>::new(Config {
            strict: false,
            tape_size: 0,
        });
    }
}
