//! Growable code buffer. Instructions are recorded, not patched in place:
//! raw encodings live in one byte vector, while jumps to labels and label
//! bindings are kept as records until `link` lays everything out.

use std::fmt::{self, Write};
use std::ops::Range;

use crate::label::Label;

pub mod x86;

use x86::{Cond, JCC_NEAR_LEN};

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Inst {
    /// Already encoded bytes
    Raw(Range<usize>),
    /// Near conditional jump to a label
    Jump(Cond, Label),
    /// The label's position is the next byte
    Bind(Label),
}

/// Result of linking: the encoded function and where each label landed
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Linked {
    pub code: Vec<u8>,
    label_offsets: Vec<Option<usize>>,
}

impl Linked {
    pub fn offset(&self, label: Label) -> Option<usize> {
        self.label_offsets.get(label.index()).copied().flatten()
    }
}

#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    insts: Vec<Inst>,
    /// Start of the raw bytes not yet covered by a record
    raw_start: usize,
    label_capacity: usize,
}

impl CodeBuffer {
    pub fn new(label_capacity: usize) -> Self {
        Self {
            label_capacity,
            ..Self::default()
        }
    }

    /// Byte sink for the encoder; whatever is appended becomes raw code
    pub fn code(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    pub fn jump(&mut self, cond: Cond, target: Label) {
        self.seal();
        self.insts.push(Inst::Jump(cond, target));
    }

    pub fn bind(&mut self, label: Label) {
        self.seal();
        self.insts.push(Inst::Bind(label));
    }

    /// Called when the label table grows, so resolution has room for every id
    pub fn grow_labels(&mut self, capacity: usize) {
        self.label_capacity = self.label_capacity.max(capacity);
    }

    /// Records sealed so far; raw bytes emitted since the last jump or
    /// binding are only recorded once the buffer is sealed again
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    fn seal(&mut self) {
        if self.bytes.len() > self.raw_start {
            self.insts.push(Inst::Raw(self.raw_start..self.bytes.len()));
            self.raw_start = self.bytes.len();
        }
    }

    fn len_of(&self, inst: &Inst) -> usize {
        match inst {
            Inst::Raw(range) => range.len(),
            Inst::Jump(..) => JCC_NEAR_LEN,
            Inst::Bind(_) => 0,
        }
    }

    /// Resolves every label and serializes the records. Panics on a jump to
    /// a label that was never bound; the backends always bind what they
    /// reference, so that would be a codegen bug.
    pub fn link(&mut self) -> Linked {
        self.seal();

        let mut label_offsets = vec![None; self.label_capacity];
        let mut size = 0;
        for inst in &self.insts {
            if let Inst::Bind(label) = inst {
                if label.index() >= label_offsets.len() {
                    label_offsets.resize(label.index() + 1, None);
                }
                label_offsets[label.index()] = Some(size);
            }
            size += self.len_of(inst);
        }

        let mut code = Vec::with_capacity(size);
        for inst in &self.insts {
            match inst {
                Inst::Raw(range) => code.extend_from_slice(&self.bytes[range.clone()]),
                Inst::Jump(cond, target) => {
                    let target = label_offsets
                        .get(target.index())
                        .copied()
                        .flatten()
                        .unwrap_or_else(|| panic!("jump to unbound label {}", target));
                    let next = code.len() + JCC_NEAR_LEN;
                    let rel = target as i64 - next as i64;
                    code.extend_from_slice(&x86::jcc_near_opcode(*cond));
                    code.extend_from_slice(&(rel as i32).to_le_bytes());
                }
                Inst::Bind(_) => (),
            }
        }
        debug_assert_eq!(code.len(), size);

        Linked {
            code,
            label_offsets,
        }
    }

    /// Human readable listing of the records, for debugging
    pub fn listing(&mut self) -> String {
        self.seal();

        let mut output = String::new();
        let mut offset = 0;
        for inst in &self.insts {
            match inst {
                Inst::Raw(range) => {
                    for chunk in self.bytes[range.clone()].chunks(8) {
                        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                        writeln!(output, "    {:06x}  {}", offset, hex.join(" ")).unwrap();
                        offset += chunk.len();
                    }
                }
                Inst::Jump(cond, target) => {
                    writeln!(output, "    {:06x}  {} {}", offset, cond.mnemonic(), target).unwrap();
                    offset += JCC_NEAR_LEN;
                }
                Inst::Bind(label) => writeln!(output, "{}:", label).unwrap(),
            }
        }
        output
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Inst::Raw(range) => write!(f, "raw {}..{}", range.start, range.end),
            Inst::Jump(cond, target) => write!(f, "{} {}", cond.mnemonic(), target),
            Inst::Bind(label) => write!(f, "{}:", label),
        }
    }
}
