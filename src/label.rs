use std::fmt;

use log::trace;

/// Number of local labels the table is sized for before the first loop.
const INITIAL_LOCAL_CAPACITY: usize = 2;

/// A position in the code buffer, resolved to a byte offset when the
/// buffer is linked.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Allocates label ids. Exported labels occupy the first ids and are
/// fixed at construction; local labels are handed out in (begin, end)
/// pairs and never reused, so ids already referenced by jumps stay valid
/// as the table grows.
#[derive(Debug)]
pub struct LabelTable {
    exported: Vec<&'static str>,
    next: usize,
    capacity: usize,
}

impl LabelTable {
    pub fn new(exported: &[&'static str]) -> Self {
        let capacity = exported.len() + INITIAL_LOCAL_CAPACITY;
        Self {
            exported: exported.to_vec(),
            next: exported.len(),
            capacity,
        }
    }

    /// Label of the `n`th exported symbol
    pub fn exported(&self, n: usize) -> Label {
        assert!(n < self.exported.len(), "no exported label {}", n);
        Label(n as u32)
    }

    pub fn exported_labels(&self) -> impl Iterator<Item = (&'static str, Label)> + '_ {
        self.exported
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, Label(i as u32)))
    }

    /// Allocates the labels for one loop. Returns the new capacity if the
    /// table had to grow, so the caller can size its bookkeeping to match.
    pub fn alloc_pair(&mut self) -> ((Label, Label), Option<usize>) {
        let mut grown = None;
        if self.next + 2 > self.capacity {
            self.capacity *= 2;
            trace!("label table grown to {} entries", self.capacity);
            grown = Some(self.capacity);
        }
        let begin = Label(self.next as u32);
        let end = Label(self.next as u32 + 1);
        self.next += 2;
        ((begin, end), grown)
    }

    /// Total number of labels handed out, exported ones included
    pub fn len(&self) -> usize {
        self.next
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
