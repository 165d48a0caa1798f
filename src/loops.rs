use crate::label::Label;

/// Deepest `[` nesting accepted by the backends
pub const MAX_NESTING: usize = 100;

/// An open `[...]`: where it jumps back to, where it exits, and the source
/// offset of its `[` for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    pub begin: Label,
    pub end: Label,
    pub position: usize,
}

#[derive(Debug)]
pub struct LoopStack {
    frames: Vec<LoopFrame>,
}

impl Default for LoopStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStack {
    pub fn new() -> Self {
        Self {
            frames: Vec::with_capacity(MAX_NESTING),
        }
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == MAX_NESTING
    }

    /// Pushes a frame, handing it back if the stack is already at
    /// `MAX_NESTING`.
    pub fn push(&mut self, frame: LoopFrame) -> Result<(), LoopFrame> {
        if self.is_full() {
            return Err(frame);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<LoopFrame> {
        self.frames.pop()
    }

    pub fn innermost(&self) -> Option<&LoopFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
