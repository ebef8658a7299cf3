//! Typed heap arenas for one shading context.
//!
//! Symbol storage lives in one growable arena per element type; a bound
//! symbol holds an element offset into the arena for its base type plus a
//! per-point stride. Offsets stay valid as arenas grow, which is the whole
//! point: promotion from uniform to varying never moves data, because
//! every allocation is sized for the full batch (derivative slots
//! included) up front.

use shadevm_core::Istr;

/// Growable element arenas, one per base type. Closure references are
/// opaque `u32` ids (0 = the empty closure).
#[derive(Debug, Default)]
pub struct Heap {
    pub f: Vec<f32>,
    pub i: Vec<i32>,
    pub s: Vec<Istr>,
    pub c: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    /// Drop all allocations; offsets from before the reset are invalid.
    pub fn reset(&mut self) {
        self.f.clear();
        self.i.clear();
        self.s.clear();
        self.c.clear();
    }

    /// Allocate `n` zeroed float elements, returning the offset.
    pub fn alloc_f(&mut self, n: usize) -> usize {
        let off = self.f.len();
        self.f.resize(off + n, 0.0);
        off
    }

    pub fn alloc_i(&mut self, n: usize) -> usize {
        let off = self.i.len();
        self.i.resize(off + n, 0);
        off
    }

    pub fn alloc_s(&mut self, n: usize) -> usize {
        let off = self.s.len();
        self.s.resize(off + n, Istr::EMPTY);
        off
    }

    /// Allocate `n` closure slots, initialized to the empty closure.
    pub fn alloc_c(&mut self, n: usize) -> usize {
        let off = self.c.len();
        self.c.resize(off + n, 0);
        off
    }
}
