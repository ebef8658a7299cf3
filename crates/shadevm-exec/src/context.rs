//! Per-thread shading scratch space.
//!
//! A [`ShadingContext`] owns the typed heap, the staged globals for the
//! current batch, the runtime string interner, the diagnostics sink, and
//! the renderer services handle. One context is owned by exactly one
//! worker at a time; parallelism comes from independent contexts, never
//! from sharing one.
//!
//! Strings written to the heap are always interned in the context's own
//! interner, so string values flow between layers compiled by different
//! sessions without handle confusion.

use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use shadevm_core::{Diagnostics, Interner, Istr};

use crate::globals::ShaderGlobals;
use crate::heap::Heap;
use crate::services::{NullRenderer, RendererServices};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Heap placement of a global allocated on demand (one without
/// renderer-supplied storage, like Ci). Registered by name so later
/// layers binding the same global share the slot.
#[derive(Debug, Clone, Copy)]
pub struct GlobalSlot {
    pub offset: usize,
    pub step: usize,
    pub has_derivs: bool,
}

pub struct ShadingContext {
    id: u64,
    generation: u64,
    npoints: usize,
    pub heap: Heap,
    pub interner: Interner,
    pub diagnostics: Diagnostics,
    globals: Option<ShaderGlobals>,
    global_slots: FxHashMap<String, GlobalSlot>,
    renderer: Box<dyn RendererServices>,
}

impl ShadingContext {
    pub fn new() -> Self {
        Self::with_renderer(Box::new(NullRenderer))
    }

    pub fn with_renderer(renderer: Box<dyn RendererServices>) -> Self {
        ShadingContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            npoints: 0,
            heap: Heap::new(),
            interner: Interner::new(),
            diagnostics: Diagnostics::new(),
            globals: None,
            global_slots: FxHashMap::default(),
            renderer,
        }
    }

    /// Identity for the rebind fast path; unique per context.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bumped on every [`reset`](Self::reset); heap offsets handed out
    /// under an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// Start a new point batch: reclaim the heap and the on-demand global
    /// registry, drop the previous batch's staged globals.
    pub fn reset(&mut self, npoints: usize) {
        self.generation += 1;
        self.npoints = npoints;
        self.heap.reset();
        self.global_slots.clear();
        self.globals = None;
    }

    pub fn set_globals(&mut self, globals: ShaderGlobals) {
        assert_eq!(
            globals.npoints(),
            self.npoints,
            "staged globals must match the batch point count"
        );
        self.globals = Some(globals);
    }

    pub fn globals(&self) -> Option<&ShaderGlobals> {
        self.globals.as_ref()
    }

    pub fn renderer(&self) -> &dyn RendererServices {
        self.renderer.as_ref()
    }

    /// Renderer handle and diagnostics sink together, for call sites that
    /// must record a warning about a failed lookup.
    pub fn renderer_and_diags(&mut self) -> (&dyn RendererServices, &mut Diagnostics) {
        (self.renderer.as_ref(), &mut self.diagnostics)
    }

    pub fn global_slot(&self, name: &str) -> Option<GlobalSlot> {
        self.global_slots.get(name).copied()
    }

    pub fn register_global_slot(&mut self, name: &str, slot: GlobalSlot) {
        self.global_slots.insert(name.to_string(), slot);
    }

    /// Intern a runtime string into the context's own table.
    pub fn intern(&mut self, s: &str) -> Istr {
        self.interner.intern(s)
    }
}

impl Default for ShadingContext {
    fn default() -> Self {
        Self::new()
    }
}
