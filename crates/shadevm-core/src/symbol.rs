//! Symbol records and the arena symbol table.
//!
//! Symbols live in a flat, index-addressed arena ([`SymbolTable`]); an
//! alias is an index pointing at the symbol it was merged into, resolved
//! with [`SymbolTable::dealias`]. Storing indices instead of pointers makes
//! the union-find structure safe to copy wholesale (instances take a fresh
//! copy of their master's table, executions a fresh copy of the
//! instance's).

use crate::interner::{Interner, Istr};
use crate::types::{TypeDesc, TypeSpec};

/// Index of a symbol in a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymIndex(pub u32);

impl SymIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kinds of symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymKind {
    Param,
    OutputParam,
    Local,
    Temp,
    Global,
    Const,
    Function,
    Type,
}

impl SymKind {
    /// Short name used in the serialized bytecode ("param", "global", ...).
    pub fn shortname(self) -> &'static str {
        match self {
            SymKind::Param => "param",
            SymKind::OutputParam => "oparam",
            SymKind::Local => "local",
            SymKind::Temp => "temp",
            SymKind::Global => "global",
            SymKind::Const => "const",
            SymKind::Function => "func",
            SymKind::Type => "type",
        }
    }
}

/// Where a symbol's value comes from at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueSource {
    /// The shader's own default (literal or init expression).
    #[default]
    Default,
    /// Overridden by the shader instance.
    InstanceSupplied,
    /// Interpolated from per-point geometric user data.
    Geometry,
    /// Connected from an earlier layer's output.
    Connected,
}

/// Where a bound symbol's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRef {
    /// Offset (in elements) into the shading context's heap arena for the
    /// symbol's base type.
    Heap { offset: usize },
    /// Offset (in elements) into the compiled shader's constant pool.
    /// Valid before execution and never written.
    ConstPool { offset: usize },
}

/// One piece of declared symbol metadata, serialized as a `%meta` hint.
#[derive(Debug, Clone)]
pub struct SymMeta {
    pub ty: TypeDesc,
    pub name: String,
    pub value: String,
}

/// A declared name and everything the compiler and runtime know about it.
///
/// The read/write interval fields double as lifetime information for the
/// coalescing pass and as `%read`/`%write` hints in the bytecode. The
/// binding fields (`data`, `step`) are only meaningful on the fresh copy a
/// [`ShadingExecution`] takes at bind time and are discarded afterwards.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Unmangled name, unique only within its declaration scope.
    pub name: Istr,
    /// Scope id, for globally-unique mangling.
    pub scope: i32,
    pub kind: SymKind,
    pub typespec: TypeSpec,

    /// First/last instruction that reads this symbol (-1 = never).
    pub firstread: i32,
    pub lastread: i32,
    /// First/last instruction that writes this symbol (-1 = never).
    pub firstwrite: i32,
    pub lastwrite: i32,

    /// Does this symbol need derivative storage?
    pub has_derivs: bool,
    pub valuesource: ValueSource,

    /// Init-code range for parameters, `[initbegin, initend)`; equal means
    /// no init ops.
    pub initbegin: i32,
    pub initend: i32,

    /// Field number if this symbol is a field of a struct instance, else -1.
    pub fieldid: i32,
    /// The struct-instance symbol this field belongs to.
    pub mystruct: Option<SymIndex>,
    /// Field symbols, for struct-instance symbols.
    pub fields: Vec<SymIndex>,

    /// Declared metadata.
    pub meta: Vec<SymMeta>,

    /// Literal values for Const symbols and parameter defaults.
    pub fvals: Vec<f32>,
    pub ivals: Vec<i32>,
    pub svals: Vec<Istr>,

    /// Bound storage location (None until bound).
    pub data: Option<DataRef>,
    /// Per-point stride in elements: 0 = uniform, >0 = varying.
    pub step: usize,
    /// Heap or parameter-array offset decided before binding (-1 unknown).
    pub dataoffset: i32,

    alias: Option<SymIndex>,
}

impl Symbol {
    pub fn new(name: Istr, typespec: TypeSpec, kind: SymKind) -> Self {
        Symbol {
            name,
            scope: 0,
            kind,
            typespec,
            firstread: -1,
            lastread: -1,
            firstwrite: -1,
            lastwrite: -1,
            has_derivs: false,
            valuesource: ValueSource::Default,
            initbegin: 0,
            initend: 0,
            fieldid: -1,
            mystruct: None,
            fields: Vec::new(),
            meta: Vec::new(),
            fvals: Vec::new(),
            ivals: Vec::new(),
            svals: Vec::new(),
            data: None,
            step: 0,
            dataoffset: -1,
            alias: None,
        }
    }

    /// Name mangled with the scope id so it is globally unique.
    pub fn mangled(&self, interner: &Interner) -> String {
        let name = interner.resolve(self.name);
        if self.scope != 0 {
            format!("___{}_{}", self.scope, name)
        } else {
            name.to_string()
        }
    }

    pub fn is_function(&self) -> bool {
        self.kind == SymKind::Function
    }

    pub fn is_structure(&self) -> bool {
        self.kind == SymKind::Type
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, SymKind::Param | SymKind::OutputParam)
    }

    /// Record a read and/or write of this symbol at instruction `op`.
    pub fn mark_rw(&mut self, op: i32, read: bool, write: bool) {
        if read {
            if self.firstread < 0 || op < self.firstread {
                self.firstread = op;
            }
            if op > self.lastread {
                self.lastread = op;
            }
        }
        if write {
            if self.firstwrite < 0 || op < self.firstwrite {
                self.firstwrite = op;
            }
            if op > self.lastwrite {
                self.lastwrite = op;
            }
        }
    }

    /// Union another symbol's usage interval into this one.
    pub fn union_rw(&mut self, firstread: i32, lastread: i32, firstwrite: i32, lastwrite: i32) {
        if firstread >= 0 {
            self.mark_rw(firstread, true, false);
            self.mark_rw(lastread, true, false);
        }
        if firstwrite >= 0 {
            self.mark_rw(firstwrite, false, true);
            self.mark_rw(lastwrite, false, true);
        }
    }

    pub fn clear_rw(&mut self) {
        self.firstread = -1;
        self.lastread = -1;
        self.firstwrite = -1;
        self.lastwrite = -1;
    }

    /// First instruction that uses this symbol at all (-1 = never used).
    pub fn firstuse(&self) -> i32 {
        if self.firstread < 0 {
            self.firstwrite
        } else if self.firstwrite < 0 {
            self.firstread
        } else {
            self.firstread.min(self.firstwrite)
        }
    }

    /// Last instruction that uses this symbol at all (-1 = never used).
    pub fn lastuse(&self) -> i32 {
        self.lastread.max(self.lastwrite)
    }

    pub fn everused(&self) -> bool {
        self.lastuse() >= 0
    }

    /// Does this parameter's default require running init code?
    pub fn has_init_ops(&self) -> bool {
        self.initend > self.initbegin
    }

    /// Scalar elements for one point's value, without derivatives.
    pub fn size(&self) -> usize {
        self.typespec.size()
    }

    /// Elements per point including derivative slots: value, d/dx, d/dy.
    pub fn derivsize(&self) -> usize {
        if self.has_derivs {
            3 * self.size()
        } else {
            self.size()
        }
    }

    /// Stride between a value block and its d/dx block, in elements.
    pub fn deriv_step(&self) -> usize {
        self.size()
    }

    pub fn is_uniform(&self) -> bool {
        self.step == 0
    }

    pub fn is_varying(&self) -> bool {
        self.step != 0
    }

    pub fn is_aliased(&self) -> bool {
        self.alias.is_some()
    }
}

/// Flat, growable store of symbols addressed by [`SymIndex`].
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    syms: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn push(&mut self, sym: Symbol) -> SymIndex {
        let idx = SymIndex(self.syms.len() as u32);
        self.syms.push(sym);
        idx
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn get(&self, i: SymIndex) -> &Symbol {
        &self.syms[i.index()]
    }

    pub fn get_mut(&mut self, i: SymIndex) -> &mut Symbol {
        &mut self.syms[i.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.syms.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Symbol> {
        self.syms.iter_mut()
    }

    pub fn indices(&self) -> impl Iterator<Item = SymIndex> + use<> {
        (0..self.syms.len() as u32).map(SymIndex)
    }

    /// Find a symbol by (unmangled) name.
    pub fn find(&self, name: Istr) -> Option<SymIndex> {
        self.syms
            .iter()
            .position(|s| s.name == name)
            .map(|i| SymIndex(i as u32))
    }

    /// Resolve an index to the ultimate non-aliased symbol it was merged
    /// into. Chains are kept at length one by [`SymbolTable::alias`], so
    /// this is O(chain length) and idempotent.
    pub fn dealias(&self, mut i: SymIndex) -> SymIndex {
        while let Some(next) = self.syms[i.index()].alias {
            i = next;
        }
        i
    }

    /// Establish that `from` is really an alias for `to`.
    ///
    /// The stored alias target is `to`'s dealiased root (path compression
    /// at union time), which keeps chains acyclic and one hop long.
    ///
    /// # Panics
    ///
    /// Panics if the alias would point a symbol at itself, directly or
    /// through an existing chain.
    pub fn alias(&mut self, from: SymIndex, to: SymIndex) {
        assert_ne!(from, to, "circular alias");
        let root = self.dealias(to);
        assert_ne!(root, from, "circular alias through a chain");
        self.syms[from.index()].alias = Some(root);
    }
}

impl std::ops::Index<SymIndex> for SymbolTable {
    type Output = Symbol;

    fn index(&self, i: SymIndex) -> &Symbol {
        &self.syms[i.index()]
    }
}

impl std::ops::IndexMut<SymIndex> for SymbolTable {
    fn index_mut(&mut self, i: SymIndex) -> &mut Symbol {
        &mut self.syms[i.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(n: usize) -> (SymbolTable, Vec<SymIndex>) {
        let mut interner = Interner::new();
        let mut tab = SymbolTable::new();
        let idx = (0..n)
            .map(|i| {
                let name = interner.intern(&format!("$tmp{}", i));
                tab.push(Symbol::new(name, TypeSpec::float(), SymKind::Temp))
            })
            .collect();
        (tab, idx)
    }

    #[test]
    fn dealias_resolves_chain() {
        let (mut tab, s) = table_with(3);
        tab.alias(s[2], s[1]);
        tab.alias(s[1], s[0]);
        assert_eq!(tab.dealias(s[2]), s[0]);
        assert_eq!(tab.dealias(s[1]), s[0]);
        assert_eq!(tab.dealias(s[0]), s[0]);
        // Idempotent.
        assert_eq!(tab.dealias(tab.dealias(s[2])), s[0]);
    }

    #[test]
    fn alias_compresses_at_union() {
        let (mut tab, s) = table_with(3);
        tab.alias(s[1], s[0]);
        tab.alias(s[2], s[1]);
        // s2 points straight at the root, not at s1.
        assert_eq!(tab.dealias(s[2]), s[0]);
        assert!(!tab[s[0]].is_aliased());
    }

    #[test]
    #[should_panic(expected = "circular alias")]
    fn self_alias_forbidden() {
        let (mut tab, s) = table_with(1);
        tab.alias(s[0], s[0]);
    }

    #[test]
    #[should_panic(expected = "circular alias")]
    fn cycle_through_chain_forbidden() {
        let (mut tab, s) = table_with(2);
        tab.alias(s[1], s[0]);
        tab.alias(s[0], s[1]);
    }

    #[test]
    fn rw_interval_tracking() {
        let (mut tab, s) = table_with(1);
        let sym = &mut tab[s[0]];
        assert!(!sym.everused());
        sym.mark_rw(5, false, true);
        sym.mark_rw(9, true, false);
        sym.mark_rw(3, false, true);
        assert_eq!(sym.firstwrite, 3);
        assert_eq!(sym.lastwrite, 5);
        assert_eq!(sym.firstread, 9);
        assert_eq!(sym.firstuse(), 3);
        assert_eq!(sym.lastuse(), 9);
        assert!(sym.everused());
    }

    #[test]
    fn union_rw_merges_intervals() {
        let (mut tab, s) = table_with(2);
        tab[s[0]].mark_rw(2, true, true);
        tab[s[1]].mark_rw(7, true, true);
        let (fr, lr, fw, lw) = {
            let t = &tab[s[1]];
            (t.firstread, t.lastread, t.firstwrite, t.lastwrite)
        };
        tab[s[0]].union_rw(fr, lr, fw, lw);
        assert_eq!(tab[s[0]].firstuse(), 2);
        assert_eq!(tab[s[0]].lastuse(), 7);
    }

    #[test]
    fn mangled_names() {
        let mut interner = Interner::new();
        let name = interner.intern("x");
        let mut sym = Symbol::new(name, TypeSpec::float(), SymKind::Local);
        assert_eq!(sym.mangled(&interner), "x");
        sym.scope = 42;
        assert_eq!(sym.mangled(&interner), "___42_x");
    }

    #[test]
    fn derivsize_triples() {
        let mut interner = Interner::new();
        let name = interner.intern("c");
        let mut sym = Symbol::new(
            name,
            TypeSpec::simple(TypeDesc::COLOR),
            SymKind::Local,
        );
        assert_eq!(sym.size(), 3);
        assert_eq!(sym.derivsize(), 3);
        sym.has_derivs = true;
        assert_eq!(sym.derivsize(), 9);
        assert_eq!(sym.deriv_step(), 3);
    }
}
