//! Constant pool with value-based deduplication.
//!
//! Every literal the builder sees becomes a Const symbol; the pool keys
//! them by (type, value) so repeated literals share one symbol. Float
//! values are keyed through `OrderedFloat` so NaN payloads and signed
//! zeros hash consistently.

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use shadevm_core::{Interner, Istr, SymIndex, SymKind, Symbol, SymbolTable, TypeDesc, TypeSpec};

#[derive(Debug, PartialEq, Eq, Hash)]
struct ConstKey {
    ty: TypeDesc,
    fvals: Vec<OrderedFloat<f32>>,
    ivals: Vec<i32>,
    svals: Vec<Istr>,
}

/// Deduplicating store of Const symbols.
#[derive(Debug, Default)]
pub struct ConstantPool {
    lookup: FxHashMap<ConstKey, SymIndex>,
    next_id: u32,
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool::default()
    }

    fn lookup_or_add(
        &mut self,
        symtab: &mut SymbolTable,
        interner: &mut Interner,
        key: ConstKey,
    ) -> SymIndex {
        if let Some(&idx) = self.lookup.get(&key) {
            return idx;
        }
        let name = interner.intern(&format!("$const{}", self.next_id));
        self.next_id += 1;
        let mut sym = Symbol::new(name, TypeSpec::simple(key.ty), SymKind::Const);
        sym.fvals = key.fvals.iter().map(|f| f.into_inner()).collect();
        sym.ivals = key.ivals.clone();
        sym.svals = key.svals.clone();
        let idx = symtab.push(sym);
        self.lookup.insert(key, idx);
        idx
    }

    pub fn float(
        &mut self,
        symtab: &mut SymbolTable,
        interner: &mut Interner,
        value: f32,
    ) -> SymIndex {
        self.floats(symtab, interner, TypeDesc::FLOAT, &[value])
    }

    /// A float-based constant of the given shape (float, triple, matrix,
    /// or array thereof).
    pub fn floats(
        &mut self,
        symtab: &mut SymbolTable,
        interner: &mut Interner,
        ty: TypeDesc,
        values: &[f32],
    ) -> SymIndex {
        assert_eq!(values.len(), ty.size(), "constant value count mismatch");
        let key = ConstKey {
            ty,
            fvals: values.iter().map(|&f| OrderedFloat(f)).collect(),
            ivals: Vec::new(),
            svals: Vec::new(),
        };
        self.lookup_or_add(symtab, interner, key)
    }

    pub fn int(
        &mut self,
        symtab: &mut SymbolTable,
        interner: &mut Interner,
        value: i32,
    ) -> SymIndex {
        let key = ConstKey {
            ty: TypeDesc::INT,
            fvals: Vec::new(),
            ivals: vec![value],
            svals: Vec::new(),
        };
        self.lookup_or_add(symtab, interner, key)
    }

    pub fn string(
        &mut self,
        symtab: &mut SymbolTable,
        interner: &mut Interner,
        value: &str,
    ) -> SymIndex {
        let istr = interner.intern(value);
        let key = ConstKey {
            ty: TypeDesc::STRING,
            fvals: Vec::new(),
            ivals: Vec::new(),
            svals: vec![istr],
        };
        self.lookup_or_add(symtab, interner, key)
    }
}
