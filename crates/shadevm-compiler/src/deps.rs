//! Conservative symbol dependency analysis and derivative marking.
//!
//! Every op makes its written arguments depend on every non-constant
//! argument it reads. The analysis is flow-insensitive, so a temp holding
//! `a` then `b` makes readers of either depend on both. That
//! over-approximation never misses a dependency, and it is why this pass
//! must run before temporaries are coalesced: coalescing reassigns temps
//! in exactly the way that would confuse it.
//!
//! A pseudo-symbol stands for "things derivatives are taken of"; the
//! transitive closure of its dependencies is the set of symbols that need
//! derivative storage.

use rustc_hash::{FxHashMap, FxHashSet};
use shadevm_core::{Opcode, SymIndex, SymKind, SymbolTable};

/// Dependency key: a real symbol, or the derivative pseudo-symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DepNode {
    Sym(SymIndex),
    Derivs,
}

type DepMap = FxHashMap<DepNode, FxHashSet<DepNode>>;

fn add_dependency(dmap: &mut DepMap, a: DepNode, b: DepNode) {
    dmap.entry(a).or_default().insert(b);
}

fn mark_symbol_derivatives(
    dmap: &DepMap,
    visited: &mut FxHashSet<DepNode>,
    symtab: &mut SymbolTable,
    node: DepNode,
) {
    let Some(deps) = dmap.get(&node) else {
        return;
    };
    for &d in deps {
        if visited.insert(d) {
            if let DepNode::Sym(i) = d {
                // Only float-based values can carry derivatives.
                if symtab[i].typespec.is_floatbased() {
                    symtab[i].has_derivs = true;
                }
            }
            mark_symbol_derivatives(dmap, visited, symtab, d);
        }
    }
}

/// Build the dependency map and set `has_derivs` on every symbol that any
/// derivative-taking argument transitively depends on.
pub fn track_variable_dependencies(ops: &[Opcode], args: &[SymIndex], symtab: &mut SymbolTable) {
    let mut dmap = DepMap::default();
    let mut read: Vec<SymIndex> = Vec::new();
    let mut written: Vec<SymIndex> = Vec::new();

    for op in ops {
        read.clear();
        written.clear();
        for a in 0..op.nargs {
            let s = symtab.dealias(args[op.firstarg + a]);
            if op.argread(a) && !read.contains(&s) {
                read.push(s);
            }
            if op.argwrite(a) && !written.contains(&s) {
                written.push(s);
            }
        }

        for &wsym in &written {
            for &rsym in &read {
                if symtab[rsym].kind != SymKind::Const {
                    add_dependency(&mut dmap, DepNode::Sym(wsym), DepNode::Sym(rsym));
                }
            }
        }
        if op.takes_derivs() {
            for a in 0..op.nargs {
                if op.argtakesderivs(a) {
                    let s = symtab.dealias(args[op.firstarg + a]);
                    add_dependency(&mut dmap, DepNode::Derivs, DepNode::Sym(s));
                }
            }
        }
    }

    let mut visited = FxHashSet::default();
    mark_symbol_derivatives(&dmap, &mut visited, symtab, DepNode::Derivs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadevm_core::{Interner, OpKind, Symbol, TypeSpec};

    struct Ir {
        interner: Interner,
        symtab: SymbolTable,
        ops: Vec<Opcode>,
        args: Vec<SymIndex>,
    }

    impl Ir {
        fn new() -> Self {
            Ir {
                interner: Interner::new(),
                symtab: SymbolTable::new(),
                ops: Vec::new(),
                args: Vec::new(),
            }
        }

        fn sym(&mut self, name: &str, ty: TypeSpec, kind: SymKind) -> SymIndex {
            let name = self.interner.intern(name);
            self.symtab.push(Symbol::new(name, ty, kind))
        }

        fn emit(&mut self, opname: &str, opargs: &[SymIndex], rw: &str) -> usize {
            let opname = self.interner.intern(opname);
            let method = self.interner.intern("___main___");
            let firstarg = self.args.len();
            self.args.extend_from_slice(opargs);
            let mut op = Opcode::new(opname, method, firstarg, opargs.len());
            op.kind = OpKind::from_name(self.interner.resolve(op.opname));
            op.set_argrw(rw);
            self.ops.push(op);
            self.ops.len() - 1
        }
    }

    #[test]
    fn derivs_propagate_through_chains() {
        // t = a; x = t; derivative taken of x. Both t and a need derivs.
        let mut ir = Ir::new();
        let a = ir.sym("a", TypeSpec::float(), SymKind::Param);
        let t = ir.sym("$tmp0", TypeSpec::float(), SymKind::Temp);
        let x = ir.sym("x", TypeSpec::float(), SymKind::Local);
        let b = ir.sym("b", TypeSpec::float(), SymKind::Param);
        ir.emit("assign", &[t, a], "wr");
        ir.emit("assign", &[x, t], "wr");
        let d = ir.emit("assign", &[b, x], "wr");
        ir.ops[d].mark_argderivs(1);
        track_variable_dependencies(&ir.ops, &ir.args, &mut ir.symtab);
        assert!(ir.symtab[x].has_derivs);
        assert!(ir.symtab[t].has_derivs);
        assert!(ir.symtab[a].has_derivs);
        assert!(!ir.symtab[b].has_derivs);
    }

    #[test]
    fn conservative_over_approximation() {
        // t = a; x = t; t = b; y = t. The flow-insensitive map says y
        // depends on a too; derivatives of y therefore taint both inputs.
        let mut ir = Ir::new();
        let a = ir.sym("a", TypeSpec::float(), SymKind::Param);
        let b = ir.sym("b", TypeSpec::float(), SymKind::Param);
        let t = ir.sym("$tmp0", TypeSpec::float(), SymKind::Temp);
        let x = ir.sym("x", TypeSpec::float(), SymKind::Local);
        let y = ir.sym("y", TypeSpec::float(), SymKind::Local);
        let o = ir.sym("o", TypeSpec::float(), SymKind::OutputParam);
        ir.emit("assign", &[t, a], "wr");
        ir.emit("assign", &[x, t], "wr");
        ir.emit("assign", &[t, b], "wr");
        ir.emit("assign", &[y, t], "wr");
        let d = ir.emit("assign", &[o, y], "wr");
        ir.ops[d].mark_argderivs(1);
        track_variable_dependencies(&ir.ops, &ir.args, &mut ir.symtab);
        assert!(ir.symtab[y].has_derivs);
        assert!(ir.symtab[a].has_derivs);
        assert!(ir.symtab[b].has_derivs);
        assert!(!ir.symtab[x].has_derivs);
    }

    #[test]
    fn constants_never_get_derivs() {
        let mut ir = Ir::new();
        let c = ir.sym("$const0", TypeSpec::float(), SymKind::Const);
        let x = ir.sym("x", TypeSpec::float(), SymKind::Local);
        let o = ir.sym("o", TypeSpec::float(), SymKind::OutputParam);
        ir.emit("assign", &[x, c], "wr");
        let d = ir.emit("assign", &[o, x], "wr");
        ir.ops[d].mark_argderivs(1);
        track_variable_dependencies(&ir.ops, &ir.args, &mut ir.symtab);
        assert!(ir.symtab[x].has_derivs);
        assert!(!ir.symtab[c].has_derivs);
    }

    #[test]
    fn non_float_symbols_skip_deriv_storage() {
        let mut ir = Ir::new();
        let i = ir.sym("i", TypeSpec::int(), SymKind::Local);
        let x = ir.sym("x", TypeSpec::float(), SymKind::Local);
        let d = ir.emit("assign", &[x, i], "wr");
        ir.ops[d].mark_argderivs(1);
        track_variable_dependencies(&ir.ops, &ir.args, &mut ir.symtab);
        assert!(!ir.symtab[i].has_derivs);
    }

    #[test]
    fn no_deriv_requests_marks_nothing() {
        let mut ir = Ir::new();
        let a = ir.sym("a", TypeSpec::float(), SymKind::Param);
        let x = ir.sym("x", TypeSpec::float(), SymKind::Local);
        ir.emit("assign", &[x, a], "wr");
        track_variable_dependencies(&ir.ops, &ir.args, &mut ir.symtab);
        assert!(ir.symtab.iter().all(|s| !s.has_derivs));
    }
}
