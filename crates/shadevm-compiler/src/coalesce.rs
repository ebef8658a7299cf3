//! Temporary coalescing.
//!
//! Code generation makes a fresh temp every time it needs one; this pass
//! merges temps of equivalent type whose lifetimes do not overlap. Merging
//! is expressed through the symbol table's alias links, so the arg array
//! must be rewritten to dealiased indices afterwards.

use shadevm_core::{SymIndex, SymKind, Symbol, SymbolTable, equivalent};

fn coalescable(s: &Symbol) -> bool {
    s.kind == SymKind::Temp
        && s.everused()
        && !s.is_aliased()
        && !s.typespec.is_structure()
        && s.fieldid < 0
}

/// Greedily merge later temporaries into earlier ones until no more pairs
/// qualify. Temps were created in first-use order, so for any merged pair
/// the later one is the earliest-starting temp that fits. O(n²) per
/// sweep, repeated to a fixpoint.
pub fn coalesce_temporaries(symtab: &mut SymbolTable) {
    let n = symtab.len() as u32;
    let mut ncoalesced = 1;
    while ncoalesced > 0 {
        ncoalesced = 0;
        for si in 0..n {
            let s = SymIndex(si);
            if !coalescable(&symtab[s]) {
                continue;
            }
            let mut sfirst = symtab[s].firstuse();
            let mut slast = symtab[s].lastuse();

            for ti in si + 1..n {
                let t = SymIndex(ti);
                let tsym = &symtab[t];
                if !(coalescable(tsym)
                    && equivalent(&symtab[s].typespec, &tsym.typespec)
                    && (slast < tsym.firstuse() || sfirst > tsym.lastuse()))
                {
                    continue;
                }
                let (fr, lr, fw, lw) = (
                    tsym.firstread,
                    tsym.lastread,
                    tsym.firstwrite,
                    tsym.lastwrite,
                );
                // All future references to t resolve to s; s takes the
                // union of the lifetimes and t is marked unused.
                symtab.alias(t, s);
                symtab[s].union_rw(fr, lr, fw, lw);
                sfirst = symtab[s].firstuse();
                slast = symtab[s].lastuse();
                symtab[t].clear_rw();
                ncoalesced += 1;
            }
        }
    }
}
