//! Variable lifetime analysis.
//!
//! One walk over the ops records, per symbol, the first/last instruction
//! that reads and writes it. Symbols whose values must survive loop
//! iterations (written before or inside a loop, referenced inside or after
//! it) get their interval widened to the whole loop body. A Temp or Local
//! whose entire life sits inside one basic block and which is strictly
//! written before it is read is a true loop-local and keeps its narrow
//! interval.

use shadevm_core::{OpKind, Opcode, SymIndex, SymKind, SymbolTable};

/// Assign a basic-block id to every instruction. Jump targets start new
/// blocks, as do the instructions following any op that jumps, and the
/// first op of each method.
pub fn find_basic_blocks(ops: &[Opcode]) -> Vec<i32> {
    let mut block_begin = vec![false; ops.len() + 1];
    if !ops.is_empty() {
        block_begin[0] = true;
    }
    for (opnum, op) in ops.iter().enumerate() {
        if op.has_jumps() {
            for j in 0..Opcode::MAX_JUMPS {
                let target = op.jump(j);
                if target >= 0 {
                    block_begin[target as usize] = true;
                }
            }
            block_begin[opnum + 1] = true;
        }
        if opnum + 1 < ops.len() && ops[opnum + 1].method != op.method {
            block_begin[opnum + 1] = true;
        }
    }
    let mut ids = Vec::with_capacity(ops.len());
    let mut id = -1;
    for begin in block_begin.iter().take(ops.len()) {
        if *begin {
            id += 1;
        }
        ids.push(id);
    }
    ids
}

/// Recompute every symbol's read/write intervals from scratch.
///
/// `bblockids` (from [`find_basic_blocks`]) enables the loop-local
/// exemption; passing `None` widens conservatively.
pub fn track_variable_lifetimes(
    ops: &[Opcode],
    args: &[SymIndex],
    symtab: &mut SymbolTable,
    bblockids: Option<&[i32]>,
) {
    for sym in symtab.iter_mut() {
        sym.clear_rw();
    }

    // Stack of enclosing loops as (condition begin, inclusive body end)
    // instruction numbers. The range covers condition, body, and
    // iteration code but not the loop's initialization ops.
    let mut loop_bounds: Vec<(i32, i32)> = Vec::new();

    for (opnum, op) in ops.iter().enumerate() {
        let opnum = opnum as i32;

        if op.kind.is_some_and(OpKind::is_loop) {
            // The control variable stays live for the whole loop.
            assert_eq!(op.nargs, 1, "loop ops take exactly one argument");
            let control = symtab.dealias(args[op.firstarg]);
            let loopcond = op.jump(0);
            let loopend = op.farthest_jump() - 1;
            symtab[control].mark_rw(opnum + 1, true, true);
            symtab[control].mark_rw(loopend, true, true);
            loop_bounds.push((loopcond, loopend));
        }

        for a in 0..op.nargs {
            let s = symtab.dealias(args[op.firstarg + a]);
            let readhere = op.argread(a);
            let writtenhere = op.argwrite(a);
            symtab[s].mark_rw(opnum, readhere, writtenhere);

            // Symbols referenced inside a loop whose value predates the
            // current iteration must stay live across the whole loop.
            for &(loopcond, loopend) in &loop_bounds {
                let sym = &symtab[s];
                if let Some(ids) = bblockids
                    && matches!(sym.kind, SymKind::Local | SymKind::Temp)
                    && ids[sym.firstuse() as usize] == ids[sym.lastuse() as usize]
                    && (sym.firstread < 0 || sym.lastwrite < sym.firstread)
                {
                    continue;
                }
                if sym.firstwrite <= loopend {
                    let sym = &mut symtab[s];
                    sym.mark_rw(loopcond, readhere, writtenhere);
                    sym.mark_rw(loopend, readhere, writtenhere);
                }
            }
        }

        // Pop the loops we've just walked out of.
        while loop_bounds.last().is_some_and(|&(_, end)| end < opnum + 1) {
            loop_bounds.pop();
        }
    }
}
