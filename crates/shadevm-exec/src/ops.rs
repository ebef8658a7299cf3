//! Opcode implementations.
//!
//! Every op runs over the active point span of the current run state,
//! skipping points whose flag is off, and fixes the destination's
//! uniformity before writing. Scalar operands broadcast against aggregate
//! destinations, and destinations that carry derivatives get them
//! propagated by the chain rules (sum, product, quotient).

use shadevm_compiler::CompiledShader;
use shadevm_core::{
    BaseType, DataRef, Istr, OpKind, RUNFLAG_OFF, Runflag, SymIndex, VecSemantics, assignable,
};

use crate::context::ShadingContext;
use crate::exec::ShadingExecution;
use crate::services::{Matrix44, matrix_or_identity};

pub(crate) fn execute(
    ex: &mut ShadingExecution,
    ctx: &mut ShadingContext,
    master: &CompiledShader,
    opnum: usize,
    kind: OpKind,
) {
    let op = &master.ops[opnum];
    let args = master.op_args(op);
    match kind {
        OpKind::Assign => assign(ex, ctx, args[0], args[1]),
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
            binary_arith(ex, ctx, kind, args[0], args[1], args[2])
        }
        OpKind::Neg => neg(ex, ctx, args[0], args[1]),
        OpKind::Eq | OpKind::Neq | OpKind::Lt | OpKind::Le | OpKind::Gt | OpKind::Ge => {
            compare(ex, ctx, kind, args[0], args[1], args[2])
        }
        OpKind::Transform => transform(ex, ctx, args[0], args[1], args[2]),
        OpKind::Nop
        | OpKind::End
        | OpKind::If
        | OpKind::For
        | OpKind::While
        | OpKind::DoWhile => {
            unreachable!("control ops are interpreted by the execution loop")
        }
    }
}

/// Point span to compute over, plus a flag snapshot. A destination that
/// stayed uniform after the varying adjustment has all-uniform operands,
/// so it takes exactly one evaluation; iterating the batch would apply
/// self-referencing ops (`o = o + u`) once per point.
fn active(ex: &ShadingExecution, dst: SymIndex) -> (usize, usize, Vec<Runflag>) {
    let rs = ex.runstate();
    if ex.symbols[dst].is_uniform() && rs.beginpoint < rs.endpoint {
        (rs.beginpoint, rs.beginpoint + 1, rs.flags.clone())
    } else {
        (rs.beginpoint, rs.endpoint, rs.flags.clone())
    }
}

/// Element index of `src` feeding destination element `e`, broadcasting
/// scalars against aggregates.
fn bcast(src_size: usize, e: usize) -> usize {
    if src_size == 1 { 0 } else { e }
}

fn closure_at(ex: &ShadingExecution, ctx: &ShadingContext, s: SymIndex, point: usize) -> u32 {
    let sym = &ex.symbols[s];
    match sym.data.expect("read from a symbol with no storage") {
        DataRef::Heap { offset } => ctx.heap.c[offset + point * sym.step],
        DataRef::ConstPool { .. } => panic!("closures are never constants"),
    }
}

fn write_closure(ex: &ShadingExecution, ctx: &mut ShadingContext, s: SymIndex, point: usize, v: u32) {
    let sym = &ex.symbols[s];
    let Some(DataRef::Heap { offset }) = sym.data else {
        panic!("write to a symbol without heap storage")
    };
    ctx.heap.c[offset + point * sym.step] = v;
}

fn assign(ex: &mut ShadingExecution, ctx: &mut ShadingContext, dst: SymIndex, src: SymIndex) {
    let src_varying = ex.symbols[src].is_varying();
    ex.adjust_varying(&mut ctx.heap, dst, src_varying, false);
    let (begin, end, flags) = active(ex, dst);

    let dst_ts = ex.symbols[dst].typespec;
    let src_ts = ex.symbols[src].typespec;
    assert!(
        assignable(&dst_ts, &src_ts),
        "cannot assign {} from {}",
        dst_ts,
        src_ts
    );

    if dst_ts.is_closure() {
        for p in begin..end {
            if flags[p] == RUNFLAG_OFF {
                continue;
            }
            let v = closure_at(ex, ctx, src, p);
            write_closure(ex, ctx, dst, p, v);
        }
        return;
    }

    let dst_size = ex.symbols[dst].size();
    let src_size = ex.symbols[src].size();
    let dst_derivs = ex.symbols[dst].has_derivs;
    let src_derivs = ex.symbols[src].has_derivs;
    match dst_ts.simpletype().basetype {
        BaseType::Float => {
            for p in begin..end {
                if flags[p] == RUNFLAG_OFF {
                    continue;
                }
                if dst_derivs && !src_derivs {
                    ex.zero_derivs(&mut ctx.heap, dst, p);
                }
                for e in 0..dst_size {
                    let se = bcast(src_size, e);
                    let v = ex.scalar_at(&ctx.heap, src, p, se, 0);
                    ex.write_float(&mut ctx.heap, dst, p, e, 0, v);
                    if dst_derivs && src_derivs {
                        for d in 1..=2 {
                            let dv = ex.scalar_at(&ctx.heap, src, p, se, d);
                            ex.write_float(&mut ctx.heap, dst, p, e, d, dv);
                        }
                    }
                }
            }
        }
        BaseType::Int => {
            for p in begin..end {
                if flags[p] == RUNFLAG_OFF {
                    continue;
                }
                for e in 0..dst_size {
                    let v = ex.int_at(&ctx.heap, src, p, bcast(src_size, e));
                    ex.write_int(&mut ctx.heap, dst, p, e, v);
                }
            }
        }
        BaseType::String => {
            for p in begin..end {
                if flags[p] == RUNFLAG_OFF {
                    continue;
                }
                for e in 0..dst_size {
                    let v = ex.string_at(ctx, src, p, bcast(src_size, e));
                    ex.write_string(&mut ctx.heap, dst, p, e, v);
                }
            }
        }
        BaseType::None => panic!("assignment to a valueless symbol"),
    }
}

fn binary_arith(
    ex: &mut ShadingExecution,
    ctx: &mut ShadingContext,
    kind: OpKind,
    dst: SymIndex,
    a: SymIndex,
    b: SymIndex,
) {
    let varying = ex.symbols[a].is_varying() || ex.symbols[b].is_varying();
    ex.adjust_varying(&mut ctx.heap, dst, varying, false);
    let (begin, end, flags) = active(ex, dst);

    let dst_size = ex.symbols[dst].size();
    let a_size = ex.symbols[a].size();
    let b_size = ex.symbols[b].size();
    let dst_derivs = ex.symbols[dst].has_derivs;

    if ex.symbols[dst].typespec.is_int() {
        for p in begin..end {
            if flags[p] == RUNFLAG_OFF {
                continue;
            }
            let av = ex.int_at(&ctx.heap, a, p, 0);
            let bv = ex.int_at(&ctx.heap, b, p, 0);
            let v = match kind {
                OpKind::Add => av.wrapping_add(bv),
                OpKind::Sub => av.wrapping_sub(bv),
                OpKind::Mul => av.wrapping_mul(bv),
                // Integer division by zero yields zero rather than a fault.
                OpKind::Div => {
                    if bv == 0 {
                        0
                    } else {
                        av.wrapping_div(bv)
                    }
                }
                _ => unreachable!(),
            };
            ex.write_int(&mut ctx.heap, dst, p, 0, v);
        }
        return;
    }

    for p in begin..end {
        if flags[p] == RUNFLAG_OFF {
            continue;
        }
        for e in 0..dst_size {
            let ae = bcast(a_size, e);
            let be = bcast(b_size, e);
            let av = ex.scalar_at(&ctx.heap, a, p, ae, 0);
            let bv = ex.scalar_at(&ctx.heap, b, p, be, 0);
            let v = match kind {
                OpKind::Add => av + bv,
                OpKind::Sub => av - bv,
                OpKind::Mul => av * bv,
                OpKind::Div => {
                    if bv == 0.0 {
                        0.0
                    } else {
                        av / bv
                    }
                }
                _ => unreachable!(),
            };
            ex.write_float(&mut ctx.heap, dst, p, e, 0, v);
            if dst_derivs {
                for d in 1..=2 {
                    let ad = ex.scalar_at(&ctx.heap, a, p, ae, d);
                    let bd = ex.scalar_at(&ctx.heap, b, p, be, d);
                    let dv = match kind {
                        OpKind::Add => ad + bd,
                        OpKind::Sub => ad - bd,
                        OpKind::Mul => ad * bv + av * bd,
                        OpKind::Div => {
                            if bv == 0.0 {
                                0.0
                            } else {
                                (ad * bv - av * bd) / (bv * bv)
                            }
                        }
                        _ => unreachable!(),
                    };
                    ex.write_float(&mut ctx.heap, dst, p, e, d, dv);
                }
            }
        }
    }
}

fn neg(ex: &mut ShadingExecution, ctx: &mut ShadingContext, dst: SymIndex, src: SymIndex) {
    let varying = ex.symbols[src].is_varying();
    ex.adjust_varying(&mut ctx.heap, dst, varying, false);
    let (begin, end, flags) = active(ex, dst);
    let dst_size = ex.symbols[dst].size();
    let src_size = ex.symbols[src].size();
    let dst_derivs = ex.symbols[dst].has_derivs;

    if ex.symbols[dst].typespec.is_int() {
        for p in begin..end {
            if flags[p] == RUNFLAG_OFF {
                continue;
            }
            let v = ex.int_at(&ctx.heap, src, p, 0);
            ex.write_int(&mut ctx.heap, dst, p, 0, v.wrapping_neg());
        }
        return;
    }

    for p in begin..end {
        if flags[p] == RUNFLAG_OFF {
            continue;
        }
        for e in 0..dst_size {
            let se = bcast(src_size, e);
            let v = ex.scalar_at(&ctx.heap, src, p, se, 0);
            ex.write_float(&mut ctx.heap, dst, p, e, 0, -v);
            if dst_derivs {
                for d in 1..=2 {
                    let dv = ex.scalar_at(&ctx.heap, src, p, se, d);
                    ex.write_float(&mut ctx.heap, dst, p, e, d, -dv);
                }
            }
        }
    }
}

fn compare(
    ex: &mut ShadingExecution,
    ctx: &mut ShadingContext,
    kind: OpKind,
    dst: SymIndex,
    a: SymIndex,
    b: SymIndex,
) {
    let varying = ex.symbols[a].is_varying() || ex.symbols[b].is_varying();
    ex.adjust_varying(&mut ctx.heap, dst, varying, false);
    let (begin, end, flags) = active(ex, dst);

    let a_str = ex.symbols[a].typespec.is_string();
    let b_str = ex.symbols[b].typespec.is_string();
    if a_str || b_str {
        assert!(a_str && b_str, "string comparison needs two strings");
        assert!(
            matches!(kind, OpKind::Eq | OpKind::Neq),
            "strings compare only for equality"
        );
        for p in begin..end {
            if flags[p] == RUNFLAG_OFF {
                continue;
            }
            // Both handles come from the context interner, so identity is
            // value equality.
            let av = ex.string_at(ctx, a, p, 0);
            let bv = ex.string_at(ctx, b, p, 0);
            let r = if kind == OpKind::Eq { av == bv } else { av != bv };
            ex.write_int(&mut ctx.heap, dst, p, 0, r as i32);
        }
        return;
    }

    let n = ex.symbols[a].size().max(ex.symbols[b].size());
    let a_size = ex.symbols[a].size();
    let b_size = ex.symbols[b].size();
    for p in begin..end {
        if flags[p] == RUNFLAG_OFF {
            continue;
        }
        let r = match kind {
            OpKind::Eq | OpKind::Neq => {
                let mut all_eq = true;
                for e in 0..n {
                    let av = ex.scalar_at(&ctx.heap, a, p, bcast(a_size, e), 0);
                    let bv = ex.scalar_at(&ctx.heap, b, p, bcast(b_size, e), 0);
                    if av != bv {
                        all_eq = false;
                    }
                }
                if kind == OpKind::Eq { all_eq } else { !all_eq }
            }
            _ => {
                assert!(n == 1, "ordering comparisons take scalar operands");
                let av = ex.scalar_at(&ctx.heap, a, p, 0, 0);
                let bv = ex.scalar_at(&ctx.heap, b, p, 0, 0);
                match kind {
                    OpKind::Lt => av < bv,
                    OpKind::Le => av <= bv,
                    OpKind::Gt => av > bv,
                    OpKind::Ge => av >= bv,
                    _ => unreachable!(),
                }
            }
        };
        ex.write_int(&mut ctx.heap, dst, p, 0, r as i32);
    }
}

/// Multiply a column triple by the linear part of `m`, adding the
/// translation column when `w` is 1.
fn xform(m: &Matrix44, v: [f32; 3], w: f32) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for (i, o) in out.iter_mut().enumerate() {
        *o = m[i * 4] * v[0] + m[i * 4 + 1] * v[1] + m[i * 4 + 2] * v[2] + m[i * 4 + 3] * w;
    }
    out
}

fn transform(
    ex: &mut ShadingExecution,
    ctx: &mut ShadingContext,
    dst: SymIndex,
    space: SymIndex,
    src: SymIndex,
) {
    let varying =
        ex.symbols[src].is_varying() || ex.symbols[space].is_varying();
    ex.adjust_varying(&mut ctx.heap, dst, varying, false);
    let (begin, end, flags) = active(ex, dst);

    assert!(
        ex.symbols[dst].typespec.is_triple() && ex.symbols[src].typespec.is_triple(),
        "transform takes triple operands"
    );
    // Point semantics pick up the translation column; vectors and normals
    // transform by the linear part only.
    let w = match ex.symbols[src].typespec.simpletype().vecsemantics {
        VecSemantics::Point => 1.0,
        _ => 0.0,
    };
    let dst_derivs = ex.symbols[dst].has_derivs;

    let mut cached: Option<(Istr, Matrix44)> = None;
    for p in begin..end {
        if flags[p] == RUNFLAG_OFF {
            continue;
        }
        let sp = ex.string_at(ctx, space, p, 0);
        let m = match cached {
            Some((c, m)) if c == sp => m,
            _ => {
                let name = ctx.interner.resolve(sp).to_string();
                let (services, diags) = ctx.renderer_and_diags();
                let m = matrix_or_identity(services, diags, &name, 0.0);
                cached = Some((sp, m));
                m
            }
        };
        let v = [
            ex.float_at(&ctx.heap, src, p, 0),
            ex.float_at(&ctx.heap, src, p, 1),
            ex.float_at(&ctx.heap, src, p, 2),
        ];
        let out = xform(&m, v, w);
        for (e, val) in out.into_iter().enumerate() {
            ex.write_float(&mut ctx.heap, dst, p, e, 0, val);
        }
        if dst_derivs {
            // Derivatives transform as direction vectors.
            for d in 1..=2 {
                let dv = [
                    ex.float_deriv_at(&ctx.heap, src, p, 0, d),
                    ex.float_deriv_at(&ctx.heap, src, p, 1, d),
                    ex.float_deriv_at(&ctx.heap, src, p, 2, d),
                ];
                let out = xform(&m, dv, 0.0);
                for (e, val) in out.into_iter().enumerate() {
                    ex.write_float(&mut ctx.heap, dst, p, e, d, val);
                }
            }
        }
    }
}
