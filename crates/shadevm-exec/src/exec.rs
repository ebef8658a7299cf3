//! Execution of one shader layer over a point batch.
//!
//! A [`ShadingExecution`] binds a [`ShaderInstance`](crate::instance::ShaderInstance)
//! to a [`ShadingContext`](crate::context::ShadingContext) (allocating heap
//! storage for every symbol and wiring connections to earlier layers), then
//! interprets the master's opcodes under a stack of predication run states.
//! Structured control flow never branches per point: `if` and the loop ops
//! narrow the active flag set, run both paths, and restore the parent state.

use std::sync::Arc;

use shadevm_compiler::CompiledShader;
use shadevm_core::{
    BaseType, DataRef, Istr, OpKind, RUNFLAG_OFF, RUNFLAG_ON, Runflag, ShaderUse, SymIndex,
    SymKind, SymbolTable, ValueSource, equivalent,
};

use crate::context::{GlobalSlot, ShadingContext};
use crate::heap::Heap;
use crate::instance::ShaderInstance;
use crate::ops;

/// One level of the predication stack: which points are live, plus the
/// narrowest `[beginpoint, endpoint)` span that covers them.
#[derive(Debug, Clone)]
pub struct Runstate {
    pub flags: Vec<Runflag>,
    pub beginpoint: usize,
    pub endpoint: usize,
    pub all_points_on: bool,
}

/// The tightest index span covering the on flags in `[begin, end)`.
/// When every flag is off the result has `begin >= end`.
pub fn new_runflag_range(flags: &[Runflag], begin: usize, end: usize) -> (usize, usize) {
    let mut b = end;
    let mut e = begin;
    for (i, &f) in flags.iter().enumerate().take(end).skip(begin) {
        if f != RUNFLAG_OFF {
            if i < b {
                b = i;
            }
            e = i + 1;
        }
    }
    (b, e)
}

#[derive(Default)]
pub struct ShadingExecution {
    use_: Option<ShaderUse>,
    layerindex: usize,
    master: Option<Arc<CompiledShader>>,
    pub(crate) symbols: SymbolTable,
    npoints: usize,
    bound: bool,
    executed: bool,
    context_id: u64,
    context_generation: u64,
    instance_id: u64,
    runstack: Vec<Runstate>,
}

impl ShadingExecution {
    pub fn new() -> Self {
        ShadingExecution::default()
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    pub fn layerindex(&self) -> usize {
        self.layerindex
    }

    pub fn shaderuse(&self) -> Option<ShaderUse> {
        self.use_
    }

    pub fn master(&self) -> &Arc<CompiledShader> {
        self.master.as_ref().expect("execution is not bound")
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn find_symbol(&self, name: &str) -> Option<SymIndex> {
        self.master.as_ref()?.find_symbol(name)
    }

    // ---- run state stack -------------------------------------------------

    pub fn push_runflags(&mut self, flags: Vec<Runflag>, begin: usize, end: usize) {
        let (b, e) = new_runflag_range(&flags, begin, end);
        let all_points_on =
            b == 0 && e == self.npoints && flags.iter().all(|&f| f != RUNFLAG_OFF);
        self.runstack.push(Runstate {
            flags,
            beginpoint: b,
            endpoint: e,
            all_points_on,
        });
    }

    pub fn pop_runflags(&mut self) {
        self.runstack.pop().expect("run state stack underflow");
    }

    pub fn runstate(&self) -> &Runstate {
        self.runstack.last().expect("no active run state")
    }

    pub fn all_points_on(&self) -> bool {
        self.runstack.last().is_none_or(|r| r.all_points_on)
    }

    // ---- binding ---------------------------------------------------------

    /// Bind an instance to the context for the current point batch:
    /// allocate heap storage for every symbol, wire connections to the
    /// already bound `upstream` layers, mark geometry-supplied parameters,
    /// then run parameter init expressions.
    pub fn bind(
        &mut self,
        ctx: &mut ShadingContext,
        use_: ShaderUse,
        layerindex: usize,
        instance: &ShaderInstance,
        upstream: &[ShadingExecution],
    ) {
        assert!(!self.bound, "bind without an intervening unbind");
        self.use_ = Some(use_);
        self.layerindex = layerindex;

        // Same instance, same context, heap untouched since last bind:
        // every offset is still valid, so reuse the allocations. Parameter
        // values, geometry marking and init expressions are per-bind state
        // and are redone from the instance.
        if self.context_id == ctx.id()
            && self.context_generation == ctx.generation()
            && self.instance_id == instance.id()
        {
            let master = self
                .master
                .clone()
                .expect("identity triple matched before any full bind");
            self.refresh_params(ctx, instance);
            self.mark_geometry_params(ctx, &master);
            self.bound = true;
            self.executed = false;
            self.run_param_initializers(ctx, &master);
            return;
        }

        self.npoints = ctx.npoints();
        self.master = Some(instance.master().clone());
        self.context_id = ctx.id();
        self.context_generation = ctx.generation();
        self.instance_id = instance.id();
        self.symbols = instance.symbols.clone();
        let master = self.master.clone().expect("master set above");

        for i in self.symbols.indices() {
            match self.symbols[i].kind {
                SymKind::Global => self.bind_global(ctx, &master, i),
                SymKind::Param | SymKind::OutputParam => self.bind_param(ctx, instance, i),
                SymKind::Local | SymKind::Temp => self.bind_scratch(ctx, i),
                SymKind::Const => {
                    assert!(
                        matches!(self.symbols[i].data, Some(DataRef::ConstPool { .. })),
                        "constant '{}' was never placed in a pool",
                        master.interner.resolve(self.symbols[i].name)
                    );
                }
                SymKind::Function | SymKind::Type => {}
            }
        }

        self.bind_connections(instance, upstream);
        self.mark_geometry_params(ctx, &master);
        self.bound = true;
        self.executed = false;
        self.run_param_initializers(ctx, &master);
    }

    /// Forget the binding but keep the identity triple, so a rebind of the
    /// same instance into the same untouched context is cheap.
    pub fn unbind(&mut self) {
        self.bound = false;
    }

    fn bind_global(&mut self, ctx: &mut ShadingContext, master: &CompiledShader, i: SymIndex) {
        let name = master.interner.resolve(self.symbols[i].name).to_string();
        let npoints = self.npoints;

        if let Some(g) = ctx.globals().and_then(|gl| gl.get(&name)).cloned() {
            let sym = &mut self.symbols[i];
            assert!(
                sym.typespec.is_floatbased() && !sym.typespec.is_closure(),
                "staged data for global '{}' needs a float-based type",
                name
            );
            assert_eq!(
                g.elems,
                sym.size(),
                "staged global '{}' does not match its declared type",
                name
            );
            if g.has_derivs() {
                sym.has_derivs = true;
            }
            let size = sym.size();
            // Globals always carry (value, dx, dy) slots so later layers can
            // share the block whatever their derivative needs are.
            let block = 3 * size;
            let offset = ctx.heap.alloc_f(if g.uniform { block } else { npoints * block });
            if g.uniform {
                ctx.heap.f[offset..offset + size].copy_from_slice(&g.values);
                sym.step = 0;
            } else {
                for p in 0..npoints {
                    let dst = offset + p * block;
                    let src = p * size;
                    ctx.heap.f[dst..dst + size].copy_from_slice(&g.values[src..src + size]);
                    if let (Some(dx), Some(dy)) = (&g.dx, &g.dy) {
                        ctx.heap.f[dst + size..dst + 2 * size]
                            .copy_from_slice(&dx[src..src + size]);
                        ctx.heap.f[dst + 2 * size..dst + 3 * size]
                            .copy_from_slice(&dy[src..src + size]);
                    }
                }
                sym.step = block;
            }
            sym.data = Some(DataRef::Heap { offset });
            let slot = GlobalSlot {
                offset,
                step: sym.step,
                has_derivs: sym.has_derivs,
            };
            ctx.register_global_slot(&name, slot);
        } else if let Some(slot) = ctx.global_slot(&name) {
            let sym = &mut self.symbols[i];
            sym.data = Some(DataRef::Heap {
                offset: slot.offset,
            });
            sym.step = slot.step;
            sym.has_derivs = sym.has_derivs || slot.has_derivs;
        } else {
            // Nothing staged and no earlier layer bound it: allocate zeroed
            // varying storage on demand (the Ci case).
            let sym = &mut self.symbols[i];
            let size = sym.size();
            let (offset, step) = if sym.typespec.is_closure() {
                (ctx.heap.alloc_c(npoints * size), size)
            } else {
                match sym.typespec.simpletype().basetype {
                    BaseType::Float => {
                        let block = 3 * size;
                        (ctx.heap.alloc_f(npoints * block), block)
                    }
                    BaseType::Int => (ctx.heap.alloc_i(npoints * size), size),
                    BaseType::String => (ctx.heap.alloc_s(npoints * size), size),
                    BaseType::None => panic!("global '{}' has no storage class", name),
                }
            };
            sym.step = step;
            sym.data = Some(DataRef::Heap { offset });
            let slot = GlobalSlot {
                offset,
                step,
                has_derivs: sym.has_derivs,
            };
            ctx.register_global_slot(&name, slot);
        }
    }

    fn bind_param(&mut self, ctx: &mut ShadingContext, instance: &ShaderInstance, i: SymIndex) {
        let npoints = self.npoints;
        let sym = &mut self.symbols[i];
        if sym.typespec.is_structure() || sym.size() == 0 {
            return;
        }
        let size = sym.size();
        if sym.typespec.is_closure() {
            let offset = ctx.heap.alloc_c(npoints * size);
            sym.data = Some(DataRef::Heap { offset });
            sym.step = size;
            return;
        }
        // Storage covers the whole batch up front; the value lands in
        // point 0's block and step 0 makes every point read it.
        let offset = match sym.typespec.simpletype().basetype {
            BaseType::Float => ctx.heap.alloc_f(npoints * sym.derivsize()),
            BaseType::Int => ctx.heap.alloc_i(npoints * size),
            BaseType::String => ctx.heap.alloc_s(npoints * size),
            BaseType::None => panic!("parameter has no storage class"),
        };
        sym.data = Some(DataRef::Heap { offset });
        self.copy_param_values(ctx, instance, i);
    }

    /// Copy the instance's literal value (default or override) into the
    /// point 0 block and drop the symbol back to uniform. Runs on every
    /// bind; the allocation happens once.
    fn copy_param_values(
        &mut self,
        ctx: &mut ShadingContext,
        instance: &ShaderInstance,
        i: SymIndex,
    ) {
        let sym = &mut self.symbols[i];
        let Some(DataRef::Heap { offset }) = sym.data else {
            return;
        };
        let size = sym.size();
        let poff = sym.dataoffset as usize;
        match sym.typespec.simpletype().basetype {
            BaseType::Float => {
                ctx.heap.f[offset..offset + size]
                    .copy_from_slice(&instance.fparams[poff..poff + size]);
                if sym.has_derivs {
                    for v in &mut ctx.heap.f[offset + size..offset + 3 * size] {
                        *v = 0.0;
                    }
                }
            }
            BaseType::Int => {
                ctx.heap.i[offset..offset + size]
                    .copy_from_slice(&instance.iparams[poff..poff + size]);
            }
            BaseType::String => {
                for j in 0..size {
                    let h = ctx.intern(&instance.sparams[poff + j]);
                    ctx.heap.s[offset + j] = h;
                }
            }
            BaseType::None => {}
        }
        sym.step = 0;
    }

    /// Rebind refresh: re-adopt each unconnected parameter's value source
    /// and literal value from the instance over the existing allocations.
    fn refresh_params(&mut self, ctx: &mut ShadingContext, instance: &ShaderInstance) {
        for i in self.symbols.indices() {
            {
                let sym = &self.symbols[i];
                if !sym.is_param()
                    || sym.valuesource == ValueSource::Connected
                    || sym.typespec.is_closure()
                {
                    continue;
                }
            }
            self.symbols[i].valuesource = instance.symbols()[i].valuesource;
            self.copy_param_values(ctx, instance, i);
        }
    }

    fn bind_scratch(&mut self, ctx: &mut ShadingContext, i: SymIndex) {
        let npoints = self.npoints;
        let sym = &mut self.symbols[i];
        if sym.typespec.is_structure() || sym.size() == 0 || !sym.everused() {
            return;
        }
        let size = sym.size();
        let offset = if sym.typespec.is_closure() {
            sym.step = size;
            ctx.heap.alloc_c(npoints * size)
        } else {
            sym.step = 0;
            match sym.typespec.simpletype().basetype {
                BaseType::Float => ctx.heap.alloc_f(npoints * sym.derivsize()),
                BaseType::Int => ctx.heap.alloc_i(npoints * size),
                BaseType::String => ctx.heap.alloc_s(npoints * size),
                BaseType::None => panic!("local has no storage class"),
            }
        };
        sym.data = Some(DataRef::Heap { offset });
    }

    fn bind_connections(&mut self, instance: &ShaderInstance, upstream: &[ShadingExecution]) {
        for conn in instance.connections() {
            assert!(
                conn.src_layer < self.layerindex,
                "connection source must be an earlier layer"
            );
            let src_exec = &upstream[conn.src_layer];
            assert!(src_exec.bound, "connection source layer is not bound");
            let src = &src_exec.symbols[conn.src_symbol];
            assert!(
                matches!(src.data, Some(DataRef::Heap { .. })),
                "connection source '{}' has no heap storage",
                src_exec.master().interner.resolve(src.name)
            );
            let dst = &mut self.symbols[conn.dst_symbol];
            assert!(
                equivalent(&src.typespec, &dst.typespec),
                "connection type mismatch on '{}'",
                instance.resolve(dst.name)
            );
            dst.data = src.data;
            dst.step = src.step;
            dst.has_derivs = src.has_derivs;
            dst.valuesource = ValueSource::Connected;
        }
    }

    fn mark_geometry_params(&mut self, ctx: &ShadingContext, master: &CompiledShader) {
        for i in self.symbols.indices() {
            let promised = {
                let sym = &self.symbols[i];
                sym.is_param()
                    && sym.valuesource == ValueSource::Default
                    && sym.typespec.is_floatbased()
                    && !sym.typespec.is_closure()
                    && ctx.renderer().has_userdata(
                        master.interner.resolve(sym.name),
                        sym.typespec.simpletype(),
                        self.npoints,
                    )
            };
            if promised {
                self.symbols[i].valuesource = ValueSource::Geometry;
            }
        }
    }

    fn run_param_initializers(&mut self, ctx: &mut ShadingContext, master: &CompiledShader) {
        for i in self.symbols.indices() {
            let (source, has_init, initbegin, initend) = {
                let sym = &self.symbols[i];
                if !sym.is_param() {
                    continue;
                }
                (
                    sym.valuesource,
                    sym.has_init_ops(),
                    sym.initbegin,
                    sym.initend,
                )
            };
            match source {
                ValueSource::Default if has_init => {
                    self.push_runflags(vec![RUNFLAG_ON; self.npoints], 0, self.npoints);
                    self.run_ops(ctx, initbegin as usize, initend as usize);
                    self.pop_runflags();
                }
                ValueSource::Geometry => self.pull_userdata(ctx, master, i),
                _ => {}
            }
        }
    }

    fn pull_userdata(&mut self, ctx: &mut ShadingContext, master: &CompiledShader, i: SymIndex) {
        let npoints = self.npoints;
        let (name, ty, size) = {
            let sym = &self.symbols[i];
            (
                master.interner.resolve(sym.name).to_string(),
                sym.typespec.simpletype(),
                sym.size(),
            )
        };
        let mut buf = vec![0.0f32; npoints * size];
        if !ctx.renderer().get_userdata(&name, ty, npoints, &mut buf) {
            ctx.diagnostics.warning(
                None,
                0,
                format!(
                    "geometric data '{}' was promised but not delivered, keeping the default",
                    name
                ),
            );
            return;
        }
        let sym = &mut self.symbols[i];
        let Some(DataRef::Heap { offset }) = sym.data else {
            panic!("geometry parameter '{}' has no heap storage", name)
        };
        let dsize = sym.derivsize();
        sym.step = dsize;
        for p in 0..npoints {
            let dst = offset + p * dsize;
            ctx.heap.f[dst..dst + size].copy_from_slice(&buf[p * size..(p + 1) * size]);
        }
        // Derivative slots stay zero: interpolated data arrives without them.
    }

    // ---- execution -------------------------------------------------------

    /// Interpret the main body over the batch, predicated by `runflags`
    /// (`None` means all points on). Re-running without a rebind is a no-op.
    pub fn run(&mut self, ctx: &mut ShadingContext, runflags: Option<&[Runflag]>) {
        assert!(self.bound, "run on an unbound execution");
        if self.executed {
            return;
        }
        let flags = match runflags {
            Some(rf) => {
                assert_eq!(rf.len(), self.npoints, "runflag span must cover the batch");
                rf.to_vec()
            }
            None => vec![RUNFLAG_ON; self.npoints],
        };
        let master = self.master.clone().expect("bound");
        self.push_runflags(flags, 0, self.npoints);
        self.run_ops(
            ctx,
            master.maincodebegin as usize,
            master.maincodeend as usize,
        );
        self.pop_runflags();
        self.executed = true;
    }

    /// Interpret ops `[beginop, endop)` under the current run state.
    fn run_ops(&mut self, ctx: &mut ShadingContext, beginop: usize, endop: usize) {
        let master = self.master.clone().expect("run_ops on an unbound execution");
        let mut ip = beginop;
        while ip < endop {
            {
                let rs = self.runstate();
                if rs.beginpoint >= rs.endpoint {
                    break;
                }
            }
            let op = &master.ops[ip];
            let kind = op.kind.unwrap_or_else(|| {
                panic!(
                    "op '{}' reached the interpreter without an implementation",
                    master.interner.resolve(op.opname)
                )
            });
            match kind {
                OpKind::Nop | OpKind::End => {}
                OpKind::If => {
                    self.exec_if(ctx, &master, ip);
                    ip = op.jump(1) as usize;
                    continue;
                }
                OpKind::For | OpKind::While => {
                    self.exec_loop(ctx, &master, ip, false);
                    ip = op.jump(3) as usize;
                    continue;
                }
                OpKind::DoWhile => {
                    self.exec_loop(ctx, &master, ip, true);
                    ip = op.jump(3) as usize;
                    continue;
                }
                _ => ops::execute(self, ctx, &master, ip, kind),
            }
            ip += 1;
        }
    }

    /// `if` interpretation: run the then-ops with the condition folded into
    /// the flags, then the else-ops with its negation. Both ranges always
    /// execute (possibly over an empty point set).
    fn exec_if(&mut self, ctx: &mut ShadingContext, master: &CompiledShader, opnum: usize) {
        let op = &master.ops[opnum];
        let cond = master.op_args(op)[0];
        let elsebegin = op.jump(0) as usize;
        let donepos = op.jump(1) as usize;
        let parent = self.runstate().clone();

        let mut then_flags = parent.flags.clone();
        for p in parent.beginpoint..parent.endpoint {
            if then_flags[p] != RUNFLAG_OFF && !self.truthy(&ctx.heap, cond, p) {
                then_flags[p] = RUNFLAG_OFF;
            }
        }
        self.push_runflags(then_flags, parent.beginpoint, parent.endpoint);
        self.run_ops(ctx, opnum + 1, elsebegin);
        self.pop_runflags();

        if elsebegin < donepos {
            let mut else_flags = parent.flags;
            for p in parent.beginpoint..parent.endpoint {
                if else_flags[p] != RUNFLAG_OFF && self.truthy(&ctx.heap, cond, p) {
                    else_flags[p] = RUNFLAG_OFF;
                }
            }
            self.push_runflags(else_flags, parent.beginpoint, parent.endpoint);
            self.run_ops(ctx, elsebegin, donepos);
            self.pop_runflags();
        }
    }

    /// Loop interpretation: re-evaluate the condition each trip and turn
    /// off points whose condition went false; the loop exits when no point
    /// in the parent span remains on.
    fn exec_loop(
        &mut self,
        ctx: &mut ShadingContext,
        master: &CompiledShader,
        opnum: usize,
        body_first: bool,
    ) {
        let op = &master.ops[opnum];
        let cond = master.op_args(op)[0];
        let condbegin = op.jump(0) as usize;
        let bodybegin = op.jump(1) as usize;
        let iterbegin = op.jump(2) as usize;
        let donepos = op.jump(3) as usize;

        // Initializer ops run once, under the enclosing predicate.
        self.run_ops(ctx, opnum + 1, condbegin);

        let parent = self.runstate().clone();
        let mut flags = parent.flags.clone();
        loop {
            self.push_runflags(flags.clone(), parent.beginpoint, parent.endpoint);
            if body_first {
                self.run_ops(ctx, bodybegin, iterbegin);
                self.run_ops(ctx, iterbegin, donepos);
            }
            self.run_ops(ctx, condbegin, bodybegin);
            for p in parent.beginpoint..parent.endpoint {
                if flags[p] != RUNFLAG_OFF && !self.truthy(&ctx.heap, cond, p) {
                    flags[p] = RUNFLAG_OFF;
                }
            }
            self.pop_runflags();

            let (b, e) = new_runflag_range(&flags, parent.beginpoint, parent.endpoint);
            if b >= e {
                break;
            }
            if !body_first {
                self.push_runflags(flags.clone(), parent.beginpoint, parent.endpoint);
                self.run_ops(ctx, bodybegin, iterbegin);
                self.run_ops(ctx, iterbegin, donepos);
                self.pop_runflags();
            }
        }
    }

    // ---- uniform/varying adjustment ----------------------------------------

    /// Fix a symbol's uniformity before writing to it. A varying value or a
    /// partial predicate forces the destination varying; promotion
    /// broadcasts point 0's block so untouched points keep their value.
    /// Demotion back to uniform never applies to globals.
    pub fn adjust_varying(
        &mut self,
        heap: &mut Heap,
        s: SymIndex,
        varying_assignment: bool,
        preserve_value: bool,
    ) {
        let all_on = self.all_points_on();
        let varying_assignment = varying_assignment || !all_on;
        let npoints = self.npoints;
        let sym = &mut self.symbols[s];
        if sym.is_varying() == varying_assignment {
            return;
        }
        let size = sym.size();
        let Some(DataRef::Heap { offset }) = sym.data else {
            panic!("cannot change uniformity of a symbol without heap storage")
        };
        if varying_assignment {
            let block = if sym.typespec.is_closure() || !sym.typespec.is_floatbased() {
                size
            } else {
                sym.derivsize()
            };
            sym.step = block;
            if preserve_value || !all_on {
                for p in 1..npoints {
                    let dst = offset + p * block;
                    if sym.typespec.is_closure() {
                        heap.c.copy_within(offset..offset + block, dst);
                    } else {
                        match sym.typespec.simpletype().basetype {
                            BaseType::Float => heap.f.copy_within(offset..offset + block, dst),
                            BaseType::Int => heap.i.copy_within(offset..offset + block, dst),
                            BaseType::String => heap.s.copy_within(offset..offset + block, dst),
                            BaseType::None => {}
                        }
                    }
                }
            }
        } else {
            if sym.kind == SymKind::Global {
                return;
            }
            sym.step = 0;
            // A uniform value has no derivatives.
            if sym.has_derivs && sym.typespec.is_floatbased() {
                for v in &mut heap.f[offset + size..offset + 3 * size] {
                    *v = 0.0;
                }
            }
        }
    }

    // ---- value access ------------------------------------------------------

    pub fn float_at(&self, heap: &Heap, s: SymIndex, point: usize, elem: usize) -> f32 {
        self.float_deriv_at(heap, s, point, elem, 0)
    }

    /// Read one float element; `deriv` 0/1/2 selects value/dx/dy. Symbols
    /// without derivative storage read zero derivatives.
    pub fn float_deriv_at(
        &self,
        heap: &Heap,
        s: SymIndex,
        point: usize,
        elem: usize,
        deriv: usize,
    ) -> f32 {
        let sym = &self.symbols[s];
        if deriv > 0 && !sym.has_derivs {
            return 0.0;
        }
        match sym.data.expect("read from a symbol with no storage") {
            DataRef::Heap { offset } => {
                heap.f[offset + point * sym.step + deriv * sym.size() + elem]
            }
            DataRef::ConstPool { offset } => {
                let m = self.master.as_ref().expect("bound");
                m.fconsts[offset + elem]
            }
        }
    }

    pub fn int_at(&self, heap: &Heap, s: SymIndex, point: usize, elem: usize) -> i32 {
        let sym = &self.symbols[s];
        match sym.data.expect("read from a symbol with no storage") {
            DataRef::Heap { offset } => heap.i[offset + point * sym.step + elem],
            DataRef::ConstPool { offset } => {
                let m = self.master.as_ref().expect("bound");
                m.iconsts[offset + elem]
            }
        }
    }

    /// Read a string as a handle in the context's interner. Constants live
    /// in the master's table, so they are re-interned on the way out.
    pub fn string_at(
        &self,
        ctx: &mut ShadingContext,
        s: SymIndex,
        point: usize,
        elem: usize,
    ) -> Istr {
        let sym = &self.symbols[s];
        match sym.data.expect("read from a symbol with no storage") {
            DataRef::Heap { offset } => ctx.heap.s[offset + point * sym.step + elem],
            DataRef::ConstPool { offset } => {
                let m = self.master.as_ref().expect("bound");
                let text = m.interner.resolve(m.sconsts[offset + elem]);
                ctx.intern(text)
            }
        }
    }

    /// Numeric read with int-to-float coercion.
    pub(crate) fn scalar_at(
        &self,
        heap: &Heap,
        s: SymIndex,
        point: usize,
        elem: usize,
        deriv: usize,
    ) -> f32 {
        match self.symbols[s].typespec.simpletype().basetype {
            BaseType::Int => {
                if deriv > 0 {
                    0.0
                } else {
                    self.int_at(heap, s, point, elem) as f32
                }
            }
            _ => self.float_deriv_at(heap, s, point, elem, deriv),
        }
    }

    pub(crate) fn truthy(&self, heap: &Heap, s: SymIndex, point: usize) -> bool {
        match self.symbols[s].typespec.simpletype().basetype {
            BaseType::Int => self.int_at(heap, s, point, 0) != 0,
            BaseType::Float => self.float_at(heap, s, point, 0) != 0.0,
            _ => panic!("condition symbol is not numeric"),
        }
    }

    pub(crate) fn write_float(
        &self,
        heap: &mut Heap,
        s: SymIndex,
        point: usize,
        elem: usize,
        deriv: usize,
        v: f32,
    ) {
        let sym = &self.symbols[s];
        let Some(DataRef::Heap { offset }) = sym.data else {
            panic!("write to a symbol without heap storage")
        };
        heap.f[offset + point * sym.step + deriv * sym.size() + elem] = v;
    }

    pub(crate) fn write_int(&self, heap: &mut Heap, s: SymIndex, point: usize, elem: usize, v: i32) {
        let sym = &self.symbols[s];
        let Some(DataRef::Heap { offset }) = sym.data else {
            panic!("write to a symbol without heap storage")
        };
        heap.i[offset + point * sym.step + elem] = v;
    }

    pub(crate) fn write_string(
        &self,
        heap: &mut Heap,
        s: SymIndex,
        point: usize,
        elem: usize,
        v: Istr,
    ) {
        let sym = &self.symbols[s];
        let Some(DataRef::Heap { offset }) = sym.data else {
            panic!("write to a symbol without heap storage")
        };
        heap.s[offset + point * sym.step + elem] = v;
    }

    /// Zero a symbol's value storage: the single block when uniform, the
    /// active points' blocks when varying.
    pub fn zero(&self, heap: &mut Heap, s: SymIndex) {
        let sym = &self.symbols[s];
        let Some(DataRef::Heap { offset }) = sym.data else {
            panic!("zero of a symbol without heap storage")
        };
        let size = sym.size();
        let zero_block = |heap: &mut Heap, base: usize| {
            if sym.typespec.is_closure() {
                for v in &mut heap.c[base..base + size] {
                    *v = 0;
                }
                return;
            }
            match sym.typespec.simpletype().basetype {
                BaseType::Float => {
                    for v in &mut heap.f[base..base + size] {
                        *v = 0.0;
                    }
                }
                BaseType::Int => {
                    for v in &mut heap.i[base..base + size] {
                        *v = 0;
                    }
                }
                BaseType::String => {
                    for v in &mut heap.s[base..base + size] {
                        *v = Istr::EMPTY;
                    }
                }
                BaseType::None => {}
            }
        };
        if sym.is_uniform() {
            zero_block(heap, offset);
            return;
        }
        let rs = self.runstate();
        for p in rs.beginpoint..rs.endpoint {
            if rs.flags[p] != RUNFLAG_OFF {
                zero_block(heap, offset + p * sym.step);
            }
        }
    }

    pub(crate) fn zero_derivs(&self, heap: &mut Heap, s: SymIndex, point: usize) {
        let sym = &self.symbols[s];
        if !sym.has_derivs || !sym.typespec.is_floatbased() || sym.typespec.is_closure() {
            return;
        }
        let Some(DataRef::Heap { offset }) = sym.data else {
            return;
        };
        let size = sym.size();
        let base = offset + point * sym.step + size;
        for v in &mut heap.f[base..base + 2 * size] {
            *v = 0.0;
        }
    }

    // ---- inspection --------------------------------------------------------

    /// First element of a named symbol's value at one point, for harvesting
    /// outputs after a run.
    pub fn float_value(&self, ctx: &ShadingContext, name: &str, point: usize) -> Option<f32> {
        let s = self.find_symbol(name)?;
        self.symbols[s].data?;
        Some(self.float_at(&ctx.heap, s, point, 0))
    }

    pub fn int_value(&self, ctx: &ShadingContext, name: &str, point: usize) -> Option<i32> {
        let s = self.find_symbol(name)?;
        self.symbols[s].data?;
        Some(self.int_at(&ctx.heap, s, point, 0))
    }

    pub fn string_value(&self, ctx: &ShadingContext, name: &str, point: usize) -> Option<String> {
        let s = self.find_symbol(name)?;
        let sym = &self.symbols[s];
        match sym.data? {
            DataRef::Heap { offset } => Some(
                ctx.interner
                    .resolve(ctx.heap.s[offset + point * sym.step])
                    .to_string(),
            ),
            DataRef::ConstPool { offset } => {
                let m = self.master.as_ref()?;
                Some(m.interner.resolve(m.sconsts[offset]).to_string())
            }
        }
    }

    /// Render one symbol's storage as text, one line per point (or one
    /// `uniform` line), for debugging batch state.
    pub fn dump_symbol(&self, ctx: &ShadingContext, name: &str) -> Option<String> {
        let master = self.master.as_ref()?;
        let s = master.find_symbol(name)?;
        let sym = &self.symbols[s];
        sym.data?;
        let size = sym.size();
        let elems = |point: usize| -> String {
            (0..size)
                .map(|e| match sym.typespec.simpletype().basetype {
                    BaseType::Int => self.int_at(&ctx.heap, s, point, e).to_string(),
                    BaseType::String => self
                        .string_value(ctx, name, point)
                        .unwrap_or_default(),
                    _ => format!("{}", self.float_at(&ctx.heap, s, point, e)),
                })
                .collect::<Vec<_>>()
                .join(" ")
        };
        let mut out = format!("{} {} {}\n", sym.kind.shortname(), sym.typespec, name);
        if sym.is_uniform() {
            out.push_str(&format!("\tuniform: {}\n", elems(0)));
        } else {
            for p in 0..self.npoints {
                out.push_str(&format!("\t{}: {}\n", p, elems(p)));
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadevm_compiler::{CompileOptions, CompileSession};
    use shadevm_core::{ShaderType, TypeSpec};

    use crate::globals::ShaderGlobals;
    use crate::services::RendererServices;

    fn add_shader() -> Arc<CompiledShader> {
        let mut s = CompileSession::new(ShaderType::Surface, "add2");
        let u = s.param("u", TypeSpec::float());
        s.default_floats(u, &[0.25]);
        let v = s.param("v", TypeSpec::float());
        s.default_floats(v, &[0.5]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.emit("add", &[o, u, v], "wrr");
        Arc::new(s.compile(&CompileOptions::default()).shader.unwrap())
    }

    fn bind_and_run(
        master: Arc<CompiledShader>,
        ctx: &mut ShadingContext,
        runflags: Option<&[Runflag]>,
    ) -> ShadingExecution {
        let inst = ShaderInstance::new(master, "layer0");
        let mut exec = ShadingExecution::new();
        exec.bind(ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.run(ctx, runflags);
        exec
    }

    #[test]
    fn runflag_range_scans() {
        assert_eq!(new_runflag_range(&[0, 255, 255, 0], 0, 4), (1, 3));
        assert_eq!(new_runflag_range(&[255, 0, 0, 255], 0, 4), (0, 4));
        let (b, e) = new_runflag_range(&[0, 0, 0, 0], 0, 4);
        assert!(b >= e);
    }

    #[test]
    fn uniform_inputs_stay_uniform() {
        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let exec = bind_and_run(add_shader(), &mut ctx, None);
        let o = exec.find_symbol("o").unwrap();
        assert!(exec.symbols()[o].is_uniform());
        for p in 0..4 {
            assert_eq!(exec.float_value(&ctx, "o", p), Some(0.75));
        }
    }

    #[test]
    fn all_off_predicate_runs_nothing() {
        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let exec = bind_and_run(add_shader(), &mut ctx, Some(&[0, 0, 0, 0]));
        assert!(exec.is_executed());
        // No op touched o, so the default survives.
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(0.0));
    }

    #[test]
    fn partial_predicate_promotes_and_preserves() {
        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let exec = bind_and_run(add_shader(), &mut ctx, Some(&[255, 0, 255, 0]));
        let o = exec.find_symbol("o").unwrap();
        assert!(exec.symbols()[o].is_varying());
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(0.75));
        assert_eq!(exec.float_value(&ctx, "o", 1), Some(0.0));
        assert_eq!(exec.float_value(&ctx, "o", 2), Some(0.75));
        assert_eq!(exec.float_value(&ctx, "o", 3), Some(0.0));
    }

    fn threshold_shader() -> Arc<CompiledShader> {
        // o = (u < cutoff) ? hi : lo, via if/else.
        let mut s = CompileSession::new(ShaderType::Surface, "threshold");
        let u = s.global("u", TypeSpec::float());
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        let cutoff = s.const_float(0.5);
        let hi = s.const_float(1.0);
        let lo = s.const_float(2.0);
        let t = s.temp(TypeSpec::int());
        s.begin_main();
        s.emit("lt", &[t, u, cutoff], "wrr");
        let ifop = s.emit("if", &[t], "r");
        s.emit("assign", &[o, hi], "wr");
        let elsebegin = s.emit("assign", &[o, lo], "wr");
        s.set_jumps(ifop, &[elsebegin as i32, elsebegin as i32 + 1]);
        Arc::new(s.compile(&CompileOptions::default()).shader.unwrap())
    }

    #[test]
    fn if_else_predication() {
        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let mut globals = ShaderGlobals::new(4);
        globals.set("u", 1, &[0.1, 0.9, 0.4, 0.6]);
        ctx.set_globals(globals);
        let exec = bind_and_run(threshold_shader(), &mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(1.0));
        assert_eq!(exec.float_value(&ctx, "o", 1), Some(2.0));
        assert_eq!(exec.float_value(&ctx, "o", 2), Some(1.0));
        assert_eq!(exec.float_value(&ctx, "o", 3), Some(2.0));
    }

    fn loop_shader() -> Arc<CompiledShader> {
        // i = 0; while (i < n) { o = o + u; i = i + 1; }
        let mut s = CompileSession::new(ShaderType::Surface, "looper");
        let u = s.param("u", TypeSpec::float());
        s.default_floats(u, &[1.5]);
        let n = s.param("n", TypeSpec::int());
        s.default_ints(n, &[3]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        let zero = s.const_int(0);
        let one = s.const_int(1);
        let i = s.local("i", TypeSpec::int());
        let c = s.temp(TypeSpec::int());
        s.begin_main();
        s.emit("assign", &[i, zero], "wr");
        let w = s.emit("while", &[c], "r");
        let condbegin = s.emit("lt", &[c, i, n], "wrr");
        let bodybegin = s.emit("add", &[o, o, u], "wrr");
        let iterbegin = s.emit("add", &[i, i, one], "wrr");
        s.set_jumps(
            w,
            &[
                condbegin as i32,
                bodybegin as i32,
                iterbegin as i32,
                iterbegin as i32 + 1,
            ],
        );
        let opts = CompileOptions {
            coalesce_temporaries: false,
        };
        Arc::new(s.compile(&opts).shader.unwrap())
    }

    #[test]
    fn while_loop_iterates_to_the_condition() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let exec = bind_and_run(loop_shader(), &mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(4.5));
        assert_eq!(exec.float_value(&ctx, "o", 1), Some(4.5));
    }

    fn dowhile_shader() -> Arc<CompiledShader> {
        // i = 0; do { o = o + u; i = i + 1; } while (i < n), with n = 0:
        // the body must still run exactly once.
        let mut s = CompileSession::new(ShaderType::Surface, "once");
        let u = s.param("u", TypeSpec::float());
        s.default_floats(u, &[2.0]);
        let n = s.param("n", TypeSpec::int());
        s.default_ints(n, &[0]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        let zero = s.const_int(0);
        let one = s.const_int(1);
        let i = s.local("i", TypeSpec::int());
        let c = s.temp(TypeSpec::int());
        s.begin_main();
        s.emit("assign", &[i, zero], "wr");
        let w = s.emit("dowhile", &[c], "r");
        let condbegin = s.emit("lt", &[c, i, n], "wrr");
        let bodybegin = s.emit("add", &[o, o, u], "wrr");
        let iterbegin = s.emit("add", &[i, i, one], "wrr");
        s.set_jumps(
            w,
            &[
                condbegin as i32,
                bodybegin as i32,
                iterbegin as i32,
                iterbegin as i32 + 1,
            ],
        );
        let opts = CompileOptions {
            coalesce_temporaries: false,
        };
        Arc::new(s.compile(&opts).shader.unwrap())
    }

    #[test]
    fn dowhile_runs_the_body_at_least_once() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let exec = bind_and_run(dowhile_shader(), &mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(2.0));
        assert_eq!(exec.float_value(&ctx, "o", 1), Some(2.0));
    }

    #[test]
    fn dump_symbol_renders_uniform_and_varying() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let exec = bind_and_run(add_shader(), &mut ctx, None);
        let text = exec.dump_symbol(&ctx, "o").unwrap();
        assert!(text.starts_with("oparam float o\n"));
        assert!(text.contains("uniform: 0.75"));

        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let exec = bind_and_run(add_shader(), &mut ctx, Some(&[255, 0]));
        let text = exec.dump_symbol(&ctx, "o").unwrap();
        assert!(text.contains("0: 0.75"));
        assert!(text.contains("1: 0"));
    }

    #[test]
    fn zero_respects_the_predicate() {
        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let mut exec = bind_and_run(add_shader(), &mut ctx, None);
        let o = exec.find_symbol("o").unwrap();
        // Force o varying, then zero only two points.
        exec.push_runflags(vec![0, 255, 255, 0], 0, 4);
        exec.adjust_varying(&mut ctx.heap, o, true, true);
        exec.zero(&mut ctx.heap, o);
        exec.pop_runflags();
        assert_eq!(exec.float_at(&ctx.heap, o, 0, 0), 0.75);
        assert_eq!(exec.float_at(&ctx.heap, o, 1, 0), 0.0);
        assert_eq!(exec.float_at(&ctx.heap, o, 2, 0), 0.0);
        assert_eq!(exec.float_at(&ctx.heap, o, 3, 0), 0.75);
    }

    #[test]
    fn staged_globals_bind_with_derivatives() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let mut globals = ShaderGlobals::new(2);
        globals.set("u", 1, &[0.25, 0.75]);
        globals.set_derivs("u", &[0.5, 0.5], &[0.0, 0.0]);
        ctx.set_globals(globals);

        let mut s = CompileSession::new(ShaderType::Surface, "passthru");
        let u = s.global("u", TypeSpec::float());
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.emit("assign", &[o, u], "wr");
        let master = Arc::new(s.compile(&CompileOptions::default()).shader.unwrap());

        let exec = bind_and_run(master, &mut ctx, None);
        let u = exec.find_symbol("u").unwrap();
        assert!(exec.symbols()[u].is_varying());
        assert!(exec.symbols()[u].has_derivs);
        assert_eq!(exec.float_deriv_at(&ctx.heap, u, 1, 0, 1), 0.5);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(0.25));
        assert_eq!(exec.float_value(&ctx, "o", 1), Some(0.75));
    }

    #[test]
    fn globals_are_never_demoted() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let mut globals = ShaderGlobals::new(2);
        globals.set("u", 1, &[0.25, 0.75]);
        ctx.set_globals(globals);
        let inst = ShaderInstance::new(threshold_shader(), "layer0");
        let mut exec = ShadingExecution::new();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        let u = exec.find_symbol("u").unwrap();
        exec.push_runflags(vec![RUNFLAG_ON; 2], 0, 2);
        exec.adjust_varying(&mut ctx.heap, u, false, false);
        exec.pop_runflags();
        assert!(exec.symbols()[u].is_varying());
        assert_eq!(exec.float_at(&ctx.heap, u, 1, 0), 0.75);
    }

    struct StRenderer;

    impl RendererServices for StRenderer {
        fn has_userdata(
            &self,
            name: &str,
            _ty: shadevm_core::TypeDesc,
            _npoints: usize,
        ) -> bool {
            name == "st"
        }

        fn get_userdata(
            &self,
            name: &str,
            _ty: shadevm_core::TypeDesc,
            npoints: usize,
            out: &mut [f32],
        ) -> bool {
            if name != "st" {
                return false;
            }
            for (p, v) in out.iter_mut().enumerate().take(npoints) {
                *v = p as f32 * 0.5;
            }
            true
        }
    }

    #[test]
    fn geometry_userdata_overrides_the_default() {
        let mut s = CompileSession::new(ShaderType::Surface, "geo");
        let st = s.param("st", TypeSpec::float());
        s.default_floats(st, &[9.0]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.emit("assign", &[o, st], "wr");
        let master = Arc::new(s.compile(&CompileOptions::default()).shader.unwrap());

        let mut ctx = ShadingContext::with_renderer(Box::new(StRenderer));
        ctx.reset(3);
        let exec = bind_and_run(master, &mut ctx, None);
        let st = exec.find_symbol("st").unwrap();
        assert_eq!(exec.symbols()[st].valuesource, ValueSource::Geometry);
        assert!(exec.symbols()[st].is_varying());
        assert_eq!(exec.float_value(&ctx, "o", 2), Some(1.0));
    }

    #[test]
    fn init_expressions_run_at_bind() {
        // param warp = u * 2, main: o = warp.
        let mut s = CompileSession::new(ShaderType::Surface, "warped");
        let u = s.global("u", TypeSpec::float());
        let warp = s.param("warp", TypeSpec::float());
        s.default_floats(warp, &[0.0]);
        let two = s.const_float(2.0);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_init(warp);
        s.emit("mul", &[warp, u, two], "wrr");
        s.end_init(warp);
        s.begin_main();
        s.emit("assign", &[o, warp], "wr");
        let master = Arc::new(s.compile(&CompileOptions::default()).shader.unwrap());

        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let mut globals = ShaderGlobals::new(2);
        globals.set("u", 1, &[0.25, 0.5]);
        ctx.set_globals(globals);
        let exec = bind_and_run(master, &mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(0.5));
        assert_eq!(exec.float_value(&ctx, "o", 1), Some(1.0));
    }

    #[test]
    #[should_panic(expected = "without an intervening unbind")]
    fn binding_twice_without_unbind_is_fatal() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let inst = ShaderInstance::new(add_shader(), "layer0");
        let mut exec = ShadingExecution::new();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
    }

    #[test]
    fn rebind_picks_up_parameter_overrides() {
        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let mut inst = ShaderInstance::new(add_shader(), "layer0");
        let mut exec = ShadingExecution::new();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.run(&mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(0.75));

        // Overrides applied between unbind and rebind take effect.
        exec.unbind();
        inst.set_parameter_floats("u", &[0.5]).unwrap();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.run(&mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(1.0));
    }

    #[test]
    fn rebind_restores_parameter_defaults() {
        // o = o + u: a rebind re-copies the default over the last result.
        let mut s = CompileSession::new(ShaderType::Surface, "accum");
        let u = s.param("u", TypeSpec::float());
        s.default_floats(u, &[1.0]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.emit("add", &[o, o, u], "wrr");
        let master = Arc::new(s.compile(&CompileOptions::default()).shader.unwrap());

        let mut ctx = ShadingContext::new();
        ctx.reset(4);
        let inst = ShaderInstance::new(master, "layer0");
        let mut exec = ShadingExecution::new();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.run(&mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(1.0));

        exec.unbind();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.run(&mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(1.0));
    }

    #[test]
    fn rerun_without_rebind_is_a_noop() {
        let mut ctx = ShadingContext::new();
        ctx.reset(2);
        let inst = ShaderInstance::new(loop_shader(), "layer0");
        let mut exec = ShadingExecution::new();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        exec.run(&mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(4.5));
        // A second run must not accumulate further.
        exec.run(&mut ctx, None);
        assert_eq!(exec.float_value(&ctx, "o", 0), Some(4.5));
        // Rebinding the same instance into the untouched context reuses the
        // binding and arms a fresh run.
        exec.unbind();
        exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
        assert!(!exec.is_executed());
    }
}
