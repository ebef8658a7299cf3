//! The compile session: IR construction and the pass pipeline.
//!
//! A [`CompileSession`] accumulates symbols and ops through its builder
//! methods, then [`CompileSession::compile`] runs the analysis passes in
//! their required order and either produces a [`CompiledShader`] or a
//! batch of diagnostics. Dependency analysis must run before temporary
//! coalescing: coalescing destroys the per-symbol usage identity that the
//! derivative-propagation traversal keys on.

use std::sync::Arc;

use shadevm_core::{
    DataRef, Diagnostics, Interner, Istr, MAIN_METHOD, OpKind, Opcode, ShaderType, SymIndex,
    SymKind, SymMeta, Symbol, SymbolTable, TypeDesc, TypeSpec,
};

use crate::coalesce::coalesce_temporaries;
use crate::constants::ConstantPool;
use crate::deps::track_variable_dependencies;
use crate::legality::check_for_illegal_writes;
use crate::lifetimes::{find_basic_blocks, track_variable_lifetimes};

/// Knobs for the compile pipeline.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Merge equivalent-typed temporaries with disjoint lifetimes.
    pub coalesce_temporaries: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            coalesce_temporaries: true,
        }
    }
}

/// What a compile produced: a shader if no errors were recorded, plus the
/// full diagnostic batch either way.
#[derive(Debug)]
pub struct CompileResult {
    pub shader: Option<CompiledShader>,
    pub diagnostics: Diagnostics,
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        self.shader.is_some()
    }

    /// The shader, or a single error summarizing the recorded diagnostics.
    pub fn into_shader(self) -> Result<CompiledShader, shadevm_core::CompileError> {
        match self.shader {
            Some(shader) => Ok(shader),
            None => Err(shadevm_core::CompileError::ErrorsReported {
                count: self.diagnostics.error_count(),
            }),
        }
    }
}

/// A fully analyzed shader master: symbols with lifetimes and derivative
/// flags, ops with resolved implementations, and the deduplicated constant
/// pools the runtime reads initial values from.
///
/// Immutable after compilation; instances and executions copy what they
/// mutate.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub shadertype: ShaderType,
    pub shadername: String,
    pub symtab: SymbolTable,
    pub ops: Vec<Opcode>,
    /// Flat argument array; ops hold `[firstarg, firstarg+nargs)` slices.
    /// All entries are dealiased.
    pub args: Vec<SymIndex>,
    pub interner: Arc<Interner>,
    /// Main-body op range, `[maincodebegin, maincodeend)`.
    pub maincodebegin: i32,
    pub maincodeend: i32,
    /// Constant pools, one arena per base type. Const symbols hold
    /// `DataRef::ConstPool` offsets into these.
    pub fconsts: Vec<f32>,
    pub iconsts: Vec<i32>,
    pub sconsts: Vec<Istr>,
}

impl CompiledShader {
    pub fn find_symbol(&self, name: &str) -> Option<SymIndex> {
        let istr = self.interner.get(name)?;
        self.symtab.find(istr)
    }

    pub fn symbol(&self, i: SymIndex) -> &Symbol {
        &self.symtab[i]
    }

    /// The symbols one op operates on.
    pub fn op_args(&self, op: &Opcode) -> &[SymIndex] {
        &self.args[op.firstarg..op.firstarg + op.nargs]
    }

    pub fn num_params(&self) -> usize {
        self.symtab.iter().filter(|s| s.is_param()).count()
    }
}

/// Builder for one shader's IR, and the driver of the compile passes.
#[derive(Debug)]
pub struct CompileSession {
    shadertype: ShaderType,
    shadername: String,
    interner: Interner,
    symtab: SymbolTable,
    ops: Vec<Opcode>,
    args: Vec<SymIndex>,
    consts: ConstantPool,
    diags: Diagnostics,
    cur_method: Istr,
    cur_sourcefile: Istr,
    cur_sourceline: i32,
    maincodebegin: i32,
    next_temp: u32,
}

impl CompileSession {
    pub fn new(shadertype: ShaderType, shadername: &str) -> Self {
        CompileSession {
            shadertype,
            shadername: shadername.to_string(),
            interner: Interner::new(),
            symtab: SymbolTable::new(),
            ops: Vec::new(),
            args: Vec::new(),
            consts: ConstantPool::new(),
            diags: Diagnostics::new(),
            cur_method: Istr::EMPTY,
            cur_sourcefile: Istr::EMPTY,
            cur_sourceline: 0,
            maincodebegin: -1,
            next_temp: 0,
        }
    }

    pub fn intern(&mut self, s: &str) -> Istr {
        self.interner.intern(s)
    }

    // ------------------------------------------------------------------
    // Symbol declaration
    // ------------------------------------------------------------------

    fn declare(&mut self, name: &str, ty: TypeSpec, kind: SymKind) -> SymIndex {
        let name = self.interner.intern(name);
        self.symtab.push(Symbol::new(name, ty, kind))
    }

    pub fn param(&mut self, name: &str, ty: TypeSpec) -> SymIndex {
        self.declare(name, ty, SymKind::Param)
    }

    pub fn output_param(&mut self, name: &str, ty: TypeSpec) -> SymIndex {
        self.declare(name, ty, SymKind::OutputParam)
    }

    pub fn local(&mut self, name: &str, ty: TypeSpec) -> SymIndex {
        self.declare(name, ty, SymKind::Local)
    }

    /// A compiler temporary with an auto-generated `$tmpN` name.
    pub fn temp(&mut self, ty: TypeSpec) -> SymIndex {
        let name = format!("$tmp{}", self.next_temp);
        self.next_temp += 1;
        self.declare(&name, ty, SymKind::Temp)
    }

    pub fn global(&mut self, name: &str, ty: TypeSpec) -> SymIndex {
        self.declare(name, ty, SymKind::Global)
    }

    pub fn const_float(&mut self, value: f32) -> SymIndex {
        self.consts.float(&mut self.symtab, &mut self.interner, value)
    }

    pub fn const_floats(&mut self, ty: TypeDesc, values: &[f32]) -> SymIndex {
        self.consts
            .floats(&mut self.symtab, &mut self.interner, ty, values)
    }

    pub fn const_int(&mut self, value: i32) -> SymIndex {
        self.consts.int(&mut self.symtab, &mut self.interner, value)
    }

    pub fn const_string(&mut self, value: &str) -> SymIndex {
        self.consts.string(&mut self.symtab, &mut self.interner, value)
    }

    /// Set a parameter's literal default values.
    pub fn default_floats(&mut self, sym: SymIndex, values: &[f32]) {
        self.symtab[sym].fvals = values.to_vec();
    }

    pub fn default_ints(&mut self, sym: SymIndex, values: &[i32]) {
        self.symtab[sym].ivals = values.to_vec();
    }

    pub fn default_strings(&mut self, sym: SymIndex, values: &[&str]) {
        let istrs = values.iter().map(|s| self.interner.intern(s)).collect();
        self.symtab[sym].svals = istrs;
    }

    pub fn add_metadata(&mut self, sym: SymIndex, meta: SymMeta) {
        self.symtab[sym].meta.push(meta);
    }

    pub fn set_scope(&mut self, sym: SymIndex, scope: i32) {
        self.symtab[sym].scope = scope;
    }

    // ------------------------------------------------------------------
    // Code emission
    // ------------------------------------------------------------------

    /// Subsequent ops belong to `param`'s init expression.
    pub fn begin_init(&mut self, param: SymIndex) {
        assert!(
            self.maincodebegin < 0,
            "init code must precede the main body"
        );
        self.cur_method = self.symtab[param].name;
        self.symtab[param].initbegin = self.ops.len() as i32;
    }

    pub fn end_init(&mut self, param: SymIndex) {
        self.symtab[param].initend = self.ops.len() as i32;
        self.cur_method = Istr::EMPTY;
    }

    /// Subsequent ops belong to the main body.
    pub fn begin_main(&mut self) {
        self.cur_method = self.interner.intern(MAIN_METHOD);
        self.maincodebegin = self.ops.len() as i32;
    }

    /// Set the source position attached to subsequently emitted ops.
    pub fn source(&mut self, file: &str, line: i32) {
        self.cur_sourcefile = self.interner.intern(file);
        self.cur_sourceline = line;
    }

    /// Append an op. `rw` gives one access letter per argument
    /// (`r`/`w`/`W`/`-`). Returns the op's instruction number.
    pub fn emit(&mut self, opname: &str, opargs: &[SymIndex], rw: &str) -> usize {
        let opname = self.interner.intern(opname);
        let firstarg = self.args.len();
        self.args.extend_from_slice(opargs);
        let mut op = Opcode::new(opname, self.cur_method, firstarg, opargs.len());
        op.set_argrw(rw);
        op.set_source(self.cur_sourcefile, self.cur_sourceline);
        self.ops.push(op);
        self.ops.len() - 1
    }

    pub fn set_jumps(&mut self, opnum: usize, jumps: &[i32]) {
        self.ops[opnum].set_jumps(jumps);
    }

    pub fn mark_argderivs(&mut self, opnum: usize, arg: usize) {
        self.ops[opnum].mark_argderivs(arg);
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    // ------------------------------------------------------------------
    // The pass pipeline
    // ------------------------------------------------------------------

    fn resolve_opkinds(&mut self) {
        for op in &mut self.ops {
            let name = self.interner.resolve(op.opname);
            op.kind = OpKind::from_name(name);
            if op.kind.is_none() {
                let file = if op.sourcefile.is_empty() {
                    None
                } else {
                    Some(self.interner.resolve(op.sourcefile).to_string())
                };
                self.diags.error(
                    file.as_deref(),
                    op.sourceline,
                    format!("no implementation for op '{}'", name),
                );
            }
        }
    }

    /// Run the analysis passes and produce the shader, or collect errors.
    pub fn compile(mut self, options: &CompileOptions) -> CompileResult {
        if self.maincodebegin < 0 {
            self.diags.error(
                None,
                0,
                format!("shader '{}' has no main entry point", self.shadername),
            );
        } else {
            // Close the main body with an explicit end marker.
            let end = self.emit("end", &[], "");
            debug_assert!(end + 1 == self.ops.len());
        }
        let maincodeend = self.ops.len() as i32;

        self.resolve_opkinds();

        // Dependency analysis keys on symbol identity, so it must see the
        // IR before coalescing merges temporaries.
        track_variable_dependencies(&self.ops, &self.args, &mut self.symtab);

        let bblockids = find_basic_blocks(&self.ops);
        track_variable_lifetimes(&self.ops, &self.args, &mut self.symtab, Some(&bblockids));

        check_for_illegal_writes(
            &self.ops,
            &self.args,
            &self.symtab,
            &self.interner,
            &mut self.diags,
        );

        if options.coalesce_temporaries {
            coalesce_temporaries(&mut self.symtab);
            // Rewrite the arg array so the runtime never needs to dealias.
            for arg in &mut self.args {
                *arg = self.symtab.dealias(*arg);
            }
        }

        if self.diags.has_errors() {
            return CompileResult {
                shader: None,
                diagnostics: self.diags,
            };
        }

        let (fconsts, iconsts, sconsts) = self.place_constants();

        CompileResult {
            shader: Some(CompiledShader {
                shadertype: self.shadertype,
                shadername: self.shadername,
                symtab: self.symtab,
                ops: self.ops,
                args: self.args,
                interner: Arc::new(self.interner),
                maincodebegin: self.maincodebegin,
                maincodeend,
                fconsts,
                iconsts,
                sconsts,
            }),
            diagnostics: self.diags,
        }
    }

    /// Pack every Const symbol's values into per-base-type pools and point
    /// the symbols at their slots. Const data is thereby valid before any
    /// execution ever binds.
    fn place_constants(&mut self) -> (Vec<f32>, Vec<i32>, Vec<Istr>) {
        let mut fconsts = Vec::new();
        let mut iconsts = Vec::new();
        let mut sconsts = Vec::new();
        for sym in self.symtab.iter_mut() {
            if sym.kind != SymKind::Const {
                continue;
            }
            let offset = if !sym.fvals.is_empty() {
                let off = fconsts.len();
                fconsts.extend_from_slice(&sym.fvals);
                off
            } else if !sym.ivals.is_empty() {
                let off = iconsts.len();
                iconsts.extend_from_slice(&sym.ivals);
                off
            } else {
                let off = sconsts.len();
                sconsts.extend_from_slice(&sym.svals);
                off
            };
            sym.data = Some(DataRef::ConstPool { offset });
            sym.dataoffset = offset as i32;
        }
        (fconsts, iconsts, sconsts)
    }
}
