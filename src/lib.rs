//! A virtual machine for programmable shading: a typed intermediate
//! representation, a compiler back end that analyzes and serializes it,
//! and a predicated batch interpreter that runs shader networks over many
//! points at once.
//!
//! This crate is a facade over the workspace members:
//!
//! - [`core`]: symbols, opcodes, types, diagnostics, string interning.
//! - [`compiler`]: the [`CompileSession`] builder, the analysis passes
//!   (write legality, lifetimes, dependencies, temporary coalescing), and
//!   the text serializer for compiled shaders.
//! - [`exec`]: shading contexts, shader instances and groups, and the
//!   [`ShadingExecution`] interpreter.
//!
//! ```no_run
//! use shadevm::{CompileOptions, CompileSession, ShaderInstance, ShaderType,
//!     ShaderUse, ShadingContext, ShadingExecution, TypeSpec};
//! use std::sync::Arc;
//!
//! let mut s = CompileSession::new(ShaderType::Surface, "brighten");
//! let u = s.global("u", TypeSpec::float());
//! let o = s.output_param("o", TypeSpec::float());
//! s.default_floats(o, &[0.0]);
//! s.begin_main();
//! s.emit("add", &[o, u, u], "wrr");
//! let master = Arc::new(s.compile(&CompileOptions::default()).into_shader()?);
//!
//! let mut ctx = ShadingContext::new();
//! ctx.reset(16);
//! let inst = ShaderInstance::new(master, "layer0");
//! let mut exec = ShadingExecution::new();
//! exec.bind(&mut ctx, ShaderUse::Surface, 0, &inst, &[]);
//! exec.run(&mut ctx, None);
//! # Ok::<(), shadevm::CompileError>(())
//! ```

pub use shadevm_compiler as compiler;
pub use shadevm_core as core;
pub use shadevm_exec as exec;

pub use shadevm_core::{
    BaseType, CompileError, DataRef, Diagnostic, DiagnosticKind, Diagnostics, ExecError, Interner,
    Istr, MAIN_METHOD, OpKind, Opcode, RUNFLAG_OFF, RUNFLAG_ON, Runflag, ShaderType, ShaderUse,
    SymIndex, SymKind, Symbol, SymbolTable, TypeDesc, TypeSpec, ValueSource,
};

pub use shadevm_compiler::{
    CompileOptions, CompileResult, CompileSession, CompiledShader, oso_string, write_oso,
};

pub use shadevm_exec::{
    NullRenderer, RendererServices, ShaderGlobals, ShaderGroup, ShaderInstance, ShadingContext,
    ShadingExecution,
};
