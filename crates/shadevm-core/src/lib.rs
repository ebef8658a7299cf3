//! Shading VM intermediate representation.
//!
//! This crate holds the IR shared by the compiler and the runtime:
//!
//! - [`types`]: type descriptors ([`TypeDesc`], [`TypeSpec`]) with the
//!   equivalence/assignability rules the passes and the binder rely on
//! - [`symbol`]: symbol records and the arena [`SymbolTable`] with
//!   index-based aliasing
//! - [`opcode`]: IR instructions with argument slices, jump targets, and
//!   per-argument access masks
//! - [`interner`]: the explicit string interner (no global string table)
//! - [`diagnostics`]: the batched error/warning sink shared by all phases
//! - [`error`]: phase error enums

pub mod diagnostics;
pub mod error;
pub mod interner;
pub mod opcode;
pub mod symbol;
pub mod types;

pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{CompileError, ExecError};
pub use interner::{Interner, Istr};
pub use opcode::{ArgAccess, OpKind, Opcode};
pub use symbol::{DataRef, SymIndex, SymKind, SymMeta, Symbol, SymbolTable, ValueSource};
pub use types::{
    Aggregate, BaseType, ShaderType, ShaderUse, TypeDesc, TypeSpec, VecSemantics, assignable,
    equivalent,
};

/// Per-point execution flag: zero means the point is off.
pub type Runflag = u8;

/// Runflag value for an inactive point.
pub const RUNFLAG_OFF: Runflag = 0;
/// Runflag value for an active point.
pub const RUNFLAG_ON: Runflag = 255;

/// Method name for the shader's main body code section.
pub const MAIN_METHOD: &str = "___main___";
