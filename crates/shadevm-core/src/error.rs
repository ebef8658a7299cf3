//! Phase error types.
//!
//! Two classes of failure exist, mirroring the split in the diagnostics
//! design: *diagnosable compiler errors* accumulate in a
//! [`Diagnostics`](crate::Diagnostics) sink and surface as a single
//! [`CompileError`] once the pipeline finishes, and *recoverable runtime
//! requests* (instance parameter overrides, connection wiring) report an
//! [`ExecError`]. Runtime invariant violations -- double binds, consts
//! without data, unsupported coercions -- are contract breaches between
//! compiler and runtime and terminate via panics instead of flowing
//! through these types.

use thiserror::Error;

/// Errors from a compile session.
#[derive(Debug, Error)]
pub enum CompileError {
    /// One or more diagnosable errors were recorded; the batched messages
    /// live in the session's diagnostics sink.
    #[error("compilation failed with {count} error(s)")]
    ErrorsReported { count: usize },

    /// The shader has no main code section.
    #[error("shader '{shader}' has no main entry point")]
    MissingEntryPoint { shader: String },

    #[error("failed to write bytecode: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from runtime requests made against instances and networks.
#[derive(Debug, Error, PartialEq)]
pub enum ExecError {
    #[error("shader '{shader}' has no parameter '{name}'")]
    UnknownParameter { shader: String, name: String },

    #[error("parameter '{name}' expects {expected} value(s) of its base type, got {got}")]
    ParamValueMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("no symbol named '{name}' in shader '{shader}'")]
    UnknownSymbol { shader: String, name: String },

    #[error("connection source layer {layer} does not precede the destination layer")]
    BadConnectionLayer { layer: usize },
}
