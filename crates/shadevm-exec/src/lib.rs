//! Batch interpreter for compiled shaders.
//!
//! The runtime shades many points at once. A [`ShadingContext`] owns the
//! typed heap and per-batch state; a [`ShaderInstance`] pairs a compiled
//! master with parameter overrides; a [`ShaderGroup`] wires instances into
//! a network; and a [`ShadingExecution`] binds one instance to a context
//! and interprets its ops under predication runflags.
//!
//! Renderer integration goes through [`RendererServices`]: transforms,
//! attributes, and geometric user data. Lookups that fail degrade to
//! identity or zero with a warning; broken invariants inside the VM panic.

pub mod context;
pub mod exec;
pub mod globals;
pub mod group;
pub mod heap;
pub mod instance;
mod ops;
pub mod services;

pub use context::{GlobalSlot, ShadingContext};
pub use exec::{Runstate, ShadingExecution, new_runflag_range};
pub use globals::{GlobalArray, ShaderGlobals};
pub use group::ShaderGroup;
pub use heap::Heap;
pub use instance::{Connection, ShaderInstance};
pub use services::{MATRIX_IDENTITY, Matrix44, NullRenderer, RendererServices, matrix_or_identity};
