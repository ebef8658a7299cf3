//! Shader compilation: IR analysis passes and bytecode serialization.
//!
//! A [`CompileSession`] collects symbols and ops, then runs the pass
//! pipeline in dependency order:
//!
//! 1. resolve each op's implementation ([`session`])
//! 2. dependency analysis and derivative marking ([`deps`]) -- before
//!    coalescing, which would confuse its conservative map
//! 3. basic blocks and variable lifetimes ([`lifetimes`])
//! 4. write-legality checks ([`legality`])
//! 5. temporary coalescing ([`coalesce`]) and arg dealiasing
//!
//! Errors batch up in the diagnostics sink; a session with any recorded
//! error refuses to produce a shader. The result serializes to a text
//! bytecode form via [`oso`].

pub mod coalesce;
pub mod constants;
pub mod deps;
pub mod legality;
pub mod lifetimes;
pub mod oso;
pub mod session;

pub use coalesce::coalesce_temporaries;
pub use constants::ConstantPool;
pub use deps::track_variable_dependencies;
pub use legality::check_for_illegal_writes;
pub use lifetimes::{find_basic_blocks, track_variable_lifetimes};
pub use oso::{oso_string, write_oso};
pub use session::{CompileOptions, CompileResult, CompileSession, CompiledShader};
