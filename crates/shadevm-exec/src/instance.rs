//! Shader instances and network connections.
//!
//! A [`ShaderInstance`] is one instantiation of a compiled shader: its
//! own copy of the master's symbol table (per-instance binding decisions
//! must not corrupt the shared master), packed literal parameter storage,
//! and the connections wiring earlier layers' outputs into its inputs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shadevm_compiler::CompiledShader;
use shadevm_core::{BaseType, ExecError, Istr, SymIndex, SymbolTable, ValueSource};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// One network wire: an earlier layer's symbol feeding a symbol of the
/// instance that owns the connection.
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub src_layer: usize,
    pub src_symbol: SymIndex,
    pub dst_symbol: SymIndex,
}

pub struct ShaderInstance {
    id: u64,
    master: Arc<CompiledShader>,
    layername: String,
    pub(crate) symbols: SymbolTable,
    pub(crate) fparams: Vec<f32>,
    pub(crate) iparams: Vec<i32>,
    pub(crate) sparams: Vec<String>,
    pub(crate) connections: Vec<Connection>,
}

impl ShaderInstance {
    /// Instantiate a master, packing every parameter's literal default
    /// into the instance's own param arrays.
    pub fn new(master: Arc<CompiledShader>, layername: &str) -> Self {
        let mut inst = ShaderInstance {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            symbols: master.symtab.clone(),
            master,
            layername: layername.to_string(),
            fparams: Vec::new(),
            iparams: Vec::new(),
            sparams: Vec::new(),
            connections: Vec::new(),
        };
        inst.pack_param_defaults();
        inst
    }

    fn pack_param_defaults(&mut self) {
        let master = self.master.clone();
        for i in self.symbols.indices() {
            let sym = &mut self.symbols[i];
            if !sym.is_param() || sym.typespec.is_closure() {
                continue;
            }
            let size = sym.size();
            match sym.typespec.simpletype().basetype {
                BaseType::Float => {
                    sym.dataoffset = self.fparams.len() as i32;
                    let mut vals = sym.fvals.clone();
                    vals.resize(size, 0.0);
                    self.fparams.extend_from_slice(&vals);
                }
                BaseType::Int => {
                    sym.dataoffset = self.iparams.len() as i32;
                    let mut vals = sym.ivals.clone();
                    vals.resize(size, 0);
                    self.iparams.extend_from_slice(&vals);
                }
                BaseType::String => {
                    sym.dataoffset = self.sparams.len() as i32;
                    let mut vals: Vec<String> = sym
                        .svals
                        .iter()
                        .map(|&s| master.interner.resolve(s).to_string())
                        .collect();
                    vals.resize(size, String::new());
                    self.sparams.extend(vals);
                }
                BaseType::None => {}
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn master(&self) -> &Arc<CompiledShader> {
        &self.master
    }

    pub fn layername(&self) -> &str {
        &self.layername
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn find_symbol(&self, name: &str) -> Option<SymIndex> {
        self.master.find_symbol(name)
    }

    fn param_index(&self, name: &str) -> Result<SymIndex, ExecError> {
        let unknown = || ExecError::UnknownParameter {
            shader: self.master.shadername.clone(),
            name: name.to_string(),
        };
        let idx = self.find_symbol(name).ok_or_else(unknown)?;
        if !self.symbols[idx].is_param() {
            return Err(unknown());
        }
        Ok(idx)
    }

    fn check_count(name: &str, expected: usize, got: usize) -> Result<(), ExecError> {
        if expected != got {
            return Err(ExecError::ParamValueMismatch {
                name: name.to_string(),
                expected,
                got,
            });
        }
        Ok(())
    }

    /// Override a float-based parameter's default.
    pub fn set_parameter_floats(&mut self, name: &str, values: &[f32]) -> Result<(), ExecError> {
        let idx = self.param_index(name)?;
        let sym = &mut self.symbols[idx];
        Self::check_count(name, sym.size(), values.len())?;
        let off = sym.dataoffset as usize;
        self.fparams[off..off + values.len()].copy_from_slice(values);
        sym.valuesource = ValueSource::InstanceSupplied;
        Ok(())
    }

    pub fn set_parameter_ints(&mut self, name: &str, values: &[i32]) -> Result<(), ExecError> {
        let idx = self.param_index(name)?;
        let sym = &mut self.symbols[idx];
        Self::check_count(name, sym.size(), values.len())?;
        let off = sym.dataoffset as usize;
        self.iparams[off..off + values.len()].copy_from_slice(values);
        sym.valuesource = ValueSource::InstanceSupplied;
        Ok(())
    }

    pub fn set_parameter_strings(&mut self, name: &str, values: &[&str]) -> Result<(), ExecError> {
        let idx = self.param_index(name)?;
        let sym = &mut self.symbols[idx];
        Self::check_count(name, sym.size(), values.len())?;
        let off = sym.dataoffset as usize;
        for (slot, v) in self.sparams[off..off + values.len()].iter_mut().zip(values) {
            *slot = v.to_string();
        }
        sym.valuesource = ValueSource::InstanceSupplied;
        Ok(())
    }

    pub(crate) fn push_connection(&mut self, conn: Connection) {
        self.connections.push(conn);
    }

    /// Master-interner string handle resolved to text.
    pub(crate) fn resolve(&self, s: Istr) -> &str {
        self.master.interner.resolve(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadevm_compiler::{CompileOptions, CompileSession};
    use shadevm_core::{ShaderType, TypeDesc, TypeSpec};

    fn master() -> Arc<CompiledShader> {
        let mut s = CompileSession::new(ShaderType::Surface, "inst");
        let gain = s.param("gain", TypeSpec::float());
        s.default_floats(gain, &[0.5]);
        let tint = s.param("tint", TypeSpec::simple(TypeDesc::COLOR));
        s.default_floats(tint, &[1.0, 1.0, 1.0]);
        let count = s.param("count", TypeSpec::int());
        s.default_ints(count, &[3]);
        let name = s.param("name", TypeSpec::string());
        s.default_strings(name, &["default"]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.emit("assign", &[o, gain], "wr");
        Arc::new(s.compile(&CompileOptions::default()).shader.unwrap())
    }

    #[test]
    fn defaults_are_packed_per_base_type() {
        let inst = ShaderInstance::new(master(), "layer0");
        assert_eq!(inst.fparams, vec![0.5, 1.0, 1.0, 1.0, 0.0]);
        assert_eq!(inst.iparams, vec![3]);
        assert_eq!(inst.sparams, vec!["default".to_string()]);
    }

    #[test]
    fn parameter_overrides() {
        let mut inst = ShaderInstance::new(master(), "layer0");
        inst.set_parameter_floats("gain", &[0.9]).unwrap();
        inst.set_parameter_floats("tint", &[1.0, 0.0, 0.0]).unwrap();
        inst.set_parameter_ints("count", &[7]).unwrap();
        inst.set_parameter_strings("name", &["override"]).unwrap();
        assert_eq!(inst.fparams[0], 0.9);
        assert_eq!(&inst.fparams[1..4], &[1.0, 0.0, 0.0]);
        assert_eq!(inst.iparams[0], 7);
        assert_eq!(inst.sparams[0], "override");
        let gain = inst.find_symbol("gain").unwrap();
        assert_eq!(
            inst.symbols[gain].valuesource,
            ValueSource::InstanceSupplied
        );
    }

    #[test]
    fn unknown_and_mismatched_parameters() {
        let mut inst = ShaderInstance::new(master(), "layer0");
        assert!(matches!(
            inst.set_parameter_floats("nope", &[1.0]),
            Err(ExecError::UnknownParameter { .. })
        ));
        assert!(matches!(
            inst.set_parameter_floats("tint", &[1.0]),
            Err(ExecError::ParamValueMismatch {
                expected: 3,
                got: 1,
                ..
            })
        ));
    }

    #[test]
    fn instances_have_distinct_ids_and_fresh_symbols() {
        let m = master();
        let a = ShaderInstance::new(m.clone(), "a");
        let b = ShaderInstance::new(m.clone(), "b");
        assert_ne!(a.id(), b.id());
        // Instance symbol edits never touch the master's table.
        let gain = m.find_symbol("gain").unwrap();
        assert_eq!(m.symtab[gain].valuesource, ValueSource::Default);
    }
}
