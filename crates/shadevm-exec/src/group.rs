//! Shader networks.
//!
//! A [`ShaderGroup`] is an ordered list of layers (shader instances) plus
//! the connections between them. Execution is a single forward pass:
//! layers bind and run in index order, and a connection makes the
//! downstream symbol share the upstream symbol's heap storage, so values
//! flow without copying.

use shadevm_core::{ExecError, Runflag, ShaderUse, SymIndex, SymKind, equivalent};

use crate::context::ShadingContext;
use crate::exec::ShadingExecution;
use crate::instance::{Connection, ShaderInstance};

#[derive(Default)]
pub struct ShaderGroup {
    layers: Vec<ShaderInstance>,
}

impl ShaderGroup {
    pub fn new() -> Self {
        ShaderGroup::default()
    }

    /// Append a layer; later layers may connect to it by the returned index.
    pub fn add_layer(&mut self, instance: ShaderInstance) -> usize {
        self.layers.push(instance);
        self.layers.len() - 1
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, i: usize) -> &ShaderInstance {
        &self.layers[i]
    }

    pub fn layer_mut(&mut self, i: usize) -> &mut ShaderInstance {
        &mut self.layers[i]
    }

    fn symbol_in_layer(&self, layer: usize, name: &str) -> Result<SymIndex, ExecError> {
        let inst = &self.layers[layer];
        inst.find_symbol(name).ok_or_else(|| ExecError::UnknownSymbol {
            shader: inst.master().shadername.clone(),
            name: name.to_string(),
        })
    }

    /// Wire `src_layer.src_param` into `dst_layer.dst_param`. The source
    /// must be an earlier layer, both symbols must exist, the destination
    /// must be a parameter, and the types must be equivalent.
    pub fn connect(
        &mut self,
        src_layer: usize,
        src_param: &str,
        dst_layer: usize,
        dst_param: &str,
    ) -> Result<(), ExecError> {
        if src_layer >= dst_layer || dst_layer >= self.layers.len() {
            return Err(ExecError::BadConnectionLayer { layer: src_layer });
        }
        let src_symbol = self.symbol_in_layer(src_layer, src_param)?;
        let dst_symbol = self.symbol_in_layer(dst_layer, dst_param)?;

        let src = &self.layers[src_layer].symbols()[src_symbol];
        let dst = &self.layers[dst_layer].symbols()[dst_symbol];
        if !dst.is_param() || src.kind == SymKind::Global || !equivalent(&src.typespec, &dst.typespec)
        {
            return Err(ExecError::UnknownSymbol {
                shader: self.layers[dst_layer].master().shadername.clone(),
                name: dst_param.to_string(),
            });
        }

        self.layers[dst_layer].push_connection(Connection {
            src_layer,
            src_symbol,
            dst_symbol,
        });
        Ok(())
    }

    /// Bind and run every layer over the context's current batch, in
    /// order. Returns the executions so callers can harvest outputs.
    pub fn execute(
        &self,
        ctx: &mut ShadingContext,
        use_: ShaderUse,
        runflags: Option<&[Runflag]>,
    ) -> Vec<ShadingExecution> {
        let mut execs: Vec<ShadingExecution> =
            (0..self.layers.len()).map(|_| ShadingExecution::new()).collect();
        for i in 0..self.layers.len() {
            let (upstream, current) = execs.split_at_mut(i);
            let exec = &mut current[0];
            exec.bind(ctx, use_, i, &self.layers[i], upstream);
            exec.run(ctx, runflags);
        }
        execs
    }
}
