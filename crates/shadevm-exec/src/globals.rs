//! Renderer-supplied per-point globals.
//!
//! The renderer stages one array per global name (P, N, u, v, time, ...)
//! before a batch runs; binding copies the staged data into the context
//! heap, packing optional x/y derivative arrays into the (value, dx, dy)
//! layout the interpreter expects. An array may be uniform (one value for
//! the whole batch) or varying (one value per point).

use rustc_hash::FxHashMap;

/// One staged global: `elems` scalar elements per value.
#[derive(Debug, Clone)]
pub struct GlobalArray {
    pub elems: usize,
    pub uniform: bool,
    /// `elems` values if uniform, `npoints * elems` if varying.
    pub values: Vec<f32>,
    /// Optional screen-space derivative arrays, same shape as `values`.
    pub dx: Option<Vec<f32>>,
    pub dy: Option<Vec<f32>>,
}

impl GlobalArray {
    pub fn has_derivs(&self) -> bool {
        self.dx.is_some() && self.dy.is_some()
    }
}

/// Everything the renderer supplies about the current point batch.
#[derive(Debug, Default)]
pub struct ShaderGlobals {
    npoints: usize,
    arrays: FxHashMap<String, GlobalArray>,
}

impl ShaderGlobals {
    pub fn new(npoints: usize) -> Self {
        ShaderGlobals {
            npoints,
            arrays: FxHashMap::default(),
        }
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// Stage a varying global with `elems` scalar elements per point.
    pub fn set(&mut self, name: &str, elems: usize, values: &[f32]) {
        assert_eq!(
            values.len(),
            self.npoints * elems,
            "varying global '{}' must supply npoints * elems values",
            name
        );
        self.arrays.insert(
            name.to_string(),
            GlobalArray {
                elems,
                uniform: false,
                values: values.to_vec(),
                dx: None,
                dy: None,
            },
        );
    }

    /// Stage a uniform global: one value shared by the whole batch.
    pub fn set_uniform(&mut self, name: &str, values: &[f32]) {
        self.arrays.insert(
            name.to_string(),
            GlobalArray {
                elems: values.len(),
                uniform: true,
                values: values.to_vec(),
                dx: None,
                dy: None,
            },
        );
    }

    /// Attach x/y derivative arrays to an already staged varying global.
    pub fn set_derivs(&mut self, name: &str, dx: &[f32], dy: &[f32]) {
        let g = self
            .arrays
            .get_mut(name)
            .unwrap_or_else(|| panic!("no staged global '{}' to attach derivatives to", name));
        assert!(!g.uniform, "uniform globals carry no derivatives");
        assert_eq!(dx.len(), g.values.len());
        assert_eq!(dy.len(), g.values.len());
        g.dx = Some(dx.to_vec());
        g.dy = Some(dy.to_vec());
    }

    pub fn get(&self, name: &str) -> Option<&GlobalArray> {
        self.arrays.get(name)
    }
}
