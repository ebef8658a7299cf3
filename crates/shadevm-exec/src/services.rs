//! The renderer services contract.
//!
//! The interpreter pulls named transforms, scene attributes, and per-point
//! geometric user data from the embedding renderer through this trait.
//! Every method has a refusing default, so a renderer implements only what
//! it supports; lookup failures degrade to identity/zero fallbacks plus a
//! warning rather than aborting shading.

use shadevm_core::{Diagnostics, TypeDesc};

/// Row-major 4x4 transform.
pub type Matrix44 = [f32; 16];

pub const MATRIX_IDENTITY: Matrix44 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Renderer-side lookups the interpreter depends on.
pub trait RendererServices {
    /// The matrix taking the named space to common space at `time`.
    fn get_matrix(&self, _space: &str, _time: f32) -> Option<Matrix44> {
        None
    }

    /// The matrix taking common space to the named space at `time`.
    fn get_inverse_matrix(&self, _space: &str, _time: f32) -> Option<Matrix44> {
        None
    }

    /// Fetch a named scene or object attribute into `out`.
    fn get_attribute(&self, _object: Option<&str>, _name: &str, _out: &mut [f32]) -> bool {
        false
    }

    /// Does the geometry carry per-point user data under this name?
    fn has_userdata(&self, _name: &str, _ty: TypeDesc, _npoints: usize) -> bool {
        false
    }

    /// Fetch per-point user data, `npoints * ty.size()` floats into `out`.
    fn get_userdata(&self, _name: &str, _ty: TypeDesc, _npoints: usize, _out: &mut [f32]) -> bool {
        false
    }
}

/// A renderer that supplies nothing.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl RendererServices for NullRenderer {}

/// Named-space matrix with the identity fallback: shading must still
/// produce some image when a space is unknown.
pub fn matrix_or_identity(
    services: &dyn RendererServices,
    diags: &mut Diagnostics,
    space: &str,
    time: f32,
) -> Matrix44 {
    match services.get_matrix(space, time) {
        Some(m) => m,
        None => {
            diags.warning(
                None,
                0,
                format!("unknown transform space '{}', using identity", space),
            );
            MATRIX_IDENTITY
        }
    }
}
