//! Write-legality checking.
//!
//! Constants can never be written. A (non-output) parameter may only be
//! written while the current instruction index lies inside that symbol's
//! own init-code range; outside it, parameters are immutable. Violations
//! are batched through the diagnostics sink so one pass reports them all.

use shadevm_core::{Diagnostics, Interner, Opcode, SymIndex, SymKind, Symbol, SymbolTable};

fn check_write_legality(
    op: &Opcode,
    opnum: i32,
    sym: &Symbol,
    interner: &Interner,
    diags: &mut Diagnostics,
) {
    let file = if op.sourcefile.is_empty() {
        None
    } else {
        Some(interner.resolve(op.sourcefile))
    };

    if sym.kind == SymKind::Const {
        diags.error(
            file,
            op.sourceline,
            format!(
                "attempted to write to constant '{}'",
                interner.resolve(sym.name)
            ),
        );
    }

    if sym.kind == SymKind::Param && (opnum < sym.initbegin || opnum >= sym.initend) {
        diags.error(
            file,
            op.sourceline,
            format!(
                "cannot write to non-output parameter '{}'",
                interner.resolve(sym.name)
            ),
        );
    }
}

/// For each op, make sure any arguments it writes are legal targets.
pub fn check_for_illegal_writes(
    ops: &[Opcode],
    args: &[SymIndex],
    symtab: &SymbolTable,
    interner: &Interner,
    diags: &mut Diagnostics,
) {
    for (opnum, op) in ops.iter().enumerate() {
        for a in 0..op.nargs {
            if op.argwrite(a) {
                let s = symtab.dealias(args[op.firstarg + a]);
                check_write_legality(op, opnum as i32, &symtab[s], interner, diags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CompileOptions, CompileSession};
    use shadevm_core::{ShaderType, TypeSpec};

    #[test]
    fn const_write_rejected() {
        let mut s = CompileSession::new(ShaderType::Surface, "t");
        let c = s.const_float(1.0);
        let x = s.local("x", TypeSpec::float());
        s.begin_main();
        s.emit("assign", &[c, x], "wr");
        let result = s.compile(&CompileOptions::default());
        assert!(result.shader.is_none());
        assert!(
            result
                .diagnostics
                .errors()
                .any(|d| d.message.contains("constant"))
        );
    }

    #[test]
    fn param_write_outside_init_rejected() {
        let mut s = CompileSession::new(ShaderType::Surface, "t");
        let p = s.param("gain", TypeSpec::float());
        s.default_floats(p, &[1.0]);
        let c = s.const_float(2.0);
        s.begin_main();
        s.emit("assign", &[p, c], "wr");
        let result = s.compile(&CompileOptions::default());
        assert!(result.shader.is_none());
        assert!(
            result
                .diagnostics
                .errors()
                .any(|d| d.message.contains("non-output parameter"))
        );
    }

    #[test]
    fn param_write_inside_own_init_accepted() {
        let mut s = CompileSession::new(ShaderType::Surface, "t");
        let p = s.param("gain", TypeSpec::float());
        let c = s.const_float(2.0);
        s.begin_init(p);
        s.emit("assign", &[p, c], "wr");
        s.end_init(p);
        s.begin_main();
        s.emit("nop", &[], "");
        let result = s.compile(&CompileOptions::default());
        assert!(result.is_success(), "{}", result.diagnostics);
    }

    #[test]
    fn output_param_write_accepted_anywhere() {
        let mut s = CompileSession::new(ShaderType::Surface, "t");
        let o = s.output_param("Cout", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        let c = s.const_float(2.0);
        s.begin_main();
        s.emit("assign", &[o, c], "wr");
        let result = s.compile(&CompileOptions::default());
        assert!(result.is_success(), "{}", result.diagnostics);
    }
}
