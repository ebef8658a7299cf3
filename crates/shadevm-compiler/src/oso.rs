//! Bytecode text serialization.
//!
//! The serialized form is line oriented: a version header, the shader
//! type and name, one line per interesting symbol (params first, then any
//! used locals/globals/temps/constants), then `code <method>` sections
//! with one tab-indented line per op. Symbol and op hints (`%read`,
//! `%write`, `%derivs`, `%argrw`, ...) carry everything the analyses
//! computed, so a reader can reconstruct the compiled state without
//! re-running the passes.

use std::fmt::Write as _;
use std::io::{self, Write};

use shadevm_core::{Istr, Opcode, SymKind, Symbol};

use crate::session::CompiledShader;

const OSO_VERSION_MAJOR: i32 = 1;
const OSO_VERSION_MINOR: i32 = 0;

/// Serialize a compiled shader to its text bytecode form.
pub fn write_oso(shader: &CompiledShader, out: &mut dyn Write) -> io::Result<()> {
    out.write_all(oso_string(shader).as_bytes())
}

/// Serialize to an in-memory string.
pub fn oso_string(shader: &CompiledShader) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ShadeVM {}.{:02}", OSO_VERSION_MAJOR, OSO_VERSION_MINOR);
    let _ = writeln!(out, "# Compiled by shadevmc {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "{} {}", shader.shadertype.name(), shader.shadername);

    // Params first, so a reader can lay out the interface without
    // scanning the whole table.
    for sym in shader.symtab.iter() {
        if sym.is_param() {
            write_symbol(shader, sym, &mut out);
        }
    }
    for sym in shader.symtab.iter() {
        let interesting = matches!(
            sym.kind,
            SymKind::Local | SymKind::Temp | SymKind::Global | SymKind::Const
        );
        // Skip symbols that are never used (coalesced-away temps among
        // them).
        if interesting && sym.everused() {
            write_symbol(shader, sym, &mut out);
        }
    }

    write_code(shader, &mut out);
    out
}

fn hint_sep(out: &mut String, hints: &mut i32) {
    out.push(if *hints == 0 { '\t' } else { ' ' });
    *hints += 1;
}

fn write_symbol(shader: &CompiledShader, sym: &Symbol, out: &mut String) {
    let interner = &shader.interner;
    let _ = write!(
        out,
        "{}\t{}\t{}",
        sym.kind.shortname(),
        sym.typespec,
        sym.mangled(interner)
    );

    if sym.kind == SymKind::Const || sym.is_param() {
        out.push('\t');
        write_values(shader, sym, out);
        out.push('\t');
    }

    let mut hints = 0;

    for m in &sym.meta {
        hint_sep(out, &mut hints);
        let _ = write!(out, "%meta{{{},{},{}}}", m.ty, m.name, m.value);
    }

    hint_sep(out, &mut hints);
    let _ = write!(
        out,
        "%read{{{},{}}} %write{{{},{}}}",
        sym.firstread, sym.lastread, sym.firstwrite, sym.lastwrite
    );

    // Structure instances document their field layout; field symbols
    // link back to their structure.
    if sym.typespec.is_structure() && !sym.fields.is_empty() {
        let fieldlist: Vec<String> = sym
            .fields
            .iter()
            .map(|&f| shader.symtab[f].mangled(interner))
            .collect();
        hint_sep(out, &mut hints);
        let _ = write!(
            out,
            "%struct{{\"{}\"}} %structfields{{{}}} %structnfields{{{}}}",
            sym.mangled(interner),
            fieldlist.join(","),
            sym.fields.len()
        );
    }
    if sym.fieldid >= 0
        && let Some(owner) = sym.mystruct
    {
        hint_sep(out, &mut hints);
        let _ = write!(
            out,
            "%mystruct{{{}}} %mystructfield{{{}}}",
            shader.symtab[owner].mangled(interner),
            sym.fieldid
        );
    }

    if sym.has_derivs {
        hint_sep(out, &mut hints);
        out.push_str("%derivs");
    }
    if sym.is_param() && sym.has_init_ops() {
        hint_sep(out, &mut hints);
        out.push_str("%initexpr");
    }

    out.push('\n');
}

/// Literal values of a constant or a parameter default, space separated.
fn write_values(shader: &CompiledShader, sym: &Symbol, out: &mut String) {
    let mut vals: Vec<String> = Vec::new();
    for &f in &sym.fvals {
        vals.push(format_float(f));
    }
    for &i in &sym.ivals {
        vals.push(i.to_string());
    }
    for &s in &sym.svals {
        vals.push(quoted(shader.interner.resolve(s)));
    }
    out.push_str(&vals.join(" "));
}

fn write_code(shader: &CompiledShader, out: &mut String) {
    let interner = &shader.interner;
    let mut lastmethod = Istr::EMPTY;
    let mut lastfile = Istr::EMPTY;
    let mut lastline = -1;

    for op in &shader.ops {
        if op.method != lastmethod {
            let _ = writeln!(out, "code {}", interner.resolve(op.method));
            lastmethod = op.method;
            lastfile = Istr::EMPTY;
            lastline = -1;
        }

        let opname = interner.resolve(op.opname);
        let _ = write!(out, "\t{}", opname);
        if op.nargs > 0 {
            out.push_str(if opname.len() < 8 { "\t\t" } else { "\t" });
        }
        for &arg in shader.op_args(op) {
            let resolved = shader.symtab.dealias(arg);
            let _ = write!(out, "{} ", shader.symtab[resolved].mangled(interner));
        }
        for j in 0..Opcode::MAX_JUMPS {
            if op.jump(j) >= 0 {
                let _ = write!(out, "{} ", op.jump(j));
            }
        }

        let mut hints = 0;

        // Source position, only when it differs from the previous op.
        if !op.sourcefile.is_empty() {
            if op.sourcefile != lastfile {
                lastfile = op.sourcefile;
                hint_sep(out, &mut hints);
                let _ = write!(out, "%filename{{\"{}\"}}", interner.resolve(lastfile));
            }
            if op.sourceline != lastline {
                lastline = op.sourceline;
                hint_sep(out, &mut hints);
                let _ = write!(out, "%line{{{}}}", lastline);
            }
        }

        if op.nargs > 0 {
            hint_sep(out, &mut hints);
            out.push_str("%argrw{\"");
            for a in 0..op.nargs {
                out.push(op.argaccess(a).rw_letter());
            }
            out.push_str("\"}");
        }

        if op.takes_derivs() {
            hint_sep(out, &mut hints);
            let which: Vec<String> = (0..op.nargs)
                .filter(|&a| op.argtakesderivs(a))
                .map(|a| a.to_string())
                .collect();
            let _ = write!(out, "%argderivs{{{}}}", which.join(","));
        }

        out.push('\n');
    }
}

/// Shortest representation that round-trips the f32 exactly.
fn format_float(f: f32) -> String {
    if f == f.trunc() && f.abs() < 1.0e16 {
        format!("{:.0}", f)
    } else {
        format!("{}", f)
    }
}

fn quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CompileOptions, CompileSession};
    use shadevm_core::{ShaderType, TypeDesc, TypeSpec};

    fn add_shader() -> CompiledShader {
        let mut s = CompileSession::new(ShaderType::Surface, "addtest");
        let u = s.param("u", TypeSpec::float());
        s.default_floats(u, &[0.1]);
        let v = s.param("v", TypeSpec::float());
        s.default_floats(v, &[0.2]);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.source("addtest.sl", 4);
        s.emit("add", &[o, u, v], "wrr");
        s.compile(&CompileOptions::default()).shader.unwrap()
    }

    #[test]
    fn header_and_shader_line() {
        let text = oso_string(&add_shader());
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("ShadeVM 1.00"));
        assert!(lines.next().unwrap().starts_with("# Compiled by shadevmc"));
        assert_eq!(lines.next(), Some("surface addtest"));
    }

    #[test]
    fn params_come_first_with_defaults_and_rw_hints() {
        let text = oso_string(&add_shader());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[3], "param\tfloat\tu\t0.1\t\t%read{0,0} %write{-1,-1}");
        assert_eq!(lines[4], "param\tfloat\tv\t0.2\t\t%read{0,0} %write{-1,-1}");
        assert_eq!(lines[5], "oparam\tfloat\to\t0\t\t%read{-1,-1} %write{0,0}");
    }

    #[test]
    fn code_section_ops_and_hints() {
        let text = oso_string(&add_shader());
        assert!(text.contains("code ___main___\n"));
        assert!(
            text.contains("\tadd\t\to u v \t%filename{\"addtest.sl\"} %line{4} %argrw{\"wrr\"}\n")
        );
        // The closing end op carries no args and repeats no source hints.
        assert!(text.ends_with("\tend\n"));
    }

    #[test]
    fn coalesced_temps_are_resolved_in_args_and_omitted() {
        let mut s = CompileSession::new(ShaderType::Surface, "co");
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        let c = s.const_float(1.0);
        let t0 = s.temp(TypeSpec::float());
        let t1 = s.temp(TypeSpec::float());
        s.begin_main();
        s.emit("assign", &[t0, c], "wr");
        s.emit("assign", &[o, t0], "wr");
        s.emit("assign", &[t1, c], "wr");
        s.emit("assign", &[o, t1], "wr");
        let shader = s.compile(&CompileOptions::default()).shader.unwrap();
        let text = oso_string(&shader);
        // $tmp1 merged into $tmp0: it appears in no symbol line and no op.
        assert!(!text.contains("$tmp1"));
        assert!(text.contains("$tmp0"));
    }

    #[test]
    fn const_values_and_deriv_hints() {
        let mut s = CompileSession::new(ShaderType::Surface, "hints");
        let o = s.output_param("Cout", TypeSpec::simple(TypeDesc::COLOR));
        s.default_floats(o, &[0.0, 0.0, 0.0]);
        let c = s.const_floats(TypeDesc::COLOR, &[1.0, 0.25, 0.0]);
        let label = s.const_string("di\"ffuse");
        let t = s.temp(TypeSpec::string());
        s.begin_main();
        let d = s.emit("assign", &[o, c], "wr");
        s.mark_argderivs(d, 1);
        s.emit("assign", &[t, label], "wr");
        let shader = s.compile(&CompileOptions::default()).shader.unwrap();
        let text = oso_string(&shader);
        assert!(text.contains("const\tcolor\t$const0\t1 0.25 0\t\t%read"));
        assert!(text.contains("\"di\\\"ffuse\""));
        // The const read with derivatives taken carries the %derivs hint
        // and the op records which arg.
        assert!(text.contains("%argderivs{1}"));
        let cline = text.lines().find(|l| l.starts_with("const\tcolor")).unwrap();
        assert!(cline.contains("%derivs"));
    }

    #[test]
    fn init_expr_params_are_flagged() {
        let mut s = CompileSession::new(ShaderType::Surface, "ini");
        let p = s.param("warp", TypeSpec::float());
        let g = s.global("u", TypeSpec::float());
        s.begin_init(p);
        s.emit("assign", &[p, g], "wr");
        s.end_init(p);
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        s.begin_main();
        s.emit("assign", &[o, p], "wr");
        let shader = s.compile(&CompileOptions::default()).shader.unwrap();
        let text = oso_string(&shader);
        let pline = text.lines().find(|l| l.starts_with("param")).unwrap();
        assert!(pline.contains("%initexpr"));
        // The init block serializes as its own code section before main.
        let init_pos = text.find("code warp").unwrap();
        let main_pos = text.find("code ___main___").unwrap();
        assert!(init_pos < main_pos);
    }

    #[test]
    fn loop_jumps_are_listed_after_args() {
        let mut s = CompileSession::new(ShaderType::Surface, "lo");
        let o = s.output_param("o", TypeSpec::float());
        s.default_floats(o, &[0.0]);
        let cond = s.temp(TypeSpec::int());
        let one = s.const_int(1);
        s.begin_main();
        let w = s.emit("while", &[cond], "r");
        s.emit("assign", &[cond, one], "wr");
        s.emit("assign", &[o, o], "wr");
        s.emit("nop", &[], "");
        s.set_jumps(w, &[1, 2, 3, 4]);
        let shader = s
            .compile(&CompileOptions {
                coalesce_temporaries: false,
            })
            .shader
            .unwrap();
        let text = oso_string(&shader);
        assert!(text.contains("\twhile\t\t$tmp0 1 2 3 4 \t%argrw{\"r\"}"));
    }
}
