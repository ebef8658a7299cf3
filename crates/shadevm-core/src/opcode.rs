//! IR instructions.
//!
//! An [`Opcode`] names an operation, the method (init block or main body)
//! it belongs to, and a contiguous slice into the shader's single flat
//! argument array. Control-flow ops carry up to four jump targets. Each op
//! records, per argument, whether the op reads it, writes it, and whether
//! it takes derivatives of it.

use bitflags::bitflags;

use crate::interner::Istr;

bitflags! {
    /// How an op touches one of its arguments.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ArgAccess: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        /// The op takes x/y derivatives of this argument.
        const DERIVS = 0b100;
    }
}

impl ArgAccess {
    /// One-letter encoding used in the serialized `%argrw` hint:
    /// `r` read, `w` written, `W` both, `-` neither.
    pub fn rw_letter(self) -> char {
        match (self.contains(ArgAccess::READ), self.contains(ArgAccess::WRITE)) {
            (true, true) => 'W',
            (false, true) => 'w',
            (true, false) => 'r',
            (false, false) => '-',
        }
    }

    fn from_rw_letter(c: char) -> ArgAccess {
        match c {
            'W' => ArgAccess::READ | ArgAccess::WRITE,
            'w' => ArgAccess::WRITE,
            'r' => ArgAccess::READ,
            '-' => ArgAccess::empty(),
            _ => panic!("bad argrw letter '{}'", c),
        }
    }
}

/// The native implementation bound to an opcode: a closed set of
/// operations, dispatched by `match` rather than through raw function
/// pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Nop,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Transform,
    If,
    For,
    While,
    DoWhile,
    End,
}

impl OpKind {
    pub fn from_name(name: &str) -> Option<OpKind> {
        Some(match name {
            "nop" => OpKind::Nop,
            "assign" => OpKind::Assign,
            "add" => OpKind::Add,
            "sub" => OpKind::Sub,
            "mul" => OpKind::Mul,
            "div" => OpKind::Div,
            "neg" => OpKind::Neg,
            "eq" => OpKind::Eq,
            "neq" => OpKind::Neq,
            "lt" => OpKind::Lt,
            "le" => OpKind::Le,
            "gt" => OpKind::Gt,
            "ge" => OpKind::Ge,
            "transform" => OpKind::Transform,
            "if" => OpKind::If,
            "for" => OpKind::For,
            "while" => OpKind::While,
            "dowhile" => OpKind::DoWhile,
            "end" => OpKind::End,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Nop => "nop",
            OpKind::Assign => "assign",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Neg => "neg",
            OpKind::Eq => "eq",
            OpKind::Neq => "neq",
            OpKind::Lt => "lt",
            OpKind::Le => "le",
            OpKind::Gt => "gt",
            OpKind::Ge => "ge",
            OpKind::Transform => "transform",
            OpKind::If => "if",
            OpKind::For => "for",
            OpKind::While => "while",
            OpKind::DoWhile => "dowhile",
            OpKind::End => "end",
        }
    }

    /// Loop ops take a single control argument and carry loop jumps.
    pub fn is_loop(self) -> bool {
        matches!(self, OpKind::For | OpKind::While | OpKind::DoWhile)
    }

    /// Ops the interpreter handles itself by running sub-ranges under
    /// narrowed predicates.
    pub fn is_control(self) -> bool {
        self.is_loop() || self == OpKind::If
    }
}

/// One IR instruction.
#[derive(Debug, Clone)]
pub struct Opcode {
    /// Operation name.
    pub opname: Istr,
    /// Method (parameter init block or main body) this op belongs to.
    pub method: Istr,
    /// Start of this op's slice in the flat argument array.
    pub firstarg: usize,
    /// Number of arguments.
    pub nargs: usize,
    /// Source file of the code that generated this op.
    pub sourcefile: Istr,
    /// Source line of the code that generated this op.
    pub sourceline: i32,
    /// Bound implementation; None until the compiler resolves it.
    pub kind: Option<OpKind>,

    jump: [i32; Opcode::MAX_JUMPS],
    access: Vec<ArgAccess>,
}

impl Opcode {
    /// Maximum jump targets an op can have.
    pub const MAX_JUMPS: usize = 4;

    pub fn new(opname: Istr, method: Istr, firstarg: usize, nargs: usize) -> Self {
        Opcode {
            opname,
            method,
            firstarg,
            nargs,
            sourcefile: Istr::EMPTY,
            sourceline: 0,
            kind: None,
            jump: [-1; Opcode::MAX_JUMPS],
            access: vec![ArgAccess::empty(); nargs],
        }
    }

    pub fn set_source(&mut self, file: Istr, line: i32) {
        self.sourcefile = file;
        self.sourceline = line;
    }

    /// The i'th jump target address (-1 for none).
    pub fn jump(&self, i: usize) -> i32 {
        self.jump[i]
    }

    pub fn set_jumps(&mut self, jumps: &[i32]) {
        assert!(jumps.len() <= Opcode::MAX_JUMPS);
        self.jump = [-1; Opcode::MAX_JUMPS];
        self.jump[..jumps.len()].copy_from_slice(jumps);
    }

    /// Fill the next empty jump slot.
    pub fn add_jump(&mut self, target: i32) {
        for j in self.jump.iter_mut() {
            if *j < 0 {
                *j = target;
                return;
            }
        }
    }

    /// The farthest jump target of this op (-1 if it has none).
    pub fn farthest_jump(&self) -> i32 {
        self.jump.iter().copied().max().unwrap_or(-1)
    }

    pub fn has_jumps(&self) -> bool {
        self.jump[0] >= 0
    }

    /// Set the per-argument access from an `%argrw`-style string, one
    /// letter per argument (`r`, `w`, `W`, `-`).
    pub fn set_argrw(&mut self, rw: &str) {
        assert_eq!(rw.len(), self.nargs, "argrw length must match nargs");
        self.access = rw.chars().map(ArgAccess::from_rw_letter).collect();
    }

    pub fn argread(&self, arg: usize) -> bool {
        self.access[arg].contains(ArgAccess::READ)
    }

    pub fn argwrite(&self, arg: usize) -> bool {
        self.access[arg].contains(ArgAccess::WRITE)
    }

    pub fn argtakesderivs(&self, arg: usize) -> bool {
        self.access[arg].contains(ArgAccess::DERIVS)
    }

    /// Mark that the op takes derivatives of argument `arg`.
    pub fn mark_argderivs(&mut self, arg: usize) {
        self.access[arg] |= ArgAccess::DERIVS;
    }

    /// Does the op take derivatives of any argument?
    pub fn takes_derivs(&self) -> bool {
        self.access.iter().any(|a| a.contains(ArgAccess::DERIVS))
    }

    pub fn argaccess(&self, arg: usize) -> ArgAccess {
        self.access[arg]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Interner;

    fn op(nargs: usize) -> Opcode {
        let mut interner = Interner::new();
        let name = interner.intern("add");
        let method = interner.intern("___main___");
        Opcode::new(name, method, 0, nargs)
    }

    #[test]
    fn jumps_default_to_none() {
        let o = op(0);
        assert_eq!(o.jump(0), -1);
        assert_eq!(o.farthest_jump(), -1);
        assert!(!o.has_jumps());
    }

    #[test]
    fn add_jump_fills_slots_in_order() {
        let mut o = op(0);
        o.add_jump(4);
        o.add_jump(9);
        assert_eq!(o.jump(0), 4);
        assert_eq!(o.jump(1), 9);
        assert_eq!(o.farthest_jump(), 9);
    }

    #[test]
    fn argrw_round_trip() {
        let mut o = op(3);
        o.set_argrw("Wrr");
        assert!(o.argwrite(0) && o.argread(0));
        assert!(o.argread(1) && !o.argwrite(1));
        assert_eq!(o.argaccess(0).rw_letter(), 'W');
        assert_eq!(o.argaccess(2).rw_letter(), 'r');
    }

    #[test]
    fn argderivs_marking() {
        let mut o = op(2);
        o.set_argrw("wr");
        assert!(!o.takes_derivs());
        o.mark_argderivs(1);
        assert!(o.takes_derivs());
        assert!(o.argtakesderivs(1));
        assert!(!o.argtakesderivs(0));
        // Deriv marking must not disturb the rw letters.
        assert_eq!(o.argaccess(1).rw_letter(), 'r');
    }

    #[test]
    fn opkind_name_round_trip() {
        for name in [
            "nop", "assign", "add", "sub", "mul", "div", "neg", "eq", "neq", "lt", "le", "gt",
            "ge", "transform", "if", "for", "while", "dowhile", "end",
        ] {
            let kind = OpKind::from_name(name).unwrap();
            assert_eq!(kind.name(), name);
        }
        assert_eq!(OpKind::from_name("noise"), None);
    }

    #[test]
    fn control_classification() {
        assert!(OpKind::If.is_control());
        assert!(OpKind::For.is_loop());
        assert!(!OpKind::Add.is_control());
        assert!(!OpKind::If.is_loop());
    }
}
