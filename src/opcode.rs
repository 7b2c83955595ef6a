//! # Opcode Module
//!
//! Stack-machine instruction set emitted by the compiler. Instructions are
//! Rust enums so the compiler can track their stack effect exactly; the
//! textual mnemonic only exists at render time via [`std::fmt::Display`].
//!
//! ## Design Notes
//! - Every instruction reports `(pops, pushes)` through [`Instruction::stack_effect`].
//! - Branch targets are segment names, never offsets.
//! - Local and argument slots use the short encodings (`ldloc.0`,
//!   `stloc.s 7`) whenever the index allows it.

use std::fmt;

// -----------------------------------------------------------------------------
// INSTRUCTION SET
// -----------------------------------------------------------------------------

/// Numeric conversion targets for `conv.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKind {
    I4,
    I8,
    R4,
    R8,
}

impl ConvKind {
    fn mnemonic(self) -> &'static str {
        match self {
            ConvKind::I4 => "conv.i4",
            ConvKind::I8 => "conv.i8",
            ConvKind::R4 => "conv.r4",
            ConvKind::R8 => "conv.r8",
        }
    }
}

/// Element types for `ldind.*`/`stind.*` through a managed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    I4,
    I8,
    R4,
    R8,
    Ref,
}

impl ElementKind {
    fn suffix(self) -> &'static str {
        match self {
            ElementKind::I4 => "i4",
            ElementKind::I8 => "i8",
            ElementKind::R4 => "r4",
            ElementKind::R8 => "r8",
            ElementKind::Ref => "ref",
        }
    }
}

/// A single stack-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // -- Constants --
    LdcI4(i32),
    LdcI8(i64),
    LdcR4(f32),
    LdcR8(f64),
    Ldstr(String),

    // -- Locals, Arguments & Fields --
    Ldloc(u16),
    Stloc(u16),
    /// Address of a local, for by-reference arguments.
    Ldloca(u16),
    Ldarg(u16),
    /// Loads a static field; operand is the full field reference.
    Ldsfld(String),
    /// Pops the receiver, pushes the instance field.
    Ldfld(String),
    Stsfld(String),
    /// Pops value and receiver.
    Stfld(String),
    /// Pops an address, pushes the value behind it.
    Ldind(ElementKind),
    /// Pops value and address.
    Stind(ElementKind),

    // -- Stack --
    Pop,

    // -- Arithmetic & Logic --
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Xor,
    And,
    Or,
    Neg,
    Conv(ConvKind),

    // -- Comparison --
    Ceq,
    Cgt,
    CgtUn,
    Clt,

    // -- Calls --
    /// `target` is the full signature text, e.g.
    /// `int32 Program.A::get(int32)`.
    Call {
        target: String,
        pops: usize,
        pushes: usize,
    },
    /// Constructor call on an existing receiver (`call instance void ...::.ctor()`).
    CallBaseCtor,

    // -- Control Flow --
    Br(String),
    Brtrue(String),
    Brfalse(String),
    /// `value` records whether a return value is popped.
    Ret { value: bool },
}

impl Instruction {
    /// Returns `(pops, pushes)` for this instruction.
    pub fn stack_effect(&self) -> (usize, usize) {
        use Instruction::*;
        match self {
            LdcI4(_) | LdcI8(_) | LdcR4(_) | LdcR8(_) | Ldstr(_) => (0, 1),
            Ldloc(_) | Ldloca(_) | Ldarg(_) | Ldsfld(_) => (0, 1),
            Stloc(_) | Stsfld(_) => (1, 0),
            Ldfld(_) | Ldind(_) => (1, 1),
            Stfld(_) | Stind(_) => (2, 0),
            Pop => (1, 0),
            Add | Sub | Mul | Div | Rem | Xor | And | Or => (2, 1),
            Ceq | Cgt | CgtUn | Clt => (2, 1),
            Neg | Conv(_) => (1, 1),
            Call { pops, pushes, .. } => (*pops, *pushes),
            CallBaseCtor => (1, 0),
            Br(_) => (0, 0),
            Brtrue(_) | Brfalse(_) => (1, 0),
            Ret { value } => (usize::from(*value), 0),
        }
    }

    /// Returns `true` if control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Br(_) | Instruction::Ret { .. })
    }

    /// Branch target, if this instruction jumps.
    pub fn branch_target(&self) -> Option<&str> {
        match self {
            Instruction::Br(label) | Instruction::Brtrue(label) | Instruction::Brfalse(label) => {
                Some(label)
            }
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// RENDERING
// -----------------------------------------------------------------------------

/// Writes `base.N` for small slots, `base.s N` below 256, else `base N`.
fn write_slot(f: &mut fmt::Formatter<'_>, base: &str, slot: u16, short_max: u16) -> fmt::Result {
    if slot <= short_max {
        write!(f, "{}.{}", base, slot)
    } else if slot < 256 {
        write!(f, "{}.s {}", base, slot)
    } else {
        write!(f, "{} {}", base, slot)
    }
}

/// Floats always carry a decimal point so the assembler reads them as
/// floating-point immediates.
fn format_float(value: f64) -> String {
    let text = format!("{:?}", value);
    if let Some((mantissa, exponent)) = text.split_once('e') {
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        format!("{}E{}", mantissa, exponent)
    } else if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Escapes a string literal for an `ldstr` operand.
fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c if c.is_control() => out.push_str(&format!("\\{:03o}", u32::from(c))),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            LdcI4(value) => match value {
                -1 => write!(f, "ldc.i4.m1"),
                0..=8 => write!(f, "ldc.i4.{}", value),
                -128..=127 => write!(f, "ldc.i4.s {}", value),
                _ => write!(f, "ldc.i4 {}", value),
            },
            LdcI8(value) => write!(f, "ldc.i8 {}", value),
            LdcR4(value) => write!(f, "ldc.r4 {}", format_float(f64::from(*value))),
            LdcR8(value) => write!(f, "ldc.r8 {}", format_float(*value)),
            Ldstr(value) => write!(f, "ldstr \"{}\"", escape_string(value)),

            Ldloc(slot) => write_slot(f, "ldloc", *slot, 3),
            Stloc(slot) => write_slot(f, "stloc", *slot, 3),
            Ldarg(slot) => write_slot(f, "ldarg", *slot, 3),
            Ldloca(slot) if *slot < 256 => write!(f, "ldloca.s {}", slot),
            Ldloca(slot) => write!(f, "ldloca {}", slot),
            Ldsfld(field) => write!(f, "ldsfld {}", field),
            Ldfld(field) => write!(f, "ldfld {}", field),
            Stsfld(field) => write!(f, "stsfld {}", field),
            Stfld(field) => write!(f, "stfld {}", field),
            Ldind(kind) => write!(f, "ldind.{}", kind.suffix()),
            Stind(kind) => write!(f, "stind.{}", kind.suffix()),

            Pop => write!(f, "pop"),
            Add => write!(f, "add"),
            Sub => write!(f, "sub"),
            Mul => write!(f, "mul"),
            Div => write!(f, "div"),
            Rem => write!(f, "rem"),
            Xor => write!(f, "xor"),
            And => write!(f, "and"),
            Or => write!(f, "or"),
            Neg => write!(f, "neg"),
            Conv(kind) => write!(f, "{}", kind.mnemonic()),
            Ceq => write!(f, "ceq"),
            Cgt => write!(f, "cgt"),
            CgtUn => write!(f, "cgt.un"),
            Clt => write!(f, "clt"),

            Call { target, .. } => write!(f, "call {}", target),
            CallBaseCtor => write!(f, "call instance void [mscorlib]System.Object::.ctor()"),

            Br(label) => write!(f, "br {}", label),
            Brtrue(label) => write!(f, "brtrue {}", label),
            Brfalse(label) => write!(f, "brfalse {}", label),
            Ret { .. } => write!(f, "ret"),
        }
    }
}

// -----------------------------------------------------------------------------
// SEGMENT
// -----------------------------------------------------------------------------

/// A named, linearly emitted block of instructions inside one method.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    /// Returns `true` once the last instruction is a `br` or `ret`.
    pub fn is_terminated(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(Instruction::is_terminator)
    }
}
