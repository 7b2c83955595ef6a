//! # Builtin Module
//!
//! Trait-based bootstrap of the built-in classes seeded into every
//! [`Registry`]. Each built-in implements [`BuiltinClass`] and lists its
//! operator methods as inline instruction templates; the compiler splices
//! a template at the use site instead of emitting a call.
//!
//! ## Provided Classes
//! - `i32`, `i64`, `f32`, `f64` — every dispatched [`Operation`] over
//!   `(self, self) -> self`.
//! - `string`, `void` — no operators. `none` is an alias of `void`.

use crate::error::Span;
use crate::opcode::Instruction;
use crate::types::{
    ClassId, FunctionBody, FunctionDescriptor, Operation, Registry, Signature, TypeRef,
    BUILTIN_NAMESPACE,
};

// -----------------------------------------------------------------------------
// BUILTIN CLASS TRAIT
// -----------------------------------------------------------------------------

/// A class that exists without being declared in source.
pub trait BuiltinClass {
    /// Name used in LIA source (e.g., `"i32"`).
    fn name(&self) -> &'static str;

    /// Name used in emitted assembly (e.g., `"int32"`).
    fn il_name(&self) -> &'static str;

    /// Inline body for `op`, or `None` if the class lacks it.
    fn operator(&self, op: Operation) -> Option<Vec<Instruction>>;

    /// Adds the class and its operator methods to `registry`.
    fn install(&self, registry: &mut Registry) -> ClassId {
        let id = registry.add_builtin(self.name(), self.il_name());
        let self_type = TypeRef::plain(id);

        for op in Operation::DISPATCHED {
            let (Some(key), Some(body)) = (op.method_key(), self.operator(op)) else {
                continue;
            };
            let params = ["a", "b"]
                .iter()
                .take(op.arity())
                .map(|name| (name.to_string(), self_type))
                .collect();
            let sig = Signature {
                namespace: BUILTIN_NAMESPACE.to_string(),
                class: self.name().to_string(),
                name: key.to_string(),
                is_static: true,
                is_public: true,
                is_operator: true,
                is_special: false,
                is_builtin: true,
                return_type: self_type,
                params,
            };
            let mut function = FunctionDescriptor::new(sig, Span::default());
            function.body = FunctionBody::Inline(body);

            let class = registry.class_mut(id);
            class.add_function(function);
            class.register_operator(key, key);
        }
        id
    }
}

// -----------------------------------------------------------------------------
// NUMERIC CLASSES
// -----------------------------------------------------------------------------

/// One of the four numeric primitives.
pub struct NumericClass {
    name: &'static str,
    il_name: &'static str,
    zero: Instruction,
}

impl NumericClass {
    pub fn i32() -> Self {
        Self {
            name: "i32",
            il_name: "int32",
            zero: Instruction::LdcI4(0),
        }
    }

    pub fn i64() -> Self {
        Self {
            name: "i64",
            il_name: "int64",
            zero: Instruction::LdcI8(0),
        }
    }

    pub fn f32() -> Self {
        Self {
            name: "f32",
            il_name: "float32",
            zero: Instruction::LdcR4(0.0),
        }
    }

    pub fn f64() -> Self {
        Self {
            name: "f64",
            il_name: "float64",
            zero: Instruction::LdcR8(0.0),
        }
    }
}

impl BuiltinClass for NumericClass {
    fn name(&self) -> &'static str {
        self.name
    }

    fn il_name(&self) -> &'static str {
        self.il_name
    }

    fn operator(&self, op: Operation) -> Option<Vec<Instruction>> {
        use Instruction::*;
        let body = match op {
            Operation::Add => vec![Add],
            Operation::Sub => vec![Sub],
            Operation::Mul => vec![Mul],
            Operation::Div => vec![Div],
            Operation::Rem => vec![Rem],
            Operation::Xor => vec![Xor],
            Operation::And => vec![And],
            Operation::Or => vec![Or],
            Operation::Equals => vec![Ceq],
            Operation::GreaterThan => vec![Cgt],
            Operation::LesserThan => vec![Clt],
            // a >= b  is  !(a < b)
            Operation::GreaterThanEquals => vec![Clt, LdcI4(0), Ceq],
            Operation::LesserThanEquals => vec![Cgt, LdcI4(0), Ceq],
            Operation::Not | Operation::IsFalse => vec![self.zero.clone(), Ceq],
            Operation::IsTrue => vec![self.zero.clone(), CgtUn],
            Operation::Cast => return None,
        };
        Some(body)
    }
}

// -----------------------------------------------------------------------------
// OPAQUE CLASSES
// -----------------------------------------------------------------------------

/// A built-in with no operators (`string`, `void`).
pub struct OpaqueClass {
    name: &'static str,
    il_name: &'static str,
}

impl BuiltinClass for OpaqueClass {
    fn name(&self) -> &'static str {
        self.name
    }

    fn il_name(&self) -> &'static str {
        self.il_name
    }

    fn operator(&self, _op: Operation) -> Option<Vec<Instruction>> {
        None
    }
}

// -----------------------------------------------------------------------------
// REGISTRATION
// -----------------------------------------------------------------------------

/// Ids of the built-in classes, for literal typing and casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtins {
    pub i32: ClassId,
    pub i64: ClassId,
    pub f32: ClassId,
    pub f64: ClassId,
    pub string: ClassId,
    pub void: ClassId,
}

impl Builtins {
    pub fn is_numeric(&self, class: ClassId) -> bool {
        class == self.i32 || class == self.i64 || class == self.f32 || class == self.f64
    }
}

/// Seeds `registry` with every built-in class.
pub fn install_all(registry: &mut Registry) -> Builtins {
    let builtins = Builtins {
        i32: NumericClass::i32().install(registry),
        i64: NumericClass::i64().install(registry),
        f32: NumericClass::f32().install(registry),
        f64: NumericClass::f64().install(registry),
        string: OpaqueClass {
            name: "string",
            il_name: "string",
        }
        .install(registry),
        void: OpaqueClass {
            name: "void",
            il_name: "void",
        }
        .install(registry),
    };
    registry.alias_builtin("none", builtins.void);
    tracing::trace!("installed built-in classes");
    builtins
}
