//! # Types Module
//!
//! The class registry and every descriptor the compiler builds: classes,
//! fields, function signatures and bodies, and the operator-method table
//! that routes `a + b` to a method on the left operand's class.
//!
//! Classes live in one arena (`Vec<ClassDescriptor>`) and are referred to
//! by [`ClassId`]. Namespaces keep an ordered name index into that arena
//! so output follows declaration order.

use rustc_hash::FxHashMap;

use crate::ast::{BinOp, Expr};
use crate::error::Span;
use crate::opcode::{Instruction, Segment};

pub type ClassId = usize;

/// Namespace holding the synthesized built-in classes.
pub const BUILTIN_NAMESPACE: &str = "Sys";
/// Namespace classes land in before any `namespace` declaration.
pub const DEFAULT_NAMESPACE: &str = "Program";

/// Method names that may be registered as operator methods.
pub const OPERATOR_KEYS: [&str; 16] = [
    "opadd",
    "opsub",
    "opmul",
    "opdiv",
    "opgreater",
    "opgreaterequals",
    "oplesser",
    "oplesserequals",
    "opfalse",
    "optrue",
    "oprem",
    "opxor",
    "opequals",
    "opnot",
    "opand",
    "opor",
];

/// Lifecycle methods: never operators, never warned about.
pub const SPECIAL_METHODS: [&str; 3] = [".ctor", ".cctor", "init"];

// -----------------------------------------------------------------------------
// OPERATIONS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Xor,
    GreaterThan,
    GreaterThanEquals,
    LesserThan,
    LesserThanEquals,
    Equals,
    Not,
    IsTrue,
    IsFalse,
    And,
    Or,
    /// Handled by `conv.*`, never through a method.
    Cast,
}

impl Operation {
    /// Every operation a built-in numeric class implements.
    pub const DISPATCHED: [Operation; 16] = [
        Operation::Add,
        Operation::Sub,
        Operation::Mul,
        Operation::Div,
        Operation::Rem,
        Operation::Xor,
        Operation::GreaterThan,
        Operation::GreaterThanEquals,
        Operation::LesserThan,
        Operation::LesserThanEquals,
        Operation::Equals,
        Operation::Not,
        Operation::IsTrue,
        Operation::IsFalse,
        Operation::And,
        Operation::Or,
    ];

    /// Canonical operator-table key. `Cast` has none.
    pub fn method_key(self) -> Option<&'static str> {
        let key = match self {
            Operation::Add => "opadd",
            Operation::Sub => "opsub",
            Operation::Mul => "opmul",
            Operation::Div => "opdiv",
            Operation::Rem => "oprem",
            Operation::Xor => "opxor",
            Operation::GreaterThan => "opgreater",
            Operation::GreaterThanEquals => "opgreaterequals",
            Operation::LesserThan => "oplesser",
            Operation::LesserThanEquals => "oplesserequals",
            Operation::Equals => "opequals",
            Operation::Not => "opnot",
            Operation::IsTrue => "optrue",
            Operation::IsFalse => "opfalse",
            Operation::And => "opand",
            Operation::Or => "opor",
            Operation::Cast => return None,
        };
        Some(key)
    }

    /// Number of operands the operator method consumes.
    pub fn arity(self) -> usize {
        match self {
            Operation::Not | Operation::IsTrue | Operation::IsFalse | Operation::Cast => 1,
            _ => 2,
        }
    }

    /// `!=` maps to `Equals`; the compiler negates the result.
    pub fn from_binop(op: BinOp) -> Operation {
        match op {
            BinOp::Add => Operation::Add,
            BinOp::Sub => Operation::Sub,
            BinOp::Mul => Operation::Mul,
            BinOp::Div => Operation::Div,
            BinOp::Rem => Operation::Rem,
            BinOp::Eq | BinOp::Ne => Operation::Equals,
            BinOp::Lt => Operation::LesserThan,
            BinOp::Gt => Operation::GreaterThan,
            BinOp::Le => Operation::LesserThanEquals,
            BinOp::Ge => Operation::GreaterThanEquals,
            BinOp::And => Operation::And,
            BinOp::Or => Operation::Or,
        }
    }
}

// -----------------------------------------------------------------------------
// TYPE NAMES & REFERENCES
// -----------------------------------------------------------------------------

/// A type as written in source, with its modifiers split off.
///
/// `i32_` is by-reference, `_i32` is an output parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub base: String,
    pub by_ref: bool,
    pub out: bool,
}

impl TypeName {
    pub fn parse(text: &str) -> TypeName {
        let mut base = text;
        let by_ref = base.len() > 1 && base.ends_with('_');
        if by_ref {
            base = &base[..base.len() - 1];
        }
        let out = base.len() > 1 && base.starts_with('_');
        if out {
            base = &base[1..];
        }
        TypeName {
            base: base.to_string(),
            by_ref,
            out,
        }
    }
}

/// A resolved type: a class plus modifiers. Equality is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub class: ClassId,
    pub by_ref: bool,
    pub out: bool,
}

impl TypeRef {
    pub fn plain(class: ClassId) -> TypeRef {
        TypeRef {
            class,
            by_ref: false,
            out: false,
        }
    }

    /// The same class without ref/out modifiers.
    pub fn value_type(self) -> TypeRef {
        TypeRef::plain(self.class)
    }

    pub fn is_address(self) -> bool {
        self.by_ref || self.out
    }
}

// -----------------------------------------------------------------------------
// DESCRIPTORS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeRef,
    pub is_public: bool,
    pub is_static: bool,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub namespace: String,
    pub class: String,
    pub name: String,
    pub is_static: bool,
    pub is_public: bool,
    /// Registered in the owner's operator table.
    pub is_operator: bool,
    pub is_special: bool,
    pub is_builtin: bool,
    pub return_type: TypeRef,
    pub params: Vec<(String, TypeRef)>,
}

impl Signature {
    /// Operator methods are emitted static: both operands are arguments.
    pub fn takes_receiver(&self) -> bool {
        !self.is_static && !self.is_operator
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    /// Signature registered, body not compiled yet.
    Pending,
    /// Built-in operator: spliced at the use site, never emitted.
    Inline(Vec<Instruction>),
    Segments(Vec<Segment>),
}

#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub sig: Signature,
    pub body: FunctionBody,
    pub locals: Vec<(String, TypeRef)>,
    pub max_stack: usize,
    pub entry_point: bool,
    pub span: Span,
}

impl FunctionDescriptor {
    pub fn new(sig: Signature, span: Span) -> Self {
        Self {
            sig,
            body: FunctionBody::Pending,
            locals: Vec::new(),
            max_stack: 0,
            entry_point: false,
            span,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        match &self.body {
            FunctionBody::Segments(segments) => segments,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub namespace: String,
    /// Name used in LIA source (`i32`, `Vec2`).
    pub name: String,
    /// Name shown in diagnostics.
    pub cover_name: String,
    /// Name used when the type appears in emitted signatures.
    pub il_name: String,
    pub is_public: bool,
    pub is_builtin: bool,
    pub fields: Vec<FieldDescriptor>,
    pub functions: Vec<FunctionDescriptor>,
    field_index: FxHashMap<String, usize>,
    function_index: FxHashMap<String, usize>,
    /// Operator key (`opadd`) to declared method name.
    operators: FxHashMap<String, String>,
}

impl ClassDescriptor {
    pub fn new(namespace: &str, name: &str, il_name: String, is_public: bool, is_builtin: bool) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            cover_name: name.to_string(),
            il_name,
            is_public,
            is_builtin,
            fields: Vec::new(),
            functions: Vec::new(),
            field_index: FxHashMap::default(),
            function_index: FxHashMap::default(),
            operators: FxHashMap::default(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut FunctionDescriptor> {
        match self.function_index.get(name) {
            Some(&i) => Some(&mut self.functions[i]),
            None => None,
        }
    }

    /// Adds a field; returns `false` if the name is taken.
    pub fn add_field(&mut self, field: FieldDescriptor) -> bool {
        if self.field_index.contains_key(&field.name) {
            return false;
        }
        self.field_index.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
        true
    }

    /// Adds a function; returns `false` if the name is taken.
    pub fn add_function(&mut self, function: FunctionDescriptor) -> bool {
        if self.function_index.contains_key(&function.sig.name) {
            return false;
        }
        self.function_index
            .insert(function.sig.name.clone(), self.functions.len());
        self.functions.push(function);
        true
    }

    pub fn register_operator(&mut self, key: &str, method: &str) {
        self.operators.insert(key.to_string(), method.to_string());
    }

    /// Method implementing `op` on this class, if any.
    pub fn operator_method(&self, op: Operation) -> Option<&FunctionDescriptor> {
        let key = op.method_key()?;
        let method = self.operators.get(key)?;
        self.function(method)
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }
}

// -----------------------------------------------------------------------------
// NAMESPACES
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    classes: Vec<ClassId>,
    index: FxHashMap<String, ClassId>,
}

impl Namespace {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            classes: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Class ids in declaration order.
    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.index.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

// -----------------------------------------------------------------------------
// REGISTRY
// -----------------------------------------------------------------------------

/// Owns every class descriptor of one compilation.
#[derive(Debug, Clone)]
pub struct Registry {
    classes: Vec<ClassDescriptor>,
    /// Source name (`i32`, `none`) to built-in class.
    builtins: FxHashMap<String, ClassId>,
    namespaces: Vec<Namespace>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry with only the default namespace open.
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            builtins: FxHashMap::default(),
            namespaces: vec![Namespace::new(DEFAULT_NAMESPACE)],
        }
    }

    pub fn add_builtin(&mut self, name: &str, il_name: &str) -> ClassId {
        let id = self.classes.len();
        let mut class = ClassDescriptor::new(BUILTIN_NAMESPACE, name, il_name.to_string(), true, true);
        class.cover_name = name.to_string();
        self.classes.push(class);
        self.builtins.insert(name.to_string(), id);
        id
    }

    /// Makes `alias` resolve to an existing built-in (`none` → `void`).
    pub fn alias_builtin(&mut self, alias: &str, id: ClassId) {
        self.builtins.insert(alias.to_string(), id);
    }

    pub fn builtin(&self, name: &str) -> Option<ClassId> {
        self.builtins.get(name).copied()
    }

    /// Opens (or reopens) a namespace and returns its index.
    pub fn open_namespace(&mut self, name: &str) -> usize {
        if let Some(i) = self.namespaces.iter().position(|ns| ns.name == name) {
            return i;
        }
        self.namespaces.push(Namespace::new(name));
        self.namespaces.len() - 1
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn namespace(&self, index: usize) -> &Namespace {
        &self.namespaces[index]
    }

    /// Registers a user class; returns `None` if the namespace already has it.
    pub fn declare_class(&mut self, ns: usize, name: &str, is_public: bool) -> Option<ClassId> {
        if self.namespaces[ns].index.contains_key(name) {
            return None;
        }
        let id = self.classes.len();
        let ns_name = self.namespaces[ns].name.clone();
        let il_name = format!("class {}.{}", ns_name, name);
        self.classes
            .push(ClassDescriptor::new(&ns_name, name, il_name, is_public, false));

        let namespace = &mut self.namespaces[ns];
        namespace.classes.push(id);
        namespace.index.insert(name.to_string(), id);
        Some(id)
    }

    pub fn class(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassDescriptor {
        &mut self.classes[id]
    }

    /// Resolves built-ins first, then classes of namespace `ns`.
    pub fn resolve(&self, name: &TypeName, ns: usize) -> Option<TypeRef> {
        let class = self
            .builtin(&name.base)
            .or_else(|| self.namespaces[ns].lookup(&name.base))?;
        Some(TypeRef {
            class,
            by_ref: name.by_ref,
            out: name.out,
        })
    }

    // -------------------------------------------------------------------------
    // RENDERING HELPERS
    // -------------------------------------------------------------------------

    /// Type as it appears in emitted signatures and locals.
    pub fn il_type(&self, ty: TypeRef) -> String {
        let base = &self.classes[ty.class].il_name;
        if ty.out {
            format!("[out] {}&", base)
        } else if ty.by_ref {
            format!("{}&", base)
        } else {
            base.clone()
        }
    }

    /// Like [`Registry::il_type`] without the `[out]` marker, as call
    /// sites and local declarations spell types.
    pub fn il_type_bare(&self, ty: TypeRef) -> String {
        let base = &self.classes[ty.class].il_name;
        if ty.is_address() {
            format!("{}&", base)
        } else {
            base.clone()
        }
    }

    /// Type as written in LIA source, for diagnostics.
    pub fn display_type(&self, ty: TypeRef) -> String {
        let base = &self.classes[ty.class].cover_name;
        match (ty.out, ty.by_ref) {
            (true, _) => format!("_{}", base),
            (false, true) => format!("{}_", base),
            (false, false) => base.clone(),
        }
    }

    /// Operand of `call`: `[instance] RET Ns.Class::name(PARAMS)`.
    pub fn call_target(&self, sig: &Signature) -> String {
        let params: Vec<String> = sig
            .params
            .iter()
            .map(|(_, ty)| self.il_type_bare(*ty))
            .collect();
        format!(
            "{}{} {}.{}::{}({})",
            if sig.takes_receiver() { "instance " } else { "" },
            self.il_type(sig.return_type),
            sig.namespace,
            sig.class,
            sig.name,
            params.join(", ")
        )
    }

    /// Operand of `ldfld`/`stsfld`: `TYPE Ns.Class::name`.
    pub fn field_ref(&self, owner: ClassId, field: &FieldDescriptor) -> String {
        let class = &self.classes[owner];
        format!(
            "{} {}.{}::{}",
            self.il_type(field.ty),
            class.namespace,
            class.name,
            field.name
        )
    }
}
