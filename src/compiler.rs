//! # Compiler Module
//!
//! Semantic analysis and code generation in one walk over the AST.
//!
//! A program is processed in three passes so classes can refer to each
//! other in any order:
//! 1. every class shell is registered in its namespace;
//! 2. fields and method signatures are resolved, operator methods enter
//!    their class's operator table;
//! 3. method bodies are compiled into segments.
//!
//! Inside a body, the [`FunctionBuilder`] owns the segments, the local
//! slots and the running stack depth. Every instruction goes through
//! [`FunctionBuilder::emit`], which applies its stack effect, so the
//! recorded maximum is exactly the method's `.maxstack`.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::*;
use crate::builtin::{self, Builtins};
use crate::error::{
    CompileError, CompileResult, Diagnostic, DiagnosticSink, ErrorCode, Span, WarningCode,
};
use crate::opcode::{ConvKind, ElementKind, Instruction, Segment};
use crate::options::CompileOptions;
use crate::types::*;

// -----------------------------------------------------------------------------
// LOCALS LOOKUP
// -----------------------------------------------------------------------------

/// Ordered name-to-slot table; slots are handed out in declaration order.
#[derive(Debug, Default)]
struct LocalsLookup {
    slots: Vec<(String, TypeRef)>,
    index: FxHashMap<String, u16>,
}

impl LocalsLookup {
    fn get(&self, name: &str) -> Option<(u16, TypeRef)> {
        let slot = *self.index.get(name)?;
        Some((slot, self.slots[usize::from(slot)].1))
    }

    fn add(&mut self, name: &str, ty: TypeRef, span: Span) -> CompileResult<u16> {
        let slot = u16::try_from(self.slots.len()).map_err(|_| {
            CompileError::new(ErrorCode::Unknown, "too many local variables", span)
        })?;
        self.slots.push((name.to_string(), ty));
        self.index.insert(name.to_string(), slot);
        Ok(slot)
    }
}

// -----------------------------------------------------------------------------
// FUNCTION BUILDER
// -----------------------------------------------------------------------------

/// Per-method emission state.
struct FunctionBuilder {
    class: ClassId,
    sig: Signature,
    segments: Vec<Segment>,
    current: usize,
    locals: LocalsLookup,
    /// Segment names some branch jumps to.
    referenced: FxHashSet<String>,
    /// Segment names a branch in live code jumps to.
    reachable: FxHashSet<String>,
    /// Segments inside code already reported as unreachable.
    silenced: FxHashSet<usize>,
    depth: usize,
    max_depth: usize,
}

impl FunctionBuilder {
    fn new(class: ClassId, sig: Signature) -> Self {
        Self {
            class,
            sig,
            segments: vec![Segment::new("Start")],
            current: 0,
            locals: LocalsLookup::default(),
            referenced: FxHashSet::default(),
            reachable: FxHashSet::default(),
            silenced: FxHashSet::default(),
            depth: 0,
            max_depth: 0,
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        let (pops, pushes) = instruction.stack_effect();
        debug_assert!(self.depth >= pops, "stack underflow on {}", instruction);
        self.depth = self.depth.saturating_sub(pops) + pushes;
        self.max_depth = self.max_depth.max(self.depth);

        if let Some(label) = instruction.branch_target() {
            if !self.is_dead() {
                self.reachable.insert(label.to_string());
            }
            self.referenced.insert(label.to_string());
        }
        self.segments[self.current].instructions.push(instruction);
    }

    fn spawn_segment(&mut self, name: String) -> usize {
        tracing::trace!(segment = %name, function = %self.sig.name, "spawned segment");
        self.segments.push(Segment::new(name));
        let index = self.segments.len() - 1;
        if self.silenced.contains(&self.current) {
            self.silenced.insert(index);
        }
        index
    }

    /// Moves emission into a fresh segment for dead code.
    fn enter_unreachable(&mut self, name: String) {
        let segment = self.spawn_segment(name);
        self.silenced.insert(segment);
        self.switch_to(segment);
    }

    fn switch_to(&mut self, segment: usize) {
        self.current = segment;
    }

    fn is_reachable(&self, segment: usize) -> bool {
        segment == 0 || self.reachable.contains(&self.segments[segment].name)
    }

    /// Code emitted now can never execute.
    fn is_dead(&self) -> bool {
        self.segments[self.current].is_terminated() || !self.is_reachable(self.current)
    }

    /// Control can leave the current segment at its end.
    fn falls_through(&self) -> bool {
        let current = self.current;
        !self.segments[current].is_terminated()
            && (self.is_reachable(current) || self.silenced.contains(&current))
    }

    fn is_void(&self, builtins: &Builtins) -> bool {
        self.sig.return_type.class == builtins.void
    }

    /// Arguments start at 1 when slot 0 holds the receiver.
    fn arg_offset(&self) -> u16 {
        u16::from(self.sig.takes_receiver())
    }
}

// -----------------------------------------------------------------------------
// COMPILER
// -----------------------------------------------------------------------------

/// Result of a successful compilation, ready for [`crate::emit`].
#[derive(Debug, Clone)]
pub struct Program {
    pub registry: Registry,
    pub main_defined: bool,
}

pub struct Compiler<'a> {
    options: &'a CompileOptions,
    sink: &'a mut dyn DiagnosticSink,
    registry: Registry,
    builtins: Builtins,
    /// Shared by every `Cond_N`/`AfterCond_N` label of the program.
    label_counter: usize,
    main_defined: bool,
    /// Instance fields whose defaults are being inlined right now.
    inlining: Vec<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(options: &'a CompileOptions, sink: &'a mut dyn DiagnosticSink) -> Self {
        let mut registry = Registry::new();
        let builtins = builtin::install_all(&mut registry);
        Self {
            options,
            sink,
            registry,
            builtins,
            label_counter: 0,
            main_defined: false,
            inlining: Vec::new(),
        }
    }

    pub fn compile(mut self, items: &[Item]) -> CompileResult<Program> {
        // Pass 1: class shells.
        let mut ns = 0;
        let mut classes = Vec::new();
        for item in items {
            match item {
                Item::Namespace { name, .. } => {
                    ns = self.registry.open_namespace(name);
                    tracing::debug!(namespace = %name, "opened namespace");
                }
                Item::Class(decl) => {
                    let id = self
                        .registry
                        .declare_class(ns, &decl.name, decl.is_public)
                        .ok_or_else(|| {
                            CompileError::new(
                                ErrorCode::Redeclaration,
                                format!(
                                    "The class '{}' is already declared in namespace '{}'",
                                    decl.name,
                                    self.registry.namespace(ns).name
                                ),
                                decl.name_span,
                            )
                        })?;
                    classes.push((ns, id, decl));
                }
            }
        }

        // Pass 2: fields and signatures.
        for &(ns, id, decl) in &classes {
            self.declare_members(ns, id, decl)?;
        }

        // Pass 3: bodies.
        for &(_, id, decl) in &classes {
            for method in &decl.methods {
                self.compile_method(id, method)?;
            }
            self.compile_initializers(id)?;
        }

        if self.options.require_main
            && !self.main_defined
            && !self.options.disable_warning_main_not_defined
        {
            self.sink.report(Diagnostic::warning(
                WarningCode::MainNotDefined,
                "Function 'main' is not defined! This program will not run!",
                None,
            ));
        }

        Ok(Program {
            registry: self.registry,
            main_defined: self.main_defined,
        })
    }

    fn warn(&mut self, code: WarningCode, message: impl Into<String>, span: Span) {
        self.sink
            .report(Diagnostic::warning(code, message, Some(span)));
    }

    fn next_label(&mut self, prefix: &str) -> String {
        let label = format!("{}_{}", prefix, self.label_counter);
        self.label_counter += 1;
        label
    }

    fn resolve_type(&self, name: &str, ns: usize, span: Span) -> CompileResult<TypeRef> {
        self.registry
            .resolve(&TypeName::parse(name), ns)
            .ok_or_else(|| {
                CompileError::new(
                    ErrorCode::InvalidType,
                    format!("Expected a valid type, got '{}'", name),
                    span,
                )
            })
    }

    /// Namespace index of a user class.
    fn namespace_of(&self, class: ClassId) -> usize {
        let name = &self.registry.class(class).namespace;
        self.registry
            .namespaces()
            .iter()
            .position(|ns| &ns.name == name)
            .unwrap_or(0)
    }

    fn display(&self, ty: TypeRef) -> String {
        self.registry.display_type(ty)
    }

    // -------------------------------------------------------------------------
    // CLASS PASS
    // -------------------------------------------------------------------------

    fn declare_members(&mut self, ns: usize, id: ClassId, decl: &ClassDecl) -> CompileResult<()> {
        let ns_name = self.registry.namespace(ns).name.clone();

        for field in &decl.fields {
            let ty = self.resolve_type(&field.type_name, ns, field.span)?;
            let added = self.registry.class_mut(id).add_field(FieldDescriptor {
                name: field.name.clone(),
                ty,
                is_public: field.is_public,
                is_static: field.is_static,
                default: field.default.clone(),
                span: field.span,
            });
            if !added {
                return Err(CompileError::new(
                    ErrorCode::Redeclaration,
                    format!("The field '{}' is already declared in '{}'", field.name, decl.name),
                    field.span,
                ));
            }
        }

        for method in &decl.methods {
            let return_type = self.resolve_type(&method.return_type, ns, method.return_type_span)?;
            let mut params = Vec::with_capacity(method.params.len());
            for param in &method.params {
                params.push((param.name.clone(), self.resolve_type(&param.type_name, ns, param.span)?));
            }

            let is_special = SPECIAL_METHODS.contains(&method.name.as_str());
            let mut is_operator = false;
            if method.is_class_method && !is_special {
                let key = method.name.to_ascii_lowercase();
                if OPERATOR_KEYS.contains(&key.as_str()) {
                    is_operator = true;
                    self.registry
                        .class_mut(id)
                        .register_operator(&key, &method.name);
                } else {
                    self.warn(
                        WarningCode::InvalidClassMethod,
                        format!(
                            "Invalid class method name '{}', use one of {}",
                            method.name,
                            OPERATOR_KEYS.join(", ")
                        ),
                        method.name_span,
                    );
                }
            }

            let sig = Signature {
                namespace: ns_name.clone(),
                class: decl.name.clone(),
                name: method.name.clone(),
                is_static: method.is_static,
                is_public: method.is_public,
                is_operator,
                is_special,
                is_builtin: false,
                return_type,
                params,
            };
            let added = self
                .registry
                .class_mut(id)
                .add_function(FunctionDescriptor::new(sig, method.span));
            if !added {
                return Err(CompileError::new(
                    ErrorCode::Redeclaration,
                    format!("The function '{}' is already declared in '{}'", method.name, decl.name),
                    method.name_span,
                ));
            }
        }

        self.declare_initializers(id, &ns_name);

        let class = self.registry.class(id);
        tracing::debug!(
            class = %class.name,
            fields = class.fields.len(),
            functions = class.functions.len(),
            operators = class.operator_count(),
            "registered class"
        );
        Ok(())
    }

    /// Adds `.ctor`/`.cctor` signatures when fields carry defaults.
    fn declare_initializers(&mut self, id: ClassId, ns_name: &str) {
        let void = TypeRef::plain(self.builtins.void);
        let class = self.registry.class(id);
        let class_name = class.name.clone();
        let needs_ctor = class.fields.iter().any(|f| !f.is_static && f.default.is_some());
        let needs_cctor = class.fields.iter().any(|f| f.is_static && f.default.is_some());

        for (name, is_static, needed) in [(".ctor", false, needs_ctor), (".cctor", true, needs_cctor)] {
            if !needed {
                continue;
            }
            let sig = Signature {
                namespace: ns_name.to_string(),
                class: class_name.clone(),
                name: name.to_string(),
                is_static,
                is_public: !is_static,
                is_operator: false,
                is_special: true,
                is_builtin: false,
                return_type: void,
                params: Vec::new(),
            };
            self.registry
                .class_mut(id)
                .add_function(FunctionDescriptor::new(sig, Span::default()));
        }
    }

    // -------------------------------------------------------------------------
    // FUNCTION BODIES
    // -------------------------------------------------------------------------

    fn compile_method(&mut self, class: ClassId, decl: &FunctionDecl) -> CompileResult<()> {
        let sig = match self.registry.class(class).function(&decl.name) {
            Some(function) => function.sig.clone(),
            None => {
                return Err(CompileError::new(
                    ErrorCode::UnknownFunction,
                    format!("The function '{}' was never registered", decl.name),
                    decl.name_span,
                ))
            }
        };
        let mut fb = FunctionBuilder::new(class, sig);

        let entry_point = decl.name.eq_ignore_ascii_case("main");
        if entry_point {
            self.main_defined = true;
        }

        let offset = fb.arg_offset();
        for (index, param) in decl.params.iter().enumerate() {
            if fb.locals.get(&param.name).is_some() {
                return Err(CompileError::new(
                    ErrorCode::Redeclaration,
                    format!("The parameter '{}' is declared twice", param.name),
                    param.span,
                ));
            }
            let ty = fb.sig.params[index].1;
            let slot = fb.locals.add(&param.name, ty, param.span)?;
            let arg = u16::try_from(index).unwrap_or(u16::MAX).saturating_add(offset);
            fb.emit(Instruction::Ldarg(arg));
            fb.emit(Instruction::Stloc(slot));
        }

        self.compile_block(&mut fb, &decl.body)?;
        self.finish(fb, entry_point, decl.name_span)
    }

    /// Compiles the synthesized initializers declared in pass 2.
    fn compile_initializers(&mut self, class: ClassId) -> CompileResult<()> {
        let fields = self.registry.class(class).fields.clone();

        for (name, is_static) in [(".ctor", false), (".cctor", true)] {
            let sig = match self.registry.class(class).function(name) {
                Some(function) if function.sig.is_special => function.sig.clone(),
                _ => continue,
            };
            let mut fb = FunctionBuilder::new(class, sig);
            if !is_static {
                fb.emit(Instruction::Ldarg(0));
                fb.emit(Instruction::CallBaseCtor);
            }

            for field in fields.iter().filter(|f| f.is_static == is_static) {
                let Some(default) = &field.default else {
                    continue;
                };
                let field_ref = self.registry.field_ref(class, field);
                if !is_static {
                    fb.emit(Instruction::Ldarg(0));
                }
                let ty = self.compile_value(&mut fb, default)?;
                if ty != field.ty {
                    return Err(self.field_default_conflict(field, ty, default.span()));
                }
                fb.emit(if is_static {
                    Instruction::Stsfld(field_ref)
                } else {
                    Instruction::Stfld(field_ref)
                });
            }

            self.finish(fb, false, Span::default())?;
        }
        Ok(())
    }

    fn field_default_conflict(&self, field: &FieldDescriptor, got: TypeRef, span: Span) -> CompileError {
        CompileError::new(
            ErrorCode::TypeConflict,
            format!(
                "Type mismatch! The field '{}' is of type '{}' but its default is '{}'",
                field.name,
                self.display(field.ty),
                self.display(got)
            ),
            span,
        )
    }

    /// Closes open segments, drops dead empty ones and stores the body.
    fn finish(&mut self, mut fb: FunctionBuilder, entry_point: bool, span: Span) -> CompileResult<()> {
        let is_void = fb.is_void(&self.builtins);

        for index in 0..fb.segments.len() {
            let segment = &fb.segments[index];
            let unused = segment.instructions.is_empty()
                && index != 0
                && !fb.referenced.contains(&segment.name);
            if segment.is_terminated() || unused {
                continue;
            }
            fb.switch_to(index);
            if is_void {
                fb.emit(Instruction::Ret { value: false });
            } else if !fb.is_reachable(index) {
                // Never runs; a jump to itself closes it without a value.
                let name = fb.segments[index].name.clone();
                fb.emit(Instruction::Br(name));
            } else {
                return Err(CompileError::new(
                    ErrorCode::MissingValue,
                    format!(
                        "Not all code paths of '{}' return a value of type '{}'",
                        fb.sig.name,
                        self.display(fb.sig.return_type)
                    ),
                    span,
                ));
            }
        }

        let referenced = &fb.referenced;
        let mut index = 0;
        fb.segments.retain(|segment| {
            let keep = index == 0 || !segment.instructions.is_empty() || referenced.contains(&segment.name);
            index += 1;
            keep
        });

        tracing::debug!(
            function = %fb.sig.name,
            segments = fb.segments.len(),
            locals = fb.locals.slots.len(),
            max_stack = fb.max_depth,
            "compiled function"
        );

        let name = fb.sig.name.clone();
        if let Some(function) = self.registry.class_mut(fb.class).function_mut(&name) {
            function.body = FunctionBody::Segments(fb.segments);
            function.locals = fb.locals.slots;
            function.max_stack = fb.max_depth;
            function.entry_point = entry_point;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // STATEMENTS
    // -------------------------------------------------------------------------

    fn compile_block(&mut self, fb: &mut FunctionBuilder, block: &Block) -> CompileResult<()> {
        for stmt in &block.stmts {
            if fb.is_dead() {
                // Reported once; everything spawned from there is silenced.
                let reported = fb.silenced.contains(&fb.current);
                if !reported {
                    if !self.options.disable_warning_unreachable_code {
                        self.warn(
                            WarningCode::UnreachableCode,
                            "This code is unreachable, it will never run",
                            stmt.span(),
                        );
                    }
                    if self.options.trim_unreachable_code {
                        break;
                    }
                }
                // Kept dead code goes into a segment no branch targets.
                if !reported || fb.segments[fb.current].is_terminated() {
                    let label = self.next_label("Unreachable");
                    fb.enter_unreachable(label);
                }
            }
            self.compile_stmt(fb, stmt)?;
            debug_assert_eq!(fb.depth, 0, "statement left values on the stack");
        }
        Ok(())
    }

    fn compile_stmt(&mut self, fb: &mut FunctionBuilder, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Expr { expr, span } => {
                if !expr.is_call() {
                    if !self.options.disable_warning_useless_code {
                        self.warn(
                            WarningCode::UselessCode,
                            "This code is useless, it does not do anything",
                            *span,
                        );
                    }
                    if self.options.trim_useless_code {
                        return Ok(());
                    }
                }
                let ty = self.compile_expr(fb, expr)?;
                if ty.class != self.builtins.void {
                    fb.emit(Instruction::Pop);
                }
                Ok(())
            }

            Stmt::Assign {
                name,
                name_span,
                type_name,
                value,
                ..
            } => self.compile_assign(fb, name, *name_span, type_name.as_deref(), value.as_ref()),

            Stmt::Return { value, span } => {
                let expected = fb.sig.return_type;
                match value {
                    Some(expr) => {
                        let ty = self.compile_expr(fb, expr)?;
                        if ty != expected {
                            return Err(CompileError::new(
                                ErrorCode::TypeConflict,
                                format!(
                                    "The function '{}' must return type '{}', got '{}'",
                                    fb.sig.name,
                                    self.display(expected),
                                    self.display(ty)
                                ),
                                expr.span(),
                            ));
                        }
                        let has_value = ty.class != self.builtins.void;
                        fb.emit(Instruction::Ret { value: has_value });
                    }
                    None if fb.is_void(&self.builtins) => fb.emit(Instruction::Ret { value: false }),
                    None => {
                        return Err(CompileError::new(
                            ErrorCode::MissingValue,
                            format!(
                                "The function '{}' must return a value of type '{}'",
                                fb.sig.name,
                                self.display(expected)
                            ),
                            *span,
                        ))
                    }
                }
                Ok(())
            }

            Stmt::While { condition, body, .. } => {
                let cond_label = self.next_label("Cond");
                let after_label = self.next_label("AfterCond");

                fb.emit(Instruction::Br(cond_label.clone()));
                let cond = fb.spawn_segment(cond_label.clone());
                let after = fb.spawn_segment(after_label.clone());

                fb.switch_to(cond);
                self.compile_value(fb, condition)?;
                fb.emit(Instruction::Brfalse(after_label));
                self.compile_block(fb, body)?;
                if fb.falls_through() {
                    fb.emit(Instruction::Br(cond_label));
                }

                fb.switch_to(after);
                Ok(())
            }

            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                let after_label = self.next_label("AfterCond");
                let after = fb.spawn_segment(after_label.clone());

                let mut thens = Vec::with_capacity(branches.len());
                for branch in branches {
                    let label = self.next_label("Cond");
                    let segment = fb.spawn_segment(label.clone());
                    self.compile_value(fb, &branch.condition)?;
                    fb.emit(Instruction::Brtrue(label));
                    thens.push((segment, &branch.body));
                }

                // Fall-through path: no condition held.
                if let Some(block) = else_body {
                    self.compile_block(fb, block)?;
                }
                if fb.falls_through() {
                    fb.emit(Instruction::Br(after_label.clone()));
                }

                for (segment, body) in thens {
                    fb.switch_to(segment);
                    self.compile_block(fb, body)?;
                    if fb.falls_through() {
                        fb.emit(Instruction::Br(after_label.clone()));
                    }
                }

                fb.switch_to(after);
                Ok(())
            }
        }
    }

    fn compile_assign(
        &mut self,
        fb: &mut FunctionBuilder,
        name: &str,
        name_span: Span,
        type_name: Option<&str>,
        value: Option<&Expr>,
    ) -> CompileResult<()> {
        // Plain `name = expr` may target a field of the class.
        if type_name.is_none() && fb.locals.get(name).is_none() {
            if let Some(expr) = value {
                let field = self.registry.class(fb.class).field(name).cloned();
                if let Some(field) = field {
                    return self.store_field(fb, &field, expr, name_span);
                }
            }
        }

        // Plain `name = expr` on a ref/out local writes through the address.
        if let (None, Some(expr), Some((slot, ty))) = (type_name, value, fb.locals.get(name)) {
            if ty.is_address() {
                fb.emit(Instruction::Ldloc(slot));
                let got = self.compile_value(fb, expr)?;
                if got != ty.value_type() {
                    return Err(CompileError::new(
                        ErrorCode::TypeConflict,
                        format!(
                            "Type mismatch! '{}' refers to '{}' and cannot hold '{}'",
                            name,
                            self.display(ty.value_type()),
                            self.display(got)
                        ),
                        name_span,
                    ));
                }
                fb.emit(Instruction::Stind(self.element_kind(ty)));
                return Ok(());
            }
        }

        let ns = self.namespace_of(fb.class);
        let declared = match type_name {
            Some(text) => Some(self.resolve_type(text, ns, name_span)?),
            None => None,
        };
        let value_type = match value {
            Some(expr) => Some(self.compile_value(fb, expr)?),
            None => None,
        };

        let ty = match (declared, value_type) {
            (Some(declared), Some(got)) if declared != got => {
                return Err(CompileError::new(
                    ErrorCode::TypeConflict,
                    format!(
                        "Type mismatch! '{}' is declared as '{}' but assigned a value of type '{}'",
                        name,
                        self.display(declared),
                        self.display(got)
                    ),
                    name_span,
                ))
            }
            (Some(ty), _) | (None, Some(ty)) => ty,
            (None, None) => {
                return Err(CompileError::syntax(
                    format!("Expected a value or type annotation for '{}'", name),
                    name_span,
                ))
            }
        };

        let slot = match fb.locals.get(name) {
            Some((slot, existing)) => {
                if existing != ty {
                    return Err(CompileError::new(
                        ErrorCode::TypeConflict,
                        format!(
                            "Type mismatch! '{}' is of type '{}' and cannot hold '{}'",
                            name,
                            self.display(existing),
                            self.display(ty)
                        ),
                        name_span,
                    ));
                }
                slot
            }
            None => fb.locals.add(name, ty, name_span)?,
        };

        if value.is_some() {
            fb.emit(Instruction::Stloc(slot));
        }
        Ok(())
    }

    fn store_field(
        &mut self,
        fb: &mut FunctionBuilder,
        field: &FieldDescriptor,
        value: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        let field_ref = self.registry.field_ref(fb.class, field);
        if !field.is_static {
            if !fb.sig.takes_receiver() {
                return Err(CompileError::new(
                    ErrorCode::UnknownVariable,
                    format!("The instance field '{}' cannot be assigned in a static context", field.name),
                    span,
                ));
            }
            fb.emit(Instruction::Ldarg(0));
        }

        let ty = self.compile_value(fb, value)?;
        if ty != field.ty {
            return Err(CompileError::new(
                ErrorCode::TypeConflict,
                format!(
                    "Type mismatch! The field '{}' is of type '{}' and cannot hold '{}'",
                    field.name,
                    self.display(field.ty),
                    self.display(ty)
                ),
                span,
            ));
        }

        fb.emit(if field.is_static {
            Instruction::Stsfld(field_ref)
        } else {
            Instruction::Stfld(field_ref)
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // EXPRESSIONS
    // -------------------------------------------------------------------------

    /// Like [`Self::compile_expr`] but rejects `void` results.
    fn compile_value(&mut self, fb: &mut FunctionBuilder, expr: &Expr) -> CompileResult<TypeRef> {
        let ty = self.compile_expr(fb, expr)?;
        if ty.class == self.builtins.void {
            return Err(CompileError::new(
                ErrorCode::MissingValue,
                "This expression does not produce a value",
                expr.span(),
            ));
        }
        Ok(ty)
    }

    /// Emits code leaving the value of `expr` on the stack and returns its type.
    fn compile_expr(&mut self, fb: &mut FunctionBuilder, expr: &Expr) -> CompileResult<TypeRef> {
        match expr {
            Expr::Int { value, .. } => {
                if let Ok(small) = i32::try_from(*value) {
                    fb.emit(Instruction::LdcI4(small));
                    Ok(TypeRef::plain(self.builtins.i32))
                } else {
                    fb.emit(Instruction::LdcI8(*value));
                    Ok(TypeRef::plain(self.builtins.i64))
                }
            }

            Expr::Float { value, .. } => {
                if *value > f64::from(f32::MAX) {
                    fb.emit(Instruction::LdcR8(*value));
                    Ok(TypeRef::plain(self.builtins.f64))
                } else {
                    fb.emit(Instruction::LdcR4(*value as f32));
                    Ok(TypeRef::plain(self.builtins.f32))
                }
            }

            Expr::Str { value, .. } => {
                fb.emit(Instruction::Ldstr(value.clone()));
                Ok(TypeRef::plain(self.builtins.string))
            }

            Expr::Ident { name, span } => self.compile_ident(fb, name, *span),

            Expr::Binary {
                left, op, right, span,
            } => self.compile_binary(fb, left, *op, right, *span),

            Expr::Unary { op, operand, span } => {
                let ty = self.compile_value(fb, operand)?;
                match op {
                    UnaryOp::Pos | UnaryOp::Neg if self.builtins.is_numeric(ty.class) => {
                        if *op == UnaryOp::Neg {
                            fb.emit(Instruction::Neg);
                        }
                        Ok(ty)
                    }
                    UnaryOp::Pos | UnaryOp::Neg => Err(CompileError::new(
                        ErrorCode::UnimplementedClassMethod,
                        format!("The type '{}' does not implement negation", self.display(ty)),
                        *span,
                    )),
                    UnaryOp::Not => self.dispatch_operator(fb, ty, Operation::Not, None, *span),
                }
            }

            Expr::Call {
                callee,
                callee_span,
                args,
                ..
            } => self.compile_call(fb, callee, *callee_span, args),

            Expr::Cast {
                expr,
                target,
                target_span,
                span,
            } => {
                let from = self.compile_value(fb, expr)?;
                let ns = self.namespace_of(fb.class);
                let to = self.resolve_type(target, ns, *target_span)?;

                let kind = [
                    (self.builtins.i32, ConvKind::I4),
                    (self.builtins.i64, ConvKind::I8),
                    (self.builtins.f32, ConvKind::R4),
                    (self.builtins.f64, ConvKind::R8),
                ]
                .iter()
                .find(|(class, _)| *class == to.class)
                .map(|(_, kind)| *kind);

                match kind {
                    Some(kind) if self.builtins.is_numeric(from.class) && !to.is_address() => {
                        fb.emit(Instruction::Conv(kind));
                        Ok(to)
                    }
                    _ => Err(CompileError::new(
                        ErrorCode::UnimplementedClassMethod,
                        format!(
                            "The type '{}' cannot be cast to '{}'",
                            self.display(from),
                            self.display(to)
                        ),
                        *span,
                    )),
                }
            }
        }
    }

    fn compile_ident(&mut self, fb: &mut FunctionBuilder, name: &str, span: Span) -> CompileResult<TypeRef> {
        if let Some((slot, ty)) = fb.locals.get(name) {
            fb.emit(Instruction::Ldloc(slot));
            if ty.is_address() {
                fb.emit(Instruction::Ldind(self.element_kind(ty)));
                return Ok(ty.value_type());
            }
            return Ok(ty);
        }

        let unknown = || {
            CompileError::new(
                ErrorCode::UnknownVariable,
                format!("The variable '{}' is not defined in this context", name),
                span,
            )
        };
        let field = self
            .registry
            .class(fb.class)
            .field(name)
            .cloned()
            .ok_or_else(unknown)?;
        let field_ref = self.registry.field_ref(fb.class, &field);

        if field.is_static {
            fb.emit(Instruction::Ldsfld(field_ref));
        } else if fb.sig.takes_receiver() {
            fb.emit(Instruction::Ldarg(0));
            fb.emit(Instruction::Ldfld(field_ref));
        } else {
            // No receiver: the field's default stands in for its value.
            let default = match &field.default {
                Some(default) if !self.inlining.contains(&field.name) => default,
                _ => return Err(unknown()),
            };
            self.inlining.push(field.name.clone());
            let ty = self.compile_value(fb, default);
            self.inlining.pop();
            let ty = ty?;
            if ty != field.ty {
                return Err(self.field_default_conflict(&field, ty, default.span()));
            }
        }
        Ok(field.ty)
    }

    fn element_kind(&self, ty: TypeRef) -> ElementKind {
        let builtins = &self.builtins;
        match ty.class {
            class if class == builtins.i32 => ElementKind::I4,
            class if class == builtins.i64 => ElementKind::I8,
            class if class == builtins.f32 => ElementKind::R4,
            class if class == builtins.f64 => ElementKind::R8,
            _ => ElementKind::Ref,
        }
    }

    fn compile_binary(
        &mut self,
        fb: &mut FunctionBuilder,
        left: &Expr,
        op: BinOp,
        right: &Expr,
        span: Span,
    ) -> CompileResult<TypeRef> {
        let left_ty = self.compile_value(fb, left)?;
        let operation = Operation::from_binop(op);
        let ty = self.dispatch_operator(fb, left_ty, operation, Some(right), span)?;
        if op == BinOp::Ne {
            fb.emit(Instruction::LdcI4(0));
            fb.emit(Instruction::Ceq);
        }
        Ok(ty)
    }

    /// Resolves `op` on the class of `operand` (already on the stack),
    /// pushes `right` if given, then splices or calls the operator method.
    fn dispatch_operator(
        &mut self,
        fb: &mut FunctionBuilder,
        operand: TypeRef,
        op: Operation,
        right: Option<&Expr>,
        span: Span,
    ) -> CompileResult<TypeRef> {
        let class = self.registry.class(operand.class);
        let method = class.operator_method(op).cloned().ok_or_else(|| {
            CompileError::new(
                ErrorCode::UnimplementedClassMethod,
                format!(
                    "The type '{}' does not implement the operation {:?}",
                    class.cover_name, op
                ),
                span,
            )
        })?;

        let expected = op.arity();
        if method.sig.params.len() != expected {
            return Err(CompileError::new(
                ErrorCode::TypeConflict,
                format!(
                    "The operator method '{}' of '{}' must take {} parameter(s)",
                    method.sig.name, class.cover_name, expected
                ),
                span,
            ));
        }

        if let Some(right) = right {
            let right_ty = self.compile_value(fb, right)?;
            let wanted = method.sig.params[1].1;
            if right_ty != wanted {
                return Err(CompileError::new(
                    ErrorCode::TypeConflict,
                    format!(
                        "Type mismatch! The operation {:?} on '{}' expects '{}' on the right, got '{}'",
                        op,
                        self.display(operand),
                        self.display(wanted),
                        self.display(right_ty)
                    ),
                    right.span(),
                ));
            }
        }

        match &method.body {
            FunctionBody::Inline(template) => {
                for instruction in template {
                    fb.emit(instruction.clone());
                }
            }
            _ => {
                let pushes = usize::from(method.sig.return_type.class != self.builtins.void);
                fb.emit(Instruction::Call {
                    target: self.registry.call_target(&method.sig),
                    pops: expected,
                    pushes,
                });
            }
        }
        Ok(method.sig.return_type)
    }

    fn compile_call(
        &mut self,
        fb: &mut FunctionBuilder,
        callee: &str,
        span: Span,
        args: &[Expr],
    ) -> CompileResult<TypeRef> {
        let not_found = || {
            CompileError::new(
                ErrorCode::UnknownFunction,
                format!(
                    "The function '{}' was not found or could not be accessed in this context!",
                    callee
                ),
                span,
            )
        };
        let sig = self
            .registry
            .class(fb.class)
            .function(callee)
            .map(|function| function.sig.clone())
            .ok_or_else(not_found)?;

        if sig.takes_receiver() {
            if !fb.sig.takes_receiver() {
                return Err(not_found());
            }
            fb.emit(Instruction::Ldarg(0));
        }

        if args.len() != sig.params.len() {
            return Err(CompileError::new(
                ErrorCode::TypeConflict,
                format!(
                    "The function '{}' takes {} argument(s) but {} were given",
                    callee,
                    sig.params.len(),
                    args.len()
                ),
                span,
            ));
        }

        for (arg, (param_name, param_ty)) in args.iter().zip(&sig.params) {
            let conflict = |this: &Self, got: String| {
                CompileError::new(
                    ErrorCode::TypeConflict,
                    format!(
                        "Type mismatch! The parameter '{}' of '{}' is '{}', got '{}'",
                        param_name,
                        callee,
                        this.display(*param_ty),
                        got
                    ),
                    arg.span(),
                )
            };

            if param_ty.is_address() {
                // By-reference arguments pass the address of a local.
                let local = match arg {
                    Expr::Ident { name, .. } => fb.locals.get(name),
                    _ => None,
                };
                match local {
                    Some((slot, ty)) if ty.value_type() == param_ty.value_type() => {
                        fb.emit(if ty.is_address() {
                            Instruction::Ldloc(slot)
                        } else {
                            Instruction::Ldloca(slot)
                        });
                    }
                    Some((_, ty)) => return Err(conflict(&*self, self.display(ty))),
                    None => {
                        return Err(conflict(
                            &*self,
                            "a value that is not a local variable".to_string(),
                        ))
                    }
                }
            } else {
                let ty = self.compile_value(fb, arg)?;
                if ty != *param_ty {
                    return Err(conflict(&*self, self.display(ty)));
                }
            }
        }

        let pops = sig.params.len() + usize::from(sig.takes_receiver());
        let pushes = usize::from(sig.return_type.class != self.builtins.void);
        fb.emit(Instruction::Call {
            target: self.registry.call_target(&sig),
            pops,
            pushes,
        });
        Ok(sig.return_type)
    }
}
