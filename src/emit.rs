//! # Emit Module
//!
//! Pure rendering of a compiled [`Program`] into assembly text:
//! namespaces, classes, fields, methods, segments, instructions. Nothing
//! here inspects the AST or changes the registry.

use std::fmt::Write;

use crate::compiler::Program;
use crate::types::{ClassDescriptor, FunctionBody, FunctionDescriptor, Registry};

const INDENT: &str = "  ";

/// Renders the whole program. Empty namespaces are skipped.
pub fn render(program: &Program, assembly_name: &str) -> String {
    let registry = &program.registry;
    let mut out = String::new();

    out.push_str(".assembly extern mscorlib {}\n");
    let _ = writeln!(out, ".assembly {} {{}}", assembly_name);

    for namespace in registry.namespaces() {
        if namespace.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n.namespace {} {{", namespace.name);
        for &id in namespace.classes() {
            render_class(&mut out, registry, registry.class(id));
        }
        out.push_str("}\n");
    }

    tracing::debug!(bytes = out.len(), "rendered assembly text");
    out
}

fn render_class(out: &mut String, registry: &Registry, class: &ClassDescriptor) {
    let visibility = if class.is_public { "public" } else { "private" };
    let _ = writeln!(
        out,
        "{}.class {} auto ansi beforefieldinit {} extends [mscorlib]System.Object {{",
        INDENT, visibility, class.name
    );

    for field in &class.fields {
        let _ = writeln!(
            out,
            "{}{}.field {}{} {} {}",
            INDENT,
            INDENT,
            if field.is_public { "public" } else { "private" },
            if field.is_static { " static" } else { "" },
            registry.il_type(field.ty),
            field.name
        );
    }

    for function in &class.functions {
        if matches!(function.body, FunctionBody::Segments(_)) {
            render_method(out, registry, function);
        }
    }

    let _ = writeln!(out, "{}}}", INDENT);
}

/// Method header up to and excluding `{`.
pub fn method_header(registry: &Registry, function: &FunctionDescriptor) -> String {
    let sig = &function.sig;
    let mut parts = vec![if sig.is_public { "public" } else { "private" }];
    if sig.is_special && sig.name.starts_with('.') {
        parts.push("hidebysig specialname rtspecialname");
    }
    if sig.takes_receiver() {
        parts.push("instance");
    } else {
        parts.push("static");
    }

    let params: Vec<String> = sig
        .params
        .iter()
        .map(|(name, ty)| format!("{} {}", registry.il_type(*ty), name))
        .collect();

    format!(
        ".method {} {} {}({}) cil managed",
        parts.join(" "),
        registry.il_type(sig.return_type),
        sig.name,
        params.join(", ")
    )
}

fn render_method(out: &mut String, registry: &Registry, function: &FunctionDescriptor) {
    let pad = INDENT.repeat(2);
    let body = INDENT.repeat(3);

    let _ = writeln!(out, "{}{} {{", pad, method_header(registry, function));
    if function.entry_point {
        let _ = writeln!(out, "{}.entrypoint", body);
    }
    let _ = writeln!(out, "{}.maxstack {}", body, function.max_stack);

    if !function.locals.is_empty() {
        let _ = writeln!(out, "{}.locals init (", body);
        let count = function.locals.len();
        for (slot, (name, ty)) in function.locals.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}{}[{}] {} {}{}",
                body,
                INDENT,
                slot,
                registry.il_type_bare(*ty),
                name,
                if slot + 1 < count { "," } else { "" }
            );
        }
        let _ = writeln!(out, "{})", body);
    }

    for segment in function.segments() {
        let _ = writeln!(out, "{}{}:", body, segment.name);
        for instruction in &segment.instructions {
            let _ = writeln!(out, "{}{}{}", body, INDENT, instruction);
        }
    }

    let _ = writeln!(out, "{}}}", pad);
}
