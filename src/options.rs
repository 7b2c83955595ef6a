//! # Options Module
//!
//! Compilation toggles. A [`CompileOptions`] value is built once by the
//! driver (CLI defaults), then overridden by directive comments found in
//! the source (`#:trimunreachablecode>true`), and finally handed to the
//! compiler, which only reads it.

use crate::error::Span;

// -----------------------------------------------------------------------------
// DIRECTIVES
// -----------------------------------------------------------------------------

/// Every directive name the lexer recognizes after `#:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    DevDebug,
    TrimUnreachableCode,
    WarnMainNotDefined,
}

impl DirectiveKind {
    const TABLE: [(&'static str, DirectiveKind); 3] = [
        ("devdebug", DirectiveKind::DevDebug),
        ("trimunreachablecode", DirectiveKind::TrimUnreachableCode),
        ("warnmainnotdefined", DirectiveKind::WarnMainNotDefined),
    ];

    /// Case-insensitive lookup in the fixed directive table.
    pub fn lookup(name: &str) -> Option<DirectiveKind> {
        Self::TABLE
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }
}

/// A parsed `#:name>bool` comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub value: bool,
    pub span: Span,
}

impl Directive {
    /// Parses the body of a directive comment (the text after `#:`).
    /// Returns `None` for unknown names or a malformed boolean.
    pub fn parse(body: &str, span: Span) -> Option<Directive> {
        let (name, value) = body.split_once('>')?;
        let kind = DirectiveKind::lookup(name.trim())?;
        let value = match value.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => return None,
        };
        Some(Directive { kind, value, span })
    }
}

// -----------------------------------------------------------------------------
// COMPILE OPTIONS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Print the full internal form of errors.
    pub dev_debug: bool,

    pub disable_warning_main_not_defined: bool,
    pub disable_warning_useless_code: bool,
    pub disable_warning_unreachable_code: bool,

    /// Drop statements that follow a `ret` or `br` in the same segment.
    pub trim_unreachable_code: bool,
    /// Drop bare non-call expression statements instead of emitting them.
    pub trim_useless_code: bool,

    /// Whether a missing `main` is worth a warning (executables only).
    pub require_main: bool,
    /// Name written in the `.assembly` directive.
    pub assembly_name: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dev_debug: false,
            disable_warning_main_not_defined: false,
            disable_warning_useless_code: false,
            disable_warning_unreachable_code: false,
            trim_unreachable_code: false,
            trim_useless_code: false,
            require_main: true,
            assembly_name: "Program".to_string(),
        }
    }
}

impl CompileOptions {
    /// Disables (`true`) or enables (`false`) every optional warning.
    pub fn set_all_warnings(&mut self, disabled: bool) {
        self.disable_warning_main_not_defined = disabled;
        self.disable_warning_useless_code = disabled;
        self.disable_warning_unreachable_code = disabled;
    }

    pub fn set_all_trim(&mut self, state: bool) {
        self.trim_unreachable_code = state;
        self.trim_useless_code = state;
    }

    pub fn apply(&mut self, directive: &Directive) {
        match directive.kind {
            DirectiveKind::DevDebug => self.dev_debug = directive.value,
            DirectiveKind::TrimUnreachableCode => self.trim_unreachable_code = directive.value,
            DirectiveKind::WarnMainNotDefined => {
                self.disable_warning_main_not_defined = !directive.value
            }
        }
    }

    /// Applies every directive in source order; later ones win.
    pub fn apply_all(&mut self, directives: &[Directive]) {
        for directive in directives {
            self.apply(directive);
        }
    }
}
