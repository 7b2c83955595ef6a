//! # Tests Module
//!
//! Unit and end-to-end tests for the LIA compiler pipeline: lexer, parser,
//! registry, code generation, assembly rendering and the assembler
//! boundary, plus whole-program properties checked over every compiled
//! function.

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::assembler::{Architecture, Assembler, BuildKind};
    use crate::ast::{BinOp, Expr, Item, Stmt, UnaryOp};
    use crate::builtin::{self, BuiltinClass, NumericClass};
    use crate::compiler::{Compiler, Program};
    use crate::emit;
    use crate::error::{
        format_diagnostic, format_error, CompileError, Diagnostic, ErrorCode, Span, WarningCode,
    };
    use crate::lexer::Lexer;
    use crate::opcode::{ConvKind, ElementKind, Instruction, Segment};
    use crate::options::{CompileOptions, Directive, DirectiveKind};
    use crate::parser::Parser;
    use crate::token::TokenKind;
    use crate::types::{FunctionDescriptor, Operation, Registry, TypeName, TypeRef};

    // =========================================================================
    // HELPERS — Run LIA source through the pipeline
    // =========================================================================

    /// Tokenizes source and returns the token kinds (excluding Eof).
    fn tokenize(source: &str) -> Result<Vec<TokenKind>, String> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize().map_err(|e| e.to_string())?;
        Ok(tokens
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !matches!(k, TokenKind::Eof))
            .collect())
    }

    fn try_parse(source: &str) -> Result<Vec<Item>, CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        Parser::new(tokens).parse()
    }

    fn parse(source: &str) -> Vec<Item> {
        try_parse(source).unwrap_or_else(|e| panic!("parse failed: {}", e))
    }

    /// Lex, parse and compile with explicit options, collecting warnings.
    fn compile_with(
        source: &str,
        options: &CompileOptions,
    ) -> Result<(Program, Vec<Diagnostic>), CompileError> {
        let items = try_parse(source)?;
        let mut diagnostics = Vec::new();
        let program = Compiler::new(options, &mut diagnostics).compile(&items)?;
        Ok((program, diagnostics))
    }

    fn compile(source: &str) -> (Program, Vec<Diagnostic>) {
        compile_with(source, &CompileOptions::default())
            .unwrap_or_else(|e| panic!("compilation failed: {}", e))
    }

    /// Runs source and expects a specific error code.
    fn expect_error(source: &str, code: ErrorCode) -> CompileError {
        match compile_with(source, &CompileOptions::default()) {
            Ok(_) => panic!("Expected {:?} error but compilation succeeded", code),
            Err(e) => {
                assert_eq!(e.code, code, "Expected {:?} error, got: {}", code, e);
                e
            }
        }
    }

    /// Finds `class::name` in any namespace.
    fn function<'a>(program: &'a Program, class: &str, name: &str) -> &'a FunctionDescriptor {
        let registry = &program.registry;
        registry
            .namespaces()
            .iter()
            .find_map(|ns| ns.lookup(class))
            .and_then(|id| registry.class(id).function(name))
            .unwrap_or_else(|| panic!("no function {}::{}", class, name))
    }

    fn segment<'a>(function: &'a FunctionDescriptor, name: &str) -> &'a Segment {
        function
            .segments()
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no segment {} in {}", name, function.sig.name))
    }

    fn segment_names(function: &FunctionDescriptor) -> Vec<&str> {
        function.segments().iter().map(|s| s.name.as_str()).collect()
    }

    fn has_warning(diagnostics: &[Diagnostic], code: WarningCode) -> bool {
        diagnostics.iter().any(|d| d.is_warning(code))
    }

    /// Expression of the first `return` in the first method of the first class.
    fn first_return(items: &[Item]) -> &Expr {
        let Some(Item::Class(class)) = items.first() else {
            panic!("expected a class");
        };
        class.methods[0]
            .body
            .stmts
            .iter()
            .find_map(|stmt| match stmt {
                Stmt::Return { value: Some(expr), .. } => Some(expr),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no return with a value"))
    }

    /// Checks that every sub-expression lies inside its parent's span.
    fn assert_nested_spans(expr: &Expr) {
        let children: Vec<&Expr> = match expr {
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Cast { expr, .. } => vec![expr.as_ref()],
            Expr::Call { args, .. } => args.iter().collect(),
            _ => Vec::new(),
        };
        for child in children {
            assert!(
                expr.span().contains(child.span()),
                "{:?} escapes {:?}",
                child.span(),
                expr.span()
            );
            assert_nested_spans(child);
        }
    }

    /// Replays each segment from an empty stack and checks the recorded bound.
    fn assert_stack_bounded(program: &Program) {
        let registry = &program.registry;
        for ns in registry.namespaces() {
            for &id in ns.classes() {
                for function in &registry.class(id).functions {
                    for segment in function.segments() {
                        let mut depth = 0usize;
                        for instruction in &segment.instructions {
                            let (pops, pushes) = instruction.stack_effect();
                            assert!(
                                depth >= pops,
                                "underflow at '{}' in {}::{}",
                                instruction,
                                function.sig.class,
                                function.sig.name
                            );
                            depth = depth - pops + pushes;
                            assert!(
                                depth <= function.max_stack,
                                "depth {} exceeds .maxstack {} in {}",
                                depth,
                                function.max_stack,
                                function.sig.name
                            );
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // LEXER TESTS
    // =========================================================================

    #[test]
    fn lexer_integer_and_float_literals() {
        let kinds = tokenize("42 1.5 99999999999999999999").unwrap();
        assert_eq!(
            kinds,
            vec![TokenKind::Int(42), TokenKind::Float(1.5), TokenKind::Float(1e20)]
        );
    }

    #[test]
    fn lexer_second_dot_ends_number() {
        let kinds = tokenize("1.2.3").unwrap();
        assert_eq!(
            kinds,
            vec![TokenKind::Float(1.2), TokenKind::Dot, TokenKind::Int(3)]
        );
    }

    #[test]
    fn lexer_strings_have_no_escapes() {
        let kinds = tokenize(r#""hi \n there""#).unwrap();
        assert_eq!(kinds, vec![TokenKind::Str(r"hi \n there".to_string())]);
    }

    #[test]
    fn lexer_unterminated_string_runs_to_end() {
        let kinds = tokenize("\"open ended").unwrap();
        assert_eq!(kinds, vec![TokenKind::Str("open ended".to_string())]);
    }

    #[test]
    fn lexer_keywords() {
        let kinds = tokenize(
            "public private class def return if else elif while namespace static field as",
        )
        .unwrap();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Public,
                TokenKind::Private,
                TokenKind::Class,
                TokenKind::Def,
                TokenKind::Return,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::Elif,
                TokenKind::While,
                TokenKind::Namespace,
                TokenKind::Static,
                TokenKind::Field,
                TokenKind::As,
            ]
        );
    }

    #[test]
    fn lexer_operators() {
        let kinds = tokenize("+ - * / % == != < > <= >= && & || | ! = =<").unwrap();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::And,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Or,
                TokenKind::Bang,
                TokenKind::Eq,
                TokenKind::As,
            ]
        );
    }

    #[test]
    fn lexer_type_modifiers_are_identifiers() {
        let kinds = tokenize("i32_ _f64").unwrap();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("i32_".to_string()),
                TokenKind::Ident("_f64".to_string()),
            ]
        );
    }

    #[test]
    fn lexer_skips_comments() {
        let kinds = tokenize("a # line comment\nb #* block\n comment *# c").unwrap();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Ident("b".to_string()),
                TokenKind::Ident("c".to_string()),
            ]
        );
    }

    #[test]
    fn lexer_records_directives() {
        let mut lexer =
            Lexer::new("#:TrimUnreachableCode> TRUE\n#*:devdebug>true*#\n#:bogus>true\nx");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens.len(), 2);

        let kinds: Vec<_> = lexer.directives().iter().map(|d| (d.kind, d.value)).collect();
        assert_eq!(
            kinds,
            vec![
                (DirectiveKind::TrimUnreachableCode, true),
                (DirectiveKind::DevDebug, true),
            ]
        );
    }

    #[test]
    fn lexer_spans_and_text() {
        let tokens = Lexer::new("ab  12").tokenize().unwrap();
        assert_eq!(tokens[0].span, Span::new(0, 2));
        assert_eq!(tokens[1].text, "12");
        assert_eq!(tokens[1].span, Span::new(4, 6));
        assert_eq!(tokens[2].kind, TokenKind::Eof);
        assert_eq!(tokens[2].span, Span::point(6));
    }

    #[test]
    fn lexer_unexpected_character() {
        let err = Lexer::new("a $ b").tokenize().unwrap_err();
        assert_eq!(err.code, ErrorCode::Unintelligible);
        assert_eq!(err.span, Some(Span::new(2, 3)));
        assert!(err.message.contains("'$'"));
    }

    // =========================================================================
    // PARSER TESTS
    // =========================================================================

    #[test]
    fn parser_class_head_visibility() {
        let items = parse("class A: ; private class B: ; class private C: ; public class D: ;");
        let flags: Vec<(String, bool)> = items
            .iter()
            .map(|item| match item {
                Item::Class(c) => (c.name.clone(), c.is_public),
                _ => panic!("expected classes"),
            })
            .collect();
        assert_eq!(
            flags,
            vec![
                ("A".to_string(), true),
                ("B".to_string(), false),
                ("C".to_string(), false),
                ("D".to_string(), true),
            ]
        );
    }

    #[test]
    fn parser_namespace_items() {
        let items = parse("namespace Geo class Point: ;");
        assert!(matches!(&items[0], Item::Namespace { name, .. } if name == "Geo"));
        assert!(matches!(&items[1], Item::Class(c) if c.name == "Point"));
    }

    #[test]
    fn parser_method_head_flags() {
        let items = parse(
            "class V: def private class V opadd(a: V, b: V): return a ; \
             def public static void run: return ; \
             def public i32 get(): return 1 ; ;",
        );
        let Item::Class(class) = &items[0] else {
            panic!("expected a class");
        };
        let op = &class.methods[0];
        assert!(op.is_class_method && !op.is_static && !op.is_public);
        assert_eq!(op.params.len(), 2);
        assert_eq!(op.params[1].type_name, "V");

        let run = &class.methods[1];
        assert!(run.is_static && run.params.is_empty());
        assert_eq!(run.return_type, "void");
        assert!(matches!(run.body.stmts[0], Stmt::Return { value: None, .. }));

        let get = &class.methods[2];
        assert!(!get.is_static && !get.is_class_method && get.params.is_empty());
    }

    #[test]
    fn parser_field_declarations() {
        let items = parse("class A: field public static count i32 = 1 + 2 field private name string ;");
        let Item::Class(class) = &items[0] else {
            panic!("expected a class");
        };
        assert_eq!(class.fields.len(), 2);
        assert!(class.fields[0].is_static && class.fields[0].is_public);
        assert!(matches!(
            class.fields[0].default,
            Some(Expr::Binary { op: BinOp::Add, .. })
        ));
        assert!(!class.fields[1].is_public && class.fields[1].default.is_none());
        assert_eq!(class.fields[1].type_name, "string");
    }

    #[test]
    fn parser_multiplication_binds_tighter() {
        let items = parse("class P: def public static i32 f(): return 1 + 2 * 3 ; ;");
        let Expr::Binary { op: BinOp::Add, left, right, .. } = first_return(&items) else {
            panic!("expected an addition");
        };
        assert!(matches!(left.as_ref(), Expr::Int { value: 1, .. }));
        assert!(matches!(right.as_ref(), Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parser_relational_binds_tighter_than_addition() {
        let items = parse("class P: def public static i32 f(): return 1 + 2 < 3 ; ;");
        let Expr::Binary { op: BinOp::Add, right, .. } = first_return(&items) else {
            panic!("expected an addition at the root");
        };
        assert!(matches!(right.as_ref(), Expr::Binary { op: BinOp::Lt, .. }));
    }

    #[test]
    fn parser_left_associative() {
        let items = parse("class P: def public static i32 f(): return 1 - 2 - 3 ; ;");
        let Expr::Binary { op: BinOp::Sub, left, right, .. } = first_return(&items) else {
            panic!("expected a subtraction");
        };
        assert!(matches!(left.as_ref(), Expr::Binary { op: BinOp::Sub, .. }));
        assert!(matches!(right.as_ref(), Expr::Int { value: 3, .. }));
    }

    #[test]
    fn parser_equality_binds_loosest() {
        let items = parse("class P: def public static i32 f(): return 1 + 1 == 2 ; ;");
        assert!(matches!(
            first_return(&items),
            Expr::Binary { op: BinOp::Eq, .. }
        ));
    }

    #[test]
    fn parser_cast_and_unary() {
        let items = parse("class P: def public static f32 f(a: i32): return -a as f32 + 1.0 ; ;");
        let Expr::Binary { op: BinOp::Add, left, .. } = first_return(&items) else {
            panic!("expected an addition");
        };
        let Expr::Cast { expr, target, .. } = left.as_ref() else {
            panic!("expected a cast");
        };
        assert_eq!(target, "f32");
        assert!(matches!(expr.as_ref(), Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn parser_parentheses_widen_spans() {
        let source = "class P: def public static i32 f(a: i32, b: i32): return (a + b) * -(b) + g((a)) ; ;";
        let items = parse(source);
        let text = |span: Span| &source[span.start..span.end];

        let expr = first_return(&items);
        assert_eq!(text(expr.span()), "(a + b) * -(b) + g((a))");
        assert_nested_spans(expr);

        let Expr::Binary { left, right, .. } = expr else {
            panic!("expected an addition");
        };
        assert_eq!(text(right.span()), "g((a))");
        let Expr::Binary { left, right, .. } = left.as_ref() else {
            panic!("expected a multiplication");
        };
        assert_eq!(text(left.span()), "(a + b)");
        assert_eq!(text(right.span()), "-(b)");
    }

    #[test]
    fn parser_call_arguments() {
        let items = parse("class P: def public static i32 f(): return g(1, h(), 2 + 3) ; ;");
        let Expr::Call { callee, args, .. } = first_return(&items) else {
            panic!("expected a call");
        };
        assert_eq!(callee, "g");
        assert_eq!(args.len(), 3);
        assert!(matches!(&args[1], Expr::Call { args, .. } if args.is_empty()));
    }

    #[test]
    fn parser_if_elif_else() {
        let items = parse(
            "class P: def public static void f(a: i32): \
             if a == 1: return ; elif a == 2: return ; elif a == 3: return ; else: return ; ; ;",
        );
        let Item::Class(class) = &items[0] else {
            panic!("expected a class");
        };
        let Stmt::If { branches, else_body, .. } = &class.methods[0].body.stmts[0] else {
            panic!("expected an if statement");
        };
        assert_eq!(branches.len(), 3);
        assert!(else_body.is_some());
    }

    #[test]
    fn parser_assignment_forms() {
        let items = parse("class P: def public static void f(): a: i32 b = 2 c: f32 = 1.0 ; ;");
        let Item::Class(class) = &items[0] else {
            panic!("expected a class");
        };
        let forms: Vec<(bool, bool)> = class.methods[0]
            .body
            .stmts
            .iter()
            .map(|stmt| match stmt {
                Stmt::Assign { type_name, value, .. } => (type_name.is_some(), value.is_some()),
                _ => panic!("expected assignments"),
            })
            .collect();
        assert_eq!(forms, vec![(true, false), (false, true), (true, true)]);
    }

    #[test]
    fn parser_missing_semicolon_is_end_of_file() {
        let source = "class A: def public static i32 f(): return 1";
        let err = try_parse(source).unwrap_err();
        assert_eq!(err.code, ErrorCode::EndOfFile);
        assert_eq!(err.span, Some(Span::point(source.len())));
    }

    #[test]
    fn parser_statement_in_class_body_is_invalid() {
        let err = try_parse("class A: return ;").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidToken);
        assert!(err.message.contains("Return"));
    }

    #[test]
    fn parser_method_needs_visibility() {
        let err = try_parse("class A: def static void f(): return ; ;").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidToken);
    }

    #[test]
    fn parser_top_level_statement_rejected() {
        let err = try_parse("x = 1").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidToken);
    }

    // =========================================================================
    // OPTIONS & DIRECTIVES
    // =========================================================================

    #[test]
    fn directive_parse() {
        let span = Span::new(0, 10);
        let directive = Directive::parse(" TrimUnreachableCode > True ", span).unwrap();
        assert_eq!(directive.kind, DirectiveKind::TrimUnreachableCode);
        assert!(directive.value);
        assert!(Directive::parse("devdebug>maybe", span).is_none());
        assert!(Directive::parse("devdebug", span).is_none());
        assert!(Directive::parse("nosuch>true", span).is_none());
    }

    #[test]
    fn options_apply_directives() {
        let span = Span::default();
        let directives = [
            Directive::parse("warnmainnotdefined>false", span).unwrap(),
            Directive::parse("devdebug>true", span).unwrap(),
            Directive::parse("devdebug>false", span).unwrap(),
        ];
        let mut options = CompileOptions::default();
        options.apply_all(&directives);
        assert!(options.disable_warning_main_not_defined);
        assert!(!options.dev_debug);
    }

    #[test]
    fn options_bulk_setters() {
        let mut options = CompileOptions::default();
        options.set_all_warnings(true);
        options.set_all_trim(true);
        assert!(options.disable_warning_useless_code && options.disable_warning_unreachable_code);
        assert!(options.disable_warning_main_not_defined);
        assert!(options.trim_useless_code && options.trim_unreachable_code);
    }

    // =========================================================================
    // TYPES & REGISTRY
    // =========================================================================

    #[test]
    fn type_name_modifiers() {
        assert_eq!(
            TypeName::parse("i32_"),
            TypeName { base: "i32".to_string(), by_ref: true, out: false }
        );
        assert_eq!(
            TypeName::parse("_i32"),
            TypeName { base: "i32".to_string(), by_ref: false, out: true }
        );
        assert_eq!(TypeName::parse("_").base, "_");
    }

    #[test]
    fn registry_builtins_and_rendering() {
        let mut registry = Registry::new();
        let builtins = builtin::install_all(&mut registry);
        assert_eq!(registry.builtin("none"), Some(builtins.void));

        let by_ref = registry.resolve(&TypeName::parse("i32_"), 0).unwrap();
        assert_eq!(registry.il_type(by_ref), "int32&");
        assert_eq!(registry.display_type(by_ref), "i32_");

        let out = registry.resolve(&TypeName::parse("_f64"), 0).unwrap();
        assert_eq!(registry.il_type(out), "[out] float64&");
        assert_eq!(registry.il_type_bare(out), "float64&");
        assert_eq!(registry.display_type(out), "_f64");

        assert!(registry.resolve(&TypeName::parse("Missing"), 0).is_none());
    }

    #[test]
    fn registry_namespaces() {
        let mut registry = Registry::new();
        let geo = registry.open_namespace("Geo");
        assert_eq!(registry.open_namespace("Geo"), geo);
        assert_eq!(registry.namespaces().len(), 2);

        let point = registry.declare_class(geo, "Point", true).unwrap();
        assert!(registry.declare_class(geo, "Point", true).is_none());
        assert!(registry.declare_class(0, "Point", true).is_some());

        let ty = registry.resolve(&TypeName::parse("Point"), geo).unwrap();
        assert_eq!(ty, TypeRef::plain(point));
        assert_eq!(registry.il_type(ty), "class Geo.Point");
    }

    #[test]
    fn builtin_operator_tables() {
        let mut registry = Registry::new();
        let builtins = builtin::install_all(&mut registry);

        let i32_class = registry.class(builtins.i32);
        assert_eq!(i32_class.operator_count(), Operation::DISPATCHED.len());
        for op in Operation::DISPATCHED {
            let method = i32_class.operator_method(op).unwrap();
            assert_eq!(method.sig.params.len(), op.arity());
            assert!(method.sig.is_builtin && method.sig.is_operator);
        }

        assert_eq!(registry.class(builtins.string).operator_count(), 0);
        assert!(registry
            .class(builtins.void)
            .operator_method(Operation::Add)
            .is_none());
    }

    #[test]
    fn operation_keys() {
        assert_eq!(Operation::from_binop(BinOp::Ne), Operation::Equals);
        assert_eq!(Operation::from_binop(BinOp::Ge).method_key(), Some("opgreaterequals"));
        assert_eq!(Operation::Cast.method_key(), None);
        assert_eq!(Operation::Not.arity(), 1);
        assert_eq!(Operation::Or.arity(), 2);
    }

    // =========================================================================
    // OPCODE TESTS
    // =========================================================================

    #[test]
    fn opcode_integer_encodings() {
        let rendered: Vec<String> = [-1, 0, 8, 9, -128, 127, 128, -129, 100_000]
            .iter()
            .map(|&v| Instruction::LdcI4(v).to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "ldc.i4.m1",
                "ldc.i4.0",
                "ldc.i4.8",
                "ldc.i4.s 9",
                "ldc.i4.s -128",
                "ldc.i4.s 127",
                "ldc.i4 128",
                "ldc.i4 -129",
                "ldc.i4 100000",
            ]
        );
        assert_eq!(Instruction::LdcI8(5_000_000_000).to_string(), "ldc.i8 5000000000");
    }

    #[test]
    fn opcode_slot_encodings() {
        assert_eq!(Instruction::Ldloc(3).to_string(), "ldloc.3");
        assert_eq!(Instruction::Stloc(4).to_string(), "stloc.s 4");
        assert_eq!(Instruction::Ldarg(300).to_string(), "ldarg 300");
        assert_eq!(Instruction::Ldloca(2).to_string(), "ldloca.s 2");
    }

    #[test]
    fn opcode_float_immediates_keep_a_point() {
        assert_eq!(Instruction::LdcR4(1.0).to_string(), "ldc.r4 1.0");
        assert_eq!(Instruction::LdcR4(2.5).to_string(), "ldc.r4 2.5");
        assert_eq!(Instruction::LdcR8(1e20).to_string(), "ldc.r8 1.0E20");
    }

    #[test]
    fn opcode_misc_rendering() {
        assert_eq!(Instruction::Ldstr("hi".to_string()).to_string(), "ldstr \"hi\"");
        assert_eq!(Instruction::Conv(ConvKind::R8).to_string(), "conv.r8");
        assert_eq!(Instruction::CgtUn.to_string(), "cgt.un");
        assert_eq!(Instruction::Brfalse("AfterCond_1".to_string()).to_string(), "brfalse AfterCond_1");
        assert_eq!(Instruction::Ret { value: true }.to_string(), "ret");
        assert_eq!(Instruction::Ldind(ElementKind::Ref).to_string(), "ldind.ref");
        assert_eq!(Instruction::Stind(ElementKind::I8).to_string(), "stind.i8");
    }

    #[test]
    fn opcode_string_operands_are_escaped() {
        let text = "C:\\dir\nnext\tcol".to_string();
        assert_eq!(
            Instruction::Ldstr(text).to_string(),
            "ldstr \"C:\\\\dir\\nnext\\011col\""
        );

        let (program, _) = compile("class P: def public static string f(): return \"a\\b\" ; ;");
        let il = emit::render(&program, "Program");
        assert!(il.contains("        ldstr \"a\\\\b\"\n"));
    }

    #[test]
    fn opcode_stack_effects() {
        assert_eq!(Instruction::Stfld(String::new()).stack_effect(), (2, 0));
        assert_eq!(Instruction::Ldfld(String::new()).stack_effect(), (1, 1));
        assert_eq!(Instruction::Ldind(ElementKind::I4).stack_effect(), (1, 1));
        assert_eq!(Instruction::Stind(ElementKind::I4).stack_effect(), (2, 0));
        assert_eq!(Instruction::Ret { value: true }.stack_effect(), (1, 0));
        assert_eq!(Instruction::Ret { value: false }.stack_effect(), (0, 0));
        let call = Instruction::Call { target: String::new(), pops: 3, pushes: 1 };
        assert_eq!(call.stack_effect(), (3, 1));
    }

    #[test]
    fn segment_termination() {
        let mut segment = Segment::new("Start");
        assert!(!segment.is_terminated());
        segment.instructions.push(Instruction::Brtrue("Cond_1".to_string()));
        assert!(!segment.is_terminated());
        segment.instructions.push(Instruction::Br("AfterCond_0".to_string()));
        assert!(segment.is_terminated());
    }

    // =========================================================================
    // ERROR RENDERING
    // =========================================================================

    #[test]
    fn error_display_carries_code() {
        let err = CompileError::new(ErrorCode::TypeConflict, "bad", Span::new(0, 1));
        assert_eq!(err.to_string(), "TypeConflict [12] : bad");
        assert_eq!(ErrorCode::Redeclaration.value(), 16);
    }

    #[test]
    fn error_render_with_context() {
        let source = "line1\nab cd\nline3";
        let err = CompileError::new(ErrorCode::TypeConflict, "bad", Span::new(6, 8));
        let expected = "In file 'x.lia' at line 2:1-2 :\n\
                        1 | line1\n\
                        2 > ab cd\n  | ^^\n\
                        3 | line3\n\
                        Error TypeConflict [12] : bad";
        assert_eq!(format_error(&err, source, "x.lia"), expected);
    }

    #[test]
    fn warning_without_span_renders_message_only() {
        let diag = Diagnostic::warning(WarningCode::MainNotDefined, "no main", None);
        assert_eq!(
            format_diagnostic(&diag, "", "x.lia"),
            "Warning MainNotDefined [2] : no main"
        );
    }

    #[test]
    fn span_helpers() {
        let a = Span::new(2, 4);
        let b = Span::new(6, 9);
        assert_eq!(a.to(b), Span::new(2, 9));
        assert!(a.to(b).contains(b));
        assert_eq!(b.len(), 3);
        assert_eq!(Span::new(7, 8).line_col("ab\ncd\nef"), (2, 1));
    }

    // =========================================================================
    // COMPILER — Scenarios
    // =========================================================================

    // Field members take no `;` of their own, and every block closes with
    // exactly one `;`. A `;` after a field would end the class body instead.

    #[test]
    fn scenario_field_default_in_static_method() {
        let (program, diagnostics) =
            compile("class A: field public x i32 = 5 def public static i32 get(): return x ; ;");

        let get = function(&program, "A", "get");
        assert_eq!(
            segment(get, "Start").instructions,
            vec![Instruction::LdcI4(5), Instruction::Ret { value: true }]
        );

        let ctor = function(&program, "A", ".ctor");
        assert_eq!(
            segment(ctor, "Start").instructions,
            vec![
                Instruction::Ldarg(0),
                Instruction::CallBaseCtor,
                Instruction::Ldarg(0),
                Instruction::LdcI4(5),
                Instruction::Stfld("int32 Program.A::x".to_string()),
                Instruction::Ret { value: false },
            ]
        );
        assert_eq!(ctor.max_stack, 2);
        assert!(has_warning(&diagnostics, WarningCode::MainNotDefined));

        let err = try_parse("class A: field public x i32 = 5 ; def public static i32 get(): return x ; ;")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidToken);
    }

    #[test]
    fn scenario_main_adds_two_locals() {
        let (program, diagnostics) = compile(
            "class P: def public static i32 main(): a: i32 = 2 b: i32 = 3 return a + b ; ;",
        );
        assert!(program.main_defined);
        assert!(diagnostics.is_empty());

        let main = function(&program, "P", "main");
        assert!(main.entry_point);
        assert_eq!(main.max_stack, 2);
        assert_eq!(main.locals.len(), 2);
        assert_eq!(
            segment(main, "Start").instructions,
            vec![
                Instruction::LdcI4(2),
                Instruction::Stloc(0),
                Instruction::LdcI4(3),
                Instruction::Stloc(1),
                Instruction::Ldloc(0),
                Instruction::Ldloc(1),
                Instruction::Add,
                Instruction::Ret { value: true },
            ]
        );
    }

    #[test]
    fn scenario_redeclared_local_with_other_type() {
        let err = expect_error(
            "class P: def public static i32 main(): a: i32 = 1 a: f32 = 2.0 return a ; ;",
            ErrorCode::TypeConflict,
        );
        assert!(err.message.contains("'i32'") && err.message.contains("'f32'"));
    }

    #[test]
    fn scenario_unknown_function() {
        let source = "class P: def public static i32 f(): return g() ; ;";
        let err = expect_error(source, ErrorCode::UnknownFunction);
        let at = source.find("g()").unwrap();
        assert_eq!(err.span, Some(Span::new(at, at + 1)));
        assert!(err.message.contains("'g'"));
    }

    #[test]
    fn scenario_while_loop_segments() {
        let (program, _) = compile(
            "class P: def public static i32 main(): \
             i: i32 = 0 while i < 10: i = i + 1 ; return i ; ;",
        );
        let main = function(&program, "P", "main");
        assert_eq!(segment_names(main), vec!["Start", "Cond_0", "AfterCond_1"]);

        assert_eq!(
            segment(main, "Start").instructions,
            vec![
                Instruction::LdcI4(0),
                Instruction::Stloc(0),
                Instruction::Br("Cond_0".to_string()),
            ]
        );
        let cond = &segment(main, "Cond_0").instructions;
        assert_eq!(
            cond[..4],
            [
                Instruction::Ldloc(0),
                Instruction::LdcI4(10),
                Instruction::Clt,
                Instruction::Brfalse("AfterCond_1".to_string()),
            ]
        );
        let back_branches = cond
            .iter()
            .filter(|i| **i == Instruction::Br("Cond_0".to_string()))
            .count();
        assert_eq!(back_branches, 1);
        assert_eq!(cond.last(), Some(&Instruction::Br("Cond_0".to_string())));
        assert_eq!(
            segment(main, "AfterCond_1").instructions,
            vec![Instruction::Ldloc(0), Instruction::Ret { value: true }]
        );
    }

    // =========================================================================
    // COMPILER — Properties
    // =========================================================================

    #[test]
    fn locals_get_distinct_slots() {
        let (program, _) = compile(
            "class P: def public static void main(): \
             a: i32 = 1 b: f32 = 2.0 a = 3 c: i64 = 5000000000 a: i32 = 4 ; ;",
        );
        let main = function(&program, "P", "main");
        let names: Vec<&str> = main.locals.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let stores_to_a = segment(main, "Start")
            .instructions
            .iter()
            .filter(|i| **i == Instruction::Stloc(0))
            .count();
        assert_eq!(stores_to_a, 3);
        assert!(segment(main, "Start")
            .instructions
            .contains(&Instruction::LdcI8(5_000_000_000)));
    }

    #[test]
    fn numeric_operators_splice_templates() {
        let ops = [
            ("+", Operation::Add),
            ("-", Operation::Sub),
            ("*", Operation::Mul),
            ("/", Operation::Div),
            ("%", Operation::Rem),
            ("==", Operation::Equals),
            ("<", Operation::LesserThan),
            (">", Operation::GreaterThan),
            ("<=", Operation::LesserThanEquals),
            (">=", Operation::GreaterThanEquals),
            ("&&", Operation::And),
            ("||", Operation::Or),
        ];
        let classes = [
            ("i32", NumericClass::i32()),
            ("i64", NumericClass::i64()),
            ("f32", NumericClass::f32()),
            ("f64", NumericClass::f64()),
        ];

        for (ty, class) in &classes {
            for (symbol, op) in ops {
                let source = format!(
                    "class P: def public static {ty} f(a: {ty}, b: {ty}): return a {symbol} b ; ;"
                );
                let options = CompileOptions {
                    require_main: false,
                    ..CompileOptions::default()
                };
                let (program, _) = compile_with(&source, &options)
                    .unwrap_or_else(|e| panic!("{} {} failed: {}", ty, symbol, e));

                let mut expected = vec![
                    Instruction::Ldarg(0),
                    Instruction::Stloc(0),
                    Instruction::Ldarg(1),
                    Instruction::Stloc(1),
                    Instruction::Ldloc(0),
                    Instruction::Ldloc(1),
                ];
                expected.extend(class.operator(op).unwrap());
                expected.push(Instruction::Ret { value: true });

                let f = function(&program, "P", "f");
                assert_eq!(segment(f, "Start").instructions, expected, "{} {}", ty, symbol);
            }
        }
    }

    #[test]
    fn not_equals_negates_equality() {
        let (program, _) =
            compile("class P: def public static i64 f(a: i64, b: i64): return a != b ; ;");
        let start = &segment(function(&program, "P", "f"), "Start").instructions;
        assert_eq!(
            start[6..],
            [
                Instruction::Ceq,
                Instruction::LdcI4(0),
                Instruction::Ceq,
                Instruction::Ret { value: true },
            ]
        );
    }

    #[test]
    fn user_operator_becomes_call() {
        let (program, _) = compile(
            "class V: \
             def public class V opadd(a: V, b: V): return a ; \
             def public static V sum(a: V, b: V): return a + b ; ;",
        );
        let sum = function(&program, "V", "sum");
        assert_eq!(
            segment(sum, "Start").instructions[4..],
            [
                Instruction::Ldloc(0),
                Instruction::Ldloc(1),
                Instruction::Call {
                    target: "class Program.V Program.V::opadd(class Program.V, class Program.V)"
                        .to_string(),
                    pops: 2,
                    pushes: 1,
                },
                Instruction::Ret { value: true },
            ]
        );
        let opadd = function(&program, "V", "opadd");
        assert!(opadd.sig.is_operator && !opadd.sig.takes_receiver());
    }

    #[test]
    fn user_equality_supports_not_equals() {
        let (program, _) = compile(
            "class V: \
             def public class V opequals(a: V, b: V): return a ; \
             def public static V differ(a: V, b: V): return a != b ; ;",
        );
        let start = &segment(function(&program, "V", "differ"), "Start").instructions;
        assert!(matches!(start[6], Instruction::Call { .. }));
        assert_eq!(start[7..9], [Instruction::LdcI4(0), Instruction::Ceq]);
    }

    #[test]
    fn if_branches_converge_on_one_after_segment() {
        let (program, _) = compile(
            "class P: def public static i32 main(): a: i32 = 1 b: i32 = 0 \
             if a == 1: b = 1 ; elif a == 2: b = 2 ; else: b = 3 ; return b ; ;",
        );
        let main = function(&program, "P", "main");
        assert_eq!(
            segment_names(main),
            vec!["Start", "AfterCond_0", "Cond_1", "Cond_2"]
        );

        let to_after = Instruction::Br("AfterCond_0".to_string());
        for name in ["Start", "Cond_1", "Cond_2"] {
            let instructions = &segment(main, name).instructions;
            assert_eq!(instructions.last(), Some(&to_after), "segment {}", name);
            assert_eq!(instructions.iter().filter(|i| **i == to_after).count(), 1);
        }

        let start = &segment(main, "Start").instructions;
        assert!(start.contains(&Instruction::Brtrue("Cond_1".to_string())));
        assert!(start.contains(&Instruction::Brtrue("Cond_2".to_string())));
        // else body runs on the fall-through path
        assert_eq!(
            start[start.len() - 3..],
            [Instruction::LdcI4(3), Instruction::Stloc(1), to_after.clone()]
        );
    }

    #[test]
    fn if_without_else_falls_through_to_after() {
        let (program, _) = compile(
            "class P: def public static void f(a: i32): if a == 1: return ; ; ;",
        );
        let f = function(&program, "P", "f");
        assert_eq!(
            segment(f, "Start").instructions[5..],
            [
                Instruction::Brtrue("Cond_1".to_string()),
                Instruction::Br("AfterCond_0".to_string()),
            ]
        );
        assert_eq!(
            segment(f, "Cond_1").instructions,
            vec![Instruction::Ret { value: false }]
        );
        assert_eq!(
            segment(f, "AfterCond_0").instructions,
            vec![Instruction::Ret { value: false }]
        );
    }

    #[test]
    fn if_where_every_branch_returns_drops_after_segment() {
        let (program, _) = compile(
            "class P: def public static i32 f(a: i32): \
             if a == 1: return 1 ; else: return 2 ; ; ;",
        );
        let f = function(&program, "P", "f");
        assert_eq!(segment_names(f), vec!["Start", "Cond_1"]);
    }

    #[test]
    fn labels_are_numbered_across_functions() {
        let (program, _) = compile(
            "class P: \
             def public static void a(): i: i32 = 0 while i < 1: i = i + 1 ; ; \
             def public static void b(): i: i32 = 0 while i < 1: i = i + 1 ; ; ;",
        );
        assert_eq!(
            segment_names(function(&program, "P", "a")),
            vec!["Start", "Cond_0", "AfterCond_1"]
        );
        assert_eq!(
            segment_names(function(&program, "P", "b")),
            vec!["Start", "Cond_2", "AfterCond_3"]
        );
    }

    #[test]
    fn stack_stays_within_max_stack() {
        let (program, _) = compile(
            "class V: \
             field public static count i32 = 2 * 3 + 1 \
             field public scale f32 = 1.5 \
             def public class V opadd(a: V, b: V): return a ; \
             def public f32 scaled(x: f32): return x * scale + scale ; \
             def public static V twice(v: V): return v + v ; \
             def public static i32 sum(a: i32, b: i32, c: i32): return a + b * (c - a) ; \
             def public static i32 main(): \
                 n: i32 = 0 total: i32 = 0 \
                 while n < 10: \
                     if n % 2 == 0: total = total + sum(n, 1, 2) ; \
                     elif n > 7: total = total - 1 ; \
                     else: count = count + 1 ; \
                     n = n + 1 \
                 ; \
                 return total + count \
             ; ;",
        );
        assert_stack_bounded(&program);
        assert_eq!(function(&program, "V", "sum").max_stack, 4);
    }

    #[test]
    fn max_stack_tracks_nested_operands() {
        let (program, _) = compile("class P: def public static i32 f(): return 1 + 2 * 3 ; ;");
        assert_eq!(function(&program, "P", "f").max_stack, 3);
    }

    // =========================================================================
    // COMPILER — Literals, fields, calls
    // =========================================================================

    #[test]
    fn literal_widening() {
        let (program, _) = compile(
            "class P: def public static void f(): \
             a: i64 = 5000000000 \
             b: f32 = 1.5 \
             c: f64 = 400000000000000000000000000000000000000.0 \
             s: string = \"hi\" ; ;",
        );
        let f = function(&program, "P", "f");
        let start = &segment(f, "Start").instructions;
        assert_eq!(start[0], Instruction::LdcI8(5_000_000_000));
        assert_eq!(start[2], Instruction::LdcR4(1.5));
        assert!(matches!(start[4], Instruction::LdcR8(_)));
        assert_eq!(start[6], Instruction::Ldstr("hi".to_string()));
    }

    #[test]
    fn casts_between_numerics() {
        let (program, _) = compile(
            "class P: def public static f32 f(a: i32): return a as f32 ; \
             def public static i64 g(a: f64): return a =< i64 ; ;",
        );
        assert!(segment(function(&program, "P", "f"), "Start")
            .instructions
            .contains(&Instruction::Conv(ConvKind::R4)));
        assert!(segment(function(&program, "P", "g"), "Start")
            .instructions
            .contains(&Instruction::Conv(ConvKind::I8)));

        expect_error(
            "class P: def public static i32 f(s: string): return s as i32 ; ;",
            ErrorCode::UnimplementedClassMethod,
        );
    }

    #[test]
    fn unary_operators() {
        let (program, _) = compile(
            "class P: def public static i32 f(a: i32): b: i32 = -a c: i32 = +a return !b ; ;",
        );
        let start = &segment(function(&program, "P", "f"), "Start").instructions;
        assert_eq!(
            start[2..],
            [
                Instruction::Ldloc(0),
                Instruction::Neg,
                Instruction::Stloc(1),
                Instruction::Ldloc(0),
                Instruction::Stloc(2),
                Instruction::Ldloc(1),
                Instruction::LdcI4(0),
                Instruction::Ceq,
                Instruction::Ret { value: true },
            ]
        );

        expect_error(
            "class P: def public static string f(s: string): return -s ; ;",
            ErrorCode::UnimplementedClassMethod,
        );
    }

    #[test]
    fn instance_fields_in_instance_methods() {
        let (program, _) = compile(
            "class A: field public x i32 \
             def public i32 get(): return x ; \
             def public void set(v: i32): x = v ; ;",
        );
        assert_eq!(
            segment(function(&program, "A", "get"), "Start").instructions,
            vec![
                Instruction::Ldarg(0),
                Instruction::Ldfld("int32 Program.A::x".to_string()),
                Instruction::Ret { value: true },
            ]
        );
        assert_eq!(
            segment(function(&program, "A", "set"), "Start").instructions,
            vec![
                Instruction::Ldarg(1),
                Instruction::Stloc(0),
                Instruction::Ldarg(0),
                Instruction::Ldloc(0),
                Instruction::Stfld("int32 Program.A::x".to_string()),
                Instruction::Ret { value: false },
            ]
        );
        assert!(function(&program, "A", "get").sig.takes_receiver());
    }

    #[test]
    fn static_fields_and_class_initializer() {
        let (program, _) = compile(
            "class A: field public static count i32 = 7 \
             def public static void bump(): count = count + 1 ; ;",
        );
        let field = "int32 Program.A::count".to_string();
        assert_eq!(
            segment(function(&program, "A", "bump"), "Start").instructions,
            vec![
                Instruction::Ldsfld(field.clone()),
                Instruction::LdcI4(1),
                Instruction::Add,
                Instruction::Stsfld(field.clone()),
                Instruction::Ret { value: false },
            ]
        );
        assert_eq!(
            segment(function(&program, "A", ".cctor"), "Start").instructions,
            vec![
                Instruction::LdcI4(7),
                Instruction::Stsfld(field),
                Instruction::Ret { value: false },
            ]
        );
    }

    #[test]
    fn instance_field_without_receiver() {
        expect_error(
            "class A: field public x i32 def public static i32 get(): return x ; ;",
            ErrorCode::UnknownVariable,
        );
        expect_error(
            "class A: field public x i32 def public static void set(): x = 1 ; ;",
            ErrorCode::UnknownVariable,
        );
        expect_error(
            "class A: field public x i32 = x def public static i32 get(): return x ; ;",
            ErrorCode::UnknownVariable,
        );
    }

    #[test]
    fn field_default_type_mismatch() {
        expect_error("class A: field public static s i32 = 1.5 ;", ErrorCode::TypeConflict);
    }

    #[test]
    fn static_call_with_arguments() {
        let (program, _) = compile(
            "class P: def public static i32 add(a: i32, b: i32): return a + b ; \
             def public static i32 main(): return add(1, 2) ; ;",
        );
        assert_eq!(
            segment(function(&program, "P", "main"), "Start").instructions,
            vec![
                Instruction::LdcI4(1),
                Instruction::LdcI4(2),
                Instruction::Call {
                    target: "int32 Program.P::add(int32, int32)".to_string(),
                    pops: 2,
                    pushes: 1,
                },
                Instruction::Ret { value: true },
            ]
        );
    }

    #[test]
    fn instance_call_loads_receiver() {
        let (program, _) = compile(
            "class P: def public i32 one(): return 1 ; \
             def public i32 two(): return one() + one() ; ;",
        );
        let two = function(&program, "P", "two");
        let call = Instruction::Call {
            target: "instance int32 Program.P::one()".to_string(),
            pops: 1,
            pushes: 1,
        };
        assert_eq!(
            segment(two, "Start").instructions,
            vec![
                Instruction::Ldarg(0),
                call.clone(),
                Instruction::Ldarg(0),
                call,
                Instruction::Add,
                Instruction::Ret { value: true },
            ]
        );
        assert_eq!(two.max_stack, 2);

        expect_error(
            "class P: def public i32 one(): return 1 ; \
             def public static i32 three(): return one() ; ;",
            ErrorCode::UnknownFunction,
        );
    }

    #[test]
    fn call_argument_checks() {
        expect_error(
            "class P: def public static i32 id(a: i32): return a ; \
             def public static i32 f(): return id(1, 2) ; ;",
            ErrorCode::TypeConflict,
        );
        let err = expect_error(
            "class P: def public static i32 id(a: i32): return a ; \
             def public static i32 f(): return id(1.5) ; ;",
            ErrorCode::TypeConflict,
        );
        assert!(err.message.contains("'a'") && err.message.contains("'f32'"));
    }

    #[test]
    fn by_reference_arguments_pass_addresses() {
        let (program, _) = compile(
            "class P: def public static void inc(v: i32_): return ; \
             def public static void main(): a: i32 = 1 inc(a) ; ;",
        );
        assert_eq!(
            segment(function(&program, "P", "main"), "Start").instructions,
            vec![
                Instruction::LdcI4(1),
                Instruction::Stloc(0),
                Instruction::Ldloca(0),
                Instruction::Call {
                    target: "void Program.P::inc(int32&)".to_string(),
                    pops: 1,
                    pushes: 0,
                },
                Instruction::Ret { value: false },
            ]
        );

        expect_error(
            "class P: def public static void inc(v: i32_): return ; \
             def public static void main(): inc(1) ; ;",
            ErrorCode::TypeConflict,
        );
    }

    #[test]
    fn ref_parameters_are_forwarded_as_is() {
        let (program, _) = compile(
            "class P: def public static void g(v: i32_): return ; \
             def public static void f(x: i32_): g(x) ; ;",
        );
        assert_eq!(
            segment(function(&program, "P", "f"), "Start").instructions,
            vec![
                Instruction::Ldarg(0),
                Instruction::Stloc(0),
                Instruction::Ldloc(0),
                Instruction::Call {
                    target: "void Program.P::g(int32&)".to_string(),
                    pops: 1,
                    pushes: 0,
                },
                Instruction::Ret { value: false },
            ]
        );
    }

    #[test]
    fn ref_and_out_locals_go_through_their_address() {
        let (program, _) = compile(
            "class P: def public static void set(x: _i32): x = 3 ; \
             def public static f64 twice(x: f64_): return x + x ; ;",
        );
        assert_eq!(
            segment(function(&program, "P", "set"), "Start").instructions,
            vec![
                Instruction::Ldarg(0),
                Instruction::Stloc(0),
                Instruction::Ldloc(0),
                Instruction::LdcI4(3),
                Instruction::Stind(ElementKind::I4),
                Instruction::Ret { value: false },
            ]
        );
        assert_eq!(
            segment(function(&program, "P", "twice"), "Start").instructions,
            vec![
                Instruction::Ldarg(0),
                Instruction::Stloc(0),
                Instruction::Ldloc(0),
                Instruction::Ldind(ElementKind::R8),
                Instruction::Ldloc(0),
                Instruction::Ldind(ElementKind::R8),
                Instruction::Add,
                Instruction::Ret { value: true },
            ]
        );

        let il = emit::render(&program, "Program");
        assert!(il.contains(".method public static void set([out] int32& x) cil managed"));
        assert!(il.contains("      .locals init (\n        [0] int32& x\n      )\n"));
        assert!(il.contains("        stind.i4\n"));
        assert!(il.contains("        ldind.r8\n"));
        assert_stack_bounded(&program);

        expect_error(
            "class P: def public static void set(x: _i32): x = 1.5 ; ;",
            ErrorCode::TypeConflict,
        );
    }

    // =========================================================================
    // COMPILER — Errors
    // =========================================================================

    #[test]
    fn operator_errors() {
        expect_error(
            "class P: def public static string f(s: string): return s + s ; ;",
            ErrorCode::UnimplementedClassMethod,
        );
        expect_error(
            "class P: def public static i32 f(a: i32, b: f32): return a + b ; ;",
            ErrorCode::TypeConflict,
        );
        expect_error(
            "class V: def public class V opadd(a: V): return a ; \
             def public static V f(a: V, b: V): return a + b ; ;",
            ErrorCode::TypeConflict,
        );
        expect_error(
            "class V: def public static V f(a: V, b: V): return a - b ; ;",
            ErrorCode::UnimplementedClassMethod,
        );
    }

    #[test]
    fn name_resolution_errors() {
        expect_error("class P: def public static i32 f(): return y ; ;", ErrorCode::UnknownVariable);
        expect_error("class P: def public static void f(): a: foo = 1 ; ;", ErrorCode::InvalidType);
        expect_error("class P: def public static foo f(): return ; ;", ErrorCode::InvalidType);
    }

    #[test]
    fn return_checks() {
        expect_error(
            "class P: def public static i32 f(): return 1.5 ; ;",
            ErrorCode::TypeConflict,
        );
        expect_error("class P: def public static i32 f(): return ; ;", ErrorCode::MissingValue);
        expect_error(
            "class P: def public static i32 f(): a: i32 = 1 ; ;",
            ErrorCode::MissingValue,
        );
        expect_error(
            "class P: def public static i32 f(a: i32): if a == 1: return 1 ; ; ;",
            ErrorCode::MissingValue,
        );
        expect_error(
            "class P: def public static void g(): return ; \
             def public static i32 f(): a: i32 = g() return a ; ;",
            ErrorCode::MissingValue,
        );
        expect_error(
            "class P: def public static void f(): a: i32 = 1.5 ; ;",
            ErrorCode::TypeConflict,
        );
    }

    #[test]
    fn void_function_gets_implicit_ret() {
        let (program, _) = compile("class P: def public static none f(): a: i32 = 1 ; ;");
        assert_eq!(
            segment(function(&program, "P", "f"), "Start").instructions.last(),
            Some(&Instruction::Ret { value: false })
        );
    }

    #[test]
    fn redeclarations() {
        expect_error("class A: ; class A: ;", ErrorCode::Redeclaration);
        expect_error(
            "class A: field public x i32 field private x f32 ;",
            ErrorCode::Redeclaration,
        );
        expect_error(
            "class A: def public static void f(): return ; def public static void f(): return ; ;",
            ErrorCode::Redeclaration,
        );
        expect_error(
            "class A: def public static void f(a: i32, a: i32): return ; ;",
            ErrorCode::Redeclaration,
        );
        // same name in another namespace is fine
        compile("class A: ; namespace Other class A: ;");
    }

    // =========================================================================
    // COMPILER — Warnings & trimming
    // =========================================================================

    #[test]
    fn useless_code_warning_and_trim() {
        let source = "class P: def public static void main(): 1 + 2 ; ;";
        let (program, diagnostics) = compile(source);
        assert!(has_warning(&diagnostics, WarningCode::UselessCode));
        assert_eq!(
            segment(function(&program, "P", "main"), "Start").instructions,
            vec![
                Instruction::LdcI4(1),
                Instruction::LdcI4(2),
                Instruction::Add,
                Instruction::Pop,
                Instruction::Ret { value: false },
            ]
        );

        let mut options = CompileOptions::default();
        options.set_all_trim(true);
        options.set_all_warnings(true);
        let (program, diagnostics) = compile_with(source, &options).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(
            segment(function(&program, "P", "main"), "Start").instructions,
            vec![Instruction::Ret { value: false }]
        );
    }

    #[test]
    fn calls_are_not_useless() {
        let (_, diagnostics) = compile(
            "class P: def public static i32 g(): return 1 ; \
             def public static void main(): g() ; ;",
        );
        assert!(!has_warning(&diagnostics, WarningCode::UselessCode));
    }

    #[test]
    fn unreachable_code_is_kept_apart() {
        let source = "class P: def public static i32 main(): return 1 a: i32 = 2 b: i32 = 3 ; ;";
        let (program, diagnostics) = compile(source);
        let unreachable = diagnostics
            .iter()
            .filter(|d| d.is_warning(WarningCode::UnreachableCode))
            .count();
        assert_eq!(unreachable, 1);

        let main = function(&program, "P", "main");
        assert_eq!(segment_names(main), vec!["Start", "Unreachable_0"]);
        assert_eq!(
            segment(main, "Start").instructions,
            vec![Instruction::LdcI4(1), Instruction::Ret { value: true }]
        );

        let options = CompileOptions {
            trim_unreachable_code: true,
            ..CompileOptions::default()
        };
        let (program, _) = compile_with(source, &options).unwrap();
        let main = function(&program, "P", "main");
        assert_eq!(segment_names(main), vec!["Start"]);
        assert!(main.locals.is_empty());
    }

    #[test]
    fn branching_after_return_only_warns() {
        let cases = [
            (
                "class P: def public static i32 main(): return 1 if 1: x: i32 = 2 ; ; ;",
                vec!["Start", "Unreachable_0", "AfterCond_1", "Cond_2"],
            ),
            (
                "class P: def public static i32 main(): return 1 while 1: x: i32 = 2 ; ; ;",
                vec!["Start", "Unreachable_0", "Cond_1", "AfterCond_2"],
            ),
        ];
        for (source, names) in cases {
            let (program, diagnostics) = compile(source);
            let unreachable = diagnostics
                .iter()
                .filter(|d| d.is_warning(WarningCode::UnreachableCode))
                .count();
            assert_eq!(unreachable, 1, "{}", source);

            let main = function(&program, "P", "main");
            assert_eq!(segment_names(main), names);
            assert!(main.segments().iter().all(Segment::is_terminated));
            assert_eq!(
                segment(main, "Start").instructions,
                vec![Instruction::LdcI4(1), Instruction::Ret { value: true }]
            );
            assert_stack_bounded(&program);
        }
    }

    #[test]
    fn nested_return_in_dead_code_gets_its_own_segment() {
        let (program, diagnostics) = compile(
            "class P: def public static i32 f(): return 1 if 1: return 2 x: i32 = 1 ; ; ;",
        );
        let unreachable = diagnostics
            .iter()
            .filter(|d| d.is_warning(WarningCode::UnreachableCode))
            .count();
        assert_eq!(unreachable, 1);

        let f = function(&program, "P", "f");
        assert_eq!(
            segment_names(f),
            vec!["Start", "Unreachable_0", "AfterCond_1", "Cond_2", "Unreachable_3"]
        );
        assert!(f.segments().iter().all(Segment::is_terminated));
    }

    #[test]
    fn invalid_class_method_is_demoted() {
        let (program, diagnostics) =
            compile("class P: def public class i32 twice(x: i32): return x + x ; ;");
        assert!(has_warning(&diagnostics, WarningCode::InvalidClassMethod));
        let message = &diagnostics
            .iter()
            .find(|d| d.is_warning(WarningCode::InvalidClassMethod))
            .unwrap()
            .message;
        assert!(message.contains("opadd") && message.contains("opor"));
        assert!(!message.contains("init"));

        let twice = function(&program, "P", "twice");
        assert!(!twice.sig.is_operator && twice.sig.takes_receiver());
        let id = program.registry.namespace(0).lookup("P").unwrap();
        assert_eq!(program.registry.class(id).operator_count(), 0);
    }

    #[test]
    fn main_lookup_is_case_insensitive() {
        let (program, diagnostics) = compile("class P: def public static i32 Main(): return 0 ; ;");
        assert!(program.main_defined);
        assert!(function(&program, "P", "Main").entry_point);
        assert!(!has_warning(&diagnostics, WarningCode::MainNotDefined));
    }

    #[test]
    fn main_warning_only_for_executables() {
        let options = CompileOptions {
            require_main: false,
            ..CompileOptions::default()
        };
        let (_, diagnostics) = compile_with("class A: ;", &options).unwrap();
        assert!(diagnostics.is_empty());
    }

    // =========================================================================
    // EMISSION TESTS
    // =========================================================================

    #[test]
    fn render_minimal_program() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let compilation = crate::compile_source(
            "class P: def public static i32 main(): return 0 ; ;",
            &mut CompileOptions::default(),
            &mut sink,
        )
        .unwrap();

        let expected = concat!(
            ".assembly extern mscorlib {}\n",
            ".assembly Program {}\n",
            "\n",
            ".namespace Program {\n",
            "  .class public auto ansi beforefieldinit P extends [mscorlib]System.Object {\n",
            "    .method public static int32 main() cil managed {\n",
            "      .entrypoint\n",
            "      .maxstack 1\n",
            "      Start:\n",
            "        ldc.i4.0\n",
            "        ret\n",
            "    }\n",
            "  }\n",
            "}\n",
        );
        assert_eq!(compilation.il, expected);
        assert!(sink.is_empty());
        assert!(compilation.main_defined);
        assert_eq!(compilation.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }

    #[test]
    fn render_locals_fields_and_initializers() {
        let (program, _) = compile(
            "class private A: field public static n i32 = 1 field private v f64 \
             def public static i32 main(): a: i32 = 2 b: f32 = 1.0 return a ; ;",
        );
        let il = emit::render(&program, "Demo");
        assert!(il.contains(".assembly Demo {}"));
        assert!(il.contains("  .class private auto ansi beforefieldinit A extends"));
        assert!(il.contains("    .field public static int32 n\n"));
        assert!(il.contains("    .field private float64 v\n"));
        assert!(il.contains(
            "      .locals init (\n        [0] int32 a,\n        [1] float32 b\n      )\n"
        ));
        assert!(il.contains(
            ".method private hidebysig specialname rtspecialname static void .cctor() cil managed {"
        ));
        assert!(il.contains("        stsfld int32 Program.A::n\n"));
        assert!(!il.contains(" .ctor()"));
        assert!(!il.contains("opadd"));
    }

    #[test]
    fn render_method_headers() {
        let (program, _) = compile(
            "class P: \
             def public static void inc(v: i32_, o: _f64): return ; \
             def private i32 get(): return 1 ; \
             field public x i32 = 3 ;",
        );
        let registry = &program.registry;
        assert_eq!(
            emit::method_header(registry, function(&program, "P", "inc")),
            ".method public static void inc(int32& v, [out] float64& o) cil managed"
        );
        assert_eq!(
            emit::method_header(registry, function(&program, "P", "get")),
            ".method private instance int32 get() cil managed"
        );
        assert_eq!(
            emit::method_header(registry, function(&program, "P", ".ctor")),
            ".method public hidebysig specialname rtspecialname instance void .ctor() cil managed"
        );
    }

    #[test]
    fn render_namespaces_in_order() {
        let (program, _) = compile(
            "namespace Geo class Point: field public static origin i32 = 0 ; \
             namespace Other class Point: def public static Point make(p: Point): return p ; ;",
        );
        let il = emit::render(&program, "Program");
        let geo = il.find(".namespace Geo {").unwrap();
        let other = il.find(".namespace Other {").unwrap();
        assert!(geo < other);
        assert!(!il.contains(".namespace Program {"));
        assert!(il.contains(".method public static class Other.Point make(class Other.Point p) cil managed"));
    }

    #[test]
    fn compile_source_applies_directives() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let mut options = CompileOptions::default();
        let compilation = crate::compile_source(
            "#:warnmainnotdefined>false\n\
             #:trimunreachablecode>true\n\
             class P: def public static i32 f(): return 1 x: i32 = 2 ; ;",
            &mut options,
            &mut sink,
        )
        .unwrap();

        assert!(options.trim_unreachable_code);
        assert!(options.disable_warning_main_not_defined);
        assert!(!compilation.il.contains("Unreachable_"));
        assert_eq!(sink.len(), 1);
        assert!(sink[0].is_warning(WarningCode::UnreachableCode));
    }

    #[test]
    fn directives_reach_the_caller_when_compilation_fails() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        for source in [
            "#:devdebug>true\nclass P: def public static i32 f(): return y ; ;",
            "#:devdebug>true\nclass P: $",
        ] {
            let mut options = CompileOptions::default();
            let result = crate::compile_source(source, &mut options, &mut sink);
            assert!(result.is_err(), "{}", source);
            assert!(options.dev_debug, "{}", source);
        }
    }

    #[test]
    fn compile_source_stops_at_first_error() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let err = crate::compile_source(
            "class P: def public static i32 f(): return $ ; ;",
            &mut CompileOptions::default(),
            &mut sink,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unintelligible);
        assert!(sink.is_empty());
    }

    // =========================================================================
    // ASSEMBLER TESTS
    // =========================================================================

    #[test]
    fn build_kind_parsing() {
        assert_eq!("EXE".parse::<BuildKind>(), Ok(BuildKind::Exe));
        assert_eq!("dll".parse::<BuildKind>(), Ok(BuildKind::Dll));
        assert_eq!("none".parse::<BuildKind>(), Ok(BuildKind::None));
        assert!("lib".parse::<BuildKind>().is_err());
        assert_eq!(BuildKind::default(), BuildKind::Exe);
    }

    #[test]
    fn assembler_arguments() {
        let args = Assembler::arguments(
            Path::new("out/a.il"),
            Path::new("out/a.exe"),
            Some(Architecture::X64),
            BuildKind::Exe,
        );
        assert_eq!(args, vec!["out/a.il", "/exe", "/output=out/a.exe", "/x64"]);

        let args = Assembler::arguments(
            Path::new("a.il"),
            Path::new("a.dll"),
            Some(Architecture::X86),
            BuildKind::Dll,
        );
        assert_eq!(args, vec!["a.il", "/dll", "/output=a.dll"]);
    }

    #[test]
    fn architecture_parsing() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        assert_eq!(
            Architecture::parse_or_warn("ARM64", &mut sink),
            Some(Architecture::Arm64)
        );
        assert_eq!(
            Architecture::parse_or_warn("32bitpreferred", &mut sink),
            Some(Architecture::Bit32Preferred)
        );
        assert!(sink.is_empty());

        assert_eq!(Architecture::parse_or_warn("mips", &mut sink), None);
        assert!(has_warning(&sink, WarningCode::InvalidArchitecture));
    }

    #[test]
    fn missing_assembler_is_reported() {
        let err = Assembler::new("liac-test-no-such-assembler")
            .assemble(Path::new("a.il"), Path::new("a.exe"), None, BuildKind::Exe)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IlasmNotFound);
        assert!(err.span.is_none());
    }
}
