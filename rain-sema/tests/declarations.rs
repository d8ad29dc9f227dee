use rain_ast::build::*;
use rain_ast::{BinaryOp, Expr, ExprKind, Module, SelfParam};
use rain_sema::{
    Builtins, CompileTimeEligibility, NameKind, NoCompileTimeExterns, ScopeTree, SemanticError, VariableKind,
    validate_module,
};

fn check(items: Vec<Expr>) -> (Module, Result<ScopeTree, SemanticError>) {
    check_with(items, &NoCompileTimeExterns)
}

fn check_with(items: Vec<Expr>, policy: &dyn CompileTimeEligibility) -> (Module, Result<ScopeTree, SemanticError>) {
    let builtins = Builtins::new().expect("builtins");
    let mut module = module(items);
    let result = validate_module(&builtins, &mut module, policy);
    (module, result)
}

struct HostMath;

impl CompileTimeEligibility for HostMath {
    fn is_eligible(&self, keys: &[String]) -> bool {
        keys.first().map(String::as_str) == Some("js")
    }
}

#[test]
fn first_error_stops_validation() {
    let (module, result) = check(vec![function(
        signature("f"),
        vec![let_("a", int(1)), ident("missing"), ident("also_missing")],
    )]);
    match result.expect_err("undefined") {
        SemanticError::UndefinedName { kind, name, .. } => {
            assert_eq!(kind, NameKind::Variable);
            assert_eq!(name, "missing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let ExprKind::Function(func) = &module.items[0].kind else {
        panic!("function expected");
    };
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("block expected");
    };
    assert!(block.items[0].validated);
    assert!(!block.items[1].validated);
    assert!(!block.items[2].validated);
}

#[test]
fn global_lets_must_be_computable_at_compile_time() {
    let (_, result) = check(vec![
        function(signature("seed").returns(named("i32")), vec![int(4)]),
        let_("g", binary(BinaryOp::Mul, call(ident("seed"), vec![]), int(2))),
    ]);
    result.expect("functions run at compile time");

    let (_, result) = check(vec![
        extern_(&["js", "math", "random"], signature("rand").returns(named("i32"))),
        let_("g", call(ident("rand"), vec![])),
    ]);
    match result.expect_err("runtime extern") {
        SemanticError::Syntax { message, .. } => assert!(message.contains("compile time"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }

    let (_, result) = check(vec![let_("g", null())]);
    assert!(matches!(result.expect_err("no value"), SemanticError::Syntax { .. }));
}

#[test]
fn slice_globals_need_constant_data() {
    let (_, result) = check(vec![let_(
        "pick",
        if_else(boolean(true), vec![string("a")], vec![string("b")]),
    )]);
    match result.expect_err("computed slice") {
        SemanticError::Syntax { message, .. } => assert!(message.contains("string literal"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }

    let (_, result) = check(vec![let_(
        "digits",
        slice_literal(named("i32"), vec![binary(BinaryOp::Add, int(1), int(1))]),
    )]);
    assert!(matches!(result.expect_err("computed element"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![
        struct_decl("Row", vec![("cells", slice_of(named("i32")))]),
        let_("row", struct_literal(named("Row"), vec![("cells", slice_literal(named("i32"), vec![int(1)]))])),
    ]);
    assert!(matches!(result.expect_err("slice inside a struct"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![function(
        signature("f"),
        vec![comptime(if_else(boolean(false), vec![string("a")], vec![string("b")]))],
    )]);
    assert!(matches!(result.expect_err("computed slice in a function"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![
        let_("greeting", string("hi")),
        let_("primes", slice_literal(named("i32"), vec![int(2), int(3), comptime(int(5))])),
        let_("quoted", comptime(paren(string("q")))),
    ]);
    result.expect("constant slices");
}

#[test]
fn extern_policy_decides_compile_time_eligibility() {
    let (module, result) = check_with(
        vec![
            extern_(
                &["js", "math", "sqrt"],
                signature("sqrt").param("x", named("f32")).returns(named("f32")),
            ),
            let_("root", call(ident("sqrt"), vec![float(2.0)])),
        ],
        &HostMath,
    );
    result.expect("sema");
    let ExprKind::Extern(import) = &module.items[0].kind else {
        panic!("extern expected");
    };
    assert!(import.compile_time_runnable);
}

#[test]
fn extern_name_defaults_to_last_key() {
    let mut unnamed = signature("unused").param("x", named("f32")).returns(named("f32"));
    unnamed.name = None;
    let (_, result) = check(vec![
        extern_(&["js", "math", "cos"], unnamed),
        function(
            signature("f").param("x", named("f32")).returns(named("f32")),
            vec![call(ident("cos"), vec![ident("x")])],
        ),
    ]);
    let tree = result.expect("sema");
    let module = tree.module_scope();
    let cos = tree.find_variable(module, "cos").expect("bound by last key");
    assert!(matches!(
        tree.variable(cos).expect("variable").kind,
        VariableKind::External { compile_time: false, .. }
    ));

    let (_, result) = check(vec![extern_(&[], signature("nothing"))]);
    assert!(matches!(result.expect_err("no keys"), SemanticError::Syntax { .. }));
}

#[test]
fn externs_only_import_from_the_js_namespace() {
    let (_, result) = check(vec![extern_(
        &["wasi", "fd", "write"],
        signature("write").param("fd", named("i32")),
    )]);
    match result.expect_err("foreign namespace") {
        SemanticError::Syntax { message, .. } => assert!(message.contains("wasi"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }

    let (_, result) = check(vec![extern_(&["env", "rand"], signature("rand").returns(named("i32")))]);
    assert!(matches!(result.expect_err("env namespace"), SemanticError::Syntax { .. }));
}

#[test]
fn js_externs_take_exactly_three_keys() {
    let cases: [&[&str]; 3] = [&["js"], &["js", "log"], &["js", "console", "log", "extra"]];
    for keys in cases {
        let (_, result) = check(vec![extern_(keys, signature("log").param("x", named("i32")))]);
        match result.expect_err("key count") {
            SemanticError::Syntax { message, .. } => assert!(message.contains("three keys"), "{message}"),
            other => panic!("unexpected error for {keys:?}: {other:?}"),
        }
    }

    let (_, result) = check(vec![extern_(
        &["js", "console", "log"],
        signature("log").param("x", named("i32")),
    )]);
    result.expect("namespace, module and name");
}

#[test]
fn structs_cannot_contain_themselves_by_value() {
    let (_, result) = check(vec![struct_decl("Node", vec![("next", named("Node"))])]);
    assert!(matches!(result.expect_err("recursive"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![struct_decl("Node", vec![("next", optional_of(named("Node")))])]);
    assert!(matches!(result.expect_err("recursive"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![struct_decl(
        "Node",
        vec![("value", named("i32")), ("next", reference_of(named("Node")))],
    )]);
    result.expect("references break the cycle");
}

#[test]
fn aliases_resolve_to_their_target() {
    let (_, result) = check(vec![
        alias("Meters", named("f64")),
        struct_decl("Span", vec![("length", named("Meters"))]),
        function(
            signature("length").param("s", named("Span")).returns(named("f64")),
            vec![member(ident("s"), "length")],
        ),
    ]);
    let tree = result.expect("sema");
    let module = tree.module_scope();
    let meters = tree.find_type(module, "Meters").expect("alias");
    let resolved = tree.types().resolve(meters, rain_ast::span(0, 0)).expect("resolve");
    assert_eq!(resolved, tree.builtin().f64);
}

#[test]
fn implementations_must_cover_the_interface() {
    let shape = interface_decl(
        "Shape",
        vec![signature("area").with_self(SelfParam::Reference).returns(named("f32"))],
    );
    let square = struct_decl("Square", vec![("side", named("f32"))]);
    let area = function_value(
        signature("area").with_self(SelfParam::Reference).returns(named("f32")),
        vec![binary(BinaryOp::Mul, member(ident("self"), "side"), member(ident("self"), "side"))],
    );

    let (_, result) = check(vec![
        shape.clone(),
        square.clone(),
        implementation(named("Square"), named("Shape"), vec![area]),
    ]);
    result.expect("complete implementation");

    let (_, result) = check(vec![shape, square, implementation(named("Square"), named("Shape"), vec![])]);
    match result.expect_err("incomplete") {
        SemanticError::UndefinedName { kind, name, .. } => {
            assert_eq!(kind, NameKind::Method);
            assert_eq!(name, "Square.area");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn functions_are_defined_once() {
    let (_, result) = check(vec![
        declaration(signature("f").returns(named("i32"))),
        function(signature("f").returns(named("i32")), vec![int(1)]),
    ]);
    result.expect("declaration then definition");

    let (_, result) = check(vec![
        function(signature("f").returns(named("i32")), vec![int(1)]),
        function(signature("f").returns(named("i32")), vec![int(2)]),
    ]);
    assert!(matches!(result.expect_err("twice"), SemanticError::Syntax { .. }));
}

#[test]
fn overloads_are_chosen_by_argument_types() {
    let (module, result) = check(vec![
        function(signature("twice").param("x", named("i32")).returns(named("i32")), vec![
            binary(BinaryOp::Mul, ident("x"), int(2)),
        ]),
        function(signature("twice").param("x", named("f32")).returns(named("f32")), vec![
            binary(BinaryOp::Mul, ident("x"), float(2.0)),
        ]),
        function(signature("use_both").returns(named("f32")), vec![
            call(ident("twice"), vec![int(1)]),
            call(ident("twice"), vec![float(1.5)]),
        ]),
    ]);
    let tree = result.expect("sema");
    let ExprKind::Function(func) = &module.items[2].kind else {
        panic!("function expected");
    };
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("block expected");
    };
    assert_eq!(block.items[0].ty, Some(tree.builtin().i32));
    assert_eq!(block.items[1].ty, Some(tree.builtin().f32));
}

#[test]
fn top_level_expressions_are_rejected() {
    let (_, result) = check(vec![int(1)]);
    assert!(matches!(result.expect_err("statement"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![export(let_("x", int(1)))]);
    assert!(matches!(result.expect_err("export"), SemanticError::Syntax { .. }));
}

#[test]
fn struct_literals_check_their_fields() {
    let point = struct_decl("P", vec![("x", named("i32")), ("y", named("i32"))]);
    let (module, result) = check(vec![
        point.clone(),
        function(signature("origin").returns(named("P")), vec![struct_literal(named("P"), vec![("y", int(1))])]),
    ]);
    result.expect("missing fields are zeroed");
    let ExprKind::Function(func) = &module.items[1].kind else {
        panic!("function expected");
    };
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("block expected");
    };
    let ExprKind::StructLiteral(literal) = &block.items[0].kind else {
        panic!("struct literal expected");
    };
    assert_eq!(literal.fields[0].index, Some(1));

    let (_, result) = check(vec![
        point.clone(),
        function(signature("f"), vec![struct_literal(named("P"), vec![("x", int(1)), ("x", int(2))])]),
    ]);
    assert!(matches!(result.expect_err("duplicate"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![
        point,
        function(signature("f"), vec![struct_literal(named("P"), vec![("z", int(1))])]),
    ]);
    assert!(matches!(
        result.expect_err("unknown"),
        SemanticError::UndefinedName { kind: NameKind::Member, .. }
    ));

    let (_, result) = check(vec![function(
        signature("f"),
        vec![array_literal(array_of(named("i32"), 1), vec![int(1), int(2)])],
    )]);
    assert!(matches!(result.expect_err("too many"), SemanticError::Syntax { .. }));
}
