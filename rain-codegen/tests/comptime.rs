use rain_ast::build::*;
use rain_ast::{BinaryOp, Expr};
use rain_codegen::{CodegenError, CodegenOptions, JsMathPolicy, compile_module};
use rain_ir::{Constant, HostFunctions, InstKind, Interpreter, InterpreterLimits, Module, RtValue, Type};
use rain_sema::{Builtins, validate_module};

fn compile_with(items: Vec<Expr>, options: &CodegenOptions) -> Result<Module, CodegenError> {
    let builtins = Builtins::new().expect("builtins");
    let mut module = module(items);
    let tree = validate_module(&builtins, &mut module, &JsMathPolicy).expect("sema");
    compile_module(&tree, &module, &JsMathPolicy, options)
}

fn compile(items: Vec<Expr>) -> Result<Module, CodegenError> {
    compile_with(items, &CodegenOptions::default())
}

fn run(module: &Module, name: &str) -> RtValue {
    let hosts = HostFunctions::new();
    let func = module.find_function(name).expect("function");
    Interpreter::new(module, &hosts, InterpreterLimits::default())
        .run(func, &[])
        .expect("run")
}

fn global_value(module: &Module, name: &str) -> Constant {
    let (_, global) = module
        .globals()
        .find(|(_, g)| g.name == name)
        .expect("global");
    let init = global.initializer.expect("initialized");
    module.constant(init).expect("constant").clone()
}

#[test]
fn constant_expression_leaves_no_residual_function() {
    let seven = comptime(binary(
        BinaryOp::Add,
        int(1),
        binary(BinaryOp::Mul, int(2), int(3)),
    ));
    let module = compile(vec![function(signature("seven").returns(named("i32")), vec![seven])]).expect("codegen");

    let names: Vec<&str> = module.functions().map(|(_, f)| f.name.as_str()).collect();
    assert_eq!(names, vec!["seven"]);

    let func = module.find_function("seven").expect("seven");
    let body = module.function(func).expect("function");
    assert!(
        !body.insts.iter().any(|inst| matches!(inst.kind, InstKind::Binary { .. })),
        "arithmetic should have been folded at compile time"
    );
    assert_eq!(run(&module, "seven").as_i64(), Some(7));
}

#[test]
fn globals_are_initialized_in_declaration_order() {
    let module = compile(vec![
        let_("base", int(2)),
        let_("scaled", binary(BinaryOp::Mul, ident("base"), int(3))),
        function(signature("get").returns(named("i32")), vec![ident("scaled")]),
    ])
    .expect("codegen");

    assert_eq!(global_value(&module, "base"), Constant::int(Type::I32, 2));
    assert_eq!(global_value(&module, "scaled"), Constant::int(Type::I32, 6));
    assert_eq!(run(&module, "get").as_i64(), Some(6));
}

#[test]
fn initializers_may_call_functions() {
    let square = function(
        signature("square").param("x", named("i32")).returns(named("i32")),
        vec![binary(BinaryOp::Mul, ident("x"), ident("x"))],
    );
    let module = compile(vec![square, let_("area", call(ident("square"), vec![int(9)]))]).expect("codegen");
    assert_eq!(global_value(&module, "area"), Constant::int(Type::I32, 81));
    assert!(module.find_function("square").is_some());
}

#[test]
fn struct_globals_are_rebuilt_field_by_field() {
    let module = compile(vec![
        struct_decl("Pair", vec![("small", named("u8")), ("wide", named("i64"))]),
        let_(
            "pair",
            struct_literal(
                named("Pair"),
                vec![
                    ("small", cast(int(200), named("u8"))),
                    ("wide", binary(BinaryOp::Sub, cast(int(0), named("i64")), cast(int(5), named("i64")))),
                ],
            ),
        ),
    ])
    .expect("codegen");

    let Constant::Aggregate { elements, .. } = global_value(&module, "pair") else {
        panic!("aggregate expected");
    };
    let fields: Vec<i64> = elements
        .iter()
        .map(|id| module.constant(*id).and_then(Constant::as_i64).expect("int field"))
        .collect();
    // 200 as u8 reads back as the signed byte -56.
    assert_eq!(fields, vec![-56, -5]);
}

#[test]
fn string_globals_point_at_constant_bytes() {
    let module = compile(vec![
        let_("greeting", string("hi")),
        function(
            signature("second").returns(named("u8")),
            vec![index(ident("greeting"), int(1))],
        ),
    ])
    .expect("codegen");
    assert_eq!(run(&module, "second").as_u64(), Some(u64::from(b'i')));
}

#[test]
fn reading_a_later_global_is_rejected() {
    let peek = function(signature("peek").returns(named("i32")), vec![ident("late")]);
    let err = compile(vec![
        peek,
        let_("early", call(ident("peek"), vec![])),
        let_("late", int(1)),
    ])
    .expect_err("read before initialization");
    match err {
        CodegenError::CompileTime { message, .. } => {
            assert!(message.contains("`late`"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn a_body_cannot_evaluate_itself_at_compile_time() {
    let selfish = function(
        signature("selfish").returns(named("i32")),
        vec![comptime(call(ident("selfish"), vec![]))],
    );
    let err = compile(vec![selfish]).expect_err("recursive compile-time call");
    assert!(matches!(err, CodegenError::CompileTime { .. }), "unexpected error: {err:?}");
    assert!(err.to_string().contains("selfish"));
}

#[test]
fn traps_become_compile_time_errors() {
    let err = compile(vec![let_("broken", binary(BinaryOp::Div, int(1), int(0)))]).expect_err("division by zero");
    match err {
        CodegenError::CompileTime { message, .. } => assert!(message.contains("division by zero")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn evaluation_is_bounded_by_fuel() {
    let spin = function(
        signature("spin").returns(named("i32")),
        vec![while_(boolean(true), vec![]), int(0)],
    );
    let options = CodegenOptions {
        limits: InterpreterLimits {
            fuel: 500,
            ..InterpreterLimits::default()
        },
        ..CodegenOptions::default()
    };
    let err = compile_with(vec![spin, let_("never", call(ident("spin"), vec![]))], &options).expect_err("fuel");
    assert!(err.to_string().contains("500 steps"), "unexpected error: {err}");
}

#[test]
fn folded_elements_make_a_constant_slice() {
    let module = compile(vec![
        let_(
            "digits",
            slice_literal(named("i32"), vec![comptime(binary(BinaryOp::Add, int(1), int(1))), int(3)]),
        ),
        function(
            signature("first").returns(named("i32")),
            vec![index(ident("digits"), int(0))],
        ),
    ])
    .expect("codegen");
    assert_eq!(run(&module, "first").as_i64(), Some(2));
}
