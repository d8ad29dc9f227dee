use rain::ast::build::*;
use rain::ast::{BinaryOp, Expr};
use rain::ir::{HostFunctions, Interpreter, InterpreterLimits, OptStats, RtValue};
use rain::{CompileError, CompileOptions, Compiler, SemanticError};

fn compile(items: Vec<Expr>) -> Result<rain::Compiled, CompileError> {
    let compiler = Compiler::new().expect("compiler");
    compiler.compile("test", &mut module(items))
}

#[test]
fn undefined_name_is_the_only_error() {
    let err = compile(vec![function(
        signature("broken").returns(named("i32")),
        vec![let_("a", int(1)), binary(BinaryOp::Add, ident("a"), ident("missing"))],
    )])
    .expect_err("undefined variable");
    match err {
        CompileError::Semantic(SemanticError::UndefinedName { name, .. }) => assert_eq!(name, "missing"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn runtime_global_initializers_are_rejected_by_validation() {
    let err = compile(vec![
        extern_(&["js", "console", "log"], signature("log").param("x", named("i32"))),
        function(
            signature("noisy").returns(named("i32")),
            vec![call(ident("log"), vec![int(1)]), int(1)],
        ),
        let_("value", block(vec![call(ident("log"), vec![int(2)]), int(2)])),
    ])
    .expect_err("runtime initializer");
    assert!(matches!(err, CompileError::Semantic(_)), "unexpected error: {err:?}");
}

#[test]
fn compiled_modules_run_and_print() {
    let compiled = compile(vec![
        let_("limit", binary(BinaryOp::Mul, int(4), int(5))),
        export(function(
            signature("capped").param("x", named("i32")).returns(named("i32")),
            vec![if_else(
                binary(BinaryOp::Gt, ident("x"), ident("limit")),
                vec![ident("limit")],
                vec![ident("x")],
            )],
        )),
    ])
    .expect("compile");
    assert!(compiled.stats.is_some());

    let text = compiled.emit();
    assert!(text.contains("target triple = \"wasm32-unknown-unknown\""), "{text}");
    assert!(text.contains("define i32 @capped(i32"), "{text}");
    assert!(text.contains("@limit = internal constant i32 20"), "{text}");

    let hosts = HostFunctions::new();
    let capped = compiled.module.find_function("capped").expect("capped");
    let mut interpreter = Interpreter::new(&compiled.module, &hosts, InterpreterLimits::default());
    let out = interpreter.run(capped, &[RtValue::int(32, 99)]).expect("run");
    assert_eq!(out.as_i64(), Some(20));
}

#[test]
fn optimizer_can_be_switched_off() {
    let compiler = Compiler::new().expect("compiler").with_options(CompileOptions {
        optimize: false,
        ..CompileOptions::default()
    });
    let compiled = compiler
        .compile("plain", &mut module(vec![function(signature("noop"), vec![])]))
        .expect("compile");
    assert!(compiled.stats.is_none());
}

#[test]
fn optimizer_reports_what_it_removed() {
    let compiled = compile(vec![function(
        signature("early").returns(named("i32")),
        vec![ret(Some(int(1))), int(2)],
    )])
    .expect("compile");
    let stats: OptStats = compiled.stats.expect("optimizer ran");
    assert!(stats.removed_blocks >= 1, "{stats:?}");
}

#[test]
fn slice_globals_from_branches_fail_validation() {
    let err = compile(vec![let_(
        "s",
        if_else(boolean(true), vec![string("a")], vec![string("b")]),
    )])
    .expect_err("computed slice");
    assert!(
        matches!(err, CompileError::Semantic(SemanticError::Syntax { .. })),
        "unexpected error: {err:?}"
    );
}

#[test]
fn compile_time_budget_comes_from_the_options() {
    let compiler = Compiler::new().expect("compiler").with_options(CompileOptions {
        comptime_fuel: 50,
        ..CompileOptions::default()
    });
    let mut items = module(vec![
        function(
            signature("spin").returns(named("i32")),
            vec![while_(boolean(true), vec![]), int(0)],
        ),
        let_("never", call(ident("spin"), vec![])),
    ]);
    let err = compiler.compile("spin", &mut items).expect_err("fuel");
    assert!(matches!(err, CompileError::Codegen(_)), "unexpected error: {err:?}");
    assert!(err.to_string().contains("50 steps"), "{err}");
}

#[test]
fn reports_carry_the_source() {
    let err = compile(vec![function(signature("lost"), vec![ident("nowhere")])]).expect_err("undefined");
    let report = err.with_source("main.rain", "nowhere");
    assert!(report.to_string().contains("nowhere"));
}
