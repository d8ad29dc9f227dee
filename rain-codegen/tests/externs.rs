use rain_ast::build::*;
use rain_ast::Expr;
use rain_codegen::{CodegenError, CodegenOptions, ExternPolicy, JsMathPolicy, compile_module};
use rain_ir::{Constant, Import, Linkage, Module};
use rain_sema::{Builtins, NoCompileTimeExterns, SemanticError, validate_module};

fn compile_with(items: Vec<Expr>, policy: &dyn ExternPolicy) -> Result<Module, CodegenError> {
    let builtins = Builtins::new().expect("builtins");
    let mut module = module(items);
    let tree = validate_module(&builtins, &mut module, policy).expect("sema");
    compile_module(&tree, &module, policy, &CodegenOptions::default())
}

fn sqrt() -> Expr {
    extern_(
        &["js", "math", "sqrt"],
        signature("sqrt").param("x", named("f32")).returns(named("f32")),
    )
}

fn log() -> Expr {
    extern_(&["js", "console", "log"], signature("log").param("x", named("i32")))
}

#[test]
fn whitelisted_math_runs_while_compiling() {
    let module = compile_with(
        vec![sqrt(), let_("root", call(ident("sqrt"), vec![float(16.0)]))],
        &JsMathPolicy,
    )
    .expect("codegen");
    let (_, root) = module.globals().find(|(_, g)| g.name == "root").expect("global");
    let init = root.initializer.expect("initialized");
    assert_eq!(module.constant(init), Some(&Constant::f32(4.0)));
}

#[test]
fn externs_become_host_imports() {
    let module = compile_with(vec![sqrt(), log()], &JsMathPolicy).expect("codegen");

    let sqrt = module.find_function("sqrt").expect("sqrt");
    let sqrt = module.function(sqrt).expect("function");
    assert!(sqrt.is_declaration());
    assert_eq!(sqrt.linkage, Linkage::External);
    assert_eq!(
        sqrt.import,
        Some(Import {
            module: "math".to_string(),
            name: "sqrt".to_string(),
        })
    );

    let log = module.find_function("log").expect("log");
    let import = module.function(log).expect("function").import.clone().expect("import");
    assert_eq!(import.module, "console");
}

#[test]
fn only_exported_functions_are_visible_outside() {
    let module = compile_with(
        vec![
            function(signature("helper").returns(named("i32")), vec![int(1)]),
            export(function(
                signature("entry").returns(named("i32")),
                vec![call(ident("helper"), vec![])],
            )),
        ],
        &JsMathPolicy,
    )
    .expect("codegen");
    let linkage = |name: &str| {
        let func = module.find_function(name).expect("function");
        module.function(func).expect("function").linkage
    };
    assert_eq!(linkage("entry"), Linkage::External);
    assert_eq!(linkage("helper"), Linkage::Internal);
}

#[test]
fn exports_keep_their_names_over_internal_functions() {
    let module = compile_with(
        vec![
            function(
                signature("run").param("x", named("i32")).returns(named("i32")),
                vec![ident("x")],
            ),
            export(function(signature("run").returns(named("i32")), vec![int(0)])),
        ],
        &JsMathPolicy,
    )
    .expect("codegen");
    let exported = module.find_function("run").expect("run");
    assert_eq!(module.function(exported).expect("function").linkage, Linkage::External);
    assert!(module.find_function("run.1").is_some());
}

#[test]
fn ineligible_externs_are_rejected_before_codegen() {
    let builtins = Builtins::new().expect("builtins");
    let mut module = module(vec![sqrt(), let_("root", call(ident("sqrt"), vec![float(16.0)]))]);
    let err = validate_module(&builtins, &mut module, &NoCompileTimeExterns).expect_err("not eligible");
    assert!(matches!(err, SemanticError::Syntax { .. }), "unexpected error: {err:?}");
    assert!(err.to_string().contains("compile time"));
}

#[test]
fn externs_reached_through_a_call_trap_at_compile_time() {
    let shout = function(
        signature("shout").returns(named("i32")),
        vec![call(ident("log"), vec![int(1)]), int(0)],
    );
    let err = compile_with(
        vec![log(), shout, let_("noise", call(ident("shout"), vec![]))],
        &JsMathPolicy,
    )
    .expect_err("host call");
    assert!(matches!(err, CodegenError::CompileTime { .. }), "unexpected error: {err:?}");
    assert!(err.to_string().contains("log"), "unexpected error: {err}");
}

#[test]
fn runtime_calls_to_any_extern_compile() {
    let module = compile_with(
        vec![
            log(),
            function(
                signature("report").param("x", named("i32")),
                vec![call(ident("log"), vec![ident("x")])],
            ),
        ],
        &NoCompileTimeExterns,
    )
    .expect("codegen");
    let report = module.find_function("report").expect("report");
    assert!(!module.function(report).expect("function").is_declaration());
}
