use rain_ast::build::*;
use rain_ast::{BinaryOp, Expr};
use rain_codegen::{CodegenOptions, JsMathPolicy, compile_module};
use rain_ir::{HostFunctions, Interpreter, InterpreterLimits, Module, RtValue, verify_module};
use rain_sema::{Builtins, validate_module};

fn compile(items: Vec<Expr>) -> Module {
    let builtins = Builtins::new().expect("builtins");
    let mut module = module(items);
    let tree = validate_module(&builtins, &mut module, &JsMathPolicy).expect("sema");
    let module = compile_module(&tree, &module, &JsMathPolicy, &CodegenOptions::default()).expect("codegen");
    verify_module(&module).expect("verify");
    module
}

fn run(module: &Module, name: &str, args: &[RtValue]) -> RtValue {
    let hosts = HostFunctions::new();
    let func = module.find_function(name).expect("function");
    Interpreter::new(module, &hosts, InterpreterLimits::default())
        .run(func, args)
        .expect("run")
}

#[test]
fn string_literals_know_their_length() {
    let module = compile(vec![function(
        signature("five").returns(named("i32")),
        vec![method_call(string("hello"), "length", vec![])],
    )]);
    assert_eq!(run(&module, "five", &[]).as_i64(), Some(5));
}

#[test]
fn strings_index_to_bytes() {
    let module = compile(vec![function(
        signature("letter").param("i", named("i32")).returns(named("u8")),
        vec![index(string("hey"), ident("i"))],
    )]);
    assert_eq!(run(&module, "letter", &[RtValue::int(32, 0)]).as_u64(), Some(u64::from(b'h')));
    assert_eq!(run(&module, "letter", &[RtValue::int(32, 2)]).as_u64(), Some(u64::from(b'y')));
}

#[test]
fn equal_strings_share_storage() {
    let module = compile(vec![
        function(signature("a").returns(named("u8")), vec![index(string("same"), int(0))]),
        function(signature("b").returns(named("u8")), vec![index(string("same"), int(1))]),
    ]);
    assert_eq!(module.globals().count(), 1);
}

#[test]
fn array_elements_can_be_reassigned() {
    let module = compile(vec![function(
        signature("middle").returns(named("i32")),
        vec![
            let_("a", array_literal(array_of(named("i32"), 3), vec![int(1), int(2), int(3)])),
            assign(index(ident("a"), int(1)), int(9)),
            binary(BinaryOp::Add, index(ident("a"), int(1)), index(ident("a"), int(2))),
        ],
    )]);
    assert_eq!(run(&module, "middle", &[]).as_i64(), Some(12));
}

#[test]
fn short_array_literals_are_zero_filled() {
    let module = compile(vec![function(
        signature("tail").returns(named("i32")),
        vec![
            let_("a", array_literal(array_of(named("i32"), 4), vec![int(7)])),
            binary(BinaryOp::Add, index(ident("a"), int(0)), index(ident("a"), int(3))),
        ],
    )]);
    assert_eq!(run(&module, "tail", &[]).as_i64(), Some(7));
}

#[test]
fn array_length_is_a_constant() {
    let module = compile(vec![function(
        signature("len").returns(named("i32")),
        vec![
            let_("a", array_literal(array_of(named("f32"), 6), vec![])),
            method_call(ident("a"), "length", vec![]),
        ],
    )]);
    assert_eq!(run(&module, "len", &[]).as_i64(), Some(6));
}

#[test]
fn runtime_slices_point_at_stack_storage() {
    let module = compile(vec![function(
        signature("first_plus_len").param("x", named("i32")).returns(named("i32")),
        vec![
            let_("s", slice_literal(named("i32"), vec![ident("x"), int(2), int(3)])),
            binary(BinaryOp::Add, index(ident("s"), int(0)), method_call(ident("s"), "length", vec![])),
        ],
    )]);
    assert_eq!(run(&module, "first_plus_len", &[RtValue::int(32, 10)]).as_i64(), Some(13));
}

#[test]
fn slice_elements_are_writable() {
    let module = compile(vec![function(
        signature("overwrite").param("x", named("i32")).returns(named("i32")),
        vec![
            let_("s", slice_literal(named("i32"), vec![ident("x"), int(1)])),
            assign(index(ident("s"), int(1)), int(40)),
            binary(BinaryOp::Add, index(ident("s"), int(0)), index(ident("s"), int(1))),
        ],
    )]);
    assert_eq!(run(&module, "overwrite", &[RtValue::int(32, 1)]).as_i64(), Some(41));
}

#[test]
fn constant_slice_globals_keep_their_elements() {
    let module = compile(vec![
        let_("primes", slice_literal(named("i32"), vec![int(2), int(3), int(5), int(7)])),
        function(
            signature("third").returns(named("i32")),
            vec![index(ident("primes"), int(2))],
        ),
        function(
            signature("count").returns(named("i32")),
            vec![method_call(ident("primes"), "length", vec![])],
        ),
    ]);
    assert_eq!(run(&module, "third", &[]).as_i64(), Some(5));
    assert_eq!(run(&module, "count", &[]).as_i64(), Some(4));
}
