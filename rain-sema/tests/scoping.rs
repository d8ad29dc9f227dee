use rain_ast::build::*;
use rain_ast::{Expr, ExprKind, Module, span};
use rain_sema::{
    Builtins, NameKind, NoCompileTimeExterns, ScopeKind, ScopeTree, SemanticError, Storage, Variable, VariableKind,
    validate_module,
};

fn check(items: Vec<Expr>) -> (Module, Result<ScopeTree, SemanticError>) {
    let builtins = Builtins::new().expect("builtins");
    let mut module = module(items);
    let result = validate_module(&builtins, &mut module, &NoCompileTimeExterns);
    (module, result)
}

fn body(module: &Module, index: usize) -> &[Expr] {
    let ExprKind::Function(function) = &module.items[index].kind else {
        panic!("item {index} is not a function");
    };
    let ExprKind::Block(block) = &function.body.kind else {
        panic!("function body is not a block");
    };
    &block.items
}

fn block_items(expr: &Expr) -> &[Expr] {
    let ExprKind::Block(block) = &expr.kind else {
        panic!("not a block");
    };
    &block.items
}

#[test]
fn inner_let_shadows_and_sibling_sees_outer() {
    let (module, result) = check(vec![function(
        signature("f").returns(named("i32")),
        vec![
            let_("x", int(1)),
            block(vec![let_("x", boolean(true)), ident("x")]),
            block(vec![ident("x")]),
            ident("x"),
        ],
    )]);
    let tree = result.expect("sema");
    let ids = *tree.builtin();
    let items = body(&module, 0);
    assert_eq!(block_items(&items[1])[1].ty, Some(ids.bool));
    assert_eq!(block_items(&items[2])[0].ty, Some(ids.i32));
    assert_eq!(items[3].ty, Some(ids.i32));
}

#[test]
fn scope_tree_lookups_walk_parents() {
    let builtins = Builtins::new().expect("builtins");
    let mut tree = ScopeTree::new(&builtins);
    let ids = *tree.builtin();
    let module = tree.module_scope();
    let local = |name: &str, ty, scope| Variable {
        name: name.to_string(),
        ty,
        scope,
        kind: VariableKind::Local {
            mutable: true,
            storage: Storage::Stack,
        },
    };

    let outer = tree.add_variable(local("x", ids.i32, module)).expect("add");
    let inner_scope = tree.new_scope(module, ScopeKind::Block).expect("scope");
    let inner = tree.add_variable(local("x", ids.f32, inner_scope)).expect("add");
    let sibling = tree.new_scope(module, ScopeKind::Block).expect("scope");

    assert_eq!(tree.find_variable(inner_scope, "x"), Some(inner));
    assert_eq!(tree.find_variable(sibling, "x"), Some(outer));
    assert_eq!(tree.find_variable(module, "x"), Some(outer));
    assert_eq!(tree.find_variable(module, "y"), None);
    assert_eq!(tree.find_type(inner_scope, "f64"), Some(ids.f64));
}

#[test]
fn nested_functions_cannot_capture_locals() {
    let (_, result) = check(vec![function(
        signature("outer").param("x", named("i32")),
        vec![function(signature("inner").returns(named("i32")), vec![ident("x")])],
    )]);
    let err = result.expect_err("capture");
    assert!(matches!(err, SemanticError::Syntax { ref message, .. } if message.contains("captured")));
}

#[test]
fn nested_functions_are_callable_after_declaration() {
    let (module, result) = check(vec![function(
        signature("outer").returns(named("i32")),
        vec![
            function(signature("helper").returns(named("i32")), vec![int(3)]),
            call(ident("helper"), vec![]),
        ],
    )]);
    let tree = result.expect("sema");
    assert_eq!(body(&module, 0)[1].ty, Some(tree.builtin().i32));

    let (_, result) = check(vec![function(
        signature("outer").returns(named("i32")),
        vec![
            call(ident("helper"), vec![]),
            function(signature("helper").returns(named("i32")), vec![int(3)]),
        ],
    )]);
    assert!(matches!(
        result.expect_err("not yet declared"),
        SemanticError::UndefinedName { kind: NameKind::Variable, .. }
    ));
}

#[test]
fn globals_are_visible_inside_functions() {
    let (module, result) = check(vec![
        function(signature("read").returns(named("i32")), vec![ident("limit")]),
        let_("limit", int(10)),
    ]);
    let tree = result.expect("sema");
    let ExprKind::Identifier(identifier) = &body(&module, 0)[0].kind else {
        panic!("identifier expected");
    };
    let variable = tree.variable(identifier.variable.expect("resolved")).expect("variable");
    assert_eq!(
        variable.kind,
        VariableKind::Local {
            mutable: false,
            storage: Storage::Global
        }
    );
}

#[test]
fn assignment_needs_a_mutable_place() {
    let (_, result) = check(vec![function(
        signature("f").param("x", named("i32")),
        vec![assign(ident("x"), int(2))],
    )]);
    assert!(matches!(result.expect_err("parameter"), SemanticError::Syntax { .. }));

    let (_, result) = check(vec![function(
        signature("f"),
        vec![let_("x", int(1)), assign(ident("x"), int(2))],
    )]);
    result.expect("sema");

    let (_, result) = check(vec![function(
        signature("f"),
        vec![let_("x", int(1)), assign(ident("x"), boolean(true))],
    )]);
    assert!(matches!(result.expect_err("mismatch"), SemanticError::TypeMismatch { .. }));
}

#[test]
fn undefined_names_carry_their_location() {
    let (_, result) = check(vec![function(signature("f"), vec![ident("nope").at(40, 4)])]);
    let err = result.expect_err("undefined");
    assert_eq!(err.span(), Some(span(40, 4)));
    assert_eq!(err.to_string(), "undefined variable `nope`");
}
