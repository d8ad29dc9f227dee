use proptest::prelude::*;
use rain_ast::{Span, TypeId, span};
use rain_sema::{Builtins, MethodKey, Primitive, ScopeKind, ScopeTree, TypeKind};

fn nowhere() -> Span {
    span(0, 0)
}

fn derive_chain(tree: &mut ScopeTree, base: usize, chain: &[u8]) -> TypeId {
    let mut ty = tree.builtin().primitive(Primitive::ALL[base]);
    for step in chain {
        ty = match step {
            0 => tree.optional_of(ty, nowhere()),
            1 => tree.reference_of(ty, nowhere()),
            2 => tree.slice_of(ty, nowhere()),
            _ => tree.array_of(ty, 3, nowhere()),
        }
        .expect("derive");
    }
    ty
}

proptest! {
    #[test]
    fn derived_types_resolve_to_one_handle(base in 0usize..6, chain in prop::collection::vec(0u8..4, 0..4)) {
        let builtins = Builtins::new().expect("builtins");
        let mut tree = ScopeTree::new(&builtins);
        let ty = derive_chain(&mut tree, base, &chain);
        prop_assert_eq!(ty, derive_chain(&mut tree, base, &chain));

        let array = tree.array_of(ty, 4, nowhere()).expect("array");
        prop_assert_eq!(array, tree.array_of(ty, 4, nowhere()).expect("array"));
        prop_assert_ne!(array, tree.array_of(ty, 5, nowhere()).expect("array"));

        let optional = tree.optional_of(ty, nowhere()).expect("optional");
        prop_assert_eq!(optional, tree.optional_of(ty, nowhere()).expect("optional"));

        prop_assert_eq!(tree.types().resolve(array, nowhere()).expect("resolve"), array);
    }
}

#[test]
fn builtin_derived_types_are_shared_between_trees() {
    let builtins = Builtins::new().expect("builtins");
    let mut first = ScopeTree::new(&builtins);
    let mut second = ScopeTree::new(&builtins);
    let u8 = builtins.types().u8;
    assert_eq!(first.slice_of(u8, nowhere()).expect("slice"), builtins.types().string);
    assert_eq!(second.slice_of(u8, nowhere()).expect("slice"), builtins.types().string);

    // Module-level derivations stay private to each tree.
    let a = first.optional_of(u8, nowhere()).expect("optional");
    let b = second.optional_of(u8, nowhere()).expect("optional");
    assert_eq!(a, b);
    assert_eq!(first.types().get(a).expect("type").owner, first.module_scope());
    assert_eq!(first.types().len(), second.types().len());
}

#[test]
fn function_types_are_reused_up_the_chain() {
    let builtins = Builtins::new().expect("builtins");
    let mut tree = ScopeTree::new(&builtins);
    let ids = *tree.builtin();
    let module = tree.module_scope();
    let block = tree.new_scope(module, ScopeKind::Block).expect("scope");

    let from_module = tree
        .get_function_type(module, vec![ids.i32], Some(ids.bool), nowhere())
        .expect("fn type");
    let from_block = tree
        .get_function_type(block, vec![ids.i32], Some(ids.bool), nowhere())
        .expect("fn type");
    assert_eq!(from_module, from_block);
    assert_eq!(tree.display(from_module), "fn(i32) -> bool");

    // The signature of builtin `i32 + i32` already lives in the builtin scope.
    let add = tree
        .find_method(
            module,
            &MethodKey::new(Some(ids.i32), vec![ids.i32, ids.i32], "__add__"),
        )
        .expect("builtin add");
    let add_ty = tree.variable(add).expect("variable").ty;
    let interned = tree
        .get_function_type(block, vec![ids.i32, ids.i32], Some(ids.i32), nowhere())
        .expect("fn type");
    assert_eq!(add_ty, interned);
    assert!(tree.types().is_builtin(interned));
}

#[test]
fn derived_types_register_their_intrinsics() {
    let builtins = Builtins::new().expect("builtins");
    let mut tree = ScopeTree::new(&builtins);
    let ids = *tree.builtin();
    let module = tree.module_scope();
    let array = tree.array_of(ids.f64, 8, nowhere()).expect("array");

    let get = MethodKey::new(Some(array), vec![array, ids.i32], "__get__");
    let get = tree.find_method(module, &get).expect("index intrinsic");
    let (params, ret) = tree.signature(tree.variable(get).expect("variable").ty).expect("signature");
    assert_eq!(params.len(), 2);
    let ret = ret.expect("returns");
    assert_eq!(tree.types().kind(ret).expect("kind"), &TypeKind::Reference(ids.f64));

    let length = MethodKey::new(Some(array), Vec::new(), "length");
    assert!(tree.find_method(module, &length).is_some());
    assert!(tree.scope(module).expect("scope").local_method(&length).is_some());
}
