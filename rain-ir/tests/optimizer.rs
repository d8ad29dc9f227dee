use rain_ir::{
    BinOp, Builder, Constant, Cursor, InstKind, IntPredicate, Linkage, Module, Signature, Terminator, Type,
    Value,
};

fn wasm32() -> Module {
    Module::new("opt", "wasm32-unknown-unknown".parse().unwrap()).unwrap()
}

#[test]
fn folds_constant_arithmetic_into_the_return() {
    let mut m = wasm32();
    let f = m.add_function(
        "seven",
        Signature {
            params: vec![],
            ret: Type::I32,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let one = b.const_int(Type::I32, 1);
    let two = b.const_int(Type::I32, 2);
    let three = b.const_int(Type::I32, 3);
    let product = b.binary(BinOp::Mul, two, three).unwrap();
    let sum = b.binary(BinOp::Add, one, product).unwrap();
    b.ret(Some(sum)).unwrap();

    let stats = rain_ir::optimize_module(&mut m).unwrap();
    assert_eq!(stats.folded, 2);

    let function = m.function(f).unwrap();
    assert!(function.blocks[0].insts.is_empty());
    let Some(Terminator::Ret(Some(v))) = &function.blocks[0].terminator else {
        panic!("expected a value return");
    };
    assert_eq!(m.value_constant(*v), Some(&Constant::int(Type::I32, 7)));
}

#[test]
fn constant_branches_drop_the_dead_arm() {
    let mut m = wasm32();
    let f = m.add_function(
        "pick",
        Signature {
            params: vec![],
            ret: Type::I32,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let then_block = b.append_block("then").unwrap();
    let else_block = b.append_block("else").unwrap();
    let merge = b.append_block("endif").unwrap();
    let one = b.const_int(Type::I32, 1);
    let two = b.const_int(Type::I32, 2);
    let cond = b.icmp(IntPredicate::Slt, one, two).unwrap();
    b.cond_br(cond, then_block, else_block).unwrap();
    b.position_at_end(then_block).unwrap();
    b.br(merge).unwrap();
    b.position_at_end(else_block).unwrap();
    b.br(merge).unwrap();
    b.position_at_end(merge).unwrap();
    let phi = b.phi(Type::I32, vec![(one, then_block), (two, else_block)]).unwrap();
    b.ret(Some(phi)).unwrap();

    let stats = rain_ir::optimize_module(&mut m).unwrap();
    assert_eq!(stats.removed_blocks, 1);
    rain_ir::verify_module(&m).unwrap();

    let function = m.function(f).unwrap();
    assert_eq!(function.blocks.len(), 3);
    let returned = function
        .blocks
        .iter()
        .find_map(|b| match &b.terminator {
            Some(Terminator::Ret(Some(v))) => Some(*v),
            _ => None,
        })
        .unwrap();
    assert_eq!(m.value_constant(returned), Some(&Constant::int(Type::I32, 1)));
}

#[test]
fn stores_survive_dead_code_elimination() {
    let mut m = wasm32();
    let f = m.add_function(
        "keep",
        Signature {
            params: vec![Type::Ptr],
            ret: Type::Void,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let unused = b.alloca(Type::I64).unwrap();
    let _ = unused;
    let nine = b.const_int(Type::I32, 9);
    b.store(nine, Value::Arg(0)).unwrap();
    b.ret(None).unwrap();

    rain_ir::optimize_module(&mut m).unwrap();
    let function = m.function(f).unwrap();
    let kinds: Vec<_> = function.blocks[0]
        .insts
        .iter()
        .map(|i| &function.insts[i.index()].kind)
        .collect();
    assert_eq!(kinds.len(), 1);
    assert!(matches!(kinds[0], InstKind::Store { .. }));
}
