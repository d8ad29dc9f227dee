use rain_ir::{
    BinOp, Builder, CastOp, Cursor, HostFunctions, IntPredicate, Interpreter, InterpreterLimits, Linkage,
    Module, RtValue, Signature, Trap, Type,
};

fn wasm32() -> Module {
    Module::new("test", "wasm32-unknown-unknown".parse().unwrap()).unwrap()
}

/// sum(n) = 0 + 1 + ... + (n - 1), as a phi loop.
fn build_sum(m: &mut Module) -> rain_ir::FuncId {
    let f = m.add_function(
        "sum",
        Signature {
            params: vec![Type::I32],
            ret: Type::I32,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(m, &mut cursor);
    let header = b.append_block("loop").unwrap();
    let body = b.append_block("body").unwrap();
    let exit = b.append_block("exit").unwrap();
    let zero = b.const_int(Type::I32, 0);
    let one = b.const_int(Type::I32, 1);
    b.br(header).unwrap();

    b.position_at_end(header).unwrap();
    let i = b.phi(Type::I32, vec![(zero, entry)]).unwrap();
    let acc = b.phi(Type::I32, vec![(zero, entry)]).unwrap();
    let cond = b.icmp(IntPredicate::Slt, i, rain_ir::Value::Arg(0)).unwrap();
    b.cond_br(cond, body, exit).unwrap();

    b.position_at_end(body).unwrap();
    let acc2 = b.binary(BinOp::Add, acc, i).unwrap();
    let i2 = b.binary(BinOp::Add, i, one).unwrap();
    b.add_incoming(i, i2, body).unwrap();
    b.add_incoming(acc, acc2, body).unwrap();
    b.br(header).unwrap();

    b.position_at_end(exit).unwrap();
    b.ret(Some(acc)).unwrap();
    f
}

#[test]
fn runs_a_phi_loop() {
    let mut m = wasm32();
    let f = build_sum(&mut m);
    rain_ir::verify_module(&m).unwrap();
    let hosts = HostFunctions::new();
    let mut interp = Interpreter::new(&m, &hosts, InterpreterLimits::default());
    let out = interp.run(f, &[RtValue::int(32, 5)]).unwrap();
    assert_eq!(out.as_i64(), Some(10));
}

#[test]
fn fuel_bounds_long_loops() {
    let mut m = wasm32();
    let f = build_sum(&mut m);
    let hosts = HostFunctions::new();
    let limits = InterpreterLimits {
        fuel: 50,
        ..InterpreterLimits::default()
    };
    let mut interp = Interpreter::new(&m, &hosts, limits);
    let err = interp.run(f, &[RtValue::int(32, 1_000)]).unwrap_err();
    assert!(matches!(err, Trap::OutOfFuel(50)), "unexpected trap: {err}");
}

#[test]
fn stores_aggregate_fields_through_an_out_pointer() {
    let mut m = wasm32();
    let pair = m.anonymous_struct(vec![Type::I8, Type::F64]);
    let f = m.add_function(
        "fill",
        Signature {
            params: vec![Type::Ptr],
            ret: Type::Void,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let first = b.member_gep(pair.clone(), rain_ir::Value::Arg(0), 0).unwrap();
    let byte = b.const_int(Type::I8, -2);
    b.store(byte, first).unwrap();
    let second = b.member_gep(pair.clone(), rain_ir::Value::Arg(0), 1).unwrap();
    let three = b.const_int(Type::I32, 3);
    let wide = b.cast(CastOp::SiToFp, three, Type::F64).unwrap();
    b.store(wide, second).unwrap();
    b.ret(None).unwrap();

    let hosts = HostFunctions::new();
    let size = m.size_of(&pair).unwrap();
    assert_eq!(size, 16);
    let mut interp = Interpreter::new(&m, &hosts, InterpreterLimits::default());
    let buf = interp.allocate(size, m.align_of(&pair).unwrap()).unwrap();
    interp.run(f, &[RtValue::Ptr(buf)]).unwrap();
    let bytes = interp.read_bytes(buf, size).unwrap();
    assert_eq!(bytes[0], 0xfe);
    assert_eq!(f64::from_le_bytes(bytes[8..16].try_into().unwrap()), 3.0);
}

#[test]
fn declarations_dispatch_to_host_functions() {
    let mut m = wasm32();
    let sqrt = m.add_function(
        "sqrt",
        Signature {
            params: vec![Type::F32],
            ret: Type::F32,
        },
        Linkage::External,
    );
    let f = m.add_function(
        "root",
        Signature {
            params: vec![],
            ret: Type::F32,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let sixteen = b.const_value(rain_ir::Constant::f32(16.0));
    let out = b.call(sqrt, vec![sixteen]).unwrap();
    b.ret(Some(out)).unwrap();

    let mut hosts = HostFunctions::new();
    hosts.register("sqrt", |args| match args {
        [RtValue::F32(v)] => Ok(RtValue::F32(v.sqrt())),
        _ => Err(Trap::Host {
            name: "sqrt".to_string(),
            message: "bad arguments".to_string(),
        }),
    });
    let mut interp = Interpreter::new(&m, &hosts, InterpreterLimits::default());
    assert_eq!(interp.run(f, &[]).unwrap(), RtValue::F32(4.0));

    let empty = HostFunctions::new();
    let mut interp = Interpreter::new(&m, &empty, InterpreterLimits::default());
    let err = interp.run(f, &[]).unwrap_err();
    assert!(matches!(err, Trap::UnresolvedExternal(ref name) if name == "sqrt"));
}

#[test]
fn null_loads_trap() {
    let mut m = wasm32();
    let f = m.add_function(
        "deref",
        Signature {
            params: vec![],
            ret: Type::I32,
        },
        Linkage::Internal,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let null = b.const_value(rain_ir::Constant::Null);
    let v = b.load(Type::I32, null).unwrap();
    b.ret(Some(v)).unwrap();

    let hosts = HostFunctions::new();
    let mut interp = Interpreter::new(&m, &hosts, InterpreterLimits::default());
    assert!(matches!(interp.run(f, &[]), Err(Trap::OutOfBounds { addr: 0, .. })));
}
