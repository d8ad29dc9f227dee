use rain_ir::{Builder, Constant, Cursor, Import, Linkage, Module, Signature, Type};

#[test]
fn prints_functions_globals_and_imports() {
    let mut m = Module::new("demo", "wasm32-unknown-unknown".parse().unwrap()).unwrap();
    let vec3 = m.named_struct("Vec3", vec![Type::F32, Type::F32, Type::F32]);
    let origin = m.add_constant(Constant::Zero(vec3.clone()));
    m.add_global("origin", vec3, Some(origin), false);

    let sin = m.add_function(
        "sin",
        Signature {
            params: vec![Type::F32],
            ret: Type::F32,
        },
        Linkage::External,
    );
    m.function_mut(sin).unwrap().import = Some(Import {
        module: "js".to_string(),
        name: "sin".to_string(),
    });

    let f = m.add_function(
        "Vec3.len",
        Signature {
            params: vec![Type::F32],
            ret: Type::F32,
        },
        Linkage::External,
    );
    let entry = m.append_block(f, "entry").unwrap();
    let mut cursor = Cursor::at(f, entry);
    let mut b = Builder::new(&mut m, &mut cursor);
    let out = b.call(sin, vec![rain_ir::Value::Arg(0)]).unwrap();
    b.ret(Some(out)).unwrap();

    let text = m.to_string();
    assert!(text.contains("target triple = \"wasm32-unknown-unknown\""), "{text}");
    assert!(text.contains("%Vec3 = type { float, float, float }"), "{text}");
    assert!(text.contains("@origin = internal global %Vec3 zeroinitializer"), "{text}");
    assert!(
        text.contains("declare float @sin(float) \"wasm-import-module\"=\"js\" \"wasm-import-name\"=\"sin\""),
        "{text}"
    );
    assert!(text.contains("define float @Vec3.len(float %arg0) {"), "{text}");
    assert!(text.contains("%0 = call float @sin(float %arg0)"), "{text}");
    assert!(text.contains("ret float %0"), "{text}");
}

#[test]
fn removed_functions_are_not_emitted() {
    let mut m = Module::new("demo", "wasm32-unknown-unknown".parse().unwrap()).unwrap();
    let f = m.add_function(
        "scratch",
        Signature {
            params: vec![],
            ret: Type::Void,
        },
        Linkage::Internal,
    );
    m.remove_function(f).unwrap();
    assert!(!m.to_string().contains("scratch"));
    assert!(m.find_function("scratch").is_none());
}
