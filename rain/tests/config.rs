use std::fs;

use rain::config::{MANIFEST_NAME, find_manifest, load_options};
use rain::{CompileOptions, Compiler};
use tempfile::TempDir;

#[test]
fn manifest_is_found_from_a_nested_directory() {
    let root = TempDir::new().expect("create temp dir");
    let nested = root.path().join("src").join("deep");
    fs::create_dir_all(&nested).expect("create dirs");
    fs::write(root.path().join(MANIFEST_NAME), "[compile]\nverify = false\n").expect("write manifest");

    let found = find_manifest(&nested).expect("manifest");
    assert_eq!(found, root.path().join(MANIFEST_NAME));

    let options = load_options(&nested).expect("options");
    assert!(!options.verify);
    assert!(options.optimize);
}

#[test]
fn starting_from_a_file_searches_its_directory() {
    let root = TempDir::new().expect("create temp dir");
    let source = root.path().join("main.rain");
    fs::write(&source, "").expect("write source");
    fs::write(root.path().join(MANIFEST_NAME), "[compile]\ncomptime_fuel = 7\n").expect("write manifest");

    let options = load_options(&source).expect("options");
    assert_eq!(options.comptime_fuel, 7);
}

#[test]
fn broken_manifest_names_the_file() {
    let root = TempDir::new().expect("create temp dir");
    fs::write(root.path().join(MANIFEST_NAME), "[compile\n").expect("write manifest");

    let err = load_options(root.path()).expect_err("parse error");
    assert!(err.message.contains(MANIFEST_NAME), "{}", err.message);
}

#[test]
fn compiler_picks_up_manifest_options() {
    let root = TempDir::new().expect("create temp dir");
    fs::write(
        root.path().join(MANIFEST_NAME),
        "[compile]\noptimize = false\ncomptime_memory = 4096\n",
    )
    .expect("write manifest");

    let compiler = Compiler::from_manifest(root.path()).expect("compiler");
    let expected = CompileOptions {
        optimize: false,
        comptime_memory: 4096,
        ..CompileOptions::default()
    };
    assert_eq!(compiler.options(), &expected);
}
