//! Unit tests for code generation.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use super::{
    closures::{Closures, FramePath, Storage},
    compiler::{compile, Target},
    config::{heap_buffer_size, BUDDY_SPACE},
    func_lists::FuncLists,
};
use crate::{
    ast::statements::Stmt,
    errors::errors::Error,
    resolver::context::ContextId,
    session::{CompiledModule, MemoryLoader, Session},
    types::types::Type,
};

fn compile_source(source: &str, target: Target) -> Result<String, Error> {
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    let root = session.load("main.bt")?;
    compile(&mut session, &root, target, "Test")
}

fn load(source: &str) -> Rc<CompiledModule> {
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    session.load("main.bt").unwrap()
}

fn function_context(module: &CompiledModule, body: &[Stmt], name: &str) -> ContextId {
    let stmt = body
        .iter()
        .find(|stmt| matches!(stmt.as_function(), Some(function) if function.name == name))
        .unwrap_or_else(|| panic!("no function {}", name));
    module.resolution.function_context_of(stmt.id).unwrap().id
}

#[test]
fn test_heap_buffer_size() {
    assert_eq!(heap_buffer_size(), 268435456);
    assert_eq!(BUDDY_SPACE, 262144);
}

#[test]
fn test_func_list_registration() {
    let mut lists = FuncLists::default();
    let signature = Type::func(Some(Type::INT), vec![Type::INT]);

    assert_eq!(lists.register(&signature, false, "$1"), 0);
    assert_eq!(lists.register(&signature, false, "$2"), 1);
    assert_eq!(lists.register(&signature, false, "$1"), 0);
    assert_eq!(lists.register(&signature, true, "$3"), 0);

    let list = lists.get(&signature).unwrap();
    assert_eq!(list.entries(false), ["$1", "$2"]);
    assert_eq!(list.entries(true), ["$3"]);

    lists.reset();
    assert!(lists.is_empty());
}

#[test]
fn test_captured_variable_lives_in_frame() {
    let module = load("func f() { var y = 1; func int:g() { return y; } }");
    let closures = Closures::analyze(&module.resolution);

    let f = function_context(&module, &module.module.body, "f");
    let g = module.resolution.context(f).functions[0];
    let y = module.resolution.context(f).name_map["y"].clone();

    let frame = closures.frame(f).unwrap();
    assert!(frame.fields().contains_key(&y));
    assert!(closures.frame(g).is_none());

    assert_eq!(
        closures.storage(&module.resolution, g, f, &y).unwrap(),
        Storage::Frame {
            path: FramePath::Up(0),
            field: y.clone(),
        }
    );
    assert_eq!(
        closures.storage(&module.resolution, f, f, &y).unwrap(),
        Storage::Frame {
            path: FramePath::Own,
            field: y,
        }
    );
}

#[test]
fn test_uncaptured_variable_stays_local() {
    let module = load("func f() { var y = 1; y = y + 1; }");
    let closures = Closures::analyze(&module.resolution);

    let f = function_context(&module, &module.module.body, "f");
    let y = module.resolution.context(f).name_map["y"].clone();

    assert!(closures.frame(f).is_none());
    assert_eq!(
        closures.storage(&module.resolution, f, f, &y).unwrap(),
        Storage::Local(y)
    );
}

#[test]
fn test_break_outside_loop() {
    for target in [Target::Js, Target::Asmjs, Target::Llvmir] {
        let error = compile_source("break;", target).unwrap_err();
        assert_eq!(error.get_error_name(), "LoopControlOutsideLoop");
    }
}

const PROGRAM: &str = "
func int:add(int:a, int:b) { return a + b; }
var greeting = \"hi\";
export add;
export greeting;
";

#[test]
fn test_js_output() {
    let out = compile_source(PROGRAM, Target::Js).unwrap();

    assert!(out.starts_with("var Test = (function () {"));
    assert!(out.contains("\"use strict\";"));
    assert!(out.contains("Object.defineProperty(exports, \"add\""));
    assert!(out.contains("Object.defineProperty(exports, \"greeting\""));
    assert!(out.contains("[104, 105]"));
}

#[test]
fn test_js_closure_frame() {
    let out = compile_source(
        "func int:counter() { var n = 0; func int:next() { n = n + 1; return n; } return next(); }",
        Target::Js,
    )
    .unwrap();

    assert!(out.contains("var $frame = {"));
    assert!(out.contains("$ctx"));
}

#[test]
fn test_asmjs_output() {
    let out = compile_source(PROGRAM, Target::Asmjs).unwrap();

    assert!(out.contains("\"use asm\";"));
    assert!(out.contains("new ArrayBuffer(268435456)"));
    assert!(out.contains("Object.defineProperty(exports, \"add\""));
    // "hi" is the only static data.
    assert!(out.contains("var $top = 262160;"));
}

#[test]
fn test_asmjs_without_static_data() {
    let out = compile_source("var x = 1;", Target::Asmjs).unwrap();
    assert!(out.contains("var $top = 262144;"));
}

#[test]
fn test_asmjs_reference_call_uses_dispatcher() {
    let out = compile_source(
        "func int:one() { return 1; } func int:two() { return 2; } var f = one; f = two; var x = f();",
        Target::Asmjs,
    )
    .unwrap();

    assert!(out.contains("function $call$func$int$$$($r) {"));
    assert!(out.contains("$call$func$int$$$("));
    assert!(out.contains("var $plain$func$int$$ = [$"));
    assert!(out.contains("return $plain$func$int$$[$f & 1]() | 0;"), "{}", out);
}

#[test]
fn test_llvm_output() {
    let out = compile_source(PROGRAM, Target::Llvmir).unwrap();

    assert!(out.contains("@llvm.global_ctors"));
    assert!(out.contains("define i32 @Test_add(i32 %a0, i32 %a1)"));
    assert!(out.contains("declare i8* @calloc(i64, i64)"));
}

#[test]
fn test_llvm_integer_division_is_guarded() {
    let out = compile_source(
        "func int:div(int:a, int:b) { return a / b; } func int:rem(int:a, int:b) { return a % b; } export div; export rem;",
        Target::Llvmir,
    )
    .unwrap();

    let guards = out.lines().filter(|line| line.contains("icmp eq i32") && line.ends_with(", 0")).count();
    assert_eq!(guards, 2, "{}", out);
    assert_eq!(out.lines().filter(|line| line.ends_with(", -1")).count(), 2);
    assert!(out.contains("select i1"));
    assert!(out.contains("sdiv i32"));
    assert!(out.contains("srem i32"));
}

#[test]
fn test_llvm_export_named_like_libm() {
    let out = compile_source("func float:sin(float:x) { return x; } var cos = 1; export sin; export cos;", Target::Llvmir).unwrap();

    assert!(out.contains("declare double @sin(double)"));
    assert!(out.contains("define double @Test_sin(double %a0)"));
    assert!(out.contains("define i32 @Test_cos()"));
    assert_eq!(out.matches("@sin(").count(), 1);
}

const HOST: &str = "
import foreign;
var upper = foreign.external.toupper.int.int(97);
var nan = foreign.Math.getNaN();
foreign.external.report._null.float(nan);
export upper;
";

#[test]
fn test_js_host_functions() {
    let out = compile_source(HOST, Target::Js).unwrap();

    assert!(out.contains("function $host(name) {"));
    assert!(out.contains("($host(\"toupper\")(97) | 0)"), "{}", out);
    assert!(out.contains("$host(\"report\")("));
    assert!(out.contains(" = NaN;"));
}

#[test]
fn test_asmjs_host_functions() {
    let out = compile_source(HOST, Target::Asmjs).unwrap();

    assert!(out.contains("var $ext$toupper = foreign.toupper;"));
    assert!(out.contains("var $ext$report = foreign.report;"));
    assert!(out.contains("var $nan = stdlib.NaN;"));
    assert!(!out.contains("stdlib.Math.getNaN"));
    assert!(out.contains("$module(globalThis, { Math: Math, toupper: $host(\"toupper\"), report: $host(\"report\") }, heap)"));
    assert!(out.contains("($ext$toupper(97 | 0) | 0)"), "{}", out);
}

#[test]
fn test_llvm_host_functions() {
    let out = compile_source(HOST, Target::Llvmir).unwrap();

    assert!(out.contains("declare i32 @toupper(i32)"));
    assert!(out.contains("declare void @report(double)"));
    assert!(out.contains("call i32 @toupper(i32 97)"));
    assert!(out.contains("0x7FF8000000000000"));
    assert!(!out.contains("@getNaN"));
}

#[test]
fn test_llvm_host_function_must_match_libm() {
    let out = compile_source("import foreign; var s = foreign.external.sin.float.float(1.0);", Target::Llvmir).unwrap();
    assert_eq!(out.matches("declare double @sin(double)").count(), 1);

    let error = compile_source("import foreign; var s = foreign.external.sin.int.int(1);", Target::Llvmir).unwrap_err();
    assert_eq!(error.get_error_name(), "TypeMatchError");

    let error = compile_source(
        "import foreign; var a = foreign.external.f.int.int(1); var b = foreign.external.f.float.float(1.0);",
        Target::Llvmir,
    )
    .unwrap_err();
    assert_eq!(error.get_error_name(), "TypeMatchError");
}
