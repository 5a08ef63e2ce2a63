//! End-to-end compilation tests.
//!
//! Programs go through every phase and are compiled for all targets. When
//! `node` or `lli` is installed the output is also executed; otherwise only
//! the compilation is checked.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use btype::{
    compiler::compiler::compile,
    display_error,
    session::{MemoryLoader, Session},
    Target,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const TARGETS: [Target; 3] = [Target::Js, Target::Asmjs, Target::Llvmir];

fn compile_memory(source: &str, target: Target) -> String {
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    let root = session.load("main.bt").unwrap();
    compile(&mut session, &root, target, "Program").unwrap()
}

fn node_available() -> bool {
    Command::new("node").arg("--version").output().is_ok_and(|out| out.status.success())
}

/// `lli` that still reads typed-pointer IR.
fn lli_available() -> bool {
    let Ok(out) = Command::new("lli").arg("--version").output() else {
        return false;
    };
    let text = String::from_utf8_lossy(&out.stdout);
    text.split("LLVM version ")
        .nth(1)
        .and_then(|rest| rest.split('.').next())
        .and_then(|major| major.trim().parse::<u32>().ok())
        .is_some_and(|major| major <= 15)
}

/// Runs a script target and prints the export `name`.
fn run_script(dir: &Path, program: &str, name: &str) -> String {
    run_script_with_host(dir, "", program, name)
}

/// [`run_script`] after `host` has defined global host functions.
fn run_script_with_host(dir: &Path, host: &str, program: &str, name: &str) -> String {
    let path = dir.join("program.js");
    fs::write(&path, format!("{}\n{}\nconsole.log(String(Program.{}));\n", host, program, name)).unwrap();
    let out = Command::new("node").arg(&path).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Runs LLVM IR whose `main` returns the int export `name`.
fn run_llvm(dir: &Path, program: &str, name: &str) -> i32 {
    let path = dir.join("program.ll");
    let main = format!(
        "\ndefine i32 @main() {{\nentry:\n  %0 = call i32 @Program_{}()\n  ret i32 %0\n}}\n",
        name
    );
    fs::write(&path, format!("{}{}", program, main)).unwrap();
    let out = Command::new("lli").arg(&path).output().unwrap();
    out.status.code().unwrap()
}

/// Checks `program` yields `expected` for its int export `result` on every
/// target that can be executed here.
fn assert_result(source: &str, expected: i32) {
    let dir = TempDir::new().unwrap();

    for target in TARGETS {
        let program = compile_memory(source, target);
        match target {
            Target::Js | Target::Asmjs if node_available() => {
                assert_eq!(run_script(dir.path(), &program, "result"), expected.to_string(), "{:?}", target);
            }
            Target::Llvmir if lli_available() => {
                assert_eq!(run_llvm(dir.path(), &program, "result"), expected & 0xff);
            }
            _ => assert!(!program.is_empty()),
        }
    }
}

#[test]
fn test_arithmetic_and_recursion() {
    assert_result(
        "func int:fib(int:n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
         var result = fib(10) * 2 - 7 / 2;
         export result;",
        107,
    );
}

#[test]
fn test_integer_division_by_zero_and_minus_one() {
    assert_result(
        "var zero = 0;
         var minus = -1;
         var result = 7 / zero + 9 % zero + 7 / minus + 7 % minus + 50;
         export result;",
        43,
    );
}

#[test]
fn test_loops() {
    assert_result(
        "var result = 0;
         for (var i = 0; i < 10; i = i + 1) {
            if (i == 3) { continue; }
            if (i == 8) { break; }
            result = result + i;
         }
         var j = 0;
         do { j = j + 1; } while (j < 5);
         while (true) { result = result + j; break; }
         export result;",
        30,
    );
}

#[test]
fn test_closures() {
    assert_result(
        "func<int>:tick = null;
         func make(int:step) {
            var total = 0;
            func int:advance() { total = total + step; return total; }
            tick = advance;
         }
         make(3);
         tick();
         var result = tick();
         export result;",
        6,
    );
}

#[test]
fn test_objects_and_arrays() {
    assert_result(
        "object Counter {
            int:count;
            new(int:start) { self.count = start; }
            func int:bump(int:by) { self.count = self.count + by; return self.count; }
         }
         var counter = new Counter(10);
         counter.bump(5);
         array<int>:xs = new array<int>(5);
         for (var i = 0; i < xs.length; i = i + 1) { xs[i] = i * i; }
         var sum = 0;
         var j = 0;
         while (j < 5) { sum = sum + xs[j]; j = j + 1; }
         var pair = (counter.count, 2.5);
         var result = pair.0 + sum;
         export result;",
        45,
    );
}

#[test]
fn test_linked_list() {
    assert_result(
        "object Node {
            int:value;
            Node:next;
            new(int:v) { self.value = v; }
         }
         var head = new Node(1);
         head.next = new Node(2);
         var sum = 0;
         Node:cursor = head;
         while (cursor != null) { sum = sum + cursor.value; cursor = cursor.next; }
         var result = sum * 10 + head.next.value;
         export result;",
        32,
    );
}

#[test]
fn test_method_reference() {
    assert_result(
        "object Box {
            int:value;
            func int:get() { return self.value; }
         }
         var b = new Box();
         b.value = 41;
         func<int>:getter = b.get;
         b.value = b.value + 1;
         var result = getter();
         export result;",
        42,
    );
}

#[test]
fn test_foreign_math() {
    assert_result(
        "import foreign;
         var root = foreign.Math.sqrt(16.0) as int;
         var result = root + foreign.Math.abs(-3) + foreign.Math.floor(2.7);
         export result;",
        9,
    );
}

#[test]
fn test_host_functions() {
    let source = "import foreign;
         var upper = foreign.external.toupper.int.int(97);
         var nan = foreign.Math.getNaN();
         var result = upper;
         if (nan != nan) { result = result + 1; }
         export result;";
    let host = "globalThis.toupper = function (c) { return String.fromCharCode(c).toUpperCase().charCodeAt(0); };";
    let dir = TempDir::new().unwrap();

    for target in TARGETS {
        let program = compile_memory(source, target);
        match target {
            Target::Js | Target::Asmjs if node_available() => {
                assert_eq!(run_script_with_host(dir.path(), host, &program, "result"), "66", "{:?}", target);
            }
            Target::Llvmir if lli_available() => assert_eq!(run_llvm(dir.path(), &program, "result"), 66),
            _ => assert!(!program.is_empty()),
        }
    }
}

#[test]
fn test_strings() {
    assert_result(
        "str:s = \"hello\";
         var result = s.length * 10 + (s[1] as int) - 100;
         export result;",
        51,
    );
}

#[test]
fn test_imports_from_disk() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("util")).unwrap();
    fs::write(
        dir.path().join("util/math.bt"),
        "func int:twice(int:n) { return n * 2; } var base = 20; export twice; export base;",
    )
    .unwrap();
    fs::write(
        dir.path().join("main.bt"),
        "import util.math; var result = math.twice(math.base) + 2; export result;",
    )
    .unwrap();

    let mut session = Session::default();
    let root = session.load(dir.path().join("main.bt")).unwrap();
    assert_eq!(session.dependencies(&root).len(), 2);

    for target in TARGETS {
        let program = compile(&mut session, &root, target, "Program").unwrap();
        if target != Target::Llvmir && node_available() {
            assert_eq!(run_script(dir.path(), &program, "result"), "42");
        }
    }
}

#[test]
fn test_only_root_exports_are_visible() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("lib.bt"), "var hidden = 1; export hidden;").unwrap();
    fs::write(dir.path().join("main.bt"), "import lib; var shown = lib.hidden; export shown;").unwrap();

    let mut session = Session::default();
    let root = session.load(dir.path().join("main.bt")).unwrap();
    let program = compile(&mut session, &root, Target::Js, "Program").unwrap();

    assert!(program.contains("Object.defineProperty(exports, \"shown\""));
    assert!(!program.contains("Object.defineProperty(exports, \"hidden\""));
}

#[test]
fn test_errors_are_rendered_against_source() {
    let source = "var a = 1;\nint:b = 1.5;\n";
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    let error = session.load("main.bt").unwrap_err();

    let rendered = display_error(&error, source);
    assert!(rendered.starts_with("Error: TypeMatchError"), "{}", rendered);
    assert!(rendered.contains("-> main.bt"));
    assert!(rendered.contains("2 | int:b = 1.5;"));
}

#[test]
fn test_cli_writes_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("hello.bt");
    fs::write(&input, "var answer = 42; export answer;").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_btype"))
        .arg(&input)
        .args(["--target", "llvmir"])
        .status()
        .unwrap();
    assert!(status.success());

    let output: PathBuf = dir.path().join("hello.ll");
    let text = fs::read_to_string(output).unwrap();
    assert!(text.contains("define i32 @hello_answer()"));
}

#[test]
fn test_cli_reports_errors() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.bt");
    fs::write(&input, "var x = y;").unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_btype")).arg(&input).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error:"));
}
