//! Unit tests for name resolution.

use std::{collections::HashSet, path::PathBuf, rc::Rc};

use pretty_assertions::assert_eq;

use super::context::{Context, ROOT};
use crate::{
    ast::statements::{Stmt, StmtKind},
    errors::errors::{Error, ErrorCategory},
    session::{CompiledModule, MemoryLoader, Session},
    types::types::Type,
};

fn load(source: &str) -> Result<Rc<CompiledModule>, Error> {
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    session.load("main.bt")
}

fn load_error(source: &str) -> Error {
    load(source).unwrap_err()
}

fn function<'m>(body: &'m [Stmt], name: &str) -> &'m Stmt {
    body.iter()
        .find(|stmt| matches!(stmt.as_function(), Some(function) if function.name == name))
        .unwrap_or_else(|| panic!("no function {}", name))
}

fn context_of<'m>(module: &'m CompiledModule, stmt: &Stmt) -> &'m Context {
    module.resolution.function_context_of(stmt.id).unwrap()
}

#[test]
fn test_redeclaration_in_one_scope() {
    let error = load_error("var x = 1; var x = 2;");
    assert_eq!(error.get_error_name(), "VariableAlreadyDeclared");
    assert_eq!(error.category(), ErrorCategory::Redeclaration);

    let error = load_error("func f(int:a, int:a) {}");
    assert_eq!(error.get_error_name(), "VariableAlreadyDeclared");

    let error = load_error("var f = 1; func f() {}");
    assert_eq!(error.get_error_name(), "VariableAlreadyDeclared");
}

#[test]
fn test_shadowing_in_nested_function() {
    let module = load("var x = 1; func f() { var x = 2.5; x = 3.5; }").unwrap();

    let f = function(&module.module.body, "f");
    let context = context_of(&module, f);
    assert_eq!(context.vars["x"], Type::FLOAT);
    assert_eq!(module.resolution.root().vars["x"], Type::INT);
    assert_ne!(context.name_map["x"], module.resolution.root().name_map["x"]);
}

#[test]
fn test_lexical_capture() {
    let module = load(
        "func f() {
            var y = 1;
            func int:g() { return y; }
            func int:h() { return 2; }
        }",
    )
    .unwrap();

    let f = function(&module.module.body, "f");
    let f_context = context_of(&module, f);
    let StmtKind::Function(f_decl) = &f.kind else {
        unreachable!()
    };

    let g = context_of(&module, function(&f_decl.body, "g"));
    assert!(g.accesses_lexical_scope);
    assert!(!g.accesses_global_scope);
    assert_eq!(g.lexical_lookups.len(), 1);
    assert_eq!(g.lexical_lookups["y"], f_context.id);

    let h = context_of(&module, function(&f_decl.body, "h"));
    assert!(!h.accesses_lexical_scope);
    assert!(h.lexical_lookups.is_empty());

    assert!(!f_context.accesses_lexical_scope);
    assert_eq!(f_context.functions, vec![g.id, h.id]);
}

#[test]
fn test_capture_marks_every_intermediate_context() {
    let module = load(
        "func a() {
            var v = 1;
            func b() {
                func int:c() { return v; }
            }
        }",
    )
    .unwrap();

    let a = function(&module.module.body, "a");
    let a_context = context_of(&module, a);
    let b_context = &module.resolution.contexts[a_context.functions[0]];
    let c_context = &module.resolution.contexts[b_context.functions[0]];

    for context in [b_context, c_context] {
        assert!(context.accesses_lexical_scope);
        assert_eq!(context.lexical_lookups["v"], a_context.id);
    }
    assert!(!a_context.accesses_lexical_scope);
}

#[test]
fn test_global_access() {
    let module = load("var g = 1; func int:f() { return g; } func int:k() { return 1; }").unwrap();

    let f = context_of(&module, function(&module.module.body, "f"));
    assert!(f.accesses_global_scope);
    assert!(!f.accesses_lexical_scope);
    assert!(f.lexical_lookups.is_empty());

    let k = context_of(&module, function(&module.module.body, "k"));
    assert!(!k.accesses_global_scope);
}

#[test]
fn test_purity() {
    let module = load(
        "var g = 1;
         object Counter { int:count; func bump() { self.count = self.count + 1; } }
         func set() { g = 2; }
         func local() { var l = 1; l = 2; }
         func outer() {
            var v = 1;
            func inner() { v = 2; }
         }",
    )
    .unwrap();
    let body = &module.module.body;

    let set = context_of(&module, function(body, "set"));
    assert!(!set.side_effect_free);
    assert!(!set.lexical_side_effect_free);

    let local = context_of(&module, function(body, "local"));
    assert!(local.side_effect_free);
    assert!(local.lexical_side_effect_free);

    let outer = context_of(&module, function(body, "outer"));
    assert!(outer.side_effect_free);
    let inner = &module.resolution.contexts[outer.functions[0]];
    assert!(!inner.lexical_side_effect_free);

    // `self` is a parameter of the method, so writing a field is local.
    let StmtKind::Object(counter) = &body[1].kind else {
        panic!("expected an object");
    };
    let bump = context_of(&module, &counter.methods[0]);
    assert!(bump.side_effect_free);
}

#[test]
fn test_unresolved_reference() {
    let error = load_error("var a = b;");
    assert_eq!(error.get_error_name(), "VariableNotDeclared");
    assert_eq!(error.category(), ErrorCategory::UnresolvedReference);

    let error = load_error("func f() { var inner = 1; } var a = inner;");
    assert_eq!(error.get_error_name(), "VariableNotDeclared");

    let error = load_error("Missing:m = null;");
    assert_eq!(error.get_error_name(), "UnknownType");
}

#[test]
fn test_functions_are_hoisted() {
    let module = load(
        "func int:even(int:n) { if (n == 0) { return 1; } return odd(n - 1); }
         func int:odd(int:n) { if (n == 0) { return 0; } return even(n - 1); }",
    );
    assert!(module.is_ok());
}

#[test]
fn test_assigned_identifiers_are_unique() {
    let module = load(
        "var a = 1;
         func int:f(int:b) { var c = b; return c; }
         func g() { var a = 2; }",
    )
    .unwrap();

    let ids: Vec<&String> = module.resolution.assigned.values().collect();
    let unique: HashSet<&String> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len());
    assert!(ids.iter().all(|id| id.starts_with('$')));
}

#[test]
fn test_export_outside_module_scope() {
    let error = load_error("func f() { export f; }");
    assert_eq!(error.get_error_name(), "ExportOutsideModuleScope");
    assert_eq!(error.category(), ErrorCategory::StructuralMisuse);

    let error = load_error("export missing;");
    assert_eq!(error.get_error_name(), "VariableNotDeclared");

    let error = load_error("func f() {} export f; export f;");
    assert_eq!(error.get_error_name(), "VariableAlreadyDeclared");
}

#[test]
fn test_exports_are_recorded() {
    let module = load("func int:main() { return 1; } var count = 2; export main; export count;").unwrap();

    let exports = &module.ty.exports;
    assert_eq!(exports.keys().collect::<Vec<_>>(), vec!["main", "count"]);
    assert!(exports["main"].function);
    assert!(!exports["count"].function);
    assert_eq!(exports["count"].ty, Type::INT);
    assert_ne!(exports["main"].accessor, exports["count"].accessor);
}

#[test]
fn test_import_binds_module() {
    let loader = MemoryLoader::new()
        .with_file(
            "main.bt",
            "import util.math; var x = math.twice(2);",
        )
        .with_file(
            "util/math.bt",
            "func int:twice(int:n) { return n * 2; } export twice;",
        );
    let mut session = Session::in_memory(loader);
    let module = session.load("main.bt").unwrap();

    assert_eq!(module.resolution.imports, vec![PathBuf::from("util/math.bt")]);
    assert!(matches!(module.resolution.root().vars["math"], Type::Module(_)));
    assert_eq!(module.resolution.root().vars["x"], Type::INT);
    assert_eq!(session.dependencies(&module).len(), 2);
}

#[test]
fn test_import_errors() {
    let loader = MemoryLoader::new()
        .with_file("a.bt", "import b; func int:fa() { return 1; }")
        .with_file("b.bt", "import a; func int:fb() { return 2; }");
    let error = Session::in_memory(loader).load("a.bt").unwrap_err();
    assert_eq!(error.get_error_name(), "ImportCycle");
    assert_eq!(error.category(), ErrorCategory::StructuralMisuse);

    let error = load_error("import nowhere;");
    assert_eq!(error.get_error_name(), "ModuleNotFound");

    let loader = MemoryLoader::new()
        .with_file("main.bt", "import lib; var x = lib.hidden;")
        .with_file("lib.bt", "var hidden = 1;");
    let error = Session::in_memory(loader).load("main.bt").unwrap_err();
    assert_eq!(error.get_error_name(), "MemberNotFound");
}

#[test]
fn test_foreign_module() {
    let module = load("import foreign; var r = foreign.Math.sqrt(2.0); var i = foreign.Math.abs(-3);").unwrap();

    assert_eq!(module.resolution.root().vars["r"], Type::FLOAT);
    assert_eq!(module.resolution.root().vars["i"], Type::INT);
    assert!(module.resolution.imports.is_empty());
}

#[test]
fn test_foreign_external_and_nan() {
    let module = load(
        "import foreign;
         var c = foreign.external.toupper.int.int(97);
         var n = foreign.Math.getNaN();
         foreign.external.log._null.str.int(\"hi\", 2);",
    )
    .unwrap();

    assert_eq!(module.resolution.root().vars["c"], Type::INT);
    assert_eq!(module.resolution.root().vars["n"], Type::FLOAT);
    let log = module
        .resolution
        .expr_types
        .values()
        .find_map(|ty| match ty {
            Type::External(external) if external.function == "log" => {
                external.signature.as_ref().filter(|signature| signature.params.len() == 2)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(log.ret, None);
    assert_eq!(log.params, [Type::Str, Type::INT]);
}

#[test]
fn test_objects() {
    let module = load(
        "func int:area(Rect:r) { return r.w * r.h; }
         object Rect {
            int:w;
            int:h;
            new(int:w, int:h) { self.w = w; self.h = h; }
            func int:area() { return self.w * self.h; }
         }
         var r = new Rect(2, 3);
         var a = r.area();",
    )
    .unwrap();

    let rect = &module.resolution.root().objects["Rect"];
    assert!(rect.constructor.is_some());
    assert_eq!(rect.methods.len(), 1);
    assert_eq!(module.resolution.root().vars["a"], Type::INT);
}

#[test]
fn test_self_referencing_objects() {
    let module = load(
        "object Node {
            int:value;
            Node:next;
            new(int:v) { self.value = v; }
         }
         var head = new Node(1);
         head.next = new Node(2);
         var second = head.next.value;",
    )
    .unwrap();

    let node = &module.resolution.root().objects["Node"];
    let Type::Struct(next) = &node.fields()["next"] else {
        panic!("next is not an object");
    };
    assert!(Rc::ptr_eq(node, next));
    assert_eq!(module.resolution.root().vars["second"], Type::INT);
    assert!(node.fields()["next"].equals(&Type::Struct(Rc::clone(node))));
    assert_eq!(Type::Struct(Rc::clone(node)).flat_type_name(), "struct$Node$int$struct$Node$$$$");
}

#[test]
fn test_mutually_referencing_objects() {
    let module = load(
        "object Tree { Leaf:first; int:size; }
         object Leaf { Tree:owner; float:weight; }
         var tree = new Tree();
         var leaf = new Leaf();
         tree.first = leaf;
         leaf.owner = tree;",
    )
    .unwrap();

    let tree = &module.resolution.root().objects["Tree"];
    let leaf = &module.resolution.root().objects["Leaf"];
    assert!(tree.fields()["first"].equals(&Type::Struct(Rc::clone(leaf))));
    assert!(leaf.fields()["owner"].equals(&Type::Struct(Rc::clone(tree))));
    assert_eq!(Type::Struct(Rc::clone(tree)).get_size(), Some(12));
}

#[test]
fn test_object_errors() {
    let error = load_error("object A { int:x; float:x; }");
    assert_eq!(error.get_error_name(), "VariableAlreadyDeclared");

    let error = load_error(
        "object V { int:x; }
         operator (V:a + V:b) V { return a; }
         operator (V:a + V:b) V { return b; }",
    );
    assert_eq!(error.get_error_name(), "OperatorAlreadyDeclared");
    assert_eq!(error.category(), ErrorCategory::Redeclaration);
}

const VEC: &str = "object V { int:x; new(int:x) { self.x = x; } }
     operator (V:a + V:b) V { return new V(a.x + b.x); }
     var unit = new V(1);
     export unit;";

#[test]
fn test_overloads_follow_imports() {
    let loader = MemoryLoader::new()
        .with_file("vec.bt", VEC)
        .with_file("user.bt", "import vec; var v = vec.unit + vec.unit; var x = v.x; export v;")
        .with_file("outer.bt", "import user; object V { int:x; } var w = new V() + new V();")
        .with_file("stranger.bt", "object V { int:x; } var w = new V() + new V();");
    let mut session = Session::in_memory(loader);

    session.load("vec.bt").unwrap();
    session.load("user.bt").unwrap();
    session.load("outer.bt").unwrap();

    let error = session.load("stranger.bt").unwrap_err();
    assert_eq!(error.get_error_name(), "InvalidOperandType");
}

#[test]
fn test_overload_conflicts_across_imports() {
    let loader = MemoryLoader::new()
        .with_file("vec.bt", VEC)
        .with_file("own.bt", "object V { int:x; } operator (V:a + V:b) V { return b; } var w = new V() + new V();")
        .with_file("clash.bt", "import vec; object V { int:x; } operator (V:a + V:b) V { return a; }");
    let mut session = Session::in_memory(loader);

    session.load("vec.bt").unwrap();
    session.load("own.bt").unwrap();

    let error = session.load("clash.bt").unwrap_err();
    assert_eq!(error.get_error_name(), "OperatorAlreadyDeclared");
    assert_eq!(error.get_span().unwrap().start.1.as_str(), "clash.bt");
}

#[test]
fn test_root_context() {
    let module = load("var a = 1;").unwrap();
    let root = module.resolution.root();

    assert_eq!(root.id, ROOT);
    assert!(root.is_root());
    assert!(module.resolution.init.starts_with('$'));
}
