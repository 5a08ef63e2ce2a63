//! Unit tests for type inference and validation.

use pretty_assertions::assert_eq;

use super::infer::castable;
use crate::{
    errors::errors::{Error, ErrorCategory},
    session::{MemoryLoader, Session},
    types::types::Type,
};

fn check(source: &str) -> Result<(), Error> {
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    session.load("main.bt").map(|_| ())
}

fn error_name(source: &str) -> String {
    let error = check(source).unwrap_err();
    error.get_error_name().to_string()
}

#[test]
fn test_well_typed_program() {
    let result = check(
        "object Point {
            int:x;
            int:y;
            new(int:x, int:y) { self.x = x; self.y = y; }
            func int:sum() { return self.x + self.y; }
         }
         func float:scale(float:f, int:times) {
            var out = f;
            for (var i = 0; i < times; i = i + 1) { out = out * 2.0; }
            return out;
         }
         var p = new Point(1, 2);
         var total = p.sum();
         var pair = (1, 2.5);
         var second = pair.1;
         array<int>:xs = new array<int>(4);
         xs[0] = total;
         var n = xs.length;
         str:s = \"hi\";
         var c = s[0] as int;
         func<int>:getter = p.sum;
         Point:nothing = null;
         var same = p == nothing;",
    );
    assert!(result.is_ok(), "{:?}", result);
}

#[test]
fn test_declaration_mismatch() {
    assert_eq!(error_name("int:x = 1.5;"), "TypeMatchError");
    assert_eq!(error_name("var x = null;"), "ExpectedExplicitValue");
    assert_eq!(error_name("int:x = null;"), "TypeMatchError");
    assert_eq!(error_name("import foreign; var m = foreign;"), "TypeMatchError");
}

#[test]
fn test_assignment_rules() {
    assert_eq!(error_name("var x = 1; x = 2.5;"), "TypeMatchError");
    assert_eq!(error_name("const x = 1; x = 2;"), "ConstantReassignment");
    assert_eq!(error_name("func f() {} f = f;"), "ConstantReassignment");
    assert_eq!(error_name("var x = 1; x + 1 = 2;"), "InvalidAssignmentTarget");
    assert_eq!(
        error_name("object P { int:x; func int:get() { return 1; } } var p = new P(); p.get = p.get;"),
        "InvalidAssignmentTarget"
    );

    let error = check("const x = 1; x = 2;").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::StructuralMisuse);
}

#[test]
fn test_operator_rules() {
    assert_eq!(error_name("var x = 1 + 1.5;"), "TypeMatchError");
    assert_eq!(error_name("var x = 1.5 & 2.5;"), "InvalidOperandType");
    assert_eq!(error_name("var x = 1 and true;"), "InvalidOperandType");
    assert_eq!(error_name("var x = !1;"), "InvalidOperandType");
    assert_eq!(error_name("var x = -true;"), "InvalidOperandType");
    assert_eq!(error_name("var x = 1 == null;"), "TypeMatchError");
}

#[test]
fn test_overloaded_operator() {
    let result = check(
        "object V { int:x; new(int:x) { self.x = x; } }
         operator (V:a + V:b) V { return new V(a.x + b.x); }
         var v = new V(1) + new V(2);
         var x = v.x;",
    );
    assert!(result.is_ok(), "{:?}", result);
}

#[test]
fn test_call_rules() {
    let prelude = "func int:add(int:a, int:b) { return a + b; }";

    assert_eq!(error_name(&format!("{} var x = add(1);", prelude)), "MissingArguments");
    assert_eq!(error_name(&format!("{} var x = add(1, 2, 3);", prelude)), "UnexpectedArguments");
    assert_eq!(error_name(&format!("{} var x = add(1, 2.5);", prelude)), "ArgumentTypeMatchError");
    assert_eq!(error_name("var x = 1; var y = x(2);"), "NotCallable");
    assert_eq!(error_name("func f() {} var x = f();"), "TypeMatchError");
}

#[test]
fn test_return_rules() {
    assert_eq!(error_name("func int:f() { return 1.5; }"), "TypeMatchError");
    assert_eq!(error_name("func int:f() { return; }"), "TypeMatchError");
    assert_eq!(error_name("func f() { return 1; }"), "TypeMatchError");
    assert!(check("func f() { return; }").is_ok());
}

#[test]
fn test_condition_rules() {
    assert_eq!(error_name("if (1) { }"), "TypeMatchError");
    assert_eq!(error_name("while (1.5) { }"), "TypeMatchError");
    assert_eq!(error_name("do { } while (null);"), "TypeMatchError");
    assert!(check("var b = true; while (b) { b = false; }").is_ok());
}

#[test]
fn test_member_rules() {
    assert_eq!(error_name("object P { int:x; } var p = new P(); var y = p.y;"), "MemberNotFound");
    assert_eq!(error_name("var t = (1, 2); var z = t.2;"), "MemberNotFound");
    assert_eq!(error_name("var x = 1; var y = x[0];"), "InvalidOperandType");
    assert_eq!(error_name("var xs = new array<int>(2); var y = xs[1.5];"), "TypeMatchError");
}

#[test]
fn test_new_rules() {
    assert_eq!(
        error_name("object P { int:x; new(int:x) { self.x = x; } } var p = new P();"),
        "MissingArguments"
    );
    assert_eq!(error_name("object P { int:x; } var p = new P(1);"), "UnexpectedArguments");
    assert_eq!(error_name("var xs = new array<int>(1.5);"), "TypeMatchError");
    assert_eq!(error_name("var x = new int(1);"), "TypeMatchError");
}

#[test]
fn test_casts() {
    assert!(check("var f = 1 as float; var b = 2.5 as byte; var u = 3 as uint;").is_ok());
    assert_eq!(error_name("var x = (1, 2) as int;"), "InvalidCast");
    assert_eq!(error_name("uint:u = 1;"), "UnknownType");

    assert!(castable(&Type::Str, &Type::array(Type::UINT)));
    assert!(castable(&Type::INT, &Type::SFLOAT));
    assert!(!castable(&Type::Str, &Type::INT));
}

#[test]
fn test_foreign_functions_are_call_only() {
    assert!(check("import foreign; var x = foreign.Math.floor(2.5);").is_ok());
    assert_eq!(error_name("import foreign; var f = foreign.Math.sqrt;"), "ForeignReference");
    assert_eq!(error_name("import foreign; var x = foreign.Math.sqrt(1);"), "ArgumentTypeMatchError");
}

#[test]
fn test_external_functions() {
    assert!(check("import foreign; var x = foreign.external.twice.int.int(2);").is_ok());
    assert!(check("import foreign; foreign.external.log._null.str(\"hi\");").is_ok());
    assert!(check("import foreign; var x = foreign.external.zero.float();").is_ok());

    assert_eq!(error_name("import foreign; var f = foreign.external.twice.int.int;"), "ForeignReference");
    assert_eq!(error_name("import foreign; var f = foreign.external.twice;"), "ForeignReference");
    assert_eq!(error_name("import foreign; var x = foreign.external.twice(2);"), "NotCallable");
    assert_eq!(error_name("import foreign; var x = foreign.external.twice.int.Node(2);"), "MemberNotFound");
    assert_eq!(error_name("import foreign; var x = foreign.external.twice.int.int(2.5);"), "ArgumentTypeMatchError");
    assert_eq!(error_name("import foreign; var x = foreign.external.log._null.int(1);"), "TypeMatchError");
}
