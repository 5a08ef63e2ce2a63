use std::rc::Rc;

use pretty_assertions::assert_eq;

use super::constant_fold::compute;
use crate::{
    ast::{
        expressions::{BinaryOp, Expr, ExprKind, Literal},
        statements::StmtKind,
    },
    session::{CompiledModule, MemoryLoader, Session},
};

fn compile(source: &str) -> Rc<CompiledModule> {
    let mut session = Session::in_memory(MemoryLoader::new().with_file("main.bt", source));
    session.load("main.bt").unwrap()
}

fn value_of<'m>(module: &'m CompiledModule, name: &str) -> &'m Expr {
    module
        .module
        .body
        .iter()
        .find_map(|stmt| match &stmt.kind {
            StmtKind::Declaration(declaration) if declaration.name == name => Some(&declaration.value),
            _ => None,
        })
        .unwrap()
}

#[test]
fn test_fold_integer_literals() {
    let module = compile("var a = 3 + 4; var b = 7 / 2; var c = 2147483647 + 1; var d = 7 % 3;");

    assert_eq!(value_of(&module, "a").kind, ExprKind::Literal(Literal::Int(7)));
    assert_eq!(value_of(&module, "b").kind, ExprKind::Literal(Literal::Int(3)));
    assert_eq!(
        value_of(&module, "c").kind,
        ExprKind::Literal(Literal::Int(i32::MIN))
    );
    assert_eq!(value_of(&module, "d").kind, ExprKind::Literal(Literal::Int(1)));
}

#[test]
fn test_fold_comparison_to_bool() {
    let module = compile("var a = 3 < 4; var b = 1.5 == 2.5;");

    assert_eq!(value_of(&module, "a").kind, ExprKind::Literal(Literal::Bool(true)));
    assert_eq!(value_of(&module, "b").kind, ExprKind::Literal(Literal::Bool(false)));
}

#[test]
fn test_short_circuit_ignores_side_effects() {
    let module = compile(
        "var hits = 0;
         func bool:touch() { hits = hits + 1; return true; }
         var a = false and touch();
         var b = touch() or true;
         var c = touch() and true;",
    );

    assert_eq!(value_of(&module, "a").kind, ExprKind::Literal(Literal::Bool(false)));
    assert_eq!(value_of(&module, "b").kind, ExprKind::Literal(Literal::Bool(true)));
    assert!(matches!(value_of(&module, "c").kind, ExprKind::Binary { op: BinaryOp::And, .. }));
}

#[test]
fn test_division_by_zero_is_left_alone() {
    let module = compile("var x = 1.5; var a = x / 0.0; var b = 1.0 / 0.0; var c = 4 % 0;");

    for name in ["a", "b", "c"] {
        assert!(
            matches!(value_of(&module, name).kind, ExprKind::Binary { .. }),
            "{} was folded",
            name
        );
    }
}

fn assert_literal_then_symbol(expr: &Expr, op: BinaryOp, literal: Literal, symbol: &str) {
    let ExprKind::Binary { op: actual, left, right } = &expr.kind else {
        panic!("expected a binary expression, found {:?}", expr.kind);
    };
    assert_eq!(*actual, op);
    assert_eq!(left.kind, ExprKind::Literal(literal));
    assert_eq!(right.kind, ExprKind::Symbol(symbol.to_string()));
}

#[test]
fn test_reassociate_nested_literal() {
    let module = compile(
        "var x = 2;
         var a = 5 + (x + 3);
         var b = 5 * (x * 3);
         var c = 5 + (3 + x);",
    );

    assert_literal_then_symbol(value_of(&module, "a"), BinaryOp::Add, Literal::Int(8), "x");
    assert_literal_then_symbol(value_of(&module, "b"), BinaryOp::Mul, Literal::Int(15), "x");
    assert_literal_then_symbol(value_of(&module, "c"), BinaryOp::Add, Literal::Int(8), "x");
}

#[test]
fn test_reassociate_literal_on_the_right() {
    let module = compile(
        "var x = 2.0;
         var a = (x + 1.5) + 2.0;
         var b = (x / 2.0) / 4.0;",
    );

    let ExprKind::Binary { op, left, right } = &value_of(&module, "a").kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert_eq!(left.kind, ExprKind::Symbol(String::from("x")));
    assert_eq!(right.kind, ExprKind::Literal(Literal::Float(3.5)));

    let ExprKind::Binary { op, right, .. } = &value_of(&module, "b").kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinaryOp::Div);
    assert_eq!(right.kind, ExprKind::Literal(Literal::Float(8.0)));
}

#[test]
fn test_integer_division_chains() {
    let module = compile(
        "var x = 7;
         var small = (x / 2) / 3;
         var large = (x / 65536) / 65536;
         var nested = 12 / (x * 2);",
    );

    let ExprKind::Binary { op, left, right } = &value_of(&module, "small").kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinaryOp::Div);
    assert_eq!(left.kind, ExprKind::Symbol(String::from("x")));
    assert_eq!(right.kind, ExprKind::Literal(Literal::Int(6)));

    // 65536 * 65536 overflows, so both divisions stay.
    let ExprKind::Binary { left, right, .. } = &value_of(&module, "large").kind else {
        panic!("expected a binary expression");
    };
    assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Div, .. }));
    assert_eq!(right.kind, ExprKind::Literal(Literal::Int(65536)));

    let ExprKind::Binary { left, right, .. } = &value_of(&module, "nested").kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(left.kind, ExprKind::Literal(Literal::Int(12)));
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn test_folds_cascade() {
    let module = compile("var a = (1 + 2) * 3; var b = ((1 + 2) * 3) < 10 and true;");

    assert_eq!(value_of(&module, "a").kind, ExprKind::Literal(Literal::Int(9)));
    assert_eq!(value_of(&module, "b").kind, ExprKind::Literal(Literal::Bool(true)));
}

#[test]
fn test_overloaded_operator_is_not_folded() {
    let module = compile(
        "operator (int:a + int:b) int { return a - b; }
         var a = 3 + 4;",
    );

    assert!(matches!(value_of(&module, "a").kind, ExprKind::Binary { op: BinaryOp::Add, .. }));
}

#[test]
fn test_templates_are_not_folded() {
    let module = compile("object Box<T> { T:value; func int:get() { return 1 + 2; } }");

    let StmtKind::Object(template) = &module.module.body[0].kind else {
        panic!("expected the template");
    };
    let method = template.methods[0].as_function().unwrap();
    let StmtKind::Return(Some(value)) = &method.body[0].kind else {
        panic!("expected a return");
    };
    assert!(matches!(value.kind, ExprKind::Binary { .. }));
}

#[test]
fn test_compute() {
    assert_eq!(
        compute(BinaryOp::Shl, &Literal::Int(1), &Literal::Int(33)),
        Some(Literal::Int(2))
    );
    assert_eq!(
        compute(BinaryOp::Shr, &Literal::Int(-8), &Literal::Int(1)),
        Some(Literal::Int(-4))
    );
    assert_eq!(
        compute(BinaryOp::Div, &Literal::Int(-7), &Literal::Int(2)),
        Some(Literal::Int(-3))
    );
    assert_eq!(compute(BinaryOp::Div, &Literal::Int(1), &Literal::Int(0)), None);
    assert_eq!(compute(BinaryOp::BitAnd, &Literal::Float(1.0), &Literal::Float(1.0)), None);
}
