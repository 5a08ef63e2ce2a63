//! Unit tests for the parser module.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use super::parser::parse;
use crate::{
    ast::{
        ast::Module,
        expressions::{BinaryOp, ExprKind, Literal, UnaryOp},
        statements::StmtKind,
        types::TypeNodeKind,
    },
    errors::errors::Error,
    lexer::lexer::tokenize,
};

fn parse_source(source: &str) -> Result<Module, Error> {
    let tokens = tokenize(source.to_string(), Some("test.bt".to_string()))?;
    parse(tokens, Rc::new("test.bt".to_string()))
}

fn first(source: &str) -> StmtKind {
    parse_source(source).unwrap().body.remove(0).kind
}

#[test]
fn test_parse_module_name() {
    let module = parse_source("var x = 1;").unwrap();
    assert_eq!(module.name, "test");
}

#[test]
fn test_parse_var_declaration() {
    let StmtKind::Declaration(declaration) = first("var x = 42;") else {
        panic!("expected a declaration");
    };

    assert_eq!(declaration.name, "x");
    assert!(declaration.ty.is_none());
    assert!(!declaration.constant);
    assert_eq!(declaration.value.kind, ExprKind::Literal(Literal::Int(42)));
}

#[test]
fn test_parse_typed_declarations() {
    let StmtKind::Declaration(declaration) = first("const float:pi = 3.14;") else {
        panic!("expected a declaration");
    };
    assert!(declaration.constant);
    assert_eq!(declaration.ty.unwrap().to_string(), "float");

    let StmtKind::Declaration(declaration) = first("array<array<int>>:grid = null;") else {
        panic!("expected a declaration");
    };
    assert_eq!(declaration.ty.unwrap().to_string(), "array<array<int>>");

    let StmtKind::Declaration(declaration) = first("func<int, int>:f = g;") else {
        panic!("expected a declaration");
    };
    assert_eq!(declaration.ty.unwrap().to_string(), "func<int, int>");
}

#[test]
fn test_parse_comparison_statement_is_not_a_declaration() {
    let kind = first("a < b;");
    assert!(matches!(
        kind,
        StmtKind::Expression(expr) if matches!(expr.kind, ExprKind::Binary { op: BinaryOp::Lt, .. })
    ));
}

#[test]
fn test_parse_function_declaration() {
    let StmtKind::Function(function) = first("func int:add(int:a, int:b) { return a + b; }") else {
        panic!("expected a function");
    };

    assert_eq!(function.name, "add");
    assert_eq!(function.ret.unwrap().to_string(), "int");
    assert_eq!(function.params.len(), 2);
    assert_eq!(function.params[1].name, "b");
    assert_eq!(function.body.len(), 1);
}

#[test]
fn test_parse_void_function() {
    let StmtKind::Function(function) = first("func run() {}") else {
        panic!("expected a function");
    };

    assert!(function.ret.is_none());
    assert!(function.params.is_empty());
}

#[test]
fn test_parse_precedence() {
    let StmtKind::Expression(expr) = first("1 + 2 * 3;") else {
        panic!("expected an expression");
    };

    let ExprKind::Binary { op, right, .. } = expr.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn test_parse_logical_precedence() {
    let StmtKind::Expression(expr) = first("a or b and c == d;") else {
        panic!("expected an expression");
    };

    let ExprKind::Binary { op, right, .. } = expr.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinaryOp::Or);
    let ExprKind::Binary { op, right, .. } = right.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinaryOp::And);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Eq, .. }));
}

#[test]
fn test_parse_unary_and_cast() {
    let StmtKind::Expression(expr) = first("-x as float;") else {
        panic!("expected an expression");
    };

    let ExprKind::Cast { expr, ty } = expr.kind else {
        panic!("expected a cast");
    };
    assert_eq!(ty.to_string(), "float");
    assert!(matches!(expr.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
}

#[test]
fn test_parse_control_flow() {
    let module = parse_source(
        "if (a) { b(); } else if (c) { d(); } else { e(); }
         while (x < 10) { x = x + 1; }
         do { x = x - 1; } while (x > 0);
         for (var i = 0; i < 10; i = i + 1) { continue; }",
    )
    .unwrap();

    assert_eq!(module.body.len(), 4);

    let StmtKind::If { alternate, .. } = &module.body[0].kind else {
        panic!("expected if");
    };
    let alternate = alternate.as_ref().unwrap();
    assert!(matches!(alternate[0].kind, StmtKind::If { .. }));

    assert!(matches!(module.body[1].kind, StmtKind::While { .. }));
    assert!(matches!(module.body[2].kind, StmtKind::DoWhile { .. }));

    let StmtKind::For { init, step, body, .. } = &module.body[3].kind else {
        panic!("expected for");
    };
    assert!(matches!(init.kind, StmtKind::Declaration(_)));
    assert!(matches!(step.kind, StmtKind::Assignment { .. }));
    assert!(matches!(body[0].kind, StmtKind::Continue));
}

#[test]
fn test_parse_member_subscript_and_tuples() {
    let StmtKind::Expression(expr) = first("t.0.1;") else {
        panic!("expected an expression");
    };
    let ExprKind::Member { base, member } = expr.kind else {
        panic!("expected a member");
    };
    assert_eq!(member, "1");
    assert!(matches!(&base.kind, ExprKind::Member { member, .. } if member == "0"));

    let StmtKind::Assignment { target, value } = first("xs[i + 1] = (1, 2.5);") else {
        panic!("expected an assignment");
    };
    assert!(matches!(target.kind, ExprKind::Subscript { .. }));
    assert!(matches!(&value.kind, ExprKind::Tuple(elements) if elements.len() == 2));
}

#[test]
fn test_parse_new_expression() {
    let StmtKind::Declaration(declaration) = first("var b = new Box<int>(1);") else {
        panic!("expected a declaration");
    };

    let ExprKind::New { ty, args } = declaration.value.kind else {
        panic!("expected new");
    };
    assert_eq!(ty.to_string(), "Box<int>");
    assert_eq!(args.len(), 1);
}

#[test]
fn test_parse_object_declaration() {
    let StmtKind::Object(object) = first(
        "object Point {
            int:x;
            int:y;
            new(int:x, int:y) { self.x = x; self.y = y; }
            func int:sum() { return self.x + self.y; }
        }",
    ) else {
        panic!("expected an object");
    };

    assert_eq!(object.name, "Point");
    assert!(!object.is_template());
    assert_eq!(object.fields.len(), 2);

    let constructor = object.constructor.unwrap();
    let constructor = constructor.as_function().unwrap();
    assert_eq!(constructor.params[0].name, "self");
    assert_eq!(constructor.params[0].ty.to_string(), "Point");
    assert_eq!(constructor.params.len(), 3);

    let method = object.methods[0].as_function().unwrap();
    assert_eq!(method.name, "sum");
    assert_eq!(method.params.len(), 1);
}

#[test]
fn test_parse_template_object() {
    let StmtKind::Object(object) = first("object Box<T> { T:value; func T:get() { return self.value; } }")
    else {
        panic!("expected an object");
    };

    assert_eq!(object.attributes, vec![String::from("T")]);
    let method = object.methods[0].as_function().unwrap();
    assert_eq!(method.params[0].ty.to_string(), "Box<T>");
}

#[test]
fn test_parse_operator_declaration() {
    let StmtKind::Operator(operator) = first("operator (Vec:a + Vec:b) Vec { return a; }") else {
        panic!("expected an operator");
    };

    assert_eq!(operator.op, BinaryOp::Add);
    let function = operator.function.as_function().unwrap();
    assert_eq!(function.params.len(), 2);
    assert_eq!(function.ret.as_ref().unwrap().to_string(), "Vec");
}

#[test]
fn test_parse_import_export() {
    let module = parse_source("import math.vectors; export main;").unwrap();

    assert_eq!(
        module.body[0].kind,
        StmtKind::Import {
            path: vec![String::from("math"), String::from("vectors")]
        }
    );
    assert_eq!(
        module.body[1].kind,
        StmtKind::Export {
            name: String::from("main")
        }
    );
}

#[test]
fn test_parse_func_type_without_return() {
    let StmtKind::Declaration(declaration) = first("func<null, int>:f = g;") else {
        panic!("expected a declaration");
    };

    let TypeNodeKind::Func { ret, params } = declaration.ty.unwrap().kind else {
        panic!("expected a func type");
    };
    assert!(ret.is_none());
    assert_eq!(params.len(), 1);
}

#[test]
fn test_node_ids_are_unique() {
    let module = parse_source("func int:f(int:a) { var b = a + 1; return b * 2; }").unwrap();

    let mut ids = std::collections::HashSet::new();
    crate::ast::ast::walk_body(&module.body, &mut IdCollector(&mut ids)).unwrap();
    assert!(ids.len() > 8);
}

struct IdCollector<'s>(&'s mut std::collections::HashSet<u32>);

impl<'a> crate::ast::ast::Visitor<'a> for IdCollector<'_> {
    fn enter(&mut self, node: crate::ast::ast::NodeRef<'a>) -> Result<crate::ast::ast::Walk, Error> {
        assert!(self.0.insert(node.id()), "duplicate id {}", node.id());
        Ok(crate::ast::ast::Walk::Children)
    }
}

#[test]
fn test_parse_errors() {
    let error = parse_source("var x = ;").unwrap_err();
    assert_eq!(error.get_error_name(), "UnexpectedToken");

    let error = parse_source("var = 1;").unwrap_err();
    assert_eq!(error.get_error_name(), "UnexpectedTokenDetailed");

    let error = parse_source("func f( {").unwrap_err();
    assert_eq!(error.category(), crate::errors::errors::ErrorCategory::Syntax);

    let error = parse_source("var x = 99999999999;").unwrap_err();
    assert_eq!(error.get_error_name(), "NumberParseError");
}
