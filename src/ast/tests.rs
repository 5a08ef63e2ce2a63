use std::rc::Rc;

use pretty_assertions::assert_eq;

use super::{
    ast::{walk_body, Module, NodeMut, NodeRef, Visitor, Walk},
    expressions::{ExprKind, Literal},
    statements::StmtKind,
    templates::{instantiate_templates, is_template},
};
use crate::{errors::errors::Error, lexer::lexer::tokenize, parser::parser::parse};

fn parse_source(source: &str) -> Module {
    let tokens = tokenize(source.to_string(), Some("test.bt".to_string())).unwrap();
    parse(tokens, Rc::new("test.bt".to_string())).unwrap()
}

#[derive(Default)]
struct Trace(Vec<String>);

impl<'a> Visitor<'a> for Trace {
    fn enter(&mut self, node: NodeRef<'a>) -> Result<Walk, Error> {
        let label = match node {
            NodeRef::Stmt(stmt) => match &stmt.kind {
                StmtKind::Function(function) => {
                    self.0.push(format!("func {}", function.name));
                    // Do not descend into nested functions.
                    return Ok(if function.name == "skipped" {
                        Walk::Skip
                    } else {
                        Walk::Children
                    });
                }
                StmtKind::Declaration(declaration) => format!("var {}", declaration.name),
                _ => return Ok(Walk::Children),
            },
            NodeRef::Expr(expr) => match &expr.kind {
                ExprKind::Symbol(name) => name.clone(),
                ExprKind::Literal(Literal::Int(value)) => value.to_string(),
                _ => return Ok(Walk::Children),
            },
            NodeRef::Param(param) => format!("param {}", param.name),
            _ => return Ok(Walk::Children),
        };

        self.0.push(label);
        Ok(Walk::Children)
    }

    fn leave(&mut self, node: NodeRef<'a>) -> Result<(), Error> {
        if let NodeRef::Stmt(stmt) = node {
            if let StmtKind::Function(function) = &stmt.kind {
                self.0.push(format!("end {}", function.name));
            }
        }
        Ok(())
    }
}

#[test]
fn test_walk_visits_in_evaluation_order() {
    let module = parse_source(
        "func f(int:a) { var b = a + 1; func skipped() { var hidden = 2; } }",
    );

    let mut trace = Trace::default();
    walk_body(&module.body, &mut trace).unwrap();

    assert_eq!(
        trace.0,
        vec![
            "func f",
            "param a",
            "var b",
            "a",
            "1",
            "func skipped",
            "end skipped",
            "end f"
        ]
    );
}

fn double_literals(node: NodeMut<'_>) -> Result<(), Error> {
    match node {
        NodeMut::Expr(expr) => {
            if let ExprKind::Literal(Literal::Int(value)) = &mut expr.kind {
                *value *= 2;
                return Ok(());
            }
            expr.substitute(&mut double_literals)
        }
        other => other.substitute(&mut double_literals),
    }
}

#[test]
fn test_substitute_replaces_in_place() {
    let mut module = parse_source("var x = 1 + (2 * 3);");

    for stmt in module.body.iter_mut() {
        double_literals(NodeMut::Stmt(stmt)).unwrap();
    }

    let StmtKind::Declaration(declaration) = &module.body[0].kind else {
        panic!("expected a declaration");
    };
    let ExprKind::Binary { left, right, .. } = &declaration.value.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(left.kind, ExprKind::Literal(Literal::Int(2)));
    let ExprKind::Binary { left, right, .. } = &right.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(left.kind, ExprKind::Literal(Literal::Int(4)));
    assert_eq!(right.kind, ExprKind::Literal(Literal::Int(6)));
}

fn object_names(module: &Module) -> Vec<String> {
    module
        .body
        .iter()
        .filter_map(|stmt| match &stmt.kind {
            StmtKind::Object(object) => Some(object.name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_instantiate_templates() {
    let mut module = parse_source(
        "object Box<T> { T:value; new(T:value) { self.value = value; } }
         var a = new Box<int>(1);
         var b = new Box<float>(1.5);
         Box<int>:c = a;",
    );

    instantiate_templates(&mut module).unwrap();

    assert_eq!(
        object_names(&module),
        vec!["Box", "Box$int$$", "Box$float$$"]
    );
    assert!(is_template(&module.body[0]));

    let StmtKind::Declaration(declaration) = &module.body[3].kind else {
        panic!("expected a declaration");
    };
    assert_eq!(declaration.ty.as_ref().unwrap().to_string(), "Box$int$$");

    let StmtKind::Object(instance) = &module.body[4].kind else {
        panic!("expected an object");
    };
    assert!(!instance.is_template());
    assert_eq!(instance.fields[0].ty.to_string(), "int");
    let constructor = instance.constructor.as_ref().unwrap().as_function().unwrap();
    assert_eq!(constructor.params[0].ty.to_string(), "Box$int$$");
    assert_eq!(constructor.params[1].ty.to_string(), "int");
}

#[test]
fn test_instantiate_nested_templates() {
    let mut module = parse_source(
        "object Box<T> { T:value; }
         var a = new Box<Box<int>>();",
    );

    instantiate_templates(&mut module).unwrap();

    let names = object_names(&module);
    assert!(names.contains(&String::from("Box$int$$")));
    assert!(names.contains(&String::from("Box$Box$int$$$$")));
}

#[test]
fn test_template_arity() {
    let mut module = parse_source("object Pair<A, B> { A:a; B:b; } var p = new Pair<int>();");
    let error = instantiate_templates(&mut module).unwrap_err();
    assert_eq!(error.get_error_name(), "TemplateArity");

    let mut module = parse_source("object Point { int:x; } var p = new Point<int>();");
    let error = instantiate_templates(&mut module).unwrap_err();
    assert_eq!(error.get_error_name(), "TemplateArity");
}
