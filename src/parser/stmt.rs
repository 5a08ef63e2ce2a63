use crate::{
    ast::{
        expressions::BinaryOp,
        statements::{
            Declaration, Field, FunctionDecl, ObjectDecl, OperatorDecl, Param, Stmt, StmtKind,
        },
        types::{TypeNode, TypeNodeKind},
    },
    errors::errors::Error,
    lexer::tokens::TokenKind,
    parser::{expr::parse_expr, lookups::BindingPower},
    Span,
};

use super::{parser::Parser, types::parse_type};

fn make(parser: &mut Parser, span: Span, kind: StmtKind) -> Stmt {
    Stmt {
        id: parser.fresh_id(),
        span,
        kind,
    }
}

pub fn parse_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let kind = parser.current_token_kind();
    if let Some(handler) = parser.get_stmt_lookup().get(&kind).copied() {
        return handler(parser);
    }

    // `int:x = 1;` and `array<int>:xs = ...;` start like expressions.
    if kind == TokenKind::Identifier
        && matches!(parser.peek_kind(1), TokenKind::Colon | TokenKind::Less)
    {
        let certain = parser.peek_kind(1) == TokenKind::Colon;
        let checkpoint = parser.save();
        match parse_typed_decl_stmt(parser) {
            Ok(stmt) => return Ok(stmt),
            Err(error) if certain => return Err(error),
            Err(_) => parser.restore(checkpoint),
        }
    }

    let stmt = parse_simple_stmt(parser)?;
    parser.expect(TokenKind::Semicolon)?;
    Ok(stmt)
}

/// An assignment or expression statement without its terminator.
pub fn parse_simple_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let expr = parse_expr(parser, BindingPower::Default)?;

    if parser.current_token_kind() == TokenKind::Assignment {
        parser.advance();
        let value = parse_expr(parser, BindingPower::Default)?;
        let span = expr.span.to(&value.span);
        return Ok(make(parser, span, StmtKind::Assignment { target: expr, value }));
    }

    let span = expr.span.clone();
    Ok(make(parser, span, StmtKind::Expression(expr)))
}

pub fn parse_block(parser: &mut Parser) -> Result<Vec<Stmt>, Error> {
    parser.expect(TokenKind::OpenCurly)?;

    let mut body = vec![];
    while parser.current_token_kind() != TokenKind::CloseCurly {
        if !parser.has_tokens() {
            return Err(parser.unexpected_detailed("expected `}`"));
        }
        body.push(parse_stmt(parser)?);
    }

    parser.expect(TokenKind::CloseCurly)?;
    Ok(body)
}

fn parse_declaration_tail(
    parser: &mut Parser,
    start: &Span,
    ty: Option<TypeNode>,
    constant: bool,
) -> Result<Stmt, Error> {
    let error = parser.unexpected_detailed("expected identifier during variable declaration");
    let name = parser.expect_error(TokenKind::Identifier, Some(error))?.value;

    parser.expect(TokenKind::Assignment)?;
    let value = parse_expr(parser, BindingPower::Default)?;
    parser.expect(TokenKind::Semicolon)?;

    let span = parser.span_from(start);
    Ok(make(
        parser,
        span,
        StmtKind::Declaration(Declaration {
            name,
            ty,
            value,
            constant,
        }),
    ))
}

/// `var x = 1;`, `const int:x = 1;`
pub fn parse_var_decl_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start_token = parser.advance().clone();
    let constant = start_token.kind == TokenKind::Const;

    let ty = if parser.current_token_kind() == TokenKind::Identifier
        && parser.peek_kind(1) == TokenKind::Assignment
    {
        None
    } else {
        let ty = parse_type(parser)?;
        parser.expect(TokenKind::Colon)?;
        Some(ty)
    };

    parse_declaration_tail(parser, &start_token.span, ty, constant)
}

/// `int:x = 1;`
pub fn parse_typed_decl_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.current_token().span.clone();
    let ty = parse_type(parser)?;
    parser.expect(TokenKind::Colon)?;
    parse_declaration_tail(parser, &start, Some(ty), false)
}

/// `func int:name(int:a) { ... }`, or a declaration typed `func<...>`.
pub fn parse_func_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    if parser.peek_kind(1) == TokenKind::Less {
        return parse_typed_decl_stmt(parser);
    }

    let start = parser.current_token().span.clone();
    let function = parse_function(parser, vec![])?;
    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::Function(function)))
}

fn parse_params(parser: &mut Parser, mut params: Vec<Param>) -> Result<Vec<Param>, Error> {
    parser.expect(TokenKind::OpenParen)?;

    while parser.current_token_kind() != TokenKind::CloseParen {
        let ty = parse_type(parser)?;
        parser.expect(TokenKind::Colon)?;
        let name = parser.expect(TokenKind::Identifier)?;

        params.push(Param {
            id: parser.fresh_id(),
            span: ty.span.to(&name.span),
            name: name.value,
            ty,
        });

        if parser.current_token_kind() != TokenKind::CloseParen {
            parser.expect(TokenKind::Comma)?;
        }
    }

    parser.expect(TokenKind::CloseParen)?;
    Ok(params)
}

/// Parses from `func` through the body. `params` are prepended implicit
/// parameters such as `self`.
fn parse_function(parser: &mut Parser, params: Vec<Param>) -> Result<FunctionDecl, Error> {
    parser.expect(TokenKind::Func)?;

    let ret = if parser.current_token_kind() == TokenKind::Identifier
        && parser.peek_kind(1) == TokenKind::OpenParen
    {
        None
    } else {
        let ret = parse_type(parser)?;
        parser.expect(TokenKind::Colon)?;
        Some(ret)
    };

    let name = parser.expect(TokenKind::Identifier)?.value;
    let params = parse_params(parser, params)?;
    let body = parse_block(parser)?;

    Ok(FunctionDecl {
        name,
        ret,
        params,
        body,
    })
}

pub fn parse_return_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();

    let value = if parser.current_token_kind() == TokenKind::Semicolon {
        None
    } else {
        Some(parse_expr(parser, BindingPower::Default)?)
    };

    parser.expect(TokenKind::Semicolon)?;
    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::Return(value)))
}

fn parse_condition(parser: &mut Parser) -> Result<crate::ast::expressions::Expr, Error> {
    parser.expect(TokenKind::OpenParen)?;
    let condition = parse_expr(parser, BindingPower::Default)?;
    parser.expect(TokenKind::CloseParen)?;
    Ok(condition)
}

pub fn parse_if_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    let condition = parse_condition(parser)?;
    let consequent = parse_block(parser)?;

    let alternate = if parser.current_token_kind() == TokenKind::Else {
        parser.advance();
        if parser.current_token_kind() == TokenKind::If {
            Some(vec![parse_if_stmt(parser)?])
        } else {
            Some(parse_block(parser)?)
        }
    } else {
        None
    };

    let span = parser.span_from(&start);
    Ok(make(
        parser,
        span,
        StmtKind::If {
            condition,
            consequent,
            alternate,
        },
    ))
}

pub fn parse_while_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    let condition = parse_condition(parser)?;
    let body = parse_block(parser)?;

    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::While { condition, body }))
}

pub fn parse_do_while_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    let body = parse_block(parser)?;
    parser.expect(TokenKind::While)?;
    let condition = parse_condition(parser)?;
    parser.expect(TokenKind::Semicolon)?;

    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::DoWhile { body, condition }))
}

/// `for (var i = 0; i < n; i = i + 1) { ... }`
pub fn parse_for_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    parser.expect(TokenKind::OpenParen)?;

    let init = parse_stmt(parser)?;
    let condition = parse_expr(parser, BindingPower::Default)?;
    parser.expect(TokenKind::Semicolon)?;
    let step = parse_simple_stmt(parser)?;
    parser.expect(TokenKind::CloseParen)?;

    let body = parse_block(parser)?;

    let span = parser.span_from(&start);
    Ok(make(
        parser,
        span,
        StmtKind::For {
            init: Box::new(init),
            condition,
            step: Box::new(step),
            body,
        },
    ))
}

pub fn parse_loop_control_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let token = parser.advance().clone();
    parser.expect(TokenKind::Semicolon)?;

    let kind = if token.kind == TokenKind::Break {
        StmtKind::Break
    } else {
        StmtKind::Continue
    };

    let span = parser.span_from(&token.span);
    Ok(make(parser, span, kind))
}

pub fn parse_import_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();

    let mut path = vec![parser.expect(TokenKind::Identifier)?.value];
    while parser.current_token_kind() == TokenKind::Dot {
        parser.advance();
        path.push(parser.expect(TokenKind::Identifier)?.value);
    }

    parser.expect(TokenKind::Semicolon)?;
    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::Import { path }))
}

pub fn parse_export_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    let name = parser.expect(TokenKind::Identifier)?.value;
    parser.expect(TokenKind::Semicolon)?;

    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::Export { name }))
}

/// ```text
/// object Box<T> {
///     T:value;
///     new(T:value) { self.value = value; }
///     func T:get() { return self.value; }
/// }
/// ```
pub fn parse_object_decl_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    let name_token = parser.expect(TokenKind::Identifier)?;

    let mut attributes = vec![];
    if parser.current_token_kind() == TokenKind::Less {
        parser.advance();
        attributes.push(parser.expect(TokenKind::Identifier)?.value);
        while parser.current_token_kind() == TokenKind::Comma {
            parser.advance();
            attributes.push(parser.expect(TokenKind::Identifier)?.value);
        }
        parser.expect_closing_angle()?;
    }

    let mut object = ObjectDecl {
        name: name_token.value.clone(),
        attributes,
        fields: vec![],
        constructor: None,
        methods: vec![],
    };

    parser.expect(TokenKind::OpenCurly)?;

    while parser.current_token_kind() != TokenKind::CloseCurly {
        let member_start = parser.current_token().span.clone();

        match parser.current_token_kind() {
            TokenKind::New => {
                parser.advance();
                let this = self_param(parser, &object, &name_token.span);
                let params = parse_params(parser, vec![this])?;
                let body = parse_block(parser)?;
                let function = FunctionDecl {
                    name: String::from("new"),
                    ret: None,
                    params,
                    body,
                };
                let span = parser.span_from(&member_start);
                object.constructor = Some(Box::new(make(parser, span, StmtKind::Function(function))));
            }
            TokenKind::Func => {
                let this = self_param(parser, &object, &name_token.span);
                let function = parse_function(parser, vec![this])?;
                let span = parser.span_from(&member_start);
                object.methods.push(make(parser, span, StmtKind::Function(function)));
            }
            TokenKind::EOF => return Err(parser.unexpected_detailed("expected `}`")),
            _ => {
                let ty = parse_type(parser)?;
                parser.expect(TokenKind::Colon)?;
                let name = parser.expect(TokenKind::Identifier)?.value;
                parser.expect(TokenKind::Semicolon)?;
                object.fields.push(Field {
                    id: parser.fresh_id(),
                    span: parser.span_from(&member_start),
                    name,
                    ty,
                });
            }
        }
    }

    parser.expect(TokenKind::CloseCurly)?;

    let span = parser.span_from(&start);
    Ok(make(parser, span, StmtKind::Object(object)))
}

/// The implicit `self` parameter of methods and constructors.
fn self_param(parser: &mut Parser, object: &ObjectDecl, span: &Span) -> Param {
    let attributes = object
        .attributes
        .iter()
        .map(|attribute| TypeNode::named(parser.fresh_id(), span.clone(), attribute.clone()))
        .collect();

    Param {
        id: parser.fresh_id(),
        span: span.clone(),
        name: String::from("self"),
        ty: TypeNode {
            id: parser.fresh_id(),
            span: span.clone(),
            kind: TypeNodeKind::Named {
                name: object.name.clone(),
                attributes,
            },
        },
    }
}

/// `operator (Vec:a + Vec:b) Vec { ... }`
pub fn parse_operator_decl_stmt(parser: &mut Parser) -> Result<Stmt, Error> {
    let start = parser.advance().span.clone();
    parser.expect(TokenKind::OpenParen)?;

    let left_ty = parse_type(parser)?;
    parser.expect(TokenKind::Colon)?;
    let left = parser.expect(TokenKind::Identifier)?;

    let op_token = parser.current_token().clone();
    let op = match BinaryOp::from_token(op_token.kind) {
        Some(op) if op_token.kind.is_overloadable() => op,
        _ => return Err(parser.unexpected_detailed("expected an overloadable operator")),
    };
    parser.advance();

    let right_ty = parse_type(parser)?;
    parser.expect(TokenKind::Colon)?;
    let right = parser.expect(TokenKind::Identifier)?;
    parser.expect(TokenKind::CloseParen)?;

    let ret = parse_type(parser)?;
    let body = parse_block(parser)?;

    let params = vec![
        Param {
            id: parser.fresh_id(),
            span: left_ty.span.to(&left.span),
            name: left.value,
            ty: left_ty,
        },
        Param {
            id: parser.fresh_id(),
            span: right_ty.span.to(&right.span),
            name: right.value,
            ty: right_ty,
        },
    ];

    let span = parser.span_from(&start);
    let function = make(
        parser,
        span.clone(),
        StmtKind::Function(FunctionDecl {
            name: format!("operator{}", op.symbol()),
            ret: Some(ret),
            params,
            body,
        }),
    );

    Ok(make(
        parser,
        span,
        StmtKind::Operator(OperatorDecl {
            op,
            function: Box::new(function),
        }),
    ))
}
