use crate::{
    ast::expressions::{BinaryOp, Expr, ExprKind, Literal, UnaryOp},
    errors::errors::{Error, ErrorImpl},
    lexer::tokens::TokenKind,
    Span,
};

use super::{lookups::BindingPower, parser::Parser, types::parse_type};

pub fn parse_expr(parser: &mut Parser, bp: BindingPower) -> Result<Expr, Error> {
    let token_kind = parser.current_token_kind();
    let Some(nud) = parser.get_nud_lookup().get(&token_kind).copied() else {
        return Err(parser.unexpected());
    };

    let mut left = nud(parser)?;

    // While the next operator binds tighter than `bp`, keep extending `left`
    loop {
        let token_kind = parser.current_token_kind();
        let next_bp = *parser
            .get_bp_lookup()
            .get(&token_kind)
            .unwrap_or(&BindingPower::Default);

        if next_bp <= bp {
            break;
        }

        let Some(led) = parser.get_led_lookup().get(&token_kind).copied() else {
            return Err(parser.unexpected());
        };

        left = led(parser, left, next_bp)?;
    }

    Ok(left)
}

fn make(parser: &mut Parser, span: Span, kind: ExprKind) -> Expr {
    Expr {
        id: parser.fresh_id(),
        span,
        kind,
    }
}

pub fn parse_number(parser: &mut Parser) -> Result<Literal, Error> {
    let token = parser.expect(TokenKind::Number)?;
    let error = || {
        Error::new(
            ErrorImpl::NumberParseError {
                token: token.value.clone(),
            },
            token.span.clone(),
        )
    };

    if token.value.contains('.') {
        token.value.parse::<f64>().map(Literal::Float).map_err(|_| error())
    } else {
        // Literals up to u32::MAX are accepted and wrap into the int range.
        token
            .value
            .parse::<u32>()
            .map(|value| Literal::Int(value as i32))
            .map_err(|_| error())
    }
}

pub fn parse_primary_expr(parser: &mut Parser) -> Result<Expr, Error> {
    let span = parser.current_token().span.clone();

    let kind = match parser.current_token_kind() {
        TokenKind::Number => ExprKind::Literal(parse_number(parser)?),
        TokenKind::Identifier => ExprKind::Symbol(parser.advance().value.clone()),
        TokenKind::String => ExprKind::Literal(Literal::Str(parser.advance().value.clone())),
        TokenKind::True | TokenKind::False => {
            let value = parser.advance().kind == TokenKind::True;
            ExprKind::Literal(Literal::Bool(value))
        }
        TokenKind::Null => {
            parser.advance();
            ExprKind::Literal(Literal::Null)
        }
        _ => return Err(parser.unexpected()),
    };

    Ok(make(parser, span, kind))
}

pub fn parse_binary_expr(parser: &mut Parser, left: Expr, bp: BindingPower) -> Result<Expr, Error> {
    let operator_token = parser.advance().clone();
    let Some(op) = BinaryOp::from_token(operator_token.kind) else {
        return Err(Error::new(
            ErrorImpl::UnexpectedToken {
                token: operator_token.value,
            },
            operator_token.span,
        ));
    };

    let right = parse_expr(parser, bp)?;
    let span = left.span.to(&right.span);

    Ok(make(
        parser,
        span,
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    ))
}

pub fn parse_prefix_expr(parser: &mut Parser) -> Result<Expr, Error> {
    let operator_token = parser.advance().clone();
    let op = match operator_token.kind {
        TokenKind::Dash => UnaryOp::Neg,
        TokenKind::Not => UnaryOp::Not,
        _ => UnaryOp::BitNot,
    };

    let operand = parse_expr(parser, BindingPower::Unary)?;
    let span = operator_token.span.to(&operand.span);

    Ok(make(
        parser,
        span,
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
    ))
}

/// `(expr)` or a tuple `(a, b, ...)`.
pub fn parse_grouping_expr(parser: &mut Parser) -> Result<Expr, Error> {
    let start = parser.advance().span.clone();
    let first = parse_expr(parser, BindingPower::Default)?;

    if parser.current_token_kind() != TokenKind::Comma {
        parser.expect(TokenKind::CloseParen)?;
        return Ok(first);
    }

    let mut elements = vec![first];
    while parser.current_token_kind() == TokenKind::Comma {
        parser.advance();
        elements.push(parse_expr(parser, BindingPower::Default)?);
    }
    parser.expect(TokenKind::CloseParen)?;

    let span = parser.span_from(&start);
    Ok(make(parser, span, ExprKind::Tuple(elements)))
}

pub fn parse_arguments(parser: &mut Parser) -> Result<Vec<Expr>, Error> {
    parser.expect(TokenKind::OpenParen)?;

    let mut args = vec![];
    while parser.current_token_kind() != TokenKind::CloseParen {
        args.push(parse_expr(parser, BindingPower::Default)?);

        if parser.current_token_kind() != TokenKind::CloseParen {
            parser.expect(TokenKind::Comma)?;
        }
    }

    parser.expect(TokenKind::CloseParen)?;
    Ok(args)
}

pub fn parse_call_expr(parser: &mut Parser, left: Expr, _bp: BindingPower) -> Result<Expr, Error> {
    let args = parse_arguments(parser)?;
    let span = parser.span_from(&left.span);

    Ok(make(
        parser,
        span,
        ExprKind::Call {
            callee: Box::new(left),
            args,
        },
    ))
}

pub fn parse_subscript_expr(
    parser: &mut Parser,
    left: Expr,
    _bp: BindingPower,
) -> Result<Expr, Error> {
    parser.expect(TokenKind::OpenBracket)?;
    let index = parse_expr(parser, BindingPower::Default)?;
    parser.expect(TokenKind::CloseBracket)?;
    let span = parser.span_from(&left.span);

    Ok(make(
        parser,
        span,
        ExprKind::Subscript {
            base: Box::new(left),
            index: Box::new(index),
        },
    ))
}

pub fn parse_member_expr(parser: &mut Parser, left: Expr, _bp: BindingPower) -> Result<Expr, Error> {
    parser.expect(TokenKind::Dot)?;

    let member = match parser.current_token_kind() {
        TokenKind::Identifier | TokenKind::Number => parser.advance().value.clone(),
        _ => return Err(parser.unexpected_detailed("expected a member name")),
    };
    let span = parser.span_from(&left.span);

    // `t.0.1` lexes its indices as the float `0.1`.
    let mut expr = left;
    for part in member.split('.') {
        expr = make(
            parser,
            span.clone(),
            ExprKind::Member {
                base: Box::new(expr),
                member: String::from(part),
            },
        );
    }

    Ok(expr)
}

pub fn parse_cast_expr(parser: &mut Parser, left: Expr, _bp: BindingPower) -> Result<Expr, Error> {
    parser.expect(TokenKind::As)?;
    let ty = parse_type(parser)?;
    let span = parser.span_from(&left.span);

    Ok(make(
        parser,
        span,
        ExprKind::Cast {
            expr: Box::new(left),
            ty,
        },
    ))
}

/// `new Point(1, 2)`, `new array<int>(10)`
pub fn parse_new_expr(parser: &mut Parser) -> Result<Expr, Error> {
    let start = parser.expect(TokenKind::New)?.span;
    let ty = parse_type(parser)?;
    let args = parse_arguments(parser)?;
    let span = parser.span_from(&start);

    Ok(make(parser, span, ExprKind::New { ty, args }))
}
