//! Type annotation parsing.
//!
//! Supports named types with optional attribute lists (`int`, `array<int>`,
//! `tuple<int, float>`, `Box<int>`) and function types (`func<int, float>`,
//! `func<null>` for no return value).

use std::collections::HashMap;

use crate::{
    ast::types::{TypeNode, TypeNodeKind},
    errors::errors::Error,
    lexer::tokens::TokenKind,
};

use super::parser::Parser;

pub type TypeNUDHandler = fn(&mut Parser) -> Result<TypeNode, Error>;

pub type TypeNUDLookup = HashMap<TokenKind, TypeNUDHandler>;

pub fn create_token_type_lookups(parser: &mut Parser) {
    parser.type_nud(TokenKind::Identifier, parse_symbol_type);
    parser.type_nud(TokenKind::Func, parse_func_type);
}

pub fn parse_type(parser: &mut Parser) -> Result<TypeNode, Error> {
    let token_kind = parser.current_token_kind();
    match parser.get_type_nud_lookup().get(&token_kind) {
        Some(handler) => handler(parser),
        None => Err(parser.unexpected_detailed("expected a type")),
    }
}

/// `<` type {`,` type} `>`
fn parse_attribute_list(parser: &mut Parser) -> Result<Vec<TypeNode>, Error> {
    parser.expect(TokenKind::Less)?;

    let mut attributes = vec![parse_type(parser)?];
    while parser.current_token_kind() == TokenKind::Comma {
        parser.advance();
        attributes.push(parse_type(parser)?);
    }

    parser.expect_closing_angle()?;
    Ok(attributes)
}

pub fn parse_symbol_type(parser: &mut Parser) -> Result<TypeNode, Error> {
    let token = parser.expect(TokenKind::Identifier)?;

    let attributes = if parser.current_token_kind() == TokenKind::Less {
        parse_attribute_list(parser)?
    } else {
        vec![]
    };

    Ok(TypeNode {
        id: parser.fresh_id(),
        span: parser.span_from(&token.span),
        kind: TypeNodeKind::Named {
            name: token.value,
            attributes,
        },
    })
}

pub fn parse_func_type(parser: &mut Parser) -> Result<TypeNode, Error> {
    let start = parser.expect(TokenKind::Func)?.span;
    parser.expect(TokenKind::Less)?;

    let ret = if parser.current_token_kind() == TokenKind::Null {
        parser.advance();
        None
    } else {
        Some(Box::new(parse_type(parser)?))
    };

    let mut params = vec![];
    while parser.current_token_kind() == TokenKind::Comma {
        parser.advance();
        params.push(parse_type(parser)?);
    }

    parser.expect_closing_angle()?;

    Ok(TypeNode {
        id: parser.fresh_id(),
        span: parser.span_from(&start),
        kind: TypeNodeKind::Func { ret, params },
    })
}
