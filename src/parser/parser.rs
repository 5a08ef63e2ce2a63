//! Parser implementation for building the syntax tree.
//!
//! The parser uses a Pratt approach with NUD/LED handlers for expressions and
//! lookup tables of statement handlers keyed by the leading token. Every
//! node it builds gets a fresh [`NodeId`] from the module's id counter.

use std::{collections::HashMap, path::Path, rc::Rc};

use crate::{
    ast::{
        ast::{Module, NodeId, NodeIds},
        statements::Stmt,
    },
    errors::errors::{Error, ErrorImpl},
    lexer::tokens::{Token, TokenKind},
    Span,
};

use super::{
    lookups::{
        create_token_lookups, BPLookup, BindingPower, LEDHandler, LEDLookup, NUDHandler, NUDLookup,
        StmtHandler, StmtLookup,
    },
    stmt::parse_stmt,
    types::{create_token_type_lookups, TypeNUDHandler, TypeNUDLookup},
};

/// Parsing state: the token stream, the cursor and the handler tables.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    stmt_lookup: StmtLookup,
    nud_lookup: NUDLookup,
    led_lookup: LEDLookup,
    binding_power_lookup: BPLookup,
    type_nud_lookup: TypeNUDLookup,
    ids: NodeIds,
    /// Positions of `>>` tokens split by `expect_closing_angle`.
    splits: Vec<usize>,
}

/// A cursor snapshot for speculative parsing.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pos: usize,
    splits: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            stmt_lookup: HashMap::new(),
            nud_lookup: HashMap::new(),
            led_lookup: HashMap::new(),
            binding_power_lookup: HashMap::new(),
            type_nud_lookup: HashMap::new(),
            ids: NodeIds::default(),
            splits: vec![],
        }
    }

    /// Returns the current token without advancing. The stream always ends
    /// with `EOF`, which is never consumed.
    pub fn current_token(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub fn current_token_kind(&self) -> TokenKind {
        self.current_token().kind
    }

    /// Kind of the token `n` positions ahead of the cursor.
    pub fn peek_kind(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map_or(TokenKind::EOF, |token| token.kind)
    }

    /// Advances to the next token and returns the previous one.
    pub fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        if self.tokens[index].kind != TokenKind::EOF {
            self.pos += 1;
        }
        &self.tokens[index]
    }

    pub fn save(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            splits: self.splits.len(),
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        while self.splits.len() > checkpoint.splits {
            if let Some(index) = self.splits.pop() {
                let token = &mut self.tokens[index];
                token.kind = TokenKind::ShiftRight;
                token.value = String::from(">>");
                token.span.start.0 -= 1;
            }
        }
        self.pos = checkpoint.pos;
    }

    /// Expects a token of the given kind, with an optional custom error.
    pub fn expect_error(
        &mut self,
        expected_kind: TokenKind,
        error: Option<Error>,
    ) -> Result<Token, Error> {
        let token = self.current_token();
        if token.kind != expected_kind {
            return Err(error.unwrap_or_else(|| self.unexpected()));
        }
        Ok(self.advance().clone())
    }

    pub fn expect(&mut self, expected_kind: TokenKind) -> Result<Token, Error> {
        self.expect_error(expected_kind, None)
    }

    /// Expects the `>` closing an attribute list. A `>>` token closes two
    /// nested lists, so it is split and only its first half consumed.
    pub fn expect_closing_angle(&mut self) -> Result<(), Error> {
        match self.current_token_kind() {
            TokenKind::Greater => {
                self.advance();
                Ok(())
            }
            TokenKind::ShiftRight => {
                let token = &mut self.tokens[self.pos];
                token.kind = TokenKind::Greater;
                token.value = String::from(">");
                token.span.start.0 += 1;
                self.splits.push(self.pos);
                Ok(())
            }
            _ => Err(self.unexpected()),
        }
    }

    /// An `UnexpectedToken` error at the current token.
    pub fn unexpected(&self) -> Error {
        let token = self.current_token();
        Error::new(
            ErrorImpl::UnexpectedToken {
                token: token.value.clone(),
            },
            token.span.clone(),
        )
    }

    pub fn unexpected_detailed(&self, message: &str) -> Error {
        let token = self.current_token();
        Error::new(
            ErrorImpl::UnexpectedTokenDetailed {
                token: token.value.clone(),
                message: String::from(message),
            },
            token.span.clone(),
        )
    }

    pub fn has_tokens(&self) -> bool {
        self.current_token_kind() != TokenKind::EOF
    }

    /// Span from `start` to the end of the last consumed token.
    pub fn span_from(&self, start: &Span) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(previous) => start.to(&previous.span),
            None => start.clone(),
        }
    }

    pub fn get_stmt_lookup(&self) -> &StmtLookup {
        &self.stmt_lookup
    }

    pub fn get_nud_lookup(&self) -> &NUDLookup {
        &self.nud_lookup
    }

    pub fn get_led_lookup(&self) -> &LEDLookup {
        &self.led_lookup
    }

    pub fn get_bp_lookup(&self) -> &BPLookup {
        &self.binding_power_lookup
    }

    pub fn get_type_nud_lookup(&self) -> &TypeNUDLookup {
        &self.type_nud_lookup
    }

    /// Registers a left denotation (infix) handler for a token.
    pub fn led(&mut self, kind: TokenKind, binding_power: BindingPower, led_fn: LEDHandler) {
        self.binding_power_lookup.insert(kind, binding_power);
        self.led_lookup.insert(kind, led_fn);
    }

    /// Registers a null denotation (prefix) handler for a token.
    pub fn nud(&mut self, kind: TokenKind, nud_fn: NUDHandler) {
        self.nud_lookup.insert(kind, nud_fn);
    }

    pub fn stmt(&mut self, kind: TokenKind, stmt_fn: StmtHandler) {
        self.stmt_lookup.insert(kind, stmt_fn);
    }

    pub fn type_nud(&mut self, kind: TokenKind, nud_fn: TypeNUDHandler) {
        self.type_nud_lookup.insert(kind, nud_fn);
    }

    pub fn fresh_id(&mut self) -> NodeId {
        self.ids.fresh()
    }
}

/// Parses a token stream into a module.
///
/// The module is named after the file stem of `file`.
pub fn parse(tokens: Vec<Token>, file: Rc<String>) -> Result<Module, Error> {
    let mut parser = Parser::new(tokens);
    create_token_lookups(&mut parser);
    create_token_type_lookups(&mut parser);

    let mut body: Vec<Stmt> = vec![];

    while parser.has_tokens() {
        body.push(parse_stmt(&mut parser)?);
    }

    let name = Path::new(file.as_str())
        .file_stem()
        .map_or_else(|| file.to_string(), |stem| stem.to_string_lossy().into_owned());

    Ok(Module {
        name,
        file,
        body,
        ids: parser.ids,
    })
}
