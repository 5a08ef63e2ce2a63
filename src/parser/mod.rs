//! Parser module for building the syntax tree.
//!
//! This module contains the parser that transforms a stream of tokens
//! into a [`crate::ast::ast::Module`]. It uses a Pratt parser for
//! expressions with binding powers for precedence and handles:
//!
//! - Statement parsing (declarations, functions, objects, control flow)
//! - Expression parsing (binary ops, calls, members, casts, literals)
//! - Type annotation parsing

pub mod expr;
pub mod lookups;
pub mod parser;
pub mod stmt;
pub mod types;

#[cfg(test)]
mod tests;
