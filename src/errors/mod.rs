//! Error types and error handling for the compiler.
//!
//! Every phase reports failures through [`errors::Error`], which pairs an
//! [`errors::ErrorImpl`] variant with the span of the node that caused it.
//! Variants are grouped into [`errors::ErrorCategory`] families:
//!
//! - Syntax errors from the lexer and parser
//! - Redeclarations and unresolved references from the resolver
//! - Type mismatches from validation
//! - Structural misuse (exports, loop control, members, import cycles)
//! - Translation invariants, which indicate a compiler defect

pub mod errors;

#[cfg(test)]
mod tests;
