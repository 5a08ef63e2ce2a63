/// Syntax tree module
/// Contains all definitions related to the syntax tree structure
///
/// Submodules:
/// - ast: module root, node ids, `traverse`/`substitute` and the walker
/// - expressions: expression nodes and operators
/// - statements: statement nodes and declarations
/// - types: type annotations as written in source
/// - templates: object template instantiation
pub mod ast;
pub mod expressions;
pub mod statements;
pub mod templates;
pub mod types;

#[cfg(test)]
mod tests;
