//! Code generation.
//!
//! Resolved and folded modules are lowered into one of three targets:
//!
//! - `js`: plain JavaScript, objects and arrays live on the JS heap
//! - `asmjs`: an asm.js module that manages its own flat heap
//! - `llvmir`: textual LLVM IR over `calloc`ed memory
//!
//! The backends share closure analysis (`closures`), the func-list registry
//! for indirect calls (`func_lists`) and the lowering helpers that turn
//! resolved expressions into storage and call targets (`lowering`).

pub mod asmjs;
pub mod closures;
pub mod compiler;
pub mod config;
pub mod func_lists;
pub mod js;
pub mod llvmir;
pub mod lowering;

#[cfg(test)]
mod tests;
