//! Backend selection.
//!
//! A compiled root module is lowered together with every module it
//! imports, dependencies first, into a single output for one target.

use tracing::info;

use crate::{
    errors::errors::Error,
    session::{CompiledModule, Session},
};

use super::{asmjs, js, llvmir};

/// Output flavour of the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Target {
    /// Plain JavaScript with garbage-collected objects.
    Js,
    /// An asm.js module over a flat heap.
    Asmjs,
    /// Textual LLVM IR.
    Llvmir,
}

impl Target {
    /// Conventional extension of an output file.
    pub fn extension(&self) -> &'static str {
        match self {
            Target::Js | Target::Asmjs => "js",
            Target::Llvmir => "ll",
        }
    }
}

/// Lowers `root` and its dependencies for `target`.
///
/// # Arguments
///
/// * `session` - The session `root` was loaded in; its func-lists are reset
///   and refilled while lowering
/// * `root` - The module whose exports become the output's exports
/// * `target` - The output flavour
/// * `name` - Name of the emitted module: the global variable holding the
///   exports on the script targets, the module id on LLVM
///
/// # Returns
///
/// The program text.
#[tracing::instrument(level = "info", skip(session, root), fields(module = %root.module.name))]
pub fn compile(session: &mut Session, root: &CompiledModule, target: Target, name: &str) -> Result<String, Error> {
    session.func_lists.reset();
    let modules = session.dependencies(root);
    info!(modules = modules.len(), "lowering");

    match target {
        Target::Js => js::emit(session, &modules, root, name),
        Target::Asmjs => asmjs::emit(session, &modules, root, name),
        Target::Llvmir => llvmir::emit(session, &modules, root, name),
    }
}
