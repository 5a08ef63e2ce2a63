//! Checks emitted IR with LLVM's own parser and verifier.

use inkwell::{context::Context, memory_buffer::MemoryBuffer};
use tracing::debug;

use crate::errors::errors::Error;

/// Parses `ir` into a module and runs the verifier on it.
pub fn verify(ir: &str, name: &str) -> Result<(), Error> {
    let context = Context::create();
    let buffer = MemoryBuffer::create_from_memory_range_copy(ir.as_bytes(), name);

    let module = context
        .create_module_from_ir(buffer)
        .map_err(|message| Error::internal(format!("emitted IR does not parse: {}", message.to_string())))?;
    module
        .verify()
        .map_err(|message| Error::internal(format!("emitted IR does not verify: {}", message.to_string())))?;

    debug!(name, functions = module.get_functions().count(), "llvm ir verified");
    Ok(())
}
