//! Textual LLVM IR assembly.
//!
//! Instructions are only ever appended to the last block of the function
//! being built, so numbered temporaries come out in the ascending order
//! LLVM requires. Allocas are collected apart and spliced into the entry
//! block when the function is finished.

use crate::errors::errors::Error;

#[derive(Debug)]
struct Block {
    label: String,
    instructions: Vec<String>,
    terminated: bool,
}

impl Block {
    fn new(label: String) -> Self {
        Block {
            label,
            instructions: vec![],
            terminated: false,
        }
    }
}

#[derive(Debug)]
pub struct FunctionBuilder {
    header: String,
    allocas: Vec<String>,
    blocks: Vec<Block>,
    temps: usize,
    labels: usize,
}

impl FunctionBuilder {
    pub fn new(header: String) -> Self {
        FunctionBuilder {
            header,
            allocas: vec![],
            blocks: vec![Block::new(String::from("entry"))],
            temps: 0,
            labels: 0,
        }
    }

    fn last(&mut self) -> &mut Block {
        if self.blocks.is_empty() {
            self.blocks.push(Block::new(String::from("entry")));
        }
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    pub fn fresh_label(&mut self) -> String {
        let label = format!("L{}", self.labels);
        self.labels += 1;
        label
    }

    pub fn alloca(&mut self, name: &str, ty: &str) {
        self.allocas.push(format!("{} = alloca {}", name, ty));
    }

    /// Appends an instruction. Code after a terminator opens an unreachable
    /// block of its own.
    pub fn emit(&mut self, instruction: impl Into<String>) {
        if self.is_terminated() {
            let label = self.fresh_label();
            self.blocks.push(Block::new(label));
        }
        self.last().instructions.push(instruction.into());
    }

    /// Appends an instruction producing a value and returns its register.
    pub fn assign(&mut self, instruction: impl AsRef<str>) -> String {
        let temp = format!("%{}", self.temps);
        self.temps += 1;
        self.emit(format!("{} = {}", temp, instruction.as_ref()));
        temp
    }

    pub fn terminate(&mut self, instruction: impl Into<String>) {
        self.emit(instruction);
        self.last().terminated = true;
    }

    /// Starts block `label`, falling through from the current block when it
    /// is still open.
    pub fn start_block(&mut self, label: &str) {
        if !self.is_terminated() {
            self.terminate(format!("br label %{}", label));
        }
        self.blocks.push(Block::new(label.to_string()));
    }

    pub fn current_label(&self) -> &str {
        self.blocks.last().map_or("entry", |block| block.label.as_str())
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks.last().is_some_and(|block| block.terminated)
    }

    /// The function text, closing the last block with `default_return`.
    pub fn finish(mut self, default_return: &str) -> String {
        if !self.is_terminated() {
            self.terminate(default_return);
        }

        let mut out = format!("{} {{\n", self.header);
        for (index, block) in self.blocks.iter().enumerate() {
            out.push_str(&format!("{}:\n", block.label));
            if index == 0 {
                for alloca in &self.allocas {
                    out.push_str(&format!("  {}\n", alloca));
                }
            }
            for instruction in &block.instructions {
                out.push_str(&format!("  {}\n", instruction));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// The module being written: a global section, finished functions and the
/// stack of functions under construction.
#[derive(Debug, Default)]
pub struct Output {
    globals: Vec<String>,
    functions: Vec<String>,
    stack: Vec<FunctionBuilder>,
}

impl Output {
    pub fn global(&mut self, line: impl Into<String>) {
        self.globals.push(line.into());
    }

    pub fn begin(&mut self, header: String) {
        self.stack.push(FunctionBuilder::new(header));
    }

    pub fn current(&mut self) -> Result<&mut FunctionBuilder, Error> {
        self.stack
            .last_mut()
            .ok_or_else(|| Error::internal("no function is being emitted"))
    }

    pub fn end(&mut self, default_return: &str) -> Result<(), Error> {
        let function = self
            .stack
            .pop()
            .ok_or_else(|| Error::internal("function end without a beginning"))?;
        self.functions.push(function.finish(default_return));
        Ok(())
    }

    /// Open outputs, the module itself included.
    pub fn depth(&self) -> usize {
        self.stack.len() + 1
    }

    pub fn finish(self, preamble: &[String]) -> Result<String, Error> {
        if self.depth() != 1 {
            return Err(Error::internal(format!(
                "output stack ended at depth {}",
                self.depth()
            )));
        }

        let mut out = String::new();
        for line in preamble.iter().chain(&self.globals) {
            out.push_str(line);
            out.push('\n');
        }
        for function in &self.functions {
            out.push('\n');
            out.push_str(function);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_allocas_are_spliced_into_the_entry_block() {
        let mut function = FunctionBuilder::new(String::from("define i32 @f()"));
        let value = function.assign("add i32 1, 2");
        function.alloca("%x", "i32");
        function.emit(format!("store i32 {}, i32* %x", value));

        assert_eq!(
            function.finish("ret i32 0"),
            "define i32 @f() {\nentry:\n  %x = alloca i32\n  %0 = add i32 1, 2\n  store i32 %0, i32* %x\n  ret i32 0\n}\n"
        );
    }

    #[test]
    fn test_code_after_a_terminator_gets_a_block() {
        let mut function = FunctionBuilder::new(String::from("define void @f()"));
        function.terminate("ret void");
        function.emit("call void @g()");
        let text = function.finish("ret void");

        assert!(text.contains("L0:\n  call void @g()\n  ret void\n"));
    }

    #[test]
    fn test_starting_a_block_falls_through() {
        let mut function = FunctionBuilder::new(String::from("define void @f()"));
        function.start_block("L7");
        let text = function.finish("ret void");

        assert_eq!(text, "define void @f() {\nentry:\n  br label %L7\nL7:\n  ret void\n}\n");
    }

    #[test]
    fn test_unbalanced_output_is_an_invariant_error() {
        let mut output = Output::default();
        output.begin(String::from("define void @f()"));

        let error = output.finish(&[]).unwrap_err();
        assert_eq!(error.get_error_name(), "TranslationInvariant");
    }
}
