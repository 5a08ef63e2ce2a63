//! Structured asm.js output.
//!
//! Code is collected as fragments; values that are only known once the
//! whole program has been lowered, such as where static data ends, stay
//! symbolic until [`Builder::render`].

use crate::{
    compiler::{
        config::{EnvConstant, EnvConstants},
        func_lists::FuncList,
    },
    types::types::FuncType,
};

use super::coerce;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Env(EnvConstant),
}

#[derive(Debug, Default)]
pub struct Builder {
    fragments: Vec<Fragment>,
    pub indent: usize,
}

impl Builder {
    pub fn new(indent: usize) -> Self {
        Builder {
            fragments: vec![],
            indent,
        }
    }

    /// One line made of text and symbolic parts.
    pub fn line_parts(&mut self, parts: Vec<Fragment>) {
        self.fragments.push(Fragment::Text("    ".repeat(self.indent)));
        self.fragments.extend(parts);
        self.fragments.push(Fragment::Text(String::from("\n")));
    }

    pub fn line(&mut self, text: impl Into<String>) {
        self.line_parts(vec![Fragment::Text(text.into())]);
    }

    pub fn open(&mut self, text: impl Into<String>) {
        self.line(text);
        self.indent += 1;
    }

    pub fn close(&mut self, text: impl Into<String>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    pub fn append(&mut self, other: Builder) {
        self.fragments.extend(other.fragments);
    }

    /// The collected lines as plain text, for code without symbolic parts.
    pub fn text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|fragment| match fragment {
                Fragment::Text(text) => Some(text.as_str()),
                Fragment::Env(_) => None,
            })
            .collect()
    }

    pub fn render(&self, env: &EnvConstants) -> String {
        self.fragments
            .iter()
            .map(|fragment| match fragment {
                Fragment::Text(text) => text.clone(),
                Fragment::Env(constant) => env.value(*constant).to_string(),
            })
            .collect()
    }
}

/// Name of the dispatcher calling through references of a signature.
pub fn dispatcher_name(flat: &str) -> String {
    format!("$call${}", flat)
}

fn table_name(flat: &str, contextual: bool) -> String {
    format!("${}${}", if contextual { "ctx" } else { "plain" }, flat)
}

/// Tables are padded to a power of two with their first entry so a slot
/// can be masked into range.
fn padded(entries: &[String]) -> Vec<String> {
    let size = entries.len().next_power_of_two();
    (0..size)
        .map(|slot| entries.get(slot).unwrap_or(&entries[0]).clone())
        .collect()
}

/// The call of one side of a dispatcher, through its table or, with a
/// single entry, directly.
fn table_call(flat: &str, entries: &[String], contextual: bool, args: &[String]) -> String {
    let callee = match entries {
        [only] => only.clone(),
        _ => format!("{}[$f & {}]", table_name(flat, contextual), entries.len().next_power_of_two() - 1),
    };
    let mut values: Vec<String> = vec![];
    if contextual {
        values.push(String::from("$c"));
    }
    values.extend(args.iter().cloned());
    format!("{}({})", callee, values.join(", "))
}

/// `$call$<signature>(ref, args...)`: loads the slot and context of a
/// reference and calls the plain or contextual table.
pub fn dispatcher(out: &mut Builder, flat: &str, signature: &FuncType, list: Option<&FuncList>) {
    let args: Vec<String> = (0..signature.params.len()).map(|index| format!("$a{}", index)).collect();
    let mut params = vec![String::from("$r")];
    params.extend(args.iter().cloned());

    out.open(format!("function {}({}) {{", dispatcher_name(flat), params.join(", ")));
    out.line("$r = $r | 0;");
    for (arg, ty) in args.iter().zip(&signature.params) {
        out.line(format!("{} = {};", arg, coerce(ty, arg)));
    }
    out.line("var $f = 0, $c = 0;");
    out.line("$f = HEAP32[$r >> 2] | 0;");
    out.line("$c = HEAP32[$r + 4 >> 2] | 0;");

    let result = |call: String| match &signature.ret {
        Some(ret) => format!("return {};", coerce(ret, &call)),
        None => format!("{};", call),
    };

    let plain = list.map(|list| list.plain.as_slice()).unwrap_or_default();
    let contextual = list.map(|list| list.contextual.as_slice()).unwrap_or_default();

    if !plain.is_empty() && !contextual.is_empty() {
        out.open("if (($c | 0) == 0) {");
        out.line(result(table_call(flat, plain, false, &args)));
        if signature.ret.is_none() {
            out.line("return;");
        }
        out.close("}");
        out.line(result(table_call(flat, contextual, true, &args)));
    } else if !plain.is_empty() {
        out.line(result(table_call(flat, plain, false, &args)));
    } else if !contextual.is_empty() {
        out.line(result(table_call(flat, contextual, true, &args)));
    } else if let Some(ret) = &signature.ret {
        out.line(format!("return {};", super::zero(ret)));
    }
    out.close("}");
}

/// Function tables of one func-list; tables with a single entry are
/// called directly and not emitted.
pub fn tables(out: &mut Builder, flat: &str, list: &FuncList) {
    for contextual in [false, true] {
        let entries = list.entries(contextual);
        if entries.len() > 1 {
            out.line(format!(
                "var {} = [{}];",
                table_name(flat, contextual),
                padded(entries).join(", ")
            ));
        }
    }
}
