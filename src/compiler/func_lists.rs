//! Per-signature tables of indirectly referenced functions.
//!
//! Every function whose reference is taken is registered here when the
//! reference is created, so a slot index is valid for the whole program.
//! Functions taking a hidden context argument (closures, bound methods)
//! live in a separate list from plain ones.

use indexmap::IndexMap;
use tracing::trace;

use crate::types::types::Type;

#[derive(Debug, Clone)]
pub struct FuncList {
    pub signature: Type,
    pub plain: Vec<String>,
    pub contextual: Vec<String>,
}

impl FuncList {
    fn new(signature: Type) -> Self {
        FuncList {
            signature,
            plain: vec![],
            contextual: vec![],
        }
    }

    pub fn entries(&self, contextual: bool) -> &[String] {
        if contextual {
            &self.contextual
        } else {
            &self.plain
        }
    }
}

/// Func-lists keyed by the flat name of their signature.
#[derive(Debug, Clone, Default)]
pub struct FuncLists {
    lists: IndexMap<String, FuncList>,
}

impl FuncLists {
    pub fn reset(&mut self) {
        self.lists.clear();
    }

    /// Slot of `function` in the list for `signature`, appending it on
    /// first registration.
    pub fn register(&mut self, signature: &Type, contextual: bool, function: &str) -> usize {
        let list = self
            .lists
            .entry(signature.flat_type_name())
            .or_insert_with(|| FuncList::new(signature.clone()));
        let entries = if contextual {
            &mut list.contextual
        } else {
            &mut list.plain
        };

        if let Some(slot) = entries.iter().position(|entry| entry == function) {
            return slot;
        }

        entries.push(function.to_string());
        trace!(signature = %signature, contextual, function, slot = entries.len() - 1, "func-list registration");
        entries.len() - 1
    }

    pub fn get(&self, signature: &Type) -> Option<&FuncList> {
        self.lists.get(&signature.flat_type_name())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FuncList)> {
        self.lists.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}
