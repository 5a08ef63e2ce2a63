//! Closure frames.
//!
//! A function whose nested functions read or write its variables keeps
//! those variables in a heap frame instead of locals. Nested functions that
//! access lexical scope receive the frame of their parent as a hidden first
//! argument and reach frames further out through `$parent` links.

use std::{collections::HashMap, rc::Rc};

use indexmap::IndexMap;
use tracing::trace;

use crate::{
    errors::errors::Error,
    resolver::context::{ContextId, Resolution, ROOT},
    types::types::{StructType, Type},
};

/// Frame field holding the enclosing function's frame.
pub const PARENT: &str = "$parent";

/// Where a binding lives at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Module-scope binding.
    Global(String),
    Local(String),
    /// Field `field` of the frame reached through `path`.
    Frame { path: FramePath, field: String },
}

/// How a function reaches a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePath {
    /// The frame the function allocated itself.
    Own,
    /// The hidden context argument, followed by this many `$parent` links.
    Up(usize),
}

/// Frames of one module, by the context that allocates them.
#[derive(Debug, Default)]
pub struct Closures {
    frames: HashMap<ContextId, Rc<StructType>>,
}

impl Closures {
    pub fn analyze(resolution: &Resolution) -> Closures {
        let mut frames = HashMap::new();

        for context in &resolution.contexts {
            if context.id == ROOT {
                continue;
            }

            let capturing: Vec<ContextId> = context
                .functions
                .iter()
                .copied()
                .filter(|child| resolution.contexts[*child].accesses_lexical_scope)
                .collect();
            if capturing.is_empty() {
                continue;
            }

            let mut fields = IndexMap::new();
            if context.accesses_lexical_scope {
                fields.insert(PARENT.to_string(), Type::Null);
            }
            for child in capturing {
                for (name, definer) in &resolution.contexts[child].lexical_lookups {
                    if *definer != context.id || context.function_declarations.contains_key(name) {
                        continue;
                    }
                    if let (Some(assigned), Some(ty)) = (context.name_map.get(name), context.vars.get(name)) {
                        fields.insert(assigned.clone(), ty.clone());
                    }
                }
            }

            trace!(context = context.id, fields = fields.len(), "frame");
            let frame = StructType::new(format!("$frame{}", context.id), fields, None, IndexMap::new());
            frames.insert(context.id, Rc::new(frame));
        }

        Closures { frames }
    }

    pub fn frame(&self, context: ContextId) -> Option<&Rc<StructType>> {
        self.frames.get(&context)
    }

    /// Storage of the binding `assigned`, defined in `definer`, as seen from
    /// code running in `current`.
    pub fn storage(
        &self,
        resolution: &Resolution,
        current: ContextId,
        definer: ContextId,
        assigned: &str,
    ) -> Result<Storage, Error> {
        if definer == ROOT {
            return Ok(Storage::Global(assigned.to_string()));
        }

        match self.frames.get(&definer) {
            Some(frame) if frame.fields().contains_key(assigned) => Ok(Storage::Frame {
                path: frame_path(resolution, current, definer)?,
                field: assigned.to_string(),
            }),
            _ if definer == current => Ok(Storage::Local(assigned.to_string())),
            _ => Err(Error::internal(format!(
                "{} is read from context {} but lives in a local of {}",
                assigned, current, definer
            ))),
        }
    }
}

/// Path from code in `current` to the frame of `target`, an enclosing
/// function context.
pub fn frame_path(resolution: &Resolution, current: ContextId, target: ContextId) -> Result<FramePath, Error> {
    if current == target {
        return Ok(FramePath::Own);
    }

    let mut hops = 0;
    let mut cursor = resolution.context(current).parent;
    while let Some(id) = cursor {
        if id == target {
            return Ok(FramePath::Up(hops));
        }
        hops += 1;
        cursor = resolution.context(id).parent;
    }

    Err(Error::internal(format!(
        "context {} does not enclose context {}",
        target, current
    )))
}
