//! Memory layout of objects, tuples and closure frames.

use std::collections::HashMap;

use super::types::Type;

#[derive(Debug, Clone)]
pub struct LayoutEntry {
    pub key: String,
    pub offset: u32,
    pub ty: Type,
}

/// Field placement for a struct-like type.
///
/// Fields are sorted by descending slot size, ties broken by declaration
/// order, so every field lands naturally aligned without padding. Keys are
/// field names, or the element index for tuples.
#[derive(Debug, Clone)]
pub struct Layout {
    entries: Vec<LayoutEntry>,
    offsets: HashMap<String, u32>,
    order: HashMap<String, usize>,
    size: u32,
}

impl Layout {
    pub fn compute(fields: impl Iterator<Item = (String, Type)>) -> Layout {
        let mut fields: Vec<(String, Type)> = fields.collect();
        // Stable sort keeps declaration order among equal sizes.
        fields.sort_by_key(|(_, ty)| std::cmp::Reverse(ty.slot_size()));

        let mut entries = Vec::with_capacity(fields.len());
        let mut offsets = HashMap::new();
        let mut order = HashMap::new();
        let mut offset = 0;

        for (index, (key, ty)) in fields.into_iter().enumerate() {
            offsets.insert(key.clone(), offset);
            order.insert(key.clone(), index);
            let size = ty.slot_size();
            entries.push(LayoutEntry { key, offset, ty });
            offset += size;
        }

        Layout {
            entries,
            offsets,
            order,
            size: offset,
        }
    }

    pub fn offset_of(&self, key: &str) -> Option<u32> {
        self.offsets.get(key).copied()
    }

    /// Position of `key` in emission order.
    pub fn order_of(&self, key: &str) -> Option<usize> {
        self.order.get(key).copied()
    }

    /// Entries in emission order.
    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}
