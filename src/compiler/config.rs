//! Fixed compile-time configuration of the flat-memory target.

/// Bytes reserved for the program heap.
pub const HEAP_SIZE: u32 = 128 * 1024 * 1024;

/// Smallest block handed out by the heap allocator.
pub const LOWEST_ORDER: u32 = 128;

/// Bookkeeping area in front of the heap. Static data starts here.
pub const BUDDY_SPACE: u32 = HEAP_SIZE / LOWEST_ORDER / 4;

/// Size of the `ArrayBuffer` backing the heap: the next power of two
/// strictly above `HEAP_SIZE + BUDDY_SPACE`.
pub fn heap_buffer_size() -> u32 {
    (HEAP_SIZE + BUDDY_SPACE + 1).next_power_of_two()
}

/// A value substituted into flat-memory output when it is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvConstant {
    HeapSize,
    BuddySpace,
    /// First free heap byte after static data.
    DataEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvConstants {
    pub heap_size: u32,
    pub buddy_space: u32,
    pub data_end: u32,
}

impl EnvConstants {
    /// Constants for a program whose static data ends at `data_end`.
    pub fn new(data_end: u32) -> Self {
        EnvConstants {
            heap_size: heap_buffer_size(),
            buddy_space: BUDDY_SPACE,
            data_end,
        }
    }

    pub fn value(&self, constant: EnvConstant) -> u32 {
        match constant {
            EnvConstant::HeapSize => self.heap_size,
            EnvConstant::BuddySpace => self.buddy_space,
            EnvConstant::DataEnd => self.data_end,
        }
    }
}
