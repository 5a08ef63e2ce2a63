//! The structural type system.
//!
//! [`types::Type`] values are built once during resolution and are read-only
//! afterwards. Object and tuple layouts are computed lazily and cached for
//! the lifetime of the type.

pub mod layout;
pub mod types;

#[cfg(test)]
mod tests;
