/// Optimizer module
///
/// - constant_fold: literal folding, logical short-circuits and
///   re-association, guarded by operand types
pub mod constant_fold;

#[cfg(test)]
mod tests;
