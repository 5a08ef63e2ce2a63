/// Type checking module
///
/// - infer: expression types, computed while the resolver walks a module
/// - validate: declaration, assignment, return and condition rules
pub mod infer;
pub mod validate;

#[cfg(test)]
mod tests;
