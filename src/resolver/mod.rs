/// Scope resolution module
///
/// Submodules:
/// - context: the context arena and the side tables of a resolved module
/// - foreign: the host module behind `import foreign;`
/// - resolver: the resolution walk
pub mod context;
pub mod foreign;
pub mod resolver;

#[cfg(test)]
mod tests;
