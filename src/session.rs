//! The compilation session.
//!
//! One [`Session`] is threaded by reference through every phase. It owns
//! the identifier counter, the module cache, the operator overload table,
//! function signatures and the func-lists built during lowering.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    ast::{ast::Module, expressions::BinaryOp, templates::instantiate_templates},
    compiler::func_lists::FuncLists,
    errors::errors::{Error, ErrorImpl},
    lexer::lexer::tokenize,
    optimizer::constant_fold::fold,
    parser::parser::parse,
    resolver::{context::Resolution, resolver::resolve},
    type_checker::validate::validate,
    types::types::{ModuleKind, ModuleType, Type},
    Span,
};

/// Source of module text.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Option<String>;
}

/// Reads modules from disk.
#[derive(Debug, Default)]
pub struct FileLoader;

impl ModuleLoader for FileLoader {
    fn load(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).ok()
    }
}

/// Serves modules from memory, keyed by path.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        MemoryLoader::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.add(path, source);
        self
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.files.insert(path.into(), source.into());
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Option<String> {
        self.files.get(path).cloned()
    }
}

/// A module that went through every phase up to lowering.
#[derive(Debug)]
pub struct CompiledModule {
    pub path: PathBuf,
    pub module: Module,
    pub resolution: Resolution,
    pub ty: Rc<ModuleType>,
}

/// A registered `operator` declaration. It applies in its declaring module
/// and in every module that imports it, directly or not.
#[derive(Debug, Clone)]
pub struct Overload {
    pub assigned: String,
    pub ret: Type,
    pub module: PathBuf,
    pub span: Span,
}

pub struct Session {
    next_id: u32,
    loader: Box<dyn ModuleLoader>,
    /// Finished modules, dependencies before their importers.
    modules: IndexMap<PathBuf, Rc<CompiledModule>>,
    loading: Vec<PathBuf>,
    overloads: HashMap<(String, String, BinaryOp), Vec<Overload>>,
    signatures: HashMap<String, Type>,
    pub func_lists: FuncLists,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Box::new(FileLoader))
    }
}

impl Session {
    pub fn new(loader: Box<dyn ModuleLoader>) -> Self {
        Session {
            next_id: 0,
            loader,
            modules: IndexMap::new(),
            loading: vec![],
            overloads: HashMap::new(),
            signatures: HashMap::new(),
            func_lists: FuncLists::default(),
        }
    }

    /// A session reading from the given in-memory files.
    pub fn in_memory(loader: MemoryLoader) -> Self {
        Session::new(Box::new(loader))
    }

    /// Hands out the next emission identifier. Identifiers are never reused
    /// within a session.
    pub fn fresh_id(&mut self) -> String {
        let id = format!("${}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Loads `path` and every module it imports, running all phases up to
    /// lowering. Modules are cached by path.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Rc<CompiledModule>, Error> {
        self.load_module(path.as_ref(), None)
    }

    /// Resolves `import a.b;` written in `importer` to `dir(importer)/a/b.bt`.
    pub fn import(
        &mut self,
        importer: &Path,
        segments: &[String],
        span: &Span,
    ) -> Result<Rc<CompiledModule>, Error> {
        let mut path = importer.parent().map(Path::to_path_buf).unwrap_or_default();
        for segment in segments {
            path.push(segment);
        }
        path.set_extension("bt");

        self.load_module(&path, Some(span))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
    fn load_module(&mut self, path: &Path, span: Option<&Span>) -> Result<Rc<CompiledModule>, Error> {
        let error = |error_impl: ErrorImpl| match span {
            Some(span) => Error::new(error_impl, span.clone()),
            None => Error::new(error_impl, Span::null()),
        };

        if let Some(module) = self.modules.get(path) {
            trace!("module cache hit");
            return Ok(Rc::clone(module));
        }

        if self.loading.iter().any(|loading| loading == path) {
            return Err(error(ErrorImpl::ImportCycle {
                module: path.display().to_string(),
            }));
        }

        let Some(source) = self.loader.load(path) else {
            return Err(error(ErrorImpl::ModuleNotFound {
                module: path.display().to_string(),
            }));
        };

        self.loading.push(path.to_path_buf());
        let compiled = self.run_phases(path, source);
        self.loading.pop();

        let compiled = Rc::new(compiled?);
        self.modules.insert(path.to_path_buf(), Rc::clone(&compiled));
        debug!(module = %compiled.module.name, "module compiled");

        Ok(compiled)
    }

    fn run_phases(&mut self, path: &Path, source: String) -> Result<CompiledModule, Error> {
        let file = path.display().to_string();
        let tokens = tokenize(source, Some(file.clone()))?;
        let mut module = parse(tokens, Rc::new(file))?;

        instantiate_templates(&mut module)?;
        let mut resolution = resolve(&module, path, self)?;
        validate(&module, &resolution)?;
        fold(&mut module, &mut resolution, self)?;

        let ty = Rc::new(ModuleType {
            name: module.name.clone(),
            kind: ModuleKind::User,
            exports: resolution.root().exports.clone(),
        });

        Ok(CompiledModule {
            path: path.to_path_buf(),
            module,
            resolution,
            ty,
        })
    }

    /// Finished modules in dependency order.
    pub fn modules(&self) -> impl Iterator<Item = &Rc<CompiledModule>> {
        self.modules.values()
    }

    /// `root` and every module it imports, transitively, dependencies first.
    pub fn dependencies(&self, root: &CompiledModule) -> Vec<Rc<CompiledModule>> {
        let needed = self.reachable(&root.resolution);

        self.modules
            .iter()
            .filter(|(path, _)| needed.contains(path))
            .map(|(_, module)| Rc::clone(module))
            .collect()
    }

    /// Path of the module `resolution` belongs to and of every module it
    /// imports, transitively.
    fn reachable(&self, resolution: &Resolution) -> Vec<PathBuf> {
        let mut needed = vec![resolution.path.clone()];
        let mut pending = resolution.imports.clone();

        while let Some(path) = pending.pop() {
            if needed.contains(&path) {
                continue;
            }
            if let Some(module) = self.modules.get(&path) {
                pending.extend(module.resolution.imports.iter().cloned());
            }
            needed.push(path);
        }
        needed
    }

    pub fn declare_overload(&mut self, left: &Type, right: &Type, op: BinaryOp, overload: Overload) -> Result<(), Error> {
        let key = (left.flat_type_name(), right.flat_type_name(), op);
        let declared = self.overloads.entry(key).or_default();
        if declared.iter().any(|existing| existing.module == overload.module) {
            return Err(overload_conflict(op, left, right, &overload.span));
        }

        trace!(operator = %op, left = %left, right = %right, id = %overload.assigned, "overload declared");
        declared.push(overload);
        Ok(())
    }

    /// The overload of `left op right` visible from the module of
    /// `resolution`. Its own declarations come first.
    pub fn overload(&self, resolution: &Resolution, left: &Type, right: &Type, op: BinaryOp) -> Option<&Overload> {
        let declared = self
            .overloads
            .get(&(left.flat_type_name(), right.flat_type_name(), op))?;
        if let Some(own) = declared.iter().find(|overload| overload.module == resolution.path) {
            return Some(own);
        }
        let scope = self.reachable(resolution);
        declared.iter().find(|overload| scope.contains(&overload.module))
    }

    /// Fails when two overloads of one operator are visible from the module
    /// of `resolution` once all of its imports are known.
    pub fn check_overloads(&self, resolution: &Resolution) -> Result<(), Error> {
        let scope = self.reachable(resolution);
        for ((_, _, op), declared) in &self.overloads {
            let mut visible = declared.iter().filter(|overload| scope.contains(&overload.module));
            if let (Some(first), Some(second)) = (visible.next(), visible.next()) {
                let own = if second.module == resolution.path { second } else { first };
                let params = self
                    .signature(&own.assigned)
                    .and_then(Type::as_func)
                    .map(|signature| signature.params.as_slice());
                let Some([left, right]) = params else {
                    return Err(Error::internal(format!("operator {} has no signature", own.assigned)));
                };
                return Err(overload_conflict(*op, left, right, &own.span));
            }
        }
        Ok(())
    }

    /// Records the `func` type of a function, method, constructor or
    /// operator under its assigned identifier.
    pub fn record_signature(&mut self, assigned: &str, ty: Type) {
        self.signatures.insert(assigned.to_string(), ty);
    }

    pub fn signature(&self, assigned: &str) -> Option<&Type> {
        self.signatures.get(assigned)
    }
}

fn overload_conflict(op: BinaryOp, left: &Type, right: &Type, span: &Span) -> Error {
    Error::new(
        ErrorImpl::OperatorAlreadyDeclared {
            operator: op.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        },
        span.clone(),
    )
}
