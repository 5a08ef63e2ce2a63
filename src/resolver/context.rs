use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    ast::{ast::NodeId, expressions::Expr, types::TypeNode},
    errors::errors::{Error, ErrorImpl},
    types::types::{Export, StructType, Type},
    Span,
};

/// Index of a [`Context`] in [`Resolution::contexts`].
pub type ContextId = usize;

/// The module scope.
pub const ROOT: ContextId = 0;

/// One lexical scope: the module root or a function body.
#[derive(Debug, Clone)]
pub struct Context {
    pub id: ContextId,
    pub parent: Option<ContextId>,
    /// The function statement owning this scope, `None` for the root.
    pub function: Option<NodeId>,
    /// Bindings in declaration order.
    pub vars: IndexMap<String, Type>,
    /// Source name to emission identifier.
    pub name_map: HashMap<String, String>,
    pub constants: HashSet<String>,
    /// Names bound by `func` declarations, with the declaring statement.
    pub function_declarations: HashMap<String, NodeId>,
    /// Contexts of the functions nested directly in this one.
    pub functions: Vec<ContextId>,
    pub exports: IndexMap<String, Export>,
    pub objects: IndexMap<String, Rc<StructType>>,
    pub accesses_global_scope: bool,
    pub accesses_lexical_scope: bool,
    pub side_effect_free: bool,
    pub lexical_side_effect_free: bool,
    /// Captured name to the context that defines it.
    pub lexical_lookups: IndexMap<String, ContextId>,
    pub return_type: Option<Type>,
}

impl Context {
    pub fn new(id: ContextId, parent: Option<ContextId>, function: Option<NodeId>) -> Self {
        Context {
            id,
            parent,
            function,
            vars: IndexMap::new(),
            name_map: HashMap::new(),
            constants: HashSet::new(),
            function_declarations: HashMap::new(),
            functions: vec![],
            exports: IndexMap::new(),
            objects: IndexMap::new(),
            accesses_global_scope: false,
            accesses_lexical_scope: false,
            side_effect_free: true,
            lexical_side_effect_free: true,
            lexical_lookups: IndexMap::new(),
            return_type: None,
        }
    }

    pub fn declare(&mut self, name: &str, ty: Type, assigned: String, span: &Span) -> Result<(), Error> {
        if self.vars.contains_key(name) {
            return Err(Error::new(
                ErrorImpl::VariableAlreadyDeclared {
                    variable: name.to_string(),
                },
                span.clone(),
            ));
        }

        self.vars.insert(name.to_string(), ty);
        self.name_map.insert(name.to_string(), assigned);
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// What a symbol node resolved to.
#[derive(Debug, Clone)]
pub struct SymbolRef {
    /// The context defining the binding.
    pub context: ContextId,
    pub assigned: String,
    pub ty: Type,
    /// Set when the binding is a `func` declaration.
    pub function: Option<NodeId>,
    pub constant: bool,
}

/// Everything the resolver learned about one module, keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub contexts: Vec<Context>,
    /// Enclosing context of every statement and expression.
    pub node_context: HashMap<NodeId, ContextId>,
    /// Body context of every function, method, constructor and operator.
    pub function_context: HashMap<NodeId, ContextId>,
    pub symbols: HashMap<NodeId, SymbolRef>,
    /// Emission identifiers of declarations, params and functions.
    pub assigned: HashMap<NodeId, String>,
    /// Resolved type annotations.
    pub types: HashMap<NodeId, Type>,
    /// Expression types. Calls without a value are absent.
    pub expr_types: HashMap<NodeId, Type>,
    /// Object declaration statement to its type.
    pub objects: HashMap<NodeId, Rc<StructType>>,
    /// Path the module was loaded from.
    pub path: PathBuf,
    /// Paths of the user modules this one imports.
    pub imports: Vec<PathBuf>,
    /// Identifier of the module initializer.
    pub init: String,
}

impl Resolution {
    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id]
    }

    pub fn root(&self) -> &Context {
        &self.contexts[ROOT]
    }

    pub fn expr_type(&self, expr: &Expr) -> Result<&Type, Error> {
        self.expr_types.get(&expr.id).ok_or_else(|| {
            Error::new(
                ErrorImpl::TypeMatchError {
                    expected: String::from("a value"),
                    received: String::from("null"),
                },
                expr.span.clone(),
            )
        })
    }

    pub fn type_of(&self, node: &TypeNode) -> Result<&Type, Error> {
        self.types
            .get(&node.id)
            .ok_or_else(|| Error::internal(format!("type annotation {} was never resolved", node)))
    }

    pub fn assigned_of(&self, id: NodeId) -> Result<&str, Error> {
        self.assigned
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| Error::internal(format!("node {} has no identifier", id)))
    }

    pub fn context_of(&self, id: NodeId) -> Result<ContextId, Error> {
        self.node_context
            .get(&id)
            .copied()
            .ok_or_else(|| Error::internal(format!("node {} has no context", id)))
    }

    pub fn function_context_of(&self, id: NodeId) -> Result<&Context, Error> {
        self.function_context
            .get(&id)
            .map(|context| &self.contexts[*context])
            .ok_or_else(|| Error::internal(format!("function {} has no context", id)))
    }

    pub fn symbol(&self, expr: &Expr) -> Result<&SymbolRef, Error> {
        self.symbols
            .get(&expr.id)
            .ok_or_else(|| Error::internal(format!("symbol {} was never resolved", expr.id)))
    }

    /// Whether `inner` is `outer` or nested inside it.
    pub fn is_within(&self, inner: ContextId, outer: ContextId) -> bool {
        let mut current = Some(inner);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.contexts[id].parent;
        }
        false
    }
}
