//! Name and scope resolution.
//!
//! One walk over a module builds the context tree, binds every name to an
//! emission identifier, infers expression types and records which
//! functions capture variables from enclosing functions.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    rc::Rc,
};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    ast::{
        ast::{walk_body, Module, NodeRef, Visitor, Walk},
        expressions::{Expr, ExprKind},
        statements::{FunctionDecl, ObjectDecl, OperatorDecl, Param, Stmt, StmtKind},
        types::{TypeNode, TypeNodeKind},
    },
    errors::errors::{Error, ErrorImpl},
    session::{Overload, Session},
    type_checker::infer::infer_expr,
    types::types::{Export, StructType, Type},
    Span,
};

use super::{
    context::{Context, ContextId, Resolution, SymbolRef, ROOT},
    foreign::{foreign_module, FOREIGN},
};

struct Resolver<'a, 's> {
    session: &'s mut Session,
    resolution: Resolution,
    stack: Vec<ContextId>,
    path: PathBuf,
    object_decls: HashMap<String, &'a Stmt>,
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %module.name))]
pub fn resolve(module: &Module, path: &Path, session: &mut Session) -> Result<Resolution, Error> {
    let mut resolver = Resolver {
        session,
        resolution: Resolution::default(),
        stack: vec![],
        path: path.to_path_buf(),
        object_decls: HashMap::new(),
    };

    resolver.resolution.path = path.to_path_buf();
    resolver.resolution.contexts.push(Context::new(ROOT, None, None));
    resolver.stack.push(ROOT);

    resolver.predeclare_objects(&module.body)?;
    resolver.hoist(&module.body)?;
    walk_body(&module.body, &mut resolver)?;

    let mut resolution = resolver.resolution;
    resolver.session.check_overloads(&resolution)?;
    resolution.init = resolver.session.fresh_id();

    debug!(
        contexts = resolution.contexts.len(),
        symbols = resolution.symbols.len(),
        "resolved module"
    );
    Ok(resolution)
}

impl<'a> Resolver<'a, '_> {
    fn current(&self) -> ContextId {
        self.stack.last().copied().unwrap_or(ROOT)
    }

    fn context_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.resolution.contexts[id]
    }

    fn push_context(&mut self, function: Option<crate::ast::ast::NodeId>) -> ContextId {
        let id = self.resolution.contexts.len();
        let parent = self.stack.last().copied();
        self.resolution.contexts.push(Context::new(id, parent, function));
        if let Some(parent) = parent {
            self.resolution.contexts[parent].functions.push(id);
        }
        self.stack.push(id);
        id
    }

    fn require_root(&self, what: &str, span: &Span) -> Result<(), Error> {
        if self.current() == ROOT {
            Ok(())
        } else {
            Err(Error::new(
                ErrorImpl::DeclarationOutsideModuleScope {
                    what: what.to_string(),
                },
                span.clone(),
            ))
        }
    }

    fn resolve_type(&mut self, node: &TypeNode, privileged: bool) -> Result<Type, Error> {
        let ty = match &node.kind {
            TypeNodeKind::Named { name, attributes } => match name.as_str() {
                "array" => {
                    if attributes.len() != 1 {
                        return Err(arity_error(node, 1));
                    }
                    Type::array(self.resolve_type(&attributes[0], privileged)?)
                }
                "tuple" => {
                    if attributes.is_empty() {
                        return Err(arity_error(node, 1));
                    }
                    let elements = attributes
                        .iter()
                        .map(|attribute| self.resolve_type(attribute, privileged))
                        .collect::<Result<Vec<_>, _>>()?;
                    Type::tuple(elements)
                }
                _ if !attributes.is_empty() => {
                    return Err(Error::new(
                        ErrorImpl::UnknownType {
                            type_: node.to_string(),
                        },
                        node.span.clone(),
                    ))
                }
                _ => match Type::resolve_primitive(name, privileged) {
                    Some(ty) => ty,
                    None => Type::Struct(self.object_type(name, &node.span)?),
                },
            },
            TypeNodeKind::Func { ret, params } => {
                let ret = match ret {
                    Some(ret) => Some(self.resolve_type(ret, privileged)?),
                    None => None,
                };
                let params = params
                    .iter()
                    .map(|param| self.resolve_type(param, privileged))
                    .collect::<Result<Vec<_>, _>>()?;
                Type::func(ret, params)
            }
        };

        self.resolution.types.insert(node.id, ty.clone());
        Ok(ty)
    }

    /// Builds root object types on first use, so fields may name objects
    /// declared further down. The type is registered before its fields are
    /// resolved, so an object may hold references to itself.
    fn object_type(&mut self, name: &str, span: &Span) -> Result<Rc<StructType>, Error> {
        if let Some(object) = self.resolution.root().objects.get(name) {
            return Ok(Rc::clone(object));
        }

        let Some(stmt) = self.object_decls.get(name).copied() else {
            return Err(Error::new(
                ErrorImpl::UnknownType {
                    type_: name.to_string(),
                },
                span.clone(),
            ));
        };
        let StmtKind::Object(decl) = &stmt.kind else {
            return Err(Error::internal(format!("{} is not an object declaration", name)));
        };

        let object = Rc::new(self.declare_object(decl)?);
        self.context_mut(ROOT)
            .objects
            .insert(name.to_string(), Rc::clone(&object));
        self.resolution.objects.insert(stmt.id, Rc::clone(&object));

        let mut fields = IndexMap::new();
        for field in &decl.fields {
            let ty = self.resolve_type(&field.ty, false)?;
            fields.insert(field.name.clone(), ty);
        }
        object
            .define_fields(fields)
            .map_err(|_| Error::internal(format!("fields of {} defined twice", name)))?;

        trace!(object = name, size = ?Type::Struct(Rc::clone(&object)).get_size(), "object declared");
        Ok(object)
    }

    /// The object's members without field types.
    fn declare_object(&mut self, decl: &ObjectDecl) -> Result<StructType, Error> {
        let redeclared = |name: &str, span: &Span| {
            Error::new(
                ErrorImpl::VariableAlreadyDeclared {
                    variable: name.to_string(),
                },
                span.clone(),
            )
        };

        let mut field_names = HashSet::new();
        for field in &decl.fields {
            if !field_names.insert(field.name.as_str()) {
                return Err(redeclared(&field.name, &field.span));
            }
        }

        let constructor = match &decl.constructor {
            Some(constructor) => {
                let assigned = self.session.fresh_id();
                self.resolution
                    .assigned
                    .insert(constructor.id, assigned.clone());
                Some(assigned)
            }
            None => None,
        };

        let mut methods = IndexMap::new();
        for method in &decl.methods {
            let Some(function) = method.as_function() else {
                return Err(Error::internal("object method is not a function"));
            };
            if field_names.contains(function.name.as_str()) || methods.contains_key(&function.name) {
                return Err(redeclared(&function.name, &method.span));
            }

            let assigned = self.session.fresh_id();
            self.resolution.assigned.insert(method.id, assigned.clone());
            methods.insert(function.name.clone(), assigned);
        }

        Ok(StructType::declare(decl.name.clone(), constructor, methods))
    }

    fn predeclare_objects(&mut self, body: &'a [Stmt]) -> Result<(), Error> {
        let objects: Vec<&'a Stmt> = body
            .iter()
            .filter(|stmt| matches!(&stmt.kind, StmtKind::Object(object) if !object.is_template()))
            .collect();

        for stmt in objects.iter().copied() {
            if let StmtKind::Object(object) = &stmt.kind {
                if self.object_decls.insert(object.name.clone(), stmt).is_some() {
                    return Err(Error::new(
                        ErrorImpl::VariableAlreadyDeclared {
                            variable: object.name.clone(),
                        },
                        stmt.span.clone(),
                    ));
                }
            }
        }

        for stmt in &objects {
            if let StmtKind::Object(object) = &stmt.kind {
                self.object_type(&object.name, &stmt.span)?;
            }
        }

        // Member signatures may mention any object, including their own.
        for stmt in &objects {
            if let StmtKind::Object(object) = &stmt.kind {
                for member in object.constructor.iter().map(|c| c.as_ref()).chain(&object.methods) {
                    let Some(function) = member.as_function() else {
                        continue;
                    };
                    let ty = self.function_type(function)?;
                    let assigned = self.resolution.assigned_of(member.id)?.to_string();
                    self.session.record_signature(&assigned, ty);
                }
            }
        }

        Ok(())
    }

    fn function_type(&mut self, function: &FunctionDecl) -> Result<Type, Error> {
        let ret = match &function.ret {
            Some(ret) => Some(self.resolve_type(ret, false)?),
            None => None,
        };
        let params = function
            .params
            .iter()
            .map(|param| self.resolve_type(&param.ty, false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Type::func(ret, params))
    }

    /// Binds the functions and operators declared in `body` before any of
    /// it is resolved, so they can call each other in any order.
    fn hoist(&mut self, body: &'a [Stmt]) -> Result<(), Error> {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Function(function) => self.declare_function(stmt, function)?,
                StmtKind::Operator(operator) => self.declare_operator(stmt, operator)?,
                StmtKind::If {
                    consequent,
                    alternate,
                    ..
                } => {
                    self.hoist(consequent)?;
                    if let Some(alternate) = alternate {
                        self.hoist(alternate)?;
                    }
                }
                StmtKind::While { body, .. }
                | StmtKind::DoWhile { body, .. }
                | StmtKind::For { body, .. } => self.hoist(body)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_function(&mut self, stmt: &Stmt, function: &FunctionDecl) -> Result<(), Error> {
        let ty = self.function_type(function)?;
        let assigned = self.session.fresh_id();
        let current = self.current();

        let context = self.context_mut(current);
        context.declare(&function.name, ty.clone(), assigned.clone(), &stmt.span)?;
        context
            .function_declarations
            .insert(function.name.clone(), stmt.id);

        trace!(name = %function.name, id = %assigned, context = current, "function declared");
        self.session.record_signature(&assigned, ty);
        self.resolution.assigned.insert(stmt.id, assigned);
        Ok(())
    }

    fn declare_operator(&mut self, stmt: &Stmt, operator: &OperatorDecl) -> Result<(), Error> {
        self.require_root("operators", &stmt.span)?;

        let Some(function) = operator.function.as_function() else {
            return Err(Error::internal("operator body is not a function"));
        };
        let ty = self.function_type(function)?;
        let Some(signature) = ty.as_func() else {
            return Err(Error::internal("operator signature is not a function type"));
        };
        let (Some(ret), [left, right]) = (&signature.ret, signature.params.as_slice()) else {
            return Err(Error::internal("operator needs a return type and two operands"));
        };

        let assigned = self.session.fresh_id();
        let overload = Overload {
            assigned: assigned.clone(),
            ret: ret.clone(),
            module: self.path.clone(),
            span: stmt.span.clone(),
        };
        self.session.declare_overload(left, right, operator.op, overload)?;
        self.session.record_signature(&assigned, ty.clone());
        self.resolution
            .assigned
            .insert(operator.function.id, assigned);
        Ok(())
    }

    fn enter_function(&mut self, stmt: &Stmt, function: &'a FunctionDecl) -> Result<(), Error> {
        let assigned = self.resolution.assigned_of(stmt.id)?.to_string();
        let Some(signature) = self.session.signature(&assigned).and_then(Type::as_func) else {
            return Err(Error::internal(format!("{} has no signature", function.name)));
        };
        let return_type = signature.ret.clone();

        let context = self.push_context(Some(stmt.id));
        self.resolution.function_context.insert(stmt.id, context);
        self.context_mut(context).return_type = return_type;

        trace!(name = %function.name, context, "entering function");
        self.hoist(&function.body)
    }

    fn bind_param(&mut self, param: &Param) -> Result<(), Error> {
        let ty = self.resolve_type(&param.ty, false)?;
        let assigned = self.session.fresh_id();
        let current = self.current();

        self.context_mut(current)
            .declare(&param.name, ty, assigned.clone(), &param.span)?;
        self.resolution.assigned.insert(param.id, assigned);
        Ok(())
    }

    fn bind_declaration(&mut self, stmt: &Stmt) -> Result<(), Error> {
        let StmtKind::Declaration(declaration) = &stmt.kind else {
            return Ok(());
        };

        let value = self.resolution.expr_type(&declaration.value)?.clone();
        let ty = match &declaration.ty {
            Some(ty) => self.resolve_type(ty, false)?,
            None if matches!(value, Type::Null) => {
                return Err(Error::new(ErrorImpl::ExpectedExplicitValue, stmt.span.clone()))
            }
            None => value,
        };

        let assigned = self.session.fresh_id();
        let current = self.current();
        let context = self.context_mut(current);
        context.declare(&declaration.name, ty, assigned.clone(), &stmt.span)?;
        if declaration.constant {
            context.constants.insert(declaration.name.clone());
        }

        trace!(name = %declaration.name, id = %assigned, context = current, "variable declared");
        self.resolution.assigned.insert(stmt.id, assigned);
        Ok(())
    }

    fn import(&mut self, stmt: &Stmt, path: &[String]) -> Result<(), Error> {
        let Some(name) = path.last() else {
            return Err(Error::internal("empty import path"));
        };

        let ty = if path.len() == 1 && name == FOREIGN {
            Type::Module(foreign_module())
        } else {
            let module = self.session.import(&self.path, path, &stmt.span)?;
            self.resolution.imports.push(module.path.clone());
            Type::Module(Rc::clone(&module.ty))
        };

        let assigned = self.session.fresh_id();
        let current = self.current();
        let context = self.context_mut(current);
        context.declare(name, ty, assigned.clone(), &stmt.span)?;
        context.constants.insert(name.clone());
        self.resolution.assigned.insert(stmt.id, assigned);
        Ok(())
    }

    fn export(&mut self, stmt: &Stmt, name: &str) -> Result<(), Error> {
        if self.current() != ROOT {
            return Err(Error::new(
                ErrorImpl::ExportOutsideModuleScope {
                    name: name.to_string(),
                },
                stmt.span.clone(),
            ));
        }

        let accessor = self.session.fresh_id();
        let root = self.context_mut(ROOT);
        let Some(ty) = root.vars.get(name).cloned() else {
            return Err(Error::new(
                ErrorImpl::VariableNotDeclared {
                    variable: name.to_string(),
                },
                stmt.span.clone(),
            ));
        };
        if matches!(ty, Type::Module(_)) {
            return Err(Error::new(
                ErrorImpl::TypeMatchError {
                    expected: String::from("a value"),
                    received: ty.to_string(),
                },
                stmt.span.clone(),
            ));
        }
        if root.exports.contains_key(name) {
            return Err(Error::new(
                ErrorImpl::VariableAlreadyDeclared {
                    variable: name.to_string(),
                },
                stmt.span.clone(),
            ));
        }

        let export = Export {
            assigned: root.name_map[name].clone(),
            ty,
            function: root.function_declarations.contains_key(name),
            accessor,
        };
        root.exports.insert(name.to_string(), export);
        Ok(())
    }

    fn lookup(&mut self, name: &str, span: &Span) -> Result<SymbolRef, Error> {
        let current = self.current();

        let mut cursor = Some(current);
        let definer = loop {
            let Some(id) = cursor else {
                return Err(Error::new(
                    ErrorImpl::VariableNotDeclared {
                        variable: name.to_string(),
                    },
                    span.clone(),
                ));
            };
            if self.resolution.contexts[id].vars.contains_key(name) {
                break id;
            }
            cursor = self.resolution.contexts[id].parent;
        };

        if definer == ROOT {
            if current != ROOT {
                self.context_mut(current).accesses_global_scope = true;
            }
        } else if definer != current {
            let mut id = current;
            while id != definer {
                let context = self.context_mut(id);
                context.accesses_lexical_scope = true;
                context.lexical_lookups.insert(name.to_string(), definer);
                trace!(name, context = id, definer, "captured");

                id = context
                    .parent
                    .ok_or_else(|| Error::internal(format!("{} escaped the context chain", name)))?;
            }
        }

        let context = &self.resolution.contexts[definer];
        Ok(SymbolRef {
            context: definer,
            assigned: context.name_map[name].clone(),
            ty: context.vars[name].clone(),
            function: context.function_declarations.get(name).copied(),
            constant: context.constants.contains(name),
        })
    }

    /// Assigning through a binding owned by another context makes the
    /// current function impure.
    fn check_purity(&mut self, target: &Expr) -> Result<(), Error> {
        let mut root = target;
        loop {
            match &root.kind {
                ExprKind::Member { base, .. } | ExprKind::Subscript { base, .. } => root = base,
                ExprKind::Call { callee, .. } => root = callee,
                _ => break,
            }
        }

        if let ExprKind::Symbol(_) = &root.kind {
            let definer = self.resolution.symbol(root)?.context;
            let current = self.current();
            if definer != current {
                let context = self.context_mut(current);
                context.side_effect_free = false;
                context.lexical_side_effect_free = false;
            }
        }
        Ok(())
    }

    fn enter_stmt(&mut self, stmt: &'a Stmt) -> Result<Walk, Error> {
        let current = self.current();
        self.resolution.node_context.insert(stmt.id, current);

        match &stmt.kind {
            StmtKind::Import { path } => {
                self.import(stmt, path)?;
                Ok(Walk::Skip)
            }
            StmtKind::Export { name } => {
                self.export(stmt, name)?;
                Ok(Walk::Skip)
            }
            StmtKind::Function(function) => {
                self.enter_function(stmt, function)?;
                Ok(Walk::Children)
            }
            StmtKind::Object(object) => {
                self.require_root("objects", &stmt.span)?;
                Ok(if object.is_template() {
                    Walk::Skip
                } else {
                    Walk::Children
                })
            }
            StmtKind::Operator(_) => {
                self.require_root("operators", &stmt.span)?;
                Ok(Walk::Children)
            }
            _ => Ok(Walk::Children),
        }
    }

    fn enter_expr(&mut self, expr: &'a Expr) -> Result<Walk, Error> {
        let current = self.current();
        self.resolution.node_context.insert(expr.id, current);

        match &expr.kind {
            ExprKind::Symbol(name) => {
                let symbol = self.lookup(name, &expr.span)?;
                self.resolution.expr_types.insert(expr.id, symbol.ty.clone());
                self.resolution.symbols.insert(expr.id, symbol);
                Ok(Walk::Skip)
            }
            ExprKind::New { ty, .. } => {
                self.resolve_type(ty, false)?;
                Ok(Walk::Children)
            }
            ExprKind::Cast { ty, .. } => {
                self.resolve_type(ty, true)?;
                Ok(Walk::Children)
            }
            _ => Ok(Walk::Children),
        }
    }
}

impl<'a> Visitor<'a> for Resolver<'a, '_> {
    fn enter(&mut self, node: NodeRef<'a>) -> Result<Walk, Error> {
        match node {
            NodeRef::Stmt(stmt) => self.enter_stmt(stmt),
            NodeRef::Expr(expr) => self.enter_expr(expr),
            NodeRef::Param(param) => {
                self.bind_param(param)?;
                Ok(Walk::Skip)
            }
            NodeRef::Type(_) | NodeRef::Field(_) => Ok(Walk::Skip),
        }
    }

    fn leave(&mut self, node: NodeRef<'a>) -> Result<(), Error> {
        match node {
            NodeRef::Stmt(stmt) => match &stmt.kind {
                StmtKind::Function(_) => {
                    self.stack.pop();
                    Ok(())
                }
                StmtKind::Declaration(_) => self.bind_declaration(stmt),
                StmtKind::Assignment { target, .. } => self.check_purity(target),
                _ => Ok(()),
            },
            NodeRef::Expr(expr) if !matches!(expr.kind, ExprKind::Symbol(_)) => {
                if let Some(ty) = infer_expr(expr, &self.resolution, self.session)? {
                    self.resolution.expr_types.insert(expr.id, ty);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn arity_error(node: &TypeNode, expected: usize) -> Error {
    let (name, received) = match &node.kind {
        TypeNodeKind::Named { name, attributes } => (name.clone(), attributes.len()),
        TypeNodeKind::Func { params, .. } => (String::from("func"), params.len()),
    };
    Error::new(
        ErrorImpl::TemplateArity {
            name,
            expected,
            received,
        },
        node.span.clone(),
    )
}
