//! Object template instantiation.
//!
//! `object Box<T> { T:value; }` is a template. Every distinct use such as
//! `Box<int>` clones the template under a mangled name (`Box$int$$`),
//! replacing `T` with the concrete type, and rewrites the use to name the
//! clone. Templates stay in the tree and every later phase skips them.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::errors::errors::{Error, ErrorImpl};

use super::{
    ast::{renumber, Module, NodeIds, NodeMut},
    statements::{Stmt, StmtKind},
    types::{TypeNode, TypeNodeKind},
};

struct Instantiator {
    templates: HashMap<String, Stmt>,
    plain_objects: HashSet<String>,
    instantiated: HashSet<String>,
    pending: Vec<Stmt>,
    ids: NodeIds,
}

#[tracing::instrument(level = "debug", skip(module), fields(module = %module.name))]
pub fn instantiate_templates(module: &mut Module) -> Result<(), Error> {
    let mut templates = HashMap::new();
    let mut plain_objects = HashSet::new();

    for stmt in &module.body {
        if let StmtKind::Object(object) = &stmt.kind {
            if object.is_template() {
                templates.insert(object.name.clone(), stmt.clone());
            } else {
                plain_objects.insert(object.name.clone());
            }
        }
    }

    if templates.is_empty() && plain_objects.is_empty() {
        return Ok(());
    }

    let mut state = Instantiator {
        templates,
        plain_objects,
        instantiated: HashSet::new(),
        pending: vec![],
        ids: std::mem::take(&mut module.ids),
    };

    for stmt in module.body.iter_mut() {
        if is_template(stmt) {
            continue;
        }
        rewrite(NodeMut::Stmt(stmt), &mut state)?;
    }

    debug!(count = state.pending.len(), "instantiated object templates");

    module.body.append(&mut state.pending);
    module.ids = state.ids;
    Ok(())
}

pub fn is_template(stmt: &Stmt) -> bool {
    matches!(&stmt.kind, StmtKind::Object(object) if object.is_template())
}

fn rewrite(node: NodeMut<'_>, state: &mut Instantiator) -> Result<(), Error> {
    match node {
        NodeMut::Type(ty) => rewrite_type(ty, state),
        other => other.substitute(&mut |child| rewrite(child, state)),
    }
}

fn rewrite_type(ty: &mut TypeNode, state: &mut Instantiator) -> Result<(), Error> {
    for child in ty.children_mut() {
        rewrite_type(child, state)?;
    }

    let TypeNodeKind::Named { name, attributes } = &ty.kind else {
        return Ok(());
    };

    if attributes.is_empty() && !state.templates.contains_key(name) {
        return Ok(());
    }

    if state.plain_objects.contains(name) {
        return Err(Error::new(
            ErrorImpl::TemplateArity {
                name: name.clone(),
                expected: 0,
                received: attributes.len(),
            },
            ty.span.clone(),
        ));
    }

    let Some(template) = state.templates.get(name) else {
        // array<T>, tuple<..> and unknown names are left to the resolver.
        return Ok(());
    };

    let StmtKind::Object(object) = &template.kind else {
        return Err(Error::internal("template table holds a non-object"));
    };

    if object.attributes.len() != attributes.len() {
        return Err(Error::new(
            ErrorImpl::TemplateArity {
                name: name.clone(),
                expected: object.attributes.len(),
                received: attributes.len(),
            },
            ty.span.clone(),
        ));
    }

    let mangled = ty.mangle();

    if state.instantiated.insert(mangled.clone()) {
        trace!(template = %name, instance = %mangled, "instantiating");

        let bindings: HashMap<String, TypeNode> = object
            .attributes
            .iter()
            .cloned()
            .zip(attributes.iter().cloned())
            .collect();

        let mut instance = template.clone();
        if let StmtKind::Object(object) = &mut instance.kind {
            object.name = mangled.clone();
            object.attributes.clear();
        }

        bind_attributes(NodeMut::Stmt(&mut instance), &bindings)?;
        renumber(NodeMut::Stmt(&mut instance), &mut state.ids)?;
        rewrite(NodeMut::Stmt(&mut instance), state)?;
        state.pending.push(instance);
    }

    ty.kind = TypeNodeKind::Named {
        name: mangled,
        attributes: vec![],
    };
    Ok(())
}

fn bind_attributes(node: NodeMut<'_>, bindings: &HashMap<String, TypeNode>) -> Result<(), Error> {
    match node {
        NodeMut::Type(ty) => {
            if let TypeNodeKind::Named { name, attributes } = &ty.kind {
                if attributes.is_empty() {
                    if let Some(bound) = bindings.get(name) {
                        let span = ty.span.clone();
                        *ty = bound.clone();
                        ty.span = span;
                        return Ok(());
                    }
                }
            }
            NodeMut::Type(ty).substitute(&mut |child| bind_attributes(child, bindings))
        }
        other => other.substitute(&mut |child| bind_attributes(child, bindings)),
    }
}
