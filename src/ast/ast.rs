use std::rc::Rc;

use crate::errors::errors::Error;

use super::{
    expressions::{Expr, ExprKind},
    statements::{Field, Param, Stmt, StmtKind},
    types::TypeNode,
};

/// Identifies a node inside one module. Derived facts about a node live in
/// side tables keyed by this id.
pub type NodeId = u32;

/// Hands out node ids for one module.
#[derive(Debug, Clone, Default)]
pub struct NodeIds {
    next: NodeId,
}

impl NodeIds {
    pub fn fresh(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// The root node: one parsed source file.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub file: Rc<String>,
    pub body: Vec<Stmt>,
    pub ids: NodeIds,
}

#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
    Type(&'a TypeNode),
    Param(&'a Param),
    Field(&'a Field),
}

#[derive(Debug)]
pub enum NodeMut<'a> {
    Stmt(&'a mut Stmt),
    Expr(&'a mut Expr),
    Type(&'a mut TypeNode),
    Param(&'a mut Param),
    Field(&'a mut Field),
}

pub type TraverseFn<'f, 'a> = dyn FnMut(NodeRef<'a>) -> Result<(), Error> + 'f;
pub type SubstituteFn<'f> = dyn FnMut(NodeMut<'_>) -> Result<(), Error> + 'f;

impl<'a> NodeRef<'a> {
    /// Calls `visit` on every immediate child, in evaluation order.
    pub fn traverse(self, visit: &mut TraverseFn<'_, 'a>) -> Result<(), Error> {
        match self {
            NodeRef::Stmt(stmt) => stmt.traverse(visit),
            NodeRef::Expr(expr) => expr.traverse(visit),
            NodeRef::Type(ty) => ty.children().into_iter().try_for_each(|c| visit(NodeRef::Type(c))),
            NodeRef::Param(param) => visit(NodeRef::Type(&param.ty)),
            NodeRef::Field(field) => visit(NodeRef::Type(&field.ty)),
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            NodeRef::Stmt(stmt) => stmt.id,
            NodeRef::Expr(expr) => expr.id,
            NodeRef::Type(ty) => ty.id,
            NodeRef::Param(param) => param.id,
            NodeRef::Field(field) => field.id,
        }
    }
}

impl NodeMut<'_> {
    pub fn substitute(self, visit: &mut SubstituteFn<'_>) -> Result<(), Error> {
        match self {
            NodeMut::Stmt(stmt) => stmt.substitute(visit),
            NodeMut::Expr(expr) => expr.substitute(visit),
            NodeMut::Type(ty) => ty
                .children_mut()
                .into_iter()
                .try_for_each(|c| visit(NodeMut::Type(c))),
            NodeMut::Param(param) => visit(NodeMut::Type(&mut param.ty)),
            NodeMut::Field(field) => visit(NodeMut::Type(&mut field.ty)),
        }
    }

    pub fn set_id(&mut self, id: NodeId) {
        match self {
            NodeMut::Stmt(stmt) => stmt.id = id,
            NodeMut::Expr(expr) => expr.id = id,
            NodeMut::Type(ty) => ty.id = id,
            NodeMut::Param(param) => param.id = id,
            NodeMut::Field(field) => field.id = id,
        }
    }
}

fn each_stmt<'a>(body: &'a [Stmt], visit: &mut TraverseFn<'_, 'a>) -> Result<(), Error> {
    body.iter().try_for_each(|stmt| visit(NodeRef::Stmt(stmt)))
}

fn each_stmt_mut(body: &mut [Stmt], visit: &mut SubstituteFn<'_>) -> Result<(), Error> {
    body.iter_mut().try_for_each(|stmt| visit(NodeMut::Stmt(stmt)))
}

impl Stmt {
    pub fn traverse<'a>(&'a self, visit: &mut TraverseFn<'_, 'a>) -> Result<(), Error> {
        match &self.kind {
            StmtKind::Import { .. }
            | StmtKind::Export { .. }
            | StmtKind::Break
            | StmtKind::Continue => Ok(()),
            StmtKind::Function(function) => {
                if let Some(ret) = &function.ret {
                    visit(NodeRef::Type(ret))?;
                }
                for param in &function.params {
                    visit(NodeRef::Param(param))?;
                }
                each_stmt(&function.body, visit)
            }
            StmtKind::Declaration(declaration) => {
                if let Some(ty) = &declaration.ty {
                    visit(NodeRef::Type(ty))?;
                }
                visit(NodeRef::Expr(&declaration.value))
            }
            StmtKind::Assignment { target, value } => {
                visit(NodeRef::Expr(target))?;
                visit(NodeRef::Expr(value))
            }
            StmtKind::Expression(expr) => visit(NodeRef::Expr(expr)),
            StmtKind::Return(value) => match value {
                Some(value) => visit(NodeRef::Expr(value)),
                None => Ok(()),
            },
            StmtKind::If {
                condition,
                consequent,
                alternate,
            } => {
                visit(NodeRef::Expr(condition))?;
                each_stmt(consequent, visit)?;
                match alternate {
                    Some(alternate) => each_stmt(alternate, visit),
                    None => Ok(()),
                }
            }
            StmtKind::While { condition, body } => {
                visit(NodeRef::Expr(condition))?;
                each_stmt(body, visit)
            }
            StmtKind::DoWhile { body, condition } => {
                each_stmt(body, visit)?;
                visit(NodeRef::Expr(condition))
            }
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                visit(NodeRef::Stmt(init))?;
                visit(NodeRef::Expr(condition))?;
                visit(NodeRef::Stmt(step))?;
                each_stmt(body, visit)
            }
            StmtKind::Object(object) => {
                for field in &object.fields {
                    visit(NodeRef::Field(field))?;
                }
                if let Some(constructor) = &object.constructor {
                    visit(NodeRef::Stmt(constructor))?;
                }
                each_stmt(&object.methods, visit)
            }
            StmtKind::Operator(operator) => visit(NodeRef::Stmt(&operator.function)),
        }
    }

    /// Hands every immediate child to `visit` for in-place replacement.
    pub fn substitute(&mut self, visit: &mut SubstituteFn<'_>) -> Result<(), Error> {
        match &mut self.kind {
            StmtKind::Import { .. }
            | StmtKind::Export { .. }
            | StmtKind::Break
            | StmtKind::Continue => Ok(()),
            StmtKind::Function(function) => {
                if let Some(ret) = &mut function.ret {
                    visit(NodeMut::Type(ret))?;
                }
                for param in &mut function.params {
                    visit(NodeMut::Param(param))?;
                }
                each_stmt_mut(&mut function.body, visit)
            }
            StmtKind::Declaration(declaration) => {
                if let Some(ty) = &mut declaration.ty {
                    visit(NodeMut::Type(ty))?;
                }
                visit(NodeMut::Expr(&mut declaration.value))
            }
            StmtKind::Assignment { target, value } => {
                visit(NodeMut::Expr(target))?;
                visit(NodeMut::Expr(value))
            }
            StmtKind::Expression(expr) => visit(NodeMut::Expr(expr)),
            StmtKind::Return(value) => match value {
                Some(value) => visit(NodeMut::Expr(value)),
                None => Ok(()),
            },
            StmtKind::If {
                condition,
                consequent,
                alternate,
            } => {
                visit(NodeMut::Expr(condition))?;
                each_stmt_mut(consequent, visit)?;
                match alternate {
                    Some(alternate) => each_stmt_mut(alternate, visit),
                    None => Ok(()),
                }
            }
            StmtKind::While { condition, body } => {
                visit(NodeMut::Expr(condition))?;
                each_stmt_mut(body, visit)
            }
            StmtKind::DoWhile { body, condition } => {
                each_stmt_mut(body, visit)?;
                visit(NodeMut::Expr(condition))
            }
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                visit(NodeMut::Stmt(init))?;
                visit(NodeMut::Expr(condition))?;
                visit(NodeMut::Stmt(step))?;
                each_stmt_mut(body, visit)
            }
            StmtKind::Object(object) => {
                for field in &mut object.fields {
                    visit(NodeMut::Field(field))?;
                }
                if let Some(constructor) = &mut object.constructor {
                    visit(NodeMut::Stmt(constructor))?;
                }
                each_stmt_mut(&mut object.methods, visit)
            }
            StmtKind::Operator(operator) => visit(NodeMut::Stmt(&mut operator.function)),
        }
    }
}

impl Expr {
    pub fn traverse<'a>(&'a self, visit: &mut TraverseFn<'_, 'a>) -> Result<(), Error> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Symbol(_) => Ok(()),
            ExprKind::Binary { left, right, .. } => {
                visit(NodeRef::Expr(left))?;
                visit(NodeRef::Expr(right))
            }
            ExprKind::Unary { operand, .. } => visit(NodeRef::Expr(operand)),
            ExprKind::Call { callee, args } => {
                visit(NodeRef::Expr(callee))?;
                args.iter().try_for_each(|arg| visit(NodeRef::Expr(arg)))
            }
            ExprKind::Member { base, .. } => visit(NodeRef::Expr(base)),
            ExprKind::Subscript { base, index } => {
                visit(NodeRef::Expr(base))?;
                visit(NodeRef::Expr(index))
            }
            ExprKind::Tuple(elements) => elements.iter().try_for_each(|e| visit(NodeRef::Expr(e))),
            ExprKind::New { ty, args } => {
                visit(NodeRef::Type(ty))?;
                args.iter().try_for_each(|arg| visit(NodeRef::Expr(arg)))
            }
            ExprKind::Cast { expr, ty } => {
                visit(NodeRef::Expr(expr))?;
                visit(NodeRef::Type(ty))
            }
        }
    }

    pub fn substitute(&mut self, visit: &mut SubstituteFn<'_>) -> Result<(), Error> {
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::Symbol(_) => Ok(()),
            ExprKind::Binary { left, right, .. } => {
                visit(NodeMut::Expr(left))?;
                visit(NodeMut::Expr(right))
            }
            ExprKind::Unary { operand, .. } => visit(NodeMut::Expr(operand)),
            ExprKind::Call { callee, args } => {
                visit(NodeMut::Expr(callee))?;
                args.iter_mut().try_for_each(|arg| visit(NodeMut::Expr(arg)))
            }
            ExprKind::Member { base, .. } => visit(NodeMut::Expr(base)),
            ExprKind::Subscript { base, index } => {
                visit(NodeMut::Expr(base))?;
                visit(NodeMut::Expr(index))
            }
            ExprKind::Tuple(elements) => elements
                .iter_mut()
                .try_for_each(|e| visit(NodeMut::Expr(e))),
            ExprKind::New { ty, args } => {
                visit(NodeMut::Type(ty))?;
                args.iter_mut().try_for_each(|arg| visit(NodeMut::Expr(arg)))
            }
            ExprKind::Cast { expr, ty } => {
                visit(NodeMut::Expr(expr))?;
                visit(NodeMut::Type(ty))
            }
        }
    }
}

/// Whether a walk descends into a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Children,
    Skip,
}

/// Pre/post-order hooks driven by [`walk`].
pub trait Visitor<'a> {
    fn enter(&mut self, _node: NodeRef<'a>) -> Result<Walk, Error> {
        Ok(Walk::Children)
    }

    fn leave(&mut self, _node: NodeRef<'a>) -> Result<(), Error> {
        Ok(())
    }
}

pub fn walk<'a, V: Visitor<'a>>(node: NodeRef<'a>, visitor: &mut V) -> Result<(), Error> {
    if visitor.enter(node)? == Walk::Children {
        node.traverse(&mut |child| walk(child, visitor))?;
    }
    visitor.leave(node)
}

/// Walks a statement list, such as a module body.
pub fn walk_body<'a, V: Visitor<'a>>(body: &'a [Stmt], visitor: &mut V) -> Result<(), Error> {
    body.iter()
        .try_for_each(|stmt| walk(NodeRef::Stmt(stmt), visitor))
}

/// Gives every node below `node` (inclusive) a fresh id.
pub fn renumber(node: NodeMut<'_>, ids: &mut NodeIds) -> Result<(), Error> {
    let mut node = node;
    node.set_id(ids.fresh());
    node.substitute(&mut |child| renumber(child, ids))
}
