//! Statement-level type rules, checked after resolution.

use std::collections::HashSet;

use crate::{
    ast::{
        ast::{walk_body, Module, NodeId, NodeRef, Visitor, Walk},
        expressions::{Expr, ExprKind},
        statements::{Stmt, StmtKind},
    },
    errors::errors::{Error, ErrorImpl},
    resolver::context::Resolution,
    types::types::{ModuleKind, Type},
};

struct Validator<'r> {
    resolution: &'r Resolution,
    /// Foreign members in callee position, and `external` links that are
    /// extended by a further link.
    called: HashSet<NodeId>,
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %module.name))]
pub fn validate(module: &Module, resolution: &Resolution) -> Result<(), Error> {
    let mut validator = Validator {
        resolution,
        called: HashSet::new(),
    };
    walk_body(&module.body, &mut validator)
}

fn mismatch(expected: impl ToString, received: impl ToString, span: &crate::Span) -> Error {
    Error::new(
        ErrorImpl::TypeMatchError {
            expected: expected.to_string(),
            received: received.to_string(),
        },
        span.clone(),
    )
}

impl Validator<'_> {
    fn check_condition(&self, condition: &Expr) -> Result<(), Error> {
        let ty = self.resolution.expr_type(condition)?;
        if !ty.is_bool() {
            return Err(mismatch(Type::BOOL, ty, &condition.span));
        }
        Ok(())
    }

    fn check_declaration(&self, stmt: &Stmt) -> Result<(), Error> {
        let StmtKind::Declaration(declaration) = &stmt.kind else {
            return Ok(());
        };

        let value = self.resolution.expr_type(&declaration.value)?;
        if matches!(value, Type::Module(_)) {
            return Err(mismatch("a value", value, &declaration.value.span));
        }

        if let Some(ty) = &declaration.ty {
            let declared = self.resolution.type_of(ty)?;
            if !declared.accepts(value) {
                return Err(mismatch(declared, value, &declaration.value.span));
            }
        }
        Ok(())
    }

    fn check_assignment(&self, target: &Expr, value: &Expr) -> Result<(), Error> {
        let invalid = || Error::new(ErrorImpl::InvalidAssignmentTarget, target.span.clone());

        match &target.kind {
            ExprKind::Symbol(name) => {
                let symbol = self.resolution.symbol(target)?;
                if symbol.constant || symbol.function.is_some() || matches!(symbol.ty, Type::Module(_)) {
                    return Err(Error::new(
                        ErrorImpl::ConstantReassignment {
                            variable: name.clone(),
                        },
                        target.span.clone(),
                    ));
                }
            }
            ExprKind::Member { base, member } => match self.resolution.expr_type(base)? {
                Type::Struct(object) if object.fields().contains_key(member) => {}
                Type::Tuple(_) => {}
                _ => return Err(invalid()),
            },
            ExprKind::Subscript { .. } => {}
            _ => return Err(invalid()),
        }

        let target_ty = self.resolution.expr_type(target)?;
        let value_ty = self.resolution.expr_type(value)?;
        if !target_ty.accepts(value_ty) {
            return Err(mismatch(target_ty, value_ty, &value.span));
        }
        Ok(())
    }

    fn check_return(&self, stmt: &Stmt, value: Option<&Expr>) -> Result<(), Error> {
        let context = self.resolution.context(self.resolution.context_of(stmt.id)?);

        match (&context.return_type, value) {
            (None, None) => Ok(()),
            (Some(expected), None) => Err(mismatch(expected, Type::Null, &stmt.span)),
            (None, Some(value)) => {
                let received = self.resolution.expr_type(value)?;
                Err(mismatch(Type::Null, received, &value.span))
            }
            (Some(expected), Some(value)) => {
                let received = self.resolution.expr_type(value)?;
                if expected.accepts(received) {
                    Ok(())
                } else {
                    Err(mismatch(expected, received, &value.span))
                }
            }
        }
    }

    fn is_foreign_function(&self, expr: &Expr) -> bool {
        let ExprKind::Member { base, .. } = &expr.kind else {
            return false;
        };
        if self.is_external(expr) {
            return true;
        }
        matches!(
            self.resolution.expr_types.get(&base.id),
            Some(Type::Module(module)) if module.kind == ModuleKind::Foreign
        ) && matches!(self.resolution.expr_types.get(&expr.id), Some(Type::Func(_)))
    }

    fn is_external(&self, expr: &Expr) -> bool {
        matches!(self.resolution.expr_types.get(&expr.id), Some(Type::External(_)))
    }
}

impl<'a> Visitor<'a> for Validator<'_> {
    fn enter(&mut self, node: NodeRef<'a>) -> Result<Walk, Error> {
        match node {
            NodeRef::Stmt(stmt) => match &stmt.kind {
                StmtKind::Object(object) if object.is_template() => return Ok(Walk::Skip),
                StmtKind::Declaration(_) => self.check_declaration(stmt)?,
                StmtKind::Assignment { target, value } => self.check_assignment(target, value)?,
                StmtKind::Return(value) => self.check_return(stmt, value.as_ref())?,
                StmtKind::If { condition, .. }
                | StmtKind::While { condition, .. }
                | StmtKind::DoWhile { condition, .. }
                | StmtKind::For { condition, .. } => self.check_condition(condition)?,
                _ => {}
            },
            NodeRef::Expr(expr) => match &expr.kind {
                ExprKind::Call { callee, .. } if self.is_foreign_function(callee) => {
                    self.called.insert(callee.id);
                }
                ExprKind::Member { base, member } => {
                    if self.is_foreign_function(expr) && !self.called.contains(&expr.id) {
                        return Err(Error::new(
                            ErrorImpl::ForeignReference {
                                name: member.clone(),
                            },
                            expr.span.clone(),
                        ));
                    }
                    if self.is_external(base) {
                        self.called.insert(base.id);
                    }
                }
                _ => {}
            },
            _ => {}
        }

        Ok(Walk::Children)
    }
}
