//! Type-guarded constant folding.
//!
//! Binary nodes whose operands have the same, non-overloaded type are
//! folded when both sides are literals, short-circuited when a logical
//! operand is decisive, and re-associated to bring two literals together.
//! Children fold before their parent so rewrites cascade.

use tracing::{debug, trace};

use crate::{
    ast::{
        ast::{Module, NodeIds, NodeMut},
        expressions::{BinaryOp, Expr, ExprKind, Literal},
        statements::StmtKind,
    },
    errors::errors::Error,
    resolver::context::Resolution,
    session::Session,
    types::types::{Primitive, Type},
};

struct Folder<'r> {
    resolution: &'r mut Resolution,
    session: &'r Session,
    ids: &'r mut NodeIds,
    folded: usize,
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %module.name))]
pub fn fold(module: &mut Module, resolution: &mut Resolution, session: &Session) -> Result<(), Error> {
    let Module { body, ids, .. } = module;
    let mut folder = Folder {
        resolution,
        session,
        ids,
        folded: 0,
    };

    for stmt in body.iter_mut() {
        folder.visit(NodeMut::Stmt(stmt))?;
    }

    debug!(folded = folder.folded, "constant folding done");
    Ok(())
}

impl Folder<'_> {
    fn visit(&mut self, node: NodeMut<'_>) -> Result<(), Error> {
        match node {
            NodeMut::Stmt(stmt) => {
                if matches!(&stmt.kind, StmtKind::Object(object) if object.is_template()) {
                    return Ok(());
                }
                stmt.substitute(&mut |child| self.visit(child))
            }
            NodeMut::Expr(expr) => {
                expr.substitute(&mut |child| self.visit(child))?;
                self.fold_expr(expr);
                Ok(())
            }
            NodeMut::Type(_) | NodeMut::Param(_) | NodeMut::Field(_) => Ok(()),
        }
    }

    /// The shared operand type of a foldable binary node.
    fn operand_type(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Option<Type> {
        let left = self.resolution.expr_types.get(&left.id)?;
        let right = self.resolution.expr_types.get(&right.id)?;

        if !left.equals(right) || matches!(left, Type::Null) {
            return None;
        }
        if self.session.overload(self.resolution, left, right, op).is_some() {
            return None;
        }
        Some(left.clone())
    }

    fn fold_expr(&mut self, expr: &mut Expr) {
        let ExprKind::Binary { op, left, right } = &expr.kind else {
            return;
        };
        let op = *op;
        let Some(ty) = self.operand_type(op, left, right) else {
            return;
        };

        let replacement = short_circuit(op, left, right)
            .or_else(|| match (left.as_literal(), right.as_literal()) {
                (Some(l), Some(r)) => compute(op, l, r).map(ExprKind::Literal),
                _ => None,
            })
            .or_else(|| self.reassociate(op, expr, &ty));

        if let Some(kind) = replacement {
            trace!(id = expr.id, operator = %op, "folded");
            self.folded += 1;
            expr.kind = kind;
        }
    }

    /// Moves a literal across a nested node of the same operator so it
    /// meets the outer literal:
    ///
    /// - `L + (Y + Z)` becomes `(L + Y) + Z`, or `(L + Z) + Y` when `Z` is the literal
    /// - `L / (Y * Z)` becomes `(L / Y) / Z` for floats
    /// - `(X + Y) + L` becomes `Y + (X + L)`, or `X + (Y + L)` when `Y` is the literal
    /// - `(X / Y) / L` becomes `X / (Y * L)`, for integers only when `Y * L`
    ///   does not overflow
    ///
    /// `*` follows the same shapes as `+`.
    fn reassociate(&mut self, op: BinaryOp, expr: &Expr, ty: &Type) -> Option<ExprKind> {
        let ExprKind::Binary { left, right, .. } = &expr.kind else {
            return None;
        };
        let associative = matches!(op, BinaryOp::Add | BinaryOp::Mul);

        if let (Some(l), ExprKind::Binary { op: inner, left: y, right: z }) =
            (left.as_literal(), &right.kind)
        {
            self.operand_type(*inner, y, z)
                .filter(|inner_ty| inner_ty.equals(ty))?;

            let (folded, rest) = if associative && *inner == op {
                match (y.as_literal(), z.as_literal()) {
                    (Some(y), _) => (compute(op, l, y)?, z),
                    (None, Some(z)) => (compute(op, l, z)?, y),
                    _ => return None,
                }
            } else if op == BinaryOp::Div && *inner == BinaryOp::Mul && ty.is_float() {
                (compute(BinaryOp::Div, l, y.as_literal()?)?, z)
            } else {
                return None;
            };

            let folded = self.literal(folded, ty, expr);
            return Some(binary(op, folded, rest.as_ref().clone()));
        }

        if let (ExprKind::Binary { op: inner, left: x, right: y }, Some(l)) =
            (&left.kind, right.as_literal())
        {
            self.operand_type(*inner, x, y)
                .filter(|inner_ty| inner_ty.equals(ty))?;

            let (rest, folded) = if associative && *inner == op {
                match (x.as_literal(), y.as_literal()) {
                    (Some(x), _) => (y, compute(op, x, l)?),
                    (None, Some(y)) => (x, compute(op, y, l)?),
                    _ => return None,
                }
            } else if op == BinaryOp::Div && *inner == BinaryOp::Div {
                (x, divisor_product(y.as_literal()?, l, ty)?)
            } else {
                return None;
            };

            let folded = self.literal(folded, ty, expr);
            return Some(binary(op, rest.as_ref().clone(), folded));
        }

        None
    }

    fn literal(&mut self, literal: Literal, ty: &Type, origin: &Expr) -> Expr {
        let id = self.ids.fresh();
        self.resolution.expr_types.insert(id, ty.clone());
        if let Some(context) = self.resolution.node_context.get(&origin.id).copied() {
            self.resolution.node_context.insert(id, context);
        }

        Expr {
            id,
            span: origin.span.clone(),
            kind: ExprKind::Literal(literal),
        }
    }
}

/// The rewritten node keeps the id of the node it replaces.
fn binary(op: BinaryOp, left: Expr, right: Expr) -> ExprKind {
    ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// `Y * L` as one divisor. Integer products must fit the type, since the
/// two divisions they replace never wrap.
fn divisor_product(y: &Literal, l: &Literal, ty: &Type) -> Option<Literal> {
    match (y, l) {
        (Literal::Int(_), Literal::Int(_)) if ty.as_primitive() == Some(Primitive::Byte) => None,
        (Literal::Int(y), Literal::Int(l)) => y.checked_mul(*l).map(Literal::Int),
        _ => compute(BinaryOp::Mul, y, l),
    }
}

/// `false and X`, `X and false`, `true or X` and `X or true`.
fn short_circuit(op: BinaryOp, left: &Expr, right: &Expr) -> Option<ExprKind> {
    let decisive = match op {
        BinaryOp::And => false,
        BinaryOp::Or => true,
        _ => return None,
    };

    [left, right]
        .iter()
        .any(|operand| operand.as_literal() == Some(&Literal::Bool(decisive)))
        .then_some(ExprKind::Literal(Literal::Bool(decisive)))
}

/// Evaluates `l op r` with the target's arithmetic. Division and remainder
/// by zero are left to run time.
pub fn compute(op: BinaryOp, l: &Literal, r: &Literal) -> Option<Literal> {
    use BinaryOp::*;

    Some(match (l, r) {
        (Literal::Int(a), Literal::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Literal::Int(a.wrapping_add(b)),
                Sub => Literal::Int(a.wrapping_sub(b)),
                Mul => Literal::Int(a.wrapping_mul(b)),
                Div if b != 0 => Literal::Int(a.wrapping_div(b)),
                Mod if b != 0 => Literal::Int(a.wrapping_rem(b)),
                BitAnd => Literal::Int(a & b),
                BitOr => Literal::Int(a | b),
                BitXor => Literal::Int(a ^ b),
                Shl => Literal::Int(a.wrapping_shl(b as u32)),
                Shr => Literal::Int(a.wrapping_shr(b as u32)),
                Eq => Literal::Bool(a == b),
                Ne => Literal::Bool(a != b),
                Lt => Literal::Bool(a < b),
                Le => Literal::Bool(a <= b),
                Gt => Literal::Bool(a > b),
                Ge => Literal::Bool(a >= b),
                _ => return None,
            }
        }
        (Literal::Float(a), Literal::Float(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Literal::Float(a + b),
                Sub => Literal::Float(a - b),
                Mul => Literal::Float(a * b),
                Div if b != 0.0 => Literal::Float(a / b),
                Mod if b != 0.0 => Literal::Float(a % b),
                Eq => Literal::Bool(a == b),
                Ne => Literal::Bool(a != b),
                Lt => Literal::Bool(a < b),
                Le => Literal::Bool(a <= b),
                Gt => Literal::Bool(a > b),
                Ge => Literal::Bool(a >= b),
                _ => return None,
            }
        }
        (Literal::Bool(a), Literal::Bool(b)) => match op {
            Eq => Literal::Bool(a == b),
            Ne => Literal::Bool(a != b),
            And => Literal::Bool(*a && *b),
            Or => Literal::Bool(*a || *b),
            _ => return None,
        },
        _ => return None,
    })
}
