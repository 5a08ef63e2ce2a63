//! Expression type inference.
//!
//! Runs bottom-up during resolution: when an expression is left, its
//! children already have types in the [`Resolution`].

use std::rc::Rc;

use crate::{
    ast::expressions::{BinaryOp, Expr, ExprKind, Literal, UnaryOp},
    errors::errors::{Error, ErrorImpl},
    resolver::context::Resolution,
    session::Session,
    types::types::{ExternalType, FuncType, ModuleKind, Type},
    Span,
};

/// Type of `expr`, or `None` for a call to a function without a return
/// type.
pub fn infer_expr(expr: &Expr, resolution: &Resolution, session: &Session) -> Result<Option<Type>, Error> {
    let ty = match &expr.kind {
        ExprKind::Literal(literal) => match literal {
            Literal::Int(_) => Type::INT,
            Literal::Float(_) => Type::FLOAT,
            Literal::Bool(_) => Type::BOOL,
            Literal::Str(_) => Type::Str,
            Literal::Null => Type::Null,
        },
        ExprKind::Symbol(_) => resolution.symbol(expr)?.ty.clone(),
        ExprKind::Binary { op, left, right } => {
            let left = resolution.expr_type(left)?;
            let right = resolution.expr_type(right)?;
            infer_binary(*op, left, right, resolution, session, &expr.span)?
        }
        ExprKind::Unary { op, operand } => {
            let operand = resolution.expr_type(operand)?;
            let valid = match op {
                UnaryOp::Neg => operand.is_numeric(),
                UnaryOp::Not => operand.is_bool(),
                UnaryOp::BitNot => operand.is_integral(),
            };
            if !valid {
                return Err(invalid_operand(op.symbol(), operand, &expr.span));
            }
            operand.clone()
        }
        ExprKind::Call { callee, args } => {
            let callee_ty = resolution.expr_type(callee)?;
            let Some(signature) = callee_ty.as_func() else {
                return Err(Error::new(
                    ErrorImpl::NotCallable {
                        received: callee_ty.to_string(),
                    },
                    expr.span.clone(),
                ));
            };
            check_arguments(&signature.params, args, resolution, &expr.span)?;
            return Ok(signature.ret.clone());
        }
        ExprKind::Member { base, member } => {
            let base_ty = resolution.expr_type(base)?;
            member_type(base_ty, member, session).ok_or_else(|| {
                Error::new(
                    ErrorImpl::MemberNotFound {
                        member: member.clone(),
                        type_: base_ty.to_string(),
                    },
                    expr.span.clone(),
                )
            })?
        }
        ExprKind::Subscript { base, index } => {
            let base_ty = resolution.expr_type(base)?;
            let Some(element) = base_ty.element() else {
                return Err(invalid_operand("[]", base_ty, &expr.span));
            };
            let index_ty = resolution.expr_type(index)?;
            if !index_ty.is_integral() {
                return Err(mismatch(&Type::INT, index_ty, &index.span));
            }
            element
        }
        ExprKind::Tuple(elements) => Type::tuple(
            elements
                .iter()
                .map(|element| resolution.expr_type(element).cloned())
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ExprKind::New { ty, args } => {
            let ty = resolution.type_of(ty)?;
            match ty {
                Type::Struct(object) => {
                    let params = match &object.constructor {
                        Some(constructor) => constructor_params(session, constructor)?,
                        None => vec![],
                    };
                    check_arguments(&params, args, resolution, &expr.span)?;
                }
                Type::Array(_) | Type::Str => {
                    check_arity(1, args.len(), &expr.span)?;
                    let length = resolution.expr_type(&args[0])?;
                    if !length.is_integral() {
                        return Err(mismatch(&Type::INT, length, &args[0].span));
                    }
                }
                other => {
                    return Err(Error::new(
                        ErrorImpl::TypeMatchError {
                            expected: String::from("an object or array"),
                            received: other.to_string(),
                        },
                        expr.span.clone(),
                    ))
                }
            }
            ty.clone()
        }
        ExprKind::Cast { expr: inner, ty } => {
            let from = resolution.expr_type(inner)?;
            let to = resolution.type_of(ty)?;
            if !castable(from, to) {
                return Err(Error::new(
                    ErrorImpl::InvalidCast {
                        from: from.to_string(),
                        to: to.to_string(),
                    },
                    expr.span.clone(),
                ));
            }
            to.clone()
        }
    };

    Ok(Some(ty))
}

fn infer_binary(
    op: BinaryOp,
    left: &Type,
    right: &Type,
    resolution: &Resolution,
    session: &Session,
    span: &Span,
) -> Result<Type, Error> {
    if let Some(overload) = session.overload(resolution, left, right, op) {
        return Ok(overload.ret.clone());
    }

    match op {
        BinaryOp::And | BinaryOp::Or => {
            for operand in [left, right] {
                if !operand.is_bool() {
                    return Err(invalid_operand(op.symbol(), operand, span));
                }
            }
            Ok(Type::BOOL)
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let with_null = |a: &Type, b: &Type| matches!(a, Type::Null) && (b.is_reference() || matches!(b, Type::Null));
            if left.equals(right) || with_null(left, right) || with_null(right, left) {
                Ok(Type::BOOL)
            } else {
                Err(mismatch(left, right, span))
            }
        }
        _ => {
            if !left.equals(right) {
                return Err(mismatch(left, right, span));
            }
            let valid = if op.is_bitwise() {
                left.is_integral()
            } else {
                left.is_numeric()
            };
            if !valid {
                return Err(invalid_operand(op.symbol(), left, span));
            }
            Ok(if op.is_comparison() {
                Type::BOOL
            } else {
                left.clone()
            })
        }
    }
}

/// Type of `base.member`. Methods read as functions without `self`.
pub fn member_type(base: &Type, member: &str, session: &Session) -> Option<Type> {
    match base {
        Type::Struct(object) => {
            if let Some(field) = object.fields().get(member) {
                return Some(field.clone());
            }
            let assigned = object.methods.get(member)?;
            let signature = session.signature(assigned)?.as_func()?;
            Some(Type::func(
                signature.ret.clone(),
                signature.params.iter().skip(1).cloned().collect(),
            ))
        }
        Type::Tuple(tuple) => {
            let index: usize = member.parse().ok()?;
            tuple.elements.get(index).cloned()
        }
        Type::Array(_) | Type::Str if member == "length" => Some(Type::INT),
        Type::Module(module) if module.kind == ModuleKind::External => {
            Some(Type::External(Rc::new(ExternalType::new(member))))
        }
        Type::Module(module) => module.exports.get(member).map(|export| export.ty.clone()),
        Type::External(external) => external.link(member).map(|link| Type::External(Rc::new(link))),
        _ => None,
    }
}

/// Constructor parameters after the implicit `self`.
fn constructor_params(session: &Session, constructor: &str) -> Result<Vec<Type>, Error> {
    let signature: &FuncType = session
        .signature(constructor)
        .and_then(Type::as_func)
        .ok_or_else(|| Error::internal(format!("constructor {} has no signature", constructor)))?;
    Ok(signature.params.iter().skip(1).cloned().collect())
}

fn check_arity(expected: usize, received: usize, span: &Span) -> Result<(), Error> {
    if received > expected {
        return Err(Error::new(
            ErrorImpl::UnexpectedArguments { expected, received },
            span.clone(),
        ));
    }
    if received < expected {
        return Err(Error::new(
            ErrorImpl::MissingArguments { expected, received },
            span.clone(),
        ));
    }
    Ok(())
}

fn check_arguments(params: &[Type], args: &[Expr], resolution: &Resolution, span: &Span) -> Result<(), Error> {
    check_arity(params.len(), args.len(), span)?;

    for (param, arg) in params.iter().zip(args) {
        let arg_ty = resolution.expr_type(arg)?;
        if !param.accepts(arg_ty) {
            return Err(Error::new(
                ErrorImpl::ArgumentTypeMatchError {
                    expected: param.to_string(),
                    received: arg_ty.to_string(),
                },
                arg.span.clone(),
            ));
        }
    }
    Ok(())
}

/// Numbers and booleans convert freely; strings convert to and from
/// `array<uint>`.
pub fn castable(from: &Type, to: &Type) -> bool {
    from.equals(to) || (from.as_primitive().is_some() && to.as_primitive().is_some())
}

fn mismatch(expected: &Type, received: &Type, span: &Span) -> Error {
    Error::new(
        ErrorImpl::TypeMatchError {
            expected: expected.to_string(),
            received: received.to_string(),
        },
        span.clone(),
    )
}

fn invalid_operand(operator: &str, received: &Type, span: &Span) -> Error {
    Error::new(
        ErrorImpl::InvalidOperandType {
            operator: operator.to_string(),
            received: received.to_string(),
        },
        span.clone(),
    )
}
