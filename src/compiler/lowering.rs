//! The dispatch contract shared by every backend.
//!
//! [`Lowering`] matches every statement and expression tag exhaustively and
//! hands each one to a backend method. The helpers below classify symbols,
//! members and callees the same way for every target, so the backends only
//! differ in what they emit.

use std::rc::Rc;

use tracing::trace;

use crate::{
    ast::{
        ast::{walk_body, NodeRef, Visitor, Walk},
        expressions::{BinaryOp, Expr, ExprKind, Literal, UnaryOp},
        statements::{Declaration, FunctionDecl, Stmt, StmtKind},
        types::TypeNode,
    },
    errors::errors::{Error, ErrorImpl},
    resolver::context::{ContextId, Resolution},
    session::{CompiledModule, Session},
    type_checker::infer::member_type,
    types::types::{Export, ExternalType, ModuleKind, Type},
};

use super::closures::{frame_path, Closures, FramePath, Storage};

pub trait Lowering {
    type Value;

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), Error> {
        match &stmt.kind {
            // Functions, objects and operators are emitted at module level.
            StmtKind::Import { .. }
            | StmtKind::Export { .. }
            | StmtKind::Function(_)
            | StmtKind::Object(_)
            | StmtKind::Operator(_) => Ok(()),
            StmtKind::Declaration(declaration) => self.lower_declaration(stmt, declaration),
            StmtKind::Assignment { target, value } => self.lower_assignment(target, value),
            StmtKind::Expression(expr) => self.lower_expression_stmt(expr),
            StmtKind::Return(value) => self.lower_return(value.as_ref()),
            StmtKind::If {
                condition,
                consequent,
                alternate,
            } => self.lower_if(condition, consequent, alternate.as_deref()),
            StmtKind::While { condition, body } => self.lower_while(condition, body),
            StmtKind::DoWhile { body, condition } => self.lower_do_while(body, condition),
            StmtKind::For {
                init,
                condition,
                step,
                body,
            } => self.lower_for(init, condition, step, body),
            StmtKind::Break => self.lower_loop_control(stmt, LoopControl::Break),
            StmtKind::Continue => self.lower_loop_control(stmt, LoopControl::Continue),
        }
    }

    fn lower_body(&mut self, body: &[Stmt]) -> Result<(), Error> {
        body.iter().try_for_each(|stmt| self.lower_stmt(stmt))
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Self::Value, Error> {
        match &expr.kind {
            ExprKind::Literal(literal) => self.lower_literal(expr, literal),
            ExprKind::Symbol(_) => self.lower_symbol(expr),
            ExprKind::Binary { op, left, right } => self.lower_binary(expr, *op, left, right),
            ExprKind::Unary { op, operand } => self.lower_unary(expr, *op, operand),
            ExprKind::Call { callee, args } => self.lower_call(expr, callee, args),
            ExprKind::Member { base, member } => self.lower_member(expr, base, member),
            ExprKind::Subscript { base, index } => self.lower_subscript(expr, base, index),
            ExprKind::Tuple(elements) => self.lower_tuple(expr, elements),
            ExprKind::New { ty, args } => self.lower_new(expr, ty, args),
            ExprKind::Cast { expr: inner, ty } => self.lower_cast(expr, inner, ty),
        }
    }

    fn lower_declaration(&mut self, stmt: &Stmt, declaration: &Declaration) -> Result<(), Error>;
    fn lower_assignment(&mut self, target: &Expr, value: &Expr) -> Result<(), Error>;
    fn lower_expression_stmt(&mut self, expr: &Expr) -> Result<(), Error>;
    fn lower_return(&mut self, value: Option<&Expr>) -> Result<(), Error>;
    fn lower_if(&mut self, condition: &Expr, consequent: &[Stmt], alternate: Option<&[Stmt]>) -> Result<(), Error>;
    fn lower_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<(), Error>;
    fn lower_do_while(&mut self, body: &[Stmt], condition: &Expr) -> Result<(), Error>;
    fn lower_for(&mut self, init: &Stmt, condition: &Expr, step: &Stmt, body: &[Stmt]) -> Result<(), Error>;
    fn lower_loop_control(&mut self, stmt: &Stmt, control: LoopControl) -> Result<(), Error>;

    fn lower_literal(&mut self, expr: &Expr, literal: &Literal) -> Result<Self::Value, Error>;
    fn lower_symbol(&mut self, expr: &Expr) -> Result<Self::Value, Error>;
    fn lower_binary(&mut self, expr: &Expr, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Self::Value, Error>;
    fn lower_unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> Result<Self::Value, Error>;
    fn lower_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Result<Self::Value, Error>;
    fn lower_member(&mut self, expr: &Expr, base: &Expr, member: &str) -> Result<Self::Value, Error>;
    fn lower_subscript(&mut self, expr: &Expr, base: &Expr, index: &Expr) -> Result<Self::Value, Error>;
    fn lower_tuple(&mut self, expr: &Expr, elements: &[Expr]) -> Result<Self::Value, Error>;
    fn lower_new(&mut self, expr: &Expr, ty: &TypeNode, args: &[Expr]) -> Result<Self::Value, Error>;
    fn lower_cast(&mut self, expr: &Expr, inner: &Expr, ty: &TypeNode) -> Result<Self::Value, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Break,
    Continue,
}

impl LoopControl {
    pub fn keyword(&self) -> &'static str {
        match self {
            LoopControl::Break => "break",
            LoopControl::Continue => "continue",
        }
    }
}

/// Targets of the loops enclosing the statement being lowered.
#[derive(Debug)]
pub struct Loops<L> {
    stack: Vec<L>,
}

impl<L> Default for Loops<L> {
    fn default() -> Self {
        Loops { stack: vec![] }
    }
}

impl<L> Loops<L> {
    pub fn push(&mut self, labels: L) {
        self.stack.push(labels);
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn innermost(&self, stmt: &Stmt, control: LoopControl) -> Result<&L, Error> {
        self.stack.last().ok_or_else(|| {
            Error::new(
                ErrorImpl::LoopControlOutsideLoop {
                    keyword: control.keyword().to_string(),
                },
                stmt.span.clone(),
            )
        })
    }
}

/// One module prepared for lowering.
pub struct Unit<'m> {
    pub module: &'m CompiledModule,
    pub closures: Closures,
}

impl<'m> Unit<'m> {
    pub fn new(module: &'m CompiledModule) -> Self {
        Unit {
            module,
            closures: Closures::analyze(&module.resolution),
        }
    }

    pub fn resolution(&self) -> &'m Resolution {
        &self.module.resolution
    }

    /// Module-scope statements that make up the initializer.
    pub fn initializer(&self) -> impl Iterator<Item = &'m Stmt> {
        self.module.module.body.iter().filter(|stmt| {
            !matches!(
                stmt.kind,
                StmtKind::Import { .. }
                    | StmtKind::Export { .. }
                    | StmtKind::Function(_)
                    | StmtKind::Object(_)
                    | StmtKind::Operator(_)
            )
        })
    }

    /// Module-scope variables, in declaration order.
    pub fn globals(&self) -> Vec<(String, Type)> {
        let root = self.resolution().root();
        root.vars
            .iter()
            .filter(|(name, ty)| !root.function_declarations.contains_key(*name) && !matches!(ty, Type::Module(_)))
            .map(|(name, ty)| (root.name_map[name].clone(), ty.clone()))
            .collect()
    }
}

/// A function, method, constructor or operator body, emitted at module
/// level whatever its nesting.
#[derive(Debug, Clone)]
pub struct FunctionItem<'m> {
    pub stmt: &'m Stmt,
    pub decl: &'m FunctionDecl,
    pub assigned: String,
    pub context: ContextId,
    pub ret: Option<Type>,
    pub params: Vec<(String, Type)>,
    /// Takes the parent's frame as a hidden first argument.
    pub takes_context: bool,
}

struct Collector<'m, 'r> {
    resolution: &'r Resolution,
    session: &'r Session,
    items: Vec<FunctionItem<'m>>,
}

impl<'m> Visitor<'m> for Collector<'m, '_> {
    fn enter(&mut self, node: NodeRef<'m>) -> Result<Walk, Error> {
        let NodeRef::Stmt(stmt) = node else {
            return Ok(Walk::Skip);
        };

        match &stmt.kind {
            StmtKind::Object(object) if object.is_template() => return Ok(Walk::Skip),
            StmtKind::Function(decl) => {
                let assigned = self.resolution.assigned_of(stmt.id)?.to_string();
                let context = self.resolution.function_context_of(stmt.id)?;
                let signature = self
                    .session
                    .signature(&assigned)
                    .and_then(Type::as_func)
                    .ok_or_else(|| Error::internal(format!("{} has no signature", decl.name)))?;

                let params = decl
                    .params
                    .iter()
                    .zip(&signature.params)
                    .map(|(param, ty)| Ok((self.resolution.assigned_of(param.id)?.to_string(), ty.clone())))
                    .collect::<Result<Vec<_>, Error>>()?;

                trace!(name = %decl.name, id = %assigned, "collected function");
                self.items.push(FunctionItem {
                    stmt,
                    decl,
                    assigned,
                    context: context.id,
                    ret: signature.ret.clone(),
                    params,
                    takes_context: context.accesses_lexical_scope,
                });
            }
            _ => {}
        }
        Ok(Walk::Children)
    }
}

/// Every function of `unit` in source order, nested ones included.
pub fn collect_functions<'m>(unit: &Unit<'m>, session: &Session) -> Result<Vec<FunctionItem<'m>>, Error> {
    let mut collector = Collector {
        resolution: unit.resolution(),
        session,
        items: vec![],
    };
    walk_body(&unit.module.module.body, &mut collector)?;
    Ok(collector.items)
}

/// What a symbol expression refers to.
#[derive(Debug, Clone)]
pub enum Access {
    Variable(Storage),
    /// A `func` declaration. `frame` locates the context argument of
    /// functions that access lexical scope.
    Function {
        assigned: String,
        frame: Option<FramePath>,
        signature: Type,
    },
    Module,
}

pub fn access(unit: &Unit, current: ContextId, expr: &Expr) -> Result<Access, Error> {
    let resolution = unit.resolution();
    let symbol = resolution.symbol(expr)?;

    if matches!(symbol.ty, Type::Module(_)) {
        return Ok(Access::Module);
    }

    if let Some(function) = symbol.function {
        let target = resolution.function_context_of(function)?;
        let frame = if target.accesses_lexical_scope {
            Some(frame_path(resolution, current, symbol.context)?)
        } else {
            None
        };
        return Ok(Access::Function {
            assigned: symbol.assigned.clone(),
            frame,
            signature: symbol.ty.clone(),
        });
    }

    Ok(Access::Variable(unit.closures.storage(
        resolution,
        current,
        symbol.context,
        &symbol.assigned,
    )?))
}

/// What `base.member` refers to.
#[derive(Debug, Clone)]
pub enum Member {
    /// Struct field or tuple element at `offset`.
    Field {
        key: String,
        ty: Type,
        offset: u32,
        tuple: bool,
    },
    /// `signature` excludes `self`.
    Method { assigned: String, signature: Type },
    Length,
    Export(Export),
    ForeignModule,
    ForeignFunction(String),
}

pub fn member(base: &Type, name: &str, session: &Session) -> Result<Member, Error> {
    let missing = || Error::internal(format!("{} has no member {}", base, name));

    match base {
        Type::Struct(object) => {
            if let Some(ty) = object.fields().get(name) {
                let offset = object.get_layout().offset_of(name).ok_or_else(missing)?;
                return Ok(Member::Field {
                    key: name.to_string(),
                    ty: ty.clone(),
                    offset,
                    tuple: false,
                });
            }
            let assigned = object.methods.get(name).ok_or_else(missing)?;
            let signature = member_type(base, name, session).ok_or_else(missing)?;
            Ok(Member::Method {
                assigned: assigned.clone(),
                signature,
            })
        }
        Type::Tuple(tuple) => {
            let index: usize = name.parse().map_err(|_| missing())?;
            let ty = tuple.elements.get(index).ok_or_else(missing)?;
            let offset = tuple.get_layout().offset_of(name).ok_or_else(missing)?;
            Ok(Member::Field {
                key: name.to_string(),
                ty: ty.clone(),
                offset,
                tuple: true,
            })
        }
        Type::Array(_) | Type::Str if name == "length" => Ok(Member::Length),
        Type::Module(module) => {
            let export = module.exports.get(name).ok_or_else(missing)?;
            match (module.kind, &export.ty) {
                (ModuleKind::Foreign, Type::Module(_)) => Ok(Member::ForeignModule),
                (ModuleKind::Foreign, _) => Ok(Member::ForeignFunction(name.to_string())),
                (ModuleKind::User, _) => Ok(Member::Export(export.clone())),
                (ModuleKind::External, _) => Err(missing()),
            }
        }
        _ => Err(missing()),
    }
}

/// How a call reaches its function.
#[derive(Debug, Clone)]
pub enum CallTarget<'e> {
    Direct {
        assigned: String,
        frame: Option<FramePath>,
    },
    /// Method call with `receiver` as `self`.
    Method { assigned: String, receiver: &'e Expr },
    Foreign(String),
    /// Host function named through `foreign.external`.
    External(Rc<ExternalType>),
    /// Call through a function reference value.
    Reference,
}

pub fn call_target<'e>(
    unit: &Unit,
    session: &Session,
    current: ContextId,
    callee: &'e Expr,
) -> Result<CallTarget<'e>, Error> {
    if let Some(Type::External(external)) = unit.resolution().expr_types.get(&callee.id) {
        return Ok(CallTarget::External(Rc::clone(external)));
    }

    match &callee.kind {
        ExprKind::Symbol(_) => match access(unit, current, callee)? {
            Access::Function { assigned, frame, .. } => Ok(CallTarget::Direct { assigned, frame }),
            _ => Ok(CallTarget::Reference),
        },
        ExprKind::Member { base, member: name } => {
            let base_ty = unit.resolution().expr_type(base)?;
            Ok(match member(base_ty, name, session)? {
                Member::Method { assigned, .. } => CallTarget::Method { assigned, receiver: base },
                Member::ForeignFunction(name) => CallTarget::Foreign(name),
                Member::Export(export) if export.function => CallTarget::Direct {
                    assigned: export.assigned,
                    frame: None,
                },
                _ => CallTarget::Reference,
            })
        }
        _ => Ok(CallTarget::Reference),
    }
}

/// Operand type of a binary node and the overload, if any, implementing it.
pub fn binary_operands(
    resolution: &Resolution,
    session: &Session,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
) -> Result<(Type, Type, Option<String>), Error> {
    let left_ty = resolution.expr_type(left)?.clone();
    let right_ty = resolution.expr_type(right)?.clone();
    let overload = session
        .overload(resolution, &left_ty, &right_ty, op)
        .map(|overload| overload.assigned.clone());
    Ok((left_ty, right_ty, overload))
}
