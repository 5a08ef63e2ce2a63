//! Scripting target: one self-invoking closure of plain JavaScript.
//!
//! Numbers keep their width through coercions (`|0`, `>>>0`, `&255`,
//! `Math.imul`, `Math.fround`). Objects are JS objects keyed by field name,
//! tuples and arrays are JS arrays, and function references are
//! `[function, context]` pairs called through `$invoke`.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    ast::{
        expressions::{BinaryOp, Expr, ExprKind, Literal, UnaryOp},
        statements::{Declaration, Stmt},
        types::TypeNode,
    },
    errors::errors::Error,
    resolver::{
        context::{ContextId, ROOT},
        foreign::GET_NAN,
    },
    session::{CompiledModule, Session},
    types::types::{Primitive, Type},
};

use super::{
    closures::{FramePath, Storage, PARENT},
    lowering::{
        access, binary_operands, call_target, collect_functions, member, Access, CallTarget, FunctionItem,
        LoopControl, Loops, Lowering, Member, Unit,
    },
};

const RUNTIME: &str = r#"function $invoke(ref) {
    var args = Array.prototype.slice.call(arguments, 1);
    if (ref[1] === null) {
        return ref[0].apply(null, args);
    }
    return ref[0].apply(null, [ref[1]].concat(args));
}
function $same(a, b) {
    return a === b || (a !== null && b !== null && a[0] === b[0] && a[1] === b[1]);
}
function $construct(object, ctor, args) {
    ctor.apply(null, [object].concat(args));
    return object;
}
function $host(name) {
    var f = globalThis[name];
    return typeof f === "function" ? f : function () {};
}
function $array(length, zero) {
    var array = new Array(length);
    for (var i = 0; i < length; i++) {
        array[i] = zero;
    }
    return array;
}"#;

#[derive(Debug, Default)]
struct Writer {
    out: String,
    indent: usize,
}

impl Writer {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }
}

struct Js<'a, 'm> {
    session: &'a mut Session,
    unit: &'a Unit<'m>,
    /// Hoisted string literals: text to variable name.
    strings: &'a mut IndexMap<String, String>,
    out: Writer,
    context: ContextId,
    loops: Loops<()>,
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %root.module.name))]
pub fn emit(session: &mut Session, modules: &[Rc<CompiledModule>], root: &CompiledModule, name: &str) -> Result<String, Error> {
    let mut strings = IndexMap::new();
    let mut body = Writer {
        indent: 1,
        ..Writer::default()
    };
    let mut inits = vec![];

    for module in modules {
        let unit = Unit::new(module);
        let functions = collect_functions(&unit, session)?;

        for (assigned, ty) in unit.globals() {
            body.line(format!("var {} = {};", assigned, zero(&ty)));
        }

        let mut js = Js {
            session: &mut *session,
            unit: &unit,
            strings: &mut strings,
            out: Writer {
                indent: 1,
                ..Writer::default()
            },
            context: ROOT,
            loops: Loops::default(),
        };

        for function in &functions {
            js.function(function)?;
        }
        js.initializer()?;
        inits.push(module.resolution.init.clone());

        body.out.push_str(&js.out.out);
    }

    let mut out = Writer::default();
    out.open(format!("var {} = (function () {{", name));
    out.line("\"use strict\";");
    for line in RUNTIME.lines() {
        out.line(line);
    }
    for (text, variable) in &strings {
        let units: Vec<String> = text.encode_utf16().map(|unit| unit.to_string()).collect();
        out.line(format!("var {} = [{}];", variable, units.join(", ")));
    }
    out.out.push_str(&body.out);

    for init in &inits {
        out.line(format!("{}();", init));
    }
    out.line("var exports = {};");
    for (export_name, export) in &root.ty.exports {
        out.line(format!(
            "Object.defineProperty(exports, \"{}\", {{ enumerable: true, get: function () {{ return {}; }} }});",
            export_name, export.assigned
        ));
    }
    out.line("return exports;");
    out.close("})();");

    debug!(bytes = out.out.len(), strings = strings.len(), "emitted js");
    Ok(out.out)
}

fn zero(ty: &Type) -> &'static str {
    match ty {
        Type::Primitive(Primitive::Bool) => "false",
        Type::Primitive(_) => "0",
        _ => "null",
    }
}

fn float(value: f64) -> String {
    if value.is_nan() {
        String::from("NaN")
    } else if value.is_infinite() {
        String::from(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else if value < 0.0 || (value == 0.0 && value.is_sign_negative()) {
        format!("({:?})", value)
    } else {
        format!("{:?}", value)
    }
}

fn frame(path: FramePath) -> String {
    match path {
        FramePath::Own => String::from("$frame"),
        FramePath::Up(hops) => {
            let mut text = String::from("$ctx");
            for _ in 0..hops {
                text.push('.');
                text.push_str(PARENT);
            }
            text
        }
    }
}

fn storage(storage: &Storage) -> String {
    match storage {
        Storage::Global(assigned) | Storage::Local(assigned) => assigned.clone(),
        Storage::Frame { path, field } => format!("{}.{}", frame(*path), field),
    }
}

/// Wraps an arithmetic result back into the width of `ty`.
fn wrap(ty: &Type, text: String) -> String {
    match ty.as_primitive() {
        Some(Primitive::Int) => format!("({} | 0)", text),
        Some(Primitive::UInt) => format!("({} >>> 0)", text),
        Some(Primitive::Byte) => format!("({} & 255)", text),
        Some(Primitive::SFloat) => format!("Math.fround({})", text),
        _ => text,
    }
}

fn binary(op: BinaryOp, ty: &Type, l: &str, r: &str) -> String {
    let unsigned = matches!(ty.as_primitive(), Some(Primitive::UInt | Primitive::Byte));
    match op {
        BinaryOp::And => format!("({} && {})", l, r),
        BinaryOp::Or => format!("({} || {})", l, r),
        BinaryOp::Eq if ty.as_func().is_some() => format!("$same({}, {})", l, r),
        BinaryOp::Ne if ty.as_func().is_some() => format!("(!$same({}, {}))", l, r),
        BinaryOp::Eq => format!("({} === {})", l, r),
        BinaryOp::Ne => format!("({} !== {})", l, r),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => format!("({} {} {})", l, op.symbol(), r),
        BinaryOp::Mul if ty.is_integral() => wrap(ty, format!("Math.imul({}, {})", l, r)),
        BinaryOp::Shr if unsigned => format!("({} >>> {})", l, r),
        BinaryOp::Div | BinaryOp::Mod if ty.is_integral() => wrap(ty, format!("({} {} {})", l, op.symbol(), r)),
        _ => wrap(ty, format!("({} {} {})", l, op.symbol(), r)),
    }
}

fn cast(from: &Type, to: &Type, value: String) -> String {
    if from.equals(to) {
        return value;
    }
    let (Some(from), Some(to)) = (from.as_primitive(), to.as_primitive()) else {
        return value;
    };

    let numeric = if from == Primitive::Bool {
        format!("({} ? 1 : 0)", value)
    } else {
        value
    };
    match to {
        Primitive::Int => format!("({} | 0)", numeric),
        Primitive::UInt => format!("({} >>> 0)", numeric),
        Primitive::Byte => format!("({} & 255)", numeric),
        Primitive::Float => format!("(+{})", numeric),
        Primitive::SFloat => format!("Math.fround({})", numeric),
        Primitive::Bool => format!("({} !== 0)", numeric),
    }
}

impl Js<'_, '_> {
    fn expr_type(&self, expr: &Expr) -> Result<Type, Error> {
        Ok(self.unit.resolution().expr_type(expr)?.clone())
    }

    fn args(&mut self, args: &[Expr]) -> Result<Vec<String>, Error> {
        args.iter().map(|arg| self.lower_expr(arg)).collect()
    }

    fn reference(&mut self, assigned: &str, signature: &Type, context: Option<String>) -> String {
        self.session
            .func_lists
            .register(signature, context.is_some(), assigned);
        format!("[{}, {}]", assigned, context.as_deref().unwrap_or("null"))
    }

    fn function(&mut self, function: &FunctionItem) -> Result<(), Error> {
        self.context = function.context;
        self.loops = Loops::default();

        let mut params: Vec<String> = vec![];
        if function.takes_context {
            params.push(String::from("$ctx"));
        }
        params.extend(function.params.iter().map(|(assigned, _)| assigned.clone()));
        self.out
            .open(format!("function {}({}) {{", function.assigned, params.join(", ")));

        if let Some(frame) = self.unit.closures.frame(function.context) {
            let fields: Vec<String> = frame
                .fields()
                .iter()
                .map(|(field, ty)| {
                    let value = if field == PARENT {
                        String::from("$ctx")
                    } else if function.params.iter().any(|(param, _)| param == field) {
                        field.clone()
                    } else {
                        zero(ty).to_string()
                    };
                    format!("{}: {}", field, value)
                })
                .collect();
            self.out.line(format!("var $frame = {{{}}};", fields.join(", ")));
        }

        self.lower_body(&function.decl.body)?;
        self.out.close("}");
        Ok(())
    }

    fn initializer(&mut self) -> Result<(), Error> {
        self.context = ROOT;
        self.loops = Loops::default();

        self.out
            .open(format!("function {}() {{", self.unit.resolution().init));
        for stmt in self.unit.initializer() {
            self.lower_stmt(stmt)?;
        }
        self.out.close("}");
        Ok(())
    }

    /// A simple statement as a single expression, for `for` steps.
    fn inline(&mut self, stmt: &Stmt) -> Result<String, Error> {
        let saved = std::mem::take(&mut self.out);
        let result = self.lower_stmt(stmt);
        let inlined = std::mem::replace(&mut self.out, saved);
        result?;

        Ok(inlined
            .out
            .lines()
            .map(|line| line.trim().trim_end_matches(';'))
            .collect::<Vec<_>>()
            .join(", "))
    }

    fn assign(&mut self, target: &Expr, value: String) -> Result<(), Error> {
        match &target.kind {
            ExprKind::Symbol(_) => match access(self.unit, self.context, target)? {
                Access::Variable(slot) => {
                    self.out.line(format!("{} = {};", storage(&slot), value));
                    Ok(())
                }
                _ => Err(Error::internal("assignment to a function or module")),
            },
            _ => Err(Error::internal("unsupported assignment target")),
        }
    }
}

impl Lowering for Js<'_, '_> {
    type Value = String;

    fn lower_declaration(&mut self, stmt: &Stmt, declaration: &Declaration) -> Result<(), Error> {
        let value = self.lower_expr(&declaration.value)?;
        let resolution = self.unit.resolution();
        let assigned = resolution.assigned_of(stmt.id)?;
        let definer = resolution.context_of(stmt.id)?;

        match self
            .unit
            .closures
            .storage(resolution, self.context, definer, assigned)?
        {
            Storage::Local(assigned) => self.out.line(format!("var {} = {};", assigned, value)),
            other => self.out.line(format!("{} = {};", storage(&other), value)),
        }
        Ok(())
    }

    fn lower_assignment(&mut self, target: &Expr, value: &Expr) -> Result<(), Error> {
        match &target.kind {
            ExprKind::Member { base, member: name } => {
                let base_ty = self.expr_type(base)?;
                let base = self.lower_expr(base)?;
                let value = self.lower_expr(value)?;
                match member(&base_ty, name, self.session)? {
                    Member::Field { key, tuple: true, .. } => self.out.line(format!("{}[{}] = {};", base, key, value)),
                    Member::Field { key, .. } => self.out.line(format!("{}.{} = {};", base, key, value)),
                    _ => return Err(Error::internal("assignment to a non-field member")),
                }
                Ok(())
            }
            ExprKind::Subscript { base, index } => {
                let base = self.lower_expr(base)?;
                let index = self.lower_expr(index)?;
                let value = self.lower_expr(value)?;
                self.out.line(format!("{}[{}] = {};", base, index, value));
                Ok(())
            }
            _ => {
                let value = self.lower_expr(value)?;
                self.assign(target, value)
            }
        }
    }

    fn lower_expression_stmt(&mut self, expr: &Expr) -> Result<(), Error> {
        let value = self.lower_expr(expr)?;
        self.out.line(format!("{};", value));
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>) -> Result<(), Error> {
        match value {
            Some(value) => {
                let value = self.lower_expr(value)?;
                self.out.line(format!("return {};", value));
            }
            None => self.out.line("return;"),
        }
        Ok(())
    }

    fn lower_if(&mut self, condition: &Expr, consequent: &[Stmt], alternate: Option<&[Stmt]>) -> Result<(), Error> {
        let condition = self.lower_expr(condition)?;
        self.out.open(format!("if ({}) {{", condition));
        self.lower_body(consequent)?;
        if let Some(alternate) = alternate {
            self.out.close("} else {");
            self.out.indent += 1;
            self.lower_body(alternate)?;
        }
        self.out.close("}");
        Ok(())
    }

    fn lower_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<(), Error> {
        let condition = self.lower_expr(condition)?;
        self.out.open(format!("while ({}) {{", condition));
        self.loops.push(());
        self.lower_body(body)?;
        self.loops.pop();
        self.out.close("}");
        Ok(())
    }

    fn lower_do_while(&mut self, body: &[Stmt], condition: &Expr) -> Result<(), Error> {
        self.out.open("do {");
        self.loops.push(());
        self.lower_body(body)?;
        self.loops.pop();
        let condition = self.lower_expr(condition)?;
        self.out.close(format!("}} while ({});", condition));
        Ok(())
    }

    fn lower_for(&mut self, init: &Stmt, condition: &Expr, step: &Stmt, body: &[Stmt]) -> Result<(), Error> {
        self.lower_stmt(init)?;
        let condition = self.lower_expr(condition)?;
        let step = self.inline(step)?;
        self.out.open(format!("for (; {}; {}) {{", condition, step));
        self.loops.push(());
        self.lower_body(body)?;
        self.loops.pop();
        self.out.close("}");
        Ok(())
    }

    fn lower_loop_control(&mut self, stmt: &Stmt, control: LoopControl) -> Result<(), Error> {
        self.loops.innermost(stmt, control)?;
        self.out.line(format!("{};", control.keyword()));
        Ok(())
    }

    fn lower_literal(&mut self, _expr: &Expr, literal: &Literal) -> Result<String, Error> {
        Ok(match literal {
            Literal::Int(value) if *value < 0 => format!("({})", value),
            Literal::Int(value) => value.to_string(),
            Literal::Float(value) => float(*value),
            Literal::Bool(value) => value.to_string(),
            Literal::Null => String::from("null"),
            Literal::Str(text) => {
                let next = format!("$str{}", self.strings.len());
                self.strings.entry(text.clone()).or_insert(next).clone()
            }
        })
    }

    fn lower_symbol(&mut self, expr: &Expr) -> Result<String, Error> {
        Ok(match access(self.unit, self.context, expr)? {
            Access::Variable(slot) => storage(&slot),
            Access::Function {
                assigned,
                frame: path,
                signature,
            } => {
                let context = path.map(frame);
                self.reference(&assigned, &signature, context)
            }
            Access::Module => String::from("null"),
        })
    }

    fn lower_binary(&mut self, _expr: &Expr, op: BinaryOp, left: &Expr, right: &Expr) -> Result<String, Error> {
        let (left_ty, right_ty, overload) = binary_operands(self.unit.resolution(), self.session, op, left, right)?;
        let ty = if matches!(left_ty, Type::Null) { right_ty } else { left_ty };
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;

        Ok(match overload {
            Some(assigned) => format!("{}({}, {})", assigned, l, r),
            None => binary(op, &ty, &l, &r),
        })
    }

    fn lower_unary(&mut self, _expr: &Expr, op: UnaryOp, operand: &Expr) -> Result<String, Error> {
        let ty = self.expr_type(operand)?;
        let value = self.lower_expr(operand)?;

        Ok(match op {
            UnaryOp::Not => format!("(!{})", value),
            UnaryOp::Neg => wrap(&ty, format!("(-{})", value)),
            UnaryOp::BitNot => wrap(&ty, format!("(~{})", value)),
        })
    }

    fn lower_call(&mut self, _expr: &Expr, callee: &Expr, args: &[Expr]) -> Result<String, Error> {
        match call_target(self.unit, self.session, self.context, callee)? {
            CallTarget::Direct { assigned, frame: path } => {
                let mut values: Vec<String> = path.map(frame).into_iter().collect();
                values.extend(self.args(args)?);
                Ok(format!("{}({})", assigned, values.join(", ")))
            }
            CallTarget::Method { assigned, receiver } => {
                let mut values = vec![self.lower_expr(receiver)?];
                values.extend(self.args(args)?);
                Ok(format!("{}({})", assigned, values.join(", ")))
            }
            CallTarget::Foreign(name) if name == GET_NAN => Ok(String::from("NaN")),
            CallTarget::Foreign(name) => {
                let call = format!("Math.{}({})", name, self.args(args)?.join(", "));
                Ok(match name.as_str() {
                    "abs" | "ceil" | "floor" => format!("({} | 0)", call),
                    _ => call,
                })
            }
            CallTarget::External(external) => {
                let call = format!("$host(\"{}\")({})", external.function, self.args(args)?.join(", "));
                let ret = external.signature.as_ref().and_then(|signature| signature.ret.as_ref());
                Ok(match ret {
                    Some(ty) if ty.is_float() => format!("(+{})", call),
                    Some(ty) if ty.is_bool() => format!("(!!{})", call),
                    Some(ty) => wrap(ty, call),
                    None => call,
                })
            }
            CallTarget::Reference => {
                let mut values = vec![self.lower_expr(callee)?];
                values.extend(self.args(args)?);
                Ok(format!("$invoke({})", values.join(", ")))
            }
        }
    }

    fn lower_member(&mut self, _expr: &Expr, base: &Expr, name: &str) -> Result<String, Error> {
        let base_ty = self.expr_type(base)?;

        match member(&base_ty, name, self.session)? {
            Member::Field { key, tuple: true, .. } => Ok(format!("{}[{}]", self.lower_expr(base)?, key)),
            Member::Field { key, .. } => Ok(format!("{}.{}", self.lower_expr(base)?, key)),
            Member::Length => Ok(format!("{}.length", self.lower_expr(base)?)),
            Member::Method { assigned, signature } => {
                let receiver = self.lower_expr(base)?;
                Ok(self.reference(&assigned, &signature, Some(receiver)))
            }
            Member::Export(export) if export.function => Ok(self.reference(&export.assigned, &export.ty, None)),
            Member::Export(export) => Ok(export.assigned),
            Member::ForeignModule => Ok(String::from("Math")),
            Member::ForeignFunction(name) => Err(Error::internal(format!("foreign function {} used as a value", name))),
        }
    }

    fn lower_subscript(&mut self, _expr: &Expr, base: &Expr, index: &Expr) -> Result<String, Error> {
        let base = self.lower_expr(base)?;
        let index = self.lower_expr(index)?;
        Ok(format!("{}[{}]", base, index))
    }

    fn lower_tuple(&mut self, _expr: &Expr, elements: &[Expr]) -> Result<String, Error> {
        Ok(format!("[{}]", self.args(elements)?.join(", ")))
    }

    fn lower_new(&mut self, expr: &Expr, _ty: &TypeNode, args: &[Expr]) -> Result<String, Error> {
        let ty = self.expr_type(expr)?;

        match &ty {
            Type::Struct(object) => {
                let fields: Vec<String> = object
                    .fields()
                    .iter()
                    .map(|(name, ty)| format!("{}: {}", name, zero(ty)))
                    .collect();
                let literal = format!("{{{}}}", fields.join(", "));
                match &object.constructor {
                    Some(constructor) => Ok(format!(
                        "$construct({}, {}, [{}])",
                        literal,
                        constructor,
                        self.args(args)?.join(", ")
                    )),
                    None => Ok(literal),
                }
            }
            _ => {
                let element = ty
                    .element()
                    .ok_or_else(|| Error::internal(format!("cannot allocate {}", ty)))?;
                let length = self.args(args)?.join(", ");
                Ok(format!("$array({}, {})", length, zero(&element)))
            }
        }
    }

    fn lower_cast(&mut self, expr: &Expr, inner: &Expr, _ty: &TypeNode) -> Result<String, Error> {
        let from = self.expr_type(inner)?;
        let to = self.expr_type(expr)?;
        let value = self.lower_expr(inner)?;
        Ok(cast(&from, &to, value))
    }
}
