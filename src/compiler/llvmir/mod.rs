//! Native target: textual LLVM IR (typed pointers, LLVM 14).
//!
//! Heap values are `i8*` addressed by byte offsets from the layouts the
//! other flat-memory target uses; function references are `{ i8*, i8* }`
//! pairs of a function pointer and a context that is null for plain
//! functions. Booleans are `i1` in registers and `i8` in memory.

pub mod builder;
#[cfg(feature = "llvm")]
pub mod verify;

use std::{collections::HashSet, rc::Rc};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    ast::{
        expressions::{BinaryOp, Expr, ExprKind, Literal, UnaryOp},
        statements::{Declaration, Stmt},
        types::TypeNode,
    },
    errors::errors::{Error, ErrorImpl},
    resolver::{
        context::{ContextId, ROOT},
        foreign::{math_functions, GET_NAN},
    },
    session::{CompiledModule, Session},
    types::types::{Primitive, Type, ARRAY_HEADER_SIZE},
    Span,
};

use self::builder::{FunctionBuilder, Output};

use super::{
    closures::{FramePath, Storage, PARENT},
    lowering::{
        access, binary_operands, call_target, collect_functions, member, Access, CallTarget, FunctionItem,
        LoopControl, Loops, Lowering, Member, Unit,
    },
};

const FUNC: &str = "{ i8*, i8* }";
const CTORS: &str = "[1 x { i32, void ()*, i8* }]";

pub fn llvm_type(ty: &Type) -> &'static str {
    match ty {
        Type::Primitive(Primitive::Bool) => "i1",
        Type::Primitive(Primitive::Byte) => "i8",
        Type::Primitive(Primitive::Int | Primitive::UInt) => "i32",
        Type::Primitive(Primitive::Float) => "double",
        Type::Primitive(Primitive::SFloat) => "float",
        Type::Func(_) => FUNC,
        _ => "i8*",
    }
}

/// Booleans take a whole byte on the heap.
fn memory_type(ty: &Type) -> &'static str {
    if ty.is_bool() {
        "i8"
    } else {
        llvm_type(ty)
    }
}

fn return_type(ret: Option<&Type>) -> &'static str {
    ret.map_or("void", llvm_type)
}

fn zero(ty: &Type) -> &'static str {
    match ty {
        Type::Primitive(Primitive::Bool) => "false",
        Type::Primitive(Primitive::Float | Primitive::SFloat) => "0.0",
        Type::Primitive(_) => "0",
        Type::Func(_) => "zeroinitializer",
        _ => "null",
    }
}

fn default_return(ret: Option<&Type>) -> String {
    match ret {
        Some(ty) => format!("ret {} {}", llvm_type(ty), zero(ty)),
        None => String::from("ret void"),
    }
}

/// `ret (params)` of a function, with a leading `i8*` for the context or
/// receiver when `contextual`.
fn function_type(ret: Option<&Type>, params: &[Type], contextual: bool) -> String {
    let mut types: Vec<&str> = vec![];
    if contextual {
        types.push("i8*");
    }
    types.extend(params.iter().map(llvm_type));
    format!("{} ({})", return_type(ret), types.join(", "))
}

/// Doubles are printed by bit pattern so every value round-trips.
fn float(value: f64) -> String {
    format!("0x{:016X}", value.to_bits())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub ty: String,
    pub text: String,
}

impl Operand {
    fn new(ty: &str, text: impl Into<String>) -> Self {
        Operand {
            ty: ty.to_string(),
            text: text.into(),
        }
    }

    fn typed(&self) -> String {
        format!("{} {}", self.ty, self.text)
    }
}

/// Return and parameter types of a `declare`d function.
type Prototype = (&'static str, Vec<&'static str>);

/// Functions every program declares: the allocator and libm.
fn runtime_prototypes() -> IndexMap<&'static str, Prototype> {
    let mut prototypes = IndexMap::new();
    prototypes.insert("calloc", ("i8*", vec!["i64", "i64"]));
    for (function, signature) in math_functions() {
        let Some(signature) = signature.as_func() else {
            continue;
        };
        if function == GET_NAN {
            continue;
        }
        let ret = match function {
            "ceil" | "floor" => "double",
            _ => return_type(signature.ret.as_ref()),
        };
        prototypes.insert(function, (ret, signature.params.iter().map(llvm_type).collect()));
    }
    prototypes
}

fn declare(name: &str, (ret, params): &Prototype) -> String {
    format!("declare {} @{}({})", ret, name, params.join(", "))
}

#[derive(Debug, Default)]
struct Program {
    /// String literals to the global holding them.
    strings: IndexMap<String, String>,
    /// Host functions called through `foreign.external`.
    externals: IndexMap<String, Prototype>,
}

impl Program {
    /// Declares the host function `name`, which must agree with any
    /// earlier prototype of the same symbol.
    fn external(&mut self, name: &str, prototype: Prototype, span: &Span) -> Result<(), Error> {
        let runtime = runtime_prototypes();
        let existing = runtime.get(name).or_else(|| self.externals.get(name));
        match existing {
            Some(existing) if *existing != prototype => Err(Error::new(
                ErrorImpl::TypeMatchError {
                    expected: declare(name, existing),
                    received: declare(name, &prototype),
                },
                span.clone(),
            )),
            Some(_) => Ok(()),
            None => {
                self.externals.insert(name.to_string(), prototype);
                Ok(())
            }
        }
    }
}

struct Llvm<'a, 'm> {
    session: &'a mut Session,
    unit: &'a Unit<'m>,
    program: &'a mut Program,
    output: &'a mut Output,
    context: ContextId,
    locals: HashSet<String>,
    loops: Loops<(String, String)>,
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %root.module.name))]
pub fn emit(session: &mut Session, modules: &[Rc<CompiledModule>], root: &CompiledModule, name: &str) -> Result<String, Error> {
    let mut program = Program::default();
    let mut output = Output::default();
    let mut inits = vec![];

    for module in modules {
        let unit = Unit::new(module);
        let items = collect_functions(&unit, session)?;

        for (assigned, ty) in unit.globals() {
            output.global(format!("@{} = internal global {} {}", assigned, llvm_type(&ty), zero(&ty)));
        }

        let mut llvm = Llvm {
            session: &mut *session,
            unit: &unit,
            program: &mut program,
            output: &mut output,
            context: ROOT,
            locals: HashSet::new(),
            loops: Loops::default(),
        };
        for item in &items {
            llvm.function(item)?;
        }
        llvm.initializer()?;
        inits.push(module.resolution.init.clone());
    }

    output.begin(String::from("define internal void @$init()"));
    for init in &inits {
        output.current()?.emit(format!("call void @{}()", init));
    }
    output.end("ret void")?;

    for (export_name, export) in &root.ty.exports {
        exported(&mut output, &format!("{}_{}", name, export_name), export)?;
    }

    let mut preamble = vec![
        format!("; ModuleID = '{}'", name),
        format!("source_filename = \"{}\"", name),
        String::new(),
    ];
    for (function, prototype) in &runtime_prototypes() {
        preamble.push(declare(function, prototype));
    }
    for (function, prototype) in &program.externals {
        preamble.push(declare(function, prototype));
    }
    preamble.push(format!(
        "@llvm.global_ctors = appending global {} [{{ i32, void ()*, i8* }} {{ i32 65535, void ()* @$init, i8* null }}]",
        CTORS
    ));

    debug!(strings = program.strings.len(), "emitted llvm ir");
    output.finish(&preamble)
}

/// External wrapper `name` of an export of the root module.
fn exported(output: &mut Output, name: &str, export: &crate::types::types::Export) -> Result<(), Error> {
    if !export.function {
        let ty = llvm_type(&export.ty);
        output.begin(format!("define {} @{}()", ty, name));
        let function = output.current()?;
        let value = function.assign(format!("load {}, {}* @{}", ty, ty, export.assigned));
        function.terminate(format!("ret {} {}", ty, value));
        return output.end("unreachable");
    }

    let signature = export
        .ty
        .as_func()
        .ok_or_else(|| Error::internal(format!("exported function {} has no signature", name)))?;
    let params: Vec<String> = signature
        .params
        .iter()
        .enumerate()
        .map(|(index, ty)| format!("{} %a{}", llvm_type(ty), index))
        .collect();
    let ret = return_type(signature.ret.as_ref());

    output.begin(format!("define {} @{}({})", ret, name, params.join(", ")));
    let function = output.current()?;
    let call = format!("call {} @{}({})", ret, export.assigned, params.join(", "));
    if signature.ret.is_some() {
        let value = function.assign(call);
        function.terminate(format!("ret {} {}", ret, value));
    } else {
        function.emit(call);
        function.terminate("ret void");
    }
    output.end("unreachable")
}

impl Llvm<'_, '_> {
    fn f(&mut self) -> Result<&mut FunctionBuilder, Error> {
        self.output.current()
    }

    fn assign(&mut self, instruction: impl AsRef<str>) -> Result<String, Error> {
        Ok(self.f()?.assign(instruction))
    }

    fn emit(&mut self, instruction: impl Into<String>) -> Result<(), Error> {
        self.f()?.emit(instruction);
        Ok(())
    }

    fn jump(&mut self, label: &str) -> Result<(), Error> {
        let function = self.f()?;
        if !function.is_terminated() {
            function.terminate(format!("br label %{}", label));
        }
        Ok(())
    }

    fn labels<const N: usize>(&mut self) -> Result<[String; N], Error> {
        let function = self.f()?;
        Ok(std::array::from_fn(|_| function.fresh_label()))
    }

    fn expr_type(&self, expr: &Expr) -> Result<Type, Error> {
        Ok(self.unit.resolution().expr_type(expr)?.clone())
    }

    /// `null` stored where a function reference is expected becomes an
    /// empty pair.
    fn convert(&self, value: Operand, to: &Type) -> Operand {
        if matches!(to, Type::Func(_)) && value.ty != FUNC {
            Operand::new(FUNC, "zeroinitializer")
        } else {
            value
        }
    }

    /// Pointer to a `ty` slot `offset` bytes into `base`.
    fn address(&mut self, base: &Operand, offset: u32, ty: &Type) -> Result<String, Error> {
        let byte = self.assign(format!("getelementptr inbounds i8, i8* {}, i64 {}", base.text, offset))?;
        self.assign(format!("bitcast i8* {} to {}*", byte, memory_type(ty)))
    }

    fn element_address(&mut self, base: &Operand, index: &Operand, index_ty: &Type, ty: &Type) -> Result<String, Error> {
        let extend = if matches!(index_ty.as_primitive(), Some(Primitive::Int)) {
            "sext"
        } else {
            "zext"
        };
        let wide = self.assign(format!("{} {} to i64", extend, index.typed()))?;
        let scaled = self.assign(format!("mul i64 {}, {}", wide, ty.slot_size()))?;
        let offset = self.assign(format!("add i64 {}, {}", scaled, ARRAY_HEADER_SIZE))?;
        let byte = self.assign(format!("getelementptr inbounds i8, i8* {}, i64 {}", base.text, offset))?;
        self.assign(format!("bitcast i8* {} to {}*", byte, memory_type(ty)))
    }

    fn load(&mut self, pointer: &str, ty: &Type) -> Result<Operand, Error> {
        let stored = memory_type(ty);
        let value = self.assign(format!("load {}, {}* {}", stored, stored, pointer))?;
        if ty.is_bool() {
            let flag = self.assign(format!("trunc i8 {} to i1", value))?;
            return Ok(Operand::new("i1", flag));
        }
        Ok(Operand::new(stored, value))
    }

    fn store(&mut self, pointer: &str, ty: &Type, value: Operand) -> Result<(), Error> {
        let value = self.convert(value, ty);
        let value = if ty.is_bool() {
            Operand::new("i8", self.assign(format!("zext {} to i8", value.typed()))?)
        } else {
            value
        };
        self.emit(format!("store {}, {}* {}", value.typed(), memory_type(ty), pointer))
    }

    fn calloc(&mut self, size: Operand) -> Result<Operand, Error> {
        let pointer = self.assign(format!("call i8* @calloc(i64 1, {})", size.typed()))?;
        Ok(Operand::new("i8*", pointer))
    }

    fn frame_owner(&self, path: FramePath) -> Result<ContextId, Error> {
        let hops = match path {
            FramePath::Own => return Ok(self.context),
            FramePath::Up(hops) => hops + 1,
        };
        let mut owner = self.context;
        for _ in 0..hops {
            owner = self
                .unit
                .resolution()
                .context(owner)
                .parent
                .ok_or_else(|| Error::internal(format!("context {} has no parent", owner)))?;
        }
        Ok(owner)
    }

    fn frame_pointer(&mut self, path: FramePath) -> Result<Operand, Error> {
        let FramePath::Up(hops) = path else {
            return Ok(Operand::new("i8*", "%frame"));
        };

        let mut pointer = Operand::new("i8*", "%ctx");
        for hop in 0..hops {
            let owner = self.frame_owner(FramePath::Up(hop))?;
            let parent = self
                .unit
                .closures
                .frame(owner)
                .and_then(|frame| frame.get_layout().offset_of(PARENT))
                .ok_or_else(|| Error::internal(format!("frame of context {} has no parent link", owner)))?;
            let slot = self.address(&pointer, parent, &Type::Null)?;
            pointer = self.load(&slot, &Type::Null)?;
        }
        Ok(pointer)
    }

    fn frame_field(&mut self, path: FramePath, field: &str) -> Result<(String, Type), Error> {
        let owner = self.frame_owner(path)?;
        let frame = self
            .unit
            .closures
            .frame(owner)
            .cloned()
            .ok_or_else(|| Error::internal(format!("context {} has no frame", owner)))?;
        let ty = frame
            .fields()
            .get(field)
            .cloned()
            .ok_or_else(|| Error::internal(format!("{} is not in the frame of context {}", field, owner)))?;
        let offset = frame
            .get_layout()
            .offset_of(field)
            .ok_or_else(|| Error::internal(format!("{} has no offset", field)))?;
        let base = self.frame_pointer(path)?;
        Ok((self.address(&base, offset, &ty)?, ty))
    }

    fn read(&mut self, slot: Storage, ty: &Type) -> Result<Operand, Error> {
        match slot {
            Storage::Global(assigned) => {
                let stored = llvm_type(ty);
                let value = self.assign(format!("load {}, {}* @{}", stored, stored, assigned))?;
                Ok(Operand::new(stored, value))
            }
            Storage::Local(assigned) => {
                let stored = llvm_type(ty);
                let value = self.assign(format!("load {}, {}* %{}", stored, stored, assigned))?;
                Ok(Operand::new(stored, value))
            }
            Storage::Frame { path, field } => {
                let (pointer, ty) = self.frame_field(path, &field)?;
                self.load(&pointer, &ty)
            }
        }
    }

    fn write(&mut self, slot: Storage, ty: &Type, value: Operand) -> Result<(), Error> {
        match slot {
            Storage::Global(assigned) => {
                let value = self.convert(value, ty);
                self.emit(format!("store {}, {}* @{}", value.typed(), llvm_type(ty), assigned))
            }
            Storage::Local(assigned) => {
                if self.locals.insert(assigned.clone()) {
                    self.f()?.alloca(&format!("%{}", assigned), llvm_type(ty));
                }
                let value = self.convert(value, ty);
                self.emit(format!("store {}, {}* %{}", value.typed(), llvm_type(ty), assigned))
            }
            Storage::Frame { path, field } => {
                let (pointer, ty) = self.frame_field(path, &field)?;
                self.store(&pointer, &ty, value)
            }
        }
    }

    /// A `{ fn, context }` pair for `function`, whose LLVM type is
    /// `function_type`.
    fn reference(&mut self, function: &str, function_type: &str, context: Option<Operand>) -> Result<Operand, Error> {
        let pointer = format!("bitcast ({}* @{} to i8*)", function_type, function);
        let context = context.map_or(String::from("null"), |context| context.text);
        let half = self.assign(format!("insertvalue {} undef, i8* {}, 0", FUNC, pointer))?;
        let pair = self.assign(format!("insertvalue {} {}, i8* {}, 1", FUNC, half, context))?;
        Ok(Operand::new(FUNC, pair))
    }

    fn args(&mut self, args: &[Expr], params: &[Type]) -> Result<Vec<String>, Error> {
        let mut values = vec![];
        for (index, arg) in args.iter().enumerate() {
            let value = self.lower_expr(arg)?;
            let value = match params.get(index) {
                Some(param) => self.convert(value, param),
                None => value,
            };
            values.push(value.typed());
        }
        Ok(values)
    }

    fn call(&mut self, ret: Option<&Type>, callee: &str, args: &[String]) -> Result<Operand, Error> {
        let ret_ty = return_type(ret);
        let call = format!("call {} {}({})", ret_ty, callee, args.join(", "));
        match ret {
            Some(_) => Ok(Operand::new(ret_ty, self.assign(call)?)),
            None => {
                self.emit(call)?;
                Ok(Operand::new("void", ""))
            }
        }
    }

    fn function(&mut self, function: &FunctionItem) -> Result<(), Error> {
        self.context = function.context;
        self.locals.clear();
        self.loops = Loops::default();

        let mut params: Vec<String> = vec![];
        if function.takes_context {
            params.push(String::from("i8* %ctx"));
        }
        params.extend(
            function
                .params
                .iter()
                .map(|(assigned, ty)| format!("{} %arg{}", llvm_type(ty), assigned)),
        );
        self.output.begin(format!(
            "define internal {} @{}({})",
            return_type(function.ret.as_ref()),
            function.assigned,
            params.join(", ")
        ));

        let frame = self.unit.closures.frame(function.context).cloned();
        if let Some(frame) = &frame {
            let size = frame.get_layout().size().max(1);
            self.emit(format!("%frame = call i8* @calloc(i64 1, i64 {})", size))?;
            let base = Operand::new("i8*", "%frame");
            for entry in frame.get_layout().entries() {
                let value = if entry.key == PARENT {
                    Operand::new("i8*", "%ctx")
                } else if function.params.iter().any(|(param, _)| *param == entry.key) {
                    Operand::new(llvm_type(&entry.ty), format!("%arg{}", entry.key))
                } else {
                    continue;
                };
                let pointer = self.address(&base, entry.offset, &entry.ty)?;
                self.store(&pointer, &entry.ty, value)?;
            }
        }
        for (assigned, ty) in &function.params {
            if frame.as_ref().is_some_and(|frame| frame.fields().contains_key(assigned)) {
                continue;
            }
            let value = Operand::new(llvm_type(ty), format!("%arg{}", assigned));
            self.write(Storage::Local(assigned.clone()), ty, value)?;
        }

        self.lower_body(&function.decl.body)?;
        self.output.end(&default_return(function.ret.as_ref()))
    }

    fn initializer(&mut self) -> Result<(), Error> {
        self.context = ROOT;
        self.locals.clear();
        self.loops = Loops::default();

        self.output
            .begin(format!("define internal void @{}()", self.unit.resolution().init));
        for stmt in self.unit.initializer() {
            self.lower_stmt(stmt)?;
        }
        self.output.end("ret void")
    }

    fn loop_body(&mut self, body: &[Stmt], exit: &str, next: &str) -> Result<(), Error> {
        self.loops.push((exit.to_string(), next.to_string()));
        let result = self.lower_body(body);
        self.loops.pop();
        result
    }

    fn short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Operand, Error> {
        let l = self.lower_expr(left)?;
        let [rhs, end] = self.labels::<2>()?;
        let from = self.f()?.current_label().to_string();
        let (on_true, on_false, decided) = if op == BinaryOp::And {
            (&rhs, &end, "false")
        } else {
            (&end, &rhs, "true")
        };
        self.f()?
            .terminate(format!("br i1 {}, label %{}, label %{}", l.text, on_true, on_false));

        self.f()?.start_block(&rhs);
        let r = self.lower_expr(right)?;
        let tail = self.f()?.current_label().to_string();
        self.jump(&end)?;

        self.f()?.start_block(&end);
        let joined = self.assign(format!(
            "phi i1 [ {}, %{} ], [ {}, %{} ]",
            decided, from, r.text, tail
        ))?;
        Ok(Operand::new("i1", joined))
    }

    fn compare(&mut self, op: BinaryOp, ty: &Type, l: Operand, r: Operand) -> Result<Operand, Error> {
        if matches!(ty, Type::Func(_)) {
            let l = self.convert(l, ty);
            let r = self.convert(r, ty);
            let mut same = vec![];
            for field in 0..2 {
                let a = self.assign(format!("extractvalue {}, {}", l.typed(), field))?;
                let b = self.assign(format!("extractvalue {}, {}", r.typed(), field))?;
                same.push(self.assign(format!("icmp eq i8* {}, {}", a, b))?);
            }
            let both = self.assign(format!("and i1 {}, {}", same[0], same[1]))?;
            if op == BinaryOp::Ne {
                return Ok(Operand::new("i1", self.assign(format!("xor i1 {}, true", both))?));
            }
            return Ok(Operand::new("i1", both));
        }

        let predicate = match (ty.as_primitive(), op) {
            (Some(Primitive::Float | Primitive::SFloat), _) => match op {
                BinaryOp::Eq => "fcmp oeq",
                BinaryOp::Ne => "fcmp une",
                BinaryOp::Lt => "fcmp olt",
                BinaryOp::Le => "fcmp ole",
                BinaryOp::Gt => "fcmp ogt",
                _ => "fcmp oge",
            },
            (_, BinaryOp::Eq) => "icmp eq",
            (_, BinaryOp::Ne) => "icmp ne",
            (Some(Primitive::Int), _) => match op {
                BinaryOp::Lt => "icmp slt",
                BinaryOp::Le => "icmp sle",
                BinaryOp::Gt => "icmp sgt",
                _ => "icmp sge",
            },
            _ => match op {
                BinaryOp::Lt => "icmp ult",
                BinaryOp::Le => "icmp ule",
                BinaryOp::Gt => "icmp ugt",
                _ => "icmp uge",
            },
        };
        let operand_ty = if l.ty == "i8*" || r.ty == "i8*" { "i8*" } else { l.ty.as_str() };
        let result = self.assign(format!("{} {} {}, {}", predicate, operand_ty, l.text, r.text))?;
        Ok(Operand::new("i1", result))
    }

    fn arithmetic(&mut self, op: BinaryOp, ty: &Type, l: Operand, r: Operand) -> Result<Operand, Error> {
        let primitive = ty
            .as_primitive()
            .ok_or_else(|| Error::internal(format!("arithmetic on {}", ty)))?;
        let llvm = llvm_type(ty);

        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            let shift = match (op, primitive) {
                (BinaryOp::Shr, Primitive::Int) => "ashr",
                (BinaryOp::Shr, _) => "lshr",
                _ => "shl",
            };
            if primitive == Primitive::Byte {
                let wide_l = self.assign(format!("zext i8 {} to i32", l.text))?;
                let wide_r = self.assign(format!("zext i8 {} to i32", r.text))?;
                let count = self.assign(format!("and i32 {}, 31", wide_r))?;
                let shifted = self.assign(format!("{} i32 {}, {}", shift, wide_l, count))?;
                return Ok(Operand::new("i8", self.assign(format!("trunc i32 {} to i8", shifted))?));
            }
            let count = self.assign(format!("and i32 {}, 31", r.text))?;
            return Ok(Operand::new(llvm, self.assign(format!("{} i32 {}, {}", shift, l.text, count))?));
        }

        let float = matches!(primitive, Primitive::Float | Primitive::SFloat);
        if !float && matches!(op, BinaryOp::Div | BinaryOp::Mod) {
            return self.guarded_division(op, primitive, llvm, l, r);
        }

        let instruction = match primitive {
            Primitive::Float | Primitive::SFloat => match op {
                BinaryOp::Add => "fadd",
                BinaryOp::Sub => "fsub",
                BinaryOp::Mul => "fmul",
                BinaryOp::Div => "fdiv",
                BinaryOp::Mod => "frem",
                _ => return Err(Error::internal(format!("{} on {}", op, ty))),
            },
            Primitive::Int => match op {
                BinaryOp::Add => "add nsw",
                BinaryOp::Sub => "sub nsw",
                BinaryOp::Mul => "mul nsw",
                BinaryOp::BitAnd => "and",
                BinaryOp::BitOr => "or",
                _ => "xor",
            },
            _ => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::BitAnd => "and",
                BinaryOp::BitOr => "or",
                _ => "xor",
            },
        };
        let result = self.assign(format!("{} {} {}, {}", instruction, llvm, l.text, r.text))?;
        Ok(Operand::new(llvm, result))
    }

    /// Integer `/` and `%` that never trap: a zero divisor yields 0, and
    /// `int` division by -1 negates with wrap-around.
    fn guarded_division(
        &mut self,
        op: BinaryOp,
        primitive: Primitive,
        llvm: &str,
        l: Operand,
        r: Operand,
    ) -> Result<Operand, Error> {
        let signed = primitive == Primitive::Int;
        let zero = self.assign(format!("icmp eq {} {}, 0", llvm, r.text))?;
        let (unsafe_divisor, negative) = if signed {
            let negative = self.assign(format!("icmp eq {} {}, -1", llvm, r.text))?;
            (self.assign(format!("or i1 {}, {}", zero, negative))?, Some(negative))
        } else {
            (zero, None)
        };
        let divisor = self.assign(format!("select i1 {}, {} 1, {} {}", unsafe_divisor, llvm, llvm, r.text))?;

        let instruction = match (op, signed) {
            (BinaryOp::Div, true) => "sdiv",
            (BinaryOp::Div, false) => "udiv",
            (_, true) => "srem",
            _ => "urem",
        };
        let quotient = self.assign(format!("{} {} {}, {}", instruction, llvm, l.text, divisor))?;

        let fallback = match (op, negative) {
            (BinaryOp::Div, Some(negative)) => {
                let negated = self.assign(format!("sub {} 0, {}", llvm, l.text))?;
                self.assign(format!("select i1 {}, {} {}, {} 0", negative, llvm, negated, llvm))?
            }
            _ => String::from("0"),
        };
        let result = self.assign(format!(
            "select i1 {}, {} {}, {} {}",
            unsafe_divisor, llvm, fallback, llvm, quotient
        ))?;
        Ok(Operand::new(llvm, result))
    }

    fn cast(&mut self, value: Operand, from: &Type, to: &Type) -> Result<Operand, Error> {
        let (Some(source), Some(target)) = (from.as_primitive(), to.as_primitive()) else {
            return Ok(value);
        };
        let llvm = llvm_type(to);
        let float = |p: Primitive| matches!(p, Primitive::Float | Primitive::SFloat);

        let instruction = match (source, target) {
            _ if source == target => return Ok(value),
            (Primitive::Int | Primitive::UInt, Primitive::Int | Primitive::UInt) => {
                return Ok(Operand::new(llvm, value.text))
            }
            (_, Primitive::Bool) if float(source) => format!("fcmp une {}, 0.0", value.typed()),
            (_, Primitive::Bool) => format!("icmp ne {}, 0", value.typed()),
            (Primitive::Bool, _) if float(target) => format!("uitofp {} to {}", value.typed(), llvm),
            (Primitive::Bool | Primitive::Byte, _) if !float(target) => format!("zext {} to {}", value.typed(), llvm),
            (Primitive::Int | Primitive::UInt, Primitive::Byte) => format!("trunc {} to i8", value.typed()),
            (Primitive::Int, _) => format!("sitofp {} to {}", value.typed(), llvm),
            (Primitive::UInt | Primitive::Byte, _) => format!("uitofp {} to {}", value.typed(), llvm),
            (Primitive::Float, Primitive::SFloat) => format!("fptrunc {} to float", value.typed()),
            (Primitive::SFloat, Primitive::Float) => format!("fpext {} to double", value.typed()),
            (_, Primitive::Byte) => {
                let wide = self.assign(format!("fptosi {} to i32", value.typed()))?;
                format!("trunc i32 {} to i8", wide)
            }
            (_, Primitive::UInt) => format!("fptoui {} to i32", value.typed()),
            _ => format!("fptosi {} to i32", value.typed()),
        };
        Ok(Operand::new(llvm, self.assign(instruction)?))
    }
}

impl Lowering for Llvm<'_, '_> {
    type Value = Operand;

    fn lower_declaration(&mut self, stmt: &Stmt, declaration: &Declaration) -> Result<(), Error> {
        let resolution = self.unit.resolution();
        let ty = match &declaration.ty {
            Some(node) => resolution.type_of(node)?.clone(),
            None => resolution.expr_type(&declaration.value)?.clone(),
        };
        let value = self.lower_expr(&declaration.value)?;
        let assigned = resolution.assigned_of(stmt.id)?;
        let definer = resolution.context_of(stmt.id)?;
        let slot = self
            .unit
            .closures
            .storage(resolution, self.context, definer, assigned)?;
        self.write(slot, &ty, value)
    }

    fn lower_assignment(&mut self, target: &Expr, assigned: &Expr) -> Result<(), Error> {
        let ty = self.expr_type(target)?;

        match &target.kind {
            ExprKind::Member { base, member: name } => {
                let base_ty = self.expr_type(base)?;
                let Member::Field { offset, .. } = member(&base_ty, name, self.session)? else {
                    return Err(Error::internal("assignment to a non-field member"));
                };
                let base = self.lower_expr(base)?;
                let value = self.lower_expr(assigned)?;
                let pointer = self.address(&base, offset, &ty)?;
                self.store(&pointer, &ty, value)
            }
            ExprKind::Subscript { base, index } => {
                let index_ty = self.expr_type(index)?;
                let base = self.lower_expr(base)?;
                let index = self.lower_expr(index)?;
                let value = self.lower_expr(assigned)?;
                let pointer = self.element_address(&base, &index, &index_ty, &ty)?;
                self.store(&pointer, &ty, value)
            }
            ExprKind::Symbol(_) => {
                let Access::Variable(slot) = access(self.unit, self.context, target)? else {
                    return Err(Error::internal("assignment to a function or module"));
                };
                let value = self.lower_expr(assigned)?;
                self.write(slot, &ty, value)
            }
            _ => Err(Error::internal("unsupported assignment target")),
        }
    }

    fn lower_expression_stmt(&mut self, expr: &Expr) -> Result<(), Error> {
        self.lower_expr(expr).map(|_| ())
    }

    fn lower_return(&mut self, returned: Option<&Expr>) -> Result<(), Error> {
        let Some(returned) = returned else {
            self.f()?.terminate("ret void");
            return Ok(());
        };
        let ty = self
            .unit
            .resolution()
            .context(self.context)
            .return_type
            .clone()
            .ok_or_else(|| Error::internal("return with a value from a function without a return type"))?;
        let value = self.lower_expr(returned)?;
        let value = self.convert(value, &ty);
        self.f()?.terminate(format!("ret {}", value.typed()));
        Ok(())
    }

    fn lower_if(&mut self, condition: &Expr, consequent: &[Stmt], alternate: Option<&[Stmt]>) -> Result<(), Error> {
        let condition = self.lower_expr(condition)?;
        let [then, otherwise, end] = self.labels::<3>()?;
        let on_false = if alternate.is_some() { &otherwise } else { &end };
        self.f()?
            .terminate(format!("br i1 {}, label %{}, label %{}", condition.text, then, on_false));

        self.f()?.start_block(&then);
        self.lower_body(consequent)?;
        self.jump(&end)?;

        if let Some(alternate) = alternate {
            self.f()?.start_block(&otherwise);
            self.lower_body(alternate)?;
            self.jump(&end)?;
        }
        self.f()?.start_block(&end);
        Ok(())
    }

    fn lower_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<(), Error> {
        let [test, repeat, end] = self.labels::<3>()?;
        self.f()?.start_block(&test);
        let condition = self.lower_expr(condition)?;
        self.f()?
            .terminate(format!("br i1 {}, label %{}, label %{}", condition.text, repeat, end));

        self.f()?.start_block(&repeat);
        self.loop_body(body, &end, &test)?;
        self.jump(&test)?;
        self.f()?.start_block(&end);
        Ok(())
    }

    fn lower_do_while(&mut self, body: &[Stmt], condition: &Expr) -> Result<(), Error> {
        let [repeat, test, end] = self.labels::<3>()?;
        self.f()?.start_block(&repeat);
        self.loop_body(body, &end, &test)?;

        self.f()?.start_block(&test);
        let condition = self.lower_expr(condition)?;
        self.f()?
            .terminate(format!("br i1 {}, label %{}, label %{}", condition.text, repeat, end));
        self.f()?.start_block(&end);
        Ok(())
    }

    fn lower_for(&mut self, init: &Stmt, condition: &Expr, step: &Stmt, body: &[Stmt]) -> Result<(), Error> {
        self.lower_stmt(init)?;
        let [test, repeat, next, end] = self.labels::<4>()?;
        self.f()?.start_block(&test);
        let condition = self.lower_expr(condition)?;
        self.f()?
            .terminate(format!("br i1 {}, label %{}, label %{}", condition.text, repeat, end));

        self.f()?.start_block(&repeat);
        self.loop_body(body, &end, &next)?;
        self.f()?.start_block(&next);
        self.lower_stmt(step)?;
        self.jump(&test)?;
        self.f()?.start_block(&end);
        Ok(())
    }

    fn lower_loop_control(&mut self, stmt: &Stmt, control: LoopControl) -> Result<(), Error> {
        let (exit, next) = self.loops.innermost(stmt, control)?.clone();
        let label = match control {
            LoopControl::Break => exit,
            LoopControl::Continue => next,
        };
        self.f()?.terminate(format!("br label %{}", label));
        Ok(())
    }

    fn lower_literal(&mut self, _expr: &Expr, literal: &Literal) -> Result<Operand, Error> {
        Ok(match literal {
            Literal::Int(number) => Operand::new("i32", number.to_string()),
            Literal::Float(number) => Operand::new("double", float(*number)),
            Literal::Bool(flag) => Operand::new("i1", flag.to_string()),
            Literal::Null => Operand::new("i8*", "null"),
            Literal::Str(text) => {
                let units: Vec<u16> = text.encode_utf16().collect();
                let ty = format!("{{ i32, i32, [{} x i32] }}", units.len());
                let next = format!("@.str.{}", self.program.strings.len());
                let global = match self.program.strings.get(text) {
                    Some(global) => global.clone(),
                    None => {
                        let elements = if units.is_empty() {
                            String::from("zeroinitializer")
                        } else {
                            let values: Vec<String> = units.iter().map(|unit| format!("i32 {}", unit)).collect();
                            format!("[{}]", values.join(", "))
                        };
                        self.output.global(format!(
                            "{} = private global {} {{ i32 {}, i32 0, [{} x i32] {} }}, align 8",
                            next,
                            ty,
                            units.len(),
                            units.len(),
                            elements
                        ));
                        self.program.strings.insert(text.clone(), next.clone());
                        next
                    }
                };
                Operand::new("i8*", format!("bitcast ({}* {} to i8*)", ty, global))
            }
        })
    }

    fn lower_symbol(&mut self, expr: &Expr) -> Result<Operand, Error> {
        match access(self.unit, self.context, expr)? {
            Access::Variable(slot) => {
                let ty = self.expr_type(expr)?;
                self.read(slot, &ty)
            }
            Access::Function {
                assigned,
                frame,
                signature,
            } => {
                self.session
                    .func_lists
                    .register(&signature, frame.is_some(), &assigned);
                let func = signature
                    .as_func()
                    .ok_or_else(|| Error::internal(format!("{} has no signature", assigned)))?;
                let function_type = function_type(func.ret.as_ref(), &func.params, frame.is_some());
                let context = frame.map(|path| self.frame_pointer(path)).transpose()?;
                self.reference(&assigned, &function_type, context)
            }
            Access::Module => Ok(Operand::new("i8*", "null")),
        }
    }

    fn lower_binary(&mut self, _expr: &Expr, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Operand, Error> {
        let (left_ty, right_ty, overload) = binary_operands(self.unit.resolution(), self.session, op, left, right)?;

        if let Some(assigned) = overload {
            let ret = self
                .session
                .signature(&assigned)
                .and_then(Type::as_func)
                .and_then(|signature| signature.ret.clone());
            let l = self.lower_expr(left)?;
            let r = self.lower_expr(right)?;
            let args = [self.convert(l, &left_ty).typed(), self.convert(r, &right_ty).typed()];
            return self.call(ret.as_ref(), &format!("@{}", assigned), &args);
        }
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.short_circuit(op, left, right);
        }

        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        let ty = if matches!(left_ty, Type::Null) { right_ty } else { left_ty };
        if op.is_comparison() {
            self.compare(op, &ty, l, r)
        } else {
            self.arithmetic(op, &ty, l, r)
        }
    }

    fn lower_unary(&mut self, _expr: &Expr, op: UnaryOp, operand: &Expr) -> Result<Operand, Error> {
        let ty = self.expr_type(operand)?;
        let value = self.lower_expr(operand)?;
        let llvm = llvm_type(&ty);

        let instruction = match (op, ty.as_primitive()) {
            (UnaryOp::Not, _) => format!("xor i1 {}, true", value.text),
            (UnaryOp::Neg, Some(Primitive::Float | Primitive::SFloat)) => format!("fneg {}", value.typed()),
            (UnaryOp::Neg, Some(Primitive::Int)) => format!("sub nsw i32 0, {}", value.text),
            (UnaryOp::Neg, _) => format!("sub {} 0, {}", llvm, value.text),
            (UnaryOp::BitNot, _) => format!("xor {}, -1", value.typed()),
        };
        Ok(Operand::new(llvm, self.assign(instruction)?))
    }

    fn lower_call(&mut self, _expr: &Expr, callee: &Expr, args: &[Expr]) -> Result<Operand, Error> {
        let signature = self.expr_type(callee)?;
        let func = signature
            .as_func()
            .ok_or_else(|| Error::internal(format!("call of {}", signature)))?
            .clone();

        match call_target(self.unit, self.session, self.context, callee)? {
            CallTarget::Direct { assigned, frame } => {
                let mut values = vec![];
                if let Some(path) = frame {
                    values.push(self.frame_pointer(path)?.typed());
                }
                values.extend(self.args(args, &func.params)?);
                self.call(func.ret.as_ref(), &format!("@{}", assigned), &values)
            }
            CallTarget::Method { assigned, receiver } => {
                let mut values = vec![self.lower_expr(receiver)?.typed()];
                values.extend(self.args(args, &func.params)?);
                self.call(func.ret.as_ref(), &format!("@{}", assigned), &values)
            }
            CallTarget::Foreign(name) if name == GET_NAN => Ok(Operand::new("double", float(f64::NAN))),
            CallTarget::Foreign(name) => {
                let values = self.args(args, &func.params)?;
                match name.as_str() {
                    "ceil" | "floor" => {
                        let rounded = self.call(Some(&Type::FLOAT), &format!("@{}", name), &values)?;
                        let int = self.assign(format!("fptosi {} to i32", rounded.typed()))?;
                        Ok(Operand::new("i32", int))
                    }
                    _ => self.call(func.ret.as_ref(), &format!("@{}", name), &values),
                }
            }
            CallTarget::External(external) => {
                let prototype = (
                    return_type(func.ret.as_ref()),
                    func.params.iter().map(llvm_type).collect(),
                );
                self.program.external(&external.function, prototype, &callee.span)?;
                let values = self.args(args, &func.params)?;
                self.call(func.ret.as_ref(), &format!("@{}", external.function), &values)
            }
            CallTarget::Reference => {
                let reference = self.lower_expr(callee)?;
                let values = self.args(args, &func.params)?;
                let pointer = self.assign(format!("extractvalue {}, 0", reference.typed()))?;
                let context = self.assign(format!("extractvalue {}, 1", reference.typed()))?;
                let plain = self.assign(format!("icmp eq i8* {}, null", context))?;
                let [direct, bound, end] = self.labels::<3>()?;
                self.f()?
                    .terminate(format!("br i1 {}, label %{}, label %{}", plain, direct, bound));

                self.f()?.start_block(&direct);
                let plain_type = function_type(func.ret.as_ref(), &func.params, false);
                let target = self.assign(format!("bitcast i8* {} to {}*", pointer, plain_type))?;
                let first = self.call(func.ret.as_ref(), &target, &values)?;
                self.jump(&end)?;

                self.f()?.start_block(&bound);
                let bound_type = function_type(func.ret.as_ref(), &func.params, true);
                let target = self.assign(format!("bitcast i8* {} to {}*", pointer, bound_type))?;
                let mut bound_values = vec![format!("i8* {}", context)];
                bound_values.extend(values);
                let second = self.call(func.ret.as_ref(), &target, &bound_values)?;
                self.jump(&end)?;

                self.f()?.start_block(&end);
                match func.ret.as_ref() {
                    Some(ret) => {
                        let joined = self.assign(format!(
                            "phi {} [ {}, %{} ], [ {}, %{} ]",
                            llvm_type(ret),
                            first.text,
                            direct,
                            second.text,
                            bound
                        ))?;
                        Ok(Operand::new(llvm_type(ret), joined))
                    }
                    None => Ok(Operand::new("void", "")),
                }
            }
        }
    }

    fn lower_member(&mut self, expr: &Expr, base: &Expr, name: &str) -> Result<Operand, Error> {
        let base_ty = self.expr_type(base)?;

        match member(&base_ty, name, self.session)? {
            Member::Field { ty, offset, .. } => {
                let base = self.lower_expr(base)?;
                let pointer = self.address(&base, offset, &ty)?;
                self.load(&pointer, &ty)
            }
            Member::Length => {
                let base = self.lower_expr(base)?;
                let pointer = self.address(&base, 0, &Type::INT)?;
                self.load(&pointer, &Type::INT)
            }
            Member::Method { assigned, signature } => {
                self.session.func_lists.register(&signature, true, &assigned);
                let func = signature
                    .as_func()
                    .ok_or_else(|| Error::internal(format!("method {} has no signature", name)))?;
                let function_type = function_type(func.ret.as_ref(), &func.params, true);
                let receiver = self.lower_expr(base)?;
                self.reference(&assigned, &function_type, Some(receiver))
            }
            Member::Export(export) if export.function => {
                self.session
                    .func_lists
                    .register(&export.ty, false, &export.assigned);
                let func = export
                    .ty
                    .as_func()
                    .ok_or_else(|| Error::internal(format!("export {} has no signature", name)))?;
                let function_type = function_type(func.ret.as_ref(), &func.params, false);
                self.reference(&export.assigned, &function_type, None)
            }
            Member::Export(export) => {
                let ty = self.expr_type(expr)?;
                self.read(Storage::Global(export.assigned), &ty)
            }
            Member::ForeignModule => Ok(Operand::new("i8*", "null")),
            Member::ForeignFunction(name) => Err(Error::internal(format!("foreign function {} used as a value", name))),
        }
    }

    fn lower_subscript(&mut self, expr: &Expr, base: &Expr, index: &Expr) -> Result<Operand, Error> {
        let ty = self.expr_type(expr)?;
        let index_ty = self.expr_type(index)?;
        let base = self.lower_expr(base)?;
        let index = self.lower_expr(index)?;
        let pointer = self.element_address(&base, &index, &index_ty, &ty)?;
        self.load(&pointer, &ty)
    }

    fn lower_tuple(&mut self, expr: &Expr, elements: &[Expr]) -> Result<Operand, Error> {
        let Type::Tuple(tuple) = self.expr_type(expr)? else {
            return Err(Error::internal("tuple expression without a tuple type"));
        };
        let mut values = vec![];
        for element in elements {
            values.push(self.lower_expr(element)?);
        }

        let layout = tuple.get_layout();
        let object = self.calloc(Operand::new("i64", layout.size().max(1).to_string()))?;
        for (index, (value, ty)) in values.into_iter().zip(&tuple.elements).enumerate() {
            let offset = layout
                .offset_of(&index.to_string())
                .ok_or_else(|| Error::internal(format!("tuple has no element {}", index)))?;
            let pointer = self.address(&object, offset, ty)?;
            self.store(&pointer, ty, value)?;
        }
        Ok(object)
    }

    fn lower_new(&mut self, expr: &Expr, _ty: &TypeNode, args: &[Expr]) -> Result<Operand, Error> {
        let ty = self.expr_type(expr)?;

        if let Type::Struct(object) = &ty {
            let size = object.get_layout().size().max(1);
            let instance = self.calloc(Operand::new("i64", size.to_string()))?;
            if let Some(constructor) = &object.constructor {
                let signature = self
                    .session
                    .signature(constructor)
                    .and_then(Type::as_func)
                    .cloned()
                    .ok_or_else(|| Error::internal(format!("constructor {} has no signature", constructor)))?;
                let mut values = vec![instance.typed()];
                values.extend(self.args(args, signature.params.get(1..).unwrap_or_default())?);
                self.call(signature.ret.as_ref(), &format!("@{}", constructor), &values)?;
            }
            return Ok(instance);
        }

        let element = ty
            .element()
            .ok_or_else(|| Error::internal(format!("cannot allocate {}", ty)))?;
        let length_expr = args
            .first()
            .ok_or_else(|| Error::internal("array allocation without a length"))?;
        let length_ty = self.expr_type(length_expr)?;
        let length = self.lower_expr(length_expr)?;
        let length = self.cast(length, &length_ty, &Type::INT)?;

        let wide = self.assign(format!("sext {} to i64", length.typed()))?;
        let bytes = self.assign(format!("mul i64 {}, {}", wide, element.slot_size()))?;
        let total = self.assign(format!("add i64 {}, {}", bytes, ARRAY_HEADER_SIZE))?;
        let array = self.calloc(Operand::new("i64", total))?;
        let header = self.address(&array, 0, &Type::INT)?;
        self.store(&header, &Type::INT, length)?;
        Ok(array)
    }

    fn lower_cast(&mut self, expr: &Expr, inner: &Expr, _ty: &TypeNode) -> Result<Operand, Error> {
        let from = self.expr_type(inner)?;
        let to = self.expr_type(expr)?;
        let value = self.lower_expr(inner)?;
        self.cast(value, &from, &to)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_type_mapping() {
        assert_eq!(llvm_type(&Type::BOOL), "i1");
        assert_eq!(memory_type(&Type::BOOL), "i8");
        assert_eq!(llvm_type(&Type::SFLOAT), "float");
        assert_eq!(llvm_type(&Type::Str), "i8*");
        assert_eq!(llvm_type(&Type::func(None, vec![])), FUNC);
    }

    #[test]
    fn test_function_types() {
        assert_eq!(function_type(Some(&Type::INT), &[Type::FLOAT], false), "i32 (double)");
        assert_eq!(function_type(None, &[Type::INT], true), "void (i8*, i32)");
    }

    #[test]
    fn test_floats_print_exactly() {
        assert_eq!(float(1.0), "0x3FF0000000000000");
        assert_eq!(float(0.1), "0x3FB999999999999A");
    }
}
