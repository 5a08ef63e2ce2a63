//! Flat-memory target: an asm.js module over one `ArrayBuffer`.
//!
//! Every value is an int, a double or a float. Objects, tuples, arrays,
//! closure frames and function references live on the heap and are passed
//! around as byte addresses. A function reference points at a
//! `[slot, context]` pair; calls through it go to a per-signature
//! dispatcher that picks the plain or the contextual function table.

pub mod builder;

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
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
        foreign::{math_functions, GET_NAN},
    },
    session::{CompiledModule, Session},
    types::types::{Primitive, TupleType, Type, ARRAY_HEADER_SIZE},
};

use self::builder::{dispatcher, dispatcher_name, tables, Builder, Fragment};

use super::{
    closures::{FramePath, Storage, PARENT},
    config::{EnvConstant, EnvConstants, BUDDY_SPACE},
    lowering::{
        access, binary_operands, call_target, collect_functions, member, Access, CallTarget, FunctionItem,
        LoopControl, Loops, Lowering, Member, Unit,
    },
};

const RUNTIME: &str = r#"function $alloc(size) {
    size = size | 0;
    var address = 0;
    address = $top;
    $top = ($top + size + 7 | 0) & -8;
    return address | 0;
}
function $array(length, size) {
    length = length | 0;
    size = size | 0;
    var address = 0;
    address = $alloc((imul(length, size) | 0) + 8 | 0) | 0;
    HEAP32[address >> 2] = length;
    return address | 0;
}
function $ref(slot, ctx) {
    slot = slot | 0;
    ctx = ctx | 0;
    var address = 0;
    address = $alloc(8) | 0;
    HEAP32[address >> 2] = slot;
    HEAP32[address + 4 >> 2] = ctx;
    return address | 0;
}
function $same(a, b) {
    a = a | 0;
    b = b | 0;
    if ((a | 0) == (b | 0)) {
        return 1;
    }
    if ((a | 0) == 0 | (b | 0) == 0) {
        return 0;
    }
    return ((HEAP32[a >> 2] | 0) == (HEAP32[b >> 2] | 0)) & ((HEAP32[a + 4 >> 2] | 0) == (HEAP32[b + 4 >> 2] | 0)) | 0;
}"#;

const VIEWS: [(&str, &str); 6] = [
    ("HEAP8", "Int8Array"),
    ("HEAPU8", "Uint8Array"),
    ("HEAP32", "Int32Array"),
    ("HEAPU32", "Uint32Array"),
    ("HEAPF32", "Float32Array"),
    ("HEAPF64", "Float64Array"),
];

/// Length of the bracketed group at the start of `text`.
fn group(text: &str) -> Option<usize> {
    if !text.starts_with(['(', '[']) {
        return None;
    }
    let mut depth = 0;
    for (position, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(position + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Wraps `text` in parentheses unless it already binds tightest: a name or
/// number followed by any chain of calls and subscripts, or a
/// parenthesized expression.
fn atom(text: &str) -> String {
    let name = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '$' || c == '_' || c == '.'))
        .unwrap_or(text.len());
    let mut rest = &text[name..];
    let mut atomic = name > 0 || rest.starts_with('(');

    while atomic && !rest.is_empty() {
        match group(rest) {
            Some(end) => rest = &rest[end..],
            None => atomic = false,
        }
    }

    if atomic {
        text.to_string()
    } else {
        format!("({})", text)
    }
}

/// The annotation asm.js requires on parameters, returns and call
/// arguments of type `ty`.
pub fn coerce(ty: &Type, text: &str) -> String {
    match ty.as_primitive() {
        Some(Primitive::Float) => format!("+{}", atom(text)),
        Some(Primitive::SFloat) => format!("fround({})", text),
        _ => format!("{} | 0", atom(text)),
    }
}

/// [`coerce`] usable as an operand.
fn value(ty: &Type, text: &str) -> String {
    format!("({})", coerce(ty, text))
}

pub fn zero(ty: &Type) -> &'static str {
    match ty.as_primitive() {
        Some(Primitive::Float) => "0.0",
        Some(Primitive::SFloat) => "fround(0)",
        _ => "0",
    }
}

/// Heap view and index shift for a slot of type `ty`.
fn view(ty: &Type) -> (&'static str, u32) {
    match ty.as_primitive() {
        Some(Primitive::Float) => ("HEAPF64", 3),
        Some(Primitive::SFloat) => ("HEAPF32", 2),
        Some(Primitive::Bool | Primitive::Byte) => ("HEAPU8", 0),
        _ => ("HEAP32", 2),
    }
}

fn index(address: &str, shift: u32) -> String {
    if shift == 0 {
        address.to_string()
    } else {
        format!("{} >> {}", atom(address), shift)
    }
}

fn load(ty: &Type, address: &str) -> String {
    let (heap, shift) = view(ty);
    value(ty, &format!("{}[{}]", heap, index(address, shift)))
}

fn store(ty: &Type, address: &str, stored: &str) -> String {
    let (heap, shift) = view(ty);
    format!("{}[{}] = {};", heap, index(address, shift), coerce(ty, stored))
}

fn offset(base: &str, offset: u32) -> String {
    format!("({} + {} | 0)", atom(base), offset)
}

fn element(base: &str, index: &str, element: &Type) -> String {
    let shift = element.slot_size().trailing_zeros();
    format!(
        "({} + {} + ({} << {}) | 0)",
        atom(base),
        ARRAY_HEADER_SIZE,
        atom(index),
        shift
    )
}

fn float(number: f64) -> String {
    if number.is_nan() {
        return String::from("(0.0 / 0.0)");
    }
    if number.is_infinite() {
        return String::from(if number > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" });
    }

    let mut text = format!("{:?}", number.abs());
    if !text.contains('.') {
        text = match text.find('e') {
            Some(exponent) => format!("{}.0{}", &text[..exponent], &text[exponent..]),
            None => format!("{}.0", text),
        };
    }
    if number.is_sign_negative() {
        format!("(-{})", text)
    } else {
        text
    }
}

fn binary(op: BinaryOp, ty: &Type, l: &str, r: &str) -> String {
    let (l, r) = (atom(l), atom(r));
    let primitive = ty.as_primitive();

    match op {
        BinaryOp::And => return format!("({} ? {} : 0)", l, r),
        BinaryOp::Or => return format!("({} ? 1 : {})", l, r),
        BinaryOp::Eq if ty.as_func().is_some() => return format!("($same({}, {}) | 0)", l, r),
        BinaryOp::Ne if ty.as_func().is_some() => return format!("(($same({}, {}) | 0) == 0 | 0)", l, r),
        _ => {}
    }

    if op.is_comparison() {
        let symbol = match op {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            _ => op.symbol(),
        };
        return match primitive {
            Some(Primitive::Float | Primitive::SFloat) => format!("({} {} {} | 0)", l, symbol, r),
            Some(Primitive::UInt) => format!("(({} >>> 0) {} ({} >>> 0) | 0)", l, symbol, r),
            _ => format!("(({} | 0) {} ({} | 0) | 0)", l, symbol, r),
        };
    }

    let symbol = op.symbol();
    match primitive {
        Some(Primitive::Float) => format!("(+({} {} {}))", l, symbol, r),
        Some(Primitive::SFloat) => format!("fround({} {} {})", l, symbol, r),
        Some(Primitive::Byte) => match op {
            BinaryOp::Mul => format!("(imul({}, {}) & 255)", l, r),
            BinaryOp::Div | BinaryOp::Mod => format!("(({} | 0) {} ({} | 0) & 255)", l, symbol, r),
            BinaryOp::Shr => format!("({} >>> {} | 0)", l, r),
            _ => format!("({} {} {} & 255)", l, symbol, r),
        },
        Some(Primitive::UInt) => match op {
            BinaryOp::Mul => format!("imul({}, {})", l, r),
            BinaryOp::Div | BinaryOp::Mod => format!("((({} >>> 0) {} ({} >>> 0)) >>> 0 | 0)", l, symbol, r),
            BinaryOp::Shr => format!("({} >>> {} | 0)", l, r),
            _ => format!("({} {} {} | 0)", l, symbol, r),
        },
        _ => match op {
            BinaryOp::Mul => format!("imul({}, {})", l, r),
            BinaryOp::Div | BinaryOp::Mod => format!("(({} | 0) {} ({} | 0) | 0)", l, symbol, r),
            _ => format!("({} {} {} | 0)", l, symbol, r),
        },
    }
}

fn cast(from: &Type, to: &Type, text: &str) -> String {
    if from.equals(to) {
        return text.to_string();
    }
    let (Some(from), Some(to)) = (from.as_primitive(), to.as_primitive()) else {
        return text.to_string();
    };
    let text = atom(text);

    let double = match from {
        Primitive::Float => text.clone(),
        Primitive::SFloat => format!("(+{})", text),
        Primitive::UInt => format!("(+({} >>> 0))", text),
        _ => format!("(+({} | 0))", text),
    };
    let int = match from {
        Primitive::Float | Primitive::SFloat => format!("(~~{})", double),
        _ => format!("({} | 0)", text),
    };

    match to {
        Primitive::Int | Primitive::UInt => int,
        Primitive::Byte => format!("({} & 255)", int),
        Primitive::Float => double,
        Primitive::SFloat => format!("fround({})", double),
        Primitive::Bool => match from {
            Primitive::Float | Primitive::SFloat => format!("({} != 0.0 | 0)", double),
            _ => format!("({} != 0 | 0)", int),
        },
    }
}

/// Program-wide state shared by every module.
#[derive(Debug)]
struct Program {
    /// String literals by their static address.
    strings: IndexMap<String, u32>,
    data_end: u32,
    /// Tuple builders by flat type name.
    tuples: IndexMap<String, Rc<TupleType>>,
    /// Constructor factories: constructor, object size, arguments after `self`.
    factories: IndexMap<String, (u32, Vec<Type>)>,
    /// Signatures called through references.
    dispatched: IndexMap<String, Type>,
    /// Host functions imported through `foreign`.
    externals: IndexSet<String>,
}

impl Program {
    fn new() -> Self {
        Program {
            strings: IndexMap::new(),
            data_end: BUDDY_SPACE,
            tuples: IndexMap::new(),
            factories: IndexMap::new(),
            dispatched: IndexMap::new(),
            externals: IndexSet::new(),
        }
    }

    fn string(&mut self, text: &str) -> u32 {
        if let Some(address) = self.strings.get(text) {
            return *address;
        }
        let address = self.data_end;
        let units = text.encode_utf16().count() as u32;
        self.data_end = (address + ARRAY_HEADER_SIZE + units * 4 + 7) & !7;
        self.strings.insert(text.to_string(), address);
        address
    }
}

struct AsmJs<'a, 'm> {
    session: &'a mut Session,
    unit: &'a Unit<'m>,
    program: &'a mut Program,
    out: Builder,
    context: ContextId,
    locals: IndexMap<String, Type>,
    loops: Loops<()>,
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %root.module.name))]
pub fn emit(session: &mut Session, modules: &[Rc<CompiledModule>], root: &CompiledModule, name: &str) -> Result<String, Error> {
    let mut program = Program::new();
    let mut globals = Builder::new(2);
    let mut functions = Builder::new(2);
    let mut inits = vec![];

    for module in modules {
        let unit = Unit::new(module);
        let items = collect_functions(&unit, session)?;

        for (assigned, ty) in unit.globals() {
            globals.line(format!("var {} = {};", assigned, zero(&ty)));
        }

        let mut asm = AsmJs {
            session: &mut *session,
            unit: &unit,
            program: &mut program,
            out: Builder::new(2),
            context: ROOT,
            locals: IndexMap::new(),
            loops: Loops::default(),
        };
        for item in &items {
            asm.function(item)?;
        }
        asm.initializer()?;
        inits.push(module.resolution.init.clone());

        functions.append(asm.out);
    }

    let mut out = Builder::new(0);
    out.open(format!("var {} = (function () {{", name));
    out.open("function $module(stdlib, foreign, heap) {");
    out.line("\"use asm\";");
    for (view, array) in VIEWS {
        out.line(format!("var {} = new stdlib.{}(heap);", view, array));
    }
    out.line("var imul = stdlib.Math.imul;");
    out.line("var fround = stdlib.Math.fround;");
    out.line("var $nan = stdlib.NaN;");
    for (function, _) in math_functions().into_iter().filter(|(function, _)| *function != GET_NAN) {
        out.line(format!("var Math_{} = stdlib.Math.{};", function, function));
    }
    for function in &program.externals {
        out.line(format!("var $ext${} = foreign.{};", function, function));
    }
    out.line_parts(vec![
        Fragment::Text(String::from("var $top = ")),
        Fragment::Env(EnvConstant::DataEnd),
        Fragment::Text(String::from(";")),
    ]);
    out.append(globals);
    for line in RUNTIME.lines() {
        out.line(line);
    }
    out.append(functions);
    helpers(&mut out, &program, session)?;

    out.open("function $init() {");
    for init in &inits {
        out.line(format!("{}();", init));
    }
    out.close("}");

    let mut accessors = vec![];
    for export in root.ty.exports.values().filter(|export| !export.function) {
        out.open(format!("function {}() {{", export.accessor));
        out.line(format!("return {};", coerce(&export.ty, &export.assigned)));
        out.close("}");
        accessors.push(export.accessor.clone());
    }

    for (flat, list) in session.func_lists.iter() {
        if program.dispatched.contains_key(flat) {
            tables(&mut out, flat, list);
        }
    }

    let mut returned = vec![String::from("$init: $init")];
    for export in root.ty.exports.values() {
        let target = if export.function {
            &export.assigned
        } else {
            &export.accessor
        };
        returned.push(format!("{}: {}", target, target));
    }
    out.line(format!("return {{ {} }};", returned.join(", ")));
    out.close("}");

    out.line_parts(vec![
        Fragment::Text(String::from("var heap = new ArrayBuffer(")),
        Fragment::Env(EnvConstant::HeapSize),
        Fragment::Text(String::from(");")),
    ]);
    out.line("var words = new Int32Array(heap);");
    let strings: Vec<String> = program
        .strings
        .iter()
        .map(|(text, address)| {
            let units: Vec<String> = text.encode_utf16().map(|unit| unit.to_string()).collect();
            format!("[{}, [{}]]", address, units.join(", "))
        })
        .collect();
    out.line(format!("var strings = [{}];", strings.join(", ")));
    out.open("strings.forEach(function (string) {");
    out.line("words[string[0] >> 2] = string[1].length;");
    out.open("for (var i = 0; i < string[1].length; i++) {");
    out.line("words[(string[0] + 8 >> 2) + i] = string[1][i];");
    out.close("}");
    out.close("});");
    out.open("function $host(name) {");
    out.line("var f = globalThis[name];");
    out.line("return typeof f === \"function\" ? f : function () {};");
    out.close("}");
    let mut imports = vec![String::from("Math: Math")];
    imports.extend(
        program
            .externals
            .iter()
            .map(|function| format!("{}: $host(\"{}\")", function, function)),
    );
    out.line(format!("var m = $module(globalThis, {{ {} }}, heap);", imports.join(", ")));
    out.line("m.$init();");
    out.line("var exports = {};");
    for (export_name, export) in &root.ty.exports {
        let getter = if export.function {
            format!("m.{}", export.assigned)
        } else {
            format!("m.{}()", export.accessor)
        };
        out.line(format!(
            "Object.defineProperty(exports, \"{}\", {{ enumerable: true, get: function () {{ return {}; }} }});",
            export_name, getter
        ));
    }
    out.line("return exports;");
    out.close("})();");

    let env = EnvConstants::new(program.data_end);
    debug!(
        data_end = program.data_end,
        strings = program.strings.len(),
        dispatchers = program.dispatched.len(),
        "emitted asm.js"
    );
    Ok(out.render(&env))
}

/// Constructor factories, tuple builders and dispatchers requested while
/// lowering.
fn helpers(out: &mut Builder, program: &Program, session: &Session) -> Result<(), Error> {
    for (constructor, (size, params)) in &program.factories {
        let args: Vec<String> = (0..params.len()).map(|index| format!("$a{}", index)).collect();
        out.open(format!("function {}$new({}) {{", constructor, args.join(", ")));
        for (arg, ty) in args.iter().zip(params) {
            out.line(format!("{} = {};", arg, coerce(ty, arg)));
        }
        out.line("var $o = 0;");
        out.line(format!("$o = $alloc({}) | 0;", size));
        let mut values = vec![String::from("$o")];
        values.extend(args.iter().zip(params).map(|(arg, ty)| coerce(ty, arg)));
        out.line(format!("{}({});", constructor, values.join(", ")));
        out.line("return $o | 0;");
        out.close("}");
    }

    for (flat, tuple) in &program.tuples {
        let layout = tuple.get_layout();
        let args: Vec<String> = (0..tuple.elements.len()).map(|index| format!("$a{}", index)).collect();
        out.open(format!("function ${}({}) {{", flat, args.join(", ")));
        for (arg, ty) in args.iter().zip(&tuple.elements) {
            out.line(format!("{} = {};", arg, coerce(ty, arg)));
        }
        out.line("var $o = 0;");
        out.line(format!("$o = $alloc({}) | 0;", layout.size()));
        for (index, (arg, ty)) in args.iter().zip(&tuple.elements).enumerate() {
            let field = layout
                .offset_of(&index.to_string())
                .ok_or_else(|| Error::internal(format!("tuple {} has no element {}", flat, index)))?;
            out.line(store(ty, &offset("$o", field), arg));
        }
        out.line("return $o | 0;");
        out.close("}");
    }

    for (flat, signature) in &program.dispatched {
        let func = signature
            .as_func()
            .ok_or_else(|| Error::internal(format!("{} is not a signature", signature)))?;
        dispatcher(out, flat, func, session.func_lists.get(signature));
    }
    Ok(())
}

impl AsmJs<'_, '_> {
    fn expr_type(&self, expr: &Expr) -> Result<Type, Error> {
        Ok(self.unit.resolution().expr_type(expr)?.clone())
    }

    /// Arguments annotated with the types they are passed as.
    fn args(&mut self, args: &[Expr]) -> Result<Vec<String>, Error> {
        args.iter()
            .map(|arg| {
                let ty = self.expr_type(arg)?;
                let text = self.lower_expr(arg)?;
                Ok(coerce(&ty, &text))
            })
            .collect()
    }

    fn call(&self, ret: Option<&Type>, call: String) -> String {
        match ret {
            Some(ret) => value(ret, &call),
            None => call,
        }
    }

    /// The context that allocated the frame reached through `path`.
    fn frame_owner(&self, path: FramePath) -> Result<ContextId, Error> {
        let resolution = self.unit.resolution();
        let hops = match path {
            FramePath::Own => return Ok(self.context),
            FramePath::Up(hops) => hops + 1,
        };

        let mut owner = self.context;
        for _ in 0..hops {
            owner = resolution
                .context(owner)
                .parent
                .ok_or_else(|| Error::internal(format!("context {} has no parent", owner)))?;
        }
        Ok(owner)
    }

    fn frame_pointer(&self, path: FramePath) -> Result<String, Error> {
        let FramePath::Up(hops) = path else {
            return Ok(String::from("$frame"));
        };

        let mut pointer = String::from("$ctx");
        for hop in 0..hops {
            let owner = self.frame_owner(FramePath::Up(hop))?;
            let parent = self
                .unit
                .closures
                .frame(owner)
                .and_then(|frame| frame.get_layout().offset_of(PARENT))
                .ok_or_else(|| Error::internal(format!("frame of context {} has no parent link", owner)))?;
            pointer = load(&Type::INT, &offset(&pointer, parent));
        }
        Ok(pointer)
    }

    /// Address and type of a frame field.
    fn frame_field(&self, path: FramePath, field: &str) -> Result<(String, Type), Error> {
        let owner = self.frame_owner(path)?;
        let frame = self
            .unit
            .closures
            .frame(owner)
            .ok_or_else(|| Error::internal(format!("context {} has no frame", owner)))?;
        let ty = frame
            .fields()
            .get(field)
            .ok_or_else(|| Error::internal(format!("{} is not in the frame of context {}", field, owner)))?;
        let field_offset = frame
            .get_layout()
            .offset_of(field)
            .ok_or_else(|| Error::internal(format!("{} has no offset", field)))?;
        Ok((offset(&self.frame_pointer(path)?, field_offset), ty.clone()))
    }

    fn reference(&mut self, assigned: &str, signature: &Type, context: Option<String>) -> String {
        let slot = self
            .session
            .func_lists
            .register(signature, context.is_some(), assigned);
        format!("($ref({}, {}) | 0)", slot, context.as_deref().unwrap_or("0"))
    }

    fn write(&mut self, slot: Storage, ty: &Type, stored: &str) -> Result<(), Error> {
        match slot {
            Storage::Global(assigned) | Storage::Local(assigned) => {
                self.out.line(format!("{} = {};", assigned, coerce(ty, stored)));
            }
            Storage::Frame { path, field } => {
                let (address, ty) = self.frame_field(path, &field)?;
                self.out.line(store(&ty, &address, stored));
            }
        }
        Ok(())
    }

    fn function(&mut self, function: &FunctionItem) -> Result<(), Error> {
        self.context = function.context;
        self.locals.clear();
        self.loops = Loops::default();

        let indent = self.out.indent + 1;
        let outer = std::mem::replace(&mut self.out, Builder::new(indent));
        let frame = self.unit.closures.frame(function.context).cloned();
        if let Some(frame) = &frame {
            let layout = frame.get_layout();
            self.out.line(format!("$frame = $alloc({}) | 0;", layout.size()));
            for entry in layout.entries() {
                if entry.key == PARENT {
                    self.out
                        .line(store(&Type::INT, &offset("$frame", entry.offset), "$ctx"));
                } else if function.params.iter().any(|(param, _)| *param == entry.key) {
                    self.out
                        .line(store(&entry.ty, &offset("$frame", entry.offset), &entry.key));
                }
            }
        }
        self.lower_body(&function.decl.body)?;
        if let Some(ret) = &function.ret {
            self.out.line(format!("return {};", zero(ret)));
        }
        let body = std::mem::replace(&mut self.out, outer);

        let mut params: Vec<String> = vec![];
        if function.takes_context {
            params.push(String::from("$ctx"));
        }
        params.extend(function.params.iter().map(|(assigned, _)| assigned.clone()));

        self.out
            .open(format!("function {}({}) {{", function.assigned, params.join(", ")));
        if function.takes_context {
            self.out.line("$ctx = $ctx | 0;");
        }
        for (assigned, ty) in &function.params {
            self.out.line(format!("{} = {};", assigned, coerce(ty, assigned)));
        }
        self.declare_locals(frame.is_some());
        self.out.append(body);
        self.out.close("}");
        Ok(())
    }

    fn initializer(&mut self) -> Result<(), Error> {
        self.context = ROOT;
        self.locals.clear();
        self.loops = Loops::default();

        let indent = self.out.indent + 1;
        let outer = std::mem::replace(&mut self.out, Builder::new(indent));
        for stmt in self.unit.initializer() {
            self.lower_stmt(stmt)?;
        }
        let body = std::mem::replace(&mut self.out, outer);

        self.out
            .open(format!("function {}() {{", self.unit.resolution().init));
        self.declare_locals(false);
        self.out.append(body);
        self.out.close("}");
        Ok(())
    }

    fn declare_locals(&mut self, frame: bool) {
        let mut locals: Vec<String> = self
            .locals
            .iter()
            .map(|(assigned, ty)| format!("{} = {}", assigned, zero(ty)))
            .collect();
        if frame {
            locals.push(String::from("$frame = 0"));
        }
        if !locals.is_empty() {
            self.out.line(format!("var {};", locals.join(", ")));
        }
    }

    fn inline(&mut self, stmt: &Stmt) -> Result<String, Error> {
        let outer = std::mem::replace(&mut self.out, Builder::new(0));
        let result = self.lower_stmt(stmt);
        let inlined = std::mem::replace(&mut self.out, outer);
        result?;

        Ok(inlined
            .text()
            .lines()
            .map(|line| line.trim().trim_end_matches(';'))
            .collect::<Vec<_>>()
            .join(", "))
    }

    fn loop_body(&mut self, body: &[Stmt]) -> Result<(), Error> {
        self.loops.push(());
        let result = self.lower_body(body);
        self.loops.pop();
        result
    }
}

impl Lowering for AsmJs<'_, '_> {
    type Value = String;

    fn lower_declaration(&mut self, stmt: &Stmt, declaration: &Declaration) -> Result<(), Error> {
        let resolution = self.unit.resolution();
        let ty = match &declaration.ty {
            Some(node) => resolution.type_of(node)?.clone(),
            None => resolution.expr_type(&declaration.value)?.clone(),
        };
        let stored = self.lower_expr(&declaration.value)?;
        let assigned = resolution.assigned_of(stmt.id)?;
        let definer = resolution.context_of(stmt.id)?;

        let slot = self
            .unit
            .closures
            .storage(resolution, self.context, definer, assigned)?;
        if let Storage::Local(local) = &slot {
            self.locals.insert(local.clone(), ty.clone());
        }
        self.write(slot, &ty, &stored)
    }

    fn lower_assignment(&mut self, target: &Expr, assigned: &Expr) -> Result<(), Error> {
        let ty = self.expr_type(target)?;

        match &target.kind {
            ExprKind::Member { base, member: name } => {
                let base_ty = self.expr_type(base)?;
                let Member::Field { offset: field, .. } = member(&base_ty, name, self.session)? else {
                    return Err(Error::internal("assignment to a non-field member"));
                };
                let base = self.lower_expr(base)?;
                let stored = self.lower_expr(assigned)?;
                self.out.line(store(&ty, &offset(&base, field), &stored));
            }
            ExprKind::Subscript { base, index } => {
                let base = self.lower_expr(base)?;
                let index = self.lower_expr(index)?;
                let stored = self.lower_expr(assigned)?;
                self.out.line(store(&ty, &element(&base, &index, &ty), &stored));
            }
            ExprKind::Symbol(_) => {
                let Access::Variable(slot) = access(self.unit, self.context, target)? else {
                    return Err(Error::internal("assignment to a function or module"));
                };
                let stored = self.lower_expr(assigned)?;
                self.write(slot, &ty, &stored)?;
            }
            _ => return Err(Error::internal("unsupported assignment target")),
        }
        Ok(())
    }

    fn lower_expression_stmt(&mut self, expr: &Expr) -> Result<(), Error> {
        let text = self.lower_expr(expr)?;
        self.out.line(format!("{};", text));
        Ok(())
    }

    fn lower_return(&mut self, returned: Option<&Expr>) -> Result<(), Error> {
        match returned {
            Some(returned) => {
                let ty = self
                    .unit
                    .resolution()
                    .context(self.context)
                    .return_type
                    .clone()
                    .ok_or_else(|| Error::internal("return with a value from a function without a return type"))?;
                let text = self.lower_expr(returned)?;
                self.out.line(format!("return {};", coerce(&ty, &text)));
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
        self.loop_body(body)?;
        self.out.close("}");
        Ok(())
    }

    fn lower_do_while(&mut self, body: &[Stmt], condition: &Expr) -> Result<(), Error> {
        self.out.open("do {");
        self.loop_body(body)?;
        let condition = self.lower_expr(condition)?;
        self.out.close(format!("}} while ({});", condition));
        Ok(())
    }

    fn lower_for(&mut self, init: &Stmt, condition: &Expr, step: &Stmt, body: &[Stmt]) -> Result<(), Error> {
        self.lower_stmt(init)?;
        let condition = self.lower_expr(condition)?;
        let step = self.inline(step)?;
        self.out.open(format!("for (; {}; {}) {{", condition, step));
        self.loop_body(body)?;
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
            Literal::Int(number) if *number < 0 => format!("({})", number),
            Literal::Int(number) => number.to_string(),
            Literal::Float(number) => float(*number),
            Literal::Bool(flag) => String::from(if *flag { "1" } else { "0" }),
            Literal::Null => String::from("0"),
            Literal::Str(text) => self.program.string(text).to_string(),
        })
    }

    fn lower_symbol(&mut self, expr: &Expr) -> Result<String, Error> {
        match access(self.unit, self.context, expr)? {
            Access::Variable(Storage::Global(assigned) | Storage::Local(assigned)) => Ok(assigned),
            Access::Variable(Storage::Frame { path, field }) => {
                let (address, ty) = self.frame_field(path, &field)?;
                Ok(load(&ty, &address))
            }
            Access::Function {
                assigned,
                frame,
                signature,
            } => {
                let context = frame.map(|path| self.frame_pointer(path)).transpose()?;
                Ok(self.reference(&assigned, &signature, context))
            }
            Access::Module => Ok(String::from("0")),
        }
    }

    fn lower_binary(&mut self, _expr: &Expr, op: BinaryOp, left: &Expr, right: &Expr) -> Result<String, Error> {
        let (left_ty, right_ty, overload) = binary_operands(self.unit.resolution(), self.session, op, left, right)?;
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;

        if let Some(assigned) = overload {
            let ret = self
                .session
                .signature(&assigned)
                .and_then(Type::as_func)
                .and_then(|signature| signature.ret.clone());
            let call = format!("{}({}, {})", assigned, coerce(&left_ty, &l), coerce(&right_ty, &r));
            return Ok(self.call(ret.as_ref(), call));
        }

        let ty = if matches!(left_ty, Type::Null) { right_ty } else { left_ty };
        Ok(binary(op, &ty, &l, &r))
    }

    fn lower_unary(&mut self, _expr: &Expr, op: UnaryOp, operand: &Expr) -> Result<String, Error> {
        let ty = self.expr_type(operand)?;
        let text = atom(&self.lower_expr(operand)?);

        Ok(match (op, ty.as_primitive()) {
            (UnaryOp::Not, _) => format!("(!{} | 0)", text),
            (UnaryOp::Neg, Some(Primitive::Float)) => format!("(-{})", text),
            (UnaryOp::Neg, Some(Primitive::SFloat)) => format!("fround(-{})", text),
            (UnaryOp::Neg, Some(Primitive::Byte)) => format!("(-{} & 255)", text),
            (UnaryOp::Neg, _) => format!("(-{} | 0)", text),
            (UnaryOp::BitNot, Some(Primitive::Byte)) => format!("(~{} & 255)", text),
            (UnaryOp::BitNot, _) => format!("(~{})", text),
        })
    }

    fn lower_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Result<String, Error> {
        let ret = self.unit.resolution().expr_types.get(&expr.id).cloned();

        match call_target(self.unit, self.session, self.context, callee)? {
            CallTarget::Direct { assigned, frame } => {
                let mut values: Vec<String> = frame
                    .map(|path| self.frame_pointer(path))
                    .transpose()?
                    .into_iter()
                    .collect();
                values.extend(self.args(args)?);
                Ok(self.call(ret.as_ref(), format!("{}({})", assigned, values.join(", "))))
            }
            CallTarget::Method { assigned, receiver } => {
                let mut values = vec![coerce(&Type::INT, &self.lower_expr(receiver)?)];
                values.extend(self.args(args)?);
                Ok(self.call(ret.as_ref(), format!("{}({})", assigned, values.join(", "))))
            }
            CallTarget::Foreign(name) if name == GET_NAN => Ok(String::from("$nan")),
            CallTarget::Foreign(name) => {
                let call = format!("Math_{}({})", name, self.args(args)?.join(", "));
                Ok(match name.as_str() {
                    "abs" => format!("({} | 0)", call),
                    "ceil" | "floor" => format!("(~~{})", call),
                    _ => format!("(+{})", call),
                })
            }
            CallTarget::External(external) => {
                let call = format!("$ext${}({})", external.function, self.args(args)?.join(", "));
                self.program.externals.insert(external.function.clone());
                Ok(self.call(ret.as_ref(), call))
            }
            CallTarget::Reference => {
                let signature = self.expr_type(callee)?;
                let flat = signature.flat_type_name();
                let mut values = vec![coerce(&Type::INT, &self.lower_expr(callee)?)];
                values.extend(self.args(args)?);
                let call = format!("{}({})", dispatcher_name(&flat), values.join(", "));
                self.program.dispatched.insert(flat, signature);
                Ok(self.call(ret.as_ref(), call))
            }
        }
    }

    fn lower_member(&mut self, _expr: &Expr, base: &Expr, name: &str) -> Result<String, Error> {
        let base_ty = self.expr_type(base)?;

        match member(&base_ty, name, self.session)? {
            Member::Field { ty, offset: field, .. } => {
                let base = self.lower_expr(base)?;
                Ok(load(&ty, &offset(&base, field)))
            }
            Member::Length => {
                let base = self.lower_expr(base)?;
                Ok(load(&Type::INT, &base))
            }
            Member::Method { assigned, signature } => {
                let receiver = self.lower_expr(base)?;
                Ok(self.reference(&assigned, &signature, Some(receiver)))
            }
            Member::Export(export) if export.function => Ok(self.reference(&export.assigned, &export.ty, None)),
            Member::Export(export) => Ok(export.assigned),
            Member::ForeignModule => Ok(String::from("0")),
            Member::ForeignFunction(name) => Err(Error::internal(format!("foreign function {} used as a value", name))),
        }
    }

    fn lower_subscript(&mut self, expr: &Expr, base: &Expr, index: &Expr) -> Result<String, Error> {
        let ty = self.expr_type(expr)?;
        let base = self.lower_expr(base)?;
        let index = self.lower_expr(index)?;
        Ok(load(&ty, &element(&base, &index, &ty)))
    }

    fn lower_tuple(&mut self, expr: &Expr, elements: &[Expr]) -> Result<String, Error> {
        let Type::Tuple(tuple) = self.expr_type(expr)? else {
            return Err(Error::internal("tuple expression without a tuple type"));
        };
        let flat = Type::Tuple(tuple.clone()).flat_type_name();
        let values = self.args(elements)?;
        let call = format!("(${}({}) | 0)", flat, values.join(", "));
        self.program.tuples.insert(flat, tuple);
        Ok(call)
    }

    fn lower_new(&mut self, expr: &Expr, _ty: &TypeNode, args: &[Expr]) -> Result<String, Error> {
        let ty = self.expr_type(expr)?;

        match &ty {
            Type::Struct(object) => {
                let size = object.get_layout().size();
                let Some(constructor) = &object.constructor else {
                    return Ok(format!("($alloc({}) | 0)", size));
                };
                let params: Vec<Type> = self
                    .session
                    .signature(constructor)
                    .and_then(Type::as_func)
                    .map(|signature| signature.params.iter().skip(1).cloned().collect())
                    .ok_or_else(|| Error::internal(format!("constructor {} has no signature", constructor)))?;
                let values = self.args(args)?;
                self.program
                    .factories
                    .insert(constructor.clone(), (size, params));
                Ok(format!("({}$new({}) | 0)", constructor, values.join(", ")))
            }
            _ => {
                let element = ty
                    .element()
                    .ok_or_else(|| Error::internal(format!("cannot allocate {}", ty)))?;
                let length = self.args(args)?.join(", ");
                Ok(format!("($array({}, {}) | 0)", length, element.slot_size()))
            }
        }
    }

    fn lower_cast(&mut self, expr: &Expr, inner: &Expr, _ty: &TypeNode) -> Result<String, Error> {
        let from = self.expr_type(inner)?;
        let to = self.expr_type(expr)?;
        let text = self.lower_expr(inner)?;
        Ok(cast(&from, &to, &text))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_float_literals_keep_a_decimal_point() {
        assert_eq!(float(1.0), "1.0");
        assert_eq!(float(2.5), "2.5");
        assert_eq!(float(-3.0), "(-3.0)");
        assert_eq!(float(1e300), "1.0e300");
        assert_eq!(float(f64::INFINITY), "(1.0 / 0.0)");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(coerce(&Type::INT, "$1"), "$1 | 0");
        assert_eq!(coerce(&Type::FLOAT, "$1"), "+$1");
        assert_eq!(coerce(&Type::SFLOAT, "$1"), "fround($1)");
        assert_eq!(coerce(&Type::INT, "a + b"), "(a + b) | 0");
        assert_eq!(coerce(&Type::INT, "(a) + (b)"), "((a) + (b)) | 0");
        assert_eq!(coerce(&Type::INT, "$t[$f & 1]($a0)"), "$t[$f & 1]($a0) | 0");
        assert_eq!(coerce(&Type::FLOAT, "f($a)[2]"), "+f($a)[2]");
        assert_eq!(coerce(&Type::FLOAT, "(x)"), "+(x)");
    }

    #[test]
    fn test_heap_access_by_slot_type() {
        assert_eq!(load(&Type::INT, "$1"), "(HEAP32[$1 >> 2] | 0)");
        assert_eq!(load(&Type::BOOL, "$1"), "(HEAPU8[$1] | 0)");
        assert_eq!(load(&Type::FLOAT, "$1"), "(+HEAPF64[$1 >> 3])");
        assert_eq!(store(&Type::SFLOAT, "$1", "$2"), "HEAPF32[$1 >> 2] = fround($2);");
        assert_eq!(element("$1", "$2", &Type::FLOAT), "($1 + 8 + ($2 << 3) | 0)");
    }

    #[test]
    fn test_string_data_is_aligned() {
        let mut program = Program::new();
        assert_eq!(program.string("abc"), BUDDY_SPACE);
        assert_eq!(program.string("hi"), BUDDY_SPACE + 24);
        assert_eq!(program.string("abc"), BUDDY_SPACE);
        assert_eq!(program.data_end, BUDDY_SPACE + 40);
    }
}
