use std::{cell::OnceCell, fmt::Display, rc::Rc};

use indexmap::IndexMap;

use super::layout::Layout;

/// Size of a reference slot (arrays, strings, objects, tuples).
pub const POINTER_SIZE: u32 = 8;
/// Size of a function reference slot: code pointer plus context pointer.
pub const FUNC_SIZE: u32 = 16;
/// Arrays and strings start with an element count.
pub const ARRAY_HEADER_SIZE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Float,
    SFloat,
    Bool,
    Byte,
    UInt,
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::SFloat => "sfloat",
            Primitive::Bool => "bool",
            Primitive::Byte => "byte",
            Primitive::UInt => "uint",
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            Primitive::Int | Primitive::UInt | Primitive::SFloat => 4,
            Primitive::Float => 8,
            Primitive::Bool | Primitive::Byte => 1,
        }
    }

    /// `byte` and `uint` are only nameable by privileged code; everyone
    /// else reaches them through casts and string subscripts.
    pub fn is_private(&self) -> bool {
        matches!(self, Primitive::Byte | Primitive::UInt)
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        Some(match name {
            "int" => Primitive::Int,
            "float" => Primitive::Float,
            "sfloat" => Primitive::SFloat,
            "bool" => Primitive::Bool,
            "byte" => Primitive::Byte,
            "uint" => Primitive::UInt,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Type {
    Primitive(Primitive),
    Array(Rc<Type>),
    /// Equal to `Array(uint)`.
    Str,
    Struct(Rc<StructType>),
    Tuple(Rc<TupleType>),
    Func(Rc<FuncType>),
    Module(Rc<ModuleType>),
    /// A host function named through `foreign.external`, typed link by link.
    External(Rc<ExternalType>),
    /// The type of the `null` literal.
    Null,
}

pub struct StructType {
    pub name: String,
    /// Set once after the type is registered, so fields may name the
    /// object itself.
    fields: OnceCell<IndexMap<String, Type>>,
    pub constructor: Option<String>,
    /// Method name to assigned identifier.
    pub methods: IndexMap<String, String>,
    layout: OnceCell<Layout>,
}

#[derive(Debug)]
pub struct TupleType {
    pub elements: Vec<Type>,
    layout: OnceCell<Layout>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncType {
    pub ret: Option<Type>,
    pub params: Vec<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    User,
    Foreign,
    /// `foreign.external`: any member names a host function.
    External,
}

/// `foreign.external.<function>.<ret>.<params...>`. The first link after
/// the function name is the return type (`_null` for none), every further
/// link adds a parameter. Callable once the return type is known.
#[derive(Debug, PartialEq)]
pub struct ExternalType {
    pub function: String,
    pub signature: Option<FuncType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    /// Emission identifier of the exported binding.
    pub assigned: String,
    pub ty: Type,
    /// Exported function declarations are called directly.
    pub function: bool,
    /// Fresh identifier for targets that can only export functions; such
    /// targets export a getter under this name.
    pub accessor: String,
}

#[derive(Debug)]
pub struct ModuleType {
    pub name: String,
    pub kind: ModuleKind,
    pub exports: IndexMap<String, Export>,
}

impl StructType {
    pub fn new(
        name: String,
        fields: IndexMap<String, Type>,
        constructor: Option<String>,
        methods: IndexMap<String, String>,
    ) -> Self {
        let object = StructType::declare(name, constructor, methods);
        let _ = object.fields.set(fields);
        object
    }

    /// A struct whose fields are supplied later through [`define_fields`].
    ///
    /// [`define_fields`]: StructType::define_fields
    pub fn declare(name: String, constructor: Option<String>, methods: IndexMap<String, String>) -> Self {
        StructType {
            name,
            fields: OnceCell::new(),
            constructor,
            methods,
            layout: OnceCell::new(),
        }
    }

    /// Fills in the fields of a declared struct. Fails when they were
    /// already set or read.
    pub fn define_fields(&self, fields: IndexMap<String, Type>) -> Result<(), IndexMap<String, Type>> {
        self.fields.set(fields)
    }

    /// Fields in declaration order; empty until defined.
    pub fn fields(&self) -> &IndexMap<String, Type> {
        self.fields.get_or_init(IndexMap::new)
    }

    pub fn get_layout(&self) -> &Layout {
        self.layout.get_or_init(|| {
            Layout::compute(self.fields().iter().map(|(name, ty)| (name.clone(), ty.clone())))
        })
    }
}

impl std::fmt::Debug for StructType {
    // Fields may lead back to this struct.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<String> = self
            .fields()
            .iter()
            .map(|(name, ty)| format!("{}: {}", name, ty))
            .collect();
        f.debug_struct("StructType")
            .field("name", &self.name)
            .field("fields", &fields)
            .field("constructor", &self.constructor)
            .field("methods", &self.methods)
            .finish()
    }
}

impl ExternalType {
    pub fn new(function: &str) -> Self {
        ExternalType {
            function: function.to_string(),
            signature: None,
        }
    }

    /// The chain extended by the type named `link`.
    pub fn link(&self, link: &str) -> Option<ExternalType> {
        let ty = match link {
            "_null" => None,
            "int" | "float" | "bool" | "str" => Some(Type::resolve_primitive(link, false)?),
            _ => return None,
        };

        let signature = match (&self.signature, ty) {
            (None, ret) => FuncType { ret, params: vec![] },
            (Some(_), None) => return None,
            (Some(signature), Some(param)) => {
                let mut params = signature.params.clone();
                params.push(param);
                FuncType {
                    ret: signature.ret.clone(),
                    params,
                }
            }
        };
        Some(ExternalType {
            function: self.function.clone(),
            signature: Some(signature),
        })
    }
}

impl TupleType {
    pub fn new(elements: Vec<Type>) -> Self {
        TupleType {
            elements,
            layout: OnceCell::new(),
        }
    }

    pub fn get_layout(&self) -> &Layout {
        self.layout.get_or_init(|| {
            Layout::compute(
                self.elements
                    .iter()
                    .enumerate()
                    .map(|(index, ty)| (index.to_string(), ty.clone())),
            )
        })
    }
}

impl Type {
    pub const INT: Type = Type::Primitive(Primitive::Int);
    pub const FLOAT: Type = Type::Primitive(Primitive::Float);
    pub const SFLOAT: Type = Type::Primitive(Primitive::SFloat);
    pub const BOOL: Type = Type::Primitive(Primitive::Bool);
    pub const BYTE: Type = Type::Primitive(Primitive::Byte);
    pub const UINT: Type = Type::Primitive(Primitive::UInt);

    pub fn array(element: Type) -> Type {
        Type::Array(Rc::new(element))
    }

    pub fn tuple(elements: Vec<Type>) -> Type {
        Type::Tuple(Rc::new(TupleType::new(elements)))
    }

    pub fn func(ret: Option<Type>, params: Vec<Type>) -> Type {
        Type::Func(Rc::new(FuncType { ret, params }))
    }

    /// Looks up a primitive by name. `str` is included; private primitives
    /// need `privileged`.
    pub fn resolve_primitive(name: &str, privileged: bool) -> Option<Type> {
        if name == "str" {
            return Some(Type::Str);
        }

        let primitive = Primitive::from_name(name)?;
        if primitive.is_private() && !privileged {
            return None;
        }
        Some(Type::Primitive(primitive))
    }

    /// Element type of arrays and strings.
    pub fn element(&self) -> Option<Type> {
        match self {
            Type::Array(element) => Some(element.as_ref().clone()),
            Type::Str => Some(Type::UINT),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(primitive) => Some(*primitive),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncType> {
        match self {
            Type::Func(func) => Some(func),
            Type::External(external) => external.signature.as_ref(),
            _ => None,
        }
    }

    pub fn equals(&self, other: &Type) -> bool {
        self.equals_in(other, &mut vec![])
    }

    /// Structural equality. Struct pairs already under comparison in
    /// `assumed` count as equal, which ends the walk on recursive objects.
    fn equals_in(&self, other: &Type, assumed: &mut Vec<(*const StructType, *const StructType)>) -> bool {
        if let (Some(a), Some(b)) = (self.element(), other.element()) {
            return a.equals_in(&b, assumed);
        }

        match (self, other) {
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::Struct(a), Type::Struct(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if assumed.contains(&pair) {
                    return true;
                }
                if a.name != b.name || a.fields().len() != b.fields().len() {
                    return false;
                }

                assumed.push(pair);
                let equal = a.fields().iter().zip(b.fields().iter()).all(
                    |((name_a, ty_a), (name_b, ty_b))| name_a == name_b && ty_a.equals_in(ty_b, assumed),
                );
                assumed.pop();
                equal
            }
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.elements.len() == b.elements.len()
                    && a.elements.iter().zip(&b.elements).all(|(a, b)| a.equals_in(b, assumed))
            }
            (Type::Func(a), Type::Func(b)) => {
                let returns = match (&a.ret, &b.ret) {
                    (Some(a), Some(b)) => a.equals_in(b, assumed),
                    (None, None) => true,
                    _ => false,
                };
                returns
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(a, b)| a.equals_in(b, assumed))
            }
            (Type::Module(a), Type::Module(b)) => Rc::ptr_eq(a, b),
            (Type::External(a), Type::External(b)) => Rc::ptr_eq(a, b),
            (Type::Null, Type::Null) => true,
            _ => false,
        }
    }

    /// Reference types accept `null`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Array(_) | Type::Str | Type::Struct(_) | Type::Tuple(_) | Type::Func(_)
        )
    }

    /// Whether a value of type `value` can be stored where `self` is expected.
    pub fn accepts(&self, value: &Type) -> bool {
        self.equals(value) || (matches!(value, Type::Null) && self.is_reference())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Primitive(p) if *p != Primitive::Bool)
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Type::Primitive(Primitive::Int | Primitive::UInt | Primitive::Byte)
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Float | Primitive::SFloat))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Bool))
    }

    /// Fixed storage size of a value, `None` for variable-length values
    /// (arrays, strings) and values that are never stored.
    pub fn get_size(&self) -> Option<u32> {
        match self {
            Type::Primitive(primitive) => Some(primitive.size()),
            Type::Struct(object) => Some(object.get_layout().size()),
            Type::Tuple(tuple) => Some(tuple.get_layout().size()),
            Type::Func(_) => Some(FUNC_SIZE),
            Type::Array(_) | Type::Str | Type::Module(_) | Type::External(_) | Type::Null => None,
        }
    }

    /// Bytes occupied when stored as a field, element or variable.
    pub fn slot_size(&self) -> u32 {
        match self {
            Type::Primitive(primitive) => primitive.size(),
            Type::Func(_) => FUNC_SIZE,
            _ => POINTER_SIZE,
        }
    }

    /// Canonical, collision-free name used for cache keys and emitted
    /// identifiers.
    pub fn flat_type_name(&self) -> String {
        self.flat_name_in(&mut vec![])
    }

    /// A struct met again inside its own fields is written as
    /// `struct$Name$$`, without its fields.
    fn flat_name_in(&self, open: &mut Vec<*const StructType>) -> String {
        fn list(types: &[Type], open: &mut Vec<*const StructType>) -> String {
            let names: Vec<String> = types.iter().map(|ty| ty.flat_name_in(open)).collect();
            names.join("$")
        }

        match self {
            Type::Primitive(primitive) => String::from(primitive.name()),
            Type::Array(element) => format!("array${}", element.flat_name_in(open)),
            Type::Str => String::from("array$uint"),
            Type::Struct(object) => {
                let pointer = Rc::as_ptr(object);
                if open.contains(&pointer) {
                    return format!("struct${}$$", object.name);
                }
                open.push(pointer);
                let fields: Vec<Type> = object.fields().values().cloned().collect();
                let name = format!("struct${}${}$$", object.name, list(&fields, open));
                open.pop();
                name
            }
            Type::Tuple(tuple) => format!("tuple${}$$", list(&tuple.elements, open)),
            Type::Func(func) => {
                let ret = func
                    .ret
                    .as_ref()
                    .map_or(String::from("null"), |ret| ret.flat_name_in(open));
                format!("func${}${}$$", ret, list(&func.params, open))
            }
            Type::Module(module) => format!("module${}$$", module.name),
            Type::External(external) => format!("external${}$$", external.function),
            Type::Null => String::from("null"),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn list(types: &[Type]) -> String {
            let names: Vec<String> = types.iter().map(|ty| ty.to_string()).collect();
            names.join(", ")
        }

        match self {
            Type::Primitive(primitive) => write!(f, "{}", primitive.name()),
            Type::Array(element) => write!(f, "array<{}>", element),
            Type::Str => write!(f, "str"),
            Type::Struct(object) => write!(f, "{}", object.name),
            Type::Tuple(tuple) => write!(f, "tuple<{}>", list(&tuple.elements)),
            Type::Func(func) => {
                let ret = func.ret.as_ref().map_or(String::from("null"), |r| r.to_string());
                if func.params.is_empty() {
                    write!(f, "func<{}>", ret)
                } else {
                    write!(f, "func<{}, {}>", ret, list(&func.params))
                }
            }
            Type::Module(module) => write!(f, "module {}", module.name),
            Type::External(external) => write!(f, "external {}", external.function),
            Type::Null => write!(f, "null"),
        }
    }
}
