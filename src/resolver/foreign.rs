//! The host module bound by `import foreign;`: the fixed `Math` functions
//! and `external`, which names any host function by a chain of types.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::types::types::{Export, ModuleKind, ModuleType, Type};

pub const FOREIGN: &str = "foreign";
pub const MATH: &str = "Math";
pub const EXTERNAL: &str = "external";
/// `Math` member with no host function behind it; it lowers to a NaN
/// constant.
pub const GET_NAN: &str = "getNaN";

/// Every `foreign.Math` function with its signature.
pub fn math_functions() -> Vec<(&'static str, Type)> {
    let unary = || Type::func(Some(Type::FLOAT), vec![Type::FLOAT]);
    let binary = || Type::func(Some(Type::FLOAT), vec![Type::FLOAT, Type::FLOAT]);
    let rounding = || Type::func(Some(Type::INT), vec![Type::FLOAT]);

    vec![
        ("abs", Type::func(Some(Type::INT), vec![Type::INT])),
        ("acos", unary()),
        ("asin", unary()),
        ("atan", unary()),
        ("cos", unary()),
        ("sin", unary()),
        ("tan", unary()),
        ("ceil", rounding()),
        ("floor", rounding()),
        ("exp", unary()),
        ("log", unary()),
        ("sqrt", unary()),
        ("atan2", binary()),
        ("pow", binary()),
        (GET_NAN, Type::func(Some(Type::FLOAT), vec![])),
    ]
}

pub fn foreign_module() -> Rc<ModuleType> {
    let functions: IndexMap<String, Export> = math_functions()
        .into_iter()
        .map(|(name, ty)| {
            let export = Export {
                assigned: name.to_string(),
                ty,
                function: true,
                accessor: String::new(),
            };
            (name.to_string(), export)
        })
        .collect();

    let math = Rc::new(ModuleType {
        name: MATH.to_string(),
        kind: ModuleKind::Foreign,
        exports: functions,
    });

    let external = Rc::new(ModuleType {
        name: EXTERNAL.to_string(),
        kind: ModuleKind::External,
        exports: IndexMap::new(),
    });

    let exports = [(MATH, math), (EXTERNAL, external)]
        .into_iter()
        .map(|(name, module)| {
            let export = Export {
                assigned: name.to_string(),
                ty: Type::Module(module),
                function: false,
                accessor: String::new(),
            };
            (name.to_string(), export)
        })
        .collect();

    Rc::new(ModuleType {
        name: FOREIGN.to_string(),
        kind: ModuleKind::Foreign,
        exports,
    })
}
