use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use std::rc::Rc;

use super::types::{ExternalType, StructType, Type, FUNC_SIZE, POINTER_SIZE};

fn point() -> Type {
    let mut fields = IndexMap::new();
    fields.insert(String::from("flag"), Type::BOOL);
    fields.insert(String::from("x"), Type::INT);
    fields.insert(String::from("weight"), Type::FLOAT);
    fields.insert(String::from("name"), Type::Str);
    fields.insert(String::from("y"), Type::INT);
    Type::Struct(std::rc::Rc::new(StructType::new(
        String::from("Point"),
        fields,
        None,
        IndexMap::new(),
    )))
}

fn sample_types() -> Vec<Type> {
    vec![
        Type::INT,
        Type::FLOAT,
        Type::SFLOAT,
        Type::BOOL,
        Type::BYTE,
        Type::UINT,
        Type::Str,
        Type::Null,
        Type::array(Type::INT),
        Type::array(Type::array(Type::FLOAT)),
        Type::tuple(vec![Type::INT, Type::FLOAT]),
        Type::tuple(vec![Type::tuple(vec![Type::INT]), Type::INT]),
        Type::func(Some(Type::INT), vec![Type::INT, Type::FLOAT]),
        Type::func(None, vec![]),
        point(),
    ]
}

#[test]
fn test_equals_is_reflexive_and_symmetric() {
    let types = sample_types();
    let copies = sample_types();

    for (a, a_copy) in types.iter().zip(&copies) {
        assert!(a.equals(a), "{} is not equal to itself", a);
        assert!(a.equals(a_copy), "{} is not equal to a rebuilt copy", a);

        for b in &types {
            assert_eq!(a.equals(b), b.equals(a), "asymmetric for {} and {}", a, b);
        }
    }
}

#[test]
fn test_distinct_types_are_not_equal() {
    let types = sample_types();

    for (i, a) in types.iter().enumerate() {
        for (j, b) in types.iter().enumerate() {
            if i != j {
                assert!(!a.equals(b), "{} should differ from {}", a, b);
            }
        }
    }
}

#[test]
fn test_string_is_array_of_uint() {
    assert!(Type::Str.equals(&Type::array(Type::UINT)));
    assert!(!Type::Str.equals(&Type::array(Type::INT)));
    assert_eq!(Type::Str.flat_type_name(), Type::array(Type::UINT).flat_type_name());
}

#[test]
fn test_null_is_accepted_by_references_only() {
    assert!(Type::Str.accepts(&Type::Null));
    assert!(point().accepts(&Type::Null));
    assert!(Type::func(None, vec![]).accepts(&Type::Null));
    assert!(!Type::INT.accepts(&Type::Null));
}

#[test]
fn test_sizes() {
    assert_eq!(Type::BOOL.get_size(), Some(1));
    assert_eq!(Type::INT.get_size(), Some(4));
    assert_eq!(Type::FLOAT.get_size(), Some(8));
    assert_eq!(Type::func(None, vec![]).get_size(), Some(FUNC_SIZE));
    assert_eq!(Type::array(Type::INT).get_size(), None);
    assert_eq!(Type::Str.get_size(), None);

    // 1 + 4 + 8 + pointer + 4
    assert_eq!(point().get_size(), Some(17 + POINTER_SIZE));
    assert_eq!(
        Type::tuple(vec![Type::INT, Type::func(None, vec![])]).get_size(),
        Some(4 + FUNC_SIZE)
    );
}

#[test]
fn test_layout_sorted_by_size_then_declaration() {
    let Type::Struct(object) = point() else {
        unreachable!()
    };
    let layout = object.get_layout();

    let keys: Vec<&str> = layout.entries().iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["weight", "name", "x", "y", "flag"]);

    assert_eq!(layout.offset_of("weight"), Some(0));
    assert_eq!(layout.offset_of("name"), Some(8));
    assert_eq!(layout.offset_of("x"), Some(16));
    assert_eq!(layout.offset_of("y"), Some(20));
    assert_eq!(layout.offset_of("flag"), Some(24));
    assert_eq!(layout.order_of("x"), Some(2));
    assert_eq!(layout.offset_of("missing"), None);
}

#[test]
fn test_layout_is_memoized_and_sums_to_size() {
    for ty in sample_types() {
        let layout = match &ty {
            Type::Struct(object) => object.get_layout(),
            Type::Tuple(tuple) => tuple.get_layout(),
            _ => continue,
        };

        let again = match &ty {
            Type::Struct(object) => object.get_layout(),
            Type::Tuple(tuple) => tuple.get_layout(),
            _ => unreachable!(),
        };
        assert!(std::ptr::eq(layout, again));

        let total: u32 = layout.entries().iter().map(|e| e.ty.slot_size()).sum();
        assert_eq!(Some(total), ty.get_size());
    }
}

#[test]
fn test_flat_type_names_do_not_collide() {
    let nested = Type::tuple(vec![Type::tuple(vec![Type::INT, Type::INT])]);
    let siblings = Type::tuple(vec![Type::tuple(vec![Type::INT]), Type::INT]);

    assert_eq!(nested.flat_type_name(), "tuple$tuple$int$int$$$$");
    assert_eq!(siblings.flat_type_name(), "tuple$tuple$int$$$int$$");
    assert_ne!(nested.flat_type_name(), siblings.flat_type_name());

    let names: std::collections::HashSet<String> =
        sample_types().iter().map(Type::flat_type_name).collect();
    // `str` shares its name with `array<uint>` only, which is not sampled.
    assert_eq!(names.len(), sample_types().len());

    assert_eq!(
        Type::func(None, vec![Type::INT]).flat_type_name(),
        "func$null$int$$"
    );
}

#[test]
fn test_display() {
    assert_eq!(Type::array(Type::INT).to_string(), "array<int>");
    assert_eq!(
        Type::func(Some(Type::INT), vec![Type::FLOAT]).to_string(),
        "func<int, float>"
    );
    assert_eq!(Type::func(None, vec![]).to_string(), "func<null>");
    assert_eq!(Type::tuple(vec![Type::INT, Type::BOOL]).to_string(), "tuple<int, bool>");
}

#[test]
fn test_resolve_primitive() {
    assert!(Type::resolve_primitive("int", false).is_some());
    assert!(Type::resolve_primitive("str", false).is_some());
    assert!(Type::resolve_primitive("uint", false).is_none());
    assert!(Type::resolve_primitive("uint", true).is_some());
    assert!(Type::resolve_primitive("Point", true).is_none());
}

fn linked_node() -> Type {
    let object = std::rc::Rc::new(StructType::declare(String::from("Node"), None, IndexMap::new()));
    let mut fields = IndexMap::new();
    fields.insert(String::from("value"), Type::INT);
    fields.insert(String::from("next"), Type::Struct(std::rc::Rc::clone(&object)));
    object.define_fields(fields).unwrap();
    Type::Struct(object)
}

#[test]
fn test_self_referencing_struct() {
    let a = linked_node();
    let b = linked_node();

    assert!(a.equals(&b));
    assert!(b.equals(&a));
    assert!(!a.equals(&point()));
    assert_eq!(a.flat_type_name(), "struct$Node$int$struct$Node$$$$");
    assert_eq!(a.flat_type_name(), b.flat_type_name());
    assert_eq!(a.get_size(), Some(POINTER_SIZE + 4));
    assert!(format!("{:?}", a).contains("next: Node"));
}

#[test]
fn test_fields_are_defined_once() {
    let object = StructType::declare(String::from("Late"), None, IndexMap::new());
    assert!(object.fields().is_empty());
    assert!(object.define_fields(IndexMap::new()).is_err());
}

#[test]
fn test_external_links() {
    let log = ExternalType::new("log");
    assert!(log.signature.is_none());

    let returns = log.link("_null").unwrap();
    let signature = returns.signature.as_ref().unwrap();
    assert_eq!(signature.ret, None);
    assert!(signature.params.is_empty());

    let with_param = returns.link("str").unwrap().link("float").unwrap();
    assert_eq!(with_param.signature.as_ref().unwrap().params, [Type::Str, Type::FLOAT]);
    assert_eq!(with_param.function, "log");

    assert!(returns.link("_null").is_none());
    assert!(returns.link("sfloat").is_none());
    assert!(log.link("Node").is_none());

    let ty = Type::External(Rc::new(with_param));
    assert_eq!(ty.as_func().unwrap().params.len(), 2);
    assert_eq!(ty.flat_type_name(), "external$log$$");
    assert_eq!(ty.to_string(), "external log");
    assert_eq!(ty.get_size(), None);
}
