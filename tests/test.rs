use std::io::Cursor;
use std::rc::Rc;

use assert_matches::assert_matches;

use bstruct::registry::Endian;
use bstruct::result::{Error, Result};
use bstruct::types::TypeDescriptor;
use bstruct::value::Value;
use bstruct::{dumps, read, Context};

fn ctx(endian: Endian, pointer_width: u32, src: &str) -> Result<Rc<Context>> {
    let mut c = Context::new(endian, pointer_width);
    c.load(src)?;
    Ok(Rc::new(c))
}

fn array_bytes(v: &Value) -> Vec<u8> {
    match v {
        Value::Array(elems) => elems
            .iter()
            .map(|e| match e {
                Value::Bytes(b) => b[0],
                _ => panic!("expected a byte element"),
            })
            .collect(),
        _ => panic!("expected an array"),
    }
}

#[test]
fn basic_struct_reads_fields_in_order() -> Result<()> {
    let ctx = ctx(Endian::Little, 8, "struct t { uint8 a; uint16 b; uint32 c; };")?;
    let id = ctx.resolve("t")?;
    let bytes = [0x01, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
    let value = read(&ctx, id, Cursor::new(bytes.to_vec()))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(sv.get("a")?.as_int()?, 1);
    assert_eq!(sv.get("b")?.as_int()?, 2);
    assert_eq!(sv.get("c")?.as_int()?, 3);

    let out = dumps(&ctx, id, &value)?;
    assert_eq!(out, bytes);
    Ok(())
}

#[test]
fn null_terminated_char_array_stops_at_terminator() -> Result<()> {
    let ctx = ctx(Endian::Little, 8, "struct s { char name[]; uint32 tail; };")?;
    let id = ctx.resolve("s")?;
    let bytes = [0x66, 0x6f, 0x6f, 0x00, 0x0a, 0x00, 0x00, 0x00];
    let value = read(&ctx, id, Cursor::new(bytes.to_vec()))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(array_bytes(sv.get("name")?), b"foo");
    assert_eq!(sv.get("tail")?.as_int()?, 10);
    Ok(())
}

#[test]
fn bitfield_run_fills_little_endian_low_to_high() -> Result<()> {
    let def = "struct b { uint16 a:4; uint16 b:4; uint16 c:4; uint16 d:4; };";
    let ctx = ctx(Endian::Little, 8, def)?;
    let id = ctx.resolve("b")?;
    let value = read(&ctx, id, Cursor::new(vec![0x12, 0x34]))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(sv.get("a")?.as_int()?, 2);
    assert_eq!(sv.get("b")?.as_int()?, 1);
    assert_eq!(sv.get("c")?.as_int()?, 4);
    assert_eq!(sv.get("d")?.as_int()?, 3);
    Ok(())
}

#[test]
fn bitfield_run_fills_big_endian_high_to_low() -> Result<()> {
    let def = "struct b { uint16 a:4; uint16 b:4; uint16 c:4; uint16 d:4; };";
    let ctx = ctx(Endian::Big, 8, def)?;
    let id = ctx.resolve("b")?;
    let value = read(&ctx, id, Cursor::new(vec![0x12, 0x34]))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(sv.get("a")?.as_int()?, 1);
    assert_eq!(sv.get("b")?.as_int()?, 2);
    assert_eq!(sv.get("c")?.as_int()?, 3);
    assert_eq!(sv.get("d")?.as_int()?, 4);
    Ok(())
}

#[test]
fn bitfield_wider_than_its_storage_unit_fails_at_load_time() {
    let mut c = Context::new(Endian::Little, 8);
    let err = c.load("struct s { uint8 a:10; };").unwrap_err();
    assert_matches!(err, Error::BitfieldStraddle { bits: 10, storage: 1 });
}

#[test]
fn enum_and_flag_decode_members_and_synthesize_unknown_values() -> Result<()> {
    let ctx = ctx(Endian::Little, 8, "enum E : uint16 { A = 1, B = 2 }; flag F : uint8 { X = 1, Y = 2, Z = 4 };")?;
    let e = ctx.resolve("E")?;
    let f = ctx.resolve("F")?;

    let b = read(&ctx, e, Cursor::new(vec![0x02, 0x00]))?;
    match b {
        Value::Enum(v) => {
            assert_eq!(v.value, 2);
            assert_eq!(v.name.as_deref(), Some("B"));
        }
        _ => panic!("expected an enum value"),
    }

    let xz = read(&ctx, f, Cursor::new(vec![0x05]))?;
    match (&xz, ctx.get(f)) {
        (Value::Flag(v), TypeDescriptor::Flag(ft)) => {
            let mut names = ft.decompose(v.value);
            names.sort();
            assert_eq!(names, vec!["X", "Z"]);
        }
        _ => panic!("expected a flag value"),
    }

    let unknown = read(&ctx, e, Cursor::new(vec![0x09, 0x00]))?;
    match unknown {
        Value::Enum(v) => {
            assert_eq!(v.value, 9);
            assert_eq!(v.name, None);
        }
        _ => panic!("expected an enum value"),
    }
    Ok(())
}

#[test]
fn pointer_to_char_dereferences_a_null_terminated_string() -> Result<()> {
    let ctx = ctx(Endian::Little, 4, "struct p { char *s; };")?;
    let id = ctx.resolve("p")?;
    let bytes = [0x04, 0x00, 0x00, 0x00, 0x66, 0x6f, 0x6f, 0x00];
    let value = read(&ctx, id, Cursor::new(bytes.to_vec()))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    let ptr = match sv.get("s")? {
        Value::Pointer(p) => p,
        _ => panic!("expected a pointer value"),
    };
    let first = ptr.dereference()?;
    assert_matches!(&*first, Value::Bytes(b) if b.as_slice() == b"foo");

    // Stable across repeated calls without intervening stream mutation.
    let second = ptr.dereference()?;
    assert!(Rc::ptr_eq(&first, &second));
    Ok(())
}

#[test]
fn dynamic_array_length_is_driven_by_a_sibling_field_expression() -> Result<()> {
    let ctx = ctx(Endian::Little, 8, "struct d { uint8 n; uint32 v[n+1]; };")?;
    let id = ctx.resolve("d")?;
    let bytes = [
        0x02, // n = 2
        0x01, 0x00, 0x00, 0x00, // v[0] = 1
        0x02, 0x00, 0x00, 0x00, // v[1] = 2
        0x03, 0x00, 0x00, 0x00, // v[2] = 3
    ];
    let value = read(&ctx, id, Cursor::new(bytes.to_vec()))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(sv.get("n")?.as_int()?, 2);
    let v = match sv.get("v")? {
        Value::Array(v) => v,
        _ => panic!("expected an array"),
    };
    let got: Vec<i128> = v.iter().map(|e| e.as_int().unwrap()).collect();
    assert_eq!(got, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn structs_are_packed_by_default() -> Result<()> {
    let ctx = ctx(Endian::Little, 8, "struct a { uint8 x; uint32 y; uint8 z; };")?;
    let id = ctx.resolve("a")?;
    match ctx.get(id) {
        TypeDescriptor::Structure(agg) => {
            assert_eq!(agg.fields[0].offset, Some(0));
            assert_eq!(agg.fields[1].offset, Some(1));
            assert_eq!(agg.fields[2].offset, Some(5));
            assert_eq!(agg.size, Some(6));
        }
        _ => panic!("expected a struct"),
    }
    Ok(())
}

#[test]
fn aligned_struct_fields_land_on_their_natural_alignment() -> Result<()> {
    use bstruct::types::{Aggregate, AggregateKind, Field};

    let c = Context::new(Endian::Little, 8);
    let x = c.resolve("uint8")?;
    let y = c.resolve("uint32")?;
    let z = c.resolve("uint8")?;

    let mut agg = Aggregate::new(AggregateKind::Struct);
    agg.align = true;
    agg.add_field(Field::new("x", x));
    agg.add_field(Field::new("y", y));
    agg.add_field(Field::new("z", z));
    agg.finalize(&c)?;

    assert_eq!(agg.fields[0].offset, Some(0));
    assert_eq!(agg.fields[1].offset, Some(4));
    assert_eq!(agg.fields[2].offset, Some(8));
    assert_eq!(agg.size, Some(12));
    Ok(())
}

#[test]
fn union_fields_alias_the_same_bytes() -> Result<()> {
    let ctx = ctx(Endian::Little, 8, "union u { uint32 a; uint8 b[4]; };")?;
    let id = ctx.resolve("u")?;

    let mut sv = bstruct::value::StructValue::new();
    sv.set("a", Value::Int(0x04030201), 0);
    let encoded = dumps(&ctx, id, &Value::Struct(sv))?;
    assert_eq!(encoded, vec![0x01, 0x02, 0x03, 0x04]);

    let decoded = read(&ctx, id, Cursor::new(encoded))?;
    let sv = match &decoded {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(array_bytes(sv.get("b")?), vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn expression_evaluation_is_a_pure_function_of_scope_and_constants() -> Result<()> {
    let mut c = Context::new(Endian::Little, 8);
    c.load("#define BASE 4\n")?;
    let scope = [("n".to_string(), 3i128)];
    let a = bstruct::expr::evaluate(&c, &scope, "n * BASE + 1")?;
    let b = bstruct::expr::evaluate(&c, &scope, "n * BASE + 1")?;
    assert_eq!(a, b);
    assert_eq!(a, 13);
    Ok(())
}

#[test]
fn anonymous_nested_struct_fields_merge_into_the_parent_namespace() -> Result<()> {
    let ctx = ctx(
        Endian::Little,
        8,
        "struct t { struct { uint8 a; uint8 b; }; uint16 c; };",
    )?;
    let id = ctx.resolve("t")?;
    let bytes = [0x01, 0x02, 0x03, 0x00];
    let value = read(&ctx, id, Cursor::new(bytes.to_vec()))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => panic!("expected a struct value"),
    };
    assert_eq!(sv.get("a")?.as_int()?, 1);
    assert_eq!(sv.get("b")?.as_int()?, 2);
    assert_eq!(sv.get("c")?.as_int()?, 3);

    let out = dumps(&ctx, id, &value)?;
    assert_eq!(out, bytes);
    Ok(())
}

#[test]
fn unresolved_type_name_reports_a_resolve_error() {
    let c = Context::new(Endian::Little, 8);
    assert_matches!(c.resolve("no_such_type"), Err(Error::ResolveError(_)));
}
