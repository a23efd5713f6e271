//! Enums: named integer member sets, constructible from any value in the
//! base type's domain; equality is identity-sensitive.

use std::io::Write;

use derive_getters::Getters;

use crate::registry::Context;
use crate::result::Result;
use crate::types::{primitive, SharedStream, TypeDescriptor, TypeId};
use crate::value::{EnumValue, Value};

#[derive(Debug, Clone, Getters)]
pub struct EnumType {
    name: Option<String>,
    base: TypeId,
    members: Vec<(String, i128)>,
}

impl EnumType {
    pub fn new(name: Option<String>, base: TypeId, members: Vec<(String, i128)>) -> Self {
        Self { name, base, members }
    }

    pub fn member_name(&self, value: i128) -> Option<&str> {
        self.members.iter().find(|(_, v)| *v == value).map(|(n, _)| n.as_str())
    }

    pub fn member_value(&self, name: &str) -> Option<i128> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

pub(crate) fn decode(ctx: &Context, id: TypeId, stream: &SharedStream) -> Result<Value> {
    let (base, members_owner) = match ctx.get(id) {
        TypeDescriptor::Enum(e) => (e.base, id),
        _ => unreachable!(),
    };
    let raw = primitive::decode_number(ctx, base, stream)?.as_int()?;
    Ok(from_int(ctx, members_owner, raw))
}

/// Builds an enum value from an arbitrary integer, synthesizing a name-less
/// value for anything not declared as a member.
pub fn from_int(ctx: &Context, id: TypeId, raw: i128) -> Value {
    let name = match ctx.get(id) {
        TypeDescriptor::Enum(e) => e.member_name(raw).map(str::to_string),
        _ => None,
    };
    Value::Enum(EnumValue { enum_id: id, value: raw, name })
}

pub(crate) fn encode(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let base = match ctx.get(id) {
        TypeDescriptor::Enum(e) => e.base,
        _ => unreachable!(),
    };
    let raw = value.as_int()?;
    primitive::encode_number(ctx, base, &Value::Int(raw), writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endian;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    fn stream(bytes: &[u8]) -> SharedStream {
        Rc::new(RefCell::new(Cursor::new(bytes.to_vec())))
    }

    #[test]
    fn unknown_value_synthesizes_nameless_member() -> Result<()> {
        let mut ctx = Context::new(Endian::Little, 8);
        let base = ctx.resolve("uint16")?;
        let id = ctx.push_type(TypeDescriptor::Enum(EnumType {
            name: Some("E".into()),
            base,
            members: vec![("A".into(), 1), ("B".into(), 2)],
        }));
        let s = stream(&[9, 0]);
        let v = decode(&ctx, id, &s)?;
        match v {
            Value::Enum(e) => {
                assert_eq!(e.value, 9);
                assert_eq!(e.name, None);
            }
            _ => panic!("expected enum value"),
        }
        Ok(())
    }
}
