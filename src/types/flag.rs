//! Flags: bitwise-composable named integer member sets.

use std::io::Write;

use derive_getters::Getters;

use crate::registry::Context;
use crate::result::Result;
use crate::types::{primitive, SharedStream, TypeDescriptor, TypeId};
use crate::value::{FlagValue, Value};

#[derive(Debug, Clone, Getters)]
pub struct FlagType {
    name: Option<String>,
    base: TypeId,
    members: Vec<(String, i128)>,
}

impl FlagType {
    pub fn new(name: Option<String>, base: TypeId, members: Vec<(String, i128)>) -> Self {
        Self { name, base, members }
    }

    /// Names of the declared single-bit (or multi-bit) members composing
    /// `value`, in declaration order.
    pub fn decompose(&self, value: i128) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, bit)| *bit != 0 && value & bit == *bit)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

pub(crate) fn decode(ctx: &Context, id: TypeId, stream: &SharedStream) -> Result<Value> {
    let base = match ctx.get(id) {
        TypeDescriptor::Flag(f) => f.base,
        _ => unreachable!(),
    };
    let raw = primitive::decode_number(ctx, base, stream)?.as_int()?;
    Ok(Value::Flag(FlagValue { flag_id: id, value: raw }))
}

pub(crate) fn encode(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let base = match ctx.get(id) {
        TypeDescriptor::Flag(f) => f.base,
        _ => unreachable!(),
    };
    let raw = value.as_int()?;
    primitive::encode_number(ctx, base, &Value::Int(raw), writer)
}

/// Bitwise composition of two flag values of the same flag type.
pub fn combine(op: char, a: i128, b: i128) -> i128 {
    match op {
        '|' => a | b,
        '&' => a & b,
        '^' => a ^ b,
        _ => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_lists_set_members() {
        let flag = FlagType {
            name: Some("F".into()),
            base: TypeId(0),
            members: vec![("X".into(), 1), ("Y".into(), 2), ("Z".into(), 4)],
        };
        let mut names = flag.decompose(0b101);
        names.sort();
        assert_eq!(names, vec!["X", "Z"]);
    }
}
