//! Pointers: lazy, cached dereference; address arithmetic producing new,
//! uncached pointer values.

use std::io::Write;
use std::rc::Rc;

use crate::registry::Context;
use crate::result::{Error, Result};
use crate::types::{primitive, SharedStream, TypeDescriptor, TypeId};
use crate::value::{PointerValue, Scope, Value};

#[derive(Debug, Clone, Copy)]
pub struct PointerType {
    pub target: TypeId,
}

pub(crate) fn decode(ctx: &Rc<Context>, id: TypeId, stream: &SharedStream, _scope: &Scope) -> Result<Value> {
    let target = match ctx.get(id) {
        TypeDescriptor::Pointer(p) => p.target,
        _ => unreachable!(),
    };
    let addr_id = ctx.pointer_type();
    let addr = primitive::decode_number(ctx, addr_id, stream)?.as_int()?;
    Ok(Value::Pointer(PointerValue::new(ctx.clone(), target, addr, Some(stream.clone()))))
}

pub(crate) fn encode(ctx: &Context, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let addr = match value {
        Value::Pointer(p) => p.address,
        Value::Int(i) => *i,
        _ => return Err(Error::ExpressionParserError("value is not a pointer".into())),
    };
    let addr_id = ctx.pointer_type();
    primitive::encode_number(ctx, addr_id, &Value::Int(addr), writer)
}

/// Arithmetic on a pointer value. Division/remainder/power all match the
/// evaluator's integer semantics (`expr::evaluate`'s floor division applies
/// equally here, but pointer arithmetic is almost always `+`/`-`).
pub fn arithmetic(ptr: &PointerValue, op: char, rhs: i128) -> Result<PointerValue> {
    let delta = match op {
        '+' => rhs,
        '-' => -rhs,
        _ => return Err(Error::ExpressionParserError(format!("unsupported pointer operator `{op}`"))),
    };
    Ok(ptr.offset(delta))
}
