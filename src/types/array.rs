//! Fixed, expression-sized, null-terminated and EOF-terminated arrays.

use std::io::Write;

use crate::expr;
use crate::registry::Context;
use crate::result::{Error, Result};
use crate::types::{decode as decode_type, encode as encode_type, SharedStream, TypeDescriptor, TypeId};
use crate::value::{Scope, Value};

#[derive(Debug, Clone)]
pub enum ArrayCount {
    Fixed(u32),
    /// Stores the original expression text; re-evaluated against the current
    /// scope every time (sizes are not cached across reads).
    Expr(String),
    NullTerminated,
    Eof,
}

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub element: TypeId,
    pub count: ArrayCount,
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Int(0) => true,
        Value::Bytes(b) => b.iter().all(|b| *b == 0),
        Value::Str(s) => s.is_empty() || s.chars().all(|c| c == '\0'),
        _ => false,
    }
}

pub(crate) fn decode(ctx: &std::rc::Rc<Context>, id: TypeId, stream: &SharedStream, scope: &Scope) -> Result<Value> {
    let array = match ctx.get(id) {
        TypeDescriptor::Array(a) => a,
        _ => unreachable!(),
    };
    match &array.count {
        ArrayCount::Fixed(n) => {
            let mut out = Vec::with_capacity(*n as usize);
            for _ in 0..*n {
                out.push(decode_type(ctx, array.element, stream, scope)?);
            }
            Ok(Value::Array(out))
        }
        ArrayCount::Expr(src) => {
            let n = expr::evaluate(ctx, scope, src)?.max(0) as u32;
            let mut out = Vec::with_capacity(n as usize);
            for _ in 0..n {
                out.push(decode_type(ctx, array.element, stream, scope)?);
            }
            Ok(Value::Array(out))
        }
        ArrayCount::NullTerminated => {
            let mut out = Vec::new();
            loop {
                let elem = decode_type(ctx, array.element, stream, scope)?;
                if is_zero(&elem) {
                    break;
                }
                out.push(elem);
            }
            Ok(Value::Array(out))
        }
        ArrayCount::Eof => {
            let mut out = Vec::new();
            loop {
                match decode_type(ctx, array.element, stream, scope) {
                    Ok(elem) => out.push(elem),
                    Err(Error::Eof) => {
                        log::trace!("eof-terminated array stopped after {} elements", out.len());
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(Value::Array(out))
        }
    }
}

pub(crate) fn encode(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let array = match ctx.get(id) {
        TypeDescriptor::Array(a) => a,
        _ => unreachable!(),
    };
    let elems = match value {
        Value::Array(v) => v,
        _ => return Err(Error::ArraySizeError { expected: 0, actual: 0 }),
    };
    match &array.count {
        ArrayCount::Fixed(n) => {
            if elems.len() != *n as usize {
                return Err(Error::ArraySizeError { expected: *n as usize, actual: elems.len() });
            }
            for e in elems {
                encode_type(ctx, array.element, e, writer)?;
            }
            Ok(())
        }
        ArrayCount::Expr(_) => {
            for e in elems {
                encode_type(ctx, array.element, e, writer)?;
            }
            Ok(())
        }
        ArrayCount::NullTerminated => {
            for e in elems {
                encode_type(ctx, array.element, e, writer)?;
            }
            match ctx.get(array.element) {
                TypeDescriptor::Char => writer.write_all(&[0])?,
                TypeDescriptor::WChar => writer.write_all(&[0, 0])?,
                _ => encode_type(ctx, array.element, &Value::Int(0), writer)?,
            }
            Ok(())
        }
        ArrayCount::Eof => {
            for e in elems {
                encode_type(ctx, array.element, e, writer)?;
            }
            Ok(())
        }
    }
}
