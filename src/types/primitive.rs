//! Fixed-width integers/floats, arbitrary-width "bytes" integers, char,
//! wide char, and LEB128 codecs.

use std::io::Write;

use crate::registry::{Context, Endian};
use crate::result::{Error, Result};
use crate::types::{SharedStream, TypeDescriptor, TypeId};
use crate::value::Value;

fn read_bytes(stream: &SharedStream, width: u32) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut buf = vec![0u8; width as usize];
    stream.borrow_mut().read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Eof
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}

fn assemble(bytes: &[u8], endian: Endian) -> u128 {
    let mut value = 0u128;
    match endian {
        Endian::Little => {
            for (i, b) in bytes.iter().enumerate() {
                value |= (*b as u128) << (8 * i);
            }
        }
        Endian::Big => {
            for b in bytes {
                value = (value << 8) | *b as u128;
            }
        }
    }
    value
}

fn disassemble(value: u128, width: u32, endian: Endian) -> Vec<u8> {
    let mut bytes = vec![0u8; width as usize];
    match endian {
        Endian::Little => {
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = ((value >> (8 * i)) & 0xFF) as u8;
            }
        }
        Endian::Big => {
            for (i, b) in bytes.iter_mut().rev().enumerate() {
                *b = ((value >> (8 * i)) & 0xFF) as u8;
            }
        }
    }
    bytes
}

fn sign_extend(value: u128, width: u32) -> i128 {
    let bits = width * 8;
    if bits >= 128 {
        return value as i128;
    }
    let shift = 128 - bits;
    ((value << shift) as i128) >> shift
}

fn half_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) & 1;
    let exp = (bits >> 10) & 0x1F;
    let frac = bits & 0x3FF;
    let f = if exp == 0 {
        (frac as f32) * 2f32.powi(-24)
    } else if exp == 0x1F {
        if frac == 0 {
            f32::INFINITY
        } else {
            f32::NAN
        }
    } else {
        (1.0 + frac as f32 / 1024.0) * 2f32.powi(exp as i32 - 15)
    };
    if sign == 1 {
        -f
    } else {
        f
    }
}

fn f32_to_half(value: f32) -> u16 {
    // Round-to-nearest conversion; sufficient for the widths this codec
    // round-trips (it is not used for arithmetic, only wire representation).
    let bits = value.to_bits();
    let sign = (bits >> 31) & 1;
    let exp = ((bits >> 23) & 0xFF) as i32 - 127 + 15;
    let frac = bits & 0x7FFFFF;
    let half = if exp <= 0 {
        0u16
    } else if exp >= 0x1F {
        0x7C00
    } else {
        ((exp as u16) << 10) | (frac >> 13) as u16
    };
    ((sign as u16) << 15) | half
}

pub(crate) fn decode_number(ctx: &Context, id: TypeId, stream: &SharedStream) -> Result<Value> {
    match ctx.get(id) {
        TypeDescriptor::Int { width, signed } => {
            let bytes = read_bytes(stream, *width)?;
            let raw = assemble(&bytes, ctx.endian());
            if *signed {
                Ok(Value::Int(sign_extend(raw, *width)))
            } else {
                Ok(Value::Int(raw as i128))
            }
        }
        TypeDescriptor::BytesInt { width, signed, .. } => {
            let bytes = read_bytes(stream, *width)?;
            let raw = assemble(&bytes, ctx.endian());
            if *signed {
                Ok(Value::Int(sign_extend(raw, *width)))
            } else {
                Ok(Value::Int(raw as i128))
            }
        }
        TypeDescriptor::Float { width } => {
            let bytes = read_bytes(stream, *width)?;
            let f = match width {
                2 => {
                    let raw = assemble(&bytes, ctx.endian()) as u16;
                    half_to_f32(raw) as f64
                }
                4 => {
                    let raw = assemble(&bytes, ctx.endian()) as u32;
                    f32::from_bits(raw) as f64
                }
                8 => {
                    let raw = assemble(&bytes, ctx.endian()) as u64;
                    f64::from_bits(raw)
                }
                other => return Err(Error::ResolveError(format!("unsupported float width {other}"))),
            };
            Ok(Value::Float(f))
        }
        _ => unreachable!("decode_number called on a non-numeric descriptor"),
    }
}

pub(crate) fn encode_number(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    match ctx.get(id) {
        TypeDescriptor::Int { width, signed } | TypeDescriptor::BytesInt { width, signed, .. } => {
            let v = value.as_int()?;
            check_range(v, *width, *signed)?;
            let bytes = disassemble(v as u128, *width, ctx.endian());
            writer.write_all(&bytes)?;
            Ok(())
        }
        TypeDescriptor::Float { width } => {
            let f = match value {
                Value::Float(f) => *f,
                Value::Int(i) => *i as f64,
                _ => return Err(Error::ExpressionParserError("value is not a float".into())),
            };
            let raw: u128 = match width {
                2 => f32_to_half(f as f32) as u128,
                4 => (f as f32).to_bits() as u128,
                8 => f.to_bits() as u128,
                other => return Err(Error::ResolveError(format!("unsupported float width {other}"))),
            };
            let bytes = disassemble(raw, *width, ctx.endian());
            writer.write_all(&bytes)?;
            Ok(())
        }
        _ => unreachable!("encode_number called on a non-numeric descriptor"),
    }
}

fn check_range(value: i128, width: u32, signed: bool) -> Result<()> {
    let bits = (width * 8).min(127);
    let (lo, hi) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if value < lo || value > hi {
        Err(Error::OverflowError { value, width })
    } else {
        Ok(())
    }
}

pub(crate) fn decode_char(stream: &SharedStream) -> Result<Value> {
    let bytes = read_bytes(stream, 1)?;
    Ok(Value::Bytes(bytes))
}

pub(crate) fn encode_char(value: &Value, writer: &mut dyn Write) -> Result<()> {
    match value {
        Value::Bytes(b) if b.len() == 1 => {
            writer.write_all(b)?;
            Ok(())
        }
        Value::Int(i) => {
            writer.write_all(&[*i as u8])?;
            Ok(())
        }
        _ => Err(Error::ArraySizeError { expected: 1, actual: 0 }),
    }
}

pub(crate) fn decode_wchar(ctx: &Context, stream: &SharedStream) -> Result<Value> {
    let bytes = read_bytes(stream, 2)?;
    let unit = assemble(&bytes, ctx.endian()) as u16;
    let s = String::from_utf16_lossy(&[unit]);
    Ok(Value::Str(s))
}

pub(crate) fn encode_wchar(ctx: &Context, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let unit = match value {
        Value::Str(s) => s.encode_utf16().next().unwrap_or(0),
        Value::Int(i) => *i as u16,
        _ => return Err(Error::ExpressionParserError("value is not a wide char".into())),
    };
    writer.write_all(&disassemble(unit as u128, 2, ctx.endian()))?;
    Ok(())
}

pub(crate) fn decode_leb128(stream: &SharedStream, signed: bool) -> Result<Value> {
    use std::io::Read;
    let mut result: u128 = 0;
    let mut shift = 0u32;
    let mut byte;
    loop {
        let mut b = [0u8; 1];
        stream.borrow_mut().read_exact(&mut b).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Eof
            } else {
                Error::Io(e)
            }
        })?;
        byte = b[0];
        result |= ((byte & 0x7F) as u128) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if signed && shift < 128 && (byte & 0x40) != 0 {
        result |= u128::MAX << shift;
    }
    Ok(Value::Int(result as i128))
}

pub(crate) fn encode_leb128(value: &Value, signed: bool, writer: &mut dyn Write) -> Result<()> {
    let mut v = value.as_int()?;
    if !signed && v < 0 {
        return Err(Error::OverflowError { value: v, width: 0 });
    }
    loop {
        let mut byte = (v & 0x7F) as u8;
        v >>= 7;
        let done = if signed {
            (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0)
        } else {
            v == 0
        };
        if !done {
            byte |= 0x80;
        }
        writer.write_all(&[byte])?;
        if done {
            break;
        }
    }
    Ok(())
}

/// Reads a null-terminated byte string, used for pointer-to-char dereference.
pub(crate) fn decode_cstring(stream: &SharedStream) -> Result<Value> {
    use std::io::Read;
    let mut buf = Vec::new();
    loop {
        let mut b = [0u8; 1];
        let n = stream.borrow_mut().read(&mut b)?;
        if n == 0 || b[0] == 0 {
            break;
        }
        buf.push(b[0]);
    }
    Ok(Value::Bytes(buf))
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
    fn little_endian_uint32() -> Result<()> {
        let ctx = Context::new(Endian::Little, 8);
        let id = ctx.resolve("uint32")?;
        let s = stream(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(decode_number(&ctx, id, &s)?.as_int()?, 1);
        Ok(())
    }

    #[test]
    fn signed_int8_sign_extends() -> Result<()> {
        let ctx = Context::new(Endian::Little, 8);
        let id = ctx.resolve("int8")?;
        let s = stream(&[0xFF]);
        assert_eq!(decode_number(&ctx, id, &s)?.as_int()?, -1);
        Ok(())
    }

    #[test]
    fn uleb128_multi_byte() -> Result<()> {
        let s = stream(&[0xE5, 0x8E, 0x26]);
        assert_eq!(decode_leb128(&s, false)?.as_int()?, 624485);
        Ok(())
    }

    #[test]
    fn overflow_is_rejected() {
        let ctx = Context::new(Endian::Little, 8);
        let id = ctx.resolve("uint8").unwrap();
        let mut out = Vec::new();
        let err = encode_number(&ctx, id, &Value::Int(300), &mut out).unwrap_err();
        assert!(matches!(err, Error::OverflowError { .. }));
    }
}
