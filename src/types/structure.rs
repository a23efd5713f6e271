//! Structures and unions: offset/alignment layout, bitfield-run coalescing,
//! and the struct/union read and write contracts.

use std::io::{Seek, SeekFrom, Write};

use bitflags::bitflags;

use crate::bitbuffer::{BitReader, BitWriter};
use crate::registry::Context;
use crate::result::{Error, Result};
use crate::types::{decode as decode_type, encode as encode_type, enum_type, static_size, SharedStream, TypeDescriptor, TypeId};
use crate::utils::align_to;
use crate::value::{FlagValue, Scope, StructValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Struct,
    Union,
}

bitflags! {
    /// `#[flag,flag,...]` directives attached immediately before a
    /// struct/union declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirectiveFlags: u8 {
        /// Opts the type out of a compiled fast path. Inert here: this
        /// implementation has no compiled fast path to opt out of.
        const NOCOMPILE = 1 << 0;
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    pub bits: Option<u32>,
    pub explicit_offset: Option<u32>,
    pub offset: Option<u32>,
    /// An anonymous struct/union field merges its children into the parent
    /// value's namespace instead of being recorded under `name`.
    pub anonymous: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
            bits: None,
            explicit_offset: None,
            offset: None,
            anonymous: false,
        }
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = Some(bits);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.explicit_offset = Some(offset);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub kind: AggregateKind,
    pub name: Option<String>,
    pub fields: Vec<Field>,
    /// Whether fields are padding-aligned to their natural alignment.
    /// Defaults to `false` (packed); the definition language has no syntax
    /// to opt a struct into alignment today, so this only matters for
    /// `Aggregate`s built directly through the Rust API.
    pub align: bool,
    pub directives: DirectiveFlags,
    pub size: Option<u32>,
    pub alignment: u32,
}

impl Aggregate {
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            name: None,
            fields: Vec::new(),
            align: false,
            directives: DirectiveFlags::empty(),
            size: None,
            alignment: 1,
        }
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    fn backing_width(&self, ctx: &Context, ty: TypeId) -> u32 {
        static_size(ctx, ty).unwrap_or(4)
    }

    /// Computes field offsets, aggregate size and alignment. Must be called
    /// once all fields have been added and before the type is used to
    /// read/write values.
    pub fn finalize(&mut self, ctx: &Context) -> Result<()> {
        match self.kind {
            AggregateKind::Struct => self.finalize_struct(ctx),
            AggregateKind::Union => self.finalize_union(ctx),
        }
    }

    fn finalize_struct(&mut self, ctx: &Context) -> Result<()> {
        let mut offset: u32 = 0;
        let mut max_align: u32 = 1;
        let mut dynamic = false;

        let mut run_width: Option<u32> = None;
        let mut run_bits_remaining: u32 = 0;
        let mut run_offset: u32 = 0;

        for field in &mut self.fields {
            if let Some(bits) = field.bits {
                let width = self.backing_width_static(ctx, field.ty);
                if bits > width * 8 {
                    return Err(Error::BitfieldStraddle { bits, storage: width });
                }
                let joins = run_width == Some(width) && run_bits_remaining >= bits && !dynamic;
                if joins {
                    field.offset = Some(run_offset);
                    run_bits_remaining -= bits;
                } else {
                    if dynamic {
                        field.offset = None;
                        continue;
                    }
                    let falign = if self.align { width } else { 1 };
                    offset = align_to(offset as u64, falign as u64) as u32;
                    field.offset = Some(offset);
                    run_offset = offset;
                    run_width = Some(width);
                    run_bits_remaining = width * 8 - bits;
                    offset += width;
                    max_align = max_align.max(falign);
                }
                continue;
            }

            run_width = None;
            run_bits_remaining = 0;

            if dynamic {
                field.offset = None;
                continue;
            }

            let falign = if self.align { ctx.get(field.ty).alignment(ctx) } else { 1 };
            let base_offset = align_to(offset as u64, falign as u64) as u32;
            let used_offset = field.explicit_offset.unwrap_or(base_offset);
            field.offset = Some(used_offset);
            max_align = max_align.max(falign);

            match static_size(ctx, field.ty) {
                Some(sz) => offset = used_offset + sz,
                None => {
                    if !dynamic {
                        log::debug!(
                            "struct {:?} became dynamic at field `{}`",
                            self.name,
                            field.name
                        );
                    }
                    dynamic = true;
                }
            }
        }

        if !dynamic {
            offset = align_to(offset as u64, max_align as u64) as u32;
        }
        self.alignment = max_align;
        self.size = if dynamic { None } else { Some(offset) };
        Ok(())
    }

    fn finalize_union(&mut self, ctx: &Context) -> Result<()> {
        let mut max_size: u32 = 0;
        let mut max_align: u32 = 1;
        let mut dynamic = false;
        for field in &mut self.fields {
            field.offset = Some(field.explicit_offset.unwrap_or(0));
            let falign = ctx.get(field.ty).alignment(ctx);
            max_align = max_align.max(falign);
            match static_size(ctx, field.ty) {
                Some(sz) => max_size = max_size.max(field.offset.unwrap() + sz),
                None => dynamic = true,
            }
        }
        self.alignment = max_align;
        self.size = if dynamic { None } else { Some(align_to(max_size as u64, max_align as u64) as u32) };
        Ok(())
    }

    fn backing_width_static(&self, ctx: &Context, ty: TypeId) -> u32 {
        self.backing_width(ctx, ty)
    }
}

fn bitfield_value(ctx: &Context, ty: TypeId, raw: u64) -> Value {
    match ctx.get(ty) {
        TypeDescriptor::Enum(_) => enum_type::from_int(ctx, ty, raw as i128),
        TypeDescriptor::Flag(_) => Value::Flag(FlagValue { flag_id: ty, value: raw as i128 }),
        _ => Value::Int(raw as i128),
    }
}

pub(crate) fn decode(
    ctx: &std::rc::Rc<Context>,
    id: TypeId,
    stream: &SharedStream,
    outer_scope: &Scope,
) -> Result<Value> {
    let aggregate = match ctx.get(id) {
        TypeDescriptor::Structure(a) => a,
        _ => unreachable!(),
    };
    match aggregate.kind {
        AggregateKind::Struct => decode_struct(ctx, id, stream, outer_scope),
        AggregateKind::Union => decode_union(ctx, id, stream, outer_scope),
    }
}

fn decode_struct(ctx: &std::rc::Rc<Context>, id: TypeId, stream: &SharedStream, outer_scope: &Scope) -> Result<Value> {
    let aggregate = match ctx.get(id) {
        TypeDescriptor::Structure(a) => a.clone(),
        _ => unreachable!(),
    };
    let start = stream.borrow_mut().stream_position()?;
    let mut bits = BitReader::new();
    let mut scope = outer_scope.clone();
    let mut sv = StructValue::new();

    for field in &aggregate.fields {
        if let Some(off) = field.offset {
            let target = start + off as u64;
            let current = stream.borrow_mut().stream_position()?;
            if target > current {
                stream.borrow_mut().seek(SeekFrom::Start(target))?;
                bits.reset();
            }
        }
        let (value, size) = if let Some(bitc) = field.bits {
            let width = static_size(ctx, field.ty).unwrap_or(4);
            let raw = {
                let mut s = stream.borrow_mut();
                bits.read(&mut *s, ctx.endian(), width, bitc)?
            };
            (bitfield_value(ctx, field.ty, raw), 0)
        } else {
            bits.reset();
            let before = stream.borrow_mut().stream_position()?;
            let value = decode_type(ctx, field.ty, stream, &scope)?;
            let after = stream.borrow_mut().stream_position()?;
            (value, (after - before) as usize)
        };
        if let Ok(i) = value.as_int() {
            scope.push(field.name.clone(), i);
        }
        if field.anonymous {
            if let Value::Struct(inner) = &value {
                for (name, v) in inner.iter() {
                    sv.set(name.clone(), v.clone(), 0);
                }
            }
        } else {
            sv.set(field.name.clone(), value, size);
        }
    }
    if aggregate.align {
        if let Some(align) = Some(aggregate.alignment).filter(|a| *a > 1) {
            let pos = stream.borrow_mut().stream_position()?;
            let consumed = pos - start;
            let padded = align_to(consumed, align as u64);
            if padded != consumed {
                stream.borrow_mut().seek(SeekFrom::Start(start + padded))?;
            }
        }
    }
    Ok(Value::Struct(sv))
}

fn decode_union(ctx: &std::rc::Rc<Context>, id: TypeId, stream: &SharedStream, outer_scope: &Scope) -> Result<Value> {
    let aggregate = match ctx.get(id) {
        TypeDescriptor::Structure(a) => a.clone(),
        _ => unreachable!(),
    };
    let start = stream.borrow_mut().stream_position()?;
    let mut sv = StructValue::new();
    let mut consumed: u64 = aggregate.size.map(|s| s as u64).unwrap_or(0);

    for field in &aggregate.fields {
        let off = field.offset.unwrap_or(0) as u64;
        stream.borrow_mut().seek(SeekFrom::Start(start + off))?;
        let before = stream.borrow_mut().stream_position()?;
        let value = decode_type(ctx, field.ty, stream, outer_scope)?;
        let after = stream.borrow_mut().stream_position()?;
        consumed = consumed.max(after - start);
        if field.anonymous {
            if let Value::Struct(inner) = &value {
                for (name, v) in inner.iter() {
                    sv.set(name.clone(), v.clone(), 0);
                }
            }
        } else {
            sv.set(field.name.clone(), value, (after - before) as usize);
        }
    }
    stream.borrow_mut().seek(SeekFrom::Start(start + consumed))?;
    Ok(Value::Struct(sv))
}

/// A `Write` wrapper that counts bytes so struct/union encoding can compute
/// padding without requiring the sink to be seekable.
struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    count: u64,
}

impl<'a> Write for CountingWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

pub(crate) fn encode(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let aggregate = match ctx.get(id) {
        TypeDescriptor::Structure(a) => a,
        _ => unreachable!(),
    };
    match aggregate.kind {
        AggregateKind::Struct => encode_struct(ctx, aggregate, value, writer),
        AggregateKind::Union => encode_union(ctx, aggregate, value, writer),
    }
}

/// Reassembles the flattened fields an anonymous struct/union field
/// contributed at decode time back into a nested value it can be encoded
/// from, recursing through any further nested anonymous fields.
fn anonymous_value(ctx: &Context, ty: TypeId, sv: &StructValue) -> Result<Value> {
    let aggregate = match ctx.get(ty) {
        TypeDescriptor::Structure(a) => a.clone(),
        _ => unreachable!(),
    };
    let mut inner = StructValue::new();
    for field in &aggregate.fields {
        if field.anonymous {
            if let Value::Struct(nested) = anonymous_value(ctx, field.ty, sv)? {
                for (name, v) in nested.iter() {
                    inner.set(name.clone(), v.clone(), 0);
                }
            }
        } else {
            inner.set(field.name.clone(), sv.get(&field.name)?.clone(), 0);
        }
    }
    Ok(Value::Struct(inner))
}

fn encode_struct(ctx: &Context, aggregate: &Aggregate, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let sv = match value {
        Value::Struct(sv) => sv,
        _ => return Err(Error::ExpressionParserError("value is not a struct".into())),
    };
    let mut out = CountingWriter { inner: writer, count: 0 };
    let mut bitw = BitWriter::new();
    for field in &aggregate.fields {
        if let Some(off) = field.offset {
            if (off as u64) > out.count {
                let pad = off as u64 - out.count;
                let zeros = vec![0u8; pad as usize];
                out.write_all(&zeros)?;
            }
        }
        let owned;
        let fvalue = if field.anonymous {
            owned = anonymous_value(ctx, field.ty, sv)?;
            &owned
        } else {
            sv.get(&field.name)?
        };
        if let Some(bitc) = field.bits {
            let width = static_size(ctx, field.ty).unwrap_or(4);
            let raw = fvalue.as_int()? as u64;
            bitw.write(&mut out, ctx.endian(), width, bitc, raw)?;
        } else {
            bitw.flush(&mut out, ctx.endian())?;
            encode_type(ctx, field.ty, fvalue, &mut out)?;
        }
    }
    bitw.flush(&mut out, ctx.endian())?;
    if aggregate.align {
        if let Some(size) = aggregate.size {
            if (size as u64) > out.count {
                let pad = size as u64 - out.count;
                out.write_all(&vec![0u8; pad as usize])?;
            }
        }
    }
    Ok(())
}

fn encode_union(ctx: &Context, aggregate: &Aggregate, value: &Value, writer: &mut dyn Write) -> Result<()> {
    let sv = match value {
        Value::Struct(sv) => sv,
        _ => return Err(Error::ExpressionParserError("value is not a union".into())),
    };
    // Emit the largest field (by static size) that carries a value; all
    // fields alias the same bytes so any one field's bytes are sufficient.
    let mut best: Option<(&Field, u32)> = None;
    for field in &aggregate.fields {
        if let Some(sz) = static_size(ctx, field.ty) {
            if best.map_or(true, |(_, best_sz)| sz > best_sz) {
                best = Some((field, sz));
            }
        }
    }
    let mut buf = Vec::new();
    if let Some((field, _)) = best {
        let owned = if field.anonymous {
            anonymous_value(ctx, field.ty, sv).ok()
        } else {
            sv.get(&field.name).ok().cloned()
        };
        if let Some(fvalue) = &owned {
            encode_type(ctx, field.ty, fvalue, &mut buf)?;
        }
    }
    if let Some(size) = aggregate.size {
        buf.resize(size as usize, 0);
    }
    writer.write_all(&buf)?;
    Ok(())
}
