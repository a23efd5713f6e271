//! The type descriptor arena and the codec engine that walks it.
//!
//! Every type known to a [`Context`](crate::registry::Context) is stored in a
//! single arena and referenced by [`TypeId`] handle rather than owned
//! directly, so that a struct's pointer field can name the struct's own
//! still-being-finalized type without a borrow cycle.

pub mod array;
pub mod enum_type;
pub mod flag;
pub mod pointer;
pub mod primitive;
pub mod structure;

pub use array::{ArrayCount, ArrayType};
pub use enum_type::EnumType;
pub use flag::FlagType;
pub use pointer::PointerType;
pub use structure::{Aggregate, AggregateKind, DirectiveFlags, Field};

use std::io::{Read, Seek, Write};
use std::rc::Rc;

use crate::registry::Context;
use crate::result::Result;
use crate::value::{Scope, Value};

/// A handle into a [`Context`]'s type arena. Cheap to copy, stable for the
/// lifetime of the registry that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

/// A stream a [`crate::value::PointerValue`] can re-seek into for a lazy
/// dereference. Any `Read + Seek` type satisfies it automatically.
pub trait Stream: Read + Seek {}
impl<T: Read + Seek> Stream for T {}

pub type SharedStream = Rc<std::cell::RefCell<dyn Stream>>;

#[derive(Debug)]
pub enum TypeDescriptor {
    /// A typedef indirection; `resolve` follows these up to a fixed depth.
    Alias(TypeId),
    Int { width: u32, signed: bool },
    Float { width: u32 },
    /// An arbitrary (non power-of-two) byte width integer, two's complement.
    BytesInt { width: u32, signed: bool, align: u32 },
    Char,
    WChar,
    Void,
    Leb128 { signed: bool },
    Array(ArrayType),
    Pointer(PointerType),
    Enum(EnumType),
    Flag(FlagType),
    Structure(Aggregate),
}

impl TypeDescriptor {
    pub fn alignment(&self, ctx: &Context) -> u32 {
        match self {
            TypeDescriptor::Alias(id) => ctx.get(*id).alignment(ctx),
            TypeDescriptor::Int { width, .. } => *width,
            TypeDescriptor::Float { width } => *width,
            TypeDescriptor::BytesInt { align, .. } => *align,
            TypeDescriptor::Char => 1,
            TypeDescriptor::WChar => 2,
            TypeDescriptor::Void => 1,
            TypeDescriptor::Leb128 { .. } => 1,
            TypeDescriptor::Array(a) => ctx.get(a.element).alignment(ctx),
            TypeDescriptor::Pointer(_) => ctx.pointer_width(),
            TypeDescriptor::Enum(e) => ctx.get(*e.base()).alignment(ctx),
            TypeDescriptor::Flag(f) => ctx.get(*f.base()).alignment(ctx),
            TypeDescriptor::Structure(s) => s.alignment,
        }
    }
}

/// Static (compile/parse-time known) size in bytes, or `None` if the size can
/// only be determined by actually decoding an instance.
pub fn static_size(ctx: &Context, id: TypeId) -> Option<u32> {
    match ctx.get(id) {
        TypeDescriptor::Alias(target) => static_size(ctx, *target),
        TypeDescriptor::Int { width, .. } => Some(*width),
        TypeDescriptor::Float { width } => Some(*width),
        TypeDescriptor::BytesInt { width, .. } => Some(*width),
        TypeDescriptor::Char => Some(1),
        TypeDescriptor::WChar => Some(2),
        TypeDescriptor::Void => Some(0),
        TypeDescriptor::Leb128 { .. } => None,
        TypeDescriptor::Array(a) => match a.count {
            ArrayCount::Fixed(n) => static_size(ctx, a.element).map(|s| s * n),
            _ => None,
        },
        TypeDescriptor::Pointer(_) => Some(ctx.pointer_width()),
        TypeDescriptor::Enum(e) => static_size(ctx, *e.base()),
        TypeDescriptor::Flag(f) => static_size(ctx, *f.base()),
        TypeDescriptor::Structure(s) => s.size,
    }
}

/// Decodes one value of `id` from `stream`, threading `scope` (already
/// decoded sibling fields, for dynamic array-count and offset expressions)
/// through the recursive walk. `ctx` is kept as an `Rc` so that pointer
/// values can retain a registry handle for a later, independent dereference.
pub fn decode(ctx: &Rc<Context>, id: TypeId, stream: &SharedStream, scope: &Scope) -> Result<Value> {
    match ctx.get(id) {
        TypeDescriptor::Alias(target) => decode(ctx, *target, stream, scope),
        TypeDescriptor::Int { .. } | TypeDescriptor::Float { .. } | TypeDescriptor::BytesInt { .. } => {
            primitive::decode_number(ctx, id, stream)
        }
        TypeDescriptor::Char => primitive::decode_char(stream),
        TypeDescriptor::WChar => primitive::decode_wchar(ctx, stream),
        TypeDescriptor::Void => Ok(Value::Void),
        TypeDescriptor::Leb128 { signed } => primitive::decode_leb128(stream, *signed),
        TypeDescriptor::Array(_) => array::decode(ctx, id, stream, scope),
        TypeDescriptor::Pointer(_) => pointer::decode(ctx, id, stream, scope),
        TypeDescriptor::Enum(_) => enum_type::decode(ctx, id, stream),
        TypeDescriptor::Flag(_) => flag::decode(ctx, id, stream),
        TypeDescriptor::Structure(_) => structure::decode(ctx, id, stream, scope),
    }
}

/// Serializes `value` (previously produced by [`decode`] or constructed by
/// hand) as `id`'s byte representation.
pub fn encode(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    match ctx.get(id) {
        TypeDescriptor::Alias(target) => encode(ctx, *target, value, writer),
        TypeDescriptor::Int { .. } | TypeDescriptor::Float { .. } | TypeDescriptor::BytesInt { .. } => {
            primitive::encode_number(ctx, id, value, writer)
        }
        TypeDescriptor::Char => primitive::encode_char(value, writer),
        TypeDescriptor::WChar => primitive::encode_wchar(ctx, value, writer),
        TypeDescriptor::Void => Ok(()),
        TypeDescriptor::Leb128 { signed } => primitive::encode_leb128(value, *signed, writer),
        TypeDescriptor::Array(_) => array::encode(ctx, id, value, writer),
        TypeDescriptor::Pointer(_) => pointer::encode(ctx, value, writer),
        TypeDescriptor::Enum(_) => enum_type::encode(ctx, id, value, writer),
        TypeDescriptor::Flag(_) => flag::encode(ctx, id, value, writer),
        TypeDescriptor::Structure(_) => structure::encode(ctx, id, value, writer),
    }
}
