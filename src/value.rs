//! Runtime values produced by decoding, or constructed by hand for encoding.

use std::cell::RefCell;
use std::ops::Deref;
use std::rc::Rc;

use crate::registry::Context;
use crate::result::{Error, Result};
use crate::types::{SharedStream, TypeId};

/// Already-decoded sibling field values, visible to array-count and offset
/// expressions evaluated later in the same struct.
#[derive(Debug, Clone, Default)]
pub struct Scope(Vec<(String, i128)>);

impl Scope {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: i128) {
        self.0.push((name.into(), value));
    }
}

impl Deref for Scope {
    type Target = [(String, i128)];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i128),
    Float(f64),
    /// Raw char-array / bytes-typed content.
    Bytes(Vec<u8>),
    /// Decoded wide-char content.
    Str(String),
    Array(Vec<Value>),
    Pointer(PointerValue),
    Enum(EnumValue),
    Flag(FlagValue),
    Struct(StructValue),
    Void,
}

impl Value {
    /// Coerces a scalar-ish value to an integer, for use as an array-count or
    /// bitfield source. Fails for aggregate/dynamic shapes.
    pub fn as_int(&self) -> Result<i128> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Enum(e) => Ok(e.value),
            Value::Flag(f) => Ok(f.value),
            _ => Err(Error::ExpressionParserError("value is not an integer".into())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumValue {
    pub enum_id: TypeId,
    pub value: i128,
    pub name: Option<String>,
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.enum_id == other.enum_id && self.value == other.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagValue {
    pub flag_id: TypeId,
    pub value: i128,
}

/// A struct/union instance: an ordered field list (insertion order matters
/// for `dumps`/debug output) plus, per field, the number of bytes its
/// decoded representation consumed.
#[derive(Debug, Clone, Default)]
pub struct StructValue {
    fields: Vec<(String, Value)>,
    pub sizes: Vec<(String, usize)>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value, size: usize) {
        let name = name.into();
        self.sizes.push((name.clone(), size));
        self.fields.push((name, value));
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::NoSuchField(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::NoSuchField(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }
}

/// A pointer: a lazily-dereferenced, cached reference into a live stream.
#[derive(Debug, Clone)]
pub struct PointerValue {
    pub target: TypeId,
    pub address: i128,
    ctx: Rc<Context>,
    stream: Option<SharedStream>,
    cache: Rc<RefCell<Option<Rc<Value>>>>,
}

impl PointerValue {
    pub fn new(ctx: Rc<Context>, target: TypeId, address: i128, stream: Option<SharedStream>) -> Self {
        Self {
            target,
            address,
            ctx,
            stream,
            cache: Rc::new(RefCell::new(None)),
        }
    }

    /// Returns a new pointer at `address + delta`, with an independent
    /// (un-populated) dereference cache, matching the "arithmetic returns a
    /// new uncached pointer" contract.
    pub fn offset(&self, delta: i128) -> Self {
        Self {
            target: self.target,
            address: self.address + delta,
            ctx: self.ctx.clone(),
            stream: self.stream.clone(),
            cache: Rc::new(RefCell::new(None)),
        }
    }

    pub fn dereference(&self) -> Result<Rc<Value>> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        if self.address == 0 {
            return Err(Error::NullPointerDereference);
        }
        let stream = self.stream.clone().ok_or(Error::NullPointerDereference)?;
        let saved = {
            use std::io::Seek;
            stream.borrow_mut().stream_position()?
        };
        {
            use std::io::{Seek, SeekFrom};
            stream.borrow_mut().seek(SeekFrom::Start(self.address as u64))?;
        }
        let value = if matches!(self.ctx.get(self.target), crate::types::TypeDescriptor::Char) {
            crate::types::primitive::decode_cstring(&stream)?
        } else {
            crate::types::decode(&self.ctx, self.target, &stream, &Scope::new())?
        };
        {
            use std::io::{Seek, SeekFrom};
            stream.borrow_mut().seek(SeekFrom::Start(saved))?;
        }
        let rc = Rc::new(value);
        log::trace!("caching dereference of pointer at address {:#x}", self.address);
        *self.cache.borrow_mut() = Some(rc.clone());
        Ok(rc)
    }
}

impl PartialEq for PointerValue {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.address == other.address
    }
}
