//! A library for parsing and emitting binary data described by a small
//! C-like type-definition language: structs, unions, enums, flags,
//! typedefs, pointers, bitfields and `#define` constants.
//!
//! Definitions are loaded into a [`Context`], which owns an arena of
//! [`TypeId`]-addressed type descriptors so that self-referential pointer
//! fields can be expressed without a borrow cycle. Reading and writing are
//! driven from a `Context` plus a `TypeId`:
//!
//! ```ignore
//! use std::io::Cursor;
//! use std::rc::Rc;
//! use bstruct::{read, Context};
//! use bstruct::registry::Endian;
//!
//! let mut ctx = Context::new(Endian::Little, 8);
//! ctx.load("struct point { int32 x; int32 y; };")?;
//! let point = ctx.resolve("point")?;
//! let ctx = Rc::new(ctx);
//! let value = read(&ctx, point, Cursor::new(vec![1, 0, 0, 0, 2, 0, 0, 0]))?;
//! # Ok::<(), bstruct::Error>(())
//! ```

pub mod bitbuffer;
pub mod expr;
pub mod parser;
pub mod registry;
pub mod result;
pub mod types;
mod utils;
pub mod value;

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

pub use registry::Context;
pub use result::{Error, Result};
pub use types::TypeId;
pub use value::Value;

use types::{SharedStream, Stream};
use value::Scope;

impl Context {
    /// Parses `src` and installs every definition it contains.
    pub fn load(&mut self, src: &str) -> Result<()> {
        parser::parse(self, src)
    }
}

/// Reads one value of `id` from `stream`, consuming as many bytes as the
/// type's read contract requires.
///
/// `ctx` is kept as a shared handle because pointer fields in the decoded
/// value retain their own clone of it (and of the stream) for a later,
/// independent, lazily-cached dereference.
pub fn read<S: Stream + 'static>(ctx: &Rc<Context>, id: TypeId, stream: S) -> Result<Value> {
    let shared: SharedStream = Rc::new(RefCell::new(stream));
    types::decode(ctx, id, &shared, &Scope::new())
}

/// Serializes `value` as `id`'s byte representation into `writer`.
pub fn write(ctx: &Context, id: TypeId, value: &Value, writer: &mut dyn Write) -> Result<()> {
    types::encode(ctx, id, value, writer)
}

/// Serializes `value` as `id`'s byte representation and returns the bytes.
pub fn dumps(ctx: &Context, id: TypeId, value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write(ctx, id, value, &mut buf)?;
    Ok(buf)
}
