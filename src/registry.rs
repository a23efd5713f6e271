//! The type registry (`Context`): endianness, pointer width, typedefs,
//! constants, named lookup tables, and the arena of type descriptors.

use std::collections::HashMap;

use crate::result::{Error, Result};
use crate::types::{Aggregate, AggregateKind, TypeDescriptor, TypeId};

const MAX_TYPEDEF_CHAIN: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A value installed via `#define`: either an evaluated integer or a literal string.
#[derive(Debug, Clone)]
pub enum Constant {
    Int(i128),
    Str(String),
}

#[derive(Debug)]
pub struct Context {
    endian: Endian,
    pointer_width: u32,
    types: Vec<TypeDescriptor>,
    names: HashMap<String, TypeId>,
    constants: HashMap<String, Constant>,
    lookups: HashMap<String, HashMap<i128, String>>,
    anon_counter: u32,
}

impl Context {
    pub fn new(endian: Endian, pointer_width: u32) -> Self {
        let mut ctx = Self {
            endian,
            pointer_width,
            types: Vec::new(),
            names: HashMap::new(),
            constants: HashMap::new(),
            lookups: HashMap::new(),
            anon_counter: 0,
        };
        ctx.register_builtins();
        ctx
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    pub fn next_anon_name(&mut self, prefix: &str) -> String {
        self.anon_counter += 1;
        format!("{prefix}_{}", self.anon_counter)
    }

    pub(crate) fn push_type(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(descriptor);
        id
    }

    pub(crate) fn replace_type(&mut self, id: TypeId, descriptor: TypeDescriptor) {
        self.types[id.0 as usize] = descriptor;
    }

    pub fn get(&self, id: TypeId) -> &TypeDescriptor {
        &self.types[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeDescriptor {
        &mut self.types[id.0 as usize]
    }

    /// Installs a name-to-type mapping, failing only if a *different* type is
    /// already registered under the same name.
    pub fn add_type(&mut self, name: impl Into<String>, id: TypeId) -> Result<()> {
        let name = name.into();
        match self.names.get(&name) {
            Some(existing) if *existing != id => Err(Error::DuplicateType(name)),
            _ => {
                self.names.insert(name, id);
                Ok(())
            }
        }
    }

    /// Resolves a name through the typedef chain, up to `MAX_TYPEDEF_CHAIN`
    /// indirections.
    pub fn resolve(&self, name: &str) -> Result<TypeId> {
        let mut id = *self
            .names
            .get(name)
            .ok_or_else(|| Error::ResolveError(name.to_string()))?;
        let mut hops = 0;
        loop {
            match self.get(id) {
                TypeDescriptor::Alias(target) => {
                    hops += 1;
                    log::trace!("resolving `{name}`: hop {hops} through typedef chain");
                    if hops > MAX_TYPEDEF_CHAIN {
                        return Err(Error::ResolveError(format!(
                            "typedef chain for `{name}` exceeds {MAX_TYPEDEF_CHAIN} indirections"
                        )));
                    }
                    id = *target;
                }
                _ => return Ok(id),
            }
        }
    }

    pub fn resolve_descriptor(&self, name: &str) -> Result<&TypeDescriptor> {
        Ok(self.get(self.resolve(name)?))
    }

    pub fn set_constant(&mut self, name: impl Into<String>, value: Constant) {
        self.constants.insert(name.into(), value);
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.get(name)
    }

    pub fn add_lookup(&mut self, name: impl Into<String>, table: HashMap<i128, String>) {
        self.lookups.insert(name.into(), table);
    }

    pub fn lookup(&self, name: &str) -> Option<&HashMap<i128, String>> {
        self.lookups.get(name)
    }

    pub fn pointer_type(&self) -> TypeId {
        let name = if self.pointer_width == 8 {
            "uint64"
        } else {
            "uint32"
        };
        self.resolve(name).expect("pointer base type always registered")
    }

    fn register_builtins(&mut self) {
        macro_rules! prim {
            ($name:expr, $descriptor:expr) => {{
                let id = self.push_type($descriptor);
                self.names.insert($name.to_string(), id);
                id
            }};
        }

        let i8_ = prim!("int8", TypeDescriptor::Int { width: 1, signed: true });
        let u8_ = prim!("uint8", TypeDescriptor::Int { width: 1, signed: false });
        let i16_ = prim!("int16", TypeDescriptor::Int { width: 2, signed: true });
        let u16_ = prim!("uint16", TypeDescriptor::Int { width: 2, signed: false });
        let i32_ = prim!("int32", TypeDescriptor::Int { width: 4, signed: true });
        let u32_ = prim!("uint32", TypeDescriptor::Int { width: 4, signed: false });
        let i64_ = prim!("int64", TypeDescriptor::Int { width: 8, signed: true });
        let u64_ = prim!("uint64", TypeDescriptor::Int { width: 8, signed: false });
        prim!("int24", TypeDescriptor::BytesInt { width: 3, signed: true, align: 4 });
        prim!("uint24", TypeDescriptor::BytesInt { width: 3, signed: false, align: 4 });
        prim!("int48", TypeDescriptor::BytesInt { width: 6, signed: true, align: 8 });
        prim!("uint48", TypeDescriptor::BytesInt { width: 6, signed: false, align: 8 });
        prim!("float16", TypeDescriptor::Float { width: 2 });
        let f32_ = prim!("float", TypeDescriptor::Float { width: 4 });
        let f64_ = prim!("double", TypeDescriptor::Float { width: 8 });
        let char_ = prim!("char", TypeDescriptor::Char);
        let wchar_ = prim!("wchar", TypeDescriptor::WChar);
        prim!("void", TypeDescriptor::Void);
        prim!("uleb128", TypeDescriptor::Leb128 { signed: false });
        prim!("ileb128", TypeDescriptor::Leb128 { signed: true });

        let aliases: &[(&str, TypeId)] = &[
            ("int8_t", i8_),
            ("uint8_t", u8_),
            ("BYTE", u8_),
            ("byte", u8_),
            ("bool", u8_),
            ("BOOL", i32_),
            ("int16_t", i16_),
            ("uint16_t", u16_),
            ("WORD", u16_),
            ("short", i16_),
            ("unsigned short", u16_),
            ("int32_t", i32_),
            ("uint32_t", u32_),
            ("DWORD", u32_),
            ("int", i32_),
            ("unsigned int", u32_),
            ("long", i32_),
            ("unsigned long", u32_),
            ("int64_t", i64_),
            ("uint64_t", u64_),
            ("QWORD", u64_),
            ("long long", i64_),
            ("unsigned long long", u64_),
            ("size_t", u64_),
            ("ssize_t", i64_),
            ("float32", f32_),
            ("float64", f64_),
            ("wchar_t", wchar_),
            ("char8_t", char_),
        ];
        for (name, id) in aliases {
            self.names.insert(name.to_string(), *id);
        }
    }

    pub(crate) fn new_aggregate(&mut self, kind: AggregateKind) -> TypeId {
        self.push_type(match kind {
            AggregateKind::Struct => TypeDescriptor::Structure(Aggregate::new(kind)),
            AggregateKind::Union => TypeDescriptor::Structure(Aggregate::new(kind)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_aliases() -> Result<()> {
        let ctx = Context::new(Endian::Little, 8);
        let a = ctx.resolve("DWORD")?;
        let b = ctx.resolve("uint32")?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn unknown_name_is_an_error() {
        let ctx = Context::new(Endian::Little, 8);
        assert!(ctx.resolve("nope").is_err());
    }

    #[test]
    fn pointer_width_selects_base_type() -> Result<()> {
        let ctx = Context::new(Endian::Little, 4);
        assert_eq!(ctx.pointer_type(), ctx.resolve("uint32")?);
        Ok(())
    }
}
