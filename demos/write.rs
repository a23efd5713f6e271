use std::fs::File;
use std::io::BufWriter;

use bstruct::registry::Endian;
use bstruct::result::Result;
use bstruct::value::{StructValue, Value};
use bstruct::{write, Context};

fn main() -> Result<()> {
    env_logger::init();

    let mut ctx = Context::new(Endian::Little, 8);
    ctx.load(
        r#"
        enum Kind : uint8 { FILE = 1, DIR = 2 };

        struct entry {
            Kind kind;
            uint8 name_len;
            char name[name_len];
            uint32 size;
        };
        "#,
    )?;
    let entry = ctx.resolve("entry")?;
    let kind = ctx.resolve("Kind")?;

    let mut sv = StructValue::new();
    sv.set("kind", bstruct::types::enum_type::from_int(&ctx, kind, 1), 0);
    sv.set("name_len", Value::Int(3), 0);
    sv.set(
        "name",
        Value::Array(vec![Value::Bytes(vec![b'f']), Value::Bytes(vec![b'o']), Value::Bytes(vec![b'o'])]),
        0,
    );
    sv.set("size", Value::Int(42), 0);

    let mut out = BufWriter::new(File::create("entry.bin")?);
    write(&ctx, entry, &Value::Struct(sv), &mut out)
}
