use std::io::Cursor;
use std::rc::Rc;

use bstruct::registry::Endian;
use bstruct::result::Result;
use bstruct::value::Value;
use bstruct::{read, Context};

fn main() -> Result<()> {
    env_logger::init();

    let mut ctx = Context::new(Endian::Little, 8);
    ctx.load(
        r#"
        #define MAX_NAME 16

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
    let ctx = Rc::new(ctx);

    let bytes = vec![
        0x01, // kind = FILE
        0x03, // name_len = 3
        b'f', b'o', b'o', // name
        0x2a, 0x00, 0x00, 0x00, // size = 42
    ];
    let value = read(&ctx, entry, Cursor::new(bytes))?;
    let sv = match &value {
        Value::Struct(sv) => sv,
        _ => unreachable!(),
    };

    // retrieve the kind of the parsed entry
    dbg!(sv.get("kind")?);
    // retrieve the name as a byte array
    dbg!(sv.get("name")?);
    // retrieve the declared size
    dbg!(sv.get("size")?);

    Ok(())
}
