//! Recursive-descent parser for the definition language. Produces types and
//! constants directly in a [`Context`]; there is no separate AST exposed to
//! callers.

mod lexer;

use std::collections::HashMap;

use lexer::{tokenize, Tok, Token};

use crate::expr;
use crate::registry::{Constant, Context};
use crate::result::{Error, Result};
use crate::types::{
    Aggregate, AggregateKind, ArrayCount, ArrayType, DirectiveFlags, EnumType, Field, FlagType, PointerType, TypeDescriptor, TypeId,
};

/// Parses `src` and installs every definition it contains into `ctx`.
pub fn parse(ctx: &mut Context, src: &str) -> Result<()> {
    let preprocessed = extract_defines(src, ctx)?;
    let tokens = tokenize(&preprocessed);
    let mut p = Parser { tokens, pos: 0, pending_directives: DirectiveFlags::empty() };
    p.parse_toplevel(ctx)
}

/// `#define` lines are whole-line directives with no closing delimiter, so
/// they are pulled out of the source text before the token-based parser
/// runs. The removed lines are replaced with blanks so later error messages
/// still report accurate line numbers.
fn extract_defines(src: &str, ctx: &mut Context) -> Result<String> {
    let stripped = lexer::strip_comments(src);
    let mut out = String::with_capacity(stripped.len());
    for (lineno, line) in stripped.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#define") {
            let rest = rest.trim();
            let mut parts = rest.splitn(2, char::is_whitespace);
            let name = parts
                .next()
                .ok_or_else(|| parse_err(lineno as u32 + 1, "expected a name after #define"))?;
            let value = parts.next().unwrap_or("").trim();
            if let Some(text) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                ctx.set_constant(name, Constant::Str(text.to_string()));
            } else if value.is_empty() {
                ctx.set_constant(name, Constant::Int(1));
            } else {
                let v = expr::evaluate(ctx, &[], value)
                    .map_err(|_| parse_err(lineno as u32 + 1, &format!("invalid #define value `{value}`")))?;
                ctx.set_constant(name, Constant::Int(v));
            }
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    Ok(out)
}

fn parse_err(line: u32, message: &str) -> Error {
    Error::ParserError { line, message: message.to_string() }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Directives from a `#[...]` line immediately preceding the next
    /// struct/union declaration; consumed (and cleared) by that declaration.
    pending_directives: DirectiveFlags,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek().tok, Tok::Eof)
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        match &self.peek().tok {
            Tok::Punct(p) if *p == c => {
                self.advance();
                Ok(())
            }
            _ => Err(parse_err(self.line(), &format!("expected `{c}`"))),
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if matches!(&self.peek().tok, Tok::Punct(p) if *p == c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance().tok {
            Tok::Ident(s) => Ok(s),
            _ => Err(parse_err(self.line(), "expected an identifier")),
        }
    }

    fn peek_ident(&self) -> Option<&str> {
        match &self.peek().tok {
            Tok::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn parse_toplevel(&mut self, ctx: &mut Context) -> Result<()> {
        while !self.is_eof() {
            match &self.peek().tok {
                Tok::Punct('#') => {
                    self.advance();
                    self.parse_directive()?;
                }
                Tok::Punct('$') => {
                    self.advance();
                    self.parse_lookup(ctx)?;
                }
                Tok::Ident(kw) if kw == "typedef" => {
                    self.advance();
                    self.parse_typedef(ctx)?;
                }
                Tok::Ident(kw) if kw == "struct" => {
                    self.advance();
                    self.parse_aggregate_decl(ctx, AggregateKind::Struct)?;
                }
                Tok::Ident(kw) if kw == "union" => {
                    self.advance();
                    self.parse_aggregate_decl(ctx, AggregateKind::Union)?;
                }
                Tok::Ident(kw) if kw == "enum" => {
                    self.advance();
                    self.parse_enum_or_flag(ctx, false)?;
                }
                Tok::Ident(kw) if kw == "flag" => {
                    self.advance();
                    self.parse_enum_or_flag(ctx, true)?;
                }
                Tok::Eof => break,
                other => return Err(parse_err(self.line(), &format!("unexpected token {other:?}"))),
            }
        }
        Ok(())
    }

    /// `#[flag,flag,...]` directives, attached to whichever struct/union
    /// declaration follows. Recognized but, aside from `nocompile`, inert:
    /// there is no compiled fast path to opt out of.
    fn parse_directive(&mut self) -> Result<()> {
        self.expect_punct('[')?;
        loop {
            let name = self.expect_ident()?;
            if name == "nocompile" {
                self.pending_directives |= DirectiveFlags::NOCOMPILE;
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(']')?;
        Ok(())
    }

    fn parse_lookup(&mut self, ctx: &mut Context) -> Result<()> {
        let name = self.expect_ident()?;
        self.expect_punct('=')?;
        self.expect_punct('{')?;
        let mut table = HashMap::new();
        loop {
            if self.eat_punct('}') {
                break;
            }
            let key = match self.advance().tok {
                Tok::Str(s) => s,
                Tok::Ident(s) => s,
                _ => return Err(parse_err(self.line(), "expected a lookup key")),
            };
            self.expect_punct(':')?;
            let value = match self.advance().tok {
                Tok::Str(s) => s,
                Tok::Ident(s) => s,
                _ => return Err(parse_err(self.line(), "expected a lookup value")),
            };
            let key_value = match ctx.constant(&key) {
                Some(Constant::Int(v)) => *v,
                _ => key.parse::<i128>().map_err(|_| parse_err(self.line(), &format!("unknown lookup key `{key}`")))?,
            };
            table.insert(key_value, value);
            if !self.eat_punct(',') {
                self.expect_punct('}')?;
                break;
            }
        }
        self.expect_punct(';')?;
        ctx.add_lookup(name, table);
        Ok(())
    }

    fn parse_typedef(&mut self, ctx: &mut Context) -> Result<()> {
        let target = self.parse_typeref(ctx)?;
        loop {
            let name = self.expect_ident()?;
            let alias = ctx.push_type(TypeDescriptor::Alias(target));
            ctx.add_type(name, alias)?;
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(';')?;
        Ok(())
    }

    /// Top-level `struct`/`union` declaration: body plus the trailing
    /// `(NAME (',' NAME)*)? ';'` typedef-alias tail.
    fn parse_aggregate_decl(&mut self, ctx: &mut Context, kind: AggregateKind) -> Result<TypeId> {
        let id = self.parse_aggregate_body(ctx, kind)?;

        let mut trailing = Vec::new();
        if let Some(n) = self.peek_ident().map(str::to_string) {
            self.advance();
            trailing.push(n);
            while self.eat_punct(',') {
                trailing.push(self.expect_ident()?);
            }
        }
        self.expect_punct(';')?;
        for n in trailing {
            ctx.add_type(n, id)?;
        }
        Ok(id)
    }

    /// `struct`/`union` NAME? '{' field* '}' -- without the trailing alias
    /// list or terminating `;`, so it can also be used for a nested
    /// struct/union appearing directly as a field's type.
    fn parse_aggregate_body(&mut self, ctx: &mut Context, kind: AggregateKind) -> Result<TypeId> {
        let name = self.peek_ident().map(str::to_string);
        if name.is_some() {
            self.advance();
        }
        let id = ctx.new_aggregate(kind);
        if let Some(n) = &name {
            ctx.add_type(n.clone(), id)?;
        }

        self.expect_punct('{')?;
        let mut aggregate = Aggregate::new(kind);
        aggregate.name = name;
        aggregate.directives = std::mem::take(&mut self.pending_directives);
        while !self.eat_punct('}') {
            let field = self.parse_field(ctx)?;
            aggregate.add_field(field);
        }

        aggregate.finalize(ctx)?;
        log::debug!(
            "registered {:?} {:?} with {} field(s)",
            kind,
            aggregate.name,
            aggregate.fields.len()
        );
        ctx.replace_type(id, TypeDescriptor::Structure(aggregate));
        Ok(id)
    }

    fn parse_field(&mut self, ctx: &mut Context) -> Result<Field> {
        let base = self.parse_typeref(ctx)?;
        let is_pointer = self.eat_punct('*');
        let ty = if is_pointer {
            ctx.push_type(TypeDescriptor::Pointer(PointerType { target: base }))
        } else {
            base
        };

        if !is_pointer && self.eat_punct(';') {
            // A nested struct/union with no following name: its fields
            // merge into the enclosing aggregate's namespace.
            return Ok(Field::new(String::new(), ty).anonymous());
        }
        let name = self.expect_ident()?;

        let mut dims: Vec<ArrayCount> = Vec::new();
        while self.eat_punct('[') {
            if self.eat_punct(']') {
                dims.push(ArrayCount::NullTerminated);
                continue;
            }
            if let Some("EOF") = self.peek_ident() {
                self.advance();
                self.expect_punct(']')?;
                dims.push(ArrayCount::Eof);
                continue;
            }
            let text = self.collect_until(']')?;
            self.expect_punct(']')?;
            match text.trim().parse::<u32>() {
                Ok(n) => dims.push(ArrayCount::Fixed(n)),
                Err(_) => dims.push(ArrayCount::Expr(text.trim().to_string())),
            }
        }
        let mut field_ty = ty;
        for count in dims.into_iter().rev() {
            field_ty = ctx.push_type(TypeDescriptor::Array(ArrayType { element: field_ty, count }));
        }

        let mut bits = None;
        if self.eat_punct(':') {
            let text = self.collect_until(';')?;
            bits = Some(
                text.trim()
                    .parse::<u32>()
                    .map_err(|_| parse_err(self.line(), "expected a bit width"))?,
            );
        }
        self.expect_punct(';')?;
        Ok(Field::new(name, field_ty).with_bits_opt(bits))
    }

    /// Reads raw source text up to (not including) the next occurrence of
    /// `terminator`, used for array-count and bitfield-width expressions
    /// whose grammar is "whatever the evaluator accepts".
    fn collect_until(&mut self, terminator: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match &self.peek().tok {
                Tok::Punct(p) if *p == terminator => break,
                Tok::Eof => return Err(parse_err(self.line(), &format!("expected `{terminator}`"))),
                _ => {}
            }
            let t = self.advance();
            match t.tok {
                Tok::Ident(s) | Tok::Number(s) => {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(&s);
                }
                Tok::Punct(p) => out.push(p),
                _ => {}
            }
        }
        Ok(out)
    }

    fn parse_typeref(&mut self, ctx: &mut Context) -> Result<TypeId> {
        if let Some(kw) = self.peek_ident() {
            if kw == "struct" {
                self.advance();
                return self.parse_aggregate_body(ctx, AggregateKind::Struct);
            }
            if kw == "union" {
                self.advance();
                return self.parse_aggregate_body(ctx, AggregateKind::Union);
            }
        }
        const WORDS: &[&str] = &["unsigned", "signed", "long", "short", "int", "char"];
        let mut words = Vec::new();
        while let Some(w) = self.peek_ident() {
            if words.is_empty() || WORDS.contains(&w) {
                words.push(w.to_string());
                self.advance();
                if !WORDS.contains(&words.last().unwrap().as_str()) {
                    break;
                }
            } else {
                break;
            }
        }
        if words.is_empty() {
            return Err(parse_err(self.line(), "expected a type name"));
        }
        // Greedily try the longest joined candidate first, backing off one
        // word at a time (handles multi-word aliases like `unsigned long long`).
        for len in (1..=words.len()).rev() {
            let candidate = words[..len].join(" ");
            if let Ok(id) = ctx.resolve(&candidate) {
                // Un-consume any words beyond the matched prefix.
                self.pos -= words.len() - len;
                return Ok(id);
            }
        }
        Err(Error::ResolveError(words.join(" ")))
    }

    fn parse_enum_or_flag(&mut self, ctx: &mut Context, is_flag: bool) -> Result<()> {
        let name = self.peek_ident().map(str::to_string);
        if name.is_some() {
            self.advance();
        }
        let base = if self.eat_punct(':') {
            self.parse_typeref(ctx)?
        } else {
            ctx.resolve("uint32")?
        };
        self.expect_punct('{')?;
        let mut members: Vec<(String, i128)> = Vec::new();
        let mut next_value: i128 = if is_flag { 1 } else { 0 };
        while !self.eat_punct('}') {
            let member_name = self.expect_ident()?;
            let value = if self.eat_punct('=') {
                let text = self.collect_until_any(&[',', '}'])?;
                expr::evaluate(ctx, &members, text.trim())?
            } else {
                next_value
            };
            members.push((member_name, value));
            next_value = if is_flag { value.max(1) * 2 } else { value + 1 };
            if !self.eat_punct(',') {
                break;
            }
        }
        self.eat_punct('}');
        let mut trailing = Vec::new();
        if let Some(n) = self.peek_ident().map(str::to_string) {
            self.advance();
            trailing.push(n);
            while self.eat_punct(',') {
                trailing.push(self.expect_ident()?);
            }
        }
        self.expect_punct(';')?;

        log::debug!("registered {} {:?} with {} member(s)", if is_flag { "flag" } else { "enum" }, name, members.len());
        let id = if is_flag {
            ctx.push_type(TypeDescriptor::Flag(FlagType::new(name.clone(), base, members)))
        } else {
            ctx.push_type(TypeDescriptor::Enum(EnumType::new(name.clone(), base, members)))
        };
        if let Some(n) = name {
            ctx.add_type(n, id)?;
        }
        for n in trailing {
            ctx.add_type(n, id)?;
        }
        Ok(())
    }

    fn collect_until_any(&mut self, terminators: &[char]) -> Result<String> {
        let mut out = String::new();
        loop {
            match &self.peek().tok {
                Tok::Punct(p) if terminators.contains(p) => break,
                Tok::Eof => return Err(parse_err(self.line(), "unexpected end of input")),
                _ => {}
            }
            let t = self.advance();
            match t.tok {
                Tok::Ident(s) | Tok::Number(s) => {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(&s);
                }
                Tok::Punct(p) => out.push(p),
                _ => {}
            }
        }
        Ok(out)
    }
}

impl Field {
    fn with_bits_opt(self, bits: Option<u32>) -> Self {
        match bits {
            Some(b) => self.with_bits(b),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endian;

    #[test]
    fn basic_struct() -> Result<()> {
        let mut ctx = Context::new(Endian::Little, 8);
        parse(&mut ctx, "struct t { uint8 a; uint16 b; uint32 c; };")?;
        let id = ctx.resolve("t")?;
        match ctx.get(id) {
            TypeDescriptor::Structure(a) => {
                assert_eq!(a.fields.len(), 3);
                assert_eq!(a.size, Some(8));
            }
            _ => panic!("expected a struct"),
        }
        Ok(())
    }

    #[test]
    fn define_constant() -> Result<()> {
        let mut ctx = Context::new(Endian::Little, 8);
        parse(&mut ctx, "#define COUNT 4\nstruct t { uint8 xs[COUNT]; };")?;
        let id = ctx.resolve("t")?;
        match ctx.get(id) {
            TypeDescriptor::Structure(a) => {
                let arr = ctx.get(a.fields[0].ty);
                match arr {
                    TypeDescriptor::Array(ar) => assert!(matches!(ar.count, ArrayCount::Expr(_))),
                    _ => panic!("expected array"),
                }
            }
            _ => panic!("expected struct"),
        }
        Ok(())
    }

    #[test]
    fn enum_with_base_type() -> Result<()> {
        let mut ctx = Context::new(Endian::Little, 8);
        parse(&mut ctx, "enum E : uint16 { A = 1, B = 2 };")?;
        let id = ctx.resolve("E")?;
        match ctx.get(id) {
            TypeDescriptor::Enum(e) => {
                assert_eq!(e.member_value("B"), Some(2));
            }
            _ => panic!("expected enum"),
        }
        Ok(())
    }

    #[test]
    fn bitfield_fields_parse() -> Result<()> {
        let mut ctx = Context::new(Endian::Little, 8);
        parse(&mut ctx, "struct b { uint16 a:4; uint16 b:4; uint16 c:4; uint16 d:4; };")?;
        let id = ctx.resolve("b")?;
        match ctx.get(id) {
            TypeDescriptor::Structure(a) => assert_eq!(a.size, Some(2)),
            _ => panic!("expected struct"),
        }
        Ok(())
    }
}
