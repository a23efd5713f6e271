//! Tokenizer and shunting-yard evaluator for dynamic array-count and
//! `#define` expressions.

use crate::registry::{Constant, Context};
use crate::result::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i128),
    Ident(String),
    SizeOf(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let (radix, skip) = if c == '0' && chars.get(i + 1).copied() == Some('x') {
                (16, 2)
            } else if c == '0' && chars.get(i + 1).copied() == Some('b') {
                (2, 2)
            } else {
                (10, 0)
            };
            i += skip;
            let digit_start = i;
            while i < chars.len() && (chars[i].is_alphanumeric()) {
                i += 1;
            }
            let mut text = chars[digit_start..i].iter().collect::<String>();
            while text.ends_with(['u', 'U', 'l', 'L']) {
                text.pop();
            }
            let value = i128::from_str_radix(&text, radix)
                .map_err(|_| Error::ExpressionTokenizerError(format!("bad numeric literal `{}`", &chars[start..i].iter().collect::<String>())))?;
            tokens.push(Token::Number(value));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident == "sizeof" {
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if chars.get(j) != Some(&'(') {
                    return Err(Error::ExpressionTokenizerError("expected `(` after sizeof".into()));
                }
                j += 1;
                let name_start = j;
                while j < chars.len() && chars[j] != ')' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(Error::ExpressionTokenizerError("unterminated sizeof(...)".into()));
                }
                let name: String = chars[name_start..j].iter().collect();
                tokens.push(Token::SizeOf(name.trim().to_string()));
                i = j + 1;
            } else {
                tokens.push(Token::Ident(ident));
            }
            continue;
        }
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '~' => tokens.push(Token::Op(c)),
            '<' | '>' => {
                if chars.get(i + 1) == Some(&c) {
                    tokens.push(Token::Op(if c == '<' { 'L' } else { 'R' }));
                    i += 2;
                    continue;
                }
                return Err(Error::ExpressionTokenizerError(format!("unexpected character `{c}`")));
            }
            other => return Err(Error::ExpressionTokenizerError(format!("unexpected character `{other}`"))),
        }
        i += 1;
    }
    Ok(tokens)
}

fn precedence(op: char) -> u8 {
    match op {
        '^' => 1,
        '<' | '>' | 'L' | 'R' | '+' | '-' => 2,
        '*' | '/' | '%' | '&' | '|' => 3,
        'u' => 4, // unary minus / unary not
        _ => 0,
    }
}

/// Floor division matching the reference implementation's integer semantics.
fn floor_div(a: i128, b: i128) -> i128 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod(a: i128, b: i128) -> i128 {
    a - floor_div(a, b) * b
}

fn apply(op: char, a: i128, b: i128) -> i128 {
    match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' => floor_div(a, b),
        '%' => floor_mod(a, b),
        '&' => a & b,
        '|' => a | b,
        '^' => a ^ b,
        'L' => a << b,
        'R' => a >> b,
        _ => unreachable!("unknown binary operator `{op}`"),
    }
}

/// Evaluates an integer expression against sibling field values and the
/// registry's `#define` constants. `EOF` is a reserved identifier meaning
/// "read until end of stream"; callers of array-count expressions should
/// check for it before calling this evaluator.
pub fn evaluate(ctx: &Context, scope: &[(String, i128)], src: &str) -> Result<i128> {
    let tokens = tokenize(src)?;
    let mut output: Vec<i128> = Vec::new();
    let mut ops: Vec<Token> = Vec::new();
    let mut prev_is_value = false;

    let lookup = |name: &str| -> Result<i128> {
        if let Some((_, v)) = scope.iter().find(|(n, _)| n == name) {
            return Ok(*v);
        }
        match ctx.constant(name) {
            Some(Constant::Int(v)) => Ok(*v),
            Some(Constant::Str(_)) => Err(Error::ExpressionParserError(format!("`{name}` is not numeric"))),
            None => Err(Error::ExpressionParserError(format!("unknown identifier `{name}`"))),
        }
    };

    fn pop_apply(output: &mut Vec<i128>, op: char) -> Result<()> {
        if op == 'u' {
            let v = output.pop().ok_or_else(|| Error::ExpressionParserError("malformed expression".into()))?;
            output.push(-v);
        } else if op == '~' {
            let v = output.pop().ok_or_else(|| Error::ExpressionParserError("malformed expression".into()))?;
            output.push(!v);
        } else {
            let b = output.pop().ok_or_else(|| Error::ExpressionParserError("malformed expression".into()))?;
            let a = output.pop().ok_or_else(|| Error::ExpressionParserError("malformed expression".into()))?;
            output.push(apply(op, a, b));
        }
        Ok(())
    }

    for tok in tokens {
        match tok {
            Token::Number(n) => {
                output.push(n);
                prev_is_value = true;
            }
            Token::Ident(name) => {
                output.push(lookup(&name)?);
                prev_is_value = true;
            }
            Token::SizeOf(name) => {
                let id = ctx.resolve(&name)?;
                let size = crate::types::static_size(ctx, id)
                    .ok_or_else(|| Error::ExpressionParserError(format!("`{name}` has no static size")))?;
                output.push(size as i128);
                prev_is_value = true;
            }
            Token::Op(c) if c == '-' && !prev_is_value => {
                ops.push(Token::Op('u'));
            }
            Token::Op('~') => {
                ops.push(Token::Op('~'));
            }
            Token::Op(c) => {
                while let Some(Token::Op(top)) = ops.last() {
                    if precedence(*top) >= precedence(c) {
                        if let Some(Token::Op(op)) = ops.pop() {
                            pop_apply(&mut output, op)?;
                        }
                    } else {
                        break;
                    }
                }
                ops.push(Token::Op(c));
                prev_is_value = false;
            }
            Token::LParen => {
                ops.push(Token::LParen);
                prev_is_value = false;
            }
            Token::RParen => {
                loop {
                    match ops.pop() {
                        Some(Token::LParen) => break,
                        Some(Token::Op(op)) => pop_apply(&mut output, op)?,
                        None => return Err(Error::ExpressionParserError("unmatched `)`".into())),
                        _ => {}
                    }
                }
                prev_is_value = true;
            }
        }
    }
    while let Some(tok) = ops.pop() {
        match tok {
            Token::Op(op) => pop_apply(&mut output, op)?,
            Token::LParen => return Err(Error::ExpressionParserError("unmatched `(`".into())),
            _ => {}
        }
    }
    if output.len() != 1 {
        return Err(Error::ExpressionParserError(format!("malformed expression `{src}`")));
    }
    Ok(output[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endian;

    #[test]
    fn arithmetic_precedence() -> Result<()> {
        let ctx = Context::new(Endian::Little, 8);
        assert_eq!(evaluate(&ctx, &[], "2 + 3 * 4")?, 14);
        assert_eq!(evaluate(&ctx, &[], "(2 + 3) * 4")?, 20);
        Ok(())
    }

    #[test]
    fn floor_division_matches_reference_semantics() -> Result<()> {
        let ctx = Context::new(Endian::Little, 8);
        assert_eq!(evaluate(&ctx, &[], "-7 / 2")?, -4);
        assert_eq!(evaluate(&ctx, &[], "-7 % 2")?, 1);
        Ok(())
    }

    #[test]
    fn sibling_field_reference() -> Result<()> {
        let ctx = Context::new(Endian::Little, 8);
        let scope = vec![("n".to_string(), 3i128)];
        assert_eq!(evaluate(&ctx, &scope, "n + 1")?, 4);
        Ok(())
    }

    #[test]
    fn unknown_identifier_errors() {
        let ctx = Context::new(Endian::Little, 8);
        assert!(evaluate(&ctx, &[], "bogus").is_err());
    }
}
