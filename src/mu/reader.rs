// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/reader.rs

// Reads forms from a stream into the internal representation. The
// appropriate reader can almost always be deduced from the first
// character.

// <>

use super::cons;
use super::exception::ErrType;
use super::readtable::{is_constituent, is_whitespace, syntax_char, syntax_type, SyntaxChar, SyntaxType};
use super::stream;
use super::symbol;
use super::value::Value;
use super::vector::{self, VecType};
use super::{Env, MuResult};

use std::str;

/// Longest token or string literal
pub const MAX_TOKEN: usize = 1024;

/// What a single read can produce: a value, or the dot of a dotted pair
enum Datum {
    Value(Value),
    Dot,
}

/// Reads one form; `None` at a clean end of input
pub fn read(env: &mut Env, src: Value) -> MuResult<Option<Value>> {
    match read_datum(env, src)? {
        None => Ok(None),
        Some(Datum::Value(v)) => Ok(Some(v)),
        Some(Datum::Dot) => env.raise("read", ErrType::Syntax, Value::Char(b'.')),
    }
}

fn read_datum(env: &mut Env, src: Value) -> MuResult<Option<Datum>> {
    if !skip_whitespace(env, src)? {
        return Ok(None);
    }

    let ch = match stream::read_byte(env, src) {
        Some(ch) => ch,
        None => return Ok(None),
    };

    let value = match syntax_char(ch) {
        Some(SyntaxChar::LParen) => read_list(env, src)?,
        Some(SyntaxChar::Quote) => read_quote(env, src)?,
        Some(SyntaxChar::DQuote) => read_string(env, src)?,
        Some(SyntaxChar::Sharp) => read_sharp(env, src)?,
        Some(
            SyntaxChar::RParen
            | SyntaxChar::BackQuote
            | SyntaxChar::Comma
            | SyntaxChar::Backslash
            | SyntaxChar::VBar,
        ) => return env.raise("read", ErrType::Syntax, Value::Char(ch)),
        _ if syntax_type(ch) == SyntaxType::Illegal => {
            return env.raise("read", ErrType::Syntax, Value::Char(ch))
        }
        _ => {
            stream::unread_byte(env, src, ch);
            return read_atom(env, src).map(Some);
        }
    };

    Ok(Some(Datum::Value(value)))
}

/// Skips whitespace and comments; false at end of input
fn skip_whitespace(env: &mut Env, src: Value) -> MuResult<bool> {
    loop {
        match stream::read_byte(env, src) {
            None => return Ok(false),
            Some(ch) if is_whitespace(ch) => (),
            Some(b';') => loop {
                match stream::read_byte(env, src) {
                    None => return Ok(false),
                    Some(b'\n') => break,
                    Some(_) => (),
                }
            },
            Some(b'#') => match stream::read_byte(env, src) {
                Some(b'|') => skip_block_comment(env, src)?,
                Some(next) => {
                    stream::unread_byte(env, src, next);
                    stream::unread_byte(env, src, b'#');
                    return Ok(true);
                }
                None => {
                    stream::unread_byte(env, src, b'#');
                    return Ok(true);
                }
            },
            Some(ch) => {
                stream::unread_byte(env, src, ch);
                return Ok(true);
            }
        }
    }
}

// after `#|`, through the closing `|#`
fn skip_block_comment(env: &mut Env, src: Value) -> MuResult<()> {
    let mut bar = false;

    loop {
        match stream::read_byte(env, src) {
            None => return env.raise("read", ErrType::Eof, Value::kw("comment")),
            Some(b'#') if bar => return Ok(()),
            Some(ch) => bar = ch == b'|',
        }
    }
}

// after `(`
fn read_list(env: &mut Env, src: Value) -> MuResult<Value> {
    let mut items = Vec::new();

    loop {
        if !skip_whitespace(env, src)? {
            return env.raise("read", ErrType::Eof, Value::kw("list"));
        }

        match stream::read_byte(env, src) {
            Some(b')') => return cons::list(env, &items),
            Some(ch) => stream::unread_byte(env, src, ch),
            None => return env.raise("read", ErrType::Eof, Value::kw("list")),
        }

        match read_datum(env, src)? {
            None => return env.raise("read", ErrType::Eof, Value::kw("list")),
            Some(Datum::Value(v)) => items.push(v),
            Some(Datum::Dot) => {
                if items.is_empty() {
                    return env.raise("read", ErrType::Syntax, Value::Char(b'.'));
                }

                let tail = match read_datum(env, src)? {
                    Some(Datum::Value(v)) => v,
                    Some(Datum::Dot) => return env.raise("read", ErrType::Syntax, Value::Char(b'.')),
                    None => return env.raise("read", ErrType::Eof, Value::kw("list")),
                };

                if !skip_whitespace(env, src)? {
                    return env.raise("read", ErrType::Eof, Value::kw("list"));
                }

                return match stream::read_byte(env, src) {
                    Some(b')') => cons::list_dotted(env, &items, tail),
                    Some(ch) => env.raise("read", ErrType::Syntax, Value::Char(ch)),
                    None => env.raise("read", ErrType::Eof, Value::kw("list")),
                };
            }
        }
    }
}

// after `'`; only symbols and lists need quoting
fn read_quote(env: &mut Env, src: Value) -> MuResult<Value> {
    let value = match read_datum(env, src)? {
        Some(Datum::Value(v)) => v,
        Some(Datum::Dot) => return env.raise("read", ErrType::Syntax, Value::Char(b'.')),
        None => return env.raise("read", ErrType::Eof, Value::kw("quote")),
    };

    if symbol::is_symbol(env, value) || cons::is_cons(env, value) {
        cons::list(env, &[Value::kw("quote"), value])
    } else {
        Ok(value)
    }
}

// after `"`
fn read_string(env: &mut Env, src: Value) -> MuResult<Value> {
    let mut acc = Vec::new();

    loop {
        let ch = match stream::read_byte(env, src) {
            Some(b'"') => return vector::string(env, &acc),
            Some(b'\\') => stream::read_byte(env, src),
            other => other,
        };

        match ch {
            Some(ch) => acc.push(ch),
            None => return env.raise("read", ErrType::Eof, Value::kw("string")),
        }

        if acc.len() >= MAX_TOKEN {
            return env.raise("read", ErrType::Size, Value::Fixnum(acc.len() as i64));
        }
    }
}

// after `#`
fn read_sharp(env: &mut Env, src: Value) -> MuResult<Value> {
    let ch = match stream::read_byte(env, src) {
        Some(ch) => ch,
        None => return env.raise("read", ErrType::Eof, Value::Char(b'#')),
    };

    match ch {
        b'x' => read_radix(env, src, 16),
        b'd' => read_radix(env, src, 10),
        b'\\' => match stream::read_byte(env, src) {
            Some(c) => Ok(Value::Char(c)),
            None => env.raise("read", ErrType::Eof, Value::Char(b'\\')),
        },
        b'(' => {
            let list = read_list(env, src)?;
            let head = cons::car(env, list);

            match VecType::from_keyword(head) {
                Some(vtype) => {
                    let items = cons::to_vec(env, cons::cdr(env, list));
                    vector::from_values(env, vtype, &items)
                }
                None => env.raise("read", ErrType::Type, head),
            }
        }
        b':' => {
            let token = read_token(env, src)?;
            if parse_number(env, &token)?.is_some() {
                let name = vector::string(env, &token)?;
                return env.raise("read", ErrType::Type, name);
            }
            if token.contains(&b':') {
                let name = vector::string(env, &token)?;
                return env.raise("read", ErrType::Ns, name);
            }

            let name = vector::string(env, &token)?;
            symbol::make(env, Value::NIL, name, Value::UNBOUND)
        }
        other => env.raise("read", ErrType::Syntax, Value::Char(other)),
    }
}

fn read_radix(env: &mut Env, src: Value, radix: u32) -> MuResult<Value> {
    let token = read_token(env, src)?;
    let text = str::from_utf8(&token).unwrap_or("");

    match i128::from_str_radix(text, radix) {
        Ok(n) => match i64::try_from(n).ok().and_then(Value::fixnum) {
            Some(v) => Ok(v),
            None => {
                let src = vector::string(env, &token)?;
                env.raise("read", ErrType::Range, src)
            }
        },
        Err(_) => {
            let src = vector::string(env, &token)?;
            env.raise("read", ErrType::Syntax, src)
        }
    }
}

/// Collects constituent characters; the first non-constituent is left
/// on the stream
fn read_token(env: &mut Env, src: Value) -> MuResult<Vec<u8>> {
    let mut acc = Vec::new();

    while let Some(ch) = stream::read_byte(env, src) {
        if !is_constituent(ch) {
            stream::unread_byte(env, src, ch);
            break;
        }

        acc.push(ch);
        if acc.len() >= MAX_TOKEN {
            return env.raise("read", ErrType::Size, Value::Fixnum(acc.len() as i64));
        }
    }

    if acc.is_empty() {
        return env.raise("read", ErrType::Syntax, Value::kw("token"));
    }

    Ok(acc)
}

fn read_atom(env: &mut Env, src: Value) -> MuResult<Datum> {
    let token = read_token(env, src)?;

    if token == b"." {
        return Ok(Datum::Dot);
    }

    if let Some(n) = parse_number(env, &token)? {
        return Ok(Datum::Value(n));
    }

    symbol::parse(env, &token).map(Datum::Value)
}

/// Decimal fixnum, then float; `None` if the token is neither
fn parse_number(env: &mut Env, token: &[u8]) -> MuResult<Option<Value>> {
    let text = match str::from_utf8(token) {
        Ok(text) => text,
        Err(_) => return Ok(None),
    };

    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return match text.parse::<i64>().ok().and_then(Value::fixnum) {
            Some(v) => Ok(Some(v)),
            None => {
                let src = vector::string(env, token)?;
                env.raise("read", ErrType::Range, src)
            }
        };
    }

    let numeric = |s: &str| s.bytes().next().is_some_and(|b| b.is_ascii_digit());
    if numeric(digits) || digits.strip_prefix('.').is_some_and(numeric) {
        if let Ok(f) = text.parse::<f32>() {
            return Ok(Some(Value::Float(f)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::super::{print, Config, MuErr};
    use super::*;

    fn env() -> Env {
        Env::new(&Config::default()).unwrap()
    }

    fn reads(env: &mut Env, text: &str) -> MuResult<Option<Value>> {
        let src = stream::make(env, Box::new(stream::InputStream::string(text.as_bytes()))).unwrap();
        read(env, src)
    }

    fn round(env: &mut Env, text: &str) -> String {
        let v = reads(env, text).unwrap().unwrap();
        print::to_string(env, v, true)
    }

    fn err_type(env: &mut Env, text: &str) -> Value {
        match reads(env, text) {
            Err(MuErr::Raise(ex)) => super::super::exception::etype(env, ex),
            other => panic!("expected an exception reading {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses() {
        let mut env = env();

        for exp in [
            "(1 (2 3) (4 (5)) 6)",
            "(a b . c)",
            "(:foo \"a long string\" #\\a)",
            "#(:fixnum 1 2 3)",
            "#(:t 1 :a \"b\")",
            "#(:byte 0 255)",
            "#(:float 1.500000 -2.000000)",
            "(mu:car mu::hidden)",
            "(1.500000 -7)",
        ] {
            assert_eq!(exp, round(&mut env, exp));
        }

        assert_eq!("((1) 2)", round(&mut env, "((1) . (2))"));
        assert_eq!("((1 2 3 4) 5)", round(&mut env, "((1 2 3 4) ;Comment\n5)"));
        assert_eq!("(1 2)", round(&mut env, "(1 #| block |# 2)"));
        assert_eq!("(:quote (a b))", round(&mut env, "'(a b)"));
        assert_eq!("5", round(&mut env, "'5"));
        assert_eq!("\"ab\\\"c\"", round(&mut env, "\"ab\\\"c\""));
        assert_eq!("255", round(&mut env, "#xff"));
        assert_eq!("-12", round(&mut env, "#d-12"));
        assert_eq!("\"abc\"", round(&mut env, "#(:char #\\a #\\b #\\c)"));
        assert_eq!(":nil", round(&mut env, "()"));
        assert_eq!(":nil", round(&mut env, "nil"));
        assert_eq!(":t", round(&mut env, "t"));
        assert_eq!("100000.000000", round(&mut env, "1e5"));
    }

    #[test]
    fn end_of_input() {
        let mut env = env();

        assert_eq!(reads(&mut env, "").unwrap(), None);
        assert_eq!(reads(&mut env, "   ; only a comment").unwrap(), None);
        assert_eq!(reads(&mut env, "#| closed |#").unwrap(), None);

        assert_eq!(err_type(&mut env, "(1 2"), Value::kw("eof"));
        assert_eq!(err_type(&mut env, "\"open"), Value::kw("eof"));
        assert_eq!(err_type(&mut env, "#| open"), Value::kw("eof"));
        assert_eq!(err_type(&mut env, "'"), Value::kw("eof"));
    }

    #[test]
    fn malformed() {
        let mut env = env();

        assert_eq!(err_type(&mut env, ")"), Value::kw("syntax"));
        assert_eq!(err_type(&mut env, "(. 1)"), Value::kw("syntax"));
        assert_eq!(err_type(&mut env, "(1 . 2 3)"), Value::kw("syntax"));
        assert_eq!(err_type(&mut env, "#q"), Value::kw("syntax"));
        assert_eq!(err_type(&mut env, "#xzz"), Value::kw("syntax"));
        assert_eq!(err_type(&mut env, "#:123"), Value::kw("type"));
        assert_eq!(err_type(&mut env, "#:a:b"), Value::kw("ns"));
        assert_eq!(err_type(&mut env, "#(:nope 1)"), Value::kw("type"));
        assert_eq!(err_type(&mut env, "#(:fixnum 1.5)"), Value::kw("type"));
        assert_eq!(err_type(&mut env, "99999999999999999999"), Value::kw("range"));
        assert_eq!(err_type(&mut env, "288230376151711744"), Value::kw("range"));

        let long = "x".repeat(MAX_TOKEN);
        assert_eq!(err_type(&mut env, &long), Value::kw("size"));
        let long = format!("\"{}\"", "y".repeat(MAX_TOKEN));
        assert_eq!(err_type(&mut env, &long), Value::kw("size"));
    }

    #[test]
    fn atoms() {
        let mut env = env();

        assert_eq!(reads(&mut env, "42").unwrap(), Some(Value::Fixnum(42)));
        assert_eq!(reads(&mut env, "-0").unwrap(), Some(Value::Fixnum(0)));
        assert_eq!(reads(&mut env, ".5").unwrap(), Some(Value::Float(0.5)));
        assert_eq!(reads(&mut env, "#\\ ").unwrap(), Some(Value::Char(b' ')));

        let plus = reads(&mut env, "+").unwrap().unwrap();
        assert!(symbol::is_heap_symbol(&env, plus));
        let inf = reads(&mut env, "inf").unwrap().unwrap();
        assert!(symbol::is_heap_symbol(&env, inf));

        let a = reads(&mut env, "#:a").unwrap().unwrap();
        let b = reads(&mut env, "#:a").unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(symbol::ns(&env, a), Value::NIL);
        assert_eq!("#:a", print::to_string(&env, a, true));
    }
}
