// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/exception.rs

// Exception objects: what failed (the tag), what kind of failure it
// was, and the offending value.

// <>

use super::print;
use super::value::{SysClass, Value};
use super::{Env, MuResult};

/// Kind of a runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrType {
    Arity,
    Collision,
    Dup,
    Eof,
    Ns,
    Parse,
    Quote,
    Range,
    Size,
    Syntax,
    System,
    Type,
    Unbound,
    Value,
}

impl ErrType {
    pub fn keyword(self) -> Value {
        Value::kw(match self {
            ErrType::Arity => "arity",
            ErrType::Collision => "collide",
            ErrType::Dup => "dup",
            ErrType::Eof => "eof",
            ErrType::Ns => "ns",
            ErrType::Parse => "parse",
            ErrType::Quote => "quote",
            ErrType::Range => "range",
            ErrType::Size => "size",
            ErrType::Syntax => "syntax",
            ErrType::System => "system",
            ErrType::Type => "type",
            ErrType::Unbound => "unbound",
            ErrType::Value => "value",
        })
    }
}

// payload slots
const TAG: usize = 0;
const CLASS: usize = 1;
const ETYPE: usize = 2;
const SOURCE: usize = 3;
const FRAME: usize = 4;

/// Builds an exception of class `:error`
pub fn make(env: &mut Env, tag: Value, etype: ErrType, source: Value) -> MuResult<Value> {
    make_full(env, tag, Value::kw("error"), etype.keyword(), source, Value::NIL)
}

/// Builds an exception with every field supplied
pub fn make_full(
    env: &mut Env,
    tag: Value,
    class: Value,
    etype: Value,
    source: Value,
    frame: Value,
) -> MuResult<Value> {
    let ex = env.heap.alloc(5, SysClass::Exception)?;
    for (slot, value) in [
        (TAG, tag),
        (CLASS, class),
        (ETYPE, etype),
        (SOURCE, source),
        (FRAME, frame),
    ] {
        env.heap.set_field(ex, slot, value);
    }

    Ok(Value::Heap(ex))
}

pub fn is_exception(env: &Env, v: Value) -> bool {
    matches!(v, Value::Heap(r) if env.heap.class_of(r) == SysClass::Exception)
}

fn field(env: &Env, ex: Value, slot: usize) -> Value {
    match ex {
        Value::Heap(r) => env.heap.field(r, slot),
        _ => Value::NIL,
    }
}

pub fn tag(env: &Env, ex: Value) -> Value {
    field(env, ex, TAG)
}

pub fn class(env: &Env, ex: Value) -> Value {
    field(env, ex, CLASS)
}

pub fn etype(env: &Env, ex: Value) -> Value {
    field(env, ex, ETYPE)
}

pub fn source(env: &Env, ex: Value) -> Value {
    field(env, ex, SOURCE)
}

pub fn frame(env: &Env, ex: Value) -> Value {
    field(env, ex, FRAME)
}

pub fn set_frame(env: &mut Env, ex: Value, func: Value) {
    if let Value::Heap(r) = ex {
        env.heap.set_field(r, FRAME, func);
    }
}

/// `error: :car :type 5`
pub fn describe(env: &Env, ex: Value) -> String {
    format!(
        "{}: {} {} {}",
        print::to_string(env, class(env, ex), false),
        print::to_string(env, tag(env, ex), true),
        print::to_string(env, etype(env, ex), true),
        print::to_string(env, source(env, ex), true),
    )
}

#[cfg(test)]
mod tests {
    use super::super::Config;
    use super::*;

    #[test]
    fn fields() {
        let mut env = Env::new(&Config::default()).unwrap();
        let ex = make(&mut env, Value::kw("car"), ErrType::Type, Value::Fixnum(5)).unwrap();

        assert!(is_exception(&env, ex));
        assert!(!is_exception(&env, Value::Fixnum(5)));
        assert_eq!(tag(&env, ex), Value::kw("car"));
        assert_eq!(class(&env, ex), Value::kw("error"));
        assert_eq!(etype(&env, ex), Value::kw("type"));
        assert_eq!(source(&env, ex), Value::Fixnum(5));
        assert_eq!(frame(&env, ex), Value::NIL);
        assert_eq!(describe(&env, ex), "error: :car :type 5");
    }
}
