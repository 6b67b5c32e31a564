// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/symbol.rs

// Symbols and keywords. A keyword is a direct value naming itself; a
// symbol is a heap object with a home namespace, a name, and a value
// slot that starts out unbound.

// <>

use super::exception::ErrType;
use super::namespace::{self, Scope};
use super::value::{SysClass, Value};
use super::vector;
use super::{Env, MuResult};

const NS: usize = 0;
const NAME: usize = 1;
const VALUE: usize = 2;

pub fn make(env: &mut Env, ns: Value, name: Value, value: Value) -> MuResult<Value> {
    let sym = env.heap.alloc(3, SysClass::Symbol)?;
    env.heap.set_field(sym, NS, ns);
    env.heap.set_field(sym, NAME, name);
    env.heap.set_field(sym, VALUE, value);

    Ok(Value::Heap(sym))
}

/// True for keywords and heap symbols
pub fn is_symbol(env: &Env, v: Value) -> bool {
    match v {
        Value::Keyword(_) => true,
        Value::Heap(r) => env.heap.class_of(r) == SysClass::Symbol,
        _ => false,
    }
}

/// True for heap symbols only
pub fn is_heap_symbol(env: &Env, v: Value) -> bool {
    matches!(v, Value::Heap(r) if env.heap.class_of(r) == SysClass::Symbol)
}

pub fn name(env: &Env, sym: Value) -> Value {
    match sym {
        Value::Keyword(s) => Value::ShortStr(s),
        Value::Heap(r) => env.heap.field(r, NAME),
        _ => Value::NIL,
    }
}

/// Home namespace; nil for keywords and uninterned symbols
pub fn ns(env: &Env, sym: Value) -> Value {
    match sym {
        Value::Heap(r) => env.heap.field(r, NS),
        _ => Value::NIL,
    }
}

/// Keywords evaluate to themselves
pub fn value(env: &Env, sym: Value) -> Value {
    match sym {
        Value::Heap(r) => env.heap.field(r, VALUE),
        other => other,
    }
}

pub fn set_value(env: &mut Env, sym: Value, value: Value) {
    if let Value::Heap(r) = sym {
        env.heap.set_field(r, VALUE, value);
    }
}

pub fn is_bound(env: &Env, sym: Value) -> bool {
    value(env, sym) != Value::UNBOUND
}

/// Turns a token into a symbol
///
/// `:name` is a keyword, `ns:name` and `ns::name` name the external
/// and internal symbols of a namespace, and a bare name resolves
/// through mu and its imports before landing in the default
/// namespace.
pub fn parse(env: &mut Env, token: &[u8]) -> MuResult<Value> {
    if token.is_empty() {
        return env.raise("symbol", ErrType::Size, Value::NIL);
    }

    if token[0] == b':' {
        let body = &token[1..];
        if body.is_empty() {
            return env.raise("symbol", ErrType::Syntax, Value::kw("colon"));
        }

        return match Value::keyword(body) {
            Some(kw) => Ok(kw),
            None => {
                let name = vector::string(env, token)?;
                env.raise("keyword", ErrType::Size, name)
            }
        };
    }

    if let Some(pos) = find(token, b"::") {
        return qualified(env, &token[..pos], &token[pos + 2..], Scope::Intern, token);
    }

    if let Some(pos) = token.iter().position(|b| *b == b':') {
        return qualified(env, &token[..pos], &token[pos + 1..], Scope::Extern, token);
    }

    match token {
        b"nil" => return Ok(Value::NIL),
        b"t" => return Ok(Value::T),
        _ => (),
    }

    if let Some(sym) = namespace::map_imported(env, env.mu_ns, token) {
        return Ok(sym);
    }

    let name = vector::string(env, token)?;
    let ns = env.default_ns;
    namespace::intern(env, ns, Scope::Extern, name, Value::UNBOUND)
}

fn qualified(env: &mut Env, ns_name: &[u8], name: &[u8], scope: Scope, token: &[u8]) -> MuResult<Value> {
    if name.is_empty() || name.contains(&b':') {
        let src = vector::string(env, token)?;
        return env.raise("symbol", ErrType::Syntax, src);
    }

    let ns = match env.map_namespace(ns_name) {
        Some(ns) => ns,
        None => {
            let src = vector::string(env, ns_name)?;
            return env.raise("symbol", ErrType::Ns, src);
        }
    };

    let name = vector::string(env, name)?;
    namespace::intern(env, ns, scope, name, Value::UNBOUND)
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}
