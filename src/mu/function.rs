// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/function.rs

// Function objects. A native function's form is the symbol it was
// installed under and its extension indexes the native table; a
// compiled function's form is its lambda list consed onto its body.

// <>

use super::symbol;
use super::value::{SysClass, Value};
use super::vector::{self, VecType};
use super::{Env, MuResult};

const ARITY: usize = 0;
const FORM: usize = 1;
const FRAME_ID: usize = 2;
const EXTENSION: usize = 3;

pub fn make(env: &mut Env, arity: usize, form: Value, frame_id: Value) -> MuResult<Value> {
    let func = env.heap.alloc(4, SysClass::Function)?;
    env.heap.set_field(func, ARITY, Value::Fixnum(arity as i64));
    env.heap.set_field(func, FORM, form);
    env.heap.set_field(func, FRAME_ID, frame_id);
    env.heap.set_field(func, EXTENSION, Value::NIL);

    Ok(Value::Heap(func))
}

/// Wraps entry `index` of the native table under symbol `sym`
pub fn native(env: &mut Env, sym: Value, arity: usize, index: usize) -> MuResult<Value> {
    let func = make(env, arity, sym, Value::NIL)?;
    if let Value::Heap(r) = func {
        env.heap.set_field(r, EXTENSION, Value::Fixnum(index as i64));
    }

    Ok(func)
}

pub fn is_function(env: &Env, v: Value) -> bool {
    matches!(v, Value::Heap(r) if env.heap.class_of(r) == SysClass::Function)
}

fn field(env: &Env, func: Value, slot: usize) -> Value {
    match func {
        Value::Heap(r) => env.heap.field(r, slot),
        _ => Value::NIL,
    }
}

pub fn arity(env: &Env, func: Value) -> usize {
    field(env, func, ARITY).as_fixnum().unwrap_or(0) as usize
}

pub fn form(env: &Env, func: Value) -> Value {
    field(env, func, FORM)
}

pub fn set_form(env: &mut Env, func: Value, form: Value) {
    if let Value::Heap(r) = func {
        env.heap.set_field(r, FORM, form);
    }
}

pub fn frame_id(env: &Env, func: Value) -> Value {
    field(env, func, FRAME_ID)
}

pub fn extension(env: &Env, func: Value) -> Value {
    field(env, func, EXTENSION)
}

pub fn set_extension(env: &mut Env, func: Value, ext: Value) {
    if let Value::Heap(r) = func {
        env.heap.set_field(r, EXTENSION, ext);
    }
}

pub fn is_native(env: &Env, func: Value) -> bool {
    symbol::is_heap_symbol(env, form(env, func))
}

/// Index into the native table, for native functions
pub fn native_index(env: &Env, func: Value) -> Option<usize> {
    if !is_native(env, func) {
        return None;
    }

    extension(env, func).as_fixnum().map(|n| n as usize)
}

/// `#(:t arity form frame-id extension)`
pub fn view(env: &mut Env, func: Value) -> MuResult<Value> {
    let fields = [
        field(env, func, ARITY),
        form(env, func),
        frame_id(env, func),
        extension(env, func),
    ];

    vector::from_values(env, VecType::T, &fields)
}
