// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/cons.rs

// Pairs and lists. Small pairs live in a single word; everything else
// takes a two word heap cell. Callers see the same operations either
// way.

// <>

use super::exception::ErrType;
use super::value::{PackedCons, SysClass, Value};
use super::{Env, MuResult};

const CAR: usize = 0;
const CDR: usize = 1;

/// Builds a pair, packing it into one word when both halves fit
pub fn cons(env: &mut Env, car: Value, cdr: Value) -> MuResult<Value> {
    if let Some(packed) = PackedCons::pack(car, cdr) {
        return Ok(Value::Cons(packed));
    }

    let cell = env.heap.alloc(2, SysClass::Cons)?;
    env.heap.set_field(cell, CAR, car);
    env.heap.set_field(cell, CDR, cdr);

    Ok(Value::Heap(cell))
}

pub fn is_cons(env: &Env, v: Value) -> bool {
    match v {
        Value::Cons(_) => true,
        Value::Heap(r) => env.heap.class_of(r) == SysClass::Cons,
        _ => false,
    }
}

pub fn is_list(env: &Env, v: Value) -> bool {
    v.is_nil() || is_cons(env, v)
}

/// Car of a pair; nil for anything else
pub fn car(env: &Env, v: Value) -> Value {
    match v {
        Value::Cons(p) => p.car(),
        Value::Heap(r) if env.heap.class_of(r) == SysClass::Cons => env.heap.field(r, CAR),
        _ => Value::NIL,
    }
}

/// Cdr of a pair; nil for anything else
pub fn cdr(env: &Env, v: Value) -> Value {
    match v {
        Value::Cons(p) => p.cdr(),
        Value::Heap(r) if env.heap.class_of(r) == SysClass::Cons => env.heap.field(r, CDR),
        _ => Value::NIL,
    }
}

/// Replaces the car of a heap pair; packed pairs are immutable
pub fn set_car(env: &mut Env, pair: Value, v: Value) -> bool {
    match pair {
        Value::Heap(r) if env.heap.class_of(r) == SysClass::Cons => {
            env.heap.set_field(r, CAR, v);
            true
        }
        _ => false,
    }
}

pub fn set_cdr(env: &mut Env, pair: Value, v: Value) -> bool {
    match pair {
        Value::Heap(r) if env.heap.class_of(r) == SysClass::Cons => {
            env.heap.set_field(r, CDR, v);
            true
        }
        _ => false,
    }
}

/// Builds a proper list
pub fn list(env: &mut Env, items: &[Value]) -> MuResult<Value> {
    list_dotted(env, items, Value::NIL)
}

/// Builds a list whose last cdr is `tail`
pub fn list_dotted(env: &mut Env, items: &[Value], tail: Value) -> MuResult<Value> {
    items
        .iter()
        .rev()
        .try_fold(tail, |acc, item| cons(env, *item, acc))
}

/// Elements of a list, stopping at the first non-pair cdr
pub fn to_vec(env: &Env, list: Value) -> Vec<Value> {
    let mut out = Vec::new();
    let mut cur = list;

    while is_cons(env, cur) {
        out.push(car(env, cur));
        cur = cdr(env, cur);
    }

    out
}

/// Length of a proper list; `None` if it ends in an atom
pub fn length(env: &Env, list: Value) -> Option<usize> {
    let mut n = 0;
    let mut cur = list;

    while is_cons(env, cur) {
        n += 1;
        cur = cdr(env, cur);
    }

    cur.is_nil().then_some(n)
}

/// Length of a proper list, raising under `tag` otherwise
pub fn checked_length(env: &mut Env, tag: &str, list: Value) -> MuResult<usize> {
    match length(env, list) {
        Some(n) => Ok(n),
        None => env.raise(tag, ErrType::Type, list),
    }
}

pub fn nthcdr(env: &Env, n: usize, list: Value) -> Value {
    let mut cur = list;
    for _ in 0..n {
        if !is_cons(env, cur) {
            return Value::NIL;
        }
        cur = cdr(env, cur);
    }

    cur
}

pub fn nth(env: &Env, n: usize, list: Value) -> Value {
    car(env, nthcdr(env, n, list))
}

#[cfg(test)]
mod tests {
    use super::super::Config;
    use super::*;

    fn env() -> Env {
        Env::new(&Config::default()).unwrap()
    }

    #[test]
    fn packed_pairs_skip_the_heap() {
        let mut env = env();
        let used = env.heap.used();

        let p = cons(&mut env, Value::Fixnum(1), Value::NIL).unwrap();
        assert!(matches!(p, Value::Cons(_)));
        assert_eq!(env.heap.used(), used);
        assert_eq!(car(&env, p), Value::Fixnum(1));
        assert_eq!(cdr(&env, p), Value::NIL);
    }

    #[test]
    fn wide_pairs_go_to_the_heap() {
        let mut env = env();

        let p = cons(&mut env, Value::Fixnum(1 << 40), Value::Float(2.5)).unwrap();
        assert!(matches!(p, Value::Heap(_)));
        assert_eq!(car(&env, p), Value::Fixnum(1 << 40));
        assert_eq!(cdr(&env, p), Value::Float(2.5));

        assert!(set_car(&mut env, p, Value::T));
        assert_eq!(car(&env, p), Value::T);
    }

    #[test]
    fn lists() {
        let mut env = env();
        let items = [Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)];

        let l = list(&mut env, &items).unwrap();
        assert!(is_list(&env, l));
        assert_eq!(length(&env, l), Some(3));
        assert_eq!(to_vec(&env, l), items.to_vec());
        assert_eq!(nth(&env, 2, l), Value::Fixnum(3));
        assert_eq!(nth(&env, 5, l), Value::NIL);
        assert_eq!(nthcdr(&env, 3, l), Value::NIL);

        let d = list_dotted(&mut env, &items[..2], Value::Fixnum(9)).unwrap();
        assert_eq!(length(&env, d), None);
        assert_eq!(to_vec(&env, d), items[..2].to_vec());
        assert_eq!(nthcdr(&env, 2, d), Value::Fixnum(9));

        assert!(is_list(&env, Value::NIL));
        assert!(!is_cons(&env, Value::NIL));
        assert_eq!(car(&env, Value::NIL), Value::NIL);
    }
}
