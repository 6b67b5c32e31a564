// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/vector.rs

// Typed vectors. Strings of up to seven characters are direct values;
// everything else is a heap object whose header names a base object
// holding the packed element data, so that a slice can share storage
// with the vector it was cut from.

// <>

use super::exception::ErrType;
use super::heap::{words_for, MAX_OBJECT_WORDS, WORD_BYTES};
use super::value::{HeapRef, ShortStr, SysClass, Value};
use super::{Env, MuResult};

/// Element type of a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecType {
    Byte,
    Char,
    Fixnum,
    Float,
    Double,
    T,
}

impl VecType {
    pub fn keyword(self) -> Value {
        Value::kw(match self {
            VecType::Byte => "byte",
            VecType::Char => "char",
            VecType::Fixnum => "fixnum",
            VecType::Float => "float",
            VecType::Double => "double",
            VecType::T => "t",
        })
    }

    pub fn from_keyword(kw: Value) -> Option<VecType> {
        [
            VecType::Byte,
            VecType::Char,
            VecType::Fixnum,
            VecType::Float,
            VecType::Double,
            VecType::T,
        ]
        .into_iter()
        .find(|t| t.keyword() == kw)
    }

    /// Bytes per element
    pub fn elt_size(self) -> usize {
        match self {
            VecType::Byte | VecType::Char => 1,
            VecType::Float => 4,
            VecType::Fixnum | VecType::Double | VecType::T => 8,
        }
    }

    /// Whether a value may be stored in a vector of this type
    pub fn admits(self, v: Value) -> bool {
        match self {
            VecType::Byte => matches!(v, Value::Fixnum(n) if (0..=255).contains(&n)),
            VecType::Char => matches!(v, Value::Char(_)),
            VecType::Fixnum => matches!(v, Value::Fixnum(_)),
            VecType::Float | VecType::Double => matches!(v, Value::Float(_)),
            VecType::T => true,
        }
    }
}

// header slots, followed by element data in an owning vector
const TYPE: usize = 0;
const LENGTH: usize = 1;
const BASE: usize = 2;
const OFFSET: usize = 3;
const DATA: usize = 4;

/// Makes a string, direct if short and shared with any live string of
/// the same contents otherwise
pub fn string(env: &mut Env, bytes: &[u8]) -> MuResult<Value> {
    if let Some(s) = ShortStr::from_bytes(bytes) {
        return Ok(Value::ShortStr(s));
    }

    if let Some(r) = env.heap.map_string(bytes) {
        return Ok(Value::Heap(r));
    }

    let v = make(env, VecType::Char, bytes.len())?;
    if let Value::Heap(r) = v {
        for (i, b) in bytes.iter().enumerate() {
            env.heap.set_byte(r, DATA * WORD_BYTES + i, *b);
        }
        env.heap.add_string(bytes, r);
    }

    Ok(v)
}

/// Allocates a zero filled vector owning its data
pub fn make(env: &mut Env, vtype: VecType, len: usize) -> MuResult<Value> {
    let payload = DATA + words_for(len * vtype.elt_size());
    if payload + 1 > MAX_OBJECT_WORDS {
        return env.raise("vector", ErrType::Size, Value::Fixnum(len as i64));
    }

    let r = env.heap.alloc(payload, SysClass::Vector)?;
    env.heap.set_field(r, TYPE, vtype.keyword());
    env.heap.set_field(r, LENGTH, Value::Fixnum(len as i64));
    env.heap.set_field(r, BASE, Value::Heap(r));
    env.heap.set_field(r, OFFSET, Value::Fixnum(0));

    Ok(Value::Heap(r))
}

/// Builds a vector from values, each of which must suit `vtype`
pub fn from_values(env: &mut Env, vtype: VecType, items: &[Value]) -> MuResult<Value> {
    if let Some(bad) = items.iter().find(|v| !vtype.admits(**v)) {
        return env.raise("vector", ErrType::Type, *bad);
    }

    if vtype == VecType::Char {
        let bytes: Vec<u8> = items.iter().filter_map(|v| v.as_char()).collect();
        return string(env, &bytes);
    }

    let v = make(env, vtype, items.len())?;
    for (i, item) in items.iter().enumerate() {
        set_elt(env, v, i, *item);
    }

    Ok(v)
}

fn heap_vector(env: &Env, v: Value) -> Option<HeapRef> {
    match v {
        Value::Heap(r) if env.heap.class_of(r) == SysClass::Vector => Some(r),
        _ => None,
    }
}

pub fn is_vector(env: &Env, v: Value) -> bool {
    matches!(v, Value::ShortStr(_)) || heap_vector(env, v).is_some()
}

pub fn is_string(env: &Env, v: Value) -> bool {
    is_vector(env, v) && vtype(env, v) == VecType::Char
}

pub fn vtype(env: &Env, v: Value) -> VecType {
    match heap_vector(env, v) {
        Some(r) => VecType::from_keyword(env.heap.field(r, TYPE)).unwrap_or(VecType::T),
        None => VecType::Char,
    }
}

pub fn length(env: &Env, v: Value) -> usize {
    match v {
        Value::ShortStr(s) => s.len(),
        _ => match heap_vector(env, v) {
            Some(r) => env.heap.field(r, LENGTH).as_fixnum().unwrap_or(0) as usize,
            None => 0,
        },
    }
}

/// The object that owns this vector's data; itself unless a slice
pub fn base(env: &Env, v: Value) -> Value {
    match heap_vector(env, v) {
        Some(r) => env.heap.field(r, BASE),
        None => v,
    }
}

// base object and byte address of element `i` within its payload
fn locate(env: &Env, r: HeapRef, i: usize) -> (HeapRef, usize) {
    let base = env.heap.field(r, BASE).as_heap().unwrap_or(r);
    let offset = env.heap.field(r, OFFSET).as_fixnum().unwrap_or(0) as usize;
    let esize = vtype(env, Value::Heap(r)).elt_size();

    (base, DATA * WORD_BYTES + offset + i * esize)
}

fn read_le(env: &Env, obj: HeapRef, addr: usize, n: usize) -> u64 {
    (0..n).fold(0, |acc, k| acc | (env.heap.byte(obj, addr + k) as u64) << (k * 8))
}

fn write_le(env: &mut Env, obj: HeapRef, addr: usize, n: usize, bits: u64) {
    for k in 0..n {
        env.heap.set_byte(obj, addr + k, (bits >> (k * 8)) as u8);
    }
}

/// Element `i`; nil when out of range
pub fn elt(env: &Env, v: Value, i: usize) -> Value {
    if i >= length(env, v) {
        return Value::NIL;
    }

    let r = match v {
        Value::ShortStr(s) => return Value::Char(s.as_bytes()[i]),
        _ => match heap_vector(env, v) {
            Some(r) => r,
            None => return Value::NIL,
        },
    };

    let vtype = vtype(env, v);
    let (base, addr) = locate(env, r, i);
    let bits = read_le(env, base, addr, vtype.elt_size());

    match vtype {
        VecType::Byte => Value::Fixnum(bits as i64),
        VecType::Char => Value::Char(bits as u8),
        VecType::Fixnum => Value::Fixnum(bits as i64),
        VecType::Float => Value::Float(f32::from_bits(bits as u32)),
        VecType::Double => Value::Float(f64::from_bits(bits) as f32),
        VecType::T => Value::from_word(bits).unwrap_or(Value::NIL),
    }
}

/// Stores element `i` of a heap vector; false if the vector is direct,
/// the index is out of range, or the value does not suit the type
pub fn set_elt(env: &mut Env, v: Value, i: usize, value: Value) -> bool {
    let r = match heap_vector(env, v) {
        Some(r) if i < length(env, v) => r,
        _ => return false,
    };

    let vtype = vtype(env, v);
    if !vtype.admits(value) {
        return false;
    }

    let bits = match value {
        Value::Fixnum(n) if vtype != VecType::T => n as u64,
        Value::Char(c) if vtype != VecType::T => c as u64,
        Value::Float(f) if vtype == VecType::Float => f.to_bits() as u64,
        Value::Float(f) if vtype == VecType::Double => (f as f64).to_bits(),
        other => other.word(),
    };

    let (base, addr) = locate(env, r, i);
    write_le(env, base, addr, vtype.elt_size(), bits);

    true
}

/// Every element, in order
pub fn values(env: &Env, v: Value) -> Vec<Value> {
    (0..length(env, v)).map(|i| elt(env, v, i)).collect()
}

/// Contents of a string; empty for anything else
pub fn bytes(env: &Env, v: Value) -> Vec<u8> {
    match v {
        Value::ShortStr(s) => s.as_bytes().to_vec(),
        _ if is_string(env, v) => values(env, v).iter().filter_map(|c| c.as_char()).collect(),
        _ => Vec::new(),
    }
}

/// Contents of a string, with invalid UTF-8 replaced
pub fn lossy(env: &Env, v: Value) -> String {
    String::from_utf8_lossy(&bytes(env, v)).into_owned()
}

/// A view of `len` elements starting at `offset`, sharing storage with
/// the original; a direct string yields a direct string
pub fn slice(env: &mut Env, v: Value, offset: usize, len: usize) -> MuResult<Value> {
    if offset + len > length(env, v) {
        let src = Value::Fixnum(offset as i64);
        return env.raise("slice", ErrType::Range, src);
    }

    if let Value::ShortStr(s) = v {
        return match s.slice(offset, len) {
            Some(s) => Ok(Value::ShortStr(s)),
            None => env.raise("slice", ErrType::Range, v),
        };
    }

    let r = match heap_vector(env, v) {
        Some(r) => r,
        None => return env.raise("slice", ErrType::Type, v),
    };

    let vtype = vtype(env, v);
    let base = env.heap.field(r, BASE);
    let base_offset = env.heap.field(r, OFFSET).as_fixnum().unwrap_or(0);

    let view = env.heap.alloc(DATA, SysClass::Vector)?;
    env.heap.set_field(view, TYPE, vtype.keyword());
    env.heap.set_field(view, LENGTH, Value::Fixnum(len as i64));
    env.heap.set_field(view, BASE, base);
    env.heap.set_field(
        view,
        OFFSET,
        Value::Fixnum(base_offset + (offset * vtype.elt_size()) as i64),
    );

    Ok(Value::Heap(view))
}

#[cfg(test)]
mod tests {
    use super::super::Config;
    use super::*;

    fn env() -> Env {
        Env::new(&Config::default()).unwrap()
    }

    #[test]
    fn short_strings_are_direct() {
        let mut env = env();
        let used = env.heap.used();

        let s = string(&mut env, b"abc").unwrap();
        assert!(matches!(s, Value::ShortStr(_)));
        assert_eq!(env.heap.used(), used);
        assert!(is_string(&env, s));
        assert_eq!(length(&env, s), 3);
        assert_eq!(elt(&env, s, 1), Value::Char(b'b'));
        assert_eq!(elt(&env, s, 3), Value::NIL);
    }

    #[test]
    fn long_strings_are_shared() {
        let mut env = env();

        let a = string(&mut env, b"hello, world").unwrap();
        let b = string(&mut env, b"hello, world").unwrap();
        assert!(matches!(a, Value::Heap(_)));
        assert_eq!(a, b);
        assert_eq!(bytes(&env, a), b"hello, world");
        assert_eq!(lossy(&env, a), "hello, world");
    }

    #[test]
    fn typed_elements() {
        let mut env = env();

        let items = [Value::Fixnum(-1), Value::Fixnum(1 << 40), Value::Fixnum(7)];
        let v = from_values(&mut env, VecType::Fixnum, &items).unwrap();
        assert_eq!(values(&env, v), items.to_vec());
        assert_eq!(vtype(&env, v), VecType::Fixnum);

        let floats = [Value::Float(1.5), Value::Float(-0.25), Value::Float(3.0)];
        let f = from_values(&mut env, VecType::Float, &floats).unwrap();
        assert_eq!(values(&env, f), floats.to_vec());

        let bytes = [Value::Fixnum(0), Value::Fixnum(255), Value::Fixnum(16)];
        let b = from_values(&mut env, VecType::Byte, &bytes).unwrap();
        assert_eq!(values(&env, b), bytes.to_vec());

        let mixed = [Value::T, Value::Float(2.0), Value::kw("key")];
        let t = from_values(&mut env, VecType::T, &mixed).unwrap();
        assert_eq!(values(&env, t), mixed.to_vec());

        assert!(set_elt(&mut env, t, 0, Value::Fixnum(99)));
        assert_eq!(elt(&env, t, 0), Value::Fixnum(99));
        assert!(!set_elt(&mut env, f, 0, Value::T));
        assert!(!set_elt(&mut env, f, 9, Value::Float(0.0)));
    }

    #[test]
    fn element_type_checked() {
        let mut env = env();
        assert!(from_values(&mut env, VecType::Byte, &[Value::Fixnum(256)]).is_err());
        assert!(from_values(&mut env, VecType::Fixnum, &[Value::T]).is_err());
    }

    #[test]
    fn slices_share_storage() {
        let mut env = env();

        let items: Vec<Value> = (0..10).map(Value::Fixnum).collect();
        let v = from_values(&mut env, VecType::Fixnum, &items).unwrap();

        let s = slice(&mut env, v, 2, 5).unwrap();
        assert_eq!(values(&env, s), items[2..7].to_vec());
        assert_eq!(base(&env, s), v);

        let ss = slice(&mut env, s, 1, 2).unwrap();
        assert_eq!(values(&env, ss), items[3..5].to_vec());
        assert_eq!(base(&env, ss), v);

        set_elt(&mut env, v, 3, Value::Fixnum(-3));
        assert_eq!(elt(&env, ss, 0), Value::Fixnum(-3));

        assert!(slice(&mut env, v, 8, 3).is_err());
    }

    #[test]
    fn string_slices() {
        let mut env = env();

        let short = string(&mut env, b"abcdef").unwrap();
        let s = slice(&mut env, short, 1, 3).unwrap();
        assert!(matches!(s, Value::ShortStr(_)));
        assert_eq!(bytes(&env, s), b"bcd");

        let long = string(&mut env, b"a longer string").unwrap();
        let s = slice(&mut env, long, 2, 6).unwrap();
        assert_eq!(bytes(&env, s), b"longer");
        assert!(is_string(&env, s));
    }

    #[test]
    fn oversize() {
        let mut env = env();
        assert!(make(&mut env, VecType::T, MAX_OBJECT_WORDS).is_err());
    }
}
