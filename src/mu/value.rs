// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/value.rs

// The universal value representation. Every value has a 64-bit word
// form whose low two bits select a direct, cons immediate, or
// indirect (heap) encoding; the Value enum is the decoded view that
// the rest of the runtime matches on.

// <>

use std::fmt;
use std::hash::{Hash, Hasher};

/// Generates an enum together with a `TryFrom<u8>` implementation
/// that recovers a variant from its discriminant
macro_rules! enum_and_tryfrom {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vmeta:meta])* $vname:ident $(= $val:expr)?,)*
    }) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname $(= $val)?,)*
        }

        impl std::convert::TryFrom<u8> for $name {
            type Error = ();

            #[inline(always)]
            fn try_from(v: u8) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == $name::$vname as u8 => Ok($name::$vname),)*
                    _ => Err(()),
                }
            }
        }
    }
}

/// Longest string or keyword name that fits in a direct value
pub const DIRECT_STR_MAX: usize = 7;

/// Fixnums are signed and occupy the word above the five class bits
pub const FIXNUM_BITS: u32 = 59;
pub const FIXNUM_MAX: i64 = (1 << (FIXNUM_BITS - 1)) - 1;
pub const FIXNUM_MIN: i64 = -(1 << (FIXNUM_BITS - 1));

enum_and_tryfrom! {
    /// Low two bits of a value word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Tag {
        Direct = 0b00,
        Cons = 0b10,
        Indirect = 0b11,
    }
}

enum_and_tryfrom! {
    /// Three bit class of a direct value
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum DirectClass {
        Fixnum = 0,
        Char = 1,
        Vector = 2,
        Symbol = 3,
        Float = 4,
    }
}

enum_and_tryfrom! {
    /// Type of any value; the low five agree with `DirectClass` and the
    /// rest are stored in heap object headers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(u8)]
    pub enum SysClass {
        Fixnum = 0,
        Char = 1,
        Vector = 2,
        Symbol = 3,
        Float = 4,
        Cons = 5,
        Double = 6,
        Exception = 7,
        Function = 8,
        Namespace = 9,
        Stream = 10,
        Byte = 11,
        T = 12,
    }
}

impl SysClass {
    pub const COUNT: usize = 13;

    pub const ALL: [SysClass; SysClass::COUNT] = [
        SysClass::Fixnum,
        SysClass::Char,
        SysClass::Vector,
        SysClass::Symbol,
        SysClass::Float,
        SysClass::Cons,
        SysClass::Double,
        SysClass::Exception,
        SysClass::Function,
        SysClass::Namespace,
        SysClass::Stream,
        SysClass::Byte,
        SysClass::T,
    ];

    /// The keyword naming this class, as returned by `type-of`
    pub fn keyword(self) -> Value {
        Value::kw(match self {
            SysClass::Byte => "byte",
            SysClass::Char => "char",
            SysClass::Cons => "cons",
            SysClass::Double => "double",
            SysClass::Exception => "except",
            SysClass::Fixnum => "fixnum",
            SysClass::Float => "float",
            SysClass::Function => "func",
            SysClass::Namespace => "ns",
            SysClass::Stream => "stream",
            SysClass::Symbol => "symbol",
            SysClass::T => "t",
            SysClass::Vector => "vector",
        })
    }

    pub fn from_keyword(kw: Value) -> Option<SysClass> {
        SysClass::ALL.iter().copied().find(|c| c.keyword() == kw)
    }
}

/// Up to seven bytes stored inline, for short strings and keywords
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortStr {
    len: u8,
    bytes: [u8; DIRECT_STR_MAX],
}

impl ShortStr {
    pub const EMPTY: ShortStr = ShortStr {
        len: 0,
        bytes: [0; DIRECT_STR_MAX],
    };

    pub const fn from_bytes(src: &[u8]) -> Option<Self> {
        if src.len() > DIRECT_STR_MAX {
            return None;
        }

        let mut bytes = [0; DIRECT_STR_MAX];
        let mut i = 0;
        while i < src.len() {
            bytes[i] = src[i];
            i += 1;
        }

        Some(Self {
            len: src.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Takes `len` bytes starting at `offset`; pure bit manipulation
    pub fn slice(&self, offset: usize, len: usize) -> Option<Self> {
        if offset + len > self.len() {
            return None;
        }

        let bits = self.data() >> (offset * 8);
        let mask = if len == 0 { 0 } else { u64::MAX >> (64 - len * 8) };

        Some(Self::from_data(bits & mask, len))
    }

    fn data(&self) -> u64 {
        self.as_bytes()
            .iter()
            .enumerate()
            .fold(0, |acc, (i, b)| acc | (*b as u64) << (i * 8))
    }

    fn from_data(data: u64, len: usize) -> Self {
        let mut bytes = [0; DIRECT_STR_MAX];
        for (i, b) in bytes.iter_mut().enumerate().take(len) {
            *b = (data >> (i * 8)) as u8;
        }

        Self {
            len: len as u8,
            bytes,
        }
    }
}

impl fmt::Debug for ShortStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Index of an object header in the heap arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(pub(crate) u32);

impl HeapRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A pair packed into a single word: car and cdr each keep 31 bits of
/// their own word form, which covers small fixnums, short keywords,
/// nil, and low heap indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackedCons(u64);

impl PackedCons {
    pub fn pack(car: Value, cdr: Value) -> Option<Self> {
        let car = pack31(car.word())?;
        let cdr = pack31(cdr.word())?;

        Some(Self(
            (car as u64) << 33 | (cdr as u64) << 2 | Tag::Cons as u64,
        ))
    }

    pub fn car(self) -> Value {
        unpack_value(((self.0 >> 33) & 0x7fff_ffff) as u32)
    }

    pub fn cdr(self) -> Value {
        unpack_value(((self.0 >> 2) & 0x7fff_ffff) as u32)
    }
}

// a word packs if its tag bits agree (direct or indirect) and it
// sign extends from bit 31
fn pack31(word: u64) -> Option<u32> {
    if word & 1 != (word >> 1) & 1 {
        return None;
    }

    let signed = word as i64;
    if signed != (signed as i32) as i64 {
        return None;
    }

    Some(((word >> 1) & 0x7fff_ffff) as u32)
}

fn unpack31(packed: u32) -> u64 {
    let word = ((((packed as u64) << 33) as i64) >> 32) as u64;
    word | ((word >> 1) & 1)
}

fn unpack_value(packed: u32) -> Value {
    let word = unpack31(packed);
    Value::from_word(word).unwrap_or_else(|| panic!("malformed cons immediate {:#x}", word))
}

/// A runtime value
#[derive(Clone, Copy)]
pub enum Value {
    Fixnum(i64),
    Char(u8),
    ShortStr(ShortStr),
    Keyword(ShortStr),
    Float(f32),
    Cons(PackedCons),
    Heap(HeapRef),
}

const fn short(name: &[u8]) -> ShortStr {
    match ShortStr::from_bytes(name) {
        Some(s) => s,
        None => panic!("direct name too long"),
    }
}

impl Value {
    /// The false value and empty list
    pub const NIL: Value = Value::Keyword(short(b"nil"));
    pub const T: Value = Value::Keyword(short(b"t"));
    /// Value slot contents of a symbol that has never been set
    pub const UNBOUND: Value = Value::Keyword(ShortStr::EMPTY);

    /// Keyword for a name known to be short; longer names are cut
    pub fn kw(name: &str) -> Value {
        let bytes = name.as_bytes();
        let bytes = &bytes[..bytes.len().min(DIRECT_STR_MAX)];
        Value::Keyword(short_lossy(bytes))
    }

    pub fn keyword(name: &[u8]) -> Option<Value> {
        ShortStr::from_bytes(name).map(Value::Keyword)
    }

    pub fn fixnum(n: i64) -> Option<Value> {
        if (FIXNUM_MIN..=FIXNUM_MAX).contains(&n) {
            Some(Value::Fixnum(n))
        } else {
            None
        }
    }

    pub fn bool(test: bool) -> Value {
        if test {
            Value::T
        } else {
            Value::NIL
        }
    }

    pub fn class(self) -> Tag {
        match self {
            Value::Fixnum(_)
            | Value::Char(_)
            | Value::ShortStr(_)
            | Value::Keyword(_)
            | Value::Float(_) => Tag::Direct,
            Value::Cons(_) => Tag::Cons,
            Value::Heap(_) => Tag::Indirect,
        }
    }

    pub fn is_nil(self) -> bool {
        self == Value::NIL
    }

    pub fn is_keyword(self) -> bool {
        matches!(self, Value::Keyword(_))
    }

    pub fn as_fixnum(self) -> Option<i64> {
        match self {
            Value::Fixnum(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_char(self) -> Option<u8> {
        match self {
            Value::Char(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_heap(self) -> Option<HeapRef> {
        match self {
            Value::Heap(r) => Some(r),
            _ => None,
        }
    }

    /// Encodes this value as a tagged word
    ///
    /// Direct layout: `[data...].llltttTT` (length, class, tag); a
    /// fixnum uses everything above its class bits, and a float sits
    /// in the upper half word
    pub fn word(self) -> u64 {
        match self {
            Value::Fixnum(n) => ((n << 5) as u64) | direct_bits(0, DirectClass::Fixnum),
            Value::Char(c) => (c as u64) << 8 | direct_bits(1, DirectClass::Char),
            Value::ShortStr(s) => s.data() << 8 | direct_bits(s.len(), DirectClass::Vector),
            Value::Keyword(s) => s.data() << 8 | direct_bits(s.len(), DirectClass::Symbol),
            Value::Float(f) => (f.to_bits() as u64) << 32 | direct_bits(0, DirectClass::Float),
            Value::Cons(p) => p.0,
            Value::Heap(r) => (r.0 as u64) << 2 | Tag::Indirect as u64,
        }
    }

    /// Decodes a tagged word; `None` for the unused tag or class
    pub fn from_word(word: u64) -> Option<Value> {
        match Tag::try_from((word & 0b11) as u8).ok()? {
            Tag::Direct => {
                let len = ((word >> 5) & 0b111) as usize;
                let data = word >> 8;

                Some(match DirectClass::try_from(((word >> 2) & 0b111) as u8).ok()? {
                    DirectClass::Fixnum => Value::Fixnum((word as i64) >> 5),
                    DirectClass::Char => Value::Char(data as u8),
                    DirectClass::Vector => Value::ShortStr(ShortStr::from_data(data, len)),
                    DirectClass::Symbol => Value::Keyword(ShortStr::from_data(data, len)),
                    DirectClass::Float => Value::Float(f32::from_bits((word >> 32) as u32)),
                })
            }
            Tag::Cons => Some(Value::Cons(PackedCons(word))),
            Tag::Indirect => u32::try_from(word >> 2).ok().map(|i| Value::Heap(HeapRef(i))),
        }
    }
}

fn short_lossy(bytes: &[u8]) -> ShortStr {
    ShortStr::from_bytes(bytes).unwrap_or(ShortStr::EMPTY)
}

fn direct_bits(len: usize, class: DirectClass) -> u64 {
    ((len as u64 & 0b111) << 5) | ((class as u64) << 2) | Tag::Direct as u64
}

// identity for heap objects, value equality for everything else
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.word() == other.word()
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.word().hash(state)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Fixnum(n) => write!(f, "Fixnum({})", n),
            Value::Char(c) => write!(f, "Char({:?})", *c as char),
            Value::ShortStr(s) => write!(f, "ShortStr({:?})", s),
            Value::Keyword(s) => write!(f, "Keyword(:{:?})", s),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Cons(p) => write!(f, "Cons({:?} . {:?})", p.car(), p.cdr()),
            Value::Heap(r) => write!(f, "Heap({})", r.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let w = v.word();
        assert_eq!(Value::from_word(w), Some(v));
        assert_eq!(w & 0b11, v.class() as u64);
    }

    #[test]
    fn direct_round_trip() {
        for n in [0, 1, -1, 42, -4096, FIXNUM_MAX, FIXNUM_MIN] {
            round_trip(Value::Fixnum(n));
            assert_eq!(Value::Fixnum(n).class(), Tag::Direct);
        }

        for c in [0u8, b'a', b'\n', 255] {
            round_trip(Value::Char(c));
        }

        for s in ["", "a", "abc", "1234567"] {
            round_trip(Value::ShortStr(ShortStr::from_bytes(s.as_bytes()).unwrap()));
            round_trip(Value::keyword(s.as_bytes()).unwrap());
        }

        for x in [0.0f32, 1.5, -2.25, f32::MAX] {
            round_trip(Value::Float(x));
        }

        round_trip(Value::Heap(HeapRef(1234)));
    }

    #[test]
    fn direct_width_limits() {
        assert!(ShortStr::from_bytes(b"12345678").is_none());
        assert!(Value::keyword(b"toolong!").is_none());
        assert!(Value::fixnum(FIXNUM_MAX + 1).is_none());
        assert!(Value::fixnum(FIXNUM_MIN - 1).is_none());
        assert_eq!(Value::fixnum(-7), Some(Value::Fixnum(-7)));
    }

    #[test]
    fn constants_are_distinct() {
        assert_ne!(Value::NIL, Value::T);
        assert_ne!(Value::NIL, Value::UNBOUND);
        assert_eq!(Value::kw("nil"), Value::NIL);
        assert!(Value::NIL.is_nil());
        assert!(!Value::Fixnum(0).is_nil());
    }

    #[test]
    fn cons_pack_unpack() {
        let pairs = [
            (Value::Fixnum(1), Value::NIL),
            (Value::Fixnum(-3), Value::Fixnum(70000)),
            (Value::T, Value::Heap(HeapRef(17))),
            (Value::Char(b'z'), Value::kw("abc")),
        ];

        for (a, b) in pairs {
            let p = PackedCons::pack(a, b).unwrap();
            assert_eq!(p.car(), a);
            assert_eq!(p.cdr(), b);
            assert_eq!(Value::Cons(p).class(), Tag::Cons);
            assert_eq!(Value::from_word(Value::Cons(p).word()), Some(Value::Cons(p)));
        }
    }

    #[test]
    fn cons_pack_refuses_wide_values() {
        assert!(PackedCons::pack(Value::Fixnum(1 << 40), Value::NIL).is_none());
        assert!(PackedCons::pack(Value::Float(1.5), Value::NIL).is_none());

        // a cons immediate never nests inside another
        let inner = PackedCons::pack(Value::Fixnum(1), Value::NIL).unwrap();
        assert!(PackedCons::pack(Value::Fixnum(0), Value::Cons(inner)).is_none());
    }

    #[test]
    fn short_slices() {
        let s = ShortStr::from_bytes(b"abcdefg").unwrap();
        assert_eq!(s.slice(2, 3).unwrap().as_bytes(), b"cde");
        assert_eq!(s.slice(0, 7).unwrap(), s);
        assert!(s.slice(0, 0).unwrap().is_empty());
        assert!(s.slice(5, 3).is_none());
    }

    #[test]
    fn class_keywords() {
        for c in SysClass::ALL {
            assert_eq!(SysClass::from_keyword(c.keyword()), Some(c));
            assert_eq!(SysClass::try_from(c as u8), Ok(c));
        }
    }
}
