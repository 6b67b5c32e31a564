// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/heap.rs

// Memory management for Mu. A single fixed arena of words holds every
// indirect object behind a packed header; allocation draws first from
// per-type free lists filled by the collector and then bumps a barrier
// toward the end of the arena.

// <>

use super::value::{HeapRef, SysClass, Value};
use super::{MuErr, MuResult};

use std::collections::HashMap;

/// Bytes per heap word
pub const WORD_BYTES: usize = 8;

/// Largest object, header included, that a header can describe
pub const MAX_OBJECT_WORDS: usize = u16::MAX as usize;

/// Object header, packed as `reloc:32 | size:16 | mark:8 | type:8`
///
/// Size counts words and includes the header itself. The reloc field
/// is reserved for a compacting collector and always zero for now.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeapInfo(u64);

impl HeapInfo {
    pub fn new(words: usize, class: SysClass) -> Self {
        assert!(words <= MAX_OBJECT_WORDS, "object of {words} words");
        Self((words as u64) << 16 | class as u64)
    }

    pub fn size(self) -> usize {
        ((self.0 >> 16) & 0xffff) as usize
    }

    pub fn mark(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn with_mark(self, mark: u8) -> Self {
        Self(self.0 & !0xff00 | (mark as u64) << 8)
    }

    pub fn reloc(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn with_reloc(self, reloc: u32) -> Self {
        Self(self.0 & 0xffff_ffff | (reloc as u64) << 32)
    }

    pub fn class(self) -> SysClass {
        SysClass::try_from(self.0 as u8)
            .unwrap_or_else(|_| panic!("malformed heap header {:#x}", self.0))
    }
}

impl std::fmt::Debug for HeapInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HeapInfo {{ class: {:?}, size: {}, mark: {}, reloc: {} }}",
            self.class(),
            self.size(),
            self.mark(),
            self.reloc()
        )
    }
}

/// Number of words needed to hold `nbytes`
pub fn words_for(nbytes: usize) -> usize {
    nbytes.div_ceil(WORD_BYTES)
}

/// The object arena
pub struct Heap {
    words: Vec<u64>,
    page_size: usize,
    barrier: usize,
    // head of the cons free list, threaded through the car slot
    free_cons: Option<u32>,
    free_lists: HashMap<SysClass, Vec<u32>>,
    alloc_counts: [usize; SysClass::COUNT],
    // strings too long to be direct, keyed by contents
    strings: HashMap<Vec<u8>, HeapRef>,
}

impl Heap {
    pub fn new(pages: usize, page_size: usize) -> Self {
        let nwords = pages * page_size / WORD_BYTES;

        if cfg!(feature = "memdbg") {
            log::debug!("heap: {pages} pages of {page_size} bytes, {nwords} words");
        }

        Self {
            words: vec![0; nwords],
            page_size,
            barrier: 0,
            free_cons: None,
            free_lists: HashMap::new(),
            alloc_counts: [0; SysClass::COUNT],
            strings: HashMap::new(),
        }
    }

    /// Allocates an object with `payload` words after its header
    pub fn alloc(&mut self, payload: usize, class: SysClass) -> MuResult<HeapRef> {
        let words = payload + 1;
        assert!(words <= MAX_OBJECT_WORDS, "object of {words} words");

        let index = match self.reuse(words, class) {
            Some(index) => index,
            None => {
                if self.barrier + words > self.words.len() {
                    return Err(MuErr::OutOfMemory { words });
                }

                let index = self.barrier;
                self.barrier += words;
                self.words[index] = HeapInfo::new(words, class).0;
                index
            }
        };

        // a reused block keeps its original size
        let size = HeapInfo(self.words[index]).size();
        self.words[index + 1..index + size].fill(0);
        self.alloc_counts[class as usize] += 1;

        if cfg!(feature = "memdbg") {
            log::debug!("heap: alloc {class:?} at {index}, {size} words");
        }

        Ok(HeapRef(index as u32))
    }

    fn reuse(&mut self, words: usize, class: SysClass) -> Option<usize> {
        if class == SysClass::Cons {
            let index = self.free_cons?;
            let next = self.words[index as usize + 1];
            self.free_cons = if next == 0 { None } else { Some((next - 1) as u32) };
            return Some(index as usize);
        }

        let list = self.free_lists.get_mut(&class)?;
        let pos = list
            .iter()
            .position(|i| HeapInfo(self.words[*i as usize]).size() >= words)?;

        Some(list.remove(pos) as usize)
    }

    fn release(&mut self, index: usize, class: SysClass) {
        if class == SysClass::Cons {
            self.words[index + 1] = self.free_cons.map_or(0, |n| n as u64 + 1);
            self.free_cons = Some(index as u32);
        } else {
            self.free_lists.entry(class).or_default().push(index as u32);
        }
    }

    pub fn info(&self, obj: HeapRef) -> HeapInfo {
        HeapInfo(self.words[obj.index()])
    }

    pub fn set_info(&mut self, obj: HeapRef, info: HeapInfo) {
        self.words[obj.index()] = info.0;
    }

    pub fn class_of(&self, obj: HeapRef) -> SysClass {
        self.info(obj).class()
    }

    /// Raw payload word `n` of an object
    pub fn word(&self, obj: HeapRef, n: usize) -> u64 {
        self.words[obj.index() + 1 + n]
    }

    pub fn set_word(&mut self, obj: HeapRef, n: usize, word: u64) {
        self.words[obj.index() + 1 + n] = word;
    }

    /// Payload word `n` of an object, decoded
    pub fn field(&self, obj: HeapRef, n: usize) -> Value {
        let word = self.word(obj, n);
        Value::from_word(word)
            .unwrap_or_else(|| panic!("malformed word {word:#x} in object {}", obj.0))
    }

    pub fn set_field(&mut self, obj: HeapRef, n: usize, value: Value) {
        self.set_word(obj, n, value.word())
    }

    /// Byte at `offset` into an object's payload
    pub fn byte(&self, obj: HeapRef, offset: usize) -> u8 {
        let word = self.word(obj, offset / WORD_BYTES);
        (word >> ((offset % WORD_BYTES) * 8)) as u8
    }

    pub fn set_byte(&mut self, obj: HeapRef, offset: usize, byte: u8) {
        let n = offset / WORD_BYTES;
        let shift = (offset % WORD_BYTES) * 8;
        let word = self.word(obj, n) & !(0xff << shift) | (byte as u64) << shift;
        self.set_word(obj, n, word)
    }

    /// Sets the mark on an object; false if it was already marked
    pub fn mark(&mut self, obj: HeapRef) -> bool {
        let info = self.info(obj);
        if info.mark() != 0 {
            return false;
        }

        self.set_info(obj, info.with_mark(1));
        true
    }

    pub fn is_marked(&self, obj: HeapRef) -> bool {
        self.info(obj).mark() != 0
    }

    /// Clears every mark and forgets the free lists, which the next
    /// sweep rebuilds
    pub fn clear_marks(&mut self) {
        self.free_cons = None;
        self.free_lists.clear();

        let mut index = 0;
        while index < self.barrier {
            let info = HeapInfo(self.words[index]);
            self.words[index] = info.with_mark(0).0;
            index += info.size();
        }
    }

    /// Releases every unmarked object to its free list and returns how
    /// many were released
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut index = 0;

        while index < self.barrier {
            let info = HeapInfo(self.words[index]);
            if info.mark() == 0 {
                self.release(index, info.class());
                freed += 1;
            }
            index += info.size();
        }

        let words = &self.words;
        self.strings
            .retain(|_, obj| HeapInfo(words[obj.index()]).mark() != 0);

        if cfg!(feature = "memdbg") {
            log::debug!("heap: sweep released {freed} objects");
        }

        freed
    }

    /// Every object header below the barrier, live or free
    pub fn objects(&self) -> impl Iterator<Item = (HeapRef, HeapInfo)> + '_ {
        let mut index = 0;
        std::iter::from_fn(move || {
            if index >= self.barrier {
                return None;
            }
            let info = HeapInfo(self.words[index]);
            let obj = HeapRef(index as u32);
            index += info.size();
            Some((obj, info))
        })
    }

    pub fn map_string(&self, bytes: &[u8]) -> Option<HeapRef> {
        self.strings.get(bytes).copied()
    }

    pub fn add_string(&mut self, bytes: &[u8], obj: HeapRef) {
        self.strings.insert(bytes.to_vec(), obj);
    }

    /// Arena size in bytes
    pub fn size(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes below the allocation barrier
    pub fn used(&self) -> usize {
        self.barrier * WORD_BYTES
    }

    pub fn type_alloc(&self, class: SysClass) -> usize {
        self.alloc_counts[class as usize]
    }

    /// Free list length for a type
    pub fn type_free(&self, class: SysClass) -> usize {
        if class == SysClass::Cons {
            let mut count = 0;
            let mut next = self.free_cons;
            while let Some(index) = next {
                count += 1;
                let link = self.words[index as usize + 1];
                next = if link == 0 { None } else { Some((link - 1) as u32) };
            }
            count
        } else {
            self.free_lists.get(&class).map_or(0, Vec::len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields() {
        let info = HeapInfo::new(5, SysClass::Symbol);
        assert_eq!(info.size(), 5);
        assert_eq!(info.class(), SysClass::Symbol);
        assert_eq!(info.mark(), 0);

        let info = info.with_mark(1).with_reloc(77);
        assert_eq!(info.mark(), 1);
        assert_eq!(info.reloc(), 77);
        assert_eq!(info.size(), 5);
        assert_eq!(info.class(), SysClass::Symbol);
    }

    #[test]
    fn bump_allocation() {
        let mut heap = Heap::new(1, 4096);

        let a = heap.alloc(2, SysClass::Cons).unwrap();
        let b = heap.alloc(3, SysClass::Symbol).unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 3);
        assert_eq!(heap.used(), 7 * WORD_BYTES);
        assert_eq!(heap.class_of(b), SysClass::Symbol);
        assert_eq!(heap.type_alloc(SysClass::Cons), 1);

        heap.set_field(b, 2, Value::Fixnum(9));
        assert_eq!(heap.field(b, 2), Value::Fixnum(9));
        assert_eq!(heap.field(b, 0), Value::Fixnum(0));
    }

    #[test]
    fn bytes_in_words() {
        let mut heap = Heap::new(1, 4096);
        let v = heap.alloc(2, SysClass::Vector).unwrap();

        for i in 0..16 {
            heap.set_byte(v, i, i as u8 + 1);
        }

        assert_eq!(heap.byte(v, 0), 1);
        assert_eq!(heap.byte(v, 9), 10);
        assert_eq!(heap.word(v, 0) & 0xff, 1);
    }

    #[test]
    fn free_list_reuse() {
        let mut heap = Heap::new(1, 4096);

        let keep = heap.alloc(2, SysClass::Cons).unwrap();
        let drop_a = heap.alloc(2, SysClass::Cons).unwrap();
        let drop_b = heap.alloc(4, SysClass::Function).unwrap();

        heap.clear_marks();
        heap.mark(keep);
        assert_eq!(heap.sweep(), 2);
        assert_eq!(heap.type_free(SysClass::Cons), 1);
        assert_eq!(heap.type_free(SysClass::Function), 1);

        let used = heap.used();
        assert_eq!(heap.alloc(2, SysClass::Cons).unwrap(), drop_a);
        assert_eq!(heap.alloc(4, SysClass::Function).unwrap(), drop_b);
        assert_eq!(heap.used(), used);

        // type homogeneous: no function block is free now
        let fresh = heap.alloc(4, SysClass::Function).unwrap();
        assert!(fresh.index() * WORD_BYTES >= used);
    }

    #[test]
    fn first_fit_keeps_block_size() {
        let mut heap = Heap::new(1, 4096);

        let big = heap.alloc(10, SysClass::Vector).unwrap();
        heap.clear_marks();
        heap.sweep();

        let small = heap.alloc(3, SysClass::Vector).unwrap();
        assert_eq!(small, big);
        assert_eq!(heap.info(small).size(), 11);
    }

    #[test]
    fn exhaustion() {
        let mut heap = Heap::new(1, 64);

        heap.alloc(6, SysClass::Vector).unwrap();
        match heap.alloc(2, SysClass::Cons) {
            Err(MuErr::OutOfMemory { words }) => assert_eq!(words, 3),
            _ => panic!("expected heap exhaustion"),
        }
    }

    #[test]
    fn string_table_is_weak() {
        let mut heap = Heap::new(1, 4096);
        let s = heap.alloc(3, SysClass::Vector).unwrap();

        heap.add_string(b"long string", s);
        assert_eq!(heap.map_string(b"long string"), Some(s));

        heap.clear_marks();
        heap.sweep();
        assert_eq!(heap.map_string(b"long string"), None);
    }
}
