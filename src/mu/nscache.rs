// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/nscache.rs

// Per namespace tables to find interned symbols by the hash of their
// names, one table for each scope.

// <>

use super::namespace::Scope;
use super::value::HeapRef;

use std::collections::HashMap;

/// FNV-1a over a symbol name
pub fn hash_name(name: &[u8]) -> u64 {
    name.iter().fold(2166136261, |acc: u64, b| {
        (acc ^ *b as u64).wrapping_mul(16777619)
    })
}

/// Open addressed map from name hash to symbol
#[derive(Debug)]
pub struct SymbolMap {
    slots: Vec<Option<(u64, HeapRef)>>,
    // maintain low load ratio
    load: usize,
}

impl SymbolMap {
    pub fn new(approx_cap: usize) -> Self {
        Self {
            slots: vec![None; (approx_cap * 3).max(8)],
            load: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.load
    }

    pub fn is_empty(&self) -> bool {
        self.load == 0
    }

    pub fn lookup(&self, hash: u64) -> Option<HeapRef> {
        let len = self.slots.len();
        let tgt = (hash % len as u64) as usize;
        let mut csn = tgt;

        loop {
            match self.slots[csn] {
                None => return None,
                Some((h, sym)) if h == hash => return Some(sym),
                Some(_) => (),
            }

            csn = (csn + 1) % len;
            if csn == tgt {
                return None;
            }
        }
    }

    /// Adds a symbol; a symbol already present under the same hash is
    /// returned as the error
    pub fn insert(&mut self, hash: u64, sym: HeapRef) -> Result<(), HeapRef> {
        if let Some(prior) = self.lookup(hash) {
            return Err(prior);
        }

        if (self.load + 1) * 3 > self.slots.len() {
            self.resize(2);
        }

        let slot = Self::probe(&self.slots, hash);
        self.slots[slot] = Some((hash, sym));
        self.load += 1;

        Ok(())
    }

    fn resize(&mut self, factor: usize) {
        let mut slots = vec![None; self.slots.len() * factor];

        for (hash, sym) in self.slots.iter().flatten() {
            let slot = Self::probe(&slots, *hash);
            slots[slot] = Some((*hash, *sym));
        }

        self.slots = slots;
    }

    // first empty slot at or after the hash target, wrapping
    fn probe(slots: &[Option<(u64, HeapRef)>], hash: u64) -> usize {
        let len = slots.len();
        let mut tgt = (hash % len as u64) as usize;

        while slots[tgt].is_some() {
            tgt += 1;

            if tgt >= len {
                tgt = 0;
            }
        }

        tgt
    }
}

#[derive(Debug)]
struct NsMaps {
    externs: SymbolMap,
    interns: SymbolMap,
}

/// The symbol maps of every namespace
#[derive(Debug, Default)]
pub struct NsCache {
    maps: HashMap<HeapRef, NsMaps>,
}

impl NsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates empty maps for a namespace, keeping any it already has
    pub fn add_namespace(&mut self, ns: HeapRef) {
        self.maps.entry(ns).or_insert_with(|| NsMaps {
            externs: SymbolMap::new(64),
            interns: SymbolMap::new(16),
        });
    }

    fn map(&self, ns: HeapRef, scope: Scope) -> Option<&SymbolMap> {
        self.maps.get(&ns).map(|m| match scope {
            Scope::Extern => &m.externs,
            Scope::Intern => &m.interns,
        })
    }

    pub fn lookup(&self, ns: HeapRef, scope: Scope, name: &[u8]) -> Option<HeapRef> {
        self.map(ns, scope)?.lookup(hash_name(name))
    }

    pub fn insert(
        &mut self,
        ns: HeapRef,
        scope: Scope,
        name: &[u8],
        sym: HeapRef,
    ) -> Result<(), HeapRef> {
        self.add_namespace(ns);

        let maps = self.maps.get_mut(&ns).map(|m| match scope {
            Scope::Extern => &mut m.externs,
            Scope::Intern => &mut m.interns,
        });

        match maps {
            Some(map) => map.insert(hash_name(name), sym),
            None => Ok(()),
        }
    }

    pub fn count(&self, ns: HeapRef, scope: Scope) -> usize {
        self.map(ns, scope).map_or(0, SymbolMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_test() {
        let mut map = SymbolMap::new(100);

        map.insert(hash_name(b"testsym"), HeapRef(42)).unwrap();

        assert!(map.lookup(hash_name(b"nothere")).is_none());
        assert_eq!(map.lookup(hash_name(b"testsym")), Some(HeapRef(42)));
        assert_eq!(map.insert(hash_name(b"testsym"), HeapRef(7)), Err(HeapRef(42)));
    }

    #[test]
    fn manysym() {
        let mut map = SymbolMap::new(10);

        // generates symbols a00 - z99
        let mut acc = vec![];
        for i in 0..2600u32 {
            acc.push((i / 100 + 97) as u8);
            acc.push(((i % 100) / 10 + 48) as u8);
            acc.push(((i % 10) + 48) as u8);

            map.insert(hash_name(&acc), HeapRef(i)).unwrap();

            acc.clear();
        }

        assert_eq!(map.len(), 2600);
        assert_eq!(map.lookup(hash_name(b"m13")), Some(HeapRef(1213)));
        assert_eq!(map.lookup(hash_name(b"g92")), Some(HeapRef(692)));
    }

    #[test]
    fn resize() {
        let mut map = SymbolMap::new(1);
        assert_eq!(map.slots.len(), 8);

        for (i, name) in [b"sea".as_slice(), b"mesa", b"droll", b"fen"].iter().enumerate() {
            map.insert(hash_name(name), HeapRef(i as u32)).unwrap();
        }

        assert_eq!(map.slots.len(), 16);
        assert_eq!(map.lookup(hash_name(b"sea")), Some(HeapRef(0)));
        assert_eq!(map.lookup(hash_name(b"droll")), Some(HeapRef(2)));
        assert_eq!(map.lookup(hash_name(b"fen")), Some(HeapRef(3)));
    }

    #[test]
    fn scopes_are_separate() {
        let mut cache = NsCache::new();
        let ns = HeapRef(3);

        cache.insert(ns, Scope::Extern, b"car", HeapRef(10)).unwrap();
        assert_eq!(cache.lookup(ns, Scope::Extern, b"car"), Some(HeapRef(10)));
        assert_eq!(cache.lookup(ns, Scope::Intern, b"car"), None);
        assert_eq!(cache.lookup(HeapRef(4), Scope::Extern, b"car"), None);
        assert_eq!(cache.count(ns, Scope::Extern), 1);
    }
}
