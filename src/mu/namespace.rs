// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/namespace.rs

// Namespaces. Each keeps an external and an internal list of its
// symbols plus an optional namespace to fall back on; lookups go
// through the hash cache rather than walking the lists.

// <>

use super::cons;
use super::symbol;
use super::value::{ShortStr, SysClass, Value};
use super::vector;
use super::{Env, MuResult};

/// Which of a namespace's two symbol sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Intern,
    Extern,
}

const NAME: usize = 0;
const IMPORT: usize = 1;
const EXTERNS: usize = 2;
const INTERNS: usize = 3;

/// Creates a namespace and registers it under `name`, replacing any
/// namespace registered there before
pub fn make(env: &mut Env, name: &[u8], import: Value) -> MuResult<Value> {
    let ns = make_unnamed(env, import)?;
    let name_str = vector::string(env, name)?;

    if let Value::Heap(r) = ns {
        env.heap.set_field(r, NAME, name_str);
        env.registry.insert(name.to_vec(), r);
    }

    Ok(ns)
}

/// The registered namespace named like `ns`, registering `ns` if its
/// name is free; an unnamed namespace is returned as is
pub fn canonical(env: &mut Env, ns: Value) -> Value {
    let key = vector::bytes(env, name(env, ns));
    if key.is_empty() {
        return ns;
    }

    match env.map_namespace(&key) {
        Some(found) => found,
        None => {
            if let Value::Heap(r) = ns {
                log::debug!("namespace: registering {}", String::from_utf8_lossy(&key));
                env.registry.insert(key, r);
            }
            ns
        }
    }
}

/// Creates a namespace that is not in the registry
pub fn make_unnamed(env: &mut Env, import: Value) -> MuResult<Value> {
    let ns = env.heap.alloc(4, SysClass::Namespace)?;
    env.heap.set_field(ns, NAME, Value::ShortStr(ShortStr::EMPTY));
    env.heap.set_field(ns, IMPORT, import);
    env.heap.set_field(ns, EXTERNS, Value::NIL);
    env.heap.set_field(ns, INTERNS, Value::NIL);
    env.ns_cache.add_namespace(ns);

    Ok(Value::Heap(ns))
}

pub fn is_namespace(env: &Env, v: Value) -> bool {
    matches!(v, Value::Heap(r) if env.heap.class_of(r) == SysClass::Namespace)
}

fn field(env: &Env, ns: Value, slot: usize) -> Value {
    match ns {
        Value::Heap(r) => env.heap.field(r, slot),
        _ => Value::NIL,
    }
}

pub fn name(env: &Env, ns: Value) -> Value {
    field(env, ns, NAME)
}

pub fn import(env: &Env, ns: Value) -> Value {
    field(env, ns, IMPORT)
}

pub fn externs(env: &Env, ns: Value) -> Value {
    field(env, ns, EXTERNS)
}

pub fn interns(env: &Env, ns: Value) -> Value {
    field(env, ns, INTERNS)
}

fn list_slot(scope: Scope) -> usize {
    match scope {
        Scope::Extern => EXTERNS,
        Scope::Intern => INTERNS,
    }
}

/// Finds a symbol by name in one scope of a namespace
///
/// Panics if the cache holds a different symbol under the same hash.
pub fn map(env: &Env, ns: Value, scope: Scope, name: &[u8]) -> Option<Value> {
    let r = ns.as_heap()?;
    let sym = Value::Heap(env.ns_cache.lookup(r, scope, name)?);

    let found = vector::bytes(env, symbol::name(env, sym));
    if found != name {
        panic!(
            "symbol hash collision: {:?} and {:?}",
            String::from_utf8_lossy(name),
            String::from_utf8_lossy(&found)
        );
    }

    Some(sym)
}

/// Finds a symbol externed by a namespace or any namespace it imports
pub fn map_imported(env: &Env, ns: Value, name: &[u8]) -> Option<Value> {
    let mut cur = ns;

    while is_namespace(env, cur) {
        if let Some(sym) = map(env, cur, Scope::Extern, name) {
            return Some(sym);
        }
        cur = import(env, cur);
    }

    None
}

/// Returns the symbol for `name` in a scope of `ns`, creating it if
/// needed
///
/// A new symbol takes `value`; an existing one takes it only if it is
/// still unbound.
pub fn intern(env: &mut Env, ns: Value, scope: Scope, name: Value, value: Value) -> MuResult<Value> {
    let key = vector::bytes(env, name);

    if let Some(sym) = map(env, ns, scope, &key) {
        if !symbol::is_bound(env, sym) {
            symbol::set_value(env, sym, value);
        }
        return Ok(sym);
    }

    let sym = symbol::make(env, ns, name, value)?;

    if let (Value::Heap(nsr), Value::Heap(symr)) = (ns, sym) {
        let slot = list_slot(scope);
        let list = env.heap.field(nsr, slot);
        let list = cons::cons(env, sym, list)?;
        env.heap.set_field(nsr, slot, list);

        if env.ns_cache.insert(nsr, scope, &key, symr).is_err() {
            panic!("symbol hash collision on {:?}", String::from_utf8_lossy(&key));
        }
    }

    Ok(sym)
}

#[cfg(test)]
mod tests {
    use super::super::Config;
    use super::*;

    fn env() -> Env {
        Env::new(&Config::default()).unwrap()
    }

    #[test]
    fn intern_is_idempotent() {
        let mut env = env();
        let ns = make(&mut env, b"test", Value::NIL).unwrap();
        let name = vector::string(&mut env, b"a-long-name").unwrap();

        let a = intern(&mut env, ns, Scope::Extern, name, Value::Fixnum(1)).unwrap();
        let b = intern(&mut env, ns, Scope::Extern, name, Value::Fixnum(2)).unwrap();

        assert_eq!(a, b);
        assert_eq!(symbol::value(&env, a), Value::Fixnum(1));
        assert_eq!(cons::length(&env, externs(&env, ns)), Some(1));
        assert_eq!(symbol::ns(&env, a), ns);
    }

    #[test]
    fn intern_binds_unbound() {
        let mut env = env();
        let ns = make(&mut env, b"test", Value::NIL).unwrap();
        let name = vector::string(&mut env, b"x").unwrap();

        let a = intern(&mut env, ns, Scope::Intern, name, Value::UNBOUND).unwrap();
        assert!(!symbol::is_bound(&env, a));

        let b = intern(&mut env, ns, Scope::Intern, name, Value::T).unwrap();
        assert_eq!(a, b);
        assert_eq!(symbol::value(&env, a), Value::T);
    }

    #[test]
    fn scopes_and_imports() {
        let mut env = env();
        let base = make(&mut env, b"base", Value::NIL).unwrap();
        let user = make(&mut env, b"user", base).unwrap();
        let shared = vector::string(&mut env, b"shared").unwrap();

        let sym = intern(&mut env, base, Scope::Extern, shared, Value::Fixnum(3)).unwrap();

        assert_eq!(map(&env, base, Scope::Extern, b"shared"), Some(sym));
        assert_eq!(map(&env, base, Scope::Intern, b"shared"), None);
        assert_eq!(map(&env, user, Scope::Extern, b"shared"), None);
        assert_eq!(map_imported(&env, user, b"shared"), Some(sym));
        assert_eq!(env.map_namespace(b"user"), Some(user));
        assert_eq!(vector::bytes(&env, name(&env, user)), b"user");
    }

    #[test]
    fn bootstrap_namespaces() {
        let env = env();
        let mu = env.map_namespace(b"mu").unwrap();
        let env_ns = env.map_namespace(b"env").unwrap();
        let system = env.map_namespace(b"system").unwrap();

        assert_eq!(import(&env, mu), env_ns);
        assert_eq!(import(&env, env_ns), system);
        assert_eq!(import(&env, system), Value::NIL);
        assert!(map(&env, mu, Scope::Extern, b"car").is_some());
        assert!(map_imported(&env, mu, b"lex-ref").is_some());
    }
}
