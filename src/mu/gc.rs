// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/gc.rs

// Mark and sweep collection. Marks everything reachable from the
// namespace registry, the standard streams, the compiler, and one
// context, then hands the rest back to the heap's free lists.

// <>

use super::context::Context;
use super::stream;
use super::value::{SysClass, Value};
use super::vector::{self, VecType};
use super::Env;

use std::collections::BTreeSet;

/// Collects garbage and returns how many objects were released
pub fn gc(env: &mut Env, ctx: &Context) -> usize {
    env.heap.clear_marks();

    let mut work: Vec<Value> = env.registry.values().map(|r| Value::Heap(*r)).collect();
    work.extend([env.default_ns, env.mu_ns, env.std_in, env.std_out, env.err_out]);
    work.extend(env.compiler.lexicals.iter().copied());
    work.extend(ctx.roots());

    let mut streams = BTreeSet::new();
    while let Some(v) = work.pop() {
        trace(env, v, &mut work, &mut streams);
    }

    let freed = env.heap.sweep();
    let closed = env.streams.release(&streams);
    log::info!(
        "gc: released {} objects and {} streams, {} of {} bytes in use",
        freed,
        closed,
        env.heap.used(),
        env.heap.size()
    );

    freed
}

// marks one value and queues whatever it refers to
fn trace(env: &mut Env, v: Value, work: &mut Vec<Value>, streams: &mut BTreeSet<usize>) {
    let r = match v {
        Value::Cons(pair) => {
            work.push(pair.car());
            work.push(pair.cdr());
            return;
        }
        Value::Heap(r) => r,
        _ => return,
    };

    if !env.heap.mark(r) {
        return;
    }

    match env.heap.class_of(r) {
        SysClass::Cons => work.extend((0..2).map(|n| env.heap.field(r, n))),
        SysClass::Symbol => work.extend((0..3).map(|n| env.heap.field(r, n))),
        SysClass::Namespace | SysClass::Function => work.extend((0..4).map(|n| env.heap.field(r, n))),
        SysClass::Exception => work.extend((0..5).map(|n| env.heap.field(r, n))),
        SysClass::Stream => streams.extend(stream::id(env, v)),
        SysClass::Vector => {
            work.push(vector::base(env, v));
            if vector::vtype(env, v) == VecType::T {
                work.extend(vector::values(env, v));
            }
        }
        _ => (),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{cons, interpret, namespace, symbol, Config};
    use super::super::namespace::Scope;
    use super::*;

    fn fresh() -> (Env, Context) {
        (Env::new(&Config::default()).unwrap(), Context::new())
    }

    #[test]
    fn keeps_the_environment() {
        let (mut env, mut ctx) = fresh();

        gc(&mut env, &ctx);
        assert_eq!("3", interpret(&mut env, &mut ctx, "(fixnum+ 1 2)").unwrap());
        assert_eq!("\"mu\"", interpret(&mut env, &mut ctx, "(ns-name (find-ns \"mu\"))").unwrap());

        // a second pass finds nothing new
        let before = env.heap.type_free(SysClass::Symbol);
        gc(&mut env, &ctx);
        assert_eq!(env.heap.type_free(SysClass::Symbol), before);
    }

    #[test]
    fn releases_garbage() {
        let (mut env, mut ctx) = fresh();

        let garbage = env.heap.alloc(2, SysClass::Cons).unwrap();
        let big = Value::Fixnum(1 << 40);
        let kept = cons::list(&mut env, &[big, big]).unwrap();
        ctx.pin(kept);

        let freed = gc(&mut env, &ctx);

        assert!(freed >= 1);
        assert!(!env.heap.is_marked(garbage));
        assert_eq!(cons::to_vec(&env, kept), vec![big, big]);
        assert!(env.heap.type_free(SysClass::Cons) >= 1);

        // released cells are reused before the barrier moves
        let used = env.heap.used();
        env.heap.alloc(2, SysClass::Cons).unwrap();
        assert_eq!(env.heap.used(), used);
    }

    #[test]
    fn follows_symbol_values() {
        let (mut env, ctx) = fresh();

        let ns = namespace::make(&mut env, b"g", Value::NIL).unwrap();
        let name = vector::string(&mut env, b"held").unwrap();
        let vec = vector::from_values(&mut env, VecType::T, &[Value::Fixnum(3)]).unwrap();
        let held = cons::cons(&mut env, vec, Value::NIL).unwrap();
        let sym = namespace::intern(&mut env, ns, Scope::Extern, name, held).unwrap();

        gc(&mut env, &ctx);

        let held = symbol::value(&env, sym);
        let vec = cons::car(&env, held);
        assert_eq!(vector::values(&env, vec), vec![Value::Fixnum(3)]);
    }

    #[test]
    fn unreachable_streams_are_closed() {
        let (mut env, mut ctx) = fresh();
        let standard = env.streams.open_count();

        interpret(&mut env, &mut ctx, "(open :string :input \"abc\")").unwrap();
        assert_eq!(env.streams.open_count(), standard + 1);

        let kept = stream::make(&mut env, Box::new(stream::InputStream::string(b"xyz"))).unwrap();
        ctx.pin(kept);

        gc(&mut env, &ctx);
        assert_eq!(env.streams.open_count(), standard + 1);
        assert!(stream::is_open(&env, kept));
        assert_eq!(stream::read_byte(&mut env, kept), Some(b'x'));

        // the freed slot goes to the next stream, not to the kept one
        let next = stream::make(&mut env, Box::new(stream::InputStream::string(b"q"))).unwrap();
        assert_ne!(stream::id(&env, next), stream::id(&env, kept));
        assert_eq!(stream::read_byte(&mut env, kept), Some(b'y'));
    }

    #[test]
    fn collects_inside_a_call() {
        let (mut env, mut ctx) = fresh();

        assert_eq!(
            "((1099511627776 . 1099511627776) 1099511627777 . 2)",
            interpret(
                &mut env,
                &mut ctx,
                "(cons (cons 1099511627776 1099511627776) ((lambda () (env:gc) (cons 1099511627777 2))))"
            )
            .unwrap()
        );

        assert_eq!(
            "#(:t 1099511627776 2)",
            interpret(
                &mut env,
                &mut ctx,
                "((lambda (x) (env:gc) (cons 1 2) x) (list-sv :t '(1099511627776 2)))"
            )
            .unwrap()
        );
    }

    #[test]
    fn collects_inside_a_handler() {
        let (mut env, mut ctx) = fresh();

        assert_eq!(
            "#(:t 1099511627776)",
            interpret(
                &mut env,
                &mut ctx,
                "(with-ex (lambda (ex) (env:gc) (sv-ref (mu::view ex) 3)) (lambda () (car (list-sv :t '(1099511627776)))))"
            )
            .unwrap()
        );
        assert_eq!(":t", interpret(&mut env, &mut ctx, "(eq (type-of (env:gc)) :fixnum)").unwrap());
    }

    #[test]
    fn unreferenced_strings_are_forgotten() {
        let (mut env, ctx) = fresh();

        let s = vector::string(&mut env, b"a transient string").unwrap();
        let r = s.as_heap().unwrap();
        assert_eq!(env.heap.map_string(b"a transient string"), Some(r));

        gc(&mut env, &ctx);
        assert_eq!(env.heap.map_string(b"a transient string"), None);
    }
}
