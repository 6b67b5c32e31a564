// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/eval.rs

// The evaluator. Walks compiled forms and applies functions, keeping
// each application's frame on the context's dynamic stack and, for
// compiled functions with parameters, in its lexical frame map.

// <>

use super::compile;
use super::cons;
use super::context::{Context, Frame};
use super::exception::{self, ErrType};
use super::function;
use super::symbol;
use super::value::Value;
use super::{Env, MuErr, MuResult};

/// Evaluates a compiled form
pub fn eval(env: &mut Env, ctx: &mut Context, form: Value) -> MuResult<Value> {
    if symbol::is_heap_symbol(env, form) {
        if !symbol::is_bound(env, form) {
            return env.raise("eval", ErrType::Unbound, form);
        }
        return Ok(symbol::value(env, form));
    }

    if !cons::is_cons(env, form) {
        return Ok(form);
    }

    let head = cons::car(env, form);

    if head == Value::kw("quote") {
        return Ok(cons::nth(env, 1, form));
    }

    if head == Value::kw("if") {
        let test = eval(env, ctx, cons::nth(env, 1, form))?;
        let branch = cons::nth(env, if test.is_nil() { 3 } else { 2 }, form);
        return funcall(env, ctx, branch, &[]);
    }

    let func = if symbol::is_heap_symbol(env, head) {
        if !symbol::is_bound(env, head) {
            return env.raise("eval", ErrType::Unbound, head);
        }
        symbol::value(env, head)
    } else if cons::is_cons(env, head) {
        eval(env, ctx, head)?
    } else {
        head
    };

    if !function::is_function(env, func) {
        return env.raise("eval", ErrType::Type, func);
    }

    // evaluated arguments stay pinned until they are in a frame
    let pins = ctx.pins_len();
    for arg in cons::to_vec(env, cons::cdr(env, form)) {
        let value = eval(env, ctx, arg)?;
        ctx.pin(value);
    }
    let argv = ctx.unpin_to(pins);

    funcall(env, ctx, func, &argv)
}

/// Applies a function to evaluated arguments
pub fn funcall(env: &mut Env, ctx: &mut Context, func: Value, argv: &[Value]) -> MuResult<Value> {
    if !function::is_function(env, func) {
        return env.raise("funcall", ErrType::Type, func);
    }

    let nreqs = function::arity(env, func);
    if nreqs != argv.len() {
        let from = cons::list(env, argv)?;
        let source = cons::list(
            env,
            &[Value::kw("nreq"), Value::Fixnum(nreqs as i64), Value::kw("from"), from],
        )?;
        return env.raise("funcall", ErrType::Arity, source);
    }

    let frame = Frame::new(env, func, argv.to_vec());

    if let Some(index) = function::native_index(env, func) {
        let native = match env.natives.get(index) {
            Some(native) => *native,
            None => return env.raise("funcall", ErrType::Type, func),
        };

        ctx.dynamic_push(frame.clone());
        let value = native(env, ctx, argv);
        ctx.dynamic_pop();

        let value = value.map_err(|err| note_frame(env, err, func))?;
        frame.borrow_mut().value = value;
        return Ok(value);
    }

    let form = function::form(env, func);
    if !cons::is_cons(env, form) {
        return env.raise("funcall", ErrType::Type, func);
    }

    ctx.dynamic_push(frame.clone());
    if nreqs > 0 {
        ctx.lexical_push(frame.clone());
    }

    let mut value = Ok(Value::NIL);
    for body in cons::to_vec(env, cons::cdr(env, form)) {
        value = eval(env, ctx, body);
        if value.is_err() {
            break;
        }
    }

    if nreqs > 0 {
        ctx.lexical_remove(&frame);
    }
    ctx.dynamic_pop();

    let value = value.map_err(|err| note_frame(env, err, func))?;
    frame.borrow_mut().value = value;
    Ok(value)
}

// records the innermost function an exception escaped from
fn note_frame(env: &mut Env, err: MuErr, func: Value) -> MuErr {
    if let MuErr::Raise(ex) = err {
        if exception::is_exception(env, ex) && exception::frame(env, ex).is_nil() {
            exception::set_frame(env, ex, func);
        }
    }

    err
}

/// Compiles and evaluates a top level form, leaving the context as it
/// found it
pub fn eval_top(env: &mut Env, ctx: &mut Context, form: Value) -> MuResult<Value> {
    let mark = ctx.mark();

    ctx.pin(form);
    let result = compile::compile(env, form).and_then(|compiled| {
        ctx.pin(compiled);
        eval(env, ctx, compiled)
    });

    ctx.unwind(mark);
    result
}

#[cfg(test)]
mod tests {
    use super::super::{interpret, namespace, vector, Config};
    use super::super::namespace::Scope;
    use super::*;

    fn run(env: &mut Env, ctx: &mut Context, code: &str) -> String {
        match interpret(env, ctx, code) {
            Ok(out) => out,
            Err(err) => env.describe(err),
        }
    }

    fn fresh() -> (Env, Context) {
        (Env::new(&Config::default()).unwrap(), Context::new())
    }

    #[test]
    fn quote_returns_unevaluated() {
        let (mut env, mut ctx) = fresh();

        assert_eq!("(1 2 3)", run(&mut env, &mut ctx, "(quote (1 2 3))"));
        assert_eq!("(1 2 3)", run(&mut env, &mut ctx, "'(1 2 3)"));
        assert_eq!("(mu:fixnum+ 1 2)", run(&mut env, &mut ctx, "'(fixnum+ 1 2)"));
    }

    #[test]
    fn conditionals() {
        let (mut env, mut ctx) = fresh();

        assert_eq!("2", run(&mut env, &mut ctx, "(if nil 1 2)"));
        assert_eq!("1", run(&mut env, &mut ctx, "(if 1 1 2)"));
        assert_eq!(":yes", run(&mut env, &mut ctx, "(if (eq 1 1) :yes :no)"));
        assert_eq!(":no", run(&mut env, &mut ctx, "(if (eq 1 2) :yes :no)"));
    }

    #[test]
    fn lambdas() {
        let (mut env, mut ctx) = fresh();

        assert_eq!("5", run(&mut env, &mut ctx, "((lambda (x) x) 5)"));
        assert_eq!("7", run(&mut env, &mut ctx, "((lambda (x y) (if x y x)) nil 7)"));
        assert_eq!(":nil", run(&mut env, &mut ctx, "((lambda (x y) (if x y x)) nil 7) ((lambda () nil))"));
        assert_eq!(
            "3",
            run(&mut env, &mut ctx, "((lambda (a) ((lambda (b) (fixnum+ a b)) 2)) 1)")
        );
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn interning_is_idempotent() {
        let (mut env, _) = fresh();

        let ns = namespace::make(&mut env, b"n", Value::NIL).unwrap();
        let name = vector::string(&mut env, b"foo").unwrap();
        let first = namespace::intern(&mut env, ns, Scope::Extern, name, Value::Fixnum(1)).unwrap();
        let second = namespace::intern(&mut env, ns, Scope::Extern, name, Value::Fixnum(2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(symbol::value(&env, first), Value::Fixnum(1));
    }

    #[test]
    fn arity_mismatch() {
        let (mut env, mut ctx) = fresh();

        let out = run(&mut env, &mut ctx, "((lambda (x y) x) 1)");
        assert!(out.contains(":arity"), "{out}");
        assert!(out.contains("(:nreq 2 :from (1))"), "{out}");

        let out = run(&mut env, &mut ctx, "(car 1 2)");
        assert!(out.contains(":arity"), "{out}");
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn unbound_and_uncallable() {
        let (mut env, mut ctx) = fresh();

        let out = run(&mut env, &mut ctx, "nothing-here");
        assert!(out.contains(":unbound"), "{out}");
        let out = run(&mut env, &mut ctx, "(nothing 1)");
        assert!(out.contains(":unbound"), "{out}");
        let out = run(&mut env, &mut ctx, "((lambda (f) (f 1)) 2)");
        assert!(out.contains(":type"), "{out}");
    }

    #[test]
    fn functions_as_values() {
        let (mut env, mut ctx) = fresh();

        assert_eq!("3", run(&mut env, &mut ctx, "((lambda (f) (f 1 2)) fixnum+)"));
        assert_eq!("(2 . 1)", run(&mut env, &mut ctx, "(funcall (lambda (a b) (cons b a)) '(1 2))"));
    }

    #[test]
    fn exceptions_note_their_frame() {
        let (mut env, mut ctx) = fresh();

        let form = {
            let car = symbol::parse(&mut env, b"car").unwrap();
            cons::list(&mut env, &[car, Value::Fixnum(1)]).unwrap()
        };

        match eval_top(&mut env, &mut ctx, form) {
            Err(MuErr::Raise(ex)) => {
                let car = symbol::parse(&mut env, b"car").unwrap();
                assert_eq!(exception::frame(&env, ex), symbol::value(&env, car));
            }
            other => panic!("expected an exception, got {other:?}"),
        }

        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.pins_len(), 0);
    }
}
