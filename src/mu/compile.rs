// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/compile.rs

// The compiler. One pass over a form that expands the special forms
// and turns references to lambda parameters into explicit frame
// lookups; everything else passes through as it was read.

// <>

use super::cons;
use super::exception::ErrType;
use super::function;
use super::namespace::{self, Scope};
use super::symbol;
use super::value::Value;
use super::{Env, MuResult};

/// Compiler state kept across top level forms
#[derive(Debug, Default)]
pub struct Compiler {
    /// Functions whose parameters are in scope, innermost last
    pub lexicals: Vec<Value>,
    frame_ctr: u64,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_frame_id(&mut self) -> u64 {
        let id = self.frame_ctr;
        self.frame_ctr += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Special {
    Lambda,
    Quote,
    If,
}

impl Special {
    fn from_name(name: &[u8]) -> Option<Special> {
        match name {
            b"lambda" => Some(Special::Lambda),
            b"quote" => Some(Special::Quote),
            b"if" => Some(Special::If),
            _ => None,
        }
    }

    fn keyword(self) -> Value {
        Value::kw(match self {
            Special::Lambda => "lambda",
            Special::Quote => "quote",
            Special::If => "if",
        })
    }
}

/// Compiles one form
pub fn compile(env: &mut Env, form: Value) -> MuResult<Value> {
    if cons::is_cons(env, form) {
        return compile_call(env, form);
    }

    if symbol::is_heap_symbol(env, form) {
        if let Some((func, offset)) = map_lexical(env, form) {
            return lexical_ref(env, func, offset);
        }
    }

    Ok(form)
}

fn compile_call(env: &mut Env, form: Value) -> MuResult<Value> {
    let head = cons::car(env, form);

    if cons::is_cons(env, head) {
        let func = compile(env, head)?;
        if !function::is_function(env, func) {
            return env.raise("compile", ErrType::Type, head);
        }

        let args = compile_list(env, cons::cdr(env, form))?;
        return cons::cons(env, func, args);
    }

    if function::is_function(env, head) {
        return compile_list(env, form);
    }

    if !symbol::is_symbol(env, head) {
        return env.raise("compile", ErrType::Type, head);
    }

    if map_lexical(env, head).is_some() {
        return compile_list(env, form);
    }

    match special(env, head) {
        Some(Special::Lambda) => lambda(env, form),
        Some(Special::Quote) => quote(env, form),
        Some(Special::If) => conditional(env, form),
        None if head.is_keyword() => env.raise("compile", ErrType::Type, head),
        None => compile_list(env, form),
    }
}

// keywords, and bare symbols of the default namespace
fn special(env: &Env, head: Value) -> Option<Special> {
    match head {
        Value::Keyword(name) => Special::from_name(name.as_bytes()),
        _ if symbol::ns(env, head) == env.default_ns => {
            let name = super::vector::bytes(env, symbol::name(env, head));
            Special::from_name(&name)
        }
        _ => None,
    }
}

fn compile_list(env: &mut Env, list: Value) -> MuResult<Value> {
    cons::checked_length(env, "compile", list)?;

    let mut out = Vec::new();
    for form in cons::to_vec(env, list) {
        out.push(compile(env, form)?);
    }

    cons::list(env, &out)
}

/// Innermost function in scope with `sym` as a parameter, and the
/// parameter's position
fn map_lexical(env: &Env, sym: Value) -> Option<(Value, usize)> {
    if sym.is_keyword() {
        return None;
    }

    env.compiler.lexicals.iter().rev().find_map(|func| {
        let params = cons::car(env, function::form(env, *func));
        cons::to_vec(env, params)
            .iter()
            .position(|p| *p == sym)
            .map(|offset| (*func, offset))
    })
}

// (env:lex-ref frame-id offset)
fn lexical_ref(env: &mut Env, func: Value, offset: usize) -> MuResult<Value> {
    let env_ns = match env.map_namespace(b"env") {
        Some(ns) => ns,
        None => return env.raise("compile", ErrType::Ns, Value::NIL),
    };

    let lex_ref = match namespace::map(env, env_ns, Scope::Extern, b"lex-ref") {
        Some(sym) => sym,
        None => return env.raise("compile", ErrType::Unbound, Value::NIL),
    };

    let id = function::frame_id(env, func);
    cons::list(env, &[lex_ref, id, Value::Fixnum(offset as i64)])
}

/// Checks a lambda list: plain symbols, none repeated
fn parse_lambda(env: &mut Env, params: Value) -> MuResult<Vec<Value>> {
    let mut seen: Vec<Value> = Vec::new();

    for param in cons::to_vec(env, params) {
        if !symbol::is_heap_symbol(env, param) {
            return env.raise("lambda", ErrType::Type, param);
        }
        if seen.contains(&param) {
            return env.raise("lambda", ErrType::Dup, param);
        }
        seen.push(param);
    }

    Ok(seen)
}

fn frame_id(env: &mut Env) -> MuResult<Value> {
    let n = env.compiler.next_frame_id();
    match Value::keyword(n.to_string().as_bytes()) {
        Some(id) => Ok(id),
        None => env.raise("lambda", ErrType::Size, Value::Fixnum(n as i64)),
    }
}

/// `(lambda (params...) body...)` becomes a function whose form is
/// its lambda list consed onto its compiled body
fn lambda(env: &mut Env, form: Value) -> MuResult<Value> {
    if cons::checked_length(env, "lambda", form)? < 2 {
        return env.raise("lambda", ErrType::Arity, form);
    }

    let params = cons::nth(env, 1, form);
    let body = cons::nthcdr(env, 2, form);

    if !cons::is_list(env, params) || cons::length(env, params).is_none() {
        return env.raise("lambda", ErrType::Type, params);
    }
    if cons::car(env, params) == Value::kw("quote") {
        return env.raise("lambda", ErrType::Quote, params);
    }

    let arity = parse_lambda(env, params)?.len();
    let id = frame_id(env)?;
    let shell = cons::cons(env, params, Value::NIL)?;
    let func = function::make(env, arity, shell, id)?;

    if arity > 0 {
        env.compiler.lexicals.push(func);
    }
    let body = compile_list(env, body);
    if arity > 0 {
        env.compiler.lexicals.pop();
    }

    let form = cons::cons(env, params, body?)?;
    function::set_form(env, func, form);

    Ok(func)
}

fn quote(env: &mut Env, form: Value) -> MuResult<Value> {
    if cons::checked_length(env, "quote", form)? != 2 {
        return env.raise("quote", ErrType::Arity, form);
    }

    let rest = cons::cdr(env, form);
    cons::cons(env, Special::Quote.keyword(), rest)
}

/// `(if test then else)` becomes `(:if test then-thunk else-thunk)`
fn conditional(env: &mut Env, form: Value) -> MuResult<Value> {
    if cons::checked_length(env, "if", form)? != 4 {
        return env.raise("if", ErrType::Arity, form);
    }

    let test = compile(env, cons::nth(env, 1, form))?;

    let mut thunks = [Value::NIL; 2];
    for (i, branch) in [2, 3].into_iter().enumerate() {
        let branch = cons::nth(env, branch, form);
        let thunk = cons::list(env, &[Special::Lambda.keyword(), Value::NIL, branch])?;
        thunks[i] = lambda(env, thunk)?;
    }

    cons::list(env, &[Special::If.keyword(), test, thunks[0], thunks[1]])
}

#[cfg(test)]
mod tests {
    use super::super::{exception, print, reader, stream, Config, MuErr};
    use super::*;

    fn env() -> Env {
        Env::new(&Config::default()).unwrap()
    }

    fn read(env: &mut Env, text: &str) -> Value {
        let src = stream::make(env, Box::new(stream::InputStream::string(text.as_bytes()))).unwrap();
        reader::read(env, src).unwrap().unwrap()
    }

    fn compiled(env: &mut Env, text: &str) -> MuResult<Value> {
        let form = read(env, text);
        compile(env, form)
    }

    fn err_type(env: &Env, r: MuResult<Value>) -> Value {
        match r {
            Err(MuErr::Raise(ex)) => exception::etype(env, ex),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    fn err_tag(env: &Env, r: MuResult<Value>) -> String {
        match r {
            Err(MuErr::Raise(ex)) => print::to_string(env, exception::tag(env, ex), true),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn raises_name_the_special_form() {
        let mut env = env();

        let r = compiled(&mut env, "(lambda (x x) x)");
        assert_eq!(err_tag(&env, r), ":lambda");
        let r = compiled(&mut env, "(lambda)");
        assert_eq!(err_tag(&env, r), ":lambda");
        let r = compiled(&mut env, "(quote 1 2)");
        assert_eq!(err_tag(&env, r), ":quote");
        let r = compiled(&mut env, "(if t 1)");
        assert_eq!(err_tag(&env, r), ":if");
    }

    #[test]
    fn constants_pass_through() {
        let mut env = env();

        for text in ["12", ":key", "\"text\"", "free"] {
            let form = read(&mut env, text);
            assert_eq!(compile(&mut env, form).unwrap(), form);
        }
    }

    #[test]
    fn lexical_references() {
        let mut env = env();

        let func = compiled(&mut env, "(lambda (x y) y x)").unwrap();
        assert!(function::is_function(&env, func));
        assert_eq!(function::arity(&env, func), 2);

        let id = function::frame_id(&env, func);
        let form = function::form(&env, func);
        let body = cons::to_vec(&env, cons::cdr(&env, form));

        let y = cons::to_vec(&env, body[0]);
        assert_eq!(print::to_string(&env, y[0], true), "env:lex-ref");
        assert_eq!(&y[1..], &[id, Value::Fixnum(1)]);

        let x = cons::to_vec(&env, body[1]);
        assert_eq!(&x[1..], &[id, Value::Fixnum(0)]);

        // outside the lambda, x is an ordinary symbol again
        let x = read(&mut env, "x");
        assert_eq!(compile(&mut env, x).unwrap(), x);
        assert!(env.compiler.lexicals.is_empty());
    }

    #[test]
    fn nested_lambdas_see_outer_parameters() {
        let mut env = env();

        let outer = compiled(&mut env, "(lambda (a) (lambda (b) a))").unwrap();
        let inner = cons::car(&env, cons::cdr(&env, function::form(&env, outer)));
        let body = cons::car(&env, cons::cdr(&env, function::form(&env, inner)));

        let refd = cons::to_vec(&env, body);
        assert_eq!(refd[1], function::frame_id(&env, outer));
        assert_ne!(function::frame_id(&env, outer), function::frame_id(&env, inner));
    }

    #[test]
    fn malformed_lambdas() {
        let mut env = env();

        let r = compiled(&mut env, "(lambda (x x) x)");
        assert_eq!(err_type(&env, r), Value::kw("dup"));
        let r = compiled(&mut env, "(lambda (:x) 1)");
        assert_eq!(err_type(&env, r), Value::kw("type"));
        let r = compiled(&mut env, "(lambda)");
        assert_eq!(err_type(&env, r), Value::kw("arity"));
        let r = compiled(&mut env, "(lambda 'x 1)");
        assert_eq!(err_type(&env, r), Value::kw("quote"));

        // a failed body leaves no scope behind
        let r = compiled(&mut env, "(lambda (x) (lambda (y y) x))");
        assert_eq!(err_type(&env, r), Value::kw("dup"));
        assert!(env.compiler.lexicals.is_empty());
    }

    #[test]
    fn special_forms() {
        let mut env = env();

        let q = compiled(&mut env, "(quote (1 2))").unwrap();
        assert_eq!(print::to_string(&env, q, true), "(:quote (1 2))");
        let r = compiled(&mut env, "(quote 1 2)");
        assert_eq!(err_type(&env, r), Value::kw("arity"));

        let c = compiled(&mut env, "(if t 1 2)").unwrap();
        let parts = cons::to_vec(&env, c);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], Value::kw("if"));
        assert_eq!(parts[1], Value::T);
        assert!(function::is_function(&env, parts[2]));
        assert_eq!(function::arity(&env, parts[3]), 0);
        let r = compiled(&mut env, "(if t 1)");
        assert_eq!(err_type(&env, r), Value::kw("arity"));

        let r = compiled(&mut env, "(:bogus 1)");
        assert_eq!(err_type(&env, r), Value::kw("type"));
        let r = compiled(&mut env, "(1 2)");
        assert_eq!(err_type(&env, r), Value::kw("type"));
    }

    #[test]
    fn lexicals_shadow_special_forms() {
        let mut env = env();

        let func = compiled(&mut env, "(lambda (if) (if 1 2 3))").unwrap();
        let body = cons::car(&env, cons::cdr(&env, function::form(&env, func)));
        let head = cons::car(&env, body);

        assert!(cons::is_cons(&env, head));
        assert_eq!(
            print::to_string(&env, cons::car(&env, head), true),
            "env:lex-ref"
        );
        assert_eq!(cons::length(&env, body), Some(4));
    }
}
