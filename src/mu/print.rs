// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/print.rs

// Printed representations. With escaping on, readable values print
// the way the reader accepts them; opaque objects print as
// `#<:type #xADDR (...)>`.

// <>

use super::cons;
use super::function;
use super::namespace::{self, Scope};
use super::stream;
use super::symbol;
use super::value::{SysClass, Value};
use super::vector;
use super::Env;

use std::fmt::Write;

/// Printed form of a value
pub fn to_string(env: &Env, v: Value, esc: bool) -> String {
    let mut out = String::new();
    print_value(env, &mut out, v, esc);
    out
}

/// Prints a value to a stream; false if the stream refused a byte
pub fn write(env: &mut Env, v: Value, dest: Value, esc: bool) -> bool {
    let text = to_string(env, v, esc);
    stream::write_str(env, dest, &text)
}

fn print_value(env: &Env, out: &mut String, v: Value, esc: bool) {
    match v {
        Value::Fixnum(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Float(f) => {
            let _ = write!(out, "{f:.6}");
        }
        Value::Char(c) => {
            if esc {
                out.push_str("#\\");
            }
            out.push(c as char);
        }
        Value::Keyword(s) => {
            if esc {
                out.push(':');
            }
            out.push_str(&String::from_utf8_lossy(s.as_bytes()));
        }
        Value::ShortStr(_) => print_string(env, out, v, esc),
        Value::Cons(_) => print_list(env, out, v, esc),
        Value::Heap(r) => match env.heap.class_of(r) {
            SysClass::Cons => print_list(env, out, v, esc),
            SysClass::Symbol => print_symbol(env, out, v, esc),
            SysClass::Vector if vector::is_string(env, v) => print_string(env, out, v, esc),
            SysClass::Vector => print_vector(env, out, v, esc),
            SysClass::Function => print_function(env, out, v),
            SysClass::Namespace => {
                let name = vector::lossy(env, namespace::name(env, v));
                let _ = write!(out, "#<:ns #x{:x} (\"{name}\")>", v.word());
            }
            class => {
                let _ = write!(
                    out,
                    "#<{} #x{:x} ()>",
                    to_string(env, class.keyword(), true),
                    v.word()
                );
            }
        },
    }
}

fn print_string(env: &Env, out: &mut String, v: Value, esc: bool) {
    let text = vector::lossy(env, v);

    if !esc {
        out.push_str(&text);
        return;
    }

    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn print_list(env: &Env, out: &mut String, v: Value, esc: bool) {
    out.push('(');

    let mut cur = v;
    let mut first = true;
    while cons::is_cons(env, cur) {
        if !first {
            out.push(' ');
        }
        first = false;

        print_value(env, out, cons::car(env, cur), esc);
        cur = cons::cdr(env, cur);
    }

    if !cur.is_nil() {
        out.push_str(" . ");
        print_value(env, out, cur, esc);
    }

    out.push(')');
}

fn print_symbol(env: &Env, out: &mut String, sym: Value, esc: bool) {
    let name = vector::lossy(env, symbol::name(env, sym));

    if esc {
        let ns = symbol::ns(env, sym);
        let bytes = name.as_bytes();

        if ns.is_nil() {
            out.push_str("#:");
        } else if ns != env.default_ns {
            out.push_str(&vector::lossy(env, namespace::name(env, ns)));
            match namespace::map(env, ns, Scope::Extern, bytes) {
                Some(found) if found == sym => out.push(':'),
                _ => out.push_str("::"),
            }
        }
    }

    out.push_str(&name);
}

fn print_vector(env: &Env, out: &mut String, v: Value, esc: bool) {
    out.push_str("#(");
    print_value(env, out, vector::vtype(env, v).keyword(), true);

    for item in vector::values(env, v) {
        out.push(' ');
        print_value(env, out, item, esc);
    }

    out.push(')');
}

fn print_function(env: &Env, out: &mut String, func: Value) {
    let form = function::form(env, func);

    let _ = write!(out, "#<:func #x{:x} (", func.word());
    if function::is_native(env, func) {
        print_symbol(env, out, form, true);
    } else {
        let _ = write!(out, ":lambda {}", to_string(env, function::frame_id(env, func), true));
    }
    out.push_str(")>");
}

#[cfg(test)]
mod tests {
    use super::super::{interpret, Config};
    use super::super::context::Context;
    use super::*;

    fn env() -> Env {
        Env::new(&Config::default()).unwrap()
    }

    #[test]
    fn atoms() {
        let env = env();

        assert_eq!("-17", to_string(&env, Value::Fixnum(-17), true));
        assert_eq!("0.250000", to_string(&env, Value::Float(0.25), true));
        assert_eq!("#\\a", to_string(&env, Value::Char(b'a'), true));
        assert_eq!("a", to_string(&env, Value::Char(b'a'), false));
        assert_eq!(":key", to_string(&env, Value::kw("key"), true));
        assert_eq!("key", to_string(&env, Value::kw("key"), false));
        assert_eq!(":nil", to_string(&env, Value::NIL, true));
    }

    #[test]
    fn strings() {
        let mut env = env();

        let s = vector::string(&mut env, b"say \"hi\"").unwrap();
        assert_eq!("\"say \\\"hi\\\"\"", to_string(&env, s, true));
        assert_eq!("say \"hi\"", to_string(&env, s, false));
    }

    #[test]
    fn opaque_objects() {
        let mut env = env();
        let mut ctx = Context::new();

        let out = interpret(&mut env, &mut ctx, "car").unwrap();
        assert!(out.starts_with("#<:func #x"), "{out}");
        assert!(out.ends_with("(mu:car)>"), "{out}");

        let out = interpret(&mut env, &mut ctx, "(lambda (x) x)").unwrap();
        assert!(out.contains("(:lambda :"), "{out}");

        let out = interpret(&mut env, &mut ctx, "std-out").unwrap();
        assert!(out.starts_with("#<:stream #x"), "{out}");

        let mu = env.mu_ns;
        assert!(to_string(&env, mu, true).ends_with("(\"mu\")>"));
    }

    #[test]
    fn sends_to_streams() {
        let mut env = env();
        let out = stream::make(&mut env, Box::new(stream::StringOutput::default())).unwrap();

        let list = cons::list(&mut env, &[Value::Fixnum(1), Value::kw("a")]).unwrap();
        assert!(write(&mut env, list, out, true));
        assert_eq!(stream::take_string(&mut env, out), Some(b"(1 :a)".to_vec()));
    }
}
