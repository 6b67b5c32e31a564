// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/stdenv.rs

// Native functions bound in the system, env, and mu namespaces when
// an environment is created.

// <>

use super::compile;
use super::cons;
use super::context::Context;
use super::eval;
use super::exception::{self, ErrType};
use super::function;
use super::gc;
use super::namespace::{self, Scope};
use super::print;
use super::reader;
use super::stream::{self, InputStream, OutputStream, StringOutput};
use super::symbol;
use super::value::{SysClass, Value};
use super::vector::{self, VecType};
use super::{Env, MuErr, MuResult, NativeFn, VERSION};

/// Generates a slice of native functions along with names and
/// argument counts
///
/// Each entry reads like a small function: a name, an arity, the
/// names its arguments are bound to, and a body evaluating to a
/// `MuResult<Value>`. Arity is checked by the caller, so every named
/// argument is present.
macro_rules! mu_fn {
    ( const $array:ident; $env:ident $ctx:ident;
      $( $name:literal $argct:literal [ $($args:ident),* ] $body:block )+
    ) => {
        pub const $array: &[(&str, NativeFn, u16)] =
            &[$(($name, |
                _env: &mut Env,
                _ctx: &mut Context,
                _args: &[Value],
              | -> MuResult<Value> {
                    #[allow(unused_variables)]
                    let $env = _env;
                    #[allow(unused_variables)]
                    let $ctx = _ctx;

                    #[allow(unused_mut, unused_variables)]
                    let mut _argv = _args.iter().copied();
                    $(
                        let $args = _argv.next().unwrap_or(Value::NIL);
                    )*

                    $body
                },
                $argct)),+];
    };
}

/// Binds each native of a table to an extern or intern symbol of `ns`
pub fn install(env: &mut Env, ns: Value, scope: Scope, table: &[(&str, NativeFn, u16)]) -> MuResult<()> {
    for (name, native, arity) in table {
        let index = env.natives.len();
        env.natives.push(*native);

        let name = vector::string(env, name.as_bytes())?;
        let sym = namespace::intern(env, ns, scope, name, Value::UNBOUND)?;
        let func = function::native(env, sym, *arity as usize, index)?;
        symbol::set_value(env, sym, func);
    }

    log::debug!(
        "stdenv: bound {} natives in {}",
        table.len(),
        vector::lossy(env, namespace::name(env, ns))
    );

    Ok(())
}

fn fixnum_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<i64> {
    match v.as_fixnum() {
        Some(n) => Ok(n),
        None => env.raise(tag, ErrType::Type, v),
    }
}

fn float_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<f32> {
    match v.as_float() {
        Some(f) => Ok(f),
        None => env.raise(tag, ErrType::Type, v),
    }
}

fn char_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<u8> {
    match v.as_char() {
        Some(c) => Ok(c),
        None => env.raise(tag, ErrType::Type, v),
    }
}

/// A non-negative fixnum
fn index_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<usize> {
    match fixnum_arg(env, tag, v)? {
        n if n < 0 => env.raise(tag, ErrType::Range, v),
        n => Ok(n as usize),
    }
}

fn byte_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<u8> {
    match fixnum_arg(env, tag, v)? {
        n @ 0..=255 => Ok(n as u8),
        _ => env.raise(tag, ErrType::Range, v),
    }
}

fn string_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Vec<u8>> {
    if !vector::is_string(env, v) {
        return env.raise(tag, ErrType::Type, v);
    }

    Ok(vector::bytes(env, v))
}

fn list_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Vec<Value>> {
    if !cons::is_list(env, v) {
        return env.raise(tag, ErrType::Type, v);
    }

    cons::checked_length(env, tag, v)?;
    Ok(cons::to_vec(env, v))
}

fn keyword_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Value> {
    if !v.is_keyword() {
        return env.raise(tag, ErrType::Type, v);
    }

    Ok(v)
}

fn function_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Value> {
    if !function::is_function(env, v) {
        return env.raise(tag, ErrType::Type, v);
    }

    Ok(v)
}

fn symbol_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Value> {
    if !symbol::is_symbol(env, v) {
        return env.raise(tag, ErrType::Type, v);
    }

    Ok(v)
}

fn stream_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Value> {
    if !stream::is_stream(env, v) {
        return env.raise(tag, ErrType::Type, v);
    }

    Ok(v)
}

fn scope_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Scope> {
    match keyword_arg(env, tag, v)? {
        kw if kw == Value::kw("intern") => Ok(Scope::Intern),
        kw if kw == Value::kw("extern") => Ok(Scope::Extern),
        kw => env.raise(tag, ErrType::Value, kw),
    }
}

/// A namespace, or the name of a registered one
fn ns_arg(env: &mut Env, tag: &str, v: Value) -> MuResult<Value> {
    if namespace::is_namespace(env, v) {
        return Ok(v);
    }

    if !vector::is_string(env, v) {
        return env.raise(tag, ErrType::Type, v);
    }

    match env.map_namespace(&vector::bytes(env, v)) {
        Some(ns) => Ok(ns),
        None => env.raise(tag, ErrType::Ns, v),
    }
}

fn fixnum_result(env: &mut Env, tag: &str, n: Option<i64>, src: Value) -> MuResult<Value> {
    match n.and_then(Value::fixnum) {
        Some(v) => Ok(v),
        None => env.raise(tag, ErrType::Range, src),
    }
}

fn system_result<T>(env: &mut Env, tag: &str, r: Option<T>, src: Value) -> MuResult<T> {
    match r {
        Some(v) => Ok(v),
        None => env.raise(tag, ErrType::System, src),
    }
}

/// `#(:t ...)` of an object's fields
fn view(env: &mut Env, v: Value) -> MuResult<Value> {
    let fields = match env.type_of(v) {
        SysClass::Function => return function::view(env, v),
        SysClass::Namespace => vec![
            namespace::name(env, v),
            namespace::import(env, v),
            namespace::externs(env, v),
            namespace::interns(env, v),
        ],
        SysClass::Exception => vec![
            exception::tag(env, v),
            exception::class(env, v),
            exception::etype(env, v),
            exception::source(env, v),
            exception::frame(env, v),
        ],
        SysClass::Symbol => vec![
            symbol::ns(env, v),
            symbol::name(env, v),
            symbol::value(env, v),
        ],
        SysClass::Cons => vec![cons::car(env, v), cons::cdr(env, v)],
        SysClass::Vector => vec![
            vector::vtype(env, v).keyword(),
            Value::Fixnum(vector::length(env, v) as i64),
            vector::base(env, v),
        ],
        SysClass::Stream => vec![
            Value::Fixnum(stream::id(env, v).map_or(-1, |id| id as i64)),
            Value::bool(stream::is_open(env, v)),
        ],
        _ => vec![v],
    };

    vector::from_values(env, VecType::T, &fields)
}

// system

mu_fn! {
    const SYSTEM_EXTERN;
    env ctx;

    "cwd" 0 [] {
        let cwd = env.system.cwd();
        let cwd = system_result(env, "cwd", cwd, Value::NIL)?;
        vector::string(env, cwd.as_bytes())
    }

    "chdir" 1 [path] {
        let dir = string_arg(env, "chdir", path)?;
        let done = env.system.chdir(&String::from_utf8_lossy(&dir));
        system_result(env, "chdir", done, path)?;
        Ok(path)
    }

    "env" 0 [] {
        let pins = ctx.pins_len();
        let mut pairs = Vec::new();
        for (name, value) in env.system.vars() {
            let name = vector::string(env, name.as_bytes())?;
            ctx.pin(name);
            let value = vector::string(env, value.as_bytes())?;
            ctx.pin(value);
            let pair = cons::cons(env, name, value)?;
            ctx.pin(pair);
            pairs.push(pair);
        }

        let vars = cons::list(env, &pairs);
        ctx.unpin_to(pins);
        vars
    }

    "errno" 0 [] {
        Ok(Value::Fixnum(env.system.errno()))
    }

    "exit" 1 [rc] {
        let code = fixnum_arg(env, "exit", rc)?;
        let (out, err) = (env.std_out, env.err_out);
        stream::flush(env, out);
        stream::flush(env, err);
        env.system.exit(code as i32)
    }

    "logname" 0 [] {
        let name = env.system.logname();
        let name = system_result(env, "logname", name, Value::NIL)?;
        vector::string(env, name.as_bytes())
    }

    "system" 1 [cmd] {
        let line = string_arg(env, "system", cmd)?;
        let rc = env.system.exec(&String::from_utf8_lossy(&line));
        let rc = system_result(env, "system", rc, cmd)?;
        Ok(Value::Fixnum(rc as i64))
    }

    "utimes" 0 [] {
        let times = env.system.times();
        let (real, process) = system_result(env, "utimes", times, Value::NIL)?;
        let fields = [
            Value::kw("clock"),
            fixnum_result(env, "utimes", i64::try_from(real).ok(), Value::NIL)?,
            fixnum_result(env, "utimes", i64::try_from(process).ok(), Value::NIL)?,
        ];
        vector::from_values(env, VecType::T, &fields)
    }
}

// env

mu_fn! {
    const ENV_EXTERN;
    env ctx;

    "context" 0 [] {
        ctx.capture(env)
    }

    "cx-info" 0 [] {
        let info = ctx.info();
        cons::list(
            env,
            &[
                Value::Fixnum(info.calls as i64),
                Value::Fixnum(info.depth as i64),
                Value::Fixnum(info.max as i64),
            ],
        )
    }

    "ev-info" 0 [] {
        let registered: Vec<(Vec<u8>, Value)> = env
            .registry
            .iter()
            .map(|(name, r)| (name.clone(), Value::Heap(*r)))
            .collect();

        let pins = ctx.pins_len();
        let mut nss = Vec::new();
        for (name, ns) in registered {
            let name = vector::string(env, &name)?;
            ctx.pin(name);
            let entry = cons::cons(env, name, ns)?;
            ctx.pin(entry);
            nss.push(entry);
        }

        let nss = cons::list(env, &nss)?;
        ctx.pin(nss);
        let nss = cons::cons(env, Value::kw("ns"), nss)?;
        ctx.pin(nss);
        let version = vector::string(env, VERSION.as_bytes())?;
        let version = cons::cons(env, Value::kw("version"), version)?;
        ctx.unpin_to(pins);

        cons::list(env, &[version, nss])
    }

    "find-ns" 1 [name] {
        let name = string_arg(env, "find-ns", name)?;
        Ok(env.map_namespace(&name).unwrap_or(Value::NIL))
    }

    "fix" 1 [func] {
        let mut value = function_arg(env, "fix", func)?;
        let pins = ctx.pins_len();
        while function::is_function(env, value) {
            ctx.unpin_to(pins);
            ctx.pin(value);
            value = match eval::funcall(env, ctx, value, &[]) {
                Ok(v) => v,
                Err(e) => {
                    ctx.unpin_to(pins);
                    return Err(e);
                }
            };
        }

        ctx.unpin_to(pins);
        Ok(value)
    }

    "fnv-lex" 1 [func] {
        let func = function_arg(env, "fnv-lex", func)?;
        match ctx.lexical_frame(function::frame_id(env, func)) {
            Some(frame) => Context::frame_to_value(env, &frame),
            None => env.raise("fnv-lex", ErrType::Unbound, func),
        }
    }

    "fnv-set" 3 [frame, offset, value] {
        let args = cons::cdr(env, frame);
        if !cons::is_cons(env, frame) || !vector::is_vector(env, args) {
            return env.raise("fnv-set", ErrType::Type, frame);
        }

        let off = index_arg(env, "fnv-set", offset)?;
        if off >= vector::length(env, args) {
            return env.raise("fnv-set", ErrType::Range, offset);
        }

        let old = vector::elt(env, args, off);
        vector::set_elt(env, args, off, value);
        ctx.closure_set(frame, off, value);
        Ok(old)
    }

    "gc" 0 [] {
        let freed = gc::gc(env, ctx);
        Ok(Value::Fixnum(freed as i64))
    }

    "hp-info" 2 [heap, class] {
        keyword_arg(env, "hp-info", heap)?;
        let class = match SysClass::from_keyword(class) {
            Some(class) => class,
            None => return env.raise("hp-info", ErrType::Type, class),
        };

        let fields = match class {
            SysClass::T => vec![
                Value::Fixnum(env.heap.size() as i64),
                Value::Fixnum(env.heap.used() as i64),
                Value::Fixnum(SysClass::ALL.iter().map(|c| env.heap.type_alloc(*c)).sum::<usize>() as i64),
            ],
            SysClass::Fixnum | SysClass::Float | SysClass::Char | SysClass::Byte | SysClass::Double => {
                return Ok(Value::NIL)
            }
            class => vec![
                Value::Fixnum(env.heap.type_alloc(class) as i64),
                Value::Fixnum(env.heap.type_free(class) as i64),
            ],
        };

        vector::from_values(env, VecType::T, &fields)
    }

    "lex-pop" 1 [frame] {
        match ctx.closure_pop(frame) {
            Some(()) => Ok(frame),
            None => env.raise("lex-pop", ErrType::Type, frame),
        }
    }

    "lex-psh" 1 [frame] {
        match ctx.closure_push(env, frame) {
            Some(()) => Ok(frame),
            None => env.raise("lex-psh", ErrType::Type, frame),
        }
    }

    "lex-ref" 2 [id, offset] {
        let off = index_arg(env, "lex-ref", offset)?;
        match ctx.lex_ref(id, off) {
            Some(value) => Ok(value),
            None => env.raise("lex-ref", ErrType::Unbound, id),
        }
    }

    "lex-set" 3 [func, offset, value] {
        let func = function_arg(env, "lex-set", func)?;
        let off = index_arg(env, "lex-set", offset)?;
        let id = function::frame_id(env, func);

        match ctx.lex_ref(id, off) {
            Some(old) => {
                ctx.lex_set(env, id, off, value);
                Ok(old)
            }
            None => env.raise("lex-set", ErrType::Unbound, func),
        }
    }

    "ns" 1 [ns] {
        if ns.is_nil() {
            return Ok(ns);
        }
        if !namespace::is_namespace(env, ns) {
            return env.raise("ns", ErrType::Type, ns);
        }
        Ok(namespace::canonical(env, ns))
    }

    "saveimg" 1 [path] {
        let path = string_arg(env, "saveimg", path)?;
        log::info!("saveimg: image saving is unsupported, {} not written", String::from_utf8_lossy(&path));
        Ok(Value::T)
    }
}

// mu

mu_fn! {
    const MU_EXTERN;
    env ctx;

    "boundp" 1 [sym] {
        let sym = symbol_arg(env, "boundp", sym)?;
        Ok(Value::bool(symbol::is_bound(env, sym)))
    }

    "car" 1 [list] {
        if !cons::is_list(env, list) {
            return env.raise("car", ErrType::Type, list);
        }
        Ok(cons::car(env, list))
    }

    "cdr" 1 [list] {
        if !cons::is_list(env, list) {
            return env.raise("cdr", ErrType::Type, list);
        }
        Ok(cons::cdr(env, list))
    }

    "ch-code" 1 [ch] {
        let c = char_arg(env, "ch-code", ch)?;
        Ok(Value::Fixnum(c as i64))
    }

    "code-ch" 1 [code] {
        let c = byte_arg(env, "code-ch", code)?;
        Ok(Value::Char(c))
    }

    "close" 1 [st] {
        let st = stream_arg(env, "close", st)?;
        stream::close(env, st);
        Ok(Value::T)
    }

    "cons" 2 [car, cdr] {
        cons::cons(env, car, cdr)
    }

    "eofp" 1 [st] {
        let st = stream_arg(env, "eofp", st)?;
        Ok(Value::bool(stream::is_eof(env, st)))
    }

    "eq" 2 [fst, snd] {
        Ok(Value::bool(fst == snd))
    }

    "eval" 1 [form] {
        let pins = ctx.pins_len();
        let compiled = compile::compile(env, form)?;
        ctx.pin(compiled);
        let value = eval::eval(env, ctx, compiled);
        ctx.unpin_to(pins);
        value
    }

    "except" 4 [tag, class, etype, source] {
        let tag = keyword_arg(env, "except", tag)?;
        let class = keyword_arg(env, "except", class)?;
        let etype = keyword_arg(env, "except", etype)?;
        exception::make_full(env, tag, class, etype, source, Value::NIL)
    }

    "fixnum*" 2 [fst, snd] {
        let (a, b) = (fixnum_arg(env, "fixnum*", fst)?, fixnum_arg(env, "fixnum*", snd)?);
        fixnum_result(env, "fixnum*", a.checked_mul(b), fst)
    }

    "fixnum+" 2 [fst, snd] {
        let (a, b) = (fixnum_arg(env, "fixnum+", fst)?, fixnum_arg(env, "fixnum+", snd)?);
        fixnum_result(env, "fixnum+", a.checked_add(b), fst)
    }

    "fixnum-" 2 [fst, snd] {
        let (a, b) = (fixnum_arg(env, "fixnum-", fst)?, fixnum_arg(env, "fixnum-", snd)?);
        fixnum_result(env, "fixnum-", a.checked_sub(b), fst)
    }

    "fixnum<" 2 [fst, snd] {
        let (a, b) = (fixnum_arg(env, "fixnum<", fst)?, fixnum_arg(env, "fixnum<", snd)?);
        Ok(Value::bool(a < b))
    }

    "float*" 2 [fst, snd] {
        let (a, b) = (float_arg(env, "float*", fst)?, float_arg(env, "float*", snd)?);
        Ok(Value::Float(a * b))
    }

    "float+" 2 [fst, snd] {
        let (a, b) = (float_arg(env, "float+", fst)?, float_arg(env, "float+", snd)?);
        Ok(Value::Float(a + b))
    }

    "float-" 2 [fst, snd] {
        let (a, b) = (float_arg(env, "float-", fst)?, float_arg(env, "float-", snd)?);
        Ok(Value::Float(a - b))
    }

    "float/" 2 [fst, snd] {
        let (a, b) = (float_arg(env, "float/", fst)?, float_arg(env, "float/", snd)?);
        Ok(Value::Float(a / b))
    }

    "float<" 2 [fst, snd] {
        let (a, b) = (float_arg(env, "float<", fst)?, float_arg(env, "float<", snd)?);
        Ok(Value::bool(a < b))
    }

    // quotient rounded toward negative infinity, remainder with the
    // sign of the divisor
    "floor" 2 [number, divisor] {
        let n = fixnum_arg(env, "floor", number)?;
        let d = fixnum_arg(env, "floor", divisor)?;
        if d == 0 {
            return env.raise("floor", ErrType::Value, divisor);
        }

        let (mut quot, mut rem) = (n / d, n % d);
        if rem != 0 && (rem < 0) != (d < 0) {
            quot -= 1;
            rem += d;
        }

        cons::cons(env, Value::Fixnum(quot), Value::Fixnum(rem))
    }

    // quotient rounded toward zero
    "trunc" 2 [number, divisor] {
        let n = fixnum_arg(env, "trunc", number)?;
        let d = fixnum_arg(env, "trunc", divisor)?;
        if d == 0 {
            return env.raise("trunc", ErrType::Value, divisor);
        }

        cons::cons(env, Value::Fixnum(n / d), Value::Fixnum(n % d))
    }

    "logand" 2 [fst, snd] {
        let (a, b) = (fixnum_arg(env, "logand", fst)?, fixnum_arg(env, "logand", snd)?);
        Ok(Value::Fixnum(a & b))
    }

    "logor" 2 [fst, snd] {
        let (a, b) = (fixnum_arg(env, "logor", fst)?, fixnum_arg(env, "logor", snd)?);
        Ok(Value::Fixnum(a | b))
    }

    "funcall" 2 [func, args] {
        let func = function_arg(env, "funcall", func)?;
        let argv = list_arg(env, "funcall", args)?;
        eval::funcall(env, ctx, func, &argv)
    }

    "get-str" 1 [st] {
        let st = stream_arg(env, "get-str", st)?;
        match stream::take_string(env, st) {
            Some(bytes) => vector::string(env, &bytes),
            None => env.raise("get-str", ErrType::Type, st),
        }
    }

    "intern" 3 [ns, scope, name] {
        let ns = ns_arg(env, "intern", ns)?;
        let scope = scope_arg(env, "intern", scope)?;
        string_arg(env, "intern", name)?;
        namespace::intern(env, ns, scope, name, Value::UNBOUND)
    }

    "keyword" 1 [name] {
        let bytes = string_arg(env, "keyword", name)?;
        match Value::keyword(&bytes) {
            Some(kw) => Ok(kw),
            None => env.raise("keyword", ErrType::Size, name),
        }
    }

    "keysymp" 1 [v] {
        Ok(Value::bool(v.is_keyword()))
    }

    "length" 1 [list] {
        let items = list_arg(env, "length", list)?;
        Ok(Value::Fixnum(items.len() as i64))
    }

    "list-sv" 2 [vtype, list] {
        let vtype = match VecType::from_keyword(vtype) {
            Some(vtype) => vtype,
            None => return env.raise("list-sv", ErrType::Type, vtype),
        };
        let items = list_arg(env, "list-sv", list)?;
        vector::from_values(env, vtype, &items)
    }

    "ns" 2 [name, import] {
        let bytes = string_arg(env, "ns", name)?;
        if !import.is_nil() && !namespace::is_namespace(env, import) {
            return env.raise("ns", ErrType::Type, import);
        }
        if env.map_namespace(&bytes).is_some() {
            return env.raise("ns", ErrType::Dup, name);
        }

        log::debug!("ns: creating {}", String::from_utf8_lossy(&bytes));
        namespace::make(env, &bytes, import)
    }

    "ns-find" 3 [ns, scope, name] {
        let ns = ns_arg(env, "ns-find", ns)?;
        let scope = scope_arg(env, "ns-find", scope)?;
        let name = string_arg(env, "ns-find", name)?;
        Ok(namespace::map(env, ns, scope, &name).unwrap_or(Value::NIL))
    }

    "ns-imp" 1 [ns] {
        let ns = ns_arg(env, "ns-imp", ns)?;
        Ok(namespace::import(env, ns))
    }

    "ns-name" 1 [ns] {
        let ns = ns_arg(env, "ns-name", ns)?;
        Ok(namespace::name(env, ns))
    }

    "ns-syms" 2 [ns, scope] {
        let ns = ns_arg(env, "ns-syms", ns)?;
        Ok(match scope_arg(env, "ns-syms", scope)? {
            Scope::Extern => namespace::externs(env, ns),
            Scope::Intern => namespace::interns(env, ns),
        })
    }

    "nth" 2 [n, list] {
        let n = index_arg(env, "nth", n)?;
        if !cons::is_list(env, list) {
            return env.raise("nth", ErrType::Type, list);
        }
        Ok(cons::nth(env, n, list))
    }

    "nthcdr" 2 [n, list] {
        let n = index_arg(env, "nthcdr", n)?;
        if !cons::is_list(env, list) {
            return env.raise("nthcdr", ErrType::Type, list);
        }
        Ok(cons::nthcdr(env, n, list))
    }

    "open" 3 [kind, dir, arg] {
        let text = string_arg(env, "open", arg)?;
        let input = match dir {
            d if d == Value::kw("input") => true,
            d if d == Value::kw("output") => false,
            d => return env.raise("open", ErrType::Type, d),
        };

        if kind == Value::kw("string") {
            return if input {
                stream::make(env, Box::new(InputStream::string(&text)))
            } else {
                let st = stream::make(env, Box::new(StringOutput::default()))?;
                stream::write_str(env, st, &String::from_utf8_lossy(&text));
                Ok(st)
            };
        }

        if kind != Value::kw("file") {
            return env.raise("open", ErrType::Type, kind);
        }

        let path = String::from_utf8_lossy(&text).into_owned();
        let opened = if input {
            InputStream::file(&path).map(|s| Box::new(s) as Box<dyn stream::ByteStream>)
        } else {
            OutputStream::file(&path).map(|s| Box::new(s) as Box<dyn stream::ByteStream>)
        };

        match opened {
            Ok(backend) => stream::make(env, backend),
            Err(e) => {
                log::warn!("open: {path}: {e}");
                env.raise("open", ErrType::System, arg)
            }
        }
    }

    "raise" 1 [ex] {
        if !exception::is_exception(env, ex) {
            return env.raise("raise", ErrType::Type, ex);
        }
        Err(MuErr::Raise(ex))
    }

    "rd-byte" 1 [st] {
        let st = stream_arg(env, "rd-byte", st)?;
        Ok(stream::read_byte(env, st).map_or(Value::NIL, |b| Value::Fixnum(b as i64)))
    }

    "rd-char" 1 [st] {
        let st = stream_arg(env, "rd-char", st)?;
        Ok(stream::read_byte(env, st).map_or(Value::NIL, Value::Char))
    }

    "read" 1 [st] {
        let st = stream_arg(env, "read", st)?;
        if stream::is_eof(env, st) {
            return env.raise("read", ErrType::Eof, st);
        }

        match reader::read(env, st)? {
            Some(form) => Ok(form),
            None => env.raise("read", ErrType::Eof, st),
        }
    }

    "slice" 3 [v, offset, len] {
        if !vector::is_vector(env, v) {
            return env.raise("slice", ErrType::Type, v);
        }
        let offset = index_arg(env, "slice", offset)?;
        let len = index_arg(env, "slice", len)?;
        vector::slice(env, v, offset, len)
    }

    "sv-len" 1 [v] {
        if !vector::is_vector(env, v) {
            return env.raise("sv-len", ErrType::Type, v);
        }
        Ok(Value::Fixnum(vector::length(env, v) as i64))
    }

    "sv-ref" 2 [v, index] {
        if !vector::is_vector(env, v) {
            return env.raise("sv-ref", ErrType::Type, v);
        }
        let i = index_arg(env, "sv-ref", index)?;
        if i >= vector::length(env, v) {
            return env.raise("sv-ref", ErrType::Range, index);
        }
        Ok(vector::elt(env, v, i))
    }

    "sv-type" 1 [v] {
        if !vector::is_vector(env, v) {
            return env.raise("sv-type", ErrType::Type, v);
        }
        Ok(vector::vtype(env, v).keyword())
    }

    "sy-name" 1 [sym] {
        let sym = symbol_arg(env, "sy-name", sym)?;
        Ok(symbol::name(env, sym))
    }

    "sy-ns" 1 [sym] {
        let sym = symbol_arg(env, "sy-ns", sym)?;
        Ok(symbol::ns(env, sym))
    }

    "sy-val" 1 [sym] {
        let sym = symbol_arg(env, "sy-val", sym)?;
        if !symbol::is_bound(env, sym) {
            return env.raise("sy-val", ErrType::Unbound, sym);
        }
        Ok(symbol::value(env, sym))
    }

    "symbol" 1 [name] {
        string_arg(env, "symbol", name)?;
        symbol::make(env, Value::NIL, name, Value::UNBOUND)
    }

    "type-of" 1 [v] {
        Ok(env.type_of(v).keyword())
    }

    "un-byte" 2 [byte, st] {
        let b = byte_arg(env, "un-byte", byte)?;
        let st = stream_arg(env, "un-byte", st)?;
        stream::unread_byte(env, st, b);
        Ok(byte)
    }

    "un-char" 2 [ch, st] {
        let c = char_arg(env, "un-char", ch)?;
        let st = stream_arg(env, "un-char", st)?;
        stream::unread_byte(env, st, c);
        Ok(ch)
    }

    "with-ex" 2 [handler, thunk] {
        let handler = function_arg(env, "with-ex", handler)?;
        let thunk = function_arg(env, "with-ex", thunk)?;

        let mark = ctx.mark();
        match eval::funcall(env, ctx, thunk, &[]) {
            Err(MuErr::Raise(ex)) => {
                ctx.unwind(mark);
                eval::funcall(env, ctx, handler, &[ex])
            }
            other => other,
        }
    }

    "wr-byte" 2 [byte, st] {
        let b = byte_arg(env, "wr-byte", byte)?;
        let st = stream_arg(env, "wr-byte", st)?;
        if !stream::write_byte(env, st, b) {
            return env.raise("wr-byte", ErrType::System, st);
        }
        Ok(byte)
    }

    "wr-char" 2 [ch, st] {
        let c = char_arg(env, "wr-char", ch)?;
        let st = stream_arg(env, "wr-char", st)?;
        if !stream::write_byte(env, st, c) {
            return env.raise("wr-char", ErrType::System, st);
        }
        Ok(ch)
    }

    "write" 3 [v, st, esc] {
        let st = stream_arg(env, "write", st)?;
        if !print::write(env, v, st, !esc.is_nil()) {
            return env.raise("write", ErrType::System, st);
        }
        Ok(v)
    }
}

mu_fn! {
    const MU_INTERN;
    env ctx;

    "compile" 1 [form] {
        compile::compile(env, form)
    }

    "fclone" 1 [fields] {
        if !vector::is_vector(env, fields)
            || vector::vtype(env, fields) != VecType::T
            || vector::length(env, fields) != 4
        {
            return env.raise("fclone", ErrType::Type, fields);
        }

        let fields = vector::values(env, fields);
        let arity = index_arg(env, "fclone", fields[0])?;
        let func = function::make(env, arity, fields[1], fields[2])?;
        function::set_extension(env, func, fields[3]);
        Ok(func)
    }

    "fn-int" 2 [key, func] {
        let func = function_arg(env, "fn-int", func)?;
        match keyword_arg(env, "fn-int", key)? {
            k if k == Value::kw("arity") => Ok(Value::Fixnum(function::arity(env, func) as i64)),
            k if k == Value::kw("ext") => Ok(function::extension(env, func)),
            k if k == Value::kw("form") => Ok(function::form(env, func)),
            k if k == Value::kw("frame") => Ok(function::frame_id(env, func)),
            k => env.raise("fn-int", ErrType::Value, k),
        }
    }

    "intern" 4 [ns, scope, name, value] {
        let ns = ns_arg(env, "intern", ns)?;
        let scope = scope_arg(env, "intern", scope)?;
        string_arg(env, "intern", name)?;
        namespace::intern(env, ns, scope, name, value)
    }

    "view" 1 [v] {
        view(env, v)
    }
}
