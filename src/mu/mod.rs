// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/mod.rs

// The runtime environment. Owns the heap, the namespace registry,
// the native function table, and the open streams; provides the
// read, compile, evaluate, print entry points used by the binary.

// <>

pub mod compile;
pub mod cons;
pub mod context;
pub mod eval;
pub mod exception;
pub mod function;
pub mod gc;
pub mod heap;
pub mod namespace;
pub mod nscache;
pub mod print;
pub mod reader;
pub mod readtable;
pub mod stdenv;
pub mod stream;
pub mod symbol;
pub mod system;
pub mod value;
pub mod vector;

use compile::Compiler;
use context::Context;
use exception::ErrType;
use heap::Heap;
use namespace::Scope;
use nscache::NsCache;
use stream::StreamTable;
use system::System;
use value::{HeapRef, SysClass, Value};

use std::collections::BTreeMap;
use std::fmt;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Failure of a runtime operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MuErr {
    /// A Mu exception object, catchable by `with-ex`
    Raise(Value),
    /// The heap arena has no room for an object of this many words
    OutOfMemory { words: usize },
}

impl fmt::Display for MuErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuErr::Raise(ex) => write!(f, "exception {:?}", ex),
            MuErr::OutOfMemory { words } => write!(f, "heap exhausted allocating {words} words"),
        }
    }
}

impl std::error::Error for MuErr {}

pub type MuResult<T> = Result<T, MuErr>;

/// Signature shared by every native function
pub type NativeFn = fn(&mut Env, &mut Context, &[Value]) -> MuResult<Value>;

/// Runtime settings, from the command line or defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub pages: usize,
    pub page_size: usize,
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pages: 1024,
            page_size: 4096,
            log_level: log::LevelFilter::Info,
        }
    }
}

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Repl,
    File(String),
}

impl Config {
    /// Parses `[--pages N] [--verbose] (repl | file <path>)`
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<(Config, Mode), String> {
        let mut cfg = Config::default();
        let mut mode = None;
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--pages" => {
                    let n = args.next().ok_or("--pages needs a count")?;
                    cfg.pages = n
                        .parse()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or(format!("bad page count {n}"))?;
                }
                "--verbose" => cfg.log_level = log::LevelFilter::Debug,
                "repl" => mode = Some(Mode::Repl),
                "file" => {
                    let path = args.next().ok_or("file needs a path")?;
                    mode = Some(Mode::File(path));
                }
                other => return Err(format!("unrecognized argument {other}")),
            }
        }

        Ok((cfg, mode.unwrap_or(Mode::Repl)))
    }
}

/// Everything a running Mu program shares across contexts
pub struct Env {
    pub heap: Heap,
    pub(crate) registry: BTreeMap<Vec<u8>, HeapRef>,
    pub(crate) ns_cache: NsCache,
    pub(crate) natives: Vec<NativeFn>,
    pub(crate) compiler: Compiler,
    pub(crate) streams: StreamTable,
    pub(crate) system: System,
    /// Home of symbols read without a namespace qualifier
    pub default_ns: Value,
    pub mu_ns: Value,
    pub std_in: Value,
    pub std_out: Value,
    pub err_out: Value,
}

impl Env {
    /// Builds the heap, the system, env, and mu namespaces, and the
    /// native function bindings
    pub fn new(cfg: &Config) -> MuResult<Self> {
        let mut env = Env {
            heap: Heap::new(cfg.pages, cfg.page_size),
            registry: BTreeMap::new(),
            ns_cache: NsCache::new(),
            natives: Vec::new(),
            compiler: Compiler::new(),
            streams: StreamTable::new(),
            system: System::new(),
            default_ns: Value::NIL,
            mu_ns: Value::NIL,
            std_in: Value::NIL,
            std_out: Value::NIL,
            err_out: Value::NIL,
        };

        let system = namespace::make(&mut env, b"system", Value::NIL)?;
        let env_ns = namespace::make(&mut env, b"env", system)?;
        let mu = namespace::make(&mut env, b"mu", env_ns)?;
        env.mu_ns = mu;
        env.default_ns = namespace::make_unnamed(&mut env, Value::NIL)?;

        stdenv::install(&mut env, system, Scope::Extern, stdenv::SYSTEM_EXTERN)?;
        stdenv::install(&mut env, env_ns, Scope::Extern, stdenv::ENV_EXTERN)?;
        stdenv::install(&mut env, mu, Scope::Extern, stdenv::MU_EXTERN)?;
        stdenv::install(&mut env, mu, Scope::Intern, stdenv::MU_INTERN)?;

        env.std_in = stream::make(&mut env, Box::new(stream::InputStream::stdin()))?;
        env.std_out = stream::make(&mut env, Box::new(stream::OutputStream::stdout()))?;
        env.err_out = stream::make(&mut env, Box::new(stream::OutputStream::stderr()))?;

        let version = vector::string(&mut env, VERSION.as_bytes())?;
        for (name, value) in [
            ("std-in", env.std_in),
            ("std-out", env.std_out),
            ("err-out", env.err_out),
            ("version", version),
            ("nil", Value::NIL),
            ("t", Value::T),
        ] {
            let name = vector::string(&mut env, name.as_bytes())?;
            namespace::intern(&mut env, mu, Scope::Extern, name, value)?;
        }

        log::debug!(
            "env: {} namespaces, {} natives, {} bytes of heap",
            env.registry.len(),
            env.natives.len(),
            env.heap.size()
        );

        Ok(env)
    }

    /// Builds an exception and returns it as an error
    pub fn raise<T>(&mut self, tag: &str, etype: ErrType, source: Value) -> MuResult<T> {
        let ex = exception::make(self, Value::kw(tag), etype, source)?;
        Err(MuErr::Raise(ex))
    }

    /// Class of any value, direct or heap allocated
    pub fn type_of(&self, v: Value) -> SysClass {
        match v {
            Value::Fixnum(_) => SysClass::Fixnum,
            Value::Char(_) => SysClass::Char,
            Value::Float(_) => SysClass::Float,
            Value::ShortStr(_) => SysClass::Vector,
            Value::Keyword(_) => SysClass::Symbol,
            Value::Cons(_) => SysClass::Cons,
            Value::Heap(r) => self.heap.class_of(r),
        }
    }

    pub fn map_namespace(&self, name: &[u8]) -> Option<Value> {
        self.registry.get(name).map(|r| Value::Heap(*r))
    }

    /// Human readable account of a failed operation
    pub fn describe(&self, err: MuErr) -> String {
        match err {
            MuErr::Raise(ex) => exception::describe(self, ex),
            other => other.to_string(),
        }
    }
}

/// Reads, compiles, and evaluates every form in `code`, returning the
/// printed form of the last result
pub fn interpret(env: &mut Env, ctx: &mut Context, code: &str) -> MuResult<String> {
    let input = stream::make(env, Box::new(stream::InputStream::string(code.as_bytes())))?;
    let pins = ctx.pins_len();
    ctx.pin(input);

    let result = read_eval(env, ctx, input);

    stream::close(env, input);
    ctx.unpin_to(pins);
    Ok(print::to_string(env, result?, true))
}

// evaluates forms until the input is exhausted; the value of the last
fn read_eval(env: &mut Env, ctx: &mut Context, input: Value) -> MuResult<Value> {
    let mut result = Value::NIL;
    while let Some(form) = reader::read(env, input)? {
        let held = ctx.pins_len();
        ctx.pin(result);
        result = eval::eval_top(env, ctx, form)?;
        ctx.unpin_to(held);
    }

    Ok(result)
}

/// Evaluates each form in a file in order
pub fn run_file(env: &mut Env, ctx: &mut Context, path: &str) -> MuResult<Value> {
    let input = match stream::InputStream::file(path) {
        Ok(s) => stream::make(env, Box::new(s))?,
        Err(e) => {
            log::error!("{path}: {e}");
            let name = vector::string(env, path.as_bytes())?;
            return env.raise("open", ErrType::System, name);
        }
    };

    let pins = ctx.pins_len();
    ctx.pin(input);

    let result = read_eval(env, ctx, input);

    stream::close(env, input);
    ctx.unpin_to(pins);
    result
}

/// Writes a failure's description to the error stream
pub fn report(env: &mut Env, err: MuErr) {
    let err_out = env.err_out;
    let text = env.describe(err);

    stream::write_str(env, err_out, &text);
    stream::write_str(env, err_out, "\n");
    stream::flush(env, err_out);
}

/// Reads from standard input and prints each result until end of file
///
/// Errors are reported on the error stream and the loop continues
/// with a fresh dynamic stack.
pub fn repl(env: &mut Env, ctx: &mut Context) -> MuResult<()> {
    let (std_in, std_out) = (env.std_in, env.std_out);

    loop {
        stream::write_str(env, std_out, "mu> ");
        stream::flush(env, std_out);

        let step = reader::read(env, std_in).and_then(|form| match form {
            Some(form) => eval::eval_top(env, ctx, form).map(Some),
            None => Ok(None),
        });

        match step {
            Ok(Some(value)) => {
                print::write(env, value, std_out, true);
                stream::write_str(env, std_out, "\n");
            }
            Ok(None) => {
                stream::write_str(env, std_out, "\n");
                stream::flush(env, std_out);
                return Ok(());
            }
            Err(err @ MuErr::OutOfMemory { .. }) => return Err(err),
            Err(err) => {
                report(env, err);
                ctx.reset();
            }
        }

        stream::flush(env, std_out);
    }
}
