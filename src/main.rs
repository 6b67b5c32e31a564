// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/main.rs

// Command line entry point.

// <>

use libmu::mu::{self, context::Context, Config, Env, MuErr, Mode};

use std::process;

fn main() {
    // mu [--pages N] [--verbose] repl
    // mu [--pages N] [--verbose] file <path>
    let (cfg, mode) = match Config::from_args(std::env::args().skip(1)) {
        Ok(parsed) => parsed,
        Err(msg) => {
            eprintln!("mu: {msg}");
            eprintln!("usage: mu [--pages N] [--verbose] (repl | file <path>)");
            process::exit(2);
        }
    };

    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(cfg.log_level)
        .init()
    {
        eprintln!("mu: logger: {e}");
    }

    let mut env = match Env::new(&cfg) {
        Ok(env) => env,
        Err(err) => {
            log::error!("environment setup failed: {err}");
            process::exit(1);
        }
    };
    let mut ctx = Context::new();

    let outcome = match mode {
        Mode::Repl => mu::repl(&mut env, &mut ctx),
        Mode::File(path) => mu::run_file(&mut env, &mut ctx, &path).map(|_| ()),
    };

    if let Err(err) = outcome {
        match err {
            MuErr::OutOfMemory { .. } => log::error!("{err}"),
            MuErr::Raise(_) => log::error!("unhandled exception: {}", env.describe(err)),
        }
        mu::report(&mut env, err);
        process::exit(1);
    }
}
