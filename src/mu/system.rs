// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/system.rs

// Host operating system services behind the system namespace.

// <>

use cpu_time::ThreadTime;

use std::io;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Process level facts and operations; `None` where the host refuses
pub struct System;

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

impl System {
    pub fn new() -> Self {
        Self
    }

    /// The host's code for the last failed system call on this thread
    pub fn errno(&self) -> i64 {
        io::Error::last_os_error().raw_os_error().map_or(0, i64::from)
    }

    pub fn cwd(&self) -> Option<String> {
        let dir = std::env::current_dir().ok()?;
        Some(dir.to_string_lossy().into_owned())
    }

    pub fn chdir(&self, path: &str) -> Option<()> {
        match std::env::set_current_dir(path) {
            Ok(()) => Some(()),
            Err(e) => {
                log::warn!("chdir: {path}: {e}");
                None
            }
        }
    }

    /// Environment variables, sorted by name
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<_> = std::env::vars_os()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .collect();
        vars.sort();
        vars
    }

    pub fn logname(&self) -> Option<String> {
        std::env::var("LOGNAME").or_else(|_| std::env::var("USER")).ok()
    }

    /// Runs a shell command line and returns its exit status
    pub fn exec(&self, line: &str) -> Option<i32> {
        let status = match Command::new("sh").arg("-c").arg(line).status() {
            Ok(status) => status,
            Err(e) => {
                log::warn!("system: {line}: {e}");
                return None;
            }
        };

        // killed by a signal
        status.code()
    }

    pub fn exit(&self, code: i32) -> ! {
        log::debug!("system: exit {code}");
        std::process::exit(code)
    }

    /// Microseconds since the epoch, and of CPU time used by the
    /// calling thread
    pub fn times(&self) -> Option<(u64, u64)> {
        let real = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
        let cpu = match ThreadTime::try_now() {
            Ok(t) => t.as_duration(),
            Err(e) => {
                log::warn!("utimes: {e}");
                return None;
            }
        };

        Some((
            u64::try_from(real.as_micros()).ok()?,
            u64::try_from(cpu.as_micros()).ok()?,
        ))
    }
}
