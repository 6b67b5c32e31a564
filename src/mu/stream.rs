// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/stream.rs

// Byte streams. A heap stream object holds only an index into the
// environment's stream table, which owns the actual readers and
// writers.

// <>

use super::value::{SysClass, Value};
use super::{Env, MuResult};

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};

/// A source or sink of bytes
pub trait ByteStream {
    /// Next byte, or `None` at end of input or on an output stream
    fn read_byte(&mut self) -> Option<u8>;
    /// Pushes a byte back to be read again; may be called repeatedly
    fn unread_byte(&mut self, byte: u8);
    /// False if the byte could not be written
    fn write_byte(&mut self, byte: u8) -> bool;
    fn is_eof(&mut self) -> bool;
    fn is_input(&self) -> bool;
    fn flush(&mut self) {}
    fn close(&mut self) {}
    /// Contents written so far to a string stream, which are then reset
    fn take_string(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Any reader, with pushback
pub struct InputStream<R: Read> {
    reader: R,
    pushback: Vec<u8>,
}

impl InputStream<Cursor<Vec<u8>>> {
    pub fn string(bytes: &[u8]) -> Self {
        Self::new(Cursor::new(bytes.to_vec()))
    }
}

impl InputStream<io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(io::stdin())
    }
}

impl InputStream<BufReader<File>> {
    pub fn file(path: &str) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> InputStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pushback: Vec::new(),
        }
    }
}

impl<R: Read> ByteStream for InputStream<R> {
    fn read_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pushback.pop() {
            return Some(byte);
        }

        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return None,
                Ok(_) => return Some(buf[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("stream read failed: {e}");
                    return None;
                }
            }
        }
    }

    fn unread_byte(&mut self, byte: u8) {
        self.pushback.push(byte)
    }

    fn write_byte(&mut self, _byte: u8) -> bool {
        false
    }

    fn is_eof(&mut self) -> bool {
        match self.read_byte() {
            Some(byte) => {
                self.unread_byte(byte);
                false
            }
            None => true,
        }
    }

    fn is_input(&self) -> bool {
        true
    }
}

/// Any writer
pub struct OutputStream<W: Write> {
    writer: W,
}

impl OutputStream<io::Stdout> {
    pub fn stdout() -> Self {
        Self { writer: io::stdout() }
    }
}

impl OutputStream<io::Stderr> {
    pub fn stderr() -> Self {
        Self { writer: io::stderr() }
    }
}

impl OutputStream<BufWriter<File>> {
    pub fn file(path: &str) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl<W: Write> ByteStream for OutputStream<W> {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn unread_byte(&mut self, _byte: u8) {}

    fn write_byte(&mut self, byte: u8) -> bool {
        self.writer.write_all(&[byte]).is_ok()
    }

    fn is_eof(&mut self) -> bool {
        false
    }

    fn is_input(&self) -> bool {
        false
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("stream flush failed: {e}");
        }
    }

    fn close(&mut self) {
        self.flush()
    }
}

/// Accumulates written bytes in memory
#[derive(Default)]
pub struct StringOutput {
    bytes: Vec<u8>,
}

impl ByteStream for StringOutput {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn unread_byte(&mut self, _byte: u8) {}

    fn write_byte(&mut self, byte: u8) -> bool {
        self.bytes.push(byte);
        true
    }

    fn is_eof(&mut self) -> bool {
        false
    }

    fn is_input(&self) -> bool {
        false
    }

    fn take_string(&mut self) -> Option<Vec<u8>> {
        Some(std::mem::take(&mut self.bytes))
    }
}

enum Slot {
    Open(Box<dyn ByteStream>),
    /// Closed, but its stream object may still be reachable
    Closed,
    Free,
}

/// Every stream opened by a program, indexed by the id stored in its
/// stream object
///
/// A slot is only reused once the collector finds its stream object
/// unreachable.
#[derive(Default)]
pub struct StreamTable {
    slots: Vec<Slot>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stream: Box<dyn ByteStream>) -> usize {
        match self.slots.iter().position(|slot| matches!(slot, Slot::Free)) {
            Some(id) => {
                self.slots[id] = Slot::Open(stream);
                id
            }
            None => {
                self.slots.push(Slot::Open(stream));
                self.slots.len() - 1
            }
        }
    }

    pub fn get(&mut self, id: usize) -> Option<&mut Box<dyn ByteStream>> {
        match self.slots.get_mut(id)? {
            Slot::Open(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn close(&mut self, id: usize) {
        match self.slots.get_mut(id) {
            Some(slot) if matches!(slot, Slot::Open(_)) => {
                if let Slot::Open(mut stream) = std::mem::replace(slot, Slot::Closed) {
                    stream.close();
                }
            }
            _ => (),
        }
    }

    pub fn is_open(&self, id: usize) -> bool {
        matches!(self.slots.get(id), Some(Slot::Open(_)))
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| matches!(slot, Slot::Open(_))).count()
    }

    /// Closes and frees every slot whose id is not in `live`; the
    /// number of streams that were still open
    pub fn release(&mut self, live: &BTreeSet<usize>) -> usize {
        let mut closed = 0;
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if live.contains(&id) {
                continue;
            }

            if let Slot::Open(mut stream) = std::mem::replace(slot, Slot::Free) {
                stream.close();
                closed += 1;
            }
        }

        closed
    }
}

/// Registers a stream and returns the heap object naming it
pub fn make(env: &mut Env, stream: Box<dyn ByteStream>) -> MuResult<Value> {
    let obj = env.heap.alloc(1, SysClass::Stream)?;
    let id = env.streams.add(stream);
    env.heap.set_field(obj, 0, Value::Fixnum(id as i64));

    Ok(Value::Heap(obj))
}

pub fn is_stream(env: &Env, v: Value) -> bool {
    matches!(v, Value::Heap(r) if env.heap.class_of(r) == SysClass::Stream)
}

pub fn id(env: &Env, v: Value) -> Option<usize> {
    match v {
        Value::Heap(r) if env.heap.class_of(r) == SysClass::Stream => {
            env.heap.field(r, 0).as_fixnum().map(|n| n as usize)
        }
        _ => None,
    }
}

fn with_stream<T>(env: &mut Env, v: Value, default: T, f: impl FnOnce(&mut dyn ByteStream) -> T) -> T {
    match id(env, v).and_then(|id| env.streams.get(id)) {
        Some(stream) => f(&mut **stream),
        None => default,
    }
}

pub fn read_byte(env: &mut Env, v: Value) -> Option<u8> {
    with_stream(env, v, None, |s| s.read_byte())
}

pub fn unread_byte(env: &mut Env, v: Value, byte: u8) {
    with_stream(env, v, (), |s| s.unread_byte(byte))
}

pub fn write_byte(env: &mut Env, v: Value, byte: u8) -> bool {
    with_stream(env, v, false, |s| s.write_byte(byte))
}

/// Writes every byte of `text`; false if any write failed
pub fn write_str(env: &mut Env, v: Value, text: &str) -> bool {
    with_stream(env, v, false, |s| text.bytes().all(|b| s.write_byte(b)))
}

pub fn flush(env: &mut Env, v: Value) {
    with_stream(env, v, (), |s| s.flush())
}

pub fn is_eof(env: &mut Env, v: Value) -> bool {
    with_stream(env, v, true, |s| s.is_eof())
}

pub fn is_input(env: &mut Env, v: Value) -> bool {
    with_stream(env, v, false, |s| s.is_input())
}

pub fn is_open(env: &Env, v: Value) -> bool {
    id(env, v).is_some_and(|id| env.streams.is_open(id))
}

pub fn take_string(env: &mut Env, v: Value) -> Option<Vec<u8>> {
    with_stream(env, v, None, |s| s.take_string())
}

pub fn close(env: &mut Env, v: Value) {
    if let Some(id) = id(env, v) {
        env.streams.close(id);
    }
}
