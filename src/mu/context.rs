// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/context.rs

// Execution contexts. A context holds the dynamic stack of call
// frames, the lexical frames visible to compiled references, and any
// frames pushed explicitly as closures; the dynamic stack can be
// captured as a value and rebuilt later.

// <>

use super::cons;
use super::function;
use super::value::Value;
use super::vector::{self, VecType};
use super::{Env, MuResult};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One function application
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub func: Value,
    pub argv: Vec<Value>,
    /// Frame id of `func`, keying lexical lookups
    pub id: Value,
    pub value: Value,
    /// Vector the arguments were copied from, for frames rebuilt from
    /// values; argument updates are written through to it
    pub backing: Option<Value>,
}

pub type FrameRef = Rc<RefCell<Frame>>;

impl Frame {
    pub fn new(env: &Env, func: Value, argv: Vec<Value>) -> FrameRef {
        Rc::new(RefCell::new(Frame {
            func,
            argv,
            id: function::frame_id(env, func),
            value: Value::NIL,
            backing: None,
        }))
    }

    /// Every value the frame keeps alive
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        [self.func, self.id, self.value]
            .into_iter()
            .chain(self.argv.iter().copied())
            .chain(self.backing)
    }
}

/// Call counts, for `cx-info`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StackInfo {
    pub calls: usize,
    pub depth: usize,
    pub max: usize,
}

/// Stack heights to return to after a caught exception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    dynamic: usize,
    pins: usize,
}

#[derive(Default)]
pub struct Context {
    dynamic: Vec<FrameRef>,
    lexical: HashMap<Value, Vec<FrameRef>>,
    closures: HashMap<Value, Vec<FrameRef>>,
    // values held by native code across allocations
    pins: Vec<Value>,
    info: StackInfo,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self) -> StackInfo {
        self.info
    }

    pub fn depth(&self) -> usize {
        self.dynamic.len()
    }

    pub fn dynamic_push(&mut self, frame: FrameRef) {
        if cfg!(feature = "stkdbg") {
            log::debug!("ctx: push {:?} depth {}", frame.borrow().func, self.dynamic.len());
        }

        self.dynamic.push(frame);
        self.info.calls += 1;
        self.info.depth = self.dynamic.len();
        self.info.max = self.info.max.max(self.info.depth);
    }

    pub fn dynamic_pop(&mut self) -> Option<FrameRef> {
        let frame = self.dynamic.pop();
        self.info.depth = self.dynamic.len();
        frame
    }

    /// Frame `offset` levels below the top of the dynamic stack
    pub fn map_dynamic(&self, offset: usize) -> Option<FrameRef> {
        let len = self.dynamic.len();
        (offset < len).then(|| self.dynamic[len - 1 - offset].clone())
    }

    pub fn lexical_push(&mut self, frame: FrameRef) {
        let id = frame.borrow().id;
        self.lexical.entry(id).or_default().push(frame);
    }

    /// Removes the innermost frame with this id
    pub fn lexical_pop(&mut self, id: Value) -> Option<FrameRef> {
        let frames = self.lexical.get_mut(&id)?;
        let frame = frames.pop();
        if frames.is_empty() {
            self.lexical.remove(&id);
        }
        frame
    }

    /// Removes this exact frame from the lexical map
    pub fn lexical_remove(&mut self, frame: &FrameRef) {
        let id = frame.borrow().id;
        if let Some(frames) = self.lexical.get_mut(&id) {
            if let Some(pos) = frames.iter().rposition(|f| Rc::ptr_eq(f, frame)) {
                frames.remove(pos);
            }
            if frames.is_empty() {
                self.lexical.remove(&id);
            }
        }
    }

    /// Innermost lexical frame with this id
    pub fn lexical_frame(&self, id: Value) -> Option<FrameRef> {
        self.lexical.get(&id)?.last().cloned()
    }

    /// Argument `offset` of the innermost lexical frame with this id
    pub fn lex_ref(&self, id: Value, offset: usize) -> Option<Value> {
        let frame = self.lexical_frame(id)?;
        let value = frame.borrow().argv.get(offset).copied();
        value
    }

    /// Updates a lexical argument; false if there is no such binding
    pub fn lex_set(&mut self, env: &mut Env, id: Value, offset: usize, value: Value) -> bool {
        let frame = match self.lexical_frame(id) {
            Some(frame) => frame,
            None => return false,
        };

        let mut frame = frame.borrow_mut();
        match frame.argv.get_mut(offset) {
            Some(slot) => *slot = value,
            None => return false,
        }

        if let Some(backing) = frame.backing {
            vector::set_elt(env, backing, offset, value);
        }

        true
    }

    pub fn pin(&mut self, value: Value) {
        self.pins.push(value)
    }

    pub fn pins_len(&self) -> usize {
        self.pins.len()
    }

    /// Drops pins back to an earlier length, returning those removed
    pub fn unpin_to(&mut self, len: usize) -> Vec<Value> {
        self.pins.split_off(len.min(self.pins.len()))
    }

    pub fn mark(&self) -> Mark {
        Mark {
            dynamic: self.dynamic.len(),
            pins: self.pins.len(),
        }
    }

    /// Discards the frames and pins added since `mark`, along with the
    /// lexical bindings those frames made
    pub fn unwind(&mut self, mark: Mark) {
        while self.dynamic.len() > mark.dynamic {
            if let Some(frame) = self.dynamic_pop() {
                self.lexical_remove(&frame);
            }
        }

        self.pins.truncate(mark.pins);
    }

    /// Empties the stacks, keeping explicitly pushed closure frames
    pub fn reset(&mut self) {
        self.unwind(Mark { dynamic: 0, pins: 0 });
        self.lexical.clear();

        for frame in self.closures.values().flatten() {
            let id = frame.borrow().id;
            self.lexical.entry(id).or_default().push(frame.clone());
        }
    }

    /// Every value the context keeps alive
    pub fn roots(&self) -> Vec<Value> {
        let mut roots = self.pins.clone();
        roots.extend(self.closures.keys().copied());

        let frames = self
            .dynamic
            .iter()
            .chain(self.lexical.values().flatten())
            .chain(self.closures.values().flatten());

        for frame in frames {
            roots.extend(frame.borrow().values());
        }

        roots
    }

    /// `(func . #(:t args...))`
    pub fn frame_to_value(env: &mut Env, frame: &FrameRef) -> MuResult<Value> {
        let (func, argv) = {
            let f = frame.borrow();
            (f.func, f.argv.clone())
        };

        let args = vector::from_values(env, VecType::T, &argv)?;
        cons::cons(env, func, args)
    }

    /// Inverse of `frame_to_value`; `None` if `v` has the wrong shape
    pub fn value_to_frame(env: &Env, v: Value) -> Option<FrameRef> {
        let func = cons::car(env, v);
        let args = cons::cdr(env, v);

        if !cons::is_cons(env, v)
            || !function::is_function(env, func)
            || !vector::is_vector(env, args)
            || vector::vtype(env, args) != VecType::T
        {
            return None;
        }

        let frame = Frame::new(env, func, vector::values(env, args));
        frame.borrow_mut().backing = Some(args);
        Some(frame)
    }

    /// Makes a frame value visible to lexical references
    pub fn closure_push(&mut self, env: &Env, v: Value) -> Option<()> {
        let frame = Self::value_to_frame(env, v)?;
        self.closures.entry(v).or_default().push(frame.clone());
        self.lexical_push(frame);
        Some(())
    }

    /// Undoes the most recent `closure_push` of this frame value
    pub fn closure_pop(&mut self, v: Value) -> Option<()> {
        let frames = self.closures.get_mut(&v)?;
        let frame = frames.pop()?;
        if frames.is_empty() {
            self.closures.remove(&v);
        }

        self.lexical_remove(&frame);
        Some(())
    }

    /// Writes a frame value's argument through to any pushed copies
    pub fn closure_set(&mut self, v: Value, offset: usize, value: Value) {
        if let Some(frames) = self.closures.get(&v) {
            for frame in frames {
                if let Some(slot) = frame.borrow_mut().argv.get_mut(offset) {
                    *slot = value;
                }
            }
        }
    }

    /// Captures the dynamic stack, outermost frame first, as
    /// `((frame...) . lexicals)`
    pub fn capture(&self, env: &mut Env) -> MuResult<Value> {
        let mut frames = Vec::with_capacity(self.dynamic.len());
        for frame in &self.dynamic {
            frames.push(Self::frame_to_value(env, frame)?);
        }

        let dynamic = cons::list(env, &frames)?;
        let lexical = vector::from_values(env, VecType::T, &[])?;
        cons::cons(env, dynamic, lexical)
    }

    /// Rebuilds a context from a captured state; only the dynamic
    /// stack is restored
    pub fn restore(env: &Env, saved: Value) -> Option<Context> {
        let mut ctx = Context::new();

        for frame in cons::to_vec(env, cons::car(env, saved)) {
            let frame = Self::value_to_frame(env, frame)?;
            frame.borrow_mut().backing = None;
            ctx.dynamic_push(frame);
        }

        Some(ctx)
    }
}
