use std::sync::{Mutex, MutexGuard};

use crate::value::Value;

/// One lookup scope on the context stack: either plain data or the built-in
/// helper table.
#[derive(Debug, Clone)]
pub enum Frame {
    Data(Value),
    Helpers,
}

/// The ordered list of lookup frames consulted during path resolution.
///
/// The top of the stack is the most recently pushed frame; resolution
/// searches top-down. The stack is owned by a single in-flight `parse` call,
/// so the mutex only arbitrates the brief push/pop/snapshot accesses and is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Mutex<Vec<Frame>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame for the lifetime of the engine (helper frame).
    pub fn install(&self, frame: Frame) {
        self.lock().push(frame);
    }

    /// Push a frame; the returned guard pops it when dropped, on every exit
    /// path including error propagation.
    pub fn push(&self, frame: Frame) -> FrameGuard<'_> {
        self.lock().push(frame);
        FrameGuard { stack: self }
    }

    pub fn push_data(&self, value: Value) -> FrameGuard<'_> {
        self.push(Frame::Data(value))
    }

    /// Snapshot of the frames, top first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().iter().rev().cloned().collect()
    }

    /// The value of the top data frame, or null.
    pub fn top_value(&self) -> Value {
        match self.lock().last() {
            Some(Frame::Data(value)) => value.clone(),
            _ => Value::Null,
        }
    }

    /// Replace the top frame's data in place (`$EACH` element rotation,
    /// `$SORT` in-place ordering).
    pub fn replace_top(&self, value: Value) {
        if let Some(slot) = self.lock().last_mut() {
            *slot = Frame::Data(value);
        }
    }

    /// Whether any frame on the stack exposes a log capability.
    pub fn has_log_capability(&self) -> bool {
        self.lock().iter().any(|f| matches!(f, Frame::Helpers))
    }

    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        self.frames.lock().expect("context stack lock poisoned")
    }
}

/// Scope guard for a pushed frame. Dropping it pops the frame, which keeps
/// push/pop balanced even when a handler returns early with `?`.
#[must_use = "dropping the guard pops the frame"]
pub struct FrameGuard<'a> {
    stack: &'a ContextStack,
}

impl FrameGuard<'_> {
    /// Swap the value in this guard's slot. Only valid while the guard's
    /// frame is still the top of the stack.
    pub fn swap(&self, value: Value) {
        self.stack.replace_top(value);
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.stack.lock().pop();
    }
}
