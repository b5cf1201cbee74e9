//! Per-thread execution state: value stack, frames, exception handlers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::closure::Scope;
use crate::error::VmError;
use crate::value::Value;

/// Value stack capacity.
pub const MAX_STACK: usize = 1024;
/// Frame stack capacity.
pub const MAX_FRAMES: usize = 64;
/// Handler stack capacity.
pub const MAX_HANDLERS: usize = 64;

/// A call's local variables. Shared with closures that capture them.
pub type Locals = Arc<Mutex<Vec<Value>>>;

/// One active bytecode call.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Where execution resumes after RET.
    pub return_ip: usize,
    /// Stack height below the callee and its arguments.
    pub saved_sp: usize,
    pub locals: Locals,
    /// Scope chain of the closure being executed.
    pub scope: Option<Arc<Scope>>,
}

/// An installed TRY_START.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub catch_ip: usize,
    /// Frame depth when installed.
    pub frames: usize,
    /// Stack height when installed.
    pub sp: usize,
}

/// A thread of control. Not shared between threads.
#[derive(Debug)]
pub struct Context {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) handlers: Vec<Handler>,
}

/// Create an empty context.
pub fn context_init() -> Context {
    Context::new()
}

impl Context {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(MAX_STACK),
            frames: Vec::with_capacity(MAX_FRAMES),
            handlers: Vec::new(),
        }
    }

    /// Drop every value, frame and handler.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.handlers.clear();
    }

    /// Current stack height.
    pub fn sp(&self) -> usize {
        self.stack.len()
    }

    /// Current frame depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub(crate) fn push(&mut self, value: Value, at: usize) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK {
            return Err(VmError::StackOverflow { at });
        }
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self, at: usize) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { at })
    }

    pub(crate) fn peek(&self, at: usize) -> Result<&Value, VmError> {
        self.stack.last().ok_or(VmError::StackUnderflow { at })
    }

    /// Fail unless at least `n` values are on the stack.
    pub(crate) fn require(&self, n: usize, at: usize) -> Result<(), VmError> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow { at });
        }
        Ok(())
    }

    /// The top `n` values, bottom first.
    pub(crate) fn top(&self, n: usize, at: usize) -> Result<&[Value], VmError> {
        self.require(n, at)?;
        Ok(&self.stack[self.stack.len() - n..])
    }

    /// Pop `n` values, returned in push order. Nothing is removed on error.
    pub(crate) fn pop_n(&mut self, n: usize, at: usize) -> Result<Vec<Value>, VmError> {
        self.require(n, at)?;
        let from = self.stack.len() - n;
        Ok(self.stack.split_off(from))
    }

    /// Drop the top `n` values.
    pub(crate) fn discard(&mut self, n: usize) {
        let keep = self.stack.len().saturating_sub(n);
        self.stack.truncate(keep);
    }

    pub(crate) fn frame(&self, at: usize) -> Result<&Frame, VmError> {
        self.frames.last().ok_or(VmError::NoActiveFrame { at })
    }

    pub(crate) fn push_frame(&mut self, frame: Frame, at: usize) -> Result<(), VmError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(VmError::FrameOverflow { at });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub(crate) fn push_handler(&mut self, handler: Handler, at: usize) -> Result<(), VmError> {
        if self.handlers.len() >= MAX_HANDLERS {
            return Err(VmError::HandlerOverflow { at });
        }
        self.handlers.push(handler);
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
