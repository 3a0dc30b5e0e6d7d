//! The typed argument-stack protocol.
//!
//! This is the one wire format shared between host-native calls and handler
//! code registered through the plugin API: a strictly ordered sequence of
//! tagged values, pushed by the producer and popped by the consumer in the
//! same order.

mod frame;
mod value;

pub use frame::*;
pub use value::*;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// The channel owned by the single in-flight cross-boundary call.
///
/// Only one frame may be open at a time through [`ArgumentStack::begin`]; a call
/// that needs to re-enter the boundary from inside a handler has to open an
/// explicit nested frame with [`ArgumentStack::begin_nested`].
#[derive(Debug, Default)]
pub struct ArgumentStack {
    frames: Mutex<Vec<ArgumentFrame>>,
}

impl ArgumentStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, Vec<ArgumentFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the frame for a new call.
    ///
    /// # Errors
    /// * [`Error::FrameBusy`] - another call's frame is still open
    pub fn begin(&self) -> Result<()> {
        let mut frames = self.frames();
        if !frames.is_empty() {
            return Err(Error::FrameBusy);
        }

        frames.push(ArgumentFrame::new());
        Ok(())
    }

    /// Opens a frame on top of the current one, shadowing it until [`ArgumentStack::end`].
    pub fn begin_nested(&self) {
        self.frames().push(ArgumentFrame::new());
    }

    pub fn depth(&self) -> usize {
        self.frames().len()
    }

    pub fn push<T: StackValue>(&self, value: T) -> Result<()> {
        let mut frames = self.frames();
        let frame = frames.last_mut().ok_or(Error::NoActiveFrame)?;
        frame.push(value);
        Ok(())
    }

    pub fn pop<T: StackValue>(&self) -> Result<T> {
        let mut frames = self.frames();
        let frame = frames.last_mut().ok_or(Error::NoActiveFrame)?;
        frame.pop()
    }

    /// Closes the innermost frame, reporting values that were pushed but never read.
    pub fn end(&self) -> Result<()> {
        let frame = self.frames().pop().ok_or(Error::NoActiveFrame)?;
        frame.finish()
    }

    /// Moves the innermost frame's contents out, leaving it open and empty.
    pub(crate) fn take(&self) -> Result<ArgumentFrame> {
        let mut frames = self.frames();
        let frame = frames.last_mut().ok_or(Error::NoActiveFrame)?;
        Ok(std::mem::take(frame))
    }

    /// Replaces the innermost frame's contents.
    pub(crate) fn replace(&self, frame: ArgumentFrame) -> Result<()> {
        let mut frames = self.frames();
        let slot = frames.last_mut().ok_or(Error::NoActiveFrame)?;
        *slot = frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_in_flight() {
        let stack = ArgumentStack::new();
        stack.begin().unwrap();

        assert!(matches!(stack.begin(), Err(Error::FrameBusy)));
    }

    #[test]
    fn nested_frame_shadows_outer() {
        let stack = ArgumentStack::new();
        stack.begin().unwrap();
        stack.push(1i32).unwrap();

        stack.begin_nested();
        stack.push(String::from("inner")).unwrap();
        assert_eq!(stack.pop::<String>().unwrap(), "inner");
        stack.end().unwrap();

        assert_eq!(stack.pop::<i32>().unwrap(), 1);
        stack.end().unwrap();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn closed_stack_rejects_values() {
        let stack = ArgumentStack::new();

        assert!(matches!(stack.push(1i32), Err(Error::NoActiveFrame)));
        assert!(matches!(stack.pop::<i32>(), Err(Error::NoActiveFrame)));
        assert!(matches!(stack.end(), Err(Error::NoActiveFrame)));
    }

    #[test]
    fn end_reports_unread_values() {
        let stack = ArgumentStack::new();
        stack.begin().unwrap();
        stack.push(ObjectId(1)).unwrap();

        assert!(matches!(stack.end(), Err(Error::LeftoverValues { remaining: 1 })));
        // the frame is gone either way
        stack.begin().unwrap();
    }
}
