use std::collections::VecDeque;

use super::value::{ObjectId, StackValue, Value, Vector};
use crate::error::{Error, Result};

/// The in-flight typed value stream of one cross-boundary call.
///
/// Values are popped in the order they were pushed. Every pop is checked
/// against the slot's tag, but the frame does not know the arity of the call
/// it belongs to: producer and consumer agree on that out-of-band, and
/// [`ArgumentFrame::finish`] reports anything left unread.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArgumentFrame {
    values: VecDeque<Value>,
    popped: usize,
}

impl ArgumentFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: StackValue>(&mut self, value: T) -> &mut Self {
        self.values.push_back(value.into_value());
        self
    }

    pub fn push_value(&mut self, value: Value) -> &mut Self {
        self.values.push_back(value);
        self
    }

    /// Consumes the next slot as a `T`.
    ///
    /// # Errors
    /// * [`Error::StackUnderflow`] - every pushed value has already been consumed
    /// * [`Error::TypeMismatch`] - the next slot holds another type, it is left in place
    pub fn pop<T: StackValue>(&mut self) -> Result<T> {
        let index = self.popped;

        let found = match self.values.front() {
            Some(value) => value.tag(),
            None => {
                return Err(Error::StackUnderflow {
                    index,
                    expected: T::TAG,
                })
            }
        };

        if found != T::TAG {
            return Err(Error::TypeMismatch {
                index,
                expected: T::TAG,
                found,
            });
        }

        let value = self
            .values
            .pop_front()
            .ok_or(Error::StackUnderflow { index, expected: T::TAG })?;
        self.popped += 1;

        T::from_value(value).map_err(|value| Error::TypeMismatch {
            index,
            expected: T::TAG,
            found: value.tag(),
        })
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.front()
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Tears the frame down, failing if any pushed value was never read.
    pub fn finish(self) -> Result<()> {
        match self.values.len() {
            0 => Ok(()),
            remaining => {
                let next = self.values.front().map(|value| value.tag());
                tracing::warn!(remaining, ?next, "frame closed with unread values");
                Err(Error::LeftoverValues { remaining })
            }
        }
    }
}

/// A return value that is written to a frame slot by slot.
pub trait IntoFrame {
    fn push_into(self, frame: &mut ArgumentFrame);

    fn into_frame(self) -> ArgumentFrame
    where
        Self: Sized,
    {
        let mut frame = ArgumentFrame::new();
        self.push_into(&mut frame);
        frame
    }
}

impl IntoFrame for () {
    fn push_into(self, _: &mut ArgumentFrame) {}
}

impl IntoFrame for ArgumentFrame {
    fn push_into(self, frame: &mut ArgumentFrame) {
        for value in self.values {
            frame.push_value(value);
        }
    }
}

macro_rules! into_frame_single {
    ($($ty:ty),*) => {
        $(
            impl IntoFrame for $ty {
                fn push_into(self, frame: &mut ArgumentFrame) {
                    frame.push(self);
                }
            }
        )*
    };
}

into_frame_single!(i32, f32, String, ObjectId, Vector, serde_json::Value);

macro_rules! into_frame_tuple {
    ($($name:ident),+) => {
        impl<$($name: StackValue),+> IntoFrame for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_into(self, frame: &mut ArgumentFrame) {
                let ($($name,)+) = self;
                $(frame.push($name);)+
            }
        }
    };
}

into_frame_tuple!(A, B);
into_frame_tuple!(A, B, C);
into_frame_tuple!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::ValueTag;

    #[test]
    fn pops_in_push_order() {
        let mut frame = ArgumentFrame::new();
        frame.push(5i32).push(String::from("a"));

        assert_eq!(frame.pop::<i32>().unwrap(), 5);
        assert_eq!(frame.pop::<String>().unwrap(), "a");
        frame.finish().unwrap();
    }

    #[test]
    fn wrong_tag_is_a_type_mismatch() {
        let mut frame = ArgumentFrame::new();
        frame.push(5i32);

        let err = frame.pop::<f32>().unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                index: 0,
                expected: ValueTag::Float,
                found: ValueTag::Int
            }
        ));

        // the slot survives the failed pop
        assert_eq!(frame.pop::<i32>().unwrap(), 5);
    }

    #[test]
    fn empty_frame_underflows() {
        let mut frame = ArgumentFrame::new();

        assert!(matches!(
            frame.pop::<i32>(),
            Err(Error::StackUnderflow { index: 0, expected: ValueTag::Int })
        ));
    }

    #[test]
    fn underflow_reports_slot_index() {
        let mut frame = ArgumentFrame::new();
        frame.push(ObjectId(7));
        frame.pop::<ObjectId>().unwrap();

        assert!(matches!(
            frame.pop::<Vector>(),
            Err(Error::StackUnderflow { index: 1, expected: ValueTag::Vector })
        ));
    }

    #[test]
    fn leftovers_are_reported_at_teardown() {
        let mut frame = ArgumentFrame::new();
        frame.push(1i32).push(2.5f32);
        frame.pop::<i32>().unwrap();

        assert!(matches!(frame.finish(), Err(Error::LeftoverValues { remaining: 1 })));
    }

    #[test]
    fn tuples_push_left_to_right() {
        let mut frame = (1i32, String::from("two"), 3.0f32).into_frame();

        assert_eq!(frame.pop::<i32>().unwrap(), 1);
        assert_eq!(frame.pop::<String>().unwrap(), "two");
        assert_eq!(frame.pop::<f32>().unwrap(), 3.0);
    }
}
